use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("upstream rate limit: {0}")]
    UpstreamRateLimited(String),
    #[error("upstream usage cap reached: {0}")]
    UpstreamQuotaExceeded(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("rate limited: {message}")]
    RateLimited { message: String, correlation_id: String },
    #[error("payment required: {message}")]
    PaymentRequired { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized { .. } => 401,
            Self::BadRequest { .. } => 400,
            Self::PaymentRequired { .. } => 402,
            Self::RateLimited { .. } => 429,
            Self::Internal { .. } => 500,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "Unauthorized. Please sign in again.",
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::RateLimited { .. } => "Rate limit exceeded. Please try again in a moment.",
            Self::PaymentRequired { .. } => {
                "AI usage limit reached. Please add credits to continue."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Unauthorized { correlation_id, .. }
            | Self::BadRequest { correlation_id, .. }
            | Self::RateLimited { correlation_id, .. }
            | Self::PaymentRequired { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::Unauthorized { correlation_id: id, .. }
            | InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::RateLimited { correlation_id: id, .. }
            | InterfaceError::PaymentRequired { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id }
            }
            ApplicationError::BadRequest(message) => Self::BadRequest { message, correlation_id },
            ApplicationError::Unauthorized(message) => {
                Self::Unauthorized { message, correlation_id }
            }
            ApplicationError::UpstreamRateLimited(message) => {
                Self::RateLimited { message, correlation_id }
            }
            ApplicationError::UpstreamQuotaExceeded(message) => {
                Self::PaymentRequired { message, correlation_id }
            }
            ApplicationError::Persistence(message)
            | ApplicationError::Integration(message)
            | ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id }
            }
        }
    }
}
