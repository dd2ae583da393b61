use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

use studymate_core::config::AuthConfig;
use studymate_core::domain::identity::UserId;
use studymate_core::errors::ApplicationError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing or malformed bearer token")]
    MissingToken,
    #[error("identity service rejected the token")]
    InvalidToken,
    #[error("identity service unavailable: {0}")]
    Unavailable(String),
}

impl From<AuthError> for ApplicationError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::MissingToken | AuthError::InvalidToken => {
                ApplicationError::Unauthorized(value.to_string())
            }
            AuthError::Unavailable(message) => ApplicationError::Integration(message),
        }
    }
}

/// Resolves a bearer token to the student it belongs to.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::MissingToken)?;
    let (scheme, token) = value.trim().split_once(' ').ok_or(AuthError::MissingToken)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

#[derive(Deserialize)]
struct UserInfo {
    id: String,
}

/// Asks the identity service's user-info endpoint who owns a token.
pub struct HttpIdentityProvider {
    http: reqwest::Client,
    userinfo_url: String,
    api_key: Option<SecretString>,
}

impl HttpIdentityProvider {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let userinfo_url = config.userinfo_url.clone().ok_or_else(|| {
            AuthError::Unavailable("auth.userinfo_url is not configured".to_string())
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        Ok(Self { http, userinfo_url, api_key: config.api_key.clone() })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let mut request = self.http.get(&self.userinfo_url).bearer_auth(token);
        if let Some(api_key) = &self.api_key {
            request = request.header("apikey", api_key.expose_secret());
        }

        let response = request.send().await.map_err(|e| AuthError::Unavailable(e.to_string()))?;
        match response.status() {
            StatusCode::OK => {
                let info: UserInfo =
                    response.json().await.map_err(|e| AuthError::Unavailable(e.to_string()))?;
                if info.id.trim().is_empty() {
                    return Err(AuthError::InvalidToken);
                }
                Ok(UserId(info.id))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AuthError::InvalidToken),
            status => Err(AuthError::Unavailable(format!("identity service returned {status}"))),
        }
    }
}
