pub mod config;
pub mod domain;
pub mod errors;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::conversation::{ChatMessage, MessageContent, Role, ToolCall, ToolResult};
pub use domain::identity::UserId;
pub use domain::rate_limit::{QuotaDecision, DEFAULT_DAILY_RESEARCH_QUOTA};
pub use domain::research::{ResearchCacheEntry, ResearchOrigin, ResearchOutcome, ResearchTopic};
pub use errors::{ApplicationError, DomainError, InterfaceError};
