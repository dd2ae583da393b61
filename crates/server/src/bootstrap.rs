use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use studymate_agent::prompt::{PromptError, PromptRenderer};
use studymate_agent::quota::ResearchQuota;
use studymate_agent::research::{ResearchPipeline, ResearchSettings};
use studymate_agent::search::SearchError;
use studymate_agent::tools::ToolRegistry;
use studymate_agent::topic::TopicExtractor;
use studymate_agent::{
    AssistantRuntime, DisabledSearch, HttpLlmClient, HttpWebSearch, LlmClient, LlmError, WebSearch,
};
use studymate_core::config::{AppConfig, ConfigError};
use studymate_db::{
    connect, migrations, DbPool, SqlRateLimitRepository, SqlResearchCacheRepository, SqlStudyStore,
};

use crate::auth::{AuthError, HttpIdentityProvider};
use crate::chat::ChatState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub chat: ChatState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("model client setup failed: {0}")]
    Llm(#[from] LlmError),
    #[error("web search client setup failed: {0}")]
    Search(#[from] SearchError),
    #[error("identity client setup failed: {0}")]
    Auth(#[from] AuthError),
    #[error("prompt templates failed to load: {0}")]
    Prompt(#[from] PromptError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(&config.llm)?);
    let search = search_client(&config)?;
    info!(
        event_name = "system.bootstrap.search_mode",
        correlation_id = "bootstrap",
        enabled = search.is_enabled(),
        "web search client initialized"
    );

    let pipeline = ResearchPipeline::new(
        TopicExtractor::new(llm.clone(), config.research.default_jurisdiction.clone()),
        Arc::new(SqlResearchCacheRepository::new(db_pool.clone())),
        ResearchQuota::new(
            Arc::new(SqlRateLimitRepository::new(db_pool.clone())),
            config.research.daily_quota,
        ),
        search,
        llm.clone(),
        ResearchSettings {
            cache_ttl_days: config.research.cache_ttl_days,
            domain_hints: config.search.domain_hints.clone(),
        },
    );

    let runtime = AssistantRuntime::new(
        llm,
        Arc::new(pipeline),
        Arc::new(SqlStudyStore::new(db_pool.clone())),
        ToolRegistry::with_study_tools(),
        Arc::new(PromptRenderer::new()?),
        config.agent.max_tool_rounds,
    );
    let identity = HttpIdentityProvider::new(&config.auth)?;

    Ok(Application {
        chat: ChatState { runtime: Arc::new(runtime), identity: Arc::new(identity) },
        config,
        db_pool,
    })
}

/// A missing or blank key disables search so cache misses never spend quota
/// on a request that cannot succeed.
fn search_client(config: &AppConfig) -> Result<Arc<dyn WebSearch>, SearchError> {
    match config.search.api_key.clone() {
        Some(api_key) if config.search_enabled() => {
            Ok(Arc::new(HttpWebSearch::new(&config.search, api_key)?))
        }
        _ => Ok(Arc::new(DisabledSearch)),
    }
}
