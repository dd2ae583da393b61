use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::rate_limit::DEFAULT_DAILY_RESEARCH_QUOTA;

pub const MAX_TOOL_ROUNDS_CEILING: u32 = 3;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub research: ResearchConfig,
    pub agent: AgentConfig,
    pub auth: AuthConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// OpenAI-compatible model gateway.
#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub max_results: u32,
    pub domain_hints: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ResearchConfig {
    pub daily_quota: u32,
    pub default_jurisdiction: String,
    pub cache_ttl_days: u32,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub max_tool_rounds: u32,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub userinfo_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
    pub search_api_key: Option<String>,
    pub auth_userinfo_url: Option<String>,
    pub max_tool_rounds: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://studymate.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: String::new().into(),
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 60,
            },
            search: SearchConfig {
                base_url: "https://api.tavily.com/search".to_string(),
                api_key: None,
                max_results: 6,
                domain_hints: vec![
                    "zambialii.org".to_string(),
                    "judiciaryzambia.com".to_string(),
                    "parliament.gov.zm".to_string(),
                ],
                timeout_secs: 20,
            },
            research: ResearchConfig {
                daily_quota: DEFAULT_DAILY_RESEARCH_QUOTA,
                default_jurisdiction: "Zambia".to_string(),
                cache_ttl_days: 90,
            },
            agent: AgentConfig { max_tool_rounds: MAX_TOOL_ROUNDS_CEILING },
            auth: AuthConfig { userinfo_url: None, api_key: None, timeout_secs: 10 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("studymate.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = secret_value(llm_api_key_value);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(search) = patch.search {
            if let Some(base_url) = search.base_url {
                self.search.base_url = base_url;
            }
            if let Some(search_api_key_value) = search.api_key {
                self.search.api_key = Some(secret_value(search_api_key_value));
            }
            if let Some(max_results) = search.max_results {
                self.search.max_results = max_results;
            }
            if let Some(domain_hints) = search.domain_hints {
                self.search.domain_hints = domain_hints;
            }
            if let Some(timeout_secs) = search.timeout_secs {
                self.search.timeout_secs = timeout_secs;
            }
        }

        if let Some(research) = patch.research {
            if let Some(daily_quota) = research.daily_quota {
                self.research.daily_quota = daily_quota;
            }
            if let Some(default_jurisdiction) = research.default_jurisdiction {
                self.research.default_jurisdiction = default_jurisdiction;
            }
            if let Some(cache_ttl_days) = research.cache_ttl_days {
                self.research.cache_ttl_days = cache_ttl_days;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(max_tool_rounds) = agent.max_tool_rounds {
                self.agent.max_tool_rounds = max_tool_rounds;
            }
        }

        if let Some(auth) = patch.auth {
            if let Some(userinfo_url) = auth.userinfo_url {
                self.auth.userinfo_url = Some(userinfo_url);
            }
            if let Some(auth_api_key_value) = auth.api_key {
                self.auth.api_key = Some(secret_value(auth_api_key_value));
            }
            if let Some(timeout_secs) = auth.timeout_secs {
                self.auth.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("STUDYMATE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("STUDYMATE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("STUDYMATE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("STUDYMATE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("STUDYMATE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("STUDYMATE_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("STUDYMATE_LLM_API_KEY") {
            self.llm.api_key = secret_value(value);
        }
        if let Some(value) = read_env("STUDYMATE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("STUDYMATE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("STUDYMATE_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("STUDYMATE_SEARCH_BASE_URL") {
            self.search.base_url = value;
        }
        if let Some(value) = read_env("STUDYMATE_SEARCH_API_KEY") {
            self.search.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("STUDYMATE_SEARCH_MAX_RESULTS") {
            self.search.max_results = parse_u32("STUDYMATE_SEARCH_MAX_RESULTS", &value)?;
        }
        if let Some(value) = read_env("STUDYMATE_SEARCH_DOMAIN_HINTS") {
            self.search.domain_hints = parse_list(&value);
        }

        if let Some(value) = read_env("STUDYMATE_RESEARCH_DAILY_QUOTA") {
            self.research.daily_quota = parse_u32("STUDYMATE_RESEARCH_DAILY_QUOTA", &value)?;
        }
        if let Some(value) = read_env("STUDYMATE_RESEARCH_DEFAULT_JURISDICTION") {
            self.research.default_jurisdiction = value;
        }
        if let Some(value) = read_env("STUDYMATE_RESEARCH_CACHE_TTL_DAYS") {
            self.research.cache_ttl_days =
                parse_u32("STUDYMATE_RESEARCH_CACHE_TTL_DAYS", &value)?;
        }

        if let Some(value) = read_env("STUDYMATE_AGENT_MAX_TOOL_ROUNDS") {
            self.agent.max_tool_rounds = parse_u32("STUDYMATE_AGENT_MAX_TOOL_ROUNDS", &value)?;
        }

        if let Some(value) = read_env("STUDYMATE_AUTH_USERINFO_URL") {
            self.auth.userinfo_url = Some(value);
        }
        if let Some(value) = read_env("STUDYMATE_AUTH_API_KEY") {
            self.auth.api_key = Some(secret_value(value));
        }

        if let Some(value) = read_env("STUDYMATE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("STUDYMATE_SERVER_PORT") {
            self.server.port = parse_u16("STUDYMATE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("STUDYMATE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("STUDYMATE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("STUDYMATE_LOGGING_LEVEL").or_else(|| read_env("STUDYMATE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("STUDYMATE_LOGGING_FORMAT").or_else(|| read_env("STUDYMATE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = llm_base_url;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = secret_value(llm_api_key);
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(search_api_key) = overrides.search_api_key {
            self.search.api_key = Some(secret_value(search_api_key));
        }
        if let Some(userinfo_url) = overrides.auth_userinfo_url {
            self.auth.userinfo_url = Some(userinfo_url);
        }
        if let Some(max_tool_rounds) = overrides.max_tool_rounds {
            self.agent.max_tool_rounds = max_tool_rounds;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_search(&self.search)?;
        validate_research(&self.research)?;
        validate_agent(&self.agent)?;
        validate_auth(&self.auth)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }

    /// Web search is optional; without a key research degrades to ungrounded answers.
    pub fn search_enabled(&self) -> bool {
        self.search
            .api_key
            .as_ref()
            .map(|key| !key.expose_secret().trim().is_empty())
            .unwrap_or(false)
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("studymate.toml"), PathBuf::from("config/studymate.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.api_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "llm.api_key is required (set STUDYMATE_LLM_API_KEY or [llm].api_key)".to_string(),
        ));
    }

    if !is_http_url(llm.base_url.trim()) {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_search(search: &SearchConfig) -> Result<(), ConfigError> {
    if !is_http_url(search.base_url.trim()) {
        return Err(ConfigError::Validation(
            "search.base_url must start with http:// or https://".to_string(),
        ));
    }

    if search.max_results == 0 || search.max_results > 20 {
        return Err(ConfigError::Validation(
            "search.max_results must be in range 1..=20".to_string(),
        ));
    }

    if search.timeout_secs == 0 || search.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "search.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_research(research: &ResearchConfig) -> Result<(), ConfigError> {
    if research.daily_quota == 0 {
        return Err(ConfigError::Validation(
            "research.daily_quota must be greater than zero".to_string(),
        ));
    }

    if research.default_jurisdiction.trim().is_empty() {
        return Err(ConfigError::Validation(
            "research.default_jurisdiction must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.max_tool_rounds == 0 || agent.max_tool_rounds > MAX_TOOL_ROUNDS_CEILING {
        return Err(ConfigError::Validation(format!(
            "agent.max_tool_rounds must be in range 1..={MAX_TOOL_ROUNDS_CEILING}"
        )));
    }

    Ok(())
}

fn validate_auth(auth: &AuthConfig) -> Result<(), ConfigError> {
    let Some(userinfo_url) = auth.userinfo_url.as_deref().map(str::trim) else {
        return Err(ConfigError::Validation(
            "auth.userinfo_url is required (set STUDYMATE_AUTH_USERINFO_URL or [auth].userinfo_url)"
                .to_string(),
        ));
    };

    if !is_http_url(userinfo_url) {
        return Err(ConfigError::Validation(
            "auth.userinfo_url must start with http:// or https://".to_string(),
        ));
    }

    if auth.timeout_secs == 0 || auth.timeout_secs > 60 {
        return Err(ConfigError::Validation(
            "auth.timeout_secs must be in range 1..=60".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    search: Option<SearchPatch>,
    research: Option<ResearchPatch>,
    agent: Option<AgentPatch>,
    auth: Option<AuthPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    max_results: Option<u32>,
    domain_hints: Option<Vec<String>>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ResearchPatch {
    daily_quota: Option<u32>,
    default_jurisdiction: Option<String>,
    cache_ttl_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    max_tool_rounds: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthPatch {
    userinfo_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    fn required_overrides() -> ConfigOverrides {
        ConfigOverrides {
            llm_api_key: Some("sk-test".to_string()),
            auth_userinfo_url: Some("https://auth.example.com/user".to_string()),
            ..ConfigOverrides::default()
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_GATEWAY_KEY", "sk-from-env");
        env::set_var("TEST_SEARCH_KEY", "tvly-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("studymate.toml");
            fs::write(
                &path,
                r#"
[llm]
api_key = "${TEST_GATEWAY_KEY}"

[search]
api_key = "${TEST_SEARCH_KEY}"
domain_hints = ["zambialii.org"]

[auth]
userinfo_url = "https://auth.example.com/user"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.llm.api_key.expose_secret() == "sk-from-env",
                "gateway key should be interpolated from environment",
            )?;
            ensure(config.search_enabled(), "search should be enabled once a key is present")?;
            ensure(
                config.search.domain_hints == vec!["zambialii.org".to_string()],
                "domain hints should come from the file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_GATEWAY_KEY", "TEST_SEARCH_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("STUDYMATE_LOG_LEVEL", "warn");
        env::set_var("STUDYMATE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions {
                overrides: required_overrides(),
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["STUDYMATE_LOG_LEVEL", "STUDYMATE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("STUDYMATE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("STUDYMATE_LLM_MODEL", "model-from-env");
        env::set_var("STUDYMATE_RESEARCH_DAILY_QUOTA", "7");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("studymate.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[llm]
model = "model-from-file"

[research]
daily_quota = 3
default_jurisdiction = "Kenya"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..required_overrides()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.llm.model == "model-from-env", "env model should win over file")?;
            ensure(config.research.daily_quota == 7, "env quota should win over file")?;
            ensure(
                config.research.default_jurisdiction == "Kenya",
                "file jurisdiction should win over defaults",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "STUDYMATE_DATABASE_URL",
            "STUDYMATE_LLM_MODEL",
            "STUDYMATE_RESEARCH_DAILY_QUOTA",
        ]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                auth_userinfo_url: Some("https://auth.example.com/user".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }) {
            Ok(_) => {
                return Err("expected validation failure but config load succeeded".to_string())
            }
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("llm.api_key")
        );
        ensure(has_message, "validation failure should mention llm.api_key")
    }

    #[test]
    fn tool_rounds_above_ceiling_are_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides { max_tool_rounds: Some(5), ..required_overrides() },
            ..LoadOptions::default()
        });
        let rejected = matches!(
            result,
            Err(ConfigError::Validation(ref message)) if message.contains("max_tool_rounds")
        );
        ensure(rejected, "max_tool_rounds above the ceiling should fail validation")
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                llm_api_key: Some("sk-secret-value".to_string()),
                search_api_key: Some("tvly-secret-value".to_string()),
                ..required_overrides()
            },
            ..LoadOptions::default()
        })
        .map_err(|err| format!("config load failed: {err}"))?;
        let debug = format!("{config:?}");

        ensure(!debug.contains("sk-secret-value"), "debug output should not contain llm key")?;
        ensure(!debug.contains("tvly-secret-value"), "debug output should not contain search key")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )?;
        ensure(config.agent.max_tool_rounds == 3, "default tool rounds should be 3")?;
        ensure(config.research.daily_quota == 5, "default research quota should be 5")
    }
}
