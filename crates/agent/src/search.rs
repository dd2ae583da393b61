use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use studymate_core::config::SearchConfig;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("web search is not configured")]
    Disabled,
    #[error("web search returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("web search transport failure: {0}")]
    Transport(String),
    #[error("web search response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;
}

/// Stand-in used when no search API key is configured.
pub struct DisabledSearch;

#[async_trait]
impl WebSearch for DisabledSearch {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, SearchError> {
        Err(SearchError::Disabled)
    }
}

pub struct HttpWebSearch {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    max_results: u32,
}

#[derive(Serialize)]
struct SearchRequestBody<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: u32,
}

#[derive(Deserialize)]
struct SearchResponseBody {
    #[serde(default)]
    results: Vec<SearchHit>,
}

impl HttpWebSearch {
    pub fn new(config: &SearchConfig, api_key: SecretString) -> Result<Self, SearchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SearchError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: config.base_url.clone(),
            api_key,
            max_results: config.max_results,
        })
    }
}

#[async_trait]
impl WebSearch for HttpWebSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let body = SearchRequestBody {
            api_key: self.api_key.expose_secret(),
            query,
            max_results: self.max_results,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SearchError::Upstream { status: status.as_u16(), message });
        }

        let parsed: SearchResponseBody =
            response.json().await.map_err(|e| SearchError::Decode(e.to_string()))?;
        Ok(parsed.results.into_iter().filter(|hit| !hit.url.trim().is_empty()).collect())
    }
}

/// `"{topic} {jurisdiction} law"` narrowed to the configured domains.
pub fn build_search_query(topic: &str, jurisdiction: &str, domain_hints: &[String]) -> String {
    let base = format!("{} {} law", topic.trim(), jurisdiction.trim());
    let sites: Vec<String> = domain_hints
        .iter()
        .map(|domain| domain.trim())
        .filter(|domain| !domain.is_empty())
        .map(|domain| format!("site:{domain}"))
        .collect();

    if sites.is_empty() {
        base
    } else {
        format!("{base} ({})", sites.join(" OR "))
    }
}
