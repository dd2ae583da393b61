use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use studymate_core::domain::conversation::ChatMessage;
use studymate_core::domain::identity::UserId;
use studymate_core::domain::research::{
    ResearchCacheEntry, ResearchOrigin, ResearchOutcome, ResearchTopic,
};
use studymate_db::repositories::ResearchCacheRepository;

use crate::llm::{ChatRequest, LlmClient};
use crate::quota::ResearchQuota;
use crate::search::{build_search_query, SearchHit, WebSearch};
use crate::topic::TopicExtractor;

#[derive(Clone, Debug, Default)]
pub struct ResearchSettings {
    /// Entries verified longer ago than this are refreshed; 0 keeps them forever.
    pub cache_ttl_days: u32,
    pub domain_hints: Vec<String>,
}

/// Grounds an answer in web sources: topic extraction, shared cache, per-user
/// quota, search, then synthesis strictly from the retrieved results.
pub struct ResearchPipeline {
    topics: TopicExtractor,
    cache: Arc<dyn ResearchCacheRepository>,
    quota: ResearchQuota,
    search: Arc<dyn WebSearch>,
    llm: Arc<dyn LlmClient>,
    settings: ResearchSettings,
}

impl ResearchPipeline {
    pub fn new(
        topics: TopicExtractor,
        cache: Arc<dyn ResearchCacheRepository>,
        quota: ResearchQuota,
        search: Arc<dyn WebSearch>,
        llm: Arc<dyn LlmClient>,
        settings: ResearchSettings,
    ) -> Self {
        Self { topics, cache, quota, search, llm, settings }
    }

    /// Always yields an outcome; failures degrade to `Unavailable` or to a
    /// stale cached brief.
    pub async fn research(
        &self,
        user_id: &UserId,
        query: &str,
        now: DateTime<Utc>,
    ) -> ResearchOutcome {
        let topic = self.topics.extract(query).await;
        let cache_key = topic.cache_key();

        let cached = match self.cache.lookup(&cache_key).await {
            Ok(entry) => entry,
            Err(error) => {
                warn!(
                    event_name = "assistant.research.cache_unavailable",
                    cache_key = %cache_key,
                    error = %error,
                    "research cache lookup failed, treating as miss"
                );
                None
            }
        };

        let stale = match cached {
            Some(entry) if !entry.is_stale(now, self.settings.cache_ttl_days) => {
                info!(
                    event_name = "assistant.research.cache_hit",
                    user_id = %user_id,
                    cache_key = %cache_key,
                    access_count = entry.access_count,
                    "serving cached research brief"
                );
                return ResearchOutcome::from_entry(entry, ResearchOrigin::Cache);
            }
            Some(entry) => {
                info!(
                    event_name = "assistant.research.cache_stale",
                    cache_key = %cache_key,
                    last_verified_at = %entry.last_verified_at,
                    "cached research brief is stale, attempting refresh"
                );
                Some(entry)
            }
            None => {
                info!(
                    event_name = "assistant.research.cache_miss",
                    cache_key = %cache_key,
                    "no cached research brief"
                );
                None
            }
        };

        if !self.search.is_enabled() {
            return degrade(stale, unavailable("web search is not configured"));
        }

        let decision = self.quota.check_and_consume(user_id, now.date_naive()).await;
        if !decision.allowed {
            info!(
                event_name = "assistant.research.quota_exhausted",
                user_id = %user_id,
                daily_limit = self.quota.daily_limit(),
                "daily research quota exhausted"
            );
            return degrade(
                stale,
                ResearchOutcome::QuotaExhausted { topic, daily_limit: self.quota.daily_limit() },
            );
        }

        let search_query =
            build_search_query(&topic.topic, &topic.jurisdiction, &self.settings.domain_hints);
        let hits = match self.search.search(&search_query).await {
            Ok(hits) if hits.is_empty() => {
                warn!(
                    event_name = "assistant.research.search_empty",
                    cache_key = %cache_key,
                    "web search returned no results"
                );
                return degrade(stale, unavailable("web search returned no results"));
            }
            Ok(hits) => hits,
            Err(error) => {
                warn!(
                    event_name = "assistant.research.search_failed",
                    cache_key = %cache_key,
                    error = %error,
                    "web search failed"
                );
                return degrade(stale, unavailable("web search is temporarily unavailable"));
            }
        };

        let brief = match self.synthesize(&topic, &hits).await {
            Some(brief) => brief,
            None => return degrade(stale, unavailable("research synthesis failed")),
        };
        let sources = hits.iter().map(|hit| hit.url.trim()).collect::<Vec<_>>().join("\n");

        let entry = ResearchCacheEntry::new(&topic, brief, sources, now);
        if let Err(error) = self.cache.store(entry.clone()).await {
            warn!(
                event_name = "assistant.research.cache_store_failed",
                cache_key = %cache_key,
                error = %error,
                "failed to cache research brief"
            );
        } else {
            info!(
                event_name = "assistant.research.cached",
                user_id = %user_id,
                cache_key = %cache_key,
                source_count = hits.len(),
                "stored fresh research brief"
            );
        }

        ResearchOutcome::from_entry(entry, ResearchOrigin::Fresh)
    }

    async fn synthesize(&self, topic: &ResearchTopic, hits: &[SearchHit]) -> Option<String> {
        let instruction = format!(
            "You are a legal research assistant. Write a structured research brief on \"{}\" \
             in {} using ONLY the search results supplied by the user. Do not speculate and do \
             not add cases, statutes or facts that are not in the results. Cite the source URL \
             for every point. If the results do not settle the question, say so plainly.",
            topic.topic, topic.jurisdiction
        );
        let request = ChatRequest::new(vec![
            ChatMessage::system(instruction),
            ChatMessage::user(format_hits(hits)),
        ])
        .with_temperature(0.1);

        match self.llm.complete(request).await {
            Ok(completion) if !completion.content.trim().is_empty() => {
                Some(completion.content.trim().to_string())
            }
            Ok(_) => {
                warn!(
                    event_name = "assistant.research.synthesis_empty",
                    topic = %topic.topic,
                    "synthesis returned an empty brief"
                );
                None
            }
            Err(error) => {
                warn!(
                    event_name = "assistant.research.synthesis_failed",
                    topic = %topic.topic,
                    error = %error,
                    "research synthesis failed"
                );
                None
            }
        }
    }
}

fn unavailable(reason: &str) -> ResearchOutcome {
    ResearchOutcome::Unavailable { reason: reason.to_string() }
}

fn degrade(stale: Option<ResearchCacheEntry>, otherwise: ResearchOutcome) -> ResearchOutcome {
    match stale {
        Some(entry) => ResearchOutcome::from_entry(entry, ResearchOrigin::Stale),
        None => otherwise,
    }
}

fn format_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(index, hit)| {
            let (title, url, content) = (hit.title.trim(), hit.url.trim(), hit.content.trim());
            format!("[{}] {title}\nURL: {url}\n{content}", index + 1)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
