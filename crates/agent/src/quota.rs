use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, warn};

use studymate_core::domain::identity::UserId;
use studymate_core::domain::rate_limit::QuotaDecision;
use studymate_db::repositories::RateLimitRepository;

/// Per-user daily ceiling on research attempts.
pub struct ResearchQuota {
    repository: Arc<dyn RateLimitRepository>,
    daily_limit: u32,
}

impl ResearchQuota {
    pub fn new(repository: Arc<dyn RateLimitRepository>, daily_limit: u32) -> Self {
        Self { repository, daily_limit }
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    /// Counts one attempt for `user_id` on `today` (UTC). A store failure
    /// allows the attempt.
    pub async fn check_and_consume(&self, user_id: &UserId, today: NaiveDate) -> QuotaDecision {
        match self.repository.check_and_consume(user_id, today, self.daily_limit).await {
            Ok(decision) => {
                debug!(
                    event_name = "assistant.research.quota_checked",
                    user_id = %user_id,
                    allowed = decision.allowed,
                    remaining = decision.remaining,
                    "research quota checked"
                );
                decision
            }
            Err(error) => {
                warn!(
                    event_name = "assistant.research.quota_store_unavailable",
                    user_id = %user_id,
                    error = %error,
                    "rate limit store failed, allowing research"
                );
                QuotaDecision { allowed: true, remaining: self.daily_limit.saturating_sub(1) }
            }
        }
    }
}
