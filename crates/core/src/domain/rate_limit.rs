use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::identity::UserId;

pub const DEFAULT_DAILY_RESEARCH_QUOTA: u32 = 5;

/// Research attempts made by one user on one UTC day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub user_id: UserId,
    pub day: NaiveDate,
    pub query_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub remaining: u32,
}

impl QuotaDecision {
    /// Decision after a successful increment to `count_after`.
    pub fn consumed(count_after: u32, limit: u32) -> Self {
        Self { allowed: true, remaining: limit.saturating_sub(count_after) }
    }

    pub fn denied() -> Self {
        Self { allowed: false, remaining: 0 }
    }
}
