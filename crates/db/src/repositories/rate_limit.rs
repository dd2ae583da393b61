use chrono::NaiveDate;
use sqlx::Row;

use studymate_core::domain::identity::UserId;
use studymate_core::domain::rate_limit::QuotaDecision;

use super::{format_day, RateLimitRepository, RepositoryError};
use crate::DbPool;

pub struct SqlRateLimitRepository {
    pool: DbPool,
}

impl SqlRateLimitRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RateLimitRepository for SqlRateLimitRepository {
    async fn check_and_consume(
        &self,
        user_id: &UserId,
        day: NaiveDate,
        limit: u32,
    ) -> Result<QuotaDecision, RepositoryError> {
        if limit == 0 {
            return Ok(QuotaDecision::denied());
        }

        // The conflict branch only fires below the ceiling; at the ceiling no
        // row is written and RETURNING yields nothing.
        let row = sqlx::query(
            "INSERT INTO research_rate_limit (user_id, day, query_count)
             VALUES (?, ?, 1)
             ON CONFLICT(user_id, day) DO UPDATE
                SET query_count = research_rate_limit.query_count + 1
                WHERE research_rate_limit.query_count < ?
             RETURNING query_count",
        )
        .bind(user_id.as_str())
        .bind(format_day(day))
        .bind(i64::from(limit))
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(QuotaDecision::denied());
        };
        let count: i64 =
            row.try_get("query_count").map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let count = u32::try_from(count)
            .map_err(|_| RepositoryError::Decode(format!("negative query_count {count}")))?;

        Ok(QuotaDecision::consumed(count, limit))
    }
}
