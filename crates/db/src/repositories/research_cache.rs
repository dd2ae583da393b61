use sqlx::Row;

use studymate_core::domain::research::ResearchCacheEntry;

use super::{format_timestamp, parse_timestamp, RepositoryError, ResearchCacheRepository};
use crate::DbPool;

pub struct SqlResearchCacheRepository {
    pool: DbPool,
}

impl SqlResearchCacheRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<ResearchCacheEntry, RepositoryError> {
    let last_verified_at: String =
        row.try_get("last_verified_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(ResearchCacheEntry {
        cache_key: row.try_get("cache_key").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        topic: row.try_get("topic").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        jurisdiction: row
            .try_get("jurisdiction")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        research_output: row
            .try_get("research_output")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        sources: row.try_get("sources").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        last_verified_at: parse_timestamp("last_verified_at", &last_verified_at)?,
        access_count: row
            .try_get("access_count")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
    })
}

#[async_trait::async_trait]
impl ResearchCacheRepository for SqlResearchCacheRepository {
    async fn lookup(&self, cache_key: &str) -> Result<Option<ResearchCacheEntry>, RepositoryError> {
        let row = sqlx::query(
            "UPDATE research_cache
             SET access_count = access_count + 1
             WHERE cache_key = ?
             RETURNING cache_key, topic, jurisdiction, research_output, sources,
                       last_verified_at, access_count",
        )
        .bind(cache_key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn store(&self, entry: ResearchCacheEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO research_cache
                (cache_key, topic, jurisdiction, research_output, sources,
                 last_verified_at, access_count)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(cache_key) DO UPDATE SET
                topic = excluded.topic,
                jurisdiction = excluded.jurisdiction,
                research_output = excluded.research_output,
                sources = excluded.sources,
                last_verified_at = excluded.last_verified_at",
        )
        .bind(&entry.cache_key)
        .bind(&entry.topic)
        .bind(&entry.jurisdiction)
        .bind(&entry.research_output)
        .bind(&entry.sources)
        .bind(format_timestamp(entry.last_verified_at))
        .bind(entry.access_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use studymate_core::domain::research::{cache_key, ResearchCacheEntry, ResearchTopic};

    use super::SqlResearchCacheRepository;
    use crate::repositories::ResearchCacheRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn damages_entry() -> ResearchCacheEntry {
        let topic = ResearchTopic {
            topic: "breach of contract damages".to_string(),
            jurisdiction: "Zambia".to_string(),
        };
        ResearchCacheEntry::new(
            &topic,
            "Damages aim to put the claimant in the position had the contract been performed.",
            "https://zambialii.org/a\nhttps://zambialii.org/b",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn miss_returns_none() {
        let repo = SqlResearchCacheRepository::new(setup().await);
        let found = repo.lookup("nothing_here").await.expect("lookup");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn lookup_returns_stored_brief_and_counts_each_hit() {
        let repo = SqlResearchCacheRepository::new(setup().await);
        let entry = damages_entry();
        repo.store(entry.clone()).await.expect("store");

        let key = cache_key("Breach of Contract  Damages", "ZAMBIA");
        let first = repo.lookup(&key).await.expect("first lookup").expect("hit");
        let second = repo.lookup(&key).await.expect("second lookup").expect("hit");

        assert_eq!(first.research_output, entry.research_output);
        assert_eq!(first.sources, entry.sources);
        assert_eq!(first.access_count, 1);
        assert_eq!(second.access_count, 2);
    }

    #[tokio::test]
    async fn store_refreshes_brief_but_keeps_access_count() {
        let repo = SqlResearchCacheRepository::new(setup().await);
        let mut entry = damages_entry();
        entry.last_verified_at = Utc::now() - Duration::days(200);
        repo.store(entry.clone()).await.expect("store");
        repo.lookup(&entry.cache_key).await.expect("lookup").expect("hit");

        let refreshed_at = Utc::now();
        let mut refreshed = damages_entry();
        refreshed.research_output = "Updated position after the 2025 amendment.".to_string();
        refreshed.last_verified_at = refreshed_at;
        repo.store(refreshed).await.expect("refresh");

        let found = repo.lookup(&entry.cache_key).await.expect("lookup").expect("hit");
        assert_eq!(found.research_output, "Updated position after the 2025 amendment.");
        assert_eq!(found.access_count, 2);
        assert_eq!(found.last_verified_at.timestamp(), refreshed_at.timestamp());
    }
}
