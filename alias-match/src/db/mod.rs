//! Persistence for the matching core
//!
//! Free functions over `&SqlitePool` per table, plus the [`MatchStore`] trait
//! the services are written against.

pub mod feedback;
pub mod registry;
pub mod settings;

use crate::models::{AliasRecord, FeedbackRecord};
use alias_common::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// Storage seen by the matching core
///
/// Registry rows are read-only here. Feedback is append-only.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Append one feedback record
    async fn append(&self, record: &FeedbackRecord) -> Result<()>;

    /// Feedback for one partition at or after `since`, oldest first
    async fn query(&self, partition: &str, since: Option<DateTime<Utc>>)
        -> Result<Vec<FeedbackRecord>>;

    /// Registry rows of one partition
    async fn read_registry(&self, partition: &str) -> Result<Vec<AliasRecord>>;

    /// Every registry row
    async fn read_all_registry(&self) -> Result<Vec<AliasRecord>>;
}

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: crate::utils::db_retry::DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    /// Store using the lock-retry budget from the settings table
    pub async fn from_settings(pool: SqlitePool) -> Result<Self> {
        let max_lock_wait_ms = settings::get_max_lock_wait_ms(&pool).await?;
        Ok(Self {
            pool,
            max_lock_wait_ms,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl MatchStore for SqliteStore {
    async fn append(&self, record: &FeedbackRecord) -> Result<()> {
        feedback::append_feedback(&self.pool, record, self.max_lock_wait_ms).await
    }

    async fn query(
        &self,
        partition: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<FeedbackRecord>> {
        feedback::query_feedback(&self.pool, partition, since).await
    }

    async fn read_registry(&self, partition: &str) -> Result<Vec<AliasRecord>> {
        registry::read_registry(&self.pool, partition).await
    }

    async fn read_all_registry(&self) -> Result<Vec<AliasRecord>> {
        registry::read_all_registry(&self.pool).await
    }
}
