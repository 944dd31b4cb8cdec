//! Settings table accessors
//!
//! Key-value rows in the shared `settings` table. Values are stored as text
//! and parsed on read.

use alias_common::{Error, Result};
use sqlx::{Pool, Sqlite};

/// Settings key for the proposal service API key
pub const PROPOSAL_API_KEY: &str = "proposal_api_key";

/// Settings key for the lock-retry budget of feedback writes
pub const MAX_LOCK_WAIT_MS: &str = "max_lock_wait_ms";

/// Get the proposal API key stored in the database
pub async fn get_proposal_api_key(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, PROPOSAL_API_KEY).await
}

/// Store the proposal API key in the database
pub async fn set_proposal_api_key(db: &Pool<Sqlite>, key: String) -> Result<()> {
    set_setting(db, PROPOSAL_API_KEY, key).await
}

/// Lock-retry budget for feedback writes
///
/// **Default:** 5000ms
pub async fn get_max_lock_wait_ms(db: &Pool<Sqlite>) -> Result<u64> {
    get_setting(db, MAX_LOCK_WAIT_MS)
        .await
        .map(|opt| opt.unwrap_or(crate::utils::db_retry::DEFAULT_MAX_LOCK_WAIT_MS))
}

/// Generic setting getter
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(Option<String>,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((Some(value),)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

/// Generic setting setter (upsert)
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_api_key_round_trip() {
        let pool = alias_common::db::init_memory_database().await.unwrap();

        assert_eq!(get_proposal_api_key(&pool).await.unwrap(), None);

        set_proposal_api_key(&pool, "k-first".to_string()).await.unwrap();
        set_proposal_api_key(&pool, "k-second".to_string()).await.unwrap();

        assert_eq!(
            get_proposal_api_key(&pool).await.unwrap().as_deref(),
            Some("k-second")
        );
    }

    #[tokio::test]
    async fn test_lock_wait_default_and_parse_error() {
        let pool = alias_common::db::init_memory_database().await.unwrap();
        assert_eq!(get_max_lock_wait_ms(&pool).await.unwrap(), 5000);

        set_setting(&pool, MAX_LOCK_WAIT_MS, "soon").await.unwrap();
        assert!(get_max_lock_wait_ms(&pool).await.is_err());
    }
}
