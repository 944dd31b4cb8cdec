//! Alias registry table operations

use crate::models::{AliasRecord, ConfidenceTier};
use alias_common::{Error, Result};
use sqlx::{Row, SqlitePool};

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<AliasRecord> {
    let tier_text: String = row.get("confidence_tier");
    let confidence_tier = ConfidenceTier::parse(&tier_text).ok_or_else(|| {
        Error::InvalidInput(format!("Stored confidence tier '{}' is invalid", tier_text))
    })?;

    Ok(AliasRecord {
        partition: row.get("partition"),
        alias_text: row.get("alias_text"),
        confidence_tier,
        evidence: row.get("evidence"),
        verified_by: row.get("verified_by"),
    })
}

/// Registry rows stored under exactly `partition`
pub async fn read_registry(pool: &SqlitePool, partition: &str) -> Result<Vec<AliasRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT partition, alias_text, confidence_tier, evidence, verified_by
        FROM alias_registry
        WHERE partition = ?
        ORDER BY id
        "#,
    )
    .bind(partition)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_record).collect()
}

/// Every registry row (cross-partition diagnostics)
pub async fn read_all_registry(pool: &SqlitePool) -> Result<Vec<AliasRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT partition, alias_text, confidence_tier, evidence, verified_by
        FROM alias_registry
        ORDER BY partition, id
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_record).collect()
}

/// Insert one alias; returns `false` if `(partition, alias_text)` already exists
pub async fn insert_alias(pool: &SqlitePool, record: &AliasRecord) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO alias_registry (partition, alias_text, confidence_tier, evidence, verified_by)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (partition, alias_text) DO NOTHING
        "#,
    )
    .bind(&record.partition)
    .bind(&record.alias_text)
    .bind(record.confidence_tier.as_str())
    .bind(&record.evidence)
    .bind(&record.verified_by)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
