//! Feedback log table operations
//!
//! Append-only. Rows are never updated or deleted; `feedback_id` is a v4 uuid
//! so writers from concurrent sessions cannot collide.

use crate::models::{ConfidenceTier, CustomReason, FeedbackAction, FeedbackRecord, NewFeedback};
use crate::utils::retry_on_lock;
use alias_common::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Timestamps are stored as fixed-width RFC 3339 so text comparison orders them
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("Stored timestamp '{}' is invalid: {}", value, e)))
}

/// Append one record, retrying on lock contention
pub async fn append_feedback(
    pool: &SqlitePool,
    record: &FeedbackRecord,
    max_lock_wait_ms: u64,
) -> Result<()> {
    let feedback_id = record.feedback_id.to_string();
    let timestamp = format_timestamp(&record.timestamp);
    let proposed_confidence = record.proposed_confidence.map(|t| t.as_str());
    let action = record.action.as_string();
    let custom_reason = record.custom_reason.map(|r| r.as_str());

    retry_on_lock("append_feedback", max_lock_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO feedback_log (
                feedback_id, timestamp, session_id, batch_id, partition,
                record_id, full_name, proposed_alias, proposed_confidence,
                final_alias, action, accepted, modified, custom_reason
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&feedback_id)
        .bind(&timestamp)
        .bind(&record.session_id)
        .bind(&record.batch_id)
        .bind(&record.partition)
        .bind(&record.record_id)
        .bind(&record.full_name)
        .bind(&record.proposed_alias)
        .bind(proposed_confidence)
        .bind(&record.final_alias)
        .bind(&action)
        .bind(record.accepted())
        .bind(record.modified())
        .bind(custom_reason)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<FeedbackRecord> {
    let id_text: String = row.get("feedback_id");
    let feedback_id = Uuid::parse_str(&id_text)
        .map_err(|e| Error::InvalidInput(format!("Stored feedback id '{}' is invalid: {}", id_text, e)))?;
    let timestamp = parse_timestamp(&row.get::<String, _>("timestamp"))?;

    // Stored flags are ignored: the record re-derives them from the aliases
    let draft = NewFeedback {
        session_id: row.get("session_id"),
        batch_id: row.get("batch_id"),
        partition: row.get("partition"),
        record_id: row.get("record_id"),
        full_name: row.get("full_name"),
        proposed_alias: row.get("proposed_alias"),
        proposed_confidence: row
            .get::<Option<String>, _>("proposed_confidence")
            .as_deref()
            .and_then(ConfidenceTier::parse),
        final_alias: row.get("final_alias"),
        action: FeedbackAction::parse(&row.get::<String, _>("action")),
        custom_reason: row
            .get::<Option<String>, _>("custom_reason")
            .as_deref()
            .map(CustomReason::parse),
    };

    Ok(FeedbackRecord::restore(feedback_id, timestamp, draft))
}

/// Records of one partition at or after `since`, oldest first
pub async fn query_feedback(
    pool: &SqlitePool,
    partition: &str,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<FeedbackRecord>> {
    let since_text = since.map(|ts| format_timestamp(&ts));

    let rows = sqlx::query(
        r#"
        SELECT * FROM feedback_log
        WHERE partition = ?
          AND (? IS NULL OR timestamp >= ?)
        ORDER BY timestamp, rowid
        "#,
    )
    .bind(partition)
    .bind(&since_text)
    .bind(&since_text)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn draft(full_name: &str, final_alias: Option<&str>) -> NewFeedback {
        NewFeedback {
            session_id: "s1".to_string(),
            batch_id: "b1".to_string(),
            partition: "四川".to_string(),
            record_id: "r1".to_string(),
            full_name: full_name.to_string(),
            proposed_alias: Some("太极".to_string()),
            proposed_confidence: Some(ConfidenceTier::High),
            final_alias: final_alias.map(str::to_string),
            action: FeedbackAction::AcceptedProposal,
            custom_reason: None,
        }
    }

    #[tokio::test]
    async fn test_append_and_query_since() {
        let pool = alias_common::db::init_memory_database().await.unwrap();
        let now = Utc::now();

        let old = FeedbackRecord::at(draft("旧记录", Some("太极")), now - Duration::days(40));
        let fresh = FeedbackRecord::at(draft("新记录", Some("一心堂")), now);
        append_feedback(&pool, &old, 1000).await.unwrap();
        append_feedback(&pool, &fresh, 1000).await.unwrap();

        let all = query_feedback(&pool, "四川", None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].full_name, "旧记录");

        let recent = query_feedback(&pool, "四川", Some(now - Duration::days(30)))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].feedback_id, fresh.feedback_id);
        assert!(recent[0].modified());

        let other = query_feedback(&pool, "重庆", None).await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_stored_action_reads_back_as_unknown() {
        let pool = alias_common::db::init_memory_database().await.unwrap();
        let record = FeedbackRecord::new(draft("某药房", Some("太极")));
        append_feedback(&pool, &record, 1000).await.unwrap();

        sqlx::query("UPDATE feedback_log SET action = 'escalated', custom_reason = 'weird'")
            .execute(&pool)
            .await
            .unwrap();

        let back = query_feedback(&pool, "四川", None).await.unwrap();
        assert_eq!(back[0].action, FeedbackAction::Unknown("escalated".to_string()));
        assert_eq!(back[0].custom_reason, Some(CustomReason::Other));
    }
}
