//! SQLite store tests (on-disk database)

use alias_match::db::{registry, settings, MatchStore, SqliteStore};
use alias_match::models::{AliasRecord, ConfidenceTier, FeedbackAction, FeedbackRecord, NewFeedback};
use alias_match::services::Registry;
use alias_match::utils::PartitionNormalizer;
use tempfile::TempDir;

async fn disk_store() -> (TempDir, SqliteStore) {
    let temp_dir = TempDir::new().unwrap();
    let pool = alias_common::db::init_database(&temp_dir.path().join("alias_match.db"))
        .await
        .unwrap();
    let store = SqliteStore::from_settings(pool).await.unwrap();
    (temp_dir, store)
}

fn confirmation(full_name: &str, final_alias: Option<&str>) -> FeedbackRecord {
    FeedbackRecord::new(NewFeedback {
        session_id: "s1".to_string(),
        batch_id: "b1".to_string(),
        partition: "云南".to_string(),
        record_id: "r1".to_string(),
        full_name: full_name.to_string(),
        proposed_alias: Some("一心堂".to_string()),
        proposed_confidence: Some(ConfidenceTier::High),
        final_alias: final_alias.map(str::to_string),
        action: FeedbackAction::ChoseCandidate(3),
        custom_reason: None,
    })
}

#[tokio::test]
async fn test_feedback_round_trip_through_store() {
    let (_dir, store) = disk_store().await;

    let first = confirmation("昆明一心堂药业", Some("一心堂"));
    let second = confirmation("昆明健之佳连锁药店", None);
    store.append(&first).await.unwrap();
    store.append(&second).await.unwrap();

    let history = store.query("云南", None).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].feedback_id, first.feedback_id);
    assert_eq!(history[0].action, FeedbackAction::ChoseCandidate(3));
    assert!(history[0].accepted());
    assert!(history[1].is_empty());
    assert!(!history[1].accepted());

    assert!(store.query("四川", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_registry_uniqueness_and_partition_reads() {
    let (_dir, store) = disk_store().await;
    let pool = store.pool();

    assert!(registry::insert_alias(pool, &AliasRecord::new("云南", "一心堂", ConfidenceTier::High)).await.unwrap());
    assert!(!registry::insert_alias(pool, &AliasRecord::new("云南", "一心堂", ConfidenceTier::Low)).await.unwrap());
    assert!(registry::insert_alias(pool, &AliasRecord::new("四川", "一心堂", ConfidenceTier::Medium)).await.unwrap());
    assert!(registry::insert_alias(pool, &AliasRecord::new("四川省", "太极", ConfidenceTier::High)).await.unwrap());

    let yunnan = store.read_registry("云南").await.unwrap();
    assert_eq!(yunnan.len(), 1);
    assert_eq!(yunnan[0].confidence_tier, ConfidenceTier::High);

    assert_eq!(store.read_all_registry().await.unwrap().len(), 3);

    // Stored spellings merge once loaded
    let loaded = Registry::load(&store, PartitionNormalizer::default()).await.unwrap();
    assert_eq!(loaded.lookup("四川").len(), 2);
    assert!(loaded.contains("四川", "太极"));
}

#[tokio::test]
async fn test_lock_wait_setting_is_read() {
    let (_dir, store) = disk_store().await;
    settings::set_setting(store.pool(), settings::MAX_LOCK_WAIT_MS, 250u64).await.unwrap();

    assert_eq!(settings::get_max_lock_wait_ms(store.pool()).await.unwrap(), 250);
}
