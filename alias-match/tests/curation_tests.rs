//! Registry curation tests

use alias_match::db::registry::read_registry;
use alias_match::models::ConfidenceTier;
use alias_match::services::verification::{curate, persist_verified, Evidence, VerificationBackend, VerificationError};
use alias_match::utils::RetryPolicy;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Fixed scores per alias; "断网药房" fails once with a network error
struct TableBackend {
    scores: HashMap<&'static str, u8>,
    network_failures: AtomicUsize,
}

impl TableBackend {
    fn new() -> Self {
        Self {
            scores: HashMap::from([("一心堂", 95), ("健之佳", 70), ("小诊所", 20), ("断网药房", 88)]),
            network_failures: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VerificationBackend for TableBackend {
    fn name(&self) -> &str {
        "table"
    }

    async fn verify(&self, alias: &str, partition: &str) -> Result<Evidence, VerificationError> {
        if alias == "断网药房" && self.network_failures.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(VerificationError::Network("connection refused".to_string()));
        }
        let score = self.scores.get(alias).copied().unwrap_or(0);
        Ok(Evidence {
            score,
            evidence_count: 1,
            urls: vec![format!("https://search.example/{}", partition)],
            summary: format!("{} in {}", alias, partition),
            verified: score >= 60,
        })
    }
}

fn quick_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_backoff_ms: 1,
        multiplier: 2.0,
        max_backoff_ms: 2,
    }
}

#[tokio::test]
async fn test_curate_then_persist_verified() {
    let pool = alias_common::db::init_memory_database().await.unwrap();
    let backend = TableBackend::new();
    let candidates: Vec<String> = ["一心堂", "小诊所", "断网药房", "健之佳"].iter().map(|s| s.to_string()).collect();

    let outcomes = curate(&backend, "云南", candidates, 3, Duration::from_secs(5), &quick_policy()).await;

    let order: Vec<&str> = outcomes.iter().map(|o| o.alias.as_str()).collect();
    assert_eq!(order, vec!["一心堂", "小诊所", "断网药房", "健之佳"]);
    assert!(outcomes[2].is_verified(), "retry should recover the network failure");
    assert!(!outcomes[1].is_verified());

    let inserted = persist_verified(&pool, &outcomes, backend.name()).await.unwrap();
    assert_eq!(inserted, 3);

    let rows = read_registry(&pool, "云南").await.unwrap();
    let tier = |alias: &str| rows.iter().find(|r| r.alias_text == alias).map(|r| r.confidence_tier);
    assert_eq!(tier("一心堂"), Some(ConfidenceTier::High));
    assert_eq!(tier("健之佳"), Some(ConfidenceTier::Medium));
    assert_eq!(tier("小诊所"), None);
    assert!(rows.iter().all(|r| r.verified_by == "table"));

    // Second pass inserts nothing new
    assert_eq!(persist_verified(&pool, &outcomes, backend.name()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_curation_failure_is_recorded_not_fatal() {
    let backend = TableBackend::new();
    let outcomes = curate(
        &backend,
        "云南",
        vec!["断网药房".to_string()],
        1,
        Duration::from_secs(5),
        &RetryPolicy::no_retry(),
    )
    .await;

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].evidence.is_none());
    assert!(outcomes[0].error.as_deref().unwrap().contains("connection refused"));
}
