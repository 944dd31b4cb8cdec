//! End-to-end match session tests

mod helpers;

use alias_match::config::MatchConfig;
use alias_match::models::{ConfidenceTier, FeedbackAction, MatchSource, NameEntry, NewFeedback};
use alias_match::services::feedback::{FeedbackEngine, FeedbackSettings};
use alias_match::services::ingest::{parse_rows, RowKind};
use alias_match::services::MatchSession;
use alias_match::utils::PartitionNormalizer;
use alias_match::MatchError;
use helpers::{entry, fast_settings, fixture_registry, fixture_store, ScriptedService};
use serde_json::json;

async fn engine() -> FeedbackEngine {
    FeedbackEngine::new(
        fixture_store().await,
        PartitionNormalizer::default(),
        FeedbackSettings::default(),
    )
}

fn scripted() -> ScriptedService {
    ScriptedService::new()
        .answer("四川太极大药房连锁有限公司", Some("太极"), ConfidenceTier::High)
        .answer("成都一心堂药业有限公司", Some("一心堂"), ConfidenceTier::High)
        .answer("虚构大药房连锁有限公司", Some("虚构大药房"), ConfidenceTier::Medium)
        .answer("重庆桐君阁大药房连锁有限责任公司", Some("桐君阁"), ConfidenceTier::High)
        .answer("昆明一心堂药业", Some("一心堂"), ConfidenceTier::High)
}

fn rows() -> Vec<NameEntry> {
    parse_rows(
        json!([
            {"record_id": "1", "full_name": "四川太极大药房连锁有限公司", "partition": "四川省", "owner": "张三"},
            {"record_id": "2", "full_name": "重庆桐君阁大药房连锁有限责任公司", "partition": "重庆"},
            {"record_id": "3", "full_name": "成都一心堂药业有限公司", "partition": "四川"},
            {"record_id": "4", "full_name": "昆明一心堂药业", "partition": "云南", "region_code": 530100},
            {"record_id": "5", "full_name": "虚构大药房连锁有限公司", "partition": "四川"}
        ]),
        RowKind::Input,
    )
    .unwrap()
}

#[tokio::test]
async fn test_session_resolves_and_audits() {
    let registry = fixture_registry();
    let engine = engine().await;
    let service = scripted();

    let session = MatchSession::new(&registry, &engine, &service, &MatchConfig::default())
        .with_resolver_settings(fast_settings(50, 5))
        .with_session_id("session-1");
    let outcome = session.run(rows()).await.unwrap();

    assert_eq!(outcome.session_id, "session-1");

    // Partitions in first-seen order, spellings merged
    let partitions: Vec<&str> = outcome.reports.iter().map(|r| r.partition.as_str()).collect();
    assert_eq!(partitions, vec!["四川", "重庆", "云南"]);
    assert_eq!(outcome.reports[0].total, 3);

    let ids: Vec<&str> = outcome.entries.iter().map(|e| e.record_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);

    let e = &outcome.entries;
    assert_eq!(e[0].assigned_alias.as_deref(), Some("太极"));
    assert_eq!(e[0].partition, "四川省");
    assert_eq!(e[0].extra["owner"], json!("张三"));
    assert_eq!(e[1].assigned_alias.as_deref(), Some("桐君阁"));
    assert_eq!(e[2].match_source, MatchSource::ValidationRejected);
    assert_eq!(e[3].assigned_alias.as_deref(), Some("一心堂"));
    assert_eq!(e[3].extra["region_code"], json!(530100));
    assert_eq!(e[4].match_source, MatchSource::ValidationRejected);

    let audit = &outcome.audit;
    assert!(audit.passed, "{:?}", audit.violations);
    assert_eq!(audit.total, 5);
    assert_eq!(audit.matched, 3);
    assert_eq!(audit.tier_distribution.high, 3);
    // 60% match rate is under the 80% default
    assert_eq!(audit.warnings.len(), 1);
}

#[tokio::test]
async fn test_session_fails_fast_on_integrity_problems() {
    let registry = fixture_registry();
    let engine = engine().await;
    let service = scripted();

    let input = vec![
        entry("1", "四川太极大药房连锁有限公司", "四川"),
        entry("1", "", "四川"),
    ];

    let session = MatchSession::new(&registry, &engine, &service, &MatchConfig::default());
    match session.run(input).await {
        Err(MatchError::InputIntegrity(problems)) => assert_eq!(problems.len(), 2),
        other => panic!("expected InputIntegrity, got {:?}", other.map(|o| o.entries)),
    }
    assert_eq!(service.calls(), 0);
}

#[tokio::test]
async fn test_session_rejects_partition_without_registry() {
    let registry = fixture_registry();
    let engine = engine().await;
    let service = scripted();

    let input = vec![
        entry("1", "四川太极大药房连锁有限公司", "四川"),
        entry("2", "拉萨某药店", "西藏"),
    ];

    let session = MatchSession::new(&registry, &engine, &service, &MatchConfig::default());
    let result = session.run(input).await;
    assert!(matches!(result, Err(MatchError::EmptyPartition(p)) if p == "西藏"));
    assert_eq!(service.calls(), 0);
}

#[tokio::test]
async fn test_confirmations_feed_the_next_session() {
    let registry = fixture_registry();
    let engine = engine().await;

    let confirm = || NewFeedback {
        session_id: "review-1".to_string(),
        batch_id: String::new(),
        partition: "四川".to_string(),
        record_id: "9".to_string(),
        full_name: "成都德仁堂药业连锁有限公司".to_string(),
        proposed_alias: None,
        proposed_confidence: None,
        final_alias: Some("德仁堂".to_string()),
        action: FeedbackAction::ChoseCandidate(2),
        custom_reason: None,
    };
    // Reviewer picked the alias with nothing proposed: not an acceptance
    engine.ingest(vec![confirm(), confirm()]).await.unwrap();

    let accepted = || NewFeedback {
        proposed_alias: Some("德仁堂".to_string()),
        proposed_confidence: Some(ConfidenceTier::Medium),
        action: FeedbackAction::AcceptedProposal,
        ..confirm()
    };
    engine.ingest(vec![accepted(), accepted()]).await.unwrap();

    let service = ScriptedService::new();
    let session = MatchSession::new(&registry, &engine, &service, &MatchConfig::default())
        .with_resolver_settings(fast_settings(50, 5));
    let outcome = session
        .run(vec![entry("1", "成都德仁堂药业连锁有限公司", "四川")])
        .await
        .unwrap();

    assert_eq!(outcome.entries[0].match_source, MatchSource::HistoricalConfirmed);
    assert_eq!(outcome.entries[0].assigned_alias.as_deref(), Some("德仁堂"));
    assert_eq!(outcome.entries[0].confidence_tier, ConfidenceTier::Low);
    assert_eq!(service.calls(), 0);
}
