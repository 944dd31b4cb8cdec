//! Test helpers for alias-match
//!
//! In-process proposal services and a small three-partition registry.

#![allow(dead_code)]

use alias_match::db::{registry::insert_alias, SqliteStore};
use alias_match::models::{AliasRecord, ConfidenceTier, NameEntry};
use alias_match::services::match_resolver::ResolverSettings;
use alias_match::services::{Proposal, ProposalError, ProposalRequest, ProposalService, Registry};
use alias_match::utils::{PartitionNormalizer, RetryPolicy};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 四川 / 重庆 / 云南 fixture; 一心堂 is registered in 云南 only
pub fn fixture_records() -> Vec<AliasRecord> {
    vec![
        AliasRecord::new("四川", "太极", ConfidenceTier::High),
        AliasRecord::new("四川", "德仁堂", ConfidenceTier::High),
        AliasRecord::new("四川", "老百姓", ConfidenceTier::Medium),
        AliasRecord::new("重庆", "桐君阁", ConfidenceTier::High),
        AliasRecord::new("重庆", "和平药房", ConfidenceTier::Medium),
        AliasRecord::new("重庆", "万家燕", ConfidenceTier::High),
        AliasRecord::new("云南", "一心堂", ConfidenceTier::High),
        AliasRecord::new("云南", "健之佳", ConfidenceTier::High),
    ]
}

pub fn fixture_registry() -> Registry {
    Registry::from_records(fixture_records(), PartitionNormalizer::default())
}

/// In-memory store seeded with the fixture registry
pub async fn fixture_store() -> Arc<SqliteStore> {
    let pool = alias_common::db::init_memory_database().await.unwrap();
    for record in fixture_records() {
        insert_alias(&pool, &record).await.unwrap();
    }
    Arc::new(SqliteStore::new(pool))
}

pub fn entry(record_id: &str, full_name: &str, partition: &str) -> NameEntry {
    NameEntry::new(record_id, full_name, partition)
}

/// Resolver settings with millisecond backoff
pub fn fast_settings(batch_size: usize, concurrency: usize) -> ResolverSettings {
    ResolverSettings {
        batch_size,
        concurrency,
        hint_sample_size: 5,
        proposal_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            multiplier: 2.0,
            max_backoff_ms: 5,
        },
    }
}

/// Answers from a full_name → alias table; unknown names get no alias
#[derive(Default)]
pub struct ScriptedService {
    answers: HashMap<String, (Option<String>, ConfidenceTier)>,
    /// Extra latency for requests containing a given full name
    delays: HashMap<String, Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ProposalRequest>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, full_name: &str, alias: Option<&str>, tier: ConfidenceTier) -> Self {
        self.answers
            .insert(full_name.to_string(), (alias.map(str::to_string), tier));
        self
    }

    pub fn delay(mut self, full_name: &str, delay: Duration) -> Self {
        self.delays.insert(full_name.to_string(), delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProposalRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Every full name sent, across all requests
    pub fn names_sent(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .flat_map(|r| r.entries.into_iter().map(|e| e.full_name))
            .collect()
    }
}

#[async_trait]
impl ProposalService for ScriptedService {
    async fn propose(&self, request: &ProposalRequest) -> Result<Vec<Proposal>, ProposalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let delay = request
            .entries
            .iter()
            .filter_map(|e| self.delays.get(&e.full_name))
            .max()
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(request
            .entries
            .iter()
            .map(|e| {
                let (alias, confidence) = self
                    .answers
                    .get(&e.full_name)
                    .cloned()
                    .unwrap_or((None, ConfidenceTier::Low));
                Proposal {
                    record_id: e.record_id.clone(),
                    alias,
                    confidence,
                    reasoning: "scripted".to_string(),
                }
            })
            .collect())
    }
}

/// Fails the first `failures` calls, then delegates
pub struct FlakyService {
    inner: ScriptedService,
    failures: usize,
    error: fn() -> ProposalError,
    calls: AtomicUsize,
}

impl FlakyService {
    pub fn new(inner: ScriptedService, failures: usize) -> Self {
        Self {
            inner,
            failures,
            error: || ProposalError::Transport("connection reset".to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fails with a retryable transport error
    pub fn always_failing() -> Self {
        Self::new(ScriptedService::new(), usize::MAX)
    }

    /// Always fails with a non-retryable error
    pub fn always_unparseable() -> Self {
        Self {
            error: || ProposalError::Parse("no JSON array in response".to_string()),
            ..Self::always_failing()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProposalService for FlakyService {
    async fn propose(&self, request: &ProposalRequest) -> Result<Vec<Proposal>, ProposalError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err((self.error)());
        }
        self.inner.propose(request).await
    }
}
