//! Alias verification backends for registry curation
//!
//! Curation checks a candidate alias against outside evidence before it is
//! written to the registry. The backend is chosen by `[verification] backend`.

use crate::config::{MatchConfig, VerificationBackendKind};
use crate::error::{MatchError, MatchResult};
use crate::models::{AliasRecord, ConfidenceTier};
use crate::services::registry::Registry;
use crate::utils::{retry_with_backoff, RetryPolicy, Retryable};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

/// Words that mark a search hit as being about a pharmacy chain
const CHAIN_KEYWORDS: &[&str] = &["药店", "连锁"];

/// Search results listed in an evidence summary
const SUMMARY_RESULTS: usize = 5;

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl Retryable for VerificationError {
    fn is_retryable(&self) -> bool {
        match self {
            VerificationError::Network(_) => true,
            VerificationError::Api { status, .. } => *status == 429 || *status >= 500,
            VerificationError::Parse(_) => false,
        }
    }
}

/// What a backend found for one alias
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evidence {
    /// 0-100
    pub score: u8,
    pub evidence_count: usize,
    pub urls: Vec<String>,
    pub summary: String,
    pub verified: bool,
}

impl Evidence {
    /// ≥85 High, ≥60 Medium, else Low
    pub fn suggested_tier(&self) -> ConfidenceTier {
        if self.score >= 85 {
            ConfidenceTier::High
        } else if self.score >= 60 {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }
}

#[async_trait]
pub trait VerificationBackend: Send + Sync {
    /// Recorded as `verified_by` on curated aliases
    fn name(&self) -> &str;

    async fn verify(&self, alias: &str, partition: &str) -> Result<Evidence, VerificationError>;
}

/// One search hit
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Wrapped { results: Vec<SearchResult> },
    Bare(Vec<SearchResult>),
}

/// Score search hits for an alias
///
/// 10 per hit (max 50), then per hit: +15 alias in title, +10 partition in
/// title, +5 chain keyword in title, +5 alias in snippet. Capped at 100.
pub fn score_results(results: &[SearchResult], alias: &str, partition: &str) -> u8 {
    if results.is_empty() {
        return 0;
    }

    let mut score = (results.len() * 10).min(50);
    for result in results {
        let title = result.title.to_lowercase();
        let snippet = result.snippet.to_lowercase();

        if title.contains(alias) {
            score += 15;
        }
        if title.contains(partition) {
            score += 10;
        }
        if CHAIN_KEYWORDS.iter().any(|k| title.contains(k)) {
            score += 5;
        }
        if snippet.contains(alias) {
            score += 5;
        }
    }

    score.min(100) as u8
}

fn summarize(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "no search results".to_string();
    }
    results
        .iter()
        .take(SUMMARY_RESULTS)
        .enumerate()
        .map(|(i, r)| format!("{}. {}", i + 1, r.title))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Evidence from scored search hits
pub fn evidence_from_results(
    results: &[SearchResult],
    alias: &str,
    partition: &str,
    threshold: u8,
) -> Evidence {
    let score = score_results(results, alias, partition);
    Evidence {
        score,
        evidence_count: results.len(),
        urls: results
            .iter()
            .filter(|r| !r.url.is_empty())
            .map(|r| r.url.clone())
            .collect(),
        summary: summarize(results),
        verified: score >= threshold,
    }
}

/// HTTP search endpoint backend
pub struct SearchVerifier {
    http_client: reqwest::Client,
    endpoint: String,
    threshold: u8,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl SearchVerifier {
    pub fn new(
        endpoint: String,
        threshold: u8,
        requests_per_minute: u32,
        timeout: Duration,
    ) -> Result<Self, VerificationError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VerificationError::Network(e.to_string()))?;

        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            http_client,
            endpoint,
            threshold,
            rate_limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        })
    }
}

#[async_trait]
impl VerificationBackend for SearchVerifier {
    fn name(&self) -> &str {
        "search"
    }

    async fn verify(&self, alias: &str, partition: &str) -> Result<Evidence, VerificationError> {
        self.rate_limiter.until_ready().await;

        let query = [alias, "药店", "连锁", partition].join(" ");
        tracing::debug!(alias, partition, query = %query, "Querying search endpoint");

        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&[("q", query.as_str())])
            .send()
            .await
            .map_err(|e| VerificationError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(VerificationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let results = match response
            .json::<SearchResponse>()
            .await
            .map_err(|e| VerificationError::Parse(e.to_string()))?
        {
            SearchResponse::Wrapped { results } => results,
            SearchResponse::Bare(results) => results,
        };

        Ok(evidence_from_results(&results, alias, partition, self.threshold))
    }
}

/// Offline backend: an alias is verified when the registry already holds it
pub struct RegistryVerifier {
    registry: Registry,
}

impl RegistryVerifier {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl VerificationBackend for RegistryVerifier {
    fn name(&self) -> &str {
        "registry"
    }

    async fn verify(&self, alias: &str, partition: &str) -> Result<Evidence, VerificationError> {
        let known = self.registry.contains(partition, alias);
        Ok(Evidence {
            score: if known { 100 } else { 0 },
            evidence_count: usize::from(known),
            urls: Vec::new(),
            summary: if known {
                format!("already registered in {}", self.registry.normalize(partition))
            } else {
                "not in registry".to_string()
            },
            verified: known,
        })
    }
}

/// Backend selected by configuration
pub fn build_backend(
    config: &MatchConfig,
    registry: Registry,
) -> MatchResult<Box<dyn VerificationBackend>> {
    match config.verification.backend {
        VerificationBackendKind::Registry => Ok(Box::new(RegistryVerifier::new(registry))),
        VerificationBackendKind::Search => {
            let endpoint = config.verification.endpoint.clone().ok_or_else(|| {
                MatchError::Config("verification.endpoint is required for the search backend".to_string())
            })?;
            let verifier = SearchVerifier::new(
                endpoint,
                config.verification.threshold,
                config.verification.requests_per_minute,
                Duration::from_secs(config.matching.verification_timeout_secs),
            )
            .map_err(|e| MatchError::Config(e.to_string()))?;
            Ok(Box::new(verifier))
        }
    }
}

/// Verification result for one candidate alias
#[derive(Debug, Clone, Serialize)]
pub struct CurationOutcome {
    pub alias: String,
    pub partition: String,
    pub evidence: Option<Evidence>,
    pub error: Option<String>,
}

impl CurationOutcome {
    pub fn is_verified(&self) -> bool {
        self.evidence.as_ref().is_some_and(|e| e.verified)
    }

    /// Registry row for a verified candidate
    pub fn to_record(&self, verified_by: &str) -> Option<AliasRecord> {
        let evidence = self.evidence.as_ref().filter(|e| e.verified)?;
        Some(AliasRecord {
            partition: self.partition.clone(),
            alias_text: self.alias.clone(),
            confidence_tier: evidence.suggested_tier(),
            evidence: evidence.summary.clone(),
            verified_by: verified_by.to_string(),
        })
    }
}

/// Verify candidates on a bounded stream; output keeps candidate order
pub async fn curate(
    backend: &dyn VerificationBackend,
    partition: &str,
    candidates: Vec<String>,
    concurrency: usize,
    timeout: Duration,
    policy: &RetryPolicy,
) -> Vec<CurationOutcome> {
    let mut outcomes: Vec<(usize, CurationOutcome)> = stream::iter(candidates.into_iter().enumerate())
        .map(|(idx, alias)| async move {
            let result = retry_with_backoff("verify", policy, || {
                let alias = alias.as_str();
                async move {
                    match tokio::time::timeout(timeout, backend.verify(alias, partition)).await {
                        Ok(result) => result,
                        Err(_) => Err(VerificationError::Network(format!(
                            "timed out after {:?}",
                            timeout
                        ))),
                    }
                }
            })
            .await;

            let outcome = match result {
                Ok(evidence) => CurationOutcome {
                    alias,
                    partition: partition.to_string(),
                    evidence: Some(evidence),
                    error: None,
                },
                Err(failure) => {
                    tracing::warn!(alias = %alias, partition, error = %failure, "Verification failed");
                    CurationOutcome {
                        alias,
                        partition: partition.to_string(),
                        evidence: None,
                        error: Some(failure.to_string()),
                    }
                }
            };
            (idx, outcome)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    outcomes.sort_by_key(|(idx, _)| *idx);
    outcomes.into_iter().map(|(_, outcome)| outcome).collect()
}

/// Write verified outcomes to the registry; returns rows inserted
pub async fn persist_verified(
    pool: &SqlitePool,
    outcomes: &[CurationOutcome],
    verified_by: &str,
) -> MatchResult<usize> {
    let mut inserted = 0;
    for record in outcomes.iter().filter_map(|o| o.to_record(verified_by)) {
        if crate::db::registry::insert_alias(pool, &record).await? {
            inserted += 1;
        } else {
            tracing::debug!(
                partition = %record.partition,
                alias = %record.alias_text,
                "Alias already registered"
            );
        }
    }
    Ok(inserted)
}
