//! Match resolver
//!
//! Resolves the entries of one partition:
//! 1. confirmed-mapping cache
//! 2. same-run dedupe of identical full names
//! 3. batched proposal calls on a bounded worker stream, with retry
//! 4. provenance validation of every returned alias
//!
//! Only the external calls run concurrently. Entries are settled afterwards,
//! group by group in input order, on the calling task.

use crate::config::MatchConfig;
use crate::error::{MatchError, MatchResult};
use crate::models::{MatchSource, NameEntry};
use crate::services::feedback::{shaping_hints, ConfirmedMappings, PatternSummary};
use crate::services::proposal_client::{
    Proposal, ProposalEntry, ProposalError, ProposalRequest, ProposalService,
};
use crate::services::provenance_validator::{ProvenanceValidator, Verdict};
use crate::services::registry::Registry;
use crate::utils::{retry_with_backoff, RetryError, RetryPolicy};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Evidence for entries of groups never dispatched
pub const CANCELLED_EVIDENCE: &str = "resolution cancelled";

/// Evidence for entries the service response left out
pub const MISSING_PROPOSAL_EVIDENCE: &str = "no proposal returned";

/// Resolver tunables
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub batch_size: usize,
    pub concurrency: usize,
    pub hint_sample_size: usize,
    pub proposal_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self::from(&MatchConfig::default())
    }
}

impl From<&MatchConfig> for ResolverSettings {
    fn from(config: &MatchConfig) -> Self {
        Self {
            batch_size: config.matching.batch_size.max(1),
            concurrency: config.matching.concurrency.max(1),
            hint_sample_size: config.matching.hint_sample_size,
            proposal_timeout: Duration::from_secs(config.matching.proposal_timeout_secs),
            retry: config.retry.clone(),
        }
    }
}

/// Outcome counts for one partition run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolutionReport {
    pub partition: String,
    pub total: usize,
    pub historical_confirmed: usize,
    pub proposal_accepted: usize,
    pub validation_rejected: usize,
    pub unmatched: usize,
    pub cross_partition_rejections: usize,
    pub not_in_registry_rejections: usize,
    /// Entries that reused the result of an identical earlier name
    pub deduplicated: usize,
    pub groups: usize,
    pub failed_groups: usize,
    pub cancelled_groups: usize,
    /// Proposal attempts made, retries included
    pub proposal_calls: usize,
}

impl ResolutionReport {
    pub fn matched(&self) -> usize {
        self.historical_confirmed + self.proposal_accepted
    }
}

enum GroupOutcome {
    Proposals(Vec<Proposal>),
    Failed(RetryError<ProposalError>),
    Cancelled,
}

pub struct MatchResolver<'a> {
    registry: &'a Registry,
    service: &'a dyn ProposalService,
    settings: ResolverSettings,
    cancel: Option<CancellationToken>,
}

impl<'a> MatchResolver<'a> {
    pub fn new(
        registry: &'a Registry,
        service: &'a dyn ProposalService,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            registry,
            service,
            settings,
            cancel: None,
        }
    }

    /// Stop dispatching new groups once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Resolve every pending entry of one partition in place
    ///
    /// Fails only when the partition has no registry aliases.
    pub async fn resolve_partition(
        &self,
        partition: &str,
        entries: &mut [NameEntry],
        mappings: &ConfirmedMappings,
        summary: &PatternSummary,
    ) -> MatchResult<ResolutionReport> {
        let candidates: Vec<String> = self.registry.lookup(partition).into_iter().collect();
        if candidates.is_empty() {
            return Err(MatchError::EmptyPartition(partition.to_string()));
        }

        let validator = ProvenanceValidator::new(self.registry);
        let mut report = ResolutionReport {
            partition: partition.to_string(),
            total: entries.len(),
            ..Default::default()
        };

        // Cache pass
        for entry in entries.iter_mut().filter(|e| e.is_pending()) {
            if let Some(mapping) = mappings.get(&entry.full_name) {
                validator.settle_historical(entry, mapping);
            }
        }

        // Same-run dedupe: first occurrence is proposed, later ones copy it
        let mut first_by_name: HashMap<String, usize> = HashMap::new();
        let mut unique: Vec<usize> = Vec::new();
        let mut duplicates: Vec<(usize, usize)> = Vec::new();
        for (idx, entry) in entries.iter().enumerate() {
            if !entry.is_pending() {
                continue;
            }
            let key = entry.full_name.trim().to_string();
            match first_by_name.get(&key) {
                Some(&first) => duplicates.push((idx, first)),
                None => {
                    first_by_name.insert(key, idx);
                    unique.push(idx);
                }
            }
        }
        report.deduplicated = duplicates.len();

        let hints = shaping_hints(summary, self.settings.hint_sample_size);
        let groups: Vec<Vec<usize>> = unique
            .chunks(self.settings.batch_size)
            .map(<[usize]>::to_vec)
            .collect();
        let requests: Vec<ProposalRequest> = groups
            .iter()
            .map(|group| ProposalRequest {
                partition: partition.to_string(),
                candidates: candidates.clone(),
                entries: group
                    .iter()
                    .map(|&idx| ProposalEntry {
                        record_id: entries[idx].record_id.clone(),
                        full_name: entries[idx].full_name.clone(),
                    })
                    .collect(),
                hints: hints.clone(),
            })
            .collect();
        report.groups = requests.len();

        tracing::info!(
            partition,
            entries = entries.len(),
            cache_hits = entries
                .iter()
                .filter(|e| e.match_source == MatchSource::HistoricalConfirmed)
                .count(),
            unique_names = unique.len(),
            groups = requests.len(),
            "Resolving partition"
        );

        let calls = AtomicUsize::new(0);
        let mut outcomes = self.dispatch(requests, &calls).await;
        outcomes.sort_by_key(|(group_idx, _)| *group_idx);
        report.proposal_calls = calls.load(Ordering::SeqCst);

        for (group_idx, outcome) in outcomes {
            let group = &groups[group_idx];
            match outcome {
                GroupOutcome::Proposals(proposals) => {
                    self.apply_proposals(&validator, entries, group, proposals, &mut report);
                }
                GroupOutcome::Failed(failure) => {
                    report.failed_groups += 1;
                    let evidence = format!("proposal failed: {}", failure);
                    tracing::warn!(
                        partition,
                        group = group_idx,
                        entries = group.len(),
                        error = %failure,
                        "Proposal group failed; entries left unmatched"
                    );
                    for &idx in group {
                        validator.settle_unmatched(&mut entries[idx], evidence.clone());
                    }
                }
                GroupOutcome::Cancelled => {
                    report.cancelled_groups += 1;
                    for &idx in group {
                        validator.settle_unmatched(&mut entries[idx], CANCELLED_EVIDENCE);
                    }
                }
            }
        }

        for (idx, first) in duplicates {
            let resolution = entries[first].resolution();
            entries[idx].settle(resolution);
        }

        for entry in entries.iter() {
            match entry.match_source {
                MatchSource::HistoricalConfirmed => report.historical_confirmed += 1,
                MatchSource::ProposalAccepted => report.proposal_accepted += 1,
                MatchSource::ValidationRejected => report.validation_rejected += 1,
                MatchSource::Unmatched => report.unmatched += 1,
                MatchSource::Pending => {}
            }
        }

        tracing::info!(
            partition,
            historical = report.historical_confirmed,
            accepted = report.proposal_accepted,
            rejected = report.validation_rejected,
            unmatched = report.unmatched,
            failed_groups = report.failed_groups,
            "Partition resolved"
        );

        Ok(report)
    }

    /// Run every request on the bounded stream; results come back unordered
    async fn dispatch(
        &self,
        requests: Vec<ProposalRequest>,
        calls: &AtomicUsize,
    ) -> Vec<(usize, GroupOutcome)> {
        let service = self.service;
        let policy = &self.settings.retry;
        let timeout = self.settings.proposal_timeout;
        let cancel = self.cancel.clone();

        stream::iter(requests.into_iter().enumerate())
            .map(|(group_idx, request)| {
                let cancel = cancel.clone();
                async move {
                    if cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                        return (group_idx, GroupOutcome::Cancelled);
                    }

                    let result = retry_with_backoff("propose", policy, || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let request = &request;
                        async move {
                            match tokio::time::timeout(timeout, service.propose(request)).await {
                                Ok(result) => result,
                                Err(_) => Err(ProposalError::Timeout(timeout)),
                            }
                        }
                    })
                    .await;

                    match result {
                        Ok(proposals) => (group_idx, GroupOutcome::Proposals(proposals)),
                        Err(failure) => (group_idx, GroupOutcome::Failed(failure)),
                    }
                }
            })
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await
    }

    fn apply_proposals(
        &self,
        validator: &ProvenanceValidator<'_>,
        entries: &mut [NameEntry],
        group: &[usize],
        proposals: Vec<Proposal>,
        report: &mut ResolutionReport,
    ) {
        let in_group: HashSet<&str> = group.iter().map(|&idx| entries[idx].record_id.as_str()).collect();

        let mut by_record: HashMap<String, Proposal> = HashMap::new();
        for proposal in proposals {
            if !in_group.contains(proposal.record_id.as_str()) {
                tracing::warn!(
                    partition = %report.partition,
                    record_id = %proposal.record_id,
                    "Ignoring proposal for a record outside the request"
                );
                continue;
            }
            // First answer per record wins
            by_record.entry(proposal.record_id.clone()).or_insert(proposal);
        }

        for &idx in group {
            let entry = &mut entries[idx];
            match by_record.get(&entry.record_id) {
                Some(proposal) => match validator.settle_proposal(entry, proposal) {
                    Verdict::CrossPartition { .. } => report.cross_partition_rejections += 1,
                    Verdict::NotInRegistry => report.not_in_registry_rejections += 1,
                    Verdict::Valid | Verdict::NoMatch => {}
                },
                None => {
                    validator.settle_unmatched(entry, MISSING_PROPOSAL_EVIDENCE);
                }
            }
        }
    }
}
