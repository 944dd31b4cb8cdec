//! End-to-end resolution session
//!
//! Integrity check, per-partition resolution in first-seen order, then one
//! audit over the whole output.

use crate::config::MatchConfig;
use crate::error::{MatchError, MatchResult};
use crate::models::NameEntry;
use crate::services::feedback::{analyze_patterns, FeedbackEngine};
use crate::services::ingest::check_entries;
use crate::services::match_resolver::{MatchResolver, ResolutionReport, ResolverSettings};
use crate::services::proposal_client::ProposalService;
use crate::services::registry::Registry;
use crate::validators::{AuditReport, AuditThresholds, QualityAuditor};
use serde::Serialize;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything a session produces
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub session_id: String,
    /// Resolved rows in input order
    pub entries: Vec<NameEntry>,
    /// One report per partition, in first-seen order
    pub reports: Vec<ResolutionReport>,
    pub audit: AuditReport,
}

pub struct MatchSession<'a> {
    registry: &'a Registry,
    feedback: &'a FeedbackEngine,
    service: &'a dyn ProposalService,
    resolver_settings: ResolverSettings,
    thresholds: AuditThresholds,
    session_id: String,
    cancel: Option<CancellationToken>,
}

impl<'a> MatchSession<'a> {
    pub fn new(
        registry: &'a Registry,
        feedback: &'a FeedbackEngine,
        service: &'a dyn ProposalService,
        config: &MatchConfig,
    ) -> Self {
        Self {
            registry,
            feedback,
            service,
            resolver_settings: ResolverSettings::from(config),
            thresholds: AuditThresholds::from(&config.audit),
            session_id: Uuid::new_v4().to_string(),
            cancel: None,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_resolver_settings(mut self, settings: ResolverSettings) -> Self {
        self.resolver_settings = settings;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Resolve `input` and audit the result
    ///
    /// Fails before any external call on integrity problems or a partition
    /// with no registry aliases.
    pub async fn run(&self, input: Vec<NameEntry>) -> MatchResult<SessionOutcome> {
        let started = Instant::now();

        let problems = check_entries(&input);
        if !problems.is_empty() {
            return Err(MatchError::InputIntegrity(problems));
        }

        let groups = self.group_by_partition(&input);
        for (partition, _) in &groups {
            if self.registry.lookup(partition).is_empty() {
                return Err(MatchError::EmptyPartition(partition.clone()));
            }
        }

        tracing::info!(
            session_id = %self.session_id,
            rows = input.len(),
            partitions = groups.len(),
            "Match session started"
        );

        let mut entries = input.clone();
        let mut reports = Vec::with_capacity(groups.len());

        for (partition, indices) in &groups {
            let history = self.feedback.history(partition).await?;
            let mappings = self.feedback.confirmed_mappings(partition, &history, self.registry);
            let summary = analyze_patterns(&history);

            tracing::debug!(
                partition = %partition,
                history = history.len(),
                confirmed_mappings = mappings.len(),
                "Feedback loaded"
            );

            let mut group: Vec<NameEntry> = indices.iter().map(|&i| entries[i].clone()).collect();

            let mut resolver = MatchResolver::new(self.registry, self.service, self.resolver_settings.clone());
            if let Some(token) = &self.cancel {
                resolver = resolver.with_cancellation(token.clone());
            }
            let report = resolver
                .resolve_partition(partition, &mut group, &mappings, &summary)
                .await?;

            for (&i, resolved) in indices.iter().zip(group) {
                entries[i] = resolved;
            }
            reports.push(report);
        }

        let audit = QualityAuditor::with_thresholds(self.registry, self.thresholds).audit(&input, &entries);

        let outcome = SessionOutcome {
            session_id: self.session_id.clone(),
            entries,
            reports,
            audit,
        };
        self.log_summary(&outcome, started);

        Ok(outcome)
    }

    /// Row indices per canonical partition, partitions in first-seen order
    fn group_by_partition(&self, input: &[NameEntry]) -> Vec<(String, Vec<usize>)> {
        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
        for (i, entry) in input.iter().enumerate() {
            let partition = self.registry.normalize(&entry.partition);
            match groups.iter_mut().find(|(p, _)| *p == partition) {
                Some((_, indices)) => indices.push(i),
                None => groups.push((partition, vec![i])),
            }
        }
        groups
    }

    fn log_summary(&self, outcome: &SessionOutcome, started: Instant) {
        let sum = |f: fn(&ResolutionReport) -> usize| outcome.reports.iter().map(f).sum::<usize>();

        tracing::info!(
            session_id = %outcome.session_id,
            rows = outcome.entries.len(),
            historical_confirmed = sum(|r| r.historical_confirmed),
            proposal_accepted = sum(|r| r.proposal_accepted),
            validation_rejected = sum(|r| r.validation_rejected),
            unmatched = sum(|r| r.unmatched),
            cross_partition = sum(|r| r.cross_partition_rejections),
            not_in_registry = sum(|r| r.not_in_registry_rejections),
            proposal_calls = sum(|r| r.proposal_calls),
            match_rate = %format!("{:.1}%", outcome.audit.match_rate * 100.0),
            high = outcome.audit.tier_distribution.high,
            medium = outcome.audit.tier_distribution.medium,
            low = outcome.audit.tier_distribution.low,
            audit_passed = outcome.audit.passed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Match session complete"
        );

        for warning in &outcome.audit.warnings {
            tracing::warn!(session_id = %outcome.session_id, "{}", warning);
        }
    }
}
