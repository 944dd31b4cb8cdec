//! Feedback engine
//!
//! Ingests human confirmations into the append-only log and derives
//! everything the next run learns from: the confirmed-mapping cache, pattern
//! statistics, session performance and advisory suggestions.

pub mod confirmed;
pub mod patterns;
pub mod performance;
pub mod suggestions;

pub use confirmed::{build_confirmed_mappings, ConfirmedMapping, ConfirmedMappings};
pub use patterns::{analyze_patterns, shaping_hints, PatternSummary};
pub use performance::{evaluate_session, PerformanceSnapshot, SessionRate};
pub use suggestions::suggest_improvements;

use crate::db::MatchStore;
use crate::error::{MatchError, MatchResult};
use crate::models::{CustomReason, FeedbackAction, FeedbackRecord, NameEntry, NewFeedback};
use crate::services::registry::Registry;
use crate::utils::PartitionNormalizer;
use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Tunables for [`FeedbackEngine`]
#[derive(Debug, Clone)]
pub struct FeedbackSettings {
    pub min_confirmations: u32,
    pub history_days: i64,
    pub trend_window: usize,
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            min_confirmations: 2,
            history_days: 30,
            trend_window: 10,
        }
    }
}

impl From<&crate::config::MatchingConfig> for FeedbackSettings {
    fn from(config: &crate::config::MatchingConfig) -> Self {
        Self {
            min_confirmations: config.min_confirmations,
            history_days: config.history_days,
            trend_window: config.trend_window,
        }
    }
}

pub struct FeedbackEngine {
    store: Arc<dyn MatchStore>,
    normalizer: PartitionNormalizer,
    settings: FeedbackSettings,
}

impl FeedbackEngine {
    pub fn new(
        store: Arc<dyn MatchStore>,
        normalizer: PartitionNormalizer,
        settings: FeedbackSettings,
    ) -> Self {
        Self {
            store,
            normalizer,
            settings,
        }
    }

    pub fn settings(&self) -> &FeedbackSettings {
        &self.settings
    }

    /// Append one record; any store failure is fatal
    ///
    /// The partition is stored in canonical form.
    pub async fn record_feedback(&self, mut record: FeedbackRecord) -> MatchResult<FeedbackRecord> {
        record.partition = self.normalizer.normalize(&record.partition);

        self.store.append(&record).await.map_err(|e| {
            tracing::error!(
                feedback_id = %record.feedback_id,
                record_id = %record.record_id,
                error = %e,
                "Feedback write failed"
            );
            MatchError::FeedbackWrite(e.to_string())
        })?;

        tracing::debug!(
            feedback_id = %record.feedback_id,
            partition = %record.partition,
            full_name = %record.full_name,
            final_alias = ?record.final_alias,
            action = %record.action,
            "Feedback recorded"
        );

        Ok(record)
    }

    /// Record a reviewer's decision on a resolved entry
    ///
    /// The entry's assigned alias and tier are logged as the proposal.
    pub async fn record_confirmation(
        &self,
        entry: &NameEntry,
        final_alias: Option<&str>,
        action: FeedbackAction,
        custom_reason: Option<CustomReason>,
        session_id: &str,
        batch_id: &str,
    ) -> MatchResult<FeedbackRecord> {
        let record = FeedbackRecord::new(NewFeedback {
            session_id: session_id.to_string(),
            batch_id: batch_id.to_string(),
            partition: entry.partition.clone(),
            record_id: entry.record_id.clone(),
            full_name: entry.full_name.clone(),
            proposed_alias: entry.assigned_alias.clone(),
            proposed_confidence: entry.assigned_alias.as_ref().map(|_| entry.confidence_tier),
            final_alias: final_alias.map(str::to_string),
            action,
            custom_reason,
        });

        self.record_feedback(record).await
    }

    /// Validate and append a batch of operator-supplied feedback
    ///
    /// Every problem is reported at once and nothing is written when any exist.
    pub async fn ingest(&self, drafts: Vec<NewFeedback>) -> MatchResult<Vec<FeedbackRecord>> {
        let mut problems = Vec::new();
        for (i, draft) in drafts.iter().enumerate() {
            if draft.action.is_unknown() {
                problems.push(format!("row {}: unrecognized action '{}'", i, draft.action));
            }
            for (field, value) in [
                ("session_id", &draft.session_id),
                ("partition", &draft.partition),
                ("record_id", &draft.record_id),
                ("full_name", &draft.full_name),
            ] {
                if value.trim().is_empty() {
                    problems.push(format!("row {}: missing {}", i, field));
                }
            }
        }
        if !problems.is_empty() {
            return Err(MatchError::InputIntegrity(problems));
        }

        let mut written = Vec::with_capacity(drafts.len());
        for draft in drafts {
            written.push(self.record_feedback(FeedbackRecord::new(draft)).await?);
        }

        tracing::info!(records = written.len(), "Feedback ingested");
        Ok(written)
    }

    /// Partition history inside the configured window, oldest first
    pub async fn history(&self, partition: &str) -> MatchResult<Vec<FeedbackRecord>> {
        let since = Utc::now() - Duration::days(self.settings.history_days);
        let partition = self.normalizer.normalize(partition);
        Ok(self.store.query(&partition, Some(since)).await?)
    }

    /// Confirmed mappings for a run, already filtered against the registry
    pub fn confirmed_mappings(
        &self,
        partition: &str,
        history: &[FeedbackRecord],
        registry: &Registry,
    ) -> ConfirmedMappings {
        let partition = self.normalizer.normalize(partition);
        let mut mappings =
            build_confirmed_mappings(&partition, history, self.settings.min_confirmations);
        let dropped = mappings.retain_registered(registry);
        if dropped > 0 {
            tracing::warn!(partition = %partition, dropped, "Confirmed mappings dropped for unregistered aliases");
        }
        mappings
    }

    /// Snapshot per (session, partition) in `records`
    pub async fn evaluate(&self, records: &[FeedbackRecord]) -> MatchResult<Vec<PerformanceSnapshot>> {
        let mut groups: BTreeMap<(String, String), Vec<FeedbackRecord>> = BTreeMap::new();
        for record in records {
            groups
                .entry((record.session_id.clone(), record.partition.clone()))
                .or_default()
                .push(record.clone());
        }

        let mut snapshots = Vec::with_capacity(groups.len());
        for ((_, partition), group) in groups {
            let history = self.history(&partition).await?;
            snapshots.push(evaluate_session(&group, &history, self.settings.trend_window));
        }
        Ok(snapshots)
    }
}
