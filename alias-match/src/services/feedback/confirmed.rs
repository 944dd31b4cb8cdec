//! Confirmed-mapping cache
//!
//! full name → alias associations strong enough to skip the proposal call.
//! Rebuilt from the feedback log at the start of every run.

use crate::models::{ConfidenceTier, FeedbackRecord};
use crate::services::registry::Registry;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// One cached mapping
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedMapping {
    pub full_name: String,
    pub alias: String,
    /// Accepted records whose final alias equals `alias`
    pub confirmation_count: u32,
    pub confidence_tier: ConfidenceTier,
    pub last_confirmed_at: DateTime<Utc>,
}

/// Mappings of one partition, keyed by full name
#[derive(Debug, Clone, Default)]
pub struct ConfirmedMappings {
    partition: String,
    by_name: HashMap<String, ConfirmedMapping>,
}

impl ConfirmedMappings {
    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn get(&self, full_name: &str) -> Option<&ConfirmedMapping> {
        self.by_name.get(full_name.trim())
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfirmedMapping> {
        self.by_name.values()
    }

    /// Drop mappings whose alias left the partition's registry
    ///
    /// Returns how many were dropped. Each drop is logged as a warning.
    pub fn retain_registered(&mut self, registry: &Registry) -> usize {
        let partition = self.partition.clone();
        let before = self.by_name.len();

        self.by_name.retain(|full_name, mapping| {
            let keep = registry.contains(&partition, &mapping.alias);
            if !keep {
                tracing::warn!(
                    partition = %partition,
                    full_name = %full_name,
                    alias = %mapping.alias,
                    "Dropping confirmed mapping: alias no longer in partition registry"
                );
            }
            keep
        });

        before - self.by_name.len()
    }
}

/// Build the cache for one partition from its feedback history
///
/// The most recent final alias of each full name is the target. Names whose
/// latest decision was "no alias", or with fewer than `min_confirmations`
/// accepted confirmations of the target, are left out.
pub fn build_confirmed_mappings(
    partition: &str,
    history: &[FeedbackRecord],
    min_confirmations: u32,
) -> ConfirmedMappings {
    let mut groups: HashMap<&str, Vec<&FeedbackRecord>> = HashMap::new();
    for record in history {
        groups.entry(record.full_name.trim()).or_default().push(record);
    }

    let mut by_name = HashMap::new();

    for (full_name, records) in groups {
        // Stable on ties: a later log position wins
        let latest = records
            .iter()
            .enumerate()
            .max_by_key(|(pos, r)| (r.timestamp, *pos))
            .map(|(_, r)| *r);

        let target = match latest.and_then(|r| r.final_alias.as_deref()) {
            Some(target) => target,
            None => continue,
        };

        let confirming: Vec<&&FeedbackRecord> = records
            .iter()
            .filter(|r| r.accepted() && r.final_alias.as_deref() == Some(target))
            .collect();

        let confirmation_count = confirming.len() as u32;
        if confirmation_count < min_confirmations || confirmation_count == 0 {
            continue;
        }

        let last_confirmed_at = confirming
            .iter()
            .map(|r| r.timestamp)
            .max()
            .unwrap_or_default();

        by_name.insert(
            full_name.to_string(),
            ConfirmedMapping {
                full_name: full_name.to_string(),
                alias: target.to_string(),
                confirmation_count,
                confidence_tier: ConfidenceTier::from_confirmation_count(confirmation_count),
                last_confirmed_at,
            },
        );
    }

    tracing::debug!(partition, mappings = by_name.len(), "Confirmed mappings built");

    ConfirmedMappings {
        partition: partition.to_string(),
        by_name,
    }
}
