//! Name entries: the unit of work for one resolution pass

use super::alias::ConfidenceTier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resolution state of a [`NameEntry`]
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchSource {
    #[default]
    Pending,
    /// Resolved from the confirmed-mapping cache
    HistoricalConfirmed,
    /// Proposal passed registry validation
    ProposalAccepted,
    /// Proposal named an alias outside the partition's registry
    ValidationRejected,
    /// No alias (no candidate, call failure, or cancellation)
    Unmatched,
}

impl MatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchSource::Pending => "Pending",
            MatchSource::HistoricalConfirmed => "HistoricalConfirmed",
            MatchSource::ProposalAccepted => "ProposalAccepted",
            MatchSource::ValidationRejected => "ValidationRejected",
            MatchSource::Unmatched => "Unmatched",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "Pending" => Some(MatchSource::Pending),
            "HistoricalConfirmed" => Some(MatchSource::HistoricalConfirmed),
            "ProposalAccepted" => Some(MatchSource::ProposalAccepted),
            "ValidationRejected" => Some(MatchSource::ValidationRejected),
            "Unmatched" => Some(MatchSource::Unmatched),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, MatchSource::Pending)
    }
}

impl std::fmt::Display for MatchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome written into an entry
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub alias: Option<String>,
    pub confidence_tier: ConfidenceTier,
    pub source: MatchSource,
    pub evidence: String,
}

impl Resolution {
    /// Unmatched outcome with Low confidence
    pub fn unmatched(evidence: impl Into<String>) -> Self {
        Self {
            alias: None,
            confidence_tier: ConfidenceTier::Low,
            source: MatchSource::Unmatched,
            evidence: evidence.into(),
        }
    }
}

/// One row to resolve
///
/// Input columns are `record_id`, `full_name`, `partition` plus any passthrough
/// columns (`extra`). Resolution adds `assigned_alias`, `confidence_tier`,
/// `match_source` and `evidence_text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameEntry {
    pub record_id: String,
    pub full_name: String,
    pub partition: String,
    #[serde(default)]
    pub assigned_alias: Option<String>,
    #[serde(default)]
    pub confidence_tier: ConfidenceTier,
    #[serde(default)]
    pub match_source: MatchSource,
    #[serde(default)]
    pub evidence_text: String,
    /// Passthrough columns, carried through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl NameEntry {
    /// New pending entry
    pub fn new(
        record_id: impl Into<String>,
        full_name: impl Into<String>,
        partition: impl Into<String>,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            full_name: full_name.into(),
            partition: partition.into(),
            assigned_alias: None,
            confidence_tier: ConfidenceTier::Low,
            match_source: MatchSource::Pending,
            evidence_text: String::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.match_source == MatchSource::Pending
    }

    /// Move a pending entry into its terminal state
    ///
    /// Returns `false` and leaves the entry untouched if it was already settled.
    pub(crate) fn settle(&mut self, resolution: Resolution) -> bool {
        if !self.is_pending() {
            tracing::warn!(
                record_id = %self.record_id,
                current = %self.match_source,
                attempted = %resolution.source,
                "Refusing to re-settle an already resolved entry"
            );
            return false;
        }

        self.assigned_alias = resolution.alias;
        self.confidence_tier = resolution.confidence_tier;
        self.match_source = resolution.source;
        self.evidence_text = resolution.evidence;
        true
    }

    /// Current outcome as a [`Resolution`] (used to copy results to duplicates)
    pub fn resolution(&self) -> Resolution {
        Resolution {
            alias: self.assigned_alias.clone(),
            confidence_tier: self.confidence_tier,
            source: self.match_source,
            evidence: self.evidence_text.clone(),
        }
    }

    /// Reset to the pending input shape (drops any previous result columns)
    pub fn into_pending(mut self) -> Self {
        self.assigned_alias = None;
        self.confidence_tier = ConfidenceTier::Low;
        self.match_source = MatchSource::Pending;
        self.evidence_text = String::new();
        self
    }
}
