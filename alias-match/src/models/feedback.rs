//! Feedback records: the append-only log of human confirmations
//!
//! The log is the only durable truth for the learning loop. Confirmed mappings,
//! pattern summaries and performance snapshots are all rebuilt from it per run.

use super::alias::ConfidenceTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the reviewer did with a proposal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FeedbackAction {
    AcceptedProposal,
    ChoseOther,
    LeftEmpty,
    /// Picked the n-th candidate from the review list
    ChoseCandidate(u32),
    /// Unrecognized value read back from storage
    Unknown(String),
}

impl FeedbackAction {
    pub fn as_string(&self) -> String {
        match self {
            FeedbackAction::AcceptedProposal => "accepted_proposal".to_string(),
            FeedbackAction::ChoseOther => "chose_other".to_string(),
            FeedbackAction::LeftEmpty => "left_empty".to_string(),
            FeedbackAction::ChoseCandidate(n) => format!("chose_candidate_{}", n),
            FeedbackAction::Unknown(raw) => raw.clone(),
        }
    }

    /// Parse any stored or operator-supplied value; never fails
    pub fn parse(value: &str) -> Self {
        let normalized = value.trim().to_lowercase();
        match normalized.as_str() {
            "accepted_proposal" | "accept" | "accepted" => FeedbackAction::AcceptedProposal,
            "chose_other" | "modify" | "modified" => FeedbackAction::ChoseOther,
            "left_empty" | "empty" => FeedbackAction::LeftEmpty,
            other => other
                .strip_prefix("chose_candidate_")
                .and_then(|n| n.parse::<u32>().ok())
                .map(FeedbackAction::ChoseCandidate)
                .unwrap_or_else(|| FeedbackAction::Unknown(value.to_string())),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, FeedbackAction::Unknown(_))
    }
}

impl From<String> for FeedbackAction {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<FeedbackAction> for String {
    fn from(action: FeedbackAction) -> Self {
        action.as_string()
    }
}

impl std::fmt::Display for FeedbackAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_string())
    }
}

/// Why a reviewer overrode or emptied a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CustomReason {
    /// The correct alias is missing from the registry
    RegistryGap,
    /// The proposal picked the wrong alias
    InaccurateProposal,
    Other,
}

impl CustomReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomReason::RegistryGap => "registry_gap",
            CustomReason::InaccurateProposal => "inaccurate_proposal",
            CustomReason::Other => "other",
        }
    }

    /// Unrecognized values become `Other`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "registry_gap" | "registrygap" | "not_in_registry" => CustomReason::RegistryGap,
            "inaccurate_proposal" | "inaccurateproposal" | "inaccurate" => {
                CustomReason::InaccurateProposal
            }
            _ => CustomReason::Other,
        }
    }
}

impl From<String> for CustomReason {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<CustomReason> for String {
    fn from(reason: CustomReason) -> Self {
        reason.as_str().to_string()
    }
}

impl std::fmt::Display for CustomReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied fields of a feedback event
///
/// `accepted` and `modified` are not here: [`FeedbackRecord`] derives them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFeedback {
    pub session_id: String,
    #[serde(default)]
    pub batch_id: String,
    pub partition: String,
    pub record_id: String,
    pub full_name: String,
    #[serde(default)]
    pub proposed_alias: Option<String>,
    #[serde(default)]
    pub proposed_confidence: Option<ConfidenceTier>,
    #[serde(default)]
    pub final_alias: Option<String>,
    pub action: FeedbackAction,
    #[serde(default)]
    pub custom_reason: Option<CustomReason>,
}

/// One immutable feedback log entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackRecord {
    pub feedback_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub batch_id: String,
    pub partition: String,
    pub record_id: String,
    pub full_name: String,
    pub proposed_alias: Option<String>,
    pub proposed_confidence: Option<ConfidenceTier>,
    pub final_alias: Option<String>,
    pub action: FeedbackAction,
    accepted: bool,
    modified: bool,
    pub custom_reason: Option<CustomReason>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl FeedbackRecord {
    /// New record stamped now with a fresh id
    pub fn new(draft: NewFeedback) -> Self {
        Self::at(draft, Utc::now())
    }

    /// New record with an explicit timestamp
    pub fn at(draft: NewFeedback, timestamp: DateTime<Utc>) -> Self {
        Self::restore(Uuid::new_v4(), timestamp, draft)
    }

    /// Rebuild a stored record; flags are re-derived from the aliases
    pub fn restore(feedback_id: Uuid, timestamp: DateTime<Utc>, draft: NewFeedback) -> Self {
        let proposed_alias = non_empty(draft.proposed_alias);
        let final_alias = non_empty(draft.final_alias);
        let accepted = final_alias == proposed_alias;
        let modified = !accepted && final_alias.is_some();

        Self {
            feedback_id,
            timestamp,
            session_id: draft.session_id,
            batch_id: draft.batch_id,
            partition: draft.partition,
            record_id: draft.record_id,
            full_name: draft.full_name,
            proposed_alias,
            proposed_confidence: draft.proposed_confidence,
            final_alias,
            action: draft.action,
            accepted,
            modified,
            custom_reason: draft.custom_reason,
        }
    }

    /// Final alias equals the proposed alias (both null counts)
    pub fn accepted(&self) -> bool {
        self.accepted
    }

    /// Final alias differs from the proposal and is non-null
    pub fn modified(&self) -> bool {
        self.modified
    }

    /// Reviewer left the entry without an alias
    pub fn is_empty(&self) -> bool {
        self.final_alias.is_none()
    }
}
