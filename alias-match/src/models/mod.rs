//! Data models for the matching core

pub mod alias;
pub mod entry;
pub mod feedback;

pub use alias::{AliasRecord, ConfidenceTier};
pub use entry::{MatchSource, NameEntry, Resolution};
pub use feedback::{CustomReason, FeedbackAction, FeedbackRecord, NewFeedback};
