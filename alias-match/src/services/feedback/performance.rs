//! Per-session performance rollup and acceptance-rate trend

use super::patterns::percentage;
use crate::models::{ConfidenceTier, FeedbackRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Acceptance rate of one past session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRate {
    pub session_id: String,
    pub acceptance_rate: f64,
    pub last_feedback_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    pub session_id: String,
    pub partition: String,
    pub total: usize,
    pub accepted: usize,
    pub modified: usize,
    pub empty: usize,
    pub acceptance_rate: f64,
    pub modification_rate: f64,
    pub empty_rate: f64,
    /// Proposals that carried High confidence
    pub high_confidence_total: usize,
    pub high_confidence_acceptance_rate: f64,
    /// Newest first, current session included
    pub trend: Vec<SessionRate>,
    /// Current rate minus the mean of the other trend entries
    pub improvement: f64,
}

fn acceptance_rate(records: &[&FeedbackRecord]) -> f64 {
    percentage(records.iter().filter(|r| r.accepted()).count(), records.len())
}

/// Evaluate one session's records against the partition's history
///
/// `history` may already contain the session's own records; they are ignored
/// in favour of `records`.
pub fn evaluate_session(
    records: &[FeedbackRecord],
    history: &[FeedbackRecord],
    trend_window: usize,
) -> PerformanceSnapshot {
    let session_id = records.first().map(|r| r.session_id.clone()).unwrap_or_default();
    let partition = records.first().map(|r| r.partition.clone()).unwrap_or_default();

    let total = records.len();
    let accepted = records.iter().filter(|r| r.accepted()).count();
    let modified = records.iter().filter(|r| r.modified()).count();
    let empty = records.iter().filter(|r| r.is_empty()).count();

    let high: Vec<&FeedbackRecord> = records
        .iter()
        .filter(|r| r.proposed_confidence == Some(ConfidenceTier::High))
        .collect();

    let current = SessionRate {
        session_id: session_id.clone(),
        acceptance_rate: percentage(accepted, total),
        last_feedback_at: records.iter().map(|r| r.timestamp).max().unwrap_or_else(Utc::now),
    };

    let mut by_session: HashMap<&str, Vec<&FeedbackRecord>> = HashMap::new();
    for record in history.iter().filter(|r| r.session_id != session_id) {
        by_session.entry(record.session_id.as_str()).or_default().push(record);
    }

    let mut others: Vec<SessionRate> = by_session
        .into_iter()
        .filter_map(|(id, recs)| {
            let last = recs.iter().map(|r| r.timestamp).max()?;
            Some(SessionRate {
                session_id: id.to_string(),
                acceptance_rate: acceptance_rate(&recs),
                last_feedback_at: last,
            })
        })
        .collect();
    others.sort_by(|a, b| {
        b.last_feedback_at
            .cmp(&a.last_feedback_at)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
    others.truncate(trend_window.saturating_sub(1));

    let improvement = if others.is_empty() {
        0.0
    } else {
        let mean = others.iter().map(|s| s.acceptance_rate).sum::<f64>() / others.len() as f64;
        current.acceptance_rate - mean
    };

    let mut trend = Vec::with_capacity(others.len() + 1);
    if trend_window > 0 {
        trend.push(current);
    }
    trend.extend(others);

    PerformanceSnapshot {
        session_id,
        partition,
        total,
        accepted,
        modified,
        empty,
        acceptance_rate: percentage(accepted, total),
        modification_rate: percentage(modified, total),
        empty_rate: percentage(empty, total),
        high_confidence_total: high.len(),
        high_confidence_acceptance_rate: acceptance_rate(&high),
        trend,
        improvement,
    }
}
