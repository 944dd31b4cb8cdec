//! Advisory improvement suggestions
//!
//! Suggestions are text for operators. The only way feedback changes the next
//! run is the avoid-list in shaping hints.

use super::patterns::{analyze_patterns, percentage};
use crate::models::{ConfidenceTier, CustomReason, FeedbackRecord};
use std::collections::HashMap;

const MAX_MODIFICATION_RATE: f64 = 30.0;
const MIN_HIGH_CONFIDENCE_ACCEPTANCE: f64 = 80.0;
const FLAG_MIN_REJECTIONS: usize = 3;

fn reason_label(reason: CustomReason) -> &'static str {
    match reason {
        CustomReason::RegistryGap => "correct alias missing from registry",
        CustomReason::InaccurateProposal => "inaccurate proposal",
        CustomReason::Other => "other",
    }
}

/// Suggestions for a set of feedback records
pub fn suggest_improvements(records: &[FeedbackRecord]) -> Vec<String> {
    let mut suggestions = Vec::new();
    if records.is_empty() {
        return suggestions;
    }

    let summary = analyze_patterns(records);

    if summary.modification_rate > MAX_MODIFICATION_RATE {
        suggestions.push(format!(
            "Modification rate is {:.1}% (above {:.0}%): review shaping hints and registry coverage",
            summary.modification_rate, MAX_MODIFICATION_RATE
        ));
    }

    if let Some(top) = summary.rejection_reasons.first() {
        suggestions.push(format!(
            "Most common rejection reason: {} ({} record(s))",
            reason_label(top.reason),
            top.count
        ));
        if top.reason == CustomReason::RegistryGap {
            suggestions.push("Curate missing aliases into the registry for this partition".to_string());
        }
    }

    let high: Vec<&FeedbackRecord> = records
        .iter()
        .filter(|r| r.proposed_confidence == Some(ConfidenceTier::High))
        .collect();
    if !high.is_empty() {
        let rate = percentage(high.iter().filter(|r| r.accepted()).count(), high.len());
        if rate < MIN_HIGH_CONFIDENCE_ACCEPTANCE {
            suggestions.push(format!(
                "High-confidence proposals accepted only {:.1}% of the time (below {:.0}%): confidence is overstated",
                rate, MIN_HIGH_CONFIDENCE_ACCEPTANCE
            ));
        }
    }

    let mut rejected: HashMap<&str, usize> = HashMap::new();
    for record in records.iter().filter(|r| !r.accepted()) {
        if let Some(alias) = record.proposed_alias.as_deref() {
            *rejected.entry(alias).or_default() += 1;
        }
    }
    let mut flagged: Vec<(&str, usize)> = rejected
        .into_iter()
        .filter(|(_, n)| *n >= FLAG_MIN_REJECTIONS)
        .collect();
    flagged.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    for (alias, n) in flagged {
        suggestions.push(format!(
            "Alias '{}' was proposed and rejected {} times: consider excluding it",
            alias, n
        ));
    }

    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeedbackAction, NewFeedback};

    fn record(proposed: &str, final_alias: Option<&str>, reason: Option<CustomReason>) -> FeedbackRecord {
        FeedbackRecord::new(NewFeedback {
            session_id: "s".to_string(),
            batch_id: "b".to_string(),
            partition: "重庆".to_string(),
            record_id: "r".to_string(),
            full_name: "重庆某药房".to_string(),
            proposed_alias: Some(proposed.to_string()),
            proposed_confidence: Some(ConfidenceTier::High),
            final_alias: final_alias.map(str::to_string),
            action: FeedbackAction::ChoseOther,
            custom_reason: reason,
        })
    }

    #[test]
    fn test_no_records_no_suggestions() {
        assert!(suggest_improvements(&[]).is_empty());
    }

    #[test]
    fn test_flags_repeatedly_rejected_alias() {
        let records = vec![
            record("和平药房", Some("桐君阁"), Some(CustomReason::InaccurateProposal)),
            record("和平药房", Some("桐君阁"), Some(CustomReason::InaccurateProposal)),
            record("和平药房", None, Some(CustomReason::RegistryGap)),
            record("万家燕", Some("万家燕"), None),
        ];

        let suggestions = suggest_improvements(&records);
        assert!(suggestions.iter().any(|s| s.contains("Modification rate is 50.0%")));
        assert!(suggestions.iter().any(|s| s.contains("inaccurate proposal (2 record(s))")));
        assert!(suggestions.iter().any(|s| s.contains("accepted only 25.0%")));
        assert!(suggestions.iter().any(|s| s.contains("'和平药房' was proposed and rejected 3 times")));
    }

    #[test]
    fn test_healthy_session_has_no_warnings() {
        let records: Vec<FeedbackRecord> =
            (0..5).map(|_| record("万家燕", Some("万家燕"), None)).collect();
        assert!(suggest_improvements(&records).is_empty());
    }
}
