//! Pattern statistics over a feedback window

use crate::models::{CustomReason, FeedbackRecord};
use crate::services::proposal_client::{HintCorrection, HintMapping, ShapingHints};
use crate::utils::name_tokens::name_tokens;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Cap on ranked lists kept in a summary
pub const MAX_RANKED: usize = 50;

/// Aliases proposed and rejected at least this often become exclusion candidates
pub const EXCLUSION_MIN_REJECTIONS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenCount {
    pub token: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopularMapping {
    pub full_name: String,
    pub alias: String,
    pub confirmation_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correction {
    pub full_name: String,
    pub proposed_alias: Option<String>,
    pub final_alias: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasonCount {
    pub reason: CustomReason,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedAlias {
    pub alias: String,
    pub rejections: usize,
}

/// Statistics derived from a feedback window
///
/// Rates are percentages of `total`. An empty window yields all zeros.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatternSummary {
    pub total: usize,
    pub acceptance_rate: f64,
    pub modification_rate: f64,
    pub empty_rate: f64,
    /// Mean tier weight of proposals that carried a confidence (High=3 … Low=1)
    pub avg_proposed_confidence: f64,
    pub prefixes: Vec<TokenCount>,
    pub suffixes: Vec<TokenCount>,
    pub popular_mappings: Vec<PopularMapping>,
    /// Newest first
    pub recent_corrections: Vec<Correction>,
    pub rejection_reasons: Vec<ReasonCount>,
    pub exclusion_candidates: Vec<RejectedAlias>,
}

/// `count / total * 100`, 0 on an empty set
pub fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

fn ranked<K: Ord + Clone>(counts: HashMap<K, usize>) -> Vec<(K, usize)> {
    let mut items: Vec<(K, usize)> = counts.into_iter().collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    items.truncate(MAX_RANKED);
    items
}

/// Summarise a feedback window
pub fn analyze_patterns(history: &[FeedbackRecord]) -> PatternSummary {
    let total = history.len();
    if total == 0 {
        return PatternSummary::default();
    }

    let accepted = history.iter().filter(|r| r.accepted()).count();
    let modified = history.iter().filter(|r| r.modified()).count();
    let empty = history.iter().filter(|r| r.is_empty()).count();

    let weights: Vec<f64> = history
        .iter()
        .filter_map(|r| r.proposed_confidence.map(|t| t.weight()))
        .collect();
    let avg_proposed_confidence = if weights.is_empty() {
        0.0
    } else {
        weights.iter().sum::<f64>() / weights.len() as f64
    };

    let mut prefixes: HashMap<String, usize> = HashMap::new();
    let mut suffixes: HashMap<String, usize> = HashMap::new();
    let mut popular: HashMap<(String, String), usize> = HashMap::new();
    let mut reasons: HashMap<CustomReason, usize> = HashMap::new();
    let mut rejected: HashMap<String, usize> = HashMap::new();

    for record in history {
        if let Some(final_alias) = &record.final_alias {
            if let Some(tokens) = name_tokens(&record.full_name) {
                *prefixes.entry(tokens.prefix).or_default() += 1;
                *suffixes.entry(tokens.suffix).or_default() += 1;
            }
            if record.accepted() {
                *popular
                    .entry((record.full_name.trim().to_string(), final_alias.clone()))
                    .or_default() += 1;
            }
        }

        if !record.accepted() {
            if let Some(reason) = record.custom_reason {
                *reasons.entry(reason).or_default() += 1;
            }
            if let Some(proposed) = &record.proposed_alias {
                *rejected.entry(proposed.clone()).or_default() += 1;
            }
        }
    }

    let mut recent_corrections: Vec<Correction> = history
        .iter()
        .filter(|r| r.modified())
        .filter_map(|r| {
            r.final_alias.as_ref().map(|final_alias| Correction {
                full_name: r.full_name.clone(),
                proposed_alias: r.proposed_alias.clone(),
                final_alias: final_alias.clone(),
                timestamp: r.timestamp,
            })
        })
        .collect();
    recent_corrections.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    recent_corrections.truncate(MAX_RANKED);

    PatternSummary {
        total,
        acceptance_rate: percentage(accepted, total),
        modification_rate: percentage(modified, total),
        empty_rate: percentage(empty, total),
        avg_proposed_confidence,
        prefixes: ranked(prefixes)
            .into_iter()
            .map(|(token, count)| TokenCount { token, count })
            .collect(),
        suffixes: ranked(suffixes)
            .into_iter()
            .map(|(token, count)| TokenCount { token, count })
            .collect(),
        popular_mappings: ranked(popular)
            .into_iter()
            .map(|((full_name, alias), confirmation_count)| PopularMapping {
                full_name,
                alias,
                confirmation_count,
            })
            .collect(),
        recent_corrections,
        rejection_reasons: ranked(reasons)
            .into_iter()
            .map(|(reason, count)| ReasonCount { reason, count })
            .collect(),
        exclusion_candidates: ranked(rejected)
            .into_iter()
            .filter(|(_, count)| *count >= EXCLUSION_MIN_REJECTIONS)
            .map(|(alias, rejections)| RejectedAlias { alias, rejections })
            .collect(),
    }
}

/// Bounded sample of the summary for a proposal request
pub fn shaping_hints(summary: &PatternSummary, sample_size: usize) -> ShapingHints {
    ShapingHints {
        popular: summary
            .popular_mappings
            .iter()
            .take(sample_size)
            .map(|m| HintMapping {
                full_name: m.full_name.clone(),
                alias: m.alias.clone(),
                confirmations: m.confirmation_count as u32,
            })
            .collect(),
        corrections: summary
            .recent_corrections
            .iter()
            .take(sample_size)
            .map(|c| HintCorrection {
                full_name: c.full_name.clone(),
                proposed: c.proposed_alias.clone(),
                corrected: c.final_alias.clone(),
            })
            .collect(),
        prefixes: summary.prefixes.iter().take(sample_size).map(|t| t.token.clone()).collect(),
        suffixes: summary.suffixes.iter().take(sample_size).map(|t| t.token.clone()).collect(),
        avoid: summary
            .exclusion_candidates
            .iter()
            .take(sample_size)
            .map(|r| r.alias.clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfidenceTier, FeedbackAction, NewFeedback};

    fn record(
        name: &str,
        proposed: Option<&str>,
        final_alias: Option<&str>,
        reason: Option<CustomReason>,
    ) -> FeedbackRecord {
        FeedbackRecord::new(NewFeedback {
            session_id: "s".to_string(),
            batch_id: "b".to_string(),
            partition: "四川".to_string(),
            record_id: "r".to_string(),
            full_name: name.to_string(),
            proposed_alias: proposed.map(str::to_string),
            proposed_confidence: Some(ConfidenceTier::High),
            final_alias: final_alias.map(str::to_string),
            action: FeedbackAction::ChoseOther,
            custom_reason: reason,
        })
    }

    #[test]
    fn test_empty_history_is_all_zero() {
        let summary = analyze_patterns(&[]);
        assert_eq!(summary, PatternSummary::default());
        assert_eq!(summary.acceptance_rate, 0.0);
    }

    #[test]
    fn test_rates_and_rankings() {
        let history = vec![
            record("四川太极大药房连锁有限公司", Some("太极"), Some("太极"), None),
            record("四川太极大药房连锁有限公司", Some("太极"), Some("太极"), None),
            record("成都市华安堂大药房有限公司", Some("太极"), Some("华安堂"), Some(CustomReason::InaccurateProposal)),
            record("某某药房", Some("太极"), None, Some(CustomReason::RegistryGap)),
        ];

        let summary = analyze_patterns(&history);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.acceptance_rate, 50.0);
        assert_eq!(summary.modification_rate, 25.0);
        assert_eq!(summary.empty_rate, 25.0);
        assert_eq!(summary.avg_proposed_confidence, 3.0);

        assert_eq!(summary.popular_mappings[0].alias, "太极");
        assert_eq!(summary.popular_mappings[0].confirmation_count, 2);
        assert_eq!(summary.recent_corrections.len(), 1);
        assert_eq!(summary.rejection_reasons.len(), 2);
        assert_eq!(summary.exclusion_candidates[0].alias, "太极");
        assert_eq!(summary.exclusion_candidates[0].rejections, 2);

        // Only records with a final alias contribute tokens
        let prefix_total: usize = summary.prefixes.iter().map(|t| t.count).sum();
        assert_eq!(prefix_total, 3);
        assert_eq!(summary.prefixes[0].token, "太极");
    }

    #[test]
    fn test_hints_are_bounded() {
        let history: Vec<FeedbackRecord> = (0..20)
            .map(|i| {
                let name = format!("四川第{}号大药房有限公司", i);
                record(&name, Some("太极"), Some("太极"), None)
            })
            .collect();

        let hints = shaping_hints(&analyze_patterns(&history), 5);
        assert_eq!(hints.popular.len(), 5);
        assert!(hints.avoid.is_empty());
    }
}
