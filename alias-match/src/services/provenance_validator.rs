//! Provenance validator
//!
//! The last gate before an alias lands in an entry. A proposal is only ever
//! accepted when `(partition, alias)` is in the registry; anything else is
//! nullified and logged.

use crate::error::{MatchError, MatchResult};
use crate::models::{ConfidenceTier, MatchSource, NameEntry, Resolution};
use crate::services::feedback::ConfirmedMapping;
use crate::services::proposal_client::Proposal;
use crate::services::registry::Registry;
use std::collections::BTreeSet;

/// Evidence for a null proposal
pub const NO_CANDIDATE_EVIDENCE: &str = "no candidate in registry";

/// Evidence for an alias absent from every partition
pub const NOT_IN_REGISTRY_EVIDENCE: &str = "not found in registry";

/// Outcome of checking one alias against one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Null or empty alias (always valid)
    NoMatch,
    /// Alias is in the partition's registry
    Valid,
    /// Alias belongs to other partitions only
    CrossPartition { found_in: BTreeSet<String> },
    /// Alias is in no partition at all
    NotInRegistry,
}

impl Verdict {
    pub fn is_acceptable(&self) -> bool {
        matches!(self, Verdict::NoMatch | Verdict::Valid)
    }
}

/// Checks aliases against a registry
pub struct ProvenanceValidator<'a> {
    registry: &'a Registry,
}

impl<'a> ProvenanceValidator<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Pure and idempotent
    pub fn validate(&self, alias: Option<&str>, partition: &str) -> Verdict {
        let alias = match alias.map(str::trim).filter(|a| !a.is_empty()) {
            Some(alias) => alias,
            None => return Verdict::NoMatch,
        };

        if self.registry.contains(partition, alias) {
            return Verdict::Valid;
        }

        let found_in = self.registry.find_alias_in_other_partitions(alias);
        if found_in.is_empty() {
            Verdict::NotInRegistry
        } else {
            Verdict::CrossPartition { found_in }
        }
    }

    fn rejection_evidence(&self, verdict: &Verdict, alias: &str, partition: &str) -> String {
        let mut evidence = match verdict {
            Verdict::CrossPartition { found_in } => format!(
                "found in other partition(s): {}",
                found_in.iter().cloned().collect::<Vec<_>>().join(", ")
            ),
            _ => NOT_IN_REGISTRY_EVIDENCE.to_string(),
        };

        if let Some((closest, score)) = self.registry.closest_alias(partition, alias) {
            evidence.push_str(&format!("; closest registry alias: {} ({:.2})", closest, score));
        }

        evidence
    }

    /// Settle a cache hit as `HistoricalConfirmed`
    pub fn settle_historical(&self, entry: &mut NameEntry, mapping: &ConfirmedMapping) -> bool {
        entry.settle(Resolution {
            alias: Some(mapping.alias.clone()),
            confidence_tier: mapping.confidence_tier,
            source: MatchSource::HistoricalConfirmed,
            evidence: format!(
                "confirmed mapping ({} confirmation(s))",
                mapping.confirmation_count
            ),
        })
    }

    /// Resolution for a returned proposal
    ///
    /// Rejections log a warning naming the full name, alias and partition.
    pub fn resolve_proposal(&self, entry: &NameEntry, proposal: &Proposal) -> Resolution {
        let verdict = self.validate(proposal.alias.as_deref(), &entry.partition);

        match (&verdict, proposal.alias.as_deref()) {
            (Verdict::NoMatch, _) | (_, None) => Resolution::unmatched(NO_CANDIDATE_EVIDENCE),
            (Verdict::Valid, Some(alias)) => Resolution {
                alias: Some(alias.trim().to_string()),
                confidence_tier: proposal.confidence,
                source: MatchSource::ProposalAccepted,
                evidence: proposal.reasoning.clone(),
            },
            (_, Some(alias)) => {
                let evidence = self.rejection_evidence(&verdict, alias, &entry.partition);
                tracing::warn!(
                    full_name = %entry.full_name,
                    alias,
                    partition = %entry.partition,
                    reason = %evidence,
                    "Proposal rejected by provenance validation"
                );
                Resolution {
                    alias: None,
                    confidence_tier: ConfidenceTier::Low,
                    source: MatchSource::ValidationRejected,
                    evidence,
                }
            }
        }
    }

    /// Settle a pending entry from a proposal; returns the verdict
    pub fn settle_proposal(&self, entry: &mut NameEntry, proposal: &Proposal) -> Verdict {
        let verdict = self.validate(proposal.alias.as_deref(), &entry.partition);
        let resolution = self.resolve_proposal(entry, proposal);
        entry.settle(resolution);
        verdict
    }

    /// Settle a pending entry as `Unmatched`
    pub fn settle_unmatched(&self, entry: &mut NameEntry, evidence: impl Into<String>) -> bool {
        entry.settle(Resolution::unmatched(evidence))
    }

    /// Human override of a settled entry
    ///
    /// Accepted only when the new alias is `Valid` or `NoMatch` for the entry's
    /// partition; otherwise the entry is left untouched.
    pub fn apply_override(
        &self,
        entry: &mut NameEntry,
        alias: Option<&str>,
        reviewer_note: &str,
    ) -> MatchResult<Verdict> {
        let verdict = self.validate(alias, &entry.partition);
        if !verdict.is_acceptable() {
            let alias = alias.unwrap_or_default().trim().to_string();
            tracing::warn!(
                record_id = %entry.record_id,
                alias = %alias,
                partition = %entry.partition,
                "Human override rejected by provenance validation"
            );
            return Err(MatchError::Provenance {
                alias,
                partition: entry.partition.clone(),
            });
        }

        let new_alias = alias.map(str::trim).filter(|a| !a.is_empty());
        entry.assigned_alias = new_alias.map(str::to_string);
        entry.confidence_tier = match new_alias {
            Some(a) => self
                .registry
                .record(&entry.partition, a)
                .map(|r| r.confidence_tier)
                .unwrap_or(ConfidenceTier::Low),
            None => ConfidenceTier::Low,
        };
        entry.match_source = if new_alias.is_some() {
            MatchSource::ProposalAccepted
        } else {
            MatchSource::Unmatched
        };
        entry.evidence_text = format!("human override: {}", reviewer_note);

        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AliasRecord;
    use crate::utils::PartitionNormalizer;

    fn registry() -> Registry {
        Registry::from_records(
            vec![
                AliasRecord::new("四川", "太极", ConfidenceTier::High),
                AliasRecord::new("云南", "一心堂", ConfidenceTier::High),
                AliasRecord::new("重庆", "桐君阁", ConfidenceTier::Medium),
            ],
            PartitionNormalizer::default(),
        )
    }

    #[test]
    fn test_verdicts() {
        let registry = registry();
        let v = ProvenanceValidator::new(&registry);

        assert_eq!(v.validate(None, "四川"), Verdict::NoMatch);
        assert_eq!(v.validate(Some("  "), "四川"), Verdict::NoMatch);
        assert_eq!(v.validate(Some("太极"), "四川省"), Verdict::Valid);
        assert_eq!(
            v.validate(Some("一心堂"), "四川"),
            Verdict::CrossPartition {
                found_in: BTreeSet::from(["云南".to_string()])
            }
        );
        assert_eq!(v.validate(Some("虚构大药房"), "四川"), Verdict::NotInRegistry);
    }

    #[test]
    fn test_validate_is_idempotent() {
        let registry = registry();
        let v = ProvenanceValidator::new(&registry);
        for alias in [None, Some("太极"), Some("一心堂"), Some("虚构大药房")] {
            assert_eq!(v.validate(alias, "四川"), v.validate(alias, "四川"));
        }
    }

    #[test]
    fn test_override_outside_partition_leaves_entry_untouched() {
        let registry = registry();
        let v = ProvenanceValidator::new(&registry);
        let mut entry = NameEntry::new("r1", "四川太极大药房连锁有限公司", "四川");
        v.settle_unmatched(&mut entry, "no candidate in registry");
        let before = entry.clone();

        let err = v.apply_override(&mut entry, Some("桐君阁"), "reviewer").unwrap_err();
        assert!(matches!(err, MatchError::Provenance { .. }));
        assert_eq!(entry, before);

        let verdict = v.apply_override(&mut entry, Some("太极"), "reviewer").unwrap();
        assert_eq!(verdict, Verdict::Valid);
        assert_eq!(entry.assigned_alias.as_deref(), Some("太极"));
        assert_eq!(entry.confidence_tier, ConfidenceTier::High);
    }
}
