//! Quality Auditor
//!
//! Audits a finished resolution run.
//!
//! # Checks
//! 1. **Provenance**: every non-null alias must be a byte-exact member of its
//!    own partition's registry. Cross-partition leaks and unknown aliases are reported apart.
//! 2. **Row integrity**: same row count, and record_id, full_name, partition
//!    and passthrough columns identical to the input row at the same position.
//! 3. **Quality**: match rate and High share of matched entries against
//!    thresholds. Falling short is a warning, not a violation.
//!
//! `passed` depends on violations only.

use crate::config::AuditConfig;
use crate::models::{ConfidenceTier, MatchSource, NameEntry};
use crate::services::registry::Registry;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Warning thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuditThresholds {
    /// Minimum matched / total
    pub min_match_rate: f64,
    /// Minimum High / matched
    pub min_high_share: f64,
}

impl Default for AuditThresholds {
    fn default() -> Self {
        Self::from(&AuditConfig::default())
    }
}

impl From<&AuditConfig> for AuditThresholds {
    fn from(config: &AuditConfig) -> Self {
        Self {
            min_match_rate: config.min_match_rate,
            min_high_share: config.min_high_share,
        }
    }
}

/// One hard failure found by the audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditViolation {
    /// Alias belongs to other partitions only
    CrossPartition {
        row: usize,
        record_id: String,
        alias: String,
        partition: String,
        found_in: Vec<String>,
    },
    /// Alias is in no partition at all
    NotInRegistry {
        row: usize,
        record_id: String,
        alias: String,
        partition: String,
    },
    RowCountMismatch { input: usize, output: usize },
    /// A carried-through field differs from the input row
    FieldMutated {
        row: usize,
        record_id: String,
        field: String,
    },
}

impl fmt::Display for AuditViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditViolation::CrossPartition {
                row,
                record_id,
                alias,
                partition,
                found_in,
            } => write!(
                f,
                "row {} ({}): alias '{}' is not registered in {} but in {}",
                row,
                record_id,
                alias,
                partition,
                found_in.join(", ")
            ),
            AuditViolation::NotInRegistry {
                row,
                record_id,
                alias,
                partition,
            } => write!(
                f,
                "row {} ({}): alias '{}' is not in the registry (partition {})",
                row, record_id, alias, partition
            ),
            AuditViolation::RowCountMismatch { input, output } => {
                write!(f, "row count changed: {} input row(s), {} output row(s)", input, output)
            }
            AuditViolation::FieldMutated {
                row,
                record_id,
                field,
            } => write!(f, "row {} ({}): field '{}' differs from input", row, record_id, field),
        }
    }
}

/// Tier counts over matched entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl TierDistribution {
    fn add(&mut self, tier: ConfidenceTier) {
        match tier {
            ConfidenceTier::High => self.high += 1,
            ConfidenceTier::Medium => self.medium += 1,
            ConfidenceTier::Low => self.low += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }

    /// High / total, 0.0 when empty
    pub fn high_share(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.high as f64 / total as f64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditReport {
    pub total: usize,
    pub matched: usize,
    pub unmatched: usize,
    /// matched / total (0.0-1.0)
    pub match_rate: f64,
    pub tier_distribution: TierDistribution,
    pub violations: Vec<AuditViolation>,
    pub warnings: Vec<String>,
    pub passed: bool,
}

impl AuditReport {
    pub fn cross_partition_count(&self) -> usize {
        self.violations
            .iter()
            .filter(|v| matches!(v, AuditViolation::CrossPartition { .. }))
            .count()
    }

    pub fn not_in_registry_count(&self) -> usize {
        self.violations
            .iter()
            .filter(|v| matches!(v, AuditViolation::NotInRegistry { .. }))
            .count()
    }
}

pub struct QualityAuditor<'a> {
    registry: &'a Registry,
    thresholds: AuditThresholds,
}

impl<'a> QualityAuditor<'a> {
    /// Auditor with default thresholds
    pub fn new(registry: &'a Registry) -> Self {
        Self::with_thresholds(registry, AuditThresholds::default())
    }

    pub fn with_thresholds(registry: &'a Registry, thresholds: AuditThresholds) -> Self {
        Self {
            registry,
            thresholds,
        }
    }

    /// Audit `output` against the `input` rows it was produced from
    pub fn audit(&self, input: &[NameEntry], output: &[NameEntry]) -> AuditReport {
        let mut report = AuditReport {
            total: output.len(),
            ..Default::default()
        };

        self.check_provenance(output, &mut report);
        self.check_row_integrity(input, output, &mut report);
        self.check_quality(output, &mut report);

        report.passed = report.violations.is_empty();

        if report.passed {
            tracing::debug!(
                total = report.total,
                matched = report.matched,
                warnings = report.warnings.len(),
                "Audit passed"
            );
        } else {
            tracing::warn!(
                total = report.total,
                violations = report.violations.len(),
                cross_partition = report.cross_partition_count(),
                not_in_registry = report.not_in_registry_count(),
                "Audit failed"
            );
        }

        report
    }

    /// Byte-exact membership, recomputed from the registry contents rather
    /// than through the per-record validator
    fn check_provenance(&self, output: &[NameEntry], report: &mut AuditReport) {
        let members: BTreeMap<String, BTreeSet<String>> = self
            .registry
            .partitions()
            .map(|partition| (partition.to_string(), self.registry.lookup(partition)))
            .collect();

        for (row, entry) in output.iter().enumerate() {
            let Some(alias) = entry.assigned_alias.as_deref() else {
                continue;
            };

            let own = self.registry.normalize(&entry.partition);
            if members.get(&own).is_some_and(|aliases| aliases.contains(alias)) {
                continue;
            }

            let found_in: Vec<String> = members
                .iter()
                .filter(|(_, aliases)| aliases.contains(alias))
                .map(|(partition, _)| partition.clone())
                .collect();

            let violation = if found_in.is_empty() {
                AuditViolation::NotInRegistry {
                    row,
                    record_id: entry.record_id.clone(),
                    alias: alias.to_string(),
                    partition: entry.partition.clone(),
                }
            } else {
                AuditViolation::CrossPartition {
                    row,
                    record_id: entry.record_id.clone(),
                    alias: alias.to_string(),
                    partition: entry.partition.clone(),
                    found_in,
                }
            };
            report.violations.push(violation);
        }
    }

    fn check_row_integrity(&self, input: &[NameEntry], output: &[NameEntry], report: &mut AuditReport) {
        if input.len() != output.len() {
            report.violations.push(AuditViolation::RowCountMismatch {
                input: input.len(),
                output: output.len(),
            });
        }

        for (row, (before, after)) in input.iter().zip(output).enumerate() {
            let mutated = [
                ("record_id", before.record_id != after.record_id),
                ("full_name", before.full_name != after.full_name),
                ("partition", before.partition != after.partition),
            ];
            for (field, differs) in mutated {
                if differs {
                    report.violations.push(AuditViolation::FieldMutated {
                        row,
                        record_id: before.record_id.clone(),
                        field: field.to_string(),
                    });
                }
            }

            let columns = before.extra.keys().chain(after.extra.keys());
            let mut reported = BTreeSet::new();
            for column in columns {
                if before.extra.get(column) != after.extra.get(column) && reported.insert(column) {
                    report.violations.push(AuditViolation::FieldMutated {
                        row,
                        record_id: before.record_id.clone(),
                        field: column.clone(),
                    });
                }
            }
        }
    }

    fn check_quality(&self, output: &[NameEntry], report: &mut AuditReport) {
        let mut pending = 0;
        for entry in output {
            if entry.assigned_alias.is_some() {
                report.matched += 1;
                report.tier_distribution.add(entry.confidence_tier);
            }
            if entry.match_source == MatchSource::Pending {
                pending += 1;
            }
        }
        report.unmatched = report.total - report.matched;

        if report.total == 0 {
            return;
        }

        report.match_rate = report.matched as f64 / report.total as f64;

        if pending > 0 {
            report.warnings.push(format!("{} row(s) were never resolved", pending));
        }
        if report.match_rate < self.thresholds.min_match_rate {
            report.warnings.push(format!(
                "Match rate {:.1}% is below {:.1}%",
                report.match_rate * 100.0,
                self.thresholds.min_match_rate * 100.0
            ));
        }
        if report.matched > 0 && report.tier_distribution.high_share() < self.thresholds.min_high_share {
            report.warnings.push(format!(
                "High-confidence share {:.1}% of matched rows is below {:.1}%",
                report.tier_distribution.high_share() * 100.0,
                self.thresholds.min_high_share * 100.0
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AliasRecord, Resolution};
    use crate::utils::PartitionNormalizer;

    fn registry() -> Registry {
        Registry::from_records(
            vec![
                AliasRecord::new("四川", "太极", ConfidenceTier::High),
                AliasRecord::new("云南", "一心堂", ConfidenceTier::High),
            ],
            PartitionNormalizer::default(),
        )
    }

    fn resolved(id: &str, partition: &str, alias: Option<&str>, tier: ConfidenceTier) -> NameEntry {
        let mut entry = NameEntry::new(id, format!("{}某药房", id), partition);
        entry.settle(Resolution {
            alias: alias.map(str::to_string),
            confidence_tier: tier,
            source: if alias.is_some() {
                MatchSource::ProposalAccepted
            } else {
                MatchSource::Unmatched
            },
            evidence: String::new(),
        });
        entry
    }

    #[test]
    fn test_clean_run_passes() {
        let output = vec![
            resolved("1", "四川", Some("太极"), ConfidenceTier::High),
            resolved("2", "云南", Some("一心堂"), ConfidenceTier::High),
        ];
        let input: Vec<NameEntry> = output.iter().cloned().map(NameEntry::into_pending).collect();

        let report = QualityAuditor::new(&registry()).audit(&input, &output);
        assert!(report.passed);
        assert_eq!(report.matched, 2);
        assert_eq!(report.match_rate, 1.0);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_padded_alias_is_not_a_member() {
        let output = vec![
            resolved("1", "四川", Some("太极 "), ConfidenceTier::High),
            resolved("2", "四川", Some(" 一心堂"), ConfidenceTier::High),
        ];
        let input: Vec<NameEntry> = output.iter().cloned().map(NameEntry::into_pending).collect();

        let report = QualityAuditor::new(&registry()).audit(&input, &output);
        assert!(!report.passed);
        assert_eq!(report.not_in_registry_count(), 2);
        assert_eq!(report.cross_partition_count(), 0);
        assert!(matches!(
            &report.violations[0],
            AuditViolation::NotInRegistry { alias, .. } if alias == "太极 "
        ));
    }

    #[test]
    fn test_cross_partition_leak_is_violation() {
        let output = vec![resolved("1", "四川", Some("一心堂"), ConfidenceTier::High)];
        let input: Vec<NameEntry> = output.iter().cloned().map(NameEntry::into_pending).collect();

        let report = QualityAuditor::new(&registry()).audit(&input, &output);
        assert!(!report.passed);
        assert_eq!(report.cross_partition_count(), 1);
        match &report.violations[0] {
            AuditViolation::CrossPartition { found_in, .. } => assert_eq!(found_in, &vec!["云南".to_string()]),
            other => panic!("unexpected violation {:?}", other),
        }
    }

    #[test]
    fn test_warnings_do_not_fail_audit() {
        let output = vec![
            resolved("1", "四川", Some("太极"), ConfidenceTier::Low),
            resolved("2", "四川", None, ConfidenceTier::Low),
        ];
        let input: Vec<NameEntry> = output.iter().cloned().map(NameEntry::into_pending).collect();

        let report = QualityAuditor::new(&registry()).audit(&input, &output);
        assert!(report.passed);
        assert_eq!(report.unmatched, 1);
        assert_eq!(report.tier_distribution.low, 1);
        assert_eq!(report.warnings.len(), 2);
    }
}
