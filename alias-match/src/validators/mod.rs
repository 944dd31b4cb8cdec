//! Post-run validation
//!
//! The quality auditor re-checks a finished run against the registry and the
//! input rows. It reports; it never corrects.

pub mod quality_auditor;

pub use quality_auditor::{AuditReport, AuditThresholds, AuditViolation, QualityAuditor, TierDistribution};
