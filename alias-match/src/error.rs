//! Error types for alias-match
//!
//! Provenance violations during resolution are not errors: they settle as
//! `ValidationRejected`. `MatchError::Provenance` is only raised when a human
//! override names an alias outside the partition's registry.

use thiserror::Error;

/// Matching core error type
#[derive(Debug, Error)]
pub enum MatchError {
    /// Input rows failed integrity checks (every problem is listed)
    #[error("Input integrity check failed: {}", .0.join("; "))]
    InputIntegrity(Vec<String>),

    /// Partition has no registry aliases; its batch cannot be resolved
    #[error("Partition '{0}' has no aliases in the registry")]
    EmptyPartition(String),

    /// Feedback could not be persisted
    #[error("Feedback write failed: {0}")]
    FeedbackWrite(String),

    /// Alias is not a member of the partition's registry set
    #[error("Alias '{alias}' is not registered in partition '{partition}'")]
    Provenance { alias: String, partition: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// alias-common error
    #[error("Common error: {0}")]
    Common(#[from] alias_common::Error),

    /// Row (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for MatchError {
    fn from(err: sqlx::Error) -> Self {
        MatchError::Common(alias_common::Error::Database(err))
    }
}

impl From<std::io::Error> for MatchError {
    fn from(err: std::io::Error) -> Self {
        MatchError::Common(alias_common::Error::Io(err))
    }
}

/// Result type for the matching core
pub type MatchResult<T> = std::result::Result<T, MatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_integrity_lists_all_problems() {
        let err = MatchError::InputIntegrity(vec![
            "row 0: missing record_id".to_string(),
            "row 3: missing partition".to_string(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("row 0: missing record_id"));
        assert!(msg.contains("row 3: missing partition"));
    }
}
