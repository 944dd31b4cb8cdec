//! Configuration for alias-match
//!
//! Module sections live in the same TOML file as the bootstrap config
//! (`alias_common::config::TomlConfig`); each section falls back to defaults
//! when absent. The proposal API key resolves Database → ENV → TOML.

use crate::error::{MatchError, MatchResult};
use crate::utils::{PartitionRules, RetryPolicy};
use alias_common::config::TomlConfig;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{info, warn};

/// Environment variable holding the proposal API key
pub const API_KEY_ENV: &str = "ALIAS_MATCH_API_KEY";

/// All module sections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub proposal: ProposalConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub partition: PartitionRules,
}

/// `[matching]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Names per proposal request
    pub batch_size: usize,
    /// Proposal groups in flight at once
    pub concurrency: usize,
    /// Confirmations needed before a mapping bypasses the proposal step
    pub min_confirmations: u32,
    /// Feedback history window
    pub history_days: i64,
    /// Sessions in the acceptance-rate trend
    pub trend_window: usize,
    /// Examples per shaping-hint category
    pub hint_sample_size: usize,
    pub proposal_timeout_secs: u64,
    pub verification_timeout_secs: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            concurrency: 5,
            min_confirmations: 2,
            history_days: 30,
            trend_window: 10,
            hint_sample_size: 5,
            proposal_timeout_secs: 60,
            verification_timeout_secs: 30,
        }
    }
}

/// `[audit]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub min_match_rate: f64,
    pub min_high_share: f64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            min_match_rate: 0.80,
            min_high_share: 0.60,
        }
    }
}

/// `[proposal]`: Anthropic-compatible Messages endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposalConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub requests_per_minute: u32,
    pub api_version: String,
    /// Lowest-priority key source (same tier as the root `proposal_api_key`)
    pub api_key: Option<String>,
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.moonshot.cn/anthropic".to_string(),
            model: "kimi-k2-thinking-turbo".to_string(),
            temperature: 0.1,
            max_tokens: 4000,
            requests_per_minute: 60,
            api_version: "2023-06-01".to_string(),
            api_key: None,
        }
    }
}

/// Which verification backend `registry curate` uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationBackendKind {
    /// HTTP search endpoint
    Search,
    /// Offline: the registry itself
    #[default]
    Registry,
}

/// `[verification]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub backend: VerificationBackendKind,
    /// Search endpoint; required for the `search` backend
    pub endpoint: Option<String>,
    /// Score at or above which an alias counts as verified
    pub threshold: u8,
    pub requests_per_minute: u32,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            backend: VerificationBackendKind::Registry,
            endpoint: None,
            threshold: 60,
            requests_per_minute: 30,
        }
    }
}

impl MatchConfig {
    /// Parse module sections from TOML text (root keys are ignored)
    pub fn from_toml_str(content: &str) -> MatchResult<Self> {
        let config: MatchConfig = toml::from_str(content)
            .map_err(|e| MatchError::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or break a run
    pub fn validate(&self) -> MatchResult<()> {
        let mut problems = Vec::new();
        if self.matching.batch_size == 0 {
            problems.push("matching.batch_size must be at least 1");
        }
        if self.matching.concurrency == 0 {
            problems.push("matching.concurrency must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            problems.push("retry.max_attempts must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.audit.min_match_rate)
            || !(0.0..=1.0).contains(&self.audit.min_high_share)
        {
            problems.push("audit thresholds must be between 0 and 1");
        }
        if self.verification.threshold > 100 {
            problems.push("verification.threshold must be 0-100");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(MatchError::Config(problems.join("; ")))
        }
    }
}

/// Load module sections from the config file, defaults when there is none
///
/// Mirrors `alias_common::config::load_toml_config_or_default`.
pub fn load_match_config(explicit: Option<&Path>) -> MatchResult<MatchConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => alias_common::config::default_config_path().filter(|p| p.exists()),
    };

    match path {
        Some(path) => {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                MatchError::Config(format!("Read TOML failed ({}): {}", path.display(), e))
            })?;
            MatchConfig::from_toml_str(&content)
        }
        None => Ok(MatchConfig::default()),
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve the proposal API key
///
/// **Priority:** Database → ENV (`ALIAS_MATCH_API_KEY`) → TOML
pub async fn resolve_proposal_api_key(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
    match_config: &MatchConfig,
) -> MatchResult<String> {
    let db_key = crate::db::settings::get_proposal_api_key(db)
        .await?
        .filter(|k| is_valid_key(k));
    let env_key = std::env::var(API_KEY_ENV).ok().filter(|k| is_valid_key(k));
    let toml_key = toml_config
        .proposal_api_key
        .clone()
        .or_else(|| match_config.proposal.api_key.clone())
        .filter(|k| is_valid_key(k));

    let sources: Vec<&str> = [
        db_key.as_ref().map(|_| "database"),
        env_key.as_ref().map(|_| "environment"),
        toml_key.as_ref().map(|_| "TOML"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if sources.len() > 1 {
        warn!(
            "Proposal API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(key) = db_key {
        info!("Proposal API key loaded from database");
        return Ok(key);
    }
    if let Some(key) = env_key {
        info!("Proposal API key loaded from environment variable");
        return Ok(key);
    }
    if let Some(key) = toml_key {
        info!("Proposal API key loaded from TOML config");
        return Ok(key);
    }

    Err(MatchError::Config(format!(
        "Proposal API key not configured. Configure using one of:\n\
         1. alias-match settings set-api-key <KEY>\n\
         2. Environment: {}=your-key\n\
         3. TOML config: proposal_api_key = \"your-key\"",
        API_KEY_ENV
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MatchConfig::default();
        assert_eq!(config.matching.batch_size, 50);
        assert_eq!(config.matching.concurrency, 5);
        assert_eq!(config.matching.min_confirmations, 2);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.proposal.model, "kimi-k2-thinking-turbo");
        assert_eq!(config.verification.backend, VerificationBackendKind::Registry);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let content = r#"
            root_folder = "/ignored/here"

            [matching]
            batch_size = 20

            [verification]
            backend = "search"
            endpoint = "http://localhost:9000/search"

            [partition]
            strip_suffixes = ["省"]
        "#;

        let config = MatchConfig::from_toml_str(content).unwrap();
        assert_eq!(config.matching.batch_size, 20);
        assert_eq!(config.matching.concurrency, 5);
        assert_eq!(config.verification.backend, VerificationBackendKind::Search);
        assert_eq!(config.verification.threshold, 60);
        assert_eq!(config.partition.strip_suffixes, vec!["省".to_string()]);
        assert!(config.partition.use_builtin_aliases);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = MatchConfig::from_toml_str("[matching]\nbatch_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }
}
