//! Registry alias records and confidence tiers

use serde::{Deserialize, Serialize};

/// Confidence tier attached to registry aliases, proposals and resolutions
///
/// Serialized as `"High"`, `"Medium"`, `"Low"`. Parsing also accepts lowercase
/// and the Chinese labels used by curators (高/中/低).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConfidenceTier {
    High,
    Medium,
    #[default]
    Low,
}

impl ConfidenceTier {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::High => "High",
            ConfidenceTier::Medium => "Medium",
            ConfidenceTier::Low => "Low",
        }
    }

    /// Strict parse; `None` for anything unrecognized
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "high" | "高" => Some(ConfidenceTier::High),
            "medium" | "mid" | "中" => Some(ConfidenceTier::Medium),
            "low" | "低" => Some(ConfidenceTier::Low),
            _ => None,
        }
    }

    /// Lenient parse for proposal responses: unknown or missing degrades to Low
    pub fn parse_or_low(value: Option<&str>) -> Self {
        value.and_then(Self::parse).unwrap_or(ConfidenceTier::Low)
    }

    /// Tier for a confirmed mapping with `count` confirmations
    ///
    /// ≥5 High, ≥3 Medium, else Low.
    pub fn from_confirmation_count(count: u32) -> Self {
        if count >= 5 {
            ConfidenceTier::High
        } else if count >= 3 {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }

    /// Numeric weight used for confidence averages (High=3, Medium=2, Low=1)
    pub fn weight(&self) -> f64 {
        match self {
            ConfidenceTier::High => 3.0,
            ConfidenceTier::Medium => 2.0,
            ConfidenceTier::Low => 1.0,
        }
    }
}

impl std::fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for ConfidenceTier {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown confidence tier '{}'", value))
    }
}

impl From<ConfidenceTier> for String {
    fn from(tier: ConfidenceTier) -> Self {
        tier.as_str().to_string()
    }
}

/// One verified alias in the registry
///
/// Produced by curation or migration; read-only to the matching core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasRecord {
    /// Partition (administrative region) this alias is valid in
    pub partition: String,
    /// The alias text
    pub alias_text: String,
    /// Curation confidence
    pub confidence_tier: ConfidenceTier,
    /// Evidence summary gathered during curation
    #[serde(default)]
    pub evidence: String,
    /// Who (or which backend) verified the alias
    #[serde(default)]
    pub verified_by: String,
}

impl AliasRecord {
    pub fn new(
        partition: impl Into<String>,
        alias_text: impl Into<String>,
        confidence_tier: ConfidenceTier,
    ) -> Self {
        Self {
            partition: partition.into(),
            alias_text: alias_text.into(),
            confidence_tier,
            evidence: String::new(),
            verified_by: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_case_and_chinese_labels() {
        assert_eq!(ConfidenceTier::parse("HIGH"), Some(ConfidenceTier::High));
        assert_eq!(ConfidenceTier::parse(" medium "), Some(ConfidenceTier::Medium));
        assert_eq!(ConfidenceTier::parse("低"), Some(ConfidenceTier::Low));
        assert_eq!(ConfidenceTier::parse("certain"), None);
    }

    #[test]
    fn test_parse_or_low() {
        assert_eq!(ConfidenceTier::parse_or_low(Some("bogus")), ConfidenceTier::Low);
        assert_eq!(ConfidenceTier::parse_or_low(None), ConfidenceTier::Low);
        assert_eq!(ConfidenceTier::parse_or_low(Some("High")), ConfidenceTier::High);
    }

    #[test]
    fn test_tier_thresholds() {
        assert_eq!(ConfidenceTier::from_confirmation_count(2), ConfidenceTier::Low);
        assert_eq!(ConfidenceTier::from_confirmation_count(3), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_confirmation_count(4), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_confirmation_count(5), ConfidenceTier::High);
    }

    #[test]
    fn test_serde_rejects_unknown_tier() {
        let parsed: Result<ConfidenceTier, _> = serde_json::from_str("\"Maybe\"");
        assert!(parsed.is_err());

        let json = serde_json::to_string(&ConfidenceTier::Medium).unwrap();
        assert_eq!(json, "\"Medium\"");
    }
}
