//! Partition name normalization
//!
//! Input rows, registry rows and feedback rows spell the same region in
//! different ways (四川, 四川省, " 四川 "). Every partition argument is reduced
//! to its short canonical form before any lookup.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Canonical short names of the provincial-level regions
pub const PROVINCES: &[&str] = &[
    "北京", "天津", "上海", "重庆", "河北", "山西", "辽宁", "吉林", "黑龙江", "江苏", "浙江",
    "安徽", "福建", "江西", "山东", "河南", "湖北", "湖南", "广东", "海南", "四川", "贵州",
    "云南", "陕西", "甘肃", "青海", "台湾", "内蒙古", "广西", "西藏", "宁夏", "新疆", "香港",
    "澳门",
];

/// Full names whose short form is not a plain suffix strip
const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("内蒙古自治区", "内蒙古"),
    ("广西壮族自治区", "广西"),
    ("西藏自治区", "西藏"),
    ("宁夏回族自治区", "宁夏"),
    ("新疆维吾尔自治区", "新疆"),
    ("香港特别行政区", "香港"),
    ("澳门特别行政区", "澳门"),
];

fn default_strip_suffixes() -> Vec<String> {
    ["特别行政区", "自治区", "省", "市"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_use_builtin() -> bool {
    true
}

/// `[partition]` section of the TOML config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionRules {
    /// Extra spelling → canonical mappings, applied before suffix stripping
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,

    /// Suffixes removed from the end of a partition name (first match wins)
    #[serde(default = "default_strip_suffixes")]
    pub strip_suffixes: Vec<String>,

    /// Include the built-in province alias table
    #[serde(default = "default_use_builtin")]
    pub use_builtin_aliases: bool,
}

impl Default for PartitionRules {
    fn default() -> Self {
        Self {
            aliases: BTreeMap::new(),
            strip_suffixes: default_strip_suffixes(),
            use_builtin_aliases: true,
        }
    }
}

/// Maps any spelling of a partition to its canonical form
#[derive(Debug, Clone)]
pub struct PartitionNormalizer {
    aliases: HashMap<String, String>,
    strip_suffixes: Vec<String>,
}

impl Default for PartitionNormalizer {
    fn default() -> Self {
        Self::new(&PartitionRules::default())
    }
}

impl PartitionNormalizer {
    pub fn new(rules: &PartitionRules) -> Self {
        let mut aliases = HashMap::new();
        if rules.use_builtin_aliases {
            for (from, to) in BUILTIN_ALIASES {
                aliases.insert(from.to_string(), to.to_string());
            }
        }
        // Configured entries override built-ins
        for (from, to) in &rules.aliases {
            aliases.insert(from.trim().to_string(), to.trim().to_string());
        }

        let mut strip_suffixes: Vec<String> = rules
            .strip_suffixes
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        // Longest first so 特别行政区 wins over 区-style short suffixes
        strip_suffixes.sort_by_key(|s| std::cmp::Reverse(s.chars().count()));

        Self {
            aliases,
            strip_suffixes,
        }
    }

    /// Canonical form of a partition name
    pub fn normalize(&self, raw: &str) -> String {
        let trimmed = raw.trim();

        if let Some(mapped) = self.aliases.get(trimmed) {
            return mapped.clone();
        }

        for suffix in &self.strip_suffixes {
            if let Some(stem) = trimmed.strip_suffix(suffix.as_str()) {
                if !stem.is_empty() {
                    return self
                        .aliases
                        .get(stem)
                        .cloned()
                        .unwrap_or_else(|| stem.to_string());
                }
            }
        }

        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_builtin_forms() {
        let n = PartitionNormalizer::default();
        assert_eq!(n.normalize("四川省"), "四川");
        assert_eq!(n.normalize(" 四川 "), "四川");
        assert_eq!(n.normalize("重庆市"), "重庆");
        assert_eq!(n.normalize("广西壮族自治区"), "广西");
        assert_eq!(n.normalize("香港特别行政区"), "香港");
        assert_eq!(n.normalize("内蒙古自治区"), "内蒙古");
    }

    #[test]
    fn test_suffix_alone_is_kept() {
        let n = PartitionNormalizer::default();
        assert_eq!(n.normalize("市"), "市");
    }

    #[test]
    fn test_configured_alias_overrides() {
        let mut rules = PartitionRules::default();
        rules.aliases.insert("川".to_string(), "四川".to_string());
        let n = PartitionNormalizer::new(&rules);
        assert_eq!(n.normalize("川"), "四川");
        assert_eq!(n.normalize("川"), n.normalize("四川省"));
    }

    #[test]
    fn test_no_suffixes_configured() {
        let rules = PartitionRules {
            aliases: BTreeMap::new(),
            strip_suffixes: Vec::new(),
            use_builtin_aliases: false,
        };
        let n = PartitionNormalizer::new(&rules);
        assert_eq!(n.normalize("四川省"), "四川省");
    }
}
