//! In-memory alias registry
//!
//! Loaded from the store once per run and read-only afterwards. Every
//! partition argument passes through the [`PartitionNormalizer`], so stored
//! spellings like 四川省 and 四川 share one alias set.

use crate::db::MatchStore;
use crate::models::AliasRecord;
use crate::utils::PartitionNormalizer;
use alias_common::Result;
use std::collections::{BTreeMap, BTreeSet};

/// Minimum normalized similarity for a "closest alias" hint
const CLOSEST_ALIAS_MIN_SIMILARITY: f64 = 0.5;

/// Partition-keyed set of verified aliases
#[derive(Debug, Clone)]
pub struct Registry {
    normalizer: PartitionNormalizer,
    /// canonical partition → alias_text → record
    partitions: BTreeMap<String, BTreeMap<String, AliasRecord>>,
}

impl Registry {
    /// Build from records; duplicates after normalization keep the first row
    pub fn from_records(
        records: impl IntoIterator<Item = AliasRecord>,
        normalizer: PartitionNormalizer,
    ) -> Self {
        let mut partitions: BTreeMap<String, BTreeMap<String, AliasRecord>> = BTreeMap::new();

        for record in records {
            let alias = record.alias_text.trim().to_string();
            if alias.is_empty() {
                tracing::warn!(partition = %record.partition, "Skipping registry row with empty alias");
                continue;
            }
            let partition = normalizer.normalize(&record.partition);
            partitions
                .entry(partition)
                .or_default()
                .entry(alias)
                .or_insert(record);
        }

        Self {
            normalizer,
            partitions,
        }
    }

    /// Load every registry row from the store
    pub async fn load(store: &dyn MatchStore, normalizer: PartitionNormalizer) -> Result<Self> {
        let records = store.read_all_registry().await?;
        let registry = Self::from_records(records, normalizer);

        tracing::info!(
            partitions = registry.partitions.len(),
            aliases = registry.alias_count(),
            "Registry loaded"
        );

        Ok(registry)
    }

    pub fn normalizer(&self) -> &PartitionNormalizer {
        &self.normalizer
    }

    /// Canonical form of a partition name
    pub fn normalize(&self, partition: &str) -> String {
        self.normalizer.normalize(partition)
    }

    /// Alias set of a partition; empty for an unknown partition
    pub fn lookup(&self, partition: &str) -> BTreeSet<String> {
        self.partitions
            .get(&self.normalize(partition))
            .map(|aliases| aliases.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, partition: &str, alias_text: &str) -> bool {
        self.partitions
            .get(&self.normalize(partition))
            .is_some_and(|aliases| aliases.contains_key(alias_text.trim()))
    }

    /// Partitions (canonical) whose registry holds `alias_text`
    pub fn find_alias_in_other_partitions(&self, alias_text: &str) -> BTreeSet<String> {
        let alias = alias_text.trim();
        self.partitions
            .iter()
            .filter(|(_, aliases)| aliases.contains_key(alias))
            .map(|(partition, _)| partition.clone())
            .collect()
    }

    /// Full record for an alias in a partition
    pub fn record(&self, partition: &str, alias_text: &str) -> Option<&AliasRecord> {
        self.partitions
            .get(&self.normalize(partition))
            .and_then(|aliases| aliases.get(alias_text.trim()))
    }

    /// Most similar alias in the partition, for rejection diagnostics only
    pub fn closest_alias(&self, partition: &str, text: &str) -> Option<(String, f64)> {
        let aliases = self.partitions.get(&self.normalize(partition))?;
        aliases
            .keys()
            .map(|alias| (alias, strsim::normalized_levenshtein(alias, text.trim())))
            .filter(|(_, score)| *score >= CLOSEST_ALIAS_MIN_SIMILARITY)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(alias, score)| (alias.clone(), score))
    }

    /// Canonical partitions with at least one alias
    pub fn partitions(&self) -> impl Iterator<Item = &str> {
        self.partitions.keys().map(String::as_str)
    }

    pub fn alias_count(&self) -> usize {
        self.partitions.values().map(BTreeMap::len).sum()
    }
}
