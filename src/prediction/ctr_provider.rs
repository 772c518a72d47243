//! Counter tables behind CTR splits.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::model::ctr::{ModelCtr, ModelCtrBase};

/// Counters accumulated for one projection value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CtrStats {
    pub good_count: f32,
    pub total_count: f32,
}

impl CtrStats {
    pub fn new(good_count: f32, total_count: f32) -> Self {
        CtrStats {
            good_count,
            total_count,
        }
    }
}

/// Source of the counters CTR splits are evaluated with.
pub trait CtrProvider: Send + Sync + fmt::Debug {
    /// Whether counters for this statistic are available at all.
    fn has_ctr_table(&self, base: &ModelCtrBase) -> bool;

    /// Counters for one projection hash. Unseen hashes yield zero counters.
    fn ctr_stats(&self, ctr: &ModelCtr, projection_hash: u64) -> CtrStats;

    /// Value of a CTR for one projection hash.
    fn calc_ctr(&self, ctr: &ModelCtr, projection_hash: u64) -> f32 {
        let stats = self.ctr_stats(ctr, projection_hash);
        ctr.calc(stats.good_count, stats.total_count)
    }
}

/// Counters of one statistic, keyed by projection hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CtrTable {
    pub base: ModelCtrBase,
    pub counts: HashMap<u64, CtrStats>,
}

/// In-memory counter tables sorted by statistic identity.
///
/// Deserialized tables are re-sorted and tables of the same statistic merged,
/// so hand-written files may list them in any order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredCtrTables")]
pub struct StaticCtrProvider {
    tables: Vec<CtrTable>,
}

#[derive(Deserialize)]
struct StoredCtrTables {
    tables: Vec<CtrTable>,
}

impl From<StoredCtrTables> for StaticCtrProvider {
    fn from(stored: StoredCtrTables) -> Self {
        let mut provider = StaticCtrProvider::new();
        for table in stored.tables {
            provider.add_table(table.base).extend(table.counts);
        }
        provider
    }
}

impl StaticCtrProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, base: &ModelCtrBase) -> Option<&CtrTable> {
        self.tables
            .binary_search_by(|table| table.base.cmp(base))
            .ok()
            .map(|idx| &self.tables[idx])
    }

    /// Table of a statistic, added empty when missing.
    pub fn add_table(&mut self, base: ModelCtrBase) -> &mut HashMap<u64, CtrStats> {
        let idx = match self.tables.binary_search_by(|table| table.base.cmp(&base)) {
            Ok(idx) => idx,
            Err(idx) => {
                self.tables.insert(
                    idx,
                    CtrTable {
                        base,
                        counts: HashMap::new(),
                    },
                );
                idx
            }
        };
        &mut self.tables[idx].counts
    }

    /// Set counters of one projection value.
    pub fn insert(&mut self, base: ModelCtrBase, projection_hash: u64, stats: CtrStats) {
        self.add_table(base).insert(projection_hash, stats);
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

impl CtrProvider for StaticCtrProvider {
    fn has_ctr_table(&self, base: &ModelCtrBase) -> bool {
        self.table(base).is_some()
    }

    fn ctr_stats(&self, ctr: &ModelCtr, projection_hash: u64) -> CtrStats {
        self.table(&ctr.base)
            .and_then(|table| table.counts.get(&projection_hash))
            .copied()
            .unwrap_or_default()
    }
}
