//! Persistent artifact store using redb.
//!
//! Strategy: memoize the two expensive deterministic stages - view binning
//! and threshold-sweep evaluation - so re-running an experiment skips
//! straight to the cached arrays. The caches double as coarse checkpoints
//! for interrupted sweeps.
//!
//! Cache structure:
//! - Database: `<cache_dir>/artifacts.redb` (redb provides ACID guarantees)
//! - `binned_views` table: bincode(BinKey) -> bincode(BinnedViews)
//! - `metric_grids` table: bincode(MetricKey) -> bincode((MetricGrid, ConfusionGrid))
//!
//! Design decisions:
//! - Bincode for compact binary values; f64 bit patterns (including the
//!   undefined-ratio sentinel and NaN bins) round-trip exactly
//! - Structured key types instead of stringified parameters, so every
//!   output-affecting parameter is part of the key by construction
//! - A corrupt or unreadable value is a miss, not a failure: the caller's
//!   policy is to recompute and overwrite

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::eval::{ConfusionGrid, MetricGrid};
use crate::fold::BinnedViews;

const BINS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("binned_views");
const METRICS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("metric_grids");

/// Cache key for binned views: dataset identity plus the bin-count
/// configuration that shapes the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinKey {
    /// Identity of the underlying dataset, including every generative
    /// parameter for mock data.
    pub dataset_id: String,
    pub local_bins: usize,
    pub global_bins: usize,
}

/// Cache key for metric grids: model identity plus the evaluation shape.
///
/// `model_id` embeds architecture and hyperparameters; `repetition`
/// separates independent repeats so concurrent-looking keys never collide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricKey {
    pub model_id: String,
    pub dataset_id: String,
    pub epochs: usize,
    pub threshold_points: usize,
    pub threshold_lo: f64,
    pub threshold_hi: f64,
    pub fractest: f64,
    pub repetition: u32,
}

/// redb-backed store for both artifact kinds.
pub struct ArtifactStore {
    db: Database,
    #[allow(dead_code)]
    cache_dir: PathBuf,
}

impl ArtifactStore {
    /// Open or create the artifact database under the given cache directory.
    pub fn open(cache_dir: &Path) -> Result<Self> {
        fs::create_dir_all(cache_dir)
            .with_context(|| format!("failed to create cache directory {}", cache_dir.display()))?;

        let db_path = cache_dir.join("artifacts.redb");
        let db = Database::create(&db_path)
            .with_context(|| format!("failed to open cache database {}", db_path.display()))?;

        // Opening a table inside a write transaction creates it if missing,
        // so later read transactions never fail on a fresh database.
        let txn = db.begin_write().context("failed to initialize cache tables")?;
        {
            txn.open_table(BINS_TABLE).context("failed to open binned_views table")?;
            txn.open_table(METRICS_TABLE).context("failed to open metric_grids table")?;
        }
        txn.commit().context("failed to commit table initialization")?;

        Ok(Self {
            db,
            cache_dir: cache_dir.to_path_buf(),
        })
    }

    /// Look up raw bytes; any read or decode problem is treated as a miss.
    fn get_raw(&self, table: TableDefinition<&[u8], &[u8]>, key: &[u8]) -> Option<Vec<u8>> {
        let txn = self.db.begin_read().ok()?;
        let table = txn.open_table(table).ok()?;
        let guard = table.get(key).ok()??;
        Some(guard.value().to_vec())
    }

    fn put_raw(&self, table: TableDefinition<&[u8], &[u8]>, key: &[u8], value: &[u8]) -> Result<()> {
        let txn = self.db.begin_write().context("failed to begin cache write")?;
        {
            let mut t = txn.open_table(table).context("failed to open cache table")?;
            t.insert(key, value).context("failed to insert cache entry")?;
        }
        txn.commit().context("failed to commit cache write")
    }

    /// Return the cached binned views for `key`, or run `compute`, persist
    /// its result exactly once, and return it.
    ///
    /// `overwrite` forces recomputation even on a hit. A corrupt stored
    /// artifact is recomputed and overwritten, not surfaced as an error.
    pub fn get_or_compute_bins<F>(
        &self,
        key: &BinKey,
        overwrite: bool,
        compute: F,
    ) -> Result<BinnedViews>
    where
        F: FnOnce() -> Result<BinnedViews>,
    {
        let key_bytes = bincode::serialize(key).context("failed to serialize bin cache key")?;

        if !overwrite {
            if let Some(bytes) = self.get_raw(BINS_TABLE, &key_bytes) {
                if let Ok(views) = bincode::deserialize::<BinnedViews>(&bytes) {
                    return Ok(views);
                }
                // Fall through: corrupt artifact, recompute below.
            }
        }

        let views = compute()?;
        let value = bincode::serialize(&views).context("failed to serialize binned views")?;
        self.put_raw(BINS_TABLE, &key_bytes, &value)?;
        Ok(views)
    }

    /// Cache-or-compute for metric grids, same contract as
    /// [`get_or_compute_bins`](Self::get_or_compute_bins).
    ///
    /// An all-sentinel grid (skewed labels that never populate some cells)
    /// stores and reloads like any other.
    pub fn get_or_evaluate<F>(
        &self,
        key: &MetricKey,
        overwrite: bool,
        compute: F,
    ) -> Result<(MetricGrid, ConfusionGrid)>
    where
        F: FnOnce() -> Result<(MetricGrid, ConfusionGrid)>,
    {
        let key_bytes = bincode::serialize(key).context("failed to serialize metric cache key")?;

        if !overwrite {
            if let Some(bytes) = self.get_raw(METRICS_TABLE, &key_bytes) {
                if let Ok(grids) = bincode::deserialize::<(MetricGrid, ConfusionGrid)>(&bytes) {
                    return Ok(grids);
                }
            }
        }

        let grids = compute()?;
        let value = bincode::serialize(&grids).context("failed to serialize metric grids")?;
        self.put_raw(METRICS_TABLE, &key_bytes, &value)?;
        Ok(grids)
    }

    /// Entry counts and approximate size, for monitoring.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        let Ok(txn) = self.db.begin_read() else {
            return stats;
        };

        if let Ok(table) = txn.open_table(BINS_TABLE) {
            stats.bin_entries = table.len().unwrap_or(0) as usize;
            stats.size_bytes += table_bytes(&table);
        }
        if let Ok(table) = txn.open_table(METRICS_TABLE) {
            stats.metric_entries = table.len().unwrap_or(0) as usize;
            stats.size_bytes += table_bytes(&table);
        }
        stats
    }
}

fn table_bytes(table: &redb::ReadOnlyTable<&'static [u8], &'static [u8]>) -> u64 {
    table
        .iter()
        .ok()
        .into_iter()
        .flatten()
        .filter_map(|r| r.ok())
        .map(|(k, v)| (k.value().len() + v.value().len()) as u64)
        .sum()
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub bin_entries: usize,
    pub metric_entries: usize,
    pub size_bytes: u64,
}

impl CacheStats {
    /// Format size in human-readable form (KB, MB, GB).
    pub fn size_human(&self) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if self.size_bytes >= GB {
            format!("{:.2} GB", self.size_bytes as f64 / GB as f64)
        } else if self.size_bytes >= MB {
            format!("{:.2} MB", self.size_bytes as f64 / MB as f64)
        } else if self.size_bytes >= KB {
            format!("{:.2} KB", self.size_bytes as f64 / KB as f64)
        } else {
            format!("{} B", self.size_bytes)
        }
    }
}
