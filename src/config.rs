//! Storage-path and sweep-settings configuration.
//!
//! The base storage path comes from the `EXOSWEEP_DATA_PATH` environment
//! variable (the only piece of ambient configuration the core contract
//! reads). Sweep defaults can be overridden from an `exosweep.toml` next to
//! the working directory:
//!
//! ```toml
//! [sweep]
//! fractest = 0.3
//! epochs = 10
//! threshold-points = 100
//! threshold-lo = 0.2
//! threshold-hi = 0.9
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Environment variable naming the base storage directory.
pub const DATA_PATH_ENV: &str = "EXOSWEEP_DATA_PATH";

/// Resolved storage layout under the base data path.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub root: PathBuf,
}

impl DataPaths {
    /// Read the base path from the process environment.
    pub fn from_env() -> Result<Self> {
        let root = std::env::var(DATA_PATH_ENV)
            .with_context(|| format!("{} is not set", DATA_PATH_ENV))?;
        Ok(Self { root: PathBuf::from(root) })
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache database directory (bin and metric artifacts).
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Per-run JSON record directory.
    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    /// Classifier weight checkpoints.
    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    /// Create the full directory layout.
    pub fn ensure(&self) -> Result<()> {
        for dir in [self.cache_dir(), self.runs_dir(), self.models_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Evaluation-shape defaults shared by every trial of a sweep.
#[derive(Debug, Clone)]
pub struct SweepSettings {
    /// Fraction of rows (by position, from the front) held out for test.
    pub fractest: f64,
    /// Incremental training epochs per evaluation.
    pub epochs: usize,
    /// Number of points in the decision-threshold grid.
    pub threshold_points: usize,
    /// Threshold grid bounds.
    pub threshold_lo: f64,
    pub threshold_hi: f64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            fractest: 0.3,
            epochs: 10,
            threshold_points: 100,
            threshold_lo: 0.2,
            threshold_hi: 0.9,
        }
    }
}

/// Raw settings as deserialized from TOML.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct RawSettings {
    fractest: Option<f64>,
    epochs: Option<usize>,
    threshold_points: Option<usize>,
    threshold_lo: Option<f64>,
    threshold_hi: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawFile {
    sweep: Option<RawSettings>,
}

impl SweepSettings {
    /// Load settings from `exosweep.toml` in the given directory, falling
    /// back to defaults for any missing field or a missing file.
    pub fn load(directory: &Path) -> Self {
        let path = directory.join("exosweep.toml");
        let Some(content) = std::fs::read_to_string(&path).ok() else {
            return Self::default();
        };
        let raw: RawFile = toml::from_str(&content).unwrap_or_default();
        Self::from_raw(raw.sweep.unwrap_or_default())
    }

    fn from_raw(raw: RawSettings) -> Self {
        let d = Self::default();
        Self {
            fractest: raw.fractest.unwrap_or(d.fractest),
            epochs: raw.epochs.unwrap_or(d.epochs),
            threshold_points: raw.threshold_points.unwrap_or(d.threshold_points),
            threshold_lo: raw.threshold_lo.unwrap_or(d.threshold_lo),
            threshold_hi: raw.threshold_hi.unwrap_or(d.threshold_hi),
        }
    }
}
