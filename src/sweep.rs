//! Vary-one-variable hyperparameter sweep driver.
//!
//! A sweep walks the value list of a single variable while pinning every
//! other variable at the midpoint of its own list, builds a fresh mock
//! dataset and classifier per grid point, and evaluates the full threshold
//! sweep through the artifact cache. Each (grid point, repetition) pair
//! yields one JSON run record under the runs directory.
//!
//! Trial configurations are immutable snapshots: a [`TrialConfig`] is built
//! once per grid point and never mutated afterwards, so a record always
//! describes exactly the configuration it was produced under.

use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::cache::{ArtifactStore, BinKey, MetricKey};
use crate::classifier::{Classifier, LinearClassifier};
use crate::config::{DataPaths, SweepSettings};
use crate::data::generate_mock;
use crate::eval::{evaluate, pr_curve, roc_auc, threshold_grid};
use crate::fold::extract_views;
use crate::types::{Dataset, Partition, Views};

/// Ratio of global-view bins to local-view bins, and of raw samples to
/// global bins. Matches the reference 200-local / 2000-global shape.
const GLOBAL_LOCAL_RATIO: usize = 10;
const SAMPLES_PER_GLOBAL_BIN: usize = 2;

/// The variable a sweep varies; every other one sits at its grid midpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SweepVariable {
    NumBins,
    Depth,
    Noise,
    NumSeries,
    PositiveFraction,
    BatchSize,
    LayerCount,
    LayerWidth,
    Dropout,
}

impl SweepVariable {
    pub const ALL: [SweepVariable; 9] = [
        SweepVariable::NumBins,
        SweepVariable::Depth,
        SweepVariable::Noise,
        SweepVariable::NumSeries,
        SweepVariable::PositiveFraction,
        SweepVariable::BatchSize,
        SweepVariable::LayerCount,
        SweepVariable::LayerWidth,
        SweepVariable::Dropout,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SweepVariable::NumBins => "num-bins",
            SweepVariable::Depth => "depth",
            SweepVariable::Noise => "noise",
            SweepVariable::NumSeries => "num-series",
            SweepVariable::PositiveFraction => "positive-fraction",
            SweepVariable::BatchSize => "batch-size",
            SweepVariable::LayerCount => "layer-count",
            SweepVariable::LayerWidth => "layer-width",
            SweepVariable::Dropout => "dropout",
        }
    }
}

impl fmt::Display for SweepVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SweepVariable {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        SweepVariable::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .with_context(|| {
                let known: Vec<&str> = SweepVariable::ALL.iter().map(|v| v.as_str()).collect();
                format!("unknown sweep variable '{}', expected one of {}", s, known.join(", "))
            })
    }
}

/// Per-variable value lists. Values are stored as f64 even for integer
/// variables; [`TrialConfig`] rounds where a count is needed.
#[derive(Debug, Clone)]
pub struct SweepGrid {
    pub num_bins: Vec<f64>,
    pub depth: Vec<f64>,
    pub noise: Vec<f64>,
    pub num_series: Vec<f64>,
    pub positive_fraction: Vec<f64>,
    pub batch_size: Vec<f64>,
    pub layer_count: Vec<f64>,
    pub layer_width: Vec<f64>,
    pub dropout: Vec<f64>,
}

impl Default for SweepGrid {
    /// The reference study's value lists.
    fn default() -> Self {
        Self {
            num_bins: vec![10.0, 30.0, 100.0, 300.0, 1000.0],
            depth: vec![0.8, 0.7, 0.6, 0.5, 0.4],
            noise: vec![0.03, 0.06, 0.09, 0.12, 0.15],
            num_series: vec![3e3, 1e4, 3e4, 1e5, 3e5],
            positive_fraction: vec![0.1, 0.3, 0.5, 0.7, 0.9],
            batch_size: vec![5.0, 10.0, 16.0, 20.0, 25.0],
            layer_count: vec![1.0, 2.0, 3.0, 4.0, 5.0],
            layer_width: vec![240.0, 250.0, 260.0, 270.0, 280.0],
            dropout: vec![0.38, 0.39, 0.40, 0.41, 0.42],
        }
    }
}

impl SweepGrid {
    pub fn values(&self, variable: SweepVariable) -> &[f64] {
        match variable {
            SweepVariable::NumBins => &self.num_bins,
            SweepVariable::Depth => &self.depth,
            SweepVariable::Noise => &self.noise,
            SweepVariable::NumSeries => &self.num_series,
            SweepVariable::PositiveFraction => &self.positive_fraction,
            SweepVariable::BatchSize => &self.batch_size,
            SweepVariable::LayerCount => &self.layer_count,
            SweepVariable::LayerWidth => &self.layer_width,
            SweepVariable::Dropout => &self.dropout,
        }
    }

    /// Pinned value for a non-swept variable: the middle of its list
    /// (index len/2).
    fn midpoint(&self, variable: SweepVariable) -> f64 {
        let values = self.values(variable);
        values[values.len() / 2]
    }
}

/// Immutable configuration of one grid point: the swept variable at one of
/// its values, everything else pinned at midpoint, plus the evaluation
/// shape from [`SweepSettings`].
#[derive(Debug, Clone, Serialize)]
pub struct TrialConfig {
    pub variable: SweepVariable,
    pub value_index: usize,
    pub num_bins: usize,
    pub depth: f64,
    pub noise: f64,
    pub num_series: usize,
    pub positive_fraction: f64,
    pub batch_size: usize,
    pub layer_count: usize,
    pub layer_width: usize,
    pub dropout: f64,
    pub fractest: f64,
    pub epochs: usize,
}

impl TrialConfig {
    /// Build the configuration for one grid point.
    pub fn at(
        grid: &SweepGrid,
        variable: SweepVariable,
        value_index: usize,
        settings: &SweepSettings,
    ) -> Result<Self> {
        let values = grid.values(variable);
        if values.is_empty() {
            bail!("sweep grid for {} is empty", variable);
        }
        if value_index >= values.len() {
            bail!(
                "value index {} out of range for {} ({} values)",
                value_index,
                variable,
                values.len()
            );
        }

        let pick = |v: SweepVariable| {
            if v == variable {
                values[value_index]
            } else {
                grid.midpoint(v)
            }
        };

        Ok(Self {
            variable,
            value_index,
            num_bins: pick(SweepVariable::NumBins).round() as usize,
            depth: pick(SweepVariable::Depth),
            noise: pick(SweepVariable::Noise),
            num_series: pick(SweepVariable::NumSeries).round() as usize,
            positive_fraction: pick(SweepVariable::PositiveFraction),
            batch_size: pick(SweepVariable::BatchSize).round() as usize,
            layer_count: pick(SweepVariable::LayerCount).round() as usize,
            layer_width: pick(SweepVariable::LayerWidth).round() as usize,
            dropout: pick(SweepVariable::Dropout),
            fractest: settings.fractest,
            epochs: settings.epochs,
        })
    }

    /// The swept variable's value at this grid point.
    pub fn value(&self, grid: &SweepGrid) -> f64 {
        grid.values(self.variable)[self.value_index]
    }

    pub fn local_bins(&self) -> usize {
        self.num_bins
    }

    pub fn global_bins(&self) -> usize {
        self.num_bins * GLOBAL_LOCAL_RATIO
    }

    /// Raw samples per mock series, sized so both views fit.
    pub fn raw_samples(&self) -> usize {
        self.global_bins() * SAMPLES_PER_GLOBAL_BIN
    }

    pub fn num_positive(&self) -> usize {
        (self.num_series as f64 * self.positive_fraction) as usize
    }

    pub fn num_negative(&self) -> usize {
        self.num_series - self.num_positive()
    }

    /// Identity of the generated dataset: every generative parameter.
    pub fn dataset_id(&self) -> String {
        format!(
            "mock-n{}-p{:.3}-t{}-d{:.3}-z{:.4}",
            self.num_series,
            self.positive_fraction,
            self.raw_samples(),
            self.depth,
            self.noise
        )
    }

    /// Deterministic generator seed derived from the dataset identity, so
    /// identical configurations regenerate identical curves.
    pub fn dataset_seed(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.dataset_id().hash(&mut hasher);
        hasher.finish()
    }

    /// Model identity for metric cache keys: the classifier's own id plus
    /// the architecture hyperparameters the baseline model does not embed.
    pub fn qualified_model_id(&self, base: &str) -> String {
        format!(
            "{}+arch-ly{}w{}d{:.3}",
            base, self.layer_count, self.layer_width, self.dropout
        )
    }
}

/// Builds a fresh classifier for one (grid point, repetition) pair.
pub type ModelFactory<'a> = dyn Fn(&TrialConfig, u32) -> Box<dyn Classifier> + 'a;

/// Default factory: the logistic-regression baseline, seeded per repetition.
pub fn default_factory() -> Box<ModelFactory<'static>> {
    Box::new(|config: &TrialConfig, repetition: u32| -> Box<dyn Classifier> {
        Box::new(LinearClassifier::new(
            config.local_bins(),
            config.global_bins(),
            config.batch_size,
            0.1,
            u64::from(repetition),
        ))
    })
}

/// One JSON record per (grid point, repetition).
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub variable: SweepVariable,
    pub value: f64,
    pub repetition: u32,
    pub config: TrialConfig,
    pub model_id: String,
    /// Test-partition ROC AUC after the final epoch. None when the metric
    /// grids were served from cache and no freshly trained model existed to
    /// score with.
    pub auc: Option<f64>,
    /// Final-epoch test precision/recall curve as (recall, precision).
    pub pr_test: Vec<(f64, f64)>,
    pub num_train: usize,
    pub num_test: usize,
    pub served_from_cache: bool,
}

/// Outcome of one sweep invocation.
#[derive(Debug)]
pub struct SweepReport {
    pub run_id: String,
    pub records: Vec<RunRecord>,
}

/// Run a vary-one sweep over `variable` with `repetitions` repeats per grid
/// point, writing one JSON record per repeat under the runs directory.
pub fn sweep(
    grid: &SweepGrid,
    variable: SweepVariable,
    factory: &ModelFactory<'_>,
    repetitions: u32,
    settings: &SweepSettings,
    paths: &DataPaths,
    store: &ArtifactStore,
    overwrite: bool,
) -> Result<SweepReport> {
    if repetitions == 0 {
        bail!("sweep needs at least one repetition");
    }
    paths.ensure()?;

    // Millisecond stamp plus a process-wide sequence number, so back-to-back
    // sweeps never share a run directory.
    static RUN_SEQ: AtomicU64 = AtomicU64::new(0);
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the unix epoch")?
        .as_millis();
    let run_id = format!(
        "{}-{}-{}",
        variable,
        stamp,
        RUN_SEQ.fetch_add(1, Ordering::Relaxed)
    );
    let run_dir = paths.runs_dir().join(&run_id);
    fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create run directory {}", run_dir.display()))?;

    let thresholds = threshold_grid(
        settings.threshold_points,
        settings.threshold_lo,
        settings.threshold_hi,
    )?;

    let mut records = Vec::new();
    for value_index in 0..grid.values(variable).len() {
        let config = TrialConfig::at(grid, variable, value_index, settings)?;
        println!(
            "[{}] point {}/{}: {} = {}",
            run_id,
            value_index + 1,
            grid.values(variable).len(),
            variable,
            config.value(grid)
        );

        let curves = generate_mock(
            config.num_positive(),
            config.num_negative(),
            config.raw_samples(),
            config.depth,
            config.noise,
            config.dataset_seed(),
        )?;

        let bin_key = BinKey {
            dataset_id: config.dataset_id(),
            local_bins: config.local_bins(),
            global_bins: config.global_bins(),
        };
        let views = store.get_or_compute_bins(&bin_key, overwrite, || {
            extract_views(
                &curves.phases,
                &curves.fluxes,
                config.local_bins(),
                config.global_bins(),
            )
        })?;

        let dataset = Dataset {
            local: views.local_flux,
            global: views.global_flux,
            labels: curves.labels.clone(),
            ids: curves.ids.clone(),
        };
        let (test, train) = dataset.split(config.fractest)?;

        for repetition in 0..repetitions {
            let mut classifier = factory(&config, repetition);
            let model_id = config.qualified_model_id(&classifier.model_id());
            let metric_key = MetricKey {
                model_id: model_id.clone(),
                dataset_id: config.dataset_id(),
                epochs: config.epochs,
                threshold_points: settings.threshold_points,
                threshold_lo: settings.threshold_lo,
                threshold_hi: settings.threshold_hi,
                fractest: config.fractest,
                repetition,
            };

            // The AUC needs the freshly trained model's scores, so it is
            // computed inside the cache closure; on a hit the cell stays
            // empty and the record says so.
            let auc_cell: Cell<Option<f64>> = Cell::new(None);
            let ckpt = paths
                .models_dir()
                .join(&run_id)
                .join(format!("{}-{:02}-rep{}.ckpt", variable, value_index, repetition));

            let (metrics, _confusion) = store.get_or_evaluate(&metric_key, overwrite, || {
                let grids = evaluate(
                    classifier.as_mut(),
                    &dataset,
                    config.fractest,
                    config.epochs,
                    &thresholds,
                )?;
                classifier.save(&ckpt)?;

                let scores = classifier.predict(Views::of(&test))?;
                match roc_auc(&test.labels, &scores) {
                    Ok(auc) => auc_cell.set(Some(auc)),
                    Err(err) => {
                        // A degenerate score vector must not abort the
                        // sweep; report 0 and move on.
                        eprintln!("[{}] AUC degenerate for {}: {}", run_id, model_id, err);
                        auc_cell.set(Some(0.0));
                    }
                }
                Ok(grids)
            })?;

            let auc = auc_cell.take();
            let record = RunRecord {
                run_id: run_id.clone(),
                variable,
                value: config.value(grid),
                repetition,
                config: config.clone(),
                model_id,
                auc,
                pr_test: pr_curve(&metrics, config.epochs - 1, Partition::Test),
                num_train: train.len(),
                num_test: test.len(),
                served_from_cache: auc.is_none(),
            };

            let record_path = run_dir.join(format!(
                "{}-{:02}-rep{}.json",
                variable, value_index, repetition
            ));
            let json = serde_json::to_string_pretty(&record)
                .context("failed to serialize run record")?;
            fs::write(&record_path, json)
                .with_context(|| format!("failed to write {}", record_path.display()))?;
            records.push(record);
        }
    }

    Ok(SweepReport { run_id, records })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_grid() -> SweepGrid {
        SweepGrid {
            num_bins: vec![8.0],
            depth: vec![0.5],
            noise: vec![0.01, 0.02],
            num_series: vec![24.0],
            positive_fraction: vec![0.5],
            batch_size: vec![4.0],
            layer_count: vec![1.0],
            layer_width: vec![8.0],
            dropout: vec![0.0],
        }
    }

    fn tiny_settings() -> SweepSettings {
        SweepSettings {
            fractest: 0.3,
            epochs: 2,
            threshold_points: 5,
            threshold_lo: 0.2,
            threshold_hi: 0.9,
        }
    }

    #[test]
    fn test_variable_round_trips_through_str() {
        for variable in SweepVariable::ALL {
            assert_eq!(variable.as_str().parse::<SweepVariable>().unwrap(), variable);
        }
        assert!("warp-drive".parse::<SweepVariable>().is_err());
    }

    #[test]
    fn test_trial_config_pins_others_at_midpoint() {
        let grid = SweepGrid::default();
        let settings = SweepSettings::default();
        let config = TrialConfig::at(&grid, SweepVariable::Depth, 0, &settings).unwrap();

        assert!((config.depth - 0.8).abs() < 1e-12);
        // Every other variable sits at index len/2 of its own list.
        assert_eq!(config.num_bins, 100);
        assert_eq!(config.num_series, 30_000);
        assert_eq!(config.batch_size, 16);
        assert!((config.noise - 0.09).abs() < 1e-12);
        assert!((config.positive_fraction - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_trial_config_derived_shapes() {
        let grid = SweepGrid::default();
        let settings = SweepSettings::default();
        let config = TrialConfig::at(&grid, SweepVariable::NumBins, 1, &settings).unwrap();

        assert_eq!(config.num_bins, 30);
        assert_eq!(config.local_bins(), 30);
        assert_eq!(config.global_bins(), 300);
        assert_eq!(config.raw_samples(), 600);
        assert_eq!(config.num_positive() + config.num_negative(), config.num_series);
    }

    #[test]
    fn test_trial_config_bounds_checked() {
        let grid = SweepGrid::default();
        let settings = SweepSettings::default();
        assert!(TrialConfig::at(&grid, SweepVariable::Depth, 5, &settings).is_err());
    }

    #[test]
    fn test_dataset_identity_tracks_generative_params_only() {
        let grid = SweepGrid::default();
        let settings = SweepSettings::default();
        // Batch size is a training parameter; changing it must not change
        // the dataset identity, while noise must.
        let a = TrialConfig::at(&grid, SweepVariable::BatchSize, 0, &settings).unwrap();
        let b = TrialConfig::at(&grid, SweepVariable::BatchSize, 4, &settings).unwrap();
        assert_eq!(a.dataset_id(), b.dataset_id());
        assert_eq!(a.dataset_seed(), b.dataset_seed());

        let c = TrialConfig::at(&grid, SweepVariable::Noise, 0, &settings).unwrap();
        let d = TrialConfig::at(&grid, SweepVariable::Noise, 1, &settings).unwrap();
        assert_ne!(c.dataset_id(), d.dataset_id());
    }

    #[test]
    fn test_sweep_writes_one_record_per_point_and_repeat() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::at(dir.path());
        let store = ArtifactStore::open(&paths.cache_dir()).unwrap();
        let factory = default_factory();

        let report = sweep(
            &tiny_grid(),
            SweepVariable::Noise,
            factory.as_ref(),
            2,
            &tiny_settings(),
            &paths,
            &store,
            false,
        )
        .unwrap();

        // 2 grid points x 2 repetitions.
        assert_eq!(report.records.len(), 4);
        let run_dir = paths.runs_dir().join(&report.run_id);
        assert_eq!(fs::read_dir(&run_dir).unwrap().count(), 4);

        for record in &report.records {
            assert!(!record.served_from_cache);
            let auc = record.auc.unwrap();
            assert!((0.0..=1.0).contains(&auc));
            assert_eq!(record.num_train + record.num_test, 24);
        }
        assert!(store.stats().bin_entries >= 1);
        assert_eq!(store.stats().metric_entries, 4);
    }

    #[test]
    fn test_sweep_second_run_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::at(dir.path());
        let store = ArtifactStore::open(&paths.cache_dir()).unwrap();
        let factory = default_factory();

        let grid = tiny_grid();
        let settings = tiny_settings();
        let first = sweep(
            &grid,
            SweepVariable::Noise,
            factory.as_ref(),
            1,
            &settings,
            &paths,
            &store,
            false,
        )
        .unwrap();
        let second = sweep(
            &grid,
            SweepVariable::Noise,
            factory.as_ref(),
            1,
            &settings,
            &paths,
            &store,
            false,
        )
        .unwrap();

        assert!(first.records.iter().all(|r| !r.served_from_cache));
        assert!(second.records.iter().all(|r| r.served_from_cache));
        // Back-to-back sweeps (typically within the same second) must not
        // share a run directory, so neither overwrites the other's records.
        assert_ne!(first.run_id, second.run_id);
        assert!(paths.runs_dir().join(&first.run_id).is_dir());
        assert!(paths.runs_dir().join(&second.run_id).is_dir());
        // Cached grids are identical, so the PR curves match bit for bit.
        for (a, b) in first.records.iter().zip(second.records.iter()) {
            assert_eq!(a.pr_test, b.pr_test);
        }
        // No new metric entries were created by the cached pass.
        assert_eq!(store.stats().metric_entries, 2);
    }

    #[test]
    fn test_sweep_overwrite_recomputes() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::at(dir.path());
        let store = ArtifactStore::open(&paths.cache_dir()).unwrap();
        let factory = default_factory();

        let grid = tiny_grid();
        let settings = tiny_settings();
        sweep(
            &grid,
            SweepVariable::Noise,
            factory.as_ref(),
            1,
            &settings,
            &paths,
            &store,
            false,
        )
        .unwrap();
        let again = sweep(
            &grid,
            SweepVariable::Noise,
            factory.as_ref(),
            1,
            &settings,
            &paths,
            &store,
            true,
        )
        .unwrap();
        assert!(again.records.iter().all(|r| !r.served_from_cache));
    }

    #[test]
    fn test_sweep_rejects_zero_repetitions() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::at(dir.path());
        let store = ArtifactStore::open(&paths.cache_dir()).unwrap();
        let factory = default_factory();
        assert!(sweep(
            &tiny_grid(),
            SweepVariable::Noise,
            factory.as_ref(),
            0,
            &tiny_settings(),
            &paths,
            &store,
            false,
        )
        .is_err());
    }
}
