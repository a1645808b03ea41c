//! exosweep - threshold-sweep evaluation of transit light-curve classifiers.
//!
//! The pipeline turns raw or mock light curves into per-epoch,
//! per-threshold classification metrics:
//!
//! ```text
//! light curves -> fold/bin views -> classifier -> threshold sweep -> grids
//!                      |                                              |
//!                  bin cache                                    metric cache
//! ```
//!
//! - [`fold`] folds each curve onto its orbital phase and cuts the dual
//!   local/global feature views.
//! - [`classifier`] defines the opaque incremental-fit model contract and a
//!   logistic-regression baseline.
//! - [`eval`] sweeps a decision-threshold grid across training epochs and
//!   both partitions, producing dense metric and confusion grids.
//! - [`cache`] memoizes both expensive stages in a redb database so
//!   re-running an experiment skips straight to the arrays.
//! - [`sweep`] drives the vary-one hyperparameter study and writes one JSON
//!   record per (grid point, repetition).
//!
//! Undefined metric ratios are the [`types::METRIC_UNDEFINED`] sentinel,
//! never silently 0 or 1; empty fold bins are NaN, never 0.

pub mod cache;
pub mod classifier;
pub mod config;
pub mod data;
pub mod eval;
pub mod fold;
pub mod sweep;
pub mod types;

pub use cache::{ArtifactStore, BinKey, CacheStats, MetricKey};
pub use classifier::{Classifier, LinearClassifier, TrainLog};
pub use config::{DataPaths, SweepSettings, DATA_PATH_ENV};
pub use data::{generate_mock, load_folded, FoldedCurves, LightCurveSource};
pub use eval::{evaluate, pr_curve, roc_auc, threshold_grid, ConfusionGrid, MetricGrid};
pub use fold::{extract_views, fold_and_bin, BinnedViews};
pub use sweep::{sweep, SweepGrid, SweepReport, SweepVariable, TrialConfig};
pub use types::{Dataset, Matrix, MetricKind, Partition, TimeSeries, ZoomMode, METRIC_UNDEFINED};
