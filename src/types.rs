//! Core types for exosweep - the threshold-sweep evaluation engine.
//!
//! This module defines the data model shared by every stage of the pipeline:
//! raw light curves, the dense matrices that hold folded/binned views, the
//! train/test partitioning rule, and the sentinel used for undefined metric
//! ratios. Key design decisions:
//! - Matrices are flat row-major `Vec<f64>` (no external array crate needed
//!   for 2-D means and slicing)
//! - Datasets split by position, never by shuffle, so a split is reproducible
//!   from dataset order alone
//! - Undefined ratios are a distinguished sentinel value, not 0.0 or NaN,
//!   so they survive binary round-trips exactly and can be filtered downstream

use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Sentinel recorded in a metric grid cell whose defining ratio has a zero
/// denominator (e.g. precision with no predicted positives).
///
/// Valid metric values live in [0, 1], so -1.0 is unambiguous. Consumers must
/// filter or special-case it; it is never coerced to 0 or 1.
pub const METRIC_UNDEFINED: f64 = -1.0;

/// Which phase window a binning pass covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoomMode {
    /// Narrow window centered on the expected transit event.
    Local,
    /// The full folded cycle.
    Global,
}

impl ZoomMode {
    /// Phase range covered by this zoom, as [min, max).
    ///
    /// The +0.25 fold offset places the transit at phase 0.25, so the local
    /// window [0.15, 0.35) brackets it symmetrically.
    pub fn phase_range(self) -> (f64, f64) {
        match self {
            ZoomMode::Global => (0.0, 1.0),
            ZoomMode::Local => (0.15, 0.35),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ZoomMode::Local => "locl",
            ZoomMode::Global => "glob",
        }
    }
}

impl fmt::Display for ZoomMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Train/test partition selector. The numeric value is the partition axis
/// index in the metric grid and matches the original ordering:
/// train = 0, test = 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(usize)]
pub enum Partition {
    Train = 0,
    Test = 1,
}

impl Partition {
    pub const ALL: [Partition; 2] = [Partition::Train, Partition::Test];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Partition::Train => "train",
            Partition::Test => "test",
        }
    }
}

/// Metric axis of the metric grid, in storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(usize)]
pub enum MetricKind {
    Precision = 0,
    Accuracy = 1,
    Recall = 2,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [
        MetricKind::Precision,
        MetricKind::Accuracy,
        MetricKind::Recall,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Dense row-major matrix of f64. One row per series, one column per bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Create a matrix filled with the given value.
    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// Create a matrix from row vectors. All rows must have equal length.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                bail!(
                    "ragged matrix: row 0 has {} columns, row {} has {}",
                    cols,
                    i,
                    row.len()
                );
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Borrow row `r` as a slice.
    pub fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    pub fn set_row(&mut self, r: usize, values: &[f64]) {
        self.data[r * self.cols..(r + 1) * self.cols].copy_from_slice(values);
    }

    pub fn get(&self, r: usize, c: usize) -> f64 {
        self.data[r * self.cols + c]
    }

    /// Copy of the row range `[start, end)` as a new matrix.
    pub fn slice_rows(&self, start: usize, end: usize) -> Matrix {
        Matrix {
            rows: end - start,
            cols: self.cols,
            data: self.data[start * self.cols..end * self.cols].to_vec(),
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

/// One observed target: parallel (time, flux) samples plus the fold
/// parameters and the ground-truth label. Immutable once acquired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Target identifier (e.g. TIC id or mock index).
    pub id: String,
    /// Observation timestamps, sorted ascending.
    pub time: Vec<f64>,
    /// Flux reading at each timestamp.
    pub flux: Vec<f64>,
    /// Orbital period estimate used for folding.
    pub period: f64,
    /// Reference epoch of the transit center.
    pub epoch: f64,
    /// 1 = signal present, 0 = absent.
    pub label: u8,
}

/// Local and global feature views for a collection of series, plus the
/// parallel label vector. Rows are aligned across all four fields.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub local: Matrix,
    pub global: Matrix,
    pub labels: Vec<u8>,
    pub ids: Vec<String>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Deterministic positional split: the first `fractest` fraction of rows
    /// is the test partition, the remainder is train. No shuffling, so the
    /// split is reproducible given dataset order.
    pub fn split(&self, fractest: f64) -> Result<(Dataset, Dataset)> {
        if self.is_empty() {
            bail!("cannot split an empty dataset");
        }
        if !(0.0..1.0).contains(&fractest) {
            bail!("fractest must be in [0, 1), got {}", fractest);
        }
        let n = self.len();
        if self.local.rows() != n || self.global.rows() != n || self.ids.len() != n {
            bail!(
                "dataset rows out of sync: {} labels, {} local, {} global, {} ids",
                n,
                self.local.rows(),
                self.global.rows(),
                self.ids.len()
            );
        }
        let num_test = (fractest * n as f64) as usize;
        let take = |start: usize, end: usize| Dataset {
            local: self.local.slice_rows(start, end),
            global: self.global.slice_rows(start, end),
            labels: self.labels[start..end].to_vec(),
            ids: self.ids[start..end].to_vec(),
        };
        Ok((take(0, num_test), take(num_test, n)))
    }
}

/// Borrowed local+global feature pair handed across the classifier boundary.
#[derive(Debug, Clone, Copy)]
pub struct Views<'a> {
    pub local: &'a Matrix,
    pub global: &'a Matrix,
}

impl<'a> Views<'a> {
    pub fn of(dataset: &'a Dataset) -> Self {
        Self {
            local: &dataset.local,
            global: &dataset.global,
        }
    }

    pub fn rows(&self) -> usize {
        self.local.rows()
    }
}
