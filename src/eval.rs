//! Threshold-sweep evaluation of a trained classifier.
//!
//! ## Metric grid layout
//!
//! The evaluator produces two dense grids, indexed in storage order:
//!
//! | Axis | Meaning                                     |
//! |------|---------------------------------------------|
//! | 1    | training epoch                              |
//! | 2    | threshold index (input grid order)          |
//! | 3    | metric: precision, accuracy, recall (grid)  |
//! |      | or count: tn, fp, fn, tp (confusion grid)   |
//! | 4    | partition: train = 0, test = 1              |
//!
//! Threshold order is preserved exactly so downstream precision/recall
//! curves align x/y pairs correctly.
//!
//! ## Undefined ratios
//!
//! A cell whose defining ratio has a zero denominator holds
//! [`METRIC_UNDEFINED`], never 0 or 1. Curve extraction drops a point only
//! when both precision and recall are undefined; a point where one of them
//! is merely zero is retained.
//!
//! ## Degenerate confusion matrices
//!
//! When ground truth and prediction collapse to a single class, the single
//! observed count is recorded as the true-negative cell and all other cells
//! as zero. This is a deliberate policy carried over from the reference
//! pipeline (see DESIGN.md), not an accidental shape fallback.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::classifier::Classifier;
use crate::types::{Dataset, MetricKind, Partition, Views, METRIC_UNDEFINED};

/// The 2x2 confusion tally for one (epoch, threshold, partition) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub tn: u64,
    pub fp: u64,
    pub fn_: u64,
    pub tp: u64,
}

impl ConfusionCounts {
    pub fn total(&self) -> u64 {
        self.tn + self.fp + self.fn_ + self.tp
    }

    /// Number of samples predicted positive at this threshold.
    pub fn predicted_positives(&self) -> u64 {
        self.tp + self.fp
    }
}

/// Four-dimensional metric array: [epoch][threshold][metric][partition].
///
/// Every cell starts at [`METRIC_UNDEFINED`] and is only overwritten when
/// its ratio is defined, so an all-sentinel grid is a valid outcome for a
/// pathologically skewed label distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricGrid {
    epochs: usize,
    thresholds: usize,
    data: Vec<f64>,
}

impl MetricGrid {
    pub fn new(epochs: usize, thresholds: usize) -> Self {
        Self {
            epochs,
            thresholds,
            data: vec![METRIC_UNDEFINED; epochs * thresholds * 3 * 2],
        }
    }

    pub fn epochs(&self) -> usize {
        self.epochs
    }

    pub fn thresholds(&self) -> usize {
        self.thresholds
    }

    fn idx(&self, epoch: usize, threshold: usize, metric: MetricKind, partition: Partition) -> usize {
        ((epoch * self.thresholds + threshold) * 3 + metric.index()) * 2 + partition.index()
    }

    pub fn get(&self, epoch: usize, threshold: usize, metric: MetricKind, partition: Partition) -> f64 {
        self.data[self.idx(epoch, threshold, metric, partition)]
    }

    pub fn set(
        &mut self,
        epoch: usize,
        threshold: usize,
        metric: MetricKind,
        partition: Partition,
        value: f64,
    ) {
        let i = self.idx(epoch, threshold, metric, partition);
        self.data[i] = value;
    }

    /// True if no cell was ever defined.
    pub fn all_undefined(&self) -> bool {
        self.data.iter().all(|&v| v == METRIC_UNDEFINED)
    }
}

/// Parallel raw-count array: [epoch][threshold][tn, fp, fn, tp][partition].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionGrid {
    epochs: usize,
    thresholds: usize,
    data: Vec<u64>,
}

impl ConfusionGrid {
    pub fn new(epochs: usize, thresholds: usize) -> Self {
        Self {
            epochs,
            thresholds,
            data: vec![0; epochs * thresholds * 4 * 2],
        }
    }

    fn idx(&self, epoch: usize, threshold: usize, cell: usize, partition: Partition) -> usize {
        ((epoch * self.thresholds + threshold) * 4 + cell) * 2 + partition.index()
    }

    pub fn set_counts(
        &mut self,
        epoch: usize,
        threshold: usize,
        partition: Partition,
        counts: ConfusionCounts,
    ) {
        for (cell, value) in [counts.tn, counts.fp, counts.fn_, counts.tp]
            .into_iter()
            .enumerate()
        {
            let i = self.idx(epoch, threshold, cell, partition);
            self.data[i] = value;
        }
    }

    pub fn counts(&self, epoch: usize, threshold: usize, partition: Partition) -> ConfusionCounts {
        ConfusionCounts {
            tn: self.data[self.idx(epoch, threshold, 0, partition)],
            fp: self.data[self.idx(epoch, threshold, 1, partition)],
            fn_: self.data[self.idx(epoch, threshold, 2, partition)],
            tp: self.data[self.idx(epoch, threshold, 3, partition)],
        }
    }
}

/// Binarize scores at a threshold and tally the confusion matrix against
/// ground truth.
///
/// A score counts as a positive prediction when it is strictly greater than
/// the threshold. When truth and prediction both collapse to the same single
/// class, the whole count lands in the true-negative cell (the documented
/// degenerate-matrix policy).
pub fn confusion_at_threshold(
    labels: &[u8],
    scores: &[f64],
    threshold: f64,
) -> Result<ConfusionCounts> {
    if labels.len() != scores.len() {
        bail!(
            "labels and scores must be parallel: {} vs {}",
            labels.len(),
            scores.len()
        );
    }
    if labels.is_empty() {
        bail!("cannot tally a confusion matrix over zero samples");
    }

    let preds: Vec<u8> = scores.iter().map(|&s| u8::from(s > threshold)).collect();

    let single_truth = labels.iter().all(|&l| l == labels[0]);
    let single_pred = preds.iter().all(|&p| p == preds[0]);
    if single_truth && single_pred && labels[0] == preds[0] {
        return Ok(ConfusionCounts {
            tn: labels.len() as u64,
            fp: 0,
            fn_: 0,
            tp: 0,
        });
    }

    let mut counts = ConfusionCounts {
        tn: 0,
        fp: 0,
        fn_: 0,
        tp: 0,
    };
    for (&truth, &pred) in labels.iter().zip(preds.iter()) {
        match (truth, pred) {
            (0, 0) => counts.tn += 1,
            (0, _) => counts.fp += 1,
            (_, 0) => counts.fn_ += 1,
            _ => counts.tp += 1,
        }
    }
    Ok(counts)
}

/// Precision, accuracy and recall for one confusion tally, with the
/// undefined-ratio sentinel where a denominator is zero.
pub fn metrics_from_counts(counts: &ConfusionCounts) -> (f64, f64, f64) {
    let precision = if counts.tp + counts.fp > 0 {
        counts.tp as f64 / (counts.tp + counts.fp) as f64
    } else {
        METRIC_UNDEFINED
    };
    let accuracy = if counts.total() > 0 {
        (counts.tp + counts.tn) as f64 / counts.total() as f64
    } else {
        METRIC_UNDEFINED
    };
    let recall = if counts.tp + counts.fn_ > 0 {
        counts.tp as f64 / (counts.tp + counts.fn_) as f64
    } else {
        METRIC_UNDEFINED
    };
    (precision, accuracy, recall)
}

/// Evenly spaced ascending threshold grid over [lo, hi], inclusive of both
/// endpoints. The evaluator treats the grid as given; this is the driver's
/// generator. The reference sweep uses 100 points over [0.2, 0.9].
pub fn threshold_grid(points: usize, lo: f64, hi: f64) -> Result<Vec<f64>> {
    if points == 0 {
        bail!("threshold grid must have at least one point");
    }
    if hi < lo {
        bail!("threshold grid bounds out of order: [{}, {}]", lo, hi);
    }
    if points == 1 {
        return Ok(vec![lo]);
    }
    let step = (hi - lo) / (points - 1) as f64;
    Ok((0..points).map(|i| lo + i as f64 * step).collect())
}

/// Run the full threshold sweep.
///
/// Epochs are sequential: each iteration advances the classifier by exactly
/// one incremental training epoch, then scores both partitions once and
/// tallies every threshold, so per-epoch metric snapshots are available.
///
/// Returns the metric grid and the parallel raw confusion counts. Empty
/// dataset or threshold grid are precondition failures; a label distribution
/// that leaves some cells permanently undefined is not.
pub fn evaluate(
    classifier: &mut dyn Classifier,
    dataset: &Dataset,
    fractest: f64,
    epochs: usize,
    thresholds: &[f64],
) -> Result<(MetricGrid, ConfusionGrid)> {
    if epochs == 0 {
        bail!("evaluation needs at least one epoch");
    }
    if thresholds.is_empty() {
        bail!("threshold grid is empty");
    }

    let (test, train) = dataset.split(fractest)?;
    if train.is_empty() || test.is_empty() {
        bail!(
            "split left a partition empty: {} train, {} test",
            train.len(),
            test.len()
        );
    }

    let mut metrics = MetricGrid::new(epochs, thresholds.len());
    let mut confusion = ConfusionGrid::new(epochs, thresholds.len());

    for epoch in 0..epochs {
        classifier.train_one_epoch(Views::of(&train), &train.labels)?;

        for partition in Partition::ALL {
            let part = match partition {
                Partition::Train => &train,
                Partition::Test => &test,
            };
            let scores = classifier.predict(Views::of(part))?;
            if scores.len() != part.labels.len() {
                bail!(
                    "classifier returned {} scores for {} samples",
                    scores.len(),
                    part.labels.len()
                );
            }

            for (ti, &threshold) in thresholds.iter().enumerate() {
                let counts = confusion_at_threshold(&part.labels, &scores, threshold)?;
                confusion.set_counts(epoch, ti, partition, counts);

                let (precision, accuracy, recall) = metrics_from_counts(&counts);
                metrics.set(epoch, ti, MetricKind::Precision, partition, precision);
                metrics.set(epoch, ti, MetricKind::Accuracy, partition, accuracy);
                metrics.set(epoch, ti, MetricKind::Recall, partition, recall);
            }
        }
    }

    Ok((metrics, confusion))
}

/// Extract the (recall, precision) curve for one epoch and partition, in
/// threshold order.
///
/// Points where both precision and recall are the undefined sentinel carry
/// no discriminative information and are dropped; points where only one of
/// them is zero are retained.
pub fn pr_curve(grid: &MetricGrid, epoch: usize, partition: Partition) -> Vec<(f64, f64)> {
    (0..grid.thresholds())
        .filter_map(|t| {
            let precision = grid.get(epoch, t, MetricKind::Precision, partition);
            let recall = grid.get(epoch, t, MetricKind::Recall, partition);
            if precision == METRIC_UNDEFINED && recall == METRIC_UNDEFINED {
                None
            } else {
                Some((recall, precision))
            }
        })
        .collect()
}

/// Area under the ROC curve via the rank-sum (Mann-Whitney) formulation,
/// with average ranks for tied scores.
///
/// Errors when only one class is present; the sweep driver downgrades that
/// to a reported 0.0 with a diagnostic, since a degenerate score vector must
/// not abort the broader sweep.
pub fn roc_auc(labels: &[u8], scores: &[f64]) -> Result<f64> {
    if labels.len() != scores.len() {
        bail!(
            "labels and scores must be parallel: {} vs {}",
            labels.len(),
            scores.len()
        );
    }
    let num_pos = labels.iter().filter(|&&l| l == 1).count();
    let num_neg = labels.len() - num_pos;
    if num_pos == 0 || num_neg == 0 {
        bail!("AUC undefined: only one class present in ground truth");
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(std::cmp::Ordering::Equal));

    // Average ranks across ties.
    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }

    let pos_rank_sum: f64 = labels
        .iter()
        .zip(ranks.iter())
        .filter(|(&l, _)| l == 1)
        .map(|(_, &r)| r)
        .sum();

    let u = pos_rank_sum - (num_pos * (num_pos + 1)) as f64 / 2.0;
    Ok(u / (num_pos * num_neg) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Classifier, TrainLog};
    use crate::types::Matrix;
    use anyhow::Result;

    /// Test double: scores each row by its first local feature, never learns.
    struct FixedScorer;

    impl Classifier for FixedScorer {
        fn model_id(&self) -> String {
            "fixed".into()
        }

        fn train_one_epoch(&mut self, views: Views<'_>, _labels: &[u8]) -> Result<TrainLog> {
            Ok(TrainLog {
                epoch: 1,
                mean_loss: 0.0,
                samples: views.rows(),
            })
        }

        fn predict(&self, views: Views<'_>) -> Result<Vec<f64>> {
            Ok((0..views.rows()).map(|r| views.local.get(r, 0)).collect())
        }

        fn save(&self, _path: &std::path::Path) -> Result<()> {
            Ok(())
        }
    }

    fn alternating_dataset(n: usize) -> Dataset {
        // Row i scores exactly its label, so the classifier is perfect.
        let labels: Vec<u8> = (0..n).map(|i| ((i + 1) % 2) as u8).collect();
        let rows: Vec<Vec<f64>> = labels.iter().map(|&l| vec![l as f64, 0.0]).collect();
        let local = Matrix::from_rows(&rows).unwrap();
        Dataset {
            global: local.clone(),
            local,
            labels: labels.clone(),
            ids: (0..n).map(|i| format!("s{}", i)).collect(),
        }
    }

    #[test]
    fn test_perfect_classifier_at_half_threshold() {
        // 10 series, labels [1,0,1,0,...], scores equal to the labels.
        let labels: Vec<u8> = vec![1, 0, 1, 0, 1, 0, 1, 0, 1, 0];
        let scores: Vec<f64> = labels.iter().map(|&l| l as f64).collect();
        let counts = confusion_at_threshold(&labels, &scores, 0.5).unwrap();
        assert_eq!(counts.tn, 5);
        assert_eq!(counts.fp, 0);
        assert_eq!(counts.fn_, 0);
        assert_eq!(counts.tp, 5);
        let (precision, accuracy, recall) = metrics_from_counts(&counts);
        assert_eq!(precision, 1.0);
        assert_eq!(accuracy, 1.0);
        assert_eq!(recall, 1.0);
    }

    #[test]
    fn test_degenerate_collapse_policy() {
        // All truth and prediction in one class: 1x1 matrix maps to TN.
        let labels = vec![0, 0, 0, 0];
        let scores = vec![0.1, 0.2, 0.1, 0.3];
        let counts = confusion_at_threshold(&labels, &scores, 0.5).unwrap();
        assert_eq!(counts.tn, 4);
        assert_eq!(counts.tp + counts.fp + counts.fn_, 0);

        // Precision and recall are the sentinel, not a division failure.
        let (precision, _, recall) = metrics_from_counts(&counts);
        assert_eq!(precision, METRIC_UNDEFINED);
        assert_eq!(recall, METRIC_UNDEFINED);

        // The policy applies even when the single class is positive.
        let labels = vec![1, 1, 1];
        let scores = vec![0.9, 0.8, 0.7];
        let counts = confusion_at_threshold(&labels, &scores, 0.5).unwrap();
        assert_eq!(counts.tn, 3);
        assert_eq!(counts.tp, 0);
    }

    #[test]
    fn test_predicted_positives_monotone_in_threshold() {
        let labels = vec![1, 0, 1, 0];
        let scores = vec![0.1, 0.4, 0.6, 0.9];
        let expected = [3u64, 2, 1];
        for (&threshold, &want) in [0.3, 0.5, 0.7].iter().zip(expected.iter()) {
            let counts = confusion_at_threshold(&labels, &scores, threshold).unwrap();
            assert_eq!(counts.predicted_positives(), want);
        }
    }

    #[test]
    fn test_threshold_grid_shape_and_order() {
        let grid = threshold_grid(100, 0.2, 0.9).unwrap();
        assert_eq!(grid.len(), 100);
        assert!((grid[0] - 0.2).abs() < 1e-12);
        assert!((grid[99] - 0.9).abs() < 1e-12);
        assert!(grid.windows(2).all(|w| w[0] < w[1]));
        assert!(threshold_grid(0, 0.2, 0.9).is_err());
    }

    #[test]
    fn test_evaluate_grid_shapes_and_perfect_metrics() {
        let dataset = alternating_dataset(20);
        let thresholds = vec![0.3, 0.5, 0.7];
        let mut clf = FixedScorer;
        let (metrics, confusion) = evaluate(&mut clf, &dataset, 0.3, 2, &thresholds).unwrap();

        assert_eq!(metrics.epochs(), 2);
        assert_eq!(metrics.thresholds(), 3);

        // Perfect scorer: precision and recall are 1.0 everywhere defined.
        for partition in Partition::ALL {
            for t in 0..3 {
                assert_eq!(metrics.get(1, t, MetricKind::Precision, partition), 1.0);
                assert_eq!(metrics.get(1, t, MetricKind::Recall, partition), 1.0);
                let counts = confusion.counts(1, t, partition);
                assert_eq!(counts.fp, 0);
                assert_eq!(counts.fn_, 0);
                assert_eq!(counts.total() as usize, if partition == Partition::Test { 6 } else { 14 });
            }
        }
    }

    #[test]
    fn test_evaluate_preconditions() {
        let dataset = alternating_dataset(10);
        let mut clf = FixedScorer;
        assert!(evaluate(&mut clf, &dataset, 0.3, 0, &[0.5]).is_err());
        assert!(evaluate(&mut clf, &dataset, 0.3, 1, &[]).is_err());
    }

    #[test]
    fn test_pr_curve_drops_double_sentinel_only() {
        let mut grid = MetricGrid::new(1, 3);
        // t0: fully defined. t1: recall zero but precision defined -> kept.
        // t2: both undefined -> dropped.
        grid.set(0, 0, MetricKind::Precision, Partition::Test, 0.8);
        grid.set(0, 0, MetricKind::Recall, Partition::Test, 0.6);
        grid.set(0, 1, MetricKind::Precision, Partition::Test, 0.5);
        grid.set(0, 1, MetricKind::Recall, Partition::Test, 0.0);

        let curve = pr_curve(&grid, 0, Partition::Test);
        assert_eq!(curve, vec![(0.6, 0.8), (0.0, 0.5)]);
    }

    #[test]
    fn test_metric_grid_starts_all_undefined() {
        let grid = MetricGrid::new(3, 5);
        assert!(grid.all_undefined());
    }

    #[test]
    fn test_roc_auc_separable_and_degenerate() {
        let labels = vec![0, 0, 1, 1];
        let scores = vec![0.1, 0.2, 0.8, 0.9];
        assert!((roc_auc(&labels, &scores).unwrap() - 1.0).abs() < 1e-12);

        // Reversed scores: worst case.
        let scores = vec![0.9, 0.8, 0.2, 0.1];
        assert!(roc_auc(&labels, &scores).unwrap().abs() < 1e-12);

        // Ties across classes give 0.5.
        let scores = vec![0.5, 0.5, 0.5, 0.5];
        assert!((roc_auc(&labels, &scores).unwrap() - 0.5).abs() < 1e-12);

        // One-class truth is an error, handled at the call site.
        assert!(roc_auc(&[1, 1], &[0.4, 0.6]).is_err());
    }
}
