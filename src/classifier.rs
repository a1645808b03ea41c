//! Classifier boundary.
//!
//! The evaluator treats the model as an opaque scorer with an
//! incremental-fit contract: one `train_one_epoch` call advances internal
//! state by exactly one epoch, `predict` maps dual-input (local + global)
//! feature views to scores in [0, 1], and `save`/`load` checkpoint weights.
//! Real network architectures plug in behind [`Classifier`]; the crate ships
//! a minibatch logistic-regression baseline so sweeps and tests run without
//! an external modeling stack.
//!
//! The classifier is a single-owner, single-writer resource: only the
//! evaluator mutates it, and it is never shared across concurrent
//! evaluations.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::types::Views;

/// Summary returned by one incremental training epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainLog {
    /// Total epochs of training this classifier has now received.
    pub epoch: usize,
    /// Mean logistic loss over the epoch's samples.
    pub mean_loss: f64,
    /// Number of training samples seen this epoch.
    pub samples: usize,
}

/// Opaque trained-classifier contract used by the threshold-sweep evaluator.
pub trait Classifier {
    /// Stable identity string covering architecture and hyperparameters.
    /// Metric cache keys embed it, so two configurations must never share
    /// an id.
    fn model_id(&self) -> String;

    /// Advance internal state by exactly one epoch of training.
    fn train_one_epoch(&mut self, views: Views<'_>, labels: &[u8]) -> Result<TrainLog>;

    /// Score every row; outputs are probabilities in [0, 1].
    fn predict(&self, views: Views<'_>) -> Result<Vec<f64>>;

    /// Persist a weight checkpoint.
    fn save(&self, path: &Path) -> Result<()>;
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Logistic regression over the concatenated local+global feature vector,
/// trained by minibatch SGD one epoch at a time.
///
/// Missing bins (NaN features from empty phase windows) contribute nothing
/// to the dot product or the gradient; they are skipped, not zero-filled,
/// so a sparse curve does not drag scores toward the bias.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearClassifier {
    local_bins: usize,
    global_bins: usize,
    weights: Vec<f64>,
    bias: f64,
    learning_rate: f64,
    batch_size: usize,
    epochs_trained: usize,
    seed: u64,
}

impl LinearClassifier {
    pub fn new(
        local_bins: usize,
        global_bins: usize,
        batch_size: usize,
        learning_rate: f64,
        seed: u64,
    ) -> Self {
        let dim = local_bins + global_bins;
        let mut rng = StdRng::seed_from_u64(seed);
        // Small symmetric init keeps early scores near 0.5.
        let weights = (0..dim).map(|_| rng.gen_range(-0.01..0.01)).collect();
        Self {
            local_bins,
            global_bins,
            weights,
            bias: 0.0,
            learning_rate,
            batch_size: batch_size.max(1),
            epochs_trained: 0,
            seed,
        }
    }

    /// Restore a checkpoint written by [`Classifier::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read checkpoint {}", path.display()))?;
        bincode::deserialize(&bytes)
            .with_context(|| format!("corrupt checkpoint {}", path.display()))
    }

    pub fn epochs_trained(&self) -> usize {
        self.epochs_trained
    }

    fn check_views(&self, views: &Views<'_>) -> Result<()> {
        if views.local.cols() != self.local_bins || views.global.cols() != self.global_bins {
            bail!(
                "feature shape mismatch: model expects {}+{} bins, got {}+{}",
                self.local_bins,
                self.global_bins,
                views.local.cols(),
                views.global.cols()
            );
        }
        if views.local.rows() != views.global.rows() {
            bail!(
                "local and global views disagree on row count: {} vs {}",
                views.local.rows(),
                views.global.rows()
            );
        }
        Ok(())
    }

    fn score_row(&self, views: &Views<'_>, row: usize) -> f64 {
        let mut z = self.bias;
        for (w, &x) in self.weights[..self.local_bins]
            .iter()
            .zip(views.local.row(row).iter())
        {
            if x.is_finite() {
                z += w * x;
            }
        }
        for (w, &x) in self.weights[self.local_bins..]
            .iter()
            .zip(views.global.row(row).iter())
        {
            if x.is_finite() {
                z += w * x;
            }
        }
        sigmoid(z)
    }
}

impl Classifier for LinearClassifier {
    fn model_id(&self) -> String {
        format!(
            "linear-l{}-g{}-b{}-lr{}-s{}",
            self.local_bins, self.global_bins, self.batch_size, self.learning_rate, self.seed
        )
    }

    fn train_one_epoch(&mut self, views: Views<'_>, labels: &[u8]) -> Result<TrainLog> {
        self.check_views(&views)?;
        if views.rows() != labels.len() {
            bail!(
                "label count {} does not match {} feature rows",
                labels.len(),
                views.rows()
            );
        }
        if labels.is_empty() {
            bail!("cannot train on an empty partition");
        }

        let n = labels.len();
        let mut loss_sum = 0.0;

        for batch_start in (0..n).step_by(self.batch_size) {
            let batch_end = (batch_start + self.batch_size).min(n);
            let batch_len = (batch_end - batch_start) as f64;

            let mut grad_w = vec![0.0; self.weights.len()];
            let mut grad_b = 0.0;

            for row in batch_start..batch_end {
                let p = self.score_row(&views, row);
                let y = labels[row] as f64;
                let err = p - y;
                grad_b += err;

                for (g, &x) in grad_w[..self.local_bins]
                    .iter_mut()
                    .zip(views.local.row(row).iter())
                {
                    if x.is_finite() {
                        *g += err * x;
                    }
                }
                for (g, &x) in grad_w[self.local_bins..]
                    .iter_mut()
                    .zip(views.global.row(row).iter())
                {
                    if x.is_finite() {
                        *g += err * x;
                    }
                }

                let p_clamped = p.clamp(1e-12, 1.0 - 1e-12);
                loss_sum -= y * p_clamped.ln() + (1.0 - y) * (1.0 - p_clamped).ln();
            }

            let scale = self.learning_rate / batch_len;
            for (w, g) in self.weights.iter_mut().zip(grad_w.iter()) {
                *w -= scale * g;
            }
            self.bias -= scale * grad_b;
        }

        self.epochs_trained += 1;
        Ok(TrainLog {
            epoch: self.epochs_trained,
            mean_loss: loss_sum / n as f64,
            samples: n,
        })
    }

    fn predict(&self, views: Views<'_>) -> Result<Vec<f64>> {
        self.check_views(&views)?;
        Ok((0..views.rows()).map(|r| self.score_row(&views, r)).collect())
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let bytes = bincode::serialize(self).context("failed to serialize checkpoint")?;
        fs::write(path, bytes)
            .with_context(|| format!("failed to write checkpoint {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Matrix;

    fn separable_views(n: usize) -> (Matrix, Matrix, Vec<u8>) {
        // Positives have a deep dip in both views, negatives are flat.
        let labels: Vec<u8> = (0..n).map(|i| (i % 2) as u8).collect();
        let rows: Vec<Vec<f64>> = labels
            .iter()
            .map(|&l| {
                if l == 1 {
                    vec![-1.0, -1.0, -1.0, -1.0]
                } else {
                    vec![1.0, 1.0, 1.0, 1.0]
                }
            })
            .collect();
        let local = Matrix::from_rows(&rows).unwrap();
        let global = local.clone();
        (local, global, labels)
    }

    #[test]
    fn test_scores_bounded() {
        let (local, global, _labels) = separable_views(8);
        let clf = LinearClassifier::new(4, 4, 4, 0.5, 7);
        let scores = clf
            .predict(Views {
                local: &local,
                global: &global,
            })
            .unwrap();
        assert_eq!(scores.len(), 8);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn test_training_separates_classes() {
        let (local, global, labels) = separable_views(40);
        let views = Views {
            local: &local,
            global: &global,
        };
        let mut clf = LinearClassifier::new(4, 4, 8, 0.5, 42);

        let first = clf.train_one_epoch(views, &labels).unwrap();
        for _ in 0..30 {
            clf.train_one_epoch(views, &labels).unwrap();
        }
        let last = clf.train_one_epoch(views, &labels).unwrap();
        assert!(last.mean_loss < first.mean_loss);
        assert_eq!(last.epoch, 32);

        let scores = clf.predict(views).unwrap();
        for (&label, &score) in labels.iter().zip(scores.iter()) {
            if label == 1 {
                assert!(score > 0.5, "positive scored {}", score);
            } else {
                assert!(score < 0.5, "negative scored {}", score);
            }
        }
    }

    #[test]
    fn test_nan_features_are_skipped() {
        let local = Matrix::from_rows(&[vec![f64::NAN, 2.0]]).unwrap();
        let global = Matrix::from_rows(&[vec![f64::NAN, f64::NAN]]).unwrap();
        let clf = LinearClassifier::new(2, 2, 4, 0.1, 1);
        let scores = clf
            .predict(Views {
                local: &local,
                global: &global,
            })
            .unwrap();
        assert!(scores[0].is_finite());
    }

    #[test]
    fn test_shape_mismatch_errors() {
        let local = Matrix::filled(2, 3, 0.0);
        let global = Matrix::filled(2, 5, 0.0);
        let clf = LinearClassifier::new(4, 5, 4, 0.1, 1);
        assert!(clf
            .predict(Views {
                local: &local,
                global: &global,
            })
            .is_err());
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.ckpt");

        let (local, global, labels) = separable_views(10);
        let views = Views {
            local: &local,
            global: &global,
        };
        let mut clf = LinearClassifier::new(4, 4, 4, 0.3, 9);
        clf.train_one_epoch(views, &labels).unwrap();
        clf.save(&path).unwrap();

        let restored = LinearClassifier::load(&path).unwrap();
        assert_eq!(restored.epochs_trained(), 1);
        assert_eq!(restored.predict(views).unwrap(), clf.predict(views).unwrap());
    }
}
