//! Dataset acquisition boundary.
//!
//! Real pipelines pull light curves from a telescope archive; experiments
//! and tests use the mock generator. Both sides produce the same shape:
//! per-series sorted phase arrays, parallel flux arrays, binary labels and
//! target ids, ready for view extraction.
//!
//! The mock model is intentionally minimal: unit flux plus Gaussian noise,
//! with a centered box transit of the configured depth for positives.

use std::cmp::Ordering;

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::types::TimeSeries;

/// Light curves in folded form, ready for view extraction.
#[derive(Debug, Clone)]
pub struct FoldedCurves {
    /// Sorted phase array per series, spanning [-0.5, 0.5) with the transit
    /// center at phase zero.
    pub phases: Vec<Vec<f64>>,
    /// Flux array per series, parallel to `phases`.
    pub fluxes: Vec<Vec<f64>>,
    pub labels: Vec<u8>,
    pub ids: Vec<String>,
}

/// External collaborator boundary for observed archives.
pub trait LightCurveSource {
    /// Load observed targets with their fold parameters and labels.
    fn load_observed(&self) -> Result<Vec<TimeSeries>>;
}

/// Load observed targets and fold each onto its orbital phase, producing
/// the same sorted, transit-at-zero shape as [`generate_mock`].
pub fn load_folded(source: &dyn LightCurveSource) -> Result<FoldedCurves> {
    let targets = source.load_observed()?;
    if targets.is_empty() {
        bail!("light-curve source returned no targets");
    }

    let mut phases = Vec::with_capacity(targets.len());
    let mut fluxes = Vec::with_capacity(targets.len());
    let mut labels = Vec::with_capacity(targets.len());
    let mut ids = Vec::with_capacity(targets.len());

    for series in targets {
        if series.time.len() != series.flux.len() {
            bail!(
                "target {}: time and flux must be parallel ({} vs {} samples)",
                series.id,
                series.time.len(),
                series.flux.len()
            );
        }
        if series.period <= 0.0 {
            bail!("target {}: period must be positive, got {}", series.id, series.period);
        }

        // Phase in [-0.5, 0.5) with the transit (t = epoch) at zero.
        let mut pairs: Vec<(f64, f64)> = series
            .time
            .iter()
            .zip(series.flux.iter())
            .map(|(&t, &f)| {
                let phase = ((t - series.epoch) / series.period + 0.5).rem_euclid(1.0) - 0.5;
                (phase, f)
            })
            .collect();
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        phases.push(pairs.iter().map(|&(p, _)| p).collect());
        fluxes.push(pairs.iter().map(|&(_, f)| f).collect());
        labels.push(series.label);
        ids.push(series.id);
    }

    Ok(FoldedCurves {
        phases,
        fluxes,
        labels,
        ids,
    })
}

/// Generate labeled mock curves.
///
/// Positive and negative series are interleaved so a positional train/test
/// split sees both classes in both partitions. Deterministic for a given
/// seed.
pub fn generate_mock(
    num_positive: usize,
    num_negative: usize,
    num_samples: usize,
    depth: f64,
    noise: f64,
    seed: u64,
) -> Result<FoldedCurves> {
    if num_positive + num_negative == 0 {
        bail!("mock dataset must contain at least one series");
    }
    if num_samples == 0 {
        bail!("mock series must contain at least one sample");
    }
    if noise < 0.0 {
        bail!("noise must be non-negative, got {}", noise);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let gauss = Normal::new(0.0, noise.max(f64::MIN_POSITIVE))
        .map_err(|e| anyhow::anyhow!("invalid noise level: {}", e))?;

    let total = num_positive + num_negative;
    let mut phases = Vec::with_capacity(total);
    let mut fluxes = Vec::with_capacity(total);
    let mut labels = Vec::with_capacity(total);
    let mut ids = Vec::with_capacity(total);

    let phase_grid: Vec<f64> = (0..num_samples)
        .map(|i| -0.5 + i as f64 / num_samples as f64)
        .collect();
    // Box transit covering 5% of the cycle, centered on phase zero.
    let half_width = 0.025;

    let mut remaining_pos = num_positive;
    let mut remaining_neg = num_negative;
    for k in 0..total {
        // Interleave while both classes remain, then drain the leftovers.
        let positive = if remaining_pos > 0 && remaining_neg > 0 {
            k % 2 == 0
        } else {
            remaining_pos > 0
        };
        if positive {
            remaining_pos -= 1;
        } else {
            remaining_neg -= 1;
        }

        let flux: Vec<f64> = phase_grid
            .iter()
            .map(|&p| {
                let base = if positive && p.abs() < half_width {
                    1.0 - depth
                } else {
                    1.0
                };
                base + if noise > 0.0 { gauss.sample(&mut rng) } else { 0.0 }
            })
            .collect();

        phases.push(phase_grid.clone());
        fluxes.push(flux);
        labels.push(u8::from(positive));
        ids.push(format!("mock-{:05}", k));
    }

    Ok(FoldedCurves {
        phases,
        fluxes,
        labels,
        ids,
    })
}
