//! Phase folding and binning of light curves.
//!
//! Two transforms live here:
//!
//! - [`fold_and_bin`]: fold a raw (time, flux) series onto the unit phase
//!   interval around a period/epoch and average it into fixed-width bins,
//!   either over the whole cycle (global zoom) or a narrow window around the
//!   transit (local zoom).
//! - [`extract_views`]: given already-folded, sorted phase curves, cut the
//!   local window around the sample nearest phase zero and a uniform
//!   down-sample for the global view. This is the compute path behind the
//!   bin cache.
//!
//! Both are pure functions of their inputs. A bin with no contributing
//! samples is reported as NaN: zero is a valid flux reading, so "missing"
//! must stay distinguishable from "measured zero".

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::{Matrix, ZoomMode};

/// The four derived arrays the bin cache persists, in fixed order:
/// local flux, global flux, local phase, global phase. Each matrix is
/// (num_series x num_bins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinnedViews {
    pub local_flux: Matrix,
    pub global_flux: Matrix,
    pub local_phase: Matrix,
    pub global_phase: Matrix,
}

/// Normalized fold phase of a single timestamp.
///
/// The +0.25 offset centers the transit event away from the phase-wrap
/// boundary at 0/1.
fn fold_phase(time: f64, epoch: f64, period: f64) -> f64 {
    ((time - epoch) / period + 0.25).rem_euclid(1.0)
}

/// Fold a raw light curve and average it into `num_bins` equal-width phase
/// bins over the zoom's window.
///
/// Each output bin is the mean flux of samples whose phase falls strictly
/// inside that bin's window; a bin with no samples is NaN.
///
/// Preconditions: `time` and `flux` have equal length, `period > 0`,
/// `num_bins >= 1`. Violations are errors, not panics.
pub fn fold_and_bin(
    time: &[f64],
    flux: &[f64],
    period: f64,
    epoch: f64,
    num_bins: usize,
    zoom: ZoomMode,
) -> Result<Vec<f64>> {
    if time.len() != flux.len() {
        bail!(
            "time and flux must be parallel: {} vs {} samples",
            time.len(),
            flux.len()
        );
    }
    if period <= 0.0 {
        bail!("period must be positive, got {}", period);
    }
    if num_bins == 0 {
        bail!("num_bins must be at least 1");
    }

    let (min_phase, max_phase) = zoom.phase_range();
    let width = (max_phase - min_phase) / num_bins as f64;

    let mut sums = vec![0.0; num_bins];
    let mut counts = vec![0usize; num_bins];

    for (&t, &f) in time.iter().zip(flux.iter()) {
        let phase = fold_phase(t, epoch, period);
        // Strictly inside the window: samples exactly on a bin edge are
        // dropped, matching edge-exclusive windows.
        if phase <= min_phase || phase >= max_phase {
            continue;
        }
        let mut k = ((phase - min_phase) / width) as usize;
        if k >= num_bins {
            k = num_bins - 1;
        }
        let lo = min_phase + k as f64 * width;
        let hi = lo + width;
        if phase > lo && phase < hi {
            sums[k] += f;
            counts[k] += 1;
        }
    }

    Ok(sums
        .iter()
        .zip(counts.iter())
        .map(|(&s, &c)| if c > 0 { s / c as f64 } else { f64::NAN })
        .collect())
}

/// Index of the value in a sorted slice closest to `target`.
///
/// Binary search, O(log n). When two values are equally close, the earlier
/// (smaller) one wins. Errors on an empty slice.
pub fn nearest_value(sorted: &[f64], target: f64) -> Result<usize> {
    if sorted.is_empty() {
        bail!("nearest_value on an empty slice");
    }
    let pos = sorted.partition_point(|&v| v < target);
    if pos == 0 {
        return Ok(0);
    }
    if pos == sorted.len() {
        return Ok(sorted.len() - 1);
    }
    let before = sorted[pos - 1];
    let after = sorted[pos];
    if after - target < target - before {
        Ok(pos)
    } else {
        Ok(pos - 1)
    }
}

fn is_sorted(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] <= w[1])
}

/// Build local and global views for a set of folded curves.
///
/// Per series: locate the sample nearest phase zero (the transit center) by
/// binary search over the sorted phase array, cut a symmetric window of
/// `local_bins` samples around it for the local view, and take every k-th
/// sample (k = floor(len / global_bins), truncated to `global_bins`) for the
/// global view.
///
/// An unsorted phase array, or a local window that does not fit inside the
/// series, is a precondition violation.
pub fn extract_views(
    phases: &[Vec<f64>],
    fluxes: &[Vec<f64>],
    local_bins: usize,
    global_bins: usize,
) -> Result<BinnedViews> {
    if phases.len() != fluxes.len() {
        bail!(
            "phases and fluxes must be parallel: {} vs {} series",
            phases.len(),
            fluxes.len()
        );
    }
    if phases.is_empty() {
        bail!("cannot extract views from an empty dataset");
    }
    if local_bins == 0 || global_bins == 0 {
        bail!("local_bins and global_bins must be at least 1");
    }

    let n = phases.len();
    let mut local_flux = Matrix::filled(n, local_bins, f64::NAN);
    let mut global_flux = Matrix::filled(n, global_bins, f64::NAN);
    let mut local_phase = Matrix::filled(n, local_bins, f64::NAN);
    let mut global_phase = Matrix::filled(n, global_bins, f64::NAN);

    for k in 0..n {
        let phase = &phases[k];
        let flux = &fluxes[k];
        if phase.len() != flux.len() {
            bail!(
                "series {}: phase and flux must be parallel ({} vs {} samples)",
                k,
                phase.len(),
                flux.len()
            );
        }
        if !is_sorted(phase) {
            bail!("series {}: phase array violates the sorted precondition", k);
        }

        let center = nearest_value(phase, 0.0)
            .with_context(|| format!("series {}: nearest-phase-zero search failed", k))?;

        // Symmetric window of local_bins samples around the transit center.
        let half = local_bins / 2;
        let start = center
            .checked_sub(half)
            .with_context(|| format!("series {}: local window underruns the series", k))?;
        let end = start + local_bins;
        if end > phase.len() {
            bail!(
                "series {}: local window [{}, {}) overruns {} samples",
                k,
                start,
                end,
                phase.len()
            );
        }
        local_flux.set_row(k, &flux[start..end]);
        local_phase.set_row(k, &phase[start..end]);

        // Uniform down-sample for the global view.
        let step = phase.len() / global_bins;
        if step == 0 {
            bail!(
                "series {}: {} samples cannot fill {} global bins",
                k,
                phase.len(),
                global_bins
            );
        }
        let glob_f: Vec<f64> = flux.iter().step_by(step).take(global_bins).copied().collect();
        let glob_p: Vec<f64> = phase.iter().step_by(step).take(global_bins).copied().collect();
        global_flux.set_row(k, &glob_f);
        global_phase.set_row(k, &glob_p);
    }

    Ok(BinnedViews {
        local_flux,
        global_flux,
        local_phase,
        global_phase,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_and_bin_length_and_flat_flux() {
        // A flat flux curve: every defined bin equals the constant.
        let time: Vec<f64> = (0..500).map(|i| i as f64 * 0.01).collect();
        let flux = vec![3.5; 500];
        for &bins in &[1usize, 7, 50] {
            let out = fold_and_bin(&time, &flux, 1.0, 0.0, bins, ZoomMode::Global).unwrap();
            assert_eq!(out.len(), bins);
            for v in out.iter().filter(|v| !v.is_nan()) {
                assert!((v - 3.5).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_fold_and_bin_empty_bin_is_nan_not_zero() {
        // Two samples, many bins: most bins have no contributors.
        let out = fold_and_bin(&[0.1, 0.2], &[1.0, 1.0], 1.0, 0.0, 50, ZoomMode::Global).unwrap();
        let nan_count = out.iter().filter(|v| v.is_nan()).count();
        assert!(nan_count >= 48);
        assert!(out.iter().all(|v| v.is_nan() || *v != 0.0));
    }

    #[test]
    fn test_fold_and_bin_preconditions() {
        assert!(fold_and_bin(&[0.0], &[1.0, 2.0], 1.0, 0.0, 4, ZoomMode::Global).is_err());
        assert!(fold_and_bin(&[0.0], &[1.0], 0.0, 0.0, 4, ZoomMode::Global).is_err());
        assert!(fold_and_bin(&[0.0], &[1.0], 1.0, 0.0, 0, ZoomMode::Global).is_err());
    }

    #[test]
    fn test_fold_phase_offset_centers_transit() {
        // A sample at the reference epoch folds to phase 0.25.
        assert!((fold_phase(7.3, 7.3, 2.0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_local_zoom_covers_narrow_window() {
        let time: Vec<f64> = (0..2000).map(|i| i as f64 * 0.001).collect();
        let flux: Vec<f64> = time.iter().map(|t| t * 2.0).collect();
        let out = fold_and_bin(&time, &flux, 1.0, 0.0, 20, ZoomMode::Local).unwrap();
        assert_eq!(out.len(), 20);
        // Dense sampling: every local bin should be populated.
        assert!(out.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_nearest_value_interior_and_edges() {
        let sorted = vec![-0.4, -0.1, 0.05, 0.3];
        assert_eq!(nearest_value(&sorted, 0.0).unwrap(), 2);
        assert_eq!(nearest_value(&sorted, -5.0).unwrap(), 0);
        assert_eq!(nearest_value(&sorted, 5.0).unwrap(), 3);
    }

    #[test]
    fn test_nearest_value_tie_prefers_smaller() {
        // -0.1 and 0.1 are equally close to 0; the smaller value wins.
        let sorted = vec![-0.1, 0.1];
        assert_eq!(nearest_value(&sorted, 0.0).unwrap(), 0);
    }

    #[test]
    fn test_nearest_value_empty_errors() {
        assert!(nearest_value(&[], 0.0).is_err());
    }

    fn mock_folded(n: usize, len: usize) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
        let phases: Vec<Vec<f64>> = (0..n)
            .map(|_| (0..len).map(|i| -0.5 + i as f64 / len as f64).collect())
            .collect();
        let fluxes: Vec<Vec<f64>> = (0..n).map(|k| vec![k as f64; len]).collect();
        (phases, fluxes)
    }

    #[test]
    fn test_extract_views_shapes() {
        let (phases, fluxes) = mock_folded(3, 100);
        let views = extract_views(&phases, &fluxes, 10, 25).unwrap();
        assert_eq!(views.local_flux.rows(), 3);
        assert_eq!(views.local_flux.cols(), 10);
        assert_eq!(views.global_flux.cols(), 25);
        assert_eq!(views.local_phase.cols(), 10);
        assert_eq!(views.global_phase.cols(), 25);
        // Row k of the flux views carries series k's constant flux.
        assert!((views.local_flux.get(2, 0) - 2.0).abs() < 1e-12);
        assert!((views.global_flux.get(1, 24) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_extract_views_local_window_centered() {
        let (phases, fluxes) = mock_folded(1, 100);
        let views = extract_views(&phases, &fluxes, 10, 10).unwrap();
        // The local phase window should straddle zero.
        let row = views.local_phase.row(0);
        assert!(row[0] < 0.0 && row[row.len() - 1] > 0.0);
    }

    #[test]
    fn test_extract_views_rejects_unsorted_phase() {
        let phases = vec![vec![0.3, -0.2, 0.1]];
        let fluxes = vec![vec![1.0, 1.0, 1.0]];
        let err = extract_views(&phases, &fluxes, 2, 2).unwrap_err();
        assert!(err.to_string().contains("sorted"));
    }

    #[test]
    fn test_extract_views_rejects_overrun_window() {
        // 4 samples cannot host a 10-sample local window.
        let phases = vec![vec![-0.2, -0.1, 0.0, 0.1]];
        let fluxes = vec![vec![1.0; 4]];
        assert!(extract_views(&phases, &fluxes, 10, 2).is_err());
    }
}
