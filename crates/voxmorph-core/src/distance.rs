//! Distance metrics for codebook matching and outlier thresholding.
//!
//! The matcher selects one of five metrics ([`DistanceMeasure`]); the
//! cluster-based outlier eliminator additionally uses the normalized
//! Euclidean distance. The two inverse-harmonic metrics are LSF-specific:
//! they weight each dimension by the inverse spacing of the reference
//! vector's neighbouring line spectral frequencies, so narrowly spaced
//! pairs (the formant-like regions the ear cares about) dominate the
//! distance.
//!
//! # Example
//!
//! ```
//! use voxmorph_core::distance::{euclidean, lsf_inverse_harmonic};
//!
//! let a = [0.3, 0.9, 1.5];
//! let b = [0.35, 0.95, 1.55];
//! assert!(euclidean(&a, &b) < 0.1);
//! // The inverse-harmonic distance of a vector to itself is zero.
//! assert_eq!(lsf_inverse_harmonic(&a, &a), 0.0);
//! ```

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Guard against division by zero for degenerate (coincident) LSF spacings.
const MIN_SPACING: f64 = 1e-10;

/// Distance metric used by the codebook matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceMeasure {
    /// Euclidean (L2) distance.
    #[default]
    Euclidean,
    /// Absolute value (L1) distance.
    AbsoluteValue,
    /// Mahalanobis distance with a diagonal inverse covariance. Falls back
    /// to Euclidean when the matcher has no covariance configured.
    Mahalanobis,
    /// Perceptually weighted LSF distance (inverse spacing weights of the
    /// input vector).
    InverseHarmonic,
    /// Symmetric variant blending input-side and entry-side spacing weights
    /// by `alpha`.
    InverseHarmonicSymmetric,
}

/// Euclidean (L2) distance.
pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len(), "distance over mismatched lengths");
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Absolute value (L1) distance.
pub fn absolute_value(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len(), "distance over mismatched lengths");
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

/// Euclidean distance with per-dimension variance normalisation.
pub fn normalized_euclidean(a: &[f64], b: &[f64], variances: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len(), "distance over mismatched lengths");
    assert_eq!(a.len(), variances.len(), "variance length mismatch");
    a.iter()
        .zip(b)
        .zip(variances)
        .map(|((x, y), v)| {
            let d = x - y;
            d * d / v.max(MIN_SPACING)
        })
        .sum::<f64>()
        .sqrt()
}

/// Mahalanobis distance restricted to a diagonal inverse covariance.
pub fn mahalanobis_diag(a: &[f64], b: &[f64], inverse_variances: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len(), "distance over mismatched lengths");
    assert_eq!(a.len(), inverse_variances.len(), "covariance length mismatch");
    a.iter()
        .zip(b)
        .zip(inverse_variances)
        .map(|((x, y), iv)| {
            let d = x - y;
            d * d * iv
        })
        .sum::<f64>()
        .sqrt()
}

/// Inverse-spacing weights of an LSF vector (radian domain, band (0, π)).
///
/// `w[k] = 1/(x[k] - x[k-1]) + 1/(x[k+1] - x[k])` with virtual boundary
/// lines at 0 and π. Narrow spacings (formant-like concentrations) get
/// large weights.
pub fn inverse_harmonic_weights(lsf: &[f64]) -> Vec<f64> {
    let p = lsf.len();
    let mut weights = Vec::with_capacity(p);
    for k in 0..p {
        let below = if k == 0 { 0.0 } else { lsf[k - 1] };
        let above = if k + 1 == p { PI } else { lsf[k + 1] };
        let lower = (lsf[k] - below).max(MIN_SPACING);
        let upper = (above - lsf[k]).max(MIN_SPACING);
        weights.push(1.0 / lower + 1.0 / upper);
    }
    weights
}

/// Perceptually weighted LSF distance using the first argument's spacing
/// weights.
pub fn lsf_inverse_harmonic(input: &[f64], entry: &[f64]) -> f64 {
    assert_eq!(input.len(), entry.len(), "distance over mismatched lengths");
    let weights = inverse_harmonic_weights(input);
    input
        .iter()
        .zip(entry)
        .zip(&weights)
        .map(|((x, y), w)| w * (x - y).abs())
        .sum()
}

/// Symmetric inverse-harmonic distance: weights are the `alpha`-blend of the
/// input-side and entry-side spacing weights, `alpha` in [0, 1].
pub fn lsf_inverse_harmonic_symmetric(input: &[f64], entry: &[f64], alpha: f64) -> f64 {
    assert_eq!(input.len(), entry.len(), "distance over mismatched lengths");
    let alpha = alpha.clamp(0.0, 1.0);
    let wi = inverse_harmonic_weights(input);
    let we = inverse_harmonic_weights(entry);
    input
        .iter()
        .zip(entry)
        .zip(wi.iter().zip(&we))
        .map(|((x, y), (a, b))| (alpha * a + (1.0 - alpha) * b) * (x - y).abs())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean() {
        assert!((euclidean(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-12);
        assert_eq!(euclidean(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_absolute_value() {
        assert!((absolute_value(&[0.0, 0.0], &[3.0, -4.0]) - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalized_euclidean_scales_by_variance() {
        let a = [1.0, 1.0];
        let b = [2.0, 2.0];
        // Unit variance reduces to Euclidean.
        assert!((normalized_euclidean(&a, &b, &[1.0, 1.0]) - euclidean(&a, &b)).abs() < 1e-12);
        // High-variance dimensions count less.
        assert!(
            normalized_euclidean(&a, &b, &[100.0, 100.0]) < normalized_euclidean(&a, &b, &[1.0, 1.0])
        );
    }

    #[test]
    fn test_mahalanobis_diag_unit_covariance_is_euclidean() {
        let a = [1.0, 2.0, 3.0];
        let b = [2.0, 0.0, 3.5];
        let d = mahalanobis_diag(&a, &b, &[1.0, 1.0, 1.0]);
        assert!((d - euclidean(&a, &b)).abs() < 1e-12);
    }

    #[test]
    fn test_inverse_harmonic_upweights_narrow_spacings() {
        // Two LSFs close together around index 0..1, wide elsewhere.
        let narrow = [1.00, 1.02, 2.5];
        let weights = inverse_harmonic_weights(&narrow);
        assert!(weights[0] > weights[2]);
        assert!(weights[1] > weights[2]);
    }

    #[test]
    fn test_inverse_harmonic_zero_on_identical() {
        let a = [0.4, 0.9, 1.7, 2.6];
        assert_eq!(lsf_inverse_harmonic(&a, &a), 0.0);
        assert_eq!(lsf_inverse_harmonic_symmetric(&a, &a, 0.5), 0.0);
    }

    #[test]
    fn test_symmetric_blends_sides() {
        let a = [0.5, 0.52, 2.0];
        let b = [0.5, 1.5, 2.0];
        // alpha=1 uses only the input-side weights, alpha=0 only the
        // entry-side ones; a differs from b in weighting, so the ends differ.
        let d1 = lsf_inverse_harmonic_symmetric(&a, &b, 1.0);
        let d0 = lsf_inverse_harmonic_symmetric(&a, &b, 0.0);
        assert!((d1 - lsf_inverse_harmonic(&a, &b)).abs() < 1e-12);
        assert!(d0 != d1);
    }
}
