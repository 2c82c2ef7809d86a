//! Line Spectral Frequency utilities.
//!
//! The codebook stores spectral envelopes as LSF vectors in radians,
//! ascending in the open band (0, π). This module converts between LSFs and
//! LPC coefficients and evaluates the spectral envelope an LSF vector
//! describes, which is what the transformation orchestrator hands to the
//! resynthesizer alongside the scale factors.
//!
//! # Example
//!
//! ```
//! use voxmorph_core::lsf::{lpc_to_lsf, lsf_to_lpc};
//!
//! let lpc = vec![-0.9, 0.4, -0.1];
//! let lsfs = lpc_to_lsf(&lpc);
//! assert_eq!(lsfs.len(), 3);
//! let back = lsf_to_lpc(&lsfs);
//! assert_eq!(back.len(), 3);
//! ```

use num_complex::Complex64;
use std::f64::consts::PI;

use crate::types::{VcError, VcResult};

/// Grid resolution for root search on the unit circle.
const NUM_GRID_POINTS: usize = 1024;

/// Checks that an LSF vector is strictly ascending inside (0, π).
pub fn validate_lsf(lsf: &[f64]) -> VcResult<()> {
    let mut prev = 0.0;
    for (i, &v) in lsf.iter().enumerate() {
        if !v.is_finite() || v <= prev || v >= PI {
            return Err(VcError::InvalidInput(format!(
                "lsf[{i}] = {v} breaks the ascending (0, \u{3c0}) ordering"
            )));
        }
        prev = v;
    }
    Ok(())
}

/// Convert LPC coefficients `a_1..a_p` to Line Spectral Frequencies.
///
/// LSFs are the angular positions of the roots of the symmetric and
/// antisymmetric polynomials derived from the LPC polynomial, located by
/// sign-change search on a fixed grid with linear interpolation.
pub fn lpc_to_lsf(lpc: &[f64]) -> Vec<f64> {
    let p = lpc.len();
    if p == 0 {
        return vec![];
    }

    // A(z) polynomial: 1, a1, ..., ap
    let mut a = Vec::with_capacity(p + 1);
    a.push(1.0);
    a.extend_from_slice(lpc);

    // P(z) = A(z) + z^{-(p+1)} A(z^{-1}), Q(z) = A(z) - z^{-(p+1)} A(z^{-1})
    let mut p_poly = vec![0.0; p + 1];
    let mut q_poly = vec![0.0; p + 1];
    for i in 0..=p {
        p_poly[i] = a[i] + a[p - i];
        q_poly[i] = a[i] - a[p - i];
    }

    let mut lsfs = Vec::with_capacity(p);
    for poly in [&p_poly, &q_poly] {
        let mut prev_val = eval_cos_poly(poly, 0.0);
        for k in 1..=NUM_GRID_POINTS {
            let omega = PI * k as f64 / NUM_GRID_POINTS as f64;
            let val = eval_cos_poly(poly, omega);
            if prev_val * val < 0.0 {
                let omega_prev = PI * (k - 1) as f64 / NUM_GRID_POINTS as f64;
                let root = omega_prev
                    + (omega - omega_prev) * prev_val.abs() / (prev_val.abs() + val.abs());
                lsfs.push(root);
            }
            prev_val = val;
        }
    }

    lsfs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    lsfs.truncate(p);

    // Pad with evenly spaced lines if the grid search found fewer than p.
    while lsfs.len() < p {
        let idx = lsfs.len();
        lsfs.push((idx + 1) as f64 * PI / (p + 1) as f64);
    }

    lsfs
}

/// Evaluate `sum_k c_k cos(k omega)`.
fn eval_cos_poly(coeffs: &[f64], omega: f64) -> f64 {
    coeffs
        .iter()
        .enumerate()
        .map(|(k, &c)| c * (k as f64 * omega).cos())
        .sum()
}

/// Convert Line Spectral Frequencies back to LPC coefficients `a_1..a_p`.
pub fn lsf_to_lpc(lsfs: &[f64]) -> Vec<f64> {
    let p = lsfs.len();
    if p == 0 {
        return vec![];
    }

    // Alternate lines between the symmetric and antisymmetric groups.
    let mut p_roots = Vec::new();
    let mut q_roots = Vec::new();
    for (i, &lsf) in lsfs.iter().enumerate() {
        if i % 2 == 0 {
            p_roots.push(lsf);
        } else {
            q_roots.push(lsf);
        }
    }

    let p_poly = roots_to_poly(&p_roots);
    let q_poly = roots_to_poly(&q_roots);

    // A(z) = 0.5 (P(z) + Q(z))
    let n = p + 1;
    let mut a = vec![0.0; n];
    for (i, v) in a.iter_mut().enumerate() {
        let pv = p_poly.get(i).copied().unwrap_or(0.0);
        let qv = q_poly.get(i).copied().unwrap_or(0.0);
        *v = 0.5 * (pv + qv);
    }

    a[1..].to_vec()
}

/// Build a polynomial from angular roots on the unit circle; each root at
/// angle `omega` contributes the factor `1 - 2 cos(omega) z^-1 + z^-2`.
fn roots_to_poly(roots: &[f64]) -> Vec<f64> {
    let mut poly = vec![1.0];
    for &root in roots {
        let b0 = -2.0 * root.cos();
        let mut next = vec![0.0; poly.len() + 2];
        for (i, &c) in poly.iter().enumerate() {
            next[i] += c;
            next[i + 1] += c * b0;
            next[i + 2] += c;
        }
        poly = next;
    }
    poly
}

/// Evaluate the spectral envelope `20 log10 (1 / |A(e^{j omega})|)` of an
/// LSF vector on `num_points` equally spaced frequencies from 0 to the
/// Nyquist frequency.
pub fn envelope_db(lsf: &[f64], num_points: usize) -> Vec<f64> {
    let lpc = lsf_to_lpc(lsf);
    (0..num_points)
        .map(|k| {
            let omega = PI * k as f64 / num_points.max(1) as f64;
            let z = Complex64::from_polar(1.0, -omega);
            // A(z) = 1 + sum_k a_k z^-k
            let mut a = Complex64::new(1.0, 0.0);
            let mut zk = Complex64::new(1.0, 0.0);
            for &coef in &lpc {
                zk *= z;
                a += coef * zk;
            }
            let mag = a.norm().max(1e-12);
            -20.0 * mag.log10()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_lsf() {
        assert!(validate_lsf(&[0.3, 0.9, 1.5, 2.8]).is_ok());
        assert!(validate_lsf(&[0.9, 0.3]).is_err()); // not ascending
        assert!(validate_lsf(&[0.0, 1.0]).is_err()); // touches the band edge
        assert!(validate_lsf(&[0.5, PI]).is_err());
    }

    #[test]
    fn test_lpc_to_lsf_locates_a_resonance() {
        // Second-order resonator at theta = 1.0 rad, radius 0.9:
        // A(z) = 1 - 2 r cos(theta) z^-1 + r^2 z^-2.
        let r: f64 = 0.9;
        let theta: f64 = 1.0;
        let lpc = vec![-2.0 * r * theta.cos(), r * r];
        let lsfs = lpc_to_lsf(&lpc);
        assert_eq!(lsfs.len(), 2);
        assert!(validate_lsf(&lsfs).is_ok());
        // The lower line sits on the resonance frequency.
        assert!((lsfs[0] - theta).abs() < 0.1, "lines: {lsfs:?}");
    }

    #[test]
    fn test_lsf_to_lpc_shape() {
        let lsfs = [0.5, 1.0, 1.5, 2.0];
        let lpc = lsf_to_lpc(&lsfs);
        assert_eq!(lpc.len(), 4);
        assert!(lpc.iter().all(|c| c.is_finite() && c.abs() < 10.0));
    }

    #[test]
    fn test_envelope_peaks_near_narrow_lines() {
        // Two nearly coincident lines act like a formant: the envelope
        // should peak near their frequency.
        let lsf = [0.8, 0.85, 1.9, 2.6];
        let env = envelope_db(&lsf, 256);
        let peak_bin = env
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        let peak_omega = PI * peak_bin as f64 / 256.0;
        assert!((peak_omega - 0.825).abs() < 0.3, "peak at {peak_omega}");
    }

    #[test]
    fn test_empty_input() {
        assert!(lpc_to_lsf(&[]).is_empty());
        assert!(lsf_to_lpc(&[]).is_empty());
    }
}
