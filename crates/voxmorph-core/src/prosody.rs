//! Prosody scale factors and pitch transformation.
//!
//! The orchestrator's contract toward the external resynthesizer includes
//! four per-frame scale factors: pitch (`pscale`), time (`tscale`), energy
//! (`escale`), and vocal tract (`vscale`). Per-utterance scale arrays are
//! spread proportionally over the frame axis; pitch scales can instead be
//! derived from source/target pitch statistics supplied by the external
//! prosody model.

use serde::{Deserialize, Serialize};

use crate::features::linear_map_index;

/// Pitch scale clamp range, matching the resynthesizer's working range.
pub const MIN_PSCALE: f64 = 0.1;
pub const MAX_PSCALE: f64 = 5.0;

/// Below this F0 a frame counts as unvoiced and keeps identity pitch scale.
const VOICING_THRESHOLD_HZ: f64 = 10.0;

/// Per-frame modification factors handed to the resynthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleFactors {
    /// Pitch scale (output F0 / input F0).
    pub pscale: f64,
    /// Time scale (output duration / input duration).
    pub tscale: f64,
    /// Energy scale.
    pub escale: f64,
    /// Vocal tract spectrum warp scale.
    pub vscale: f64,
}

impl Default for ScaleFactors {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl ScaleFactors {
    pub const IDENTITY: ScaleFactors = ScaleFactors {
        pscale: 1.0,
        tscale: 1.0,
        escale: 1.0,
        vscale: 1.0,
    };

    pub fn is_identity(&self) -> bool {
        self.pscale == 1.0 && self.tscale == 1.0 && self.escale == 1.0 && self.vscale == 1.0
    }
}

/// Spread a per-utterance scale array proportionally across `num_frames`
/// frames. An empty array means identity everywhere.
pub fn spread_scales(values: &[f64], num_frames: usize) -> Vec<f64> {
    if values.is_empty() {
        return vec![1.0; num_frames];
    }
    (0..num_frames)
        .map(|i| values[linear_map_index(i, num_frames, values.len())])
        .collect()
}

/// Global pitch statistics of one speaker, supplied by the external prosody
/// model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchStatistics {
    pub mean_hz: f64,
    pub std_hz: f64,
}

impl Default for PitchStatistics {
    fn default() -> Self {
        Self {
            mean_hz: 120.0,
            std_hz: 20.0,
        }
    }
}

/// How per-frame pitch scales are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PitchTransformMethod {
    /// No pitch transformation; pscale stays identity.
    #[default]
    None,
    /// Use the configured pscale array as-is.
    ScaleArray,
    /// Additive mean shift: `f0' = f0 + (mean_t - mean_s)`.
    Mean,
    /// Mean and standard deviation mapping:
    /// `f0' = mean_t + (f0 - mean_s) * std_t / std_s`.
    MeanStdDev,
    /// Multiplicative mean ratio: `f0' = f0 * mean_t / mean_s`.
    Range,
}

/// Derives per-frame pitch scales from F0 values and speaker statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchTransformer {
    pub method: PitchTransformMethod,
    pub source: PitchStatistics,
    pub target: PitchStatistics,
}

impl PitchTransformer {
    pub fn new(
        method: PitchTransformMethod,
        source: PitchStatistics,
        target: PitchStatistics,
    ) -> Self {
        Self {
            method,
            source,
            target,
        }
    }

    /// Pitch scale for one frame. `array_scale` is the frame's value from
    /// the spread pscale array; unvoiced frames always keep identity.
    pub fn pscale_for(&self, f0_hz: f64, array_scale: f64) -> f64 {
        if f0_hz <= VOICING_THRESHOLD_HZ {
            return 1.0;
        }
        let target_f0 = match self.method {
            PitchTransformMethod::None => return 1.0,
            PitchTransformMethod::ScaleArray => f0_hz * array_scale,
            PitchTransformMethod::Mean => f0_hz + (self.target.mean_hz - self.source.mean_hz),
            PitchTransformMethod::MeanStdDev => {
                let spread = if self.source.std_hz > 0.0 {
                    self.target.std_hz / self.source.std_hz
                } else {
                    1.0
                };
                self.target.mean_hz + (f0_hz - self.source.mean_hz) * spread
            }
            PitchTransformMethod::Range => {
                if self.source.mean_hz > 0.0 {
                    f0_hz * self.target.mean_hz / self.source.mean_hz
                } else {
                    f0_hz
                }
            }
        };
        (target_f0 / f0_hz).clamp(MIN_PSCALE, MAX_PSCALE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        assert!(ScaleFactors::IDENTITY.is_identity());
        let warped = ScaleFactors {
            pscale: 1.2,
            ..ScaleFactors::IDENTITY
        };
        assert!(!warped.is_identity());
    }

    #[test]
    fn test_spread_scales() {
        assert_eq!(spread_scales(&[], 3), vec![1.0, 1.0, 1.0]);
        assert_eq!(spread_scales(&[2.0], 3), vec![2.0, 2.0, 2.0]);
        // Two values over four frames: first half / second half.
        assert_eq!(spread_scales(&[0.5, 2.0], 4), vec![0.5, 0.5, 2.0, 2.0]);
    }

    #[test]
    fn test_unvoiced_frames_keep_identity() {
        let t = PitchTransformer::new(
            PitchTransformMethod::MeanStdDev,
            PitchStatistics { mean_hz: 100.0, std_hz: 10.0 },
            PitchStatistics { mean_hz: 200.0, std_hz: 30.0 },
        );
        assert_eq!(t.pscale_for(0.0, 2.0), 1.0);
        assert_eq!(t.pscale_for(5.0, 2.0), 1.0);
    }

    #[test]
    fn test_mean_shift() {
        let t = PitchTransformer::new(
            PitchTransformMethod::Mean,
            PitchStatistics { mean_hz: 100.0, std_hz: 10.0 },
            PitchStatistics { mean_hz: 150.0, std_hz: 10.0 },
        );
        // f0 100 -> 150, pscale 1.5
        assert!((t.pscale_for(100.0, 1.0) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_mean_stddev_mapping() {
        let t = PitchTransformer::new(
            PitchTransformMethod::MeanStdDev,
            PitchStatistics { mean_hz: 100.0, std_hz: 10.0 },
            PitchStatistics { mean_hz: 200.0, std_hz: 20.0 },
        );
        // f0 = mean_s + 1 sigma -> mean_t + 1 sigma_t = 220, pscale 2.0
        assert!((t.pscale_for(110.0, 1.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_pscale_clamped() {
        let t = PitchTransformer::new(
            PitchTransformMethod::Range,
            PitchStatistics { mean_hz: 10.0, std_hz: 1.0 },
            PitchStatistics { mean_hz: 1000.0, std_hz: 1.0 },
        );
        assert_eq!(t.pscale_for(100.0, 1.0), MAX_PSCALE);
    }

    #[test]
    fn test_scale_array_method() {
        let t = PitchTransformer::new(
            PitchTransformMethod::ScaleArray,
            PitchStatistics::default(),
            PitchStatistics::default(),
        );
        assert!((t.pscale_for(100.0, 1.25) - 1.25).abs() < 1e-12);
    }
}
