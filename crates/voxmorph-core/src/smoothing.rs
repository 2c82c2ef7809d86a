//! Temporal smoothing of the matched vocal tract filters.
//!
//! Smoothing needs two passes over an utterance. Pass A
//! ([`SmoothingState::EstimatingSmoothedVocalTract`]) runs the matcher on
//! every frame, averages the matched filters over a ±N frame neighbourhood,
//! and persists the result as a [`SmoothedVocalTract`] artifact. Pass B
//! ([`SmoothingState::TransformingToSmoothedVocalTract`]) re-reads the
//! artifact and applies the smoothed filter instead of the per-frame match.
//!
//! The artifact is an explicit, documented intermediate (stored in the
//! [`FeatureTrack`] binary layout): pass B treats a missing artifact as a
//! hard precondition failure, never as something to retry.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::features::FeatureTrack;
use crate::types::{FeatureVector, VcError, VcResult};

/// Where a transformation pass stands with respect to smoothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SmoothingState {
    /// Pass A: estimate and persist the smoothed filters; no transformation
    /// output is kept.
    EstimatingSmoothedVocalTract,
    /// Pass B: apply the previously persisted smoothed filters.
    TransformingToSmoothedVocalTract,
    /// Smoothing disabled.
    #[default]
    None,
}

/// The persisted per-frame smoothed vocal tract filters of one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedVocalTract {
    track: FeatureTrack,
}

impl SmoothedVocalTract {
    /// Moving-average the per-frame matched filters over an inclusive
    /// ±`num_neighbours` window, clipped at the utterance edges.
    pub fn from_matched_filters(
        filters: &[FeatureVector],
        num_neighbours: usize,
        window_size_s: f64,
        skip_size_s: f64,
        sampling_rate_hz: u32,
    ) -> VcResult<Self> {
        let n = filters.len();
        let mut smoothed = Vec::with_capacity(n);
        for i in 0..n {
            let lo = i.saturating_sub(num_neighbours);
            let hi = (i + num_neighbours).min(n.saturating_sub(1));
            let dim = filters[i].len();
            let mut mean = vec![0.0; dim];
            for frame in &filters[lo..=hi] {
                if frame.len() != dim {
                    return Err(VcError::dims("smoothing filter frame", dim, frame.len()));
                }
                for (m, v) in mean.iter_mut().zip(frame) {
                    *m += v;
                }
            }
            let count = (hi - lo + 1) as f64;
            for m in mean.iter_mut() {
                *m /= count;
            }
            smoothed.push(mean);
        }
        Ok(Self {
            track: FeatureTrack::new(smoothed, sampling_rate_hz, window_size_s, skip_size_s)?,
        })
    }

    /// Persist the artifact for pass B.
    pub fn save(&self, path: impl AsRef<Path>) -> VcResult<()> {
        self.track.write_to_file(path)
    }

    /// Load a previously persisted artifact. A missing file is a
    /// [`VcError::MissingResource`]: pass A has not run (or wrote
    /// elsewhere), which the caller must treat as a protocol violation.
    pub fn load(path: impl AsRef<Path>) -> VcResult<Self> {
        Ok(Self {
            track: FeatureTrack::read_from_file(path)?,
        })
    }

    pub fn num_frames(&self) -> usize {
        self.track.num_frames()
    }

    /// Smoothed filter for the given frame; indexes past the end clamp to
    /// the final frame.
    pub fn filter_at(&self, frame: usize) -> &[f64] {
        let idx = frame.min(self.track.num_frames().saturating_sub(1));
        &self.track.frames[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moving_average_with_edges() {
        let filters = vec![
            vec![0.0, 0.0],
            vec![3.0, 6.0],
            vec![6.0, 12.0],
            vec![9.0, 18.0],
        ];
        let smoothed =
            SmoothedVocalTract::from_matched_filters(&filters, 1, 0.02, 0.01, 16_000).unwrap();
        // Interior frame 1 averages frames 0..2.
        assert_eq!(smoothed.filter_at(1), &[3.0, 6.0]);
        // Edge frame 0 averages frames 0..1 only.
        assert_eq!(smoothed.filter_at(0), &[1.5, 3.0]);
        // Past-the-end clamps.
        assert_eq!(smoothed.filter_at(99), smoothed.filter_at(3));
    }

    #[test]
    fn test_zero_neighbours_is_identity() {
        let filters = vec![vec![1.0], vec![2.0], vec![5.0]];
        let smoothed =
            SmoothedVocalTract::from_matched_filters(&filters, 0, 0.02, 0.01, 16_000).unwrap();
        for (i, f) in filters.iter().enumerate() {
            assert_eq!(smoothed.filter_at(i), &f[..]);
        }
    }

    #[test]
    fn test_artifact_round_trip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utt01.vmft");
        let filters = vec![vec![0.5, 1.5], vec![0.6, 1.4]];
        let smoothed =
            SmoothedVocalTract::from_matched_filters(&filters, 1, 0.02, 0.01, 16_000).unwrap();
        smoothed.save(&path).unwrap();
        let loaded = SmoothedVocalTract::load(&path).unwrap();
        assert_eq!(loaded, smoothed);

        let err = SmoothedVocalTract::load(dir.path().join("absent.vmft")).unwrap_err();
        assert!(matches!(err, VcError::MissingResource { .. }));
    }
}
