//! Feature streams consumed by the engine.
//!
//! Acoustic analysis itself (LSF/MFCC extraction, pitch tracking, energy
//! analysis, label alignment) happens outside this crate; these types carry
//! its results. A [`FeatureTrack`] is a uniform frame matrix with its
//! analysis window/hop metadata, a [`ContourTrack`] is a scalar contour
//! (F0, RMS energy) with its own hop, and a [`LabelTrack`] is an EST-style
//! sequence of end-timed phonetic labels. Tracks with different hop sizes
//! are related by proportional index mapping ([`linear_map_index`]).

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::index_map::IndexMap;
use crate::types::{VcError, VcResult};

const TRACK_MAGIC: [u8; 4] = *b"VMFT";
const TRACK_VERSION: u32 = 1;

/// Proportionally map an index from one track's frame axis onto another's.
///
/// `linear_map_index(i, n, m)` maps `[0, n-1]` onto `[0, m-1]` with rounding,
/// clamping out-of-range inputs. Both track lengths must be non-zero for a
/// meaningful result; empty targets map to 0.
pub fn linear_map_index(index: usize, from_len: usize, to_len: usize) -> usize {
    if from_len <= 1 || to_len == 0 {
        return 0;
    }
    let i = index.min(from_len - 1);
    let mapped = (i as f64) * ((to_len - 1) as f64) / ((from_len - 1) as f64);
    (mapped + 0.5).floor() as usize
}

/// A uniform matrix of feature frames (LSF or MFCC) with analysis metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTrack {
    pub frames: Vec<Vec<f64>>,
    pub sampling_rate_hz: u32,
    pub window_size_s: f64,
    pub skip_size_s: f64,
}

impl FeatureTrack {
    /// Build a track, enforcing uniform frame length.
    pub fn new(
        frames: Vec<Vec<f64>>,
        sampling_rate_hz: u32,
        window_size_s: f64,
        skip_size_s: f64,
    ) -> VcResult<Self> {
        if let Some(first) = frames.first() {
            let dim = first.len();
            for (i, frame) in frames.iter().enumerate() {
                if frame.len() != dim {
                    return Err(VcError::dims(format!("feature track frame {i}"), dim, frame.len()));
                }
            }
        }
        Ok(Self {
            frames,
            sampling_rate_hz,
            window_size_s,
            skip_size_s,
        })
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Frame vector length (0 for an empty track).
    pub fn dimension(&self) -> usize {
        self.frames.first().map_or(0, Vec::len)
    }

    /// Midpoint time of the given frame in seconds.
    pub fn frame_time_s(&self, frame: usize) -> f64 {
        frame as f64 * self.skip_size_s + 0.5 * self.window_size_s
    }

    /// Write the track as `VMFT` little-endian binary. Also the storage
    /// layout of the smoothed vocal tract artifact.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> VcResult<()> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(&TRACK_MAGIC)?;
        file.write_all(&TRACK_VERSION.to_le_bytes())?;
        file.write_all(&(self.frames.len() as u32).to_le_bytes())?;
        file.write_all(&(self.dimension() as u32).to_le_bytes())?;
        file.write_all(&self.sampling_rate_hz.to_le_bytes())?;
        file.write_all(&self.window_size_s.to_le_bytes())?;
        file.write_all(&self.skip_size_s.to_le_bytes())?;
        for frame in &self.frames {
            for &v in frame {
                file.write_all(&v.to_le_bytes())?;
            }
        }
        file.flush()?;
        Ok(())
    }

    /// Read a track written by [`Self::write_to_file`].
    pub fn read_from_file(path: impl AsRef<Path>) -> VcResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(VcError::MissingResource {
                file: path.to_path_buf(),
                what: "feature track not found".into(),
            });
        }
        let mut file = BufReader::new(File::open(path)?);
        let corrupt = |offset: u64, what: &str| VcError::corrupt(path, offset, what);

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)
            .map_err(|_| corrupt(0, "file too short for magic"))?;
        if magic != TRACK_MAGIC {
            return Err(corrupt(0, "bad magic; not a feature track"));
        }
        let mut b4 = [0u8; 4];
        let mut read_u32 = |file: &mut BufReader<File>, off: u64, what: &str| -> VcResult<u32> {
            file.read_exact(&mut b4)
                .map_err(|_| VcError::corrupt(path, off, what))?;
            Ok(u32::from_le_bytes(b4))
        };
        let version = read_u32(&mut file, 4, "missing version")?;
        if version != TRACK_VERSION {
            return Err(corrupt(4, "unsupported feature track version"));
        }
        let num_frames = read_u32(&mut file, 8, "missing frame count")? as usize;
        let dimension = read_u32(&mut file, 12, "missing dimension")? as usize;
        let sampling_rate_hz = read_u32(&mut file, 16, "missing sampling rate")?;

        let mut b8 = [0u8; 8];
        let mut read_f64 = |file: &mut BufReader<File>, what: &str| -> VcResult<f64> {
            file.read_exact(&mut b8)
                .map_err(|_| VcError::corrupt(path, 20, what))?;
            Ok(f64::from_le_bytes(b8))
        };
        let window_size_s = read_f64(&mut file, "missing window size")?;
        let skip_size_s = read_f64(&mut file, "missing skip size")?;

        let mut frames = Vec::with_capacity(num_frames);
        let mut buf = vec![0u8; dimension * 8];
        for i in 0..num_frames {
            file.read_exact(&mut buf)
                .map_err(|_| corrupt(36 + (i * dimension * 8) as u64, "truncated frame data"))?;
            let frame: Vec<f64> = buf
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect();
            frames.push(frame);
        }
        Ok(Self {
            frames,
            sampling_rate_hz,
            window_size_s,
            skip_size_s,
        })
    }
}

/// A scalar contour (F0 in Hz, or RMS energy) with its own analysis hop.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContourTrack {
    pub values: Vec<f64>,
    pub window_size_s: f64,
    pub skip_size_s: f64,
}

impl ContourTrack {
    pub fn new(values: Vec<f64>, window_size_s: f64, skip_size_s: f64) -> Self {
        Self {
            values,
            window_size_s,
            skip_size_s,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at the contour position corresponding to frame `index` of a
    /// track with `from_len` frames. Returns 0.0 for an empty contour.
    pub fn value_at_mapped(&self, index: usize, from_len: usize) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values[linear_map_index(index, from_len, self.values.len())]
    }
}

/// One phonetic label with its end time (EST label convention: a label spans
/// from the previous label's end to its own end).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub end_time_s: f64,
    pub phoneme: String,
}

/// Ordered label sequence for one recording.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelTrack {
    pub items: Vec<Label>,
}

impl LabelTrack {
    pub fn new(items: Vec<Label>) -> Self {
        Self { items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Index of the label containing the midpoint of the given analysis
    /// frame, or `None` for an empty track. Times past the last label clamp
    /// to the final label.
    pub fn label_at_frame(&self, frame: usize, window_size_s: f64, skip_size_s: f64) -> Option<usize> {
        if self.items.is_empty() {
            return None;
        }
        let t = frame as f64 * skip_size_s + 0.5 * window_size_s;
        let idx = self
            .items
            .iter()
            .position(|l| t < l.end_time_s)
            .unwrap_or(self.items.len() - 1);
        Some(idx)
    }

    /// Duration of the given label in seconds.
    pub fn label_duration_s(&self, index: usize) -> f64 {
        if index == 0 {
            self.items[0].end_time_s
        } else {
            self.items[index].end_time_s - self.items[index - 1].end_time_s
        }
    }
}

/// All feature streams of one recording of one speaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerData {
    /// LSF or MFCC frame matrix, matching the codebook's vocal tract feature.
    pub vocal_tract: FeatureTrack,
    /// F0 contour in Hz (0 where unvoiced).
    pub f0: ContourTrack,
    /// RMS energy contour.
    pub energy: ContourTrack,
    /// Phonetic labels.
    pub labels: LabelTrack,
}

/// One aligned training unit: both recordings plus their correspondence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPair {
    pub source: SpeakerData,
    pub target: SpeakerData,
    pub index_map: IndexMap,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_map_index() {
        assert_eq!(linear_map_index(0, 10, 5), 0);
        assert_eq!(linear_map_index(9, 10, 5), 4);
        assert_eq!(linear_map_index(4, 10, 5), 2);
        // Degenerate axes.
        assert_eq!(linear_map_index(3, 1, 5), 0);
        assert_eq!(linear_map_index(3, 10, 0), 0);
        // Out-of-range input clamps.
        assert_eq!(linear_map_index(99, 10, 5), 4);
    }

    #[test]
    fn test_feature_track_uniform_rows() {
        let ok = FeatureTrack::new(vec![vec![1.0, 2.0], vec![3.0, 4.0]], 16_000, 0.02, 0.01);
        assert!(ok.is_ok());
        let bad = FeatureTrack::new(vec![vec![1.0, 2.0], vec![3.0]], 16_000, 0.02, 0.01);
        assert!(bad.is_err());
    }

    #[test]
    fn test_feature_track_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.vmft");
        let track =
            FeatureTrack::new(vec![vec![0.25, -1.5], vec![3.0, 4.0]], 8_000, 0.02, 0.01).unwrap();
        track.write_to_file(&path).unwrap();
        let loaded = FeatureTrack::read_from_file(&path).unwrap();
        assert_eq!(loaded, track);
    }

    #[test]
    fn test_contour_mapping() {
        let contour = ContourTrack::new(vec![100.0, 110.0, 120.0], 0.04, 0.005);
        // Frame axis of length 6 maps its ends onto the contour's ends.
        assert_eq!(contour.value_at_mapped(0, 6), 100.0);
        assert_eq!(contour.value_at_mapped(5, 6), 120.0);
        assert_eq!(ContourTrack::default().value_at_mapped(2, 6), 0.0);
    }

    #[test]
    fn test_label_lookup_and_duration() {
        let labels = LabelTrack::new(vec![
            Label { end_time_s: 0.10, phoneme: "sil".into() },
            Label { end_time_s: 0.25, phoneme: "a".into() },
            Label { end_time_s: 0.40, phoneme: "t".into() },
        ]);
        // 10 ms hop, 20 ms window: frame 0 midpoint at 10 ms -> "sil".
        assert_eq!(labels.label_at_frame(0, 0.02, 0.01), Some(0));
        // Frame 14 midpoint at 150 ms -> "a".
        assert_eq!(labels.label_at_frame(14, 0.02, 0.01), Some(1));
        // Way past the end clamps to the last label.
        assert_eq!(labels.label_at_frame(500, 0.02, 0.01), Some(2));
        assert!((labels.label_duration_s(0) - 0.10).abs() < 1e-12);
        assert!((labels.label_duration_s(1) - 0.15).abs() < 1e-12);
    }
}
