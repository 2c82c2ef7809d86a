//! In-memory codebook container: paired speaker items plus the header.
//!
//! A [`Codebook`] is built once by the trainer, optionally filtered once by
//! the outlier eliminators, and then loaded read-only for the lifetime of a
//! synthesis session. It is `Send + Sync` and carries no interior
//! mutability, so a loaded codebook can be shared across matching threads
//! behind an `Arc` without locking.

use serde::{Deserialize, Serialize};

use crate::header::{CodebookHeader, VocalTractFeature};
use crate::types::{FeatureVector, VcError, VcResult};

/// One speaker's features for one aggregation unit (frame, frame group,
/// label, label group, or whole recording).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpeakerItem {
    /// Line spectral frequencies in radians. Empty = absent.
    pub lsf: FeatureVector,
    /// Mel cepstral coefficients. Empty = absent.
    pub mfcc: FeatureVector,
    /// Fundamental frequency in Hz (0 for unvoiced units).
    pub f0: f64,
    /// Unit duration in seconds.
    pub duration: f64,
    /// RMS energy.
    pub energy: f64,
    /// Phonetic label of the unit (may be empty).
    pub phoneme: String,
    /// Flattened window of neighbouring phonetic labels (may be empty).
    pub context: String,
}

impl SpeakerItem {
    /// The vector selected by the container's vocal tract feature.
    pub fn vocal_tract(&self, feature: VocalTractFeature) -> &[f64] {
        match feature {
            VocalTractFeature::Lsf => &self.lsf,
            VocalTractFeature::Mfcc => &self.mfcc,
        }
    }
}

/// The atomic unit of the learned mapping: one source item paired with one
/// target item. Both sides always exist together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodebookEntry {
    pub source: SpeakerItem,
    pub target: SpeakerItem,
}

impl CodebookEntry {
    pub fn new(source: SpeakerItem, target: SpeakerItem) -> Self {
        Self { source, target }
    }

    fn item(&self, side: Side) -> &SpeakerItem {
        match side {
            Side::Source => &self.source,
            Side::Target => &self.target,
        }
    }
}

/// Which side of an entry a computation looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Source,
    Target,
}

/// A feature channel the outlier eliminators can inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureChannel {
    /// The vocal tract vector (LSF or MFCC per the header).
    VocalTract,
    F0,
    Energy,
    Duration,
}

/// An ordered codebook container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Codebook {
    pub header: CodebookHeader,
    pub entries: Vec<CodebookEntry>,
}

impl Codebook {
    pub fn new(header: CodebookHeader, entries: Vec<CodebookEntry>) -> Self {
        Self { header, entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks the container invariants: the entry count matches the header
    /// and every item's vector lengths agree with the header dimensions.
    pub fn validate(&self) -> VcResult<()> {
        if self.entries.len() != self.header.total_entries as usize {
            return Err(VcError::dims(
                "codebook entry count vs header",
                self.header.total_entries as usize,
                self.entries.len(),
            ));
        }
        let lp = self.header.lsf_params.lp_order as usize;
        let mfcc = self.header.mfcc_params.dimension as usize;
        for (i, entry) in self.entries.iter().enumerate() {
            for (side, item) in [("source", &entry.source), ("target", &entry.target)] {
                if item.lsf.len() != lp {
                    return Err(VcError::dims(format!("entry {i} {side} lsf"), lp, item.lsf.len()));
                }
                if item.mfcc.len() != mfcc {
                    return Err(VcError::dims(
                        format!("entry {i} {side} mfcc"),
                        mfcc,
                        item.mfcc.len(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Collects one row per entry over the given channels, concatenated in
    /// the order given. Scalar channels contribute one element; the vocal
    /// tract channel contributes the full vector. This is what the outlier
    /// eliminators cluster and threshold against.
    pub fn feature_rows(&self, side: Side, channels: &[FeatureChannel]) -> Vec<FeatureVector> {
        let feature = self.header.vocal_tract_feature;
        self.entries
            .iter()
            .map(|entry| {
                let item = entry.item(side);
                let mut row = Vec::new();
                for channel in channels {
                    match channel {
                        FeatureChannel::VocalTract => {
                            row.extend_from_slice(item.vocal_tract(feature))
                        }
                        FeatureChannel::F0 => row.push(item.f0),
                        FeatureChannel::Energy => row.push(item.energy),
                        FeatureChannel::Duration => row.push(item.duration),
                    }
                }
                row
            })
            .collect()
    }

    /// Returns a new codebook keeping the entries whose index satisfies the
    /// predicate, in their original order, with the header count updated.
    pub fn retain_indices(&self, keep: impl Fn(usize) -> bool) -> Codebook {
        let entries: Vec<CodebookEntry> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(i, _)| keep(*i))
            .map(|(_, e)| e.clone())
            .collect();
        let mut header = self.header.clone();
        header.total_entries = entries.len() as u32;
        Codebook { header, entries }
    }
}
