//! Codebook header: aggregation granularity, speaker tags, and the analysis
//! parameters the stored feature vectors were extracted with.
//!
//! The header is fixed when a container is created. In particular the LSF
//! order and MFCC dimension are decided once, through
//! [`CodebookHeaderBuilder`], and every entry appended later must agree with
//! them; the trainer aborts with a dimension-mismatch error otherwise. This
//! replaces the hazard of dimensions being silently overwritten by whichever
//! training file happens to be processed first.
//!
//! # Example
//!
//! ```
//! use voxmorph_core::header::{CodebookHeaderBuilder, CodebookType, VocalTractFeature};
//!
//! let header = CodebookHeaderBuilder::new(CodebookType::FrameGroups)
//!     .source_tag("neutral")
//!     .target_tag("angry")
//!     .lp_order(20)
//!     .sampling_rate_hz(16_000)
//!     .num_neighbours_in_frame_groups(3)
//!     .build();
//!
//! assert_eq!(header.codebook_type, CodebookType::FrameGroups);
//! assert_eq!(header.vocal_tract_feature, VocalTractFeature::Lsf);
//! assert_eq!(header.lsf_params.lp_order, 20);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregation granularity of the codebook entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodebookType {
    /// One entry per raw aligned frame pair.
    Frames,
    /// One entry per fixed-size neighbourhood of frames around each unit.
    FrameGroups,
    /// One entry per phonetic label span.
    Labels,
    /// Same aggregation as `Labels`; entries are later interpreted as
    /// label-group statistics.
    LabelGroups,
    /// One entry per recording pair: the global spectral offset.
    Speech,
}

impl CodebookType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Frames),
            1 => Some(Self::FrameGroups),
            2 => Some(Self::Labels),
            3 => Some(Self::LabelGroups),
            4 => Some(Self::Speech),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            Self::Frames => 0,
            Self::FrameGroups => 1,
            Self::Labels => 2,
            Self::LabelGroups => 3,
            Self::Speech => 4,
        }
    }
}

impl fmt::Display for CodebookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Frames => "frames",
            Self::FrameGroups => "frame-groups",
            Self::Labels => "labels",
            Self::LabelGroups => "label-groups",
            Self::Speech => "speech",
        };
        write!(f, "{s}")
    }
}

/// Which spectral-envelope representation a container stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VocalTractFeature {
    /// Line Spectral Frequencies.
    #[default]
    Lsf,
    /// Mel-frequency cepstral coefficients.
    Mfcc,
}

impl VocalTractFeature {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Lsf),
            1 => Some(Self::Mfcc),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            Self::Lsf => 0,
            Self::Mfcc => 1,
        }
    }
}

/// LSF analysis parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LsfParams {
    /// Sampling rate of the analysed audio in Hz.
    pub sampling_rate_hz: u32,
    /// Linear prediction order; also the LSF vector length. 0 = LSFs absent.
    pub lp_order: u32,
    /// Analysis window length in seconds.
    pub window_size_s: f64,
    /// Analysis hop in seconds.
    pub skip_size_s: f64,
}

impl Default for LsfParams {
    fn default() -> Self {
        Self {
            sampling_rate_hz: 16_000,
            lp_order: 0,
            window_size_s: 0.020,
            skip_size_s: 0.010,
        }
    }
}

/// Pitch analysis parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchParams {
    pub sampling_rate_hz: u32,
    pub window_size_s: f64,
    pub skip_size_s: f64,
    /// Lowest F0 the tracker reports, in Hz.
    pub f0_min_hz: f64,
    /// Highest F0 the tracker reports, in Hz.
    pub f0_max_hz: f64,
}

impl Default for PitchParams {
    fn default() -> Self {
        Self {
            sampling_rate_hz: 16_000,
            window_size_s: 0.040,
            skip_size_s: 0.005,
            f0_min_hz: 40.0,
            f0_max_hz: 400.0,
        }
    }
}

/// RMS energy analysis parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyParams {
    pub window_size_s: f64,
    pub skip_size_s: f64,
}

impl Default for EnergyParams {
    fn default() -> Self {
        Self {
            window_size_s: 0.020,
            skip_size_s: 0.010,
        }
    }
}

/// MFCC analysis parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MfccParams {
    pub sampling_rate_hz: u32,
    /// Cepstral vector length. 0 = MFCCs absent.
    pub dimension: u32,
    pub window_size_s: f64,
    pub skip_size_s: f64,
}

impl Default for MfccParams {
    fn default() -> Self {
        Self {
            sampling_rate_hz: 16_000,
            dimension: 0,
            window_size_s: 0.020,
            skip_size_s: 0.010,
        }
    }
}

/// Fixed-layout header of a codebook container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodebookHeader {
    /// Number of entries in the container. Authoritative once the writer has
    /// finalized the file.
    pub total_entries: u32,
    pub codebook_type: CodebookType,
    pub vocal_tract_feature: VocalTractFeature,
    /// Frame-group neighbourhood half-width (frames on each side).
    pub num_neighbours_in_frame_groups: u32,
    /// Label-group neighbourhood half-width.
    pub num_neighbours_in_label_groups: u32,
    /// Source speaker/style identity tag.
    pub source_tag: String,
    /// Target speaker/style identity tag.
    pub target_tag: String,
    pub lsf_params: LsfParams,
    pub pitch_params: PitchParams,
    pub energy_params: EnergyParams,
    pub mfcc_params: MfccParams,
}

impl CodebookHeader {
    /// Create a builder for the given granularity.
    pub fn builder(codebook_type: CodebookType) -> CodebookHeaderBuilder {
        CodebookHeaderBuilder::new(codebook_type)
    }

    /// Length of the vocal tract vector stored in each entry.
    pub fn vocal_tract_dimension(&self) -> usize {
        match self.vocal_tract_feature {
            VocalTractFeature::Lsf => self.lsf_params.lp_order as usize,
            VocalTractFeature::Mfcc => self.mfcc_params.dimension as usize,
        }
    }
}

/// Builder for [`CodebookHeader`]. Dimensions are fixed here, once.
#[derive(Debug, Clone)]
pub struct CodebookHeaderBuilder {
    header: CodebookHeader,
}

impl CodebookHeaderBuilder {
    pub fn new(codebook_type: CodebookType) -> Self {
        Self {
            header: CodebookHeader {
                total_entries: 0,
                codebook_type,
                vocal_tract_feature: VocalTractFeature::Lsf,
                num_neighbours_in_frame_groups: 3,
                num_neighbours_in_label_groups: 1,
                source_tag: String::new(),
                target_tag: String::new(),
                lsf_params: LsfParams::default(),
                pitch_params: PitchParams::default(),
                energy_params: EnergyParams::default(),
                mfcc_params: MfccParams::default(),
            },
        }
    }

    pub fn vocal_tract_feature(mut self, feature: VocalTractFeature) -> Self {
        self.header.vocal_tract_feature = feature;
        self
    }

    pub fn source_tag(mut self, tag: impl Into<String>) -> Self {
        self.header.source_tag = tag.into();
        self
    }

    pub fn target_tag(mut self, tag: impl Into<String>) -> Self {
        self.header.target_tag = tag.into();
        self
    }

    /// LP order, i.e. the LSF vector length.
    pub fn lp_order(mut self, order: u32) -> Self {
        self.header.lsf_params.lp_order = order;
        self
    }

    /// MFCC vector length.
    pub fn mfcc_dimension(mut self, dimension: u32) -> Self {
        self.header.mfcc_params.dimension = dimension;
        self
    }

    /// Sampling rate applied to the LSF, pitch, and MFCC parameter blocks.
    pub fn sampling_rate_hz(mut self, rate: u32) -> Self {
        self.header.lsf_params.sampling_rate_hz = rate;
        self.header.pitch_params.sampling_rate_hz = rate;
        self.header.mfcc_params.sampling_rate_hz = rate;
        self
    }

    pub fn num_neighbours_in_frame_groups(mut self, n: u32) -> Self {
        self.header.num_neighbours_in_frame_groups = n;
        self
    }

    pub fn num_neighbours_in_label_groups(mut self, n: u32) -> Self {
        self.header.num_neighbours_in_label_groups = n;
        self
    }

    pub fn lsf_params(mut self, params: LsfParams) -> Self {
        self.header.lsf_params = params;
        self
    }

    pub fn pitch_params(mut self, params: PitchParams) -> Self {
        self.header.pitch_params = params;
        self
    }

    pub fn energy_params(mut self, params: EnergyParams) -> Self {
        self.header.energy_params = params;
        self
    }

    pub fn mfcc_params(mut self, params: MfccParams) -> Self {
        self.header.mfcc_params = params;
        self
    }

    pub fn build(self) -> CodebookHeader {
        self.header
    }
}
