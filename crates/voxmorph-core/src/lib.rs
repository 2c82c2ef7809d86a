//! # Voxmorph Core
//!
//! Weighted-codebook spectral voice conversion: the statistical mapping
//! between the short-term spectral envelopes of a source and a target
//! speaker, learned from time-aligned parallel recordings and applied
//! frame by frame at synthesis time.
//!
//! ## Pipeline
//!
//! ```text
//! recordings -> (external) alignment -> CodebookTrainer -> OutlierPipeline
//!     -> codebook container (persisted) -> CodebookMatcher <- runtime frames
//!     <- Transformer -> external FD-PSOLA resynthesizer
//! ```
//!
//! - [`trainer`] turns `(source, target, index map)` triples into codebook
//!   entries at a configurable aggregation granularity, streaming them to
//!   disk through [`codebook_file`].
//! - [`outlier`] filters statistically atypical entries before matching.
//! - [`matcher`] answers runtime queries with the weighted combination of
//!   the K nearest entries under a configurable distance metric.
//! - [`transformer`] sequences matching, optional temporal smoothing, and
//!   prosody scale factors into the per-frame stream the external
//!   resynthesizer consumes.
//!
//! A loaded [`codebook::Codebook`] is immutable; share it behind an `Arc`
//! for unlimited concurrent matching.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use voxmorph_core::prelude::*;
//!
//! let item = |lsf: &[f64]| SpeakerItem { lsf: lsf.to_vec(), ..Default::default() };
//! let mut header = CodebookHeader::builder(CodebookType::Frames).lp_order(3).build();
//! header.total_entries = 2;
//! let codebook = Arc::new(Codebook::new(header, vec![
//!     CodebookEntry::new(item(&[1.0, 2.0, 3.0]), item(&[10.0, 20.0, 30.0])),
//!     CodebookEntry::new(item(&[1.0, 2.0, 3.1]), item(&[11.0, 21.0, 31.0])),
//! ]));
//!
//! let matcher = CodebookMatcher::new(MatcherConfig {
//!     num_best_matches: 2,
//!     weighting_steepness: 0.0,
//!     ..Default::default()
//! });
//! let result = matcher.best_match(&[1.0, 2.0, 3.0], &codebook).unwrap();
//! assert!((result.entry.target.lsf[0] - 10.5).abs() < 1e-9);
//! ```

pub mod codebook;
pub mod codebook_file;
pub mod context;
pub mod distance;
pub mod features;
pub mod header;
pub mod index_map;
pub mod kmeans;
pub mod logging;
pub mod lsf;
pub mod matcher;
pub mod outlier;
pub mod prosody;
pub mod smoothing;
pub mod trainer;
pub mod transformer;
pub mod types;

/// Commonly used types, re-exported.
pub mod prelude {
    pub use crate::codebook::{Codebook, CodebookEntry, FeatureChannel, Side, SpeakerItem};
    pub use crate::codebook_file::{load_codebook, save_codebook, CodebookFileReader, CodebookFileWriter};
    pub use crate::distance::DistanceMeasure;
    pub use crate::features::{ContourTrack, FeatureTrack, Label, LabelTrack, SpeakerData, TrainingPair};
    pub use crate::header::{CodebookHeader, CodebookType, VocalTractFeature};
    pub use crate::index_map::{IndexMap, UnitSpan};
    pub use crate::matcher::{CodebookMatcher, MatchResult, MatcherConfig, WeightingMethod};
    pub use crate::outlier::{
        GaussianEliminatorConfig, KMeansEliminatorConfig, OutlierPipeline, TotalStandardDeviations,
    };
    pub use crate::prosody::{PitchStatistics, PitchTransformMethod, ScaleFactors};
    pub use crate::trainer::{CodebookTrainer, TrainerConfig};
    pub use crate::transformer::{
        TransformConfig, TransformedFrame, TransformedUtterance, Transformer,
    };
    pub use crate::types::{VcError, VcResult};
}
