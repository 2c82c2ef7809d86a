//! The transformation orchestrator: matching, smoothing, and prosody
//! sequencing for one utterance.
//!
//! The output contract toward the external FD-PSOLA resynthesizer is a
//! [`TransformedUtterance`]: one transformed vocal tract filter per input
//! frame plus per-frame `{pscale, tscale, escale, vscale}` factors. No
//! audio is produced here.
//!
//! Two modes:
//!
//! - **Two-phase** (`separate_prosody`, forced on whenever temporal
//!   smoothing is requested): [`Transformer::phase1_vocal_tract`] performs
//!   matching with identity scales, running the smoothing sub-passes A/B
//!   when enabled, and [`Transformer::phase2_prosody`] applies the prosody
//!   scale factors to the phase-1 output. When every factor is identity and
//!   no pitch transformation is requested, phase 2 degenerates to a
//!   pass-through.
//! - **Single-pass**: matching and scale factors in one sweep. Smoothing is
//!   structurally unavailable here; requesting it switches to two-phase.
//!
//! Phase ordering is strict: pass B refuses to run when the smoothed vocal
//! tract artifact is not on disk ([`crate::types::VcError::MissingResource`]),
//! and phase 2 takes the phase-1 output by value of its type, so it cannot
//! be invoked without one.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::codebook::Codebook;
use crate::context::PhoneticContext;
use crate::features::SpeakerData;
use crate::matcher::{CodebookMatcher, MatcherConfig};
use crate::prosody::{
    spread_scales, PitchStatistics, PitchTransformMethod, PitchTransformer, ScaleFactors,
};
use crate::smoothing::{SmoothedVocalTract, SmoothingState};
use crate::types::{FeatureVector, VcError, VcResult};

/// Transformation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Decouple vocal tract and prosody into two passes.
    pub separate_prosody: bool,
    /// Temporal smoothing of the matched filters (forces two-phase mode).
    pub temporal_smoothing: bool,
    /// Smoothing neighbourhood half-width in frames.
    pub smoothing_num_neighbours: usize,
    /// Where pass A persists the smoothed vocal tract artifact. `None`
    /// keeps the pass A/B handoff in memory.
    pub smoothed_vocal_tract_path: Option<PathBuf>,
    /// Restrict matching candidates by phonetic context similarity.
    pub context_preselection: bool,
    /// Context window half-width used for preselection.
    pub total_context_neighbours: usize,
    pub pitch_transform_method: PitchTransformMethod,
    pub source_pitch_statistics: PitchStatistics,
    pub target_pitch_statistics: PitchStatistics,
    /// Per-utterance scale arrays, spread proportionally over the frames.
    /// Empty arrays mean identity.
    pub pscales: Vec<f64>,
    pub tscales: Vec<f64>,
    pub escales: Vec<f64>,
    pub vscales: Vec<f64>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            separate_prosody: true,
            temporal_smoothing: false,
            smoothing_num_neighbours: 4,
            smoothed_vocal_tract_path: None,
            context_preselection: false,
            total_context_neighbours: 2,
            pitch_transform_method: PitchTransformMethod::None,
            source_pitch_statistics: PitchStatistics::default(),
            target_pitch_statistics: PitchStatistics::default(),
            pscales: vec![],
            tscales: vec![],
            escales: vec![],
            vscales: vec![],
        }
    }
}

/// One output frame of the transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedFrame {
    /// Transformed vocal tract filter (LSF or MFCC domain, per the
    /// codebook's vocal tract feature).
    pub filter: FeatureVector,
    pub scales: ScaleFactors,
}

/// The per-utterance output handed to the external resynthesizer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedUtterance {
    pub frames: Vec<TransformedFrame>,
    pub sampling_rate_hz: u32,
    pub window_size_s: f64,
    pub skip_size_s: f64,
}

impl TransformedUtterance {
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// True when no frame carries a non-identity scale factor.
    pub fn all_scales_identity(&self) -> bool {
        self.frames.iter().all(|f| f.scales.is_identity())
    }
}

/// Seam to the external resynthesizer: consumes the per-frame filters and
/// scale factors, produces audio elsewhere.
pub trait Resynthesizer {
    fn synthesize(&mut self, utterance: &TransformedUtterance) -> VcResult<()>;
}

/// Sequences matching, smoothing, and prosody for whole utterances.
#[derive(Debug)]
pub struct Transformer {
    config: TransformConfig,
    matcher: CodebookMatcher,
    codebook: Arc<Codebook>,
}

impl Transformer {
    /// Build a transformer over a loaded, validated codebook.
    pub fn new(
        config: TransformConfig,
        matcher_config: MatcherConfig,
        codebook: Arc<Codebook>,
    ) -> VcResult<Self> {
        if codebook.is_empty() {
            return Err(VcError::EmptyCodebook);
        }
        codebook.validate()?;
        Ok(Self {
            config,
            matcher: CodebookMatcher::new(matcher_config),
            codebook,
        })
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    /// Transform one utterance end to end, sequencing the configured
    /// phases.
    pub fn transform_utterance(&self, input: &SpeakerData) -> VcResult<TransformedUtterance> {
        // Smoothing inherently needs the two-pass handoff.
        let two_phase = self.config.separate_prosody || self.config.temporal_smoothing;
        if two_phase {
            if self.config.temporal_smoothing && !self.config.separate_prosody {
                debug!("temporal smoothing requested; forcing two-phase mode");
            }
            let vocal_tract_only = self.phase1_vocal_tract(input)?;
            self.phase2_prosody(vocal_tract_only, input)
        } else {
            self.single_pass(input)
        }
    }

    /// Phase 1: vocal-tract-only pass. Every frame is matched (optionally
    /// under context preselection), smoothing runs its two sub-passes when
    /// enabled, and all scale factors are forced to identity.
    pub fn phase1_vocal_tract(&self, input: &SpeakerData) -> VcResult<TransformedUtterance> {
        let track = &input.vocal_tract;
        let mut filters = self.matched_filters(input)?;

        if self.config.temporal_smoothing {
            // Sub-pass A: estimate and (when configured) persist.
            let smoothed = SmoothedVocalTract::from_matched_filters(
                &filters,
                self.config.smoothing_num_neighbours,
                track.window_size_s,
                track.skip_size_s,
                track.sampling_rate_hz,
            )?;
            let smoothed = match &self.config.smoothed_vocal_tract_path {
                Some(path) => {
                    smoothed.save(path)?;
                    debug!(state = ?SmoothingState::EstimatingSmoothedVocalTract, ?path, "pass A artifact written");
                    // Sub-pass B precondition: the artifact must be on disk.
                    SmoothedVocalTract::load(path)?
                }
                None => smoothed,
            };
            debug!(state = ?SmoothingState::TransformingToSmoothedVocalTract, "applying smoothed filters");
            filters = (0..filters.len())
                .map(|i| smoothed.filter_at(i).to_vec())
                .collect();
        }

        Ok(TransformedUtterance {
            frames: filters
                .into_iter()
                .map(|filter| TransformedFrame {
                    filter,
                    scales: ScaleFactors::IDENTITY,
                })
                .collect(),
            sampling_rate_hz: track.sampling_rate_hz,
            window_size_s: track.window_size_s,
            skip_size_s: track.skip_size_s,
        })
    }

    /// Phase 2: apply prosody scale factors to the phase-1 output. With
    /// all-identity factors and no pitch transformation this is a
    /// pass-through of its input.
    pub fn phase2_prosody(
        &self,
        vocal_tract_only: TransformedUtterance,
        input: &SpeakerData,
    ) -> VcResult<TransformedUtterance> {
        let n = vocal_tract_only.num_frames();
        let scales = self.frame_scales(input, n);
        let no_pitch = self.config.pitch_transform_method == PitchTransformMethod::None;
        if no_pitch && scales.iter().all(ScaleFactors::is_identity) {
            info!("phase 2 degenerates to a pass-through (all scales identity)");
            return Ok(vocal_tract_only);
        }

        let mut out = vocal_tract_only;
        for (frame, scale) in out.frames.iter_mut().zip(scales) {
            frame.scales = scale;
        }
        Ok(out)
    }

    /// Single-pass mode: matching and scale factors together. Smoothing is
    /// not available here.
    fn single_pass(&self, input: &SpeakerData) -> VcResult<TransformedUtterance> {
        let track = &input.vocal_tract;
        let filters = self.matched_filters(input)?;
        let scales = self.frame_scales(input, filters.len());
        Ok(TransformedUtterance {
            frames: filters
                .into_iter()
                .zip(scales)
                .map(|(filter, scales)| TransformedFrame { filter, scales })
                .collect(),
            sampling_rate_hz: track.sampling_rate_hz,
            window_size_s: track.window_size_s,
            skip_size_s: track.skip_size_s,
        })
    }

    /// Match every input frame against the codebook and return the matched
    /// target filters.
    fn matched_filters(&self, input: &SpeakerData) -> VcResult<Vec<FeatureVector>> {
        let track = &input.vocal_tract;
        let feature = self.codebook.header.vocal_tract_feature;
        let mut filters = Vec::with_capacity(track.num_frames());
        for (i, frame) in track.frames.iter().enumerate() {
            let result = if self.config.context_preselection {
                let candidates = self.frame_candidates(input, i);
                self.matcher
                    .best_match_preselected(frame, &self.codebook, &candidates)?
            } else {
                self.matcher.best_match(frame, &self.codebook)?
            };
            filters.push(result.entry.target.vocal_tract(feature).to_vec());
        }
        debug!(frames = filters.len(), "vocal tract matching finished");
        Ok(filters)
    }

    /// Candidate set for one frame under context preselection.
    fn frame_candidates(&self, input: &SpeakerData, frame: usize) -> Vec<usize> {
        let track = &input.vocal_tract;
        let Some(label) =
            input
                .labels
                .label_at_frame(frame, track.window_size_s, track.skip_size_s)
        else {
            return (0..self.codebook.len()).collect();
        };
        let context = PhoneticContext::from_labels(
            &input.labels,
            label,
            self.config.total_context_neighbours,
        );
        let min_candidates = self.matcher.config().num_best_matches.max(1);
        self.matcher
            .preselect_by_context(&context, &self.codebook, min_candidates)
    }

    /// Per-frame scale factors: the spread scale arrays, with pscale
    /// optionally replaced by the pitch transformer's output.
    fn frame_scales(&self, input: &SpeakerData, num_frames: usize) -> Vec<ScaleFactors> {
        let pscales = spread_scales(&self.config.pscales, num_frames);
        let tscales = spread_scales(&self.config.tscales, num_frames);
        let escales = spread_scales(&self.config.escales, num_frames);
        let vscales = spread_scales(&self.config.vscales, num_frames);
        let pitch = PitchTransformer::new(
            self.config.pitch_transform_method,
            self.config.source_pitch_statistics,
            self.config.target_pitch_statistics,
        );
        (0..num_frames)
            .map(|i| {
                let f0 = input.f0.value_at_mapped(i, num_frames);
                let pscale = match self.config.pitch_transform_method {
                    PitchTransformMethod::None => pscales[i],
                    _ => pitch.pscale_for(f0, pscales[i]),
                };
                ScaleFactors {
                    pscale,
                    tscale: tscales[i],
                    escale: escales[i],
                    vscale: vscales[i],
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codebook::{CodebookEntry, SpeakerItem};
    use crate::features::{ContourTrack, FeatureTrack, Label, LabelTrack};
    use crate::header::{CodebookHeader, CodebookType};

    fn item(lsf: &[f64]) -> SpeakerItem {
        SpeakerItem {
            lsf: lsf.to_vec(),
            ..Default::default()
        }
    }

    fn codebook() -> Arc<Codebook> {
        let mut header = CodebookHeader::builder(CodebookType::Frames)
            .lp_order(2)
            .build();
        header.total_entries = 2;
        Arc::new(Codebook::new(
            header,
            vec![
                CodebookEntry::new(item(&[0.2, 0.4]), item(&[0.5, 1.0])),
                CodebookEntry::new(item(&[1.0, 2.0]), item(&[1.5, 2.5])),
            ],
        ))
    }

    fn utterance(num_frames: usize) -> SpeakerData {
        let frames = (0..num_frames)
            .map(|i| if i % 2 == 0 { vec![0.2, 0.4] } else { vec![1.0, 2.0] })
            .collect();
        SpeakerData {
            vocal_tract: FeatureTrack::new(frames, 16_000, 0.02, 0.01).unwrap(),
            f0: ContourTrack::new(vec![100.0; num_frames], 0.04, 0.005),
            energy: ContourTrack::new(vec![0.4; num_frames], 0.02, 0.01),
            labels: LabelTrack::new(vec![Label {
                end_time_s: 10.0,
                phoneme: "a".into(),
            }]),
        }
    }

    fn matcher_config() -> MatcherConfig {
        MatcherConfig {
            num_best_matches: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_phase1_matches_frames_with_identity_scales() {
        let t = Transformer::new(TransformConfig::default(), matcher_config(), codebook()).unwrap();
        let out = t.phase1_vocal_tract(&utterance(4)).unwrap();
        assert_eq!(out.num_frames(), 4);
        assert!(out.all_scales_identity());
        assert_eq!(out.frames[0].filter, vec![0.5, 1.0]);
        assert_eq!(out.frames[1].filter, vec![1.5, 2.5]);
    }

    #[test]
    fn test_phase2_degenerates_to_pass_through() {
        let t = Transformer::new(TransformConfig::default(), matcher_config(), codebook()).unwrap();
        let input = utterance(4);
        let phase1 = t.phase1_vocal_tract(&input).unwrap();
        let phase2 = t.phase2_prosody(phase1.clone(), &input).unwrap();
        assert_eq!(phase2, phase1);
    }

    #[test]
    fn test_two_phase_applies_scales() {
        let config = TransformConfig {
            pscales: vec![1.2],
            escales: vec![0.8],
            ..Default::default()
        };
        let t = Transformer::new(config, matcher_config(), codebook()).unwrap();
        let out = t.transform_utterance(&utterance(3)).unwrap();
        for frame in &out.frames {
            assert!((frame.scales.pscale - 1.2).abs() < 1e-12);
            assert!((frame.scales.escale - 0.8).abs() < 1e-12);
            assert_eq!(frame.scales.tscale, 1.0);
        }
    }

    #[test]
    fn test_single_pass_mode() {
        let config = TransformConfig {
            separate_prosody: false,
            pscales: vec![1.5],
            ..Default::default()
        };
        let t = Transformer::new(config, matcher_config(), codebook()).unwrap();
        let out = t.transform_utterance(&utterance(2)).unwrap();
        assert_eq!(out.num_frames(), 2);
        assert_eq!(out.frames[0].filter, vec![0.5, 1.0]);
        assert!((out.frames[0].scales.pscale - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_smoothing_with_file_handoff() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("utt.vmft");
        let config = TransformConfig {
            temporal_smoothing: true,
            smoothing_num_neighbours: 8, // wide window: smooths across all frames
            smoothed_vocal_tract_path: Some(artifact.clone()),
            ..Default::default()
        };
        let t = Transformer::new(config, matcher_config(), codebook()).unwrap();
        let out = t.phase1_vocal_tract(&utterance(4)).unwrap();
        // The artifact made it to disk.
        assert!(artifact.exists());
        // All frames smoothed toward the mean of the two matched filters.
        for frame in &out.frames {
            assert!((frame.filter[0] - 1.0).abs() < 1e-9);
            assert!((frame.filter[1] - 1.75).abs() < 1e-9);
        }
    }

    #[test]
    fn test_smoothing_forces_two_phase() {
        let config = TransformConfig {
            separate_prosody: false,
            temporal_smoothing: true,
            smoothing_num_neighbours: 8,
            ..Default::default()
        };
        let t = Transformer::new(config, matcher_config(), codebook()).unwrap();
        let out = t.transform_utterance(&utterance(4)).unwrap();
        // Smoothed output proves the two-phase path ran despite
        // separate_prosody being off.
        assert!((out.frames[0].filter[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_context_preselection_path() {
        let config = TransformConfig {
            context_preselection: true,
            ..Default::default()
        };
        let t = Transformer::new(config, matcher_config(), codebook()).unwrap();
        let out = t.transform_utterance(&utterance(2)).unwrap();
        assert_eq!(out.num_frames(), 2);
    }

    #[test]
    fn test_pitch_transformation_sets_pscale() {
        let config = TransformConfig {
            pitch_transform_method: PitchTransformMethod::Mean,
            source_pitch_statistics: PitchStatistics { mean_hz: 100.0, std_hz: 10.0 },
            target_pitch_statistics: PitchStatistics { mean_hz: 150.0, std_hz: 10.0 },
            ..Default::default()
        };
        let t = Transformer::new(config, matcher_config(), codebook()).unwrap();
        let out = t.transform_utterance(&utterance(2)).unwrap();
        for frame in &out.frames {
            assert!((frame.scales.pscale - 1.5).abs() < 1e-9);
        }
    }

    #[test]
    fn test_empty_codebook_rejected_at_construction() {
        let mut header = CodebookHeader::builder(CodebookType::Frames)
            .lp_order(2)
            .build();
        header.total_entries = 0;
        let empty = Arc::new(Codebook::new(header, vec![]));
        let err =
            Transformer::new(TransformConfig::default(), matcher_config(), empty).unwrap_err();
        assert!(matches!(err, VcError::EmptyCodebook));
    }
}
