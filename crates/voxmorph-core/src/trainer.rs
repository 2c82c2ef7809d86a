//! Codebook training: aligned recording pairs in, codebook container out.
//!
//! All five aggregation granularities run through one generic span
//! aggregator; the granularity only decides which frame spans feed it:
//!
//! - `Frames`: each index-map unit is a single aligned frame pair, copied
//!   directly.
//! - `FrameGroups`: a fixed neighbourhood of ±N frames around each unit's
//!   centre is averaged.
//! - `Labels` / `LabelGroups`: the unit's full frame span (one phonetic
//!   label) is averaged.
//! - `Speech`: the whole recording is averaged into a single entry per
//!   pair: the global spectral offset.
//!
//! Within a span: the vocal tract vectors are averaged elementwise, F0 over
//! voiced frames only (above 10 Hz), duration and energy over all in-range
//! frames, and phoneme/context are taken from the middle frame, not
//! averaged.
//!
//! The LSF order and MFCC dimension are fixed by the first pair; any later
//! pair that disagrees aborts the whole run with a dimension-mismatch error,
//! since the inconsistency cannot be pinned on one file. Entries stream to
//! the container as they are produced, so the corpus never has to fit in
//! memory.

use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::codebook::{CodebookEntry, SpeakerItem};
use crate::codebook_file::CodebookFileWriter;
use crate::context::PhoneticContext;
use crate::features::{SpeakerData, TrainingPair};
use crate::header::{CodebookHeader, CodebookType, VocalTractFeature};
use crate::index_map::UnitSpan;
use crate::types::{VcError, VcResult};

/// Frames at or below this F0 count as unvoiced and are excluded from the
/// span's F0 average.
pub const F0_VOICING_THRESHOLD_HZ: f64 = 10.0;

/// Training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub codebook_type: CodebookType,
    pub vocal_tract_feature: VocalTractFeature,
    /// Source speaker/style tag written into the header.
    pub source_tag: String,
    /// Target speaker/style tag written into the header.
    pub target_tag: String,
    /// Frame-group neighbourhood half-width.
    pub num_neighbours_in_frame_groups: u32,
    /// Label-group neighbourhood half-width.
    pub num_neighbours_in_label_groups: u32,
    /// Half-width of the phonetic context window stored with each entry.
    pub context_neighbours: usize,
}

impl TrainerConfig {
    pub fn new(codebook_type: CodebookType) -> Self {
        Self {
            codebook_type,
            vocal_tract_feature: VocalTractFeature::Lsf,
            source_tag: String::new(),
            target_tag: String::new(),
            num_neighbours_in_frame_groups: 3,
            num_neighbours_in_label_groups: 1,
            context_neighbours: 2,
        }
    }
}

/// Builds codebook containers from aligned training pairs.
#[derive(Debug, Clone)]
pub struct CodebookTrainer {
    config: TrainerConfig,
}

impl CodebookTrainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    /// Train over the pairs sequentially, streaming entries to `output`.
    /// Returns the number of entries written.
    pub fn train(&self, pairs: &[TrainingPair], output: impl AsRef<Path>) -> VcResult<u32> {
        let header = self.header_from_first_pair(pairs)?;
        let mut writer = CodebookFileWriter::create(output, header.clone())?;
        for (i, pair) in pairs.iter().enumerate() {
            let entries = self.entries_for_pair(pair, i, &header)?;
            debug!(pair = i + 1, total = pairs.len(), entries = entries.len(), "pair mapped");
            for entry in &entries {
                writer.append(entry)?;
            }
        }
        let count = writer.finalize()?;
        info!(entries = count, granularity = %self.config.codebook_type, "training finished");
        Ok(count)
    }

    /// Train with the per-pair aggregation fanned out over the rayon pool.
    /// Entry order is identical to [`Self::train`]: pairs are collected in
    /// order and appended by this single writer thread.
    pub fn train_parallel(&self, pairs: &[TrainingPair], output: impl AsRef<Path>) -> VcResult<u32> {
        let header = self.header_from_first_pair(pairs)?;
        let batches: Vec<Vec<CodebookEntry>> = pairs
            .par_iter()
            .enumerate()
            .map(|(i, pair)| self.entries_for_pair(pair, i, &header))
            .collect::<VcResult<_>>()?;

        let mut writer = CodebookFileWriter::create(output, header)?;
        for batch in &batches {
            for entry in batch {
                writer.append(entry)?;
            }
        }
        let count = writer.finalize()?;
        info!(entries = count, granularity = %self.config.codebook_type, "training finished");
        Ok(count)
    }

    /// Fix the header dimensions from the first pair; they are decided once
    /// and never overwritten later.
    fn header_from_first_pair(&self, pairs: &[TrainingPair]) -> VcResult<CodebookHeader> {
        let first = pairs
            .first()
            .ok_or_else(|| VcError::InvalidInput("no training pairs".into()))?;
        let track = &first.source.vocal_tract;
        let dim = track.dimension() as u32;
        if dim == 0 {
            return Err(VcError::InvalidInput(
                "first training pair has an empty vocal tract track".into(),
            ));
        }
        let mut builder = CodebookHeader::builder(self.config.codebook_type)
            .vocal_tract_feature(self.config.vocal_tract_feature)
            .source_tag(&self.config.source_tag)
            .target_tag(&self.config.target_tag)
            .sampling_rate_hz(track.sampling_rate_hz)
            .num_neighbours_in_frame_groups(self.config.num_neighbours_in_frame_groups)
            .num_neighbours_in_label_groups(self.config.num_neighbours_in_label_groups);
        builder = match self.config.vocal_tract_feature {
            VocalTractFeature::Lsf => builder.lp_order(dim),
            VocalTractFeature::Mfcc => builder.mfcc_dimension(dim),
        };
        let mut header = builder.build();
        header.lsf_params.window_size_s = track.window_size_s;
        header.lsf_params.skip_size_s = track.skip_size_s;
        header.mfcc_params.window_size_s = track.window_size_s;
        header.mfcc_params.skip_size_s = track.skip_size_s;
        Ok(header)
    }

    /// Aggregate one pair into entries. A dimension disagreement with the
    /// header is fatal for the whole run.
    fn entries_for_pair(
        &self,
        pair: &TrainingPair,
        pair_index: usize,
        header: &CodebookHeader,
    ) -> VcResult<Vec<CodebookEntry>> {
        let expected = header.vocal_tract_dimension();
        for (side, data) in [("source", &pair.source), ("target", &pair.target)] {
            let dim = data.vocal_tract.dimension();
            if dim != expected {
                return Err(VcError::dims(
                    format!("pair {pair_index} {side} vocal tract"),
                    expected,
                    dim,
                ));
            }
        }

        let mut entries = Vec::new();
        for span in self.unit_spans(pair) {
            let source = self.aggregate_span(&pair.source, span.source_start, span.source_end);
            let Some(source) = source else { continue };
            let target = self.aggregate_span(&pair.target, span.target_start, span.target_end);
            let Some(target) = target else { continue };
            entries.push(CodebookEntry::new(source, target));
        }
        Ok(entries)
    }

    /// The frame spans a pair contributes, per granularity.
    fn unit_spans(&self, pair: &TrainingPair) -> Vec<UnitSpan> {
        match self.config.codebook_type {
            CodebookType::Frames | CodebookType::Labels | CodebookType::LabelGroups => {
                pair.index_map.units.clone()
            }
            CodebookType::FrameGroups => {
                let n = self.config.num_neighbours_in_frame_groups as i64;
                pair.index_map
                    .units
                    .iter()
                    .map(|u| {
                        let src_mid = middle_frame(u.source_start, u.source_end);
                        let tgt_mid = middle_frame(u.target_start, u.target_end);
                        UnitSpan::new(src_mid - n, src_mid + n, tgt_mid - n, tgt_mid + n)
                    })
                    .collect()
            }
            CodebookType::Speech => {
                let src_last = pair.source.vocal_tract.num_frames() as i64 - 1;
                let tgt_last = pair.target.vocal_tract.num_frames() as i64 - 1;
                vec![UnitSpan::new(0, src_last, 0, tgt_last)]
            }
        }
    }

    /// Average one side's features over an inclusive frame span. Returns
    /// `None` when no frame of the span lies inside the track.
    fn aggregate_span(&self, data: &SpeakerData, start: i64, end: i64) -> Option<SpeakerItem> {
        let track = &data.vocal_tract;
        let num_frames = track.num_frames();
        let dim = track.dimension();
        let middle = middle_frame(start, end);

        let mut mean = vec![0.0; dim];
        let mut f0_sum = 0.0;
        let mut voiced = 0usize;
        let mut duration_sum = 0.0;
        let mut energy_sum = 0.0;
        let mut total = 0usize;
        let mut phoneme = String::new();
        let mut context = String::new();

        for k in start..=end {
            if k < 0 || k as usize >= num_frames {
                continue;
            }
            let k = k as usize;
            total += 1;

            for (m, v) in mean.iter_mut().zip(&track.frames[k]) {
                *m += v;
            }

            let f0 = data.f0.value_at_mapped(k, num_frames);
            if f0 > F0_VOICING_THRESHOLD_HZ {
                f0_sum += f0;
                voiced += 1;
            }

            if let Some(label) = data.labels.label_at_frame(k, track.window_size_s, track.skip_size_s)
            {
                duration_sum += data.labels.label_duration_s(label);
                if k as i64 == middle {
                    phoneme = data.labels.items[label].phoneme.clone();
                    context = PhoneticContext::from_labels(
                        &data.labels,
                        label,
                        self.config.context_neighbours,
                    )
                    .flatten();
                }
            }

            energy_sum += data.energy.value_at_mapped(k, num_frames);
        }

        if total == 0 {
            return None;
        }

        let n = total as f64;
        for m in mean.iter_mut() {
            *m /= n;
        }
        let f0 = if voiced > 0 { f0_sum / voiced as f64 } else { 0.0 };

        let (lsf, mfcc) = match self.config.vocal_tract_feature {
            VocalTractFeature::Lsf => (mean, vec![]),
            VocalTractFeature::Mfcc => (vec![], mean),
        };

        Some(SpeakerItem {
            lsf,
            mfcc,
            f0,
            duration: duration_sum / n,
            energy: energy_sum / n,
            phoneme,
            context,
        })
    }
}

/// Middle frame of an inclusive span, rounding up at half.
fn middle_frame(start: i64, end: i64) -> i64 {
    (0.5 * (start + end) as f64 + 0.5).floor() as i64
}
