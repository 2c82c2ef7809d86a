//! Weighted K-best codebook matching.
//!
//! The runtime mapping primitive: given one input vocal tract vector, rank
//! every codebook entry's source (or target) vector by distance, keep the K
//! best, turn their distances into normalised weights, and return the
//! weighted combination of the matched entries' vectors.
//!
//! Matching is deterministic for a fixed input, container, and
//! configuration (ties break on entry index), takes `&self`, and holds no
//! interior mutability, so a loaded codebook behind an `Arc` serves any
//! number of concurrent matching threads.
//!
//! # Example
//!
//! ```
//! use voxmorph_core::codebook::{Codebook, CodebookEntry, SpeakerItem};
//! use voxmorph_core::header::{CodebookHeader, CodebookType};
//! use voxmorph_core::matcher::{CodebookMatcher, MatcherConfig};
//!
//! let item = |lsf: &[f64]| SpeakerItem { lsf: lsf.to_vec(), ..Default::default() };
//! let mut header = CodebookHeader::builder(CodebookType::Frames).lp_order(3).build();
//! header.total_entries = 2;
//! let codebook = Codebook::new(header, vec![
//!     CodebookEntry::new(item(&[1.0, 2.0, 3.0]), item(&[10.0, 20.0, 30.0])),
//!     CodebookEntry::new(item(&[1.0, 2.0, 3.1]), item(&[11.0, 21.0, 31.0])),
//! ]);
//!
//! let matcher = CodebookMatcher::new(MatcherConfig { num_best_matches: 1, ..Default::default() });
//! let result = matcher.best_match(&[1.0, 2.0, 3.0], &codebook).unwrap();
//! assert_eq!(result.entry.target.lsf, vec![10.0, 20.0, 30.0]);
//! assert_eq!(result.weights, vec![1.0]);
//! ```

use serde::{Deserialize, Serialize};

use crate::codebook::{Codebook, CodebookEntry, Side, SpeakerItem};
use crate::context::PhoneticContext;
use crate::distance::{
    absolute_value, euclidean, lsf_inverse_harmonic, lsf_inverse_harmonic_symmetric,
    mahalanobis_diag, DistanceMeasure,
};
use crate::types::{check_input_vector, FeatureVector, VcError, VcResult};

/// How the K best distances decay into weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WeightingMethod {
    /// `exp(-steepness * d)` over distances normalised to [0, 1].
    #[default]
    Exponential,
    /// Linear half-window `1 - steepness/10 * d`.
    Triangular,
}

/// Matching configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// K: how many best entries contribute to the output. At least 1; a
    /// container smaller than K contributes all its entries.
    pub num_best_matches: usize,
    pub distance_measure: DistanceMeasure,
    /// Blend factor for the symmetric inverse-harmonic distance, in [0, 1].
    pub alpha_for_symmetric: f64,
    pub weighting_method: WeightingMethod,
    /// 0 = all K weights equal; 10 = the first-ranked match dominates.
    pub weighting_steepness: f64,
    /// Candidate pruning: only entries whose mean line frequency lies within
    /// this range of the input's are scored. 0 disables pruning. Falls back
    /// to the full entry set when pruning would leave no candidate.
    pub freq_range: f64,
    /// Which side of each entry the input is compared against.
    pub match_against: Side,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            num_best_matches: 8,
            distance_measure: DistanceMeasure::default(),
            alpha_for_symmetric: 0.5,
            weighting_method: WeightingMethod::default(),
            weighting_steepness: 2.0,
            freq_range: 0.0,
            match_against: Side::Source,
        }
    }
}

/// The outcome of one match: the weighted combination of the K best
/// entries, plus the raw indices and weights for downstream smoothing.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Weighted-mean source and target items (vocal tract vectors only).
    pub entry: CodebookEntry,
    /// Codebook indices of the contributing entries, best first.
    pub indices: Vec<usize>,
    /// Normalised weights, same order as `indices`, summing to 1.
    pub weights: Vec<f64>,
}

/// Weighted nearest-neighbour matcher over a codebook.
#[derive(Debug, Clone)]
pub struct CodebookMatcher {
    config: MatcherConfig,
    /// Diagonal inverse covariance for the Mahalanobis measure. Without it
    /// Mahalanobis falls back to Euclidean.
    inverse_covariance: Option<FeatureVector>,
}

impl CodebookMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            inverse_covariance: None,
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Supply the diagonal inverse covariance the Mahalanobis measure
    /// needs.
    pub fn set_inverse_covariance(&mut self, diagonal: FeatureVector) {
        self.inverse_covariance = Some(diagonal);
    }

    /// Match against every entry of the codebook.
    pub fn best_match(&self, input: &[f64], codebook: &Codebook) -> VcResult<MatchResult> {
        let all: Vec<usize> = (0..codebook.len()).collect();
        self.best_match_preselected(input, codebook, &all)
    }

    /// Match against a preselected candidate set (context preselection or
    /// any caller-side pruning). An empty candidate set falls back to the
    /// whole codebook.
    pub fn best_match_preselected(
        &self,
        input: &[f64],
        codebook: &Codebook,
        candidates: &[usize],
    ) -> VcResult<MatchResult> {
        if codebook.is_empty() {
            return Err(VcError::EmptyCodebook);
        }
        check_input_vector(input)?;
        let dim = codebook.header.vocal_tract_dimension();
        if input.len() != dim {
            return Err(VcError::dims("matcher input", dim, input.len()));
        }

        let all: Vec<usize>;
        let mut candidates: &[usize] = if candidates.is_empty() {
            all = (0..codebook.len()).collect();
            &all
        } else {
            candidates
        };

        // Centre-frequency pruning; never allowed to empty the pool.
        let pruned: Vec<usize>;
        if self.config.freq_range > 0.0 {
            let centre = mean_of(input);
            pruned = candidates
                .iter()
                .copied()
                .filter(|&i| {
                    let v = self.entry_vector(&codebook.entries[i], codebook);
                    (mean_of(v) - centre).abs() <= self.config.freq_range
                })
                .collect();
            if !pruned.is_empty() {
                candidates = &pruned;
            }
        }

        // Rank candidates by distance, ties broken by entry index.
        let mut scored: Vec<(f64, usize)> = candidates
            .iter()
            .map(|&i| {
                let v = self.entry_vector(&codebook.entries[i], codebook);
                (self.distance(input, v), i)
            })
            .collect();
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(&b.1)));

        let k = self.config.num_best_matches.max(1).min(scored.len());
        scored.truncate(k);

        let distances: Vec<f64> = scored.iter().map(|(d, _)| *d).collect();
        let indices: Vec<usize> = scored.iter().map(|(_, i)| *i).collect();
        let weights = compute_weights(
            &distances,
            self.config.weighting_method,
            self.config.weighting_steepness,
        );

        // Weighted combination of the matched source and target vectors.
        let feature = codebook.header.vocal_tract_feature;
        let mut source = vec![0.0; dim];
        let mut target = vec![0.0; dim];
        for (&i, &w) in indices.iter().zip(&weights) {
            let entry = &codebook.entries[i];
            for (acc, v) in source.iter_mut().zip(entry.source.vocal_tract(feature)) {
                *acc += w * v;
            }
            for (acc, v) in target.iter_mut().zip(entry.target.vocal_tract(feature)) {
                *acc += w * v;
            }
        }

        Ok(MatchResult {
            entry: combined_entry(source, target, feature),
            indices,
            weights,
        })
    }

    /// Context-based preselection: admit entries in decreasing context match
    /// score until at least `min_candidates` are collected. Falls back to
    /// the full entry set when context cannot supply enough.
    pub fn preselect_by_context(
        &self,
        context: &PhoneticContext,
        codebook: &Codebook,
        min_candidates: usize,
    ) -> Vec<usize> {
        let scores: Vec<u32> = codebook
            .entries
            .iter()
            .map(|entry| {
                let stored = match self.config.match_against {
                    Side::Source => &entry.source.context,
                    Side::Target => &entry.target.context,
                };
                context.match_score(&PhoneticContext::parse(stored))
            })
            .collect();

        let mut selected = Vec::new();
        for wanted in context.possible_scores() {
            if wanted == 0 {
                break; // score-0 entries are no better than no preselection
            }
            for (i, &s) in scores.iter().enumerate() {
                if s == wanted {
                    selected.push(i);
                }
            }
            if selected.len() >= min_candidates {
                break;
            }
        }

        if selected.len() < min_candidates {
            return (0..codebook.len()).collect();
        }
        selected
    }

    /// Control-experiment mode: directly pair a given source and target
    /// vector, bypassing the codebook. K = 1, weight 1.
    pub fn dummy_match(source: FeatureVector, target: FeatureVector) -> VcResult<MatchResult> {
        check_input_vector(&source)?;
        check_input_vector(&target)?;
        Ok(MatchResult {
            entry: CodebookEntry::new(
                SpeakerItem {
                    lsf: source,
                    ..Default::default()
                },
                SpeakerItem {
                    lsf: target,
                    ..Default::default()
                },
            ),
            indices: vec![0],
            weights: vec![1.0],
        })
    }

    fn entry_vector<'a>(&self, entry: &'a CodebookEntry, codebook: &Codebook) -> &'a [f64] {
        let feature = codebook.header.vocal_tract_feature;
        match self.config.match_against {
            Side::Source => entry.source.vocal_tract(feature),
            Side::Target => entry.target.vocal_tract(feature),
        }
    }

    fn distance(&self, input: &[f64], entry: &[f64]) -> f64 {
        match self.config.distance_measure {
            DistanceMeasure::Euclidean => euclidean(input, entry),
            DistanceMeasure::AbsoluteValue => absolute_value(input, entry),
            DistanceMeasure::Mahalanobis => match &self.inverse_covariance {
                Some(diag) => mahalanobis_diag(input, entry, diag),
                None => euclidean(input, entry),
            },
            DistanceMeasure::InverseHarmonic => lsf_inverse_harmonic(input, entry),
            DistanceMeasure::InverseHarmonicSymmetric => {
                lsf_inverse_harmonic_symmetric(input, entry, self.config.alpha_for_symmetric)
            }
        }
    }
}

/// Turn sorted ascending distances into normalised weights.
fn compute_weights(distances: &[f64], method: WeightingMethod, steepness: f64) -> Vec<f64> {
    let steepness = steepness.clamp(0.0, 10.0);
    let n = distances.len();
    if n == 0 {
        return vec![];
    }
    let min = distances[0];
    let max = distances[n - 1];
    let span = max - min;
    let normalised: Vec<f64> = if span > 0.0 {
        distances.iter().map(|d| (d - min) / span).collect()
    } else {
        vec![0.0; n]
    };

    let mut weights: Vec<f64> = match method {
        WeightingMethod::Exponential => normalised.iter().map(|d| (-steepness * d).exp()).collect(),
        WeightingMethod::Triangular => normalised
            .iter()
            .map(|d| (1.0 - steepness / 10.0 * d).max(0.0))
            .collect(),
    };

    let sum: f64 = weights.iter().sum();
    if sum > 0.0 {
        for w in weights.iter_mut() {
            *w /= sum;
        }
    } else {
        weights = vec![1.0 / n as f64; n];
    }
    weights
}

fn combined_entry(
    source: FeatureVector,
    target: FeatureVector,
    feature: crate::header::VocalTractFeature,
) -> CodebookEntry {
    use crate::header::VocalTractFeature;
    let make = |v: FeatureVector| match feature {
        VocalTractFeature::Lsf => SpeakerItem {
            lsf: v,
            ..Default::default()
        },
        VocalTractFeature::Mfcc => SpeakerItem {
            mfcc: v,
            ..Default::default()
        },
    };
    CodebookEntry::new(make(source), make(target))
}

fn mean_of(v: &[f64]) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    v.iter().sum::<f64>() / v.len() as f64
}
