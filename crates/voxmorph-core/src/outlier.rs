//! Outlier elimination: the post-training, pre-matching filter.
//!
//! Two independently configurable stages run in a fixed order over a loaded
//! container and produce a new one:
//!
//! 1. [`GaussianEliminator`] drops entries whose per-channel value (or, for
//!    the vocal tract vector, distance to the global mean) lies more than a
//!    configured number of standard deviations from the channel mean.
//! 2. [`KMeansEliminator`] clusters source and target feature space and
//!    drops entries whose cluster assignment maps against the grain of the
//!    bulk mapping: one-to-many, many-to-one, or least-likely pairings.
//!
//! Entries are never mutated, survivor order is preserved, and a disabled
//! stage is a pass-through.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::codebook::{Codebook, FeatureChannel, Side};
use crate::codebook_file::{load_codebook, save_codebook};
use crate::distance::{absolute_value, euclidean, mahalanobis_diag, normalized_euclidean};
use crate::kmeans::{self, KMeansConfig, KMeansModel};
use crate::types::{FeatureVector, VcResult};

/// Reasons an entry was flagged; accumulated as a bit set, one entry can be
/// an outlier in several channels at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutlierStatus(pub u32);

impl OutlierStatus {
    pub const NON_OUTLIER: u32 = 0;
    pub const VOCAL_TRACT: u32 = 1 << 0;
    pub const F0: u32 = 1 << 1;
    pub const DURATION: u32 = 1 << 2;
    pub const ENERGY: u32 = 1 << 3;
    pub const TOO_SIMILAR: u32 = 1 << 4;
    pub const ONE_TO_MANY: u32 = 1 << 5;
    pub const MANY_TO_ONE: u32 = 1 << 6;
    pub const MANY_TO_MANY: u32 = 1 << 7;
    pub const LEAST_LIKELY: u32 = 1 << 8;

    pub fn mark(&mut self, reason: u32) {
        self.0 |= reason;
    }

    pub fn is_outlier(&self) -> bool {
        self.0 != Self::NON_OUTLIER
    }
}

/// Per-channel standard deviation thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TotalStandardDeviations {
    pub vocal_tract: f64,
    pub f0: f64,
    pub duration: f64,
    pub energy: f64,
    /// Threshold for joint clustering over all enabled channels.
    pub general: f64,
}

impl Default for TotalStandardDeviations {
    fn default() -> Self {
        Self {
            vocal_tract: 1.5,
            f0: 1.0,
            duration: 1.0,
            energy: 2.0,
            general: 0.1,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 1: distance-from-mean filter
// ---------------------------------------------------------------------------

/// Configuration of the distance-from-mean stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianEliminatorConfig {
    pub active: bool,
    pub check_vocal_tract: bool,
    pub check_f0: bool,
    pub check_duration: bool,
    pub check_energy: bool,
    /// Also drop entries whose source and target vocal tract vectors are
    /// unusually similar (lower tail): they carry no mapping information.
    pub eliminate_too_similar: bool,
    pub thresholds: TotalStandardDeviations,
}

impl Default for GaussianEliminatorConfig {
    fn default() -> Self {
        Self {
            active: true,
            check_vocal_tract: true,
            check_f0: true,
            check_duration: true,
            check_energy: true,
            eliminate_too_similar: false,
            thresholds: TotalStandardDeviations::default(),
        }
    }
}

/// Distance-from-mean outlier filter.
#[derive(Debug, Clone)]
pub struct GaussianEliminator {
    config: GaussianEliminatorConfig,
}

impl GaussianEliminator {
    pub fn new(config: GaussianEliminatorConfig) -> Self {
        Self { config }
    }

    /// Filter the container. Pass-through when inactive.
    pub fn eliminate(&self, codebook: &Codebook) -> Codebook {
        if !self.config.active || codebook.is_empty() {
            return codebook.clone();
        }
        let mut status = vec![OutlierStatus::default(); codebook.len()];

        let scalar_checks = [
            (self.config.check_f0, FeatureChannel::F0, self.config.thresholds.f0, OutlierStatus::F0),
            (
                self.config.check_duration,
                FeatureChannel::Duration,
                self.config.thresholds.duration,
                OutlierStatus::DURATION,
            ),
            (
                self.config.check_energy,
                FeatureChannel::Energy,
                self.config.thresholds.energy,
                OutlierStatus::ENERGY,
            ),
        ];
        for (enabled, channel, sigmas, reason) in scalar_checks {
            if !enabled {
                continue;
            }
            for side in [Side::Source, Side::Target] {
                let values: Vec<f64> = codebook
                    .feature_rows(side, &[channel])
                    .into_iter()
                    .map(|row| row[0])
                    .collect();
                let (mean, std) = mean_std(&values);
                for (i, v) in values.iter().enumerate() {
                    if (v - mean).abs() > sigmas * std {
                        status[i].mark(reason);
                    }
                }
            }
        }

        if self.config.check_vocal_tract {
            for side in [Side::Source, Side::Target] {
                let rows = codebook.feature_rows(side, &[FeatureChannel::VocalTract]);
                let distances = distances_to_mean(&rows);
                let (mean, std) = mean_std(&distances);
                for (i, d) in distances.iter().enumerate() {
                    if *d > mean + self.config.thresholds.vocal_tract * std {
                        status[i].mark(OutlierStatus::VOCAL_TRACT);
                    }
                }
            }
        }

        if self.config.eliminate_too_similar {
            let src = codebook.feature_rows(Side::Source, &[FeatureChannel::VocalTract]);
            let tgt = codebook.feature_rows(Side::Target, &[FeatureChannel::VocalTract]);
            let pair_distances: Vec<f64> = src
                .iter()
                .zip(&tgt)
                .map(|(a, b)| euclidean(a, b))
                .collect();
            let (mean, std) = mean_std(&pair_distances);
            for (i, d) in pair_distances.iter().enumerate() {
                if *d < mean - self.config.thresholds.vocal_tract * std {
                    status[i].mark(OutlierStatus::TOO_SIMILAR);
                }
            }
        }

        let dropped = status.iter().filter(|s| s.is_outlier()).count();
        info!(
            dropped,
            total = codebook.len(),
            "gaussian outlier elimination"
        );
        codebook.retain_indices(|i| !status[i].is_outlier())
    }
}

// ---------------------------------------------------------------------------
// Stage 2: cluster-mapping filter
// ---------------------------------------------------------------------------

/// Distance used when comparing entries with cluster centroids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClusterDistance {
    Euclidean,
    AbsoluteValue,
    #[default]
    NormalizedEuclidean,
    Mahalanobis,
}

/// Which mapping-inconsistency rule stage 2 applies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EliminationAlgorithm {
    /// Drop (source cluster, target cluster) pairings whose joint frequency
    /// falls into the least-likely tail of their source cluster, up to the
    /// given probability mass in [0, 1].
    LeastLikelyMappings { elimination_likelihood: f64 },
    /// Drop entries whose side-wise distances to their cluster centroids
    /// disagree: close on one side but past the sigma-scaled cluster
    /// boundary on the other (or past it on both).
    MeanDistanceMismatches {
        distance: ClusterDistance,
        /// Use the global variance rather than per-cluster variances when
        /// scaling the boundary.
        global_variance: bool,
    },
}

/// Configuration of the cluster-mapping stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeansEliminatorConfig {
    pub active: bool,
    pub algorithm: EliminationAlgorithm,
    /// Cluster each enabled channel separately instead of jointly.
    pub separate_clustering: bool,
    pub check_vocal_tract: bool,
    pub check_f0: bool,
    pub check_duration: bool,
    pub check_energy: bool,
    /// Cluster count for joint clustering.
    pub num_clusters: usize,
    /// Cluster counts for separate clustering, per channel.
    pub num_clusters_vocal_tract: usize,
    pub num_clusters_f0: usize,
    pub num_clusters_duration: usize,
    pub num_clusters_energy: usize,
    pub thresholds: TotalStandardDeviations,
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for KMeansEliminatorConfig {
    fn default() -> Self {
        Self {
            active: true,
            algorithm: EliminationAlgorithm::MeanDistanceMismatches {
                distance: ClusterDistance::NormalizedEuclidean,
                global_variance: true,
            },
            separate_clustering: false,
            check_vocal_tract: true,
            check_f0: false,
            check_duration: false,
            check_energy: false,
            num_clusters: 30,
            num_clusters_vocal_tract: 30,
            num_clusters_f0: 50,
            num_clusters_duration: 5,
            num_clusters_energy: 5,
            thresholds: TotalStandardDeviations::default(),
            max_iterations: 200,
            seed: 0x5EED,
        }
    }
}

/// Cluster-mapping outlier filter.
#[derive(Debug, Clone)]
pub struct KMeansEliminator {
    config: KMeansEliminatorConfig,
}

impl KMeansEliminator {
    pub fn new(config: KMeansEliminatorConfig) -> Self {
        Self { config }
    }

    fn enabled_channels(&self) -> Vec<(FeatureChannel, usize, f64)> {
        let c = &self.config;
        let mut channels = Vec::new();
        if c.check_vocal_tract {
            channels.push((
                FeatureChannel::VocalTract,
                c.num_clusters_vocal_tract,
                c.thresholds.vocal_tract,
            ));
        }
        if c.check_f0 {
            channels.push((FeatureChannel::F0, c.num_clusters_f0, c.thresholds.f0));
        }
        if c.check_duration {
            channels.push((
                FeatureChannel::Duration,
                c.num_clusters_duration,
                c.thresholds.duration,
            ));
        }
        if c.check_energy {
            channels.push((FeatureChannel::Energy, c.num_clusters_energy, c.thresholds.energy));
        }
        channels
    }

    /// Filter the container. Pass-through when inactive or when no channel
    /// is enabled.
    pub fn eliminate(&self, codebook: &Codebook) -> Codebook {
        let channels = self.enabled_channels();
        if !self.config.active || codebook.is_empty() || channels.is_empty() {
            return codebook.clone();
        }
        let mut status = vec![OutlierStatus::default(); codebook.len()];

        if self.config.separate_clustering {
            for (channel, clusters, sigmas) in &channels {
                self.eliminate_on_rows(
                    codebook.feature_rows(Side::Source, &[*channel]),
                    codebook.feature_rows(Side::Target, &[*channel]),
                    *clusters,
                    *sigmas,
                    &mut status,
                );
            }
        } else {
            let joint: Vec<FeatureChannel> = channels.iter().map(|(c, _, _)| *c).collect();
            self.eliminate_on_rows(
                codebook.feature_rows(Side::Source, &joint),
                codebook.feature_rows(Side::Target, &joint),
                self.config.num_clusters,
                self.config.thresholds.general,
                &mut status,
            );
        }

        let dropped = status.iter().filter(|s| s.is_outlier()).count();
        info!(dropped, total = codebook.len(), "k-means mapping elimination");
        codebook.retain_indices(|i| !status[i].is_outlier())
    }

    fn eliminate_on_rows(
        &self,
        src_rows: Vec<FeatureVector>,
        tgt_rows: Vec<FeatureVector>,
        num_clusters: usize,
        sigmas: f64,
        status: &mut [OutlierStatus],
    ) {
        let kconfig = KMeansConfig {
            num_clusters,
            max_iterations: self.config.max_iterations,
            seed: self.config.seed,
        };
        let src = kmeans::train(&src_rows, &kconfig);
        let tgt = kmeans::train(&tgt_rows, &kconfig);

        match self.config.algorithm {
            EliminationAlgorithm::LeastLikelyMappings { elimination_likelihood } => {
                least_likely_mappings(&src, &tgt, elimination_likelihood, status);
            }
            EliminationAlgorithm::MeanDistanceMismatches { distance, global_variance } => {
                mean_distance_mismatches(
                    &src_rows, &tgt_rows, &src, &tgt, distance, global_variance, sigmas, status,
                );
            }
        }
    }
}

/// Drop the least-frequent (source cluster → target cluster) pairings, up to
/// `likelihood` of each source cluster's mass.
fn least_likely_mappings(
    src: &KMeansModel,
    tgt: &KMeansModel,
    likelihood: f64,
    status: &mut [OutlierStatus],
) {
    let k_src = src.num_clusters();
    let k_tgt = tgt.num_clusters();
    let mut counts = vec![vec![0usize; k_tgt]; k_src];
    for (&s, &t) in src.assignments.iter().zip(&tgt.assignments) {
        counts[s][t] += 1;
    }

    for (s, row) in counts.iter().enumerate() {
        let total: usize = row.iter().sum();
        if total == 0 {
            continue;
        }
        let threshold = likelihood * total as f64;
        // Walk the target clusters from least to most frequent, dropping
        // while their cumulative mass stays within the threshold.
        let mut order: Vec<usize> = (0..k_tgt).collect();
        order.sort_by_key(|&t| row[t]);
        let mut accumulated = 0.0;
        let mut dropped_clusters = Vec::new();
        for &t in &order {
            if row[t] == 0 {
                continue;
            }
            if accumulated + row[t] as f64 > threshold {
                break;
            }
            accumulated += row[t] as f64;
            dropped_clusters.push(t);
        }
        for (i, (&si, &ti)) in src.assignments.iter().zip(&tgt.assignments).enumerate() {
            if si == s && dropped_clusters.contains(&ti) {
                status[i].mark(OutlierStatus::LEAST_LIKELY);
            }
        }
    }
}

/// Flag entries whose side-wise centroid distances disagree with the bulk
/// mapping: one-to-many, many-to-one, and many-to-many pairings.
#[allow(clippy::too_many_arguments)]
fn mean_distance_mismatches(
    src_rows: &[FeatureVector],
    tgt_rows: &[FeatureVector],
    src: &KMeansModel,
    tgt: &KMeansModel,
    distance: ClusterDistance,
    global_variance: bool,
    sigmas: f64,
    status: &mut [OutlierStatus],
) {
    let thresholds = |model: &KMeansModel| -> Vec<f64> {
        model
            .centroids
            .iter()
            .enumerate()
            .map(|(c, centroid)| {
                let var = if global_variance {
                    &model.global_variances
                } else {
                    &model.cluster_variances[c]
                };
                // Distance from the centroid to a hypothetical boundary
                // vector sigma standard deviations out on every dimension.
                let boundary: FeatureVector = centroid
                    .iter()
                    .zip(var)
                    .map(|(m, v)| m + sigmas * v.sqrt())
                    .collect();
                cluster_distance(&boundary, centroid, var, distance)
            })
            .collect()
    };
    let src_thresholds = thresholds(src);
    let tgt_thresholds = thresholds(tgt);

    let side_distance = |row: &[f64], model: &KMeansModel, cluster: usize| -> f64 {
        let var = if global_variance {
            &model.global_variances
        } else {
            &model.cluster_variances[cluster]
        };
        cluster_distance(row, &model.centroids[cluster], var, distance)
    };

    let mut one_to_many = 0usize;
    let mut many_to_one = 0usize;
    let mut many_to_many = 0usize;
    for i in 0..src_rows.len() {
        let sc = src.assignments[i];
        let tc = tgt.assignments[i];
        let src_near = side_distance(&src_rows[i], src, sc) < src_thresholds[sc];
        let tgt_near = side_distance(&tgt_rows[i], tgt, tc) < tgt_thresholds[tc];
        match (src_near, tgt_near) {
            (true, false) => {
                status[i].mark(OutlierStatus::ONE_TO_MANY);
                one_to_many += 1;
            }
            (false, true) => {
                status[i].mark(OutlierStatus::MANY_TO_ONE);
                many_to_one += 1;
            }
            (false, false) => {
                status[i].mark(OutlierStatus::MANY_TO_MANY);
                many_to_many += 1;
            }
            (true, true) => {}
        }
    }
    info!(one_to_many, many_to_one, many_to_many, "mapping mismatches");
}

fn cluster_distance(a: &[f64], b: &[f64], variances: &[f64], distance: ClusterDistance) -> f64 {
    match distance {
        ClusterDistance::Euclidean => euclidean(a, b),
        ClusterDistance::AbsoluteValue => absolute_value(a, b),
        ClusterDistance::NormalizedEuclidean => normalized_euclidean(a, b, variances),
        ClusterDistance::Mahalanobis => {
            let inv: FeatureVector = variances.iter().map(|v| 1.0 / v.max(1e-10)).collect();
            mahalanobis_diag(a, b, &inv)
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Both stages in their fixed order. A no-op pass-through when neither is
/// active.
#[derive(Debug, Clone, Default)]
pub struct OutlierPipeline {
    pub gaussian: GaussianEliminatorConfig,
    pub kmeans: KMeansEliminatorConfig,
}

impl OutlierPipeline {
    pub fn new(gaussian: GaussianEliminatorConfig, kmeans: KMeansEliminatorConfig) -> Self {
        Self { gaussian, kmeans }
    }

    /// Run the configured stages and return the filtered container.
    pub fn run(&self, codebook: &Codebook) -> Codebook {
        let after_gaussian = GaussianEliminator::new(self.gaussian).eliminate(codebook);
        KMeansEliminator::new(self.kmeans.clone()).eliminate(&after_gaussian)
    }

    /// File-to-file convenience: load, filter, save.
    pub fn run_files(
        &self,
        input: impl AsRef<std::path::Path>,
        output: impl AsRef<std::path::Path>,
    ) -> VcResult<u32> {
        let codebook = load_codebook(input)?;
        let filtered = self.run(&codebook);
        save_codebook(output, &filtered)?;
        Ok(filtered.header.total_entries)
    }
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn distances_to_mean(rows: &[FeatureVector]) -> Vec<f64> {
    if rows.is_empty() {
        return vec![];
    }
    let dim = rows[0].len();
    let n = rows.len() as f64;
    let mut mean = vec![0.0; dim];
    for row in rows {
        for (m, v) in mean.iter_mut().zip(row) {
            *m += v;
        }
    }
    for m in mean.iter_mut() {
        *m /= n;
    }
    rows.iter().map(|row| euclidean(row, &mean)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codebook::{CodebookEntry, SpeakerItem};
    use crate::header::{CodebookHeader, CodebookType};

    fn entry(lsf: f64, f0: f64) -> CodebookEntry {
        let item = |v: f64, f: f64| SpeakerItem {
            lsf: vec![v, v + 0.1],
            f0: f,
            duration: 0.08,
            energy: 0.5,
            ..Default::default()
        };
        CodebookEntry::new(item(lsf, f0), item(lsf + 0.2, f0 + 10.0))
    }

    /// A tight cluster of entries plus one wild outlier at the end.
    fn codebook_with_outlier() -> Codebook {
        let mut entries: Vec<CodebookEntry> = (0..20)
            .map(|i| entry(0.5 + 0.001 * i as f64, 100.0 + 0.1 * i as f64))
            .collect();
        // Roughly 10 sigma away in both LSF and F0.
        entries.push(entry(5.0, 2000.0));
        let mut header = CodebookHeader::builder(CodebookType::Frames)
            .lp_order(2)
            .build();
        header.total_entries = entries.len() as u32;
        Codebook::new(header, entries)
    }

    #[test]
    fn test_gaussian_removes_far_outlier() {
        let cb = codebook_with_outlier();
        let config = GaussianEliminatorConfig {
            thresholds: TotalStandardDeviations {
                vocal_tract: 3.0,
                f0: 3.0,
                duration: 3.0,
                energy: 3.0,
                general: 3.0,
            },
            ..Default::default()
        };
        let filtered = GaussianEliminator::new(config).eliminate(&cb);
        assert_eq!(filtered.len(), cb.len() - 1);
        // Order preserved: survivors equal the original prefix.
        assert_eq!(&filtered.entries[..], &cb.entries[..cb.len() - 1]);
        assert!(filtered.validate().is_ok());
    }

    #[test]
    fn test_gaussian_disabled_keeps_everything() {
        let cb = codebook_with_outlier();
        let config = GaussianEliminatorConfig {
            active: false,
            ..Default::default()
        };
        let filtered = GaussianEliminator::new(config).eliminate(&cb);
        assert_eq!(filtered.len(), cb.len());
    }

    #[test]
    fn test_gaussian_channel_toggles() {
        let cb = codebook_with_outlier();
        // Only energy is checked; the outlier is normal in energy, so it
        // survives.
        let config = GaussianEliminatorConfig {
            check_vocal_tract: false,
            check_f0: false,
            check_duration: false,
            check_energy: true,
            thresholds: TotalStandardDeviations {
                energy: 3.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let filtered = GaussianEliminator::new(config).eliminate(&cb);
        assert_eq!(filtered.len(), cb.len());
    }

    /// Two source clusters mapping consistently to two target clusters,
    /// plus one entry that maps against the grain.
    fn codebook_with_crossed_mapping() -> Codebook {
        let item = |v: f64| SpeakerItem {
            lsf: vec![v, v],
            ..Default::default()
        };
        let mut entries = Vec::new();
        for i in 0..12 {
            let jitter = 0.01 * (i % 4) as f64;
            // Cluster A (around 0) maps to target cluster around 10.
            entries.push(CodebookEntry::new(item(0.0 + jitter), item(10.0 + jitter)));
            // Cluster B (around 5) maps to target cluster around 20.
            entries.push(CodebookEntry::new(item(5.0 + jitter), item(20.0 + jitter)));
        }
        // Against the grain: source cluster A paired with target cluster of B.
        entries.push(CodebookEntry::new(item(0.005), item(20.005)));
        let mut header = CodebookHeader::builder(CodebookType::Frames)
            .lp_order(2)
            .build();
        header.total_entries = entries.len() as u32;
        Codebook::new(header, entries)
    }

    #[test]
    fn test_least_likely_mapping_dropped() {
        let cb = codebook_with_crossed_mapping();
        let config = KMeansEliminatorConfig {
            algorithm: EliminationAlgorithm::LeastLikelyMappings {
                elimination_likelihood: 0.2,
            },
            check_f0: false,
            check_duration: false,
            check_energy: false,
            num_clusters: 2,
            ..Default::default()
        };
        let filtered = KMeansEliminator::new(config).eliminate(&cb);
        assert_eq!(filtered.len(), cb.len() - 1);
        // The crossed entry (last) is the one that went away.
        assert_eq!(&filtered.entries[..], &cb.entries[..cb.len() - 1]);
    }

    #[test]
    fn test_kmeans_disabled_is_pass_through() {
        let cb = codebook_with_crossed_mapping();
        let config = KMeansEliminatorConfig {
            active: false,
            ..Default::default()
        };
        let filtered = KMeansEliminator::new(config).eliminate(&cb);
        assert_eq!(filtered.entries, cb.entries);
    }

    #[test]
    fn test_pipeline_pass_through_when_both_disabled() {
        let cb = codebook_with_outlier();
        let pipeline = OutlierPipeline::new(
            GaussianEliminatorConfig {
                active: false,
                ..Default::default()
            },
            KMeansEliminatorConfig {
                active: false,
                ..Default::default()
            },
        );
        let out = pipeline.run(&cb);
        assert_eq!(out.entries, cb.entries);
        assert_eq!(out.header.total_entries, cb.header.total_entries);
    }

    #[test]
    fn test_pipeline_output_never_grows() {
        let cb = codebook_with_outlier();
        let pipeline = OutlierPipeline::default();
        let out = pipeline.run(&cb);
        assert!(out.len() <= cb.len());
        assert!(out.validate().is_ok());
    }
}
