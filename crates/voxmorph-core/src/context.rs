//! Phonetic context windows for context-based candidate preselection.
//!
//! A context window is the flattened sequence of phonetic labels around one
//! aggregation unit, e.g. `"s|I|t|@|n"` for a ±2 window centred on `t`. The
//! matcher scores a runtime frame's window against every codebook entry's
//! stored window and admits candidates in decreasing score order until it
//! has enough.
//!
//! Scoring is symmetric and integer-valued: a differing centre scores 0; a
//! matching centre scores 1 plus one point per contiguous matching
//! neighbour, scanning outward on each side and stopping at the first
//! mismatch. A ±N window therefore scores in `{0, 1, …, 2N+1}`.

use serde::{Deserialize, Serialize};

use crate::features::LabelTrack;

/// Separator between labels in a flattened context string.
pub const CONTEXT_SEPARATOR: char = '|';

/// A parsed context window: `neighbours` labels on each side of the centre.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneticContext {
    /// Labels left of the centre, nearest last.
    pub left: Vec<String>,
    pub center: String,
    /// Labels right of the centre, nearest first.
    pub right: Vec<String>,
}

impl PhoneticContext {
    /// Build the ±`neighbours` window around `index` in a label track.
    /// Positions past either end repeat the edge label.
    pub fn from_labels(labels: &LabelTrack, index: usize, neighbours: usize) -> Self {
        let last = labels.len().saturating_sub(1);
        let phn = |i: i64| -> String {
            if labels.is_empty() {
                return String::new();
            }
            let i = i.clamp(0, last as i64) as usize;
            labels.items[i].phoneme.clone()
        };
        let index = index as i64;
        Self {
            left: (1..=neighbours as i64)
                .rev()
                .map(|d| phn(index - d))
                .collect(),
            center: phn(index),
            right: (1..=neighbours as i64).map(|d| phn(index + d)).collect(),
        }
    }

    /// Parse a flattened window produced by [`Self::flatten`]. An empty
    /// string parses to an empty window.
    pub fn parse(flat: &str) -> Self {
        if flat.is_empty() {
            return Self {
                left: vec![],
                center: String::new(),
                right: vec![],
            };
        }
        let parts: Vec<&str> = flat.split(CONTEXT_SEPARATOR).collect();
        let mid = parts.len() / 2;
        Self {
            left: parts[..mid].iter().map(|s| s.to_string()).collect(),
            center: parts[mid].to_string(),
            right: parts[mid + 1..].iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Flatten to the string form stored in codebook entries.
    pub fn flatten(&self) -> String {
        let mut parts: Vec<&str> = self.left.iter().map(String::as_str).collect();
        parts.push(&self.center);
        parts.extend(self.right.iter().map(String::as_str));
        parts.join(&CONTEXT_SEPARATOR.to_string())
    }

    /// Number of neighbours on each side.
    pub fn neighbours(&self) -> usize {
        self.left.len().max(self.right.len())
    }

    /// Integer match score against another window; see the module docs.
    pub fn match_score(&self, other: &PhoneticContext) -> u32 {
        if self.center.is_empty() || self.center != other.center {
            return 0;
        }
        let mut score = 1;
        // Left side, nearest neighbour first (stored nearest-last).
        for (a, b) in self.left.iter().rev().zip(other.left.iter().rev()) {
            if a != b {
                break;
            }
            score += 1;
        }
        for (a, b) in self.right.iter().zip(other.right.iter()) {
            if a != b {
                break;
            }
            score += 1;
        }
        score
    }

    /// All achievable scores for this window, in decreasing order. The
    /// preselection ladder walks these until it has enough candidates.
    pub fn possible_scores(&self) -> Vec<u32> {
        let max = 1 + (self.left.len() + self.right.len()) as u32;
        (0..=max).rev().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Label;

    fn track(phns: &[&str]) -> LabelTrack {
        LabelTrack::new(
            phns.iter()
                .enumerate()
                .map(|(i, p)| Label {
                    end_time_s: 0.1 * (i + 1) as f64,
                    phoneme: p.to_string(),
                })
                .collect(),
        )
    }

    #[test]
    fn test_from_labels_and_flatten() {
        let labels = track(&["sil", "s", "I", "t", "sil"]);
        let ctx = PhoneticContext::from_labels(&labels, 2, 2);
        assert_eq!(ctx.flatten(), "sil|s|I|t|sil");
        // Edges repeat.
        let edge = PhoneticContext::from_labels(&labels, 0, 2);
        assert_eq!(edge.flatten(), "sil|sil|sil|s|I");
    }

    #[test]
    fn test_parse_round_trip() {
        let ctx = PhoneticContext::parse("a|b|c|d|e");
        assert_eq!(ctx.center, "c");
        assert_eq!(ctx.flatten(), "a|b|c|d|e");
        let empty = PhoneticContext::parse("");
        assert_eq!(empty.match_score(&ctx), 0);
    }

    #[test]
    fn test_match_score_counts_contiguous_neighbours() {
        let a = PhoneticContext::parse("a|b|c|d|e");
        assert_eq!(a.match_score(&a), 5);
        // Centre mismatch scores zero regardless of neighbours.
        let other_center = PhoneticContext::parse("a|b|X|d|e");
        assert_eq!(a.match_score(&other_center), 0);
        // Mismatch one out on the left stops that side's scan.
        let one_off = PhoneticContext::parse("X|b|c|d|e");
        assert_eq!(a.match_score(&one_off), 4);
        // Inner mismatch hides the matching outer neighbour.
        let inner_off = PhoneticContext::parse("a|X|c|d|e");
        assert_eq!(a.match_score(&inner_off), 3);
    }

    #[test]
    fn test_possible_scores_descending() {
        let ctx = PhoneticContext::parse("a|b|c|d|e");
        assert_eq!(ctx.possible_scores(), vec![5, 4, 3, 2, 1, 0]);
    }
}
