//! Scorer / Ranker

use crate::config::ScoringConfig;
use crate::model::IndexCandidate;
use std::cmp::Ordering;
use tracing::debug;

/// Ranked output of one run
#[derive(Debug, Clone, Default)]
pub struct Ranking {
    pub recommendations: Vec<IndexCandidate>,
    /// Candidates dropped as redundant prefixes
    pub pruned: usize,
    /// Candidates cut by `max_recommendations`
    pub truncated: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Scorer {
    config: ScoringConfig,
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// `frequency_weight * sum(frequency * (1 - selectivity)) - field_penalty * (fields - 1)`,
    /// never negative.
    pub fn score(&self, candidate: &IndexCandidate) -> f64 {
        let benefit = candidate.frequency as f64 * (1.0 - candidate.selectivity.clamp(0.0, 1.0));
        let penalty = self.config.field_penalty * candidate.len().saturating_sub(1) as f64;
        (self.config.frequency_weight * benefit - penalty).max(0.0)
    }

    /// Score, drop redundant prefixes, order, and apply the optional cutoff.
    pub fn rank(&self, mut candidates: Vec<IndexCandidate>, max_recommendations: Option<usize>) -> Ranking {
        for candidate in candidates.iter_mut() {
            candidate.score = self.score(candidate);
        }

        let before = candidates.len();
        let mut recommendations = prune_redundant(candidates);
        let pruned = before - recommendations.len();

        recommendations.sort_by(compare_ranked);

        let mut truncated = 0;
        if let Some(max) = max_recommendations {
            truncated = recommendations.len().saturating_sub(max);
            recommendations.truncate(max);
        }

        debug!(
            ranked = recommendations.len(),
            pruned,
            truncated,
            "Ranked index candidates"
        );
        Ranking {
            recommendations,
            pruned,
            truncated,
        }
    }
}

/// Drop every candidate whose fields are a strict prefix of another
/// candidate scoring at least as well.
pub fn prune_redundant(candidates: Vec<IndexCandidate>) -> Vec<IndexCandidate> {
    let redundant: Vec<bool> = candidates
        .iter()
        .map(|a| {
            candidates
                .iter()
                .any(|b| a.is_strict_prefix_of(b) && b.score >= a.score)
        })
        .collect();

    candidates
        .into_iter()
        .zip(redundant)
        .filter_map(|(candidate, redundant)| (!redundant).then_some(candidate))
        .collect()
}

/// Score descending, then frequency descending, then fewer fields, then
/// field order. Frequency only decides between equal scores, which is what
/// orders an all-worst-case (empty sample) ranking.
pub fn compare_ranked(a: &IndexCandidate, b: &IndexCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.frequency.cmp(&a.frequency))
        .then_with(|| a.len().cmp(&b.len()))
        .then_with(|| a.fields.cmp(&b.fields))
}
