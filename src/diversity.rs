//! Final ranking and source-diverse selection.
//!
//! ```ascii
//! final_rank = blend × quality / 100 + (1 − blend) × relevance
//!
//! sorted by final_rank ──► pick best ──► same source as last N picks? ──► skip for now
//!                              ▲                                   │
//!                              └───────────────────────────────────┘
//! ```
//!
//! The consecutive-source cap is soft: once only one source has candidates
//! left, they are taken in rank order.

use std::cmp::Ordering;

use crate::candidate::ScoredCandidate;
use crate::config::DiversityConfig;

/// Blends relevance with quality and selects a source-diverse top list.
#[derive(Debug, Clone)]
pub struct DiversitySampler {
    max_consecutive_per_source: usize,
    quality_blend: f64,
}

impl DiversitySampler {
    pub fn new(config: &DiversityConfig) -> Self {
        Self {
            max_consecutive_per_source: config.max_consecutive_per_source.max(1),
            quality_blend: config.quality_blend.clamp(0.0, 1.0),
        }
    }

    /// Attach `final_rank` to every candidate.
    ///
    /// A candidate without a quality score counts as neutral.
    pub fn rank(&self, candidates: &[ScoredCandidate]) -> Vec<ScoredCandidate> {
        let lexical_max = candidates
            .iter()
            .map(|c| c.lexical_score)
            .fold(0.0, f64::max);
        candidates
            .iter()
            .map(|c| {
                let quality = c.quality_score.unwrap_or(50.0) / 100.0;
                let relevance = c.relevance(lexical_max);
                c.with_final_rank(
                    self.quality_blend * quality + (1.0 - self.quality_blend) * relevance,
                )
            })
            .collect()
    }

    /// Choose up to `limit` candidates by `final_rank`, spreading sources.
    ///
    /// If any candidate lacks a `final_rank`, the whole pool is ranked first.
    pub fn select(&self, candidates: Vec<ScoredCandidate>, limit: usize) -> Vec<ScoredCandidate> {
        let mut pool = if candidates.iter().all(|c| c.final_rank.is_some()) {
            candidates
        } else {
            self.rank(&candidates)
        };
        // Stable sort keeps upstream order among ties.
        pool.sort_by(|a, b| {
            b.final_rank
                .partial_cmp(&a.final_rank)
                .unwrap_or(Ordering::Equal)
        });

        let mut selected: Vec<ScoredCandidate> = Vec::with_capacity(limit.min(pool.len()));
        while selected.len() < limit && !pool.is_empty() {
            let pick = pool
                .iter()
                .position(|c| !self.would_exceed(&selected, c.source()))
                .unwrap_or(0);
            selected.push(pool.remove(pick));
        }
        selected
    }

    fn would_exceed(&self, selected: &[ScoredCandidate], source: &str) -> bool {
        selected.len() >= self.max_consecutive_per_source
            && selected
                .iter()
                .rev()
                .take(self.max_consecutive_per_source)
                .all(|c| c.source() == source)
    }
}

impl Default for DiversitySampler {
    fn default() -> Self {
        Self::new(&DiversityConfig::default())
    }
}
