//! BM25 lexical scoring and the recall cut.
//!
//! # Algorithm
//!
//! ```ascii
//! score(D) = Σ_q IDF(q) × tf(q,D)×(k1+1) / (tf(q,D) + k1×(1-b+b×|D|bg/avgbg))
//!
//! tf(q,D)  = title_weight × tf_title(q) + tf_abstract(q)
//! |D|bg    = tokens of D that are not query terms
//! IDF(q)   = ln((N - n(q) + 0.5) / (n(q) + 0.5) + 1)
//! ```
//!
//! Title and abstract are counted independently and combined with a title
//! weight so a title hit outranks an abstract-only hit. Length normalization
//! only counts background (non-query) tokens: one more query-term occurrence
//! can therefore never lower a document's score.
//!
//! Scoring and the recall cut are separate steps. [`LexicalScorer::score`]
//! never drops input; [`RecallFilter::apply`] applies the threshold and steps
//! aside when the scores are degenerate.
//!
//! # References
//!
//! - Robertson, S., Zaragoza, H. (2009). The Probabilistic Relevance Framework

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::candidate::{Candidate, ScoredCandidate};
use crate::config::LexicalConfig;
use crate::query::QueryContext;
use crate::tokenizer::{TextTokenizer, TokenizerConfig};

/// Per-document term statistics.
struct DocStats {
    tf_title: Vec<u32>,
    tf_abstract: Vec<u32>,
    background_len: usize,
}

/// BM25 scorer over title and abstract.
///
/// # Presets
///
/// | Preset | k1 | b | title weight |
/// |--------|----|----|------|
/// | `new()` | 1.2 | 0.75 | 2.0 |
/// | `for_short_docs()` | 1.2 | 0.3 | 1.5 |
/// | `for_long_docs()` | 1.5 | 0.75 | 2.5 |
#[derive(Debug, Clone)]
pub struct LexicalScorer {
    /// Term frequency saturation.
    pub k1: f64,
    /// Length normalization, 0 = none, 1 = full.
    pub b: f64,
    /// Multiplier applied to title occurrences.
    pub title_weight: f64,
    tokenizer: TextTokenizer,
}

impl LexicalScorer {
    pub fn new() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            title_weight: 2.0,
            tokenizer: TextTokenizer::default(),
        }
    }

    /// Preset for title-only or very short records.
    pub fn for_short_docs() -> Self {
        Self {
            k1: 1.2,
            b: 0.3,
            title_weight: 1.5,
            tokenizer: TextTokenizer::default(),
        }
    }

    /// Preset for full-text-like records.
    pub fn for_long_docs() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            title_weight: 2.5,
            tokenizer: TextTokenizer::default(),
        }
    }

    pub fn with_params(k1: f64, b: f64) -> Self {
        Self {
            k1: k1.clamp(0.0, 3.0),
            b: b.clamp(0.0, 1.0),
            ..Self::new()
        }
    }

    pub fn from_config(config: &LexicalConfig) -> Self {
        Self {
            k1: config.k1.clamp(0.0, 3.0),
            b: config.b.clamp(0.0, 1.0),
            title_weight: config.title_weight.max(1.0),
            tokenizer: TextTokenizer::new(
                TokenizerConfig::default().with_min_token_length(config.min_term_length),
            ),
        }
    }

    pub fn with_title_weight(mut self, weight: f64) -> Self {
        self.title_weight = weight.max(1.0);
        self
    }

    pub fn with_tokenizer_config(mut self, config: TokenizerConfig) -> Self {
        self.tokenizer = TextTokenizer::new(config);
        self
    }

    pub fn tokenizer(&self) -> &TextTokenizer {
        &self.tokenizer
    }

    /// Compute IDF from a document frequency.
    #[inline]
    pub(crate) fn compute_idf_from_df(n: f64, df: f64) -> f64 {
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn collect_stats(
        &self,
        text: &str,
        term_index: &HashMap<&str, usize>,
        tf: &mut [u32],
        background_len: &mut usize,
    ) {
        for token in self.tokenizer.tokenize(text) {
            match term_index.get(token.as_str()) {
                Some(&i) => tf[i] += 1,
                None => *background_len += 1,
            }
        }
    }

    /// Score every candidate. Output has the same length and order as input.
    pub fn score(&self, query: &QueryContext, candidates: &[Arc<Candidate>]) -> Vec<ScoredCandidate> {
        if candidates.is_empty() {
            return Vec::new();
        }
        if !query.has_terms() {
            debug!("Query has no usable terms, all lexical scores are zero");
            return candidates
                .iter()
                .map(|c| ScoredCandidate::new(Arc::clone(c), 0.0))
                .collect();
        }

        // Built once per query, shared by all candidates.
        let term_index: HashMap<&str, usize> = query
            .terms
            .iter()
            .enumerate()
            .map(|(i, t)| (t.as_str(), i))
            .collect();
        let n_terms = query.terms.len();

        let stats: Vec<DocStats> = candidates
            .iter()
            .map(|candidate| {
                let mut doc = DocStats {
                    tf_title: vec![0; n_terms],
                    tf_abstract: vec![0; n_terms],
                    background_len: 0,
                };
                self.collect_stats(
                    &candidate.title,
                    &term_index,
                    &mut doc.tf_title,
                    &mut doc.background_len,
                );
                self.collect_stats(
                    candidate.abstract_or_empty(),
                    &term_index,
                    &mut doc.tf_abstract,
                    &mut doc.background_len,
                );
                doc
            })
            .collect();

        let n = stats.len() as f64;
        let avg_background = (stats.iter().map(|d| d.background_len).sum::<usize>() as f64 / n).max(1.0);

        let idf: Vec<f64> = (0..n_terms)
            .map(|i| {
                let df = stats
                    .iter()
                    .filter(|d| d.tf_title[i] + d.tf_abstract[i] > 0)
                    .count() as f64;
                Self::compute_idf_from_df(n, df)
            })
            .collect();

        candidates
            .iter()
            .zip(stats.iter())
            .map(|(candidate, doc)| {
                let length_norm =
                    1.0 - self.b + self.b * (doc.background_len as f64 / avg_background);
                let score: f64 = (0..n_terms)
                    .map(|i| {
                        let tf = self.title_weight * doc.tf_title[i] as f64
                            + doc.tf_abstract[i] as f64;
                        if tf > 0.0 {
                            idf[i] * (tf * (self.k1 + 1.0)) / (tf + self.k1 * length_norm)
                        } else {
                            0.0
                        }
                    })
                    .sum();
                ScoredCandidate::new(Arc::clone(candidate), score)
            })
            .collect()
    }
}

impl Default for LexicalScorer {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of the recall cut.
#[derive(Debug, Clone)]
pub struct RecallOutcome {
    pub candidates: Vec<ScoredCandidate>,
    pub dropped: usize,
    /// The cut was skipped because the scores were degenerate.
    pub bypassed: bool,
    pub bypass_reason: Option<String>,
}

/// Applies the lexical recall threshold.
///
/// The threshold is relative to the best lexical score of the run, so a
/// corpus where every term is common (tiny IDF) is not wiped out.
#[derive(Debug, Clone)]
pub struct RecallFilter {
    /// Fraction of the run's maximum score a candidate must reach.
    pub relative_threshold: f64,
    /// Bypass when at least this fraction of candidates falls below the cut.
    pub degenerate_ratio: f64,
}

impl Default for RecallFilter {
    fn default() -> Self {
        Self {
            relative_threshold: 0.05,
            degenerate_ratio: 0.95,
        }
    }
}

impl RecallFilter {
    pub fn new(relative_threshold: f64, degenerate_ratio: f64) -> Self {
        Self {
            relative_threshold: relative_threshold.clamp(0.0, 1.0),
            degenerate_ratio: degenerate_ratio.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &LexicalConfig) -> Self {
        Self::new(config.recall_threshold, config.degenerate_ratio)
    }

    /// Keep candidates at or above the cut, or everything when degenerate.
    pub fn apply(&self, scored: Vec<ScoredCandidate>) -> RecallOutcome {
        if scored.is_empty() {
            return RecallOutcome {
                candidates: scored,
                dropped: 0,
                bypassed: false,
                bypass_reason: None,
            };
        }

        let max = scored
            .iter()
            .map(|c| c.lexical_score)
            .fold(f64::NEG_INFINITY, f64::max);

        if max <= 0.0 {
            warn!(
                candidates = scored.len(),
                "All lexical scores are zero, bypassing recall cut"
            );
            return Self::bypass(scored, "all lexical scores are zero");
        }

        let cut = self.relative_threshold * max;
        let below = scored.iter().filter(|c| c.lexical_score < cut).count();
        let below_ratio = below as f64 / scored.len() as f64;

        if below_ratio >= self.degenerate_ratio {
            warn!(
                below,
                candidates = scored.len(),
                "Recall cut would reject nearly everything, bypassing"
            );
            return Self::bypass(
                scored,
                &format!("{:.0}% of candidates below recall threshold", below_ratio * 100.0),
            );
        }

        let total = scored.len();
        let candidates: Vec<ScoredCandidate> = scored
            .into_iter()
            .filter(|c| c.lexical_score >= cut)
            .collect();

        RecallOutcome {
            dropped: total - candidates.len(),
            candidates,
            bypassed: false,
            bypass_reason: None,
        }
    }

    fn bypass(scored: Vec<ScoredCandidate>, reason: &str) -> RecallOutcome {
        RecallOutcome {
            candidates: scored,
            dropped: 0,
            bypassed: true,
            bypass_reason: Some(reason.to_string()),
        }
    }
}
