//! Term overlap cross-encoder.
//!
//! A local, deterministic stand-in for a neural cross-encoder.
//!
//! # When to Use
//!
//! - Development and tests (no model, no network)
//! - Offline runs where a hosted model is not reachable
//!
//! # Limitations
//!
//! - No semantics: synonyms and paraphrases score zero
//! - No IDF weighting

use async_trait::async_trait;
use std::collections::HashSet;

use super::pair::PairInput;
use super::traits::CrossEncoder;
use crate::error::DependencyError;
use crate::tokenizer::TextTokenizer;

/// Scores a pair by how much of the query the document covers.
///
/// # Algorithm
///
/// ```ascii
/// coverage = |query terms ∩ doc terms| / |query terms|
/// density  = query-term occurrences / doc tokens
/// score    = 0.8 × coverage + 0.2 × density
/// ```
pub struct TermOverlapCrossEncoder {
    model: String,
    tokenizer: TextTokenizer,
}

impl TermOverlapCrossEncoder {
    pub fn new() -> Self {
        Self {
            model: "term-overlap-cross-encoder".to_string(),
            tokenizer: TextTokenizer::default(),
        }
    }

    fn score_pair(&self, pair: &PairInput) -> f64 {
        let query_terms: HashSet<String> = self.tokenizer.tokenize(&pair.query).into_iter().collect();
        if query_terms.is_empty() {
            return 0.0;
        }

        let doc_tokens = self.tokenizer.tokenize(&pair.document);
        if doc_tokens.is_empty() {
            return 0.0;
        }

        let matched: HashSet<&String> = doc_tokens
            .iter()
            .filter(|t| query_terms.contains(*t))
            .collect();
        let occurrences = doc_tokens.iter().filter(|t| query_terms.contains(*t)).count();

        let coverage = matched.len() as f64 / query_terms.len() as f64;
        let density = occurrences as f64 / doc_tokens.len() as f64;
        (0.8 * coverage + 0.2 * density).clamp(0.0, 1.0)
    }
}

impl Default for TermOverlapCrossEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CrossEncoder for TermOverlapCrossEncoder {
    fn name(&self) -> &str {
        "term-overlap"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn score(&self, pairs: &[PairInput]) -> Result<Vec<f64>, DependencyError> {
        Ok(pairs.iter().map(|pair| self.score_pair(pair)).collect())
    }
}
