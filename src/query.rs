//! Query normalization.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use crate::domain::{Domain, DomainClassifier};
use crate::error::{Result, StageError};
use crate::tokenizer::{normalize_text, TextTokenizer};

/// Longest query accepted, in characters.
pub const MAX_QUERY_CHARS: usize = 2048;

/// A normalized query with its term list and inferred domain signature.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryContext {
    /// The query as supplied, trimmed.
    pub raw: String,
    /// Lowercased, accent-stripped, whitespace-collapsed form. Cache keys use this.
    pub normalized: Arc<str>,
    /// Unique query terms in first-occurrence order, after tokenization.
    pub terms: Vec<String>,
    /// Domains the query text itself points at.
    pub domains: Vec<Domain>,
}

impl QueryContext {
    /// Build a query context with explicit components.
    pub fn build(raw: &str, tokenizer: &TextTokenizer, classifier: &DomainClassifier) -> Self {
        let raw = raw.trim().to_string();
        let normalized_text = normalize_text(&raw);
        let normalized: String = normalized_text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        let mut seen = HashSet::new();
        let terms = tokenizer
            .tokenize_normalized(&normalized)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();

        let domains = classifier.classify_normalized("", &normalized);

        Self {
            raw,
            normalized: Arc::from(normalized),
            terms,
            domains,
        }
    }

    /// Build with the default tokenizer and a process-wide classifier.
    pub fn parse(raw: &str) -> Self {
        static CLASSIFIER: OnceLock<DomainClassifier> = OnceLock::new();
        let classifier = CLASSIFIER.get_or_init(DomainClassifier::new);
        Self::build(raw, &TextTokenizer::default(), classifier)
    }

    /// Reject queries the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.normalized.is_empty() {
            return Err(StageError::ValidationFailure("query is empty".to_string()));
        }
        if self.raw.chars().count() > MAX_QUERY_CHARS {
            return Err(StageError::ValidationFailure(format!(
                "query exceeds {} characters",
                MAX_QUERY_CHARS
            )));
        }
        Ok(())
    }

    /// Whether the query yielded any usable terms.
    pub fn has_terms(&self) -> bool {
        !self.terms.is_empty()
    }
}
