//! Query/document pairs fed to the cross-encoder.

use std::sync::Arc;

use crate::candidate::Candidate;
use crate::tokenizer::push_truncated;

/// Separator between query and document in the joined model input.
pub const PAIR_SEPARATOR: &str = " [SEP] ";

/// One (query, document) pair.
///
/// The document is title then abstract, truncated into a bounded buffer
/// before it is ever joined with the query, so an oversized abstract never
/// inflates the model input.
#[derive(Debug, Clone, PartialEq)]
pub struct PairInput {
    pub query: Arc<str>,
    pub document: String,
}

impl PairInput {
    pub fn new(query: Arc<str>, candidate: &Candidate, max_document_chars: usize) -> Self {
        let mut document = String::with_capacity(max_document_chars.min(4096));
        let mut remaining = max_document_chars;
        remaining -= push_truncated(&mut document, candidate.title.trim(), remaining);

        let abstract_text = candidate.abstract_or_empty().trim();
        if remaining > 1 && !abstract_text.is_empty() {
            document.push(' ');
            push_truncated(&mut document, abstract_text, remaining - 1);
        }

        Self { query, document }
    }

    /// `query [SEP] document`, the single-string form used by local models.
    pub fn joined(&self) -> String {
        let mut out =
            String::with_capacity(self.query.len() + PAIR_SEPARATOR.len() + self.document.len());
        out.push_str(&self.query);
        out.push_str(PAIR_SEPARATOR);
        out.push_str(&self.document);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_truncates_document() {
        let candidate = Candidate::new("a", "Title", "s").with_abstract("x".repeat(5000));
        let pair = PairInput::new(Arc::from("q"), &candidate, 100);
        assert_eq!(pair.document.chars().count(), 100);
        assert!(pair.document.starts_with("Title "));
        assert_eq!(pair.joined(), format!("q [SEP] {}", pair.document));
    }

    #[test]
    fn test_pair_without_abstract() {
        let candidate = Candidate::new("a", "  Protein folding ", "s");
        let pair = PairInput::new(Arc::from("q"), &candidate, 100);
        assert_eq!(pair.document, "Protein folding");
    }

    #[test]
    fn test_title_longer_than_budget() {
        let candidate = Candidate::new("a", "abcdefghij", "s").with_abstract("more");
        let pair = PairInput::new(Arc::from("q"), &candidate, 4);
        assert_eq!(pair.document, "abcd");
    }
}
