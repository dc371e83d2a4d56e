//! Text normalization and tokenization shared by the scoring stages.
//!
//! ```ascii
//! "Résumé of Learning-Based Methods"
//!        │ lowercase + NFKD, strip combining marks
//!        ▼
//! "resume of learning-based methods"
//!        │ split on non-alphanumerics, drop short tokens
//!        ▼
//! [resume, of, learning, based, methods]
//!        │ stop words (optional)
//!        ▼
//! [resume, learning, based, methods]
//!        │ Porter2 stemming (optional)
//!        ▼
//! [resum, learn, base, method]
//! ```

use rust_stemmers::{Algorithm, Stemmer};
use unicode_normalization::UnicodeNormalization;

/// Configuration for the tokenizer.
#[derive(Debug, Clone)]
pub struct TokenizerConfig {
    /// Enable Porter2 stemming.
    pub enable_stemming: bool,
    /// Stemmer algorithm to use.
    pub stemmer_algorithm: Algorithm,
    /// Enable stop word filtering.
    pub enable_stop_words: bool,
    /// Tokens shorter than this (in chars) are dropped as noise.
    pub min_token_length: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            enable_stemming: true,
            stemmer_algorithm: Algorithm::English,
            enable_stop_words: true,
            min_token_length: 3,
        }
    }
}

impl TokenizerConfig {
    /// No stemming, no stop words.
    pub fn minimal() -> Self {
        Self {
            enable_stemming: false,
            stemmer_algorithm: Algorithm::English,
            enable_stop_words: false,
            min_token_length: 2,
        }
    }

    pub fn with_min_token_length(mut self, len: usize) -> Self {
        self.min_token_length = len.max(1);
        self
    }
}

/// Common English stop words, sorted for binary search.
const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "all", "also", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "could",
    "did", "do", "does", "for", "from", "had", "has", "have", "he", "if", "in", "is", "it", "its",
    "just", "may", "might", "must", "no", "not", "of", "on", "or", "our", "out", "should", "so",
    "than", "that", "the", "their", "then", "there", "they", "this", "to", "too", "up", "using",
    "very", "via", "was", "we", "were", "what", "when", "where", "which", "who", "will", "with",
    "would", "you", "your",
];

/// Lowercase, decompose and strip combining marks.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .nfkd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect()
}

/// Copy at most `max_chars` characters of `text` into `out`.
///
/// Returns the number of characters written.
pub fn push_truncated(out: &mut String, text: &str, max_chars: usize) -> usize {
    let mut written = 0;
    for c in text.chars() {
        if written == max_chars {
            break;
        }
        out.push(c);
        written += 1;
    }
    written
}

/// Tokenizer with a stemmer built once and reused for every text.
pub struct TextTokenizer {
    config: TokenizerConfig,
    stemmer: Option<Stemmer>,
}

impl TextTokenizer {
    pub fn new(config: TokenizerConfig) -> Self {
        let stemmer = config
            .enable_stemming
            .then(|| Stemmer::create(config.stemmer_algorithm));
        Self { config, stemmer }
    }

    pub fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    fn is_stop_word(word: &str) -> bool {
        ENGLISH_STOP_WORDS.binary_search(&word).is_ok()
    }

    /// Tokenize text that has already gone through [`normalize_text`].
    pub fn tokenize_normalized(&self, normalized: &str) -> Vec<String> {
        normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty() && s.chars().count() >= self.config.min_token_length)
            .filter(|s| !(self.config.enable_stop_words && Self::is_stop_word(s)))
            .map(|s| match &self.stemmer {
                Some(stemmer) => stemmer.stem(s).into_owned(),
                None => s.to_string(),
            })
            .collect()
    }

    /// Normalize and tokenize.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        self.tokenize_normalized(&normalize_text(text))
    }
}

impl Default for TextTokenizer {
    fn default() -> Self {
        Self::new(TokenizerConfig::default())
    }
}

impl Clone for TextTokenizer {
    fn clone(&self) -> Self {
        Self::new(self.config.clone())
    }
}

impl std::fmt::Debug for TextTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextTokenizer")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_words_sorted() {
        let mut sorted = ENGLISH_STOP_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, ENGLISH_STOP_WORDS);
    }

    #[test]
    fn test_tokenize_stems_and_filters() {
        let tokenizer = TextTokenizer::default();
        let tokens = tokenizer.tokenize("The Learning of Neural Networks");
        assert_eq!(tokens, vec!["learn", "neural", "network"]);
    }

    #[test]
    fn test_min_token_length_drops_noise() {
        let tokenizer = TextTokenizer::new(TokenizerConfig::minimal().with_min_token_length(3));
        let tokens = tokenizer.tokenize("AI in ML research");
        assert_eq!(tokens, vec!["research"]);
    }

    #[test]
    fn test_normalize_strips_accents() {
        assert_eq!(normalize_text("Résumé Über"), "resume uber");
    }

    #[test]
    fn test_push_truncated_respects_char_boundaries() {
        let mut out = String::new();
        let written = push_truncated(&mut out, "héllo wörld", 4);
        assert_eq!(written, 4);
        assert_eq!(out, "héll");
    }
}
