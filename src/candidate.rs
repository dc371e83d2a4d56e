//! Bibliographic records and their per-stage annotations.
//!
//! ```ascii
//! ┌────────────────┐  Arc   ┌──────────────────────────────────────────┐
//! │   Candidate    │ ◄───── │ ScoredCandidate                          │
//! │ (immutable)    │        │  lexical_score   (LexicalScorer)         │
//! └────────────────┘        │  neural_score    (NeuralReranker)        │
//!                           │  domain_tags     (DomainAspectFilter)    │
//!                           │  quality_score   (QualityScorer)         │
//!                           │  final_rank      (DiversitySampler)      │
//!                           └──────────────────────────────────────────┘
//! ```
//!
//! Candidates are shared behind `Arc` and never mutated. Every stage returns a
//! new `ScoredCandidate` built with one of the `with_*` methods, so a batch
//! still in flight in the reranker never observes a half-updated record.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::Domain;

/// A bibliographic record produced by the aggregation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Stable provider-independent id (may be empty).
    #[serde(default)]
    pub id: String,
    /// Digital Object Identifier.
    #[serde(default)]
    pub doi: Option<String>,
    pub title: String,
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    /// Provider-reported venue prestige on a 0-100 scale, when known.
    #[serde(default)]
    pub venue_prestige: Option<f64>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub citation_count: Option<u32>,
    /// Provider/source tag, e.g. `openalex`, `pubmed`.
    pub source: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl Candidate {
    /// Create a candidate with only the required fields.
    pub fn new(id: impl Into<String>, title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            doi: None,
            title: title.into(),
            abstract_text: None,
            venue: None,
            venue_prestige: None,
            year: None,
            citation_count: None,
            source: source.into(),
            url: None,
        }
    }

    pub fn with_abstract(mut self, text: impl Into<String>) -> Self {
        self.abstract_text = Some(text.into());
        self
    }

    pub fn with_doi(mut self, doi: impl Into<String>) -> Self {
        self.doi = Some(doi.into());
        self
    }

    pub fn with_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = Some(venue.into());
        self
    }

    pub fn with_venue_prestige(mut self, prestige: f64) -> Self {
        self.venue_prestige = Some(prestige);
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_citations(mut self, count: u32) -> Self {
        self.citation_count = Some(count);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Stable identity used for caching and de-duplication.
    ///
    /// Preference order: explicit id, DOI, normalized title.
    pub fn identity_key(&self) -> String {
        let id = self.id.trim();
        if !id.is_empty() {
            return format!("id:{}", id);
        }
        if let Some(doi) = self.doi.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            return format!("doi:{}", doi.to_lowercase());
        }
        let title: Vec<String> = self
            .title
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
            .collect();
        format!("title:{}", title.join(" "))
    }

    /// Abstract text, or empty when the provider supplied none.
    pub fn abstract_or_empty(&self) -> &str {
        self.abstract_text.as_deref().unwrap_or("")
    }
}

/// A candidate plus the scores attached by each stage so far.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: Arc<Candidate>,
    pub lexical_score: f64,
    /// Absent when inference was skipped or failed for this candidate.
    pub neural_score: Option<f64>,
    /// Tags inferred by the domain classifier, primary tag first.
    pub domain_tags: Vec<Domain>,
    pub domain_match: Option<bool>,
    pub quality_score: Option<f64>,
    pub final_rank: Option<f64>,
}

impl ScoredCandidate {
    pub fn new(candidate: Arc<Candidate>, lexical_score: f64) -> Self {
        Self {
            candidate,
            lexical_score,
            neural_score: None,
            domain_tags: Vec::new(),
            domain_match: None,
            quality_score: None,
            final_rank: None,
        }
    }

    pub fn with_neural_score(&self, score: f64) -> Self {
        Self {
            neural_score: Some(score.clamp(0.0, 1.0)),
            ..self.clone()
        }
    }

    pub fn with_domain(&self, tags: Vec<Domain>, matched: bool) -> Self {
        Self {
            domain_tags: tags,
            domain_match: Some(matched),
            ..self.clone()
        }
    }

    pub fn with_quality_score(&self, score: f64) -> Self {
        Self {
            quality_score: Some(score.clamp(0.0, 100.0)),
            ..self.clone()
        }
    }

    pub fn with_final_rank(&self, rank: f64) -> Self {
        Self {
            final_rank: Some(rank),
            ..self.clone()
        }
    }

    /// Relevance signal in [0, 1]: the neural score, or the lexical score
    /// normalized by `lexical_max` when inference produced nothing.
    pub fn relevance(&self, lexical_max: f64) -> f64 {
        match self.neural_score {
            Some(score) => score,
            None if lexical_max > 0.0 => (self.lexical_score / lexical_max).clamp(0.0, 1.0),
            None => 0.0,
        }
    }

    pub fn source(&self) -> &str {
        &self.candidate.source
    }
}

/// One entry of the pipeline output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResult {
    pub candidate: Candidate,
    pub lexical_score: f64,
    pub neural_score: Option<f64>,
    pub quality_score: f64,
    pub final_rank: f64,
    /// 1-based position in the output list.
    pub position: usize,
    pub domain: Option<Domain>,
}

impl RankedResult {
    pub(crate) fn from_scored(scored: &ScoredCandidate, position: usize) -> Self {
        Self {
            candidate: scored.candidate.as_ref().clone(),
            lexical_score: scored.lexical_score,
            neural_score: scored.neural_score,
            quality_score: scored.quality_score.unwrap_or(0.0),
            final_rank: scored.final_rank.unwrap_or(0.0),
            position,
            domain: scored.domain_tags.first().copied(),
        }
    }
}
