//! Adaptive multi-factor quality scoring.
//!
//! # Factors
//!
//! | Factor | Sub-score (0-100) | Needs |
//! |--------|-------------------|-------|
//! | Citation impact | `100 × ln(1 + rate) / ln(1 + cap)`, rate = citations per year | citation count |
//! | Venue prestige | metadata-free composite shifted by prestige − run mean | prestige |
//! | Recency | `100 × 0.5^(age / half_life)` | year |
//!
//! # Adaptive weights
//!
//! ```ascii
//! venue known:    0.30 × citation + 0.50 × venue + 0.20 × recency
//! venue unknown:  0.60 × citation            + 0.40 × recency
//! ```
//!
//! Weights of missing factors are redistributed proportionally over the
//! factors that are present. The venue sub-score is anchored on the
//! composite of the other factors, so a venue of exactly average prestige
//! leaves the score where it would be without venue metadata. Candidates
//! from sources that expose no venue metrics are therefore not pushed
//! down relative to metadata-rich sources.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::candidate::{Candidate, ScoredCandidate};
use crate::config::QualityConfig;
use crate::error::ConfigError;
use crate::tokenizer::normalize_text;

/// Score used when a candidate has no usable metadata at all.
pub const NEUTRAL_QUALITY: f64 = 50.0;

/// Relative weights of the three quality factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    pub citation: f64,
    pub venue: f64,
    pub recency: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            citation: 0.30,
            venue: 0.50,
            recency: 0.20,
        }
    }
}

impl QualityWeights {
    pub fn new(citation: f64, venue: f64, recency: f64) -> Self {
        Self {
            citation,
            venue,
            recency,
        }
    }

    /// Weights must be non-negative and sum to 1.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let all = [self.citation, self.venue, self.recency];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::Validation(
                "quality.weights must be non-negative".to_string(),
            ));
        }
        let sum: f64 = all.iter().sum();
        if (sum - 1.0).abs() > 0.01 {
            return Err(ConfigError::Validation(format!(
                "quality.weights must sum to 1.0 (got {:.3})",
                sum
            )));
        }
        Ok(())
    }

    /// Citation and recency weights with the venue share redistributed.
    pub fn without_venue(&self) -> (f64, f64) {
        let rest = self.citation + self.recency;
        if rest <= 0.0 {
            (0.5, 0.5)
        } else {
            (self.citation / rest, self.recency / rest)
        }
    }
}

// ============================================================================
// Venue Catalog
// ============================================================================

/// Built-in prestige table, keyed by normalized venue name.
const BUILTIN_VENUES: &[(&str, f64)] = &[
    ("nature", 98.0),
    ("science", 97.0),
    ("cell", 95.0),
    ("the lancet", 96.0),
    ("new england journal of medicine", 97.0),
    ("jama", 94.0),
    ("physical review letters", 92.0),
    ("proceedings of the national academy of sciences", 90.0),
    ("neurips", 92.0),
    ("advances in neural information processing systems", 92.0),
    ("icml", 91.0),
    ("international conference on machine learning", 91.0),
    ("iclr", 90.0),
    ("cvpr", 90.0),
    ("acl", 86.0),
    ("emnlp", 84.0),
    ("aaai", 80.0),
    ("ieee transactions on pattern analysis and machine intelligence", 93.0),
    ("journal of machine learning research", 88.0),
    ("bmj", 90.0),
    ("nature communications", 85.0),
    ("scientific reports", 65.0),
    ("plos one", 60.0),
    ("ieee access", 55.0),
];

/// Lookup table from venue name to prestige (0-100).
#[derive(Debug, Clone, Default)]
pub struct VenueCatalog {
    entries: HashMap<String, f64>,
}

impl VenueCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for (name, prestige) in BUILTIN_VENUES {
            catalog.insert(name, *prestige);
        }
        catalog
    }

    pub fn insert(&mut self, venue: &str, prestige: f64) {
        self.entries
            .insert(Self::normalize(venue), prestige.clamp(0.0, 100.0));
    }

    pub fn with_entries<'a>(mut self, entries: impl IntoIterator<Item = (&'a String, &'a f64)>) -> Self {
        for (venue, prestige) in entries {
            self.insert(venue, *prestige);
        }
        self
    }

    pub fn lookup(&self, venue: &str) -> Option<f64> {
        self.entries.get(&Self::normalize(venue)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn normalize(venue: &str) -> String {
        normalize_text(venue)
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ============================================================================
// Quality Scorer
// ============================================================================

/// Per-factor view of one candidate's quality score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityBreakdown {
    pub citation: Option<f64>,
    pub venue: Option<f64>,
    pub recency: Option<f64>,
    /// Whether the venue-aware weights were used.
    pub venue_weighted: bool,
    pub score: f64,
}

/// Computes quality scores with adaptive weights.
#[derive(Debug, Clone)]
pub struct QualityScorer {
    weights: QualityWeights,
    citation_rate_cap: f64,
    half_life_years: f64,
    reference_year: i32,
    catalog: VenueCatalog,
    /// Mean prestige of the population being ranked.
    baseline_prestige: f64,
}

impl QualityScorer {
    pub fn new(config: &QualityConfig) -> Self {
        Self {
            weights: config.weights.unwrap_or_default(),
            citation_rate_cap: config.citation_rate_cap.max(f64::EPSILON),
            half_life_years: config.recency_half_life_years.max(f64::EPSILON),
            reference_year: config.reference_year.unwrap_or_else(current_year),
            catalog: VenueCatalog::builtin().with_entries(&config.venues),
            baseline_prestige: NEUTRAL_QUALITY,
        }
    }

    pub fn with_reference_year(mut self, year: i32) -> Self {
        self.reference_year = year;
        self
    }

    pub fn with_catalog(mut self, catalog: VenueCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn weights(&self) -> &QualityWeights {
        &self.weights
    }

    pub fn baseline_prestige(&self) -> f64 {
        self.baseline_prestige
    }

    /// Prestige from the candidate itself, else from the catalog.
    pub fn prestige(&self, candidate: &Candidate) -> Option<f64> {
        candidate
            .venue_prestige
            .filter(|p| p.is_finite())
            .or_else(|| candidate.venue.as_deref().and_then(|v| self.catalog.lookup(v)))
            .map(|p| p.clamp(0.0, 100.0))
    }

    /// A copy whose venue baseline is the mean prestige of `candidates`.
    ///
    /// Falls back to the neutral baseline when nobody has prestige data.
    pub fn calibrated(&self, candidates: &[ScoredCandidate]) -> Self {
        let known: Vec<f64> = candidates
            .iter()
            .filter_map(|c| self.prestige(&c.candidate))
            .collect();
        let baseline_prestige = if known.is_empty() {
            NEUTRAL_QUALITY
        } else {
            known.iter().sum::<f64>() / known.len() as f64
        };
        Self {
            baseline_prestige,
            ..self.clone()
        }
    }

    fn age_years(&self, year: i32) -> f64 {
        // Widened: provider years are untrusted and may sit at the i32 limits.
        let age = i64::from(self.reference_year) - i64::from(year);
        age.max(0) as f64
    }

    fn citation_score(&self, candidate: &Candidate) -> Option<f64> {
        let citations = f64::from(candidate.citation_count?);
        // Unknown year: assume a half-life-old paper rather than a brand new one.
        let age = candidate
            .year
            .map(|y| self.age_years(y))
            .unwrap_or(self.half_life_years);
        let rate = citations / age.max(1.0);
        let score = 100.0 * (1.0 + rate).ln() / (1.0 + self.citation_rate_cap).ln();
        Some(score.clamp(0.0, 100.0))
    }

    fn recency_score(&self, candidate: &Candidate) -> Option<f64> {
        let age = self.age_years(candidate.year?);
        Some(100.0 * 0.5f64.powf(age / self.half_life_years))
    }

    /// Full breakdown for one candidate.
    pub fn breakdown(&self, candidate: &Candidate) -> QualityBreakdown {
        let citation = self.citation_score(candidate);
        let recency = self.recency_score(candidate);

        let (w_citation, w_recency) = self.weights.without_venue();
        let present: Vec<(f64, f64)> = [(citation, w_citation), (recency, w_recency)]
            .into_iter()
            .filter_map(|(score, weight)| score.map(|s| (s, weight)))
            .collect();
        let present_weight: f64 = present.iter().map(|(_, w)| w).sum();
        let base = if present_weight > 0.0 {
            present.iter().map(|(s, w)| s * w).sum::<f64>() / present_weight
        } else {
            NEUTRAL_QUALITY
        };

        let venue = self
            .prestige(candidate)
            .map(|p| (base + (p - self.baseline_prestige)).clamp(0.0, 100.0));

        let score = match venue {
            Some(venue_score) => {
                let mut weighted = self.weights.venue * venue_score;
                let mut total = self.weights.venue;
                if let Some(c) = citation {
                    weighted += self.weights.citation * c;
                    total += self.weights.citation;
                }
                if let Some(r) = recency {
                    weighted += self.weights.recency * r;
                    total += self.weights.recency;
                }
                if present.is_empty() {
                    // Only venue data: the neutral base stands in for the rest.
                    weighted += (self.weights.citation + self.weights.recency) * base;
                    total += self.weights.citation + self.weights.recency;
                }
                if total > 0.0 {
                    weighted / total
                } else {
                    base
                }
            }
            None => base,
        };

        QualityBreakdown {
            citation,
            venue,
            recency,
            venue_weighted: venue.is_some(),
            score: score.clamp(0.0, 100.0),
        }
    }

    /// Quality score in `[0, 100]`. Never fails on missing metadata.
    pub fn score(&self, candidate: &ScoredCandidate) -> f64 {
        self.breakdown(&candidate.candidate).score
    }

    /// Calibrate on the run's population, then annotate every candidate.
    pub fn score_all(&self, candidates: &[ScoredCandidate]) -> Vec<ScoredCandidate> {
        let scorer = self.calibrated(candidates);
        candidates
            .iter()
            .map(|c| c.with_quality_score(scorer.score(c)))
            .collect()
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(&QualityConfig::default())
    }
}

/// Current UTC calendar year.
fn current_year() -> i32 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    // Mean Gregorian year in seconds.
    1970 + (secs / 31_556_952) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn scorer() -> QualityScorer {
        QualityScorer::default().with_reference_year(2024)
    }

    fn scored(candidate: Candidate) -> ScoredCandidate {
        ScoredCandidate::new(Arc::new(candidate), 1.0)
    }

    #[test]
    fn test_default_weights() {
        let weights = QualityWeights::default();
        assert!(weights.validate().is_ok());
        let (c, r) = weights.without_venue();
        assert!((c - 0.60).abs() < 1e-9);
        assert!((r - 0.40).abs() < 1e-9);
    }

    #[test]
    fn test_weight_validation() {
        assert!(QualityWeights::new(0.5, 0.5, 0.5).validate().is_err());
        assert!(QualityWeights::new(-0.1, 0.9, 0.2).validate().is_err());
        assert!(QualityWeights::new(0.4, 0.4, 0.2).validate().is_ok());
    }

    #[test]
    fn test_missing_metadata_is_neutral() {
        let breakdown = scorer().breakdown(&Candidate::new("a", "t", "s"));
        assert_eq!(breakdown.score, NEUTRAL_QUALITY);
        assert!(!breakdown.venue_weighted);
        assert!(breakdown.citation.is_none());
    }

    #[test]
    fn test_citation_rate_not_raw_count() {
        let scorer = scorer();
        let old = Candidate::new("old", "t", "s").with_year(2004).with_citations(200);
        let new = Candidate::new("new", "t", "s").with_year(2022).with_citations(40);
        // 10 per year vs 20 per year.
        assert!(scorer.citation_score(&new) > scorer.citation_score(&old));
    }

    #[test]
    fn test_citation_diminishing_returns() {
        let scorer = scorer();
        let score = |n| {
            scorer
                .citation_score(&Candidate::new("a", "t", "s").with_year(2023).with_citations(n))
                .unwrap()
        };
        let low = score(5) - score(0);
        let high = score(105) - score(100);
        assert!(low > high);
        assert_eq!(score(100_000), 100.0);
    }

    #[test]
    fn test_recency_half_life() {
        let scorer = scorer();
        let now = scorer
            .recency_score(&Candidate::new("a", "t", "s").with_year(2024))
            .unwrap();
        let older = scorer
            .recency_score(&Candidate::new("a", "t", "s").with_year(2020))
            .unwrap();
        assert_eq!(now, 100.0);
        assert!((older - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_venue_fairness_at_population_mean() {
        let base = Candidate::new("a", "t", "s").with_year(2019).with_citations(120);
        let population = vec![
            scored(base.clone().with_venue_prestige(40.0)),
            scored(base.clone().with_venue_prestige(80.0)),
        ];
        let scorer = scorer().calibrated(&population);
        assert_eq!(scorer.baseline_prestige(), 60.0);

        let with_venue = scorer.breakdown(&base.clone().with_venue_prestige(60.0));
        let without_venue = scorer.breakdown(&base);
        assert!(with_venue.venue_weighted);
        assert!(!without_venue.venue_weighted);
        assert!((with_venue.score - without_venue.score).abs() <= 5.0);
    }

    #[test]
    fn test_prestige_above_mean_helps() {
        let base = Candidate::new("a", "t", "s").with_year(2020).with_citations(50);
        let scorer = scorer();
        let strong = scorer.breakdown(&base.clone().with_venue_prestige(90.0)).score;
        let weak = scorer.breakdown(&base.clone().with_venue_prestige(20.0)).score;
        let none = scorer.breakdown(&base).score;
        assert!(strong > none);
        assert!(weak < none);
    }

    #[test]
    fn test_venue_catalog_lookup() {
        let catalog = VenueCatalog::builtin();
        assert_eq!(catalog.lookup("Nature"), Some(98.0));
        assert_eq!(catalog.lookup("  PLOS  ONE "), Some(60.0));
        assert!(catalog.lookup("Journal of Obscure Results").is_none());

        let scorer = scorer();
        let from_catalog = Candidate::new("a", "t", "s").with_venue("NeurIPS");
        assert_eq!(scorer.prestige(&from_catalog), Some(92.0));
        let unknown = Candidate::new("a", "t", "s").with_venue("Local Workshop");
        assert!(scorer.prestige(&unknown).is_none());
    }

    #[test]
    fn test_config_venues_extend_catalog() {
        let mut config = QualityConfig::default();
        config.venues.insert("Local Workshop".to_string(), 70.0);
        let scorer = QualityScorer::new(&config);
        let candidate = Candidate::new("a", "t", "s").with_venue("local workshop");
        assert_eq!(scorer.prestige(&candidate), Some(70.0));
    }

    #[test]
    fn test_score_all_stays_in_range() {
        let candidates = vec![
            scored(Candidate::new("a", "t", "s").with_year(2024).with_citations(1_000_000).with_venue_prestige(100.0)),
            scored(Candidate::new("b", "t", "s").with_year(1900).with_citations(0).with_venue_prestige(0.0)),
            scored(Candidate::new("c", "t", "s")),
        ];
        let out = scorer().score_all(&candidates);
        assert_eq!(out.len(), 3);
        for c in &out {
            let q = c.quality_score.unwrap();
            assert!((0.0..=100.0).contains(&q), "quality {} out of range", q);
        }
    }

    #[test]
    fn test_extreme_years_do_not_overflow() {
        let scorer = QualityScorer::default();
        for year in [i32::MIN, i32::MAX] {
            let candidate = Candidate::new("a", "t", "s").with_year(year).with_citations(3);
            let breakdown = scorer.breakdown(&candidate);
            assert!((0.0..=100.0).contains(&breakdown.score), "year {} scored {}", year, breakdown.score);
        }

        let ancient = scorer.breakdown(&Candidate::new("a", "t", "s").with_year(i32::MIN));
        assert_eq!(ancient.recency, Some(0.0));
        let future = scorer.breakdown(&Candidate::new("a", "t", "s").with_year(i32::MAX));
        assert_eq!(future.recency, Some(100.0));
    }
}
