//! Rule-based topical domain classification and filtering.
//!
//! A small ordered rule table maps each [`Domain`] to a regular expression.
//! The table is compiled once when the [`DomainClassifier`] is built and then
//! shared by every candidate of every run.
//!
//! ```ascii
//! title + abstract ──► normalize once ──► rule 1 ─┐
//!                                       ► rule 2 ─┼─► hit counts ─► tags (primary first)
//!                                       ► rule n ─┘
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

use crate::candidate::ScoredCandidate;
use crate::query::QueryContext;
use crate::tokenizer::normalize_text;

/// Topical domain/aspect tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    ComputerScience,
    Medicine,
    Biology,
    Physics,
    Chemistry,
    Mathematics,
    Psychology,
    Economics,
    Education,
    Environment,
    SocialScience,
    Engineering,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Domain::ComputerScience => "computer_science",
            Domain::Medicine => "medicine",
            Domain::Biology => "biology",
            Domain::Physics => "physics",
            Domain::Chemistry => "chemistry",
            Domain::Mathematics => "mathematics",
            Domain::Psychology => "psychology",
            Domain::Economics => "economics",
            Domain::Education => "education",
            Domain::Environment => "environment",
            Domain::SocialScience => "social_science",
            Domain::Engineering => "engineering",
        };
        write!(f, "{}", name)
    }
}

/// Rule table, in tie-break order.
const DOMAIN_RULES: &[(Domain, &str)] = &[
    (
        Domain::ComputerScience,
        r"\b(machine learning|deep learning|neural networks?|algorithms?|software|computers?|computing|artificial intelligence|transformers?|reinforcement learning|natural language processing|computer vision|data mining|databases?|compilers?|distributed systems?)\b",
    ),
    (
        Domain::Medicine,
        r"\b(clinical|patients?|diseases?|therap\w*|treatments?|diagnos\w*|hospitals?|cancers?|drugs?|surger\w*|epidemiolog\w*)\b",
    ),
    (
        Domain::Biology,
        r"\b(genes?|genom\w*|proteins?|cells?|cellular|organisms?|evolution\w*|species|molecular biology|dna|rna|enzymes?)\b",
    ),
    (
        Domain::Physics,
        r"\b(quantum|particles?|relativity|thermodynamic\w*|optics?|optical|plasma|condensed matter|astrophysic\w*|photons?)\b",
    ),
    (
        Domain::Chemistry,
        r"\b(chemical|chemistry|molecules?|catalys\w*|reactions?|polymers?|compounds?|spectroscop\w*)\b",
    ),
    (
        Domain::Mathematics,
        r"\b(theorems?|proofs?|lemmas?|algebra\w*|topolog\w*|manifolds?|conjectures?|stochastic|combinatori\w*)\b",
    ),
    (
        Domain::Psychology,
        r"\b(cognitive|cognition|psycholog\w*|emotion\w*|mental health|personality|anxiety|depression)\b",
    ),
    (
        Domain::Economics,
        r"\b(econom\w*|markets?|financ\w*|monetary|inflation|labou?r market|trade|fiscal)\b",
    ),
    (
        Domain::Education,
        r"\b(students?|teaching|teachers?|curricul\w*|pedagog\w*|classrooms?|schools?|education\w*)\b",
    ),
    (
        Domain::Environment,
        r"\b(climate|ecolog\w*|emissions?|biodiversity|sustainab\w*|pollution|ecosystems?|environment\w*)\b",
    ),
    (
        Domain::SocialScience,
        r"\b(social|societ\w*|politic\w*|sociolog\w*|communit\w*|governance|cultur\w*)\b",
    ),
    (
        Domain::Engineering,
        r"\b(engineering|mechanical|structural|circuits?|robot\w*|control systems?|sensors?|manufactur\w*)\b",
    ),
];

/// Matches in the title count this many times.
const TITLE_WEIGHT: usize = 2;

/// Classifier holding the precompiled rule table.
#[derive(Debug, Clone)]
pub struct DomainClassifier {
    rules: Vec<(Domain, Regex)>,
}

impl DomainClassifier {
    /// Compile the built-in rule table.
    pub fn new() -> Self {
        let rules = DOMAIN_RULES
            .iter()
            .filter_map(|(domain, pattern)| match Regex::new(pattern) {
                Ok(regex) => Some((*domain, regex)),
                Err(e) => {
                    tracing::error!(%domain, error = %e, "Invalid domain rule skipped");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    /// Number of compiled rules.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Classify already-normalized title and body text.
    ///
    /// Returns every matching tag, strongest first; ties keep rule order.
    pub fn classify_normalized(&self, title: &str, body: &str) -> Vec<Domain> {
        let mut hits: Vec<(usize, usize, Domain)> = self
            .rules
            .iter()
            .enumerate()
            .filter_map(|(order, (domain, regex))| {
                let count =
                    regex.find_iter(title).count() * TITLE_WEIGHT + regex.find_iter(body).count();
                (count > 0).then_some((count, order, *domain))
            })
            .collect();

        hits.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        hits.into_iter().map(|(_, _, domain)| domain).collect()
    }

    /// Classify raw text (used for queries).
    pub fn classify(&self, text: &str) -> Vec<Domain> {
        self.classify_normalized("", &normalize_text(text))
    }
}

impl Default for DomainClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of running the domain filter over one run's candidates.
#[derive(Debug, Clone)]
pub struct DomainFilterOutcome {
    pub candidates: Vec<ScoredCandidate>,
    pub rejected: usize,
    /// Every candidate would have been rejected by an inferred allow-set.
    pub bypassed: bool,
}

/// Rejects candidates whose primary domain is outside the allowed set.
#[derive(Debug, Clone, Default)]
pub struct DomainAspectFilter {
    classifier: DomainClassifier,
}

impl DomainAspectFilter {
    pub fn new(classifier: DomainClassifier) -> Self {
        Self { classifier }
    }

    pub fn classifier(&self) -> &DomainClassifier {
        &self.classifier
    }

    /// Annotate every candidate with its tags and keep those whose primary
    /// tag is allowed. Untagged candidates pass; an empty allow-set passes
    /// everything.
    pub fn filter(
        &self,
        _query: &QueryContext,
        candidates: &[ScoredCandidate],
        allowed: &BTreeSet<Domain>,
    ) -> Vec<ScoredCandidate> {
        self.annotate(candidates, allowed)
            .into_iter()
            .filter(|c| c.domain_match == Some(true))
            .collect()
    }

    /// Run the filter with the pipeline's allow-set policy.
    ///
    /// `configured` wins when present. Otherwise the query's own signature is
    /// used, and if that would reject every candidate the filter steps aside.
    pub fn apply(
        &self,
        query: &QueryContext,
        candidates: &[ScoredCandidate],
        configured: Option<&BTreeSet<Domain>>,
    ) -> DomainFilterOutcome {
        let inferred;
        let allowed = match configured {
            Some(set) => set,
            None => {
                inferred = query.domains.iter().copied().collect::<BTreeSet<_>>();
                &inferred
            }
        };

        let annotated = self.annotate(candidates, allowed);
        let kept: Vec<ScoredCandidate> = annotated
            .iter()
            .filter(|c| c.domain_match == Some(true))
            .cloned()
            .collect();

        if kept.is_empty() && !annotated.is_empty() && configured.is_none() {
            debug!(
                candidates = annotated.len(),
                "Inferred domain filter rejected everything, passing through"
            );
            return DomainFilterOutcome {
                candidates: annotated,
                rejected: 0,
                bypassed: true,
            };
        }

        DomainFilterOutcome {
            rejected: annotated.len() - kept.len(),
            candidates: kept,
            bypassed: false,
        }
    }

    fn annotate(
        &self,
        candidates: &[ScoredCandidate],
        allowed: &BTreeSet<Domain>,
    ) -> Vec<ScoredCandidate> {
        candidates
            .iter()
            .map(|scored| {
                let title = normalize_text(&scored.candidate.title);
                let body = normalize_text(scored.candidate.abstract_or_empty());
                let tags = self.classifier.classify_normalized(&title, &body);
                let matched = allowed.is_empty()
                    || tags.first().map_or(true, |primary| allowed.contains(primary));
                scored.with_domain(tags, matched)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Candidate;
    use std::sync::Arc;

    fn scored(title: &str, abstract_text: &str) -> ScoredCandidate {
        ScoredCandidate::new(
            Arc::new(Candidate::new(title, title, "test").with_abstract(abstract_text)),
            1.0,
        )
    }

    #[test]
    fn test_all_rules_compile() {
        let classifier = DomainClassifier::new();
        assert_eq!(classifier.rule_count(), DOMAIN_RULES.len());
    }

    #[test]
    fn test_classify_primary_tag() {
        let classifier = DomainClassifier::new();
        let tags = classifier.classify_normalized(
            "deep learning for tumor diagnosis",
            "we train neural networks on clinical images of cancer patients",
        );
        assert_eq!(tags.first(), Some(&Domain::Medicine));
        assert!(tags.contains(&Domain::ComputerScience));
    }

    #[test]
    fn test_classify_query() {
        let classifier = DomainClassifier::new();
        assert_eq!(classifier.classify("Machine Learning"), vec![Domain::ComputerScience]);
        assert!(classifier.classify("untitled").is_empty());
    }

    #[test]
    fn test_filter_rejects_off_domain() {
        let filter = DomainAspectFilter::default();
        let query = QueryContext::parse("machine learning");
        let candidates = vec![
            scored("Machine learning for code", "algorithms and software"),
            scored("Inflation and monetary policy", "economic markets and fiscal trade"),
            scored("Untitled note", "no recognizable topic here"),
        ];
        let allowed: BTreeSet<Domain> = [Domain::ComputerScience].into_iter().collect();

        let kept = filter.filter(&query, &candidates, &allowed);
        let ids: Vec<&str> = kept.iter().map(|c| c.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["Machine learning for code", "Untitled note"]);
        assert_eq!(kept[0].domain_tags.first(), Some(&Domain::ComputerScience));
    }

    #[test]
    fn test_empty_allow_set_passes_everything() {
        let filter = DomainAspectFilter::default();
        let query = QueryContext::parse("anything");
        let candidates = vec![scored("Inflation", "monetary policy")];
        let kept = filter.filter(&query, &candidates, &BTreeSet::new());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].domain_match, Some(true));
    }

    #[test]
    fn test_inferred_filter_bypasses_when_everything_rejected() {
        let filter = DomainAspectFilter::default();
        let query = QueryContext::parse("machine learning");
        let candidates = vec![
            scored("Inflation dynamics", "monetary policy and markets"),
            scored("Coral reef ecology", "climate and biodiversity"),
        ];

        let outcome = filter.apply(&query, &candidates, None);
        assert!(outcome.bypassed);
        assert_eq!(outcome.candidates.len(), 2);

        let configured: BTreeSet<Domain> = [Domain::ComputerScience].into_iter().collect();
        let outcome = filter.apply(&query, &candidates, Some(&configured));
        assert!(!outcome.bypassed);
        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.rejected, 2);
    }
}
