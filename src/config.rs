//! Pipeline configuration.
//!
//! Every field has a default; `PipelineConfig::default()` is a working
//! pipeline. Configuration can also be loaded from TOML.
//!
//! # Configuration File Location
//!
//! [`PipelineConfig::load`] checks, in order of priority:
//! 1. `EDGEQUAKE_RELEVANCE_CONFIG` environment variable
//! 2. `./relevance.toml` (current working directory)
//! 3. `~/.edgequake/relevance.toml` (user config)
//! 4. Built-in defaults
//!
//! # Example Configuration
//!
//! ```toml
//! [lexical]
//! recall_threshold = 0.05
//!
//! [neural]
//! batch_size = 16
//! concurrency = 4
//! score_threshold = 0.1
//!
//! [domain]
//! allowed_domains = ["computer_science", "mathematics"]
//!
//! [quality.weights]
//! citation = 0.4
//! venue = 0.4
//! recency = 0.2
//!
//! [diversity]
//! result_limit = 25
//!
//! [cache]
//! ttl_secs = 86400
//!
//! [resilience.circuit]
//! failure_threshold = 5
//! open_timeout_ms = 60000
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::domain::Domain;
use crate::error::ConfigError;
use crate::quality::QualityWeights;
use crate::resilience::ResilienceConfig;

/// Environment variable pointing at a config file.
pub const CONFIG_ENV_VAR: &str = "EDGEQUAKE_RELEVANCE_CONFIG";

/// Default dependency key for the cross-encoder.
pub const NEURAL_DEPENDENCY_KEY: &str = "neural-inference";

// ============================================================================
// Stage Sections
// ============================================================================

/// Lexical scoring and recall cut.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalConfig {
    pub k1: f64,
    pub b: f64,
    pub title_weight: f64,
    /// Query and document tokens shorter than this are noise.
    pub min_term_length: usize,
    /// Fraction of the run's best lexical score a candidate must reach.
    pub recall_threshold: f64,
    /// Fraction of candidates below the cut that counts as degenerate.
    pub degenerate_ratio: f64,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            title_weight: 2.0,
            min_term_length: 3,
            recall_threshold: 0.05,
            degenerate_ratio: 0.95,
        }
    }
}

/// Cross-encoder reranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuralConfig {
    /// Disable to run lexical-only.
    pub enabled: bool,
    pub batch_size: usize,
    /// Batches in flight at once.
    pub concurrency: usize,
    /// Candidates scoring below this are dropped.
    pub score_threshold: f64,
    /// Document text budget per pair, applied before joining with the query.
    pub max_document_chars: usize,
    /// Circuit/rate-limit key for the inference dependency.
    pub dependency_key: String,
}

impl Default for NeuralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 16,
            concurrency: 4,
            score_threshold: 0.1,
            max_document_chars: 1024,
            dependency_key: NEURAL_DEPENDENCY_KEY.to_string(),
        }
    }
}

/// Domain filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainConfig {
    /// Explicit allow-set. `None` infers the set from the query.
    pub allowed_domains: Option<BTreeSet<Domain>>,
}

/// Quality scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Overrides the built-in 0.30/0.50/0.20 weights.
    pub weights: Option<QualityWeights>,
    /// Citations per year that saturate the citation sub-score.
    pub citation_rate_cap: f64,
    pub recency_half_life_years: f64,
    /// Year used as "now". Defaults to the current UTC year.
    pub reference_year: Option<i32>,
    /// Extra venue prestige entries (normalized name -> 0..100).
    pub venues: HashMap<String, f64>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            weights: None,
            citation_rate_cap: 50.0,
            recency_half_life_years: 4.0,
            reference_year: None,
            venues: HashMap::new(),
        }
    }
}

/// Final selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiversityConfig {
    pub result_limit: usize,
    /// Soft cap on consecutive results from one source.
    pub max_consecutive_per_source: usize,
    /// Weight of quality in the final rank; the rest is relevance.
    pub quality_blend: f64,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            result_limit: 20,
            max_consecutive_per_source: 2,
            quality_blend: 0.4,
        }
    }
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration for a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub lexical: LexicalConfig,
    pub neural: NeuralConfig,
    pub domain: DomainConfig,
    pub quality: QualityConfig,
    pub diversity: DiversityConfig,
    pub cache: CacheConfig,
    pub resilience: ResilienceConfig,
}

impl PipelineConfig {
    /// Load configuration from the standard locations.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            tracing::debug!(path = %path, "Loading relevance config from env");
            return Self::from_file(path);
        }

        let local_path = Path::new("relevance.toml");
        if local_path.exists() {
            return Self::from_file(local_path);
        }

        if let Some(home) = dirs::home_dir() {
            let user_path = home.join(".edgequake").join("relevance.toml");
            if user_path.exists() {
                return Self::from_file(user_path);
            }
        }

        Ok(Self::default())
    }

    /// Load from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Validation(msg.to_string()));

        if !(0.0..=1.0).contains(&self.lexical.recall_threshold) {
            return invalid("lexical.recall_threshold must be within [0, 1]");
        }
        if !(self.lexical.degenerate_ratio > 0.0 && self.lexical.degenerate_ratio <= 1.0) {
            return invalid("lexical.degenerate_ratio must be within (0, 1]");
        }
        if self.neural.batch_size == 0 {
            return invalid("neural.batch_size must be > 0");
        }
        if self.neural.concurrency == 0 {
            return invalid("neural.concurrency must be > 0");
        }
        if !(0.0..=1.0).contains(&self.neural.score_threshold) {
            return invalid("neural.score_threshold must be within [0, 1]");
        }
        if self.neural.max_document_chars == 0 {
            return invalid("neural.max_document_chars must be > 0");
        }
        if let Some(weights) = &self.quality.weights {
            weights.validate()?;
        }
        if self.quality.recency_half_life_years <= 0.0 {
            return invalid("quality.recency_half_life_years must be > 0");
        }
        if self.quality.citation_rate_cap <= 0.0 {
            return invalid("quality.citation_rate_cap must be > 0");
        }
        if self.diversity.result_limit == 0 {
            return invalid("diversity.result_limit must be > 0");
        }
        if self.diversity.max_consecutive_per_source == 0 {
            return invalid("diversity.max_consecutive_per_source must be > 0");
        }
        if !(0.0..=1.0).contains(&self.diversity.quality_blend) {
            return invalid("diversity.quality_blend must be within [0, 1]");
        }
        if self.cache.capacity == 0 {
            return invalid("cache.capacity must be > 0");
        }
        self.resilience.validate()
    }

    // ------------------------------------------------------------------------
    // Flat accessors
    // ------------------------------------------------------------------------

    pub fn lexical_recall_threshold(&self) -> f64 {
        self.lexical.recall_threshold
    }

    pub fn neural_batch_size(&self) -> usize {
        self.neural.batch_size
    }

    pub fn neural_concurrency(&self) -> usize {
        self.neural.concurrency
    }

    pub fn neural_score_threshold(&self) -> f64 {
        self.neural.score_threshold
    }

    pub fn allowed_domains(&self) -> Option<&BTreeSet<Domain>> {
        self.domain.allowed_domains.as_ref()
    }

    pub fn quality_weights_override(&self) -> Option<&QualityWeights> {
        self.quality.weights.as_ref()
    }

    pub fn result_limit(&self) -> usize {
        self.diversity.result_limit
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache.ttl()
    }

    // ------------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------------

    pub fn with_result_limit(mut self, limit: usize) -> Self {
        self.diversity.result_limit = limit;
        self
    }

    pub fn with_neural_batching(mut self, batch_size: usize, concurrency: usize) -> Self {
        self.neural.batch_size = batch_size;
        self.neural.concurrency = concurrency;
        self
    }

    pub fn with_neural_threshold(mut self, threshold: f64) -> Self {
        self.neural.score_threshold = threshold;
        self
    }

    pub fn with_allowed_domains(mut self, domains: impl IntoIterator<Item = Domain>) -> Self {
        self.domain.allowed_domains = Some(domains.into_iter().collect());
        self
    }

    pub fn with_quality_weights(mut self, weights: QualityWeights) -> Self {
        self.quality.weights = Some(weights);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache.ttl_secs = ttl.as_secs();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.neural_batch_size(), 16);
        assert_eq!(config.neural_concurrency(), 4);
        assert_eq!(config.result_limit(), 20);
        assert_eq!(config.cache_ttl(), Duration::from_secs(86_400));
        assert!(config.allowed_domains().is_none());
        assert!(config.quality_weights_override().is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            [neural]
            batch_size = 8

            [domain]
            allowed_domains = ["computer_science", "medicine"]

            [quality.weights]
            citation = 0.4
            venue = 0.4
            recency = 0.2
            "#,
        )
        .unwrap();

        assert_eq!(config.neural_batch_size(), 8);
        assert_eq!(config.neural_concurrency(), 4);
        let allowed = config.allowed_domains().unwrap();
        assert!(allowed.contains(&Domain::ComputerScience));
        assert!(allowed.contains(&Domain::Medicine));
        assert_eq!(config.quality_weights_override().unwrap().venue, 0.4);
        assert_eq!(config.resilience.circuit.failure_threshold, 5);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = PipelineConfig::default().with_allowed_domains([Domain::Physics]);
        let toml_str = config.to_toml().unwrap();
        let parsed = PipelineConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let err = PipelineConfig::from_toml("[neural]\nbatch_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let err = PipelineConfig::from_toml("[diversity]\nquality_blend = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("quality_blend"));

        let err = PipelineConfig::from_toml("[neural\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    #[serial]
    fn test_load_from_env_path() {
        let path = std::env::temp_dir().join(format!(
            "relevance-config-{}.toml",
            uuid::Uuid::new_v4()
        ));
        std::fs::write(&path, "[diversity]\nresult_limit = 7\n").unwrap();
        std::env::set_var(CONFIG_ENV_VAR, &path);

        let config = PipelineConfig::load().unwrap();
        assert_eq!(config.result_limit(), 7);

        std::env::remove_var(CONFIG_ENV_VAR);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    #[serial]
    fn test_load_missing_env_file_is_error() {
        std::env::set_var(CONFIG_ENV_VAR, "/nonexistent/relevance.toml");
        let result = PipelineConfig::load();
        std::env::remove_var(CONFIG_ENV_VAR);
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
