//! EdgeQuake Relevance - Literature Relevance Pipeline
//!
//! Turns a large set of raw bibliographic records from many providers into a
//! small, ranked, quality-filtered candidate set.
//!
//! # Stages
//!
//! | Stage | Type | Notes |
//! |-------|------|-------|
//! | Lexical | [`LexicalScorer`] | BM25 over title and abstract, never drops input |
//! | Recall | [`RecallFilter`] | Relative cut, bypassed when degenerate |
//! | Neural | [`NeuralReranker`] | Batched cross-encoder, bounded concurrency, cached |
//! | Domain | [`DomainAspectFilter`] | Rule-based topical filter |
//! | Quality | [`QualityScorer`] | Citation rate, venue, recency with adaptive weights |
//! | Diversity | [`DiversitySampler`] | Final rank blend, source-diverse selection |
//!
//! # Shared State
//!
//! [`RelevanceCache`] and [`ResilienceLayer`] (circuit breaker, per-key rate
//! limiter, bounded retry) are built once and injected into
//! [`RelevancePipeline`]. Nothing is global.
//!
//! # Example
//!
//! ```ignore
//! use edgequake_relevance::{Candidate, PipelineConfig, run_pipeline};
//!
//! let candidates = vec![
//!     Candidate::new("W1", "Machine learning for protein folding", "openalex")
//!         .with_abstract("We apply machine learning to structure prediction.")
//!         .with_year(2022),
//! ];
//! let output = run_pipeline("machine learning", candidates, &PipelineConfig::default()).await?;
//! for result in &output.results {
//!     println!("{} {:.3} {}", result.position, result.final_rank, result.candidate.title);
//! }
//! ```
//!
//! # See Also
//!
//! - [`crate::reranker`] for the scoring stages and the [`CrossEncoder`] seam
//! - [`crate::resilience`] for circuit breaking and retries
//! - [`crate::monitor`] for run reports

pub mod cache;
pub mod candidate;
pub mod circuit_breaker;
pub mod config;
pub mod diversity;
pub mod domain;
pub mod error;
pub mod monitor;
pub mod pipeline;
pub mod quality;
pub mod query;
pub mod rate_limiter;
pub mod reranker;
pub mod resilience;
pub mod retry;
pub mod source;
pub mod tokenizer;

pub use cache::{CacheConfig, CacheKey, CacheStats, RelevanceCache};
pub use candidate::{Candidate, RankedResult, ScoredCandidate};
pub use circuit_breaker::{CircuitBreakerConfig, CircuitRegistry, CircuitState, CircuitStatus};
pub use config::{
    DiversityConfig, DomainConfig, LexicalConfig, NeuralConfig, PipelineConfig, QualityConfig,
    CONFIG_ENV_VAR, NEURAL_DEPENDENCY_KEY,
};
pub use diversity::DiversitySampler;
pub use domain::{Domain, DomainAspectFilter, DomainClassifier, DomainFilterOutcome};
pub use error::{ConfigError, DependencyError, Result, RetryStrategy, StageError};
pub use monitor::{
    MonitorSummary, PerformanceMonitor, PipelineRunReport, RunRecorder, Stage, StageMetrics,
    StageSummary,
};
pub use pipeline::{run_pipeline, PipelineOutput, RelevancePipeline};
pub use quality::{QualityBreakdown, QualityScorer, QualityWeights, VenueCatalog};
pub use query::QueryContext;
pub use rate_limiter::{KeyedRateLimiter, RateLimitGuard, RateLimiter, RateLimiterConfig};
pub use reranker::{
    CrossEncoder, CrossEncoderConfig, HttpCrossEncoder, LexicalScorer, NeuralOutcome,
    NeuralReranker, PairInput, RecallFilter, RecallOutcome, TermOverlapCrossEncoder,
};
pub use resilience::{ResilienceConfig, ResilienceLayer};
pub use retry::{RetryConfig, RetryExecutor, RetryFailure};
pub use source::{gather_candidates, CandidateSource, GatherOutcome, ResilientSource};
pub use tokenizer::{TextTokenizer, TokenizerConfig};
