//! End-to-end relevance pipeline.
//!
//! ```ascii
//! ┌──────────┐   ┌────────┐   ┌────────┐   ┌────────┐   ┌─────────┐   ┌───────────┐
//! │ Lexical  │──►│ Recall │──►│ Neural │──►│ Domain │──►│ Quality │──►│ Diversity │──► RankedResult[]
//! │  (BM25)  │   │ (cut)  │   │(batched)│  │(filter)│   │(adaptive)│  │ (select)  │
//! └──────────┘   └────────┘   └───┬────┘   └────────┘   └─────────┘   └───────────┘
//!                                 │ cache + circuit + limiter + retry
//!                                 ▼
//!                         shared across runs (constructor-injected)
//! ```
//!
//! Each stage is recorded by a [`RunRecorder`]. A stage that degrades passes
//! its input through and is marked in the [`PipelineRunReport`]; only
//! cancellation and invalid configuration are returned as errors.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::RelevanceCache;
use crate::candidate::{Candidate, RankedResult, ScoredCandidate};
use crate::circuit_breaker::CircuitStatus;
use crate::config::PipelineConfig;
use crate::diversity::DiversitySampler;
use crate::domain::{DomainAspectFilter, DomainClassifier};
use crate::error::{Result, StageError};
use crate::monitor::{PerformanceMonitor, PipelineRunReport, RunRecorder, Stage};
use crate::quality::QualityScorer;
use crate::query::QueryContext;
use crate::reranker::{CrossEncoder, LexicalScorer, NeuralReranker, RecallFilter, TermOverlapCrossEncoder};
use crate::resilience::ResilienceLayer;

/// Ranked results plus the run's observability record.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub results: Vec<RankedResult>,
    pub report: PipelineRunReport,
}

/// Long-lived pipeline: owns the shared cache, circuits and encoder.
///
/// Create once per process and call [`RelevancePipeline::run`] per request.
/// Runs do not share candidate state; only the cache, the resilience layer
/// and the monitor are shared.
#[derive(Clone)]
pub struct RelevancePipeline {
    reranker: NeuralReranker,
    cache: Arc<RelevanceCache>,
    resilience: Arc<ResilienceLayer>,
    domain_filter: DomainAspectFilter,
    monitor: Arc<PerformanceMonitor>,
}

impl RelevancePipeline {
    pub fn new(
        encoder: Arc<dyn CrossEncoder>,
        cache: Arc<RelevanceCache>,
        resilience: Arc<ResilienceLayer>,
    ) -> Self {
        Self {
            reranker: NeuralReranker::new(encoder, Arc::clone(&cache), Arc::clone(&resilience)),
            cache,
            resilience,
            domain_filter: DomainAspectFilter::new(DomainClassifier::new()),
            monitor: Arc::new(PerformanceMonitor::new()),
        }
    }

    /// Build the shared resources from `config`.
    pub fn from_config(config: &PipelineConfig, encoder: Arc<dyn CrossEncoder>) -> Self {
        Self::new(
            encoder,
            Arc::new(RelevanceCache::new(config.cache.clone())),
            Arc::new(ResilienceLayer::new(config.resilience.clone())),
        )
    }

    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn cache(&self) -> &Arc<RelevanceCache> {
        &self.cache
    }

    pub fn resilience(&self) -> &Arc<ResilienceLayer> {
        &self.resilience
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn encoder(&self) -> &Arc<dyn CrossEncoder> {
        self.reranker.encoder()
    }

    /// Health-check view of one dependency's circuit.
    pub async fn circuit_status(&self, dependency_key: &str) -> CircuitStatus {
        self.resilience.circuit_status(dependency_key).await
    }

    pub async fn all_circuit_status(&self) -> Vec<CircuitStatus> {
        self.resilience.all_circuit_status().await
    }

    /// Rank `candidates` for `query`.
    ///
    /// A malformed query or an empty candidate set yields no results and a
    /// report carrying the validation error.
    pub async fn run(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        config: &PipelineConfig,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput> {
        config.validate()?;
        let mut recorder = RunRecorder::start(query, candidates.len());

        let lexical = LexicalScorer::from_config(&config.lexical);
        let context = QueryContext::build(query, lexical.tokenizer(), self.domain_filter.classifier());
        let validated = context.validate().and_then(|()| {
            if candidates.is_empty() {
                Err(StageError::ValidationFailure("candidate set is empty".to_string()))
            } else {
                Ok(())
            }
        });
        if let Err(e) = validated {
            warn!(run_id = %recorder.run_id(), error = %e, "Run rejected");
            recorder.reject(&e);
            return Ok(self.finish(recorder, Vec::new()).await);
        }
        check_cancelled(cancel)?;

        // Lexical
        let timer = recorder.begin(Stage::Lexical, candidates.len());
        let shared: Vec<Arc<Candidate>> = candidates.into_iter().map(Arc::new).collect();
        let scored = lexical.score(&context, &shared);
        recorder.record(timer.finish(scored.len()));

        // Recall
        let timer = recorder.begin(Stage::Recall, scored.len());
        let recall = RecallFilter::from_config(&config.lexical).apply(scored);
        recorder.record(
            timer
                .finish(recall.candidates.len())
                .with_counter("dropped", recall.dropped)
                .with_bypass(recall.bypassed),
        );
        let mut survivors = recall.candidates;
        check_cancelled(cancel)?;

        // Neural
        if config.neural.enabled {
            let timer = recorder.begin(Stage::Neural, survivors.len());
            let outcome = self
                .reranker
                .rerank_within(&context, &survivors, &config.neural, config.cache_ttl(), cancel)
                .await?;
            let metrics = timer
                .finish(outcome.candidates.len())
                .with_counter("cache_hits", outcome.cache_hits)
                .with_counter("inferred", outcome.inferred)
                .with_counter("unscored", outcome.unscored)
                .with_counter("dropped", outcome.dropped)
                .with_counter("batches_submitted", outcome.batches_submitted)
                .with_counter("batches_failed", outcome.batches_failed)
                .with_degradation(outcome.degraded.as_ref());
            if let Some(e) = &outcome.degraded {
                warn!(run_id = %recorder.run_id(), error = %e, "Neural stage degraded, using lexical proxy");
            }
            recorder.record(metrics);
            survivors = outcome.candidates;
        }
        check_cancelled(cancel)?;

        // Domain
        let timer = recorder.begin(Stage::Domain, survivors.len());
        let domain = self
            .domain_filter
            .apply(&context, &survivors, config.allowed_domains());
        recorder.record(
            timer
                .finish(domain.candidates.len())
                .with_counter("rejected", domain.rejected)
                .with_bypass(domain.bypassed),
        );

        // Quality
        let timer = recorder.begin(Stage::Quality, domain.candidates.len());
        let quality = QualityScorer::new(&config.quality).score_all(&domain.candidates);
        recorder.record(timer.finish(quality.len()));

        // Diversity
        let timer = recorder.begin(Stage::Diversity, quality.len());
        let sampler = DiversitySampler::new(&config.diversity);
        let selected = sampler.select(sampler.rank(&quality), config.result_limit());
        recorder.record(timer.finish(selected.len()));

        Ok(self.finish(recorder, selected).await)
    }

    async fn finish(&self, recorder: RunRecorder, selected: Vec<ScoredCandidate>) -> PipelineOutput {
        let results: Vec<RankedResult> = selected
            .iter()
            .enumerate()
            .map(|(i, c)| RankedResult::from_scored(c, i + 1))
            .collect();
        let report = recorder.finish(results.len());

        info!(
            run_id = %report.run_id,
            input = report.input_count,
            output = report.output_count,
            duration_ms = report.duration_ms,
            cache_hit_rate = report.cache_hit_rate,
            degraded = report.is_degraded(),
            "Relevance run complete"
        );
        self.monitor.record(&report).await;

        PipelineOutput { results, report }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(StageError::Cancelled)
    } else {
        Ok(())
    }
}

/// One-shot run with the local term-overlap encoder and fresh shared state.
///
/// Nothing is cached between calls; long-lived callers should hold a
/// [`RelevancePipeline`] instead.
pub async fn run_pipeline(
    query: &str,
    candidates: Vec<Candidate>,
    config: &PipelineConfig,
) -> Result<PipelineOutput> {
    RelevancePipeline::from_config(config, Arc::new(TermOverlapCrossEncoder::new()))
        .run(query, candidates, config, &CancellationToken::new())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;

    fn candidates() -> Vec<Candidate> {
        vec![
            Candidate::new("a", "Machine learning for protein folding", "openalex")
                .with_abstract("We apply machine learning models to predict structures.")
                .with_year(2022)
                .with_citations(40),
            Candidate::new("b", "Deep learning survey", "arxiv")
                .with_abstract("A survey of deep learning and machine learning methods.")
                .with_year(2020),
            Candidate::new("c", "Medieval trade routes", "crossref")
                .with_abstract("Economic history of Mediterranean ports."),
        ]
    }

    #[tokio::test]
    async fn test_run_ranks_relevant_first() {
        let output = run_pipeline("machine learning", candidates(), &PipelineConfig::default())
            .await
            .unwrap();
        assert!(!output.results.is_empty());
        assert_eq!(output.results[0].position, 1);
        assert!(output.results.iter().all(|r| r.candidate.id != "c"));
        assert_eq!(output.report.stages.len(), 6);
    }

    #[tokio::test]
    async fn test_empty_query_rejected_with_report() {
        let output = run_pipeline("   ", candidates(), &PipelineConfig::default())
            .await
            .unwrap();
        assert!(output.results.is_empty());
        assert!(output.report.validation_error.is_some());
        assert!(output.report.stages.is_empty());
    }

    #[tokio::test]
    async fn test_empty_candidates_rejected_with_report() {
        let output = run_pipeline("machine learning", Vec::new(), &PipelineConfig::default())
            .await
            .unwrap();
        assert!(output.results.is_empty());
        assert!(output
            .report
            .validation_error
            .as_deref()
            .unwrap()
            .contains("empty"));
    }

    #[tokio::test]
    async fn test_invalid_config_is_error() {
        let config = PipelineConfig::default().with_result_limit(0);
        let result = run_pipeline("machine learning", candidates(), &config).await;
        assert!(matches!(result, Err(StageError::Config(_))));
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let pipeline = RelevancePipeline::from_config(
            &PipelineConfig::default(),
            Arc::new(TermOverlapCrossEncoder::new()),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = pipeline
            .run("machine learning", candidates(), &PipelineConfig::default(), &cancel)
            .await;
        assert!(matches!(result, Err(StageError::Cancelled)));
    }

    #[tokio::test]
    async fn test_neural_disabled_skips_stage() {
        let mut config = PipelineConfig::default();
        config.neural.enabled = false;
        let output = run_pipeline("machine learning", candidates(), &config)
            .await
            .unwrap();
        assert!(output.report.stage(Stage::Neural).is_none());
        assert!(output.results.iter().all(|r| r.neural_score.is_none()));
        assert!(!output.results.is_empty());
    }

    #[tokio::test]
    async fn test_configured_domains_filter() {
        let config = PipelineConfig::default().with_allowed_domains([Domain::Economics]);
        let output = run_pipeline("machine learning", candidates(), &config)
            .await
            .unwrap();
        let domain = output.report.stage(Stage::Domain).unwrap();
        assert!(!domain.bypassed);
        assert!(output
            .results
            .iter()
            .all(|r| r.domain.map_or(true, |d| d == Domain::Economics)));
    }

    #[tokio::test]
    async fn test_monitor_sees_every_run() {
        let pipeline = RelevancePipeline::from_config(
            &PipelineConfig::default(),
            Arc::new(TermOverlapCrossEncoder::new()),
        );
        let config = PipelineConfig::default();
        let cancel = CancellationToken::new();
        pipeline.run("machine learning", candidates(), &config, &cancel).await.unwrap();
        pipeline.run("", candidates(), &config, &cancel).await.unwrap();

        let summary = pipeline.monitor().summary().await;
        assert_eq!(summary.total_runs, 2);
        assert_eq!(summary.rejected_runs, 1);
    }
}
