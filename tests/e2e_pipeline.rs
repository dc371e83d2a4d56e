//! End-to-end tests for the relevance pipeline.
//!
//! All runs use in-process cross-encoders; no network access is needed.

use async_trait::async_trait;
use edgequake_relevance::{
    run_pipeline, Candidate, CircuitState, CrossEncoder, DependencyError, PairInput, PipelineConfig,
    RelevancePipeline, ResilienceConfig, RetryConfig, Stage, TermOverlapCrossEncoder,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const FILLER: &[&str] = &["study", "results", "approach", "evaluation", "benchmark", "method"];

/// Candidate `i` mentions the query once, followed by `i` filler words.
fn density_corpus(n: usize) -> Vec<Candidate> {
    (0..n)
        .map(|i| {
            let filler: Vec<&str> = (0..i).map(|j| FILLER[j % FILLER.len()]).collect();
            Candidate::new(format!("W{}", i), format!("Paper {}", i), "openalex")
                .with_abstract(format!("machine learning {}", filler.join(" ")))
        })
        .collect()
}

/// Always fails with a retryable error.
struct UnreachableEncoder {
    calls: AtomicUsize,
}

#[async_trait]
impl CrossEncoder for UnreachableEncoder {
    fn name(&self) -> &str {
        "unreachable"
    }

    fn model(&self) -> &str {
        "none"
    }

    async fn score(&self, _pairs: &[PairInput]) -> Result<Vec<f64>, DependencyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DependencyError::Network("connection refused".to_string()))
    }
}

fn fast_retry_config() -> PipelineConfig {
    PipelineConfig {
        resilience: ResilienceConfig {
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 2,
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

fn assert_descending_final_rank(ranks: &[f64]) {
    for pair in ranks.windows(2) {
        assert!(pair[0] >= pair[1], "final rank not descending: {:?}", ranks);
    }
}

/// Scenario A: 100 candidates at varying query-term density.
#[tokio::test]
async fn test_scenario_a_ranked_by_relevance() {
    let output = run_pipeline("machine learning", density_corpus(100), &PipelineConfig::default())
        .await
        .unwrap();

    assert!(!output.results.is_empty());
    assert_eq!(output.results.len(), 20);

    let ranks: Vec<f64> = output.results.iter().map(|r| r.final_rank).collect();
    assert_descending_final_rank(&ranks);

    let top = output.results.first().unwrap();
    let bottom = output.results.last().unwrap();
    assert!(
        top.lexical_score > bottom.lexical_score,
        "top {} bottom {}",
        top.lexical_score,
        bottom.lexical_score
    );
    assert_eq!(top.candidate.id, "W0");

    for (i, result) in output.results.iter().enumerate() {
        assert_eq!(result.position, i + 1);
        assert!(result.neural_score.is_some());
    }
    assert!(!output.report.is_degraded());
    assert_eq!(output.report.input_count, 100);
}

/// Scenario B: paired candidates with and without venue prestige.
#[tokio::test]
async fn test_scenario_b_venue_metadata_fairness() {
    let mut candidates = Vec::new();
    for i in 0..50u32 {
        let base = |id: String| {
            Candidate::new(id, "Machine learning models", "openalex")
                .with_abstract("machine learning models for prediction")
                .with_year(2014 + (i % 10) as i32)
                .with_citations(i * 7)
        };
        candidates.push(base(format!("venue-{}", i)).with_venue_prestige(40.0 + (i % 20) as f64));
        candidates.push(base(format!("plain-{}", i)));
    }

    let mut config = PipelineConfig::default().with_result_limit(100);
    config.quality.reference_year = Some(2024);
    let output = run_pipeline("machine learning", candidates, &config)
        .await
        .unwrap();
    assert_eq!(output.results.len(), 100);

    let average = |prefix: &str| {
        let group: Vec<f64> = output
            .results
            .iter()
            .filter(|r| r.candidate.id.starts_with(prefix))
            .map(|r| r.quality_score)
            .collect();
        assert_eq!(group.len(), 50);
        group.iter().sum::<f64>() / group.len() as f64
    };

    let gap = (average("venue-") - average("plain-")).abs();
    assert!(gap < 5.0, "venue metadata gap {:.2} exceeds tolerance", gap);
}

/// Scenario C: the inference dependency is always down.
#[tokio::test]
async fn test_scenario_c_neural_dependency_down() {
    let config = fast_retry_config();
    let encoder = Arc::new(UnreachableEncoder {
        calls: AtomicUsize::new(0),
    });
    let pipeline = RelevancePipeline::from_config(&config, encoder.clone());

    let output = pipeline
        .run("machine learning", density_corpus(30), &config, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!output.results.is_empty());
    assert!(output.results.iter().all(|r| r.neural_score.is_none()));
    for pair in output.results.windows(2) {
        assert!(pair[0].lexical_score >= pair[1].lexical_score);
    }
    let ranks: Vec<f64> = output.results.iter().map(|r| r.final_rank).collect();
    assert_descending_final_rank(&ranks);

    assert!(output.report.is_stage_degraded(Stage::Neural));
    assert!(output.report.degraded_stages().contains(&Stage::Neural));
    assert!(encoder.calls.load(Ordering::SeqCst) >= 1);

    let status = pipeline.circuit_status("neural-inference").await;
    assert!(status.failure_count > 0 || status.state == CircuitState::Open);
}

/// Every lexical score is zero: the recall cut must step aside.
#[tokio::test]
async fn test_recall_bypass_when_all_scores_zero() {
    let candidates: Vec<Candidate> = (0..10)
        .map(|i| Candidate::new(format!("E{}", i), format!("Untitled record {}", i), "pubmed"))
        .collect();

    // Zero threshold so the neural stage keeps what recall let through.
    let config = PipelineConfig::default().with_neural_threshold(0.0);
    let output = run_pipeline("machine learning", candidates, &config)
        .await
        .unwrap();

    assert_eq!(output.results.len(), 10);
    let recall = output.report.stage(Stage::Recall).unwrap();
    assert!(recall.bypassed);
    assert_eq!(recall.output, 10);
    assert!(output.results.iter().all(|r| r.lexical_score == 0.0));
}

/// A second identical run is served entirely from the cache.
#[tokio::test]
async fn test_repeated_run_hits_cache() {
    let config = PipelineConfig::default();
    let pipeline =
        RelevancePipeline::from_config(&config, Arc::new(TermOverlapCrossEncoder::new()));
    let cancel = CancellationToken::new();

    let first = pipeline
        .run("machine learning", density_corpus(40), &config, &cancel)
        .await
        .unwrap();
    let second = pipeline
        .run("machine learning", density_corpus(40), &config, &cancel)
        .await
        .unwrap();

    let neural = second.report.stage(Stage::Neural).unwrap();
    assert_eq!(neural.counter("cache_hits"), neural.input as u64);
    assert_eq!(neural.counter("inferred"), 0);
    assert_eq!(second.report.cache_hit_rate, 1.0);

    let scores = |output: &edgequake_relevance::PipelineOutput| {
        output
            .results
            .iter()
            .map(|r| (r.candidate.id.clone(), r.neural_score))
            .collect::<Vec<_>>()
    };
    assert_eq!(scores(&first), scores(&second));

    let summary = pipeline.monitor().summary().await;
    assert_eq!(summary.total_runs, 2);
}

/// Irrelevant records are dropped by the neural threshold, not passed on.
#[tokio::test]
async fn test_unrelated_corpus_yields_no_results() {
    let candidates: Vec<Candidate> = (0..10)
        .map(|i| Candidate::new(format!("E{}", i), format!("Untitled record {}", i), "pubmed"))
        .collect();

    let output = run_pipeline("machine learning", candidates, &PipelineConfig::default())
        .await
        .unwrap();

    assert!(output.results.is_empty());
    let neural = output.report.stage(Stage::Neural).unwrap();
    assert_eq!(neural.counter("dropped"), 10);
    assert!(!neural.bypassed);
    assert!(!output.report.is_degraded());
}

/// The TTL of the run's config applies even when the shared cache keeps
/// entries longer.
#[tokio::test(start_paused = true)]
async fn test_run_cache_ttl_overrides_shared_cache() {
    let config = PipelineConfig::default();
    let pipeline =
        RelevancePipeline::from_config(&config, Arc::new(TermOverlapCrossEncoder::new()));
    let cancel = CancellationToken::new();

    pipeline
        .run("machine learning", density_corpus(10), &config, &cancel)
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(2 * 60 * 60)).await;

    let short = config.clone().with_cache_ttl(Duration::from_secs(60 * 60));
    let output = pipeline
        .run("machine learning", density_corpus(10), &short, &cancel)
        .await
        .unwrap();

    let neural = output.report.stage(Stage::Neural).unwrap();
    assert_eq!(neural.counter("cache_hits"), 0);
    assert_eq!(neural.counter("inferred"), neural.input as u64);

    // Re-inferred scores are fresh again under the default TTL.
    let again = pipeline
        .run("machine learning", density_corpus(10), &config, &cancel)
        .await
        .unwrap();
    assert_eq!(again.report.cache_hit_rate, 1.0);
}

/// Results from one dominant source are interleaved with others.
#[tokio::test]
async fn test_source_diversity_in_output() {
    let mut candidates = Vec::new();
    for i in 0..6 {
        candidates.push(
            Candidate::new(format!("A{}", i), "Machine learning", "openalex")
                .with_abstract("machine learning machine learning"),
        );
    }
    candidates.push(
        Candidate::new("B0", "Learning", "arxiv")
            .with_abstract("machine learning with many additional words about evaluation"),
    );

    let output = run_pipeline("machine learning", candidates, &PipelineConfig::default())
        .await
        .unwrap();

    let sources: Vec<&str> = output
        .results
        .iter()
        .map(|r| r.candidate.source.as_str())
        .collect();
    let arxiv_at = sources.iter().position(|s| *s == "arxiv").unwrap();
    assert!(arxiv_at <= 2, "arxiv at {} in {:?}", arxiv_at, sources);
}
