//! End-to-end tests for circuit breaking around a simulated dependency.
//!
//! Time is paused so the 60s open timeout elapses instantly.

use async_trait::async_trait;
use edgequake_relevance::{
    Candidate, CircuitState, CrossEncoder, DependencyError, PairInput, PipelineConfig,
    RelevancePipeline, ResilienceConfig, ResilienceLayer, RetryConfig, Stage, StageError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const KEY: &str = "neural-inference";

fn no_retry_layer() -> ResilienceLayer {
    ResilienceLayer::new(ResilienceConfig {
        retry: RetryConfig::no_retry(),
        ..Default::default()
    })
}

async fn call(layer: &ResilienceLayer, calls: &AtomicUsize, healthy: bool) -> Result<u32, StageError> {
    layer
        .call("test", KEY, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            if healthy {
                Ok(1)
            } else {
                Err(DependencyError::ModelUnavailable("weights not loaded".to_string()))
            }
        })
        .await
}

#[tokio::test(start_paused = true)]
async fn test_circuit_full_cycle() {
    let layer = no_retry_layer();
    let calls = AtomicUsize::new(0);

    // CLOSED -> OPEN after 5 consecutive failures.
    for _ in 0..5 {
        assert!(call(&layer, &calls, false).await.is_err());
    }
    let status = layer.circuit_status(KEY).await;
    assert_eq!(status.state, CircuitState::Open);
    assert_eq!(status.failure_count, 5);
    assert_eq!(status.next_retry_in, Some(Duration::from_secs(60)));

    // OPEN rejects without touching the dependency.
    let err = call(&layer, &calls, true).await.unwrap_err();
    assert!(matches!(err, StageError::DependencyUnavailable { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    // OPEN -> HALF_OPEN once the timeout elapses.
    tokio::time::advance(Duration::from_secs(60)).await;
    assert_eq!(call(&layer, &calls, true).await.unwrap(), 1);
    assert_eq!(layer.circuit_status(KEY).await.state, CircuitState::HalfOpen);

    // HALF_OPEN -> CLOSED after 2 successes.
    call(&layer, &calls, true).await.unwrap();
    let status = layer.circuit_status(KEY).await;
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens() {
    let layer = no_retry_layer();
    let calls = AtomicUsize::new(0);

    for _ in 0..5 {
        let _ = call(&layer, &calls, false).await;
    }
    tokio::time::advance(Duration::from_secs(61)).await;

    assert!(call(&layer, &calls, false).await.is_err());
    let status = layer.circuit_status(KEY).await;
    assert_eq!(status.state, CircuitState::Open);
    assert_eq!(status.next_retry_in, Some(Duration::from_secs(60)));
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_is_never_retried() {
    let layer = ResilienceLayer::new(ResilienceConfig {
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 50,
        },
        ..Default::default()
    });
    let calls = AtomicUsize::new(0);
    for _ in 0..5 {
        let _ = call(&layer, &calls, false).await;
    }
    let before = calls.load(Ordering::SeqCst);

    let started = tokio::time::Instant::now();
    let err = call(&layer, &calls, true).await.unwrap_err();
    assert!(matches!(err, StageError::DependencyUnavailable { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), before);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

/// Encoder whose health can be flipped from the test.
struct SwitchableEncoder {
    healthy: AtomicBool,
    calls: AtomicUsize,
}

#[async_trait]
impl CrossEncoder for SwitchableEncoder {
    fn name(&self) -> &str {
        "switchable"
    }

    fn model(&self) -> &str {
        "switchable-v1"
    }

    async fn score(&self, pairs: &[PairInput]) -> Result<Vec<f64>, DependencyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            Ok(vec![0.9; pairs.len()])
        } else {
            Err(DependencyError::ModelUnavailable("model not serving".to_string()))
        }
    }
}

fn corpus() -> Vec<Candidate> {
    (0..40)
        .map(|i| {
            Candidate::new(format!("W{}", i), format!("Paper {}", i), "openalex")
                .with_abstract("machine learning for structure prediction")
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_recovers_after_open_timeout() {
    let mut config = PipelineConfig::default().with_neural_batching(4, 1);
    config.resilience.retry = RetryConfig::no_retry();
    config.diversity.result_limit = 40;

    let encoder = Arc::new(SwitchableEncoder {
        healthy: AtomicBool::new(false),
        calls: AtomicUsize::new(0),
    });
    let pipeline = RelevancePipeline::from_config(&config, encoder.clone());
    let cancel = CancellationToken::new();

    // Five failing batches open the circuit; the sixth is refused and the
    // rest of the run is skipped.
    let first = pipeline.run("machine learning", corpus(), &config, &cancel).await.unwrap();
    assert_eq!(first.results.len(), 40);
    assert!(first.report.is_stage_degraded(Stage::Neural));
    let neural = first.report.stage(Stage::Neural).unwrap();
    assert_eq!(neural.counter("batches_submitted"), 6);
    assert_eq!(encoder.calls.load(Ordering::SeqCst), 5);
    assert_eq!(pipeline.circuit_status(KEY).await.state, CircuitState::Open);

    // Still open: one refused batch, no inference.
    let second = pipeline.run("machine learning", corpus(), &config, &cancel).await.unwrap();
    assert_eq!(second.report.stage(Stage::Neural).unwrap().counter("batches_submitted"), 1);
    assert_eq!(encoder.calls.load(Ordering::SeqCst), 5);

    // After the timeout the trial batches succeed and the circuit closes.
    encoder.healthy.store(true, Ordering::SeqCst);
    tokio::time::advance(Duration::from_secs(60)).await;
    let third = pipeline.run("machine learning", corpus(), &config, &cancel).await.unwrap();
    assert!(!third.report.is_stage_degraded(Stage::Neural));
    assert!(third.results.iter().all(|r| r.neural_score == Some(0.9)));
    assert_eq!(pipeline.circuit_status(KEY).await.state, CircuitState::Closed);

    let all = pipeline.all_circuit_status().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].dependency, KEY);
}
