//! Cross-encoder reranking in bounded-concurrency batches.
//!
//! ```ascii
//! candidates ──► cache lookup ──► hits ───────────────────────────┐
//!                     │                                            │
//!                     └─ misses ─► batches of batch_size           │
//!                                   │  cancel? dependency down?    │
//!                                   ▼                              │
//!                     ┌──────── semaphore(concurrency) ────────┐   │
//!                     │ batch 1 │ batch 2 │ batch 3 │ batch 4  │   │
//!                     └────┬────┴────┬────┴────┬────┴────┬─────┘   │
//!                          └ ResilienceLayer::call("neural-inference")
//!                                   ▼                              │
//!                          cache write-back ───────────────────────┤
//!                                                                  ▼
//!                          threshold ──► sort by relevance (once) ──► out
//! ```
//!
//! Failures never fail the run. A failed batch leaves its candidates without a
//! neural score; later stages fall back to the normalized lexical score. Only
//! cancellation is returned as an error.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::pair::PairInput;
use super::traits::CrossEncoder;
use crate::cache::{CacheKey, RelevanceCache};
use crate::candidate::ScoredCandidate;
use crate::config::NeuralConfig;
use crate::error::{Result, StageError};
use crate::query::QueryContext;
use crate::resilience::ResilienceLayer;

const STAGE: &str = "neural";

/// What the reranker did during one run.
#[derive(Debug, Default)]
pub struct NeuralOutcome {
    /// Survivors, sorted by relevance descending.
    pub candidates: Vec<ScoredCandidate>,
    pub cache_hits: usize,
    /// Candidates scored by the model in this run.
    pub inferred: usize,
    /// Candidates whose batch failed or was skipped.
    pub unscored: usize,
    /// Candidates dropped by the score threshold.
    pub dropped: usize,
    pub batches_submitted: usize,
    pub batches_failed: usize,
    /// Set when inference failed for some or all batches.
    pub degraded: Option<StageError>,
}

struct Batch {
    indices: Vec<usize>,
    pairs: Vec<PairInput>,
}

/// Per-run inputs shared by every batch.
struct BatchScope<'a> {
    dependency_key: &'a str,
    concurrency: usize,
    cancel: &'a CancellationToken,
    keys: &'a [CacheKey],
}

/// Reranks candidates with a [`CrossEncoder`], gated by the cache and the
/// resilience layer.
#[derive(Clone)]
pub struct NeuralReranker {
    encoder: Arc<dyn CrossEncoder>,
    cache: Arc<RelevanceCache>,
    resilience: Arc<ResilienceLayer>,
}

impl NeuralReranker {
    pub fn new(
        encoder: Arc<dyn CrossEncoder>,
        cache: Arc<RelevanceCache>,
        resilience: Arc<ResilienceLayer>,
    ) -> Self {
        Self {
            encoder,
            cache,
            resilience,
        }
    }

    pub fn encoder(&self) -> &Arc<dyn CrossEncoder> {
        &self.encoder
    }

    /// Score `candidates` against `query`, trusting cached scores up to the
    /// cache's own TTL.
    ///
    /// Returns `Err(StageError::Cancelled)` if `cancel` fires; every other
    /// failure is absorbed into [`NeuralOutcome::degraded`].
    pub async fn rerank(
        &self,
        query: &QueryContext,
        candidates: &[ScoredCandidate],
        options: &NeuralConfig,
        cancel: &CancellationToken,
    ) -> Result<NeuralOutcome> {
        let max_age = self.cache.config().ttl();
        self.rerank_within(query, candidates, options, max_age, cancel)
            .await
    }

    /// Like [`rerank`](Self::rerank), but cached scores older than `max_age`
    /// count as misses.
    pub async fn rerank_within(
        &self,
        query: &QueryContext,
        candidates: &[ScoredCandidate],
        options: &NeuralConfig,
        max_age: Duration,
        cancel: &CancellationToken,
    ) -> Result<NeuralOutcome> {
        if candidates.is_empty() {
            return Ok(NeuralOutcome::default());
        }
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        let keys: Vec<CacheKey> = candidates
            .iter()
            .map(|c| CacheKey::new(&query.normalized, &c.candidate.identity_key()))
            .collect();

        let mut scores: Vec<Option<f64>> = Vec::with_capacity(candidates.len());
        for key in &keys {
            scores.push(self.cache.get_within(key, max_age).await);
        }
        let cache_hits = scores.iter().filter(|s| s.is_some()).count();

        let batches = self.build_batches(query, candidates, &scores, options);
        debug!(
            stage = STAGE,
            candidates = candidates.len(),
            cache_hits,
            batches = batches.len(),
            "Neural rerank starting"
        );

        let mut outcome = NeuralOutcome {
            cache_hits,
            ..Default::default()
        };

        if !batches.is_empty() {
            let scope = BatchScope {
                dependency_key: &options.dependency_key,
                concurrency: options.concurrency,
                cancel,
                keys: &keys,
            };
            self.run_batches(batches, scope, &mut scores, &mut outcome)
                .await?;
        }

        outcome.unscored = scores.iter().filter(|s| s.is_none()).count();
        self.finish(candidates, scores, options.score_threshold, &mut outcome);
        Ok(outcome)
    }

    fn build_batches(
        &self,
        query: &QueryContext,
        candidates: &[ScoredCandidate],
        scores: &[Option<f64>],
        options: &NeuralConfig,
    ) -> Vec<Batch> {
        let batch_size = options.batch_size.max(1);
        let misses: Vec<usize> = scores
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| i)
            .collect();

        misses
            .chunks(batch_size)
            .map(|chunk| Batch {
                indices: chunk.to_vec(),
                pairs: chunk
                    .iter()
                    .map(|&i| {
                        PairInput::new(
                            Arc::clone(&query.normalized),
                            &candidates[i].candidate,
                            options.max_document_chars,
                        )
                    })
                    .collect(),
            })
            .collect()
    }

    async fn run_batches(
        &self,
        batches: Vec<Batch>,
        scope: BatchScope<'_>,
        scores: &mut [Option<f64>],
        outcome: &mut NeuralOutcome,
    ) -> Result<()> {
        let BatchScope {
            dependency_key,
            concurrency,
            cancel,
            keys,
        } = scope;
        let total_batches = batches.len();
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let dependency_down = Arc::new(AtomicBool::new(false));
        let mut set = JoinSet::new();
        let mut first_error: Option<StageError> = None;

        for (batch_index, batch) in batches.into_iter().enumerate() {
            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    set.abort_all();
                    warn!(stage = STAGE, submitted = batch_index, "Neural rerank cancelled");
                    return Err(StageError::Cancelled);
                }
                permit = Arc::clone(&semaphore).acquire_owned() => permit,
            };
            let permit = permit.map_err(|_| StageError::RecoverableStageFailure {
                stage: STAGE,
                reason: "batch semaphore closed".to_string(),
            })?;

            // Checked before every submission, not just once per run.
            if cancel.is_cancelled() {
                set.abort_all();
                return Err(StageError::Cancelled);
            }
            if dependency_down.load(AtomicOrdering::Acquire) {
                debug!(
                    stage = STAGE,
                    skipped = total_batches - batch_index,
                    "Dependency down, skipping remaining batches"
                );
                break;
            }

            let encoder = Arc::clone(&self.encoder);
            let resilience = Arc::clone(&self.resilience);
            let down = Arc::clone(&dependency_down);
            let key = dependency_key.to_string();
            outcome.batches_submitted += 1;

            set.spawn(async move {
                let _hold = permit;
                let pairs = batch.pairs;
                let result = resilience
                    .call(STAGE, &key, || encoder.score(&pairs))
                    .await
                    .and_then(|scores| {
                        if scores.len() == pairs.len() {
                            Ok(scores)
                        } else {
                            Err(StageError::RecoverableStageFailure {
                                stage: STAGE,
                                reason: format!(
                                    "encoder returned {} scores for {} pairs",
                                    scores.len(),
                                    pairs.len()
                                ),
                            })
                        }
                    });
                if let Err(e) = &result {
                    if e.is_dependency_down() {
                        down.store(true, AtomicOrdering::Release);
                    }
                }
                (batch.indices, result)
            });
        }

        loop {
            let joined = tokio::select! {
                _ = cancel.cancelled() => {
                    set.abort_all();
                    warn!(stage = STAGE, "Neural rerank cancelled with batches in flight");
                    return Err(StageError::Cancelled);
                }
                joined = set.join_next() => joined,
            };
            let Some(joined) = joined else { break };

            match joined {
                Ok((indices, Ok(batch_scores))) => {
                    for (&i, score) in indices.iter().zip(batch_scores) {
                        let score = score.clamp(0.0, 1.0);
                        scores[i] = Some(score);
                        self.cache.put(keys[i], score).await;
                    }
                    outcome.inferred += indices.len();
                }
                Ok((indices, Err(e))) => {
                    warn!(stage = STAGE, batch_len = indices.len(), error = %e, "Batch failed, passing through");
                    outcome.batches_failed += 1;
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    warn!(stage = STAGE, error = %e, "Batch task aborted");
                    outcome.batches_failed += 1;
                    first_error.get_or_insert(StageError::RecoverableStageFailure {
                        stage: STAGE,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let skipped = total_batches - outcome.batches_submitted;
        if outcome.batches_failed + skipped == total_batches {
            outcome.degraded = first_error;
        } else if outcome.batches_failed + skipped > 0 {
            outcome.degraded = Some(StageError::RecoverableStageFailure {
                stage: STAGE,
                reason: format!(
                    "{} of {} batches failed or skipped",
                    outcome.batches_failed + skipped,
                    total_batches
                ),
            });
        }

        Ok(())
    }

    /// Attach scores, apply the threshold and sort once.
    fn finish(
        &self,
        candidates: &[ScoredCandidate],
        scores: Vec<Option<f64>>,
        threshold: f64,
        outcome: &mut NeuralOutcome,
    ) {
        let mut kept: Vec<ScoredCandidate> = candidates
            .iter()
            .zip(scores)
            .filter_map(|(candidate, score)| match score {
                Some(s) if s < threshold => None,
                Some(s) => Some(candidate.with_neural_score(s)),
                None => Some(candidate.clone()),
            })
            .collect();
        outcome.dropped = candidates.len() - kept.len();
        if outcome.dropped > 0 {
            debug!(stage = STAGE, dropped = outcome.dropped, threshold, "Below neural threshold");
        }

        let lexical_max = candidates
            .iter()
            .map(|c| c.lexical_score)
            .fold(0.0, f64::max);
        kept.sort_by(|a, b| {
            b.relevance(lexical_max)
                .partial_cmp(&a.relevance(lexical_max))
                .unwrap_or(Ordering::Equal)
        });
        outcome.candidates = kept;
    }
}
