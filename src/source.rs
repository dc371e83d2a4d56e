//! Candidate providers.
//!
//! Providers are opaque: each one turns a query into raw [`Candidate`]s. The
//! pipeline only needs them wrapped in the resilience layer and merged.
//!
//! ```ascii
//! query ─┬─► ResilientSource("openalex") ─► circuit ─► limiter ─► fetch ─┐
//!        ├─► ResilientSource("pubmed")   ─► ...                          ├─► dedupe by identity
//!        └─► ResilientSource("arxiv")    ─► ... (failed: logged)       ─┘
//! ```

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::candidate::Candidate;
use crate::error::{DependencyError, Result, StageError};
use crate::resilience::ResilienceLayer;

const STAGE: &str = "source";

/// A provider of raw candidate records.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Provider tag, e.g. `openalex`. Also names the circuit.
    fn name(&self) -> &str;

    async fn fetch(&self, query: &str) -> std::result::Result<Vec<Candidate>, DependencyError>;
}

/// A source whose calls go through the resilience layer.
#[derive(Clone)]
pub struct ResilientSource {
    inner: Arc<dyn CandidateSource>,
    resilience: Arc<ResilienceLayer>,
    key: String,
}

impl ResilientSource {
    pub fn new(inner: Arc<dyn CandidateSource>, resilience: Arc<ResilienceLayer>) -> Self {
        let key = format!("provider:{}", inner.name());
        Self {
            inner,
            resilience,
            key,
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Circuit and rate-limit key.
    pub fn dependency_key(&self) -> &str {
        &self.key
    }

    pub async fn fetch(&self, query: &str) -> Result<Vec<Candidate>> {
        let inner = &self.inner;
        self.resilience
            .call(STAGE, &self.key, || inner.fetch(query))
            .await
    }
}

/// Merged output of several sources.
#[derive(Debug, Default)]
pub struct GatherOutcome {
    pub candidates: Vec<Candidate>,
    /// Records dropped because an earlier source returned the same identity.
    pub duplicates: usize,
    /// Sources that failed, with the reason.
    pub failures: Vec<(String, StageError)>,
}

/// Fetch from every source concurrently and merge the results.
///
/// Source order decides which copy of a duplicate survives. A failing source
/// is logged and skipped; only cancellation fails the call.
pub async fn gather_candidates(
    sources: &[ResilientSource],
    query: &str,
    cancel: &CancellationToken,
) -> Result<GatherOutcome> {
    if cancel.is_cancelled() {
        return Err(StageError::Cancelled);
    }

    let fetches = sources.iter().map(|source| async move {
        let result = source.fetch(query).await;
        (source.name().to_string(), result)
    });

    let results = tokio::select! {
        _ = cancel.cancelled() => return Err(StageError::Cancelled),
        results = join_all(fetches) => results,
    };

    let mut outcome = GatherOutcome::default();
    let mut seen = HashSet::new();
    for (name, result) in results {
        match result {
            Ok(candidates) => {
                debug!(source = %name, fetched = candidates.len(), "Source fetched");
                for candidate in candidates {
                    if seen.insert(candidate.identity_key()) {
                        outcome.candidates.push(candidate);
                    } else {
                        outcome.duplicates += 1;
                    }
                }
            }
            Err(e) => {
                warn!(source = %name, error = %e, "Source failed, continuing without it");
                outcome.failures.push((name, e));
            }
        }
    }
    Ok(outcome)
}
