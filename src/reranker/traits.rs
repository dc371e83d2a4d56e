//! Cross-encoder trait definition.
//!
//! ```ascii
//!                      ┌───────────────────┐
//!                      │ CrossEncoder Trait│
//!                      └─────────┬─────────┘
//!                                │
//!              ┌─────────────────┴─────────────────┐
//!              ▼                                   ▼
//!     ┌──────────────────┐              ┌──────────────────────┐
//!     │ HttpCrossEncoder │              │TermOverlapCrossEncoder│
//!     │ (Jina, Cohere)   │              │ (local, deterministic)│
//!     └──────────────────┘              └──────────────────────┘
//! ```

use async_trait::async_trait;

use super::pair::PairInput;
use crate::error::DependencyError;

/// A model that scores (query, document) pairs jointly.
///
/// `score` returns one value in `[0, 1]` per input pair, in input order.
/// Implementations never see candidates directly; the reranker owns
/// batching, caching and the resilience wrapper.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Get the name of this encoder.
    fn name(&self) -> &str;

    /// Get the model being used.
    fn model(&self) -> &str;

    /// Score a batch of pairs.
    async fn score(&self, pairs: &[PairInput]) -> Result<Vec<f64>, DependencyError>;
}
