//! Relevance scoring stages: lexical recall and neural reranking.
//!
//! # Architecture
//!
//! ```ascii
//!                    ┌─────────────────────────────┐
//!                    │   QueryContext + Candidates  │
//!                    └──────────────┬──────────────┘
//!                                   ▼
//!     ┌─────────────────────────────────────────────────────┐
//!     │  LexicalScorer (BM25) ──► RecallFilter (bypassable) │
//!     └──────────────────────────┬──────────────────────────┘
//!                                ▼
//!     ┌─────────────────────────────────────────────────────┐
//!     │  NeuralReranker ── RelevanceCache, ResilienceLayer   │
//!     │        │                                             │
//!     │        └── CrossEncoder trait                        │
//!     └──────────────────────────┬──────────────────────────┘
//!                 ┌──────────────┴───────────────┐
//!                 ▼                              ▼
//!        ┌──────────────────┐        ┌──────────────────────┐
//!        │ HttpCrossEncoder │        │TermOverlapCrossEncoder│
//!        │ (Jina, Cohere)   │        │  (local)              │
//!        └──────────────────┘        └──────────────────────┘
//! ```
//!
//! # Module Structure
//!
//! ```ascii
//! reranker/
//! ├── mod.rs          ─► This file (re-exports)
//! ├── bm25.rs         ─► LexicalScorer, RecallFilter
//! ├── config.rs       ─► CrossEncoderConfig
//! ├── pair.rs         ─► PairInput
//! ├── traits.rs       ─► CrossEncoder trait
//! ├── http.rs         ─► HttpCrossEncoder (Jina, Cohere, Aliyun, local)
//! ├── term_overlap.rs ─► TermOverlapCrossEncoder
//! └── neural.rs       ─► NeuralReranker
//! ```

mod bm25;
mod config;
mod http;
mod neural;
mod pair;
mod term_overlap;
mod traits;

pub use bm25::{LexicalScorer, RecallFilter, RecallOutcome};
pub use config::CrossEncoderConfig;
pub use http::HttpCrossEncoder;
pub use neural::{NeuralOutcome, NeuralReranker};
pub use pair::{PairInput, PAIR_SEPARATOR};
pub use term_overlap::TermOverlapCrossEncoder;
pub use traits::CrossEncoder;
