//! Cross-encoder endpoint configuration.
//!
//! ```ascii
//! ┌─────────────────────────────────────────────────────────┐
//! │                  CrossEncoderConfig                      │
//! ├─────────────────────────────────────────────────────────┤
//! │ model: String         ─────► Which model to use         │
//! │ base_url: String      ─────► Rerank endpoint            │
//! │ api_key: Option       ─────► Bearer token               │
//! │ timeout: Duration     ─────► Per-request timeout        │
//! └─────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

/// Configuration for an HTTP cross-encoder.
///
/// Use the presets for hosted rerank APIs:
/// - [`CrossEncoderConfig::jina`]
/// - [`CrossEncoderConfig::cohere`]
/// - [`CrossEncoderConfig::aliyun`]
///
/// A self-hosted model behind a compatible `/rerank` route works with
/// [`CrossEncoderConfig::local`].
#[derive(Debug, Clone)]
pub struct CrossEncoderConfig {
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for CrossEncoderConfig {
    fn default() -> Self {
        Self {
            model: "jina-reranker-v2-base-multilingual".to_string(),
            base_url: "https://api.jina.ai/v1/rerank".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl CrossEncoderConfig {
    pub fn jina(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Default::default()
        }
    }

    pub fn cohere(api_key: impl Into<String>) -> Self {
        Self {
            model: "rerank-v3.5".to_string(),
            base_url: "https://api.cohere.com/v2/rerank".to_string(),
            api_key: Some(api_key.into()),
            ..Default::default()
        }
    }

    pub fn aliyun(api_key: impl Into<String>) -> Self {
        Self {
            model: "gte-rerank-v2".to_string(),
            base_url:
                "https://dashscope.aliyuncs.com/api/v1/services/rerank/text-rerank/text-rerank"
                    .to_string(),
            api_key: Some(api_key.into()),
            ..Default::default()
        }
    }

    /// A locally served model, e.g. `ms-marco-MiniLM-L-6-v2` behind a rerank route.
    pub fn local(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: base_url.into(),
            api_key: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
