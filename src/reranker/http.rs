//! HTTP cross-encoder backed by a rerank API.
//!
//! # Supported Providers
//!
//! | Provider | API | Features |
//! |----------|-----|----------|
//! | Jina AI | REST | Multilingual, fast |
//! | Cohere | REST | rerank-v3.5 |
//! | Aliyun | REST | DashScope gte-rerank-v2 |
//! | Local | REST | Any model behind a compatible rerank route |

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tracing::debug;

use super::config::CrossEncoderConfig;
use super::pair::PairInput;
use super::traits::CrossEncoder;
use crate::error::DependencyError;

/// Cross-encoder that posts each batch to a rerank endpoint.
///
/// ```ascii
/// ┌──────────────────┐   POST {query, documents}   ┌─────────────────┐
/// │ HttpCrossEncoder │ ──────────────────────────► │  Rerank API     │
/// │                  │ ◄────────────────────────── │                 │
/// └──────────────────┘   results[{index, score}]   └─────────────────┘
/// ```
///
/// Results are mapped back by `index`, so providers that return results
/// sorted by relevance still line up with the input order.
pub struct HttpCrossEncoder {
    client: Client,
    config: CrossEncoderConfig,
    format: ApiFormat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ApiFormat {
    /// `{"query", "documents"}` -> `{"results": [...]}`
    Standard,
    /// `{"input": {...}}` -> `{"output": {"results": [...]}}`
    Aliyun,
}

impl HttpCrossEncoder {
    pub fn new(config: CrossEncoderConfig) -> Result<Self, DependencyError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DependencyError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            format: Self::detect_format(&config.base_url),
            config,
        })
    }

    pub fn jina(api_key: impl Into<String>) -> Result<Self, DependencyError> {
        Self::new(CrossEncoderConfig::jina(api_key))
    }

    pub fn cohere(api_key: impl Into<String>) -> Result<Self, DependencyError> {
        Self::new(CrossEncoderConfig::cohere(api_key))
    }

    pub fn aliyun(api_key: impl Into<String>) -> Result<Self, DependencyError> {
        Self::new(CrossEncoderConfig::aliyun(api_key))
    }

    pub fn config(&self) -> &CrossEncoderConfig {
        &self.config
    }

    fn detect_format(base_url: &str) -> ApiFormat {
        if base_url.contains("dashscope.aliyuncs.com") {
            ApiFormat::Aliyun
        } else {
            ApiFormat::Standard
        }
    }

    fn build_request(&self, query: &str, documents: &[&str]) -> serde_json::Value {
        match self.format {
            ApiFormat::Standard => serde_json::json!({
                "model": self.config.model,
                "query": query,
                "documents": documents,
                "top_n": documents.len(),
            }),
            ApiFormat::Aliyun => serde_json::json!({
                "model": self.config.model,
                "input": {
                    "query": query,
                    "documents": documents,
                },
                "parameters": { "top_n": documents.len() },
            }),
        }
    }

    /// Map a response back to one score per input document.
    fn parse_response(
        &self,
        response: &serde_json::Value,
        expected: usize,
    ) -> Result<Vec<f64>, DependencyError> {
        let results = match self.format {
            ApiFormat::Standard => response.get("results"),
            ApiFormat::Aliyun => response.get("output").and_then(|o| o.get("results")),
        }
        .and_then(|r| r.as_array())
        .ok_or_else(|| DependencyError::InvalidResponse("Missing results array".to_string()))?;

        let mut scores: Vec<Option<f64>> = vec![None; expected];
        for result in results {
            let index = result
                .get("index")
                .and_then(|i| i.as_u64())
                .ok_or_else(|| {
                    DependencyError::InvalidResponse("Missing index in rerank result".to_string())
                })? as usize;
            let score = result
                .get("relevance_score")
                .and_then(|s| s.as_f64())
                .ok_or_else(|| {
                    DependencyError::InvalidResponse(
                        "Missing relevance_score in rerank result".to_string(),
                    )
                })?;
            let slot = scores.get_mut(index).ok_or_else(|| {
                DependencyError::InvalidResponse(format!(
                    "Result index {} out of range for {} documents",
                    index, expected
                ))
            })?;
            *slot = Some(score);
        }

        let scores: Vec<f64> = scores
            .into_iter()
            .enumerate()
            .map(|(i, s)| {
                s.ok_or_else(|| {
                    DependencyError::InvalidResponse(format!("No score for document {}", i))
                })
            })
            .collect::<Result<_, _>>()?;

        Ok(squash_if_logits(scores))
    }

    async fn score_group(
        &self,
        query: &str,
        documents: &[&str],
    ) -> Result<Vec<f64>, DependencyError> {
        let payload = self.build_request(query, documents);

        debug!(
            documents = documents.len(),
            model = %self.config.model,
            "Cross-encoder request"
        );

        let mut request = self
            .client
            .post(&self.config.base_url)
            .header("Content-Type", "application/json");

        if let Some(ref api_key) = self.config.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request.json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(if status.as_u16() == 429 {
                DependencyError::RateLimited(message)
            } else {
                DependencyError::Api {
                    status: status.as_u16(),
                    message,
                }
            });
        }

        let body: serde_json::Value = response.json().await?;
        self.parse_response(&body, documents.len())
    }
}

/// Raw logits are mapped into `[0, 1]` with the logistic function.
///
/// The whole batch is squashed when any score falls outside `[0, 1]`, which
/// keeps the ordering within the batch intact.
fn squash_if_logits(scores: Vec<f64>) -> Vec<f64> {
    if scores.iter().all(|s| (0.0..=1.0).contains(s)) {
        scores
    } else {
        scores.into_iter().map(|s| 1.0 / (1.0 + (-s).exp())).collect()
    }
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    fn name(&self) -> &str {
        if self.config.base_url.contains("jina.ai") {
            "jina"
        } else if self.config.base_url.contains("cohere.com") {
            "cohere"
        } else if self.config.base_url.contains("aliyuncs.com") {
            "aliyun"
        } else {
            "http"
        }
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn score(&self, pairs: &[PairInput]) -> Result<Vec<f64>, DependencyError> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        // Rerank APIs take one query per request. A batch normally shares a
        // single query; consecutive runs of the same query become one request.
        let mut scores = Vec::with_capacity(pairs.len());
        let mut start = 0;
        while start < pairs.len() {
            let query: &Arc<str> = &pairs[start].query;
            let end = pairs[start..]
                .iter()
                .position(|p| p.query != *query)
                .map_or(pairs.len(), |offset| start + offset);

            let documents: Vec<&str> = pairs[start..end]
                .iter()
                .map(|p| p.document.as_str())
                .collect();
            scores.extend(self.score_group(query, &documents).await?);
            start = end;
        }

        Ok(scores)
    }
}
