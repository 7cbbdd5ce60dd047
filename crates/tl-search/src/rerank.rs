// SPDX-License-Identifier: MIT OR Apache-2.0
//! Rerank seam.
//!
//! After fusion, the top slice is rescored by a cross-encoder-style
//! scorer and stable-sorted, so ties keep their fusion order.  The HTTP
//! client fronts any service exposing a `{query, texts[]} → {scores[]}`
//! endpoint (ms-marco MiniLM or equivalent); the lexical scorer is the
//! deterministic in-process default.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use tl_error::{ErrorCode, ServiceError};

/// Fused hits rescored per query.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score each document against `query`; higher is better.  The
    /// returned vector must be positionally aligned with `documents`.
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, ServiceError>;
}

// ---------------------------------------------------------------------------
// Lexical default
// ---------------------------------------------------------------------------

/// Token-overlap scorer (Jaccard over lowercase alphanumeric tokens).
///
/// Deterministic and dependency-free; deployments point the engine at a
/// real cross-encoder via [`HttpCrossEncoder`] when available.
#[derive(Default)]
pub struct LexicalReranker;

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.chars().count() >= 2)
        .collect()
}

#[async_trait]
impl Reranker for LexicalReranker {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, ServiceError> {
        let query_tokens = tokens(query);
        Ok(documents
            .iter()
            .map(|doc| {
                let doc_tokens = tokens(doc);
                if query_tokens.is_empty() || doc_tokens.is_empty() {
                    return 0.0;
                }
                let overlap = query_tokens.intersection(&doc_tokens).count() as f32;
                let union = query_tokens.union(&doc_tokens).count() as f32;
                overlap / union
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// HTTP cross-encoder
// ---------------------------------------------------------------------------

/// Client for an external cross-encoder scoring service.
pub struct HttpCrossEncoder {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    scores: Vec<f32>,
}

impl HttpCrossEncoder {
    /// Point at a scoring endpoint.
    pub fn new(url: impl Into<String>) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| {
                ServiceError::new(ErrorCode::Internal, "failed to build http client")
                    .with_source(e)
            })?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Reranker for HttpCrossEncoder {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, ServiceError> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({"query": query, "texts": documents}))
            .send()
            .await
            .map_err(|e| {
                ServiceError::new(ErrorCode::TransientNetwork, "reranker request failed")
                    .with_source(e)
            })?;
        if !response.status().is_success() {
            return Err(ServiceError::new(
                ErrorCode::TransientNetwork,
                "reranker returned an error status",
            )
            .with_context("status", response.status().as_u16()));
        }
        let parsed: ScoreResponse = response.json().await.map_err(|e| {
            ServiceError::new(ErrorCode::TransientNetwork, "reranker body decode failed")
                .with_source(e)
        })?;
        if parsed.scores.len() != documents.len() {
            return Err(ServiceError::new(
                ErrorCode::TransientNetwork,
                "reranker score count does not match the batch",
            )
            .with_context("expected", documents.len())
            .with_context("got", parsed.scores.len()));
        }
        Ok(parsed.scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lexical_scores_overlap_higher() {
        let reranker = LexicalReranker;
        let docs = vec![
            "billing error on visa card".to_string(),
            "printer is out of toner".to_string(),
        ];
        let scores = reranker.score("visa billing problem", &docs).await.unwrap();
        assert!(scores[0] > scores[1]);
    }

    #[tokio::test]
    async fn lexical_handles_empty_inputs() {
        let reranker = LexicalReranker;
        let scores = reranker
            .score("", &["anything".to_string()])
            .await
            .unwrap();
        assert_eq!(scores, vec![0.0]);
    }

    #[tokio::test]
    async fn lexical_is_positionally_aligned() {
        let reranker = LexicalReranker;
        let docs: Vec<String> = (0..5).map(|i| format!("doc number {i}")).collect();
        let scores = reranker.score("doc", &docs).await.unwrap();
        assert_eq!(scores.len(), 5);
    }
}
