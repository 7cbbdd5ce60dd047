// SPDX-License-Identifier: MIT OR Apache-2.0
//! Qdrant REST backend.
//!
//! Speaks the collection, points, and search subset of the Qdrant HTTP API
//! with named dense + sparse vectors and payload indexes declared at
//! collection creation.

use crate::filter::{Condition, Filter};
use crate::{ScoredPoint, SearchQuery, VectorStore};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tl_core::{COLLECTION_NAME, PointPayload, VectorPoint};
use tl_error::{ErrorCode, ServiceError};
use tracing::info;
use uuid::Uuid;

/// Qdrant-over-HTTP store.
pub struct QdrantHttpStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
}

impl QdrantHttpStore {
    /// Connect to `base_url` (no trailing slash needed) with an optional
    /// API key, using the shared collection name.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| {
                ServiceError::new(ErrorCode::Internal, "failed to build http client")
                    .with_source(e)
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            collection: COLLECTION_NAME.to_string(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let mut req = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }
        req
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response, ServiceError> {
        let response = req.send().await.map_err(|e| {
            let code = if e.is_timeout() {
                ErrorCode::UpstreamTimeout
            } else {
                ErrorCode::TransientNetwork
            };
            ServiceError::new(code, format!("vector store {what} failed")).with_source(e)
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let code = match status.as_u16() {
            429 => ErrorCode::RateLimited,
            401 | 403 => ErrorCode::AuthFailure,
            s if (500..600).contains(&s) => ErrorCode::TransientNetwork,
            _ => ErrorCode::PermanentClientError,
        };
        Err(
            ServiceError::new(code, format!("vector store rejected {what}"))
                .with_context("status", status.as_u16()),
        )
    }
}

// ---------------------------------------------------------------------------
// Wire conversion
// ---------------------------------------------------------------------------

fn condition_json(condition: &Condition) -> serde_json::Value {
    match condition {
        Condition::Match { key, value } => json!({"key": key, "match": {"value": value}}),
        Condition::MatchAny { key, values } => json!({"key": key, "match": {"any": values}}),
        Condition::Range { key, gte, lte } => {
            let mut range = serde_json::Map::new();
            if let Some(lo) = gte {
                range.insert("gte".into(), json!(lo));
            }
            if let Some(hi) = lte {
                range.insert("lte".into(), json!(hi));
            }
            json!({"key": key, "range": range})
        }
    }
}

fn filter_json(filter: &Filter) -> serde_json::Value {
    let map = |conditions: &[Condition]| {
        conditions
            .iter()
            .map(condition_json)
            .collect::<Vec<_>>()
    };
    let mut out = serde_json::Map::new();
    if !filter.must.is_empty() {
        out.insert("must".into(), json!(map(&filter.must)));
    }
    if !filter.should.is_empty() {
        out.insert("should".into(), json!(map(&filter.should)));
    }
    if !filter.must_not.is_empty() {
        out.insert("must_not".into(), json!(map(&filter.must_not)));
    }
    serde_json::Value::Object(out)
}

fn point_json(point: &VectorPoint) -> serde_json::Value {
    let mut vector = serde_json::Map::new();
    vector.insert("dense".into(), json!(point.dense));
    if let Some(sparse) = &point.sparse {
        let indices: Vec<u32> = sparse.iter().map(|(i, _)| *i).collect();
        let values: Vec<f32> = sparse.iter().map(|(_, v)| *v).collect();
        vector.insert("sparse".into(), json!({"indices": indices, "values": values}));
    }
    json!({
        "id": point.id,
        "vector": vector,
        "payload": point.payload,
    })
}

/// Payload index schema per indexed field.
fn index_schema(field: &str) -> &'static str {
    match field {
        "priority" | "created_at" => "integer",
        _ => "keyword",
    }
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: Uuid,
    score: f32,
    payload: PointPayload,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    result: CountInner,
}

#[derive(Debug, Deserialize)]
struct CountInner {
    count: u64,
}

// ---------------------------------------------------------------------------
// VectorStore impl
// ---------------------------------------------------------------------------

#[async_trait]
impl VectorStore for QdrantHttpStore {
    async fn ensure_collection(&self, dims: usize) -> Result<(), ServiceError> {
        let exists = self
            .request(reqwest::Method::GET, &format!("/collections/{}", self.collection))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false);

        if !exists {
            let body = json!({
                "vectors": {"dense": {"size": dims, "distance": "Cosine"}},
                "sparse_vectors": {"sparse": {}},
            });
            self.send(
                self.request(
                    reqwest::Method::PUT,
                    &format!("/collections/{}", self.collection),
                )
                .json(&body),
                "collection create",
            )
            .await?;
            info!(collection = %self.collection, dims, "created vector collection");
        }

        for field in PointPayload::INDEXED_FIELDS {
            let body = json!({"field_name": field, "field_schema": index_schema(field)});
            self.send(
                self.request(
                    reqwest::Method::PUT,
                    &format!("/collections/{}/index?wait=true", self.collection),
                )
                .json(&body),
                "payload index create",
            )
            .await?;
        }
        Ok(())
    }

    async fn upsert(&self, points: &[VectorPoint]) -> Result<(), ServiceError> {
        if points.is_empty() {
            return Ok(());
        }
        let body = json!({"points": points.iter().map(point_json).collect::<Vec<_>>()});
        self.send(
            self.request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points?wait=true", self.collection),
            )
            .json(&body),
            "upsert",
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, filter: &Filter) -> Result<u64, ServiceError> {
        let deleted = self.count(filter).await?;
        let body = json!({"filter": filter_json(filter)});
        self.send(
            self.request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/delete?wait=true", self.collection),
            )
            .json(&body),
            "delete",
        )
        .await?;
        Ok(deleted)
    }

    async fn count(&self, filter: &Filter) -> Result<u64, ServiceError> {
        let body = json!({"filter": filter_json(filter), "exact": true});
        let response = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{}/points/count", self.collection),
                )
                .json(&body),
                "count",
            )
            .await?;
        let parsed: CountResult = response.json().await.map_err(|e| {
            ServiceError::new(ErrorCode::TransientNetwork, "count decode failed").with_source(e)
        })?;
        Ok(parsed.result.count)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<ScoredPoint>, ServiceError> {
        let vector = match (&query.dense, &query.sparse) {
            (Some(dense), _) => json!({"name": "dense", "vector": dense}),
            (None, Some(sparse)) => {
                let indices: Vec<u32> = sparse.iter().map(|(i, _)| *i).collect();
                let values: Vec<f32> = sparse.iter().map(|(_, v)| *v).collect();
                json!({"name": "sparse", "vector": {"indices": indices, "values": values}})
            }
            (None, None) => {
                return Err(ServiceError::new(
                    ErrorCode::InvalidQuery,
                    "search needs a dense or sparse query vector",
                ));
            }
        };

        let mut body = serde_json::Map::new();
        body.insert("vector".into(), vector);
        body.insert("filter".into(), filter_json(&query.filter));
        body.insert("limit".into(), json!(query.limit));
        body.insert("with_payload".into(), json!(true));
        if let Some(threshold) = query.score_threshold {
            body.insert("score_threshold".into(), json!(threshold));
        }

        let response = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{}/points/search", self.collection),
                )
                .json(&serde_json::Value::Object(body)),
                "search",
            )
            .await?;
        let parsed: SearchResult = response.json().await.map_err(|e| {
            ServiceError::new(ErrorCode::TransientNetwork, "search decode failed").with_source(e)
        })?;
        Ok(parsed
            .result
            .into_iter()
            .map(|hit| ScoredPoint {
                id: hit.id,
                score: hit.score,
                payload: hit.payload,
            })
            .collect())
    }
}
