// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory vector store.
//!
//! Evaluates the same filter semantics as the remote backend over a
//! process-local map, scoring dense queries by cosine similarity and
//! sparse queries by dot product.  Used by tests and by deployments that
//! run without a vector database.

use crate::filter::{Condition, Filter};
use crate::{ScoredPoint, SearchQuery, VectorStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tl_core::VectorPoint;
use tl_error::ServiceError;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local store.
#[derive(Default)]
pub struct MemoryStore {
    points: RwLock<HashMap<Uuid, VectorPoint>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored points (test helper).
    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    /// True when no points are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Fetch one point by id (test helper).
    pub async fn get(&self, id: Uuid) -> Option<VectorPoint> {
        self.points.read().await.get(&id).cloned()
    }
}

fn payload_value(point: &VectorPoint, key: &str) -> Option<serde_json::Value> {
    let payload = serde_json::to_value(&point.payload).ok()?;
    payload.get(key).cloned()
}

fn condition_matches(point: &VectorPoint, condition: &Condition) -> bool {
    match condition {
        Condition::Match { key, value } => {
            payload_value(point, key).is_some_and(|actual| match (&actual, value) {
                // Keyword arrays match when they contain the value.
                (serde_json::Value::Array(items), v) => items.contains(v),
                (a, v) => a == v,
            })
        }
        Condition::MatchAny { key, values } => {
            payload_value(point, key).is_some_and(|actual| match &actual {
                serde_json::Value::Array(items) => values.iter().any(|v| items.contains(v)),
                other => values.iter().any(|v| other == v),
            })
        }
        Condition::Range { key, gte, lte } => payload_value(point, key)
            .and_then(|v| v.as_i64())
            .is_some_and(|n| gte.is_none_or(|lo| n >= lo) && lte.is_none_or(|hi| n <= hi)),
    }
}

fn filter_matches(point: &VectorPoint, filter: &Filter) -> bool {
    filter.must.iter().all(|c| condition_matches(point, c))
        && !filter.must_not.iter().any(|c| condition_matches(point, c))
    // `should` influences scoring on real backends; membership ignores it.
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

fn sparse_dot(a: &[(u32, f32)], b: &[(u32, f32)]) -> f32 {
    let mut score = 0.0;
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                score += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    score
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, _dims: usize) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn upsert(&self, points: &[VectorPoint]) -> Result<(), ServiceError> {
        let mut guard = self.points.write().await;
        for point in points {
            guard.insert(point.id, point.clone());
        }
        Ok(())
    }

    async fn delete(&self, filter: &Filter) -> Result<u64, ServiceError> {
        let mut guard = self.points.write().await;
        let before = guard.len();
        guard.retain(|_, point| !filter_matches(point, filter));
        Ok((before - guard.len()) as u64)
    }

    async fn count(&self, filter: &Filter) -> Result<u64, ServiceError> {
        let guard = self.points.read().await;
        Ok(guard
            .values()
            .filter(|p| filter_matches(p, filter))
            .count() as u64)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<ScoredPoint>, ServiceError> {
        let guard = self.points.read().await;
        let mut hits: Vec<ScoredPoint> = guard
            .values()
            .filter(|p| filter_matches(p, &query.filter))
            .map(|p| {
                let score = match (&query.dense, &query.sparse) {
                    (Some(dense), _) => cosine(dense, &p.dense),
                    (None, Some(sparse)) => {
                        p.sparse.as_deref().map_or(0.0, |ps| sparse_dot(sparse, ps))
                    }
                    (None, None) => 0.0,
                };
                ScoredPoint {
                    id: p.id,
                    score,
                    payload: p.payload.clone(),
                }
            })
            .filter(|hit| query.score_threshold.is_none_or(|t| hit.score >= t))
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.payload.original_id.cmp(&b.payload.original_id))
        });
        hits.truncate(query.limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tl_core::{Language, ObjectType, PointPayload, TenantId, TicketStatus, point_id};

    fn mk_point(tenant: &str, id: &str, vector: Vec<f32>, priority: u8, created: i64) -> VectorPoint {
        let tenant_id = TenantId::new(tenant).unwrap();
        VectorPoint {
            id: point_id(&tenant_id, "freshdesk", ObjectType::Ticket, id),
            dense: vector,
            sparse: Some(vec![(1, 0.5), (7, 0.5)]),
            payload: PointPayload {
                tenant_id,
                platform: "freshdesk".into(),
                object_type: ObjectType::Ticket,
                original_id: id.into(),
                content_type: ObjectType::Ticket,
                subject: format!("s{id}"),
                status: TicketStatus::Open,
                priority,
                tags: vec!["vip".into()],
                category: Some("billing".into()),
                created_at: created,
                updated_at: created,
                requester_id: None,
                assignee_id: None,
                summary_sections: vec![],
                summary_text: "t".into(),
                content_hash: "h".into(),
                language: Language::En,
            },
        }
    }

    fn tenant_filter(tenant: &str) -> Filter {
        Filter::default()
            .must(Condition::matches("tenant_id", tenant))
            .must(Condition::matches("platform", "freshdesk"))
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_id() {
        let store = MemoryStore::new();
        let p = mk_point("acme", "1", vec![1.0, 0.0], 2, 100);
        store.upsert(&[p.clone()]).await.unwrap();
        store.upsert(&[p]).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn filter_by_tenant_partitions_points() {
        let store = MemoryStore::new();
        store
            .upsert(&[
                mk_point("acme", "1", vec![1.0, 0.0], 2, 100),
                mk_point("globex", "1", vec![1.0, 0.0], 2, 100),
            ])
            .await
            .unwrap();

        assert_eq!(store.count(&tenant_filter("acme")).await.unwrap(), 1);
        assert_eq!(store.count(&tenant_filter("globex")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn range_condition_filters_created_at() {
        let store = MemoryStore::new();
        store
            .upsert(&[
                mk_point("acme", "old", vec![1.0, 0.0], 2, 100),
                mk_point("acme", "new", vec![1.0, 0.0], 2, 900),
            ])
            .await
            .unwrap();

        let filter = tenant_filter("acme").must(Condition::range("created_at", Some(500), None));
        assert_eq!(store.count(&filter).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn match_any_on_tags() {
        let store = MemoryStore::new();
        store
            .upsert(&[mk_point("acme", "1", vec![1.0], 2, 100)])
            .await
            .unwrap();
        let hit = tenant_filter("acme").must(Condition::any("tags", ["vip"]));
        assert_eq!(store.count(&hit).await.unwrap(), 1);
        let miss = tenant_filter("acme").must(Condition::any("tags", ["nope"]));
        assert_eq!(store.count(&miss).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn must_not_excludes() {
        let store = MemoryStore::new();
        store
            .upsert(&[mk_point("acme", "1", vec![1.0], 4, 100)])
            .await
            .unwrap();
        let filter = tenant_filter("acme").must_not(Condition::matches("priority", 4));
        assert_eq!(store.count(&filter).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dense_search_ranks_by_cosine() {
        let store = MemoryStore::new();
        store
            .upsert(&[
                mk_point("acme", "near", vec![1.0, 0.05], 2, 100),
                mk_point("acme", "far", vec![0.0, 1.0], 2, 100),
            ])
            .await
            .unwrap();

        let query = SearchQuery::dense(vec![1.0, 0.0], tenant_filter("acme"), 10);
        let hits = store.search(&query).await.unwrap();
        assert_eq!(hits[0].payload.original_id, "near");
        assert!(hits[0].score > 0.9);
    }

    #[tokio::test]
    async fn sparse_search_uses_dot_product() {
        let store = MemoryStore::new();
        store
            .upsert(&[mk_point("acme", "1", vec![1.0], 2, 100)])
            .await
            .unwrap();
        let query = SearchQuery::sparse(vec![(1, 1.0)], tenant_filter("acme"), 10);
        let hits = store.search(&query).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn score_threshold_drops_weak_hits() {
        let store = MemoryStore::new();
        store
            .upsert(&[
                mk_point("acme", "near", vec![1.0, 0.0], 2, 100),
                mk_point("acme", "far", vec![0.0, 1.0], 2, 100),
            ])
            .await
            .unwrap();
        let mut query = SearchQuery::dense(vec![1.0, 0.0], tenant_filter("acme"), 10);
        query.score_threshold = Some(0.5);
        let hits = store.search(&query).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn delete_by_filter_returns_count() {
        let store = MemoryStore::new();
        store
            .upsert(&[
                mk_point("acme", "1", vec![1.0], 2, 100),
                mk_point("acme", "2", vec![1.0], 2, 100),
                mk_point("globex", "1", vec![1.0], 2, 100),
            ])
            .await
            .unwrap();
        let deleted = store.delete(&tenant_filter("acme")).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.len().await, 1);
    }
}
