// SPDX-License-Identifier: MIT OR Apache-2.0
//! Vector store gateway.
//!
//! One shared collection holds every tenant's points; isolation is
//! enforced by filter.  The [`VectorGateway`] is the only path the rest of
//! the service uses: it rejects any search/delete/count whose filter does
//! not pin `tenant_id` and `platform` (`MISSING_TENANT_FILTER`), and
//! post-verifies results, dropping and logging any point whose payload
//! tenant differs from the caller (`TENANT_LEAK`).

#![deny(unsafe_code)]

/// Payload filter language.
pub mod filter;
/// In-memory backend for tests and offline runs.
pub mod memory;
/// Qdrant REST backend.
pub mod qdrant;

pub use filter::{Condition, Filter};
pub use memory::MemoryStore;
pub use qdrant::QdrantHttpStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tl_core::{PointPayload, TenantContext, VectorPoint};
use tl_error::{ErrorCode, ServiceError};
use tracing::error;
use uuid::Uuid;

/// Upsert batch size.
pub const UPSERT_BATCH: usize = 100;

// ---------------------------------------------------------------------------
// Queries & results
// ---------------------------------------------------------------------------

/// A search request against the shared collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Dense query vector, when doing semantic search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dense: Option<Vec<f32>>,
    /// Sparse query vector, when doing keyword search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse: Option<Vec<(u32, f32)>>,
    /// Payload filter; must pin tenant and platform.
    pub filter: Filter,
    /// Maximum hits.
    pub limit: usize,
    /// Drop hits scoring below this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f32>,
}

impl SearchQuery {
    /// Dense-only query.
    pub fn dense(vector: Vec<f32>, filter: Filter, limit: usize) -> Self {
        Self {
            dense: Some(vector),
            sparse: None,
            filter,
            limit,
            score_threshold: None,
        }
    }

    /// Sparse-only query.
    pub fn sparse(vector: Vec<(u32, f32)>, filter: Filter, limit: usize) -> Self {
        Self {
            dense: None,
            sparse: Some(vector),
            filter,
            limit,
            score_threshold: None,
        }
    }
}

/// One scored hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    /// Point id.
    pub id: Uuid,
    /// Similarity score (cosine for dense, dot for sparse).
    pub score: f32,
    /// Stored payload.
    pub payload: PointPayload,
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Raw vector store operations.  Use [`VectorGateway`] instead of calling
/// a store directly; the gateway owns the tenant boundary checks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the shared collection (idempotent) with dense size `dims`,
    /// the sparse named vector, and every payload index from
    /// [`PointPayload::INDEXED_FIELDS`].
    async fn ensure_collection(&self, dims: usize) -> Result<(), ServiceError>;

    /// Upsert points; idempotent by point id.
    async fn upsert(&self, points: &[VectorPoint]) -> Result<(), ServiceError>;

    /// Delete every point matching `filter`.
    async fn delete(&self, filter: &Filter) -> Result<u64, ServiceError>;

    /// Count points matching `filter`.
    async fn count(&self, filter: &Filter) -> Result<u64, ServiceError>;

    /// Similarity search within `filter`.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<ScoredPoint>, ServiceError>;
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Tenant-guarded front door to the vector store.
#[derive(Clone)]
pub struct VectorGateway {
    store: Arc<dyn VectorStore>,
}

impl VectorGateway {
    /// Wrap a store.
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    /// See [`VectorStore::ensure_collection`].
    pub async fn ensure_collection(&self, dims: usize) -> Result<(), ServiceError> {
        self.store.ensure_collection(dims).await
    }

    /// Upsert points after verifying each payload belongs to `ctx`.
    pub async fn upsert(
        &self,
        ctx: &TenantContext,
        points: &[VectorPoint],
    ) -> Result<(), ServiceError> {
        for point in points {
            if point.payload.tenant_id != ctx.tenant_id {
                return Err(ServiceError::new(
                    ErrorCode::Internal,
                    "attempted to upsert a point owned by another tenant",
                ));
            }
        }
        for batch in points.chunks(UPSERT_BATCH) {
            self.store.upsert(batch).await?;
        }
        Ok(())
    }

    /// Delete within the tenant filter.  Rejects unscoped filters before
    /// any network traffic.
    pub async fn delete(&self, ctx: &TenantContext, filter: &Filter) -> Result<u64, ServiceError> {
        self.check_scope(ctx, filter)?;
        self.store.delete(filter).await
    }

    /// Count within the tenant filter.
    pub async fn count(&self, ctx: &TenantContext, filter: &Filter) -> Result<u64, ServiceError> {
        self.check_scope(ctx, filter)?;
        self.store.count(filter).await
    }

    /// Search within the tenant filter, post-verifying every hit.
    pub async fn search(
        &self,
        ctx: &TenantContext,
        query: &SearchQuery,
    ) -> Result<Vec<ScoredPoint>, ServiceError> {
        self.check_scope(ctx, &query.filter)?;
        let hits = self.store.search(query).await?;

        // Defense in depth: the filter is the primary guard, but a result
        // that slips through is dropped and flagged, never returned.
        let mut verified = Vec::with_capacity(hits.len());
        for hit in hits {
            if hit.payload.tenant_id == ctx.tenant_id {
                verified.push(hit);
            } else {
                error!(
                    security = true,
                    expected = ctx.tenant_id.as_str(),
                    got = hit.payload.tenant_id.as_str(),
                    point = %hit.id,
                    "tenant leak: dropped cross-tenant search result"
                );
            }
        }
        Ok(verified)
    }

    fn check_scope(&self, ctx: &TenantContext, filter: &Filter) -> Result<(), ServiceError> {
        if !filter.has_tenant_scope() {
            return Err(ServiceError::new(
                ErrorCode::MissingTenantFilter,
                "filter does not pin tenant_id and platform",
            ));
        }
        if filter.tenant_id() != Some(ctx.tenant_id.as_str()) {
            return Err(ServiceError::new(
                ErrorCode::MissingTenantFilter,
                "filter tenant does not match the calling context",
            ));
        }
        Ok(())
    }
}
