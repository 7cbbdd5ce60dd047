// SPDX-License-Identifier: MIT OR Apache-2.0
//! Conditional search engine.
//!
//! Turns an analyzed query into payload filters and hybrid retrieval:
//! candidate sizing picks exhaustive ranking for small filtered sets,
//! dense and sparse legs run under the same filter, HyDE widens confident
//! complex queries, reciprocal-rank fusion merges the legs, and a rerank
//! pass stable-sorts the top slice.  Any failure in the enhancement
//! stages falls back to a plain dense search inside the same filter —
//! results never come from outside it.

#![deny(unsafe_code)]

/// Rank fusion.
pub mod fusion;
/// Rerank seam.
pub mod rerank;

pub use rerank::{HttpCrossEncoder, LexicalReranker, Reranker};

use chrono::Utc;
use fusion::{FusedHit, RankedLeg};
use std::sync::Arc;
use tl_config::{SearchTuning, UseCase};
use tl_core::query::{AnalyzedQuery, PersonRole, QueryConditions, QueryIntent};
use tl_core::{ObjectType, PointPayload, TenantContext};
use tl_embed::Embedder;
use tl_embed::sparse::sparse_vector;
use tl_error::{ErrorCode, ServiceError};
use tl_llm::{CancellationToken, ChatMessage, GenerateOptions, TextGenerator};
use tl_vector::{Condition, Filter, ScoredPoint, SearchQuery, VectorGateway};
use tracing::{debug, warn};
use uuid::Uuid;

/// Filtered sets at or under this size are ranked exhaustively.
const EXHAUSTIVE_LIMIT: usize = 200;
/// Fused hits passed to the reranker.
const RERANK_DEPTH: usize = 20;
/// HyDE engages at or above this analyzer confidence.
const HYDE_MIN_CONFIDENCE: f64 = 0.7;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// One search hit after fusion and rerank.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SearchHit {
    /// Point id.
    pub id: Uuid,
    /// Final score.
    pub score: f64,
    /// Stored payload.
    pub payload: PointPayload,
    /// Set when this hit only survived the prevent-empty fallback.
    #[serde(default)]
    pub low_confidence: bool,
}

/// A completed search.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SearchOutcome {
    /// Ranked hits.
    pub hits: Vec<SearchHit>,
    /// True when the enhancement path failed and the plain dense fallback
    /// produced these hits.
    pub degraded: bool,
}

// ---------------------------------------------------------------------------
// Filter construction
// ---------------------------------------------------------------------------

/// Translate extracted conditions into a tenant-scoped filter.
///
/// Hard conditions land in `must`; tags are soft preferences in `should`.
/// Relative time resolves against `now_epoch` at query time.  Sentiment
/// has no payload counterpart and is ignored.
pub fn build_filter(
    ctx: &TenantContext,
    conditions: &QueryConditions,
    now_epoch: i64,
) -> Filter {
    let mut filter = Filter::for_tenant(ctx);

    if let Some(time) = &conditions.time {
        let gte = time
            .since
            .or_else(|| time.relative_days.map(|d| now_epoch - i64::from(d) * 86_400));
        if gte.is_some() || time.until.is_some() {
            filter = filter.must(Condition::range("created_at", gte, time.until));
        }
    }
    if let Some(priority) = &conditions.priority {
        filter = filter.must(Condition::range(
            "priority",
            Some(i64::from(priority.min.value())),
            Some(i64::from(priority.max.value())),
        ));
    }
    if !conditions.status.is_empty() {
        filter = filter.must(Condition::any(
            "status",
            conditions.status.iter().map(|s| s.as_str()),
        ));
    }
    if !conditions.category.is_empty() {
        filter = filter.must(Condition::any(
            "category",
            conditions.category.iter().map(String::as_str),
        ));
    }
    if !conditions.tags.is_empty() {
        filter = filter.should(Condition::any(
            "tags",
            conditions.tags.iter().map(String::as_str),
        ));
    }
    if let Some(person) = &conditions.person {
        let key = match person.role {
            PersonRole::Requester => "requester_id",
            PersonRole::Assignee => "assignee_id",
        };
        filter = filter.must(Condition::matches(key, person.identifier.as_str()));
    }
    filter
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The conditional search engine.
pub struct SearchEngine {
    gateway: VectorGateway,
    embedder: Arc<Embedder>,
    generator: Option<Arc<dyn TextGenerator>>,
    reranker: Arc<dyn Reranker>,
    tuning: SearchTuning,
}

impl SearchEngine {
    /// Assemble an engine.  `generator` enables the HyDE stage.
    pub fn new(
        gateway: VectorGateway,
        embedder: Arc<Embedder>,
        generator: Option<Arc<dyn TextGenerator>>,
        reranker: Arc<dyn Reranker>,
        tuning: SearchTuning,
    ) -> Self {
        Self {
            gateway,
            embedder,
            generator,
            reranker,
            tuning,
        }
    }

    /// Run the full conditional pipeline for an analyzed query.
    pub async fn search(
        &self,
        ctx: &TenantContext,
        analyzed: &AnalyzedQuery,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome, ServiceError> {
        let now_epoch = Utc::now().timestamp();
        let filter = build_filter(ctx, &analyzed.conditions, now_epoch);

        // Kill switch: run plain semantic search inside the same filter,
        // skipping the hybrid/HyDE/rerank machinery entirely.
        if !self.tuning.conditional_search_enabled {
            let hits = self
                .plain_dense(ctx, &analyzed.search_text, &filter, top_k)
                .await?;
            return Ok(SearchOutcome {
                hits,
                degraded: false,
            });
        }

        match self
            .enhanced(ctx, analyzed, &filter, top_k, now_epoch, cancel)
            .await
        {
            Ok(hits) => Ok(SearchOutcome {
                hits,
                degraded: false,
            }),
            Err(err) if err.code == ErrorCode::Cancelled => Err(err),
            Err(err) if err.code == ErrorCode::MissingTenantFilter => Err(err),
            Err(err) => {
                warn!(code = err.code.as_str(), "enhanced search failed, plain dense fallback");
                let hits = self
                    .plain_dense(ctx, &analyzed.search_text, &filter, top_k)
                    .await?;
                Ok(SearchOutcome {
                    hits,
                    degraded: true,
                })
            }
        }
    }

    /// Dense-only similarity lookup scoped to one object type (context
    /// assembly path).
    pub async fn search_similar(
        &self,
        ctx: &TenantContext,
        text: &str,
        object_type: ObjectType,
        limit: usize,
        _cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>, ServiceError> {
        let filter = Filter::for_tenant(ctx)
            .must(Condition::matches("object_type", object_type.as_str()));
        self.plain_dense(ctx, text, &filter, limit).await
    }

    // -- stages ---------------------------------------------------------------

    async fn enhanced(
        &self,
        ctx: &TenantContext,
        analyzed: &AnalyzedQuery,
        filter: &Filter,
        top_k: usize,
        now_epoch: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>, ServiceError> {
        check_cancel(cancel)?;

        // Candidate sizing decides how deep each leg retrieves.
        let candidates = self.gateway.count(ctx, filter).await? as usize;
        let leg_limit = if candidates <= EXHAUSTIVE_LIMIT {
            EXHAUSTIVE_LIMIT
        } else {
            (top_k.max(10)) * 3
        };
        debug!(candidates, leg_limit, "candidate sizing");

        // Query embedding.
        let dense_query = self.embedder.embed_one(&analyzed.search_text).await?;
        check_cancel(cancel)?;

        let (dense_weight, sparse_weight) =
            if analyzed.intent == QueryIntent::ComplexConditional {
                // Conditions carry most of the signal; keywords outrank
                // semantics inside the filtered set.
                (0.4, 0.6)
            } else {
                (self.tuning.dense_weight, self.tuning.sparse_weight)
            };

        let mut legs: Vec<RankedLeg> = Vec::new();

        let dense_hits = self
            .gateway
            .search(
                ctx,
                &SearchQuery::dense(dense_query, filter.clone(), leg_limit),
            )
            .await?;
        legs.push(RankedLeg {
            hits: dense_hits,
            weight: dense_weight,
        });
        check_cancel(cancel)?;

        // Sparse leg under the same filter.
        let sparse_query = sparse_vector(&analyzed.search_text, tl_core::Language::En);
        if !sparse_query.is_empty() {
            let sparse_hits = self
                .gateway
                .search(
                    ctx,
                    &SearchQuery::sparse(sparse_query, filter.clone(), leg_limit),
                )
                .await?;
            legs.push(RankedLeg {
                hits: sparse_hits,
                weight: sparse_weight,
            });
        }
        check_cancel(cancel)?;

        // HyDE: widen confident complex queries with a hypothetical answer.
        if analyzed.intent == QueryIntent::ComplexConditional
            && analyzed.confidence >= HYDE_MIN_CONFIDENCE
            && let Some(generator) = &self.generator
        {
            let hypothetical = self
                .hyde_expansion(generator, &analyzed.search_text, cancel)
                .await?;
            let hyde_vector = self.embedder.embed_one(&hypothetical).await?;
            let hyde_hits = self
                .gateway
                .search(
                    ctx,
                    &SearchQuery::dense(hyde_vector, filter.clone(), leg_limit),
                )
                .await?;
            legs.push(RankedLeg {
                hits: hyde_hits,
                weight: dense_weight,
            });
        }
        check_cancel(cancel)?;

        // Fuse, rerank, apply the quality gate.
        let fused = fusion::fuse(legs, self.tuning.recency_weight, now_epoch);
        let reranked = self.rerank(&analyzed.search_text, fused, cancel).await?;
        Ok(self.quality_gate(reranked, top_k))
    }

    async fn hyde_expansion(
        &self,
        generator: &Arc<dyn TextGenerator>,
        search_text: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ServiceError> {
        let messages = vec![
            ChatMessage::system(
                "Write a plausible 3-5 sentence resolution note for the support request \
                 below, as if quoting a closed ticket. Plain text, no preamble.",
            ),
            ChatMessage::user(search_text.to_string()),
        ];
        let generation = generator
            .generate(UseCase::Hyde, &messages, GenerateOptions::default(), cancel)
            .await?;
        Ok(generation.text)
    }

    async fn rerank(
        &self,
        query: &str,
        fused: Vec<FusedHit>,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>, ServiceError> {
        check_cancel(cancel)?;
        let (head, tail): (Vec<FusedHit>, Vec<FusedHit>) = {
            let mut fused = fused;
            let tail = fused.split_off(fused.len().min(RERANK_DEPTH));
            (fused, tail)
        };

        let documents: Vec<String> = head
            .iter()
            .map(|f| format!("{} {}", f.point.payload.subject, f.point.payload.summary_text))
            .collect();
        let scores = self.reranker.score(query, &documents).await?;

        // The fused score stays in the final number so a scorer that
        // returns zeros (weak lexical overlap) cannot empty the result set
        // on its own.
        let mut reranked: Vec<(f64, &FusedHit)> = scores
            .iter()
            .zip(head.iter())
            .map(|(score, hit)| (f64::from(*score) + hit.score, hit))
            .collect();
        // Stable sort: equal scores keep their fusion order.
        reranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut out: Vec<SearchHit> = reranked
            .into_iter()
            .map(|(score, fused)| SearchHit {
                id: fused.point.id,
                score,
                payload: fused.point.payload.clone(),
                low_confidence: false,
            })
            .collect();
        out.extend(tail.into_iter().map(|f| SearchHit {
            id: f.point.id,
            score: f.score,
            payload: f.point.payload,
            low_confidence: false,
        }));
        Ok(out)
    }

    fn quality_gate(&self, hits: Vec<SearchHit>, top_k: usize) -> Vec<SearchHit> {
        let threshold = self.tuning.quality_threshold;
        let mut kept: Vec<SearchHit> = hits
            .iter()
            .filter(|h| h.score >= threshold)
            .cloned()
            .collect();

        if kept.is_empty() && self.tuning.prevent_empty {
            if let Some(best) = hits.into_iter().next() {
                kept.push(SearchHit {
                    low_confidence: true,
                    ..best
                });
            }
        }
        kept.truncate(top_k);
        kept
    }

    async fn plain_dense(
        &self,
        ctx: &TenantContext,
        text: &str,
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<SearchHit>, ServiceError> {
        let vector = self.embedder.embed_one(text).await?;
        let hits = self
            .gateway
            .search(ctx, &SearchQuery::dense(vector, filter.clone(), limit))
            .await?;
        Ok(hits
            .into_iter()
            .map(|hit| SearchHit {
                id: hit.id,
                score: f64::from(hit.score),
                payload: hit.payload,
                low_confidence: false,
            })
            .collect())
    }
}

fn check_cancel(cancel: &CancellationToken) -> Result<(), ServiceError> {
    if cancel.is_cancelled() {
        return Err(ServiceError::new(
            ErrorCode::Cancelled,
            "search cancelled by caller",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
