// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reciprocal-rank fusion with a recency bonus.
//!
//! Each retrieval leg contributes `weight / (K + rank)` per document;
//! a small recency term favours newer tickets among otherwise equal
//! matches.

use std::collections::HashMap;
use tl_vector::ScoredPoint;
use uuid::Uuid;

/// Standard RRF rank constant.
const RRF_K: f64 = 60.0;
/// Recency half-life in days: a month-old ticket scores half the bonus.
const RECENCY_HALF_LIFE_DAYS: f64 = 30.0;

/// One retrieval leg: its hits (best first) and its fusion weight.
pub struct RankedLeg {
    /// Hits in rank order.
    pub hits: Vec<ScoredPoint>,
    /// Fusion weight.
    pub weight: f64,
}

/// A fused document with its combined score.
#[derive(Debug, Clone)]
pub struct FusedHit {
    /// The underlying point (payload from the first leg that saw it).
    pub point: ScoredPoint,
    /// Combined RRF + recency score.
    pub score: f64,
}

/// Fuse multiple ranked legs.
///
/// `recency_weight` scales the freshness bonus computed from
/// `payload.created_at` against `now_epoch`.  Output is sorted by fused
/// score, ties broken by `original_id` so ordering is deterministic.
pub fn fuse(legs: Vec<RankedLeg>, recency_weight: f64, now_epoch: i64) -> Vec<FusedHit> {
    let mut scores: HashMap<Uuid, FusedHit> = HashMap::new();

    for leg in legs {
        for (rank, hit) in leg.hits.into_iter().enumerate() {
            let contribution = leg.weight / (RRF_K + rank as f64 + 1.0);
            match scores.get_mut(&hit.id) {
                Some(existing) => existing.score += contribution,
                None => {
                    let recency = recency_bonus(hit.payload.created_at, now_epoch);
                    scores.insert(
                        hit.id,
                        FusedHit {
                            point: hit,
                            score: contribution + recency_weight * recency,
                        },
                    );
                }
            }
        }
    }

    let mut fused: Vec<FusedHit> = scores.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.point.payload.original_id.cmp(&b.point.payload.original_id))
    });
    fused
}

/// Exponential-decay freshness in `[0, 1]`.
fn recency_bonus(created_at: i64, now_epoch: i64) -> f64 {
    let age_days = ((now_epoch - created_at).max(0) as f64) / 86_400.0;
    0.5f64.powf(age_days / RECENCY_HALF_LIFE_DAYS)
}
