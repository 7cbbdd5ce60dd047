// SPDX-License-Identifier: MIT OR Apache-2.0
//! Analyzed queries: intents, conditions, and search strategies.
//!
//! The shapes here are shared between the pattern-based analyzer, the LLM
//! analysis pass (which returns the same structure as JSON), and the
//! conditional search engine that turns conditions into vector-store
//! filters.

use crate::{Priority, TicketStatus};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Intent & strategy
// ---------------------------------------------------------------------------

/// What kind of question the user is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// Short lexical lookup ("refund policy").
    SimpleKeyword,
    /// Free-form semantic question.
    SimpleSemantic,
    /// Multiple structured conditions combined.
    ComplexConditional,
    /// "Tickets similar to this one."
    SimilaritySearch,
    /// Functional / personal listing ("my recent tickets").
    Functional,
}

/// How retrieval should be weighted for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Filter narrowly first, rank the survivors semantically.
    MetadataFirst,
    /// Dense + sparse fusion.
    Hybrid,
    /// Dense-dominant fusion.
    SemanticFirst,
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// A time window, either relative to "now" or absolute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeCondition {
    /// "Within the last N days."
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_days: Option<u32>,
    /// Absolute lower bound, epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    /// Absolute upper bound, epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
}

/// An inclusive priority range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityCondition {
    /// Lower bound.
    pub min: Priority,
    /// Upper bound.
    pub max: Priority,
}

/// Who a person condition refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonRole {
    /// The customer who filed the ticket.
    Requester,
    /// The agent the ticket is assigned to.
    Assignee,
}

/// A person condition ("submitted by X", "assigned to Y").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonCondition {
    /// Requester or assignee.
    pub role: PersonRole,
    /// Platform identifier or free-form name/email.
    pub identifier: String,
}

/// A sentiment range in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentCondition {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

/// Structured conditions extracted from a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryConditions {
    /// Time window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeCondition>,
    /// Priority range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<PriorityCondition>,
    /// Acceptable statuses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<TicketStatus>,
    /// Category facets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<String>,
    /// Tag facets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Person constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person: Option<PersonCondition>,
    /// Sentiment range (LLM pass only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<SentimentCondition>,
}

impl QueryConditions {
    /// Number of distinct condition kinds present.
    pub fn count(&self) -> usize {
        let mut n = 0;
        if self.time.is_some() {
            n += 1;
        }
        if self.priority.is_some() {
            n += 1;
        }
        if !self.status.is_empty() {
            n += 1;
        }
        if !self.category.is_empty() {
            n += 1;
        }
        if !self.tags.is_empty() {
            n += 1;
        }
        if self.person.is_some() {
            n += 1;
        }
        if self.sentiment.is_some() {
            n += 1;
        }
        n
    }

    /// True when no condition kind is present.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

// ---------------------------------------------------------------------------
// Analyzed query
// ---------------------------------------------------------------------------

/// The analyzer's verdict on a natural-language query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedQuery {
    /// Classified intent.
    pub intent: QueryIntent,
    /// Extracted structured conditions.
    pub conditions: QueryConditions,
    /// The query with extracted condition phrases removed.
    pub search_text: String,
    /// Retrieval strategy chosen for the intent.
    pub strategy: SearchStrategy,
    /// Analyzer confidence in `[0, 1]`.
    pub confidence: f64,
}
