// SPDX-License-Identifier: MIT OR Apache-2.0
//! Query analysis.
//!
//! Two-pass condition extraction: a bilingual pattern pass, then an LLM
//! pass (use-case `query_analysis`) only when the pattern pass is not
//! confident or the query carries conjunctions the patterns did not
//! explain.  An LLM JSON parse failure falls back to the pattern result —
//! the analyzer never fails because a model rambled.

#![deny(unsafe_code)]

/// Bilingual condition lexicons.
pub mod lexicon;

pub use lexicon::{PatternExtraction, extract};

use serde::Deserialize;
use std::sync::Arc;
use tl_config::UseCase;
use tl_core::query::{AnalyzedQuery, QueryConditions, QueryIntent, SearchStrategy};
use tl_error::{ErrorCode, ServiceError};
use tl_llm::{CancellationToken, ChatMessage, GenerateOptions, TextGenerator};
use tracing::{debug, warn};

/// Pattern confidence below which the LLM pass runs.
pub const LLM_PASS_THRESHOLD: f64 = 0.6;
/// Conditions at or above which a query is complex.
const COMPLEX_CONDITION_COUNT: usize = 3;
/// Word count at or below which a condition-free query is a keyword
/// lookup.
const KEYWORD_MAX_WORDS: usize = 3;

/// Two-pass query analyzer.
pub struct QueryAnalyzer {
    generator: Option<Arc<dyn TextGenerator>>,
}

/// JSON shape the LLM pass must return (mirrors the pattern output).
#[derive(Debug, Deserialize)]
struct LlmAnalysis {
    #[serde(default)]
    conditions: QueryConditions,
    #[serde(default)]
    search_text: Option<String>,
}

impl QueryAnalyzer {
    /// Analyzer with an LLM pass available.
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator: Some(generator),
        }
    }

    /// Pattern-only analyzer (LLM pass disabled).
    pub fn pattern_only() -> Self {
        Self { generator: None }
    }

    /// Analyze a natural-language query.
    pub async fn analyze(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<AnalyzedQuery, ServiceError> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(ServiceError::new(ErrorCode::InvalidQuery, "empty query"));
        }

        let mut extraction = extract(trimmed);

        let needs_llm = extraction.confidence < LLM_PASS_THRESHOLD
            || (extraction.has_conjunction
                && extraction.conditions.count() < COMPLEX_CONDITION_COUNT);
        if needs_llm && let Some(generator) = &self.generator {
            match self.llm_pass(generator, trimmed, cancel).await {
                Ok(Some(analysis)) => {
                    debug!("llm pass refined the query analysis");
                    if analysis.conditions.count() > extraction.conditions.count() {
                        extraction.conditions = analysis.conditions;
                    }
                    if let Some(text) = analysis.search_text
                        && !text.trim().is_empty()
                    {
                        extraction.search_text = text.trim().to_string();
                    }
                    extraction.confidence = extraction.confidence.max(0.8);
                }
                Ok(None) => {
                    debug!("llm pass returned unusable json, keeping pattern result");
                }
                Err(err) if err.code == ErrorCode::Cancelled => return Err(err),
                Err(err) => {
                    // Degraded-but-working beats failing the query.
                    warn!(code = err.code.as_str(), "llm pass failed, pattern-only analysis");
                }
            }
        }

        if extraction.conditions.is_empty() && extraction.search_text.is_empty() {
            return Err(ServiceError::new(
                ErrorCode::InvalidQuery,
                "no extractable conditions and no searchable text",
            ));
        }

        let intent = classify(&extraction, trimmed);
        let strategy = strategy_for(intent);

        Ok(AnalyzedQuery {
            intent,
            conditions: extraction.conditions,
            search_text: extraction.search_text,
            strategy,
            confidence: extraction.confidence,
        })
    }

    async fn llm_pass(
        &self,
        generator: &Arc<dyn TextGenerator>,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<LlmAnalysis>, ServiceError> {
        let messages = vec![
            ChatMessage::system(
                "Extract search conditions from a support-ticket query. Reply with ONLY a \
                 JSON object shaped like {\"conditions\": {\"time\": {\"relative_days\": 30}, \
                 \"priority\": {\"min\": 3, \"max\": 4}, \"status\": [\"open\"], \
                 \"category\": [\"billing\"], \"tags\": [], \"person\": {\"role\": \
                 \"requester\", \"identifier\": \"kim\"}, \"sentiment\": null}, \
                 \"search_text\": \"the query minus condition words\"}. Omit keys you \
                 cannot support from the query.",
            ),
            ChatMessage::user(query.to_string()),
        ];
        let generation = generator
            .generate(
                UseCase::QueryAnalysis,
                &messages,
                GenerateOptions::default(),
                cancel,
            )
            .await?;
        Ok(parse_llm_json(&generation.text))
    }
}

/// Parse the LLM reply, tolerating code fences and prose around the JSON.
fn parse_llm_json(text: &str) -> Option<LlmAnalysis> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Intent rules, applied in declared order.
fn classify(extraction: &PatternExtraction, original: &str) -> QueryIntent {
    if extraction.similarity_phrase {
        return QueryIntent::SimilaritySearch;
    }

    let only_temporal = extraction.conditions.count() == 1 && extraction.conditions.time.is_some();
    if extraction.functional_phrase || only_temporal {
        return QueryIntent::Functional;
    }

    if extraction.conditions.count() >= COMPLEX_CONDITION_COUNT
        || (extraction.has_conjunction && !extraction.conditions.is_empty())
    {
        return QueryIntent::ComplexConditional;
    }

    if extraction.conditions.is_empty()
        && original.split_whitespace().count() <= KEYWORD_MAX_WORDS
    {
        return QueryIntent::SimpleKeyword;
    }

    QueryIntent::SimpleSemantic
}

/// Strategy per intent.
///
/// `Hybrid` fuses with the sparse-heavy weights, `SemanticFirst` with the
/// dense-heavy weights; the exact numbers live in configuration.
fn strategy_for(intent: QueryIntent) -> SearchStrategy {
    match intent {
        QueryIntent::ComplexConditional => SearchStrategy::MetadataFirst,
        QueryIntent::SimpleKeyword => SearchStrategy::Hybrid,
        _ => SearchStrategy::SemanticFirst,
    }
}
