// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured summarization.
//!
//! Applies YAML prompt templates to integrated objects, generates through
//! the routed LLM seam, validates the four-section structure, and
//! regenerates once with a stricter prompt when quality falls short.  A
//! second failure stores the summary flagged rather than blocking the
//! pipeline.

#![deny(unsafe_code)]

/// Prompt-context compression for large-scale runs.
pub mod compress;
/// YAML prompt templates.
pub mod template;
/// Validation and quality scoring.
pub mod validate;

pub use template::{PromptTemplate, TemplateStore};
pub use validate::{MIN_QUALITY, ValidationReport, validate};

use std::sync::Arc;
use tl_config::UseCase;
use tl_core::{IntegratedObject, Summary, SummaryType};
use tl_error::{ErrorCode, ServiceError};
use tl_llm::{CancellationToken, ChatMessage, ChunkStream, GenerateOptions, TextGenerator};
use tracing::{debug, info, warn};

/// Dataset size beyond which large-scale mode engages.
pub const LARGE_SCALE_THRESHOLD: usize = 1_000;
/// Character budget for compressed prompt context.
const COMPRESS_BUDGET: usize = 6_000;
/// Stricter hedging ceiling applied in large-scale mode.
const LARGE_SCALE_MAX_DENSITY: f64 = 0.15;

/// Extra instruction appended for the regeneration attempt.
const STRICT_SUFFIX: &str = "\nState only facts explicitly present in the input. Do not hedge or \
     speculate; omit anything you cannot support from the text.";

/// Template-driven summarizer over a [`TextGenerator`] seam.
pub struct Summarizer {
    generator: Arc<dyn TextGenerator>,
    templates: TemplateStore,
}

impl Summarizer {
    /// Build a summarizer with an explicit template store.
    pub fn new(generator: Arc<dyn TextGenerator>, templates: TemplateStore) -> Self {
        Self {
            generator,
            templates,
        }
    }

    fn template_for(
        &self,
        summary_type: SummaryType,
        object: &IntegratedObject,
    ) -> Result<&PromptTemplate, ServiceError> {
        let tag = match summary_type {
            SummaryType::Realtime => "realtime",
            SummaryType::Batch => "summary",
        };
        self.templates.get(tag, object.object_type).ok_or_else(|| {
            ServiceError::new(
                ErrorCode::ConfigInvalid,
                "no template for object type / summary type",
            )
            .with_context("object_type", object.object_type.as_str())
            .with_context("summary_type", tag)
        })
    }

    fn messages(
        template: &PromptTemplate,
        object: &IntegratedObject,
        large_scale: bool,
        strict: bool,
    ) -> Vec<ChatMessage> {
        let body = if large_scale {
            compress::compress(&object.subject, &object.body_text, COMPRESS_BUDGET)
        } else {
            object.body_text.clone()
        };
        let mut system = template.system_for(object.language).to_string();
        if strict {
            system.push_str(STRICT_SUFFIX);
        }
        vec![
            ChatMessage::system(system),
            ChatMessage::user(template.render_user(&object.subject, &body)),
        ]
    }

    /// Summarize `object`, validating and retrying once on low quality.
    pub async fn summarize(
        &self,
        object: &IntegratedObject,
        summary_type: SummaryType,
        cancel: &CancellationToken,
    ) -> Result<Summary, ServiceError> {
        self.summarize_with_mode(object, summary_type, false, cancel)
            .await
    }

    /// [`Summarizer::summarize`] with large-scale mode explicit.
    ///
    /// Large-scale mode compresses the prompt context and applies the
    /// stricter hedging ceiling.
    pub async fn summarize_with_mode(
        &self,
        object: &IntegratedObject,
        summary_type: SummaryType,
        large_scale: bool,
        cancel: &CancellationToken,
    ) -> Result<Summary, ServiceError> {
        let template = self.template_for(summary_type, object)?;
        let use_case = match summary_type {
            SummaryType::Realtime => UseCase::Realtime,
            SummaryType::Batch => UseCase::Summary,
        };
        let max_density = if large_scale {
            LARGE_SCALE_MAX_DENSITY
        } else {
            validate::MAX_SPECULATION_DENSITY
        };

        let first = self
            .attempt(template, object, use_case, large_scale, false, cancel)
            .await?;
        let first_report = validate(&first.0, object.language);
        if first_report.quality_score >= MIN_QUALITY
            && first_report.speculation_density <= max_density
        {
            return Ok(self.record(object, summary_type, first, &first_report, false));
        }

        debug!(
            original_id = %object.original_id,
            score = first_report.quality_score,
            density = first_report.speculation_density,
            "summary below threshold, regenerating once"
        );
        let second = self
            .attempt(template, object, use_case, large_scale, true, cancel)
            .await?;
        let second_report = validate(&second.0, object.language);
        if second_report.quality_score >= MIN_QUALITY
            && second_report.speculation_density <= max_density
        {
            return Ok(self.record(object, summary_type, second, &second_report, false));
        }

        // Keep the better of the two, flagged; downstream steps proceed.
        warn!(
            original_id = %object.original_id,
            score = second_report.quality_score,
            "summary quality still low after regeneration, storing flagged"
        );
        let (generation, report) = if second_report.quality_score >= first_report.quality_score {
            (second, second_report)
        } else {
            (first, first_report)
        };
        Ok(self.record(object, summary_type, generation, &report, true))
    }

    /// Stream a realtime summary.  Validation is skipped — chunks go to
    /// the caller as they arrive.
    pub async fn stream_realtime(
        &self,
        object: &IntegratedObject,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, ServiceError> {
        let template = self.template_for(SummaryType::Realtime, object)?;
        let messages = Self::messages(template, object, false, false);
        let options = GenerateOptions {
            max_tokens: Some(template.params.max_tokens),
            temperature: Some(template.params.temperature),
            tenant_cache_key: Some(object.tenant_id.as_str().to_string()),
            bypass_cache: true,
        };
        self.generator
            .stream(UseCase::Realtime, &messages, options, cancel)
            .await
    }

    async fn attempt(
        &self,
        template: &PromptTemplate,
        object: &IntegratedObject,
        use_case: UseCase,
        large_scale: bool,
        strict: bool,
        cancel: &CancellationToken,
    ) -> Result<(String, tl_llm::GenerationMeta), ServiceError> {
        let messages = Self::messages(template, object, large_scale, strict);
        let options = GenerateOptions {
            max_tokens: Some(template.params.max_tokens),
            temperature: Some(if strict {
                0.1
            } else {
                template.params.temperature
            }),
            tenant_cache_key: Some(object.tenant_id.as_str().to_string()),
            // The strict retry must not read the cached weak answer.
            bypass_cache: strict,
        };
        let generation = self
            .generator
            .generate(use_case, &messages, options, cancel)
            .await?;
        Ok((generation.text, generation.meta))
    }

    fn record(
        &self,
        object: &IntegratedObject,
        summary_type: SummaryType,
        (text, meta): (String, tl_llm::GenerationMeta),
        report: &ValidationReport,
        flagged: bool,
    ) -> Summary {
        info!(
            original_id = %object.original_id,
            model = %meta.model,
            score = report.quality_score,
            flagged,
            "summary stored"
        );
        Summary {
            tenant_id: object.tenant_id.clone(),
            platform: object.platform.clone(),
            original_id: object.original_id.clone(),
            summary_type,
            text,
            model: meta.model,
            input_tokens: meta.input_tokens,
            output_tokens: meta.output_tokens,
            duration_ms: meta.duration_ms,
            language: object.language,
            quality_score: report.quality_score,
            quality_flag_low: flagged,
        }
    }
}
