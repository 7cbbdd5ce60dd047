// SPDX-License-Identifier: MIT OR Apache-2.0
//! Summary validation and quality scoring.
//!
//! A summary passes when all four headings appear exactly once in order,
//! its length is within bounds, and its hedging density is acceptable.
//! The combined quality score weighs structure 0.4, speculation 0.3, and
//! length 0.3.

use tl_core::{Language, SECTION_HEADINGS};

/// Minimum acceptable summary length, characters.
pub const MIN_LENGTH: usize = 200;
/// Maximum acceptable summary length, characters.
pub const MAX_LENGTH: usize = 2_000;
/// Hedging density above which a regeneration is required.
pub const MAX_SPECULATION_DENSITY: f64 = 0.3;
/// Quality score below which a regeneration is required.
pub const MIN_QUALITY: f64 = 0.7;

/// English hedging phrases.
const HEDGES_EN: &[&str] = &[
    "might", "maybe", "possibly", "perhaps", "probably", "it seems", "seems to", "appears to",
    "likely", "presumably", "i think", "i guess", "could be",
];

/// Korean hedging phrases.
const HEDGES_KO: &[&str] = &[
    "아마", "아마도", "일 수도", "것 같습니다", "듯합니다", "추정됩니다", "보입니다", "겠지만",
];

/// Outcome of validating one summary.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    /// All four headings present exactly once, in order.
    pub structure_ok: bool,
    /// Length within `[MIN_LENGTH, MAX_LENGTH]`.
    pub length_ok: bool,
    /// Hedging phrases per sentence.
    pub speculation_density: f64,
    /// Weighted quality score in `[0, 1]`.
    pub quality_score: f64,
}

impl ValidationReport {
    /// True when the summary can be stored without a flag.
    pub fn acceptable(&self) -> bool {
        self.quality_score >= MIN_QUALITY
            && self.speculation_density <= MAX_SPECULATION_DENSITY
    }
}

/// Validate `text` against the four-section contract.
pub fn validate(text: &str, language: Language) -> ValidationReport {
    let structure_ok = sections_in_order(text);
    let length = text.chars().count();
    let length_ok = (MIN_LENGTH..=MAX_LENGTH).contains(&length);
    let speculation_density = speculation_density(text, language);

    let structure_score = if structure_ok { 1.0 } else { 0.0 };
    let speculation_score = (1.0 - speculation_density / MAX_SPECULATION_DENSITY).clamp(0.0, 1.0);
    let length_score = if length_ok {
        1.0
    } else if length < MIN_LENGTH {
        length as f64 / MIN_LENGTH as f64
    } else {
        (MAX_LENGTH as f64 / length as f64).clamp(0.0, 1.0)
    };

    ValidationReport {
        structure_ok,
        length_ok,
        speculation_density,
        quality_score: structure_score * 0.4 + speculation_score * 0.3 + length_score * 0.3,
    }
}

/// The section headings found in `text`, in document order.
pub fn found_sections(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            let heading = trimmed.strip_prefix("## ").map(str::trim)?;
            SECTION_HEADINGS
                .iter()
                .find(|h| heading.eq_ignore_ascii_case(h))
                .map(|h| h.to_string())
        })
        .collect()
}

/// True when every canonical heading appears exactly once, in order.
fn sections_in_order(text: &str) -> bool {
    let found = found_sections(text);
    found.len() == SECTION_HEADINGS.len()
        && found
            .iter()
            .zip(SECTION_HEADINGS.iter())
            .all(|(a, b)| a == b)
}

/// Hedging phrases per sentence.
fn speculation_density(text: &str, language: Language) -> f64 {
    let lower = text.to_lowercase();
    let hedges: &[&str] = match language {
        Language::Ko => HEDGES_KO,
        _ => HEDGES_EN,
    };
    let hits: usize = hedges.iter().map(|h| lower.matches(h).count()).sum();

    let sentences = text
        .split(['.', '!', '?', '\n'])
        .filter(|s| !s.trim().is_empty())
        .count()
        .max(1);
    hits as f64 / sentences as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn well_formed(extra: &str) -> String {
        format!(
            "## Problem\nThe customer at wedosoft.com was double charged on their Visa card \
             on 2025-06-01 for order 8841.\n\
             ## Root Cause\nA retry in the billing worker resubmitted the charge after a \
             gateway timeout was wrongly treated as a failure.\n\
             ## Resolution\nThe duplicate charge was refunded and the retry logic now checks \
             the gateway transaction id first.{extra}\n\
             ## Insights\nGateway timeouts need idempotency keys on every charge request."
        )
    }

    #[test]
    fn accepts_well_formed_summary() {
        let report = validate(&well_formed(""), Language::En);
        assert!(report.structure_ok);
        assert!(report.length_ok);
        assert!(report.quality_score >= MIN_QUALITY);
        assert!(report.acceptable());
    }

    #[test]
    fn missing_section_fails_structure() {
        let text = well_formed("").replace("## Insights", "## Notes");
        let report = validate(&text, Language::En);
        assert!(!report.structure_ok);
        assert!(report.quality_score < MIN_QUALITY);
    }

    #[test]
    fn out_of_order_sections_fail() {
        let text = "## Root Cause\nx\n## Problem\ny\n## Resolution\nz\n## Insights\nw";
        assert!(!validate(text, Language::En).structure_ok);
    }

    #[test]
    fn duplicated_heading_fails() {
        let text = well_formed("") + "\n## Problem\nagain";
        assert!(!validate(&text, Language::En).structure_ok);
    }

    #[test]
    fn short_summary_fails_length() {
        let text = "## Problem\nx\n## Root Cause\ny\n## Resolution\nz\n## Insights\nw";
        let report = validate(text, Language::En);
        assert!(report.structure_ok);
        assert!(!report.length_ok);
    }

    #[test]
    fn over_long_summary_fails_length() {
        let text = well_formed(&" padding".repeat(400));
        let report = validate(&text, Language::En);
        assert!(!report.length_ok);
    }

    #[test]
    fn hedging_raises_density() {
        let hedged = well_formed(
            " It might be the gateway. Maybe the worker. Possibly both. Perhaps neither. \
             It seems unclear. Probably fine.",
        );
        let report = validate(&hedged, Language::En);
        assert!(report.speculation_density > 0.3);
        assert!(!report.acceptable());
    }

    #[test]
    fn korean_hedges_are_counted() {
        let text = "## Problem\n결제 오류.\n## Root Cause\n아마도 게이트웨이 문제인 것 같습니다.\n\
                    ## Resolution\n환불 완료.\n## Insights\n재시도 로직 점검 필요."
            .to_string()
            + &" 추가 상세 내용입니다.".repeat(12);
        let report = validate(&text, Language::Ko);
        assert!(report.speculation_density > 0.0);
    }

    #[test]
    fn found_sections_reports_document_order() {
        assert_eq!(
            found_sections(&well_formed("")),
            vec!["Problem", "Root Cause", "Resolution", "Insights"]
        );
    }
}
