// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bilingual condition lexicons.
//!
//! Regex patterns over Korean and English phrasing map query fragments to
//! structured conditions.  Every matched span is removed from the query so
//! the residue becomes the semantic `search_text`.

use regex::Regex;
use std::sync::LazyLock;
use tl_core::query::{
    PersonCondition, PersonRole, PriorityCondition, QueryConditions, TimeCondition,
};
use tl_core::{Priority, TicketStatus};

macro_rules! rx {
    ($name:ident, $pattern:expr) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($pattern).expect("lexicon pattern is valid"));
    };
}

// -- time -------------------------------------------------------------------

rx!(RX_MONTH_AGO, r"(?i)last month|a month ago|한\s?달\s?전(?:에)?|지난\s?달(?:에)?");
rx!(RX_WEEK_AGO, r"(?i)last week|지난\s?주(?:에)?");
rx!(RX_YESTERDAY, r"(?i)yesterday|어제");
rx!(RX_DAYS_AGO_EN, r"(?i)(?:last|past)\s+(\d+)\s+days?|(\d+)\s+days?\s+ago");
rx!(RX_DAYS_AGO_KO, r"(\d+)\s*일\s*전(?:에)?");

// -- priority ---------------------------------------------------------------

rx!(RX_URGENT, r"(?i)\burgent\b|긴급(?:한)?");
rx!(RX_HIGH_PRIORITY, r"(?i)high[ -]priority|high priority|높은\s?우선\s?순위(?:의)?|우선\s?순위\s?높은");
rx!(RX_LOW_PRIORITY, r"(?i)low[ -]priority|low priority|낮은\s?우선\s?순위(?:의)?");

// -- status -----------------------------------------------------------------

rx!(RX_STATUS_OPEN, r"(?i)\bopen\b|열린|미해결");
rx!(RX_STATUS_PENDING, r"(?i)\bpending\b|대기\s?중(?:인)?");
rx!(RX_STATUS_RESOLVED, r"(?i)\bresolved\b|해결된|해결\s?완료(?:된)?");
rx!(RX_STATUS_CLOSED, r"(?i)\bclosed\b|종료된|닫힌");

// -- person -----------------------------------------------------------------

rx!(
    RX_REQUESTER_EN,
    r"(?i)(?:submitted|created|filed|opened|requested)\s+by\s+(\S+)"
);
rx!(RX_ASSIGNEE_EN, r"(?i)assigned\s+to\s+(\S+)");
rx!(RX_REQUESTER_KO, r"(\S+?)(?:님)?이\s*(?:제출한|올린|등록한)");
rx!(RX_ASSIGNEE_KO, r"(\S+?)(?:님)?(?:이|가)\s*담당(?:한|하는)");

// -- tags -------------------------------------------------------------------

rx!(RX_TAG, r"#([\p{L}\p{N}_-]+)");

// -- similarity / functional / conjunction ----------------------------------

rx!(
    RX_SIMILARITY,
    r"(?i)similar\s+tickets?|tickets?\s+similar\s+to|유사(?:한)?\s*티켓|비슷한\s*티켓"
);
rx!(
    RX_FUNCTIONAL,
    r"(?i)my\s+tickets?|내\s*티켓|나의\s*티켓|최근\s*티켓"
);
rx!(RX_CONJUNCTION, r"(?i)\band\b|그리고|이면서|\bwhile\b");

/// Category keyword map; first match wins per category.
const CATEGORIES: &[(&str, &[&str])] = &[
    ("billing", &["billing", "payment", "invoice", "결제", "청구", "빌링", "환불", "refund"]),
    ("shipping", &["shipping", "delivery", "배송", "출고"]),
    ("login", &["login", "sign-in", "sign in", "로그인", "인증"]),
    ("technical", &["error", "bug", "crash", "오류", "버그", "장애"]),
];

/// What the pattern pass extracted.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternExtraction {
    /// Structured conditions found.
    pub conditions: QueryConditions,
    /// The query with matched condition phrases removed.
    pub search_text: String,
    /// Confidence in `[0, 1]`, driven by how much of the query the
    /// patterns explained.
    pub confidence: f64,
    /// The query contained a similarity phrase.
    pub similarity_phrase: bool,
    /// The query contained a personal/functional phrase.
    pub functional_phrase: bool,
    /// The query contained an explicit conjunction.
    pub has_conjunction: bool,
}

fn remove_span(text: &mut String, regex: &Regex) -> bool {
    let mut matched = false;
    while let Some(found) = regex.find(text) {
        let range = found.range();
        text.replace_range(range, " ");
        matched = true;
    }
    matched
}

fn capture_first(text: &mut String, regex: &Regex) -> Option<String> {
    let captures = regex.captures(text)?;
    let value = captures
        .iter()
        .skip(1)
        .flatten()
        .next()
        .map(|m| m.as_str().to_string())?;
    let full = captures.get(0).map(|m| m.range())?;
    text.replace_range(full, " ");
    Some(value)
}

/// Run the pattern pass over `query`.
pub fn extract(query: &str) -> PatternExtraction {
    let mut text = query.to_string();
    let mut conditions = QueryConditions::default();

    let similarity_phrase = remove_span(&mut text, &RX_SIMILARITY);
    let functional_phrase = RX_FUNCTIONAL.is_match(&text);
    let has_conjunction = RX_CONJUNCTION.is_match(&text);

    // Time, most specific first.
    if let Some(days) = capture_first(&mut text, &RX_DAYS_AGO_KO)
        .or_else(|| capture_first(&mut text, &RX_DAYS_AGO_EN))
        .and_then(|d| d.parse::<u32>().ok())
    {
        conditions.time = Some(TimeCondition {
            relative_days: Some(days),
            ..Default::default()
        });
    } else if remove_span(&mut text, &RX_MONTH_AGO) {
        conditions.time = Some(TimeCondition {
            relative_days: Some(30),
            ..Default::default()
        });
    } else if remove_span(&mut text, &RX_WEEK_AGO) {
        conditions.time = Some(TimeCondition {
            relative_days: Some(7),
            ..Default::default()
        });
    } else if remove_span(&mut text, &RX_YESTERDAY) {
        conditions.time = Some(TimeCondition {
            relative_days: Some(1),
            ..Default::default()
        });
    }

    // Priority.
    if remove_span(&mut text, &RX_URGENT) {
        conditions.priority = Some(PriorityCondition {
            min: Priority::new(4),
            max: Priority::new(4),
        });
    } else if remove_span(&mut text, &RX_HIGH_PRIORITY) {
        conditions.priority = Some(PriorityCondition {
            min: Priority::new(3),
            max: Priority::new(4),
        });
    } else if remove_span(&mut text, &RX_LOW_PRIORITY) {
        conditions.priority = Some(PriorityCondition {
            min: Priority::new(1),
            max: Priority::new(2),
        });
    }

    // Status.
    for (regex, status) in [
        (&RX_STATUS_RESOLVED, TicketStatus::Resolved),
        (&RX_STATUS_PENDING, TicketStatus::Pending),
        (&RX_STATUS_CLOSED, TicketStatus::Closed),
        (&RX_STATUS_OPEN, TicketStatus::Open),
    ] {
        if remove_span(&mut text, regex) {
            conditions.status.push(status);
        }
    }

    // Person.
    if let Some(identifier) = capture_first(&mut text, &RX_REQUESTER_EN)
        .or_else(|| capture_first(&mut text, &RX_REQUESTER_KO))
    {
        conditions.person = Some(PersonCondition {
            role: PersonRole::Requester,
            identifier,
        });
    } else if let Some(identifier) = capture_first(&mut text, &RX_ASSIGNEE_EN)
        .or_else(|| capture_first(&mut text, &RX_ASSIGNEE_KO))
    {
        conditions.person = Some(PersonCondition {
            role: PersonRole::Assignee,
            identifier,
        });
    }

    // Tags.
    while let Some(tag) = capture_first(&mut text, &RX_TAG) {
        conditions.tags.push(tag);
    }

    // Category keywords stay in the search text only when no category
    // matched; a matched keyword is consumed like any other condition.
    for (category, keywords) in CATEGORIES {
        let lower = text.to_lowercase();
        if keywords.iter().any(|k| lower.contains(k)) {
            conditions.category.push((*category).to_string());
            for keyword in *keywords {
                let pattern = Regex::new(&format!("(?i){}", regex::escape(keyword)))
                    .expect("escaped keyword is a valid pattern");
                remove_span(&mut text, &pattern);
            }
        }
    }

    let search_text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    // Confidence grows with each explained condition.
    let count = conditions.count();
    let confidence = if count == 0 {
        0.3
    } else {
        (0.4 + 0.15 * count as f64).min(0.9)
    };

    PatternExtraction {
        conditions,
        search_text,
        confidence,
        similarity_phrase,
        functional_phrase,
        has_conjunction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn korean_complex_query_extracts_three_conditions() {
        let out = extract("한달 전에 제출된 높은 우선순위 결제 티켓");
        let time = out.conditions.time.as_ref().unwrap();
        assert_eq!(time.relative_days, Some(30));
        let priority = out.conditions.priority.as_ref().unwrap();
        assert_eq!(priority.min, Priority::new(3));
        assert_eq!(priority.max, Priority::new(4));
        assert_eq!(out.conditions.category, vec!["billing"]);
        assert_eq!(out.conditions.count(), 3);
        assert!(!out.search_text.contains("한달"));
        assert!(!out.search_text.contains("결제"));
        assert!(out.search_text.contains("티켓"));
    }

    #[test]
    fn english_equivalents_match() {
        let out = extract("high priority billing tickets from last month");
        assert_eq!(
            out.conditions.time.as_ref().unwrap().relative_days,
            Some(30)
        );
        assert_eq!(
            out.conditions.priority.as_ref().unwrap().min,
            Priority::new(3)
        );
        assert_eq!(out.conditions.category, vec!["billing"]);
    }

    #[test]
    fn numeric_relative_days() {
        assert_eq!(
            extract("tickets from the last 14 days")
                .conditions
                .time
                .unwrap()
                .relative_days,
            Some(14)
        );
        assert_eq!(
            extract("3일 전에 들어온 문의").conditions.time.unwrap().relative_days,
            Some(3)
        );
    }

    #[test]
    fn urgent_maps_to_priority_four() {
        let out = extract("긴급 문의");
        let p = out.conditions.priority.unwrap();
        assert_eq!(p.min, Priority::new(4));
        assert_eq!(p.max, Priority::new(4));
    }

    #[test]
    fn status_extraction() {
        let out = extract("resolved shipping tickets");
        assert_eq!(out.conditions.status, vec![TicketStatus::Resolved]);
        assert_eq!(out.conditions.category, vec!["shipping"]);
    }

    #[test]
    fn requester_extraction_en() {
        let out = extract("tickets submitted by kim@acme.com");
        let person = out.conditions.person.unwrap();
        assert_eq!(person.role, PersonRole::Requester);
        assert_eq!(person.identifier, "kim@acme.com");
    }

    #[test]
    fn requester_extraction_ko() {
        let out = extract("김민준님이 제출한 티켓");
        let person = out.conditions.person.unwrap();
        assert_eq!(person.role, PersonRole::Requester);
        assert_eq!(person.identifier, "김민준");
    }

    #[test]
    fn assignee_extraction() {
        let out = extract("tickets assigned to alex");
        let person = out.conditions.person.unwrap();
        assert_eq!(person.role, PersonRole::Assignee);
        assert_eq!(person.identifier, "alex");
    }

    #[test]
    fn hash_tags_collected() {
        let out = extract("tickets about onboarding #vip #beta");
        assert_eq!(out.conditions.tags, vec!["vip", "beta"]);
        assert!(!out.search_text.contains('#'));
    }

    #[test]
    fn similarity_phrase_detected() {
        assert!(extract("similar tickets to this one").similarity_phrase);
        assert!(extract("유사한 티켓 찾아줘").similarity_phrase);
        assert!(!extract("billing tickets").similarity_phrase);
    }

    #[test]
    fn functional_phrase_detected() {
        assert!(extract("my tickets from this week").functional_phrase);
        assert!(extract("최근 티켓 보여줘").functional_phrase);
    }

    #[test]
    fn conjunction_detected() {
        assert!(extract("urgent and unresolved").has_conjunction);
        assert!(extract("긴급 그리고 미해결").has_conjunction);
        assert!(!extract("urgent billing").has_conjunction);
    }

    #[test]
    fn no_conditions_means_low_confidence() {
        let out = extract("how do refunds work for enterprise plans");
        // "refund" maps to billing, so pick a cleaner example.
        let clean = extract("how does the product handle exports");
        assert!(clean.conditions.is_empty());
        assert!(clean.confidence < 0.6);
        assert!(out.confidence >= clean.confidence);
    }

    #[test]
    fn search_text_collapses_whitespace() {
        let out = extract("urgent    billing    tickets");
        assert!(!out.search_text.contains("  "));
    }
}
