// SPDX-License-Identifier: MIT OR Apache-2.0
//! Prompt-context compression for large-scale runs.
//!
//! When a dataset crosses the large-scale threshold, ticket bodies are
//! compressed before prompting: sentences are scored by keyword overlap
//! with the subject and the presence of resolution verbs, penalised by
//! length, and selected greedily into a character budget while keeping
//! their original order.

use std::collections::HashSet;

/// Verbs that mark a sentence as resolution-bearing.
const RESOLUTION_VERBS_EN: &[&str] = &[
    "fixed", "resolved", "refunded", "restarted", "replaced", "updated", "patched", "rolled",
    "escalated", "closed",
];

const RESOLUTION_VERBS_KO: &[&str] = &["해결", "환불", "수정", "완료", "조치", "교체", "재시작"];

fn subject_keywords(subject: &str) -> HashSet<String> {
    subject
        .split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.chars().count() >= 2)
        .collect()
}

fn sentence_score(sentence: &str, keywords: &HashSet<String>) -> f64 {
    let lower = sentence.to_lowercase();
    let tokens: Vec<String> = lower
        .split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_string())
        .filter(|t| t.chars().count() >= 2)
        .collect();
    if tokens.is_empty() {
        return 0.0;
    }

    let overlap = tokens.iter().filter(|t| keywords.contains(*t)).count() as f64;
    let overlap_score = overlap / tokens.len() as f64;

    let resolution_bonus = if RESOLUTION_VERBS_EN.iter().any(|v| lower.contains(v))
        || RESOLUTION_VERBS_KO.iter().any(|v| sentence.contains(v))
    {
        0.5
    } else {
        0.0
    };

    // Long rambling sentences carry less signal per character.
    let length_penalty = (sentence.chars().count() as f64 / 400.0).min(0.5);

    overlap_score + resolution_bonus - length_penalty
}

/// Split into sentences on terminal punctuation and newlines.
fn split_sentences(text: &str) -> Vec<&str> {
    text.split_inclusive(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Compress `body` to at most `budget` characters.
///
/// Already-short bodies pass through untouched.  Selection is greedy by
/// score; output keeps the sentences' original order so causality reads
/// correctly.
pub fn compress(subject: &str, body: &str, budget: usize) -> String {
    if body.chars().count() <= budget {
        return body.to_string();
    }

    let keywords = subject_keywords(subject);
    let sentences = split_sentences(body);

    let mut scored: Vec<(usize, &str, f64)> = sentences
        .iter()
        .enumerate()
        .map(|(i, s)| (i, *s, sentence_score(s, &keywords)))
        .collect();
    scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let mut selected: Vec<(usize, &str)> = Vec::new();
    let mut used = 0usize;
    for (index, sentence, _) in scored {
        let cost = sentence.chars().count() + 1;
        if used + cost > budget {
            continue;
        }
        used += cost;
        selected.push((index, sentence));
    }

    selected.sort_by_key(|(index, _)| *index);
    selected
        .into_iter()
        .map(|(_, s)| s)
        .collect::<Vec<_>>()
        .join(" ")
}
