// SPDX-License-Identifier: MIT OR Apache-2.0
//! Sparse keyword vectors.
//!
//! Tokenises text into lowercase alphanumeric terms, drops per-language
//! stopwords, and emits `(term_hash, weight)` pairs with
//! length-normalised term frequencies.  The same function embeds documents
//! and queries, so matching term ids line up by construction.

use sha2::{Digest, Sha256};
use tl_core::Language;

/// Minimum token length kept.
const MIN_TOKEN_LEN: usize = 2;

/// English stopwords that would otherwise dominate support text.
const STOPWORDS_EN: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "to", "in", "on", "is", "are", "was", "were", "it",
    "this", "that", "for", "with", "as", "at", "by", "be", "has", "have", "had", "not", "no",
    "please", "hi", "hello", "thanks", "thank", "regards",
];

/// Korean particles and boilerplate.
const STOPWORDS_KO: &[&str] = &[
    "있습니다", "합니다", "입니다", "했습니다", "됩니다", "주세요", "감사합니다", "안녕하세요",
    "그리고", "하지만", "또는", "제가", "저는", "이것", "그것",
];

fn is_stopword(token: &str, language: Language) -> bool {
    match language {
        Language::Ko => STOPWORDS_KO.contains(&token) || STOPWORDS_EN.contains(&token),
        _ => STOPWORDS_EN.contains(&token),
    }
}

/// Stable 32-bit term id from the token text.
pub fn term_id(token: &str) -> u32 {
    let digest = Sha256::digest(token.as_bytes());
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Tokenise `text` into lowercase terms, stopwords removed.
pub fn tokenize(text: &str, language: Language) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|t| t.trim().to_lowercase())
        .filter(|t| t.chars().count() >= MIN_TOKEN_LEN)
        .filter(|t| !is_stopword(t, language))
        .collect()
}

/// Build a sparse `(term_id, weight)` vector over `text`.
///
/// Weights are term frequencies divided by the total term count, so
/// documents of different lengths stay comparable.  Returns an empty
/// vector for term-free text.
pub fn sparse_vector(text: &str, language: Language) -> Vec<(u32, f32)> {
    let tokens = tokenize(text, language);
    if tokens.is_empty() {
        return Vec::new();
    }
    let total = tokens.len() as f32;

    let mut counts: std::collections::HashMap<u32, f32> = std::collections::HashMap::new();
    for token in &tokens {
        *counts.entry(term_id(token)).or_insert(0.0) += 1.0;
    }

    let mut out: Vec<(u32, f32)> = counts
        .into_iter()
        .map(|(id, count)| (id, count / total))
        .collect();
    out.sort_by_key(|(id, _)| *id);
    out
}

/// Dot product of two sparse vectors (both sorted by term id).
pub fn sparse_dot(a: &[(u32, f32)], b: &[(u32, f32)]) -> f32 {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_filters() {
        let tokens = tokenize("The Printer IS broken!", Language::En);
        assert_eq!(tokens, vec!["printer", "broken"]);
    }

    #[test]
    fn tokenize_keeps_korean_terms() {
        let tokens = tokenize("결제 오류가 발생했습니다", Language::Ko);
        assert!(tokens.contains(&"결제".to_string()));
        assert!(tokens.contains(&"오류가".to_string()));
    }

    #[test]
    fn korean_stopwords_removed() {
        let tokens = tokenize("감사합니다 결제 주세요", Language::Ko);
        assert_eq!(tokens, vec!["결제"]);
    }

    #[test]
    fn term_ids_are_stable() {
        assert_eq!(term_id("billing"), term_id("billing"));
        assert_ne!(term_id("billing"), term_id("billings"));
    }

    #[test]
    fn sparse_vector_weights_sum_to_one() {
        let v = sparse_vector("refund refund billing", Language::En);
        let sum: f32 = v.iter().map(|(_, w)| w).sum();
        assert!((sum - 1.0).abs() < 1e-6);
        // "refund" appears twice → weight 2/3.
        let refund = v
            .iter()
            .find(|(id, _)| *id == term_id("refund"))
            .map(|(_, w)| *w)
            .unwrap();
        assert!((refund - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn empty_text_yields_empty_vector() {
        assert!(sparse_vector("", Language::En).is_empty());
        assert!(sparse_vector("the a of", Language::En).is_empty());
    }

    #[test]
    fn sparse_dot_matches_overlap() {
        let doc = sparse_vector("billing refund error", Language::En);
        let query = sparse_vector("refund", Language::En);
        assert!(sparse_dot(&doc, &query) > 0.0);

        let unrelated = sparse_vector("printer jam", Language::En);
        assert_eq!(sparse_dot(&unrelated, &query), 0.0);
    }

    #[test]
    fn vector_is_sorted_by_term_id() {
        let v = sparse_vector("gamma alpha beta delta", Language::En);
        assert!(v.windows(2).all(|w| w[0].0 <= w[1].0));
    }
}
