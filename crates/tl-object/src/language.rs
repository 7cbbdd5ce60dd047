// SPDX-License-Identifier: MIT OR Apache-2.0
//! Language detection from Unicode block ratios.
//!
//! Classification rules, applied in order over the letter population:
//! Hangul ≥ 10% → Korean; Kana ≥ 10% → Japanese; CJK Unified ≥ 10% with
//! neither Hangul nor Kana present → Chinese; Latin ≥ 50% → English;
//! otherwise Korean as the conservative default for this deployment.

use tl_core::Language;

#[derive(Default)]
struct BlockCounts {
    hangul: usize,
    kana: usize,
    cjk: usize,
    latin: usize,
    total: usize,
}

fn classify_char(c: char) -> Option<fn(&mut BlockCounts)> {
    let cp = c as u32;
    match cp {
        // Hangul syllables, Jamo, and compatibility Jamo.
        0xAC00..=0xD7AF | 0x1100..=0x11FF | 0x3130..=0x318F => Some(|b| b.hangul += 1),
        // Hiragana + Katakana.
        0x3040..=0x309F | 0x30A0..=0x30FF => Some(|b| b.kana += 1),
        // CJK Unified Ideographs (shared by ja/zh; disambiguated by kana).
        0x4E00..=0x9FFF => Some(|b| b.cjk += 1),
        _ if c.is_ascii_alphabetic() || matches!(cp, 0x00C0..=0x024F) => Some(|b| b.latin += 1),
        _ => None,
    }
}

/// Detect the dominant language of `text`.
///
/// Digits, punctuation, and whitespace are ignored; only letters count
/// toward the ratios.  Empty or letter-free text classifies as
/// [`Language::Other`].
pub fn detect_language(text: &str) -> Language {
    let mut counts = BlockCounts::default();
    for c in text.chars() {
        if let Some(bump) = classify_char(c) {
            bump(&mut counts);
            counts.total += 1;
        }
    }

    if counts.total == 0 {
        return Language::Other;
    }

    let ratio = |n: usize| n as f64 / counts.total as f64;

    if ratio(counts.hangul) >= 0.10 {
        Language::Ko
    } else if ratio(counts.kana) >= 0.10 {
        Language::Ja
    } else if ratio(counts.cjk) >= 0.10 && counts.hangul == 0 && counts.kana == 0 {
        Language::Zh
    } else if ratio(counts.latin) >= 0.50 {
        Language::En
    } else {
        Language::Ko
    }
}
