// SPDX-License-Identifier: MIT OR Apache-2.0
//! Text hygiene: HTML stripping, whitespace normalisation, and reply-noise
//! removal.

use regex::Regex;
use std::sync::LazyLock;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static BREAK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<(?:br\s*/?|/p|/div|/li|/tr)>").expect("valid regex"));
static QUOTE_INTRO: LazyLock<Regex> = LazyLock::new(|| {
    // "On Mon, Jun 2, support wrote:" and localized equivalents.
    Regex::new(r"(?i)^on .{0,80}wrote:\s*$|^\d{4}[-./]\d{1,2}[-./]\d{1,2}.{0,40}님이 작성:").expect("valid regex")
});
static SIGNATURE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(--\s*|best regards,?|kind regards,?|sincerely,?|sent from my .*|감사합니다\.?|드림\.?)$")
        .expect("valid regex")
});

/// Replace HTML with plain text.
///
/// Block-closing and break tags become newlines before all tags are
/// removed, so paragraph structure survives as line breaks.  Common
/// entities are decoded.
pub fn strip_html(input: &str) -> String {
    let with_breaks = BREAK_TAG.replace_all(input, "\n");
    let no_tags = TAG.replace_all(&with_breaks, "");
    decode_entities(&no_tags)
}

fn decode_entities(input: &str) -> String {
    // The short list platforms actually emit; anything else passes through.
    input
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Collapse runs of blanks and drop leading/trailing whitespace while
/// keeping single newlines as line structure.
pub fn normalize_whitespace(input: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in input.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            lines.push(collapsed);
        }
    }
    lines.join("\n")
}

/// Drop quoted reply blocks and signatures from a message body.
///
/// * Lines starting with `>` (quoted previous messages) are removed.
/// * A quote-introduction line ("On … wrote:") removes itself and
///   everything after it.
/// * A signature marker line removes itself and everything after it.
pub fn strip_reply_noise(input: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    for line in input.lines() {
        let trimmed = line.trim();
        if QUOTE_INTRO.is_match(trimmed) || SIGNATURE_MARKER.is_match(trimmed) {
            break;
        }
        if trimmed.starts_with('>') {
            continue;
        }
        kept.push(line);
    }
    kept.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_simple_tags() {
        assert_eq!(strip_html("<b>bold</b> text"), "bold text");
    }

    #[test]
    fn breaks_become_newlines() {
        let out = strip_html("<p>first</p><p>second</p>");
        assert_eq!(normalize_whitespace(&out), "first\nsecond");
    }

    #[test]
    fn decodes_entities() {
        assert_eq!(strip_html("a &amp; b &lt;c&gt;"), "a & b <c>");
        assert_eq!(strip_html("x&nbsp;y"), "x y");
    }

    #[test]
    fn normalize_collapses_runs() {
        assert_eq!(normalize_whitespace("  a   b  \n\n\n c "), "a b\nc");
    }

    #[test]
    fn normalize_empty_is_empty() {
        assert_eq!(normalize_whitespace("   \n \t "), "");
    }

    #[test]
    fn quoted_lines_removed() {
        let out = strip_reply_noise("keep\n> quoted\nalso keep");
        assert_eq!(out, "keep\nalso keep");
    }

    #[test]
    fn quote_intro_truncates_rest() {
        let out = strip_reply_noise("reply\nOn Mon, Jun 2, support wrote:\nold text");
        assert_eq!(out, "reply");
    }

    #[test]
    fn signature_truncates_rest() {
        let out = strip_reply_noise("done\nBest regards,\nKim\nACME Corp");
        assert_eq!(out, "done");
        let ko = strip_reply_noise("해결되었습니다\n감사합니다.\n김민준 드림");
        assert_eq!(ko, "해결되었습니다");
    }

    #[test]
    fn dash_dash_signature_marker() {
        let out = strip_reply_noise("body\n--\nsig line");
        assert_eq!(out, "body");
    }
}
