// SPDX-License-Identifier: MIT OR Apache-2.0
//! Incremental server-sent-events frame parsing.
//!
//! Provider streams arrive as byte chunks that do not respect line
//! boundaries.  [`SseParser`] buffers partial lines and yields the `data:`
//! payloads of complete events; dialect-specific delta extraction happens
//! on top in the router.

/// Incremental SSE `data:` payload extractor.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    /// New parser with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw byte chunk; returns the `data:` payloads of every event
    /// completed by this chunk, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut payloads = Vec::new();
        // Consume complete lines; keep the trailing partial line buffered.
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
            // Comment lines (":…"), `event:` tags, and blank separators are
            // not needed by any supported dialect.
        }
        payloads
    }
}

/// The OpenAI stream terminator payload.
pub const DONE_MARKER: &str = "[DONE]";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_event() {
        let mut p = SseParser::new();
        let out = p.feed(b"data: {\"x\":1}\n\n");
        assert_eq!(out, vec![r#"{"x":1}"#]);
    }

    #[test]
    fn reassembles_split_lines() {
        let mut p = SseParser::new();
        assert!(p.feed(b"data: {\"te").is_empty());
        let out = p.feed(b"xt\":\"hi\"}\n");
        assert_eq!(out, vec![r#"{"text":"hi"}"#]);
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut p = SseParser::new();
        let out = p.feed(b"data: a\n\ndata: b\n\ndata: [DONE]\n\n");
        assert_eq!(out, vec!["a", "b", DONE_MARKER]);
    }

    #[test]
    fn ignores_event_tags_and_comments() {
        let mut p = SseParser::new();
        let out = p.feed(b"event: message_start\n: keepalive\ndata: x\n\n");
        assert_eq!(out, vec!["x"]);
    }

    #[test]
    fn handles_crlf() {
        let mut p = SseParser::new();
        let out = p.feed(b"data: y\r\n\r\n");
        assert_eq!(out, vec!["y"]);
    }
}
