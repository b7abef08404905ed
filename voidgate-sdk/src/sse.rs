//! # Server-Sent Event Framing
//!
//! Line-oriented SSE parser shared by every adapter's stream method (spec
//! §4.5). Framing rule: lines starting `data: `; a literal `[DONE]` payload
//! ends the stream; malformed lines are skipped rather than erroring the
//! whole stream.
//!
//! This is a push parser (`push_str`/`finish`) so it composes with any
//! transport — `reqwest::Response::bytes_stream()`, a mocked byte feed in
//! tests, anything that hands us chunks in order.

#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            Err(_) => {
                tracing::debug!("skipping non-utf8 SSE chunk");
                Vec::new()
            }
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let mut line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);

            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                self.finish_event(&mut events);
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            if let Some(value) = line.strip_prefix("event:") {
                let value = value.trim_start();
                self.event = (!value.is_empty()).then(|| value.to_string());
                continue;
            }
            if let Some(value) = line.strip_prefix("data:") {
                self.data_lines.push(value.trim_start().to_string());
                continue;
            }
            tracing::trace!(line, "skipping malformed SSE line");
        }

        events
    }

    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        self.finish_event(&mut events);
        events
    }

    fn finish_event(&mut self, events: &mut Vec<SseEvent>) {
        if self.data_lines.is_empty() {
            self.event = None;
            return;
        }
        let data = self.data_lines.join("\n");
        events.push(SseEvent {
            event: self.event.take(),
            data,
        });
        self.data_lines.clear();
    }
}

/// Whether an SSE data payload is the stream-terminating sentinel.
pub fn is_done_sentinel(data: &str) -> bool {
    data.trim() == "[DONE]"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_event() {
        let mut p = SseParser::new();
        let events = p.push_str("data: {\"a\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn recognizes_done_sentinel() {
        let mut p = SseParser::new();
        let events = p.push_str("data: [DONE]\n\n");
        assert!(is_done_sentinel(&events[0].data));
    }

    #[test]
    fn skips_malformed_lines_without_erroring() {
        let mut p = SseParser::new();
        let events = p.push_str("not-a-valid-line\ndata: ok\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "ok");
    }

    #[test]
    fn handles_split_across_chunks() {
        let mut p = SseParser::new();
        let mut all = p.push_str("data: {\"x\":");
        all.extend(p.push_str("1}\n\n"));
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].data, "{\"x\":1}");
    }

    #[test]
    fn multi_line_data_is_joined_with_newline() {
        let mut p = SseParser::new();
        let events = p.push_str("data: line1\ndata: line2\n\n");
        assert_eq!(events[0].data, "line1\nline2");
    }
}
