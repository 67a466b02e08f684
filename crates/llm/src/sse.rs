//! Server-sent-event decoding for OpenAI-compatible streaming completions.

use serde_json::Value;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SseEvent {
    Fragment(String),
    Error(String),
    Done,
}

/// Splits the byte stream into lines and turns `data:` lines into events.
/// Bytes are buffered until a full line arrives, so multi-byte characters
/// split across network chunks decode intact.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line = self.buffer.drain(..=newline).collect::<Vec<_>>();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = parse_line(line.trim_end_matches(['\n', '\r'])) {
                events.push(event);
            }
        }
        events
    }

    pub(crate) fn finish(&mut self) -> Vec<SseEvent> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest);
        parse_line(line.trim()).into_iter().collect()
    }
}

pub(crate) fn parse_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data:")?.trim_start();

    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }

    let parsed = match serde_json::from_str::<Value>(data) {
        Ok(value) => value,
        Err(err) => {
            trace!(error = %err, "ignoring unparsable SSE payload");
            return None;
        }
    };

    if let Some(error) = parsed.get("error") {
        let message = error["message"]
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| error.to_string());
        return Some(SseEvent::Error(message));
    }

    parsed["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|text| !text.is_empty())
        .map(|text| SseEvent::Fragment(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_deltas_and_done() {
        assert_eq!(
            parse_line(r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#),
            Some(SseEvent::Fragment("Hello".to_string()))
        );
        assert_eq!(
            parse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            None
        );
        assert_eq!(parse_line("data: [DONE]"), Some(SseEvent::Done));
        assert_eq!(parse_line(": keep-alive"), None);
        assert_eq!(
            parse_line(r#"data: {"error":{"message":"rate limited"}}"#),
            Some(SseEvent::Error("rate limited".to_string()))
        );
    }

    #[test]
    fn reassembles_lines_across_chunks() {
        let payload = "data: {\"choices\":[{\"delta\":{\"content\":\"80 percent é\"}}]}\n\ndata: [DONE]\n\n";
        let bytes = payload.as_bytes();
        // split inside the two-byte 'é'
        let split = payload.find('é').unwrap() + 1;

        let mut decoder = SseDecoder::default();
        let mut events = decoder.push(&bytes[..split]);
        assert!(events.is_empty());
        events.extend(decoder.push(&bytes[split..]));

        assert_eq!(
            events,
            vec![
                SseEvent::Fragment("80 percent é".to_string()),
                SseEvent::Done
            ]
        );
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn flushes_unterminated_last_line() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: [DONE]").is_empty());
        assert_eq!(decoder.finish(), vec![SseEvent::Done]);
    }
}
