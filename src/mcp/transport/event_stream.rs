//! Server-Sent Events parsing shared by the HTTP-based transports
//!
//! [`SseParser`] is an incremental line parser: feed it raw body chunks and
//! it yields complete [`SseEvent`]s. [`drive_sse_stream`] runs the parser
//! over a `reqwest` byte stream until it ends or the callback asks to stop.

use bytes::Bytes;
use futures::{Stream, StreamExt};

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// Value of the `event:` field, if any. Absent means `message`.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    /// Value of the `id:` field, if any.
    pub id: Option<String>,
}

impl SseEvent {
    /// The effective event type (`message` when no `event:` field was sent).
    pub fn kind(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }

    /// Whether this event carries a JSON-RPC payload.
    ///
    /// Keep-alive events (`event: ping`, `data: [PING]`) and empty events
    /// carry nothing.
    pub fn is_message(&self) -> bool {
        self.kind() == "message"
            && !self.data.is_empty()
            && !self.data.eq_ignore_ascii_case("[ping]")
    }
}

/// Incremental SSE parser.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the response body and collect every event it
    /// completes. Partial lines are buffered until the next chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        events
    }

    /// Flush whatever is buffered once the body has ended.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let line = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned();
            let line = line.trim_end_matches('\r').to_string();
            if let Some(event) = self.process_line(&line) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // `retry` and unknown fields are ignored.
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.event.is_none() && self.data.is_empty() && self.id.is_none() {
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.id.take(),
        })
    }
}

/// Parse an SSE byte stream, handing each event to `on_event`.
///
/// Returns when the stream ends, a chunk fails to arrive, or `on_event`
/// returns `false`.
pub async fn drive_sse_stream<S, F>(byte_stream: S, mut on_event: F)
where
    S: Stream<Item = reqwest::Result<Bytes>>,
    F: FnMut(SseEvent) -> bool,
{
    let mut parser = SseParser::new();
    tokio::pin!(byte_stream);

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!("SSE stream aborted: {}", e);
                return;
            }
        };
        for event in parser.push(&chunk) {
            if !on_event(event) {
                return;
            }
        }
    }

    if let Some(event) = parser.finish() {
        on_event(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_data_event() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: {\"jsonrpc\":\"2.0\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, r#"{"jsonrpc":"2.0"}"#);
        assert_eq!(events[0].kind(), "message");
        assert!(events[0].is_message());
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"event: endpoint\nda").is_empty());
        assert!(parser.push(b"ta: /messages?session=1").is_empty());
        let events = parser.push(b"\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "endpoint");
        assert_eq!(events[0].data, "/messages?session=1");
        assert!(!events[0].is_message());
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let body = "data: caf\u{e9}\n\n".as_bytes();
        let (first, second) = body.split_at(10);
        let mut parser = SseParser::new();
        assert!(parser.push(first).is_empty());
        let events = parser.push(second);
        assert_eq!(events[0].data, "caf\u{e9}");
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut parser = SseParser::new();
        let events = parser.push(b"id: 7\r\ndata: one\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "one");
        assert_eq!(events[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_multiline_data_is_joined() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: first\ndata: second\n\n");
        assert_eq!(events[0].data, "first\nsecond");
    }

    #[test]
    fn test_comments_and_retry_are_ignored() {
        let mut parser = SseParser::new();
        let events = parser.push(b": keep-alive\nretry: 1000\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn test_ping_events_are_not_messages() {
        let mut parser = SseParser::new();
        let events = parser.push(b"event: ping\ndata: ignored\n\ndata: [PING]\n\n");
        assert_eq!(events.len(), 2);
        assert!(!events[0].is_message());
        assert!(!events[1].is_message());
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: tail").is_empty());
        let event = parser.finish().unwrap();
        assert_eq!(event.data, "tail");
        assert!(parser.finish().is_none());
    }

    #[tokio::test]
    async fn test_drive_sse_stream_stops_when_callback_declines() {
        let chunks: Vec<reqwest::Result<Bytes>> = vec![Ok(Bytes::from_static(
            b"data: first\n\ndata: second\n\ndata: third\n\n",
        ))];
        let mut seen = Vec::new();
        drive_sse_stream(futures::stream::iter(chunks), |event| {
            seen.push(event.data);
            seen.len() < 2
        })
        .await;
        assert_eq!(seen, vec!["first".to_string(), "second".to_string()]);
    }
}
