//! Incremental `text/event-stream` parser.
//!
//! Bytes arrive in arbitrary chunks; only complete lines are decoded, so a
//! multi-byte character split across chunks is never mangled.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, `"message"` when absent
    pub event: String,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        events
    }

    /// Flush a trailing event the server did not terminate with a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
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
        // Comment / keep-alive
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
            _ => {} // id, retry
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(data: &str) -> SseEvent {
        SseEvent { event: "output".to_string(), data: data.to_string() }
    }

    #[test]
    fn test_single_event() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: output\ndata: Hello\n\n");
        assert_eq!(events, vec![output("Hello")]);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"event: out").is_empty());
        assert!(parser.feed(b"put\ndata: Hel").is_empty());
        assert_eq!(parser.feed(b"lo\n\n"), vec![output("Hello")]);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let text = "event: output\ndata: caf\u{e9}\n\n".as_bytes();
        let split = text.len() - 3; // inside the two-byte é
        let mut parser = SseParser::new();
        assert!(parser.feed(&text[..split]).is_empty());
        assert_eq!(parser.feed(&text[split..]), vec![output("caf\u{e9}")]);
    }

    #[test]
    fn test_crlf_and_multiline_data() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: output\r\ndata: line one\r\ndata: line two\r\n\r\n");
        assert_eq!(events, vec![output("line one\nline two")]);
    }

    #[test]
    fn test_whitespace_in_data_is_preserved() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: output\ndata:  leading space\n\n");
        assert_eq!(events, vec![output(" leading space")]);
    }

    #[test]
    fn test_comments_ids_and_default_event_name() {
        let mut parser = SseParser::new();
        let events = parser.feed(b": keep-alive\nid: 1\ndata: {}\n\nevent: done\ndata: {}\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent { event: "message".to_string(), data: "{}".to_string() },
                SseEvent { event: "done".to_string(), data: "{}".to_string() },
            ]
        );
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"event: output\ndata: tail").is_empty());
        assert_eq!(parser.finish(), Some(output("tail")));
        assert_eq!(parser.finish(), None);
    }
}
