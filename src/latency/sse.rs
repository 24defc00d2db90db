use crate::error::AppError;
use bytes::Bytes;

const DEFAULT_EVENT_NAME: &str = "message";

/// Longest unterminated line the decoder will buffer.
pub const MAX_PENDING_LINE_BYTES: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// `event: <name>\ndata: <json>\n\n`. Multi-line payloads are split across
/// several `data:` lines so the frame never contains a premature blank line.
pub fn encode_event(name: &str, data: &str) -> Bytes {
    let mut encoded = String::with_capacity(name.len() + data.len() + 16);
    encoded.push_str("event: ");
    encoded.push_str(name);
    encoded.push('\n');
    for line in data.split('\n') {
        encoded.push_str("data: ");
        encoded.push_str(line);
        encoded.push('\n');
    }
    encoded.push('\n');
    Bytes::from(encoded)
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event_name: Option<String>,
    data_lines: Vec<String>,
    invalid_utf8: bool,
}

impl SseDecoder {
    /// Buffers `chunk`. Fails and resets the decoder once the unterminated
    /// tail grows past [`MAX_PENDING_LINE_BYTES`].
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), AppError> {
        self.buffer.extend_from_slice(chunk);

        let tail_start = self
            .buffer
            .iter()
            .rposition(|byte| *byte == b'\n')
            .map_or(0, |index| index + 1);
        if self.buffer.len() - tail_start > MAX_PENDING_LINE_BYTES {
            *self = Self::default();
            return Err(AppError::validation(format!(
                "event stream line exceeds {MAX_PENDING_LINE_BYTES} bytes"
            )));
        }

        Ok(())
    }

    /// Returns the next complete event, consuming lines from the buffered
    /// bytes. Partial lines stay buffered until more bytes arrive. An event
    /// with a line that is not valid UTF-8 comes back as an error in its
    /// place; later events decode normally.
    pub fn next_event(&mut self) -> Option<Result<SseEvent, AppError>> {
        while let Some(line_end) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    return Some(event);
                }
                continue;
            }

            match String::from_utf8(line) {
                Ok(line) => self.apply_line(&line),
                Err(_) => self.invalid_utf8 = true,
            }
        }

        None
    }

    fn apply_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_name = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<Result<SseEvent, AppError>> {
        let event_name = self.event_name.take();
        if std::mem::take(&mut self.invalid_utf8) {
            self.data_lines.clear();
            return Some(Err(AppError::validation(
                "event stream line is not valid utf-8",
            )));
        }
        if self.data_lines.is_empty() {
            return None;
        }

        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(Ok(SseEvent {
            event: event_name.unwrap_or_else(|| DEFAULT_EVENT_NAME.to_string()),
            data,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(decoder: &mut SseDecoder) -> Option<SseEvent> {
        decoder
            .next_event()
            .map(|event| event.expect("event should decode"))
    }

    #[test]
    fn encodes_named_event_with_blank_line_terminator() {
        let encoded = encode_event("ready", "{}");
        assert_eq!(&encoded[..], b"event: ready\ndata: {}\n\n");
    }

    #[test]
    fn decodes_events_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        decoder.push(b"event: latency-fr").expect("chunk should buffer");
        assert!(decoder.next_event().is_none());

        decoder
            .push(b"ame\ndata: {\"frame\":1}\n")
            .expect("chunk should buffer");
        assert!(decoder.next_event().is_none());

        decoder
            .push(b"\nevent: heartbeat\ndata: {}\n\n")
            .expect("chunk should buffer");
        assert_eq!(
            decoded(&mut decoder),
            Some(SseEvent {
                event: "latency-frame".to_string(),
                data: "{\"frame\":1}".to_string(),
            })
        );
        assert_eq!(
            decoded(&mut decoder),
            Some(SseEvent {
                event: "heartbeat".to_string(),
                data: "{}".to_string(),
            })
        );
        assert!(decoder.next_event().is_none());
    }

    #[test]
    fn handles_crlf_comments_and_multiline_data() {
        let mut decoder = SseDecoder::default();
        decoder
            .push(b": keep-alive\r\n\r\ndata: first\r\ndata: second\r\n\r\n")
            .expect("chunk should buffer");

        assert_eq!(
            decoded(&mut decoder),
            Some(SseEvent {
                event: "message".to_string(),
                data: "first\nsecond".to_string(),
            })
        );
    }

    #[test]
    fn decodes_what_it_encodes() {
        let mut decoder = SseDecoder::default();
        decoder
            .push(&encode_event("report", "line one\nline two"))
            .expect("chunk should buffer");

        let event = decoded(&mut decoder).expect("encoded event should decode");
        assert_eq!(event.event, "report");
        assert_eq!(event.data, "line one\nline two");
    }

    #[test]
    fn invalid_utf8_fails_only_its_own_event() {
        let mut decoder = SseDecoder::default();
        decoder
            .push(b"event: latency-frame\ndata: {\"frame\":\xff\xfe}\n\n")
            .expect("chunk should buffer");
        decoder
            .push(b"event: heartbeat\ndata: {}\n\n")
            .expect("chunk should buffer");

        let error = decoder
            .next_event()
            .expect("broken event should still be reported")
            .expect_err("invalid utf-8 must not decode");
        assert!(error.to_string().contains("utf-8"));

        let next = decoded(&mut decoder).expect("following event should decode");
        assert_eq!(next.event, "heartbeat");
        assert_eq!(next.data, "{}");
    }

    #[test]
    fn unterminated_line_past_the_cap_is_rejected() {
        let mut decoder = SseDecoder::default();
        decoder
            .push(&vec![b'a'; MAX_PENDING_LINE_BYTES])
            .expect("a line at the cap should buffer");

        let error = decoder
            .push(b"a")
            .expect_err("one byte past the cap must fail");
        assert!(error.to_string().contains("exceeds"));

        decoder
            .push(b"data: fresh\n\n")
            .expect("decoder should accept input after reset");
        assert_eq!(
            decoded(&mut decoder).map(|event| event.data),
            Some("fresh".to_string())
        );
    }
}
