//! Incremental decoder for the chunked server-sent-events framing used by
//! the completion endpoint.
//!
//! The decoder is pure and I/O-free: callers feed it whatever byte-chunks the
//! transport delivers and pull complete frames back out. Frames are delimited
//! by a blank line (any two consecutive line terminators: LF, CR, or CRLF);
//! a frame carries `id`, `event`, `retry` and `data` fields, and the logical
//! stream ends on a frame whose data is the `[DONE]` sentinel.

/// Literal data payload that terminates the logical stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: Option<String>,
    /// Event type; defaults to `"message"` when the frame names none.
    pub event: String,
    pub retry: Option<u64>,
    pub data: String,
}

impl Frame {
    /// Whether this frame is the end-of-stream sentinel.
    pub fn is_done(&self) -> bool {
        self.data == DONE_SENTINEL
    }
}

/// Streaming-tolerant frame accumulator.
///
/// Never assumes one transport read equals one frame: partial frames are
/// buffered and re-scanned on the next push.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of transport bytes; returns every frame completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<Frame> {
        self.buffer.push_str(chunk);

        let mut frames = Vec::new();
        while let Some((delim_start, delim_end)) = find_frame_boundary(&self.buffer) {
            let tail = self.buffer.split_off(delim_end);
            let mut raw = std::mem::replace(&mut self.buffer, tail);
            raw.truncate(delim_start);
            if let Some(frame) = parse_frame(&raw) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush whatever is buffered as a final frame (transports may omit the
    /// trailing blank line on the last frame).
    pub fn finish(&mut self) -> Option<Frame> {
        let raw = std::mem::take(&mut self.buffer);
        parse_frame(&raw)
    }
}

/// Length of the line terminator starting at byte `i`, or 0.
fn terminator_len(bytes: &[u8], i: usize) -> usize {
    match bytes.get(i) {
        Some(b'\r') => {
            if bytes.get(i + 1) == Some(&b'\n') {
                2
            } else {
                1
            }
        }
        Some(b'\n') => 1,
        _ => 0,
    }
}

/// Find the first blank line: two consecutive terminators. Returns the byte
/// range of the delimiter itself.
fn find_frame_boundary(s: &str) -> Option<(usize, usize)> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let first = terminator_len(bytes, i);
        if first == 0 {
            i += 1;
            continue;
        }
        let second = terminator_len(bytes, i + first);
        if second > 0 {
            return Some((i, i + first + second));
        }
        i += first;
    }
    None
}

/// Parse one raw frame chunk into a [`Frame`].
///
/// Field rules follow the source transport: a line without a `:`, or starting
/// with one (a comment), is ignored; unknown field names are ignored; `data`
/// values accumulate by direct concatenation; other fields take the last
/// value seen.
fn parse_frame(raw: &str) -> Option<Frame> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let mut frame = Frame {
        id: None,
        event: "message".to_string(),
        retry: None,
        data: String::new(),
    };

    let normalized = raw.replace("\r\n", "\n");
    for line in normalized.split(['\n', '\r']) {
        let line = line.trim_end();
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        if field.is_empty() {
            // Comment line.
            continue;
        }
        let value = value.trim_start();
        match field {
            "data" => frame.data.push_str(value),
            "event" => frame.event = value.to_string(),
            "id" => frame.id = Some(value.to_string()),
            "retry" => frame.retry = value.parse().ok(),
            _ => {}
        }
    }

    Some(frame)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_complete_frame() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push("data: hello\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "hello");
        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[0].id, None);
    }

    #[test]
    fn buffers_frames_split_across_pushes() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push("da").is_empty());
        assert!(decoder.push("ta: hel").is_empty());
        assert!(decoder.push("lo\n").is_empty());
        let frames = decoder.push("\ndata: next\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "hello");
        assert_eq!(frames[1].data, "next");
    }

    #[test]
    fn delimiter_split_across_pushes() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push("data: a\r\n").is_empty());
        let frames = decoder.push("\r\ndata: b\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "a");
        assert_eq!(frames[1].data, "b");
    }

    #[test]
    fn all_field_kinds_parse() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push("id: 7\nevent: delta\nretry: 250\ndata: x\n\n");
        let frame = &frames[0];
        assert_eq!(frame.id.as_deref(), Some("7"));
        assert_eq!(frame.event, "delta");
        assert_eq!(frame.retry, Some(250));
        assert_eq!(frame.data, "x");
    }

    #[test]
    fn comments_and_unknown_fields_are_ignored() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(": keepalive\nbogus: y\ndata: x\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x");
    }

    #[test]
    fn multiple_data_lines_concatenate() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push("data: ab\ndata: cd\n\n");
        assert_eq!(frames[0].data, "abcd");
    }

    #[test]
    fn done_sentinel_is_recognized() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push("data: [DONE]\n\n");
        assert!(frames[0].is_done());
    }

    #[test]
    fn finish_flushes_a_trailing_frame_without_delimiter() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push("data: last").is_empty());
        let frame = decoder.finish().unwrap();
        assert_eq!(frame.data, "last");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn cr_only_terminators_are_accepted() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push("data: a\r\rdata: b\r\r");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].data, "b");
    }
}
