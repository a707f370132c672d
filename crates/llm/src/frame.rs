//! Server-sent event framing.
//!
//! Streaming responses are a sequence of `data: <json>\n\n` frames closed by
//! a literal `data: [DONE]\n\n` frame.

use bytes::Bytes;
use serde::Serialize;

/// The literal terminator payload
pub const DONE: &str = "[DONE]";

/// One SSE frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A JSON payload
    Data(String),
    /// The terminator
    Done,
}

impl Frame {
    /// Serialize a value into a data frame
    pub fn json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_string(value).map(Self::Data)
    }

    /// Encode the frame for the wire
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Data(data) => Bytes::from(format!("data: {data}\n\n")),
            Self::Done => Bytes::from_static(b"data: [DONE]\n\n"),
        }
    }

    /// The payload of a data frame
    pub fn data(&self) -> Option<&str> {
        match self {
            Self::Data(data) => Some(data),
            Self::Done => None,
        }
    }

    /// Whether this is the terminator
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Parse a complete SSE body into frames
    pub fn parse_all(body: &str) -> Vec<Self> {
        let mut decoder = FrameDecoder::new();
        let mut frames = decoder.push(body.as_bytes());
        frames.extend(decoder.finish());
        frames
    }
}

/// Incremental SSE decoder.
///
/// Network reads split events at arbitrary byte offsets, so input is
/// buffered until a blank line closes an event. Only `data:` fields are
/// kept; comments and other fields are dropped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every frame they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some((end, sep)) = find_event_end(&self.buf) {
            let event: Vec<u8> = self.buf.drain(..end + sep).collect();
            if let Some(frame) = parse_event(&event[..end]) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing event that was not closed by a blank line
    pub fn finish(&mut self) -> Option<Frame> {
        let event = std::mem::take(&mut self.buf);
        parse_event(&event)
    }
}

fn find_event_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_event(event: &[u8]) -> Option<Frame> {
    let text = String::from_utf8_lossy(event);
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect();
    if data.is_empty() {
        return None;
    }

    let data = data.join("\n");
    if data.trim() == DONE {
        Some(Frame::Done)
    } else {
        Some(Frame::Data(data))
    }
}
