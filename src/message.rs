//! `BasicMessage` — the header-plus-optional-body frame every ESL wire
//! message decomposes to — and the streaming [`Framer`] that turns a raw
//! byte stream into a sequence of them.
//!
//! The framer accumulates arbitrary chunks into a buffer and only advances
//! past a frame once it has fully arrived, so it can be fed directly from
//! a socket read loop without any per-byte blocking reads.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

/// Recognized `Content-Type` values, compared bytewise per spec.
pub mod content_type {
    pub const AUTH_REQUEST: &str = "auth/request";
    pub const COMMAND_REPLY: &str = "command/reply";
    pub const API_RESPONSE: &str = "api/response";
    pub const EVENT_PLAIN: &str = "text/event-plain";
    pub const DISCONNECT_NOTICE: &str = "text/disconnect-notice";
    pub const LOG_DATA: &str = "log/data";
}

/// A header map plus an optional body, as delivered by the framer.
///
/// Keys are case-preserving (the wire convention never lower-cases them)
/// and last-write-wins on duplicates, since `HashMap::insert` already
/// has that behavior.
#[derive(Debug, Clone, Default)]
pub struct BasicMessage {
    headers: HashMap<String, String>,
    body: Option<Bytes>,
}

impl BasicMessage {
    pub(crate) fn new(headers: HashMap<String, String>, body: Option<Bytes>) -> Self {
        Self { headers, body }
    }

    /// Look up a header by its exact (case-sensitive) name.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// The full header map.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub(crate) fn into_headers(self) -> HashMap<String, String> {
        self.headers
    }

    /// The frame body, if any.
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub(crate) fn body_bytes(&self) -> Option<Bytes> {
        self.body.clone()
    }

    /// The body decoded as UTF-8, replacing invalid sequences.
    pub fn body_str(&self) -> Option<std::borrow::Cow<'_, str>> {
        self.body.as_deref().map(String::from_utf8_lossy)
    }

    /// `Content-Type` header, if present.
    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// `Content-Length` header, parsed; absent or unparsable is treated as 0.
    pub fn content_length(&self) -> usize {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// `Reply-Text` header, if present.
    pub fn reply_text(&self) -> Option<&str> {
        self.header("Reply-Text")
    }
}

/// Split `data` into `key: value` headers, one per line, stopping at (and
/// discarding) a trailing blank line if `data` ends with one. Lines with no
/// `": "` separator are logged and skipped rather than rejecting the whole
/// frame — a single cosmetic server quirk shouldn't sink the connection.
pub(crate) fn parse_headers(data: &[u8]) -> crate::error::Result<HashMap<String, String>> {
    let text = std::str::from_utf8(data)
        .map_err(|e| crate::error::EslError::Protocol(format!("invalid utf-8 in headers: {e}")))?;
    let mut headers = HashMap::new();
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        match line.find(": ") {
            Some(pos) => {
                headers.insert(line[..pos].to_string(), line[pos + 2..].to_string());
            }
            None => {
                tracing::trace!(%line, "ignoring malformed ESL header line");
            }
        }
    }
    Ok(headers)
}

/// Find the end (exclusive, i.e. one past the terminating `\n`) of the first
/// blank line in `data`, tolerating a `\r` before each `\n`. Returns `None`
/// if no blank line has arrived yet.
pub(crate) fn find_header_block_end(data: &[u8]) -> Option<usize> {
    let mut line_start = 0;
    for i in 0..data.len() {
        if data[i] == b'\n' {
            let mut line = &data[line_start..i];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            if line.is_empty() {
                return Some(i + 1);
            }
            line_start = i + 1;
        }
    }
    None
}

fn content_length_of(headers: &HashMap<String, String>) -> Result<usize, String> {
    match headers.get("Content-Length") {
        None => Ok(0),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| format!("invalid Content-Length: {v:?}")),
    }
}

enum FramerState {
    /// Accumulating header lines; no body expected yet.
    Headers,
    /// Header block parsed; waiting for `content_length` more body bytes.
    Body {
        headers: HashMap<String, String>,
        content_length: usize,
    },
}

/// The outcome of one [`Framer::parse_next`] call.
pub(crate) enum ParseOutcome {
    /// A complete frame is available.
    Frame(BasicMessage),
    /// Not enough bytes have arrived yet; feed more and try again.
    NeedMoreData,
    /// A malformed header block was discarded; the framer has already
    /// resynchronized to the next frame boundary. Non-fatal.
    Rejected(String),
}

/// A streaming ESL frame parser.
///
/// Bytes arrive in arbitrary chunks via [`Framer::extend`]; [`Framer::parse_next`]
/// is called repeatedly (until it returns `NeedMoreData`) to drain as many
/// complete frames as are currently buffered. The framer never requires a
/// full frame to be in memory before it starts recognizing headers — the
/// header block itself must arrive in one contiguous span before it is
/// parsed, but nothing requires the *body* to have arrived yet.
pub(crate) struct Framer {
    buf: BytesMut,
    state: FramerState,
}

impl Framer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            state: FramerState::Headers,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// True if a frame is partway through being read (header bytes
    /// buffered with no blank line yet, or a body still being awaited).
    /// Used by the connection's reader loop to distinguish a clean EOF
    /// from one that truncates an in-flight frame.
    pub fn has_pending(&self) -> bool {
        match &self.state {
            FramerState::Body { .. } => true,
            FramerState::Headers => !self.buf.is_empty(),
        }
    }

    pub fn parse_next(&mut self) -> ParseOutcome {
        loop {
            match &self.state {
                FramerState::Headers => {
                    let Some(end) = find_header_block_end(&self.buf) else {
                        return ParseOutcome::NeedMoreData;
                    };
                    let header_bytes = self.buf.split_to(end);
                    let headers = match parse_headers(&header_bytes) {
                        Ok(h) => h,
                        Err(e) => return ParseOutcome::Rejected(e.to_string()),
                    };
                    match content_length_of(&headers) {
                        Ok(0) => return ParseOutcome::Frame(BasicMessage::new(headers, None)),
                        Ok(content_length) => {
                            self.state = FramerState::Body {
                                headers,
                                content_length,
                            };
                            continue;
                        }
                        Err(reason) => return ParseOutcome::Rejected(reason),
                    }
                }
                FramerState::Body { content_length, .. } => {
                    if self.buf.len() < *content_length {
                        return ParseOutcome::NeedMoreData;
                    }
                    let (headers, content_length) =
                        match std::mem::replace(&mut self.state, FramerState::Headers) {
                            FramerState::Body {
                                headers,
                                content_length,
                            } => (headers, content_length),
                            FramerState::Headers => unreachable!(),
                        };
                    let body = self.buf.split_to(content_length).freeze();
                    return ParseOutcome::Frame(BasicMessage::new(headers, Some(body)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(framer: &mut Framer, data: &[u8]) -> Vec<BasicMessage> {
        framer.extend(data);
        let mut frames = Vec::new();
        loop {
            match framer.parse_next() {
                ParseOutcome::Frame(msg) => frames.push(msg),
                ParseOutcome::Rejected(_) => continue,
                ParseOutcome::NeedMoreData => break,
            }
        }
        frames
    }

    #[test]
    fn parses_headers_only_frame() {
        let mut framer = Framer::new();
        let frames = feed_all(&mut framer, b"Content-Type: auth/request\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].content_type(), Some("auth/request"));
        assert_eq!(frames[0].body(), None);
    }

    #[test]
    fn parses_frame_with_body() {
        let mut framer = Framer::new();
        let frames = feed_all(
            &mut framer,
            b"Content-Type: api/response\nContent-Length: 5\n\n+OK\n\n",
        );
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].body(), Some(&b"+OK\n\n"[..]));
    }

    #[test]
    fn is_restartable_across_partial_chunks() {
        let mut framer = Framer::new();
        framer.extend(b"Content-Type: api/resp");
        assert!(matches!(framer.parse_next(), ParseOutcome::NeedMoreData));
        framer.extend(b"onse\nContent-Length: 3\n\n");
        assert!(matches!(framer.parse_next(), ParseOutcome::NeedMoreData));
        framer.extend(b"abc");
        match framer.parse_next() {
            ParseOutcome::Frame(msg) => assert_eq!(msg.body(), Some(&b"abc"[..])),
            _ => panic!("expected a complete frame"),
        }
    }

    #[test]
    fn parses_two_frames_in_one_buffer() {
        let mut framer = Framer::new();
        let frames = feed_all(
            &mut framer,
            b"Content-Type: command/reply\nReply-Text: +OK\n\nContent-Type: command/reply\nReply-Text: +OK again\n\n",
        );
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].reply_text(), Some("+OK again"));
    }

    #[test]
    fn rejects_and_resyncs_on_malformed_content_length() {
        let mut framer = Framer::new();
        let frames = feed_all(
            &mut framer,
            b"Content-Type: api/response\nContent-Length: not-a-number\n\nContent-Type: command/reply\nReply-Text: +OK\n\n",
        );
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].reply_text(), Some("+OK"));
    }

    #[test]
    fn tolerates_cr_before_lf() {
        let mut framer = Framer::new();
        let frames = feed_all(&mut framer, b"Content-Type: auth/request\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].content_type(), Some("auth/request"));
    }

    #[test]
    fn round_trips_headers_without_newline_values() {
        let mut framer = Framer::new();
        let body = b"hello world";
        let mut wire = format!("Key1: value1\nKey2: value2\nContent-Length: {}\n\n", body.len())
            .into_bytes();
        wire.extend_from_slice(body);
        let frames = feed_all(&mut framer, &wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header("Key1"), Some("value1"));
        assert_eq!(frames[0].header("Key2"), Some("value2"));
        assert_eq!(frames[0].body(), Some(&body[..]));
    }
}
