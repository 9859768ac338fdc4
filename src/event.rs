//! `EventMessage` — the parsed payload of a `text/event-plain` frame, or,
//! in the `connect`-handshake special case, the headers of a `command/reply`
//! frame that already carry an `Event-Name`.
//!
//! The nested sub-body is sliced by its exact `Content-Length`, never by
//! scanning for the next blank line within it, since a legitimate sub-body
//! may itself contain blank lines.

use std::borrow::Cow;
use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{EslError, Result};
use crate::message::{self, content_type, BasicMessage};

/// One parsed ESL event: a header block plus an optional nested body (the
/// `BACKGROUND_JOB` command output, for instance).
#[derive(Debug, Clone)]
pub struct EventMessage {
    headers: HashMap<String, String>,
    body: Option<Bytes>,
}

impl EventMessage {
    pub(crate) fn from_headers(headers: HashMap<String, String>) -> Self {
        Self {
            headers,
            body: None,
        }
    }

    /// Build the `CHANNEL_DATA` event from a `connect` handshake's
    /// `command/reply`, per spec.md §3: this applies only when the reply
    /// already carries an `Event-Name` header, and when it does, the
    /// event's headers *are* the reply's headers verbatim.
    pub(crate) fn from_command_reply(msg: &BasicMessage) -> Option<Self> {
        if msg.content_type() == Some(content_type::COMMAND_REPLY) && msg.header("Event-Name").is_some() {
            Some(Self::from_headers(msg.headers().clone()))
        } else {
            None
        }
    }

    /// Parse a `text/event-plain` frame's body into an `EventMessage`.
    pub(crate) fn parse(msg: &BasicMessage) -> Result<Self> {
        if msg.content_type() != Some(content_type::EVENT_PLAIN) {
            return Err(EslError::Protocol(format!(
                "expected {}, got {:?}",
                content_type::EVENT_PLAIN,
                msg.content_type()
            )));
        }
        let payload = msg
            .body()
            .ok_or_else(|| EslError::Protocol("event frame is missing its body".into()))?;
        Self::parse_payload(payload)
    }

    fn parse_payload(payload: &[u8]) -> Result<Self> {
        let end = message::find_header_block_end(payload).ok_or_else(|| {
            EslError::Protocol("event payload is missing its header terminator".into())
        })?;
        let headers = message::parse_headers(&payload[..end])?;
        let rest = &payload[end..];

        let body = match headers.get("Content-Length") {
            None => None,
            Some(len_str) => {
                let len: usize = len_str.trim().parse().map_err(|_| {
                    EslError::Protocol(format!("invalid nested Content-Length: {len_str:?}"))
                })?;
                if rest.len() < len {
                    return Err(EslError::Protocol(
                        "event sub-body truncated before Content-Length bytes arrived".into(),
                    ));
                }
                // Exact-length slice; any trailing "\n\n" in `rest` beyond
                // `len` is simply not part of the body and is discarded by
                // never being included in the slice.
                Some(Bytes::copy_from_slice(&rest[..len]))
            }
        };

        Ok(Self { headers, body })
    }

    /// Look up a header by its exact (case-sensitive) name.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// The full header map.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Look up a channel variable, i.e. the header `variable_{name}`.
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&format!("variable_{name}"))
            .map(String::as_str)
    }

    /// The nested sub-body, if this event carried one (`BACKGROUND_JOB`'s
    /// command output, for instance).
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// The nested sub-body decoded as UTF-8, replacing invalid sequences.
    pub fn body_str(&self) -> Option<Cow<'_, str>> {
        self.body.as_deref().map(String::from_utf8_lossy)
    }

    /// `Unique-ID` — the channel UUID this event describes.
    pub fn uuid(&self) -> Option<&str> {
        self.header("Unique-ID")
    }

    /// `Event-Name`, uppercased.
    pub fn event_name(&self) -> Option<String> {
        self.header("Event-Name").map(|n| n.to_uppercase())
    }

    /// `Channel-State` with the leading `CS_` stripped, if present.
    pub fn channel_state(&self) -> Option<&str> {
        self.header("Channel-State")
            .map(|s| s.strip_prefix("CS_").unwrap_or(s))
    }

    /// `Answer-State`, if present.
    pub fn answer_state(&self) -> Option<&str> {
        self.header("Answer-State")
    }

    /// `Hangup-Cause`, if present.
    pub fn hangup_cause(&self) -> Option<&str> {
        self.header("Hangup-Cause")
    }
}
