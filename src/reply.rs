//! Typed wrappers over the three reply shapes a command can provoke:
//! `command/reply` (synchronous acknowledgement), `api/response` (the
//! blocking `api` command's result), and the `BACKGROUND_JOB` event that
//! eventually answers a `bgapi` command — success is always judged by a
//! leading `+OK`, never by the absence of an error.

use crate::event::EventMessage;
use crate::message::BasicMessage;

/// The outcome of a `command/reply` frame: FreeSWITCH's `Reply-Text`
/// header is `+OK ...` on success or `-ERR ...` on failure, never absent.
#[derive(Debug, Clone)]
pub struct CommandReply {
    text: String,
    ok: bool,
}

impl CommandReply {
    pub(crate) fn from_message(msg: &BasicMessage) -> Self {
        let text = msg.reply_text().unwrap_or_default().to_string();
        let ok = text.starts_with("+OK");
        Self { text, ok }
    }

    /// True if `Reply-Text` began with `+OK`.
    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// The raw `Reply-Text` value, `+OK`/`-ERR` prefix included.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// The outcome of an `api/response` frame: the command's body, which
/// itself follows the same `+OK`/`-ERR` convention on its first line.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    body: String,
    ok: bool,
}

impl ApiResponse {
    pub(crate) fn from_message(msg: &BasicMessage) -> Self {
        let body = msg.body_str().map(|c| c.into_owned()).unwrap_or_default();
        let ok = body.starts_with("+OK");
        Self { body, ok }
    }

    /// True if the body began with `+OK`.
    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// The full response body.
    pub fn body(&self) -> &str {
        &self.body
    }
}

/// The outcome of a `bgapi` command: either the `BACKGROUND_JOB` event
/// correlated by `Job-UUID`, or a dispatch-time failure if the `bgapi`
/// command itself was rejected before any such event arrived.
#[derive(Debug, Clone)]
pub struct BackgroundJobResult {
    inner: BackgroundJobInner,
}

#[derive(Debug, Clone)]
enum BackgroundJobInner {
    Event(EventMessage),
    DispatchFailed { job_uuid: String, text: String },
}

impl BackgroundJobResult {
    pub(crate) fn from_event(event: EventMessage) -> Self {
        Self {
            inner: BackgroundJobInner::Event(event),
        }
    }

    pub(crate) fn from_dispatch_failure(job_uuid: String, text: String) -> Self {
        Self {
            inner: BackgroundJobInner::DispatchFailed { job_uuid, text },
        }
    }

    /// The job's body (the same `+OK`/`-ERR`-prefixed text a synchronous
    /// `api` call would have returned), or the rejecting `command/reply`'s
    /// text if the `bgapi` dispatch itself failed.
    pub fn body(&self) -> Option<std::borrow::Cow<'_, str>> {
        match &self.inner {
            BackgroundJobInner::Event(event) => event.body_str(),
            BackgroundJobInner::DispatchFailed { text, .. } => {
                Some(std::borrow::Cow::Borrowed(text.as_str()))
            }
        }
    }

    /// True if the job's body began with `+OK`. A dispatch failure is
    /// never `+OK`.
    pub fn is_ok(&self) -> bool {
        match &self.inner {
            BackgroundJobInner::Event(_) => self.body().is_some_and(|b| b.starts_with("+OK")),
            BackgroundJobInner::DispatchFailed { .. } => false,
        }
    }

    /// The `Job-UUID` this result answers.
    pub fn job_uuid(&self) -> Option<&str> {
        match &self.inner {
            BackgroundJobInner::Event(event) => event.header("Job-UUID"),
            BackgroundJobInner::DispatchFailed { job_uuid, .. } => Some(job_uuid.as_str()),
        }
    }

    /// The underlying `BACKGROUND_JOB` event, if the job actually
    /// completed (`None` for a dispatch failure, which never produced one).
    pub fn event(&self) -> Option<&EventMessage> {
        match &self.inner {
            BackgroundJobInner::Event(event) => Some(event),
            BackgroundJobInner::DispatchFailed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn command_reply_ok() {
        let mut headers = HashMap::new();
        headers.insert("Reply-Text".to_string(), "+OK accepted".to_string());
        let msg = BasicMessage::new(headers, None);
        let reply = CommandReply::from_message(&msg);
        assert!(reply.is_ok());
        assert_eq!(reply.text(), "+OK accepted");
    }

    #[test]
    fn command_reply_err() {
        let mut headers = HashMap::new();
        headers.insert("Reply-Text".to_string(), "-ERR no such channel".to_string());
        let msg = BasicMessage::new(headers, None);
        let reply = CommandReply::from_message(&msg);
        assert!(!reply.is_ok());
    }

    #[test]
    fn api_response_distinguishes_ok_from_err() {
        let headers = HashMap::new();
        let msg = BasicMessage::new(headers, Some(bytes::Bytes::from_static(b"-ERR command not found")));
        let response = ApiResponse::from_message(&msg);
        assert!(!response.is_ok());
        assert_eq!(response.body(), "-ERR command not found");
    }

    #[test]
    fn background_job_result_reads_through_to_event() {
        let mut headers = HashMap::new();
        headers.insert("Event-Name".to_string(), "BACKGROUND_JOB".to_string());
        headers.insert("Job-UUID".to_string(), "job-1".to_string());
        let event = EventMessage::from_headers(headers);
        let result = BackgroundJobResult::from_event(event);
        assert_eq!(result.job_uuid(), Some("job-1"));
        assert!(result.body().is_none());
    }

    #[test]
    fn background_job_dispatch_failure_is_never_ok() {
        let result =
            BackgroundJobResult::from_dispatch_failure("job-2".to_string(), "-ERR no such command".to_string());
        assert!(!result.is_ok());
        assert_eq!(result.job_uuid(), Some("job-2"));
        assert_eq!(result.body().as_deref(), Some("-ERR no such command"));
        assert!(result.event().is_none());
    }
}
