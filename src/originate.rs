//! `OriginateOptions` rendering and the `Originate` result type.
//!
//! Options render as a FreeSWITCH channel-variable bundle,
//! `{key1=val1,key2=val2}`, with no trailing comma and `{}` when empty.

use uuid::Uuid;

use crate::event::EventMessage;
use crate::reply::BackgroundJobResult;

/// Configuration for `Inbound::originate`, rendered as a FreeSWITCH
/// channel-variable bundle: `{key1=val1,key2=val2}`.
#[derive(Debug, Clone, Default)]
pub struct OriginateOptions {
    /// The channel UUID to use. If empty when `Inbound::originate` is
    /// called, a fresh UUID is minted and written back here.
    pub uuid: String,
    pub caller_id_name: String,
    pub caller_id_number: String,
    pub retries: u32,
    pub retry_sleep_ms: u32,
    pub timeout: u32,
    pub execute_on_originate: String,
    pub return_ring_ready: bool,
    pub ignore_early_media: bool,
    pub bypass_media: bool,
}

impl OriginateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn ensure_uuid(&mut self) -> &str {
        if self.uuid.is_empty() {
            self.uuid = Uuid::new_v4().to_string();
        }
        &self.uuid
    }

    /// Render as `{origination_uuid='...',...}`, trimming the final comma
    /// and collapsing to `{}` when no option is set.
    pub fn render(&self) -> String {
        let mut parts = Vec::new();

        if !self.uuid.is_empty() {
            parts.push(format!("origination_uuid='{}'", self.uuid));
        }
        if !self.caller_id_name.is_empty() {
            parts.push(format!("origination_caller_id_name='{}'", self.caller_id_name));
        }
        if !self.caller_id_number.is_empty() {
            parts.push(format!(
                "origination_caller_id_number={}",
                self.caller_id_number
            ));
        }
        if self.retries != 0 {
            parts.push(format!("originate_retries={}", self.retries));
        }
        if self.retry_sleep_ms != 0 {
            parts.push(format!("originate_retry_sleep_ms={}", self.retry_sleep_ms));
        }
        if self.timeout != 0 {
            parts.push(format!("originate_timeout={}", self.timeout));
        }
        if !self.execute_on_originate.is_empty() {
            parts.push(format!(
                "execute_on_originate='{}'",
                self.execute_on_originate
            ));
        }
        if self.return_ring_ready {
            parts.push("return_ring_ready=true".to_string());
        }
        if self.ignore_early_media {
            parts.push("ignore_early_media=true".to_string());
        }
        if self.bypass_media {
            parts.push("bypass_media=true".to_string());
        }

        format!("{{{}}}", parts.join(","))
    }
}

/// The outcome of `Inbound::originate`: exactly one of a winning channel
/// event or a failed background-job dispatch.
#[derive(Debug, Clone)]
pub enum OriginateOutcome {
    /// A qualifying event (`CHANNEL_ANSWER`, `CHANNEL_HANGUP`, or
    /// `CHANNEL_PROGRESS` when ring-ready was requested) arrived first.
    Event(EventMessage),
    /// The `bgapi originate` dispatch itself failed before any qualifying
    /// event arrived.
    DispatchFailed(BackgroundJobResult),
}

/// The result of `Inbound::originate`.
#[derive(Debug, Clone)]
pub struct OriginateResult {
    pub uuid: String,
    pub outcome: OriginateOutcome,
}

impl OriginateResult {
    pub(crate) fn new(uuid: String, outcome: OriginateOutcome) -> Self {
        Self { uuid, outcome }
    }

    /// True if a qualifying channel event won the race and that event's
    /// answer-state/hangup cause does not itself indicate failure to
    /// connect (`CHANNEL_HANGUP` is still a "winning" event per spec.md
    /// §4.3 step 3 — it is up to the caller to inspect `hangup_cause`).
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, OriginateOutcome::Event(_))
    }
}
