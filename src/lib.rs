//! A client library for the FreeSWITCH Event Socket Layer (ESL).
//!
//! Supports both directions of the protocol:
//!
//! - **Inbound mode** ([`Inbound`]): this process dials FreeSWITCH,
//!   authenticates, and drives it — sending commands, invoking `api`/
//!   `bgapi`, and originating calls.
//! - **Outbound mode** ([`Listener`], [`OutboundConnection`]): FreeSWITCH
//!   dials this process once per call leg; [`Listener`] accepts those
//!   sockets and completes the `connect` handshake that hydrates each
//!   one's channel data.
//!
//! Both modes sit on the same [`Connection`] core: a byte-level framer,
//! a FIFO-correlated command/API dispatcher, and event/job/execute
//! correlation, all multiplexed over one TCP socket.
//!
//! This crate never installs a `tracing` subscriber; it only emits
//! events. Wire one up in the binary that uses it.

mod broadcast;
mod connection;
mod event;
mod inbound;
mod listener;
mod message;
mod originate;
mod outbound;
mod reply;

pub mod error;

pub use broadcast::Subscription;
pub use connection::Connection;
pub use error::{EslError, Result};
pub use event::EventMessage;
pub use inbound::{Inbound, InboundOptions};
pub use listener::{Listener, ListenerOptions};
pub use message::{content_type, BasicMessage};
pub use originate::{OriginateOptions, OriginateOutcome, OriginateResult};
pub use outbound::OutboundConnection;
pub use reply::{ApiResponse, BackgroundJobResult, CommandReply};
