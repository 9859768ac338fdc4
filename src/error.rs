//! The error taxonomy of this crate.
//!
//! Mirrors the shape of the teacher's `BillingError`: one `thiserror`-derived
//! enum, `#[from]` conversions for the transport boundary, and a crate-wide
//! `Result` alias. Unlike `BillingError` this type has no `ResponseError`
//! impl — there's no HTTP surface to report through.

use thiserror::Error;

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, EslError>;

/// Errors surfaced by the ESL client.
#[derive(Error, Debug)]
pub enum EslError {
    /// A frame violated the wire protocol in a way the connection cannot
    /// recover from (truncated body, missing event header terminator, an
    /// unsolicited `auth/request` that never arrived, ...).
    #[error("ESL protocol error: {0}")]
    Protocol(String),

    /// `auth` was rejected by the server.
    #[error("ESL authentication failed: {0}")]
    Auth(String),

    /// The underlying TCP connection failed or was reset.
    #[error("ESL transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The operation was issued after the connection had already been
    /// disposed, or the connection was disposed while the operation was
    /// outstanding.
    #[error("ESL connection is closed")]
    Disposed,
}
