//! The outbound driver: the `connect` handshake and channel-data
//! hydration for a socket FreeSWITCH itself dialed.

use std::ops::Deref;

use tokio::sync::OnceCell;

use crate::connection::Connection;
use crate::error::{EslError, Result};
use crate::event::EventMessage;

/// A connection accepted from FreeSWITCH's outbound socket. `connect()`
/// must be called once before the channel data is available; the result
/// is cached, so later calls are free.
#[derive(Clone)]
pub struct OutboundConnection {
    conn: Connection,
    channel_data: std::sync::Arc<OnceCell<EventMessage>>,
}

impl Deref for OutboundConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl OutboundConnection {
    pub(crate) fn new(conn: Connection) -> Self {
        Self {
            conn,
            channel_data: std::sync::Arc::new(OnceCell::new()),
        }
    }

    /// Complete the `connect` handshake, hydrating and caching the
    /// `CHANNEL_DATA` event this outbound socket was opened for.
    /// Subsequent calls return the cached value without writing again.
    pub async fn connect(&self) -> Result<EventMessage> {
        self.channel_data
            .get_or_try_init(|| async {
                let msg = self.conn.send_command_raw("connect").await?;
                EventMessage::from_command_reply(&msg).ok_or_else(|| {
                    EslError::Protocol(
                        "connect reply carried no Event-Name header".to_string(),
                    )
                })
            })
            .await
            .map(|event| event.clone())
    }

    /// Instruct FreeSWITCH to keep this socket alive past channel hangup.
    pub async fn linger(&self) -> Result<()> {
        self.conn.send_command("linger").await?;
        Ok(())
    }

    /// Undo [`OutboundConnection::linger`].
    pub async fn no_linger(&self) -> Result<()> {
        self.conn.send_command("nolinger").await?;
        Ok(())
    }
}
