//! The outbound-mode accept loop: binds a port, accepts FreeSWITCH's
//! socket-per-call connections, completes the `connect` handshake on
//! each, and publishes the hydrated [`OutboundConnection`].

use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broadcast::{FanoutHandle, Subscription};
use crate::connection::{Connection, WeakConnection};
use crate::error::Result;
use crate::outbound::OutboundConnection;

/// Configuration for [`Listener::bind`].
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Port to bind; `0` picks any free port.
    pub port: u16,
    /// Interface to bind. Defaults to all interfaces.
    pub host: String,
}

impl ListenerOptions {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            host: "0.0.0.0".to_string(),
        }
    }
}

struct Shared {
    local_addr: std::net::SocketAddr,
    connections: FanoutHandle<OutboundConnection>,
    live: Mutex<Vec<WeakConnection>>,
    cancel: CancellationToken,
}

/// Accepts outbound ESL sockets from FreeSWITCH.
///
/// Disposing the listener stops accepting new connections, completes the
/// connection stream, and disposes every connection still live. A
/// connection that has already closed on its own is held only weakly, so
/// it is collected regardless of whether the listener ever disposes.
pub struct Listener {
    shared: Arc<Shared>,
}

impl Listener {
    /// Bind `options.host:options.port` and start the accept loop.
    pub async fn bind(options: ListenerOptions) -> Result<Self> {
        let addr = format!("{}:{}", options.host, options.port);
        let tcp_listener = TcpListener::bind(&addr).await?;
        let local_addr = tcp_listener.local_addr()?;

        let (connections, _) = FanoutHandle::new();
        let shared = Arc::new(Shared {
            local_addr,
            connections,
            live: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        });

        info!(addr = %local_addr, "ESL outbound listener bound");
        tokio::spawn(run_accept_loop(shared.clone(), tcp_listener));

        Ok(Self { shared })
    }

    /// The bound address — useful to read back the ephemeral port chosen
    /// when `options.port` was `0`.
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.shared.local_addr
    }

    /// Subscribe to the stream of accepted, handshake-complete connections.
    pub fn accept(&self) -> Subscription<OutboundConnection> {
        self.shared.connections.subscribe()
    }

    /// Stop accepting, complete the connection stream, and dispose every
    /// connection still live. Idempotent.
    pub async fn close(&self) {
        self.shared.cancel.cancel();
        self.shared.connections.close();
        let live: Vec<_> = std::mem::take(&mut *self.shared.live.lock().unwrap());
        for weak in live {
            if let Some(conn) = weak.upgrade() {
                conn.close().await;
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

async fn run_accept_loop(shared: Arc<Shared>, tcp_listener: TcpListener) {
    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            result = tcp_listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let shared = shared.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handshake_and_publish(&shared, stream).await {
                                warn!(peer = %peer, error = %e, "outbound handshake failed");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed on outbound listener");
                    }
                }
            }
        }
    }
}

async fn handshake_and_publish(shared: &Arc<Shared>, stream: tokio::net::TcpStream) -> Result<()> {
    let (conn, _bootstrap) = Connection::spawn(stream)?;
    let outbound = OutboundConnection::new(conn.clone());
    outbound.connect().await?;

    let mut live = shared.live.lock().unwrap();
    live.retain(|weak| weak.upgrade().is_some());
    live.push(conn.downgrade());
    drop(live);

    shared.connections.publish(outbound);
    Ok(())
}
