//! The inbound driver: dial FreeSWITCH, complete the `auth` handshake,
//! and orchestrate `originate`.

use std::ops::Deref;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::info;

use crate::connection::Connection;
use crate::error::{EslError, Result};
use crate::event::EventMessage;
use crate::message::content_type;
use crate::originate::{OriginateOptions, OriginateOutcome, OriginateResult};
use crate::reply::BackgroundJobResult;

/// Configuration for [`Inbound::connect`].
#[derive(Debug, Clone)]
pub struct InboundOptions {
    pub host: String,
    pub port: u16,
    pub password: String,
    /// How long to wait for the server's `auth/request` greeting before
    /// giving up.
    pub connect_timeout: Duration,
}

impl InboundOptions {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// An authenticated inbound ESL connection: the library dialed
/// FreeSWITCH and is now driving it.
#[derive(Clone)]
pub struct Inbound {
    conn: Connection,
}

impl Deref for Inbound {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Inbound {
    /// Dial `options.host:options.port` and complete the `auth` handshake.
    pub async fn connect(options: &InboundOptions) -> Result<Self> {
        let addr = format!("{}:{}", options.host, options.port);
        let stream = TcpStream::connect(&addr).await?;
        let (conn, mut greeting) = Connection::spawn(stream)?;

        let first = match timeout(options.connect_timeout, greeting.recv()).await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                conn.close().await;
                return Err(EslError::Disposed);
            }
            Err(_) => {
                conn.close().await;
                return Err(EslError::Protocol(
                    "timed out waiting for auth/request greeting".into(),
                ));
            }
        };

        if first.content_type() != Some(content_type::AUTH_REQUEST) {
            conn.close().await;
            return Err(EslError::Protocol(format!(
                "expected auth/request greeting, got {:?}",
                first.content_type()
            )));
        }

        let reply = conn.auth(&options.password).await?;
        if !reply.is_ok() {
            conn.close().await;
            return Err(EslError::Auth(reply.text().to_string()));
        }

        info!(addr = %addr, "authenticated to FreeSWITCH");
        Ok(Self { conn })
    }

    /// Place a new outbound call. Mints `options.uuid` if empty, issues
    /// `bgapi originate`, and races the first qualifying channel event
    /// against the `bgapi` job outcome: a dispatch failure arriving before
    /// any qualifying event fails the result, but a qualifying event wins
    /// even if the job later reports failure. Exactly one path resolves
    /// the result.
    pub async fn originate(
        &self,
        endpoint: &str,
        mut options: OriginateOptions,
        application: &str,
    ) -> Result<OriginateResult> {
        let uuid = options.ensure_uuid().to_string();
        let rendered = format!("{}{} &{}", options.render(), endpoint, application);
        let job_id = uuid::Uuid::new_v4().to_string();

        let mut events = self.conn.events();
        let return_ring_ready = options.return_ring_ready;
        let wait_uuid = uuid.clone();
        let event_fut = async move {
            loop {
                let event = events.recv().await?;
                if event.uuid() != Some(wait_uuid.as_str()) {
                    continue;
                }
                let qualifies = matches!(
                    event.event_name().as_deref(),
                    Some("CHANNEL_ANSWER") | Some("CHANNEL_HANGUP")
                ) || (return_ring_ready && event.event_name().as_deref() == Some("CHANNEL_PROGRESS"));
                if qualifies {
                    return Some(event);
                }
            }
        };
        tokio::pin!(event_fut);

        let bg_fut = self.conn.bg_api("originate", Some(&rendered), Some(job_id.clone()));
        tokio::pin!(bg_fut);

        let mut bg_done = false;
        loop {
            tokio::select! {
                biased;
                event = &mut event_fut => {
                    self.conn.cancel_job_waiter(&job_id).await;
                    let outcome = match event {
                        Some(event) => OriginateOutcome::Event(event),
                        None => OriginateOutcome::DispatchFailed(BackgroundJobResult::from_dispatch_failure(
                            job_id,
                            "connection closed before a channel event arrived".to_string(),
                        )),
                    };
                    return Ok(OriginateResult::new(uuid, outcome));
                }
                result = &mut bg_fut, if !bg_done => {
                    bg_done = true;
                    match result {
                        Ok(job) if !job.is_ok() => {
                            return Ok(OriginateResult::new(uuid, OriginateOutcome::DispatchFailed(job)));
                        }
                        Ok(_) => {
                            // Job dispatched/completed without error; only the
                            // qualifying channel event can resolve this now.
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// Execute a dialplan application on an existing channel.
    pub async fn originate_app(&self, uuid: &str, app_name: &str, app_arg: &str) -> Result<EventMessage> {
        self.conn.execute_app(uuid, app_name, app_arg).await
    }
}
