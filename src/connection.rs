//! The shared dispatch core every inbound and outbound socket runs on top
//! of: write serialization, the command/API reply FIFOs, job and
//! execute-completion correlation maps, and the single reader task that
//! drives all of it.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::broadcast::{FanoutHandle, Subscription};
use crate::error::{EslError, Result};
use crate::event::EventMessage;
use crate::message::{content_type, BasicMessage, Framer, ParseOutcome};
use crate::reply::{ApiResponse, BackgroundJobResult, CommandReply};

type ExecuteKey = (String, String);

struct Dispatch {
    writer: OwnedWriteHalf,
    command_fifo: VecDeque<oneshot::Sender<BasicMessage>>,
    api_fifo: VecDeque<oneshot::Sender<BasicMessage>>,
}

struct Shared {
    dispatch: Mutex<Dispatch>,
    job_waiters: Mutex<HashMap<String, oneshot::Sender<EventMessage>>>,
    execute_waiters: Mutex<HashMap<ExecuteKey, oneshot::Sender<EventMessage>>>,
    events: FanoutHandle<EventMessage>,
    messages: FanoutHandle<BasicMessage>,
    cancel: CancellationToken,
    disposed: AtomicBool,
    peer_addr: SocketAddr,
}

/// One ESL socket, inbound or outbound: a single TCP connection plus the
/// correlation state that lets many concurrent callers share it safely.
///
/// Cheaply cloneable — every clone talks to the same underlying socket
/// and observes the same events.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

/// A non-owning handle to a [`Connection`].
#[derive(Clone)]
pub(crate) struct WeakConnection(std::sync::Weak<Shared>);

impl WeakConnection {
    pub(crate) fn upgrade(&self) -> Option<Connection> {
        self.0.upgrade().map(|shared| Connection { shared })
    }
}

impl Connection {
    /// Wrap an established TCP stream, starting its reader task. Returns
    /// the connection plus a subscription to its raw-message stream,
    /// created before the reader task is spawned so a caller that needs
    /// to observe the very first frame (the inbound `auth/request`
    /// greeting, for instance) cannot miss it to a scheduling race.
    pub(crate) fn spawn(stream: TcpStream) -> Result<(Connection, Subscription<BasicMessage>)> {
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        let (events, _) = FanoutHandle::new();
        let (messages, messages_bootstrap) = FanoutHandle::new();

        let shared = Arc::new(Shared {
            dispatch: Mutex::new(Dispatch {
                writer: write_half,
                command_fifo: VecDeque::new(),
                api_fifo: VecDeque::new(),
            }),
            job_waiters: Mutex::new(HashMap::new()),
            execute_waiters: Mutex::new(HashMap::new()),
            events,
            messages,
            cancel: CancellationToken::new(),
            disposed: AtomicBool::new(false),
            peer_addr,
        });

        let conn = Connection { shared };
        tokio::spawn(run_reader(conn.clone(), read_half));
        Ok((conn, messages_bootstrap))
    }

    /// The peer's socket address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer_addr
    }

    /// A weak handle that does not keep this connection's resources
    /// alive. Used by [`crate::listener::Listener`] to track its live
    /// connections without preventing their collection once the peer
    /// closes.
    pub(crate) fn downgrade(&self) -> WeakConnection {
        WeakConnection(Arc::downgrade(&self.shared))
    }

    /// True once the connection has been disposed (peer close, transport
    /// error, disconnect notice, or explicit [`Connection::close`]).
    pub fn is_closed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    /// Explicitly dispose the connection: trips the cancellation token,
    /// fails every pending request, and completes the events/messages
    /// streams. Idempotent.
    pub async fn close(&self) {
        self.terminate().await;
    }

    /// Subscribe to every `text/event-plain` frame this connection
    /// receives, parsed into an [`EventMessage`].
    pub fn events(&self) -> Subscription<EventMessage> {
        self.shared.events.subscribe()
    }

    /// Subscribe to every frame this connection receives, unparsed.
    pub fn messages(&self) -> Subscription<BasicMessage> {
        self.shared.messages.subscribe()
    }

    /// `auth <password>`.
    pub async fn auth(&self, password: &str) -> Result<CommandReply> {
        self.send_command(format!("auth {password}")).await
    }

    /// Write `text`, await the next `command/reply` frame in FIFO order.
    pub async fn send_command(&self, text: impl Into<String>) -> Result<CommandReply> {
        let msg = self.send_command_raw(&text.into()).await?;
        Ok(CommandReply::from_message(&msg))
    }

    /// `api <text>`, await the next `api/response` frame in FIFO order.
    pub async fn send_api(&self, text: impl Into<String>) -> Result<ApiResponse> {
        let full = format!("api {}", text.into());
        let rx = self.write_tracked_api(&full).await?;
        let msg = rx.await.map_err(|_| EslError::Disposed)?;
        Ok(ApiResponse::from_message(&msg))
    }

    /// `bgapi <command> [arg]`, correlated by `Job-UUID` to the eventual
    /// `BACKGROUND_JOB` event. A fresh job id is minted if `job_id` is
    /// `None`. Tolerates the `BACKGROUND_JOB` event and the synchronous
    /// dispatch-failure reply arriving in either order.
    pub async fn bg_api(
        &self,
        command: &str,
        arg: Option<&str>,
        job_id: Option<String>,
    ) -> Result<BackgroundJobResult> {
        let job_id = job_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let (job_tx, job_rx) = oneshot::channel();
        self.shared.job_waiters.lock().await.insert(job_id.clone(), job_tx);

        let text = match arg {
            Some(arg) => format!("bgapi {command} {arg}\nJob-UUID: {job_id}"),
            None => format!("bgapi {command}\nJob-UUID: {job_id}"),
        };

        let cmd_rx = match self.write_tracked_command(&text).await {
            Ok(rx) => rx,
            Err(e) => {
                self.shared.job_waiters.lock().await.remove(&job_id);
                return Err(e);
            }
        };

        tokio::pin!(cmd_rx);
        tokio::pin!(job_rx);
        let mut cmd_done = false;
        loop {
            tokio::select! {
                biased;
                result = &mut cmd_rx, if !cmd_done => {
                    cmd_done = true;
                    match result {
                        Ok(msg) => {
                            let reply = CommandReply::from_message(&msg);
                            if !reply.is_ok() {
                                self.shared.job_waiters.lock().await.remove(&job_id);
                                return Ok(BackgroundJobResult::from_dispatch_failure(
                                    job_id,
                                    reply.text().to_string(),
                                ));
                            }
                            // Dispatch accepted; only the BACKGROUND_JOB event
                            // can resolve this call now.
                        }
                        Err(_) => {
                            self.shared.job_waiters.lock().await.remove(&job_id);
                            return Err(EslError::Disposed);
                        }
                    }
                }
                result = &mut job_rx => {
                    return match result {
                        Ok(event) => Ok(BackgroundJobResult::from_event(event)),
                        Err(_) => Err(EslError::Disposed),
                    };
                }
            }
        }
    }

    /// `sendmsg <uuid>` executing `app_name` with `app_arg`, resolving
    /// with the matching `CHANNEL_EXECUTE_COMPLETE` event. The
    /// synchronous `command/reply` this also provokes is drained through
    /// the shared command FIFO but otherwise ignored.
    pub async fn execute_app(&self, uuid: &str, app_name: &str, app_arg: &str) -> Result<EventMessage> {
        let key = (uuid.to_string(), app_name.to_string());
        let (tx, rx) = oneshot::channel();
        self.shared.execute_waiters.lock().await.insert(key.clone(), tx);

        let text = format!(
            "sendmsg {uuid}\ncall-command: execute\nexecute-app-name: {app_name}\nexecute-app-arg: {app_arg}"
        );

        if let Err(e) = self.write_tracked_command(&text).await {
            self.shared.execute_waiters.lock().await.remove(&key);
            return Err(e);
        }

        rx.await.map_err(|_| EslError::Disposed)
    }

    /// Remove a pending `BACKGROUND_JOB` waiter without resolving it, used
    /// by `Originate` to abandon the bgapi correlation once a qualifying
    /// channel event has already decided the outcome.
    pub(crate) async fn cancel_job_waiter(&self, job_id: &str) {
        self.shared.job_waiters.lock().await.remove(job_id);
    }

    pub(crate) async fn send_command_raw(&self, text: &str) -> Result<BasicMessage> {
        let rx = self.write_tracked_command(text).await?;
        rx.await.map_err(|_| EslError::Disposed)
    }

    /// Push a receiver into the command FIFO and write `text\n\n` as a
    /// single atomic step, returning the receiver without awaiting it so
    /// callers that don't need the synchronous reply (`ExecuteApp`) don't
    /// have to block on it.
    async fn write_tracked_command(&self, text: &str) -> Result<oneshot::Receiver<BasicMessage>> {
        let (tx, rx) = oneshot::channel();
        let write_result = {
            if self.shared.disposed.load(Ordering::SeqCst) {
                return Err(EslError::Disposed);
            }
            let mut dispatch = self.shared.dispatch.lock().await;
            dispatch.command_fifo.push_back(tx);
            write_frame(&mut dispatch.writer, text).await
        };
        if let Err(e) = write_result {
            self.terminate().await;
            return Err(EslError::from(e));
        }
        Ok(rx)
    }

    async fn write_tracked_api(&self, text: &str) -> Result<oneshot::Receiver<BasicMessage>> {
        let (tx, rx) = oneshot::channel();
        let write_result = {
            if self.shared.disposed.load(Ordering::SeqCst) {
                return Err(EslError::Disposed);
            }
            let mut dispatch = self.shared.dispatch.lock().await;
            dispatch.api_fifo.push_back(tx);
            write_frame(&mut dispatch.writer, text).await
        };
        if let Err(e) = write_result {
            self.terminate().await;
            return Err(EslError::from(e));
        }
        Ok(rx)
    }

    /// Classify and route one parsed frame to whichever FIFO, waiter map,
    /// or broadcast it belongs to. An event frame whose body doesn't parse
    /// (a nested body truncated short of its declared `Content-Length`,
    /// for instance) is a protocol violation, not a resynchronizable
    /// framing hiccup, so it terminates the connection instead of being
    /// dropped.
    async fn dispatch_frame(&self, msg: BasicMessage) {
        self.shared.messages.publish(msg.clone());

        match msg.content_type() {
            Some(content_type::COMMAND_REPLY) => {
                let mut dispatch = self.shared.dispatch.lock().await;
                if let Some(tx) = dispatch.command_fifo.pop_front() {
                    let _ = tx.send(msg);
                } else {
                    warn!("command/reply with no pending command request");
                }
            }
            Some(content_type::API_RESPONSE) => {
                let mut dispatch = self.shared.dispatch.lock().await;
                if let Some(tx) = dispatch.api_fifo.pop_front() {
                    let _ = tx.send(msg);
                } else {
                    warn!("api/response with no pending api request");
                }
            }
            Some(content_type::EVENT_PLAIN) => {
                match EventMessage::parse(&msg) {
                    Ok(event) => self.route_event(event).await,
                    Err(e) => {
                        warn!(error = %e, "malformed event frame, terminating connection");
                        self.terminate().await;
                    }
                }
            }
            Some(content_type::LOG_DATA) => {
                debug!(?msg, "received log/data frame");
            }
            other => {
                debug!(?other, "received frame of unrouted content-type");
            }
        }
    }

    async fn route_event(&self, event: EventMessage) {
        if event.event_name().as_deref() == Some("BACKGROUND_JOB") {
            if let Some(job_uuid) = event.header("Job-UUID") {
                if let Some(tx) = self.shared.job_waiters.lock().await.remove(job_uuid) {
                    let _ = tx.send(event.clone());
                }
            }
        } else if event.event_name().as_deref() == Some("CHANNEL_EXECUTE_COMPLETE") {
            if let (Some(uuid), Some(app)) = (event.uuid(), event.header("Application")) {
                let key = (uuid.to_string(), app.to_string());
                if let Some(tx) = self.shared.execute_waiters.lock().await.remove(&key) {
                    let _ = tx.send(event.clone());
                }
            }
        }
        self.shared.events.publish(event);
    }

    /// Idempotent teardown: drains both FIFOs and every waiter map
    /// (resolving every pending future with [`EslError::Disposed`]),
    /// shuts down the write half, and completes the events/messages
    /// streams.
    pub(crate) async fn terminate(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.cancel.cancel();
        {
            let mut dispatch = self.shared.dispatch.lock().await;
            dispatch.command_fifo.clear();
            dispatch.api_fifo.clear();
            let _ = dispatch.writer.shutdown().await;
        }
        self.shared.job_waiters.lock().await.clear();
        self.shared.execute_waiters.lock().await.clear();
        self.shared.events.close();
        self.shared.messages.close();
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, text: &str) -> std::io::Result<()> {
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\n\n").await
}

async fn run_reader(conn: Connection, mut read_half: OwnedReadHalf) {
    let mut framer = Framer::new();
    let mut buf = [0u8; 8192];

    loop {
        tokio::select! {
            biased;
            _ = conn.shared.cancel.cancelled() => break,
            result = read_half.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        if framer.has_pending() {
                            warn!("connection closed mid-frame");
                        }
                        break;
                    }
                    Ok(n) => {
                        framer.extend(&buf[..n]);
                        if !drain_frames(&conn, &mut framer).await {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "ESL transport read error");
                        break;
                    }
                }
            }
        }
    }

    conn.terminate().await;
}

/// Drain every frame currently buffered. Returns `false` if a
/// `text/disconnect-notice` ended the session, or a dispatched frame
/// terminated the connection (a malformed event body), and the reader
/// should stop.
async fn drain_frames(conn: &Connection, framer: &mut Framer) -> bool {
    loop {
        match framer.parse_next() {
            ParseOutcome::Frame(msg) => {
                if msg.content_type() == Some(content_type::DISCONNECT_NOTICE) {
                    conn.shared.messages.publish(msg);
                    return false;
                }
                conn.dispatch_frame(msg).await;
                if conn.is_closed() {
                    return false;
                }
            }
            ParseOutcome::Rejected(reason) => {
                warn!(reason, "rejected malformed ESL frame, resynchronizing");
            }
            ParseOutcome::NeedMoreData => return true,
        }
    }
}
