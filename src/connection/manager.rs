//! Live connection manager
//!
//! Owns the single persistent WebSocket channel to the CareLink server and
//! keeps it alive on the dashboard's behalf:
//! - automatic reconnection with exponential backoff
//! - ping/pong liveness detection
//! - fan-out of inbound frames and state transitions to registered observers
//!
//! The manager never interprets payloads beyond the `"type"` discriminator;
//! view collaborators decide what an event means.

use std::sync::Arc;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Error as WsError, Message as WsMessage,
    },
};
use tracing::{debug, error, info, warn};

use crate::connection::endpoint::EndpointResolver;
use crate::connection::listeners::{ListenerId, ListenerSet};
use crate::error::{Error, Result};
use crate::protocol::{ClientMessage, Envelope, EventKind};

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for the live connection manager
#[derive(Debug, Clone)]
pub struct LiveClientConfig {
    /// How long one open attempt may take before it counts as failed
    pub connect_timeout: Duration,

    /// Liveness probe period while connected
    pub heartbeat_interval: Duration,

    /// Deadline for a liveness response; must exceed the probe period
    pub heartbeat_timeout: Duration,

    /// Automatic reconnect budget before the manager gives up
    pub max_reconnect_attempts: u32,

    /// First reconnect delay; doubles on every consecutive failure
    pub initial_reconnect_delay: Duration,

    /// Reconnect delay cap
    pub max_reconnect_delay: Duration,

    /// Command channel depth between the handle and the connection task
    pub command_queue_size: usize,
}

impl Default for LiveClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(35),
            max_reconnect_attempts: 10,
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            command_queue_size: 32,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Connection State
// ─────────────────────────────────────────────────────────────────

/// Connection state as reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; initial state and the result of a clean shutdown
    Disconnected,
    /// An open attempt is in flight
    Connecting,
    /// Channel is established and the heartbeat is armed
    Connected,
    /// A transport failure was observed; a reconnect decision follows
    Error,
    /// The automatic reconnect budget is used up; only an explicit
    /// `connect` leaves this state
    Exhausted,
}

impl ConnectionState {
    /// The label handed to connection-state observers
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
            ConnectionState::Exhausted => "exhausted",
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One state transition, as delivered to connection-state observers
#[derive(Debug, Clone)]
pub struct StateChange {
    /// The state entered
    pub state: ConnectionState,

    /// Consecutive failed (re)connect attempts at the time of the change
    pub attempt: u32,

    /// Detail from the originating event, when there is one
    pub reason: Option<String>,
}

// ─────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────

/// Requests from the handle to the connection task
enum Command {
    /// Write one serialized frame if currently connected
    Send {
        text: String,
        ack: oneshot::Sender<bool>,
    },

    /// Cancel any pending reconnect delay and dial immediately
    ConnectNow {
        path: String,
        reply: oneshot::Sender<Result<()>>,
    },

    /// Close cleanly and stop reconnecting
    Disconnect { reply: oneshot::Sender<()> },
}

/// How a connected session ended
enum SessionEnd {
    /// Our own clean shutdown; `reply` is answered once state settles
    Closed { reply: Option<oneshot::Sender<()>> },
    /// Server closed with the clean-shutdown code; no reconnect
    ServerClose { reason: Option<String> },
    /// Unexpected close or end of stream; reconnect decision follows
    Dropped { reason: String },
    /// Transport failure or liveness timeout; reconnect decision follows
    Failed { reason: String },
}

// ─────────────────────────────────────────────────────────────────
// Shared Core
// ─────────────────────────────────────────────────────────────────

/// State shared between the handle and the connection task.
///
/// Written only by the owning task at transition boundaries, so the state
/// a reader observes is never ahead of the notifications already sent.
struct ClientCore {
    config: LiveClientConfig,
    resolver: Arc<dyn EndpointResolver>,
    state: RwLock<ConnectionState>,
    state_listeners: ListenerSet<StateChange>,
    message_listeners: ListenerSet<Envelope>,
}

impl ClientCore {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Record a transition and notify observers. Same-state writes are
    /// not transitions and produce no notification.
    fn set_state(&self, state: ConnectionState, attempt: u32, reason: Option<String>) {
        {
            let mut current = self.state.write();
            if *current == state {
                return;
            }
            *current = state;
        }
        debug!(state = %state, attempt, "connection state changed");
        self.state_listeners.notify(&StateChange {
            state,
            attempt,
            reason,
        });
    }
}

/// Channel + task for one connect/reconnect lifecycle
struct SessionHandle {
    command_tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

// ─────────────────────────────────────────────────────────────────
// Live Client
// ─────────────────────────────────────────────────────────────────

/// Handle to the live connection manager.
///
/// Cheap to clone; all clones drive the same underlying connection. The
/// handle is constructed explicitly and passed to whoever needs it;
/// there is no ambient singleton.
#[derive(Clone)]
pub struct LiveClient {
    core: Arc<ClientCore>,
    session: Arc<Mutex<Option<SessionHandle>>>,
}

enum ConnectAction {
    AlreadyActive,
    Started(oneshot::Receiver<Result<()>>),
    Retry(mpsc::Sender<Command>),
}

impl LiveClient {
    /// Create a manager from a config and an endpoint resolver
    pub fn new(config: LiveClientConfig, resolver: Arc<dyn EndpointResolver>) -> Self {
        Self {
            core: Arc::new(ClientCore {
                config,
                resolver,
                state: RwLock::new(ConnectionState::Disconnected),
                state_listeners: ListenerSet::new(),
                message_listeners: ListenerSet::new(),
            }),
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Open the channel at `path` (resolved per attempt by the endpoint
    /// resolver).
    ///
    /// Idempotent: a call while connecting or connected is a no-op
    /// success and never opens a second transport. A call while a
    /// reconnect is pending cancels the delay, resets the failure
    /// counter, and dials immediately. Completes once the first open
    /// attempt is confirmed or rejected; recovery from later drops is
    /// autonomous.
    pub async fn connect(&self, path: &str) -> Result<()> {
        loop {
            let action = {
                let mut session = self.session.lock();
                match session.as_ref() {
                    Some(existing) if !existing.task.is_finished() => match self.core.state() {
                        ConnectionState::Connected | ConnectionState::Connecting => {
                            ConnectAction::AlreadyActive
                        }
                        _ => ConnectAction::Retry(existing.command_tx.clone()),
                    },
                    _ => {
                        let (first_tx, first_rx) = oneshot::channel();
                        let (command_tx, command_rx) =
                            mpsc::channel(self.core.config.command_queue_size);
                        let task = tokio::spawn(run_loop(
                            self.core.clone(),
                            path.to_string(),
                            command_rx,
                            first_tx,
                        ));
                        *session = Some(SessionHandle { command_tx, task });
                        ConnectAction::Started(first_rx)
                    }
                }
            };

            match action {
                ConnectAction::AlreadyActive => return Ok(()),
                ConnectAction::Started(first_rx) => {
                    return first_rx.await.unwrap_or_else(|_| {
                        Err(Error::Connection(
                            "connection task exited before completing the connect".to_string(),
                        ))
                    });
                }
                ConnectAction::Retry(command_tx) => {
                    let (reply_tx, reply_rx) = oneshot::channel();
                    let sent = command_tx
                        .send(Command::ConnectNow {
                            path: path.to_string(),
                            reply: reply_tx,
                        })
                        .await
                        .is_ok();
                    if sent {
                        if let Ok(result) = reply_rx.await {
                            return result;
                        }
                    }
                    // The task raced to completion under us; drop the
                    // stale handle and start fresh.
                    {
                        let mut session = self.session.lock();
                        let finished = session
                            .as_ref()
                            .map(|s| s.task.is_finished())
                            .unwrap_or(false);
                        if finished {
                            *session = None;
                        }
                    }
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// Close the channel with the clean-shutdown code and cancel any
    /// pending reconnect. Safe from any state, idempotent, and always
    /// leaves the manager disconnected.
    pub async fn disconnect(&self) {
        let session = { self.session.lock().take() };
        match session {
            Some(existing) => {
                let (reply_tx, reply_rx) = oneshot::channel();
                let sent = existing
                    .command_tx
                    .send(Command::Disconnect { reply: reply_tx })
                    .await
                    .is_ok();
                if sent {
                    let _ = reply_rx.await;
                } else {
                    // Task already finished (clean close or exhaustion).
                    self.core.set_state(ConnectionState::Disconnected, 0, None);
                }
                let _ = existing.task.await;
            }
            None => {
                self.core.set_state(ConnectionState::Disconnected, 0, None);
            }
        }
    }

    /// Serialize `payload` and write it, only if currently connected.
    ///
    /// Returns whether the frame was written. Never queues: a send while
    /// not connected is a reported no-op.
    pub async fn send<T: Serialize>(&self, payload: &T) -> bool {
        if !self.is_connected() {
            debug!("send skipped: not connected");
            return false;
        }
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "send skipped: payload is not serializable");
                return false;
            }
        };
        let command_tx = {
            self.session
                .lock()
                .as_ref()
                .map(|existing| existing.command_tx.clone())
        };
        let command_tx = match command_tx {
            Some(tx) => tx,
            None => return false,
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if command_tx
            .send(Command::Send { text, ack: ack_tx })
            .await
            .is_err()
        {
            return false;
        }
        ack_rx.await.unwrap_or(false)
    }

    /// Register a connection-state observer
    pub fn add_state_listener(
        &self,
        callback: impl Fn(&StateChange) + Send + Sync + 'static,
    ) -> ListenerId {
        self.core.state_listeners.add(callback)
    }

    /// Remove a connection-state observer
    pub fn remove_state_listener(&self, id: ListenerId) -> bool {
        self.core.state_listeners.remove(id)
    }

    /// Register a message observer
    pub fn add_message_listener(
        &self,
        callback: impl Fn(&Envelope) + Send + Sync + 'static,
    ) -> ListenerId {
        self.core.message_listeners.add(callback)
    }

    /// Remove a message observer
    pub fn remove_message_listener(&self, id: ListenerId) -> bool {
        self.core.message_listeners.remove(id)
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    /// True iff the channel is established
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The manager's configuration
    pub fn config(&self) -> &LiveClientConfig {
        &self.core.config
    }
}

#[cfg(test)]
impl LiveClient {
    /// Test-only: fan an envelope out exactly as the session task does
    pub(crate) fn notify_message(&self, envelope: &Envelope) {
        self.core.message_listeners.notify(envelope);
    }

    /// Test-only: fan a state change out exactly as the session task does
    pub(crate) fn notify_state(&self, change: &StateChange) {
        self.core.state_listeners.notify(change);
    }
}

// ─────────────────────────────────────────────────────────────────
// Connection Loop
// ─────────────────────────────────────────────────────────────────

/// Build the reconnect delay policy: deterministic doubling from the
/// initial delay up to the cap, no jitter.
fn reconnect_backoff(config: &LiveClientConfig) -> ExponentialBackoff {
    let mut policy = ExponentialBackoff {
        initial_interval: config.initial_reconnect_delay,
        max_interval: config.max_reconnect_delay,
        multiplier: 2.0,
        randomization_factor: 0.0,
        max_elapsed_time: None,
        ..Default::default()
    };
    policy.reset();
    policy
}

/// Outer connect/reconnect loop; one spawned task per lifecycle
async fn run_loop(
    core: Arc<ClientCore>,
    mut path: String,
    mut command_rx: mpsc::Receiver<Command>,
    first_reply: oneshot::Sender<Result<()>>,
) {
    let config = core.config.clone();
    let mut connect_waiter = Some(first_reply);
    let mut failures: u32 = 0;
    let mut backoff = reconnect_backoff(&config);

    loop {
        core.set_state(ConnectionState::Connecting, failures, None);

        let endpoint = match core.resolver.resolve(&path) {
            Ok(url) => url,
            Err(e) => {
                error!(path = %path, error = %e, "endpoint resolution failed");
                core.set_state(ConnectionState::Error, failures, Some(e.to_string()));
                if let Some(reply) = connect_waiter.take() {
                    let _ = reply.send(Err(e));
                }
                core.set_state(ConnectionState::Disconnected, failures, None);
                if !wait_before_retry(
                    &core,
                    &config,
                    &mut command_rx,
                    &mut failures,
                    &mut backoff,
                    &mut connect_waiter,
                    &mut path,
                )
                .await
                {
                    return;
                }
                continue;
            }
        };

        info!(url = %endpoint, attempt = failures, "connecting to live event channel");

        match tokio::time::timeout(config.connect_timeout, connect_async(endpoint.clone())).await {
            Ok(Ok((ws_stream, _response))) => {
                info!("live event channel established");
                failures = 0;
                backoff.reset();
                core.set_state(ConnectionState::Connected, 0, None);
                if let Some(reply) = connect_waiter.take() {
                    let _ = reply.send(Ok(()));
                }

                let (write, read) = ws_stream.split();
                let end = run_session(&core, &config, write, read, &mut command_rx).await;

                match end {
                    SessionEnd::Closed { reply } => {
                        core.set_state(
                            ConnectionState::Disconnected,
                            0,
                            Some("client disconnect".to_string()),
                        );
                        if let Some(reply) = reply {
                            let _ = reply.send(());
                        }
                        return;
                    }
                    SessionEnd::ServerClose { reason } => {
                        info!(reason = ?reason, "server closed the channel cleanly");
                        core.set_state(ConnectionState::Disconnected, 0, reason);
                        return;
                    }
                    SessionEnd::Dropped { reason } => {
                        warn!(reason = %reason, "channel dropped unexpectedly");
                        core.set_state(ConnectionState::Disconnected, failures, Some(reason));
                    }
                    SessionEnd::Failed { reason } => {
                        warn!(reason = %reason, "transport failure");
                        core.set_state(ConnectionState::Error, failures, Some(reason));
                        core.set_state(ConnectionState::Disconnected, failures, None);
                    }
                }
            }
            Ok(Err(e)) => {
                error!(url = %endpoint, error = %e, "failed to open live event channel");
                core.set_state(ConnectionState::Error, failures, Some(e.to_string()));
                if let Some(reply) = connect_waiter.take() {
                    let _ = reply.send(Err(Error::connection_failed(
                        endpoint.as_str(),
                        e.to_string(),
                    )));
                }
                core.set_state(ConnectionState::Disconnected, failures, None);
            }
            Err(_) => {
                error!(
                    url = %endpoint,
                    timeout_secs = config.connect_timeout.as_secs(),
                    "connect attempt timed out"
                );
                core.set_state(
                    ConnectionState::Error,
                    failures,
                    Some("connect timeout".to_string()),
                );
                if let Some(reply) = connect_waiter.take() {
                    let _ = reply.send(Err(Error::connection_timeout(
                        endpoint.as_str(),
                        config.connect_timeout.as_secs(),
                    )));
                }
                core.set_state(ConnectionState::Disconnected, failures, None);
            }
        }

        if !wait_before_retry(
            &core,
            &config,
            &mut command_rx,
            &mut failures,
            &mut backoff,
            &mut connect_waiter,
            &mut path,
        )
        .await
        {
            return;
        }
    }
}

/// Apply the reconnect decision after a failed attempt or a drop.
///
/// Returns whether the loop should dial again. The delay races the
/// command channel so `disconnect` and an explicit `connect` cancel it
/// instead of leaving a second attempt in flight.
async fn wait_before_retry(
    core: &ClientCore,
    config: &LiveClientConfig,
    command_rx: &mut mpsc::Receiver<Command>,
    failures: &mut u32,
    backoff: &mut ExponentialBackoff,
    connect_waiter: &mut Option<oneshot::Sender<Result<()>>>,
    path: &mut String,
) -> bool {
    if *failures >= config.max_reconnect_attempts {
        error!(
            attempts = *failures,
            "reconnect budget used up; giving up until an explicit connect"
        );
        core.set_state(ConnectionState::Exhausted, *failures, None);
        return false;
    }

    let delay = backoff.next_backoff().unwrap_or(config.max_reconnect_delay);
    *failures += 1;
    info!(
        delay_ms = delay.as_millis() as u64,
        attempt = *failures,
        "waiting before reconnection"
    );

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => return true,

            cmd = command_rx.recv() => match cmd {
                Some(Command::ConnectNow { path: new_path, reply }) => {
                    *path = new_path;
                    *failures = 0;
                    backoff.reset();
                    *connect_waiter = Some(reply);
                    return true;
                }
                Some(Command::Disconnect { reply }) => {
                    let _ = reply.send(());
                    return false;
                }
                Some(Command::Send { ack, .. }) => {
                    let _ = ack.send(false);
                }
                None => return false,
            },
        }
    }
}

/// Drive one established connection until it ends
async fn run_session<S, R>(
    core: &ClientCore,
    config: &LiveClientConfig,
    mut write: S,
    mut read: R,
    command_rx: &mut mpsc::Receiver<Command>,
) -> SessionEnd
where
    S: SinkExt<WsMessage, Error = WsError> + Unpin,
    R: StreamExt<Item = std::result::Result<WsMessage, WsError>> + Unpin,
{
    // Both liveness timers live in this scope: leaving the session tears
    // them down, entering it arms them fresh, so timers never stack
    // across reconnects.
    let mut probe_timer = tokio::time::interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    probe_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let liveness = tokio::time::sleep(config.heartbeat_timeout);
    tokio::pin!(liveness);

    loop {
        tokio::select! {
            _ = probe_timer.tick() => {
                let frame = match ClientMessage::Ping.to_json() {
                    Ok(frame) => frame,
                    Err(e) => {
                        return SessionEnd::Failed {
                            reason: format!("cannot encode liveness probe: {}", e),
                        };
                    }
                };
                // Outbound probes are ours alone; observers only ever see
                // inbound frames.
                if let Err(e) = write.send(WsMessage::Text(frame)).await {
                    return SessionEnd::Failed {
                        reason: format!("failed to send liveness probe: {}", e),
                    };
                }
                debug!("liveness probe sent");
            }

            () = &mut liveness => {
                warn!(
                    timeout_ms = config.heartbeat_timeout.as_millis() as u64,
                    "no liveness response in time; forcing the channel closed"
                );
                // Dropping the transport here skips the close handshake.
                return SessionEnd::Failed { reason: "liveness timeout".to_string() };
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(envelope) = dispatch_frame(core, Envelope::parse(&text)) {
                            if envelope.event() == EventKind::Pong {
                                liveness.as_mut().reset(Instant::now() + config.heartbeat_timeout);
                                debug!("liveness response observed");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        if let Some(envelope) = dispatch_frame(core, Envelope::parse_bytes(&data)) {
                            if envelope.event() == EventKind::Pong {
                                liveness.as_mut().reset(Instant::now() + config.heartbeat_timeout);
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if let Err(e) = write.send(WsMessage::Pong(data)).await {
                            return SessionEnd::Failed { reason: e.to_string() };
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        // Transport-level pong; liveness uses the JSON pair
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let clean = frame
                            .as_ref()
                            .map(|f| f.code == CloseCode::Normal)
                            .unwrap_or(false);
                        let reason = frame.map(|f| format!("{} ({})", f.reason, u16::from(f.code)));
                        if clean {
                            return SessionEnd::ServerClose { reason };
                        }
                        return SessionEnd::Dropped {
                            reason: reason.unwrap_or_else(|| {
                                "connection closed without a close frame".to_string()
                            }),
                        };
                    }
                    Some(Err(e)) => {
                        return SessionEnd::Failed { reason: e.to_string() };
                    }
                    None => {
                        return SessionEnd::Dropped { reason: "event stream ended".to_string() };
                    }
                    _ => {}
                }
            }

            cmd = command_rx.recv() => {
                match cmd {
                    Some(Command::Send { text, ack }) => {
                        match write.send(WsMessage::Text(text)).await {
                            Ok(()) => {
                                let _ = ack.send(true);
                            }
                            Err(e) => {
                                let _ = ack.send(false);
                                return SessionEnd::Failed { reason: e.to_string() };
                            }
                        }
                    }
                    Some(Command::ConnectNow { reply, .. }) => {
                        // Already connected; the request is a no-op success.
                        let _ = reply.send(Ok(()));
                    }
                    Some(Command::Disconnect { reply }) => {
                        let close = WsMessage::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client disconnect".into(),
                        }));
                        if let Err(e) = write.send(close).await {
                            debug!(error = %e, "close frame not delivered");
                        }
                        return SessionEnd::Closed { reply: Some(reply) };
                    }
                    None => {
                        // Every handle is gone; close politely and stop.
                        let close = WsMessage::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client dropped".into(),
                        }));
                        let _ = write.send(close).await;
                        return SessionEnd::Closed { reply: None };
                    }
                }
            }
        }
    }
}

/// Parse one inbound frame and fan it out.
///
/// Malformed frames are dropped with a local warning; observers never see
/// them and the session keeps running. Returns the envelope so the caller
/// can apply liveness handling after delivery.
fn dispatch_frame(core: &ClientCore, parsed: Result<Envelope>) -> Option<Envelope> {
    match parsed {
        Ok(envelope) => {
            core.message_listeners.notify(&envelope);
            Some(envelope)
        }
        Err(e) => {
            warn!(error = %e, "dropping malformed frame");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
