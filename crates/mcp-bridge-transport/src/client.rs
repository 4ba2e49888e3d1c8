//! Reconnecting client transport.
//!
//! Presents a conventional connect/send/close contract to the protocol
//! client layer and hides handshake, connection-loss detection and event
//! stream resumption behind it. The public handle talks to a driver task
//! over a command channel; the driver owns the bridge and runs an explicit
//! phase machine, so every transition is driven by a discrete event: a
//! command, an incoming message, a timer, or the cancellation signal.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use mcp_bridge_core::{BridgeResponse, ClientId, Envelope, EventId, PageMessage, is_jsonrpc_message};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backoff::ReconnectionOptions;
use crate::bridge::{ChannelBridge, ConnectOptions};

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Client identifier; minted when absent.
    pub client_id: Option<ClientId>,
    /// Handshake deadline.
    pub connection_timeout: Duration,
    /// Reconnection policy.
    pub reconnection: ReconnectionOptions,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            client_id: None,
            connection_timeout: Duration::from_secs(30),
            reconnection: ReconnectionOptions::default(),
        }
    }
}

/// Transport error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("server handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("transport closed by caller")]
    ClosedByCaller,
    #[error("transport already started")]
    AlreadyStarted,
    #[error("not connected and auto-reconnect is unavailable")]
    NotConnected,
    #[error("bridge channel closed")]
    ChannelClosed,
    #[error("transport is closed")]
    Closed,
}

/// Events delivered to the owner of the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A protocol message for the client layer.
    Message(Value),
    /// A transport-internal error; reconnection may still follow.
    Error(TransportError),
    /// Terminal closure, emitted exactly once.
    Closed,
}

/// Session identity learned from the handshake, plus the resumption
/// high-water mark.
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    pub session_id: Option<String>,
    pub server_instance_id: Option<String>,
    pub has_event_store: bool,
    pub stream_id: Option<String>,
    /// Monotonic; never decreases for the life of the instance.
    pub last_event_id: Option<EventId>,
}

struct Shared {
    connected: AtomicBool,
    info: Mutex<SessionInfo>,
}

enum Command {
    Start {
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Send {
        message: Value,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Reconnecting transport over a [`ChannelBridge`].
pub struct ExtensionClientTransport {
    client_id: ClientId,
    cmd_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl ExtensionClientTransport {
    /// Create a transport over `bridge` and spawn its driver task.
    ///
    /// Returns the handle and the upward event stream.
    #[must_use]
    pub fn new<B>(
        bridge: B,
        options: TransportOptions,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>)
    where
        B: ChannelBridge + 'static,
    {
        let client_id = options.client_id.clone().unwrap_or_else(ClientId::generate);
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            info: Mutex::new(SessionInfo::default()),
        });
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            bridge,
            client_id: client_id.clone(),
            options,
            shared: Arc::clone(&shared),
            cancel: CancellationToken::new(),
            cmd_rx,
            events_tx,
            phase: Phase::Idle,
            reconnect_attempt: 0,
            pending_connects: Vec::new(),
            pending_sends: Vec::new(),
            closed_emitted: false,
        };
        tokio::spawn(driver.run());

        (
            Self {
                client_id,
                cmd_tx,
                shared,
            },
            events_rx,
        )
    }

    /// The client identifier this transport connects as.
    #[must_use]
    pub const fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Whether the handshake has completed and the session is live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Snapshot of the session identity.
    #[must_use]
    pub fn session(&self) -> SessionInfo {
        self.shared.info.lock().unwrap().clone()
    }

    /// The resumption token, if any events have been seen.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.shared.info.lock().unwrap().last_event_id
    }

    /// Connect and perform the handshake.
    ///
    /// Resolves on the first `mcp-server-info`.
    ///
    /// # Errors
    /// Fails with [`TransportError::HandshakeTimeout`] when no handshake
    /// arrives within the connection timeout, or
    /// [`TransportError::ClosedByCaller`] when closed mid-handshake.
    pub async fn start(&self) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Start { reply })
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    /// Ship a protocol message.
    ///
    /// # Errors
    /// Fails with a connectivity error when disconnected and no transparent
    /// reconnect is possible; messages are never silently queued past one
    /// in-flight reconnect attempt.
    pub async fn send(&self, message: Value) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send { message, reply })
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    /// Close the transport. Terminal: pending connection attempts are
    /// rejected and the closure event fires exactly once.
    pub async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Close { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

/// Driver phases. `Reconnecting` exists only when a resumption token is
/// available; without one a connection error is terminal.
#[derive(Clone, Copy)]
enum Phase {
    Idle,
    Connecting { deadline: Instant },
    Connected,
    Reconnecting { at: Instant, resume: EventId },
    Closed,
}

enum Step {
    Cancelled,
    Command(Option<Command>),
    Incoming(Option<BridgeResponse>),
    TimerFired,
}

struct Driver<B> {
    bridge: B,
    client_id: ClientId,
    options: TransportOptions,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    phase: Phase,
    reconnect_attempt: u32,
    pending_connects: Vec<oneshot::Sender<Result<(), TransportError>>>,
    pending_sends: Vec<(Value, oneshot::Sender<Result<(), TransportError>>)>,
    closed_emitted: bool,
}

impl<B: ChannelBridge> Driver<B> {
    async fn run(mut self) {
        loop {
            let deadline = match self.phase {
                Phase::Connecting { deadline } => Some(deadline),
                Phase::Reconnecting { at, .. } => Some(at),
                _ => None,
            };
            // The bridge is only read while a connection is in flight or
            // established; in other phases incoming traffic waits.
            let poll_bridge = matches!(self.phase, Phase::Connecting { .. } | Phase::Connected);

            let step = tokio::select! {
                () = self.cancel.cancelled() => Step::Cancelled,
                cmd = self.cmd_rx.recv() => Step::Command(cmd),
                resp = self.bridge.recv(), if poll_bridge => Step::Incoming(resp),
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() => Step::TimerFired,
            };

            match step {
                Step::Cancelled | Step::Command(None) => {
                    self.finish_close(&TransportError::ClosedByCaller);
                }
                Step::Command(Some(cmd)) => self.handle_command(cmd),
                Step::Incoming(Some(resp)) => self.handle_response(resp),
                Step::Incoming(None) => self.handle_connection_error(&TransportError::ChannelClosed),
                Step::TimerFired => self.handle_timer(),
            }

            if matches!(self.phase, Phase::Closed) {
                break;
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { reply } => match self.phase {
                Phase::Idle => {
                    self.pending_connects.push(reply);
                    self.begin_connect(None);
                }
                Phase::Closed => {
                    let _ = reply.send(Err(TransportError::Closed));
                }
                _ => {
                    let _ = reply.send(Err(TransportError::AlreadyStarted));
                }
            },
            Command::Send { message, reply } => self.handle_send(message, reply),
            Command::Close { reply } => {
                self.cancel.cancel();
                self.finish_close(&TransportError::ClosedByCaller);
                let _ = reply.send(());
            }
        }
    }

    fn handle_send(&mut self, message: Value, reply: oneshot::Sender<Result<(), TransportError>>) {
        match self.phase {
            Phase::Connected => {
                if self.bridge.send(&self.client_id, message).is_ok() {
                    let _ = reply.send(Ok(()));
                } else {
                    let _ = reply.send(Err(TransportError::ChannelClosed));
                    self.handle_connection_error(&TransportError::ChannelClosed);
                }
            }
            Phase::Connecting { .. } => {
                // An attempt is already in flight; deliver once it lands.
                self.pending_sends.push((message, reply));
            }
            Phase::Reconnecting { resume, .. } => {
                // Auto-reconnect-on-send: skip the remaining backoff delay.
                tracing::debug!(client = %self.client_id, "not connected; reconnecting before send");
                self.pending_sends.push((message, reply));
                self.begin_connect(Some(resume));
            }
            Phase::Idle => {
                let _ = reply.send(Err(TransportError::NotConnected));
            }
            Phase::Closed => {
                let _ = reply.send(Err(TransportError::Closed));
            }
        }
    }

    fn begin_connect(&mut self, resume: Option<EventId>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let options = resume.map(|id| ConnectOptions {
            resume_from: Some(id),
        });
        if self.bridge.connect(&self.client_id, options).is_err() {
            self.handle_connection_error(&TransportError::ChannelClosed);
            return;
        }
        self.phase = Phase::Connecting {
            deadline: Instant::now() + self.options.connection_timeout,
        };
    }

    fn handle_response(&mut self, resp: BridgeResponse) {
        if resp.client_id != self.client_id {
            return;
        }

        match resp.msg {
            PageMessage::Envelope(Envelope::McpServerInfo {
                server_session_id,
                server_instance_id,
                has_event_store,
                stream_id,
            }) => {
                if !matches!(self.phase, Phase::Connecting { .. }) {
                    tracing::debug!("server info outside a handshake; ignoring");
                    return;
                }
                {
                    let mut info = self.shared.info.lock().unwrap();
                    info.session_id = Some(server_session_id);
                    info.server_instance_id = Some(server_instance_id);
                    info.has_event_store = has_event_store;
                    info.stream_id = stream_id;
                }
                self.shared.connected.store(true, Ordering::SeqCst);
                self.reconnect_attempt = 0;
                self.phase = Phase::Connected;
                tracing::debug!(client = %self.client_id, "handshake complete");

                for reply in self.pending_connects.drain(..) {
                    let _ = reply.send(Ok(()));
                }
                for (message, reply) in std::mem::take(&mut self.pending_sends) {
                    let result = self
                        .bridge
                        .send(&self.client_id, message)
                        .map_err(|_| TransportError::ChannelClosed);
                    let _ = reply.send(result);
                }
            }
            _ if !matches!(self.phase, Phase::Connected) => {
                // Handshake gate: only server info counts before Connected.
                tracing::warn!(
                    client = %self.client_id,
                    "non-handshake message before handshake completion; ignoring"
                );
            }
            PageMessage::Envelope(
                Envelope::McpEvent { event_id, message }
                | Envelope::McpReplayEvent { event_id, message },
            ) => {
                self.advance_event_id(event_id);
                if is_jsonrpc_message(&message) {
                    let _ = self.events_tx.send(TransportEvent::Message(message));
                } else {
                    tracing::warn!(%event_id, "event payload is not a protocol message; dropping");
                }
            }
            PageMessage::Passthrough(value) => {
                if is_jsonrpc_message(&value) {
                    let _ = self.events_tx.send(TransportEvent::Message(value));
                } else {
                    tracing::warn!("unrecognized message; dropping");
                }
            }
        }
    }

    /// Record the stream position, never moving it backwards.
    fn advance_event_id(&self, event_id: EventId) {
        let mut info = self.shared.info.lock().unwrap();
        if info.last_event_id.is_none_or(|current| event_id > current) {
            info.last_event_id = Some(event_id);
        }
    }

    fn handle_timer(&mut self) {
        match self.phase {
            Phase::Connecting { .. } => {
                tracing::warn!(client = %self.client_id, "server handshake timeout");
                self.handle_connection_error(&TransportError::HandshakeTimeout(
                    self.options.connection_timeout,
                ));
            }
            Phase::Reconnecting { resume, .. } => {
                // The delayed wakeup can race a close(); re-check first.
                if self.cancel.is_cancelled() {
                    return;
                }
                tracing::debug!(
                    client = %self.client_id,
                    attempt = self.reconnect_attempt,
                    "attempting reconnection"
                );
                self.begin_connect(Some(resume));
            }
            _ => {}
        }
    }

    fn handle_connection_error(&mut self, error: &TransportError) {
        self.shared.connected.store(false, Ordering::SeqCst);
        let _ = self.events_tx.send(TransportEvent::Error(error.clone()));

        for reply in self.pending_connects.drain(..) {
            let _ = reply.send(Err(error.clone()));
        }
        for (_, reply) in std::mem::take(&mut self.pending_sends) {
            let _ = reply.send(Err(error.clone()));
        }

        let token = self.shared.info.lock().unwrap().last_event_id;
        let eligible = !self.cancel.is_cancelled()
            && self.options.reconnection.max_retries > 0
            && self.reconnect_attempt < self.options.reconnection.max_retries;

        match token {
            Some(resume) if eligible => {
                let delay = self.options.reconnection.delay_for(self.reconnect_attempt);
                self.reconnect_attempt += 1;
                tracing::debug!(
                    client = %self.client_id,
                    attempt = self.reconnect_attempt,
                    ?delay,
                    "scheduling reconnection"
                );
                self.phase = Phase::Reconnecting {
                    at: Instant::now() + delay,
                    resume,
                };
            }
            _ => self.finish_close(error),
        }
    }

    fn finish_close(&mut self, error: &TransportError) {
        self.shared.connected.store(false, Ordering::SeqCst);
        for reply in self.pending_connects.drain(..) {
            let _ = reply.send(Err(error.clone()));
        }
        for (_, reply) in std::mem::take(&mut self.pending_sends) {
            let _ = reply.send(Err(error.clone()));
        }
        if !self.closed_emitted {
            self.closed_emitted = true;
            let _ = self.events_tx.send(TransportEvent::Closed);
        }
        self.phase = Phase::Closed;
    }
}
