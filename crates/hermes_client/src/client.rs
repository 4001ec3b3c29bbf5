//! Streaming session client: owns the chat socket, turns backend frames into
//! [`FrameHandler`] callbacks and reconnects a bounded number of times.
//!
//! A single driver task owns the socket, the reconnect timer and the handler,
//! so frames and commands are processed strictly one at a time. When the
//! socket is not open, questions go through the REST fallback instead.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::api::BackendApi;
use crate::config::Settings;
use crate::connection::{CloseOutcome, ConnectionMachine, ConnectionState};
use crate::error::ClientError;
use crate::messages::{is_incremental, QueryMessage, ServerFrame, MODE_CHAT};

/// Shown when the REST fallback returns an empty answer.
pub const NO_ANSWER: &str = "Συγγνώμη, δεν μπόρεσα να επεξεργαστώ την ερώτηση.";

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Callbacks for one turn's frames. Invoked from the driver task, one at a time.
pub trait FrameHandler: Send + 'static {
    fn on_sources(&mut self, sources: Vec<String>, mode: Option<String>);
    /// `mode` is already resolved: a token without its own mode carries the
    /// mode of the turn's `sources` frame.
    fn on_token(&mut self, content: String, mode: Option<String>);
    fn on_done(&mut self) {}
    fn on_error(&mut self, error: ClientError);

    /// Complete answer from the REST fallback. By default it is replayed as
    /// sources (when there are any), one token and done.
    fn on_answer(&mut self, sources: Vec<String>, content: String, mode: Option<String>) {
        if !sources.is_empty() {
            self.on_sources(sources, mode.clone());
        }
        self.on_token(content, mode);
        self.on_done();
    }
}

/// Observable client state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    pub state: ConnectionState,
    pub is_connected: bool,
    pub is_loading: bool,
    /// `None` until a probe or connect attempt settles it. `Some(false)` is
    /// the persistent offline signal.
    pub backend_available: Option<bool>,
    pub reconnect_attempts: u32,
}

impl Default for ClientStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            is_connected: false,
            is_loading: false,
            backend_available: None,
            reconnect_attempts: 0,
        }
    }
}

impl ClientStatus {
    /// Startup finished: connected, waiting to retry, or known offline.
    pub fn is_settled(&self) -> bool {
        self.is_connected
            || self.state == ConnectionState::ReconnectPending
            || self.backend_available == Some(false)
    }

    pub fn is_offline(&self) -> bool {
        self.backend_available == Some(false)
    }
}

#[derive(Debug)]
enum Command {
    Send(String),
    Stop,
    Reconnect,
    Dispose,
}

/// Handle to the driver task. Dropping it shuts the connection down.
pub struct StreamingClient {
    commands: mpsc::UnboundedSender<Command>,
    status_tx: Arc<watch::Sender<ClientStatus>>,
    status_rx: watch::Receiver<ClientStatus>,
    task: Option<JoinHandle<()>>,
}

impl StreamingClient {
    /// Start the driver: probe health (if enabled), then open the socket.
    /// Must be called from within a tokio runtime.
    pub fn spawn<H: FrameHandler>(settings: Settings, handler: H) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ClientStatus::default());
        let status_tx = Arc::new(status_tx);
        let driver = Driver {
            api: BackendApi::from_settings(&settings),
            machine: ConnectionMachine::new(
                settings.max_reconnect_attempts,
                settings.reconnect_backoff,
            ),
            settings,
            handler,
            socket: None,
            commands: commands_rx,
            backlog: VecDeque::new(),
            status: status_tx.clone(),
            reconnect_at: None,
            turn: Turn::default(),
        };
        let task = tokio::spawn(driver.run());
        Self {
            commands: commands_tx,
            status_tx,
            status_rx,
            task: Some(task),
        }
    }

    pub fn status(&self) -> ClientStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientStatus> {
        self.status_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status_rx.borrow().is_connected
    }

    pub fn is_loading(&self) -> bool {
        self.status_rx.borrow().is_loading
    }

    pub fn backend_available(&self) -> Option<bool> {
        self.status_rx.borrow().backend_available
    }

    /// Wait until `f` holds for the current status.
    pub async fn wait_for(
        &self,
        f: impl FnMut(&ClientStatus) -> bool,
    ) -> Result<ClientStatus, ClientError> {
        let mut rx = self.status_rx.clone();
        let status = rx.wait_for(f).await.map_err(|_| ClientError::Disposed)?;
        Ok(status.clone())
    }

    /// Queue a question. Loading turns on immediately; the driver sends it over
    /// the socket when open, otherwise through `POST /api/query`.
    pub fn send_message(&self, question: &str) -> Result<(), ClientError> {
        self.status_tx.send_modify(|s| s.is_loading = true);
        self.commands
            .send(Command::Send(question.to_string()))
            .map_err(|_| {
                self.status_tx.send_modify(|s| s.is_loading = false);
                ClientError::Disposed
            })
    }

    /// Cancel the current turn. Loading clears now; the socket stays open.
    pub fn stop_generation(&self) -> Result<(), ClientError> {
        self.status_tx.send_modify(|s| s.is_loading = false);
        self.commands
            .send(Command::Stop)
            .map_err(|_| ClientError::Disposed)
    }

    /// Caller-triggered reconnect. Works even after the automatic cap was hit.
    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.commands
            .send(Command::Reconnect)
            .map_err(|_| ClientError::Disposed)
    }

    /// Close the socket and wait for the driver to finish.
    pub async fn dispose(mut self) {
        let _ = self.commands.send(Command::Dispose);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "streaming driver ended abnormally");
            }
        }
    }
}

impl Drop for StreamingClient {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Dispose);
    }
}

/// Per-turn bookkeeping inside the driver.
#[derive(Debug, Default)]
struct Turn {
    /// Mode announced by the turn's `sources` frame.
    mode: Option<String>,
    /// A question went out on the socket and no `done`/`error` came back yet.
    in_flight: bool,
    /// Cancelled turns whose trailing frames must still be swallowed.
    suppressed: u32,
}

enum Event {
    Command(Option<Command>),
    Socket(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
    ReconnectDue,
}

struct Driver<H> {
    settings: Settings,
    api: BackendApi,
    handler: H,
    machine: ConnectionMachine,
    socket: Option<WsStream>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Commands that arrived while a REST fallback was in flight.
    backlog: VecDeque<Command>,
    status: Arc<watch::Sender<ClientStatus>>,
    reconnect_at: Option<Instant>,
    turn: Turn,
}

async fn next_message(
    socket: &mut Option<WsStream>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match socket {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

impl<H: FrameHandler> Driver<H> {
    async fn run(mut self) {
        self.startup().await;
        loop {
            if let Some(cmd) = self.backlog.pop_front() {
                if !self.handle_command(cmd).await {
                    break;
                }
                continue;
            }
            let deadline = self.reconnect_at.unwrap_or_else(Instant::now);
            let event = tokio::select! {
                cmd = self.commands.recv() => Event::Command(cmd),
                msg = next_message(&mut self.socket), if self.socket.is_some() => Event::Socket(msg),
                _ = tokio::time::sleep_until(deadline), if self.reconnect_at.is_some() => Event::ReconnectDue,
            };
            match event {
                // Every handle is gone.
                Event::Command(None) => break,
                Event::Command(Some(cmd)) => {
                    if !self.handle_command(cmd).await {
                        break;
                    }
                }
                Event::Socket(msg) => self.handle_socket(msg),
                Event::ReconnectDue => {
                    self.reconnect_at = None;
                    self.connect().await;
                }
            }
        }
        self.release_socket().await;
        self.publish();
        debug!("streaming driver stopped");
    }

    async fn startup(&mut self) {
        if self.settings.health_check && !self.api.health().await {
            warn!(api_url = %self.api.base_url(), "backend health probe failed, staying offline");
            self.machine.mark_unavailable();
            self.publish();
            return;
        }
        self.connect().await;
    }

    fn publish(&self) {
        let machine = &self.machine;
        self.status.send_modify(|s| {
            s.state = machine.state();
            s.is_connected = machine.is_connected();
            s.backend_available = machine.backend_available();
            s.reconnect_attempts = machine.attempts();
        });
    }

    fn set_loading(&self, loading: bool) {
        self.status.send_if_modified(|s| {
            let changed = s.is_loading != loading;
            s.is_loading = loading;
            changed
        });
    }

    async fn connect(&mut self) {
        if !self.machine.open_requested() {
            debug!("reconnect cap reached, not connecting");
            self.publish();
            return;
        }
        self.publish();
        let url = self.settings.chat_socket_url();
        let handshake = tokio::time::timeout(
            self.settings.connect_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await;
        match handshake {
            Ok(Ok((ws, _))) => {
                info!(%url, "chat socket connected");
                self.socket = Some(ws);
                self.machine.opened();
            }
            Ok(Err(e)) => {
                warn!(%url, error = %ClientError::from(e), "chat socket handshake failed");
                self.machine.errored();
                self.after_close(false);
            }
            Err(_) => {
                warn!(%url, timeout = ?self.settings.connect_timeout, "chat socket handshake timed out");
                self.machine.errored();
                self.after_close(false);
            }
        }
        self.publish();
    }

    fn after_close(&mut self, initiated_by_client: bool) {
        match self.machine.closed(initiated_by_client) {
            CloseOutcome::Reconnect { attempt, delay } => {
                info!(attempt, ?delay, "scheduling reconnect");
                self.reconnect_at = Some(Instant::now() + delay);
            }
            CloseOutcome::Exhausted { attempts } => {
                let error = ClientError::ReconnectExhausted { attempts };
                warn!(%error, "giving up on chat socket");
                self.reconnect_at = None;
            }
            CloseOutcome::Stopped => {}
        }
    }

    /// Close the current socket, if any, without counting it as a failure.
    async fn release_socket(&mut self) {
        if let Some(mut ws) = self.socket.take() {
            self.machine.close_requested();
            if let Err(e) = ws.close(None).await {
                debug!(error = %e, "close handshake failed");
            }
            self.machine.closed(true);
            self.abandon_turn(None);
        }
    }

    /// Drop turn state after the socket went away. Reports the loss to the
    /// handler when a live turn was cut off.
    fn abandon_turn(&mut self, lost: Option<ClientError>) {
        let cut_off = self.turn.in_flight;
        self.turn = Turn::default();
        if cut_off {
            if let Some(error) = lost {
                self.handler.on_error(error);
            }
            self.set_loading(false);
        }
    }

    fn connection_lost(&mut self, reason: String) {
        warn!(%reason, "chat socket lost");
        self.socket = None;
        self.abandon_turn(Some(ClientError::ConnectionLost(reason)));
        self.after_close(false);
        self.publish();
    }

    fn handle_socket(&mut self, msg: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>) {
        match msg {
            Some(Ok(Message::Text(text))) => match ServerFrame::parse(&text) {
                Ok(frame) => self.dispatch(frame),
                Err(e) => warn!(error = %e, "ignoring malformed frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "server closed chat socket");
                self.connection_lost("closed by server".into());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                self.machine.errored();
                self.connection_lost(e.to_string());
            }
            None => self.connection_lost("stream ended".into()),
        }
    }

    fn dispatch(&mut self, frame: ServerFrame) {
        if self.turn.suppressed > 0 {
            if matches!(frame, ServerFrame::Done | ServerFrame::Error(_)) {
                self.turn.suppressed -= 1;
            }
            debug!(?frame, "dropping frame of cancelled turn");
            return;
        }
        match frame {
            ServerFrame::Sources { sources, mode } => {
                self.turn.mode = mode.clone();
                self.handler.on_sources(sources, mode);
            }
            ServerFrame::Token { content, mode } => {
                let mode = mode.or_else(|| self.turn.mode.clone());
                let incremental = is_incremental(mode.as_deref());
                self.handler.on_token(content, mode);
                // A snapshot token is the whole answer.
                if !incremental {
                    self.set_loading(false);
                }
            }
            ServerFrame::Done => {
                self.turn.in_flight = false;
                self.handler.on_done();
                self.set_loading(false);
            }
            ServerFrame::Error(message) => {
                self.turn.in_flight = false;
                self.handler.on_error(ClientError::BackendFrame(message));
                self.set_loading(false);
            }
            ServerFrame::Unknown(typ) => debug!(frame_type = %typ, "ignoring unknown frame"),
        }
    }

    /// Returns false when the driver should stop.
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Send(question) => self.send(question).await,
            Command::Stop => self.stop(),
            Command::Reconnect => {
                info!("reconnect requested");
                self.reconnect_at = None;
                self.release_socket().await;
                self.machine.reconnect_requested();
                self.connect().await;
            }
            Command::Dispose => return false,
        }
        true
    }

    /// Close the live turn client-side; its remaining frames up to its
    /// `done`/`error` are swallowed.
    fn retire_turn(&mut self) {
        if self.turn.in_flight {
            self.turn.in_flight = false;
            self.turn.suppressed += 1;
        }
        self.turn.mode = None;
    }

    fn stop(&mut self) {
        self.retire_turn();
        self.set_loading(false);
    }

    async fn send(&mut self, question: String) {
        // A snapshot token ends loading before the backend's `done`.
        self.retire_turn();
        if let Some(ws) = self.socket.as_mut() {
            let payload = match serde_json::to_string(&QueryMessage::new(&question)) {
                Ok(p) => p,
                Err(e) => {
                    self.handler.on_error(e.into());
                    self.set_loading(false);
                    return;
                }
            };
            match ws.send(Message::Text(payload)).await {
                Ok(()) => {
                    debug!("question sent on chat socket");
                    self.turn.in_flight = true;
                    return;
                }
                Err(e) => {
                    self.machine.errored();
                    self.connection_lost(e.to_string());
                }
            }
        }
        self.fallback(question).await;
    }

    /// One-shot REST call, handed to the handler as one complete answer.
    /// A stop or dispose arriving meanwhile drops the request.
    async fn fallback(&mut self, question: String) {
        info!("chat socket not open, using REST fallback");
        let api = self.api.clone();
        let request = async move { api.query(&question).await };
        tokio::pin!(request);
        let result = loop {
            tokio::select! {
                r = &mut request => break Some(r),
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Stop) => {
                        debug!("fallback request cancelled");
                        break None;
                    }
                    Some(Command::Dispose) | None => {
                        self.backlog.push_back(Command::Dispose);
                        break None;
                    }
                    Some(other) => self.backlog.push_back(other),
                },
            }
        };
        match result {
            Some(Ok(resp)) => {
                let sources = resp.source_names();
                let mode = resp.mode.clone().unwrap_or_else(|| MODE_CHAT.into());
                let answer = if resp.answer.trim().is_empty() {
                    NO_ANSWER.to_string()
                } else {
                    resp.answer
                };
                self.handler.on_answer(sources, answer, Some(mode));
            }
            Some(Err(e)) => {
                warn!(error = %e, "REST fallback failed");
                let error = if self.machine.backend_available() == Some(false) {
                    ClientError::BackendUnavailable(e.to_string())
                } else {
                    e
                };
                self.handler.on_error(error);
            }
            None => {}
        }
        self.set_loading(false);
    }
}
