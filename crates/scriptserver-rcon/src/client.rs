//! RCON client with a queued, rate-limited command channel
//!
//! All connection state lives in one actor task. [`RconClient`] handles only
//! send messages to it, so the queue, the pending-request table and the
//! connection state are never touched from two places at once.
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Connected -> Disconnected
//! ```

use crate::codec::{
    AUTH_FAILED_ID, AUTH_REQUEST_ID, EXEC_REQUEST_ID_BASE, FrameBuffer, PacketType, RconPacket,
    packet_type,
};
use crate::pending::{PendingRequests, Responder};
use scriptserver_core::{RconConfig, Result, ScriptServerError};
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, warn};

const READ_CHUNK_LEN: usize = 4096;

/// Connection lifecycle of an [`RconClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
}

/// Lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RconEvent {
    /// A connection attempt started
    Connecting,
    /// Authentication succeeded; commands will now be dispatched
    Connected,
    /// The connection closed, failed, or was rejected
    Disconnected,
}

/// Messages from handles to the actor
enum Command {
    Connect,
    Submit {
        command: String,
        responder: Responder,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
}

/// Messages from connection tasks to the actor, tagged with the
/// connection generation they belong to
enum Inbound {
    Opened { generation: u64, stream: TcpStream },
    OpenFailed { generation: u64, error: io::Error },
    Packet { generation: u64, packet: RconPacket },
    Closed { generation: u64, error: Option<String> },
}

/// A command waiting in the dispatch queue
struct QueuedCommand {
    command: String,
    responder: Responder,
}

/// Handle to the RCON client actor. Cheap to clone; the actor shuts down when
/// the last handle is dropped.
#[derive(Clone)]
pub struct RconClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<RconEvent>,
}

impl RconClient {
    /// Create a client and spawn its actor. Must be called from within a
    /// Tokio runtime. No connection is made until [`RconClient::connect`].
    ///
    /// Fails with [`ScriptServerError::Config`] when `config` has a zero
    /// dispatch interval.
    pub fn new(config: RconConfig) -> Result<Self> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(64);

        let actor = Actor {
            config,
            state: ConnectionState::Disconnected,
            state_tx,
            events: event_tx.clone(),
            queue: VecDeque::new(),
            pending: PendingRequests::default(),
            last_request_id: EXEC_REQUEST_ID_BASE,
            generation: 0,
            writer: None,
            reader: None,
            opener: None,
            inbound_tx,
        };
        tokio::spawn(actor.run(command_rx, inbound_rx));

        Ok(Self {
            commands: command_tx,
            state: state_rx,
            events: event_tx,
        })
    }

    /// Start connecting. Ignored unless currently disconnected.
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Queue a command. The returned future resolves with the server's
    /// response once the command has been dispatched and answered.
    ///
    /// Commands are sent in the order `submit` is called, whether or not the
    /// returned futures are polled.
    pub fn submit(&self, command: impl Into<String>) -> ResponseFuture {
        let (responder, response) = oneshot::channel();
        let _ = self.commands.send(Command::Submit {
            command: command.into(),
            responder,
        });
        ResponseFuture { response }
    }

    /// Close the connection. Every queued or in-flight command fails with
    /// [`ScriptServerError::Disconnected`] before this returns.
    pub async fn disconnect(&self) {
        let (done, wait) = oneshot::channel();
        if self.commands.send(Command::Disconnect { done }).is_ok() {
            let _ = wait.await;
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<RconEvent> {
        self.events.subscribe()
    }
}

/// Response to a submitted command
#[derive(Debug)]
pub struct ResponseFuture {
    response: oneshot::Receiver<Result<String>>,
}

impl Future for ResponseFuture {
    type Output = Result<String>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.response)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(ScriptServerError::Disconnected)))
    }
}

struct Actor {
    config: RconConfig,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<RconEvent>,
    /// Commands not yet dispatched, oldest first
    queue: VecDeque<QueuedCommand>,
    /// Dispatched commands awaiting a response
    pending: PendingRequests,
    last_request_id: i32,
    /// Bumped whenever a connection is torn down so late messages from its
    /// tasks are ignored
    generation: u64,
    writer: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
    opener: Option<JoinHandle<()>>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut inbound: mpsc::UnboundedReceiver<Inbound>,
    ) {
        let mut ticker = interval(self.config.buffer());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All RCON handles dropped, client task exiting");
                        self.teardown().await;
                        break;
                    }
                },

                Some(message) = inbound.recv() => self.handle_inbound(message).await,

                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.start_connect(),
            Command::Submit { command, responder } => {
                debug!("RCON queued: {}", command);
                self.queue.push_back(QueuedCommand { command, responder });
            }
            Command::Disconnect { done } => {
                self.teardown().await;
                let _ = done.send(());
            }
        }
    }

    fn start_connect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            debug!("RCON connect ignored in state {:?}", self.state);
            return;
        }

        self.generation += 1;
        self.set_state(ConnectionState::Connecting);
        let _ = self.events.send(RconEvent::Connecting);

        let address = self.config.address();
        info!("Connecting to RCON at {}", address);
        self.opener = Some(tokio::spawn(open_with_retry(
            address,
            self.config.retry_delay(),
            self.generation,
            self.inbound_tx.clone(),
        )));
    }

    async fn handle_inbound(&mut self, message: Inbound) {
        match message {
            Inbound::Opened { generation, stream } if generation == self.generation => {
                self.opener = None;
                let (read, write) = stream.into_split();
                self.writer = Some(write);
                self.reader = Some(tokio::spawn(read_packets(
                    read,
                    generation,
                    self.inbound_tx.clone(),
                )));

                let auth = RconPacket::new(AUTH_REQUEST_ID, PacketType::Auth, &self.config.password);
                match self.write_packet(&auth).await {
                    Ok(()) => self.set_state(ConnectionState::Authenticating),
                    Err(e) => {
                        error!("RCON auth send failed: {}", e);
                        self.teardown().await;
                    }
                }
            }
            Inbound::OpenFailed { generation, error } if generation == self.generation => {
                self.opener = None;
                error!("RCON connect to {} failed: {}", self.config.address(), error);
                self.teardown().await;
            }
            Inbound::Packet { generation, packet } if generation == self.generation => {
                self.handle_packet(packet).await;
            }
            Inbound::Closed { generation, error } if generation == self.generation => {
                match error {
                    Some(error) => warn!("RCON connection lost: {}", error),
                    None => info!("RCON connection closed by server"),
                }
                self.reader = None;
                self.teardown().await;
            }
            _ => debug!("Ignoring message from a previous RCON connection"),
        }
    }

    async fn handle_packet(&mut self, packet: RconPacket) {
        match packet.packet_type {
            packet_type::AUTH_RESPONSE if self.state == ConnectionState::Authenticating => {
                if packet.request_id == AUTH_REQUEST_ID {
                    info!("RCON authenticated successfully");
                    self.set_state(ConnectionState::Connected);
                    let _ = self.events.send(RconEvent::Connected);
                } else if packet.request_id == AUTH_FAILED_ID {
                    error!("RCON authentication failed: wrong password");
                    self.teardown().await;
                } else {
                    error!(
                        "RCON auth response ID mismatch: expected {}, got {}",
                        AUTH_REQUEST_ID, packet.request_id
                    );
                    self.teardown().await;
                }
            }
            packet_type::RESPONSE_VALUE => {
                let id = packet.request_id;
                if self.pending.resolve(id, packet.body) {
                    debug!("RCON response for request {}", id);
                } else {
                    debug!("Discarding RCON response for unknown request {}", id);
                }
            }
            _ => warn!("Unknown RCON packet: {:?}", packet),
        }
    }

    /// One dispatch step: expire stale requests, then send at most one
    /// queued command
    async fn tick(&mut self) {
        let timeout = self.config.request_timeout();
        for id in self.pending.expire(timeout) {
            warn!("RCON request {} timed out after {:?}", id, timeout);
        }

        if self.state != ConnectionState::Connected {
            return;
        }

        // Skip commands whose caller already gave up
        let next = loop {
            match self.queue.pop_front() {
                Some(queued) if queued.responder.is_closed() => continue,
                other => break other,
            }
        };
        let Some(queued) = next else {
            return;
        };

        let request_id = self.next_request_id();
        let packet = RconPacket::new(request_id, PacketType::ExecCommand, &queued.command);
        self.pending.insert(request_id, queued.responder);
        debug!(
            "RCON exec {}: {} ({} in flight)",
            request_id,
            queued.command,
            self.pending.len()
        );
        if let Err(e) = self.write_packet(&packet).await {
            error!("RCON send failed: {}", e);
            self.teardown().await;
        }
    }

    fn next_request_id(&mut self) -> i32 {
        self.last_request_id = self
            .last_request_id
            .checked_add(1)
            .unwrap_or(EXEC_REQUEST_ID_BASE + 1);
        self.last_request_id
    }

    async fn write_packet(&mut self, packet: &RconPacket) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ScriptServerError::Rcon("RCON not connected".to_string()))?;
        writer.write_all(&packet.to_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Close the socket, stop connection tasks, and fail every queued and
    /// pending command
    async fn teardown(&mut self) {
        self.generation += 1;

        if let Some(opener) = self.opener.take() {
            opener.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }

        let queued = self.queue.len();
        for entry in self.queue.drain(..) {
            let _ = entry.responder.send(Err(ScriptServerError::Disconnected));
        }
        let in_flight = self.pending.reject_all();
        if queued + in_flight > 0 {
            warn!(
                "RCON dropped {} queued and {} in-flight commands",
                queued, in_flight
            );
        }

        if self.state != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected);
            let _ = self.events.send(RconEvent::Disconnected);
            info!("RCON disconnected");
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        debug!("RCON state {:?} -> {:?}", self.state, state);
        self.state = state;
        self.state_tx.send_replace(state);
    }
}

/// Open the socket, retrying for as long as the server refuses connections
async fn open_with_retry(
    address: String,
    retry_delay: Duration,
    generation: u64,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    loop {
        match TcpStream::connect(&address).await {
            Ok(stream) => {
                let _ = inbound.send(Inbound::Opened { generation, stream });
                return;
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                warn!(
                    "RCON connection to {} refused, retrying in {:?}",
                    address, retry_delay
                );
                sleep(retry_delay).await;
            }
            Err(error) => {
                let _ = inbound.send(Inbound::OpenFailed { generation, error });
                return;
            }
        }
    }
}

/// Background reader task: reassembles frames and forwards packets
async fn read_packets(
    mut read: OwnedReadHalf,
    generation: u64,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    let mut frames = FrameBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK_LEN];

    let error = 'read: loop {
        let len = match read.read(&mut chunk).await {
            Ok(0) => break None,
            Ok(len) => len,
            Err(e) => break Some(e.to_string()),
        };

        frames.extend(&chunk[..len]);
        loop {
            match frames.next_packet() {
                Ok(Some(packet)) => {
                    if inbound.send(Inbound::Packet { generation, packet }).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => break 'read Some(e.to_string()),
            }
        }
    };

    let _ = inbound.send(Inbound::Closed { generation, error });
}
