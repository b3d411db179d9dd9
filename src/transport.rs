//! ESL transport: the wire-level collaborator the session drives.
//!
//! The [`Transport`]/[`Connector`] traits are the seam between the session's
//! queuing logic and the socket. [`TcpConnector`] is the production
//! implementation: a split reader/writer over TCP with a background reader
//! task that parses the ESL framing, routes command replies to the single
//! in-flight waiter, correlates `BACKGROUND_JOB` completions by `Job-UUID`,
//! and forwards everything else to the session's event channel.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::{
    command::{EslCommand, EslResponse},
    constants::{BACKGROUND_JOB_EVENT, HEADER_CONTENT_TYPE, MAX_EVENT_QUEUE_SIZE, SOCKET_BUF_SIZE},
    error::{EslError, EslResult},
    event::{EslEvent, EventFormat},
    protocol::{EslMessage, EslParser, MessageType},
    session::SessionConfig,
};

/// Wire-level operations the session needs from a live connection.
///
/// The production implementation is [`TcpTransport`]; tests substitute a
/// fake to exercise the session's queuing behavior without a switch.
pub trait Transport: Send + Sync + 'static {
    /// Execute an `api` command; the response arrives inline.
    fn send_inline(&self, command: &str) -> impl Future<Output = EslResult<EslResponse>> + Send;

    /// Execute a `bgapi` command; resolves with the job's result body once
    /// the matching `BACKGROUND_JOB` event arrives.
    fn send_background(&self, command: &str) -> impl Future<Output = EslResult<String>> + Send;

    /// Subscribe to the given event names (the full desired set).
    fn subscribe(&self, events: &[String]) -> impl Future<Output = EslResult<()>> + Send;

    /// Whether the connection is still alive.
    fn is_live(&self) -> bool;

    /// Tear the connection down.
    fn close(&self) -> impl Future<Output = EslResult<()>> + Send;
}

/// Establishes a [`Transport`] from session configuration.
pub trait Connector: Send + Sync + 'static {
    /// The transport this connector produces.
    type Transport: Transport;

    /// Open and authenticate a connection, returning the transport handle
    /// and the channel on which its events are delivered.
    fn connect(
        &self,
        config: &SessionConfig,
    ) -> impl Future<Output = EslResult<(Self::Transport, mpsc::Receiver<EslEvent>)>> + Send;
}

/// Connection status for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
enum TransportStatus {
    /// ESL session is active.
    Connected,
    /// ESL session ended.
    Disconnected(DisconnectReason),
}

/// Reason for disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
enum DisconnectReason {
    /// Server sent a text/disconnect-notice
    ServerNotice,
    /// TCP I/O error (io::Error is not Clone, so we store the message)
    IoError(String),
    /// Clean EOF on the TCP connection
    ConnectionClosed,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::ServerNotice => write!(f, "server sent disconnect notice"),
            DisconnectReason::IoError(msg) => write!(f, "I/O error: {}", msg),
            DisconnectReason::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

/// Establish a TCP connection with a timeout.
async fn tcp_connect_with_timeout(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> EslResult<TcpStream> {
    let timeout_ms = connect_timeout.as_millis() as u64;
    let tcp_result = timeout(connect_timeout, TcpStream::connect((host, port))).await;

    match tcp_result {
        Ok(Ok(s)) => {
            debug!("[CONNECT] TCP connection established");
            Ok(s)
        }
        Ok(Err(e)) => {
            warn!("[CONNECT] TCP connect failed: {}", e);
            Err(EslError::Io(e))
        }
        Err(_) => {
            warn!("[CONNECT] TCP connect timed out after {}ms", timeout_ms);
            Err(EslError::Timeout { timeout_ms })
        }
    }
}

/// Read a single ESL message from the unsplit stream during the handshake.
async fn recv_message(
    stream: &mut TcpStream,
    parser: &mut EslParser,
    read_buffer: &mut [u8],
    read_timeout: Duration,
) -> EslResult<EslMessage> {
    loop {
        if let Some(message) = parser.parse_message()? {
            trace!(
                "[RECV] Parsed message from buffer: {:?}",
                message.message_type
            );
            return Ok(message);
        }

        trace!("[RECV] Buffer needs more data, reading from socket");
        let read_result = timeout(read_timeout, stream.read(read_buffer)).await;

        let bytes_read = match read_result {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(EslError::Io(e)),
            Err(_) => {
                return Err(EslError::Timeout {
                    timeout_ms: read_timeout.as_millis() as u64,
                })
            }
        };

        trace!("[RECV] Read {} bytes from socket", bytes_read);
        if bytes_read == 0 {
            return Err(EslError::ConnectionClosed);
        }

        parser.add_data(&read_buffer[..bytes_read])?;
    }
}

/// Perform password authentication on the stream.
async fn authenticate(
    stream: &mut TcpStream,
    parser: &mut EslParser,
    read_buffer: &mut [u8],
    password: &str,
    handshake_timeout: Duration,
) -> EslResult<()> {
    debug!("[AUTH] Waiting for auth request from switch");
    let message = recv_message(stream, parser, read_buffer, handshake_timeout).await?;

    if message.message_type != MessageType::AuthRequest {
        return Err(EslError::protocol_error("Expected auth request"));
    }

    let auth_cmd = EslCommand::Auth {
        password: password.to_string(),
    };
    let command_str = auth_cmd.to_wire_format()?;
    debug!("Sending command: auth [REDACTED]");
    stream
        .write_all(command_str.as_bytes())
        .await
        .map_err(EslError::Io)?;

    let response_msg = recv_message(stream, parser, read_buffer, handshake_timeout).await?;
    let response = response_msg.into_response();

    if !response.is_success() {
        return Err(EslError::auth_failed(
            response
                .reply_text()
                .unwrap_or("Authentication failed")
                .to_string(),
        ));
    }

    debug!("Authentication successful");
    Ok(())
}

/// Background-job correlation table, keyed by Job-UUID.
///
/// A job's completion event can beat the waiter registration: the reader
/// may process the `BACKGROUND_JOB` event before the task that issued the
/// `bgapi` resumes from its reply. Results with no waiter are parked in
/// `unclaimed` and picked up at registration time. Both maps live under
/// one lock so the event and the registration cannot miss each other.
#[derive(Default)]
struct JobTable {
    waiters: HashMap<String, oneshot::Sender<String>>,
    unclaimed: HashMap<String, String>,
}

/// Shared state between the transport handle and the reader task
struct SharedState {
    /// Waiter for the single in-flight command reply
    pending_reply: Mutex<Option<oneshot::Sender<EslMessage>>>,
    /// Background-job waiters and early results
    jobs: Mutex<JobTable>,
    /// Command response timeout in milliseconds
    command_timeout_ms: AtomicU64,
}

/// Production transport over TCP.
///
/// Commands are serialized through the writer mutex, held through each
/// reply (ESL is a sequential request/response protocol). The reader task
/// routes replies to the pending oneshot channel and events to the
/// session's channel.
pub struct TcpTransport {
    writer: Mutex<OwnedWriteHalf>,
    shared: Arc<SharedState>,
    status_rx: watch::Receiver<TransportStatus>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("live", &self.is_live())
            .finish()
    }
}

/// Produces [`TcpTransport`] connections. The default connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(
        &self,
        config: &SessionConfig,
    ) -> EslResult<(TcpTransport, mpsc::Receiver<EslEvent>)> {
        info!("Connecting to switch at {}:{}", config.host, config.port);

        let mut stream =
            tcp_connect_with_timeout(&config.host, config.port, config.connect_timeout).await?;
        let mut parser = EslParser::new();
        let mut read_buffer = [0u8; SOCKET_BUF_SIZE];

        authenticate(
            &mut stream,
            &mut parser,
            &mut read_buffer,
            &config.password,
            config.connect_timeout,
        )
        .await?;

        info!("Successfully connected and authenticated");
        let (transport, events) = TcpTransport::split_and_spawn(stream, parser, config);

        // The `event` command is additive switch-side, so this baseline
        // subscription survives later full-set subscribes from the session.
        transport
            .send_command(EslCommand::Events {
                format: EventFormat::Plain.to_string(),
                events: BACKGROUND_JOB_EVENT.to_string(),
            })
            .await?
            .into_result("event")?;

        Ok((transport, events))
    }
}

impl TcpTransport {
    fn split_and_spawn(
        stream: TcpStream,
        parser: EslParser,
        config: &SessionConfig,
    ) -> (Self, mpsc::Receiver<EslEvent>) {
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(SharedState {
            pending_reply: Mutex::new(None),
            jobs: Mutex::new(JobTable::default()),
            command_timeout_ms: AtomicU64::new(config.command_timeout.as_millis() as u64),
        });

        let (status_tx, status_rx) = watch::channel(TransportStatus::Connected);
        let (event_tx, event_rx) = mpsc::channel(MAX_EVENT_QUEUE_SIZE);

        tokio::spawn(reader_loop(
            read_half,
            parser,
            shared.clone(),
            status_tx,
            event_tx,
        ));

        let transport = TcpTransport {
            writer: Mutex::new(write_half),
            shared,
            status_rx,
        };

        (transport, event_rx)
    }

    /// Send a command and wait for the reply.
    ///
    /// The writer lock is held through the entire send-and-receive cycle to
    /// prevent concurrent commands from overwriting the pending reply slot.
    async fn send_command(&self, command: EslCommand) -> EslResult<EslResponse> {
        if !self.is_live() {
            return Err(EslError::NotConnected);
        }

        let command_str = command.to_wire_format()?;
        match &command {
            EslCommand::Auth { .. } => debug!("Sending command: auth [REDACTED]"),
            _ => debug!("Sending command: {}", command_str.trim()),
        }

        // Lock writer — serializes concurrent commands and holds through reply.
        let mut writer = self
            .writer
            .lock()
            .await;

        // Set up reply channel
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .shared
                .pending_reply
                .lock()
                .await;
            *pending = Some(tx);
        }

        // Write command
        writer
            .write_all(command_str.as_bytes())
            .await
            .map_err(EslError::Io)?;

        // Wait for reply from reader task with command timeout (writer still locked)
        let timeout_ms = self
            .shared
            .command_timeout_ms
            .load(Ordering::Relaxed);
        let message = match timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(message)) => message,
            Ok(Err(_)) => {
                drop(writer);
                return Err(EslError::ConnectionClosed);
            }
            Err(_) => {
                let mut pending = self
                    .shared
                    .pending_reply
                    .lock()
                    .await;
                pending.take();
                drop(writer);
                return Err(EslError::Timeout { timeout_ms });
            }
        };

        drop(writer);

        let response = message.into_response();
        debug!("Received response: success={}", response.is_success());
        Ok(response)
    }

    /// Set command response timeout for subsequent commands.
    pub fn set_command_timeout(&self, duration: Duration) {
        self.shared
            .command_timeout_ms
            .store(duration.as_millis() as u64, Ordering::Relaxed);
    }
}

impl Transport for TcpTransport {
    async fn send_inline(&self, command: &str) -> EslResult<EslResponse> {
        self.send_command(EslCommand::Api {
            command: command.to_string(),
        })
        .await
    }

    async fn send_background(&self, command: &str) -> EslResult<String> {
        let response = self
            .send_command(EslCommand::BgApi {
                command: command.to_string(),
            })
            .await?
            .into_result("bgapi")?;

        let job_uuid = response
            .job_uuid()
            .ok_or_else(|| EslError::protocol_error("bgapi reply missing Job-UUID"))?
            .to_string();

        let (tx, rx) = oneshot::channel();
        {
            let mut jobs = self
                .shared
                .jobs
                .lock()
                .await;
            // The completion event may already have been routed
            if let Some(body) = jobs
                .unclaimed
                .remove(&job_uuid)
            {
                return Ok(body);
            }
            jobs.waiters
                .insert(job_uuid.clone(), tx);
        }

        debug!("Waiting for background job {}", job_uuid);
        rx.await
            .map_err(|_| EslError::ConnectionClosed)
    }

    async fn subscribe(&self, events: &[String]) -> EslResult<()> {
        let cmd = EslCommand::Events {
            format: EventFormat::Plain.to_string(),
            events: events.join(" "),
        };

        self.send_command(cmd)
            .await?
            .into_result("event")?;
        info!("Subscribed to events: {}", events.join(" "));
        Ok(())
    }

    fn is_live(&self) -> bool {
        matches!(
            *self
                .status_rx
                .borrow(),
            TransportStatus::Connected
        )
    }

    async fn close(&self) -> EslResult<()> {
        info!("Closing transport");
        // Polite ESL teardown; ignore failures from an already-dead link.
        let _ = self
            .send_command(EslCommand::Exit)
            .await;
        let mut writer = self
            .writer
            .lock()
            .await;
        writer
            .shutdown()
            .await
            .map_err(EslError::Io)?;
        Ok(())
    }
}

/// Background reader loop
async fn reader_loop(
    reader: OwnedReadHalf,
    parser: EslParser,
    shared: Arc<SharedState>,
    status_tx: watch::Sender<TransportStatus>,
    event_tx: mpsc::Sender<EslEvent>,
) {
    let result = std::panic::AssertUnwindSafe(reader_loop_inner(
        reader,
        parser,
        shared.clone(),
        status_tx.clone(),
        event_tx,
    ));
    if futures_util::FutureExt::catch_unwind(result)
        .await
        .is_err()
    {
        tracing::error!("reader task panicked");
        let _ = status_tx.send(TransportStatus::Disconnected(DisconnectReason::IoError(
            "reader task panicked".to_string(),
        )));
    }
    if let TransportStatus::Disconnected(reason) = &*status_tx.borrow() {
        debug!("Reader task ended: {}", reason);
    }
    // Wake any waiters still parked on a reply or job result
    shared
        .pending_reply
        .lock()
        .await
        .take();
    let mut jobs = shared
        .jobs
        .lock()
        .await;
    jobs.waiters
        .clear();
    jobs.unclaimed
        .clear();
}

async fn reader_loop_inner(
    mut reader: OwnedReadHalf,
    mut parser: EslParser,
    shared: Arc<SharedState>,
    status_tx: watch::Sender<TransportStatus>,
    event_tx: mpsc::Sender<EslEvent>,
) {
    let mut read_buffer = [0u8; SOCKET_BUF_SIZE];

    loop {
        // Try to parse a complete message from buffered data first
        match parser.parse_message() {
            Ok(Some(message)) => {
                match message.message_type {
                    MessageType::Event => {
                        let format = message
                            .headers
                            .get(HEADER_CONTENT_TYPE)
                            .map(|ct| EventFormat::from_content_type(ct))
                            .unwrap_or(EventFormat::Plain);

                        match parser.parse_event(message, format) {
                            Ok(event) => route_event(&event_tx, &shared, event).await,
                            Err(e) => warn!("Event parse error: {}", e),
                        }
                    }
                    MessageType::CommandReply | MessageType::ApiResponse => {
                        let mut pending = shared
                            .pending_reply
                            .lock()
                            .await;
                        if let Some(tx) = pending.take() {
                            let _ = tx.send(message);
                        } else {
                            warn!("Received {:?} but no pending command", message.message_type);
                        }
                    }
                    MessageType::Disconnect => {
                        info!("Received disconnect notice from server");
                        let _ = status_tx.send(TransportStatus::Disconnected(
                            DisconnectReason::ServerNotice,
                        ));
                        return;
                    }
                    MessageType::AuthRequest | MessageType::Unknown(_) => {
                        debug!("Ignoring unexpected message: {:?}", message.message_type);
                    }
                }
                continue;
            }
            Ok(None) => {
                // Need more data from socket
            }
            Err(e) => {
                warn!("Parser error: {}", e);
                let _ = status_tx.send(TransportStatus::Disconnected(DisconnectReason::IoError(
                    e.to_string(),
                )));
                return;
            }
        }

        match reader
            .read(&mut read_buffer)
            .await
        {
            Ok(0) => {
                info!("Connection closed (EOF)");
                let _ = status_tx.send(TransportStatus::Disconnected(
                    DisconnectReason::ConnectionClosed,
                ));
                return;
            }
            Ok(n) => {
                if let Err(e) = parser.add_data(&read_buffer[..n]) {
                    warn!("Buffer error: {}", e);
                    let _ = status_tx.send(TransportStatus::Disconnected(
                        DisconnectReason::IoError(e.to_string()),
                    ));
                    return;
                }
            }
            Err(e) => {
                warn!("Read error: {}", e);
                let _ = status_tx.send(TransportStatus::Disconnected(DisconnectReason::IoError(
                    e.to_string(),
                )));
                return;
            }
        }
    }
}

/// Route one parsed event: background-job completions go to their waiter,
/// everything else to the session's event channel.
async fn route_event(event_tx: &mpsc::Sender<EslEvent>, shared: &SharedState, event: EslEvent) {
    if event.name() == Some(BACKGROUND_JOB_EVENT) {
        if let Some(job_uuid) = event.header(crate::constants::HEADER_JOB_UUID) {
            let body = event
                .body()
                .unwrap_or_default()
                .to_string();
            let mut jobs = shared
                .jobs
                .lock()
                .await;
            match jobs
                .waiters
                .remove(job_uuid)
            {
                Some(tx) => {
                    let _ = tx.send(body);
                    return;
                }
                None => {
                    // Result arrived before its waiter registered; park it.
                    // Every bgapi here registers a waiter, so parked entries
                    // are claimed promptly.
                    jobs.unclaimed
                        .insert(job_uuid.to_string(), body);
                }
            }
        }
        // Also deliver to the event channel so `on` handlers for
        // BACKGROUND_JOB still fire.
    }

    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Event queue full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Event channel closed, dropping event");
        }
    }
}
