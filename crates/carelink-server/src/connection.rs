//! One live client: its mailbox and the reader/writer pump pair.
//!
//! ```text
//!  transport ──▶ read_pump ──▶ FrameHandler          (decode, relay)
//!      ▲             │
//!      │             └─▶ Hub::unregister on exit  ──▶ mailbox closed
//!      │                                                    │
//!  write_pump ◀──────────── mailbox (bounded) ◀── Hub sends ┘
//! ```
//!
//! The two pumps share nothing but the mailbox and a shutdown signal. A
//! connection moves `Open → Active → Closing → Closed` and never back.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, instrument, warn};

use carelink_core::envelope::Envelope;
use carelink_core::ids::{ConnectionId, UserId};
use carelink_core::models::Role;
use carelink_settings::ServerSettings;

use crate::hub::Hub;

/// Lifecycle of a connection as seen by the hub and the pumps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, not yet in the hub index.
    Open,
    /// Registered and receiving.
    Active,
    /// Mailbox closed; the writer is flushing what is left.
    Closing,
    /// Writer finished. Nothing more is sent.
    Closed,
}

/// Result of offering one frame to a mailbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Queued,
    Full,
    Closed,
}

struct Slot {
    state: ConnectionState,
    mailbox: Option<mpsc::Sender<Arc<str>>>,
}

pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    role: Role,
    slot: Mutex<Slot>,
    shutdown: CancellationToken,
}

impl Connection {
    /// Create a connection with a bounded mailbox and hand back the
    /// receiving end for the writer.
    pub fn new(user_id: UserId, role: Role, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let connection = Arc::new(Self {
            id: ConnectionId::new(),
            user_id,
            role,
            slot: Mutex::new(Slot {
                state: ConnectionState::Open,
                mailbox: Some(tx),
            }),
            shutdown: CancellationToken::new(),
        });
        (connection, rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.slot.lock().state
    }

    pub(crate) fn activate(&self) {
        let mut slot = self.slot.lock();
        if slot.state == ConnectionState::Open {
            slot.state = ConnectionState::Active;
        }
    }

    /// Non-blocking enqueue. Never waits on a slow consumer.
    pub(crate) fn deliver(&self, frame: &Arc<str>) -> Delivery {
        let slot = self.slot.lock();
        let Some(mailbox) = &slot.mailbox else {
            return Delivery::Closed;
        };
        match mailbox.try_send(Arc::clone(frame)) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Drop the only mailbox sender. The writer drains what is queued and
    /// then sends a close frame.
    pub(crate) fn close_mailbox(&self) {
        let mut slot = self.slot.lock();
        slot.mailbox = None;
        if slot.state != ConnectionState::Closed {
            slot.state = ConnectionState::Closing;
        }
    }

    fn mark_closed(&self) {
        {
            let mut slot = self.slot.lock();
            slot.mailbox = None;
            slot.state = ConnectionState::Closed;
        }
        self.shutdown.cancel();
    }

    fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .field("state", &self.state())
            .finish()
    }
}

/// Transport limits and liveness timings for one pump pair.
///
/// `ping_interval` and `write_timeout` must both be shorter than
/// `pong_wait`; settings validation enforces this.
#[derive(Clone, Debug)]
pub struct PumpConfig {
    pub max_message_size: usize,
    pub write_timeout: Duration,
    pub pong_wait: Duration,
    pub ping_interval: Duration,
    pub mailbox_capacity: usize,
}

impl PumpConfig {
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            max_message_size: settings.max_message_size,
            write_timeout: settings.write_timeout(),
            pong_wait: settings.pong_wait(),
            ping_interval: settings.ping_interval(),
            mailbox_capacity: settings.mailbox_capacity,
        }
    }
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            max_message_size: 512,
            write_timeout: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            ping_interval: Duration::from_secs(54),
            mailbox_capacity: 256,
        }
    }
}

/// Domain side of the reader: receives every frame that decoded cleanly.
pub trait FrameHandler: Send + Sync {
    fn on_envelope(&self, from: &Connection, envelope: Envelope);
}

/// Why the reader stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Close frame or end of stream.
    PeerClosed,
    TransportError,
    /// No pong inside the deadline.
    DeadlineExpired,
    FrameTooLarge,
    /// The writer or the hub ended the connection first.
    Shutdown,
}

/// Why the writer stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    MailboxClosed,
    WriteFailed,
    WriteTimedOut,
}

/// Read frames until the peer goes away, then unregister from the hub.
pub async fn read_pump<S, E>(
    stream: S,
    connection: &Arc<Connection>,
    hub: &Hub,
    handler: &dyn FrameHandler,
    config: &PumpConfig,
) -> ReadOutcome
where
    S: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    let outcome = read_frames(stream, connection, handler, config).await;
    if let Err(e) = hub.unregister(connection).await {
        debug!(connection_id = %connection.id(), error = %e, "unregister skipped");
    }
    outcome
}

async fn read_frames<S, E>(
    mut stream: S,
    connection: &Connection,
    handler: &dyn FrameHandler,
    config: &PumpConfig,
) -> ReadOutcome
where
    S: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    let deadline = tokio::time::sleep(config.pong_wait);
    tokio::pin!(deadline);

    loop {
        let frame = tokio::select! {
            () = &mut deadline => {
                warn!(connection_id = %connection.id(), "no pong within {:?}, closing", config.pong_wait);
                return ReadOutcome::DeadlineExpired;
            }
            () = connection.closed() => return ReadOutcome::Shutdown,
            frame = stream.next() => frame,
        };

        let text = match frame {
            None => return ReadOutcome::PeerClosed,
            Some(Err(e)) => {
                debug!(connection_id = %connection.id(), error = %e, "transport read failed");
                return ReadOutcome::TransportError;
            }
            Some(Ok(WsMessage::Pong(_))) => {
                deadline.as_mut().reset(Instant::now() + config.pong_wait);
                continue;
            }
            Some(Ok(WsMessage::Ping(_))) => continue,
            Some(Ok(WsMessage::Close(_))) => return ReadOutcome::PeerClosed,
            Some(Ok(WsMessage::Text(text))) => text.to_string(),
            Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!(connection_id = %connection.id(), len = data.len(), "non-UTF8 frame dropped");
                    continue;
                }
            },
        };

        if text.len() > config.max_message_size {
            warn!(
                connection_id = %connection.id(),
                len = text.len(),
                limit = config.max_message_size,
                "frame exceeds size limit, closing"
            );
            return ReadOutcome::FrameTooLarge;
        }

        match Envelope::from_json(&text) {
            Ok(envelope) => handler.on_envelope(connection, envelope),
            Err(e) => warn!(connection_id = %connection.id(), error = %e, "undecodable frame discarded"),
        }
    }
}

/// Drain the mailbox into the transport and keep the peer probed.
///
/// Frames queued since the last write go out as one text frame joined by
/// `'\n'`. When the mailbox closes a close frame is sent. On any exit the
/// connection is marked closed so the reader stops too.
pub async fn write_pump<S>(
    mut sink: S,
    connection: Arc<Connection>,
    mut mailbox: mpsc::Receiver<Arc<str>>,
    config: PumpConfig,
) -> WriteOutcome
where
    S: Sink<WsMessage> + Unpin,
    S::Error: Display,
{
    let mut ping = tokio::time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            frame = mailbox.recv() => {
                let Some(first) = frame else {
                    let _ = write_frame(&mut sink, WsMessage::Close(None), config.write_timeout).await;
                    break WriteOutcome::MailboxClosed;
                };
                let mut batch = String::from(&*first);
                while let Ok(next) = mailbox.try_recv() {
                    batch.push('\n');
                    batch.push_str(&next);
                }
                if let Err(outcome) = write_frame(&mut sink, WsMessage::Text(batch.into()), config.write_timeout).await {
                    break outcome;
                }
            }
            _ = ping.tick() => {
                if let Err(outcome) = write_frame(&mut sink, WsMessage::Ping(Bytes::new()), config.write_timeout).await {
                    break outcome;
                }
            }
        }
    };

    connection.mark_closed();
    let _ = tokio::time::timeout(config.write_timeout, sink.close()).await;
    debug!(connection_id = %connection.id(), ?outcome, "writer stopped");
    outcome
}

async fn write_frame<S>(sink: &mut S, frame: WsMessage, timeout: Duration) -> Result<(), WriteOutcome>
where
    S: Sink<WsMessage> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(timeout, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "transport write failed");
            Err(WriteOutcome::WriteFailed)
        }
        Err(_) => {
            warn!("transport write timed out after {timeout:?}");
            Err(WriteOutcome::WriteTimedOut)
        }
    }
}

/// Run a WebSocket client from upgrade to disconnect.
#[instrument(skip_all, fields(connection_id = %connection.id(), user_id = %connection.user_id(), role = %connection.role()))]
pub async fn run_session(
    socket: WebSocket,
    connection: Arc<Connection>,
    mailbox: mpsc::Receiver<Arc<str>>,
    hub: Arc<Hub>,
    handler: Arc<dyn FrameHandler>,
    config: PumpConfig,
) {
    let (sink, stream) = socket.split();

    if let Err(e) = hub.register(Arc::clone(&connection)).await {
        warn!(error = %e, "hub unavailable, dropping client");
        return;
    }
    info!("client connected");

    let writer = tokio::spawn(write_pump(sink, Arc::clone(&connection), mailbox, config.clone()));
    let outcome = read_pump(stream, &connection, &hub, handler.as_ref(), &config).await;
    let _ = writer.await;

    info!(?outcome, "client disconnected");
}
