//! Registry of live connections and the fan-out policy on top of it.
//!
//! Register, unregister and broadcast are processed one at a time by a
//! single coordinating loop reading three dedicated channels. Unicast and
//! role sends read the index directly under a read lock. A connection whose
//! mailbox is full is treated as dead: its mailbox is closed and it is
//! dropped from the index under the write lock, so eviction never races a
//! register or unregister.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use carelink_core::envelope::Envelope;
use carelink_core::ids::{ConnectionId, UserId};
use carelink_core::models::Role;

use crate::connection::{Connection, Delivery};

const COMMAND_BUFFER: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub loop is not running")]
    Closed,

    #[error("hub loop already started")]
    AlreadyStarted,

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

struct Registration {
    connection: Arc<Connection>,
    ack: oneshot::Sender<()>,
}

struct Unregistration {
    id: ConnectionId,
    ack: oneshot::Sender<()>,
}

struct BroadcastRequest {
    frame: Arc<str>,
    ack: oneshot::Sender<usize>,
}

struct Receivers {
    register: mpsc::Receiver<Registration>,
    unregister: mpsc::Receiver<Unregistration>,
    broadcast: mpsc::Receiver<BroadcastRequest>,
}

#[derive(Default)]
struct Index {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    by_user: HashMap<UserId, Vec<ConnectionId>>,
}

impl Index {
    fn insert(&mut self, connection: Arc<Connection>) {
        if self.connections.contains_key(connection.id()) {
            return;
        }
        connection.activate();
        self.by_user
            .entry(connection.user_id().clone())
            .or_default()
            .push(connection.id().clone());
        let _ = self.connections.insert(connection.id().clone(), connection);
    }

    /// Presence-guarded: removing an absent id is a no-op returning `false`.
    fn remove(&mut self, id: &ConnectionId) -> bool {
        let Some(connection) = self.connections.remove(id) else {
            return false;
        };
        connection.close_mailbox();
        if let Some(ids) = self.by_user.get_mut(connection.user_id()) {
            ids.retain(|c| c != id);
            if ids.is_empty() {
                let _ = self.by_user.remove(connection.user_id());
            }
        }
        true
    }

    fn evict(&mut self, dead: Vec<ConnectionId>) {
        for id in dead {
            if self.remove(&id) {
                warn!(connection_id = %id, "mailbox full, dropping slow connection");
            }
        }
    }
}

/// Offer `frame` to each target; ids of saturated mailboxes go to `dead`.
fn fan_out<'a>(
    targets: impl Iterator<Item = &'a Arc<Connection>>,
    frame: &Arc<str>,
    dead: &mut Vec<ConnectionId>,
) -> usize {
    let mut delivered = 0;
    for connection in targets {
        match connection.deliver(frame) {
            Delivery::Queued => delivered += 1,
            Delivery::Full => dead.push(connection.id().clone()),
            Delivery::Closed => {}
        }
    }
    delivered
}

fn encode(envelope: &Envelope) -> Result<Arc<str>, HubError> {
    Ok(Arc::from(envelope.to_json()?))
}

/// Constructed once, started once with [`Hub::start`].
pub struct Hub {
    index: Arc<RwLock<Index>>,
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<Unregistration>,
    broadcast_tx: mpsc::Sender<BroadcastRequest>,
    receivers: Mutex<Option<Receivers>>,
}

impl Hub {
    pub fn new() -> Self {
        let (register_tx, register) = mpsc::channel(COMMAND_BUFFER);
        let (unregister_tx, unregister) = mpsc::channel(COMMAND_BUFFER);
        let (broadcast_tx, broadcast) = mpsc::channel(COMMAND_BUFFER);
        Self {
            index: Arc::new(RwLock::new(Index::default())),
            register_tx,
            unregister_tx,
            broadcast_tx,
            receivers: Mutex::new(Some(Receivers {
                register,
                unregister,
                broadcast,
            })),
        }
    }

    /// Spawn the coordinating loop. It runs until `cancel` fires, then
    /// closes every remaining mailbox.
    pub fn start(&self, cancel: CancellationToken) -> Result<JoinHandle<()>, HubError> {
        let receivers = self.receivers.lock().take().ok_or(HubError::AlreadyStarted)?;
        Ok(tokio::spawn(run_loop(Arc::clone(&self.index), receivers, cancel)))
    }

    /// Add a connection to the live set and the user index.
    pub async fn register(&self, connection: Arc<Connection>) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.register_tx
            .send(Registration { connection, ack })
            .await
            .map_err(|_| HubError::Closed)?;
        done.await.map_err(|_| HubError::Closed)
    }

    /// Remove a connection and close its mailbox. Safe to call twice.
    pub async fn unregister(&self, connection: &Connection) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.unregister_tx
            .send(Unregistration {
                id: connection.id().clone(),
                ack,
            })
            .await
            .map_err(|_| HubError::Closed)?;
        done.await.map_err(|_| HubError::Closed)
    }

    /// Queue `envelope` on every live connection. Returns how many accepted it.
    pub async fn broadcast(&self, envelope: &Envelope) -> Result<usize, HubError> {
        let frame = encode(envelope)?;
        let (ack, done) = oneshot::channel();
        self.broadcast_tx
            .send(BroadcastRequest { frame, ack })
            .await
            .map_err(|_| HubError::Closed)?;
        done.await.map_err(|_| HubError::Closed)
    }

    /// Queue `envelope` on every connection of `user_id`.
    pub fn send_to_user(&self, user_id: &UserId, envelope: &Envelope) -> Result<usize, HubError> {
        let frame = encode(envelope)?;
        let mut dead = Vec::new();
        let delivered = {
            let index = self.index.read();
            let targets = index
                .by_user
                .get(user_id)
                .into_iter()
                .flatten()
                .filter_map(|id| index.connections.get(id));
            fan_out(targets, &frame, &mut dead)
        };
        self.evict(dead);
        Ok(delivered)
    }

    /// Queue `envelope` on every connection opened under `role`.
    pub fn send_to_role(&self, role: Role, envelope: &Envelope) -> Result<usize, HubError> {
        let frame = encode(envelope)?;
        let mut dead = Vec::new();
        let delivered = {
            let index = self.index.read();
            let targets = index.connections.values().filter(|c| c.role() == role);
            fan_out(targets, &frame, &mut dead)
        };
        self.evict(dead);
        Ok(delivered)
    }

    pub fn connection_count(&self) -> usize {
        self.index.read().connections.len()
    }

    pub fn is_registered(&self, id: &ConnectionId) -> bool {
        self.index.read().connections.contains_key(id)
    }

    /// Number of live connections held by one user.
    pub fn user_connection_count(&self, user_id: &UserId) -> usize {
        self.index.read().by_user.get(user_id).map_or(0, Vec::len)
    }

    fn evict(&self, dead: Vec<ConnectionId>) {
        if !dead.is_empty() {
            self.index.write().evict(dead);
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_loop(index: Arc<RwLock<Index>>, mut rx: Receivers, cancel: CancellationToken) {
    info!("hub loop started");
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some(reg) = rx.register.recv() => {
                debug!(
                    connection_id = %reg.connection.id(),
                    user_id = %reg.connection.user_id(),
                    role = %reg.connection.role(),
                    "connection registered"
                );
                index.write().insert(reg.connection);
                let _ = reg.ack.send(());
            }
            Some(unreg) = rx.unregister.recv() => {
                if index.write().remove(&unreg.id) {
                    debug!(connection_id = %unreg.id, "connection unregistered");
                }
                let _ = unreg.ack.send(());
            }
            Some(cast) = rx.broadcast.recv() => {
                let delivered = {
                    let mut index = index.write();
                    let mut dead = Vec::new();
                    let delivered = fan_out(index.connections.values(), &cast.frame, &mut dead);
                    index.evict(dead);
                    delivered
                };
                let _ = cast.ack.send(delivered);
            }
            else => break,
        }
    }

    let mut index = index.write();
    let remaining: Vec<ConnectionId> = index.connections.keys().cloned().collect();
    let count = remaining.len();
    for id in remaining {
        let _ = index.remove(&id);
    }
    info!(closed = count, "hub loop stopped");
}
