//! Relay hub tracking connections, the authoritative slot and observers.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{
    AuthoritativePeerBusy, HubEvent, Inbound, NoAuthoritativePeer, ProtocolError, Role,
};

/// Default interval between liveness pings.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Default size of the per-connection send buffer.
pub const DEFAULT_CONNECTION_BUFFER: usize = 256;

/// Identity of one accepted connection.
pub type ConnId = Uuid;

/// Items queued for a connection's socket writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Event(HubEvent),
    /// Liveness ping; the peer is expected to answer with a pong.
    Ping,
    /// The hub terminated the connection.
    Close,
}

/// Handles returned when a connection is registered.
pub struct Registration {
    pub id: ConnId,
    /// Frames the hub wants written to the socket.
    pub outgoing: mpsc::Receiver<Outgoing>,
    /// Cancelled when the hub terminates the connection.
    pub cancel: CancellationToken,
}

/// Hub tuning knobs.
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub heartbeat_interval: Duration,
    pub connection_buffer: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            connection_buffer: DEFAULT_CONNECTION_BUFFER,
        }
    }
}

struct Peer {
    role: Role,
    tx: mpsc::Sender<Outgoing>,
    /// Set on every pong, cleared before every ping.
    alive: bool,
    cancel: CancellationToken,
}

/// Connection table plus the two role indexes.
///
/// Every read-modify-write happens under the hub's single lock, so the slot
/// and the observer set can never disagree with the table.
#[derive(Default)]
struct Roster {
    peers: HashMap<ConnId, Peer>,
    authoritative: Option<ConnId>,
    observers: HashSet<ConnId>,
}

impl Roster {
    /// Queue an event for one connection. Closed or unknown peers are skipped.
    ///
    /// Returns whether the event was queued.
    fn send(&self, id: ConnId, event: HubEvent) -> bool {
        let Some(peer) = self.peers.get(&id) else {
            return false;
        };
        match peer.tx.try_send(Outgoing::Event(event)) {
            Ok(()) => true,
            Err(TrySendError::Closed(_)) => false,
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %id, "send buffer full, dropping event");
                false
            }
        }
    }

    fn broadcast(&self, event: HubEvent) {
        for id in &self.observers {
            self.send(*id, event.clone());
        }
    }

    /// The authoritative connection, if its socket is still open.
    fn live_authoritative(&self) -> Option<ConnId> {
        self.authoritative.filter(|id| {
            self.peers
                .get(id)
                .is_some_and(|peer| !peer.tx.is_closed())
        })
    }

    fn reject(&self, id: ConnId, err: impl std::fmt::Display) {
        debug!(conn_id = %id, "rejecting message: {}", err);
        self.send(id, HubEvent::error(err));
    }

    fn install_authoritative(&mut self, id: ConnId) {
        if let Some(previous) = self.authoritative.filter(|prev| *prev != id) {
            info!(conn_id = %previous, "terminating superseded authoritative peer");
            self.evict(previous);
        }

        if let Some(peer) = self.peers.get_mut(&id) {
            peer.role = Role::Authoritative;
        }
        self.authoritative = Some(id);
        info!(conn_id = %id, "authoritative peer connected");

        self.broadcast(HubEvent::TdStatus { connected: true });
        self.send(id, HubEvent::TdAck);
    }

    fn add_observer(&mut self, id: ConnId) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.role = Role::Observer;
        }
        self.observers.insert(id);
        debug!(conn_id = %id, observers = self.observers.len(), "observer connected");

        let td_connected = self.live_authoritative().is_some();
        self.send(id, HubEvent::UiAck { td_connected });
    }

    fn forward_to_authoritative(&self, from: ConnId, payload: Value) {
        match self.live_authoritative() {
            Some(td) => {
                if self.send(td, HubEvent::UiToTd { payload }) {
                    self.send(from, HubEvent::Ok);
                } else {
                    self.reject(from, AuthoritativePeerBusy);
                }
            }
            None => self.reject(from, NoAuthoritativePeer),
        }
    }

    /// Remove a connection from every index and terminate it.
    ///
    /// Clearing the authoritative slot is broadcast to observers.
    fn evict(&mut self, id: ConnId) -> Option<Role> {
        let peer = self.peers.remove(&id)?;
        self.observers.remove(&id);

        if self.authoritative == Some(id) {
            self.authoritative = None;
            info!(conn_id = %id, "authoritative peer disconnected");
            self.broadcast(HubEvent::TdStatus { connected: false });
        }

        peer.cancel.cancel();
        let _ = peer.tx.try_send(Outgoing::Close);
        Some(peer.role)
    }
}

/// Realtime relay hub.
///
/// Multiplexes one authoritative peer against any number of observers:
/// - authoritative messages are broadcast to all observers as `td.event`
/// - observer messages are sent to the authoritative peer as `ui.toTd`
/// - a newer authoritative hello terminates the previous holder
/// - connections that miss a liveness ping are evicted
pub struct RelayHub {
    roster: Mutex<Roster>,
    settings: HubSettings,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl RelayHub {
    /// Create a new relay hub.
    pub fn new(settings: HubSettings) -> Self {
        Self {
            roster: Mutex::new(Roster::default()),
            settings,
            heartbeat: Mutex::new(None),
        }
    }

    fn roster(&self) -> MutexGuard<'_, Roster> {
        self.roster.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a newly accepted connection as unclassified.
    pub fn register(&self) -> Registration {
        let id = Uuid::new_v4();
        let (tx, outgoing) = mpsc::channel(self.settings.connection_buffer.max(1));
        let cancel = CancellationToken::new();

        self.roster().peers.insert(
            id,
            Peer {
                role: Role::Unclassified,
                tx,
                alive: true,
                cancel: cancel.clone(),
            },
        );
        debug!(conn_id = %id, "registered relay connection");

        Registration {
            id,
            outgoing,
            cancel,
        }
    }

    /// Dispatch one text frame received on `id`.
    pub fn handle_text(&self, id: ConnId, text: &str) {
        let inbound = Inbound::parse(text);
        let mut roster = self.roster();

        let Some(role) = roster.peers.get(&id).map(|peer| peer.role) else {
            debug!(conn_id = %id, "message from unknown connection ignored");
            return;
        };

        let inbound = match inbound {
            Ok(inbound) => inbound,
            Err(err) => {
                roster.reject(id, err);
                return;
            }
        };

        match (role, inbound) {
            (Role::Unclassified, Inbound::AuthoritativeHello) => roster.install_authoritative(id),
            (Role::Unclassified, Inbound::ObserverHello) => roster.add_observer(id),
            (Role::Unclassified, Inbound::Application(_)) => {
                roster.reject(id, ProtocolError::NotIdentified);
            }
            (role, Inbound::AuthoritativeHello | Inbound::ObserverHello) => {
                roster.reject(id, ProtocolError::AlreadyIdentified(role));
            }
            (Role::Authoritative, Inbound::Application(payload)) => {
                roster.broadcast(HubEvent::TdEvent { payload });
            }
            (Role::Observer, Inbound::Application(payload)) => {
                roster.forward_to_authoritative(id, payload);
            }
        }
    }

    /// Dispatch a binary frame; only UTF-8 JSON is understood.
    pub fn handle_binary(&self, id: ConnId, data: &[u8]) {
        match std::str::from_utf8(data) {
            Ok(text) => self.handle_text(id, text),
            Err(_) => self.roster().reject(id, ProtocolError::InvalidJson),
        }
    }

    /// Record a liveness response.
    pub fn mark_alive(&self, id: ConnId) {
        if let Some(peer) = self.roster().peers.get_mut(&id) {
            peer.alive = true;
        }
    }

    /// Forget a connection after its socket closed or failed.
    pub fn disconnect(&self, id: ConnId) {
        if let Some(role) = self.roster().evict(id) {
            info!(conn_id = %id, %role, "relay connection closed");
        }
    }

    /// Run one liveness round over every tracked connection.
    ///
    /// Connections that did not answer the previous ping are evicted; the
    /// rest are marked pending and pinged again. Returns the evicted ids.
    pub fn sweep(&self) -> Vec<ConnId> {
        let mut roster = self.roster();
        let evicted: Vec<ConnId> = roster
            .peers
            .iter()
            .filter(|(_, peer)| !peer.alive)
            .map(|(id, _)| *id)
            .collect();

        for id in &evicted {
            warn!(conn_id = %id, "evicting unresponsive relay connection");
            roster.evict(*id);
        }

        for peer in roster.peers.values_mut() {
            peer.alive = false;
            let _ = peer.tx.try_send(Outgoing::Ping);
        }
        evicted
    }

    /// Start the recurring liveness sweep. Restarting replaces the old task.
    pub fn start_heartbeat(self: &Arc<Self>) {
        let hub: Weak<Self> = Arc::downgrade(self);
        let period = self.settings.heartbeat_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(hub) = hub.upgrade() else {
                    break;
                };
                let evicted = hub.sweep();
                if !evicted.is_empty() {
                    debug!(count = evicted.len(), "heartbeat evicted connections");
                }
            }
        });

        let previous = self
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        info!(interval_secs = period.as_secs(), "relay heartbeat started");
    }

    /// Stop the liveness sweep.
    pub fn stop_heartbeat(&self) {
        let task = self
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            info!("relay heartbeat stopped");
        }
    }

    /// Connection currently holding the authoritative slot.
    pub fn authoritative(&self) -> Option<ConnId> {
        self.roster().authoritative
    }

    pub fn observer_count(&self) -> usize {
        self.roster().observers.len()
    }

    pub fn connection_count(&self) -> usize {
        self.roster().peers.len()
    }

    /// Role of a tracked connection.
    pub fn role(&self, id: ConnId) -> Option<Role> {
        self.roster().peers.get(&id).map(|peer| peer.role)
    }
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new(HubSettings::default())
    }
}

impl Drop for RelayHub {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}
