//! Session registry and event routing for ChatHub Server

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::models::ServerEvent;

pub type ConnId = u64;

/// Capacity of each connection's outbound event buffer. A peer that
/// falls this far behind is cut off rather than allowed to queue
/// events without bound.
pub const EVENT_BUFFER_SIZE: usize = 256;

/// Addressing for one outbound event
#[derive(Debug, Clone)]
pub enum Recipient {
    /// Reply to the originating connection
    Origin,
    /// Delivered only if the user is currently bound
    User(String),
    Users(Vec<String>),
    Broadcast { exclude_origin: bool },
}

/// An event paired with its addressing, as returned by command handlers
#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: Recipient,
    pub event: ServerEvent,
}

impl Outbound {
    pub fn to_origin(event: ServerEvent) -> Self {
        Self {
            to: Recipient::Origin,
            event,
        }
    }

    pub fn to_user(user_id: impl Into<String>, event: ServerEvent) -> Self {
        Self {
            to: Recipient::User(user_id.into()),
            event,
        }
    }

    pub fn to_users(user_ids: Vec<String>, event: ServerEvent) -> Self {
        Self {
            to: Recipient::Users(user_ids),
            event,
        }
    }

    pub fn broadcast(event: ServerEvent, exclude_origin: bool) -> Self {
        Self {
            to: Recipient::Broadcast { exclude_origin },
            event,
        }
    }
}

/// Tracks live connections and the `user -> connection` bindings.
///
/// At most one connection per user: a later bind for the same user wins
/// and the earlier connection is orphaned (it stays open but no longer
/// receives user-addressed events).
pub struct SessionRegistry {
    next_conn_id: AtomicU64,
    /// Every live connection, bound or not
    connections: DashMap<ConnId, mpsc::Sender<ServerEvent>>,
    /// userId -> owning connection
    bindings: DashMap<String, ConnId>,
    /// Bind-ordered online user IDs, the `onlineUserIds` wire field
    online_order: Mutex<Vec<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            next_conn_id: AtomicU64::new(1),
            connections: DashMap::new(),
            bindings: DashMap::new(),
            online_order: Mutex::new(Vec::new()),
        }
    }

    /// Register a connection before it has an identity
    pub fn register_conn(&self, sender: mpsc::Sender<ServerEvent>) -> ConnId {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(conn_id, sender);
        conn_id
    }

    pub fn remove_conn(&self, conn_id: ConnId) {
        self.connections.remove(&conn_id);
    }

    /// Bind a user to a connection. Last writer wins.
    pub fn bind(&self, user_id: &str, conn_id: ConnId) {
        self.bindings.insert(user_id.to_string(), conn_id);
        let mut order = self.online_order.lock().expect("online order lock");
        if !order.iter().any(|u| u == user_id) {
            order.push(user_id.to_string());
        }
        tracing::info!("Session bound: user={}, conn={}", user_id, conn_id);
    }

    /// Clear a binding, but only if this connection still owns it.
    /// Returns whether the user actually went offline.
    pub fn unbind_if_owner(&self, user_id: &str, conn_id: ConnId) -> bool {
        let owned = self
            .bindings
            .get(user_id)
            .map(|entry| *entry.value() == conn_id)
            .unwrap_or(false);
        if !owned {
            return false;
        }

        self.bindings.remove(user_id);
        let mut order = self.online_order.lock().expect("online order lock");
        order.retain(|u| u != user_id);
        tracing::info!("Session unbound: user={}, conn={}", user_id, conn_id);
        true
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.bindings.contains_key(user_id)
    }

    pub fn online_count(&self) -> usize {
        self.bindings.len()
    }

    pub fn online_user_ids(&self) -> Vec<String> {
        self.online_order.lock().expect("online order lock").clone()
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    /// Queue an event for a connection. A peer whose buffer is full is
    /// cut off on the spot: its sender is dropped, which makes the
    /// writer task drain and close the socket.
    fn try_deliver(&self, conn_id: ConnId, event: ServerEvent) {
        let Some(sender) = self
            .connections
            .get(&conn_id)
            .map(|entry| entry.value().clone())
        else {
            return;
        };

        match sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Conn {} exceeded its event buffer, closing", conn_id);
                self.connections.remove(&conn_id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Failed to send to conn {}", conn_id);
            }
        }
    }

    pub fn send_to_conn(&self, conn_id: ConnId, event: ServerEvent) {
        self.try_deliver(conn_id, event);
    }

    pub fn send_to_user(&self, user_id: &str, event: ServerEvent) {
        if let Some(entry) = self.bindings.get(user_id) {
            let conn_id = *entry.value();
            drop(entry);
            self.try_deliver(conn_id, event);
        }
    }

    pub fn broadcast(&self, event: ServerEvent, exclude: Option<ConnId>) {
        // snapshot first: try_deliver may remove slow peers, and removal
        // must not race the shard iteration
        let targets: Vec<ConnId> = self
            .connections
            .iter()
            .map(|entry| *entry.key())
            .filter(|conn_id| Some(*conn_id) != exclude)
            .collect();

        for conn_id in targets {
            self.try_deliver(conn_id, event.clone());
        }
    }

    /// Deliver a handler's event batch, resolving `Origin` against the
    /// connection the command arrived on.
    pub fn dispatch(&self, origin: ConnId, batch: Vec<Outbound>) {
        for outbound in batch {
            match outbound.to {
                Recipient::Origin => self.send_to_conn(origin, outbound.event),
                Recipient::User(user_id) => self.send_to_user(&user_id, outbound.event),
                Recipient::Users(user_ids) => {
                    for user_id in &user_ids {
                        self.send_to_user(user_id, outbound.event.clone());
                    }
                }
                Recipient::Broadcast { exclude_origin } => {
                    self.broadcast(outbound.event, exclude_origin.then_some(origin));
                }
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
