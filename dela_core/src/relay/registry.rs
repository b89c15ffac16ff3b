//! Room registry
//!
//! Owns every room and every live connection. Rooms and connections are
//! kept in separate tables that refer to each other by id, and all of it
//! sits behind a single lock so create/join races cannot break the
//! one-host-one-guest and unique-code invariants.

use crate::error::RoomError;
use crate::protocol::{Envelope, RoomCode};
use axum::extract::ws::Utf8Bytes;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Length of generated room codes
pub const ROOM_CODE_LENGTH: usize = 6;

const ROOM_CODE_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Unique id of one live transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First block of the uuid is plenty for logs
        let id = self.0.simple().to_string();
        f.write_str(&id[..8])
    }
}

/// Frames queued for a connection's writer task
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Relay generated envelope
    Envelope(Envelope),
    /// Peer frame forwarded verbatim
    Relayed(Utf8Bytes),
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unassigned,
    Host,
    Guest,
}

#[derive(Debug, Clone)]
pub struct Room {
    pub code: RoomCode,
    pub host: ConnectionId,
    pub guest: Option<ConnectionId>,
    pub created_at: Instant,
}

impl Room {
    /// Both slots taken, no further joins
    pub fn is_sealed(&self) -> bool {
        self.guest.is_some()
    }

    pub fn counterpart(&self, id: ConnectionId) -> Option<ConnectionId> {
        if id == self.host {
            self.guest
        } else if Some(id) == self.guest {
            Some(self.host)
        } else {
            None
        }
    }

    fn members(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        std::iter::once(self.host).chain(self.guest)
    }
}

struct Connection {
    role: Role,
    room: Option<RoomCode>,
    /// Set by pong, cleared before each ping
    alive: bool,
    outbound: mpsc::UnboundedSender<Outbound>,
    /// Fired to drop the transport without flushing its queue
    terminate: CancellationToken,
}

#[derive(Default)]
struct Tables {
    rooms: HashMap<RoomCode, Room>,
    connections: HashMap<ConnectionId, Connection>,
}

impl Tables {
    fn send(&self, id: ConnectionId, frame: Outbound) -> bool {
        match self.connections.get(&id) {
            // A closed receiver only means the writer already exited
            Some(conn) => conn.outbound.send(frame).is_ok(),
            None => false,
        }
    }

    fn allocate_code(&self) -> RoomCode {
        let mut rng = rand::rng();
        loop {
            let code: String = (0..ROOM_CODE_LENGTH)
                .map(|_| ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())] as char)
                .collect();
            let code = RoomCode::normalize(&code);
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }

    /// Forget a connection and tear down its room, if any
    fn remove_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        let conn = self.connections.remove(&id)?;
        if let Some(code) = &conn.room {
            self.teardown_room(code);
            tracing::info!("Room {} cleaned up after {} left", code, id);
        }
        Some(conn)
    }

    /// Remove a room, detach its members and tell the ones still
    /// registered that the session is over
    fn teardown_room(&mut self, code: &RoomCode) -> bool {
        let Some(room) = self.rooms.remove(code) else {
            return false;
        };
        for member in room.members() {
            if let Some(conn) = self.connections.get_mut(&member) {
                conn.role = Role::Unassigned;
                conn.room = None;
                let _ = conn
                    .outbound
                    .send(Outbound::Envelope(Envelope::PeerDisconnected));
            }
        }
        true
    }
}

/// Authoritative store of rooms and connections
#[derive(Default)]
pub struct Registry {
    tables: RwLock<Tables>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly opened transport
    ///
    /// `terminate` is cancelled if the connection is reaped; the transport
    /// owner must then drop the socket at once.
    pub async fn register(
        &self,
        outbound: mpsc::UnboundedSender<Outbound>,
        terminate: CancellationToken,
    ) -> ConnectionId {
        let id = ConnectionId::new();
        let mut tables = self.tables.write().await;
        tables.connections.insert(
            id,
            Connection {
                role: Role::Unassigned,
                room: None,
                alive: true,
                outbound,
                terminate,
            },
        );
        id
    }

    /// Allocate a fresh code and register the caller as host
    pub async fn create_room(&self, id: ConnectionId) -> Result<RoomCode, RoomError> {
        let mut tables = self.tables.write().await;
        match tables.connections.get(&id) {
            None => return Err(RoomError::UnknownConnection),
            Some(conn) if conn.room.is_some() => return Err(RoomError::AlreadyInRoom),
            Some(_) => {}
        }

        let code = tables.allocate_code();
        tables.rooms.insert(
            code.clone(),
            Room {
                code: code.clone(),
                host: id,
                guest: None,
                created_at: Instant::now(),
            },
        );
        if let Some(conn) = tables.connections.get_mut(&id) {
            conn.role = Role::Host;
            conn.room = Some(code.clone());
        }

        tracing::info!("Room {} created by {}", code, id);
        Ok(code)
    }

    /// Attach the caller as guest and notify both sides
    ///
    /// Sends `room-joined` to the guest and `peer-joined` to the host. On
    /// failure nothing is mutated.
    pub async fn join_room(&self, code: &str, id: ConnectionId) -> Result<RoomCode, RoomError> {
        let code = RoomCode::normalize(code);
        let mut tables = self.tables.write().await;

        let room = tables.rooms.get(&code).ok_or(RoomError::RoomNotFound)?;
        if room.is_sealed() {
            return Err(RoomError::RoomFull);
        }
        let host = room.host;
        match tables.connections.get(&id) {
            None => return Err(RoomError::UnknownConnection),
            Some(conn) if conn.room.is_some() => return Err(RoomError::AlreadyInRoom),
            Some(_) => {}
        }

        if let Some(room) = tables.rooms.get_mut(&code) {
            room.guest = Some(id);
        }
        if let Some(conn) = tables.connections.get_mut(&id) {
            conn.role = Role::Guest;
            conn.room = Some(code.clone());
        }

        tables.send(
            id,
            Outbound::Envelope(Envelope::RoomJoined {
                room_code: code.to_string(),
            }),
        );
        tables.send(host, Outbound::Envelope(Envelope::PeerJoined));

        tracing::info!("{} joined room {}", id, code);
        Ok(code)
    }

    /// Remove a room; unknown codes are ignored
    pub async fn remove_room(&self, code: &RoomCode) -> bool {
        let removed = self.tables.write().await.teardown_room(code);
        if removed {
            tracing::info!("Room {} cleaned up", code);
        }
        removed
    }

    /// Forget a connection and tear down its room, if any
    ///
    /// Safe to call more than once for the same id.
    pub async fn disconnect(&self, id: ConnectionId) {
        self.tables.write().await.remove_connection(id);
    }

    /// Push a frame onto one connection's queue
    pub async fn send_to(&self, id: ConnectionId, frame: Outbound) -> bool {
        self.tables.read().await.send(id, frame)
    }

    /// Push a frame onto the queue of the other member of `from`'s room
    ///
    /// Returns false when `from` has no room or the room has no counterpart.
    pub async fn send_to_counterpart(&self, from: ConnectionId, frame: Outbound) -> bool {
        let tables = self.tables.read().await;
        let counterpart = tables
            .connections
            .get(&from)
            .and_then(|conn| conn.room.as_ref())
            .and_then(|code| tables.rooms.get(code))
            .and_then(|room| room.counterpart(from));
        match counterpart {
            Some(peer) => tables.send(peer, frame),
            None => false,
        }
    }

    pub async fn mark_alive(&self, id: ConnectionId) {
        if let Some(conn) = self.tables.write().await.connections.get_mut(&id) {
            conn.alive = true;
        }
    }

    /// One liveness round
    ///
    /// Connections that did not answer the previous probe are returned;
    /// every other connection has its flag cleared and gets a new ping.
    pub async fn probe_connections(&self) -> Vec<ConnectionId> {
        let mut tables = self.tables.write().await;
        let mut dead = Vec::new();
        for (id, conn) in tables.connections.iter_mut() {
            if !conn.alive {
                dead.push(*id);
                continue;
            }
            conn.alive = false;
            let _ = conn.outbound.send(Outbound::Ping);
        }
        dead
    }

    /// Terminate a connection's transport and tear down its room
    ///
    /// Frames still queued for the connection are discarded.
    pub async fn reap(&self, id: ConnectionId) {
        if let Some(conn) = self.tables.write().await.remove_connection(id) {
            conn.terminate.cancel();
        }
    }

    /// Remove every room older than `max_age`
    pub async fn remove_expired(&self, max_age: Duration) -> Vec<RoomCode> {
        let now = Instant::now();
        let mut tables = self.tables.write().await;
        let expired: Vec<RoomCode> = tables
            .rooms
            .values()
            .filter(|room| now.duration_since(room.created_at) > max_age)
            .map(|room| room.code.clone())
            .collect();
        for code in &expired {
            tracing::info!("Cleaning up old room {}", code);
            tables.teardown_room(code);
        }
        expired
    }

    pub async fn room(&self, code: &RoomCode) -> Option<Room> {
        self.tables.read().await.rooms.get(code).cloned()
    }

    pub async fn role_of(&self, id: ConnectionId) -> Option<Role> {
        self.tables
            .read()
            .await
            .connections
            .get(&id)
            .map(|conn| conn.role)
    }

    pub async fn room_count(&self) -> usize {
        self.tables.read().await.rooms.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.tables.read().await.connections.len()
    }
}

/// Periodically drop rooms older than `max_age` until cancelled
pub async fn run_room_janitor(
    registry: Arc<Registry>,
    max_age: Duration,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let expired = registry.remove_expired(max_age).await;
                if !expired.is_empty() {
                    tracing::info!("Removed {} expired rooms", expired.len());
                }
            }
        }
    }
}
