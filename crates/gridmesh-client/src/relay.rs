//! In-memory collaboration relay.
//!
//! Plays the server role for any number of in-process sessions: keeps one
//! server-side document per room, answers the sync handshake, relays updates
//! and presence to the other connections in the room. Used by tests and by
//! embedders that want several sessions in one process without a network.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use gridmesh_crdt::SheetsDocument;
use gridmesh_types::{RoomId, SheetData};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use yrs::sync::{Awareness, Message, Protocol, SyncMessage};

use crate::protocol::{self, SheetsProtocol};
use crate::transport::{Connector, Transport, TransportError};

type ConnId = u64;

struct Room {
    document: SheetsDocument,
    /// Presence of every client in the room, over the room's document.
    awareness: Awareness,
    peers: HashMap<ConnId, mpsc::UnboundedSender<Vec<u8>>>,
    /// Which connection published each awareness client.
    owners: HashMap<u64, ConnId>,
}

impl Room {
    fn new() -> Self {
        let document = SheetsDocument::new();
        let awareness = Awareness::new(document.doc().clone());
        Self {
            document,
            awareness,
            peers: HashMap::new(),
            owners: HashMap::new(),
        }
    }

    fn send_to(&self, conn: ConnId, message: &Message) {
        if let Some(tx) = self.peers.get(&conn) {
            let _ = tx.send(protocol::encode(message));
        }
    }

    fn broadcast_except(&self, from: ConnId, message: &Message) {
        let bytes = protocol::encode(message);
        for (conn, tx) in &self.peers {
            if *conn != from {
                let _ = tx.send(bytes.clone());
            }
        }
    }

    fn handle(&mut self, from: ConnId, message: Message) {
        match message {
            Message::Sync(SyncMessage::SyncStep1(state_vector)) => {
                let diff = self.document.diff_since(&state_vector);
                self.send_to(from, &Message::Sync(SyncMessage::SyncStep2(diff)));
                let version = self.document.version();
                self.send_to(from, &Message::Sync(SyncMessage::SyncStep1(version)));
            }
            Message::Sync(SyncMessage::SyncStep2(update) | SyncMessage::Update(update)) => {
                if let Err(e) = self.document.apply_remote_update(&update) {
                    warn!("relay: dropping bad update from conn {}: {}", from, e);
                    return;
                }
                self.broadcast_except(from, &Message::Sync(SyncMessage::Update(update)));
            }
            Message::Awareness(update) => {
                for (client_id, entry) in &update.clients {
                    if &*entry.json == "null" {
                        self.owners.remove(client_id);
                    } else {
                        self.owners.insert(*client_id, from);
                    }
                }
                if let Err(e) = self.awareness.apply_update(update.clone()) {
                    warn!("relay: bad awareness update from conn {}: {}", from, e);
                }
                self.broadcast_except(from, &Message::Awareness(update));
            }
            other => match SheetsProtocol.handle_message(&self.awareness, other) {
                Ok(Some(reply)) => self.send_to(from, &reply),
                Ok(None) => {}
                Err(e) => warn!("relay: conn {}: {}", from, e),
            },
        }
    }

    /// Forget a connection and tell the others its clients left.
    fn disconnect(&mut self, conn: ConnId) {
        self.peers.remove(&conn);
        let owned = self.release(conn);
        if owned.is_empty() {
            return;
        }
        match self.awareness.update_with_clients(owned) {
            Ok(update) => self.broadcast_except(conn, &Message::Awareness(update)),
            Err(e) => warn!("relay: cannot announce departure of conn {}: {}", conn, e),
        }
    }

    /// Withdraw the presence published by `conn`. Returns the withdrawn
    /// client ids.
    fn release(&mut self, conn: ConnId) -> Vec<u64> {
        let owned: Vec<u64> = self
            .owners
            .iter()
            .filter(|(_, owner)| **owner == conn)
            .map(|(client_id, _)| *client_id)
            .collect();
        for client_id in &owned {
            self.owners.remove(client_id);
            self.awareness.remove_state(*client_id);
        }
        owned
    }
}

#[derive(Default)]
struct RelayInner {
    rooms: Mutex<HashMap<RoomId, Room>>,
    next_conn: AtomicU64,
    refusing: AtomicBool,
    attempts: AtomicU64,
    tokens: Mutex<Vec<Option<String>>>,
}

/// In-process collaboration server. Cheap to clone; clones share rooms.
#[derive(Clone, Default)]
pub struct LoopbackRelay {
    inner: Arc<RelayInner>,
}

impl LoopbackRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse (or accept again) new connections.
    pub fn set_refusing(&self, refusing: bool) {
        self.inner.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Close every open connection in `room`, as a server restart would.
    pub fn drop_connections(&self, room: &RoomId) {
        let mut rooms = self.inner.rooms.lock();
        if let Some(room) = rooms.get_mut(room) {
            debug!("relay: dropping {} connections", room.peers.len());
            room.peers.clear();
            // A restarted server remembers no presence.
            room.owners.clear();
            room.awareness = Awareness::new(room.document.doc().clone());
        }
    }

    pub fn connection_count(&self, room: &RoomId) -> usize {
        self.inner
            .rooms
            .lock()
            .get(room)
            .map_or(0, |room| room.peers.len())
    }

    /// Connection attempts seen so far, refused ones included.
    pub fn connect_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Access tokens offered by each accepted connection, in order.
    pub fn offered_tokens(&self) -> Vec<Option<String>> {
        self.inner.tokens.lock().clone()
    }

    /// The relay's copy of `room`, in plain form.
    pub fn sheets(&self, room: &RoomId) -> Option<Vec<SheetData>> {
        self.inner
            .rooms
            .lock()
            .get(room)
            .map(|room| room.document.to_sheets())
    }
}

#[async_trait]
impl Connector for LoopbackRelay {
    async fn connect(
        &self,
        room: &RoomId,
        token: Option<&str>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        if self.inner.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("relay refusing connections".into()));
        }

        let conn = self.inner.next_conn.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .rooms
            .lock()
            .entry(*room)
            .or_insert_with(Room::new)
            .peers
            .insert(conn, tx);
        self.inner.tokens.lock().push(token.map(String::from));
        debug!("relay: conn {} joined room {}", conn, room.short());

        Ok(Box::new(LoopbackTransport {
            conn,
            room: *room,
            relay: self.inner.clone(),
            inbox: rx,
            closed: false,
        }))
    }
}

struct LoopbackTransport {
    conn: ConnId,
    room: RoomId,
    relay: Arc<RelayInner>,
    inbox: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: bool,
}

impl LoopbackTransport {
    fn leave(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(room) = self.relay.rooms.lock().get_mut(&self.room) {
            room.disconnect(self.conn);
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        let messages =
            protocol::decode(&frame).map_err(|e| TransportError::ConnectionLost(e.to_string()))?;
        let mut rooms = self.relay.rooms.lock();
        let room = rooms.get_mut(&self.room).ok_or(TransportError::Closed)?;
        if !room.peers.contains_key(&self.conn) {
            return Err(TransportError::Closed);
        }
        for message in messages {
            trace!("relay: conn {} sent {}", self.conn, protocol::kind(&message));
            room.handle(self.conn, message);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.inbox.recv().await)
    }

    async fn close(&mut self) {
        self.leave();
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.leave();
    }
}
