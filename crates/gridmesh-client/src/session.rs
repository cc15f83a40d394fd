//! Session coordinator.
//!
//! One session per open resource: the replicated document, its undo scope,
//! the presence channel, and an actor that owns the transport and keeps it
//! connected.
//!
//! ```text
//!   SessionHandle (Clone)          mpsc        SessionActor (spawned task)
//!   ┌──────────────────────┐  ───────────▶  ┌────────────────────────────┐
//!   │ .transact() / ops    │   Message      │ Transport + sync handshake │
//!   │ .undo() / .redo()    │                │ reconnect with backoff     │
//!   │ .set_selection()     │  ◀───────────  │ first-opener population    │
//!   └──────────────────────┘  watch/bcast   └────────────────────────────┘
//! ```
//!
//! # State Machine
//!
//! ```text
//! Init ──▶ Connecting ──▶ Syncing ──▶ Synced
//!              ▲                         │ transport error
//!              │                         ▼
//!         Reconnecting ◀──────────── Disconnected
//!
//! any state ──close()──▶ Closed
//! ```
//!
//! Local edits apply to the document immediately and are queued for the
//! transport; they are never lost while disconnected because the sync
//! handshake on reconnect carries everything the server lacks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use gridmesh_crdt::{
    CrdtError, LoadOptions, OpResult, SheetRef, SheetsDocument, SkipReason, TxnOrigin, UndoScope,
    is_empty_update, ops,
};
use gridmesh_types::{ClientId, Identity, Position, PresenceRecord, RoomId, SheetData, canonical_path};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};
use yrs::sync::{Message, Protocol, SyncMessage};
use yrs::{Array, TransactionMut};

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::fetch::{PayloadSource, initial_sheets};
use crate::presence::{PresenceChannel, presence_user};
use crate::protocol::{self, ProtocolError, SheetsProtocol};
use crate::transport::{Connector, Transport};

// ============================================================================
// Error Type
// ============================================================================

/// Errors from session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,
    #[error("session actor shut down")]
    Shutdown,
    #[error("document error: {0}")]
    Crdt(#[from] CrdtError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

// ============================================================================
// State + Events
// ============================================================================

/// Connection lifecycle of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Document exists, no transport yet.
    Init,
    Connecting,
    /// Transport open, waiting for the initial sync.
    Syncing,
    Synced,
    Disconnected,
    /// Waiting out the backoff before reconnect `attempt`.
    Reconnecting { attempt: u32 },
    Closed,
}

/// Where a document change came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOrigin {
    Local,
    Remote,
    Undo,
    /// First-opener population.
    Seed,
}

/// Events broadcast to UI subscribers.
///
/// On every `DocumentUpdated` the UI rebuilds its grid from
/// [`SessionHandle::sheets`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    DocumentUpdated { origin: UpdateOrigin },
    PresenceChanged,
    /// The initial sync completed; first render can happen.
    Synced,
    StateChanged(SessionState),
}

/// What to open.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Resource path; the room id is derived from its canonical form.
    pub path: String,
    /// Signed-in user, `None` for anonymous.
    pub identity: Option<Identity>,
    /// Replica id; random when `None`.
    pub client_id: Option<ClientId>,
    pub config: ClientConfig,
}

impl SessionOptions {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            identity: None,
            client_id: None,
            config: ClientConfig::default(),
        }
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }
}

// ============================================================================
// Commands (internal)
// ============================================================================

enum Command {
    /// Send a message if connected; dropped otherwise.
    Broadcast(Message),
    Close { reply: oneshot::Sender<()> },
}

/// State shared between the handle and the actor.
struct SessionShared {
    room: RoomId,
    path: String,
    client: ClientId,
    document: SheetsDocument,
    load_options: LoadOptions,
    presence: PresenceChannel,
    events: broadcast::Sender<SessionEvent>,
    closed: AtomicBool,
}

impl SessionShared {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

// ============================================================================
// SessionHandle (public API)
// ============================================================================

/// Handle to an open session. Clones share the session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
    undo: Arc<Mutex<UndoScope>>,
    local_origin: TxnOrigin,
    state: watch::Receiver<SessionState>,
    tx: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    // ── Identity ─────────────────────────────────────────────────────────

    pub fn room(&self) -> RoomId {
        self.shared.room
    }

    /// Canonical resource path.
    pub fn path(&self) -> &str {
        &self.shared.path
    }

    pub fn client_id(&self) -> ClientId {
        self.shared.client
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Wait until the session reaches `Synced`.
    pub async fn wait_synced(&self) -> Result<(), SessionError> {
        let mut state = self.state.clone();
        loop {
            let current = state.borrow_and_update().clone();
            match current {
                SessionState::Synced => return Ok(()),
                SessionState::Closed => return Err(SessionError::Closed),
                _ => {}
            }
            state.changed().await.map_err(|_| SessionError::Shutdown)?;
        }
    }

    /// Tear down the transport and stop the actor. Further edits are
    /// rejected with [`SessionError::Closed`].
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Close { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    // ── Document ─────────────────────────────────────────────────────────

    /// The replicated document. Read freely; write through
    /// [`SessionHandle::transact`] so changes reach peers.
    pub fn document(&self) -> &SheetsDocument {
        &self.shared.document
    }

    /// Plain sheets rebuilt from the document.
    pub fn sheets(&self) -> Vec<SheetData> {
        self.shared.document.to_sheets()
    }

    /// Run one user action as one transaction and broadcast the result.
    ///
    /// `label` names the UI action (`"paste"`, `"sort"`); it becomes part of
    /// the transaction origin and is tracked by the undo scope.
    pub fn transact<R>(
        &self,
        label: Option<&str>,
        f: impl FnOnce(&mut TransactionMut, &SheetsDocument) -> R,
    ) -> Result<R, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        let origin = match label {
            Some(label) => TxnOrigin::action(self.shared.client, label),
            None => self.local_origin.clone(),
        };
        self.undo.lock().track_origin(origin.clone());

        let (result, update) = self.shared.document.transact_with(&origin, f);
        if is_empty_update(&update) {
            trace!("local transaction {} changed nothing", origin);
            return Ok(result);
        }
        trace!("local transaction {} produced {} bytes", origin, update.len());
        self.broadcast(Message::Sync(SyncMessage::Update(update)))?;
        self.shared.emit(SessionEvent::DocumentUpdated { origin: UpdateOrigin::Local });
        Ok(result)
    }

    /// Discard every sheet and load `sheets` instead.
    pub fn replace_sheets(&self, sheets: &[SheetData]) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let origin = TxnOrigin::action(self.shared.client, "replace-sheets");
        self.undo.lock().track_origin(origin.clone());

        let options = LoadOptions {
            replace_existing: true,
            ..self.shared.load_options
        };
        let document = &self.shared.document;
        let ((), update) = document.capture(|| document.load_sheets(sheets, options, &origin));
        self.broadcast(Message::Sync(SyncMessage::Update(update)))?;
        self.shared.emit(SessionEvent::DocumentUpdated { origin: UpdateOrigin::Local });
        Ok(())
    }

    // ── Operators (one transaction each) ─────────────────────────────────

    pub fn set_cell(&self, sheet: usize, row: usize, col: usize, value: &str) -> Result<OpResult, SessionError> {
        self.edit_sheet(sheet, "set-cell", |txn, s| ops::set_cell(txn, &s.data, row, col, value))
    }

    pub fn insert_row(
        &self,
        sheet: usize,
        index: usize,
        values: Option<Vec<String>>,
    ) -> Result<OpResult, SessionError> {
        self.edit_sheet(sheet, "insert-row", |txn, s| ops::insert_row(txn, &s.data, index, values, None))
    }

    pub fn delete_row(&self, sheet: usize, index: usize, count: usize) -> Result<OpResult, SessionError> {
        self.edit_sheet(sheet, "delete-row", |txn, s| ops::delete_row(txn, &s.data, index, count))
    }

    pub fn move_row(&self, sheet: usize, from: usize, to: usize) -> Result<OpResult, SessionError> {
        self.edit_sheet(sheet, "move-row", |txn, s| ops::move_row(txn, &s.data, from, to))
    }

    pub fn insert_column(
        &self,
        sheet: usize,
        index: usize,
        values: Option<Vec<String>>,
    ) -> Result<OpResult, SessionError> {
        self.edit_sheet(sheet, "insert-column", |txn, s| {
            ops::insert_column(txn, &s.data, &s.columns, index, values.as_deref())
        })
    }

    pub fn delete_column(&self, sheet: usize, index: usize, count: usize) -> Result<OpResult, SessionError> {
        self.edit_sheet(sheet, "delete-column", |txn, s| {
            ops::delete_column(txn, &s.data, &s.columns, index, count)
        })
    }

    pub fn move_column(&self, sheet: usize, from: usize, to: usize) -> Result<OpResult, SessionError> {
        self.edit_sheet(sheet, "move-column", |txn, s| {
            ops::move_column(txn, &s.data, &s.columns, from, to)
        })
    }

    fn edit_sheet(
        &self,
        sheet: usize,
        label: &str,
        f: impl FnOnce(&mut TransactionMut, &SheetRef) -> OpResult,
    ) -> Result<OpResult, SessionError> {
        self.transact(Some(label), |txn, doc| match doc.sheet_in(&*txn, sheet) {
            Some(sheet_ref) => f(txn, &sheet_ref),
            None => {
                let sheets = doc.sheets().len(&*txn) as usize;
                warn!("{}: sheet {} out of bounds (sheets={})", label, sheet, sheets);
                OpResult::Skipped {
                    reason: SkipReason::SheetOutOfBounds { sheet, sheets },
                }
            }
        })
    }

    // ── Undo ─────────────────────────────────────────────────────────────

    /// Undo the last local step. On `true`, rebuild the grid from
    /// [`SessionHandle::sheets`].
    pub fn undo(&self) -> Result<bool, SessionError> {
        self.history(|undo| undo.undo())
    }

    pub fn redo(&self) -> Result<bool, SessionError> {
        self.history(|undo| undo.redo())
    }

    pub fn can_undo(&self) -> bool {
        self.undo.lock().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.lock().can_redo()
    }

    fn history(&self, f: impl FnOnce(&mut UndoScope) -> bool) -> Result<bool, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let (changed, update) = {
            let mut undo = self.undo.lock();
            self.shared.document.capture(|| f(&mut undo))
        };
        if changed {
            self.broadcast(Message::Sync(SyncMessage::Update(update)))?;
            self.shared.emit(SessionEvent::DocumentUpdated { origin: UpdateOrigin::Undo });
        }
        Ok(changed)
    }

    // ── Presence ─────────────────────────────────────────────────────────

    /// Publish the local cursor. `None` clears it (peers remove the overlay).
    pub fn set_selection(&self, position: Option<Position>) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        if let Some(message) = self.shared.presence.set_position(position)? {
            self.broadcast(message)?;
        }
        Ok(())
    }

    pub fn local_presence(&self) -> Option<PresenceRecord> {
        self.shared.presence.local()
    }

    pub fn local_position(&self) -> Option<Position> {
        self.shared.presence.local_position()
    }

    /// Every known peer, ordered by client id.
    pub fn peers(&self) -> Vec<(ClientId, PresenceRecord)> {
        self.shared.presence.peers()
    }

    fn broadcast(&self, message: Message) -> Result<(), SessionError> {
        self.tx
            .send(Command::Broadcast(message))
            .map_err(|_| SessionError::Shutdown)
    }
}

// ============================================================================
// SessionActor (internal, owns the transport)
// ============================================================================

/// Why a connection ended.
enum Exit {
    /// Close requested or every handle dropped.
    Closed,
    Lost(String),
}

struct SessionActor {
    shared: Arc<SessionShared>,
    connector: Arc<dyn Connector>,
    payload: Arc<dyn PayloadSource>,
    token: Option<String>,
    backoff: Backoff,
    presence_timeout: Duration,
    state_tx: watch::Sender<SessionState>,
    /// Set after the first completed sync; population runs at most once.
    synced_once: bool,
}

impl SessionActor {
    fn set_state(&self, state: SessionState) {
        if *self.state_tx.borrow() == state {
            return;
        }
        debug!("session {} -> {:?}", self.shared.room.short(), state);
        self.state_tx.send_replace(state.clone());
        self.shared.emit(SessionEvent::StateChanged(state));
    }

    /// Connect, drive, reconnect, until closed.
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let mut attempt: u32 = 0;
        let mut close_reply = None;

        'session: loop {
            if attempt > 0 {
                self.set_state(SessionState::Reconnecting { attempt });
                let delay = self.backoff.delay(attempt);
                debug!("reconnect attempt {} in {:?}", attempt, delay);
                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = &mut sleep => break,
                        cmd = rx.recv() => match cmd {
                            // Disconnected: the handshake on reconnect carries
                            // document state; presence is resent on connect.
                            Some(Command::Broadcast(_)) => {}
                            Some(Command::Close { reply }) => {
                                close_reply = Some(reply);
                                break 'session;
                            }
                            None => break 'session,
                        },
                    }
                }
            }

            self.set_state(SessionState::Connecting);
            let connector = self.connector.clone();
            let room = self.shared.room;
            let token = self.token.clone();
            let connect = connector.connect(&room, token.as_deref());
            tokio::pin!(connect);
            let transport = loop {
                tokio::select! {
                    result = &mut connect => break result,
                    cmd = rx.recv() => match cmd {
                        Some(Command::Broadcast(_)) => {}
                        Some(Command::Close { reply }) => {
                            close_reply = Some(reply);
                            break 'session;
                        }
                        None => break 'session,
                    },
                }
            };

            let transport = match transport {
                Ok(transport) => transport,
                Err(e) => {
                    warn!("connect to room {} failed: {}", self.shared.room.short(), e);
                    self.set_state(SessionState::Disconnected);
                    attempt = attempt.saturating_add(1);
                    continue;
                }
            };

            info!("connected to room {}", self.shared.room.short());
            match self.drive(transport, &mut rx).await {
                (Exit::Closed, reply) => {
                    close_reply = reply;
                    break;
                }
                (Exit::Lost(reason), _) => {
                    warn!("connection to room {} lost: {}", self.shared.room.short(), reason);
                    self.set_state(SessionState::Disconnected);
                    attempt = 1;
                }
            }
        }

        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.presence.clear_peers();
        self.set_state(SessionState::Closed);
        if let Some(reply) = close_reply {
            let _ = reply.send(());
        }
        debug!("session actor for room {} stopped", self.shared.room.short());
    }

    /// Run one connection until it ends.
    async fn drive(
        &mut self,
        mut transport: Box<dyn Transport>,
        rx: &mut mpsc::UnboundedReceiver<Command>,
    ) -> (Exit, Option<oneshot::Sender<()>>) {
        self.set_state(SessionState::Syncing);

        for message in self.hello_messages() {
            if let Err(e) = self.send(&mut transport, &message).await {
                return (Exit::Lost(e), None);
            }
        }

        let period = (self.presence_timeout / 2).max(Duration::from_millis(10));
        let mut renew = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Broadcast(message)) => {
                        if let Err(e) = self.send(&mut transport, &message).await {
                            return (Exit::Lost(e), None);
                        }
                    }
                    Some(Command::Close { reply }) => {
                        self.say_goodbye(&mut transport).await;
                        return (Exit::Closed, Some(reply));
                    }
                    None => {
                        self.say_goodbye(&mut transport).await;
                        return (Exit::Closed, None);
                    }
                },
                inbound = transport.recv() => match inbound {
                    Ok(Some(bytes)) => {
                        let replies = match self.handle_frame(&bytes).await {
                            Ok(replies) => replies,
                            Err(reason) => return (Exit::Lost(reason), None),
                        };
                        for reply in replies {
                            if let Err(e) = self.send(&mut transport, &reply).await {
                                return (Exit::Lost(e), None);
                            }
                        }
                    }
                    Ok(None) => return (Exit::Lost("closed by server".into()), None),
                    Err(e) => return (Exit::Lost(e.to_string()), None),
                },
                _ = renew.tick() => {
                    let presence = &self.shared.presence;
                    if !presence.prune_stale().is_empty() {
                        self.shared.emit(SessionEvent::PresenceChanged);
                    }
                    let renewal = match presence.renew() {
                        Ok(renewal) => renewal,
                        Err(e) => {
                            warn!("cannot renew local presence: {}", e);
                            None
                        }
                    };
                    if let Some(message) = renewal {
                        if let Err(e) = self.send(&mut transport, &message).await {
                            return (Exit::Lost(e), None);
                        }
                    }
                }
            }
        }
    }

    /// Sync step 1, our presence, and a request for everyone else's.
    fn hello_messages(&self) -> Vec<Message> {
        let mut messages = vec![Message::Sync(SyncMessage::SyncStep1(self.shared.document.version()))];
        match self.shared.presence.local_message() {
            Ok(message) => messages.push(message),
            Err(e) => warn!("cannot encode local presence: {}", e),
        }
        messages.push(Message::AwarenessQuery);
        messages
    }

    /// Withdraw our presence and close the transport.
    async fn say_goodbye(&self, transport: &mut Box<dyn Transport>) {
        match self.shared.presence.set_local(None) {
            Ok(message) => {
                let _ = self.send(transport, &message).await;
            }
            Err(e) => warn!("cannot encode presence removal: {}", e),
        }
        transport.close().await;
    }

    async fn send(&self, transport: &mut Box<dyn Transport>, message: &Message) -> Result<(), String> {
        let bytes = protocol::encode(message);
        trace!("-> {} ({} bytes)", protocol::kind(message), bytes.len());
        transport.send(bytes).await.map_err(|e| e.to_string())
    }

    /// Handle one inbound frame, returning messages to send back. `Err` ends
    /// the connection.
    async fn handle_frame(&mut self, bytes: &[u8]) -> Result<Vec<Message>, String> {
        let messages = match protocol::decode(bytes) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("dropping undecodable frame: {}", e);
                return Ok(Vec::new());
            }
        };

        let mut out = Vec::new();
        for message in messages {
            trace!("<- {}", protocol::kind(&message));
            match message {
                Message::Awareness(update) => match self.shared.presence.apply_remote(update) {
                    Ok(true) => self.shared.emit(SessionEvent::PresenceChanged),
                    Ok(false) => {}
                    Err(e) => warn!("ignoring presence update: {}", e),
                },
                Message::Auth(Some(reason)) => return Err(format!("permission denied: {reason}")),
                message => {
                    let completes_sync = matches!(message, Message::Sync(SyncMessage::SyncStep2(_)));
                    let merges = matches!(
                        message,
                        Message::Sync(SyncMessage::SyncStep2(_) | SyncMessage::Update(_))
                    );
                    match SheetsProtocol.handle_message(self.shared.presence.awareness(), message) {
                        Ok(reply) => out.extend(reply),
                        Err(e) => {
                            error!("failed to handle sync message: {}", e);
                            continue;
                        }
                    }
                    if merges {
                        self.shared.emit(SessionEvent::DocumentUpdated { origin: UpdateOrigin::Remote });
                    }
                    if completes_sync && *self.state_tx.borrow() != SessionState::Synced {
                        self.set_state(SessionState::Synced);
                        self.shared.emit(SessionEvent::Synced);
                        if !self.synced_once {
                            self.synced_once = true;
                            out.extend(self.populate_if_empty().await);
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    /// First opener: fetch the tabular payload and seed the empty document.
    /// Later joiners already hold the peers' sheets and skip this.
    async fn populate_if_empty(&self) -> Option<Message> {
        if !self.shared.document.is_empty() {
            return None;
        }
        info!("room {} is empty, populating from {}", self.shared.room.short(), self.shared.path);
        let sheets = initial_sheets(self.payload.as_ref(), &self.shared.path, self.token.as_deref()).await;

        let document = &self.shared.document;
        if !document.is_empty() {
            return None;
        }
        let ((), update) = document.capture(|| document.load_sheets(&sheets, self.shared.load_options, &TxnOrigin::seed()));
        self.shared.emit(SessionEvent::DocumentUpdated { origin: UpdateOrigin::Seed });
        Some(Message::Sync(SyncMessage::Update(update)))
    }
}

// ============================================================================
// Public spawn function
// ============================================================================

/// Open a session and start connecting in the background.
///
/// Must be called from within a tokio runtime. Returns immediately in state
/// `Init`/`Connecting`; use [`SessionHandle::wait_synced`] or the event
/// stream to learn when the document is ready to render.
pub fn open_session(
    options: SessionOptions,
    connector: Arc<dyn Connector>,
    payload: Arc<dyn PayloadSource>,
) -> SessionHandle {
    let client = options.client_id.unwrap_or_else(ClientId::random);
    let path = canonical_path(&options.path);
    let room = RoomId::for_path(&path);
    let document = SheetsDocument::with_client_id(client);
    let local_origin = TxnOrigin::local(client);
    let undo = UndoScope::new(&document, [local_origin.clone()]);

    let presence = PresenceChannel::new(document.doc().clone(), options.config.presence_timeout());
    let user = presence_user(options.identity.as_ref(), client);
    if let Err(e) = presence.set_local(Some(&PresenceRecord::new(user))) {
        warn!("cannot encode local presence: {}", e);
    }

    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let (state_tx, state_rx) = watch::channel(SessionState::Init);
    let shared = Arc::new(SessionShared {
        room,
        path,
        client,
        document,
        load_options: options.config.load_options(),
        presence,
        events,
        closed: AtomicBool::new(false),
    });

    info!(
        "opening session for {} (room {}, client {})",
        shared.path,
        room.short(),
        client
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let actor = SessionActor {
        shared: shared.clone(),
        connector,
        payload,
        token: options.identity.as_ref().and_then(|i| i.access_token.clone()),
        backoff: options.config.backoff(),
        presence_timeout: options.config.presence_timeout(),
        state_tx,
        synced_once: false,
    };
    tokio::spawn(actor.run(rx));

    SessionHandle {
        shared,
        undo: Arc::new(Mutex::new(undo)),
        local_origin,
        state: state_rx,
        tx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::StaticPayloadSource;
    use crate::relay::LoopbackRelay;
    use gridmesh_types::Selection;

    fn fast_config() -> ClientConfig {
        ClientConfig {
            initial_backoff_millis: 10,
            max_backoff_secs: 1,
            ..ClientConfig::default()
        }
    }

    fn open(relay: &LoopbackRelay, client: u64, payload: StaticPayloadSource) -> SessionHandle {
        let options = SessionOptions::new("/Team//Budget.sheet/")
            .with_client_id(ClientId::from_raw(client))
            .with_config(fast_config());
        open_session(options, Arc::new(relay.clone()), Arc::new(payload))
    }

    async fn next_matching(
        rx: &mut broadcast::Receiver<SessionEvent>,
        want: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(event) if want(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn test_first_opener_populates_from_payload() {
        let relay = LoopbackRelay::new();
        let payload = StaticPayloadSource::new(vec![SheetData::from_rows("inventory", [vec!["sku", "qty"]])]);
        let session = open(&relay, 1, payload);
        let mut events = session.subscribe();

        session.wait_synced().await.unwrap();
        next_matching(&mut events, |e| {
            matches!(e, SessionEvent::DocumentUpdated { origin: UpdateOrigin::Seed })
        })
        .await;

        let sheets = session.sheets();
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].sheet_name, "inventory");
        assert_eq!(sheets[0].data.len(), 20);
        assert_eq!(session.path(), "team/budget.sheet");
        assert!(!session.can_undo());
        session.close().await;
    }

    #[tokio::test]
    async fn test_failed_fetch_falls_back_to_default_sheet() {
        let relay = LoopbackRelay::new();
        let session = open(&relay, 1, StaticPayloadSource::empty());
        let mut events = session.subscribe();
        session.wait_synced().await.unwrap();
        next_matching(&mut events, |e| {
            matches!(e, SessionEvent::DocumentUpdated { origin: UpdateOrigin::Seed })
        })
        .await;

        let sheets = session.sheets();
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].sheet_name, "sheet1");
        assert!(sheets[0].data.iter().all(|row| row.len() == 20 && row.iter().all(String::is_empty)));
        session.close().await;
    }

    #[tokio::test]
    async fn test_local_edit_and_undo() {
        let relay = LoopbackRelay::new();
        let session = open(&relay, 1, StaticPayloadSource::empty());
        let mut events = session.subscribe();
        session.wait_synced().await.unwrap();
        next_matching(&mut events, |e| {
            matches!(e, SessionEvent::DocumentUpdated { origin: UpdateOrigin::Seed })
        })
        .await;

        assert_eq!(session.set_cell(0, 0, 0, "Test").unwrap(), OpResult::Applied);
        assert_eq!(session.sheets()[0].data[0][0], "Test");
        assert!(matches!(
            session.set_cell(3, 0, 0, "x").unwrap(),
            OpResult::Skipped { reason: SkipReason::SheetOutOfBounds { sheet: 3, sheets: 1 } }
        ));

        assert!(session.can_undo());
        assert!(session.undo().unwrap());
        assert_eq!(session.sheets()[0].data[0][0], "");
        assert!(session.redo().unwrap());
        assert_eq!(session.sheets()[0].data[0][0], "Test");
        session.close().await;
    }

    #[tokio::test]
    async fn test_skipped_edit_is_not_published() {
        let relay = LoopbackRelay::new();
        let session = open(&relay, 1, StaticPayloadSource::empty());
        let mut seeded = session.subscribe();
        session.wait_synced().await.unwrap();
        next_matching(&mut seeded, |e| {
            matches!(e, SessionEvent::DocumentUpdated { origin: UpdateOrigin::Seed })
        })
        .await;

        let mut events = session.subscribe();
        assert!(!session.set_cell(0, 99, 0, "x").unwrap().is_applied());
        assert!(!session.delete_row(4, 0, 1).unwrap().is_applied());
        assert!(!session.move_column(0, 1, 2).unwrap().is_applied());
        assert!(!session.can_undo());

        assert_eq!(session.set_cell(0, 0, 0, "x").unwrap(), OpResult::Applied);
        let first = next_matching(&mut events, |e| matches!(e, SessionEvent::DocumentUpdated { .. })).await;
        assert_eq!(first, SessionEvent::DocumentUpdated { origin: UpdateOrigin::Local });
        assert!(
            std::iter::from_fn(|| events.try_recv().ok())
                .all(|e| !matches!(e, SessionEvent::DocumentUpdated { .. }))
        );
        session.close().await;
    }

    #[tokio::test]
    async fn test_closed_session_rejects_edits() {
        let relay = LoopbackRelay::new();
        let session = open(&relay, 1, StaticPayloadSource::empty());
        session.wait_synced().await.unwrap();
        session.close().await;

        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(session.set_cell(0, 0, 0, "x"), Err(SessionError::Closed)));
        assert!(matches!(session.set_selection(None), Err(SessionError::Closed)));
        assert!(matches!(session.wait_synced().await, Err(SessionError::Closed)));
        assert_eq!(relay.connection_count(&session.room()), 0);
    }

    #[tokio::test]
    async fn test_reconnects_after_refusal() {
        let relay = LoopbackRelay::new();
        relay.set_refusing(true);
        let session = open(&relay, 1, StaticPayloadSource::empty());
        let mut state = session.subscribe_state();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !matches!(*state.borrow_and_update(), SessionState::Reconnecting { attempt } if attempt >= 2) {
                state.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        relay.set_refusing(false);
        tokio::time::timeout(Duration::from_secs(5), session.wait_synced())
            .await
            .unwrap()
            .unwrap();
        assert!(relay.connect_attempts() >= 3);
        session.close().await;
    }

    #[tokio::test]
    async fn test_selection_updates_local_presence() {
        let relay = LoopbackRelay::new();
        let session = open(&relay, 77, StaticPayloadSource::empty());
        session.wait_synced().await.unwrap();

        let local = session.local_presence().unwrap();
        assert_eq!(local.user.name, "Anonymous");
        assert_eq!(local.user.id, "77");

        let position = Position { sheet_idx: 0, selection: Selection::cell(2, 3) };
        session.set_selection(Some(position)).unwrap();
        assert_eq!(session.local_position(), Some(position));
        session.close().await;
    }
}
