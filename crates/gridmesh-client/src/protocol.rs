//! Wire protocol carried over the collaboration transport.
//!
//! The standard y-sync protocol from [`yrs::sync`], one lib0 v1 encoded
//! [`Message`] per binary WebSocket message, so y-websocket servers and
//! browser peers can share a room with us.
//!
//! # Sync handshake
//!
//! ```text
//!   client                              server / peer
//!     │── Sync(SyncStep1(sv)) ──────────────▶│   "here is what I have"
//!     │◀────────────── Sync(SyncStep2(diff)) │   "here is what you lack"  → SYNCED
//!     │◀────────────── Sync(SyncStep1(sv)) ──│
//!     │── Sync(SyncStep2(diff)) ────────────▶│
//!     │                                      │
//!     │── Sync(Update(u)) ──────────────────▶│   one per local transaction
//!     │◀────────────────── Sync(Update(u)) ──│   relayed peer transactions
//! ```
//!
//! Presence travels in `Awareness` messages alongside; `AwarenessQuery` asks
//! the other end to resend every presence state it knows.

use gridmesh_crdt::TxnOrigin;
use tracing::trace;
use yrs::encoding::read::Cursor;
use yrs::sync::protocol::MessageReader;
use yrs::sync::{Awareness, Message, Protocol, SyncMessage};
use yrs::updates::decoder::DecoderV1;
use yrs::updates::encoder::Encode;
use yrs::{Transact, Update};

/// Errors from decoding messages or maintaining presence.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("message decoding failed: {0}")]
    Decode(#[from] yrs::encoding::read::Error),
    #[error("awareness error: {0}")]
    Awareness(#[from] yrs::sync::awareness::Error),
    #[error("sync error: {0}")]
    Sync(#[from] yrs::sync::Error),
}

/// Encode one message for the transport.
pub fn encode(message: &Message) -> Vec<u8> {
    message.encode_v1()
}

/// Decode every message packed into one transport frame. Servers usually
/// send one per frame; the protocol allows several back to back.
pub fn decode(frame: &[u8]) -> Result<Vec<Message>, ProtocolError> {
    let mut decoder = DecoderV1::new(Cursor::new(frame));
    MessageReader::new(&mut decoder)
        .map(|message| message.map_err(ProtocolError::from))
        .collect()
}

/// Short name for logging.
pub fn kind(message: &Message) -> &'static str {
    match message {
        Message::Sync(SyncMessage::SyncStep1(_)) => "sync-step-1",
        Message::Sync(SyncMessage::SyncStep2(_)) => "sync-step-2",
        Message::Sync(SyncMessage::Update(_)) => "update",
        Message::Auth(_) => "auth",
        Message::AwarenessQuery => "awareness-query",
        Message::Awareness(_) => "awareness",
        Message::Custom(..) => "custom",
    }
}

/// y-sync handling for a sheets document.
///
/// Same replies as [`yrs::sync::DefaultProtocol`], but peer updates are
/// merged under the remote origin so local undo never captures them, and
/// unknown message tags are skipped instead of failing the connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct SheetsProtocol;

impl Protocol for SheetsProtocol {
    fn handle_sync_step2(
        &self,
        awareness: &Awareness,
        update: Update,
    ) -> Result<Option<Message>, yrs::sync::Error> {
        let mut txn = awareness.doc().transact_mut_with(TxnOrigin::remote().to_origin());
        txn.apply_update(update)?;
        Ok(None)
    }

    fn missing_handle(
        &self,
        _awareness: &Awareness,
        tag: u8,
        data: Vec<u8>,
    ) -> Result<Option<Message>, yrs::sync::Error> {
        trace!("ignoring message with tag {} ({} bytes)", tag, data.len());
        Ok(None)
    }
}
