//! Presence (awareness) channel.
//!
//! Ephemeral per-client state, never written to the document. Built on
//! [`yrs::sync::Awareness`]: each client owns one JSON record and a clock it
//! bumps on every change, receivers keep the newest clock per client, and a
//! `null` state means the client left. Peers that go quiet for longer than
//! the timeout are dropped locally.

use std::sync::Arc;
use std::time::Duration;

use gridmesh_overlay::generate_color;
use gridmesh_types::{ANONYMOUS_NAME, ClientId, Identity, Position, PresenceRecord, PresenceUser};
use tracing::{debug, trace};
use yrs::Doc;
use yrs::sync::time::{Clock, SystemClock, Timestamp};
use yrs::sync::{Awareness, AwarenessUpdate, Message};

use crate::protocol::ProtocolError;

/// The user block this client publishes.
///
/// Signed-in users are keyed by email (or id) so every tab of the same user
/// gets the same color. Anonymous clients are keyed by their replica id.
pub fn presence_user(identity: Option<&Identity>, client: ClientId) -> PresenceUser {
    match identity {
        Some(identity) => {
            let key = identity.presence_key().to_string();
            PresenceUser {
                name: identity.name.clone(),
                color: generate_color(&key),
                id: key,
            }
        }
        None => {
            let key = client.to_string();
            PresenceUser {
                name: ANONYMOUS_NAME.to_string(),
                color: generate_color(&key),
                id: key,
            }
        }
    }
}

/// Local presence plus everything heard from peers.
///
/// The awareness client id is the document's replica id.
pub struct PresenceChannel {
    awareness: Awareness,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl PresenceChannel {
    pub fn new(doc: Doc, timeout: Duration) -> Self {
        Self::with_clock(doc, timeout, SystemClock)
    }

    /// Channel whose timestamps (milliseconds) come from `clock`.
    pub fn with_clock(doc: Doc, timeout: Duration, clock: impl Clock + 'static) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(clock);
        let stamps = clock.clone();
        Self {
            awareness: Awareness::with_clock(doc, move || stamps.now()),
            clock,
            timeout,
        }
    }

    pub fn client(&self) -> ClientId {
        ClientId::from_raw(self.awareness.client_id())
    }

    pub fn awareness(&self) -> &Awareness {
        &self.awareness
    }

    pub fn local(&self) -> Option<PresenceRecord> {
        self.awareness.local_state()
    }

    pub fn local_position(&self) -> Option<Position> {
        self.local().and_then(|record| record.position)
    }

    /// Replace the local record (`None` withdraws it) and bump the clock.
    /// Returns the message to broadcast.
    pub fn set_local(&self, record: Option<&PresenceRecord>) -> Result<Message, ProtocolError> {
        match record {
            Some(record) => self.awareness.set_local_state(record)?,
            None => self.awareness.clean_local_state(),
        }
        self.local_message()
    }

    /// Update just the local position. No-op (`Ok(None)`) before a user
    /// record has been published.
    pub fn set_position(&self, position: Option<Position>) -> Result<Option<Message>, ProtocolError> {
        let Some(mut record) = self.local() else {
            return Ok(None);
        };
        record.position = position;
        self.set_local(Some(&record)).map(Some)
    }

    /// Bump the clock without changing state, so peers keep us alive.
    /// `None` when there is nothing published to renew.
    pub fn renew(&self) -> Result<Option<Message>, ProtocolError> {
        let Some(state) = self.awareness.local_state_raw() else {
            return Ok(None);
        };
        self.awareness.set_local_state_raw(state);
        self.local_message().map(Some)
    }

    /// The local entry (possibly a withdrawal) as an awareness message.
    pub fn local_message(&self) -> Result<Message, ProtocolError> {
        let update = self
            .awareness
            .update_with_clients([self.awareness.client_id()])?;
        Ok(Message::Awareness(update))
    }

    /// Apply a peer's awareness update. Returns whether the visible peer set
    /// changed. Entries about this client are ignored.
    pub fn apply_remote(&self, mut update: AwarenessUpdate) -> Result<bool, ProtocolError> {
        update.clients.remove(&self.awareness.client_id());
        if update.clients.is_empty() {
            return Ok(false);
        }
        let before = self.peers();
        self.awareness.apply_update(update)?;
        Ok(self.peers() != before)
    }

    /// Drop peers not heard from within the timeout. Returns who was dropped.
    pub fn prune_stale(&self) -> Vec<ClientId> {
        let now = self.clock.now();
        let timeout = self.timeout.as_millis() as Timestamp;
        let own = self.awareness.client_id();
        let stale: Vec<u64> = self
            .awareness
            .iter()
            .filter(|(id, state)| {
                *id != own
                    && state.data.is_some()
                    && now.saturating_sub(state.last_updated) > timeout
            })
            .map(|(id, _)| id)
            .collect();
        for id in &stale {
            debug!("presence timeout for {}", id);
            self.awareness.remove_state(*id);
        }
        stale.into_iter().map(ClientId::from_raw).collect()
    }

    /// Forget every peer (used when the session closes).
    pub fn clear_peers(&self) {
        let own = self.awareness.client_id();
        let peers: Vec<u64> = self
            .awareness
            .iter()
            .filter(|(id, state)| *id != own && state.data.is_some())
            .map(|(id, _)| id)
            .collect();
        for id in peers {
            self.awareness.remove_state(id);
        }
    }

    /// Current peers, ordered by client id. States that are not presence
    /// records are skipped.
    pub fn peers(&self) -> Vec<(ClientId, PresenceRecord)> {
        let own = self.awareness.client_id();
        let mut peers: Vec<_> = self
            .awareness
            .iter()
            .filter(|(id, _)| *id != own)
            .filter_map(|(id, state)| {
                let json = state.data?;
                match serde_json::from_str::<PresenceRecord>(&json) {
                    Ok(record) => Some((ClientId::from_raw(id), record)),
                    Err(e) => {
                        trace!("skipping presence state of {}: {}", id, e);
                        None
                    }
                }
            })
            .collect();
        peers.sort_by_key(|(id, _)| *id);
        peers
    }

    pub fn peer(&self, client: ClientId) -> Option<PresenceRecord> {
        self.awareness.state(client.get())
    }
}
