//! Open sessions, keyed by room.
//!
//! Opening the same resource twice (under any spelling of its path) returns
//! the already-open session instead of creating a second replica.

use std::collections::HashMap;
use std::sync::Arc;

use gridmesh_types::{Identity, RoomId};
use parking_lot::Mutex;
use tracing::debug;

use crate::config::ClientConfig;
use crate::fetch::PayloadSource;
use crate::session::{SessionHandle, SessionOptions, open_session};
use crate::transport::Connector;

/// Opens and tracks sessions for one user.
pub struct SessionRegistry {
    config: ClientConfig,
    identity: Option<Identity>,
    connector: Arc<dyn Connector>,
    payload: Arc<dyn PayloadSource>,
    sessions: Mutex<HashMap<RoomId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(
        config: ClientConfig,
        identity: Option<Identity>,
        connector: Arc<dyn Connector>,
        payload: Arc<dyn PayloadSource>,
    ) -> Self {
        Self {
            config,
            identity,
            connector,
            payload,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Open `path`, or return its session if already open.
    pub fn open(&self, path: &str) -> SessionHandle {
        let room = RoomId::for_path(path);
        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(&room) {
            if !existing.is_closed() {
                return existing.clone();
            }
        }

        let mut options = SessionOptions::new(path).with_config(self.config.clone());
        options.identity = self.identity.clone();
        let handle = open_session(options, self.connector.clone(), self.payload.clone());
        sessions.insert(room, handle.clone());
        handle
    }

    pub fn get(&self, path: &str) -> Option<SessionHandle> {
        self.sessions
            .lock()
            .get(&RoomId::for_path(path))
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    /// Close and forget the session for `path`. Returns whether one was open.
    pub async fn close(&self, path: &str) -> bool {
        let handle = self.sessions.lock().remove(&RoomId::for_path(path));
        match handle {
            Some(handle) => {
                handle.close().await;
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&self) {
        let handles: Vec<SessionHandle> = self.sessions.lock().drain().map(|(_, h)| h).collect();
        debug!("closing {} sessions", handles.len());
        for handle in handles {
            handle.close().await;
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
