//! Typed identifiers for replicas and rooms.
//!
//! `ClientId` names one replica of a document (one browser tab, one CLI
//! process). It is random, non-zero, and fits in 53 bits so it survives a
//! round trip through a JavaScript number on the other end of the wire.
//!
//! `RoomId` names the shared document a set of replicas collaborate on. It is
//! a UUIDv5 derived from the canonical resource path, so every client that
//! opens the same resource lands in the same room without coordination.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Largest id that round-trips through an IEEE-754 double.
const MAX_SAFE_CLIENT_ID: u64 = (1 << 53) - 1;

/// A replica identifier.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(u64);

impl ClientId {
    /// Generate a fresh random id in `1..2^53`.
    pub fn random() -> Self {
        Self(rand::thread_rng().gen_range(1..=MAX_SAFE_CLIENT_ID))
    }

    /// Wrap a raw id. Zero is reserved and mapped to 1.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw.clamp(1, MAX_SAFE_CLIENT_ID))
    }

    /// The raw numeric value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

// ── RoomId ──────────────────────────────────────────────────────────────────

/// Fixed namespace for deriving room ids via UUIDv5.
const GRIDMESH_ROOM_NS: uuid::Uuid = uuid::uuid!("3f6c2a9e-51d4-4b7a-9e0c-8d2f61a4c5b3");

/// A collaboration room identifier (UUIDv5 of the canonical resource path).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(uuid::Uuid);

impl RoomId {
    /// Derive the room for a resource path.
    ///
    /// Deterministic: `"/Docs//Budget/"` and `"docs/budget"` name the same room.
    pub fn for_path(path: &str) -> Self {
        let canonical = canonical_path(path);
        Self(uuid::Uuid::new_v5(&GRIDMESH_ROOM_NS, canonical.as_bytes()))
    }

    /// Full 32-character hex string (no hyphens). Used as the room segment of
    /// the transport URL.
    pub fn to_hex(&self) -> String {
        self.0.as_simple().to_string()
    }

    /// First 8 hex characters, for logs.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoomId({})", self.short())
    }
}

/// Normalize a resource path: trim whitespace, drop empty segments (leading,
/// trailing, and repeated slashes), and lowercase.
pub fn canonical_path(path: &str) -> String {
    path.trim()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.to_lowercase())
        .collect::<Vec<_>>()
        .join("/")
}

// ============================================================================
// Tests
// ============================================================================
