//! Transaction origins.
//!
//! Every write transaction carries an origin label. The undo scope tracks only
//! transactions whose origin belongs to this session, so remote merges and
//! first-opener seeding never land on the local undo stack.

use std::fmt;

use gridmesh_types::ClientId;
use yrs::Origin;

/// Origin label attached to a write transaction.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TxnOrigin(String);

impl TxnOrigin {
    /// Edits made by this session's user.
    pub fn local(client: ClientId) -> Self {
        Self(format!("local:{client}"))
    }

    /// A labelled UI action from this session (`"local:42:paste"`). Tracked by
    /// the undo scope only when registered alongside [`TxnOrigin::local`].
    pub fn action(client: ClientId, label: &str) -> Self {
        Self(format!("local:{client}:{label}"))
    }

    /// Updates merged from peers.
    pub fn remote() -> Self {
        Self("remote".to_string())
    }

    /// Initial population of an empty document by the first opener.
    pub fn seed() -> Self {
        Self("seed".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The runtime origin value for `transact_mut_with`.
    pub fn to_origin(&self) -> Origin {
        Origin::from(self.0.as_str())
    }

    /// Whether this origin was produced by a local session.
    pub fn is_local(&self) -> bool {
        self.0.starts_with("local:")
    }
}

impl fmt::Display for TxnOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TxnOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxnOrigin({})", self.0)
    }
}
