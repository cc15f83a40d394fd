//! Presence records broadcast over the awareness channel.
//!
//! Presence is ephemeral: it is never written into the replicated document
//! and disappears when the peer disconnects or times out. The JSON shape is
//! shared with browser peers:
//!
//! ```text
//! { "user": { "name": "Ada", "color": "#3fa96b", "id": "ada@example.org" },
//!   "position": { "sheetIdx": 0, "selection": { "x1": 2, "y1": 4, "x2": 2, "y2": 4 } } }
//! ```
//!
//! Selections use grid coordinates: `x` is the column, `y` is the row.

use serde::{Deserialize, Serialize};

/// Who a peer is, as shown in its overlay label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUser {
    pub name: String,
    /// Hex triplet, e.g. `#3fa96b`.
    pub color: String,
    pub id: String,
}

/// A rectangular cell selection. Corners may arrive in any order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Selection {
    /// A single-cell selection at (`col`, `row`).
    pub fn cell(col: u32, row: u32) -> Self {
        Self { x1: col, y1: row, x2: col, y2: row }
    }

    /// Same rectangle with `x1 <= x2` and `y1 <= y2`.
    pub fn normalized(&self) -> Self {
        Self {
            x1: self.x1.min(self.x2),
            y1: self.y1.min(self.y2),
            x2: self.x1.max(self.x2),
            y2: self.y1.max(self.y2),
        }
    }

    /// The anchor cell `(col, row)`: where the selection started.
    pub fn active_cell(&self) -> (u32, u32) {
        (self.x1, self.y1)
    }

    /// Whether `other` lies entirely inside this selection.
    pub fn contains(&self, other: &Selection) -> bool {
        let outer = self.normalized();
        let inner = other.normalized();
        inner.x1 >= outer.x1 && inner.x2 <= outer.x2 && inner.y1 >= outer.y1 && inner.y2 <= outer.y2
    }

    /// The single row this selection covers, if it covers exactly one.
    pub fn single_row(&self) -> Option<u32> {
        (self.y1 == self.y2).then_some(self.y1)
    }
}

/// Where a peer's cursor is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub sheet_idx: usize,
    pub selection: Selection,
}

/// The full awareness state a client publishes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user: PresenceUser,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl PresenceRecord {
    pub fn new(user: PresenceUser) -> Self {
        Self { user, position: None }
    }
}

// ============================================================================
// Tests
// ============================================================================
