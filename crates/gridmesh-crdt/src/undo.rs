//! Local-only undo/redo over the `sheets` collection.
//!
//! Only transactions whose origin has been registered with the scope are
//! recorded. Remote merges and first-opener seeding are never undoable here.
//!
//! Structural edits cannot be replayed incrementally against a live grid
//! widget. After [`UndoScope::undo`] or [`UndoScope::redo`] returns `true`
//! the caller discards its rendered grid and rebuilds it from
//! [`SheetsDocument::to_sheets`](crate::SheetsDocument::to_sheets).

use std::collections::HashSet;

use tracing::debug;
use yrs::UndoManager;
use yrs::undo::Options;

use crate::{SheetsDocument, TxnOrigin};

/// History manager bound to one document's `sheets` collection.
pub struct UndoScope {
    manager: UndoManager,
    tracked: HashSet<TxnOrigin>,
}

impl UndoScope {
    /// Track transactions carrying any of `origins`. Each tracked
    /// transaction becomes its own undo step.
    pub fn new(document: &SheetsDocument, origins: impl IntoIterator<Item = TxnOrigin>) -> Self {
        let options = Options {
            capture_timeout_millis: 0,
            ..Options::default()
        };
        let manager = UndoManager::with_scope_and_options(document.doc(), document.sheets(), options);
        let mut scope = Self {
            manager,
            tracked: HashSet::new(),
        };
        for origin in origins {
            scope.track_origin(origin);
        }
        scope
    }

    /// Add an origin to the local set. Idempotent.
    pub fn track_origin(&mut self, origin: TxnOrigin) {
        if self.tracked.contains(&origin) {
            return;
        }
        debug!("undo scope tracking {}", origin);
        self.manager.include_origin(origin.to_origin());
        self.tracked.insert(origin);
    }

    pub fn is_tracked(&self, origin: &TxnOrigin) -> bool {
        self.tracked.contains(origin)
    }

    /// Revert the most recent local step. Returns whether anything changed.
    pub fn undo(&mut self) -> bool {
        let changed = self.manager.undo_blocking();
        debug!("undo: changed={}", changed);
        changed
    }

    /// Reapply the most recently undone step. Returns whether anything changed.
    pub fn redo(&mut self) -> bool {
        let changed = self.manager.redo_blocking();
        debug!("redo: changed={}", changed);
        changed
    }

    pub fn can_undo(&self) -> bool {
        self.manager.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.manager.can_redo()
    }

    /// Drop both stacks.
    pub fn clear(&mut self) {
        self.manager.clear();
    }
}
