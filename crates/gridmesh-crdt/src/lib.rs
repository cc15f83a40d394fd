//! Replicated sheet model for gridmesh.
//!
//! Maps a plain grid onto a Yjs-compatible document (via `yrs`) so any number
//! of peers can edit it concurrently and converge.
//!
//! # Layers
//!
//! - [`SheetsDocument`]: the converter. Populates the document from plain
//!   sheets and reads it back. The only bulk writer.
//! - [`ops`]: the mutation operators (set cell, insert/delete/move row and
//!   column), called inside one transaction per user action.
//! - [`UndoScope`]: undo/redo restricted to this session's origins.
//!
//! # CRDT Semantics
//!
//! - **Cells**: `value` is a map entry, last-writer-wins by replica clock
//! - **Rows / columns**: sequence elements, concurrent inserts interleave by
//!   the runtime's ordering rules; no custom conflict policy on top
//! - **Moves**: delete + insert, so concurrent edits to a moving row land on
//!   the deleted copy

mod document;
mod error;
pub mod ops;
mod origin;
mod undo;
pub mod value;

pub use document::{
    LoadOptions, MIN_COLS, MIN_ROWS, SHEETS_KEY, SheetRef, SheetsDocument, is_empty_update,
};
pub use error::CrdtError;
pub use ops::{
    DEFAULT_COLUMN_WIDTH, OpResult, SkipReason, cell_value, delete_column, delete_row,
    insert_column, insert_row, move_column, move_row, set_cell,
};
pub use origin::TxnOrigin;
pub use undo::UndoScope;

/// Result type for CRDT operations.
pub type Result<T> = std::result::Result<T, CrdtError>;
