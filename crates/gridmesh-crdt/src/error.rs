//! Error types for CRDT operations.
//!
//! Grid mutations never fail: out-of-range indices are reported as
//! [`OpResult::Skipped`](crate::OpResult). Errors here cover the byte-level
//! boundary with peers.

use thiserror::Error;

/// Errors that can occur while exchanging document state with peers.
#[derive(Error, Debug)]
pub enum CrdtError {
    /// A state vector or update could not be decoded.
    #[error("failed to decode {what}: {message}")]
    Decode { what: &'static str, message: String },

    /// A decoded update could not be integrated.
    #[error("failed to apply update: {0}")]
    Apply(String),

    /// No sheet at this index.
    #[error("sheet {0} not found")]
    SheetNotFound(usize),
}
