//! Shared types for gridmesh.
//!
//! A leaf crate with **no internal gridmesh dependencies**: replica and room
//! identifiers, the identity handed over by the identity provider, presence
//! records exchanged over the awareness channel, and the plain sheet payload
//! the converter and the initial fetch work with.
//!
//! |--------------------|---------------------------------------------|
//! | Type               | Purpose                                     |
//! |--------------------|---------------------------------------------|
//! | [`ClientId`]       | Which replica (one per tab/process)         |
//! | [`RoomId`]         | Which shared document (from resource path)  |
//! | [`Identity`]       | Signed-in user + transport token            |
//! | [`PresenceRecord`] | Ephemeral cursor/selection broadcast        |
//! | [`SheetData`]      | Plain grid + column metadata                |
//! |--------------------|---------------------------------------------|

pub mod identity;
pub mod ids;
pub mod payload;
pub mod presence;
pub mod sheet;

pub use identity::{ANONYMOUS_NAME, Identity};
pub use ids::{ClientId, RoomId, canonical_path};
pub use payload::{PayloadError, parse_export, sheets_from_export};
pub use presence::{Position, PresenceRecord, PresenceUser, Selection};
pub use sheet::{ColumnMeta, DEFAULT_SHEET_NAME, SheetData};
