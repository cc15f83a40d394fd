//! Gridmesh collaboration client.
//!
//! Binds a replicated sheets document to a room on the collaboration server:
//! runs the sync handshake, relays local edits, tracks peer presence, and
//! reconnects with exponential backoff when the transport drops.
//!
//! Entry points:
//! - [`open_session`] for a single resource
//! - [`SessionRegistry`] to share sessions across views of the same resource
//!
//! Must be used from within a tokio runtime.

pub mod backoff;
pub mod config;
pub mod constants;
pub mod fetch;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod session;
pub mod transport;

pub use backoff::Backoff;
pub use config::{ClientConfig, ConfigError};
pub use fetch::{FetchError, HttpPayloadSource, PayloadSource, StaticPayloadSource, initial_sheets};
pub use presence::{PresenceChannel, presence_user};
pub use protocol::{ProtocolError, SheetsProtocol};
pub use registry::SessionRegistry;
pub use relay::LoopbackRelay;
pub use session::{
    SessionError, SessionEvent, SessionHandle, SessionOptions, SessionState, UpdateOrigin,
    open_session,
};
pub use transport::{Connector, Transport, TransportError, WebSocketConnector};
