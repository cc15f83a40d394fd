//! Client configuration constants.
//!
//! Defaults for [`ClientConfig`](crate::ClientConfig) and fixed protocol values.

use std::time::Duration;

/// Default collaboration endpoint for local development.
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:1234";

/// First reconnect delay.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(1000);

/// Reconnect delays never exceed this.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// A peer not heard from for this long is dropped from presence.
pub const PRESENCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Subprotocol name offered on every WebSocket handshake. An access token,
/// when present, is offered as a second value.
pub const WS_SUBPROTOCOL: &str = "gridmesh";

/// Capacity of each session's event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Timeout for opening the transport (TCP + WebSocket handshake).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the initial tabular payload fetch.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment override for `server_url`.
pub const ENV_SERVER_URL: &str = "GRIDMESH_SERVER_URL";

/// Environment override for `payload_url`.
pub const ENV_PAYLOAD_URL: &str = "GRIDMESH_PAYLOAD_URL";
