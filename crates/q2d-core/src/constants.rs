//! Protocol and configuration constants for query2dance.

use std::time::Duration;

// =============================================================================
// Encoding Constants
// =============================================================================

/// Number of addressable targets on the controller.
pub const BITSTRING_LEN: usize = 10;

/// Canonical target identifiers, in bit order.
pub const CANONICAL_IDS: [&str; BITSTRING_LEN] =
    ["1", "2", "3", "4", "5", "6", "7", "8", "9", "10"];

/// Row label that switches the first relay on.
pub const LIGHT1_LABEL: &str = "light 1";

/// Row label that switches the second relay on.
pub const LIGHT2_LABEL: &str = "light 2";

/// Row field holding the target identifier.
pub const ID_FIELD: &str = "id";

/// Row field matched against light labels.
pub const NAME_FIELD: &str = "name";

// =============================================================================
// Device Channel Constants
// =============================================================================

/// Default path of the device WebSocket endpoint.
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Status text sent to a device as soon as it occupies the slot.
pub const CONNECTED_STATUS: &str = "Connected to Server";

/// Outbound frames buffered per device connection before dispatch drops.
pub const OUTBOUND_QUEUE_DEPTH: usize = 32;

/// Device name announced in the hello message.
pub const DEFAULT_DEVICE_NAME: &str = "esp32";

// =============================================================================
// Timing Constants
// =============================================================================

/// Server-side ping interval for the device slot.
pub const LINK_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Device-side application heartbeat interval.
pub const DEVICE_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Fixed delay between device reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

// =============================================================================
// Server Defaults
// =============================================================================

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default shared secret for `POST /query`.
pub const DEFAULT_API_KEY: &str = "MY_SECRET_KEY";

/// Default SQLite database path.
pub const DEFAULT_DB_PATH: &str = "toys.db";

/// Default server URL for device clients.
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:3000/ws";
