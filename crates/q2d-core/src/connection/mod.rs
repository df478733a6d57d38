//! Connection-level primitives shared by both ends of the device link.

mod heartbeat;

pub use heartbeat::{HeartbeatTracker, TickOutcome};
