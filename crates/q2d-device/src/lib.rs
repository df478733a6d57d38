//! q2d-device: Device-side client for query2dance.
//!
//! Provides:
//! - A reconnecting WebSocket client with application heartbeats
//! - An actuator model for the ten motion channels and two relays
//! - CLI parsing for the `q2d-device` binary

pub mod actuator;
pub mod cli;
pub mod reconnectable;

pub use actuator::{ActuatorState, Applied};
pub use cli::{Cli, CliLogFormat};
pub use reconnectable::{ClientConfig, ConnectionState, DeviceClient, DeviceEvent};
