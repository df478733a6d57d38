//! Session management for device clients.
//!
//! This module provides:
//! - Reconnection handling with fixed-delay unbounded retry

mod reconnect;

pub use reconnect::ReconnectionHandler;
