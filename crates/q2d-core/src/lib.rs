//! q2d-core: Shared library for the query2dance command bridge.
//!
//! This crate provides:
//! - Result encoding (rows to bitstring and light flags)
//! - Device channel message definitions and JSON codec
//! - Heartbeat liveness tracking for device links
//! - Fixed-delay reconnection handling for device clients
//! - The query store collaborator interface
//! - Logging setup

pub mod connection;
pub mod constants;
pub mod encoder;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod store;

pub use encoder::{Bitstring, EncodedCommand, LightFlags, Row, encode, flags};
pub use error::{Error, Result};
pub use logging::{LogFormat, init_logging};
pub use store::{QueryStore, StoreError};
