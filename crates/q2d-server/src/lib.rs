//! q2d-server: Query gateway and device link server.
//!
//! Provides:
//! - `POST /query`: authenticated query execution with encoded results
//! - The single-device WebSocket slot with heartbeat liveness
//! - Best-effort dispatch of encoded commands to the device
//! - The seeded SQLite store

pub mod cli;
pub mod dispatch;
pub mod gateway;
pub mod link;
pub mod server;
pub mod store;

pub use cli::{Cli, CliLogFormat};
pub use dispatch::{CommandDispatcher, DispatchError};
pub use gateway::{GatewayError, QueryGateway, QueryRequest, QueryResponse};
pub use link::{DetachReason, DeviceLink, LinkConfig, LinkState};
pub use server::{Server, ServerConfig};
pub use store::SqliteStore;
