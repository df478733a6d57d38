//! q2d-test-utils: Test infrastructure for query2dance.
//!
//! Provides:
//! - FakeStore: scripted query store that records every call
//! - MockDevice: raw WebSocket device that exposes exactly what the server sent
//! - rows: build result rows from JSON literals

mod fake_store;
mod mock_device;

pub use fake_store::{FakeStore, rows};
pub use mock_device::MockDevice;
