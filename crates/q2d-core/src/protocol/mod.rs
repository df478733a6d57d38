//! Protocol module for the device channel wire format.
//!
//! This module provides:
//! - Message types exchanged with the controller device
//! - JSON text-frame codec

mod codec;
mod message;

pub use codec::Codec;
pub use message::*;
