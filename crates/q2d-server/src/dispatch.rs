//! Best-effort command dispatch to the device slot.
//!
//! Delivery is at-most-once: no retry, no queue, no backoff. Every failure
//! is logged and swallowed here so nothing flows back into the request path.

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use q2d_core::EncodedCommand;
use q2d_core::protocol::{Codec, Message};

use crate::link::DeviceLink;

/// Why a command did not reach the device.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The slot is empty.
    #[error("device not connected")]
    NoDevice,

    /// The slot holds a connection that is already shutting down.
    #[error("device connection is not open")]
    NotOpen,

    /// The connection's outbound buffer is full.
    #[error("device outbound buffer full")]
    Backpressure,

    /// The slot owner task has stopped.
    #[error("device link stopped")]
    LinkStopped,

    /// The command could not be serialized.
    #[error(transparent)]
    Encode(#[from] q2d_core::Error),
}

/// Serializes encoded commands and hands them to the current device slot.
#[derive(Clone)]
pub struct CommandDispatcher {
    link: DeviceLink,
}

impl CommandDispatcher {
    pub fn new(link: DeviceLink) -> Self {
        Self { link }
    }

    /// Send `command` to the current device, if any.
    pub async fn dispatch(&self, command: &EncodedCommand) -> Result<(), DispatchError> {
        let frame = Codec::encode(&Message::command(command))?;
        self.link.send_frame(frame).await
    }

    /// Dispatch as a detached task. The outcome is only logged; callers may
    /// drop the handle.
    pub fn spawn(&self, command: EncodedCommand) -> JoinHandle<Result<(), DispatchError>> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let result = dispatcher.dispatch(&command).await;
            match &result {
                Ok(()) => info!(
                    bitstring = %command.bitstring,
                    light1 = command.lights.light1,
                    light2 = command.lights.light2,
                    "Sent command to device"
                ),
                Err(e) => warn!(
                    error = %e,
                    bitstring = %command.bitstring,
                    "Command not sent"
                ),
            }
            result
        })
    }
}
