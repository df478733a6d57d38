//! Device channel message enum.
//!
//! Every frame is a JSON object with a `type` discriminator.

use serde::{Deserialize, Serialize};

use crate::encoder::{Bitstring, EncodedCommand};

/// Actuation command payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPayload {
    /// One bit per canonical id.
    pub bitstring: Bitstring,
    /// First relay state.
    pub light1: bool,
    /// Second relay state.
    pub light2: bool,
}

impl From<EncodedCommand> for CommandPayload {
    fn from(cmd: EncodedCommand) -> Self {
        Self {
            bitstring: cmd.bitstring,
            light1: cmd.lights.light1,
            light2: cmd.lights.light2,
        }
    }
}

impl From<&EncodedCommand> for CommandPayload {
    fn from(cmd: &EncodedCommand) -> Self {
        cmd.clone().into()
    }
}

/// Top-level device channel message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// Device keep-alive.
    Heartbeat {
        /// Sender timestamp in ms since the Unix epoch.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<u64>,
    },
    /// Informational status line.
    Status { msg: String },
    /// Actuation command.
    Cmd(CommandPayload),
    /// Device self-announcement after connecting.
    Hello { device: String },
}

impl Message {
    pub fn heartbeat(ts: Option<u64>) -> Self {
        Message::Heartbeat { ts }
    }

    pub fn status(msg: impl Into<String>) -> Self {
        Message::Status { msg: msg.into() }
    }

    pub fn command(cmd: impl Into<CommandPayload>) -> Self {
        Message::Cmd(cmd.into())
    }

    pub fn hello(device: impl Into<String>) -> Self {
        Message::Hello {
            device: device.into(),
        }
    }

    /// Wire name of this message's `type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Heartbeat { .. } => "heartbeat",
            Message::Status { .. } => "status",
            Message::Cmd(_) => "cmd",
            Message::Hello { .. } => "hello",
        }
    }
}
