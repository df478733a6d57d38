//! Actuator model for the ten motion channels and two relays.
//!
//! Mirrors what a controller does with a `cmd`: relays always follow the
//! light flags, channels only change when the bitstring is well formed.

use serde_json::Value;

use q2d_core::Bitstring;
use q2d_core::constants::BITSTRING_LEN;
use q2d_core::protocol::CommandPayload;

/// What an applied command changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Relays and channels updated.
    Full,
    /// Relays updated; the bitstring was unusable so channels kept their state.
    RelaysOnly,
}

/// Logical state of the outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActuatorState {
    channels: [bool; BITSTRING_LEN],
    relay1: bool,
    relay2: bool,
    commands_applied: u64,
}

impl ActuatorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a well-formed command.
    pub fn apply(&mut self, cmd: &CommandPayload) -> Applied {
        self.set_relays(cmd.light1, cmd.light2);
        self.channels = cmd.bitstring.bits();
        Applied::Full
    }

    /// Apply a `cmd` document that did not decode strictly.
    ///
    /// Returns `None` if `doc` is not a `cmd` at all. Missing or non-boolean
    /// light flags count as off.
    pub fn apply_document(&mut self, doc: &Value) -> Option<Applied> {
        if doc.get("type").and_then(Value::as_str) != Some("cmd") {
            return None;
        }
        let flag = |key: &str| doc.get(key).and_then(Value::as_bool).unwrap_or(false);
        self.set_relays(flag("light1"), flag("light2"));

        let bitstring = doc
            .get("bitstring")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<Bitstring>().ok());
        match bitstring {
            Some(bits) => {
                self.channels = bits.bits();
                Some(Applied::Full)
            }
            None => Some(Applied::RelaysOnly),
        }
    }

    fn set_relays(&mut self, relay1: bool, relay2: bool) {
        self.relay1 = relay1;
        self.relay2 = relay2;
        self.commands_applied += 1;
    }

    /// Zero-based indices of channels in motion.
    pub fn active_channels(&self) -> Vec<usize> {
        self.channels
            .iter()
            .enumerate()
            .filter_map(|(i, &on)| on.then_some(i))
            .collect()
    }

    pub fn relay1(&self) -> bool {
        self.relay1
    }

    pub fn relay2(&self) -> bool {
        self.relay2
    }

    pub fn commands_applied(&self) -> u64 {
        self.commands_applied
    }
}
