//! Result encoding: query rows to an actuation bitstring and light flags.
//!
//! Encoding is pure and depends only on the *set* of row ids and names, so
//! any permutation of the same rows yields the same command.

#[cfg(test)]
mod proptest;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::constants::{
    BITSTRING_LEN, CANONICAL_IDS, ID_FIELD, LIGHT1_LABEL, LIGHT2_LABEL, NAME_FIELD,
};

/// A single result row: column name to value.
pub type Row = serde_json::Map<String, Value>;

/// Reasons a string is not a valid bitstring.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitstringError {
    #[error("bitstring must be length 10, got {0}")]
    Length(usize),
    #[error("bitstring must contain only 0/1, found {ch:?} at position {position}")]
    InvalidChar { ch: char, position: usize },
}

/// Fixed-width actuation vector, one `'0'`/`'1'` per canonical id.
///
/// Always exactly [`BITSTRING_LEN`] ASCII characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Bitstring(String);

impl Bitstring {
    /// Build from per-position flags, in canonical order.
    pub fn from_bits(bits: [bool; BITSTRING_LEN]) -> Self {
        Self(bits.iter().map(|&b| if b { '1' } else { '0' }).collect())
    }

    /// All positions cleared.
    pub fn zeros() -> Self {
        Self::from_bits([false; BITSTRING_LEN])
    }

    /// Per-position flags, in canonical order.
    pub fn bits(&self) -> [bool; BITSTRING_LEN] {
        let mut out = [false; BITSTRING_LEN];
        for (slot, byte) in out.iter_mut().zip(self.0.bytes()) {
            *slot = byte == b'1';
        }
        out
    }

    /// Whether the bit at zero-based `position` is set.
    pub fn is_set(&self, position: usize) -> bool {
        self.0.as_bytes().get(position) == Some(&b'1')
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.0.bytes().filter(|&b| b == b'1').count()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Bitstring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Bitstring {
    type Err = BitstringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let len = s.chars().count();
        if len != BITSTRING_LEN {
            return Err(BitstringError::Length(len));
        }
        if let Some((position, ch)) = s.chars().enumerate().find(|(_, c)| *c != '0' && *c != '1') {
            return Err(BitstringError::InvalidChar { ch, position });
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for Bitstring {
    type Error = BitstringError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Bitstring> for String {
    fn from(value: Bitstring) -> Self {
        value.0
    }
}

/// Named relay flags derived from row names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightFlags {
    pub light1: bool,
    pub light2: bool,
}

impl LightFlags {
    pub fn from_rows(rows: &[Row]) -> Self {
        Self {
            light1: flags(rows, LIGHT1_LABEL),
            light2: flags(rows, LIGHT2_LABEL),
        }
    }
}

/// Everything the device needs to act on one query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCommand {
    pub bitstring: Bitstring,
    pub lights: LightFlags,
}

impl EncodedCommand {
    pub fn from_rows(rows: &[Row]) -> Self {
        Self {
            bitstring: encode(rows),
            lights: LightFlags::from_rows(rows),
        }
    }
}

/// Text form of a row value, as used for id and name comparison.
///
/// Strings compare by content, integers by decimal form, and integral floats
/// by their integer form (`5.0` is `"5"`). `null` has no text form.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
                        Some(format!("{}", f as i64))
                    }
                    _ => Some(n.to_string()),
                }
            }
        }
        other => Some(other.to_string()),
    }
}

/// Encode rows into a bitstring against [`CANONICAL_IDS`].
///
/// Bit `i` is `'1'` iff some row's `id`, compared as text, equals canonical
/// id `i`. Ids outside the canonical list contribute nothing.
pub fn encode(rows: &[Row]) -> Bitstring {
    let ids: HashSet<String> = rows
        .iter()
        .filter_map(|row| row.get(ID_FIELD).and_then(value_text))
        .collect();

    let mut bits = [false; BITSTRING_LEN];
    for (bit, canonical) in bits.iter_mut().zip(CANONICAL_IDS) {
        *bit = ids.contains(canonical);
    }
    Bitstring::from_bits(bits)
}

/// True iff some row's `name`, lower-cased, equals `label` lower-cased.
///
/// Rows without a `name` (or with a `null` one) never match.
pub fn flags(rows: &[Row], label: &str) -> bool {
    let target = label.to_lowercase();
    rows.iter().any(|row| {
        row.get(NAME_FIELD)
            .and_then(value_text)
            .is_some_and(|name| name.to_lowercase() == target)
    })
}
