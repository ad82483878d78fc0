//! Signal match rules
//!
//! A rule is a pure predicate over one frame. Rules never error at match time:
//! a frame that is too short for the rule is simply not a match.

use crate::types::{ConfigError, Frame, MAX_DATA_LEN, MAX_EXTENDED_ID};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Match predicate for a single configured signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "match_type", rename_all = "lowercase")]
pub enum MatchRule {
    /// Data bytes must equal `expected_data` exactly, length included
    Exact { id: u32, expected_data: Vec<u8> },

    /// One byte must lie within `[min_value, max_value]`
    Range {
        id: u32,
        byte_index: usize,
        min_value: u8,
        max_value: u8,
    },

    /// One bit of one byte must equal `bit_value` (bit 0 is the LSB)
    Bit {
        id: u32,
        byte_index: usize,
        bit_index: u8,
        bit_value: bool,
    },
}

impl MatchRule {
    /// CAN ID this rule listens to
    pub fn id(&self) -> u32 {
        match self {
            MatchRule::Exact { id, .. } | MatchRule::Range { id, .. } | MatchRule::Bit { id, .. } => *id,
        }
    }

    /// Evaluate the rule against a frame
    pub fn matches(&self, frame: &Frame) -> bool {
        if frame.id != self.id() {
            return false;
        }

        match self {
            MatchRule::Exact { expected_data, .. } => frame.data == *expected_data,
            MatchRule::Range {
                byte_index,
                min_value,
                max_value,
                ..
            } => frame
                .data
                .get(*byte_index)
                .is_some_and(|byte| (*min_value..=*max_value).contains(byte)),
            MatchRule::Bit {
                byte_index,
                bit_index,
                bit_value,
                ..
            } => frame
                .data
                .get(*byte_index)
                .and_then(|byte| byte.checked_shr(u32::from(*bit_index)))
                .is_some_and(|shifted| (shifted & 1 == 1) == *bit_value),
        }
    }

    /// Check structural invariants
    ///
    /// Returns a human readable reason on failure.
    pub fn check(&self) -> Result<(), String> {
        if self.id() > MAX_EXTENDED_ID {
            return Err(format!("CAN ID 0x{:X} exceeds the 29-bit range", self.id()));
        }

        match self {
            MatchRule::Exact { expected_data, .. } => {
                if expected_data.len() > MAX_DATA_LEN {
                    return Err(format!(
                        "expected data has {} bytes, at most {} are allowed",
                        expected_data.len(),
                        MAX_DATA_LEN
                    ));
                }
            }
            MatchRule::Range {
                byte_index,
                min_value,
                max_value,
                ..
            } => {
                check_byte_index(*byte_index)?;
                if min_value > max_value {
                    return Err(format!(
                        "min_value {} is greater than max_value {}",
                        min_value, max_value
                    ));
                }
            }
            MatchRule::Bit {
                byte_index,
                bit_index,
                ..
            } => {
                check_byte_index(*byte_index)?;
                if *bit_index > 7 {
                    return Err(format!("bit_index {} is out of range 0-7", bit_index));
                }
            }
        }

        Ok(())
    }
}

fn check_byte_index(byte_index: usize) -> Result<(), String> {
    if byte_index >= MAX_DATA_LEN {
        Err(format!("byte_index {} is out of range 0-7", byte_index))
    } else {
        Ok(())
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchRule::Exact { id, expected_data } => {
                write!(f, "0x{:03X} ==", id)?;
                for byte in expected_data {
                    write!(f, " {:02X}", byte)?;
                }
                Ok(())
            }
            MatchRule::Range {
                id,
                byte_index,
                min_value,
                max_value,
            } => write!(f, "0x{:03X} byte[{}] in {}..={}", id, byte_index, min_value, max_value),
            MatchRule::Bit {
                id,
                byte_index,
                bit_index,
                bit_value,
            } => write!(
                f,
                "0x{:03X} byte[{}].bit{} == {}",
                id,
                byte_index,
                bit_index,
                u8::from(*bit_value)
            ),
        }
    }
}

/// A named rule as shown on the display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalRule {
    pub name: String,
    #[serde(flatten)]
    pub rule: MatchRule,
}

impl SignalRule {
    pub fn new(name: impl Into<String>, rule: MatchRule) -> Self {
        Self {
            name: name.into(),
            rule,
        }
    }
}

/// Validate a whole rule list, reporting the first offending rule
pub fn validate_rules(rules: &[SignalRule]) -> Result<(), ConfigError> {
    for (index, signal) in rules.iter().enumerate() {
        if signal.name.trim().is_empty() {
            return Err(ConfigError::InvalidRule {
                index,
                name: signal.name.clone(),
                reason: "signal name is empty".to_string(),
            });
        }
        signal.rule.check().map_err(|reason| ConfigError::InvalidRule {
            index,
            name: signal.name.clone(),
            reason,
        })?;
    }
    Ok(())
}
