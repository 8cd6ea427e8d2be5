//! Key combinations and chord matching
//!
//! A [`KeyCombo`] is one or more modifiers followed by exactly one
//! non-modifier key, written as `ctrl+alt+t` in configuration files.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::keys;

/// Errors produced while parsing a key combination
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComboError {
    #[error("at least one modifier and one non-modifier key must be provided")]
    InvalidFormat,

    #[error("unknown key: {0}")]
    UnknownKey(String),

    #[error("exactly one non-modifier key must be provided, found {0}")]
    InvalidNonModifierCount(usize),
}

/// A parsed key combination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyCombo {
    /// Modifier key codes, in the order they were written
    modifiers: Vec<u16>,
    /// The single non-modifier key code
    key: u16,
    /// Textual form the combo was parsed from
    raw: String,
}

impl KeyCombo {
    /// Build a combo directly from key codes, without a textual form
    pub fn new(modifiers: Vec<u16>, key: u16) -> Self {
        Self {
            modifiers,
            key,
            raw: String::new(),
        }
    }

    /// Parse a combo such as `ctrl+alt+t`
    pub fn parse(text: &str) -> Result<Self, ComboError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ComboError::InvalidFormat);
        }

        let parts: Vec<&str> = text.split('+').collect();
        if parts.len() < 2 {
            return Err(ComboError::InvalidFormat);
        }

        let mut modifiers = Vec::new();
        let mut non_modifiers = Vec::new();

        for part in parts {
            let code = keys::name_to_code(part)
                .ok_or_else(|| ComboError::UnknownKey(part.trim().to_string()))?;

            if keys::is_modifier(part) {
                modifiers.push(code);
            } else {
                non_modifiers.push(code);
            }
        }

        if modifiers.is_empty() {
            return Err(ComboError::InvalidFormat);
        }

        if non_modifiers.len() != 1 {
            return Err(ComboError::InvalidNonModifierCount(non_modifiers.len()));
        }

        Ok(Self {
            modifiers,
            key: non_modifiers[0],
            raw: text.to_string(),
        })
    }

    pub fn modifiers(&self) -> &[u16] {
        &self.modifiers
    }

    pub fn key(&self) -> u16 {
        self.key
    }

    /// Check whether the pressed keys complete this combo.
    ///
    /// Matching is positional: the modifiers must be held in the order they
    /// were written, followed by the key, with nothing else held.
    pub fn matches(&self, pressed: &[u16]) -> bool {
        let n = self.modifiers.len() + 1;
        if pressed.len() != n {
            return false;
        }

        if pressed[n - 1] != self.key {
            return false;
        }

        self.modifiers
            .iter()
            .zip(pressed)
            .all(|(modifier, code)| modifier == code)
    }

    /// Rebuild the textual form from key codes; empty if any code has no name
    fn reconstruct(&self) -> String {
        let names: Option<Vec<&str>> = self
            .modifiers
            .iter()
            .chain(std::iter::once(&self.key))
            .map(|code| keys::code_to_name(*code))
            .collect();

        names.map(|names| names.join("+")).unwrap_or_default()
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw.is_empty() {
            f.write_str(&self.reconstruct())
        } else {
            f.write_str(&self.raw)
        }
    }
}

impl FromStr for KeyCombo {
    type Err = ComboError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for KeyCombo {
    type Error = ComboError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<KeyCombo> for String {
    fn from(combo: KeyCombo) -> Self {
        combo.to_string()
    }
}
