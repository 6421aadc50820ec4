//! Hotkey definitions and accelerator-string parsing
//!
//! A definition names what the capture listens for: the dedicated Fn key,
//! a single modifier used alone, or an exact key+modifier chord.

use super::keys::{Modifier, ModifierSet};

/// The activation the capture listens for.
///
/// Exactly one definition is active at a time; replacing it resets all
/// transient key-tracking state in the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotkeyDefinition {
    /// The dedicated Fn/Globe key, tracked through the flags stream
    SpecialKey,
    /// A single modifier key pressed and released with no other keys
    ModifierOnly(Modifier),
    /// An exact key code with an exact modifier chord
    Custom {
        key_code: i64,
        modifiers: ModifierSet,
        label: String,
    },
}

/// Errors from parsing an accelerator string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("accelerator is empty")]
    Empty,

    #[error("unknown modifier: {0}")]
    UnknownModifier(String),

    #[error("unknown key: {0}")]
    UnknownKey(String),

    #[error("chord needs at least one modifier (e.g. cmd+shift+2)")]
    MissingModifier,

    #[error("chord is missing a non-modifier key")]
    MissingKey,
}

impl HotkeyDefinition {
    /// Parse an accelerator string.
    ///
    /// Accepted forms: `"fn"`, a lone modifier name (`"control"`,
    /// `"option"`, ...), or a `+`-separated chord whose last part is a
    /// key name (`"cmd+shift+2"`).
    pub fn from_accelerator(accelerator: &str) -> Result<Self, DefinitionError> {
        let parts: Vec<String> = accelerator
            .split('+')
            .map(|p| p.trim().to_ascii_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        match parts.as_slice() {
            [] => Err(DefinitionError::Empty),
            [single] => {
                if single == "fn" || single == "globe" {
                    Ok(Self::SpecialKey)
                } else if let Some(modifier) = parse_modifier(single) {
                    Ok(Self::ModifierOnly(modifier))
                } else if key_code_for(single).is_some() {
                    Err(DefinitionError::MissingModifier)
                } else {
                    Err(DefinitionError::UnknownModifier(single.clone()))
                }
            }
            [mods @ .., key] => {
                let mut modifiers = ModifierSet::default();
                for part in mods {
                    let modifier = parse_modifier(part)
                        .ok_or_else(|| DefinitionError::UnknownModifier(part.clone()))?;
                    modifiers = modifiers.with(modifier);
                }

                if parse_modifier(key).is_some() {
                    return Err(DefinitionError::MissingKey);
                }
                let key_code =
                    key_code_for(key).ok_or_else(|| DefinitionError::UnknownKey(key.clone()))?;

                Ok(Self::Custom {
                    key_code,
                    modifiers,
                    label: normalized_label(&modifiers, key),
                })
            }
        }
    }

    /// Human-readable name for status reporting and logs
    pub fn label(&self) -> String {
        match self {
            Self::SpecialKey => "fn".to_string(),
            Self::ModifierOnly(modifier) => modifier.to_string(),
            Self::Custom { label, .. } => label.clone(),
        }
    }
}

fn parse_modifier(s: &str) -> Option<Modifier> {
    match s {
        "control" | "ctrl" => Some(Modifier::Control),
        "option" | "opt" | "alt" => Some(Modifier::Option),
        "shift" => Some(Modifier::Shift),
        "command" | "cmd" | "meta" | "super" => Some(Modifier::Command),
        _ => None,
    }
}

fn normalized_label(modifiers: &ModifierSet, key: &str) -> String {
    let mut parts = Vec::new();
    for m in [
        Modifier::Control,
        Modifier::Option,
        Modifier::Shift,
        Modifier::Command,
    ] {
        if modifiers.contains(m) {
            parts.push(m.to_string());
        }
    }
    parts.push(key.to_string());
    parts.join("+")
}

/// macOS virtual key codes for the names the parser accepts
fn key_code_for(key: &str) -> Option<i64> {
    let code = match key {
        "a" => 0,
        "s" => 1,
        "d" => 2,
        "f" => 3,
        "h" => 4,
        "g" => 5,
        "z" => 6,
        "x" => 7,
        "c" => 8,
        "v" => 9,
        "b" => 11,
        "q" => 12,
        "w" => 13,
        "e" => 14,
        "r" => 15,
        "y" => 16,
        "t" => 17,
        "1" => 18,
        "2" => 19,
        "3" => 20,
        "4" => 21,
        "6" => 22,
        "5" => 23,
        "9" => 25,
        "7" => 26,
        "8" => 28,
        "0" => 29,
        "o" => 31,
        "u" => 32,
        "i" => 34,
        "p" => 35,
        "return" | "enter" => 36,
        "l" => 37,
        "j" => 38,
        "k" => 40,
        "n" => 45,
        "m" => 46,
        "tab" => 48,
        "space" => 49,
        "escape" | "esc" => 53,
        _ => return None,
    };
    Some(code)
}
