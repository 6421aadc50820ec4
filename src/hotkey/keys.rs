//! Modifier key definitions and raw event classification
//!
//! Provides the modifier-set model shared by the tap callback and the
//! trigger state machine, and the classified event type the tap forwards.

#[cfg(target_os = "macos")]
use core_graphics::event::CGEventFlags;

/// Key code reported by key-down events for the Globe/Fn key.
///
/// The Fn key itself only surfaces through the flags-changed stream, but
/// macOS additionally delivers a key-down with this code for the Globe
/// press on newer keyboards.
pub const FN_KEY_CODE: i64 = 179;

/// Modifier key flag masks from macOS CGEventFlags
#[cfg(target_os = "macos")]
pub mod flags {
    use core_graphics::event::CGEventFlags;

    /// Control key modifier flag
    pub const CONTROL: CGEventFlags = CGEventFlags::CGEventFlagControl;
    /// Option/Alt key modifier flag
    pub const OPTION: CGEventFlags = CGEventFlags::CGEventFlagAlternate;
    /// Shift key modifier flag
    pub const SHIFT: CGEventFlags = CGEventFlags::CGEventFlagShift;
    /// Command key modifier flag
    pub const COMMAND: CGEventFlags = CGEventFlags::CGEventFlagCommand;
    /// Fn/Globe key modifier flag
    pub const FUNCTION: CGEventFlags = CGEventFlags::CGEventFlagSecondaryFn;
}

/// The standard modifier keys a hotkey definition can name
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
    Control,
    Option,
    Shift,
    Command,
}

impl std::fmt::Display for Modifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Modifier::Control => write!(f, "control"),
            Modifier::Option => write!(f, "option"),
            Modifier::Shift => write!(f, "shift"),
            Modifier::Command => write!(f, "command"),
        }
    }
}

/// Which modifier keys an event reports as asserted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierSet {
    /// Control key is held
    pub control: bool,
    /// Option/Alt key is held
    pub option: bool,
    /// Shift key is held
    pub shift: bool,
    /// Command key is held
    pub command: bool,
    /// Fn/Globe key is held
    pub function: bool,
}

impl ModifierSet {
    /// Create a ModifierSet from CGEventFlags
    #[cfg(target_os = "macos")]
    pub fn from_flags(flags: CGEventFlags) -> Self {
        Self {
            control: flags.contains(flags::CONTROL),
            option: flags.contains(flags::OPTION),
            shift: flags.contains(flags::SHIFT),
            command: flags.contains(flags::COMMAND),
            function: flags.contains(flags::FUNCTION),
        }
    }

    /// Check whether the given modifier is asserted
    pub fn contains(&self, modifier: Modifier) -> bool {
        match modifier {
            Modifier::Control => self.control,
            Modifier::Option => self.option,
            Modifier::Shift => self.shift,
            Modifier::Command => self.command,
        }
    }

    /// Check whether any standard modifier besides `modifier` is asserted.
    ///
    /// The Fn flag is not counted; some keyboards co-assert it for media
    /// handling and it would spuriously mark chords.
    pub fn any_besides(&self, modifier: Modifier) -> bool {
        [
            Modifier::Control,
            Modifier::Option,
            Modifier::Shift,
            Modifier::Command,
        ]
        .into_iter()
        .any(|m| m != modifier && self.contains(m))
    }

    /// Check if no standard modifier is asserted
    pub fn is_empty(&self) -> bool {
        !self.control && !self.option && !self.shift && !self.command
    }

    /// Builder-style setter, used when assembling sets by hand
    pub fn with(mut self, modifier: Modifier) -> Self {
        match modifier {
            Modifier::Control => self.control = true,
            Modifier::Option => self.option = true,
            Modifier::Shift => self.shift = true,
            Modifier::Command => self.command = true,
        }
        self
    }
}

/// A classified event from the system tap, stripped down to what the
/// trigger state machine needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKeyEvent {
    /// The modifier flag word changed (covers Fn and lone-modifier edges)
    FlagsChanged { mods: ModifierSet },
    /// A non-modifier key went down while `mods` were asserted
    KeyDown { key_code: i64, mods: ModifierSet },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set() {
        let mods = ModifierSet::default();
        assert!(mods.is_empty());
        assert!(!mods.contains(Modifier::Control));
        assert!(!mods.any_besides(Modifier::Control));
    }

    #[test]
    fn test_contains() {
        let mods = ModifierSet::default().with(Modifier::Shift);
        assert!(mods.contains(Modifier::Shift));
        assert!(!mods.contains(Modifier::Command));
        assert!(!mods.is_empty());
    }

    #[test]
    fn test_any_besides() {
        let mods = ModifierSet::default()
            .with(Modifier::Control)
            .with(Modifier::Shift);
        assert!(mods.any_besides(Modifier::Control));
        assert!(mods.any_besides(Modifier::Command));

        let lone = ModifierSet::default().with(Modifier::Control);
        assert!(!lone.any_besides(Modifier::Control));
    }

    #[test]
    fn test_fn_flag_not_a_standard_modifier() {
        let mods = ModifierSet {
            function: true,
            ..Default::default()
        };
        assert!(mods.is_empty());
        assert!(!mods.any_besides(Modifier::Control));
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn test_from_flags() {
        let mods = ModifierSet::from_flags(flags::CONTROL | flags::SHIFT);
        assert!(mods.control);
        assert!(mods.shift);
        assert!(!mods.command);
        assert!(!mods.function);
    }
}
