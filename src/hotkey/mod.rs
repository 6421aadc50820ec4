//! Global hotkey capture
//!
//! Uses a macOS CGEventTap on a dedicated thread to watch modifier-change
//! and key-down events system-wide, with a watchdog that repairs a tap
//! the OS has silently disabled.

mod definition;
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
mod health;
mod keys;
mod listener;

pub use definition::{DefinitionError, HotkeyDefinition};
pub use keys::{Modifier, ModifierSet, RawKeyEvent, FN_KEY_CODE};
pub use listener::{permission_granted, CaptureStatus, HotkeyError, TapManager};
