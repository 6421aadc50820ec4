//! Trigger state machine
//!
//! Tracks press/hold state for the active hotkey definition and decides
//! when a clean Pressed/Released/Toggled trigger should fire.

mod machine;

pub use machine::{HotkeyMachine, Trigger};
