//! Core trigger state machine
//!
//! Converts classified tap events into Pressed/Released/Toggled triggers
//! according to the active hotkey definition, with self-healing against
//! missed release events.

use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::events::DiagnosticEvent;
use crate::hotkey::{HotkeyDefinition, Modifier, RawKeyEvent, FN_KEY_CODE};

/// A hold older than this is presumed to have lost its release event
/// (e.g. the tap was disabled mid-hold) and is discarded.
const STALE_HOLD_TIMEOUT: Duration = Duration::from_secs(5);

/// The normalized output signal consumed by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// The hotkey went down (SpecialKey / ModifierOnly)
    Pressed,
    /// The hotkey came back up without being used in a chord
    Released,
    /// A custom chord matched (single discrete activation)
    Toggled,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Pressed => write!(f, "pressed"),
            Trigger::Released => write!(f, "released"),
            Trigger::Toggled => write!(f, "toggled"),
        }
    }
}

/// Press/hold bookkeeping for the tracked key.
///
/// `fired_pressed` implies `is_down`; `pressed_at` is set exactly while
/// `is_down` holds.
#[derive(Debug, Default)]
struct KeyTrackState {
    is_down: bool,
    used_as_combo: bool,
    fired_pressed: bool,
    pressed_at: Option<Instant>,
}

impl KeyTrackState {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// The state machine that turns raw key events into triggers.
///
/// Owned by the tap worker; all mutation happens on that thread. Triggers
/// cross to the application context through a bounded channel and nothing
/// here ever blocks.
pub struct HotkeyMachine {
    /// What we are listening for
    definition: HotkeyDefinition,
    /// Hold state for the special/modifier kinds
    track: KeyTrackState,
    /// Hand-off to the application context
    trigger_tx: mpsc::Sender<Trigger>,
    /// Channel for diagnostic events
    events_tx: broadcast::Sender<DiagnosticEvent>,
}

impl HotkeyMachine {
    /// Create a new machine listening for `definition`
    pub fn new(
        definition: HotkeyDefinition,
        trigger_tx: mpsc::Sender<Trigger>,
        events_tx: broadcast::Sender<DiagnosticEvent>,
    ) -> Self {
        Self {
            definition,
            track: KeyTrackState::default(),
            trigger_tx,
            events_tx,
        }
    }

    /// Replace the active definition.
    ///
    /// All transient hold state is discarded so nothing from the old
    /// definition can leak into the new one.
    pub fn set_definition(&mut self, definition: HotkeyDefinition) {
        info!(hotkey = %definition.label(), "hotkey definition replaced");
        self.definition = definition;
        self.track.reset();
    }

    /// Process one classified event from the tap
    pub fn handle_event(&mut self, event: RawKeyEvent) {
        self.handle_event_at(event, Instant::now());
    }

    fn handle_event_at(&mut self, event: RawKeyEvent, now: Instant) {
        match self.definition {
            HotkeyDefinition::SpecialKey => self.handle_special(event, now),
            HotkeyDefinition::ModifierOnly(modifier) => {
                self.handle_modifier_only(modifier, event, now)
            }
            HotkeyDefinition::Custom { .. } => self.handle_custom(event),
        }
    }

    /// Transition logic for the dedicated Fn key
    fn handle_special(&mut self, event: RawKeyEvent, now: Instant) {
        self.recover_stale_hold(now);

        match event {
            RawKeyEvent::FlagsChanged { mods } => {
                let has_key = mods.function;
                if has_key == self.track.is_down {
                    return;
                }

                if has_key {
                    self.begin_hold(now);
                } else {
                    self.end_hold();
                }
            }
            RawKeyEvent::KeyDown { key_code, mods } => {
                // Another key pressed while Fn is held means the hold is
                // serving an OS-level combo (fn+arrow etc.) and must not
                // fire a Released on its own.
                if self.track.is_down && mods.function && key_code != FN_KEY_CODE {
                    self.track.used_as_combo = true;
                }
            }
        }
    }

    /// Transition logic for a lone modifier key
    fn handle_modifier_only(&mut self, modifier: Modifier, event: RawKeyEvent, now: Instant) {
        self.recover_stale_hold(now);

        match event {
            RawKeyEvent::FlagsChanged { mods } => {
                let has_key = mods.contains(modifier);

                if has_key && self.track.is_down {
                    // Still held; another modifier joining makes this a
                    // chord. This reads the live flags of the current
                    // event only, so releasing two modifiers in the same
                    // tick can swallow a Released.
                    if mods.any_besides(modifier) {
                        self.track.used_as_combo = true;
                    }
                    return;
                }

                if has_key == self.track.is_down {
                    return;
                }

                if has_key {
                    // Pressed while another modifier is already asserted:
                    // part of someone else's chord, not a standalone press.
                    if mods.any_besides(modifier) {
                        return;
                    }
                    self.begin_hold(now);
                } else {
                    self.end_hold();
                }
            }
            RawKeyEvent::KeyDown { mods, .. } => {
                if self.track.is_down && mods.contains(modifier) {
                    self.track.used_as_combo = true;
                }
            }
        }
    }

    /// Transition logic for custom chords; stateless
    fn handle_custom(&mut self, event: RawKeyEvent) {
        let RawKeyEvent::KeyDown { key_code, mods } = event else {
            return;
        };
        let HotkeyDefinition::Custom {
            key_code: want_code,
            modifiers,
            ..
        } = &self.definition
        else {
            return;
        };

        // Exact match only: the chord's modifier set must equal the
        // event's, so cmd+shift+2 does not fire a cmd+2 definition.
        if key_code == *want_code && mods == *modifiers {
            self.emit(Trigger::Toggled);
        }
    }

    fn begin_hold(&mut self, now: Instant) {
        self.track.is_down = true;
        self.track.pressed_at = Some(now);
        self.track.used_as_combo = false;
        self.track.fired_pressed = true;
        // No debounce: feedback must be instant
        self.emit(Trigger::Pressed);
    }

    fn end_hold(&mut self) {
        if self.track.fired_pressed && !self.track.used_as_combo {
            self.emit(Trigger::Released);
        }
        self.track.is_down = false;
        self.track.pressed_at = None;
        self.track.fired_pressed = false;
    }

    /// Discard a hold that has outlived the stale timeout.
    ///
    /// Runs ahead of every transition. No trigger is emitted; the release
    /// event was presumably missed while the tap was down.
    fn recover_stale_hold(&mut self, now: Instant) {
        if !self.track.is_down {
            return;
        }
        let Some(pressed_at) = self.track.pressed_at else {
            return;
        };

        let held = now.duration_since(pressed_at);
        if held > STALE_HOLD_TIMEOUT {
            debug!(held_ms = held.as_millis() as u64, "discarding stale hold");
            self.track.reset();
            let _ = self.events_tx.send(DiagnosticEvent::StaleHoldRecovered {
                held_ms: held.as_millis() as u64,
            });
        }
    }

    fn emit(&self, trigger: Trigger) {
        debug!(%trigger, hotkey = %self.definition.label(), "trigger");

        // Fire-and-forget hand-off to the application context; the worker
        // must never block inside the tap's latency budget.
        if let Err(e) = self.trigger_tx.try_send(trigger) {
            warn!(?e, "dropping trigger, channel unavailable");
        }
        let _ = self
            .events_tx
            .send(DiagnosticEvent::TriggerEmitted { trigger });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::ModifierSet;

    fn create_machine(definition: HotkeyDefinition) -> (HotkeyMachine, mpsc::Receiver<Trigger>) {
        let (trigger_tx, trigger_rx) = mpsc::channel(8);
        let (events_tx, _) = broadcast::channel(16);
        (HotkeyMachine::new(definition, trigger_tx, events_tx), trigger_rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Trigger>) -> Vec<Trigger> {
        let mut triggers = Vec::new();
        while let Ok(t) = rx.try_recv() {
            triggers.push(t);
        }
        triggers
    }

    fn fn_flags(down: bool) -> RawKeyEvent {
        RawKeyEvent::FlagsChanged {
            mods: ModifierSet {
                function: down,
                ..Default::default()
            },
        }
    }

    fn mod_flags(mods: ModifierSet) -> RawKeyEvent {
        RawKeyEvent::FlagsChanged { mods }
    }

    #[test]
    fn test_special_press_release() {
        let (mut sm, mut rx) = create_machine(HotkeyDefinition::SpecialKey);

        sm.handle_event(fn_flags(true));
        sm.handle_event(fn_flags(false));

        assert_eq!(drain(&mut rx), vec![Trigger::Pressed, Trigger::Released]);
    }

    #[test]
    fn test_special_duplicate_flags_ignored() {
        let (mut sm, mut rx) = create_machine(HotkeyDefinition::SpecialKey);

        sm.handle_event(fn_flags(true));
        sm.handle_event(fn_flags(true));

        assert_eq!(drain(&mut rx), vec![Trigger::Pressed]);
    }

    #[test]
    fn test_special_release_without_press_ignored() {
        let (mut sm, mut rx) = create_machine(HotkeyDefinition::SpecialKey);

        sm.handle_event(fn_flags(false));

        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_special_combo_suppresses_released() {
        let (mut sm, mut rx) = create_machine(HotkeyDefinition::SpecialKey);

        sm.handle_event(fn_flags(true));
        // fn+arrow style combo while held
        sm.handle_event(RawKeyEvent::KeyDown {
            key_code: 123,
            mods: ModifierSet {
                function: true,
                ..Default::default()
            },
        });
        sm.handle_event(fn_flags(false));

        assert_eq!(drain(&mut rx), vec![Trigger::Pressed]);
    }

    #[test]
    fn test_special_globe_keydown_is_not_a_combo() {
        let (mut sm, mut rx) = create_machine(HotkeyDefinition::SpecialKey);

        sm.handle_event(fn_flags(true));
        // The Globe key's own key-down echo must not mark the hold
        sm.handle_event(RawKeyEvent::KeyDown {
            key_code: FN_KEY_CODE,
            mods: ModifierSet {
                function: true,
                ..Default::default()
            },
        });
        sm.handle_event(fn_flags(false));

        assert_eq!(drain(&mut rx), vec![Trigger::Pressed, Trigger::Released]);
    }

    #[test]
    fn test_special_keydown_without_fn_flag_is_not_a_combo() {
        let (mut sm, mut rx) = create_machine(HotkeyDefinition::SpecialKey);

        sm.handle_event(fn_flags(true));
        sm.handle_event(RawKeyEvent::KeyDown {
            key_code: 0,
            mods: ModifierSet::default(),
        });
        sm.handle_event(fn_flags(false));

        assert_eq!(drain(&mut rx), vec![Trigger::Pressed, Trigger::Released]);
    }

    #[test]
    fn test_special_hold_after_combo_recovers() {
        let (mut sm, mut rx) = create_machine(HotkeyDefinition::SpecialKey);

        sm.handle_event(fn_flags(true));
        sm.handle_event(RawKeyEvent::KeyDown {
            key_code: 123,
            mods: ModifierSet {
                function: true,
                ..Default::default()
            },
        });
        sm.handle_event(fn_flags(false));
        drain(&mut rx);

        // Next hold is clean again
        sm.handle_event(fn_flags(true));
        sm.handle_event(fn_flags(false));
        assert_eq!(drain(&mut rx), vec![Trigger::Pressed, Trigger::Released]);
    }

    #[test]
    fn test_modifier_only_press_release() {
        let (mut sm, mut rx) =
            create_machine(HotkeyDefinition::ModifierOnly(Modifier::Control));

        sm.handle_event(mod_flags(ModifierSet::default().with(Modifier::Control)));
        sm.handle_event(mod_flags(ModifierSet::default()));

        assert_eq!(drain(&mut rx), vec![Trigger::Pressed, Trigger::Released]);
    }

    #[test]
    fn test_modifier_only_chord_suppresses_released() {
        // shift down, ctrl joins, shift up while ctrl held -> Pressed only
        let (mut sm, mut rx) = create_machine(HotkeyDefinition::ModifierOnly(Modifier::Shift));

        sm.handle_event(mod_flags(ModifierSet::default().with(Modifier::Shift)));
        sm.handle_event(mod_flags(
            ModifierSet::default()
                .with(Modifier::Shift)
                .with(Modifier::Control),
        ));
        sm.handle_event(mod_flags(ModifierSet::default().with(Modifier::Control)));

        assert_eq!(drain(&mut rx), vec![Trigger::Pressed]);
    }

    #[test]
    fn test_modifier_only_press_suppressed_when_other_modifier_down() {
        let (mut sm, mut rx) = create_machine(HotkeyDefinition::ModifierOnly(Modifier::Shift));

        sm.handle_event(mod_flags(ModifierSet::default().with(Modifier::Control)));
        sm.handle_event(mod_flags(
            ModifierSet::default()
                .with(Modifier::Control)
                .with(Modifier::Shift),
        ));
        sm.handle_event(mod_flags(ModifierSet::default().with(Modifier::Control)));
        sm.handle_event(mod_flags(ModifierSet::default()));

        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_modifier_only_keydown_marks_combo() {
        let (mut sm, mut rx) =
            create_machine(HotkeyDefinition::ModifierOnly(Modifier::Control));

        sm.handle_event(mod_flags(ModifierSet::default().with(Modifier::Control)));
        // ctrl+c while held
        sm.handle_event(RawKeyEvent::KeyDown {
            key_code: 8,
            mods: ModifierSet::default().with(Modifier::Control),
        });
        sm.handle_event(mod_flags(ModifierSet::default()));

        assert_eq!(drain(&mut rx), vec![Trigger::Pressed]);
    }

    #[test]
    fn test_custom_exact_match_toggles() {
        let definition = HotkeyDefinition::Custom {
            key_code: 2,
            modifiers: ModifierSet::default().with(Modifier::Command),
            label: "command+d".to_string(),
        };
        let (mut sm, mut rx) = create_machine(definition);

        sm.handle_event(RawKeyEvent::KeyDown {
            key_code: 2,
            mods: ModifierSet::default().with(Modifier::Command),
        });

        assert_eq!(drain(&mut rx), vec![Trigger::Toggled]);
    }

    #[test]
    fn test_custom_requires_exact_modifier_set() {
        let definition = HotkeyDefinition::Custom {
            key_code: 2,
            modifiers: ModifierSet::default().with(Modifier::Command),
            label: "command+d".to_string(),
        };
        let (mut sm, mut rx) = create_machine(definition);

        // Extra shift: no match
        sm.handle_event(RawKeyEvent::KeyDown {
            key_code: 2,
            mods: ModifierSet::default()
                .with(Modifier::Command)
                .with(Modifier::Shift),
        });
        // Extra fn flag: no match either
        sm.handle_event(RawKeyEvent::KeyDown {
            key_code: 2,
            mods: ModifierSet {
                command: true,
                function: true,
                ..Default::default()
            },
        });
        // Wrong key code
        sm.handle_event(RawKeyEvent::KeyDown {
            key_code: 3,
            mods: ModifierSet::default().with(Modifier::Command),
        });

        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_custom_ignores_flag_changes() {
        let definition = HotkeyDefinition::Custom {
            key_code: 2,
            modifiers: ModifierSet::default().with(Modifier::Command),
            label: "command+d".to_string(),
        };
        let (mut sm, mut rx) = create_machine(definition);

        sm.handle_event(mod_flags(ModifierSet::default().with(Modifier::Command)));
        sm.handle_event(mod_flags(ModifierSet::default()));

        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_stale_hold_reset_without_trigger() {
        let (mut sm, mut rx) = create_machine(HotkeyDefinition::SpecialKey);
        let start = Instant::now();

        sm.handle_event_at(fn_flags(true), start);
        assert_eq!(drain(&mut rx), vec![Trigger::Pressed]);

        // A release arriving 6s later finds the hold already discarded:
        // the stale reset fires first, then the release is a no-op
        sm.handle_event_at(fn_flags(false), start + Duration::from_secs(6));
        assert!(drain(&mut rx).is_empty());

        // A genuine press afterwards is processed normally
        sm.handle_event_at(fn_flags(true), start + Duration::from_secs(7));
        sm.handle_event_at(fn_flags(false), start + Duration::from_secs(8));
        assert_eq!(drain(&mut rx), vec![Trigger::Pressed, Trigger::Released]);
    }

    #[test]
    fn test_hold_under_timeout_not_stale() {
        let (mut sm, mut rx) = create_machine(HotkeyDefinition::SpecialKey);
        let start = Instant::now();

        sm.handle_event_at(fn_flags(true), start);
        sm.handle_event_at(fn_flags(false), start + Duration::from_secs(4));

        assert_eq!(drain(&mut rx), vec![Trigger::Pressed, Trigger::Released]);
    }

    #[test]
    fn test_trigger_delivery_across_contexts() {
        let (mut sm, mut rx) = create_machine(HotkeyDefinition::SpecialKey);

        sm.handle_event(fn_flags(true));

        // Triggers are consumed on the application side of the channel
        let trigger = tokio_test::block_on(rx.recv());
        assert_eq!(trigger, Some(Trigger::Pressed));
    }

    #[test]
    fn test_definition_change_resets_hold() {
        let (mut sm, mut rx) = create_machine(HotkeyDefinition::SpecialKey);

        sm.handle_event(fn_flags(true));
        assert_eq!(drain(&mut rx), vec![Trigger::Pressed]);

        sm.set_definition(HotkeyDefinition::ModifierOnly(Modifier::Control));

        // The old hold is gone: releasing fn does nothing, and the new
        // definition starts from a clean slate
        sm.handle_event(fn_flags(false));
        sm.handle_event(mod_flags(ModifierSet::default().with(Modifier::Control)));
        sm.handle_event(mod_flags(ModifierSet::default()));

        assert_eq!(drain(&mut rx), vec![Trigger::Pressed, Trigger::Released]);
    }
}
