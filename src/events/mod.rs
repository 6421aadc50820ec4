//! Diagnostic events for external monitoring
//!
//! Everything notable the capture subsystem does (triggers, tap
//! restarts, self-healing corrections, permission failures) is emitted
//! as a structured event on a broadcast channel for IPC subscribers.

use serde::{Deserialize, Serialize};

use crate::state::Trigger;

/// Why the tap needed re-enabling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisableCause {
    /// The OS disabled the tap for exceeding its callback latency budget
    Timeout,
    /// The OS disabled the tap for observing too many events
    Flood,
    /// The periodic health check found the tap disabled
    HealthCheck,
}

/// Events emitted by the capture subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosticEvent {
    /// Capture started with the given hotkey
    CaptureStarted {
        /// Label of the active hotkey definition
        hotkey: String,
    },

    /// Capture stopped
    CaptureStopped,

    /// A trigger was delivered to the application
    TriggerEmitted {
        /// Which trigger fired
        trigger: Trigger,
    },

    /// The tap was found disabled and re-enabled
    TapRestarted {
        /// What disabled it
        cause: DisableCause,
        /// Restarts counted in the current burst
        restart_count: u32,
    },

    /// Automatic restarts were suspended after too many in a burst
    RestartExhausted {
        /// What disabled the tap when the limit was hit
        cause: DisableCause,
    },

    /// A hold outlived the stale timeout and was silently discarded
    StaleHoldRecovered {
        /// How long the hold had been tracked
        held_ms: u64,
    },

    /// The OS has not granted the input capture permission
    PermissionDenied,
}

impl std::fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosticEvent::CaptureStarted { hotkey } => {
                write!(f, "CAPTURE_STARTED ({})", hotkey)
            }
            DiagnosticEvent::CaptureStopped => write!(f, "CAPTURE_STOPPED"),
            DiagnosticEvent::TriggerEmitted { trigger } => {
                write!(f, "TRIGGER ({})", trigger)
            }
            DiagnosticEvent::TapRestarted {
                cause,
                restart_count,
            } => write!(f, "TAP_RESTARTED ({:?}, count {})", cause, restart_count),
            DiagnosticEvent::RestartExhausted { cause } => {
                write!(f, "RESTART_EXHAUSTED ({:?})", cause)
            }
            DiagnosticEvent::StaleHoldRecovered { held_ms } => {
                write!(f, "STALE_HOLD_RECOVERED ({}ms)", held_ms)
            }
            DiagnosticEvent::PermissionDenied => write!(f, "PERMISSION_DENIED"),
        }
    }
}
