//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::DiagnosticEvent;
use crate::hotkey::CaptureStatus;

/// Requests from monitoring clients to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Ping to check connectivity
    Ping,

    /// Subscribe to diagnostic event notifications
    Subscribe,
}

/// Responses from daemon to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Pong response to ping
    Pong,

    /// Subscription confirmed; the connection now carries notifications
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

/// Push notification from daemon to subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A diagnostic event occurred
    Event(DiagnosticEvent),
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Whether the event tap is installed and running
    pub capture_running: bool,

    /// Whether the Input Monitoring permission is granted
    pub permission_granted: bool,

    /// Label of the active hotkey definition
    pub hotkey: String,

    /// Tap restarts counted in the current burst
    pub restart_count: u32,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            capture_running: false,
            permission_granted: false,
            hotkey: String::new(),
            restart_count: 0,
            uptime_secs: 0,
        }
    }
}

/// Fill a status snapshot from the tap manager's view; the server adds
/// uptime
impl From<CaptureStatus> for DaemonStatus {
    fn from(status: CaptureStatus) -> Self {
        Self {
            capture_running: status.running,
            permission_granted: status.permission_granted,
            hotkey: status.hotkey,
            restart_count: status.restart_count,
            ..Default::default()
        }
    }
}
