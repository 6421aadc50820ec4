//! voicekey-daemon: Background daemon capturing the global dictation hotkey
//!
//! Runs as a LaunchAgent and provides:
//! - A system-wide event tap (CGEventTap) on a dedicated worker thread
//! - A trigger state machine turning raw key events into
//!   Pressed/Released/Toggled signals
//! - A watchdog that repairs a tap the OS has silently disabled
//! - Power assertions keeping the worker responsive while capture runs
//! - An IPC status/diagnostics surface for external monitoring
//!
//! Audio capture, transcription, and text insertion live elsewhere; they
//! only consume the triggers produced here.

mod config;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
mod power;
mod state;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::events::DiagnosticEvent;
use crate::hotkey::TapManager;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::state::Trigger;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "voicekey-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        hotkey = %config.hotkey.label(),
        ?config.socket_path,
        "configuration loaded"
    );

    // Create shutdown signal handler
    let mut shutdown = ShutdownSignal::new()?;

    // Create channels for inter-component communication
    // Tap worker -> application context
    let (trigger_tx, mut trigger_rx) = mpsc::channel::<Trigger>(32);
    // Capture subsystem -> monitoring subscribers
    let (events_tx, _events_rx) = broadcast::channel::<DiagnosticEvent>(64);

    // Create the tap manager
    let tap = Arc::new(TapManager::new(
        config.hotkey.clone(),
        trigger_tx,
        events_tx.clone(),
    ));

    // Start capture without prompting; a permission dialog at launch
    // would be surprising for a LaunchAgent
    match tap.start(false) {
        Ok(true) => {
            info!("hotkey capture active");
        }
        Ok(false) => {
            warn!("capture not started - grant Input Monitoring permission and restart");
        }
        Err(e) => {
            error!(?e, "failed to start hotkey capture");
            warn!("continuing without hotkey support");
        }
    }

    // Create IPC server for status queries and event subscriptions
    let server = Server::new(&config.socket_path, Arc::clone(&tap), events_tx.clone())?;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Consume triggers on the application context; the rest of the
        // application (recording control etc.) attaches here
        _ = async {
            while let Some(trigger) = trigger_rx.recv().await {
                info!(%trigger, "hotkey trigger");
            }
        } => {
            info!("trigger channel closed");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    tap.stop();
    server.shutdown().await;

    info!("voicekey-daemon stopped");

    Ok(())
}
