//! Global input tap management
//!
//! Owns the macOS CGEventTap, the dedicated thread and CFRunLoop it lives
//! on, and the watchdog that re-enables a tap the OS has silently
//! disabled. Raw events are classified here and fed to the trigger state
//! machine, which runs on the same thread.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::events::DiagnosticEvent;
use crate::state::Trigger;

use super::definition::HotkeyDefinition;

#[cfg(target_os = "macos")]
use std::thread;
#[cfg(target_os = "macos")]
use std::time::{Duration, Instant};

#[cfg(target_os = "macos")]
use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
#[cfg(target_os = "macos")]
use core_graphics::event::{
    CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement, CGEventType,
    EventField,
};

#[cfg(target_os = "macos")]
use crate::events::DisableCause;
#[cfg(target_os = "macos")]
use crate::power::SuspensionGuard;
#[cfg(target_os = "macos")]
use crate::state::HotkeyMachine;

#[cfg(target_os = "macos")]
use super::health::TapHealth;
#[cfg(target_os = "macos")]
use super::keys::{ModifierSet, RawKeyEvent};

/// Errors that can occur while managing the tap
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("failed to create event tap - check Input Monitoring permission")]
    TapCreation,

    #[error("failed to spawn capture thread: {0}")]
    ThreadSpawn(String),

    #[error("timed out waiting for the capture thread to start")]
    StartTimeout,

    #[error("global event capture is not supported on this platform")]
    Unsupported,
}

/// Control messages routed through the worker's queue
enum ControlMessage {
    UpdateDefinition(HotkeyDefinition),
}

/// Snapshot of capture health for status reporting
#[derive(Debug, Clone)]
pub struct CaptureStatus {
    pub running: bool,
    pub permission_granted: bool,
    pub hotkey: String,
    pub restart_count: u32,
}

/// Manages the system-wide event tap and its dedicated worker thread.
///
/// `start`/`stop`/`update_definition` are safe to call from any context
/// at any time; definition updates reach the worker through its own
/// queue so the state reset cannot race in-flight events.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub struct TapManager {
    definition: Mutex<HotkeyDefinition>,
    trigger_tx: mpsc::Sender<Trigger>,
    events_tx: broadcast::Sender<DiagnosticEvent>,
    running: Arc<AtomicBool>,
    restart_count: Arc<AtomicU32>,
    control_tx: Mutex<Option<std::sync::mpsc::Sender<ControlMessage>>>,
    worker_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl TapManager {
    /// Create a new manager; capture does not begin until `start`
    pub fn new(
        definition: HotkeyDefinition,
        trigger_tx: mpsc::Sender<Trigger>,
        events_tx: broadcast::Sender<DiagnosticEvent>,
    ) -> Self {
        Self {
            definition: Mutex::new(definition),
            trigger_tx,
            events_tx,
            running: Arc::new(AtomicBool::new(false)),
            restart_count: Arc::new(AtomicU32::new(0)),
            control_tx: Mutex::new(None),
            worker_handle: Mutex::new(None),
        }
    }

    /// Start capture.
    ///
    /// Checks the Input Monitoring permission (with `prompt = true` this
    /// may show the system dialog; with `false` it never blocks on user
    /// interaction), then spawns the worker thread hosting the tap, its
    /// run loop, and the health check. Returns `Ok(true)` once a tap is
    /// active (including when one already was) and `Ok(false)` when
    /// permission is not granted.
    #[cfg(target_os = "macos")]
    pub fn start(&self, prompt: bool) -> Result<bool, HotkeyError> {
        if self.running.load(Ordering::SeqCst) {
            debug!("capture already running");
            return Ok(true);
        }

        let granted = if prompt {
            permissions::request()
        } else {
            permissions::granted()
        };
        if !granted {
            tracing::warn!(
                "Input Monitoring permission not granted; enable it in \
                 System Settings > Privacy & Security > Input Monitoring"
            );
            let _ = self.events_tx.send(DiagnosticEvent::PermissionDenied);
            return Ok(false);
        }

        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(true);
        }
        self.restart_count.store(0, Ordering::SeqCst);

        let (control_tx, control_rx) = std::sync::mpsc::channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let worker = Worker {
            definition: self.definition.lock().unwrap().clone(),
            running: Arc::clone(&self.running),
            restart_count: Arc::clone(&self.restart_count),
            control_rx,
            trigger_tx: self.trigger_tx.clone(),
            events_tx: self.events_tx.clone(),
        };

        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("hotkey-capture".to_string())
            .spawn(move || {
                info!("capture worker started");

                let mut guard = SuspensionGuard::new();
                guard.acquire("voicekey hotkey capture");

                if let Err(e) = run_capture_loop(worker, ready_tx) {
                    tracing::error!(?e, "capture worker error");
                }

                guard.release();
                running.store(false, Ordering::SeqCst);
                info!("capture worker stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                HotkeyError::ThreadSpawn(e.to_string())
            })?;

        // Wait for the worker to report the tap installed, so permission
        // and tap failures surface from start() itself
        match ready_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(HotkeyError::StartTimeout);
            }
        }

        *self.worker_handle.lock().unwrap() = Some(handle);
        *self.control_tx.lock().unwrap() = Some(control_tx);

        let hotkey = self.definition.lock().unwrap().label();
        info!(%hotkey, "capture started");
        let _ = self
            .events_tx
            .send(DiagnosticEvent::CaptureStarted { hotkey });

        Ok(true)
    }

    #[cfg(not(target_os = "macos"))]
    pub fn start(&self, _prompt: bool) -> Result<bool, HotkeyError> {
        Err(HotkeyError::Unsupported)
    }

    /// Stop capture. Idempotent.
    ///
    /// The worker notices the cleared flag within its next run-loop
    /// slice, tears down the tap, and releases the power assertions.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("capture already stopped");
            return;
        }

        *self.control_tx.lock().unwrap() = None;

        // Wait for the worker to wind down so a follow-up start cannot
        // race the old tap
        if let Some(handle) = self.worker_handle.lock().unwrap().take() {
            let _ = handle.join();
        }

        info!("capture stopped");
        let _ = self.events_tx.send(DiagnosticEvent::CaptureStopped);
    }

    /// Replace the active hotkey definition.
    ///
    /// While capture runs the update is queued to the worker, which
    /// swaps the definition and resets all hold state between events.
    /// While stopped it simply becomes the definition the next `start`
    /// uses.
    pub fn update_definition(&self, definition: HotkeyDefinition) {
        *self.definition.lock().unwrap() = definition.clone();

        if let Some(tx) = self.control_tx.lock().unwrap().as_ref() {
            let _ = tx.send(ControlMessage::UpdateDefinition(definition));
        }
    }

    /// Check if capture is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot for the status surface
    pub fn status(&self) -> CaptureStatus {
        CaptureStatus {
            running: self.is_running(),
            permission_granted: permission_granted(),
            hotkey: self.definition.lock().unwrap().label(),
            restart_count: self.restart_count.load(Ordering::SeqCst),
        }
    }
}

/// Check the Input Monitoring permission without prompting
pub fn permission_granted() -> bool {
    #[cfg(target_os = "macos")]
    {
        permissions::granted()
    }
    #[cfg(not(target_os = "macos"))]
    {
        false
    }
}

#[cfg(target_os = "macos")]
mod permissions {
    #[link(name = "CoreGraphics", kind = "framework")]
    extern "C" {
        fn CGPreflightListenEventAccess() -> bool;
        fn CGRequestListenEventAccess() -> bool;
    }

    /// Current grant status; never prompts
    pub fn granted() -> bool {
        unsafe { CGPreflightListenEventAccess() }
    }

    /// Prompt the user if undecided, then report the status
    pub fn request() -> bool {
        unsafe { CGRequestListenEventAccess() }
    }
}

/// State moved onto the worker thread
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
struct Worker {
    definition: HotkeyDefinition,
    running: Arc<AtomicBool>,
    restart_count: Arc<AtomicU32>,
    control_rx: std::sync::mpsc::Receiver<ControlMessage>,
    trigger_tx: mpsc::Sender<Trigger>,
    events_tx: broadcast::Sender<DiagnosticEvent>,
}

/// Interval of the tap health check on the worker thread.
///
/// Deliberately not a main-context timer: those get deprioritized when
/// the application is backgrounded, which is exactly when the tap is
/// most likely to need repair.
#[cfg(target_os = "macos")]
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// How long each run-loop slice lasts before the worker polls its
/// channels and flags
#[cfg(target_os = "macos")]
const RUN_LOOP_SLICE: Duration = Duration::from_millis(100);

/// Events crossing from the tap callback to the worker loop
#[cfg(target_os = "macos")]
enum CallbackEvent {
    Key(RawKeyEvent),
    Disabled(DisableCause),
}

/// Install the tap and run the capture loop until `running` clears
#[cfg(target_os = "macos")]
fn run_capture_loop(
    worker: Worker,
    ready_tx: std::sync::mpsc::Sender<Result<(), HotkeyError>>,
) -> Result<(), HotkeyError> {
    let Worker {
        definition,
        running,
        restart_count,
        control_rx,
        trigger_tx,
        events_tx,
    } = worker;

    let mut machine = HotkeyMachine::new(definition, trigger_tx, events_tx.clone());
    let mut health = TapHealth::new();
    let mut exhaustion_reported = false;

    // Raw events cross from the tap callback on a plain channel; the
    // callback must return within the OS latency budget, so it does
    // nothing but classify and send.
    let (callback_tx, callback_rx) = std::sync::mpsc::channel::<CallbackEvent>();

    let callback = move |_proxy: core_graphics::event::CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
          -> Option<CGEvent> {
        match event_type {
            CGEventType::FlagsChanged => {
                let mods = ModifierSet::from_flags(event.get_flags());
                let _ = callback_tx.send(CallbackEvent::Key(RawKeyEvent::FlagsChanged { mods }));
            }
            CGEventType::KeyDown => {
                let key_code = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE);
                let mods = ModifierSet::from_flags(event.get_flags());
                let _ = callback_tx.send(CallbackEvent::Key(RawKeyEvent::KeyDown {
                    key_code,
                    mods,
                }));
            }
            CGEventType::TapDisabledByTimeout => {
                let _ = callback_tx.send(CallbackEvent::Disabled(DisableCause::Timeout));
            }
            CGEventType::TapDisabledByUserInput => {
                let _ = callback_tx.send(CallbackEvent::Disabled(DisableCause::Flood));
            }
            _ => {}
        }
        Some(event.clone())
    };

    let tap = match CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![CGEventType::FlagsChanged, CGEventType::KeyDown],
        callback,
    ) {
        Ok(tap) => tap,
        Err(_) => {
            tracing::error!("failed to create event tap - is Input Monitoring granted?");
            let _ = ready_tx.send(Err(HotkeyError::TapCreation));
            return Err(HotkeyError::TapCreation);
        }
    };

    tap.enable();

    let source = match tap.mach_port.create_runloop_source(0) {
        Ok(source) => source,
        Err(_) => {
            let _ = ready_tx.send(Err(HotkeyError::TapCreation));
            return Err(HotkeyError::TapCreation);
        }
    };
    let run_loop = CFRunLoop::get_current();

    unsafe {
        run_loop.add_source(&source, kCFRunLoopCommonModes);
    }

    info!("event tap created and enabled");
    let _ = ready_tx.send(Ok(()));

    let mut last_health_check = Instant::now();

    while running.load(Ordering::SeqCst) {
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, RUN_LOOP_SLICE, true);
        }

        // Definition updates are applied here, between events, so the
        // state reset is atomic with respect to event processing
        while let Ok(msg) = control_rx.try_recv() {
            match msg {
                ControlMessage::UpdateDefinition(definition) => {
                    machine.set_definition(definition);
                }
            }
        }

        while let Ok(event) = callback_rx.try_recv() {
            match event {
                CallbackEvent::Key(raw) => machine.handle_event(raw),
                CallbackEvent::Disabled(cause) => restart_tap(
                    &tap,
                    &source,
                    &run_loop,
                    cause,
                    &mut health,
                    &mut exhaustion_reported,
                    &restart_count,
                    &events_tx,
                ),
            }
        }

        if last_health_check.elapsed() >= HEALTH_CHECK_INTERVAL {
            last_health_check = Instant::now();
            if !tap_is_enabled(&tap) {
                restart_tap(
                    &tap,
                    &source,
                    &run_loop,
                    DisableCause::HealthCheck,
                    &mut health,
                    &mut exhaustion_reported,
                    &restart_count,
                    &events_tx,
                );
            }
        }
    }

    unsafe {
        run_loop.remove_source(&source, kCFRunLoopCommonModes);
    }

    Ok(())
}

/// Re-enable a disabled tap, subject to the restart rate limit
#[cfg(target_os = "macos")]
fn restart_tap(
    tap: &CGEventTap<'_>,
    source: &core_foundation::runloop::CFRunLoopSource,
    run_loop: &CFRunLoop,
    cause: DisableCause,
    health: &mut TapHealth,
    exhaustion_reported: &mut bool,
    restart_counter: &AtomicU32,
    events_tx: &broadcast::Sender<DiagnosticEvent>,
) {
    if !health.allow_restart(Instant::now()) {
        if health.is_exhausted() && !*exhaustion_reported {
            *exhaustion_reported = true;
            tracing::error!(
                ?cause,
                "tap restarts exhausted; capture is non-functional until restarted manually"
            );
            let _ = events_tx.send(DiagnosticEvent::RestartExhausted { cause });
        }
        return;
    }

    tracing::warn!(?cause, "event tap disabled, re-enabling");

    // Remove and re-add the run-loop source before re-enabling; a stale
    // source can leave the re-enabled tap mute
    unsafe {
        run_loop.remove_source(source, kCFRunLoopCommonModes);
        run_loop.add_source(source, kCFRunLoopCommonModes);
    }
    tap.enable();

    let restart_count = health.restart_count();
    restart_counter.store(restart_count, Ordering::SeqCst);
    let _ = events_tx.send(DiagnosticEvent::TapRestarted {
        cause,
        restart_count,
    });
}

#[cfg(target_os = "macos")]
fn tap_is_enabled(tap: &CGEventTap<'_>) -> bool {
    use core_foundation::base::TCFType;

    #[link(name = "CoreGraphics", kind = "framework")]
    extern "C" {
        fn CGEventTapIsEnabled(tap: core_foundation::base::CFTypeRef) -> bool;
    }

    unsafe { CGEventTapIsEnabled(tap.mach_port.as_concrete_TypeRef() as _) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::Modifier;

    fn create_manager() -> TapManager {
        let (trigger_tx, _trigger_rx) = mpsc::channel(8);
        let (events_tx, _) = broadcast::channel(16);
        TapManager::new(HotkeyDefinition::SpecialKey, trigger_tx, events_tx)
    }

    #[test]
    fn test_manager_creation() {
        let manager = create_manager();
        assert!(!manager.is_running());
        assert_eq!(manager.status().hotkey, "fn");
        assert_eq!(manager.status().restart_count, 0);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let manager = create_manager();
        manager.stop();
        manager.stop();
        assert!(!manager.is_running());
    }

    #[test]
    fn test_update_definition_while_stopped() {
        let manager = create_manager();
        manager.update_definition(HotkeyDefinition::ModifierOnly(Modifier::Control));
        assert_eq!(manager.status().hotkey, "control");
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_start_unsupported_off_macos() {
        let manager = create_manager();
        assert!(matches!(
            manager.start(false),
            Err(HotkeyError::Unsupported)
        ));
        assert!(!manager.is_running());
    }
}
