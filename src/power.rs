//! Power assertions that keep the tap host responsive
//!
//! App Nap or idle-sleep throttling of the worker is indistinguishable
//! from a hung callback and gets the tap silently disabled, so the daemon
//! holds system power assertions for as long as capture is active.

/// Holds the OS "stay responsive" tokens while capture runs.
///
/// Acquired by the tap manager at start and released at stop; also
/// released on drop so no exit path can leak an assertion.
#[derive(Debug, Default)]
pub struct SuspensionGuard {
    #[cfg(target_os = "macos")]
    assertions: Vec<macos::AssertionId>,
}

impl SuspensionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the system-level tokens, `reason` names the activity in
    /// the OS power log. Does nothing if tokens are already held.
    #[cfg(target_os = "macos")]
    pub fn acquire(&mut self, reason: &str) {
        if self.is_held() {
            return;
        }

        // Declared user activity marks the process latency-critical;
        // the idle-sleep assertion is the stronger guarantee on top.
        if let Some(id) = macos::declare_user_activity(reason) {
            self.assertions.push(id);
        }
        if let Some(id) = macos::prevent_idle_sleep(reason) {
            self.assertions.push(id);
        }

        tracing::info!(
            reason,
            count = self.assertions.len(),
            "power assertions acquired"
        );
    }

    #[cfg(not(target_os = "macos"))]
    pub fn acquire(&mut self, reason: &str) {
        tracing::debug!(reason, "power assertions not supported on this platform");
    }

    /// Release all held tokens. Idempotent; safe without a prior acquire.
    pub fn release(&mut self) {
        #[cfg(target_os = "macos")]
        {
            if self.assertions.is_empty() {
                return;
            }
            for id in self.assertions.drain(..) {
                macos::release(id);
            }
            tracing::info!("power assertions released");
        }
    }

    /// Whether any token is currently held
    pub fn is_held(&self) -> bool {
        #[cfg(target_os = "macos")]
        {
            !self.assertions.is_empty()
        }
        #[cfg(not(target_os = "macos"))]
        {
            false
        }
    }
}

impl Drop for SuspensionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(target_os = "macos")]
mod macos {
    //! IOKit power-assertion calls

    use core_foundation::base::TCFType;
    use core_foundation::string::{CFString, CFStringRef};
    use tracing::warn;

    pub type AssertionId = u32;

    /// kIOPMAssertionLevelOn
    const ASSERTION_LEVEL_ON: u32 = 255;
    /// kIOPMUserActiveLocal
    const USER_ACTIVE_LOCAL: u32 = 0;
    /// kIOPMAssertionTypePreventUserIdleSystemSleep
    const PREVENT_USER_IDLE_SYSTEM_SLEEP: &str = "PreventUserIdleSystemSleep";

    #[link(name = "IOKit", kind = "framework")]
    extern "C" {
        fn IOPMAssertionCreateWithName(
            assertion_type: CFStringRef,
            assertion_level: u32,
            assertion_name: CFStringRef,
            assertion_id: *mut u32,
        ) -> i32;

        fn IOPMAssertionDeclareUserActivity(
            assertion_name: CFStringRef,
            user_type: u32,
            assertion_id: *mut u32,
        ) -> i32;

        fn IOPMAssertionRelease(assertion_id: u32) -> i32;
    }

    /// Declare user-initiated, latency-critical activity
    pub fn declare_user_activity(reason: &str) -> Option<AssertionId> {
        let name = CFString::new(reason);
        let mut id: u32 = 0;

        let status = unsafe {
            IOPMAssertionDeclareUserActivity(
                name.as_concrete_TypeRef(),
                USER_ACTIVE_LOCAL,
                &mut id,
            )
        };
        if status != 0 {
            warn!(status, "IOPMAssertionDeclareUserActivity failed");
            return None;
        }
        Some(id)
    }

    /// Assert against user-idle system sleep
    pub fn prevent_idle_sleep(reason: &str) -> Option<AssertionId> {
        let assertion_type = CFString::new(PREVENT_USER_IDLE_SYSTEM_SLEEP);
        let name = CFString::new(reason);
        let mut id: u32 = 0;

        let status = unsafe {
            IOPMAssertionCreateWithName(
                assertion_type.as_concrete_TypeRef(),
                ASSERTION_LEVEL_ON,
                name.as_concrete_TypeRef(),
                &mut id,
            )
        };
        if status != 0 {
            warn!(status, "IOPMAssertionCreateWithName failed");
            return None;
        }
        Some(id)
    }

    pub fn release(id: AssertionId) {
        let status = unsafe { IOPMAssertionRelease(id) };
        if status != 0 {
            warn!(status, id, "IOPMAssertionRelease failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_without_acquire_is_safe() {
        let mut guard = SuspensionGuard::new();
        guard.release();
        guard.release();
        assert!(!guard.is_held());
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_acquire_is_noop_off_macos() {
        let mut guard = SuspensionGuard::new();
        guard.acquire("capture");
        assert!(!guard.is_held());
        guard.release();
    }
}
