//! Process-wide handle to whichever device-tool child is currently running.
//!
//! Tracked by pid rather than by owning the `tokio::process::Child`: the
//! `Child` is owned by whichever `invoke()` call spawned it (so it can
//! `.wait()` on it), while `kill_active` needs to reach in from a
//! completely different task (the Dispatcher's preemption barrier). A
//! published pid plus a process-group signal closes that gap without
//! shared ownership of the `Child` itself.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct InvocationHandle {
    pid: Arc<Mutex<Option<u32>>>,
}

impl InvocationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the pid of a freshly-spawned child, just before waiting on it.
    pub fn publish(&self, pid: u32) {
        *self.pid.lock().expect("invocation handle mutex poisoned") = Some(pid);
    }

    /// Clear the published pid. Safe to call even if nothing was published.
    pub fn clear(&self) {
        *self.pid.lock().expect("invocation handle mutex poisoned") = None;
    }

    /// Currently published pid, if any.
    pub fn get(&self) -> Option<u32> {
        *self.pid.lock().expect("invocation handle mutex poisoned")
    }

    /// Best-effort terminate-then-kill of the published child's process
    /// group. Returns `false` (no-op) if nothing is published.
    ///
    /// Sends `SIGTERM` to the group, polls for the pid to disappear for up
    /// to `timeout`, and escalates to `SIGKILL` if it's still alive.
    pub async fn kill_active(&self, timeout: Duration) -> bool {
        let Some(pid) = self.get() else {
            return false;
        };

        debug!(pid, "killing active device-tool invocation");
        send_signal_to_group(pid, libc::SIGTERM);

        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if !process_group_alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        if process_group_alive(pid) {
            warn!(pid, "process group still alive after SIGTERM; escalating to SIGKILL");
            send_signal_to_group(pid, libc::SIGKILL);
        }
        true
    }
}

fn send_signal_to_group(pid: u32, signal: i32) {
    // SAFETY: kill(-pid, signal) targets the whole process group; pid is a
    // plain integer with no aliasing concerns.
    unsafe {
        libc::kill(-(pid as i32), signal);
    }
}

/// Probe whether any process in the group is still alive via `kill(pid, 0)`
/// — sends no signal, just checks for `ESRCH`.
fn process_group_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 performs only existence/permission checks.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        assert_eq!(InvocationHandle::new().get(), None);
    }

    #[test]
    fn publish_then_clear() {
        let handle = InvocationHandle::new();
        handle.publish(1234);
        assert_eq!(handle.get(), Some(1234));
        handle.clear();
        assert_eq!(handle.get(), None);
    }

    #[tokio::test]
    async fn kill_active_is_noop_without_publish() {
        let handle = InvocationHandle::new();
        assert!(!handle.kill_active(Duration::from_millis(50)).await);
    }
}
