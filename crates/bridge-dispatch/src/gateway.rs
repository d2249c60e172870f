//! Wraps `bridge_device` behind the [`DeviceGateway`] trait so
//! `bridge_ramp::runner` never has to know about tool-path resolution,
//! `InvocationHandle`, or `VoltageState` directly — it only sees the
//! preemption-aware `invoke`/`kill_active` pair the Dispatcher itself uses.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bridge_core::VoltageState;
use bridge_device::{resolve_tool_path, InvocationHandle, InvokeOutcome};
use bridge_ramp::runner::DeviceGateway;
use tracing::warn;

/// Shared device-tool gateway: lazily re-resolves the configured tool path
/// on every invocation so the server recovers without a restart once a
/// missing tool reappears on disk, logging only on presence transitions to
/// avoid spamming the log on every call while the tool stays missing.
pub struct DeviceToolGateway {
    configured_path: PathBuf,
    handle: InvocationHandle,
    voltage_state: VoltageState,
    last_seen_present: AtomicBool,
}

impl DeviceToolGateway {
    pub fn new(configured_path: PathBuf, voltage_state: VoltageState) -> Self {
        Self {
            configured_path,
            handle: InvocationHandle::new(),
            voltage_state,
            last_seen_present: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl DeviceGateway for DeviceToolGateway {
    async fn invoke(&self, args: &[String], timeout: Duration) -> InvokeOutcome {
        let resolved = resolve_tool_path(&self.configured_path);
        let now_present = resolved.is_some();
        let was_present = self.last_seen_present.swap(now_present, Ordering::SeqCst);
        if was_present && !now_present {
            warn!(path = %self.configured_path.display(), "device tool became unresolvable");
        } else if !was_present && now_present {
            warn!(path = %self.configured_path.display(), "device tool became resolvable again");
        }

        bridge_device::invoke(
            resolved.as_deref(),
            args,
            timeout,
            &self.handle,
            &self.voltage_state,
        )
        .await
    }

    async fn kill_active(&self, timeout: Duration) -> bool {
        self.handle.kill_active(timeout).await
    }
}
