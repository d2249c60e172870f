//! Execute a planned ramp: baseline set, stepped sets, cancellation-aware
//! sleeps, updating [`VoltageState`] per successful step.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_core::VoltageState;
use bridge_device::InvokeOutcome;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::planner::{plan, Smoothing};

/// Slice length for cancellation-aware sleeps — bounds cancellation
/// latency to roughly this much plus child-terminate latency.
const SLEEP_SLICE: Duration = Duration::from_millis(100);
/// Timeout used for `kill_active` calls made directly by the runner.
const KILL_TIMEOUT: Duration = Duration::from_millis(200);
/// Ceiling on the baseline set's timeout (spec §4.4 step 5: "≤ 5s").
const BASELINE_TIMEOUT_CAP: Duration = Duration::from_secs(5);
/// Floor on a per-step timeout, regardless of the plan's interval.
const STEP_TIMEOUT_FLOOR: Duration = Duration::from_secs(10);

/// Everything `Dispatcher` exposes to a ramp so it can drive the shared
/// device tool without owning `DeviceInvoker` or `InvocationHandle`
/// directly — this is "Dispatcher's preemption-aware helper" from spec
/// §4.4: every invocation still goes through the same kill-before-launch
/// discipline the Dispatcher itself uses.
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    async fn invoke(&self, args: &[String], timeout: Duration) -> InvokeOutcome;
    async fn kill_active(&self, timeout: Duration) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RampOutcome {
    Completed,
    Cancelled,
}

pub struct RampContext {
    pub bus: String,
    pub address: String,
    /// `-1` means "resolve from last-known voltage".
    pub start: i64,
    pub end: i64,
    pub duration_ms: u64,
    pub offset_ms: u64,
    pub floor: Duration,
    pub smoothing: Smoothing,
    pub global_timeout: Duration,
    pub cancel: CancellationToken,
    pub voltage_state: VoltageState,
    pub gateway: Arc<dyn DeviceGateway>,
}

/// Run a ramp to completion or until cancelled.
pub async fn run(ctx: RampContext) -> RampOutcome {
    let RampContext {
        bus,
        address,
        start,
        end,
        duration_ms,
        offset_ms,
        floor,
        smoothing,
        global_timeout,
        cancel,
        voltage_state,
        gateway,
    } = ctx;

    // Step 1: start resolution.
    let start = if start == -1 {
        match voltage_state.get() {
            Some(v) => {
                debug!(resolved_start = v, "ramp start resolved from last-known voltage");
                v
            }
            None => {
                debug!("last-known voltage unset; defaulting ramp start to 0");
                0
            }
        }
    } else {
        start
    };

    // Step 2: offset wait, sliced so cancellation is observed promptly.
    if offset_ms > 0 && sleep_cancellable(Duration::from_millis(offset_ms), &cancel).await {
        info!("ramp cancelled during offset wait");
        return RampOutcome::Cancelled;
    }

    // Step 3: no-op shortcut.
    if start == end {
        info!(voltage = end, "no-op ramp; setting final value directly");
        gateway.kill_active(KILL_TIMEOUT).await;
        let args = vec![bus, address, end.to_string()];
        let outcome = gateway.invoke(&args, global_timeout).await;
        voltage_state.set(end);
        log_step_outcome(&outcome, end);
        return RampOutcome::Completed;
    }

    // Step 4: plan.
    let ramp_plan = plan(start, end, duration_ms, floor, smoothing);
    info!(
        steps = ramp_plan.sequence.len(),
        interval_ms = ramp_plan.interval.as_millis(),
        "planned ramp"
    );

    // Step 5: baseline set.
    gateway.kill_active(KILL_TIMEOUT).await;
    let baseline = ramp_plan.sequence[0];
    let baseline_timeout = global_timeout.min(BASELINE_TIMEOUT_CAP);
    let args = vec![bus.clone(), address.clone(), baseline.to_string()];
    let outcome = gateway.invoke(&args, baseline_timeout).await;
    if outcome.rc == 0 {
        voltage_state.set(baseline);
    } else {
        warn!(rc = outcome.rc, "ramp baseline set failed; continuing anyway");
    }

    // Step 6: stepping.
    let step_timeout = step_timeout(ramp_plan.interval, global_timeout);
    for (idx, &v) in ramp_plan.sequence.iter().enumerate().skip(1) {
        if cancel.is_cancelled() {
            info!(step = idx, "ramp cancelled before step");
            return RampOutcome::Cancelled;
        }

        let args = vec![bus.clone(), address.clone(), v.to_string()];
        let outcome = gateway.invoke(&args, step_timeout).await;
        if outcome.rc == 0 {
            voltage_state.set(v);
        } else {
            warn!(rc = outcome.rc, step = idx, voltage = v, "ramp step failed; continuing");
        }

        if ramp_plan.interval > Duration::ZERO
            && sleep_cancellable(ramp_plan.interval, &cancel).await
        {
            info!(step = idx, "ramp cancelled during inter-step sleep");
            gateway.kill_active(KILL_TIMEOUT).await;
            return RampOutcome::Cancelled;
        }
    }

    // Step 7: final correction if rounding/downsampling missed the exact end.
    if *ramp_plan.sequence.last().unwrap() != end {
        gateway.kill_active(KILL_TIMEOUT).await;
        let args = vec![bus, address, end.to_string()];
        let outcome = gateway.invoke(&args, global_timeout).await;
        if outcome.rc == 0 {
            voltage_state.set(end);
        }
    }

    info!(voltage = end, "ramp completed");
    RampOutcome::Completed
}

fn step_timeout(interval: Duration, global_timeout: Duration) -> Duration {
    STEP_TIMEOUT_FLOOR.max(interval * 2).min(global_timeout)
}

fn log_step_outcome(outcome: &InvokeOutcome, voltage: i64) {
    if outcome.rc == 0 {
        debug!(voltage, "device set succeeded");
    } else {
        warn!(rc = outcome.rc, voltage, "device set failed");
    }
}

/// Sleep for `duration` in slices of at most [`SLEEP_SLICE`], returning
/// `true` if cancellation was observed before the full duration elapsed.
async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> bool {
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        let slice = remaining.min(SLEEP_SLICE);
        tokio::select! {
            _ = tokio::time::sleep(slice) => {}
            _ = cancel.cancelled() => return true,
        }
        remaining -= slice;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingGateway {
        calls: Mutex<Vec<(Vec<String>, i32)>>,
        scripted_rc: Mutex<Vec<i32>>,
        kill_calls: Mutex<u32>,
    }

    impl RecordingGateway {
        fn with_rcs(rcs: Vec<i32>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                scripted_rc: Mutex::new(rcs),
                kill_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl DeviceGateway for RecordingGateway {
        async fn invoke(&self, args: &[String], _timeout: Duration) -> InvokeOutcome {
            let rc = {
                let mut scripted = self.scripted_rc.lock().unwrap();
                if scripted.is_empty() {
                    0
                } else {
                    scripted.remove(0)
                }
            };
            self.calls.lock().unwrap().push((args.to_vec(), rc));
            InvokeOutcome {
                rc,
                stdout: String::new(),
                stderr: String::new(),
            }
        }

        async fn kill_active(&self, _timeout: Duration) -> bool {
            *self.kill_calls.lock().unwrap() += 1;
            true
        }
    }

    fn ctx(gateway: Arc<dyn DeviceGateway>, start: i64, end: i64, duration_ms: u64) -> RampContext {
        RampContext {
            bus: "com3".into(),
            address: "1".into(),
            start,
            end,
            duration_ms,
            offset_ms: 0,
            floor: Duration::from_millis(80),
            smoothing: Smoothing::Linear,
            global_timeout: Duration::from_secs(5),
            cancel: CancellationToken::new(),
            voltage_state: VoltageState::new(),
            gateway,
        }
    }

    #[tokio::test]
    async fn noop_ramp_sets_final_value() {
        let gateway = Arc::new(RecordingGateway::with_rcs(vec![0]));
        let voltage_state = VoltageState::new();
        voltage_state.set(50);
        let mut c = ctx(gateway.clone(), -1, 50, 1000);
        c.voltage_state = voltage_state.clone();
        let outcome = run(c).await;
        assert_eq!(outcome, RampOutcome::Completed);
        assert_eq!(voltage_state.get(), Some(50));
        assert_eq!(gateway.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ramp_resolves_minus_one_to_zero_when_unset() {
        let gateway = Arc::new(RecordingGateway::with_rcs(vec![0, 0, 0]));
        let c = ctx(gateway.clone(), -1, 2, 10_000);
        let outcome = run(c).await;
        assert_eq!(outcome, RampOutcome::Completed);
        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls[0].0[2], "0");
    }

    #[tokio::test]
    async fn ramp_completes_and_commits_each_successful_step() {
        let gateway = Arc::new(RecordingGateway::with_rcs(vec![0, 0, 0]));
        let voltage_state = VoltageState::new();
        let mut c = ctx(gateway.clone(), 0, 2, 200);
        c.voltage_state = voltage_state.clone();
        let outcome = run(c).await;
        assert_eq!(outcome, RampOutcome::Completed);
        assert_eq!(voltage_state.get(), Some(2));
    }

    #[tokio::test]
    async fn cancel_before_offset_wait_elapses_returns_without_invoking() {
        let gateway = Arc::new(RecordingGateway::with_rcs(vec![]));
        let mut c = ctx(gateway.clone(), 0, 100, 10_000);
        c.offset_ms = 5_000;
        c.cancel.cancel();
        let outcome = run(c).await;
        assert_eq!(outcome, RampOutcome::Cancelled);
        assert!(gateway.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_mid_ramp_stops_stepping() {
        let gateway = Arc::new(RecordingGateway::with_rcs(vec![0, 0]));
        let cancel = CancellationToken::new();
        let mut c = ctx(gateway.clone(), 0, 1000, 60_000);
        c.cancel = cancel.clone();
        let handle = tokio::spawn(run(c));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let outcome = handle.await.unwrap();
        assert_eq!(outcome, RampOutcome::Cancelled);
    }

    #[tokio::test]
    async fn failed_step_does_not_abort_ramp() {
        // baseline succeeds, one step fails, final step succeeds; ramp still completes.
        let gateway = Arc::new(RecordingGateway::with_rcs(vec![0, 1, 0]));
        let c = ctx(gateway.clone(), 0, 2, 200);
        let outcome = run(c).await;
        assert_eq!(outcome, RampOutcome::Completed);
    }
}
