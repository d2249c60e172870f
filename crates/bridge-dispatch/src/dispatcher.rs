//! Single entry point arbitrating instant and ramp commands: a preemption
//! barrier followed by validation and either a synchronous invocation or a
//! backgrounded ramp.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bridge_core::{Command, VoltageState};
use bridge_ramp::runner::DeviceGateway;
use bridge_ramp::{RampContext, Smoothing};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::DispatchError;

/// Total time budget for the preemption barrier's cancel-then-poll loop.
const PREEMPT_BUDGET: Duration = Duration::from_secs(1);
/// Slice length within the preemption barrier's poll loop.
const PREEMPT_SLICE: Duration = Duration::from_millis(50);
/// Timeout passed to `kill_active` calls made from inside the barrier.
const PREEMPT_KILL_TIMEOUT: Duration = Duration::from_millis(200);
/// Final best-effort kill after the barrier, to catch any straggler.
const RESIDUAL_KILL_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub rc: i32,
    pub stdout: String,
    pub stderr: String,
}

impl DispatchOutcome {
    fn success(stdout: impl Into<String>) -> Self {
        Self {
            rc: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    fn from_invoke(outcome: bridge_device::InvokeOutcome) -> Self {
        Self {
            rc: outcome.rc,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
        }
    }

    fn from_error(err: DispatchError) -> Self {
        Self {
            rc: err.to_wire_rc(),
            stdout: String::new(),
            stderr: err.to_wire_message(),
        }
    }
}

struct RampSession {
    id: usize,
    cancel: CancellationToken,
}

enum State {
    Idle,
    Ramping(RampSession),
}

/// Single-writer coordinator. One instance is shared (via `Arc`) across
/// both frontends and the queue flusher.
pub struct Dispatcher {
    state: Arc<Mutex<State>>,
    gateway: Arc<dyn DeviceGateway>,
    voltage_state: VoltageState,
    global_timeout: Duration,
    floor: Duration,
    smoothing: Smoothing,
    next_session_id: AtomicUsize,
}

impl Dispatcher {
    pub fn new(
        gateway: Arc<dyn DeviceGateway>,
        voltage_state: VoltageState,
        global_timeout: Duration,
        floor: Duration,
        smoothing: Smoothing,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Idle)),
            gateway,
            voltage_state,
            global_timeout,
            floor,
            smoothing,
            next_session_id: AtomicUsize::new(0),
        }
    }

    /// Validate and dispatch `tokens`, preempting any in-flight work first.
    pub async fn submit(&self, tokens: Vec<String>) -> DispatchOutcome {
        self.preempt().await;

        let cmd = match bridge_core::command::parse(&tokens) {
            Ok(cmd) => cmd,
            Err(err) => {
                let err = DispatchError::from(err);
                debug!(kind = err.kind(), "rejected command");
                return DispatchOutcome::from_error(err);
            }
        };

        match cmd {
            Command::Instant(instant) => self.run_instant(instant).await,
            Command::Ramp(ramp) => self.start_ramp(ramp).await,
        }
    }

    /// Cancel any live ramp, wait briefly for it to observe cancellation,
    /// then clear residual state. Runs under the state mutex so only one
    /// `submit` proceeds past this point at a time.
    async fn preempt(&self) {
        let mut state = self.state.lock().await;

        if let State::Ramping(session) = &*state {
            session.cancel.cancel();

            let deadline = tokio::time::Instant::now() + PREEMPT_BUDGET;
            while tokio::time::Instant::now() < deadline {
                self.gateway.kill_active(PREEMPT_KILL_TIMEOUT).await;
                if !matches!(&*state, State::Ramping(_)) {
                    break;
                }
                tokio::time::sleep(PREEMPT_SLICE).await;
            }
        }

        *state = State::Idle;
        drop(state);

        self.gateway.kill_active(RESIDUAL_KILL_TIMEOUT).await;
    }

    async fn run_instant(&self, cmd: bridge_core::InstantCommand) -> DispatchOutcome {
        self.voltage_state.set(cmd.voltage);
        let args = vec![cmd.bus, cmd.address, cmd.voltage.to_string()];
        let outcome = self.gateway.invoke(&args, self.global_timeout).await;
        DispatchOutcome::from_invoke(outcome)
    }

    async fn start_ramp(&self, cmd: bridge_core::RampCommand) -> DispatchOutcome {
        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();

        {
            let mut state = self.state.lock().await;
            *state = State::Ramping(RampSession {
                id,
                cancel: cancel.clone(),
            });
        }

        let ctx = RampContext {
            bus: cmd.bus,
            address: cmd.address,
            start: -1,
            end: cmd.end_voltage,
            duration_ms: cmd.duration_ms,
            offset_ms: 0,
            floor: self.floor,
            smoothing: self.smoothing,
            global_timeout: self.global_timeout,
            cancel,
            voltage_state: self.voltage_state.clone(),
            gateway: self.gateway.clone(),
        };

        let state_handle = self.state.clone();
        tokio::spawn(async move {
            let outcome = bridge_ramp::run(ctx).await;
            info!(?outcome, "ramp task finished");
            let mut state = state_handle.lock().await;
            if matches!(&*state, State::Ramping(session) if session.id == id) {
                *state = State::Idle;
            }
        });

        DispatchOutcome::success(format!(
            "ramp started -1->{} dur={} offset=0",
            cmd.end_voltage, cmd.duration_ms
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_device::InvokeOutcome;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeGateway {
        calls: StdMutex<Vec<Vec<String>>>,
        kill_calls: StdMutex<u32>,
    }

    #[async_trait::async_trait]
    impl DeviceGateway for FakeGateway {
        async fn invoke(&self, args: &[String], _timeout: Duration) -> InvokeOutcome {
            self.calls.lock().unwrap().push(args.to_vec());
            InvokeOutcome {
                rc: 0,
                stdout: String::new(),
                stderr: String::new(),
            }
        }

        async fn kill_active(&self, _timeout: Duration) -> bool {
            *self.kill_calls.lock().unwrap() += 1;
            true
        }
    }

    fn dispatcher(gateway: Arc<FakeGateway>) -> Dispatcher {
        Dispatcher::new(
            gateway,
            VoltageState::new(),
            Duration::from_secs(5),
            Duration::from_millis(80),
            Smoothing::Linear,
        )
    }

    #[tokio::test]
    async fn bad_shape_rejected_before_invoking() {
        let gateway = Arc::new(FakeGateway::default());
        let d = dispatcher(gateway.clone());
        let outcome = d.submit(vec!["com3".into(), "1".into()]).await;
        assert_eq!(outcome.rc, 252);
        assert!(gateway.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_prefix_maps_to_253() {
        let gateway = Arc::new(FakeGateway::default());
        let d = dispatcher(gateway.clone());
        let outcome = d
            .submit(vec!["com4".into(), "1".into(), "5".into()])
            .await;
        assert_eq!(outcome.rc, 253);
    }

    #[tokio::test]
    async fn parse_error_maps_to_254() {
        let gateway = Arc::new(FakeGateway::default());
        let d = dispatcher(gateway.clone());
        let outcome = d
            .submit(vec!["com3".into(), "1".into(), "abc".into()])
            .await;
        assert_eq!(outcome.rc, 254);
    }

    #[tokio::test]
    async fn instant_command_invokes_device() {
        let gateway = Arc::new(FakeGateway::default());
        let d = dispatcher(gateway.clone());
        let outcome = d
            .submit(vec!["com3".into(), "1".into(), "1500".into()])
            .await;
        assert_eq!(outcome.rc, 0);
        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec!["com3", "1", "1500"]);
    }

    #[tokio::test]
    async fn ramp_command_returns_immediately_with_ack_text() {
        let gateway = Arc::new(FakeGateway::default());
        let d = dispatcher(gateway.clone());
        let outcome = d
            .submit(vec!["com3".into(), "1".into(), "0".into(), "10000".into()])
            .await;
        assert_eq!(outcome.rc, 0);
        assert!(outcome.stdout.starts_with("ramp started"));
    }

    #[tokio::test]
    async fn ramp_ack_text_reports_the_unresolved_start_sentinel() {
        // Matches tcp_server_setcom.py's "ramp started -1->..." ack: the
        // literal sentinel handed to the session, not any resolved value.
        let gateway = Arc::new(FakeGateway::default());
        let d = dispatcher(gateway.clone());
        d.voltage_state.set(1500);
        let outcome = d
            .submit(vec!["com3".into(), "1".into(), "0".into(), "10000".into()])
            .await;
        assert_eq!(outcome.stdout, "ramp started -1->0 dur=10000 offset=0");
    }

    #[tokio::test]
    async fn instant_commits_voltage_state_even_when_invocation_fails() {
        #[derive(Default)]
        struct FailingGateway {
            calls: StdMutex<Vec<Vec<String>>>,
        }

        #[async_trait::async_trait]
        impl DeviceGateway for FailingGateway {
            async fn invoke(&self, args: &[String], _timeout: Duration) -> InvokeOutcome {
                self.calls.lock().unwrap().push(args.to_vec());
                InvokeOutcome {
                    rc: 252,
                    stdout: String::new(),
                    stderr: "device tool path unresolved or missing".into(),
                }
            }

            async fn kill_active(&self, _timeout: Duration) -> bool {
                false
            }
        }

        let gateway = Arc::new(FailingGateway::default());
        let d = Dispatcher::new(
            gateway,
            VoltageState::new(),
            Duration::from_secs(5),
            Duration::from_millis(80),
            Smoothing::Linear,
        );

        let outcome = d
            .submit(vec!["com3".into(), "1".into(), "1500".into()])
            .await;
        assert_eq!(outcome.rc, 252);
        assert_eq!(d.voltage_state.get(), Some(1500));
    }

    #[tokio::test]
    async fn submitting_instant_preempts_a_live_ramp() {
        let gateway = Arc::new(FakeGateway::default());
        let d = dispatcher(gateway.clone());
        let _ = d
            .submit(vec!["com3".into(), "1".into(), "2000".into(), "10000".into()])
            .await;
        // second submit should run the preemption barrier and succeed
        let outcome = d
            .submit(vec!["com3".into(), "1".into(), "0".into()])
            .await;
        assert_eq!(outcome.rc, 0);
        assert!(*gateway.kill_calls.lock().unwrap() >= 1);
    }
}
