//! Device-tool invocation: spawn one subprocess at a time, wait with a
//! timeout, publish a killable handle, and best-effort parse any voltage
//! echo from its output.

mod handle;
mod resolve;

pub use handle::InvocationHandle;
pub use resolve::resolve_tool_path;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use bridge_core::VoltageState;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// rc surfaced when the configured tool path could not be resolved.
pub const RC_TOOL_MISSING: i32 = 252;
/// rc surfaced when the invocation exceeded its deadline and was killed.
pub const RC_TIMED_OUT: i32 = 253;
/// rc surfaced when the child process failed to spawn.
pub const RC_SPAWN_FAILED: i32 = 254;

/// Extra time given to a timed-out child to drain its output after being
/// killed, per spec: "wait up to 2s more for drainage".
const DRAIN_GRACE: Duration = Duration::from_secs(2);

static VOLT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)volt\s*[:=]?\s*(-?\d+)").expect("static regex is valid"));

/// Outcome of a single device-tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeOutcome {
    pub rc: i32,
    pub stdout: String,
    pub stderr: String,
}

impl InvokeOutcome {
    fn tool_missing(message: impl Into<String>) -> Self {
        Self {
            rc: RC_TOOL_MISSING,
            stdout: String::new(),
            stderr: message.into(),
        }
    }

    fn spawn_failed(message: impl Into<String>) -> Self {
        Self {
            rc: RC_SPAWN_FAILED,
            stdout: String::new(),
            stderr: message.into(),
        }
    }

    fn timed_out(stdout: String, stderr: String) -> Self {
        Self {
            rc: RC_TIMED_OUT,
            stdout,
            stderr,
        }
    }
}

/// Invoke the device tool with `args`, waiting at most `timeout` for it to
/// complete.
///
/// `tool_path` is the already-resolved path to the device tool binary (see
/// [`resolve_tool_path`]); `None` surfaces [`RC_TOOL_MISSING`] without
/// attempting to spawn anything.
///
/// Publishes the child's pid to `handle` before waiting and clears it on
/// every exit path. If `args[2]` parses as an integer, `voltage_state` is
/// optimistically pre-updated before the child runs; a `volt` echo parsed
/// from the child's combined output may overwrite it afterward.
pub async fn invoke(
    tool_path: Option<&Path>,
    args: &[String],
    timeout: Duration,
    handle: &InvocationHandle,
    voltage_state: &VoltageState,
) -> InvokeOutcome {
    let Some(tool_path) = tool_path else {
        let msg = "device tool path unresolved or missing";
        warn!(msg);
        return InvokeOutcome::tool_missing(msg);
    };

    if let Some(v) = args.get(2).and_then(|s| s.parse::<i64>().ok()) {
        voltage_state.set(v);
        debug!(voltage = v, "optimistic pre-update before invoking device tool");
    }

    let cwd = tool_path.parent().unwrap_or_else(|| Path::new("."));
    debug!(tool = %tool_path.display(), ?args, "starting device tool");

    let mut cmd = tokio::process::Command::new(tool_path);
    cmd.args(args)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true);

    // SAFETY: setsid() has no preconditions; isolates the child (and any
    // children it spawns) in its own process group so a timeout kill can
    // take down the whole group, not just the immediate pid.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(error = %err, "failed to spawn device tool");
            return InvokeOutcome::spawn_failed(err.to_string());
        }
    };

    let pid = child.id();
    if let Some(pid) = pid {
        handle.publish(pid);
    }

    let outcome = wait_with_timeout(&mut child, timeout).await;
    handle.clear();

    match outcome {
        WaitOutcome::Completed { rc, stdout, stderr } => {
            if let Some(v) = parse_voltage(&stdout, &stderr) {
                voltage_state.set(v);
                debug!(voltage = v, "updated last-known voltage from device tool output");
            }
            debug!(rc, "device tool finished");
            InvokeOutcome { rc, stdout, stderr }
        }
        WaitOutcome::TimedOut { stdout, stderr } => {
            warn!("device tool timed out; killed");
            InvokeOutcome::timed_out(stdout, stderr)
        }
    }
}

enum WaitOutcome {
    Completed { rc: i32, stdout: String, stderr: String },
    TimedOut { stdout: String, stderr: String },
}

/// Reads stdout/stderr concurrently (never sequentially — a chatty child
/// could fill one pipe's OS buffer and deadlock against the other) while
/// also polling for process exit, accumulating into `out`/`err`, which are
/// owned by the caller so a second call (after a kill) resumes draining
/// instead of losing what was already captured.
async fn drain_and_wait(
    child: &mut tokio::process::Child,
    stdout_pipe: &mut Option<tokio::process::ChildStdout>,
    stderr_pipe: &mut Option<tokio::process::ChildStderr>,
    out: &mut String,
    err: &mut String,
    exited: &mut Option<std::process::ExitStatus>,
) {
    use tokio::io::AsyncReadExt;

    let mut stdout_done = stdout_pipe.is_none();
    let mut stderr_done = stderr_pipe.is_none();
    let mut stdout_buf = [0u8; 4096];
    let mut stderr_buf = [0u8; 4096];

    while !stdout_done || !stderr_done || exited.is_none() {
        tokio::select! {
            res = async { stdout_pipe.as_mut().unwrap().read(&mut stdout_buf).await }, if !stdout_done => {
                match res {
                    Ok(0) | Err(_) => stdout_done = true,
                    Ok(n) => out.push_str(&String::from_utf8_lossy(&stdout_buf[..n])),
                }
            }
            res = async { stderr_pipe.as_mut().unwrap().read(&mut stderr_buf).await }, if !stderr_done => {
                match res {
                    Ok(0) | Err(_) => stderr_done = true,
                    Ok(n) => err.push_str(&String::from_utf8_lossy(&stderr_buf[..n])),
                }
            }
            status = child.wait(), if exited.is_none() => {
                *exited = status.ok();
            }
        }
    }
}

async fn wait_with_timeout(child: &mut tokio::process::Child, timeout: Duration) -> WaitOutcome {
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let mut out = String::new();
    let mut err = String::new();
    let mut exited: Option<std::process::ExitStatus> = None;

    let completed = tokio::time::timeout(
        timeout,
        drain_and_wait(
            child,
            &mut stdout_pipe,
            &mut stderr_pipe,
            &mut out,
            &mut err,
            &mut exited,
        ),
    )
    .await
    .is_ok();

    if completed {
        let rc = exited.and_then(exit_code).unwrap_or(1);
        return WaitOutcome::Completed {
            rc,
            stdout: out,
            stderr: err,
        };
    }

    let _ = child.start_kill();
    let _ = tokio::time::timeout(
        DRAIN_GRACE,
        drain_and_wait(
            child,
            &mut stdout_pipe,
            &mut stderr_pipe,
            &mut out,
            &mut err,
            &mut exited,
        ),
    )
    .await;

    WaitOutcome::TimedOut {
        stdout: out,
        stderr: err,
    }
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.code().or_else(|| status.signal().map(|_| 1))
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> Option<i32> {
    status.code()
}

fn parse_voltage(stdout: &str, stderr: &str) -> Option<i64> {
    let combined = format!("{stdout}\n{stderr}");
    VOLT_PATTERN
        .captures(&combined)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_volt_colon() {
        assert_eq!(parse_voltage("status ok\nVolt: 42\n", ""), Some(42));
    }

    #[test]
    fn parses_volt_equals_case_insensitive() {
        assert_eq!(parse_voltage("VOLT=-17", ""), Some(-17));
    }

    #[test]
    fn parses_volt_no_separator() {
        assert_eq!(parse_voltage("volt 900", ""), Some(900));
    }

    #[test]
    fn no_match_returns_none() {
        assert_eq!(parse_voltage("nothing relevant here", ""), None);
    }

    #[test]
    fn searches_stderr_too() {
        assert_eq!(parse_voltage("", "volt: 7"), Some(7));
    }

    #[tokio::test]
    async fn tool_missing_short_circuits() {
        let handle = InvocationHandle::new();
        let voltage = VoltageState::new();
        let outcome = invoke(None, &[], Duration::from_secs(1), &handle, &voltage).await;
        assert_eq!(outcome.rc, RC_TOOL_MISSING);
    }

    #[tokio::test]
    async fn optimistic_pre_update_happens_before_spawn_failure() {
        let handle = InvocationHandle::new();
        let voltage = VoltageState::new();
        let missing = Path::new("/nonexistent/definitely/not/a/tool");
        let args = vec!["com3".to_string(), "1".to_string(), "777".to_string()];
        let outcome = invoke(Some(missing), &args, Duration::from_secs(1), &handle, &voltage).await;
        assert_eq!(outcome.rc, RC_SPAWN_FAILED);
        assert_eq!(voltage.get(), Some(777));
    }

    #[tokio::test]
    async fn successful_invocation_runs_true() {
        let handle = InvocationHandle::new();
        let voltage = VoltageState::new();
        let true_bin = which::which("true").expect("`true` must exist for this test");
        let outcome = invoke(
            Some(&true_bin),
            &["com3".into(), "1".into(), "5".into()],
            Duration::from_secs(5),
            &handle,
            &voltage,
        )
        .await;
        assert_eq!(outcome.rc, 0);
        assert!(handle.get().is_none());
    }

    #[tokio::test]
    async fn timeout_kills_and_reports_253() {
        let handle = InvocationHandle::new();
        let voltage = VoltageState::new();
        let sleep_bin = which::which("sleep").expect("`sleep` must exist for this test");
        let outcome = invoke(
            Some(&sleep_bin),
            &["5".into()],
            Duration::from_millis(100),
            &handle,
            &voltage,
        )
        .await;
        assert_eq!(outcome.rc, RC_TIMED_OUT);
        assert!(handle.get().is_none());
    }
}
