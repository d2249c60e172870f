//! Structured dispatch errors and the legacy overloaded wire `rc` they map to.

use bridge_core::ValidationError;
use thiserror::Error;

/// Everything that can keep a `submit` from succeeding, refined beyond the
/// legacy wire's overloaded integers so structured logs carry the real
/// kind even though the wire only ever sees the `rc`.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("wrong token count: {len}")]
    BadShape { len: usize },

    #[error("bad prefix: '{bus} {address}'")]
    BadPrefix { bus: String, address: String },

    #[error("invalid integer token '{token}'")]
    ParseError { token: String },

    #[error("device tool unresolved")]
    ToolMissing,

    #[error("device tool invocation timed out")]
    TimedOut,

    #[error("device tool failed to spawn: {0}")]
    SpawnFailed(String),

    #[error("device tool exited with code {0}")]
    ToolError(i32),
}

impl From<ValidationError> for DispatchError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::BadShape { len } => DispatchError::BadShape { len },
            ValidationError::BadPrefix { bus, address, .. } => {
                DispatchError::BadPrefix { bus, address }
            }
            ValidationError::ParseError { token } => DispatchError::ParseError { token },
        }
    }
}

impl DispatchError {
    /// The legacy rc the wire protocol has always reported for this kind.
    ///
    /// Overloaded by design (spec §7): `252` covers both `BadShape` and
    /// `ToolMissing`, `253` covers both `TimedOut` and `BadPrefix`, `254`
    /// covers both `ParseError` and `SpawnFailed`. Preserved for wire
    /// compatibility — do not "fix" without a version bump.
    pub fn to_wire_rc(&self) -> i32 {
        match self {
            DispatchError::BadShape { .. } => 252,
            DispatchError::ToolMissing => 252,
            DispatchError::TimedOut => 253,
            DispatchError::BadPrefix { .. } => 253,
            DispatchError::ParseError { .. } => 254,
            DispatchError::SpawnFailed(_) => 254,
            DispatchError::ToolError(rc) => *rc,
        }
    }

    pub fn to_wire_message(&self) -> String {
        self.to_string()
    }

    /// Structured tracing kind, for log filtering — distinct from the
    /// overloaded wire rc.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::BadShape { .. } => "bad_shape",
            DispatchError::BadPrefix { .. } => "bad_prefix",
            DispatchError::ParseError { .. } => "parse_error",
            DispatchError::ToolMissing => "tool_missing",
            DispatchError::TimedOut => "timed_out",
            DispatchError::SpawnFailed(_) => "spawn_failed",
            DispatchError::ToolError(_) => "tool_error",
        }
    }
}
