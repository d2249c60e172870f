//! Ramp planning and execution: shaping a timed voltage transition and
//! running it with cooperative, bounded-latency cancellation.

pub mod planner;
pub mod runner;

pub use planner::{plan, RampPlan, Smoothing};
pub use runner::{run, RampContext, RampOutcome};
