//! Shared domain types for the voltage control bridge: command parsing,
//! validation, and the process-wide last-known-voltage cell.

pub mod command;
pub mod voltage;

pub use command::{Command, InstantCommand, RampCommand, ValidationError};
pub use voltage::VoltageState;
