//! Command token validation.
//!
//! Mirrors the legacy protocol's ordering exactly: shape first, then bus
//! prefix, then integer parsing — later stages assume earlier ones passed,
//! so the order is load-bearing for which `rc` a malformed line gets.

use thiserror::Error;

/// Required bus token, matched case-insensitively.
pub const EXPECTED_BUS: &str = "com3";
/// Required address token, matched literally.
pub const EXPECTED_ADDRESS: &str = "1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid command format: expected 3 tokens (instant) or 4 tokens (ramp); got {len}")]
    BadShape { len: usize },

    #[error("invalid command prefix: expected first two tokens '{expected_bus} {expected_address}', got '{bus} {address}'")]
    BadPrefix {
        bus: String,
        address: String,
        expected_bus: &'static str,
        expected_address: &'static str,
    },

    #[error("invalid integer token '{token}'")]
    ParseError { token: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantCommand {
    pub bus: String,
    pub address: String,
    pub voltage: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampCommand {
    pub bus: String,
    pub address: String,
    pub end_voltage: i64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Instant(InstantCommand),
    Ramp(RampCommand),
}

/// Validate and parse a whitespace-split token list into a [`Command`].
///
/// Returns the same error kind regardless of any runtime state (§8
/// "idempotent validation" invariant) — this function touches nothing but
/// its arguments.
pub fn parse(tokens: &[String]) -> Result<Command, ValidationError> {
    if tokens.len() != 3 && tokens.len() != 4 {
        return Err(ValidationError::BadShape { len: tokens.len() });
    }

    let bus = &tokens[0];
    let address = &tokens[1];
    if !bus.eq_ignore_ascii_case(EXPECTED_BUS) || address != EXPECTED_ADDRESS {
        return Err(ValidationError::BadPrefix {
            bus: bus.clone(),
            address: address.clone(),
            expected_bus: EXPECTED_BUS,
            expected_address: EXPECTED_ADDRESS,
        });
    }

    if tokens.len() == 3 {
        let voltage = parse_i64(&tokens[2])?;
        return Ok(Command::Instant(InstantCommand {
            bus: bus.clone(),
            address: address.clone(),
            voltage,
        }));
    }

    let end_voltage = parse_i64(&tokens[2])?;
    let duration_ms = parse_u64(&tokens[3])?;
    Ok(Command::Ramp(RampCommand {
        bus: bus.clone(),
        address: address.clone(),
        end_voltage,
        duration_ms,
    }))
}

fn parse_i64(token: &str) -> Result<i64, ValidationError> {
    token.parse::<i64>().map_err(|_| ValidationError::ParseError {
        token: token.to_string(),
    })
}

fn parse_u64(token: &str) -> Result<u64, ValidationError> {
    token.parse::<u64>().map_err(|_| ValidationError::ParseError {
        token: token.to_string(),
    })
}
