//! Environment-variable configuration, matching spec §6's constants.
//!
//! No project-scoped config file here — just `VAR=default` fallbacks, the
//! same idiom `csa-mcp-hub::config::HubConfig` uses for its own binding
//! settings, read once at startup via [`Config::from_env`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use bridge_ramp::Smoothing;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 4998;
const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_SUBPROCESS_TIMEOUT_SECS: f64 = 60.0;
const DEFAULT_FLUSH_INTERVAL_SECS: f64 = 5.0;
const DEFAULT_SUPERVISOR_CHECK_SECS: f64 = 1.0;
const DEFAULT_RAMP_SMOOTHING: &str = "linear";
const DEFAULT_RAMP_STEP_DELAY_FLOOR_SECS: f64 = 0.08;
const DEFAULT_DEVICE_TOOL_PATH: &str = "./tool";
const DEFAULT_PID_PATH: &str = "/tmp/voltage-bridge.pid";
const DEFAULT_QUEUE_DB_PATH: &str = "/tmp/voltage-bridge-queue.db";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub http_host: String,
    pub http_port: u16,
    pub subprocess_timeout: Duration,
    pub flush_interval: Duration,
    /// Present for parity with spec §6; this rewrite doesn't reintroduce
    /// a self-restarting supervisor loop, so nothing currently reads it.
    pub supervisor_check: Duration,
    pub ramp_smoothing: Smoothing,
    pub ramp_step_delay_floor: Duration,
    pub device_tool_path: PathBuf,
    pub pid_path: PathBuf,
    pub queue_db_path: PathBuf,
}

impl Config {
    /// Build a [`Config`] from the process environment, validating every
    /// value eagerly so a misconfigured deployment fails fast at startup
    /// rather than surfacing a confusing error later.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env_string("HOST", DEFAULT_HOST),
            port: env_parsed("PORT", DEFAULT_PORT)?,
            http_host: env_string("HTTP_HOST", DEFAULT_HTTP_HOST),
            http_port: env_parsed("HTTP_PORT", DEFAULT_HTTP_PORT)?,
            subprocess_timeout: env_duration_secs(
                "SUBPROCESS_TIMEOUT",
                DEFAULT_SUBPROCESS_TIMEOUT_SECS,
            )?,
            flush_interval: env_duration_secs("FLUSH_INTERVAL", DEFAULT_FLUSH_INTERVAL_SECS)?,
            supervisor_check: env_duration_secs(
                "SUPERVISOR_CHECK",
                DEFAULT_SUPERVISOR_CHECK_SECS,
            )?,
            ramp_smoothing: env_smoothing("RAMP_SMOOTHING", DEFAULT_RAMP_SMOOTHING)?,
            ramp_step_delay_floor: env_duration_secs(
                "RAMP_STEP_DELAY_FLOOR",
                DEFAULT_RAMP_STEP_DELAY_FLOOR_SECS,
            )?,
            device_tool_path: PathBuf::from(env_string(
                "DEVICE_TOOL_PATH",
                DEFAULT_DEVICE_TOOL_PATH,
            )),
            pid_path: PathBuf::from(env_string("PID_PATH", DEFAULT_PID_PATH)),
            queue_db_path: PathBuf::from(env_string("QUEUE_DB_PATH", DEFAULT_QUEUE_DB_PATH)),
        })
    }
}

fn env_string(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T>(var: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {var}={raw}: {e}"))
            .with_context(|| format!("parsing environment variable {var}")),
        Err(_) => Ok(default),
    }
}

fn env_duration_secs(var: &str, default_secs: f64) -> Result<Duration> {
    let secs: f64 = match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid {var}={raw}: expected seconds as a number"))?,
        Err(_) => default_secs,
    };
    if secs < 0.0 {
        anyhow::bail!("{var} must not be negative, got {secs}");
    }
    Ok(Duration::from_secs_f64(secs))
}

fn env_smoothing(var: &str, default: &str) -> Result<Smoothing> {
    let raw = env_string(var, default);
    raw.parse()
        .map_err(|e| anyhow::anyhow!("invalid {var}={raw}: {e}"))
}
