//! PID file plus `.meta` sidecar, matching the legacy bridge's
//! `write_pidfile`/`remove_pidfile`: both are removed only on a graceful
//! shutdown, left in place otherwise so a post-mortem can find them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

fn meta_path(pid_path: &Path) -> PathBuf {
    let mut s = pid_path.as_os_str().to_owned();
    s.push(".meta");
    PathBuf::from(s)
}

pub async fn write(pid_path: &Path) -> Result<()> {
    if let Some(parent) = pid_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create pid directory: {}", parent.display()))?;
        }
    }

    let pid = std::process::id();
    tokio::fs::write(pid_path, format!("{pid}\n"))
        .await
        .with_context(|| format!("failed to write pid file: {}", pid_path.display()))?;

    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let exe = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    let meta = format!("pid={pid} ts={ts} cwd={cwd} exe={exe}\n");
    tokio::fs::write(meta_path(pid_path), meta)
        .await
        .with_context(|| format!("failed to write pid meta file for {}", pid_path.display()))?;

    tracing::info!(pid, path = %pid_path.display(), "wrote pid file");
    Ok(())
}

/// Remove the pid file and its `.meta` sidecar. `graceful = false` leaves
/// both in place, matching the legacy bridge's debugging aid.
pub async fn remove(pid_path: &Path, graceful: bool) {
    if !graceful {
        tracing::warn!(path = %pid_path.display(), "non-graceful shutdown: leaving pid file in place");
        return;
    }

    if tokio::fs::remove_file(pid_path).await.is_ok() {
        tracing::info!(path = %pid_path.display(), "removed pid file");
    }
    let _ = tokio::fs::remove_file(meta_path(pid_path)).await;
}
