//! Resolve the device tool's executable path.
//!
//! Ported from the legacy bridge's `resolve_executable`: try the
//! configured path literally, then common executable suffixes, then a
//! same-directory basename scan, then a `PATH` lookup. Supplemented into
//! this rewrite (it's in `original_source` but absent from the distilled
//! interface spec) because the `252 ToolMissing` contract needs an actual
//! resolution step, and `Dispatcher` re-resolves on every `submit` so the
//! server can recover without a restart once the tool reappears.

use std::path::{Path, PathBuf};

use tracing::debug;

const FALLBACK_SUFFIXES: &[&str] = &[".exe", ".bat", ".cmd"];

/// Try to find a runnable file for `configured`. Returns `None` if nothing
/// plausible was found by any strategy.
pub fn resolve_tool_path(configured: &Path) -> Option<PathBuf> {
    if is_executable_file(configured) {
        return Some(configured.to_path_buf());
    }

    for suffix in FALLBACK_SUFFIXES {
        let mut candidate = configured.as_os_str().to_owned();
        candidate.push(suffix);
        let candidate = PathBuf::from(candidate);
        if is_executable_file(&candidate) {
            debug!(path = %candidate.display(), "resolved device tool via suffix probe");
            return Some(candidate);
        }
    }

    let dir = configured.parent().filter(|p| !p.as_os_str().is_empty());
    let basename = configured.file_name()?.to_string_lossy().to_lowercase();
    if let Some(dir) = dir {
        if let Ok(entries) = std::fs::read_dir(dir) {
            let mut names: Vec<_> = entries.filter_map(|e| e.ok()).collect();
            names.sort_by_key(|e| e.file_name());
            for entry in names {
                let name = entry.file_name().to_string_lossy().to_lowercase();
                if name.starts_with(&basename) && is_executable_file(&entry.path()) {
                    debug!(path = %entry.path().display(), "resolved device tool via directory scan");
                    return Some(entry.path());
                }
            }
        }
    }

    if let Some(name) = configured.file_name() {
        if let Ok(found) = which::which(name) {
            debug!(path = %found.display(), "resolved device tool via PATH lookup");
            return Some(found);
        }
    }

    None
}

fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}
