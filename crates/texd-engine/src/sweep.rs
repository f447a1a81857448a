use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::Result;

/// Counts from one administrative sweep pass.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
}

/// Removes workspace directories under `tmp_root` whose names carry `prefix`
/// and whose mtime is older than `max_age`.
///
/// This is a safety net against cleanup failures, not the primary cleanup
/// path; live workspaces are younger than any sane age threshold. Every
/// per-entry failure is skipped, and a missing root sweeps nothing.
pub fn sweep_stale_workspaces(
    tmp_root: &Path,
    prefix: &str,
    max_age: Duration,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    let entries = match std::fs::read_dir(tmp_root) {
        Ok(v) => v,
        Err(_) => return Ok(report),
    };
    let now = SystemTime::now();

    for entry in entries {
        let entry = match entry {
            Ok(v) => v,
            Err(_) => continue,
        };
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(v) => v,
            Err(_) => continue,
        };
        // A symlink is never one of our workspaces, and following one would
        // leave remove_dir_all failing on it every pass.
        if file_type.is_symlink() || !file_type.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(prefix) {
            continue;
        }
        report.scanned += 1;

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let age = match now.duration_since(modified) {
            Ok(v) => v,
            Err(_) => continue,
        };
        if age < max_age {
            continue;
        }

        if std::fs::remove_dir_all(&path).is_ok() {
            report.removed += 1;
        }
    }

    Ok(report)
}
