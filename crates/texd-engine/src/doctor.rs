use std::process::Command;

use crate::invoke::run_command_capped;
use crate::{EngineConfig, DOCTOR_WALL_MS};

/// Probes the configured compiler with `--version` under a short budget.
/// Any spawn failure, timeout, or nonzero exit means "not available".
pub fn tex_available(cfg: &EngineConfig) -> bool {
    let mut cmd = Command::new(&cfg.tex_bin);
    cmd.arg("--version");
    match run_command_capped(cmd, DOCTOR_WALL_MS, 64 * 1024, 64 * 1024) {
        Ok(out) => !out.timed_out && out.exit_status == 0,
        Err(_) => false,
    }
}

/// Version banner for reports: first line of `--version` output, if the
/// probe succeeds.
pub fn tex_version(cfg: &EngineConfig) -> Option<String> {
    let mut cmd = Command::new(&cfg.tex_bin);
    cmd.arg("--version");
    let out = run_command_capped(cmd, DOCTOR_WALL_MS, 64 * 1024, 64 * 1024).ok()?;
    if out.timed_out || out.exit_status != 0 {
        return None;
    }
    let text = String::from_utf8_lossy(&out.stdout);
    text.lines().next().map(|l| l.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn missing_binary_is_unavailable() {
        let cfg = EngineConfig {
            tex_bin: PathBuf::from("/nonexistent/texd-no-such-binary"),
            ..EngineConfig::default()
        };
        assert!(!tex_available(&cfg));
        assert!(tex_version(&cfg).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn zero_exit_probe_is_available() {
        let cfg = EngineConfig {
            tex_bin: PathBuf::from("/bin/true"),
            ..EngineConfig::default()
        };
        assert!(tex_available(&cfg));
    }
}
