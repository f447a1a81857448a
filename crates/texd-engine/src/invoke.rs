use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::EngineConfig;

/// Marker appended to captured stderr when a pass is killed at the deadline.
pub const TIMEOUT_MARKER: &str = "[texd] wall-clock timeout exceeded; compiler killed";

/// Exit code reported when the compiler could not be spawned at all.
pub const SPAWN_FAILURE_EXIT: i32 = -1;

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit_status: i32,
    pub timed_out: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

impl RunOutput {
    fn spawn_failure(message: String) -> Self {
        Self {
            exit_status: SPAWN_FAILURE_EXIT,
            timed_out: false,
            stdout: Vec::new(),
            stderr: message.into_bytes(),
            stdout_truncated: false,
            stderr_truncated: false,
        }
    }

    /// Combined log the way callers see it: stdout, then stderr.
    pub fn combined_log(&self) -> String {
        let mut log = String::from_utf8_lossy(&self.stdout).into_owned();
        log.push('\n');
        log.push_str(&String::from_utf8_lossy(&self.stderr));
        log
    }
}

/// Runs one compiler pass in `workdir` against `entry`.
///
/// Non-interactive mode, entry filename as the sole positional argument.
/// Stdout and stderr are drained incrementally on reader threads with byte
/// caps, so even a killed pass leaves a usable partial log. A spawn failure
/// is folded into the output (exit code -1), never an `Err`.
pub fn run_tex_pass(cfg: &EngineConfig, workdir: &Path, entry: &Path) -> Result<RunOutput> {
    let mut cmd = Command::new(&cfg.tex_bin);
    cmd.arg("-interaction=nonstopmode");
    cmd.arg(entry);
    cmd.current_dir(workdir);
    run_command_capped(
        cmd,
        cfg.wall_ms,
        cfg.max_stdout_bytes,
        cfg.max_stderr_bytes,
    )
}

pub fn run_command_capped(
    mut cmd: Command,
    wall_ms: u64,
    stdout_cap: usize,
    stderr_cap: usize,
) -> Result<RunOutput> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    // The compiler gets its own process group so the deadline kill reaches
    // any helper processes it spawned; a surviving grandchild would hold the
    // output pipes open and stall the reader threads.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt as _;
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 && libc::setpgid(0, 0) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            return Ok(RunOutput::spawn_failure(format!(
                "failed to spawn {:?}: {err}",
                cmd.get_program()
            )))
        }
    };

    let stdout = child.stdout.take().context("take stdout")?;
    let stderr = child.stderr.take().context("take stderr")?;

    let stdout_thread = std::thread::spawn(move || -> std::io::Result<(Vec<u8>, bool)> {
        read_to_end_capped(stdout, stdout_cap)
    });
    let stderr_thread = std::thread::spawn(move || -> std::io::Result<(Vec<u8>, bool)> {
        read_to_end_capped(stderr, stderr_cap)
    });

    let (status, timed_out) = wait_child_with_wall_timeout(&mut child, wall_ms)?;
    let (stdout_bytes, stdout_truncated) = stdout_thread
        .join()
        .unwrap_or_else(|_| Ok((Vec::new(), false)))?;
    let (mut stderr_bytes, stderr_truncated) = stderr_thread
        .join()
        .unwrap_or_else(|_| Ok((Vec::new(), false)))?;

    if timed_out {
        stderr_bytes.extend_from_slice(b"\n");
        stderr_bytes.extend_from_slice(TIMEOUT_MARKER.as_bytes());
        stderr_bytes.extend_from_slice(b"\n");
    }

    #[cfg(unix)]
    let exit_signal = {
        use std::os::unix::process::ExitStatusExt as _;
        status.signal()
    };
    #[cfg(not(unix))]
    let exit_signal: Option<i32> = None;

    let exit_status = match status.code() {
        Some(code) => code,
        None => exit_signal.map(|s| 128 + s).unwrap_or(1),
    };

    Ok(RunOutput {
        exit_status,
        timed_out,
        stdout: stdout_bytes,
        stderr: stderr_bytes,
        stdout_truncated,
        stderr_truncated,
    })
}

fn wait_child_with_wall_timeout(
    child: &mut std::process::Child,
    wall_ms: u64,
) -> Result<(std::process::ExitStatus, bool)> {
    let wall_limit = Duration::from_millis(wall_ms.max(1));
    let start = Instant::now();
    let deadline = start.checked_add(wall_limit);

    loop {
        if let Some(status) = child.try_wait().context("try_wait child")? {
            return Ok((status, false));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            kill_child_group(child);
            let status = child.wait().context("wait child after kill")?;
            return Ok((status, true));
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[cfg(unix)]
fn kill_child_group(child: &mut std::process::Child) {
    let pgid = child.id() as i32;
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_child_group(child: &mut std::process::Child) {
    let _ = child.kill();
}

pub fn read_to_end_capped<R: Read>(mut reader: R, cap: usize) -> std::io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = reader.read(&mut tmp)?;
        if n == 0 {
            break;
        }

        if truncated {
            continue;
        }

        let remaining = cap.saturating_sub(buf.len());
        if n <= remaining {
            buf.extend_from_slice(&tmp[..n]);
        } else {
            buf.extend_from_slice(&tmp[..remaining]);
            truncated = true;
        }
    }

    Ok((buf, truncated))
}
