//! Compilation pipeline for LaTeX documents.
//!
//! The engine materializes an isolated workspace per request, stages the
//! user's source (plus any asset collection or uploaded archive) into it,
//! runs the external TeX compiler twice with a hard wall-clock timeout, and
//! collects the PDF artifact. Admission is bounded by a FIFO gate so at most
//! a fixed number of compiler processes run at once, and every exit path
//! removes the workspace and returns the admission slot.

use std::path::PathBuf;

pub mod bundle;
pub mod doctor;
pub mod gate;
pub mod invoke;
pub mod pipeline;
pub mod sweep;
pub mod workspace;

pub use bundle::{resolve_entry_point, BundleRequest};
pub use gate::{AdmissionGate, AdmissionPermit};
pub use invoke::RunOutput;
pub use pipeline::{CompileOutcome, CompileRequest, Pipeline};
pub use sweep::{sweep_stale_workspaces, SweepReport};
pub use workspace::Workspace;

/// Maximum concurrent compiler invocations per pipeline.
pub const MAX_CONCURRENT_COMPILES: usize = 10;

/// Wall-clock budget for one compiler pass, in milliseconds.
pub const COMPILE_WALL_MS: u64 = 30_000;

/// Wall-clock budget for the `--version` availability probe.
pub const DOCTOR_WALL_MS: u64 = 5_000;

/// Admission is denied when the temp filesystem has less free space than this.
pub const MIN_FREE_DISK_BYTES: u64 = 1024 * 1024 * 1024;

/// Workspaces older than this are fair game for the administrative sweep.
pub const SWEEP_MAX_AGE_MS: u64 = 3_600_000;

/// Directory-name prefix for every workspace this engine creates.
pub const WORKSPACE_PREFIX: &str = "texd_job";

pub const MAX_STDOUT_BYTES: usize = 1024 * 1024;
pub const MAX_STDERR_BYTES: usize = 256 * 1024;

/// Recognized entry-point source extension.
pub const SOURCE_EXT: &str = "tex";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Compiler executable, resolved through `PATH` unless absolute.
    pub tex_bin: PathBuf,
    /// Shared root under which per-request workspaces are created.
    pub tmp_root: PathBuf,
    pub wall_ms: u64,
    pub max_concurrent: usize,
    pub min_free_disk_bytes: u64,
    pub max_stdout_bytes: usize,
    pub max_stderr_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tex_bin: PathBuf::from("pdflatex"),
            tmp_root: std::env::temp_dir(),
            wall_ms: COMPILE_WALL_MS,
            max_concurrent: MAX_CONCURRENT_COMPILES,
            min_free_disk_bytes: MIN_FREE_DISK_BYTES,
            max_stdout_bytes: MAX_STDOUT_BYTES,
            max_stderr_bytes: MAX_STDERR_BYTES,
        }
    }
}

/// Failures surfaced before or instead of a compiler run.
///
/// A compiler that ran and produced no artifact is not an error here; that
/// outcome travels as a [`CompileOutcome`] with `success == false` so the
/// caller always gets the captured log.
#[derive(Debug)]
pub enum CompileError {
    /// Missing or invalid request fields. Not retried.
    Input(String),
    /// Uploaded archive could not be opened or extracted.
    BadArchive(String),
    /// No candidate entry-point source file in the extracted tree.
    NoEntryPoint,
    /// Free-disk floor breached; callers should back off, not blame the input.
    Capacity {
        free_bytes: Option<u64>,
        floor_bytes: u64,
    },
    /// The external compiler is not on this host.
    CompilerMissing(String),
    /// Workspace or filesystem operation failed.
    Resource(anyhow::Error),
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Input(msg) => write!(f, "invalid request: {msg}"),
            CompileError::BadArchive(msg) => write!(f, "invalid archive: {msg}"),
            CompileError::NoEntryPoint => {
                write!(f, "no .{SOURCE_EXT} entry point found in submission")
            }
            CompileError::Capacity {
                free_bytes,
                floor_bytes,
            } => match free_bytes {
                Some(free) => write!(
                    f,
                    "insufficient disk space: {free} bytes free, floor is {floor_bytes}"
                ),
                None => write!(f, "insufficient disk space (floor is {floor_bytes} bytes)"),
            },
            CompileError::CompilerMissing(bin) => {
                write!(f, "compiler not available on this host: {bin}")
            }
            CompileError::Resource(err) => write!(f, "workspace failure: {err:#}"),
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CompileError::Resource(err) => err.source(),
            _ => None,
        }
    }
}
