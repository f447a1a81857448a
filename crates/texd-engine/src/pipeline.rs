use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

use crate::bundle::{extract_bundle, resolve_entry_point, BundleRequest};
use crate::doctor::tex_available;
use crate::gate::{check_capacity, AdmissionGate};
use crate::invoke::run_tex_pass;
use crate::workspace::Workspace;
use crate::{CompileError, EngineConfig, SOURCE_EXT, WORKSPACE_PREFIX};

/// A source-text compilation request. Ephemeral; lives for one call.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub source: String,
    /// Logical filename without extension.
    pub filename: String,
    /// Pre-resolved asset collection directory to stage into the workspace.
    pub assets_dir: Option<PathBuf>,
}

/// Immutable result of a compilation that reached the compiler.
#[derive(Debug, Clone, Serialize)]
pub struct CompileOutcome {
    pub success: bool,
    /// Combined stdout + stderr of the inspected pass.
    pub log: String,
    pub log_truncated: bool,
    /// Artifact bytes; present iff `success`.
    #[serde(skip)]
    pub pdf: Option<Vec<u8>>,
    /// Logical name of the artifact (`{entry stem}.pdf`).
    pub artifact_name: String,
    pub timed_out: bool,
}

/// End-to-end request handling: admit, stage, invoke twice, collect, report.
///
/// One pipeline owns one admission gate, so the concurrency bound applies to
/// every request routed through it. The pipeline itself is `Sync`; each
/// request runs as a sequential state machine on its calling thread.
pub struct Pipeline {
    cfg: EngineConfig,
    gate: AdmissionGate,
}

impl Pipeline {
    pub fn new(cfg: EngineConfig) -> Self {
        let gate = AdmissionGate::new(cfg.max_concurrent);
        Self { cfg, gate }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Compiles a single source text. The entry file is written as
    /// `{filename}.tex` in a fresh workspace.
    pub fn compile_source(&self, req: &CompileRequest) -> Result<CompileOutcome, CompileError> {
        if req.source.trim().is_empty() {
            return Err(CompileError::Input("empty source text".to_string()));
        }
        let filename = validate_filename(&req.filename)?;

        self.admission_preflight()?;
        let _permit = self.gate.acquire();

        let ws = Workspace::create(&self.cfg.tmp_root, WORKSPACE_PREFIX)
            .map_err(CompileError::Resource)?;
        self.stage_assets(&ws, req.assets_dir.as_deref())?;

        let entry = PathBuf::from(format!("{filename}.{SOURCE_EXT}"));
        std::fs::write(ws.path().join(&entry), req.source.as_bytes())
            .with_context(|| format!("write entry file {}", entry.display()))
            .map_err(CompileError::Resource)?;

        self.run_two_passes(&ws, &entry)
    }

    /// Compiles a multi-file bundle (zip blob or flat file set); the entry
    /// point is resolved by policy after extraction. Resolution failures
    /// happen before any compiler invocation.
    pub fn compile_bundle(
        &self,
        bundle: &BundleRequest,
        preferred_entry: Option<&str>,
        assets_dir: Option<&Path>,
    ) -> Result<CompileOutcome, CompileError> {
        self.admission_preflight()?;
        let _permit = self.gate.acquire();

        let ws = Workspace::create(&self.cfg.tmp_root, WORKSPACE_PREFIX)
            .map_err(CompileError::Resource)?;
        self.stage_assets(&ws, assets_dir)?;
        extract_bundle(&ws, bundle)?;
        let entry = resolve_entry_point(ws.path(), preferred_entry)?;

        self.run_two_passes(&ws, &entry)
    }

    /// Capacity gate plus compiler availability, checked before admission so
    /// a doomed request never occupies a slot.
    fn admission_preflight(&self) -> Result<(), CompileError> {
        if !check_capacity(&self.cfg.tmp_root, self.cfg.min_free_disk_bytes) {
            return Err(CompileError::Capacity {
                free_bytes: crate::gate::free_disk_bytes(&self.cfg.tmp_root),
                floor_bytes: self.cfg.min_free_disk_bytes,
            });
        }
        if !tex_available(&self.cfg) {
            return Err(CompileError::CompilerMissing(
                self.cfg.tex_bin.display().to_string(),
            ));
        }
        Ok(())
    }

    fn stage_assets(&self, ws: &Workspace, assets_dir: Option<&Path>) -> Result<(), CompileError> {
        let Some(dir) = assets_dir else {
            return Ok(());
        };
        if !dir.is_dir() {
            // A collection with no uploads yet is indistinguishable from an
            // unknown id on disk; both stage nothing.
            return Ok(());
        }
        ws.stage_dir(dir).map_err(CompileError::Resource)
    }

    /// Two sequential passes over the same workspace; the second pass
    /// resolves cross-references and is the one inspected. A first pass that
    /// times out or never spawned is reported directly, since its failure
    /// shape is what the second pass would repeat at double the wall cost.
    fn run_two_passes(
        &self,
        ws: &Workspace,
        entry: &Path,
    ) -> Result<CompileOutcome, CompileError> {
        // The compiler drops the artifact next to the entry file.
        let workdir = match entry.parent() {
            Some(p) if !p.as_os_str().is_empty() => ws.path().join(p),
            _ => ws.path().to_path_buf(),
        };
        let entry_name = PathBuf::from(entry.file_name().unwrap_or(entry.as_os_str()));

        let first = run_tex_pass(&self.cfg, &workdir, &entry_name)
            .map_err(CompileError::Resource)?;
        let inspected = if first.timed_out || first.exit_status == crate::invoke::SPAWN_FAILURE_EXIT
        {
            first
        } else {
            run_tex_pass(&self.cfg, &workdir, &entry_name).map_err(CompileError::Resource)?
        };

        let stem = entry_name
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let artifact_name = format!("{stem}.pdf");
        let artifact_path = workdir.join(&artifact_name);

        // Exit code alone is not trusted: the compiler can exit 0 without
        // producing output.
        let success =
            !inspected.timed_out && inspected.exit_status == 0 && artifact_path.is_file();

        let pdf = if success {
            Some(
                std::fs::read(&artifact_path)
                    .with_context(|| format!("read artifact {}", artifact_path.display()))
                    .map_err(CompileError::Resource)?,
            )
        } else {
            None
        };

        Ok(CompileOutcome {
            success,
            log: inspected.combined_log(),
            log_truncated: inspected.stdout_truncated || inspected.stderr_truncated,
            pdf,
            artifact_name,
            timed_out: inspected.timed_out,
        })
    }
}

/// Logical filenames are a single safe path component with no extension
/// games: no separators, no leading dot, not empty.
fn validate_filename(name: &str) -> Result<&str, CompileError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CompileError::Input("empty filename".to_string()));
    }
    if trimmed.starts_with('.') {
        return Err(CompileError::Input(format!("invalid filename: {name}")));
    }
    let as_path = Path::new(trimmed);
    let mut components = as_path.components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    );
    if !single || trimmed.contains('\\') {
        return Err(CompileError::Input(format!("invalid filename: {name}")));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_validation() {
        assert!(validate_filename("doc").is_ok());
        assert!(validate_filename("report-2024_v2").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("   ").is_err());
        assert!(validate_filename(".hidden").is_err());
        assert!(validate_filename("a/b").is_err());
        assert!(validate_filename("../evil").is_err());
        assert!(validate_filename("a\\b").is_err());
    }
}
