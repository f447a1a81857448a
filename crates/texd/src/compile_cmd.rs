use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use texd_assets::AssetStore;
use texd_contracts::{TEXD_COMPILE_REPORT_SCHEMA_VERSION, TEXD_STATUS_REPORT_SCHEMA_VERSION};
use texd_engine::{
    BundleRequest, CompileError, CompileOutcome, CompileRequest, EngineConfig, Pipeline,
};

use crate::report::{classify, print_report, sha256_hex, ReportError, EXIT_COMPILE_FAILED};

#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    /// Compiler executable.
    #[arg(long, default_value = "pdflatex")]
    pub tex_bin: PathBuf,

    /// Shared root for ephemeral workspaces (defaults to the OS temp dir).
    #[arg(long)]
    pub tmp_root: Option<PathBuf>,

    /// Wall-clock budget per compiler pass, in milliseconds.
    #[arg(long, default_value_t = texd_engine::COMPILE_WALL_MS)]
    pub timeout_ms: u64,
}

impl EngineArgs {
    fn config(&self) -> EngineConfig {
        EngineConfig {
            tex_bin: self.tex_bin.clone(),
            tmp_root: self
                .tmp_root
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            wall_ms: self.timeout_ms,
            ..EngineConfig::default()
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct CompileArgs {
    /// Source file to compile.
    #[arg(long, value_name = "PATH")]
    pub r#in: PathBuf,

    /// Logical filename without extension.
    #[arg(long, default_value = "document")]
    pub filename: String,

    /// Asset collection id to stage alongside the source.
    #[arg(long)]
    pub assets: Option<String>,

    /// Asset store root (used with --assets).
    #[arg(long, default_value = "assets")]
    pub assets_root: PathBuf,

    /// Where to write the PDF artifact.
    #[arg(long, value_name = "PATH")]
    pub out: PathBuf,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Debug, Clone, Args)]
pub struct CompileStatusArgs {
    #[arg(long, value_name = "PATH")]
    pub r#in: PathBuf,

    #[arg(long, default_value = "document")]
    pub filename: String,

    #[arg(long)]
    pub assets: Option<String>,

    #[arg(long, default_value = "assets")]
    pub assets_root: PathBuf,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Debug, Clone, Args)]
pub struct CompileArchiveArgs {
    /// Zip archive holding the project.
    #[arg(long, value_name = "PATH")]
    pub zip: PathBuf,

    /// Preferred entry-point filename inside the archive.
    #[arg(long)]
    pub entry: Option<String>,

    #[arg(long)]
    pub assets: Option<String>,

    #[arg(long, default_value = "assets")]
    pub assets_root: PathBuf,

    #[arg(long, value_name = "PATH")]
    pub out: PathBuf,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Debug, Clone, Serialize)]
struct CompileReport {
    schema_version: &'static str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact_sha256: Option<String>,
    timed_out: bool,
    log_truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    log: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ReportError>,
}

#[derive(Debug, Clone, Serialize)]
struct StatusReport {
    schema_version: &'static str,
    success: bool,
    message: String,
    log: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ReportError>,
}

fn resolve_assets_dir(
    assets: Option<&str>,
    assets_root: &PathBuf,
) -> Result<Option<PathBuf>, CompileError> {
    match assets {
        None => Ok(None),
        Some(id) => {
            let store = AssetStore::new(assets_root);
            let dir = store
                .collection_dir(id)
                .map_err(|err| CompileError::Input(err.to_string()))?;
            Ok(Some(dir))
        }
    }
}

pub fn cmd_compile(args: CompileArgs) -> Result<ExitCode> {
    let source = std::fs::read_to_string(&args.r#in)
        .with_context(|| format!("read source {}", args.r#in.display()))?;
    let pipeline = Pipeline::new(args.engine.config());

    let outcome = resolve_assets_dir(args.assets.as_deref(), &args.assets_root).and_then(
        |assets_dir| {
            pipeline.compile_source(&CompileRequest {
                source,
                filename: args.filename.clone(),
                assets_dir,
            })
        },
    );
    finish_compile(outcome, &args.out)
}

pub fn cmd_compile_archive(args: CompileArchiveArgs) -> Result<ExitCode> {
    let bytes = std::fs::read(&args.zip)
        .with_context(|| format!("read archive {}", args.zip.display()))?;
    let pipeline = Pipeline::new(args.engine.config());

    let outcome = resolve_assets_dir(args.assets.as_deref(), &args.assets_root).and_then(
        |assets_dir| {
            pipeline.compile_bundle(
                &BundleRequest::Zip(bytes),
                args.entry.as_deref(),
                assets_dir.as_deref(),
            )
        },
    );
    finish_compile(outcome, &args.out)
}

fn finish_compile(
    outcome: Result<CompileOutcome, CompileError>,
    out: &PathBuf,
) -> Result<ExitCode> {
    let report = match outcome {
        Ok(outcome) if outcome.success => {
            let pdf = outcome.pdf.as_deref().unwrap_or_default();
            std::fs::write(out, pdf)
                .with_context(|| format!("write artifact {}", out.display()))?;
            CompileReport {
                schema_version: TEXD_COMPILE_REPORT_SCHEMA_VERSION,
                ok: true,
                artifact: Some(outcome.artifact_name),
                artifact_path: Some(out.display().to_string()),
                artifact_bytes: Some(pdf.len()),
                artifact_sha256: Some(sha256_hex(pdf)),
                timed_out: false,
                log_truncated: outcome.log_truncated,
                log: None,
                error: None,
            }
        }
        Ok(outcome) => CompileReport {
            schema_version: TEXD_COMPILE_REPORT_SCHEMA_VERSION,
            ok: false,
            artifact: None,
            artifact_path: None,
            artifact_bytes: None,
            artifact_sha256: None,
            timed_out: outcome.timed_out,
            log_truncated: outcome.log_truncated,
            log: Some(outcome.log),
            error: Some(ReportError {
                kind: "compilation-failed",
                message: "compiler produced no artifact".to_string(),
            }),
        },
        Err(err) => {
            let (report_err, code) = classify(&err);
            let report = CompileReport {
                schema_version: TEXD_COMPILE_REPORT_SCHEMA_VERSION,
                ok: false,
                artifact: None,
                artifact_path: None,
                artifact_bytes: None,
                artifact_sha256: None,
                timed_out: false,
                log_truncated: false,
                log: None,
                error: Some(report_err),
            };
            print_report(&report)?;
            return Ok(ExitCode::from(code));
        }
    };

    print_report(&report)?;
    Ok(if report.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_COMPILE_FAILED)
    })
}

pub fn cmd_compile_status(args: CompileStatusArgs) -> Result<ExitCode> {
    let source = std::fs::read_to_string(&args.r#in)
        .with_context(|| format!("read source {}", args.r#in.display()))?;
    let pipeline = Pipeline::new(args.engine.config());

    let outcome = resolve_assets_dir(args.assets.as_deref(), &args.assets_root).and_then(
        |assets_dir| {
            pipeline.compile_source(&CompileRequest {
                source,
                filename: args.filename.clone(),
                assets_dir,
            })
        },
    );

    let report = match outcome {
        Ok(outcome) => StatusReport {
            schema_version: TEXD_STATUS_REPORT_SCHEMA_VERSION,
            success: outcome.success,
            message: if outcome.success {
                "compilation successful".to_string()
            } else if outcome.timed_out {
                "compilation timed out".to_string()
            } else {
                "compilation failed".to_string()
            },
            log: outcome.log,
            error: None,
        },
        Err(err) => {
            let (report_err, code) = classify(&err);
            let report = StatusReport {
                schema_version: TEXD_STATUS_REPORT_SCHEMA_VERSION,
                success: false,
                message: report_err.message.clone(),
                log: String::new(),
                error: Some(report_err),
            };
            print_report(&report)?;
            return Ok(ExitCode::from(code));
        }
    };

    print_report(&report)?;
    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_COMPILE_FAILED)
    })
}
