use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use texd_contracts::{TEXD_DOCTOR_REPORT_SCHEMA_VERSION, TEXD_SWEEP_REPORT_SCHEMA_VERSION};
use texd_engine::{sweep_stale_workspaces, EngineConfig, SWEEP_MAX_AGE_MS, WORKSPACE_PREFIX};

use crate::report::{print_report, EXIT_COMPILER_MISSING};

#[derive(Debug, Clone, Args)]
pub struct SweepArgs {
    /// Shared root holding ephemeral workspaces.
    #[arg(long)]
    pub tmp_root: Option<PathBuf>,

    /// Age threshold; younger workspaces are left alone.
    #[arg(long, default_value_t = SWEEP_MAX_AGE_MS)]
    pub max_age_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
struct SweepCliReport {
    schema_version: &'static str,
    ok: bool,
    tmp_root: String,
    max_age_ms: u64,
    scanned: usize,
    removed: usize,
}

pub fn cmd_sweep(args: SweepArgs) -> Result<ExitCode> {
    let tmp_root = args.tmp_root.unwrap_or_else(std::env::temp_dir);
    let report = sweep_stale_workspaces(
        &tmp_root,
        WORKSPACE_PREFIX,
        Duration::from_millis(args.max_age_ms),
    )?;
    print_report(&SweepCliReport {
        schema_version: TEXD_SWEEP_REPORT_SCHEMA_VERSION,
        ok: true,
        tmp_root: tmp_root.display().to_string(),
        max_age_ms: args.max_age_ms,
        scanned: report.scanned,
        removed: report.removed,
    })?;
    Ok(ExitCode::SUCCESS)
}

#[derive(Debug, Clone, Args)]
pub struct DoctorArgs {
    #[arg(long, default_value = "pdflatex")]
    pub tex_bin: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
struct DoctorReport {
    schema_version: &'static str,
    ok: bool,
    tex_bin: String,
    available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

pub fn cmd_doctor(args: DoctorArgs) -> Result<ExitCode> {
    let cfg = EngineConfig {
        tex_bin: args.tex_bin.clone(),
        ..EngineConfig::default()
    };
    let available = texd_engine::doctor::tex_available(&cfg);
    let version = texd_engine::doctor::tex_version(&cfg);
    print_report(&DoctorReport {
        schema_version: TEXD_DOCTOR_REPORT_SCHEMA_VERSION,
        ok: available,
        tex_bin: args.tex_bin.display().to_string(),
        available,
        version,
    })?;
    Ok(if available {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_COMPILER_MISSING)
    })
}
