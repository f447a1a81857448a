use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod assets_cmd;
mod compile_cmd;
mod maintenance_cmd;
mod report;

#[derive(Parser)]
#[command(name = "texd")]
#[command(about = "LaTeX compilation pipeline and asset toolkit.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile source text to PDF; writes the artifact and prints a report.
    Compile(compile_cmd::CompileArgs),
    /// Compile and report status plus the captured log, never the artifact.
    CompileStatus(compile_cmd::CompileStatusArgs),
    /// Compile a zip bundle; the entry point is resolved by policy.
    CompileArchive(compile_cmd::CompileArchiveArgs),
    /// Manage per-document asset collections.
    Assets(assets_cmd::AssetsArgs),
    /// Remove stale workspaces left under the temp root.
    Sweep(maintenance_cmd::SweepArgs),
    /// Probe the compiler toolchain.
    Doctor(maintenance_cmd::DoctorArgs),
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("texd: {err:#}");
            ExitCode::from(report::EXIT_INTERNAL)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Compile(args) => compile_cmd::cmd_compile(args),
        Command::CompileStatus(args) => compile_cmd::cmd_compile_status(args),
        Command::CompileArchive(args) => compile_cmd::cmd_compile_archive(args),
        Command::Assets(args) => assets_cmd::cmd_assets(args),
        Command::Sweep(args) => maintenance_cmd::cmd_sweep(args),
        Command::Doctor(args) => maintenance_cmd::cmd_doctor(args),
    }
}
