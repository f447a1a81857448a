use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use texd_assets::{AssetError, AssetStore};
use texd_contracts::TEXD_ASSETS_REPORT_SCHEMA_VERSION;

use crate::report::{print_report, ReportError, EXIT_INPUT, EXIT_NOT_FOUND, EXIT_QUOTA};

#[derive(Debug, Clone, Args)]
pub struct AssetsArgs {
    /// Asset store root; one subdirectory per collection.
    #[arg(long, default_value = "assets")]
    pub root: PathBuf,

    #[command(subcommand)]
    pub cmd: AssetsCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum AssetsCommand {
    /// List a collection's entries, sorted by filename.
    List {
        #[arg(long)]
        collection: String,
    },
    /// Upload (or overwrite) one file into a collection.
    Upload {
        #[arg(long)]
        collection: String,
        /// Stored filename; defaults to the input file's name.
        #[arg(long)]
        filename: Option<String>,
        #[arg(long, value_name = "PATH")]
        r#in: PathBuf,
    },
    /// Delete one file from a collection.
    Delete {
        #[arg(long)]
        collection: String,
        #[arg(long)]
        filename: String,
    },
    /// Write one file's raw bytes to --out.
    Cat {
        #[arg(long)]
        collection: String,
        #[arg(long)]
        filename: String,
        #[arg(long, value_name = "PATH")]
        out: PathBuf,
    },
}

#[derive(Debug, Clone, Serialize)]
struct AssetEntryReport {
    filename: String,
    size: u64,
    url: String,
}

#[derive(Debug, Clone, Serialize)]
struct AssetsReport {
    schema_version: &'static str,
    ok: bool,
    command: &'static str,
    collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    entries: Option<Vec<AssetEntryReport>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entry: Option<AssetEntryReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ReportError>,
}

impl AssetsReport {
    fn bare(command: &'static str, collection: &str) -> Self {
        Self {
            schema_version: TEXD_ASSETS_REPORT_SCHEMA_VERSION,
            ok: true,
            command,
            collection: collection.to_string(),
            entries: None,
            entry: None,
            content_type: None,
            error: None,
        }
    }
}

fn entry_url(collection: &str, filename: &str) -> String {
    format!("assets/{collection}/{filename}")
}

fn classify_asset(err: &AssetError) -> (ReportError, u8) {
    let (kind, code) = match err {
        AssetError::QuotaExceeded { .. } => ("quota-exceeded", EXIT_QUOTA),
        AssetError::NotFound { .. } => ("not-found", EXIT_NOT_FOUND),
        AssetError::InvalidName(_) => ("input", EXIT_INPUT),
        AssetError::Io(_) => ("resource", crate::report::EXIT_INTERNAL),
    };
    (
        ReportError {
            kind,
            message: err.to_string(),
        },
        code,
    )
}

pub fn cmd_assets(args: AssetsArgs) -> Result<ExitCode> {
    let store = AssetStore::new(&args.root);
    match args.cmd {
        AssetsCommand::List { collection } => {
            let mut report = AssetsReport::bare("assets.list", &collection);
            match store.list(&collection) {
                Ok(entries) => {
                    report.entries = Some(
                        entries
                            .into_iter()
                            .map(|e| AssetEntryReport {
                                url: entry_url(&collection, &e.filename),
                                filename: e.filename,
                                size: e.size,
                            })
                            .collect(),
                    );
                    print_report(&report)?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => fail(report, &err),
            }
        }
        AssetsCommand::Upload {
            collection,
            filename,
            r#in,
        } => {
            let bytes = std::fs::read(&r#in)
                .with_context(|| format!("read input {}", r#in.display()))?;
            let filename = match filename {
                Some(name) => name,
                None => r#in
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .context("input path has no usable filename; pass --filename")?,
            };
            let mut report = AssetsReport::bare("assets.upload", &collection);
            match store.upload(&collection, &filename, &bytes) {
                Ok(entry) => {
                    report.entry = Some(AssetEntryReport {
                        url: entry_url(&collection, &entry.filename),
                        filename: entry.filename,
                        size: entry.size,
                    });
                    print_report(&report)?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => fail(report, &err),
            }
        }
        AssetsCommand::Delete {
            collection,
            filename,
        } => {
            let report = AssetsReport::bare("assets.delete", &collection);
            match store.delete(&collection, &filename) {
                Ok(()) => {
                    print_report(&report)?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => fail(report, &err),
            }
        }
        AssetsCommand::Cat {
            collection,
            filename,
            out,
        } => {
            let mut report = AssetsReport::bare("assets.cat", &collection);
            match store.read(&collection, &filename) {
                Ok((bytes, content_type)) => {
                    std::fs::write(&out, &bytes)
                        .with_context(|| format!("write {}", out.display()))?;
                    report.content_type = Some(content_type);
                    report.entry = Some(AssetEntryReport {
                        url: entry_url(&collection, &filename),
                        filename,
                        size: bytes.len() as u64,
                    });
                    print_report(&report)?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => fail(report, &err),
            }
        }
    }
}

fn fail(mut report: AssetsReport, err: &AssetError) -> Result<ExitCode> {
    let (report_err, code) = classify_asset(err);
    report.ok = false;
    report.error = Some(report_err);
    print_report(&report)?;
    Ok(ExitCode::from(code))
}
