use serde::Serialize;

use texd_engine::CompileError;

// Exit codes: distinct statuses so callers can tell "fix the input" from
// "back off" from "this deployment is broken".
pub const EXIT_INPUT: u8 = 2;
pub const EXIT_COMPILE_FAILED: u8 = 10;
pub const EXIT_CAPACITY: u8 = 11;
pub const EXIT_COMPILER_MISSING: u8 = 12;
pub const EXIT_QUOTA: u8 = 13;
pub const EXIT_NOT_FOUND: u8 = 14;
pub const EXIT_INTERNAL: u8 = 20;

#[derive(Debug, Clone, Serialize)]
pub struct ReportError {
    pub kind: &'static str,
    pub message: String,
}

/// Maps the pipeline error taxonomy to a report error and exit code.
pub fn classify(err: &CompileError) -> (ReportError, u8) {
    let (kind, code) = match err {
        CompileError::Input(_) => ("input", EXIT_INPUT),
        CompileError::BadArchive(_) => ("input", EXIT_INPUT),
        CompileError::NoEntryPoint => ("no-entry-point", EXIT_INPUT),
        CompileError::Capacity { .. } => ("capacity", EXIT_CAPACITY),
        CompileError::CompilerMissing(_) => ("compiler-missing", EXIT_COMPILER_MISSING),
        CompileError::Resource(_) => ("resource", EXIT_INTERNAL),
    };
    (
        ReportError {
            kind,
            message: err.to_string(),
        },
        code,
    )
}

pub fn print_report<T: Serialize>(report: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(report)?);
    Ok(())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest as _, Sha256};
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
