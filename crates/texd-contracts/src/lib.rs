//! Shared, version-pinned report identifiers.
//!
//! These constants are the single source of truth for the `schema_version`
//! strings that appear in machine-readable CLI output. Bump the trailing
//! version whenever a report's field set changes shape.

pub const TEXD_COMPILE_REPORT_SCHEMA_VERSION: &str = "texd.compile.report@0.1.0";
pub const TEXD_STATUS_REPORT_SCHEMA_VERSION: &str = "texd.status.report@0.1.0";
pub const TEXD_ASSETS_REPORT_SCHEMA_VERSION: &str = "texd.assets.report@0.1.0";
pub const TEXD_SWEEP_REPORT_SCHEMA_VERSION: &str = "texd.sweep.report@0.1.0";
pub const TEXD_DOCTOR_REPORT_SCHEMA_VERSION: &str = "texd.doctor.report@0.1.0";
