use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::Context;
use walkdir::WalkDir;

use crate::workspace::{ensure_safe_rel_path, Workspace};
use crate::{CompileError, SOURCE_EXT};

/// macOS zip tooling ships this metadata directory; never a real source tree.
const MACOS_METADATA_DIR: &str = "__MACOSX";

/// Conventional default entry-point base name (`main.tex`).
const DEFAULT_ENTRY_STEM: &str = "main";

/// A multi-file submission: either a zip blob or an already-split file set.
pub enum BundleRequest {
    Zip(Vec<u8>),
    Files(Vec<(PathBuf, Vec<u8>)>),
}

/// Extracts the bundle into the workspace. Zip entries and flat-set names go
/// through the same relative-path sanitization as any staged file; unsafe
/// zip entry names fail the extraction (an archive is a single unit of
/// input), while unsafe flat-set entries are skipped like any staged blob.
pub fn extract_bundle(ws: &Workspace, bundle: &BundleRequest) -> Result<(), CompileError> {
    match bundle {
        BundleRequest::Zip(bytes) => extract_zip(ws.path(), bytes),
        BundleRequest::Files(files) => {
            if files.is_empty() {
                return Err(CompileError::Input("empty file set".to_string()));
            }
            ws.stage(files).map(|_| ()).map_err(CompileError::Resource)
        }
    }
}

fn extract_zip(dest: &Path, bytes: &[u8]) -> Result<(), CompileError> {
    let mut z = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| CompileError::BadArchive(format!("open zip: {err}")))?;

    for i in 0..z.len() {
        let mut file = z
            .by_index(i)
            .map_err(|err| CompileError::BadArchive(format!("zip entry {i}: {err}")))?;
        let name = file.name().to_string();
        let rel = Path::new(&name).to_path_buf();
        if ensure_safe_rel_path(&rel).is_err() {
            return Err(CompileError::BadArchive(format!(
                "unsafe zip entry name: {name}"
            )));
        }
        let out_path = dest.join(&rel);
        if file.is_dir() {
            std::fs::create_dir_all(&out_path)
                .with_context(|| format!("create {}", out_path.display()))
                .map_err(CompileError::Resource)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))
                .map_err(CompileError::Resource)?;
        }
        let mut out = std::fs::File::create(&out_path)
            .with_context(|| format!("create {}", out_path.display()))
            .map_err(CompileError::Resource)?;
        std::io::copy(&mut file, &mut out)
            .with_context(|| format!("write {}", out_path.display()))
            .map_err(CompileError::Resource)?;
    }
    Ok(())
}

/// Locates the single entry-point source file under `root`.
///
/// Policy, in order: a caller-supplied preferred name that exists wins; then
/// a recursive scan for `.tex` files (hidden names and `__MACOSX` skipped),
/// preferring a `main.tex`; then the first candidate in sorted path order,
/// so resolution does not depend on filesystem enumeration order. Returns
/// the path relative to `root`.
pub fn resolve_entry_point(
    root: &Path,
    preferred: Option<&str>,
) -> Result<PathBuf, CompileError> {
    if let Some(name) = preferred {
        let rel = PathBuf::from(name);
        if ensure_safe_rel_path(&rel).is_ok() && root.join(&rel).is_file() {
            return Ok(rel);
        }
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    let walker = WalkDir::new(root).into_iter().filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        if e.depth() == 0 {
            return true;
        }
        name != MACOS_METADATA_DIR && !name.starts_with('.')
    });
    for entry in walker {
        let entry = match entry {
            Ok(v) => v,
            Err(_) => continue,
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|e| e.to_str()) != Some(SOURCE_EXT) {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            candidates.push(rel.to_path_buf());
        }
    }

    if candidates.is_empty() {
        return Err(CompileError::NoEntryPoint);
    }
    candidates.sort();

    if let Some(main) = candidates
        .iter()
        .find(|p| p.file_stem().and_then(|s| s.to_str()) == Some(DEFAULT_ENTRY_STEM))
    {
        return Ok(main.clone());
    }
    Ok(candidates[0].clone())
}
