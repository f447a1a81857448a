use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

/// An ephemeral, exclusively-owned directory holding one request's staged
/// input and compiler output.
///
/// Dropping a `Workspace` removes the directory tree. Removal is best-effort:
/// a failure is reported on stderr but never propagated, so cleanup can never
/// block or fail the request that owns it. The administrative sweep picks up
/// anything left behind.
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Allocates a fresh directory under `root` named `{prefix}_{pid}_{nanos}_{n}`.
    pub fn create(root: &Path, prefix: &str) -> Result<Self> {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let pid = std::process::id();

        std::fs::create_dir_all(root)
            .with_context(|| format!("create workspace root: {}", root.display()))?;

        for _ in 0..10_000 {
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            let path = root.join(format!("{prefix}_{pid}_{nanos}_{n}"));
            match std::fs::create_dir(&path) {
                Ok(()) => return Ok(Self { path }),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("create workspace: {}", path.display()))
                }
            }
        }
        anyhow::bail!("failed to create unique workspace under {}", root.display())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copies named byte blobs into the workspace, creating intermediate
    /// directories as needed. Entries whose names are absolute or contain
    /// `..` (anything but plain components) are skipped, not errors; the
    /// count of skipped entries is returned so callers can report it.
    pub fn stage(&self, files: &[(PathBuf, Vec<u8>)]) -> Result<usize> {
        let mut skipped = 0usize;
        for (rel, bytes) in files {
            if ensure_safe_rel_path(rel).is_err() {
                skipped += 1;
                continue;
            }
            let dst = self.path.join(rel);
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create dir: {}", parent.display()))?;
            }
            std::fs::write(&dst, bytes)
                .with_context(|| format!("stage file: {}", dst.display()))?;
        }
        Ok(skipped)
    }

    /// Copies the contents of `src_dir` (an asset collection) into the
    /// workspace root.
    pub fn stage_dir(&self, src_dir: &Path) -> Result<()> {
        copy_dir_contents(src_dir, &self.path)
            .with_context(|| format!("stage asset dir: {}", src_dir.display()))
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                eprintln!("texd: failed to remove workspace {}: {err}", self.path.display());
            }
        }
    }
}

/// Rejects empty, absolute, and `..`-bearing relative paths. Only plain
/// name components are allowed, so a joined path can never escape its root.
pub fn ensure_safe_rel_path(rel: &Path) -> Result<()> {
    if rel.as_os_str().is_empty() {
        anyhow::bail!("expected non-empty relative path");
    }
    if rel.is_absolute() {
        anyhow::bail!("expected safe relative path, got {}", rel.display());
    }
    for c in rel.components() {
        match c {
            std::path::Component::Normal(_) => {}
            _ => anyhow::bail!("expected safe relative path, got {}", rel.display()),
        }
    }
    Ok(())
}

pub fn copy_dir_contents(src_dir: &Path, dst_dir: &Path) -> Result<()> {
    for entry in
        std::fs::read_dir(src_dir).with_context(|| format!("read_dir: {}", src_dir.display()))?
    {
        let entry = entry.context("read_dir entry")?;
        let file_type = entry.file_type().context("file_type")?;
        let src_path = entry.path();
        let dst_path = dst_dir.join(entry.file_name());
        copy_tree(&src_path, &dst_path, &file_type)?;
    }
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path, src_type: &std::fs::FileType) -> Result<()> {
    if src_type.is_dir() {
        std::fs::create_dir(dst).with_context(|| format!("create_dir: {}", dst.display()))?;
        for entry in
            std::fs::read_dir(src).with_context(|| format!("read_dir: {}", src.display()))?
        {
            let entry = entry.context("read_dir entry")?;
            let file_type = entry.file_type().context("file_type")?;
            let child_src = entry.path();
            let child_dst = dst.join(entry.file_name());
            copy_tree(&child_src, &child_dst, &file_type)?;
        }
        return Ok(());
    }
    if src_type.is_file() {
        std::fs::copy(src, dst)
            .with_context(|| format!("copy file from {} to {}", src.display(), dst.display()))?;
        return Ok(());
    }
    anyhow::bail!("unsupported asset entry type: {}", src.display());
}
