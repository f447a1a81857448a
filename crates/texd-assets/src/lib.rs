//! Durable per-document asset collections.
//!
//! One directory per collection under a configured root, raw files named by
//! their original filename, no metadata sidecars: size and content type are
//! derived on read, and the filesystem is the only synchronization point.
//! Collection ids and filenames are attacker-controlled, so both are
//! restricted to single safe path components before any filesystem access.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// Fixed maximum total byte size permitted within one collection.
pub const ASSET_QUOTA_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug)]
pub enum AssetError {
    /// Upload would push the collection past its quota; the store is
    /// unchanged when this is returned.
    QuotaExceeded {
        current_bytes: u64,
        incoming_bytes: u64,
        quota_bytes: u64,
    },
    NotFound {
        collection: String,
        filename: String,
    },
    /// Collection id or filename failed sanitization.
    InvalidName(String),
    Io(std::io::Error),
}

impl std::fmt::Display for AssetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetError::QuotaExceeded {
                current_bytes,
                incoming_bytes,
                quota_bytes,
            } => write!(
                f,
                "quota exceeded: {current_bytes} + {incoming_bytes} > {quota_bytes} bytes"
            ),
            AssetError::NotFound {
                collection,
                filename,
            } => write!(f, "asset not found: {collection}/{filename}"),
            AssetError::InvalidName(name) => write!(f, "invalid asset name: {name:?}"),
            AssetError::Io(err) => write!(f, "asset store i/o failure: {err}"),
        }
    }
}

impl std::error::Error for AssetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AssetError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AssetError {
    fn from(err: std::io::Error) -> Self {
        AssetError::Io(err)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetEntry {
    pub filename: String,
    pub size: u64,
}

pub struct AssetStore {
    root: PathBuf,
    quota_bytes: u64,
}

impl AssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            quota_bytes: ASSET_QUOTA_BYTES,
        }
    }

    /// Same store with a different quota. Tests sandbox through this; the
    /// production quota is [`ASSET_QUOTA_BYTES`].
    pub fn with_quota(root: impl Into<PathBuf>, quota_bytes: u64) -> Self {
        Self {
            root: root.into(),
            quota_bytes,
        }
    }

    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    /// Directory holding `collection`'s files. The pipeline stages this
    /// directory into a workspace; it may not exist yet for a fresh id.
    pub fn collection_dir(&self, collection: &str) -> Result<PathBuf, AssetError> {
        safe_component(collection)?;
        Ok(self.root.join(collection))
    }

    /// Entries sorted by filename for deterministic output.
    pub fn list(&self, collection: &str) -> Result<Vec<AssetEntry>, AssetError> {
        let dir = self.collection_dir(collection)?;
        let entries = match std::fs::read_dir(&dir) {
            Ok(v) => v,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let size = entry.metadata()?.len();
            out.push(AssetEntry { filename, size });
        }
        out.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(out)
    }

    /// Writes `bytes` as `filename`, overwriting any same-named entry. The
    /// quota baseline excludes the overwritten file's old size, so replacing
    /// a large file with a smaller one can never be a false positive.
    pub fn upload(
        &self,
        collection: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<AssetEntry, AssetError> {
        safe_component(filename)?;
        let dir = self.collection_dir(collection)?;

        let existing_size = match std::fs::metadata(dir.join(filename)) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => 0,
        };
        let current: u64 = self
            .list(collection)?
            .iter()
            .map(|e| e.size)
            .sum::<u64>()
            .saturating_sub(existing_size);
        let incoming = bytes.len() as u64;
        if current.saturating_add(incoming) > self.quota_bytes {
            return Err(AssetError::QuotaExceeded {
                current_bytes: current,
                incoming_bytes: incoming,
                quota_bytes: self.quota_bytes,
            });
        }

        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(filename), bytes)?;
        Ok(AssetEntry {
            filename: filename.to_string(),
            size: incoming,
        })
    }

    pub fn delete(&self, collection: &str, filename: &str) -> Result<(), AssetError> {
        safe_component(filename)?;
        let path = self.collection_dir(collection)?.join(filename);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(AssetError::NotFound {
                    collection: collection.to_string(),
                    filename: filename.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Raw bytes plus the content type inferred from the extension.
    pub fn read(
        &self,
        collection: &str,
        filename: &str,
    ) -> Result<(Vec<u8>, &'static str), AssetError> {
        safe_component(filename)?;
        let path = self.collection_dir(collection)?.join(filename);
        match std::fs::read(&path) {
            Ok(bytes) => Ok((bytes, content_type_for(filename))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(AssetError::NotFound {
                    collection: collection.to_string(),
                    filename: filename.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Content type from the file extension; unknown extensions are opaque bytes.
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("pdf") => "application/pdf",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// A collection id or filename must be exactly one plain path component:
/// non-empty, no separators, no `.`/`..`, no leading dot, no NUL.
fn safe_component(name: &str) -> Result<(), AssetError> {
    let invalid = || AssetError::InvalidName(name.to_string());
    if name.is_empty() || name.starts_with('.') {
        return Err(invalid());
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(invalid());
    }
    let as_path = Path::new(name);
    let mut components = as_path.components();
    match (components.next(), components.next()) {
        (Some(std::path::Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store(tag: &str, quota: u64) -> (AssetStore, PathBuf) {
        let base = std::env::temp_dir();
        let pid = std::process::id();
        for n in 0..10_000u32 {
            let p = base.join(format!("texd-assets-test-{tag}-{pid}-{n}"));
            if std::fs::create_dir(&p).is_ok() {
                return (AssetStore::with_quota(&p, quota), p);
            }
        }
        panic!("failed to create temp root");
    }

    #[test]
    fn upload_list_read_delete_roundtrip() {
        let (store, root) = make_store("crud", 1024);
        store.upload("doc1", "fig.png", b"pngbytes").unwrap();
        store.upload("doc1", "a.pdf", b"pdfbytes!").unwrap();

        let entries = store.list("doc1").unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "fig.png"]);
        assert_eq!(entries[1].size, 8);

        let (bytes, ct) = store.read("doc1", "fig.png").unwrap();
        assert_eq!(bytes, b"pngbytes");
        assert_eq!(ct, "image/png");

        store.delete("doc1", "fig.png").unwrap();
        assert!(matches!(
            store.read("doc1", "fig.png"),
            Err(AssetError::NotFound { .. })
        ));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn quota_rejection_leaves_store_unchanged() {
        let (store, root) = make_store("quota", 50);
        store.upload("doc", "a.bin", &[0u8; 20]).unwrap();
        store.upload("doc", "b.bin", &[0u8; 20]).unwrap();

        match store.upload("doc", "c.bin", &[0u8; 20]) {
            Err(AssetError::QuotaExceeded {
                current_bytes,
                incoming_bytes,
                quota_bytes,
            }) => {
                assert_eq!(current_bytes, 40);
                assert_eq!(incoming_bytes, 20);
                assert_eq!(quota_bytes, 50);
            }
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
        assert_eq!(store.list("doc").unwrap().len(), 2);

        // Freeing one entry makes room for the retried upload.
        store.delete("doc", "a.bin").unwrap();
        store.upload("doc", "c.bin", &[0u8; 20]).unwrap();
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn overwrite_excludes_old_size_from_baseline() {
        let (store, root) = make_store("overwrite", 50);
        store.upload("doc", "a.bin", &[0u8; 40]).unwrap();
        // Replacing 40 bytes with 45 fits: the baseline is 0, not 40.
        store.upload("doc", "a.bin", &[0u8; 45]).unwrap();
        let entries = store.list("doc").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].size, 45);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn quota_is_per_collection() {
        let (store, root) = make_store("percoll", 30);
        store.upload("one", "a.bin", &[0u8; 25]).unwrap();
        store.upload("two", "a.bin", &[0u8; 25]).unwrap();
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn traversal_names_are_rejected_everywhere() {
        let (store, root) = make_store("traversal", 1024);
        for bad in ["../../etc/passwd", "/etc/passwd", "..", ".", "", ".hidden", "a/b"] {
            assert!(matches!(
                store.upload("doc", bad, b"x"),
                Err(AssetError::InvalidName(_))
            ));
            assert!(matches!(
                store.upload(bad, "f.png", b"x"),
                Err(AssetError::InvalidName(_))
            ));
            assert!(matches!(
                store.read("doc", bad),
                Err(AssetError::InvalidName(_))
            ));
            assert!(matches!(
                store.delete("doc", bad),
                Err(AssetError::InvalidName(_))
            ));
        }
        // Nothing escaped the root.
        assert!(!root.join("../etc").exists());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn listing_unknown_collection_is_empty() {
        let (store, root) = make_store("empty", 1024);
        assert!(store.list("nope").unwrap().is_empty());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn delete_missing_is_not_found() {
        let (store, root) = make_store("delmiss", 1024);
        assert!(matches!(
            store.delete("doc", "ghost.png"),
            Err(AssetError::NotFound { .. })
        ));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("a.JPG"), "image/jpeg");
        assert_eq!(content_type_for("a.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("a.pdf"), "application/pdf");
        assert_eq!(content_type_for("a.svg"), "image/svg+xml");
        assert_eq!(content_type_for("a.bin"), "application/octet-stream");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }

    #[test]
    fn default_quota_matches_contract() {
        assert_eq!(ASSET_QUOTA_BYTES, 50 * 1024 * 1024);
        let store = AssetStore::new("/tmp/unused");
        assert_eq!(store.quota_bytes(), ASSET_QUOTA_BYTES);
    }
}
