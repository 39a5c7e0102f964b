//! Blob storage for uploaded log content
//!
//! Blobs are addressed by a relative storage key such as `logs/<id>.log`.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Storage for raw uploaded bytes.
pub trait BlobStore: Send + Sync {
    /// Store `content` under `key`, replacing any previous blob.
    fn put(&self, key: &str, content: &[u8]) -> Result<()>;

    /// Read the whole blob.
    fn fetch(&self, key: &str) -> Result<Vec<u8>>;

    /// Remove the blob. Missing blobs are not an error.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Storage key for a subject's uploaded log.
pub fn storage_key_for(subject_id: &str) -> String {
    format!("logs/{}.log", subject_id)
}

/// Temp file for an in-progress write of `path`; keeps the full file name so
/// keys differing only in extension never share one.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

/// Blob store backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path under the root, refusing anything that could
    /// escape it.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !well_formed {
            return Err(Error::InvalidStorageKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for LocalBlobStore {
    fn put(&self, key: &str, content: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write to a sibling temp file first so readers never see a partial blob
        let tmp = partial_path(&path);
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;

        tracing::debug!(key, bytes = content.len(), "Stored blob");
        Ok(())
    }

    fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::BlobNotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(key, "Deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalBlobStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::open(dir.path().join("blobs")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_fetch_delete() {
        let (_dir, store) = store();
        let key = storage_key_for("abc");

        store.put(&key, b"line one\nline two\n").unwrap();
        assert_eq!(store.fetch(&key).unwrap(), b"line one\nline two\n");
        assert!(store.root().join("logs/abc.log").exists());

        store.put(&key, b"replaced").unwrap();
        assert_eq!(store.fetch(&key).unwrap(), b"replaced");

        store.delete(&key).unwrap();
        assert!(matches!(store.fetch(&key), Err(Error::BlobNotFound(_))));
        // Deleting twice is fine
        store.delete(&key).unwrap();
    }

    #[test]
    fn test_keys_differing_in_extension_do_not_share_temp_file() {
        let (_dir, store) = store();
        let log = store.resolve("logs/a.log").unwrap();
        let txt = store.resolve("logs/a.txt").unwrap();
        assert_ne!(partial_path(&log), partial_path(&txt));
        assert!(partial_path(&log).ends_with("logs/a.log.partial"));

        store.put("logs/a.log", b"log").unwrap();
        store.put("logs/a.txt", b"txt").unwrap();
        assert_eq!(store.fetch("logs/a.log").unwrap(), b"log");
        assert_eq!(store.fetch("logs/a.txt").unwrap(), b"txt");
        assert!(!partial_path(&log).exists());
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let (_dir, store) = store();
        for key in ["", "../outside.log", "/etc/passwd", "logs/../../x", "./logs/a.log"] {
            assert!(
                matches!(store.put(key, b"x"), Err(Error::InvalidStorageKey(_))),
                "key {:?} should be rejected",
                key
            );
        }
    }
}
