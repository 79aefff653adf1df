//! Local filesystem document store.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! └── {collection}/
//!     └── {documentId}.json
//! ```
//!
//! Writes go to a temporary file that is then renamed over the target, so a
//! crash mid-write never leaves a torn document behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::{DocumentId, DocumentStore, sort_history};

const EXTENSION: &str = "json";

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf> {
        if collection.is_empty() || collection.contains(['/', '\\']) || collection.starts_with('.') {
            return Err(AppError::persistence(format!("invalid collection name '{collection}'")));
        }
        Ok(self.root_dir.join(collection))
    }

    fn document_path(dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{id}.{EXTENSION}"))
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.ensure_dir(path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Collection directories currently on disk.
    async fn collections(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(AppError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }

    async fn locate(&self, id: &str) -> Result<Option<PathBuf>> {
        for dir in self.collections().await? {
            let path = Self::document_path(&dir, id);
            if tokio::fs::try_exists(&path).await? {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl DocumentStore for LocalStorage {
    async fn put(&self, collection: &str, id: &str, content: &str) -> Result<()> {
        let path = Self::document_path(&self.collection_dir(collection)?, id);
        self.write_bytes(&path, content.as_bytes())
            .await
            .map_err(|e| AppError::persistence(format!("writing {}: {e}", path.display())))?;
        log::debug!("Stored {collection}/{id} ({} bytes)", content.len());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<String>> {
        let Some(path) = self.locate(id).await? else {
            return Ok(None);
        };
        match self.read_bytes(&path).await? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes).map_err(|e| {
                AppError::persistence(format!("{} is not UTF-8: {e}", path.display()))
            })?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let Some(path) = self.locate(id).await? else {
            return Ok(false);
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn list(&self, collection: &str) -> Result<Vec<DocumentId>> {
        let dir = self.collection_dir(collection)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            match stem.parse::<DocumentId>() {
                Ok(id) => ids.push(id),
                Err(e) => log::debug!("Ignoring {}: {e}", entry.path().display()),
            }
        }
        sort_history(&mut ids);
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DocumentKind;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.put("master", "m_ftp-10", "{\"a\":1}").await.unwrap();
        let data = storage.get("m_ftp-10").await.unwrap();
        assert_eq!(data.as_deref(), Some("{\"a\":1}"));
        assert!(tmp.path().join("master/m_ftp-10.json").exists());
        assert!(!tmp.path().join("master/m_ftp-10.tmp").exists());
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path().join("never-created"));

        assert!(storage.get("nope-1").await.unwrap().is_none());
        assert!(storage.list("master").await.unwrap().is_empty());
        assert!(!storage.delete("nope-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_and_latest() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.put("mirror.org_ftp", "mirror.org_ftp-30-delta", "d").await.unwrap();
        storage.put("mirror.org_ftp", "mirror.org_ftp-10", "s1").await.unwrap();
        storage.put("mirror.org_ftp", "mirror.org_ftp-20", "s2").await.unwrap();
        tokio::fs::write(tmp.path().join("mirror.org_ftp/notes.txt"), "x").await.unwrap();

        let ids = storage.list("mirror.org_ftp").await.unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0].timestamp_ms, 10);
        assert_eq!(ids[2].kind, DocumentKind::Delta);
        assert_eq!(storage.document_count("mirror.org_ftp").await.unwrap(), 3);

        let (id, content) = storage.latest_full_snapshot("mirror.org_ftp").await.unwrap().unwrap();
        assert_eq!(id.timestamp_ms, 20);
        assert_eq!(content, "s2");

        let (id, _) = storage
            .latest_for_mirror("mirror.org_ftp", "mirror.org_ftp")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id.kind, DocumentKind::Delta);
    }

    #[tokio::test]
    async fn test_put_replaces_and_delete_removes() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.put("latest-diffs", "m_http-1-diff", "old").await.unwrap();
        storage.put("latest-diffs", "m_http-1-diff", "new").await.unwrap();
        assert_eq!(storage.get("m_http-1-diff").await.unwrap().as_deref(), Some("new"));

        assert!(storage.delete("m_http-1-diff").await.unwrap());
        assert!(storage.get("m_http-1-diff").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_like_collections() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        assert!(storage.put("../escape", "m-1", "x").await.is_err());
        assert!(storage.put("", "m-1", "x").await.is_err());
    }
}
