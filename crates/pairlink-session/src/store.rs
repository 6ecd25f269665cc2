//! Session credential storage.
//!
//! Exactly one credential is persisted at a time. Writes replace the whole
//! record atomically (temp file + rename) so a process starting
//! concurrently never reads a torn record.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use pairlink_core::SessionCredential;

/// Current version of the on-disk envelope.
pub const RECORD_VERSION: u32 = 1;

/// Errors that can occur during session storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt session record at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for pairlink_core::Error {
    fn from(e: StoreError) -> Self {
        pairlink_core::Error::Session(e.to_string())
    }
}

/// Persistence for the single session credential.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Replace the persisted credential.
    async fn save(&self, credential: &SessionCredential) -> Result<()>;

    /// Read the persisted credential; `Ok(None)` when there is none.
    ///
    /// An unreadable record is reported as [`StoreError::Corrupt`]; callers
    /// treat it as absent.
    async fn load(&self) -> Result<Option<SessionCredential>>;

    /// Remove the persisted credential. Succeeds when there is none.
    async fn delete(&self) -> Result<()>;
}

/// On-disk envelope around the opaque credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    /// Envelope version
    pub version: u32,
    /// When the record was written
    pub saved_at: DateTime<Utc>,
    /// Base64 credential bytes
    pub credential: String,
}

impl PersistedSession {
    fn new(credential: &SessionCredential) -> Self {
        Self {
            version: RECORD_VERSION,
            saved_at: Utc::now(),
            credential: credential.to_base64(),
        }
    }

    /// Decode the credential carried by the envelope.
    pub fn credential(&self) -> std::result::Result<SessionCredential, String> {
        SessionCredential::from_base64(&self.credential).map_err(|e| e.to_string())
    }
}

/// File-backed session store.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the envelope without decoding the credential.
    pub fn inspect(&self) -> Result<Option<PersistedSession>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: PersistedSession =
            serde_json::from_str(&content).map_err(|e| self.corrupt(e.to_string()))?;

        if record.version != RECORD_VERSION {
            return Err(self.corrupt(format!("unsupported version {}", record.version)));
        }

        Ok(Some(record))
    }

    fn corrupt(&self, reason: impl Into<String>) -> StoreError {
        StoreError::Corrupt {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, credential: &SessionCredential) -> Result<()> {
        let record = PersistedSession::new(credential);
        let json = serde_json::to_vec_pretty(&record)?;
        write_atomic(&self.path, &json)?;
        debug!(path = %self.path.display(), bytes = credential.len(), "Session record written");
        Ok(())
    }

    async fn load(&self) -> Result<Option<SessionCredential>> {
        match self.inspect()? {
            Some(record) => record.credential().map(Some).map_err(|e| self.corrupt(e)),
            None => Ok(None),
        }
    }

    async fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Session record removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Replace `path` with `bytes` without ever exposing a partial file.
///
/// The data goes to a hidden sibling first, is flushed to disk, and is then
/// renamed over the target.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    let result = (|| {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (FileSessionStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(temp_dir.path().join("session.json"));
        (store, temp_dir)
    }

    fn cred(s: &str) -> SessionCredential {
        SessionCredential::new(s.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_load_absent() {
        let (store, _tmp) = create_test_store();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_from_fresh_store() {
        let (store, tmp) = create_test_store();
        store.save(&cred("C1")).await.unwrap();

        // A new store on the same path stands in for a restarted process.
        let reopened = FileSessionStore::new(tmp.path().join("session.json"));
        assert_eq!(reopened.load().await.unwrap(), Some(cred("C1")));
    }

    #[tokio::test]
    async fn test_save_replaces_previous_record() {
        let (store, _tmp) = create_test_store();
        store.save(&cred("C1")).await.unwrap();
        store.save(&cred("C2")).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(cred("C2")));
    }

    #[tokio::test]
    async fn test_save_twice_is_idempotent() {
        let (store, _tmp) = create_test_store();
        store.save(&cred("C1")).await.unwrap();
        let first = store.load().await.unwrap();
        store.save(&cred("C1")).await.unwrap();
        assert_eq!(store.load().await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (store, _tmp) = create_test_store();
        store.save(&cred("C1")).await.unwrap();
        store.delete().await.unwrap();
        store.delete().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_reported() {
        let (store, _tmp) = create_test_store();
        fs::write(store.path(), b"{ not json").unwrap();
        assert!(matches!(store.load().await, Err(StoreError::Corrupt { .. })));

        fs::write(
            store.path(),
            br#"{"version": 1, "saved_at": "2024-01-01T00:00:00Z", "credential": "%%%"}"#,
        )
        .unwrap();
        assert!(matches!(store.load().await, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_unknown_version_is_corrupt() {
        let (store, _tmp) = create_test_store();
        fs::write(
            store.path(),
            br#"{"version": 9, "saved_at": "2024-01-01T00:00:00Z", "credential": "QzE="}"#,
        )
        .unwrap();
        let err = store.load().await.unwrap_err();
        assert!(err.to_string().contains("unsupported version 9"));
    }

    #[tokio::test]
    async fn test_save_creates_parent_and_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::new(tmp.path().join("nested/dir/session.json"));
        store.save(&cred("C1")).await.unwrap();

        let names: Vec<_> = fs::read_dir(tmp.path().join("nested/dir"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["session.json".to_string()]);
    }

    #[tokio::test]
    async fn test_save_failure_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        fs::write(&blocker, b"").unwrap();
        let store = FileSessionStore::new(blocker.join("session.json"));
        assert!(matches!(store.save(&cred("C1")).await, Err(StoreError::Io(_))));
    }

    #[test]
    fn test_inspect_reports_save_time() {
        let (store, _tmp) = create_test_store();
        fs::write(
            store.path(),
            br#"{"version": 1, "saved_at": "2024-05-01T12:00:00Z", "credential": "QzE="}"#,
        )
        .unwrap();
        let record = store.inspect().unwrap().unwrap();
        assert_eq!(record.saved_at.to_rfc3339(), "2024-05-01T12:00:00+00:00");
        assert_eq!(record.credential().unwrap(), cred("C1"));
    }
}
