//! Persistence client for completed tasks.
//!
//! Two stores are selected by URI scheme:
//!
//! | URI | Store |
//! |-----|-------|
//! | `memory://` | [`MemoryStore`], records kept in process |
//! | `file://<path>` | [`FileStore`], one JSON object per line, append-only |
//!
//! The node records a [`TaskRecord`] for every completed inference or
//! checkpoint request and disconnects exactly once at teardown.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::shutdown::ManagedResource;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unsupported persistence uri: {0}")]
    UnsupportedUri(String),

    #[error("persistence i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode task record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("persistence client is disconnected")]
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Inference,
    Checkpoint,
}

/// One completed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub node_id: String,
    pub kind: TaskKind,
    pub prompt: String,
    pub result: String,
    /// RFC 3339, UTC.
    pub completed_at: String,
}

impl TaskRecord {
    pub fn new(
        node_id: impl Into<String>,
        kind: TaskKind,
        prompt: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            node_id: node_id.into(),
            kind,
            prompt: prompt.into(),
            result: result.into(),
            completed_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[async_trait]
pub trait PersistenceClient: Send + Sync {
    /// The URI this client was connected with.
    fn endpoint(&self) -> &str;

    async fn record(&self, record: TaskRecord) -> Result<(), PersistenceError>;

    /// Releases the store. Calling it again is a no-op.
    async fn disconnect(&self) -> Result<(), PersistenceError>;
}

#[async_trait]
impl ManagedResource for Arc<dyn PersistenceClient> {
    fn name(&self) -> &str {
        "persistence"
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.disconnect().await?;
        Ok(())
    }
}

/// Connects to the store named by `uri`.
pub fn connect(uri: &str) -> Result<Arc<dyn PersistenceClient>, PersistenceError> {
    if uri == "memory://" || uri == "memory" {
        info!("persistence: in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    if let Some(path) = uri.strip_prefix("file://") {
        if path.is_empty() {
            return Err(PersistenceError::UnsupportedUri(uri.to_string()));
        }
        let store = FileStore::open(uri, path)?;
        info!(path = %store.path().display(), "persistence: file store");
        return Ok(Arc::new(store));
    }
    Err(PersistenceError::UnsupportedUri(uri.to_string()))
}

// ════════════════════════════════════════════════════════════════════════════
// MEMORY STORE
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<TaskRecord>>,
    disconnected: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TaskRecord> {
        self.records.lock().clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceClient for MemoryStore {
    fn endpoint(&self) -> &str {
        "memory://"
    }

    async fn record(&self, record: TaskRecord) -> Result<(), PersistenceError> {
        if self.is_disconnected() {
            return Err(PersistenceError::Disconnected);
        }
        self.records.lock().push(record);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PersistenceError> {
        if !self.disconnected.swap(true, Ordering::SeqCst) {
            debug!(records = self.records.lock().len(), "memory store disconnected");
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// FILE STORE
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct FileStore {
    uri: String,
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileStore {
    fn open(uri: &str, path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| PersistenceError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        Ok(Self {
            uri: uri.to_string(),
            path,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PersistenceClient for FileStore {
    fn endpoint(&self) -> &str {
        &self.uri
    }

    async fn record(&self, record: TaskRecord) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(PersistenceError::Disconnected)?;
        file.write_all(&line).map_err(|source| PersistenceError::Io {
            path: self.path.clone(),
            source,
        })
    }

    async fn disconnect(&self) -> Result<(), PersistenceError> {
        let Some(file) = self.file.lock().take() else {
            return Ok(());
        };
        file.sync_all().map_err(|source| PersistenceError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), "file store disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(prompt: &str) -> TaskRecord {
        TaskRecord::new("node-1", TaskKind::Checkpoint, prompt, "0xabc")
    }

    #[test]
    fn test_connect_unsupported() {
        assert!(matches!(
            connect("mongodb://localhost:27017"),
            Err(PersistenceError::UnsupportedUri(_))
        ));
        assert!(matches!(connect("file://"), Err(PersistenceError::UnsupportedUri(_))));
    }

    #[tokio::test]
    async fn test_memory_store_records_until_disconnect() {
        let store = MemoryStore::new();
        store.record(record("a")).await.unwrap();
        store.record(record("b")).await.unwrap();
        assert_eq!(store.records().len(), 2);

        store.disconnect().await.unwrap();
        store.disconnect().await.unwrap();
        assert!(store.is_disconnected());
        assert!(matches!(
            store.record(record("c")).await,
            Err(PersistenceError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_file_store_appends_json_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("tasks.jsonl");
        let uri = format!("file://{}", path.display());

        let client = connect(&uri).unwrap();
        assert_eq!(client.endpoint(), uri);
        client.record(record("hello")).await.unwrap();
        client.record(record("world")).await.unwrap();
        client.disconnect().await.unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let rows: Vec<TaskRecord> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].prompt, "hello");
        assert_eq!(rows[1].prompt, "world");
        assert_eq!(rows[1].kind, TaskKind::Checkpoint);
    }

    #[tokio::test]
    async fn test_file_store_disconnect_idempotent() {
        let tmp = TempDir::new().unwrap();
        let uri = format!("file://{}", tmp.path().join("t.jsonl").display());
        let client = connect(&uri).unwrap();

        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();
        assert!(matches!(
            client.record(record("late")).await,
            Err(PersistenceError::Disconnected)
        ));
    }

    #[test]
    fn test_task_record_ids_unique() {
        assert_ne!(record("x").task_id, record("x").task_id);
    }
}
