//! Change log sinks: the append-only audit trail of configuration changes.
//!
//! Records are never mutated or deleted here. Listing returns the newest
//! records first.

use async_trait::async_trait;
use rtconf_core::{ChangeLogError, ChangeLogRecord};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Append/query interface to durable change log storage.
#[async_trait]
pub trait ChangeLogSink: Send + Sync {
    /// Append one record.
    async fn append(&self, record: ChangeLogRecord) -> Result<(), ChangeLogError>;

    /// Up to `limit` records, newest first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<ChangeLogRecord>, ChangeLogError>;
}

fn newest_first(records: &mut [ChangeLogRecord]) {
    records.sort_by(|a, b| {
        b.changed_at
            .cmp(&a.changed_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

// ============================================================================
// IN-MEMORY
// ============================================================================

/// In-memory change log for tests and single-process use.
#[derive(Debug, Default)]
pub struct InMemoryChangeLog {
    records: tokio::sync::RwLock<Vec<ChangeLogRecord>>,
}

impl InMemoryChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record in append order.
    pub async fn all(&self) -> Vec<ChangeLogRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ChangeLogSink for InMemoryChangeLog {
    async fn append(&self, record: ChangeLogRecord) -> Result<(), ChangeLogError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<ChangeLogRecord>, ChangeLogError> {
        let mut records = self.records.read().await.clone();
        newest_first(&mut records);
        records.truncate(limit);
        Ok(records)
    }
}

// ============================================================================
// JSON LINES FILE
// ============================================================================

/// Change log persisted as one JSON record per line.
///
/// Every append is flushed with `sync_all` before it is acknowledged.
#[derive(Debug, Clone)]
pub struct JsonlChangeLog {
    path: PathBuf,
    /// Serializes appends so lines never interleave.
    write_lock: Arc<Mutex<()>>,
}

impl JsonlChangeLog {
    /// Open (creating if needed) the change log at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ChangeLogError> {
        let path = path.into();
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_blocking(
        path: &Path,
        lock: &Mutex<()>,
        record: &ChangeLogRecord,
    ) -> Result<(), ChangeLogError> {
        let line = serde_json::to_string(record)?;
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        file.sync_all()?;
        Ok(())
    }

    fn replay_blocking(path: &Path) -> Result<Vec<ChangeLogRecord>, ChangeLogError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

fn join_error(e: tokio::task::JoinError) -> ChangeLogError {
    ChangeLogError::Io {
        reason: format!("change log task failed: {}", e),
    }
}

#[async_trait]
impl ChangeLogSink for JsonlChangeLog {
    async fn append(&self, record: ChangeLogRecord) -> Result<(), ChangeLogError> {
        let path = self.path.clone();
        let lock = Arc::clone(&self.write_lock);
        tokio::task::spawn_blocking(move || Self::append_blocking(&path, &lock, &record))
            .await
            .map_err(join_error)?
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<ChangeLogRecord>, ChangeLogError> {
        let path = self.path.clone();
        let mut records = tokio::task::spawn_blocking(move || Self::replay_blocking(&path))
            .await
            .map_err(join_error)??;
        newest_first(&mut records);
        records.truncate(limit);
        Ok(records)
    }
}

// =============================================================================
// TESTS
// =============================================================================
