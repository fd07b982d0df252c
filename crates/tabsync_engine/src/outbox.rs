//! Durable, append-only queue of pending remote operations.
//!
//! One JSON record per line. The file is the state: reopening the queue
//! after a crash recovers every entry that was appended, and a corrupt line
//! is skipped rather than fatal.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// The remote operation a queued job intends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOp {
    /// Insert or update the row remotely.
    Upsert,
    /// Remove the row remotely.
    Delete,
}

/// A queued intent to mutate the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    /// Queue sequence number, assigned on append.
    pub seq: u64,
    /// Intended remote operation.
    pub op: JobOp,
    /// Identifier of the affected row.
    pub row_id: String,
    /// Cell snapshot at enqueue time, keyed by remote header.
    pub payload: BTreeMap<String, String>,
    /// When the job was enqueued.
    pub enqueued_at: DateTime<Utc>,
}

impl SyncJob {
    /// Creates an upsert job. The sequence number is assigned on append.
    pub fn upsert(row_id: impl Into<String>, payload: BTreeMap<String, String>) -> Self {
        Self {
            seq: 0,
            op: JobOp::Upsert,
            row_id: row_id.into(),
            payload,
            enqueued_at: Utc::now(),
        }
    }

    /// Creates a delete job.
    pub fn delete(row_id: impl Into<String>) -> Self {
        Self {
            seq: 0,
            op: JobOp::Delete,
            row_id: row_id.into(),
            payload: BTreeMap::new(),
            enqueued_at: Utc::now(),
        }
    }
}

/// Durable outbox backed by a line-delimited JSON file.
pub struct OutboxQueue {
    path: PathBuf,
    lock: Mutex<()>,
    next_seq: AtomicU64,
}

impl OutboxQueue {
    /// Opens (or creates) the queue at `path`, recovering the sequence
    /// counter from any existing entries.
    pub fn open(path: impl Into<PathBuf>) -> SyncResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(io_error)?;
            }
        }
        let queue = Self {
            path,
            lock: Mutex::new(()),
            next_seq: AtomicU64::new(1),
        };
        let max_seq = queue
            .read_entries()?
            .iter()
            .map(|job| job.seq)
            .max()
            .unwrap_or(0);
        queue.next_seq.store(max_seq + 1, Ordering::SeqCst);
        Ok(queue)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a job durably and returns its assigned sequence number.
    pub fn append(&self, mut job: SyncJob) -> SyncResult<u64> {
        let _guard = self.lock.lock();
        job.seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let line = serde_json::to_string(&job).map_err(|e| SyncError::Outbox(e.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_error)?;
        file.write_all(line.as_bytes()).map_err(io_error)?;
        file.write_all(b"\n").map_err(io_error)?;
        file.flush().map_err(io_error)?;
        debug!(seq = job.seq, row_id = %job.row_id, op = ?job.op, "job enqueued");
        Ok(job.seq)
    }

    /// Returns a snapshot of every queued job in append order.
    pub fn snapshot(&self) -> SyncResult<Vec<SyncJob>> {
        let _guard = self.lock.lock();
        self.read_entries()
    }

    /// Number of queued jobs.
    pub fn pending_count(&self) -> usize {
        self.snapshot().map(|jobs| jobs.len()).unwrap_or(0)
    }

    /// Returns true when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending_count() == 0
    }

    /// Replays every queued job through `handler`.
    ///
    /// Entries the handler processes without error are removed; failed
    /// entries are persisted verbatim, in their original order, for the
    /// next drain. One failing entry never blocks the rest. Returns the
    /// number of entries processed successfully.
    pub fn drain<F>(&self, mut handler: F) -> SyncResult<usize>
    where
        F: FnMut(&SyncJob) -> SyncResult<()>,
    {
        let _guard = self.lock.lock();
        let entries = self.read_entries()?;
        if entries.is_empty() {
            self.remove_file()?;
            return Ok(0);
        }

        let mut remaining = Vec::new();
        let mut processed = 0usize;
        for job in &entries {
            match handler(job) {
                Ok(()) => processed += 1,
                Err(error) => {
                    warn!(seq = job.seq, row_id = %job.row_id, %error, "outbox entry kept for retry");
                    remaining.push(job.clone());
                }
            }
        }

        self.rewrite(&remaining)?;
        Ok(processed)
    }

    /// Removes every job with `seq <= cutoff`, returning the removed count.
    ///
    /// Used by the push engine after a successful remote write: jobs
    /// appended mid-flight carry a higher sequence number and survive.
    pub fn acknowledge_up_to(&self, cutoff: u64) -> SyncResult<usize> {
        let _guard = self.lock.lock();
        let entries = self.read_entries()?;
        let remaining: Vec<SyncJob> = entries
            .iter()
            .filter(|job| job.seq > cutoff)
            .cloned()
            .collect();
        let removed = entries.len() - remaining.len();
        if removed > 0 {
            self.rewrite(&remaining)?;
        }
        Ok(removed)
    }

    fn read_entries(&self) -> SyncResult<Vec<SyncJob>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path).map_err(io_error)?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(io_error)?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<SyncJob>(trimmed) {
                Ok(job) => entries.push(job),
                Err(error) => {
                    warn!(%error, "skipping corrupt outbox line");
                }
            }
        }
        Ok(entries)
    }

    fn rewrite(&self, entries: &[SyncJob]) -> SyncResult<()> {
        if entries.is_empty() {
            return self.remove_file();
        }
        let mut content = String::new();
        for job in entries {
            content.push_str(
                &serde_json::to_string(job).map_err(|e| SyncError::Outbox(e.to_string()))?,
            );
            content.push('\n');
        }
        std::fs::write(&self.path, content).map_err(io_error)
    }

    fn remove_file(&self) -> SyncResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(io_error(error)),
        }
    }
}

fn io_error(error: std::io::Error) -> SyncError {
    SyncError::Outbox(error.to_string())
}
