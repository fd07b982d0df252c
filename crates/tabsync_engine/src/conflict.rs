//! Conflict records, the bounded ring buffer, and the durable audit trail.

use crate::resolver::Resolution;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tabsync_core::{FieldSchema, Row};
use tabsync_gateway::RemoteRow;
use tracing::warn;

/// Which pass detected the conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSource {
    /// Detected while applying remote rows.
    Pull,
    /// Detected while uploading local rows.
    Push,
}

/// A detected divergence between the local and remote copy of one row.
///
/// Conflicts never mutate a row directly; resolution is a separate,
/// explicit step recorded in `resolution`. `None` means unresolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Identifier of the diverged row.
    pub row_id: String,
    /// Local version at detection time.
    pub local_version: u64,
    /// Remote-observed version, when the remote carried one.
    pub remote_version: Option<u64>,
    /// Per-field `(local, remote)` cell values, unequal fields only.
    pub field_diffs: BTreeMap<String, (String, String)>,
    /// Detection time.
    pub timestamp: DateTime<Utc>,
    /// Which pass detected the conflict.
    pub source: ConflictSource,
    /// Outcome of the resolution step, `None` while unresolved.
    pub resolution: Option<Resolution>,
}

impl Conflict {
    /// Builds a conflict record from local and remote snapshots.
    pub fn between(
        local: &Row,
        remote: &RemoteRow,
        schema: &FieldSchema,
        source: ConflictSource,
    ) -> Self {
        Self {
            row_id: local.id.clone(),
            local_version: local.version,
            remote_version: remote.version,
            field_diffs: field_diffs(local, remote, schema),
            timestamp: Utc::now(),
            source,
            resolution: None,
        }
    }

    /// Returns true if no resolution has been recorded.
    pub fn is_unresolved(&self) -> bool {
        self.resolution.is_none()
    }
}

/// Computes per-field `(local, remote)` cell diffs.
///
/// Values are compared by their canonical cell rendering, so a remote cell
/// `"2"` does not diff against a local `Number(2.0)`. Equal fields produce
/// no entry.
pub(crate) fn field_diffs(
    local: &Row,
    remote: &RemoteRow,
    schema: &FieldSchema,
) -> BTreeMap<String, (String, String)> {
    let mut diffs = BTreeMap::new();
    for spec in schema.fields() {
        let local_cell = local.field(&spec.name).to_cell();
        let remote_cell = remote.value(schema, &spec.name).to_cell();
        if local_cell != remote_cell {
            diffs.insert(spec.name.clone(), (local_cell, remote_cell));
        }
    }
    diffs
}

/// Returns true when the two copies differ in any field or in the
/// tombstone marker.
pub(crate) fn copies_differ(local: &Row, remote: &RemoteRow, schema: &FieldSchema) -> bool {
    local.deleted != remote.deleted || !field_diffs(local, remote, schema).is_empty()
}

/// Returns true when the remote copy advanced past the version this row
/// last pushed, falling back to timestamps when the remote carries no
/// version column.
pub(crate) fn remote_advanced(remote: &RemoteRow, local: &Row) -> bool {
    match remote.version {
        Some(remote_version) => remote_version > local.last_pushed_version,
        None => remote
            .updated_at
            .is_some_and(|remote_ts| remote_ts > local.updated_at),
    }
}

/// Builds the local row for a muted apply, keeping the version counter
/// monotone when the remote carries no version column.
pub(crate) fn materialize(remote: &RemoteRow, schema: &FieldSchema, local: Option<&Row>) -> Row {
    let mut row = remote.to_row(schema);
    if let Some(local) = local {
        if row.version < local.version {
            row.version = local.version;
            row.last_pushed_version = local.version;
        }
    }
    row
}

/// Bounded in-memory ring of recent conflicts plus a durable audit trail.
pub struct ConflictLog {
    ring: Mutex<VecDeque<Conflict>>,
    capacity: usize,
    audit_path: Option<PathBuf>,
    total: AtomicU64,
}

impl ConflictLog {
    /// Default ring capacity (most-recent-N retained for UI consumption).
    pub const DEFAULT_CAPACITY: usize = 50;

    /// Creates an in-memory-only log with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Creates an in-memory-only log with a specific ring capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            audit_path: None,
            total: AtomicU64::new(0),
        }
    }

    /// Adds a durable JSONL audit trail at `path`.
    pub fn with_audit(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_path = Some(path.into());
        self
    }

    /// Records a conflict: most-recent-first in the ring, appended to the
    /// audit trail. An audit write failure is logged, never fatal.
    pub fn record(&self, conflict: Conflict) {
        if let Some(path) = &self.audit_path {
            if let Err(error) = append_audit_line(path, &conflict) {
                warn!(%error, "conflict audit line could not be written");
            }
        }
        let mut ring = self.ring.lock();
        ring.push_front(conflict);
        ring.truncate(self.capacity);
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns up to `limit` most recent conflicts, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Conflict> {
        self.ring.lock().iter().take(limit).cloned().collect()
    }

    /// Number of conflicts currently held in the ring.
    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    /// Returns true when the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }

    /// Total conflicts ever recorded, unaffected by ring truncation.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Clears the in-memory ring; the audit trail is untouched.
    pub fn clear(&self) {
        self.ring.lock().clear();
    }
}

impl Default for ConflictLog {
    fn default() -> Self {
        Self::new()
    }
}

fn append_audit_line(path: &std::path::Path, conflict: &Conflict) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let line = serde_json::to_string(conflict)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}
