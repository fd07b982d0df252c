//! The versioned local store: mutation tracking, listeners, muted scope.

use crate::error::{CoreError, CoreResult};
use crate::row::{Actor, Row};
use crate::value::utc_now_seconds;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Callback invoked with the row identifier after a local mutation commits.
pub type MutationListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Handle for unregistering a mutation listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The local catalog interface consumed by the sync engine.
///
/// The engine treats this as the sole source of truth for local state and
/// never bypasses it with direct storage access.
pub trait Catalog: Send + Sync {
    /// Fetches a row by identifier.
    fn fetch_row(&self, id: &str) -> CoreResult<Option<Row>>;

    /// Returns all rows with `version > last_pushed_version`.
    fn dirty_rows(&self) -> CoreResult<Vec<Row>>;

    /// Records a local mutation: bumps the version, stamps the write, and
    /// notifies listeners unless inside a muted scope.
    fn record_mutation(&self, row: Row) -> CoreResult<Row>;

    /// Re-marks a row dirty without changing its field values, recording
    /// that `observed_remote_version` has been seen and reconciled.
    ///
    /// The new version lands above both the local and the observed remote
    /// version, so the kept-local content wins the next push without being
    /// re-flagged as a conflict. Pass `0` when no remote version was
    /// involved.
    fn touch(&self, id: &str, observed_remote_version: u64) -> CoreResult<()>;

    /// Writes a remote copy as the new authoritative state. The row comes
    /// out clean (`last_pushed_version == version`) and no listener fires.
    fn apply_remote(&self, row: Row) -> CoreResult<()>;

    /// Raises `last_pushed_version` to `version` if currently lower.
    /// Idempotent under retry.
    fn mark_pushed(&self, id: &str, version: u64) -> CoreResult<()>;

    /// Registers a mutation listener with ordered, synchronous delivery.
    fn register_listener(&self, listener: MutationListener) -> ListenerId;

    /// Removes a previously registered listener.
    fn unregister_listener(&self, id: ListenerId);
}

/// Suppresses mutation notifications for its lifetime.
///
/// The guard is re-entrant (nested guards stack) and releases on all exit
/// paths, including unwinding.
pub struct MuteGuard<'a> {
    store: &'a VersionedStore,
}

impl Drop for MuteGuard<'_> {
    fn drop(&mut self) {
        self.store.muted.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory reference implementation of [`Catalog`].
///
/// Owns every [`Row`] exclusively: version counters and write stamps are
/// maintained here, never by callers.
pub struct VersionedStore {
    rows: RwLock<BTreeMap<String, Row>>,
    listeners: RwLock<BTreeMap<u64, MutationListener>>,
    next_listener_id: AtomicU64,
    muted: AtomicUsize,
}

impl VersionedStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            listeners: RwLock::new(BTreeMap::new()),
            next_listener_id: AtomicU64::new(1),
            muted: AtomicUsize::new(0),
        }
    }

    /// Enters a muted scope. Mutations performed while any guard is alive
    /// do not notify listeners.
    pub fn mute(&self) -> MuteGuard<'_> {
        self.muted.fetch_add(1, Ordering::SeqCst);
        MuteGuard { store: self }
    }

    /// Returns true while inside a muted scope.
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst) > 0
    }

    /// Returns the number of stored rows.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if no rows are stored.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Returns a snapshot of every stored row.
    pub fn all_rows(&self) -> Vec<Row> {
        self.rows.read().values().cloned().collect()
    }

    /// Marks a row soft-deleted through the normal mutation path.
    pub fn soft_delete(&self, id: &str) -> CoreResult<Row> {
        let mut row = self
            .fetch_row(id)?
            .ok_or_else(|| CoreError::RowNotFound(id.to_string()))?;
        row.deleted = true;
        self.record_mutation(row)
    }

    fn notify(&self, id: &str) {
        if self.is_muted() {
            debug!(row_id = id, "mutation notification suppressed (muted)");
            return;
        }
        let listeners: Vec<MutationListener> =
            self.listeners.read().values().cloned().collect();
        for listener in listeners {
            listener(id);
        }
    }
}

impl Default for VersionedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog for VersionedStore {
    fn fetch_row(&self, id: &str) -> CoreResult<Option<Row>> {
        Ok(self.rows.read().get(id).cloned())
    }

    fn dirty_rows(&self) -> CoreResult<Vec<Row>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|row| row.is_dirty())
            .cloned()
            .collect())
    }

    fn record_mutation(&self, mut row: Row) -> CoreResult<Row> {
        if row.id.is_empty() {
            return Err(CoreError::MissingIdentifier);
        }
        let stored = {
            let mut rows = self.rows.write();
            match rows.get(&row.id) {
                Some(existing) => {
                    row.version = existing.version + 1;
                    row.last_pushed_version = existing.last_pushed_version;
                }
                None => {
                    row.version = 1;
                    row.last_pushed_version = 0;
                }
            }
            row.updated_at = utc_now_seconds();
            row.updated_by = Actor::Local;
            rows.insert(row.id.clone(), row.clone());
            row
        };
        self.notify(&stored.id);
        Ok(stored)
    }

    fn touch(&self, id: &str, observed_remote_version: u64) -> CoreResult<()> {
        {
            let mut rows = self.rows.write();
            let row = rows
                .get_mut(id)
                .ok_or_else(|| CoreError::RowNotFound(id.to_string()))?;
            row.version = row.version.max(observed_remote_version) + 1;
            row.last_pushed_version = row.last_pushed_version.max(observed_remote_version);
            row.updated_at = utc_now_seconds();
            row.updated_by = Actor::Local;
        }
        self.notify(id);
        Ok(())
    }

    fn apply_remote(&self, mut row: Row) -> CoreResult<()> {
        if row.id.is_empty() {
            return Err(CoreError::MissingIdentifier);
        }
        // The remote copy is authoritative and clean from here on.
        let _mute = self.mute();
        let mut rows = self.rows.write();
        row.last_pushed_version = row.version;
        row.updated_by = Actor::Remote;
        rows.insert(row.id.clone(), row);
        Ok(())
    }

    fn mark_pushed(&self, id: &str, version: u64) -> CoreResult<()> {
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(id)
            .ok_or_else(|| CoreError::RowNotFound(id.to_string()))?;
        let target = version.min(row.version);
        if row.last_pushed_version < target {
            row.last_pushed_version = target;
        }
        Ok(())
    }

    fn register_listener(&self, listener: MutationListener) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().insert(id, listener);
        ListenerId(id)
    }

    fn unregister_listener(&self, id: ListenerId) {
        self.listeners.write().remove(&id.0);
    }
}
