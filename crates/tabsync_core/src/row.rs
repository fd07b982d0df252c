//! The unit of synchronization.

use crate::value::{utc_now_seconds, FieldValue};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Who last wrote a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// The interactive local client.
    Local,
    /// The pull engine applying a remote copy.
    Remote,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Local => f.write_str("local"),
            Actor::Remote => f.write_str("remote-applied"),
        }
    }
}

/// A catalog row with version tracking.
///
/// # Invariants
///
/// - `version >= 1`
/// - `last_pushed_version <= version`
/// - dirty iff `version > last_pushed_version`
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Stable identifier.
    pub id: String,
    /// Field values keyed by local field name.
    pub fields: BTreeMap<String, FieldValue>,
    /// Monotonic version counter, bumped on every local write.
    pub version: u64,
    /// Version last acknowledged by the remote store.
    pub last_pushed_version: u64,
    /// Timestamp of the last write.
    pub updated_at: DateTime<Utc>,
    /// Origin of the last write.
    pub updated_by: Actor,
    /// Local soft-delete marker.
    pub deleted: bool,
}

impl Row {
    /// Creates a fresh, never-pushed local row at version 1.
    pub fn new(id: impl Into<String>, fields: BTreeMap<String, FieldValue>) -> Self {
        Self {
            id: id.into(),
            fields,
            version: 1,
            last_pushed_version: 0,
            updated_at: utc_now_seconds(),
            updated_by: Actor::Local,
            deleted: false,
        }
    }

    /// Creates a row with a generated identifier.
    pub fn with_generated_id(fields: BTreeMap<String, FieldValue>) -> Self {
        Self::new(Uuid::new_v4().to_string(), fields)
    }

    /// Returns true if the row has local changes the remote has not seen.
    pub fn is_dirty(&self) -> bool {
        self.version > self.last_pushed_version
    }

    /// Returns a field value, `Null` for unset fields.
    pub fn field(&self, name: &str) -> &FieldValue {
        self.fields.get(name).unwrap_or(&FieldValue::Null)
    }

    /// Sets a field value. Does not touch version counters; that is the
    /// store's job.
    pub fn set_field(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }
}
