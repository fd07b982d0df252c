//! # TabSync Core
//!
//! Catalog data model and versioned local store for TabSync.
//!
//! This crate provides:
//! - Typed scalar values ([`FieldValue`]) with the fixed cell coercion rules
//! - The explicit field mapping table ([`FieldSchema`])
//! - The unit of synchronization ([`Row`]) with version counters
//! - The [`Catalog`] trait consumed by the sync engine
//! - [`VersionedStore`], the reference catalog implementation with mutation
//!   listeners and the muted write scope
//!
//! ## Key Invariants
//!
//! - `last_pushed_version <= version` for every row, always
//! - A row is *dirty* iff `version > last_pushed_version`
//! - Remote-origin writes go through a muted scope and never re-notify
//!   mutation listeners

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod row;
mod schema;
mod store;
mod value;

pub use error::{CoreError, CoreResult};
pub use row::{Actor, Row};
pub use schema::{
    inventory_schema, FieldSchema, FieldSpec, DELETED_HEADER, ID_HEADER, UPDATED_AT_HEADER,
    VERSION_HEADER,
};
pub use store::{Catalog, ListenerId, MutationListener, MuteGuard, VersionedStore};
pub use value::{parse_cell_timestamp, FieldKind, FieldValue};
