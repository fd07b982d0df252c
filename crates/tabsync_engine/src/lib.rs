//! # TabSync Engine
//!
//! Bidirectional synchronization and conflict resolution between a local
//! versioned catalog and a remote tabular store.
//!
//! This crate provides:
//! - Durable outbox queue for pending remote operations
//! - Bounded exponential backoff for transient failures
//! - Push engine (local dirty rows to remote, batched, retried)
//! - Pull engine (remote rows applied locally, version-gated)
//! - Conflict detection with a pluggable resolution policy
//! - A background scheduler driving periodic and on-demand cycles
//!
//! ## Architecture
//!
//! The engine implements a **push-then-pull** cycle: within one cycle all
//! push work completes (or is retried to exhaustion) before pull begins, so
//! a row just pushed is not immediately re-read as "remote newer".
//!
//! ## Key Invariants
//!
//! - Version is primary truth, timestamp is the tiebreaker, remote wins a
//!   full tie
//! - Local edits are never silently discarded (default policy accept-local)
//! - A remote-origin write never re-enqueues itself (muted scope)
//! - `mark_pushed` happens strictly after the remote write succeeds

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod config;
mod conflict;
mod context;
mod error;
mod outbox;
mod pull;
mod push;
mod resolver;
mod scheduler;
mod status;

pub use backoff::BackoffController;
pub use config::{RemoteAvailability, RetryConfig, SyncConfig};
pub use conflict::{Conflict, ConflictLog, ConflictSource};
pub use context::SyncContext;
pub use error::{SyncError, SyncResult};
pub use outbox::{JobOp, OutboxQueue, SyncJob};
pub use pull::{PullEngine, PullReport};
pub use push::{PushEngine, PushReport};
pub use resolver::{ConflictResolver, Resolution, ResolutionPolicy};
pub use scheduler::{
    AvailabilityProbe, ConflictSink, SchedulerBuilder, SchedulerState, StatusSink, SyncScheduler,
};
pub use status::{CycleAction, SyncStatus};
