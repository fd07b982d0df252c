//! Shared engine wiring.

use crate::config::SyncConfig;
use crate::conflict::ConflictLog;
use crate::outbox::OutboxQueue;
use crate::resolver::ConflictResolver;
use std::sync::Arc;
use tabsync_core::Catalog;
use tabsync_gateway::{RemoteGateway, TableTransport};

/// Everything the engine components share, constructed once per process
/// and passed by reference. There are no process-wide singletons: two
/// contexts over two catalogs can sync independently in one process.
pub struct SyncContext<T: TableTransport> {
    /// The local catalog (source of truth for local state).
    pub catalog: Arc<dyn Catalog>,
    /// Typed remote access.
    pub gateway: Arc<RemoteGateway<T>>,
    /// Durable queue of pending remote operations.
    pub outbox: Arc<OutboxQueue>,
    /// Conflict ring buffer and audit trail.
    pub conflicts: Arc<ConflictLog>,
    /// Conflict disposition policy.
    pub resolver: Arc<ConflictResolver>,
    /// Scheduler and retry configuration.
    pub config: SyncConfig,
}

impl<T: TableTransport> SyncContext<T> {
    /// Creates a context with the default conflict log, resolver, and
    /// configuration.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        gateway: RemoteGateway<T>,
        outbox: OutboxQueue,
    ) -> Self {
        Self {
            catalog,
            gateway: Arc::new(gateway),
            outbox: Arc::new(outbox),
            conflicts: Arc::new(ConflictLog::new()),
            resolver: Arc::new(ConflictResolver::new()),
            config: SyncConfig::default(),
        }
    }

    /// Replaces the conflict log.
    pub fn with_conflict_log(mut self, conflicts: ConflictLog) -> Self {
        self.conflicts = Arc::new(conflicts);
        self
    }

    /// Replaces the conflict resolver.
    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }
}
