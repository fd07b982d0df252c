//! Pull pass: apply remote rows locally, version-gated.

use crate::conflict::{
    copies_differ, materialize, remote_advanced, Conflict, ConflictLog, ConflictSource,
};
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::resolver::{ConflictResolver, Resolution};
use std::cmp::Ordering;
use std::sync::Arc;
use tabsync_core::{Catalog, FieldSchema, Row};
use tabsync_gateway::{RemoteGateway, RemoteRow, TableTransport};
use tracing::{debug, warn};

/// Outcome of one pull pass.
#[derive(Debug, Clone, Default)]
pub struct PullReport {
    /// Remote rows applied locally.
    pub applied: usize,
    /// Remote rows skipped (local copy as new or newer).
    pub skipped: usize,
    /// True conflicts detected.
    pub conflicts: usize,
    /// Conflicts resolved by policy this pass.
    pub resolved: usize,
    /// Conflicts left unresolved for a later cycle.
    pub unresolved: usize,
    /// Rows whose local write failed and were left unmodified.
    pub failed_rows: usize,
}

/// Downloads the remote table and reconciles it into the catalog.
///
/// Version is primary truth, timestamp is the tiebreaker, and a full tie
/// goes to the remote copy: the remote is authoritative for reads unless
/// local explicitly advanced past it. That tie-break is deliberate policy.
pub struct PullEngine<T: TableTransport> {
    catalog: Arc<dyn Catalog>,
    gateway: Arc<RemoteGateway<T>>,
    conflicts: Arc<ConflictLog>,
    resolver: Arc<ConflictResolver>,
}

impl<T: TableTransport> PullEngine<T> {
    /// Builds the engine from shared context.
    pub fn from_context(ctx: &SyncContext<T>) -> Self {
        Self {
            catalog: Arc::clone(&ctx.catalog),
            gateway: Arc::clone(&ctx.gateway),
            conflicts: Arc::clone(&ctx.conflicts),
            resolver: Arc::clone(&ctx.resolver),
        }
    }

    /// Runs one pull pass.
    ///
    /// A failed local write aborts that row only; the batch continues. A
    /// catalog-level failure aborts the pass.
    pub fn run(&self) -> SyncResult<PullReport> {
        self.run_excluding(&[])
    }

    /// Runs one pull pass skipping the given row ids.
    ///
    /// The scheduler passes the rows the push pass held back under a `Skip`
    /// disposition, so one cycle does not record the same conflict twice.
    pub fn run_excluding(&self, exclude: &[String]) -> SyncResult<PullReport> {
        let remote_rows = self.gateway.fetch_all()?;
        let schema = self.gateway.schema();

        let mut report = PullReport::default();
        for remote in &remote_rows {
            if exclude.contains(&remote.id) {
                report.skipped += 1;
                continue;
            }
            match self.reconcile(schema, remote, &mut report) {
                Ok(()) => {}
                Err(SyncError::Catalog(error)) if !error.is_fatal() => {
                    warn!(row_id = %remote.id, %error, "row left unmodified");
                    report.failed_rows += 1;
                }
                Err(error) => return Err(error),
            }
        }

        debug!(
            applied = report.applied,
            skipped = report.skipped,
            conflicts = report.conflicts,
            "pull pass complete"
        );
        Ok(report)
    }

    fn reconcile(
        &self,
        schema: &FieldSchema,
        remote: &RemoteRow,
        report: &mut PullReport,
    ) -> SyncResult<()> {
        let local = self.catalog.fetch_row(&remote.id)?;

        let Some(local) = local else {
            if remote.deleted {
                // A tombstone for a row we never had: nothing to delete.
                report.skipped += 1;
                return Ok(());
            }
            self.catalog
                .apply_remote(materialize(remote, schema, None))?;
            report.applied += 1;
            return Ok(());
        };

        if !local.is_dirty() {
            let decision = match remote_cmp(remote, &local) {
                Ordering::Greater => true,
                Ordering::Less => false,
                // Full tie: remote wins when the copies actually differ.
                Ordering::Equal => copies_differ(&local, remote, schema),
            };
            if decision {
                self.catalog
                    .apply_remote(materialize(remote, schema, Some(&local)))?;
                report.applied += 1;
            } else {
                report.skipped += 1;
            }
            return Ok(());
        }

        // Dirty local row: a conflict only exists if the remote advanced
        // past the last version we pushed. Otherwise our pending push wins.
        if !remote_advanced(remote, &local) {
            report.skipped += 1;
            return Ok(());
        }
        if !copies_differ(&local, remote, schema) {
            // Remote ran ahead but the content is identical: fast-forward
            // the version marker instead of flagging a conflict.
            self.catalog
                .apply_remote(materialize(remote, schema, Some(&local)))?;
            report.applied += 1;
            return Ok(());
        }

        let resolution = self.resolver.resolve(&local, remote);
        let mut conflict = Conflict::between(&local, remote, schema, ConflictSource::Pull);
        report.conflicts += 1;
        match resolution {
            Resolution::AcceptRemote => {
                self.catalog
                    .apply_remote(materialize(remote, schema, Some(&local)))?;
                conflict.resolution = Some(resolution);
                report.resolved += 1;
            }
            Resolution::AcceptLocal => {
                // Keep the local content, acknowledge the observed remote
                // version, and re-dirty so the next cycle pushes it.
                self.catalog
                    .touch(&local.id, remote.version.unwrap_or(0))?;
                conflict.resolution = Some(resolution);
                report.resolved += 1;
            }
            Resolution::Skip => {
                report.unresolved += 1;
            }
        }
        self.conflicts.record(conflict);
        Ok(())
    }
}

/// Orders the remote copy against a clean local row: version first,
/// timestamp as the tiebreaker.
fn remote_cmp(remote: &RemoteRow, local: &Row) -> Ordering {
    if let Some(remote_version) = remote.version {
        match remote_version.cmp(&local.version) {
            Ordering::Equal => {}
            decided => return decided,
        }
    }
    if let Some(remote_ts) = remote.updated_at {
        match remote_ts.cmp(&local.updated_at) {
            Ordering::Equal => {}
            decided => return decided,
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::OutboxQueue;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use tabsync_core::{
        inventory_schema, Actor, CoreError, FieldValue, ListenerId, MutationListener,
        VersionedStore,
    };
    use tabsync_gateway::{GatewayConfig, InMemoryTransport};
    use tempfile::TempDir;

    struct Fixture {
        store: Arc<VersionedStore>,
        ctx: SyncContext<InMemoryTransport>,
        _dir: TempDir,
    }

    fn fixture_with(resolver: ConflictResolver) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(VersionedStore::new());
        let gateway = RemoteGateway::new(
            InMemoryTransport::new(),
            inventory_schema(),
            GatewayConfig::default(),
        );
        let outbox = OutboxQueue::open(dir.path().join("outbox.jsonl")).unwrap();
        let ctx = SyncContext::new(Arc::clone(&store) as Arc<dyn Catalog>, gateway, outbox)
            .with_resolver(resolver);
        Fixture {
            store,
            ctx,
            _dir: dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ConflictResolver::new())
    }

    fn typed_row(id: &str, title: &str, qty: f64) -> Row {
        let mut row = Row::new(id, BTreeMap::new());
        row.set_field("title", FieldValue::Text(title.into()));
        row.set_field("quantity", FieldValue::Number(qty));
        row
    }

    fn seed_remote(fx: &Fixture, rows: &[RemoteRow]) {
        fx.ctx.gateway.upsert(rows).unwrap();
    }

    fn remote_from(row: &Row) -> RemoteRow {
        RemoteRow::from_local(row, &inventory_schema())
    }

    #[test]
    fn new_remote_rows_are_applied_muted() {
        let fx = fixture();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let listener: MutationListener = Arc::new(move |_| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        });
        let _id: ListenerId = fx.store.register_listener(listener);

        let mut source = typed_row("r1", "Heriz", 2.0);
        source.version = 3;
        seed_remote(&fx, &[remote_from(&source)]);

        let engine = PullEngine::from_context(&fx.ctx);
        let report = engine.run().unwrap();
        assert_eq!(report.applied, 1);

        let row = fx.store.fetch_row("r1").unwrap().unwrap();
        assert_eq!(row.version, 3);
        assert!(!row.is_dirty());
        assert_eq!(row.updated_by, Actor::Remote);
        assert_eq!(
            fired.load(AtomicOrdering::SeqCst),
            0,
            "muted apply must not notify"
        );
    }

    #[test]
    fn newer_remote_version_overwrites_clean_local() {
        let fx = fixture();
        fx.store
            .record_mutation(typed_row("r1", "old", 1.0))
            .unwrap();
        fx.store.mark_pushed("r1", 1).unwrap();

        let mut source = typed_row("r1", "new", 1.0);
        source.version = 2;
        seed_remote(&fx, &[remote_from(&source)]);

        let report = PullEngine::from_context(&fx.ctx).run().unwrap();
        assert_eq!(report.applied, 1);
        let row = fx.store.fetch_row("r1").unwrap().unwrap();
        assert_eq!(*row.field("title"), FieldValue::Text("new".into()));
        assert_eq!(row.version, 2);
    }

    #[test]
    fn older_remote_version_is_skipped() {
        let fx = fixture();
        fx.store
            .record_mutation(typed_row("r1", "v1", 1.0))
            .unwrap();
        fx.store
            .record_mutation(typed_row("r1", "v2", 1.0))
            .unwrap();
        fx.store.mark_pushed("r1", 2).unwrap();

        let mut source = typed_row("r1", "stale", 1.0);
        source.version = 1;
        seed_remote(&fx, &[remote_from(&source)]);

        let report = PullEngine::from_context(&fx.ctx).run().unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(report.skipped, 1);
        let row = fx.store.fetch_row("r1").unwrap().unwrap();
        assert_eq!(*row.field("title"), FieldValue::Text("v2".into()));
    }

    #[test]
    fn version_tie_falls_back_to_timestamp() {
        let fx = fixture();
        fx.store
            .record_mutation(typed_row("r1", "local", 1.0))
            .unwrap();
        fx.store.mark_pushed("r1", 1).unwrap();
        let local = fx.store.fetch_row("r1").unwrap().unwrap();

        let mut source = typed_row("r1", "remote", 1.0);
        source.version = 1;
        source.updated_at = local.updated_at + chrono::Duration::seconds(30);
        seed_remote(&fx, &[remote_from(&source)]);

        let report = PullEngine::from_context(&fx.ctx).run().unwrap();
        assert_eq!(report.applied, 1);
        let row = fx.store.fetch_row("r1").unwrap().unwrap();
        assert_eq!(*row.field("title"), FieldValue::Text("remote".into()));
        assert_eq!(row.version, 1, "tie keeps the version counter");
    }

    #[test]
    fn full_tie_goes_to_remote_when_copies_differ() {
        let fx = fixture();
        let stored = fx
            .store
            .record_mutation(typed_row("r1", "local", 1.0))
            .unwrap();
        fx.store.mark_pushed("r1", 1).unwrap();

        let mut source = typed_row("r1", "remote", 1.0);
        source.version = 1;
        source.updated_at = stored.updated_at;
        seed_remote(&fx, &[remote_from(&source)]);

        let report = PullEngine::from_context(&fx.ctx).run().unwrap();
        assert_eq!(report.applied, 1);
        let row = fx.store.fetch_row("r1").unwrap().unwrap();
        assert_eq!(*row.field("title"), FieldValue::Text("remote".into()));
    }

    #[test]
    fn identical_tie_is_a_noop() {
        let fx = fixture();
        let stored = fx
            .store
            .record_mutation(typed_row("r1", "same", 1.0))
            .unwrap();
        fx.store.mark_pushed("r1", 1).unwrap();

        let mut source = typed_row("r1", "same", 1.0);
        source.version = 1;
        source.updated_at = stored.updated_at;
        seed_remote(&fx, &[remote_from(&source)]);

        let report = PullEngine::from_context(&fx.ctx).run().unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn dirty_local_with_advanced_remote_is_a_conflict() {
        let fx = fixture();
        // Local at version 3 with only version 1 pushed; remote observed at
        // version 2: both sides advanced past the common ancestor.
        fx.store
            .record_mutation(typed_row("r1", "v1", 1.0))
            .unwrap();
        fx.store.mark_pushed("r1", 1).unwrap();
        fx.store
            .record_mutation(typed_row("r1", "local-edit", 1.0))
            .unwrap();
        fx.store
            .record_mutation(typed_row("r1", "local-edit", 5.0))
            .unwrap();

        let mut source = typed_row("r1", "remote-edit", 1.0);
        source.version = 2;
        seed_remote(&fx, &[remote_from(&source)]);

        let report = PullEngine::from_context(&fx.ctx).run().unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.resolved, 1, "default policy resolves accept-local");

        let recent = fx.ctx.conflicts.recent(10);
        assert_eq!(recent.len(), 1);
        let conflict = &recent[0];
        assert_eq!(conflict.row_id, "r1");
        assert_eq!(conflict.local_version, 3);
        assert_eq!(conflict.remote_version, Some(2));
        assert_eq!(conflict.resolution, Some(Resolution::AcceptLocal));
        // Exactly the differing fields, no entry for equal ones.
        assert_eq!(conflict.field_diffs.len(), 2);
        assert_eq!(
            conflict.field_diffs.get("title"),
            Some(&("local-edit".to_string(), "remote-edit".to_string()))
        );
        assert_eq!(
            conflict.field_diffs.get("quantity"),
            Some(&("5".to_string(), "1".to_string()))
        );

        // Accept-local keeps the fields and re-dirties the row.
        let row = fx.store.fetch_row("r1").unwrap().unwrap();
        assert_eq!(*row.field("title"), FieldValue::Text("local-edit".into()));
        assert!(row.is_dirty());
        assert_eq!(row.version, 4);
    }

    #[test]
    fn equal_content_with_remote_ahead_fast_forwards() {
        let fx = fixture();
        fx.store
            .record_mutation(typed_row("r1", "same", 1.0))
            .unwrap();
        fx.store.mark_pushed("r1", 1).unwrap();
        // Re-dirty without changing content.
        fx.store.touch("r1", 0).unwrap();

        let mut source = typed_row("r1", "same", 1.0);
        source.version = 5;
        seed_remote(&fx, &[remote_from(&source)]);

        let report = PullEngine::from_context(&fx.ctx).run().unwrap();
        assert_eq!(report.conflicts, 0);
        assert_eq!(report.applied, 1);
        let row = fx.store.fetch_row("r1").unwrap().unwrap();
        assert_eq!(row.version, 5);
        assert!(!row.is_dirty());
    }

    #[test]
    fn excluded_rows_are_left_alone() {
        let fx = fixture();
        let mut source = typed_row("r1", "held", 1.0);
        source.version = 3;
        seed_remote(&fx, &[remote_from(&source)]);

        let report = PullEngine::from_context(&fx.ctx)
            .run_excluding(&["r1".to_string()])
            .unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(report.skipped, 1);
        assert!(fx.store.fetch_row("r1").unwrap().is_none());
    }

    #[test]
    fn dirty_local_without_remote_advance_is_not_a_conflict() {
        let fx = fixture();
        fx.store
            .record_mutation(typed_row("r1", "v1", 1.0))
            .unwrap();
        fx.store.mark_pushed("r1", 1).unwrap();
        fx.store
            .record_mutation(typed_row("r1", "local-edit", 1.0))
            .unwrap();

        // Remote still shows exactly what we last pushed.
        let mut source = typed_row("r1", "v1", 1.0);
        source.version = 1;
        seed_remote(&fx, &[remote_from(&source)]);

        let report = PullEngine::from_context(&fx.ctx).run().unwrap();
        assert_eq!(report.conflicts, 0);
        assert_eq!(report.skipped, 1);
        let row = fx.store.fetch_row("r1").unwrap().unwrap();
        assert_eq!(*row.field("title"), FieldValue::Text("local-edit".into()));
    }

    #[test]
    fn accept_remote_policy_applies_the_remote_copy() {
        let fx = fixture_with(ConflictResolver::with_policy(Box::new(|_, _| {
            Resolution::AcceptRemote
        })));

        fx.store
            .record_mutation(typed_row("r1", "v1", 1.0))
            .unwrap();
        fx.store.mark_pushed("r1", 1).unwrap();
        fx.store
            .record_mutation(typed_row("r1", "local-edit", 1.0))
            .unwrap();

        let mut source = typed_row("r1", "remote-edit", 1.0);
        source.version = 2;
        seed_remote(&fx, &[remote_from(&source)]);

        let report = PullEngine::from_context(&fx.ctx).run().unwrap();
        assert_eq!(report.resolved, 1);
        let row = fx.store.fetch_row("r1").unwrap().unwrap();
        assert_eq!(*row.field("title"), FieldValue::Text("remote-edit".into()));
        assert!(!row.is_dirty());
    }

    #[test]
    fn skip_policy_records_unresolved() {
        let fx = fixture_with(ConflictResolver::with_policy(Box::new(|_, _| {
            Resolution::Skip
        })));

        fx.store
            .record_mutation(typed_row("r1", "v1", 1.0))
            .unwrap();
        fx.store.mark_pushed("r1", 1).unwrap();
        fx.store
            .record_mutation(typed_row("r1", "local-edit", 1.0))
            .unwrap();

        let mut source = typed_row("r1", "remote-edit", 1.0);
        source.version = 2;
        seed_remote(&fx, &[remote_from(&source)]);

        let report = PullEngine::from_context(&fx.ctx).run().unwrap();
        assert_eq!(report.unresolved, 1);
        let recent = fx.ctx.conflicts.recent(10);
        assert!(recent[0].is_unresolved());

        // Untouched local state: retried on a subsequent cycle.
        let row = fx.store.fetch_row("r1").unwrap().unwrap();
        assert_eq!(*row.field("title"), FieldValue::Text("local-edit".into()));
        assert_eq!(row.version, 2);
    }

    #[test]
    fn remote_tombstone_soft_deletes_older_local() {
        let fx = fixture();
        fx.store
            .record_mutation(typed_row("r1", "sold", 1.0))
            .unwrap();
        fx.store.mark_pushed("r1", 1).unwrap();

        let mut source = typed_row("r1", "sold", 1.0);
        source.version = 2;
        source.deleted = true;
        seed_remote(&fx, &[remote_from(&source)]);

        let report = PullEngine::from_context(&fx.ctx).run().unwrap();
        assert_eq!(report.applied, 1);
        let row = fx.store.fetch_row("r1").unwrap().unwrap();
        assert!(row.deleted, "tombstone applied as local soft-delete");
    }

    #[test]
    fn tombstone_for_unknown_row_is_ignored() {
        let fx = fixture();
        let mut source = typed_row("ghost", "x", 1.0);
        source.deleted = true;
        seed_remote(&fx, &[remote_from(&source)]);

        let report = PullEngine::from_context(&fx.ctx).run().unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(report.skipped, 1);
        assert!(fx.store.fetch_row("ghost").unwrap().is_none());
    }

    /// Catalog wrapper that fails `apply_remote` for one row id.
    struct FailingCatalog {
        inner: Arc<VersionedStore>,
        poison: String,
    }

    impl Catalog for FailingCatalog {
        fn fetch_row(&self, id: &str) -> Result<Option<Row>, CoreError> {
            self.inner.fetch_row(id)
        }
        fn dirty_rows(&self) -> Result<Vec<Row>, CoreError> {
            self.inner.dirty_rows()
        }
        fn record_mutation(&self, row: Row) -> Result<Row, CoreError> {
            self.inner.record_mutation(row)
        }
        fn touch(&self, id: &str, observed_remote_version: u64) -> Result<(), CoreError> {
            self.inner.touch(id, observed_remote_version)
        }
        fn apply_remote(&self, row: Row) -> Result<(), CoreError> {
            if row.id == self.poison {
                return Err(CoreError::storage(row.id.clone(), "disk full"));
            }
            self.inner.apply_remote(row)
        }
        fn mark_pushed(&self, id: &str, version: u64) -> Result<(), CoreError> {
            self.inner.mark_pushed(id, version)
        }
        fn register_listener(&self, listener: MutationListener) -> ListenerId {
            self.inner.register_listener(listener)
        }
        fn unregister_listener(&self, id: ListenerId) {
            self.inner.unregister_listener(id)
        }
    }

    #[test]
    fn local_write_failure_aborts_the_row_not_the_batch() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(VersionedStore::new());
        let failing = Arc::new(FailingCatalog {
            inner: Arc::clone(&store),
            poison: "r2".into(),
        });
        let gateway = RemoteGateway::new(
            InMemoryTransport::new(),
            inventory_schema(),
            GatewayConfig::default(),
        );
        let outbox = OutboxQueue::open(dir.path().join("outbox.jsonl")).unwrap();
        let ctx = SyncContext::new(failing as Arc<dyn Catalog>, gateway, outbox);

        let rows: Vec<RemoteRow> = ["r1", "r2", "r3"]
            .iter()
            .map(|id| remote_from(&typed_row(id, "x", 1.0)))
            .collect();
        ctx.gateway.upsert(&rows).unwrap();

        let report = PullEngine::from_context(&ctx).run().unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(report.failed_rows, 1);
        assert!(store.fetch_row("r1").unwrap().is_some());
        assert!(store.fetch_row("r2").unwrap().is_none());
        assert!(store.fetch_row("r3").unwrap().is_some());
    }
}
