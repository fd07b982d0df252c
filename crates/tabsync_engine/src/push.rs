//! Push pass: upload local dirty rows.

use crate::backoff::BackoffController;
use crate::conflict::{
    copies_differ, materialize, remote_advanced, Conflict, ConflictLog, ConflictSource,
};
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::outbox::{JobOp, OutboxQueue, SyncJob};
use crate::resolver::{ConflictResolver, Resolution};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tabsync_core::{Catalog, Row};
use tabsync_gateway::{RemoteGateway, RemoteRow, TableTransport};
use tracing::{debug, warn};

/// Outcome of one push pass.
#[derive(Debug, Clone, Default)]
pub struct PushReport {
    /// Rows upserted remotely.
    pub pushed: usize,
    /// Rows removed remotely.
    pub deleted: usize,
    /// True conflicts detected while preparing the batch.
    pub conflicts: usize,
    /// Conflicts resolved by policy this pass.
    pub resolved: usize,
    /// Conflicts left unresolved for a later cycle.
    pub unresolved: usize,
    /// Rows withheld from the batch by a `Skip` disposition; the pull pass
    /// must leave them to a later cycle as well.
    pub held_back: Vec<String>,
    /// Retries spent on remote batches.
    pub retries: u32,
}

/// Uploads local changes: coalesced outbox jobs plus the dirty row scan.
///
/// The outbox is the durable intent ledger; the version counters are the
/// truth. A dirty row whose queue entry was lost still pushes, and a queue
/// entry whose row is clean again costs nothing.
///
/// Before uploading, every dirty row is checked against the remote copy:
/// a remote that advanced past our last pushed version is a true conflict
/// and goes through the resolver instead of being silently overwritten.
pub struct PushEngine<T: TableTransport> {
    catalog: Arc<dyn Catalog>,
    gateway: Arc<RemoteGateway<T>>,
    outbox: Arc<OutboxQueue>,
    conflicts: Arc<ConflictLog>,
    resolver: Arc<ConflictResolver>,
    backoff: BackoffController,
}

impl<T: TableTransport> PushEngine<T> {
    /// Builds the engine from shared context.
    pub fn from_context(ctx: &SyncContext<T>) -> Self {
        Self {
            catalog: Arc::clone(&ctx.catalog),
            gateway: Arc::clone(&ctx.gateway),
            outbox: Arc::clone(&ctx.outbox),
            conflicts: Arc::clone(&ctx.conflicts),
            resolver: Arc::clone(&ctx.resolver),
            backoff: ctx.config.retry.controller(),
        }
    }

    /// Runs one push pass.
    ///
    /// On success the pushed rows are marked at the version actually sent
    /// and the covered outbox entries are removed. On exhausted retries
    /// everything stays queued and dirty; no partial `mark_pushed`.
    pub fn run(&self) -> SyncResult<PushReport> {
        let mut report = PushReport::default();

        let jobs = self.outbox.snapshot()?;
        let mut cutoff = 0u64;
        let mut latest: BTreeMap<String, SyncJob> = BTreeMap::new();
        for job in jobs {
            cutoff = cutoff.max(job.seq);
            if job.row_id.trim().is_empty() {
                warn!(seq = job.seq, "dropping outbox job without identifier");
                continue;
            }
            latest.insert(job.row_id.clone(), job);
        }

        let delete_ids: Vec<String> = latest
            .values()
            .filter(|job| job.op == JobOp::Delete)
            .map(|job| job.row_id.clone())
            .collect();

        let dirty = self.catalog.dirty_rows()?;
        let candidates: Vec<Row> = dirty
            .into_iter()
            .filter(|row| !delete_ids.contains(&row.id))
            .collect();

        // Nothing to send: skip the remote read entirely.
        if candidates.is_empty() && delete_ids.is_empty() {
            if cutoff > 0 {
                self.outbox.acknowledge_up_to(cutoff)?;
            }
            return Ok(report);
        }

        let (remote_rows, read_retries) = self
            .backoff
            .retry("remote read", || {
                self.gateway.fetch_all().map_err(SyncError::from)
            })?;
        report.retries += read_retries;
        let remote_index: HashMap<&str, &RemoteRow> = remote_rows
            .iter()
            .map(|row| (row.id.as_str(), row))
            .collect();

        let to_push = self.gate_candidates(candidates, &remote_index, &mut report)?;

        let schema = self.gateway.schema();
        let batch: Vec<RemoteRow> = to_push
            .iter()
            .map(|row| RemoteRow::from_local(row, schema))
            .collect();
        let sent_versions: Vec<(String, u64)> = to_push
            .iter()
            .map(|row| (row.id.clone(), row.version))
            .collect();

        if !batch.is_empty() {
            let (_, spent) = self.backoff.retry("remote upsert", || {
                self.gateway.upsert(&batch).map_err(SyncError::from)
            })?;
            report.retries += spent;
        }
        if !delete_ids.is_empty() {
            let (_, spent) = self.backoff.retry("remote delete", || {
                self.gateway.delete(&delete_ids).map_err(SyncError::from)
            })?;
            report.retries += spent;
        }

        // Only past this point did every remote write succeed.
        for (id, version) in &sent_versions {
            if let Err(error) = self.catalog.mark_pushed(id, *version) {
                if error.is_fatal() {
                    return Err(error.into());
                }
                warn!(row_id = %id, %error, "could not mark row pushed");
            }
        }
        if cutoff > 0 {
            self.outbox.acknowledge_up_to(cutoff)?;
        }

        report.pushed = batch.len();
        report.deleted = delete_ids.len();
        debug!(
            pushed = report.pushed,
            deleted = report.deleted,
            conflicts = report.conflicts,
            retries = report.retries,
            "push pass complete"
        );
        Ok(report)
    }

    /// Splits the dirty candidates into the upload batch and conflicts.
    fn gate_candidates(
        &self,
        candidates: Vec<Row>,
        remote_index: &HashMap<&str, &RemoteRow>,
        report: &mut PushReport,
    ) -> SyncResult<Vec<Row>> {
        let schema = self.gateway.schema();
        let mut to_push = Vec::new();

        for row in candidates {
            let Some(remote) = remote_index.get(row.id.as_str()) else {
                to_push.push(row);
                continue;
            };
            if !remote_advanced(remote, &row) {
                // Remote still shows what we last pushed: safe to overwrite.
                to_push.push(row);
                continue;
            }
            if !copies_differ(&row, remote, schema) {
                // Remote ran ahead but the content is identical; the pull
                // pass fast-forwards our version marker instead.
                debug!(row_id = %row.id, "remote ahead with equal content, not pushing");
                continue;
            }

            // Both sides advanced past the last common version.
            report.conflicts += 1;
            let resolution = self.resolver.resolve(&row, remote);
            let mut conflict = Conflict::between(&row, remote, schema, ConflictSource::Push);
            match resolution {
                Resolution::AcceptLocal => {
                    conflict.resolution = Some(resolution);
                    report.resolved += 1;
                    // Acknowledge the observed remote version, then send the
                    // kept-local content from above it.
                    self.catalog.touch(&row.id, remote.version.unwrap_or(0))?;
                    match self.catalog.fetch_row(&row.id)? {
                        Some(updated) => to_push.push(updated),
                        None => warn!(row_id = %row.id, "row vanished during conflict handling"),
                    }
                }
                Resolution::AcceptRemote => {
                    conflict.resolution = Some(resolution);
                    report.resolved += 1;
                    if let Err(error) =
                        self.catalog.apply_remote(materialize(remote, schema, Some(&row)))
                    {
                        if error.is_fatal() {
                            return Err(error.into());
                        }
                        warn!(row_id = %row.id, %error, "could not apply remote copy");
                        report.held_back.push(row.id.clone());
                    }
                }
                Resolution::Skip => {
                    report.unresolved += 1;
                    report.held_back.push(row.id.clone());
                }
            }
            self.conflicts.record(conflict);
        }

        Ok(to_push)
    }
}
