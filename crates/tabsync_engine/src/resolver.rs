//! Conflict disposition policy.

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tabsync_core::Row;
use tabsync_gateway::RemoteRow;
use tracing::warn;

/// Disposition of a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the local row; re-mark it dirty so it is pushed again.
    AcceptLocal,
    /// Apply the remote row through the muted write path.
    AcceptRemote,
    /// Take no action; the conflict stays unresolved and is retried on a
    /// subsequent cycle.
    Skip,
}

/// Callback deciding a conflict from full local and remote snapshots.
pub type ResolutionPolicy = Box<dyn Fn(&Row, &RemoteRow) -> Resolution + Send + Sync>;

/// Decides the disposition of detected conflicts.
///
/// Without an installed policy every conflict resolves to
/// [`Resolution::AcceptLocal`]: local edits are never silently discarded.
/// A policy that panics is downgraded to [`Resolution::Skip`].
pub struct ConflictResolver {
    policy: Option<ResolutionPolicy>,
}

impl ConflictResolver {
    /// Creates a resolver with the default accept-local policy.
    pub fn new() -> Self {
        Self { policy: None }
    }

    /// Creates a resolver delegating to the given policy callback.
    pub fn with_policy(policy: ResolutionPolicy) -> Self {
        Self {
            policy: Some(policy),
        }
    }

    /// Returns the disposition for one conflict.
    pub fn resolve(&self, local: &Row, remote: &RemoteRow) -> Resolution {
        let Some(policy) = &self.policy else {
            return Resolution::AcceptLocal;
        };
        match catch_unwind(AssertUnwindSafe(|| policy(local, remote))) {
            Ok(resolution) => resolution,
            Err(_) => {
                warn!(row_id = %local.id, "conflict policy panicked, skipping row");
                Resolution::Skip
            }
        }
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tabsync_core::inventory_schema;

    fn pair() -> (Row, RemoteRow) {
        let local = Row::new("r1", BTreeMap::new());
        let remote = RemoteRow::from_local(&local, &inventory_schema());
        (local, remote)
    }

    #[test]
    fn default_policy_keeps_local() {
        let (local, remote) = pair();
        let resolver = ConflictResolver::new();
        assert_eq!(resolver.resolve(&local, &remote), Resolution::AcceptLocal);
    }

    #[test]
    fn installed_policy_decides() {
        let (local, remote) = pair();
        let resolver =
            ConflictResolver::with_policy(Box::new(|_, _| Resolution::AcceptRemote));
        assert_eq!(resolver.resolve(&local, &remote), Resolution::AcceptRemote);
    }

    #[test]
    fn panicking_policy_downgrades_to_skip() {
        let (local, remote) = pair();
        let resolver = ConflictResolver::with_policy(Box::new(|_, _| {
            panic!("interactive dialog went away")
        }));
        assert_eq!(resolver.resolve(&local, &remote), Resolution::Skip);
    }
}
