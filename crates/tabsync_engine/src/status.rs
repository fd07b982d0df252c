//! Per-cycle status reporting.

use chrono::{DateTime, Utc};

/// What a completed cycle actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleAction {
    /// Nothing to do; no remote writes were issued.
    Noop,
    /// Data moved in at least one direction.
    Synced,
    /// The cycle failed on a remote error; queued work is preserved.
    Offline,
    /// Sync is not configured; no remote call was attempted.
    Disabled,
}

/// Transient status value published after each cycle.
///
/// Rebuilt every cycle and handed to the status sink; never persisted.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    /// Whether the last cycle reached the remote store.
    pub online: bool,
    /// Number of dirty rows still awaiting push.
    pub pending: usize,
    /// Completion time of the last successful cycle.
    pub last_sync: Option<DateTime<Utc>>,
    /// Conflicts newly detected by this cycle.
    pub new_conflicts: usize,
    /// What the cycle did.
    pub action: CycleAction,
    /// Human-readable summary, when there is something to say.
    pub message: Option<String>,
    /// Error rendering for offline/disabled cycles.
    pub error: Option<String>,
}

impl SyncStatus {
    /// Creates a status for a cycle that never reached the remote.
    pub fn disabled(reason: impl Into<String>, pending: usize) -> Self {
        Self {
            online: false,
            pending,
            last_sync: None,
            new_conflicts: 0,
            action: CycleAction::Disabled,
            message: Some(reason.into()),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_status_shape() {
        let status = SyncStatus::disabled("credentials", 3);
        assert!(!status.online);
        assert_eq!(status.action, CycleAction::Disabled);
        assert_eq!(status.pending, 3);
        assert_eq!(status.message.as_deref(), Some("credentials"));
        assert!(status.error.is_none());
    }
}
