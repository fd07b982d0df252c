//! Configuration for the sync engine.

use crate::backoff::BackoffController;
use std::time::Duration;

/// Shortest allowed periodic interval; faster polling only hammers the
/// remote quota.
const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub max: Duration,
    /// Total attempts, including the first.
    pub attempts: u32,
}

impl RetryConfig {
    /// Creates a retry configuration.
    pub fn new(base: Duration, max: Duration, attempts: u32) -> Self {
        Self {
            base,
            max,
            attempts,
        }
    }

    /// Creates a configuration that never retries.
    pub fn no_retry() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
            attempts: 1,
        }
    }

    /// Builds the backoff controller for this configuration.
    pub fn controller(&self) -> BackoffController {
        BackoffController::new(self.base, self.max, self.attempts)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(16), 5)
    }
}

/// Configuration for the scheduler and its cycles.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Periodic cycle interval.
    pub sync_interval: Duration,
    /// Per-row quiet window applied to local-mutation events.
    pub debounce_window: Duration,
    /// Retry configuration applied around remote batch operations.
    pub retry: RetryConfig,
    /// How long a cooperative stop waits for the in-flight cycle.
    pub stop_timeout: Duration,
}

impl SyncConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            sync_interval: Duration::from_secs(60),
            debounce_window: Duration::from_secs(3),
            retry: RetryConfig::default(),
            stop_timeout: Duration::from_secs(5),
        }
    }

    /// Sets the periodic interval, clamped to the minimum.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval.max(MIN_SYNC_INTERVAL);
        self
    }

    /// Sets the periodic interval without the production clamp.
    ///
    /// Intended for tests that need sub-second cycles.
    pub fn with_raw_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the per-row debounce window.
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the cooperative stop timeout.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the remote side can be reached at all, checked explicitly
/// before any network operation.
///
/// These are expected, common states and deliberately not errors: a
/// missing credential file must not consume a retry budget or mark the
/// engine offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteAvailability {
    /// Remote calls may proceed.
    Available,
    /// A required component or setting is absent.
    MissingDependency {
        /// Human-readable reason code.
        reason: String,
    },
    /// Credentials exist but are unusable.
    CredentialError {
        /// Human-readable reason code.
        reason: String,
    },
}

impl RemoteAvailability {
    /// Returns true when remote calls may proceed.
    pub fn is_available(&self) -> bool {
        matches!(self, RemoteAvailability::Available)
    }

    /// The reason code for an unavailable state.
    pub fn reason(&self) -> Option<&str> {
        match self {
            RemoteAvailability::Available => None,
            RemoteAvailability::MissingDependency { reason }
            | RemoteAvailability::CredentialError { reason } => Some(reason),
        }
    }
}
