//! Configuration for the sync engine.

use crate::cache::CacheKey;
use std::time::Duration;
use tallysync_protocol::{ConflictPolicy, SyncOptions};

/// Name of the default record collection.
pub const DEFAULT_ROOT: &str = "records";

/// Configuration for the real-time sync scheduler.
#[derive(Debug, Clone)]
pub struct RealTimeSyncConfig {
    /// Whether `start_sync` activates the scheduler at all.
    pub enabled: bool,
    /// Period of the repeating sync timer.
    pub sync_interval: Duration,
    /// Delay before an automatic retry after a failure.
    pub retry_interval: Duration,
    /// Maximum number of automatic retries.
    pub max_retries: u32,
    /// Sync once when focus is regained.
    pub sync_on_focus: bool,
    /// Resume syncing on an online transition.
    pub sync_on_online: bool,
    /// Conflict policy passed with timer-driven syncs.
    pub conflict_resolution: ConflictPolicy,
    /// Views invalidated after a sync that changed data.
    pub invalidation_keys: Vec<CacheKey>,
    /// Run a consistency check after syncs processing at least this many records.
    pub consistency_check_threshold: Option<u64>,
}

impl RealTimeSyncConfig {
    /// Creates a configuration with the documented defaults.
    pub fn new() -> Self {
        let root = CacheKey::list(DEFAULT_ROOT);
        Self {
            enabled: true,
            sync_interval: Duration::from_secs(5 * 60),
            retry_interval: Duration::from_secs(30),
            max_retries: 3,
            sync_on_focus: true,
            sync_on_online: true,
            conflict_resolution: ConflictPolicy::Server,
            invalidation_keys: vec![root.summary(), root],
            consistency_check_threshold: None,
        }
    }

    /// Enables or disables the scheduler.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the sync interval.
    #[must_use]
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the retry interval.
    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Sets the maximum number of automatic retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets whether focus regain triggers a sync.
    #[must_use]
    pub fn with_sync_on_focus(mut self, value: bool) -> Self {
        self.sync_on_focus = value;
        self
    }

    /// Sets whether an online transition resumes syncing.
    #[must_use]
    pub fn with_sync_on_online(mut self, value: bool) -> Self {
        self.sync_on_online = value;
        self
    }

    /// Sets the conflict policy.
    #[must_use]
    pub fn with_conflict_resolution(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_resolution = policy;
        self
    }

    /// Sets the views invalidated after data-changing syncs.
    #[must_use]
    pub fn with_invalidation_keys(mut self, keys: Vec<CacheKey>) -> Self {
        self.invalidation_keys = keys;
        self
    }

    /// Enables the post-sync consistency check.
    #[must_use]
    pub fn with_consistency_check_threshold(mut self, records: u64) -> Self {
        self.consistency_check_threshold = Some(records);
        self
    }

    /// Options used by timer and signal driven syncs.
    pub fn default_options(&self) -> SyncOptions {
        SyncOptions::default().with_conflict_resolution(self.conflict_resolution)
    }
}

impl Default for RealTimeSyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the optimistic mutation coordinator.
#[derive(Debug, Clone)]
pub struct MutationConfig {
    /// Canonical list view holding every record.
    pub root: CacheKey,
    /// Derived views invalidated after a committed mutation.
    pub summary_keys: Vec<CacheKey>,
}

impl MutationConfig {
    /// Creates a configuration for the given canonical list.
    pub fn new(root: CacheKey) -> Self {
        let summary_keys = vec![root.summary()];
        Self { root, summary_keys }
    }

    /// Sets the derived views invalidated after commits.
    #[must_use]
    pub fn with_summary_keys(mut self, keys: Vec<CacheKey>) -> Self {
        self.summary_keys = keys;
        self
    }
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self::new(CacheKey::list(DEFAULT_ROOT))
    }
}
