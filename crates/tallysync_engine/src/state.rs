//! Scheduler status and lifecycle primitives.

use crate::error::{EngineResult, ErrorCategory, SyncError};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tallysync_protocol::SyncResult;

/// Observable state of the sync scheduler.
///
/// Owned by the scheduler; everyone else reads snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
    /// Whether the scheduler is running.
    pub is_active: bool,
    /// When the last attempt finished.
    pub last_sync: Option<DateTime<Utc>>,
    /// When the next timer-driven attempt is due.
    pub next_sync: Option<DateTime<Utc>>,
    /// Whether an attempt is in flight.
    pub is_syncing: bool,
    /// Message of the last failure, cleared by a success.
    pub error: Option<String>,
    /// Family of the last failure.
    pub error_category: Option<ErrorCategory>,
    /// Consecutive failed attempts.
    pub retry_count: u32,
    /// Mutations waiting for the server.
    pub queue_length: usize,
}

impl SyncStatus {
    /// Returns a recovery hint for the current error, if any.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        self.error_category.map(|c| c.recovery_suggestion())
    }

    /// Returns true once every automatic retry has been spent.
    ///
    /// The first failure is not a retry, so `max_retries` retries have run
    /// when `retry_count` exceeds `max_retries`.
    pub fn retries_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count > max_retries
    }

    /// Returns true if the scheduler can begin an attempt.
    pub fn can_start_sync(&self) -> bool {
        !self.is_syncing
    }
}

/// Environment events that trigger or pause syncing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvironmentSignal {
    /// Connectivity restored.
    Online,
    /// Connectivity lost.
    Offline,
    /// The application regained focus.
    FocusGained,
    /// The application lost focus.
    FocusLost,
}

/// What a sync trigger ended up doing.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAttempt {
    /// Another attempt was in flight, or the scheduler is shut down.
    Skipped,
    /// The server accepted the sync.
    Completed(SyncResult),
    /// The attempt failed with the given message.
    Failed(String),
}

impl SyncAttempt {
    /// Returns true if the attempt reached the server and succeeded.
    pub fn is_completed(&self) -> bool {
        matches!(self, SyncAttempt::Completed(_))
    }

    /// Converts the attempt into a result; a skipped attempt is `Ok(None)`.
    pub fn into_result(self) -> EngineResult<Option<SyncResult>> {
        match self {
            SyncAttempt::Skipped => Ok(None),
            SyncAttempt::Completed(result) => Ok(Some(result)),
            SyncAttempt::Failed(message) => Err(SyncError::ServerError(message)),
        }
    }
}

/// Shared flag telling in-flight work whether its owner still exists.
///
/// Checked after every suspension point before state is touched.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    /// Creates a live flag.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Returns true until [`shut_down`](Self::shut_down) is called.
    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fails with [`SyncError::ShutDown`] once shut down.
    pub fn ensure_alive(&self) -> EngineResult<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(SyncError::ShutDown)
        }
    }

    /// Marks the owner as torn down. Irreversible.
    pub fn shut_down(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}
