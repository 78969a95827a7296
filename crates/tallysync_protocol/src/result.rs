//! Outcome of one sync attempt.

use crate::conflict::ConflictEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result reported by the transport for one bidirectional sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// Whether the server accepted the sync.
    pub success: bool,
    /// Records examined.
    pub records_processed: u64,
    /// Records added locally or remotely.
    pub records_added: u64,
    /// Records updated locally or remotely.
    pub records_updated: u64,
    /// Records left untouched.
    pub records_skipped: u64,
    /// Field-level disagreements found during the sync.
    #[serde(default)]
    pub conflicts: Vec<ConflictEntry>,
    /// Error messages.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Non-fatal warnings.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// When the sync completed.
    pub synced_at: DateTime<Utc>,
}

impl SyncResult {
    /// Creates an empty successful result.
    pub fn success(synced_at: DateTime<Utc>) -> Self {
        Self {
            success: true,
            records_processed: 0,
            records_added: 0,
            records_updated: 0,
            records_skipped: 0,
            conflicts: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            synced_at,
        }
    }

    /// Creates a failed result carrying the given errors.
    pub fn failure(synced_at: DateTime<Utc>, errors: Vec<String>) -> Self {
        Self {
            success: false,
            errors,
            ..Self::success(synced_at)
        }
    }

    /// Sets the record counters.
    #[must_use]
    pub fn with_counts(mut self, processed: u64, added: u64, updated: u64, skipped: u64) -> Self {
        self.records_processed = processed;
        self.records_added = added;
        self.records_updated = updated;
        self.records_skipped = skipped;
        self
    }

    /// Adds a reported conflict.
    #[must_use]
    pub fn with_conflict(mut self, conflict: ConflictEntry) -> Self {
        self.conflicts.push(conflict);
        self
    }

    /// Returns true if the sync changed any data.
    pub fn changed_data(&self) -> bool {
        self.records_added > 0 || self.records_updated > 0
    }

    /// Joins the error messages into one line.
    pub fn error_message(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join("; "))
        }
    }
}
