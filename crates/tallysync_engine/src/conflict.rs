//! Conflict tracking.
//!
//! Resolution is two-phase: the manager records disagreements and the
//! decisions taken for them, but never writes a resolved value into the
//! cache. Callers turn a decision into a write with
//! [`ConflictManager::resolution_patch`] and apply it themselves, usually
//! through the mutation coordinator.

use crate::clock::Clock;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tallysync_protocol::{
    Conflict, ConflictEntry, ConflictPolicy, ConflictResolution, RecordId, RecordPatch,
};
use tracing::{debug, info};

/// Tracks field-level conflicts between local and server values.
pub struct ConflictManager {
    conflicts: RwLock<Arc<Vec<Conflict>>>,
    clock: Arc<dyn Clock>,
}

impl ConflictManager {
    /// Creates an empty manager.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            conflicts: RwLock::new(Arc::new(Vec::new())),
            clock,
        }
    }

    /// Records a conflict, replacing any entry with the same identity.
    ///
    /// The stored conflict is always unresolved and stamped with the current
    /// time.
    pub fn add_conflict(&self, entry: ConflictEntry) -> Conflict {
        let conflict = Conflict::from_entry(entry, self.clock.now());
        let mut guard = self.conflicts.write();
        let mut next: Vec<Conflict> = guard
            .iter()
            .filter(|c| !c.is_for(&conflict.record_id, &conflict.field))
            .cloned()
            .collect();
        let replaced = next.len() < guard.len();
        next.push(conflict.clone());
        *guard = Arc::new(next);

        debug!(
            record_id = %conflict.record_id,
            field = %conflict.field,
            replaced,
            "conflict recorded"
        );
        conflict
    }

    /// Marks the conflict `(record_id, field)` as resolved.
    ///
    /// Returns the resolved conflict, or `None` if no such conflict exists.
    /// The record itself is not modified.
    pub fn resolve_conflict(
        &self,
        record_id: &RecordId,
        field: &str,
        policy: ConflictPolicy,
        merged_value: Option<Value>,
    ) -> Option<Conflict> {
        let resolution = ConflictResolution {
            policy,
            merged_value,
        };
        let mut guard = self.conflicts.write();
        let index = guard.iter().position(|c| c.is_for(record_id, field))?;
        let resolved = guard[index].resolved_with(resolution);

        let mut next = guard.to_vec();
        next[index] = resolved.clone();
        *guard = Arc::new(next);

        info!(%record_id, field, %policy, "conflict resolved");
        Some(resolved)
    }

    /// Removes resolved conflicts and returns how many were removed.
    pub fn clear_resolved_conflicts(&self) -> usize {
        let mut guard = self.conflicts.write();
        let next: Vec<Conflict> = guard.iter().filter(|c| !c.resolved).cloned().collect();
        let removed = guard.len() - next.len();
        *guard = Arc::new(next);
        removed
    }

    /// Removes every conflict.
    pub fn clear_all_conflicts(&self) {
        *self.conflicts.write() = Arc::new(Vec::new());
    }

    /// Returns a snapshot of every tracked conflict.
    pub fn conflicts(&self) -> Arc<Vec<Conflict>> {
        Arc::clone(&self.conflicts.read())
    }

    /// Returns the conflicts still awaiting a decision.
    pub fn unresolved_conflicts(&self) -> Vec<Conflict> {
        self.conflicts
            .read()
            .iter()
            .filter(|c| !c.resolved)
            .cloned()
            .collect()
    }

    /// Returns true if any conflict awaits a decision.
    pub fn has_unresolved_conflicts(&self) -> bool {
        self.conflicts.read().iter().any(|c| !c.resolved)
    }

    /// Returns the conflicts of one record.
    pub fn conflicts_for(&self, record_id: &RecordId) -> Vec<Conflict> {
        self.conflicts
            .read()
            .iter()
            .filter(|c| &c.record_id == record_id)
            .cloned()
            .collect()
    }

    /// Builds the patch that applies a recorded decision.
    ///
    /// Returns `None` if the conflict is unknown or unresolved.
    pub fn resolution_patch(&self, record_id: &RecordId, field: &str) -> Option<RecordPatch> {
        let guard = self.conflicts.read();
        let conflict = guard.iter().find(|c| c.is_for(record_id, field))?;
        let value = conflict.resolved_value()?;
        Some(RecordPatch::new().set(field, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::time::Duration;

    fn manager() -> (ConflictManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        (ConflictManager::new(clock.clone()), clock)
    }

    #[test]
    fn add_then_resolve() {
        let (manager, _) = manager();
        manager.add_conflict(ConflictEntry::new("1", "count", 100, 150));
        assert_eq!(manager.unresolved_conflicts().len(), 1);
        assert!(manager.has_unresolved_conflicts());

        let resolved = manager
            .resolve_conflict(&RecordId::new("1"), "count", ConflictPolicy::Server, None)
            .unwrap();
        assert!(resolved.resolved);
        assert!(!manager.has_unresolved_conflicts());
        assert!(manager.unresolved_conflicts().is_empty());
        assert_eq!(manager.conflicts().len(), 1);
    }

    #[test]
    fn same_identity_replaces() {
        let (manager, clock) = manager();
        manager.add_conflict(ConflictEntry::new("1", "count", 100, 150));
        clock.advance(Duration::from_secs(5));
        manager.add_conflict(ConflictEntry::new("1", "count", 110, 160));

        let all = manager.conflicts();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].server_value, json!(110));
        assert_eq!(all[0].client_value, json!(160));
        assert_eq!(all[0].timestamp, clock.now());
    }

    #[test]
    fn re_adding_a_resolved_conflict_reopens_it() {
        let (manager, _) = manager();
        manager.add_conflict(ConflictEntry::new("1", "count", 100, 150));
        manager.resolve_conflict(&RecordId::new("1"), "count", ConflictPolicy::Client, None);
        manager.add_conflict(ConflictEntry::new("1", "count", 120, 150));

        assert!(manager.has_unresolved_conflicts());
        assert_eq!(manager.conflicts().len(), 1);
    }

    #[test]
    fn resolving_unknown_conflict_returns_none() {
        let (manager, _) = manager();
        assert!(manager
            .resolve_conflict(&RecordId::new("9"), "count", ConflictPolicy::Server, None)
            .is_none());
    }

    #[test]
    fn clearing() {
        let (manager, _) = manager();
        manager.add_conflict(ConflictEntry::new("1", "count", 1, 2));
        manager.add_conflict(ConflictEntry::new("2", "count", 3, 4));
        manager.resolve_conflict(&RecordId::new("1"), "count", ConflictPolicy::Server, None);

        assert_eq!(manager.clear_resolved_conflicts(), 1);
        assert_eq!(manager.conflicts().len(), 1);
        assert_eq!(manager.conflicts_for(&RecordId::new("2")).len(), 1);

        manager.clear_all_conflicts();
        assert!(manager.conflicts().is_empty());
    }

    #[test]
    fn snapshots_are_not_affected_by_later_writes() {
        let (manager, _) = manager();
        manager.add_conflict(ConflictEntry::new("1", "count", 1, 2));
        let before = manager.conflicts();
        manager.resolve_conflict(&RecordId::new("1"), "count", ConflictPolicy::Server, None);

        assert!(!before[0].resolved);
        assert!(manager.conflicts()[0].resolved);
    }

    #[test]
    fn resolution_patch_uses_decision() {
        let (manager, _) = manager();
        manager.add_conflict(ConflictEntry::new("1", "count", 100, 150));
        assert!(manager
            .resolution_patch(&RecordId::new("1"), "count")
            .is_none());

        manager.resolve_conflict(
            &RecordId::new("1"),
            "count",
            ConflictPolicy::Merge,
            Some(json!(125)),
        );
        let patch = manager
            .resolution_patch(&RecordId::new("1"), "count")
            .unwrap();
        assert_eq!(patch.fields.get("count"), Some(&json!(125)));
    }
}
