//! Optimistic mutation coordinator.
//!
//! Every mutation runs the same lifecycle:
//! 1. Snapshot the affected records in every list view of the collection
//! 2. Apply the tentative change to the cache before the network call
//! 3. Issue the transport call
//! 4. On success, reconcile the cache with the server's record
//! 5. On failure, restore the snapshot and return the error
//!
//! Mutations targeting the same record id are serialized in issuance order
//! through a per-record FIFO lock. Mutations on different records run
//! independently with their own snapshots.

use crate::cache::{patch, CacheKey, LocalCache};
use crate::clock::Clock;
use crate::config::MutationConfig;
use crate::error::{EngineResult, SyncError};
use crate::state::Liveness;
use crate::transport::{Transport, WriteRequest};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tallysync_protocol::{FieldMap, Record, RecordId, RecordPatch};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A change requested by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Create a record.
    Create {
        /// Initial fields.
        fields: FieldMap,
    },
    /// Merge fields into an existing record.
    Update {
        /// Target record.
        id: RecordId,
        /// Fields to overwrite.
        patch: RecordPatch,
    },
    /// Delete a record.
    Delete {
        /// Target record.
        id: RecordId,
    },
}

impl Mutation {
    /// Returns the targeted record, if the record already exists.
    pub fn target(&self) -> Option<&RecordId> {
        match self {
            Mutation::Create { .. } => None,
            Mutation::Update { id, .. } | Mutation::Delete { id } => Some(id),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Mutation::Create { .. } => "create",
            Mutation::Update { .. } => "update",
            Mutation::Delete { .. } => "delete",
        }
    }
}

/// The committed result of a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The server's version of the created record.
    Created(Record),
    /// The server's version of the updated record.
    Updated(Record),
    /// The id of the deleted record.
    Deleted(RecordId),
}

/// State needed to undo a tentative change.
enum Snapshot {
    Create {
        temp_id: RecordId,
        root_existed: bool,
    },
    Update {
        previous: Vec<(CacheKey, Record)>,
    },
    Delete {
        removed: Vec<(CacheKey, usize, Record)>,
    },
}

/// Owns a tentative change until it is committed or rolled back.
///
/// Dropping it with the change still pending, for example when the caller
/// abandons the mutation during the server call, rolls the change back.
/// After teardown nothing is restored.
struct Tentative<'a, T: Transport, C: LocalCache> {
    coordinator: &'a MutationCoordinator<T, C>,
    kind: &'static str,
    snapshot: Option<Snapshot>,
}

impl<T: Transport, C: LocalCache> Tentative<'_, T, C> {
    fn take(&mut self) -> Option<Snapshot> {
        self.snapshot.take()
    }
}

impl<T: Transport, C: LocalCache> Drop for Tentative<'_, T, C> {
    fn drop(&mut self) {
        let Some(snapshot) = self.snapshot.take() else {
            return;
        };
        if !self.coordinator.liveness.is_alive() {
            return;
        }
        self.coordinator.rollback(snapshot);
        warn!(kind = self.kind, "mutation abandoned, rolled back");
    }
}

/// Holds a record's queue position and frees its map entry when dropped.
struct RecordTurn<'a, T: Transport, C: LocalCache> {
    coordinator: &'a MutationCoordinator<T, C>,
    id: RecordId,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<T: Transport, C: LocalCache> Drop for RecordTurn<'_, T, C> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.coordinator.release_lock(&self.id, &self.lock);
    }
}

/// Decrements the pending counter when dropped.
struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Applies tentative changes and commits or rolls them back.
pub struct MutationCoordinator<T: Transport, C: LocalCache> {
    transport: Arc<T>,
    cache: Arc<C>,
    clock: Arc<dyn Clock>,
    config: MutationConfig,
    liveness: Liveness,
    record_locks: Mutex<HashMap<RecordId, Arc<AsyncMutex<()>>>>,
    pending: Arc<AtomicUsize>,
}

impl<T: Transport, C: LocalCache> MutationCoordinator<T, C> {
    /// Creates a coordinator.
    pub fn new(
        transport: Arc<T>,
        cache: Arc<C>,
        clock: Arc<dyn Clock>,
        config: MutationConfig,
        liveness: Liveness,
    ) -> Self {
        Self {
            transport,
            cache,
            clock,
            config,
            liveness,
            record_locks: Mutex::new(HashMap::new()),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of mutations currently waiting for the server.
    pub fn pending_mutations(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Shared handle to the pending counter.
    pub fn pending_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.pending)
    }

    /// Creates a record.
    pub async fn create(&self, fields: FieldMap) -> EngineResult<Record> {
        match self.perform_mutation(Mutation::Create { fields }).await? {
            MutationOutcome::Created(record) => Ok(record),
            other => Err(unexpected_outcome(other)),
        }
    }

    /// Updates a record.
    pub async fn update(&self, id: RecordId, patch: RecordPatch) -> EngineResult<Record> {
        match self.perform_mutation(Mutation::Update { id, patch }).await? {
            MutationOutcome::Updated(record) => Ok(record),
            other => Err(unexpected_outcome(other)),
        }
    }

    /// Deletes a record.
    pub async fn delete(&self, id: RecordId) -> EngineResult<()> {
        self.perform_mutation(Mutation::Delete { id }).await?;
        Ok(())
    }

    /// Runs one mutation through the optimistic lifecycle.
    ///
    /// On failure the cache has already been restored when the error is
    /// returned.
    pub async fn perform_mutation(&self, mutation: Mutation) -> EngineResult<MutationOutcome> {
        self.liveness.ensure_alive()?;

        let mut turn = mutation.target().map(|id| RecordTurn {
            coordinator: self,
            id: id.clone(),
            lock: self.record_lock(id),
            guard: None,
        });
        if let Some(turn) = turn.as_mut() {
            turn.guard = Some(Arc::clone(&turn.lock).lock_owned().await);
        }

        self.liveness.ensure_alive()?;
        let _pending = PendingGuard::new(&self.pending);
        let result = self.run(mutation).await;
        drop(turn);
        result
    }

    async fn run(&self, mutation: Mutation) -> EngineResult<MutationOutcome> {
        let kind = mutation.kind();
        let mut tentative = Tentative {
            coordinator: self,
            kind,
            snapshot: Some(self.apply_tentative(&mutation)?),
        };
        debug!(kind, "tentative change applied");

        let response = match &mutation {
            Mutation::Create { fields } => self
                .transport
                .write(WriteRequest::Create {
                    fields: fields.clone(),
                })
                .await
                .map(MutationOutcome::Created),
            Mutation::Update { id, patch } => self
                .transport
                .write(WriteRequest::Update {
                    id: id.clone(),
                    patch: patch.clone(),
                })
                .await
                .map(MutationOutcome::Updated),
            Mutation::Delete { id } => self
                .transport
                .delete(id)
                .await
                .map(|()| MutationOutcome::Deleted(id.clone())),
        };

        // A torn-down session must not be written to.
        self.liveness.ensure_alive()?;
        let Some(snapshot) = tentative.take() else {
            return Err(SyncError::Cancelled);
        };

        match response {
            Ok(outcome) => {
                self.reconcile(&snapshot, &outcome);
                info!(kind, "mutation committed");
                Ok(outcome)
            }
            Err(error) => {
                self.rollback(snapshot);
                warn!(kind, %error, "mutation rolled back");
                Err(error)
            }
        }
    }

    fn apply_tentative(&self, mutation: &Mutation) -> EngineResult<Snapshot> {
        let root = &self.config.root;
        let now = self.clock.now();

        match mutation {
            Mutation::Create { fields } => {
                let temp_id = RecordId::temporary(Uuid::new_v4());
                let root_existed = self.cache.get(root).is_some();
                let tentative = Record::new(temp_id.clone(), fields.clone(), now);
                patch::upsert_record(self.cache.as_ref(), root, tentative);
                Ok(Snapshot::Create {
                    temp_id,
                    root_existed,
                })
            }
            Mutation::Update { id, patch: changes } => {
                if changes.is_empty() {
                    return Err(SyncError::Validation(format!("empty patch for record {id}")));
                }
                let previous: Vec<(CacheKey, Record)> = self
                    .cache
                    .list_snapshot(root)
                    .into_iter()
                    .filter_map(|(key, list)| {
                        list.iter()
                            .find(|r| &r.id == id)
                            .map(|r| (key.clone(), r.clone()))
                    })
                    .collect();
                if previous.is_empty() {
                    return Err(SyncError::RecordNotFound(id.clone()));
                }
                for (key, old) in &previous {
                    patch::replace_record(self.cache.as_ref(), key, id, old.patched(changes, now));
                }
                Ok(Snapshot::Update { previous })
            }
            Mutation::Delete { id } => {
                let removed: Vec<(CacheKey, usize, Record)> = self
                    .cache
                    .list_snapshot(root)
                    .into_iter()
                    .filter_map(|(key, _)| {
                        patch::remove_record(self.cache.as_ref(), &key, id)
                            .map(|(index, record)| (key, index, record))
                    })
                    .collect();
                if removed.is_empty() {
                    return Err(SyncError::RecordNotFound(id.clone()));
                }
                Ok(Snapshot::Delete { removed })
            }
        }
    }

    fn reconcile(&self, snapshot: &Snapshot, outcome: &MutationOutcome) {
        let root = &self.config.root;
        match (snapshot, outcome) {
            (Snapshot::Create { temp_id, .. }, MutationOutcome::Created(record)) => {
                // Matched by placeholder id, never by content.
                if !patch::replace_record(self.cache.as_ref(), root, temp_id, record.clone()) {
                    patch::upsert_record(self.cache.as_ref(), root, record.clone());
                }
            }
            (Snapshot::Update { previous }, MutationOutcome::Updated(record)) => {
                for (key, _) in previous {
                    patch::replace_record(self.cache.as_ref(), key, &record.id, record.clone());
                }
            }
            _ => {}
        }
        self.cache.invalidate(&self.derived_keys());
    }

    fn rollback(&self, snapshot: Snapshot) {
        let root = &self.config.root;
        match snapshot {
            Snapshot::Create {
                temp_id,
                root_existed,
            } => {
                patch::remove_record(self.cache.as_ref(), root, &temp_id);
                if !root_existed {
                    self.cache.set_patch(root, &mut |current| match current {
                        Some(list) if list.is_empty() => None,
                        other => other,
                    });
                }
            }
            Snapshot::Update { previous } => {
                for (key, old) in previous {
                    let id = old.id.clone();
                    patch::replace_record(self.cache.as_ref(), &key, &id, old);
                }
            }
            Snapshot::Delete { removed } => {
                for (key, index, record) in removed {
                    patch::restore_record(self.cache.as_ref(), &key, index, record);
                }
            }
        }
    }

    /// Derived views of the collection: scoped lists and summaries.
    fn derived_keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .cache
            .list_snapshot(&self.config.root)
            .into_iter()
            .map(|(key, _)| key)
            .filter(|key| !key.is_root_list())
            .collect();
        keys.extend(self.config.summary_keys.iter().cloned());
        keys
    }

    fn record_lock(&self, id: &RecordId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.record_locks.lock();
        Arc::clone(locks.entry(id.clone()).or_default())
    }

    fn release_lock(&self, id: &RecordId, lock: &Arc<AsyncMutex<()>>) {
        let mut locks = self.record_locks.lock();
        // One reference in the map, one held here: nobody else is queued.
        if Arc::strong_count(lock) <= 2 {
            locks.remove(id);
        }
    }
}

fn unexpected_outcome(outcome: MutationOutcome) -> SyncError {
    SyncError::Validation(format!("unexpected mutation outcome: {outcome:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;
    use crate::transport::MockTransport;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    struct Fixture {
        transport: Arc<MockTransport>,
        cache: Arc<MemoryCache>,
        coordinator: MutationCoordinator<MockTransport, MemoryCache>,
        liveness: Liveness,
    }

    fn row(id: &str, count: i64) -> Record {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Record::new(id, FieldMap::new(), at).with_field("count", count)
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(MockTransport::new());
        let cache = Arc::new(MemoryCache::new());
        let root = CacheKey::list("records");
        cache.replace(root.clone(), vec![row("1", 10), row("2", 20)]);
        cache.replace(root.scoped("top"), vec![row("2", 20)]);

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        ));
        let liveness = Liveness::new();
        let coordinator = MutationCoordinator::new(
            transport.clone(),
            cache.clone(),
            clock,
            MutationConfig::new(root),
            liveness.clone(),
        );
        Fixture {
            transport,
            cache,
            coordinator,
            liveness,
        }
    }

    fn root() -> CacheKey {
        CacheKey::list("records")
    }

    #[tokio::test]
    async fn create_replaces_placeholder_with_server_record() {
        let f = fixture();
        let mut fields = FieldMap::new();
        fields.insert("count".into(), json!(5));

        let created = f.coordinator.create(fields).await.unwrap();

        let records = f.cache.records(&root());
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].id, created.id);
        assert!(!records.iter().any(|r| r.id.is_temporary()));
        assert!(f.cache.is_stale(&root().summary()));
        assert!(f.cache.is_stale(&root().scoped("top")));
    }

    #[tokio::test]
    async fn failed_create_restores_cache() {
        let f = fixture();
        f.transport.set_fail_writes(true);
        let before = f.cache.list_snapshot(&root());

        let result = f.coordinator.create(FieldMap::new()).await;

        assert!(result.is_err());
        assert_eq!(f.cache.list_snapshot(&root()), before);
        assert_eq!(f.cache.invalidation_count(), 0);
    }

    #[tokio::test]
    async fn failed_update_restores_every_view() {
        let f = fixture();
        f.transport.set_fail_writes(true);
        let before = f.cache.list_snapshot(&root());

        let result = f
            .coordinator
            .update(RecordId::new("2"), RecordPatch::new().set("count", 99))
            .await;

        assert!(matches!(result, Err(SyncError::ServerError(_))));
        assert_eq!(f.cache.list_snapshot(&root()), before);
    }

    #[tokio::test]
    async fn update_reconciles_every_view() {
        let f = fixture();
        f.transport.set_records(vec![row("2", 20)]);

        let updated = f
            .coordinator
            .update(RecordId::new("2"), RecordPatch::new().set("count", 99))
            .await
            .unwrap();

        assert_eq!(updated.field("count"), Some(&json!(99)));
        for (_, list) in f.cache.list_snapshot(&root()) {
            let record = list.iter().find(|r| r.id == RecordId::new("2")).unwrap();
            assert_eq!(record.field("count"), Some(&json!(99)));
        }
    }

    #[tokio::test]
    async fn failed_delete_restores_positions() {
        let f = fixture();
        f.transport.set_fail_writes(true);
        let before = f.cache.list_snapshot(&root());

        assert!(f.coordinator.delete(RecordId::new("1")).await.is_err());
        assert_eq!(f.cache.list_snapshot(&root()), before);
    }

    #[tokio::test]
    async fn delete_removes_from_every_view() {
        let f = fixture();
        f.coordinator.delete(RecordId::new("2")).await.unwrap();

        for (_, list) in f.cache.list_snapshot(&root()) {
            assert!(list.iter().all(|r| r.id != RecordId::new("2")));
        }
        assert_eq!(f.transport.delete_calls(), 1);
    }

    #[tokio::test]
    async fn unknown_record_is_rejected_before_network() {
        let f = fixture();
        let result = f
            .coordinator
            .update(RecordId::new("404"), RecordPatch::new().set("count", 1))
            .await;

        assert!(matches!(result, Err(SyncError::RecordNotFound(_))));
        assert_eq!(f.transport.write_calls(), 0);

        let result = f
            .coordinator
            .update(RecordId::new("1"), RecordPatch::new())
            .await;
        assert!(matches!(result, Err(SyncError::Validation(_))));
    }

    #[tokio::test]
    async fn shut_down_coordinator_refuses_work() {
        let f = fixture();
        f.liveness.shut_down();

        let result = f.coordinator.delete(RecordId::new("1")).await;
        assert!(matches!(result, Err(SyncError::ShutDown)));
        assert_eq!(f.cache.records(&root()).len(), 2);
    }

    #[tokio::test]
    async fn pending_counter_returns_to_zero() {
        let f = fixture();
        f.coordinator.delete(RecordId::new("1")).await.unwrap();
        assert_eq!(f.coordinator.pending_mutations(), 0);
        assert!(f.coordinator.record_locks.lock().is_empty());
    }
}
