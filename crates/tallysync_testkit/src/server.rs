//! An in-memory authoritative store speaking the [`Transport`] contract.
//!
//! Unlike [`tallysync_engine::MockTransport`], which replays scripted
//! answers, the server keeps real state: writes change its records, remote
//! edits made by "other clients" show up in the next sync's counters, and
//! failures can be injected for a number of calls.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tallysync_engine::{Clock, EngineResult, SyncError, SystemClock, Transport, WriteRequest};
use tallysync_protocol::{ConflictEntry, Record, RecordId, SyncOptions, SyncResult};

#[derive(Default)]
struct Changes {
    added: u64,
    updated: u64,
}

/// Simulated remote store.
pub struct InMemoryServer {
    records: RwLock<BTreeMap<RecordId, Record>>,
    clock: Arc<dyn Clock>,
    sync_failures: Mutex<VecDeque<String>>,
    write_failures: Mutex<VecDeque<String>>,
    rejected_syncs: Mutex<VecDeque<String>>,
    conflicts: Mutex<Vec<ConflictEntry>>,
    changes: Mutex<Changes>,
    latency: Mutex<Option<Duration>>,
    next_id: AtomicU64,
    sync_calls: AtomicU64,
    write_calls: AtomicU64,
}

impl InMemoryServer {
    /// Creates an empty server on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty server on `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            clock,
            sync_failures: Mutex::new(VecDeque::new()),
            write_failures: Mutex::new(VecDeque::new()),
            rejected_syncs: Mutex::new(VecDeque::new()),
            conflicts: Mutex::new(Vec::new()),
            changes: Mutex::new(Changes::default()),
            latency: Mutex::new(None),
            next_id: AtomicU64::new(0),
            sync_calls: AtomicU64::new(0),
            write_calls: AtomicU64::new(0),
        }
    }

    /// Seeds records without counting them as changes.
    pub fn seed(&self, records: impl IntoIterator<Item = Record>) {
        let mut stored = self.records.write();
        for record in records {
            stored.insert(record.id.clone(), record);
        }
    }

    /// Simulates another client writing `record`.
    pub fn insert_remote(&self, record: Record) {
        let existed = self
            .records
            .write()
            .insert(record.id.clone(), record)
            .is_some();
        let mut changes = self.changes.lock();
        if existed {
            changes.updated += 1;
        } else {
            changes.added += 1;
        }
    }

    /// Simulates another client deleting a record.
    pub fn remove_remote(&self, id: &RecordId) -> Option<Record> {
        self.records.write().remove(id)
    }

    /// Returns a stored record.
    pub fn record(&self, id: &RecordId) -> Option<Record> {
        self.records.read().get(id).cloned()
    }

    /// Returns every stored record, ordered by id.
    pub fn records(&self) -> Vec<Record> {
        self.records.read().values().cloned().collect()
    }

    /// Makes the next `count` syncs fail at the transport level.
    pub fn fail_next_syncs(&self, count: usize, message: &str) {
        let mut failures = self.sync_failures.lock();
        failures.extend(std::iter::repeat(message.to_string()).take(count));
    }

    /// Makes the next `count` syncs answer with `success: false`.
    pub fn reject_next_syncs(&self, count: usize, message: &str) {
        let mut rejected = self.rejected_syncs.lock();
        rejected.extend(std::iter::repeat(message.to_string()).take(count));
    }

    /// Makes the next `count` writes and deletes fail.
    pub fn fail_next_writes(&self, count: usize, message: &str) {
        let mut failures = self.write_failures.lock();
        failures.extend(std::iter::repeat(message.to_string()).take(count));
    }

    /// Reports `entry` in the next successful sync.
    pub fn inject_conflict(&self, entry: ConflictEntry) {
        self.conflicts.lock().push(entry);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Number of sync calls received.
    pub fn sync_calls(&self) -> u64 {
        self.sync_calls.load(Ordering::SeqCst)
    }

    /// Number of write and delete calls received.
    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_write_failure(&self) -> EngineResult<()> {
        match self.write_failures.lock().pop_front() {
            Some(message) => Err(SyncError::ServerError(message)),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryServer {
    async fn read(&self) -> EngineResult<Vec<Record>> {
        self.simulate_latency().await;
        Ok(self.records())
    }

    async fn write(&self, request: WriteRequest) -> EngineResult<Record> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.take_write_failure()?;

        let now = self.clock.now();
        let record = match request {
            WriteRequest::Create { fields } => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                Record::new(format!("srv-{id}"), fields, now)
            }
            WriteRequest::Update { id, patch } => {
                let current = self
                    .record(&id)
                    .ok_or_else(|| SyncError::RecordNotFound(id.clone()))?;
                current.patched(&patch, now)
            }
        };
        self.records
            .write()
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn delete(&self, id: &RecordId) -> EngineResult<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.take_write_failure()?;

        self.records
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SyncError::RecordNotFound(id.clone()))
    }

    async fn bidirectional_sync(&self, _options: &SyncOptions) -> EngineResult<SyncResult> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if let Some(message) = self.sync_failures.lock().pop_front() {
            return Err(SyncError::transport_retryable(message));
        }
        let now = self.clock.now();
        if let Some(message) = self.rejected_syncs.lock().pop_front() {
            return Ok(SyncResult::failure(now, vec![message]));
        }

        let changes = std::mem::take(&mut *self.changes.lock());
        let processed = self.records.read().len() as u64;
        let mut result = SyncResult::success(now).with_counts(
            processed,
            changes.added,
            changes.updated,
            processed.saturating_sub(changes.added + changes.updated),
        );
        result.conflicts = std::mem::take(&mut *self.conflicts.lock());
        Ok(result)
    }
}
