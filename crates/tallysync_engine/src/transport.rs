//! Transport abstraction over the authoritative remote store.

use crate::error::{EngineResult, SyncError};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tallysync_protocol::{FieldMap, Record, RecordId, RecordPatch, SyncOptions, SyncResult};

/// A write against the remote store.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    /// Create a record; the server assigns its id.
    Create {
        /// Initial fields.
        fields: FieldMap,
    },
    /// Update fields of an existing record.
    Update {
        /// Target record.
        id: RecordId,
        /// Fields to overwrite.
        patch: RecordPatch,
    },
}

/// A transport performs network calls against the remote store.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, WebSocket, in-memory for testing, etc.).
/// Implementations enforce their own timeouts and report them as
/// [`SyncError::Timeout`]; the engine treats every error the same way.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Reads every authoritative record.
    async fn read(&self) -> EngineResult<Vec<Record>>;

    /// Writes a record and returns the server's version of it.
    async fn write(&self, request: WriteRequest) -> EngineResult<Record>;

    /// Deletes a record.
    async fn delete(&self, id: &RecordId) -> EngineResult<()>;

    /// Runs one bidirectional sync.
    async fn bidirectional_sync(&self, options: &SyncOptions) -> EngineResult<SyncResult>;
}

/// A scripted transport for testing.
///
/// Sync responses are served from a queue; once the queue is empty the
/// fallback response is repeated. Writes echo the request back with a
/// server-assigned id unless failures are switched on.
#[derive(Debug, Default)]
pub struct MockTransport {
    sync_responses: Mutex<VecDeque<Result<SyncResult, String>>>,
    fallback: Mutex<Option<Result<SyncResult, String>>>,
    sync_delay: Mutex<Option<Duration>>,
    records: Mutex<Vec<Record>>,
    fail_writes: AtomicBool,
    sync_calls: AtomicU64,
    write_calls: AtomicU64,
    delete_calls: AtomicU64,
    next_id: AtomicU64,
}

impl MockTransport {
    /// Creates a mock that answers every sync with an empty success.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one sync response.
    pub fn push_sync_response(&self, response: SyncResult) {
        self.sync_responses.lock().push_back(Ok(response));
    }

    /// Queues one sync rejection.
    pub fn push_sync_error(&self, message: impl Into<String>) {
        self.sync_responses.lock().push_back(Err(message.into()));
    }

    /// Sets the response repeated once the queue is drained.
    pub fn set_fallback_response(&self, response: SyncResult) {
        *self.fallback.lock() = Some(Ok(response));
    }

    /// Makes every sync without a queued response fail.
    pub fn set_fallback_error(&self, message: impl Into<String>) {
        *self.fallback.lock() = Some(Err(message.into()));
    }

    /// Delays every sync by `delay`.
    pub fn set_sync_delay(&self, delay: Duration) {
        *self.sync_delay.lock() = Some(delay);
    }

    /// Sets the records returned by `read`.
    pub fn set_records(&self, records: Vec<Record>) {
        *self.records.lock() = records;
    }

    /// Makes writes and deletes fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of sync calls received.
    pub fn sync_calls(&self) -> u64 {
        self.sync_calls.load(Ordering::SeqCst)
    }

    /// Number of write calls received.
    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Number of delete calls received.
    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn next_sync_response(&self) -> Result<SyncResult, String> {
        if let Some(response) = self.sync_responses.lock().pop_front() {
            return response;
        }
        self.fallback
            .lock()
            .clone()
            .unwrap_or_else(|| Ok(SyncResult::success(Utc::now())))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn read(&self) -> EngineResult<Vec<Record>> {
        Ok(self.records.lock().clone())
    }

    async fn write(&self, request: WriteRequest) -> EngineResult<Record> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::ServerError("write rejected".into()));
        }
        let now = Utc::now();
        match request {
            WriteRequest::Create { fields } => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(Record::new(format!("srv-{id}"), fields, now))
            }
            WriteRequest::Update { id, patch } => {
                let base = self
                    .records
                    .lock()
                    .iter()
                    .find(|r| r.id == id)
                    .cloned()
                    .unwrap_or_else(|| Record::new(id.clone(), FieldMap::new(), now));
                Ok(base.patched(&patch, now))
            }
        }
    }

    async fn delete(&self, _id: &RecordId) -> EngineResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::ServerError("delete rejected".into()));
        }
        Ok(())
    }

    async fn bidirectional_sync(&self, _options: &SyncOptions) -> EngineResult<SyncResult> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.sync_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.next_sync_response()
            .map_err(|message| SyncError::transport_retryable(message))
    }
}
