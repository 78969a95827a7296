//! Test fixtures and session helpers.
//!
//! Records built here look like transcript count rows: one row per client
//! and month, with a non-negative `count`.

use crate::server::InMemoryServer;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tallysync_engine::{
    CacheKey, FieldRules, ManualClock, MemoryCache, MutationConfig, SyncSession, DEFAULT_ROOT,
};
use tallysync_protocol::{FieldMap, Record};

/// A fixed instant all fixtures are relative to.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// `minutes` after [`base_time`].
pub fn minutes_after_base(minutes: i64) -> DateTime<Utc> {
    base_time() + Duration::minutes(minutes)
}

/// Key of the canonical record list.
pub fn root_key() -> CacheKey {
    CacheKey::list(DEFAULT_ROOT)
}

/// A transcript count row.
pub fn transcript_row(id: &str, client: &str, month: &str, count: i64) -> Record {
    Record::new(id, FieldMap::new(), base_time())
        .with_field("client", client)
        .with_field("month", month)
        .with_field("count", count)
}

/// `count` rows for one client, one per month of 2024.
pub fn transcript_rows(client: &str, count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            transcript_row(
                &format!("{client}-{i}"),
                client,
                &format!("2024-{:02}", i % 12 + 1),
                (i as i64 + 1) * 10,
            )
        })
        .collect()
}

/// Audit rules for transcript rows.
pub fn transcript_rules() -> FieldRules {
    FieldRules::new()
        .with_key_fields(["client", "month"])
        .with_required(["client", "month"])
        .with_non_negative(["count"])
}

/// A cache holding `records` under the canonical list.
pub fn seeded_cache(records: Vec<Record>) -> Arc<MemoryCache> {
    let cache = Arc::new(MemoryCache::new());
    cache.replace(root_key(), records);
    cache
}

/// A session and its collaborators, with time frozen at [`base_time`].
pub struct TestSession {
    /// The session under test.
    pub session: SyncSession<InMemoryServer, MemoryCache>,
    /// The server behind it.
    pub server: Arc<InMemoryServer>,
    /// The cache behind it.
    pub cache: Arc<MemoryCache>,
    /// The clock shared by server and session.
    pub clock: Arc<ManualClock>,
}

impl TestSession {
    /// Builds a session whose cache and server both hold `records`.
    pub fn in_sync(records: Vec<Record>) -> Self {
        Self::diverged(records.clone(), records)
    }

    /// Builds a session with different local and server contents.
    pub fn diverged(local: Vec<Record>, server: Vec<Record>) -> Self {
        let clock = Arc::new(ManualClock::new(base_time()));
        let server_store = Arc::new(InMemoryServer::with_clock(clock.clone()));
        server_store.seed(server);
        let cache = seeded_cache(local);
        let session = SyncSession::builder(server_store.clone(), cache.clone())
            .with_clock(clock.clone())
            .with_rules(Arc::new(transcript_rules()))
            .with_mutation_config(MutationConfig::new(root_key()))
            .build();
        Self {
            session,
            server: server_store,
            cache,
            clock,
        }
    }

    /// Records currently in the canonical list.
    pub fn local_records(&self) -> Vec<Record> {
        self.cache.records(&root_key())
    }
}
