//! # tallysync engine
//!
//! Keeps a local cache of server-authoritative records consistent with a
//! remote store.
//!
//! This crate provides:
//! - Optimistic mutations with snapshot and rollback
//! - Field-level conflict tracking with two-phase resolution
//! - Full-dataset consistency audit and repair
//! - A sync scheduler (interval, retry, focus and connectivity triggers)
//! - Rolling sync performance metrics
//!
//! ## Architecture
//!
//! Every component is constructed around one injected [`Transport`] and one
//! [`LocalCache`]; [`SyncSession`] wires them together:
//! 1. Mutations patch the cache, call the transport, then commit or roll back
//! 2. The scheduler runs bidirectional syncs and hands reported conflicts to
//!    the conflict manager
//! 3. Successful syncs and mutations invalidate derived cache views
//! 4. Audits compare the cache with the server and repair through the same
//!    cache patch primitives mutations use
//!
//! ## Key Invariants
//!
//! - Server is authoritative
//! - At most one sync is in flight
//! - A failed mutation leaves the cache exactly as it found it
//! - Mutations on the same record resolve in issuance order
//! - Cache writes replace whole lists; readers never see partial updates
//! - Nothing writes to the cache after the session shuts down

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod clock;
mod config;
mod conflict;
mod consistency;
mod error;
mod monitor;
mod mutation;
mod scheduler;
mod session;
mod state;
mod transport;

pub use cache::{patch, record_ids, CacheKey, LocalCache, MemoryCache, RecordList, ViewKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{MutationConfig, RealTimeSyncConfig, DEFAULT_ROOT};
pub use conflict::ConflictManager;
pub use consistency::{audit, ConsistencyChecker, ConsistencyRules, FieldRules, RuleViolation};
pub use error::{EngineResult, ErrorCategory, SyncError};
pub use monitor::{PerformanceMetrics, PerformanceMonitor, AVERAGE_WINDOW};
pub use mutation::{Mutation, MutationCoordinator, MutationOutcome};
pub use scheduler::{SchedulerContext, SyncScheduler};
pub use session::{SyncSession, SyncSessionBuilder};
pub use state::{EnvironmentSignal, Liveness, SyncAttempt, SyncStatus};
pub use transport::{MockTransport, Transport, WriteRequest};
