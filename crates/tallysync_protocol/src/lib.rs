//! # tallysync protocol
//!
//! Data types shared between the tallysync engine and its collaborators.
//!
//! This crate provides:
//! - `Record` and `RecordPatch` for server-authoritative business rows
//! - `SyncOptions` and `SyncResult` for one bidirectional sync attempt
//! - `Conflict` for field-level disagreements and their resolution
//! - `ConsistencyReport` and `RepairResult` for audits
//!
//! This is a pure data crate with no I/O operations. Every type is
//! serde-serializable so transports can put it on the wire as JSON.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod consistency;
mod options;
mod record;
mod result;

pub use conflict::{merge_values, Conflict, ConflictEntry, ConflictResolution};
pub use consistency::{
    ConsistencyReport, ConsistencySummary, Issue, IssueType, RepairResult, RepairStrategy,
    Severity,
};
pub use options::{ConflictPolicy, SyncDirection, SyncOptions};
pub use record::{FieldMap, Record, RecordId, RecordPatch, TEMP_ID_PREFIX};
pub use result::SyncResult;

/// Field values are plain JSON values.
pub use serde_json::Value;
