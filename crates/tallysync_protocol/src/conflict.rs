//! Conflict records and resolution.

use crate::options::ConflictPolicy;
use crate::record::RecordId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A disagreement as reported by a sync, before it is tracked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictEntry {
    /// Record the disagreement belongs to.
    pub record_id: RecordId,
    /// Field that differs.
    pub field: String,
    /// Value held by the server.
    pub server_value: Value,
    /// Value held by the client.
    pub client_value: Value,
}

impl ConflictEntry {
    /// Creates a new conflict entry.
    pub fn new(
        record_id: impl Into<RecordId>,
        field: impl Into<String>,
        server_value: impl Into<Value>,
        client_value: impl Into<Value>,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            field: field.into(),
            server_value: server_value.into(),
            client_value: client_value.into(),
        }
    }
}

/// The decision taken for a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    /// Which side won.
    pub policy: ConflictPolicy,
    /// Explicit merged value, only meaningful for [`ConflictPolicy::Merge`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_value: Option<Value>,
}

impl ConflictResolution {
    /// Creates a resolution without an explicit merged value.
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            merged_value: None,
        }
    }

    /// Creates a merge resolution with an explicit value.
    pub fn merged(value: Value) -> Self {
        Self {
            policy: ConflictPolicy::Merge,
            merged_value: Some(value),
        }
    }
}

/// A tracked field-level conflict.
///
/// Identity is `(record_id, field)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// Record the conflict belongs to.
    pub record_id: RecordId,
    /// Field that differs.
    pub field: String,
    /// Value held by the server.
    pub server_value: Value,
    /// Value held by the client.
    pub client_value: Value,
    /// When the conflict was recorded.
    pub timestamp: DateTime<Utc>,
    /// Whether a decision has been recorded.
    pub resolved: bool,
    /// The recorded decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
}

impl Conflict {
    /// Starts tracking an entry. The conflict is always unresolved.
    pub fn from_entry(entry: ConflictEntry, timestamp: DateTime<Utc>) -> Self {
        Self {
            record_id: entry.record_id,
            field: entry.field,
            server_value: entry.server_value,
            client_value: entry.client_value,
            timestamp,
            resolved: false,
            resolution: None,
        }
    }

    /// Returns true if this conflict has the given identity.
    pub fn is_for(&self, record_id: &RecordId, field: &str) -> bool {
        &self.record_id == record_id && self.field == field
    }

    /// Returns a resolved copy of this conflict.
    pub fn resolved_with(&self, resolution: ConflictResolution) -> Self {
        Self {
            resolved: true,
            resolution: Some(resolution),
            ..self.clone()
        }
    }

    /// Returns the value the recorded decision selects, if resolved.
    pub fn resolved_value(&self) -> Option<Value> {
        let resolution = self.resolution.as_ref()?;
        Some(match resolution.policy {
            ConflictPolicy::Server => self.server_value.clone(),
            ConflictPolicy::Client => self.client_value.clone(),
            ConflictPolicy::Merge => resolution
                .merged_value
                .clone()
                .unwrap_or_else(|| merge_values(&self.server_value, &self.client_value)),
        })
    }
}

/// Merges a server and a client value.
///
/// Objects are merged key by key with client keys overriding server keys;
/// arrays are concatenated without repeating server elements; any other
/// combination keeps the client value, as it holds the most recent edit.
pub fn merge_values(server: &Value, client: &Value) -> Value {
    match (server, client) {
        (Value::Object(s), Value::Object(c)) => {
            let mut merged = s.clone();
            for (key, value) in c {
                let next = match s.get(key) {
                    Some(existing) => merge_values(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (Value::Array(s), Value::Array(c)) => {
            let mut merged = s.clone();
            for item in c {
                if !s.contains(item) {
                    merged.push(item.clone());
                }
            }
            Value::Array(merged)
        }
        (_, client) => client.clone(),
    }
}
