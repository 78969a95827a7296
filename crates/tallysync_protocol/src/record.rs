//! Records and patches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Prefix of locally generated placeholder identifiers.
///
/// A record whose id starts with this prefix was created optimistically and
/// has not been acknowledged by the server yet.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Typed fields of a record, ordered by name.
pub type FieldMap = BTreeMap<String, Value>;

/// Unique identifier of a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a record id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a placeholder id from a locally unique suffix.
    pub fn temporary(suffix: impl fmt::Display) -> Self {
        Self(format!("{TEMP_ID_PREFIX}{suffix}"))
    }

    /// Returns true if this id is a local placeholder.
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A server-authoritative business entity, e.g. a transcript count row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Unique identifier.
    pub id: RecordId,
    /// Typed fields.
    pub fields: FieldMap,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Creates a record whose creation and modification times are both `at`.
    pub fn new(id: impl Into<RecordId>, fields: FieldMap, at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            fields,
            created_at: at,
            updated_at: at,
        }
    }

    /// Returns a field value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Sets a field, consuming and returning the record.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns a new record with `patch` merged over the current fields and
    /// `updated_at` set to `now`. The receiver is left untouched.
    pub fn patched(&self, patch: &RecordPatch, now: DateTime<Utc>) -> Self {
        let mut fields = self.fields.clone();
        fields.extend(patch.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            id: self.id.clone(),
            fields,
            created_at: self.created_at,
            updated_at: now,
        }
    }
}

/// A partial update: the fields to overwrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPatch {
    /// Fields to overwrite.
    pub fields: FieldMap,
}

impl RecordPatch {
    /// Creates an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field to the patch.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns true if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<FieldMap> for RecordPatch {
    fn from(fields: FieldMap) -> Self {
        Self { fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn temporary_ids() {
        let id = RecordId::temporary(7);
        assert_eq!(id.as_str(), "temp-7");
        assert!(id.is_temporary());
        assert!(!RecordId::new("42").is_temporary());
    }

    #[test]
    fn patch_merges_over_existing_fields() {
        let record = Record::new("1", FieldMap::new(), at(10))
            .with_field("count", 100)
            .with_field("client", "acme");

        let patched = record.patched(&RecordPatch::new().set("count", 150), at(20));

        assert_eq!(patched.field("count"), Some(&json!(150)));
        assert_eq!(patched.field("client"), Some(&json!("acme")));
        assert_eq!(patched.created_at, at(10));
        assert_eq!(patched.updated_at, at(20));
        // Original is untouched.
        assert_eq!(record.field("count"), Some(&json!(100)));
    }

    #[test]
    fn wire_format_is_camel_case() {
        let record = Record::new("1", FieldMap::new(), at(0));
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
        assert_eq!(json["id"], json!("1"));
    }
}
