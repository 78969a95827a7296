//! Consistency audit reports and repair outcomes.

use crate::record::RecordId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Category of a detected divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueType {
    /// Same logical key held by more than one local record.
    Duplicate,
    /// Same identifier, differing field value.
    Mismatch,
    /// Exists on the server, absent locally.
    Missing,
    /// Fails schema or business-rule validation.
    Invalid,
    /// Exists locally, no longer exists on the server.
    Orphaned,
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssueType::Duplicate => "duplicate",
            IssueType::Mismatch => "mismatch",
            IssueType::Missing => "missing",
            IssueType::Invalid => "invalid",
            IssueType::Orphaned => "orphaned",
        };
        f.write_str(name)
    }
}

/// How urgent an issue is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Cosmetic.
    Low,
    /// Stale data visible to users.
    Medium,
    /// Data visible to users is wrong or absent.
    High,
    /// Data cannot be trusted.
    Critical,
}

/// One detected divergence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    /// Category.
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    /// Urgency.
    pub severity: Severity,
    /// Affected record.
    pub record_id: RecordId,
    /// Affected field, for mismatches and field validation failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Logical key shared by duplicates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_key: Option<String>,
    /// Human readable description.
    pub description: String,
    /// Server side value, when relevant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_value: Option<Value>,
    /// Client side value, when relevant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_value: Option<Value>,
    /// Modification time of the exact local copy, for duplicates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Issue {
    /// Creates an issue with no field or values attached.
    pub fn new(
        issue_type: IssueType,
        severity: Severity,
        record_id: RecordId,
        description: impl Into<String>,
    ) -> Self {
        Self {
            issue_type,
            severity,
            record_id,
            field: None,
            logical_key: None,
            description: description.into(),
            server_value: None,
            client_value: None,
            updated_at: None,
        }
    }

    /// Attaches the affected field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Attaches the logical key.
    #[must_use]
    pub fn with_logical_key(mut self, key: impl Into<String>) -> Self {
        self.logical_key = Some(key.into());
        self
    }

    /// Pins the issue to the local copy modified at `at`.
    #[must_use]
    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Attaches server and client values.
    #[must_use]
    pub fn with_values(mut self, server: Option<Value>, client: Option<Value>) -> Self {
        self.server_value = server;
        self.client_value = client;
        self
    }
}

/// Issue counts per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencySummary {
    /// Duplicate issues.
    pub duplicates: usize,
    /// Mismatch issues.
    pub mismatches: usize,
    /// Missing issues.
    pub missing: usize,
    /// Invalid issues.
    pub invalid: usize,
    /// Orphaned issues.
    pub orphaned: usize,
}

impl ConsistencySummary {
    /// Counts issues by category.
    pub fn from_issues(issues: &[Issue]) -> Self {
        let mut summary = Self::default();
        for issue in issues {
            match issue.issue_type {
                IssueType::Duplicate => summary.duplicates += 1,
                IssueType::Mismatch => summary.mismatches += 1,
                IssueType::Missing => summary.missing += 1,
                IssueType::Invalid => summary.invalid += 1,
                IssueType::Orphaned => summary.orphaned += 1,
            }
        }
        summary
    }

    /// Returns the total number of issues.
    pub fn total(&self) -> usize {
        self.duplicates + self.mismatches + self.missing + self.invalid + self.orphaned
    }
}

/// Result of one full-dataset audit. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    /// True if no issue was found.
    pub is_consistent: bool,
    /// Number of local records audited.
    pub total_records: usize,
    /// When the audit ran.
    pub checked_at: DateTime<Utc>,
    /// Detected issues.
    pub issues: Vec<Issue>,
    /// Counts per category.
    pub summary: ConsistencySummary,
}

impl ConsistencyReport {
    /// Builds a report, deriving the summary and the consistency flag.
    pub fn new(total_records: usize, checked_at: DateTime<Utc>, issues: Vec<Issue>) -> Self {
        let summary = ConsistencySummary::from_issues(&issues);
        Self {
            is_consistent: issues.is_empty(),
            total_records,
            checked_at,
            issues,
            summary,
        }
    }

    /// Returns the issues of one category.
    pub fn issues_of(&self, issue_type: IssueType) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(move |issue| issue.issue_type == issue_type)
    }
}

/// Which issues a repair pass may touch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairStrategy {
    /// Repair every issue.
    Auto,
    /// Repair only the issues at these positions of the issue list.
    Manual(BTreeSet<usize>),
}

impl RepairStrategy {
    /// Returns true if the issue at `index` is selected.
    pub fn selects(&self, index: usize) -> bool {
        match self {
            RepairStrategy::Auto => true,
            RepairStrategy::Manual(selected) => selected.contains(&index),
        }
    }
}

/// Outcome of a repair pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairResult {
    /// True if no selected repair failed.
    pub success: bool,
    /// Number of issues repaired.
    pub repaired_issues: usize,
    /// Number of issues that could not be repaired.
    pub failed_repairs: usize,
    /// Reasons for failed repairs.
    pub errors: Vec<String>,
    /// Non-fatal notes, e.g. skipped issues.
    pub warnings: Vec<String>,
}
