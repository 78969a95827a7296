//! Full-dataset consistency audit and repair.
//!
//! The audit compares the canonical cached list against the server's records
//! and classifies every divergence. It is a pure function of its inputs, so
//! two checks with no intervening change produce identical reports. Repairs
//! write through the same cache patch primitives the mutation coordinator
//! uses.

use crate::cache::{patch, CacheKey, LocalCache};
use crate::clock::Clock;
use crate::error::{EngineResult, SyncError};
use crate::state::Liveness;
use crate::transport::{Transport, WriteRequest};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tallysync_protocol::{
    merge_values, ConflictPolicy, ConsistencyReport, Issue, IssueType, Record, RecordId,
    RecordPatch, RepairResult, RepairStrategy, Severity,
};
use tracing::{debug, info, warn};

/// A business-rule violation found on one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleViolation {
    /// Offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl RuleViolation {
    /// Creates a violation.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Domain rules the audit applies to cached records.
pub trait ConsistencyRules: Send + Sync {
    /// Key under which two distinct records count as duplicates.
    fn logical_key(&self, record: &Record) -> String;

    /// Returns every rule the record breaks.
    fn validate(&self, record: &Record) -> Vec<RuleViolation>;
}

/// Field-driven rules.
///
/// With no key fields the logical key is the record id, so only records
/// sharing an id are duplicates.
#[derive(Debug, Clone, Default)]
pub struct FieldRules {
    key_fields: Vec<String>,
    required: Vec<String>,
    non_negative: Vec<String>,
}

impl FieldRules {
    /// Creates rules with no constraints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fields forming the logical key.
    #[must_use]
    pub fn with_key_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the fields that must be present and non-null.
    #[must_use]
    pub fn with_required<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the fields that must be non-negative numbers when present.
    #[must_use]
    pub fn with_non_negative<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.non_negative = fields.into_iter().map(Into::into).collect();
        self
    }
}

impl ConsistencyRules for FieldRules {
    fn logical_key(&self, record: &Record) -> String {
        if self.key_fields.is_empty() {
            return record.id.to_string();
        }
        self.key_fields
            .iter()
            .map(|field| record.field(field).unwrap_or(&Value::Null).to_string())
            .collect::<Vec<_>>()
            .join("|")
    }

    fn validate(&self, record: &Record) -> Vec<RuleViolation> {
        let mut violations = Vec::new();
        for field in &self.required {
            if record.field(field).map_or(true, Value::is_null) {
                violations.push(RuleViolation::new(field.as_str(), "required field is missing"));
            }
        }
        for field in &self.non_negative {
            match record.field(field) {
                None | Some(Value::Null) => {}
                Some(Value::Number(n)) if n.as_f64().map_or(false, |v| v >= 0.0) => {}
                Some(Value::Number(_)) => {
                    violations.push(RuleViolation::new(field.as_str(), "must not be negative"));
                }
                Some(_) => {
                    violations.push(RuleViolation::new(field.as_str(), "must be a number"));
                }
            }
        }
        violations
    }
}

/// Audits `local` against `server`.
///
/// Issues are ordered by category, record id and field.
pub fn audit(
    local: &[Record],
    server: &[Record],
    rules: &dyn ConsistencyRules,
    checked_at: DateTime<Utc>,
) -> ConsistencyReport {
    let mut issues = Vec::new();

    let server_by_id: BTreeMap<&RecordId, &Record> = server.iter().map(|r| (&r.id, r)).collect();
    // Copies sharing an id are compared through their newest one.
    let mut local_by_id: BTreeMap<&RecordId, &Record> = BTreeMap::new();
    for record in local {
        let entry = local_by_id.entry(&record.id).or_insert(record);
        if record.updated_at > entry.updated_at {
            *entry = record;
        }
    }

    // Duplicates: keep the most recently updated record of each group.
    let mut groups: BTreeMap<String, Vec<&Record>> = BTreeMap::new();
    for record in local {
        groups.entry(rules.logical_key(record)).or_default().push(record);
    }
    for (key, group) in &groups {
        if group.len() < 2 {
            continue;
        }
        let Some(keep) = latest(group) else { continue };
        for (index, record) in group.iter().enumerate() {
            if index == keep {
                continue;
            }
            issues.push(
                Issue::new(
                    IssueType::Duplicate,
                    Severity::Medium,
                    record.id.clone(),
                    format!("duplicate of record {}", group[keep].id),
                )
                .with_logical_key(key.as_str())
                .with_updated_at(record.updated_at),
            );
        }
    }

    for (id, record) in &local_by_id {
        match server_by_id.get(id) {
            Some(authoritative) => {
                let names: BTreeSet<&String> = record
                    .fields
                    .keys()
                    .chain(authoritative.fields.keys())
                    .collect();
                for name in names {
                    let client = record.field(name);
                    let server = authoritative.field(name);
                    if client != server {
                        issues.push(
                            Issue::new(
                                IssueType::Mismatch,
                                Severity::Medium,
                                (*id).clone(),
                                format!("field {name} differs from the server"),
                            )
                            .with_field(name.as_str())
                            .with_values(server.cloned(), client.cloned()),
                        );
                    }
                }
            }
            // Unacknowledged creates are expected to be absent upstream.
            None if id.is_temporary() => {}
            None => issues.push(Issue::new(
                IssueType::Orphaned,
                Severity::Medium,
                (*id).clone(),
                "record no longer exists on the server",
            )),
        }

        for violation in rules.validate(record) {
            issues.push(
                Issue::new(
                    IssueType::Invalid,
                    Severity::High,
                    (*id).clone(),
                    format!("{}: {}", violation.field, violation.message),
                )
                .with_values(None, record.field(&violation.field).cloned())
                .with_field(violation.field),
            );
        }
    }

    for id in server_by_id.keys() {
        if !local_by_id.contains_key(id) {
            issues.push(Issue::new(
                IssueType::Missing,
                Severity::High,
                (*id).clone(),
                "record exists on the server but not locally",
            ));
        }
    }

    issues.sort_by(|a, b| {
        (a.issue_type, &a.record_id, &a.field).cmp(&(b.issue_type, &b.record_id, &b.field))
    });
    ConsistencyReport::new(local.len(), checked_at, issues)
}

/// Index of the most recently updated record; the first wins ties.
fn latest(group: &[&Record]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (index, record) in group.iter().enumerate() {
        match best {
            Some(b) if group[b].updated_at >= record.updated_at => {}
            _ => best = Some(index),
        }
    }
    best
}

/// Audits the cache against the server and repairs what it finds.
pub struct ConsistencyChecker<T: Transport, C: LocalCache> {
    transport: Arc<T>,
    cache: Arc<C>,
    rules: Arc<dyn ConsistencyRules>,
    clock: Arc<dyn Clock>,
    root: CacheKey,
    policy: ConflictPolicy,
    liveness: Liveness,
}

impl<T: Transport, C: LocalCache> ConsistencyChecker<T, C> {
    /// Creates a checker for the collection under `root`.
    pub fn new(
        transport: Arc<T>,
        cache: Arc<C>,
        rules: Arc<dyn ConsistencyRules>,
        clock: Arc<dyn Clock>,
        root: CacheKey,
        liveness: Liveness,
    ) -> Self {
        Self {
            transport,
            cache,
            rules,
            clock,
            root,
            policy: ConflictPolicy::Server,
            liveness,
        }
    }

    /// Sets the policy used to repair mismatches.
    #[must_use]
    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The policy used to repair mismatches.
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Audits the cache. Never writes.
    pub async fn perform_consistency_check(&self) -> EngineResult<ConsistencyReport> {
        let server = self.transport.read().await?;
        self.liveness.ensure_alive()?;

        let local = self.cache.get(&self.root).unwrap_or_default();
        let report = audit(&local, &server, self.rules.as_ref(), self.clock.now());
        debug!(
            records = report.total_records,
            issues = report.issues.len(),
            "consistency check finished"
        );
        Ok(report)
    }

    /// Repairs the selected issues.
    ///
    /// Each issue is repaired independently: a failure is recorded and the
    /// pass moves on. Invalid records are never touched and always count as
    /// failed, since they need a human decision.
    pub async fn repair_consistency_issues(
        &self,
        issues: &[Issue],
        strategy: &RepairStrategy,
    ) -> EngineResult<RepairResult> {
        self.liveness.ensure_alive()?;

        let mut result = RepairResult::default();
        let mut server: Option<Vec<Record>> = None;

        for (index, issue) in issues.iter().enumerate() {
            if !strategy.selects(index) {
                result.warnings.push(format!(
                    "skipped {} issue for record {}",
                    issue.issue_type, issue.record_id
                ));
                continue;
            }
            match self.repair_one(issue, &mut server).await {
                Ok(()) => result.repaired_issues += 1,
                Err(SyncError::ShutDown) => return Err(SyncError::ShutDown),
                Err(error) => {
                    warn!(
                        issue_type = %issue.issue_type,
                        record_id = %issue.record_id,
                        %error,
                        "repair failed"
                    );
                    result.failed_repairs += 1;
                    result.errors.push(format!(
                        "{} issue for record {}: {error}",
                        issue.issue_type, issue.record_id
                    ));
                }
            }
        }

        if result.repaired_issues > 0 {
            self.cache.invalidate(&[self.root.summary()]);
        }
        result.success = result.failed_repairs == 0;
        info!(
            repaired = result.repaired_issues,
            failed = result.failed_repairs,
            "repair pass finished"
        );
        Ok(result)
    }

    async fn repair_one(
        &self,
        issue: &Issue,
        server: &mut Option<Vec<Record>>,
    ) -> EngineResult<()> {
        let id = &issue.record_id;
        match issue.issue_type {
            IssueType::Duplicate => {
                if !self.remove_duplicate(issue) {
                    debug!(record_id = %id, "duplicate already removed");
                }
                Ok(())
            }
            IssueType::Orphaned => {
                // A duplicate can also be reported as orphaned; absent is the goal.
                if !self.remove_everywhere(id) {
                    debug!(record_id = %id, "record already removed");
                }
                Ok(())
            }
            IssueType::Missing => {
                if server.is_none() {
                    let records = self.transport.read().await?;
                    self.liveness.ensure_alive()?;
                    *server = Some(records);
                }
                let record = server
                    .as_ref()
                    .and_then(|records| records.iter().find(|r| &r.id == id))
                    .cloned()
                    .ok_or_else(|| SyncError::RecordNotFound(id.clone()))?;
                patch::upsert_record(self.cache.as_ref(), &self.root, record);
                Ok(())
            }
            IssueType::Mismatch => self.repair_mismatch(issue).await,
            IssueType::Invalid => Err(SyncError::Validation(format!(
                "{} requires manual intervention",
                issue.description
            ))),
        }
    }

    async fn repair_mismatch(&self, issue: &Issue) -> EngineResult<()> {
        let id = &issue.record_id;
        let field = issue
            .field
            .as_deref()
            .ok_or_else(|| SyncError::Validation("mismatch without a field".into()))?;

        match self.policy {
            ConflictPolicy::Server => {
                let now = self.clock.now();
                let value = issue.server_value.clone();
                let touched = self.rewrite_everywhere(id, |record| {
                    let mut next = record.clone();
                    match &value {
                        Some(v) => next.fields.insert(field.to_string(), v.clone()),
                        None => next.fields.remove(field),
                    };
                    next.updated_at = now;
                    next
                });
                if touched {
                    Ok(())
                } else {
                    Err(SyncError::RecordNotFound(id.clone()))
                }
            }
            ConflictPolicy::Client | ConflictPolicy::Merge => {
                let client = issue.client_value.clone().unwrap_or(Value::Null);
                let value = match self.policy {
                    ConflictPolicy::Merge => {
                        merge_values(issue.server_value.as_ref().unwrap_or(&Value::Null), &client)
                    }
                    _ => client,
                };
                let written = self
                    .transport
                    .write(WriteRequest::Update {
                        id: id.clone(),
                        patch: RecordPatch::new().set(field, value),
                    })
                    .await?;
                self.liveness.ensure_alive()?;
                self.rewrite_everywhere(id, |_| written.clone());
                Ok(())
            }
        }
    }

    /// Removes every copy of `id` from every list.
    fn remove_everywhere(&self, id: &RecordId) -> bool {
        let mut removed = false;
        for (key, _) in self.cache.list_snapshot(&self.root) {
            while patch::remove_record(self.cache.as_ref(), &key, id).is_some() {
                removed = true;
            }
        }
        removed
    }

    /// Removes the flagged copy of a duplicate from every list.
    ///
    /// The copy is matched by id and modification time, and the group's
    /// current survivor is never removed, so repeating a repair is a no-op.
    fn remove_duplicate(&self, issue: &Issue) -> bool {
        let rules = self.rules.as_ref();
        let group_key = |record: &Record| match &issue.logical_key {
            Some(key) => &rules.logical_key(record) == key,
            None => record.id == issue.record_id,
        };
        let select = |list: &[Record]| -> Option<usize> {
            let group: Vec<(usize, &Record)> =
                list.iter().enumerate().filter(|(_, r)| group_key(*r)).collect();
            if group.len() < 2 {
                return None;
            }
            let members: Vec<&Record> = group.iter().map(|(_, r)| *r).collect();
            let keep = group[latest(&members)?].0;
            list.iter().enumerate().rposition(|(index, r)| {
                index != keep
                    && r.id == issue.record_id
                    && issue.updated_at.map_or(true, |at| r.updated_at == at)
            })
        };

        let mut removed = false;
        for (key, _) in self.cache.list_snapshot(&self.root) {
            removed |= patch::remove_selected(self.cache.as_ref(), &key, &select).is_some();
        }
        removed
    }

    fn rewrite_everywhere(&self, id: &RecordId, rewrite: impl Fn(&Record) -> Record) -> bool {
        let mut touched = false;
        for (key, list) in self.cache.list_snapshot(&self.root) {
            if let Some(current) = list.iter().find(|r| &r.id == id) {
                touched |= patch::replace_record(self.cache.as_ref(), &key, id, rewrite(current));
            }
        }
        touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;
    use crate::transport::MockTransport;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use tallysync_protocol::FieldMap;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn row(id: &str, month: &str, count: i64, minutes: i64) -> Record {
        Record::new(id, FieldMap::new(), at(minutes))
            .with_field("month", month)
            .with_field("count", count)
    }

    fn rules() -> FieldRules {
        FieldRules::new()
            .with_key_fields(["month"])
            .with_required(["month"])
            .with_non_negative(["count"])
    }

    #[test]
    fn field_rules() {
        let rules = rules();
        let ok = row("1", "2024-01", 3, 0);
        assert_eq!(rules.logical_key(&ok), "\"2024-01\"");
        assert!(rules.validate(&ok).is_empty());

        let bad = Record::new("2", FieldMap::new(), at(0)).with_field("count", -1);
        let violations = rules.validate(&bad);
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].field, "month");
        assert_eq!(violations[1].field, "count");

        assert_eq!(FieldRules::new().logical_key(&ok), "1");
    }

    #[test]
    fn audit_classifies_every_category() {
        let local = vec![
            row("1", "2024-01", 10, 0),
            row("2", "2024-02", 99, 0),
            row("3", "2024-02", 20, 5),
            row("4", "2024-04", -4, 0),
            row("temp-x", "2024-05", 1, 0),
        ];
        let server = vec![
            row("1", "2024-01", 10, 0),
            row("2", "2024-02", 20, 0),
            row("3", "2024-02", 20, 5),
            row("5", "2024-06", 7, 0),
        ];

        let report = audit(&local, &server, &rules(), at(60));

        assert!(!report.is_consistent);
        assert_eq!(report.total_records, 5);
        assert_eq!(report.summary.duplicates, 1);
        assert_eq!(report.summary.mismatches, 1);
        assert_eq!(report.summary.missing, 1);
        assert_eq!(report.summary.invalid, 1);
        assert_eq!(report.summary.orphaned, 1);

        let duplicate = report.issues_of(IssueType::Duplicate).next().unwrap();
        // Record 3 is newer, so record 2 is the one to drop.
        assert_eq!(duplicate.record_id, RecordId::new("2"));

        let mismatch = report.issues_of(IssueType::Mismatch).next().unwrap();
        assert_eq!(mismatch.field.as_deref(), Some("count"));
        assert_eq!(mismatch.server_value, Some(json!(20)));
        assert_eq!(mismatch.client_value, Some(json!(99)));

        let orphan = report.issues_of(IssueType::Orphaned).next().unwrap();
        assert_eq!(orphan.record_id, RecordId::new("4"));

        let invalid = report.issues_of(IssueType::Invalid).next().unwrap();
        assert_eq!(invalid.field.as_deref(), Some("count"));
        assert_eq!(invalid.client_value, Some(json!(-4)));
    }

    #[test]
    fn audit_is_deterministic() {
        let local = vec![row("2", "a", 1, 0), row("1", "a", 2, 0)];
        let server = vec![row("3", "b", 1, 0)];

        let first = audit(&local, &server, &rules(), at(0));
        let second = audit(&local, &server, &rules(), at(0));
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn consistent_data_has_no_issues() {
        let records = vec![row("1", "a", 1, 0), row("2", "b", 2, 0)];
        let report = audit(&records, &records, &rules(), at(0));
        assert!(report.is_consistent);
        assert!(report.issues.is_empty());
    }

    struct Fixture {
        transport: Arc<MockTransport>,
        cache: Arc<MemoryCache>,
        checker: ConsistencyChecker<MockTransport, MemoryCache>,
    }

    fn fixture(local: Vec<Record>, server: Vec<Record>, policy: ConflictPolicy) -> Fixture {
        let transport = Arc::new(MockTransport::new());
        transport.set_records(server);
        let cache = Arc::new(MemoryCache::new());
        cache.replace(CacheKey::list("records"), local);
        let checker = ConsistencyChecker::new(
            transport.clone(),
            cache.clone(),
            Arc::new(rules()),
            Arc::new(ManualClock::new(at(120))),
            CacheKey::list("records"),
            Liveness::new(),
        )
        .with_policy(policy);
        Fixture {
            transport,
            cache,
            checker,
        }
    }

    #[tokio::test]
    async fn check_does_not_write() {
        let f = fixture(
            vec![row("1", "a", 1, 0)],
            vec![row("2", "b", 1, 0)],
            ConflictPolicy::Server,
        );
        let before = f.cache.list_snapshot(&CacheKey::list("records"));

        let first = f.checker.perform_consistency_check().await.unwrap();
        let second = f.checker.perform_consistency_check().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.cache.list_snapshot(&CacheKey::list("records")), before);
        assert_eq!(f.cache.invalidation_count(), 0);
    }

    #[tokio::test]
    async fn auto_repair_converges() {
        let f = fixture(
            vec![
                row("1", "a", 99, 0),
                row("2", "b", 1, 0),
                row("3", "b", 1, 5),
                row("9", "z", 1, 0),
            ],
            vec![row("1", "a", 10, 0), row("3", "b", 1, 5), row("4", "d", 4, 0)],
            ConflictPolicy::Server,
        );

        let report = f.checker.perform_consistency_check().await.unwrap();
        let result = f
            .checker
            .repair_consistency_issues(&report.issues, &RepairStrategy::Auto)
            .await
            .unwrap();

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.failed_repairs, 0);

        let after = f.checker.perform_consistency_check().await.unwrap();
        assert!(after.is_consistent, "{:?}", after.issues);
    }

    #[tokio::test]
    async fn same_id_duplicates_keep_the_newest_copy() {
        let transport = Arc::new(MockTransport::new());
        transport.set_records(vec![row("1", "a", 2, 0)]);
        let cache = Arc::new(MemoryCache::new());
        let root = CacheKey::list("records");
        cache.replace(root.clone(), vec![row("1", "a", 2, 0), row("1", "a", 1, -10)]);
        let checker = ConsistencyChecker::new(
            transport,
            cache.clone(),
            Arc::new(FieldRules::new()),
            Arc::new(ManualClock::new(at(120))),
            root.clone(),
            Liveness::new(),
        );

        let report = checker.perform_consistency_check().await.unwrap();
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].issue_type, IssueType::Duplicate);
        assert_eq!(report.issues[0].updated_at, Some(at(-10)));

        for _ in 0..2 {
            let result = checker
                .repair_consistency_issues(&report.issues, &RepairStrategy::Auto)
                .await
                .unwrap();
            assert!(result.success);
        }

        let records = cache.records(&root);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].field("count"), Some(&json!(2)));
        assert!(checker.perform_consistency_check().await.unwrap().is_consistent);
    }

    #[tokio::test]
    async fn tied_duplicates_keep_the_first_copy() {
        let transport = Arc::new(MockTransport::new());
        transport.set_records(vec![row("1", "a", 2, 0)]);
        let cache = Arc::new(MemoryCache::new());
        let root = CacheKey::list("records");
        cache.replace(
            root.clone(),
            vec![row("1", "a", 2, 0), row("1", "a", 7, 0), row("1", "a", 8, 0)],
        );
        let checker = ConsistencyChecker::new(
            transport,
            cache.clone(),
            Arc::new(FieldRules::new()),
            Arc::new(ManualClock::new(at(120))),
            root.clone(),
            Liveness::new(),
        );

        let report = checker.perform_consistency_check().await.unwrap();
        assert_eq!(report.summary.duplicates, 2);
        checker
            .repair_consistency_issues(&report.issues, &RepairStrategy::Auto)
            .await
            .unwrap();

        let records = cache.records(&root);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].field("count"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn invalid_issues_need_manual_intervention() {
        let f = fixture(
            vec![row("1", "a", -1, 0), row("2", "b", 3, 0)],
            vec![row("1", "a", -1, 0)],
            ConflictPolicy::Server,
        );
        let report = f.checker.perform_consistency_check().await.unwrap();
        assert_eq!(report.summary.invalid, 1);
        assert_eq!(report.summary.orphaned, 1);

        let result = f
            .checker
            .repair_consistency_issues(&report.issues, &RepairStrategy::Auto)
            .await
            .unwrap();

        // The orphan is still removed.
        assert!(!result.success);
        assert_eq!(result.repaired_issues, 1);
        assert_eq!(result.failed_repairs, 1);
        assert_eq!(result.errors.len(), 1);
    }

    #[tokio::test]
    async fn manual_selection_skips_the_rest() {
        let f = fixture(
            vec![row("1", "a", 1, 0), row("2", "b", 1, 0)],
            vec![],
            ConflictPolicy::Server,
        );
        let report = f.checker.perform_consistency_check().await.unwrap();
        assert_eq!(report.issues.len(), 2);

        let result = f
            .checker
            .repair_consistency_issues(&report.issues, &RepairStrategy::Manual([1].into()))
            .await
            .unwrap();

        assert_eq!(result.repaired_issues, 1);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(f.cache.records(&CacheKey::list("records")).len(), 1);
    }

    #[tokio::test]
    async fn client_policy_pushes_local_value() {
        let f = fixture(
            vec![row("1", "a", 99, 0)],
            vec![row("1", "a", 10, 0)],
            ConflictPolicy::Client,
        );
        let report = f.checker.perform_consistency_check().await.unwrap();
        let result = f
            .checker
            .repair_consistency_issues(&report.issues, &RepairStrategy::Auto)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(f.transport.write_calls(), 1);
        let records = f.cache.records(&CacheKey::list("records"));
        assert_eq!(records[0].field("count"), Some(&json!(99)));
    }

    #[tokio::test]
    async fn failed_write_is_isolated() {
        let f = fixture(
            vec![row("1", "a", 99, 0), row("2", "b", 1, 0)],
            vec![row("1", "a", 10, 0)],
            ConflictPolicy::Merge,
        );
        f.transport.set_fail_writes(true);

        let report = f.checker.perform_consistency_check().await.unwrap();
        let result = f
            .checker
            .repair_consistency_issues(&report.issues, &RepairStrategy::Auto)
            .await
            .unwrap();

        assert_eq!(result.failed_repairs, 1);
        assert_eq!(result.repaired_issues, 1);
        assert!(result.errors[0].contains("mismatch"));
    }
}
