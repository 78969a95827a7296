//! Property tests for rollback and conflict bookkeeping.

use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tallysync_engine::{
    audit, CacheKey, ConflictManager, LocalCache, Liveness, ManualClock, MemoryCache,
    MutationConfig, MutationCoordinator,
};
use tallysync_protocol::{ConflictEntry, Record};
use tallysync_testkit::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Seeds the canonical list with `records` and a derived view with every
/// other record.
fn cache_with_views(records: &[Record]) -> Arc<MemoryCache> {
    let cache = seeded_cache(records.to_vec());
    let derived: Vec<Record> = records.iter().step_by(2).cloned().collect();
    cache.replace(root_key().scoped("even"), derived);
    cache
}

proptest! {
    #[test]
    fn rejected_mutations_restore_every_view((records, mutation) in records_and_mutation_strategy(12)) {
        let cache = cache_with_views(&records);
        let server = Arc::new(InMemoryServer::new());
        server.seed(records.clone());
        server.fail_next_writes(1, "rejected");

        let coordinator = MutationCoordinator::new(
            server,
            cache.clone(),
            Arc::new(ManualClock::new(base_time())),
            MutationConfig::new(root_key()),
            Liveness::new(),
        );

        let before = cache.list_snapshot(&root_key());
        let result = runtime().block_on(coordinator.perform_mutation(mutation));

        prop_assert!(result.is_err());
        prop_assert_eq!(cache.list_snapshot(&root_key()), before);
        prop_assert_eq!(coordinator.pending_mutations(), 0);
    }

    #[test]
    fn conflicts_are_unique_per_identity(
        entries in prop::collection::vec((0u8..4, 0u8..3, any::<i32>(), any::<i32>()), 0..40)
    ) {
        let manager = ConflictManager::new(Arc::new(ManualClock::new(base_time())));
        let mut latest = BTreeMap::new();
        for (record, field, server, client) in &entries {
            let identity = (format!("r{record}"), format!("f{field}"));
            manager.add_conflict(ConflictEntry::new(
                identity.0.clone(),
                identity.1.clone(),
                *server,
                *client,
            ));
            latest.insert(identity, (json!(*server), json!(*client)));
        }

        let conflicts = manager.conflicts();
        prop_assert_eq!(conflicts.len(), latest.len());
        for conflict in conflicts.iter() {
            prop_assert!(!conflict.resolved);
            let identity = (conflict.record_id.as_str().to_string(), conflict.field.clone());
            let (server, client) = &latest[&identity];
            prop_assert_eq!(&conflict.server_value, server);
            prop_assert_eq!(&conflict.client_value, client);
        }
    }

    #[test]
    fn audit_is_idempotent(local in record_list_strategy(10), server in record_list_strategy(10)) {
        let rules = transcript_rules();
        let first = audit(&local, &server, &rules, base_time());
        let second = audit(&local, &server, &rules, base_time());
        prop_assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        prop_assert_eq!(first.total_records, local.len());
    }

    #[test]
    fn audit_of_identical_data_finds_no_divergence(records in record_list_strategy(10)) {
        let report = audit(&records, &records, &transcript_rules(), base_time());
        prop_assert_eq!(report.summary.mismatches, 0);
        prop_assert_eq!(report.summary.missing, 0);
        prop_assert_eq!(report.summary.orphaned, 0);
    }
}

#[test]
fn derived_view_is_seeded() {
    let records = transcript_rows("acme", 4);
    let cache = cache_with_views(&records);
    assert_eq!(cache.records(&root_key().scoped("even")).len(), 2);
    assert_eq!(cache.list_snapshot(&root_key()).len(), 2);
    assert!(cache.list_snapshot(&CacheKey::list("other")).is_empty());
}
