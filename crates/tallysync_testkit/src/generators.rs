//! Property-based test generators using proptest.

use crate::fixtures::minutes_after_base;
use proptest::prelude::*;
use serde_json::Value;
use tallysync_engine::Mutation;
use tallysync_protocol::{FieldMap, Record, RecordId, RecordPatch};

/// Strategy for server-style record ids.
pub fn record_id_strategy() -> impl Strategy<Value = RecordId> {
    (0u32..10_000).prop_map(|n| RecordId::new(format!("rec-{n}")))
}

/// Strategy for scalar field values.
pub fn field_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (0i64..100_000).prop_map(Value::from),
        "[a-z]{0,12}".prop_map(Value::from),
    ]
}

/// Strategy for field maps with short lowercase names.
pub fn field_map_strategy() -> impl Strategy<Value = FieldMap> {
    prop::collection::btree_map("[a-z]{1,8}", field_value_strategy(), 0..6)
}

/// Strategy for non-empty patches.
pub fn patch_strategy() -> impl Strategy<Value = RecordPatch> {
    prop::collection::btree_map("[a-z]{1,8}", field_value_strategy(), 1..4)
        .prop_map(RecordPatch::from)
}

/// Strategy for a record with the given id.
pub fn record_strategy(id: RecordId) -> impl Strategy<Value = Record> {
    (field_map_strategy(), 0i64..10_000).prop_map(move |(fields, minutes)| {
        let mut record = Record::new(id.clone(), fields, minutes_after_base(0));
        record.updated_at = minutes_after_base(minutes);
        record
    })
}

/// Strategy for up to `max` records with distinct ids.
pub fn record_list_strategy(max: usize) -> impl Strategy<Value = Vec<Record>> {
    prop::collection::btree_set(record_id_strategy(), 0..=max).prop_flat_map(|ids| {
        ids.into_iter()
            .map(record_strategy)
            .collect::<Vec<_>>()
    })
}

/// Strategy for a mutation against one of `records`, or a create.
pub fn mutation_strategy(records: Vec<Record>) -> BoxedStrategy<Mutation> {
    let create = field_map_strategy()
        .prop_map(|fields| Mutation::Create { fields })
        .boxed();
    if records.is_empty() {
        return create;
    }
    let ids: Vec<RecordId> = records.into_iter().map(|r| r.id).collect();
    let update = (prop::sample::select(ids.clone()), patch_strategy())
        .prop_map(|(id, patch)| Mutation::Update { id, patch });
    let delete = prop::sample::select(ids).prop_map(|id| Mutation::Delete { id });
    prop_oneof![create, update, delete].boxed()
}

/// Strategy for a record list paired with a mutation against it.
pub fn records_and_mutation_strategy(max: usize) -> impl Strategy<Value = (Vec<Record>, Mutation)> {
    record_list_strategy(max).prop_flat_map(|records| {
        let mutation = mutation_strategy(records.clone());
        (Just(records), mutation)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    proptest! {
        #[test]
        fn record_lists_have_distinct_ids(records in record_list_strategy(20)) {
            let ids: BTreeSet<_> = records.iter().map(|r| r.id.clone()).collect();
            prop_assert_eq!(ids.len(), records.len());
        }

        #[test]
        fn mutations_target_known_records((records, mutation) in records_and_mutation_strategy(8)) {
            if let Some(id) = mutation.target() {
                prop_assert!(records.iter().any(|r| &r.id == id));
            }
        }

        #[test]
        fn patches_are_never_empty(patch in patch_strategy()) {
            prop_assert!(!patch.is_empty());
        }
    }
}
