//! Denormalize/emit engine (spec §4.5): scrubs stale parent-index filings,
//! rebuilds the nested record for each pending root PK from the join index,
//! and writes the result to the root's output stream.

use southpaw_storage::StateStore;
use southpaw_types::{DenormalizedRecord, Key, Relation};

use crate::errors::ExecutionError;
use crate::fields::field_key;
use crate::index::Indices;
use crate::metrics::Metrics;
use crate::root::RootHandle;
use crate::scheduler::Scheduler;

/// Drains `root`'s pending set, emitting a denormalized record (or nothing,
/// for a root tombstone) for each PK, then flushes the output stream.
pub fn denormalize_and_emit(
    root: &mut RootHandle,
    scheduler: &mut Scheduler,
    indices: &Indices,
    store: &mut impl StateStore,
    metrics: &Metrics,
) -> Result<(), ExecutionError> {
    let pks = root.pending_keys();
    root.set_pending(Default::default());

    for pk in &pks {
        scrub(&root.relation, indices, store, pk)?;
        let built = build(&root.relation, pk, &root.relation, pk, scheduler, indices, store)?;
        match built {
            Some(denorm) => {
                root.sink.write(pk, &denorm)?;
                metrics.record_emit(root.output_name());
            }
            None => {
                // Root tombstoned (or vanished): scrub already severed its
                // parent-index filings, so it cannot resurface later.
            }
        }
    }

    if !pks.is_empty() {
        root.sink.flush()?;
    }
    Ok(())
}

/// Removes every stale parent-index filing of `root_pk`, across every edge
/// in the tree, before rebuilding (spec §4.5 step 1).
fn scrub(
    root_relation: &Relation,
    indices: &Indices,
    store: &mut impl StateStore,
    root_pk: &Key,
) -> Result<(), ExecutionError> {
    for (parent, child) in root_relation.edges() {
        let parent_key = child.parent_key.as_deref().expect("validated: child has parent_key");
        let parent_index = indices.parent_index(&root_relation.entity, &parent.entity, parent_key);
        let filed_under = parent_index.foreign_keys_of(store, root_pk)?;
        for index_key in filed_under.iter() {
            parent_index.remove(store, index_key, root_pk)?;
        }
    }
    Ok(())
}

/// Recursively rebuilds the subtree rooted at `(relation, relation_pk)`,
/// refiling the parent index along the way (spec §4.5 step 2). Returns
/// `None` if the record is missing or empty (a dangling/tombstoned edge).
fn build(
    relation: &Relation,
    relation_pk: &Key,
    root_relation: &Relation,
    root_pk: &Key,
    scheduler: &mut Scheduler,
    indices: &Indices,
    store: &mut impl StateStore,
) -> Result<Option<DenormalizedRecord>, ExecutionError> {
    let record = scheduler.read_by_pk(&relation.entity, relation_pk)?;
    let record = match record {
        Some(record) if !record.is_empty() => record,
        _ => return Ok(None),
    };

    let mut denorm = DenormalizedRecord::new(southpaw_types::Record::to_map(&record));

    for child in &relation.children {
        let parent_key = child.parent_key.as_deref().expect("validated: child has parent_key");
        let join_key = child.join_key.as_deref().expect("validated: child has join_key");

        let new_parent_value = field_key(Some(&record), parent_key)?;
        let parent_index = indices.parent_index(&root_relation.entity, &relation.entity, parent_key);
        if let Some(value) = &new_parent_value {
            parent_index.add(store, value, root_pk)?;
        }

        let mut child_records = Vec::new();
        if let Some(value) = &new_parent_value {
            let join_index = indices.join_index(&child.entity, join_key);
            let mut child_pks: Vec<Key> = join_index.get(store, value)?.iter().cloned().collect();
            child_pks.sort();
            for child_pk in child_pks {
                if let Some(sub) = build(child, &child_pk, root_relation, root_pk, scheduler, indices, store)? {
                    child_records.push(sub);
                }
            }
        }
        denorm = denorm.with_child_entity(child.entity.clone(), child_records);
    }

    Ok(Some(denorm))
}
