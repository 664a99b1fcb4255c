//! Change absorption (spec §4.4): translates one popped, non-transaction
//! record into join-index mutations and the set of root PKs it makes stale.

use southpaw_storage::StateStore;

use crate::errors::ExecutionError;
use crate::fields::field_key;
use crate::index::Indices;
use crate::root::RootHandle;
use crate::stream::ConsumerRecord;

/// Runs one record through every configured root, mutating join indices
/// and each root's pending set in place.
pub fn absorb_record(
    entity: &str,
    record: &ConsumerRecord,
    roots: &mut [RootHandle],
    indices: &Indices,
    store: &mut impl StateStore,
) -> Result<(), ExecutionError> {
    for root in roots.iter_mut() {
        if root.relation.entity == entity {
            root.pending.insert(record.key.clone());
            continue;
        }

        let Some((Some(parent), child)) = root.relation.find(entity) else {
            // Either the entity is unused by this root, or it *is* the
            // root (handled above; `find` never returns `(None, root)`
            // for a different entity).
            continue;
        };

        let join_key = child.join_key.as_deref().expect("validated: child has join_key");
        let parent_key = child.parent_key.as_deref().expect("validated: child has parent_key");

        let new_parent_value = field_key(record.value.as_ref(), join_key)?;
        let join_index = indices.join_index(&child.entity, join_key);
        let old_values = join_index.foreign_keys_of(store, &record.key)?;
        let parent_index = indices.parent_index(&root.relation.entity, &parent.entity, parent_key);

        for old in old_values.iter() {
            if Some(old) != new_parent_value.as_ref() {
                let affected = parent_index.get(store, old)?;
                root.pending.union_from(affected);
            }
        }
        if let Some(new_value) = &new_parent_value {
            let affected = parent_index.get(store, new_value)?;
            root.pending.union_from(affected);
        }

        for old in old_values.iter() {
            if Some(old) != new_parent_value.as_ref() {
                join_index.remove(store, old, &record.key)?;
            }
        }
        if let Some(new_value) = &new_parent_value {
            join_index.add(store, new_value, &record.key)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStreamHub;
    use indexmap::IndexMap;
    use serde_json::json;
    use southpaw_storage::LmdbStateStore;
    use southpaw_types::{JsonRecord, Key, Relation};
    use tempfile::tempdir;

    fn media_with_caption() -> Relation {
        Relation {
            denormalized_name: Some("feed".to_string()),
            entity: "media".to_string(),
            join_key: None,
            parent_key: None,
            children: vec![Relation {
                denormalized_name: None,
                entity: "caption".to_string(),
                join_key: Some("media_id".to_string()),
                parent_key: Some("id".to_string()),
                children: vec![],
            }],
        }
    }

    fn fields(pairs: &[(&str, serde_json::Value)]) -> JsonRecord {
        let mut map = IndexMap::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.clone());
        }
        JsonRecord::new(map)
    }

    #[test]
    fn root_entity_records_go_straight_to_pending() {
        let dir = tempdir().unwrap();
        let mut store = LmdbStateStore::new(dir.path()).unwrap();
        let root = media_with_caption();
        let indices = Indices::open(&mut store, std::slice::from_ref(&root)).unwrap();
        let mut roots = vec![RootHandle::new(root, Box::new(MemoryStreamHub::new().sink("feed")))];

        let record = ConsumerRecord::new(
            Key::from(b"m1".as_slice()),
            Some(fields(&[("id", json!("m1"))])),
            1,
        );
        absorb_record("media", &record, &mut roots, &indices, &mut store).unwrap();
        assert!(roots[0].pending.contains(&Key::from(b"m1".as_slice())));
    }

    #[test]
    fn child_insert_files_join_index_and_marks_parent_pending() {
        let dir = tempdir().unwrap();
        let mut store = LmdbStateStore::new(dir.path()).unwrap();
        let root = media_with_caption();
        let indices = Indices::open(&mut store, std::slice::from_ref(&root)).unwrap();
        let mut roots = vec![RootHandle::new(root, Box::new(MemoryStreamHub::new().sink("feed")))];

        // Parent index already files m1 under root pk m1 (as emit would have).
        indices
            .parent_index("media", "media", "id")
            .add(&mut store, &Key::from(b"m1".as_slice()), &Key::from(b"m1".as_slice()))
            .unwrap();

        let record = ConsumerRecord::new(
            Key::from(b"c1".as_slice()),
            Some(fields(&[("id", json!("c1")), ("media_id", json!("m1"))])),
            2,
        );
        absorb_record("caption", &record, &mut roots, &indices, &mut store).unwrap();

        assert!(roots[0].pending.contains(&Key::from(b"m1".as_slice())));
        assert!(indices
            .join_index("caption", "media_id")
            .get(&store, &Key::from(b"m1".as_slice()))
            .unwrap()
            .contains(&Key::from(b"c1".as_slice())));
    }

    #[test]
    fn reparent_marks_both_old_and_new_parent_pending() {
        let dir = tempdir().unwrap();
        let mut store = LmdbStateStore::new(dir.path()).unwrap();
        let root = media_with_caption();
        let indices = Indices::open(&mut store, std::slice::from_ref(&root)).unwrap();
        let mut roots = vec![RootHandle::new(root, Box::new(MemoryStreamHub::new().sink("feed")))];

        indices
            .parent_index("media", "media", "id")
            .add(&mut store, &Key::from(b"m1".as_slice()), &Key::from(b"m1".as_slice()))
            .unwrap();
        indices
            .parent_index("media", "media", "id")
            .add(&mut store, &Key::from(b"m2".as_slice()), &Key::from(b"m2".as_slice()))
            .unwrap();
        indices
            .join_index("caption", "media_id")
            .add(&mut store, &Key::from(b"m1".as_slice()), &Key::from(b"c1".as_slice()))
            .unwrap();

        let record = ConsumerRecord::new(
            Key::from(b"c1".as_slice()),
            Some(fields(&[("id", json!("c1")), ("media_id", json!("m2"))])),
            3,
        );
        absorb_record("caption", &record, &mut roots, &indices, &mut store).unwrap();

        assert!(roots[0].pending.contains(&Key::from(b"m1".as_slice())));
        assert!(roots[0].pending.contains(&Key::from(b"m2".as_slice())));
        assert!(!indices
            .join_index("caption", "media_id")
            .get(&store, &Key::from(b"m1".as_slice()))
            .unwrap()
            .contains(&Key::from(b"c1".as_slice())));
        assert!(indices
            .join_index("caption", "media_id")
            .get(&store, &Key::from(b"m2".as_slice()))
            .unwrap()
            .contains(&Key::from(b"c1".as_slice())));
    }

    #[test]
    fn spurious_tombstone_with_no_prior_filing_is_a_no_op() {
        let dir = tempdir().unwrap();
        let mut store = LmdbStateStore::new(dir.path()).unwrap();
        let root = media_with_caption();
        let indices = Indices::open(&mut store, std::slice::from_ref(&root)).unwrap();
        let mut roots = vec![RootHandle::new(root, Box::new(MemoryStreamHub::new().sink("feed")))];

        let record = ConsumerRecord::new(Key::from(b"c9".as_slice()), None, 4);
        absorb_record("caption", &record, &mut roots, &indices, &mut store).unwrap();
        assert!(roots[0].pending.is_empty());
    }
}
