//! The registry of reversible foreign-key indices a set of root relations
//! needs (spec §3 "Indices", §9 "Shared indices across roots"): one join
//! index per `(child.entity, child.join_key)`, shared across every root
//! tree that touches that child, and one parent index per
//! `(root.entity, parent.entity, child.parent_key)`, which embeds the root
//! entity and therefore is *not* shared across roots even when they share
//! a child.

use std::collections::HashMap;

use southpaw_storage::{ReversibleIndex, StateStore};
use southpaw_types::Relation;

use crate::errors::ExecutionError;

#[derive(Default)]
pub struct Indices {
    join: HashMap<String, ReversibleIndex>,
    parent: HashMap<String, ReversibleIndex>,
}

impl Indices {
    /// Opens every join/parent index referenced by any edge in `roots`.
    pub fn open(store: &mut impl StateStore, roots: &[Relation]) -> Result<Self, ExecutionError> {
        let mut indices = Indices::default();
        for root in roots {
            for (parent, child) in root.edges() {
                let join_key = child
                    .join_key
                    .as_deref()
                    .expect("validated relation: non-root has join_key");
                let parent_key = child
                    .parent_key
                    .as_deref()
                    .expect("validated relation: non-root has parent_key");

                let join_name = ReversibleIndex::join_index_name(&child.entity, join_key);
                if !indices.join.contains_key(&join_name) {
                    let opened = ReversibleIndex::open(store, &join_name)?;
                    indices.join.insert(join_name, opened);
                }

                let parent_name = ReversibleIndex::parent_index_name(&root.entity, &parent.entity, parent_key);
                if !indices.parent.contains_key(&parent_name) {
                    let opened = ReversibleIndex::open(store, &parent_name)?;
                    indices.parent.insert(parent_name, opened);
                }
            }
        }
        Ok(indices)
    }

    pub fn join_index(&self, child_entity: &str, join_key: &str) -> &ReversibleIndex {
        let name = ReversibleIndex::join_index_name(child_entity, join_key);
        self.join
            .get(&name)
            .unwrap_or_else(|| panic!("join index `{name}` was not opened at startup"))
    }

    pub fn parent_index(&self, root_entity: &str, parent_entity: &str, parent_key: &str) -> &ReversibleIndex {
        let name = ReversibleIndex::parent_index_name(root_entity, parent_entity, parent_key);
        self.parent
            .get(&name)
            .unwrap_or_else(|| panic!("parent index `{name}` was not opened at startup"))
    }

    pub fn flush(&self, store: &mut impl StateStore) -> Result<(), ExecutionError> {
        for index in self.join.values().chain(self.parent.values()) {
            index.flush(store)?;
        }
        Ok(())
    }

    /// Every invariant-1 violation across every index (spec §8 invariant 1),
    /// for `--verify-state`.
    pub fn verify(&self, store: &impl StateStore) -> Result<Vec<(String, southpaw_storage::Violation)>, ExecutionError> {
        let mut out = Vec::new();
        for (name, index) in self.join.iter().chain(self.parent.iter()) {
            for violation in index.verify(store)? {
                out.push((name.clone(), violation));
            }
        }
        Ok(out)
    }
}
