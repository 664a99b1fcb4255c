use southpaw_types::{Key, KeySet};

use crate::errors::StorageError;
use crate::store::{KeySpace, StateStore};

/// One pair of key-bytes violating the forward/reverse invariant
/// (`pk ∈ forward[k] ⇔ k ∈ reverse[pk]`, spec §8 invariant 1), as reported
/// by `ReversibleIndex::verify`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    /// `pk` is filed under `index_key` in `forward`, but `index_key` is not
    /// filed under `pk` in `reverse`.
    MissingReverse { index_key: Key, pk: Key },
    /// `index_key` is filed under `pk` in `reverse`, but `pk` is not a
    /// member of `forward[index_key]`.
    MissingForward { index_key: Key, pk: Key },
}

/// The reversible foreign-key index described in spec §4.1: a `forward`
/// keyspace (index-key -> set of member keys) plus a `reverse` keyspace
/// (member key -> set of index-keys currently filing it). Both halves are
/// plain `StateStore` keyspaces; this type only knows how to keep them in
/// lockstep. It names the keyspaces but holds no reference to the store
/// itself, so many `ReversibleIndex`es can share one `StateStore`, the way
/// every join/parent index in the engine shares one state store instance.
#[derive(Clone, Debug)]
pub struct ReversibleIndex {
    forward: KeySpace,
    reverse: KeySpace,
}

impl ReversibleIndex {
    /// Builds the join-index name: `JK|<child.entity>|<child.join_key>`
    /// (spec §3).
    pub fn join_index_name(child_entity: &str, join_key: &str) -> String {
        format!("JK|{child_entity}|{join_key}")
    }

    /// Builds the parent-index name:
    /// `PaK|<root.entity>|<parent.entity>|<child.parent_key>` (spec §3).
    pub fn parent_index_name(root_entity: &str, parent_entity: &str, parent_key: &str) -> String {
        format!("PaK|{root_entity}|{parent_entity}|{parent_key}")
    }

    pub fn open(store: &mut impl StateStore, name: &str) -> Result<Self, StorageError> {
        let forward = store.create_keyspace(&format!("{name}#fwd"))?;
        let reverse = store.create_keyspace(&format!("{name}#rev"))?;
        Ok(Self { forward, reverse })
    }

    /// Inserts `pk` into `forward[index_key]` and `index_key` into
    /// `reverse[pk]`. Idempotent.
    pub fn add(&self, store: &mut impl StateStore, index_key: &Key, pk: &Key) -> Result<(), StorageError> {
        let mut forward_set = self.read_set(store, &self.forward, index_key)?;
        if forward_set.insert(pk.clone()) {
            store.put(&self.forward, index_key.as_bytes(), &forward_set.to_bytes())?;
        }
        let mut reverse_set = self.read_set(store, &self.reverse, pk)?;
        if reverse_set.insert(index_key.clone()) {
            store.put(&self.reverse, pk.as_bytes(), &reverse_set.to_bytes())?;
        }
        Ok(())
    }

    /// Inverse of `add`; tolerant of missing members.
    pub fn remove(&self, store: &mut impl StateStore, index_key: &Key, pk: &Key) -> Result<(), StorageError> {
        let mut forward_set = self.read_set(store, &self.forward, index_key)?;
        if forward_set.remove(pk) {
            if forward_set.is_empty() {
                store.delete(&self.forward, index_key.as_bytes())?;
            } else {
                store.put(&self.forward, index_key.as_bytes(), &forward_set.to_bytes())?;
            }
        }
        let mut reverse_set = self.read_set(store, &self.reverse, pk)?;
        if reverse_set.remove(index_key) {
            if reverse_set.is_empty() {
                store.delete(&self.reverse, pk.as_bytes())?;
            } else {
                store.put(&self.reverse, pk.as_bytes(), &reverse_set.to_bytes())?;
            }
        }
        Ok(())
    }

    /// The set of PKs currently filed under `index_key`, or empty.
    pub fn get(&self, store: &impl StateStore, index_key: &Key) -> Result<KeySet, StorageError> {
        self.read_set(store, &self.forward, index_key)
    }

    /// The set of index-keys currently filing `pk` (used to scrub stale
    /// filings, spec §4.5 step 1).
    pub fn foreign_keys_of(&self, store: &impl StateStore, pk: &Key) -> Result<KeySet, StorageError> {
        self.read_set(store, &self.reverse, pk)
    }

    pub fn flush(&self, store: &mut impl StateStore) -> Result<(), StorageError> {
        store.flush()
    }

    /// Returns every key violating `pk ∈ forward[k] ⇔ k ∈ reverse[pk]`
    /// (spec §8 invariant 1), for operator tooling (`--verify-state`).
    pub fn verify(&self, store: &impl StateStore) -> Result<Vec<Violation>, StorageError> {
        let mut violations = Vec::new();

        for (index_key_bytes, set_bytes) in store.iter(&self.forward)? {
            let index_key = Key::new(index_key_bytes);
            let members = KeySet::from_bytes(&set_bytes);
            for pk in members.iter() {
                let reverse_set = self.read_set(store, &self.reverse, pk)?;
                if !reverse_set.contains(&index_key) {
                    violations.push(Violation::MissingReverse {
                        index_key: index_key.clone(),
                        pk: pk.clone(),
                    });
                }
            }
        }

        for (pk_bytes, set_bytes) in store.iter(&self.reverse)? {
            let pk = Key::new(pk_bytes);
            let index_keys = KeySet::from_bytes(&set_bytes);
            for index_key in index_keys.iter() {
                let forward_set = self.read_set(store, &self.forward, index_key)?;
                if !forward_set.contains(&pk) {
                    violations.push(Violation::MissingForward {
                        index_key: index_key.clone(),
                        pk: pk.clone(),
                    });
                }
            }
        }

        Ok(violations)
    }

    fn read_set(
        &self,
        store: &impl StateStore,
        ks: &KeySpace,
        key: &Key,
    ) -> Result<KeySet, StorageError> {
        Ok(store
            .get(ks, key.as_bytes())?
            .map(|bytes| KeySet::from_bytes(&bytes))
            .unwrap_or_default())
    }
}
