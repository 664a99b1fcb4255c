//! A configured root relation bundled with its runtime state: the pending
//! set of stale PKs (spec §3 "Pending set") and the output stream it owns.

use southpaw_types::{Key, KeySet, Relation};

use crate::stream::StreamSink;

pub struct RootHandle {
    pub relation: Relation,
    pub pending: KeySet,
    pub sink: Box<dyn StreamSink>,
}

impl RootHandle {
    pub fn new(relation: Relation, sink: Box<dyn StreamSink>) -> Self {
        Self {
            relation,
            pending: KeySet::new(),
            sink,
        }
    }

    /// The metadata keyspace key under which this root's pending set is
    /// persisted: `PK|<denormalized_name>` (spec §3, §6).
    pub fn pending_set_key(&self) -> String {
        format!(
            "PK|{}",
            self.relation
                .denormalized_name
                .as_deref()
                .expect("validated: root has denormalized_name")
        )
    }

    pub fn output_name(&self) -> &str {
        self.relation
            .denormalized_name
            .as_deref()
            .expect("validated: root has denormalized_name")
    }

    pub fn set_pending(&mut self, keys: KeySet) {
        self.pending = keys;
    }

    pub fn exceeds_trigger(&self, trigger: usize) -> bool {
        self.pending.len() > trigger
    }

    pub fn pending_keys(&self) -> Vec<Key> {
        self.pending.iter().cloned().collect()
    }
}
