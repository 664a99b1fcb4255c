//! The driver loop tying every core component together: probe/merge via the
//! scheduler, absorb changes into the indices and pending sets, emit on
//! trigger, and commit/backup on the durability controller's cadence
//! (spec §4.3-§4.6, §5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use southpaw_storage::{KeySpace, StateStore, Violation, METADATA_KEYSPACE};
use southpaw_types::{Config, KeySet, Relation};

use crate::absorb::absorb_record;
use crate::durability::DurabilityController;
use crate::emit::denormalize_and_emit;
use crate::errors::ExecutionError;
use crate::index::Indices;
use crate::metrics::Metrics;
use crate::root::RootHandle;
use crate::scheduler::{Scheduler, TRANSACTIONS_ENTITY};
use crate::stream::{parse_transaction_envelope, DataCollectionCount, StreamSource, TransactionEnvelope};

pub struct Engine<S: StateStore> {
    store: S,
    scheduler: Scheduler,
    roots: Vec<RootHandle>,
    indices: Indices,
    config: Config,
    durability: DurabilityController,
    metrics: Metrics,
    metadata: KeySpace,
    txn_counts: HashMap<String, u64>,
    keep_running: Arc<AtomicBool>,
}

impl<S: StateStore> Engine<S> {
    /// Opens every index referenced by `roots`, loads each root's pending
    /// set, and registers every input source with the scheduler. `roots`
    /// pairs a validated root `Relation` with the `StreamSink` it owns;
    /// `sources` pairs an entity name (including the synthetic
    /// `"transactions"` entity) with its `StreamSource`.
    pub fn new(
        mut store: S,
        config: Config,
        roots: Vec<RootHandle>,
        sources: Vec<(String, Box<dyn StreamSource>)>,
        run_budget: Duration,
        keep_running: Arc<AtomicBool>,
    ) -> Result<Self, ExecutionError> {
        for root in &roots {
            root.relation.validate_as_root()?;
        }

        let relations: Vec<Relation> = roots.iter().map(|r| r.relation.clone()).collect();
        let indices = Indices::open(&mut store, &relations)?;
        let metadata = store.create_keyspace(METADATA_KEYSPACE)?;

        let mut roots = roots;
        for root in &mut roots {
            let key = root.pending_set_key();
            let loaded = store
                .get(&metadata, key.as_bytes())?
                .map(|bytes| KeySet::from_bytes(&bytes))
                .unwrap_or_default();
            root.set_pending(loaded);
        }

        let mut scheduler = Scheduler::new();
        for (entity, source) in sources {
            scheduler.register(entity, source);
        }

        let durability = DurabilityController::new(
            Duration::from_secs(config.commit.time.s),
            Duration::from_secs(config.backup.time.s),
            run_budget,
        );

        Ok(Self {
            store,
            scheduler,
            roots,
            indices,
            config,
            durability,
            metrics: Metrics::new(),
            metadata,
            txn_counts: HashMap::new(),
            keep_running,
        })
    }

    /// Runs the probe/merge/absorb/emit loop until `keep_running` clears or
    /// (when `run_budget` was non-zero) the run watch expires, per spec §5.
    pub fn run(&mut self) -> Result<(), ExecutionError> {
        self.durability.reset_run();
        while self.keep_running.load(Ordering::Relaxed) {
            if self.durability.should_terminate() {
                self.commit()?;
                self.backup()?;
                break;
            }

            let next = self
                .scheduler
                .peek()?
                .map(|(entity, record)| (entity.to_string(), record.transaction.clone()));

            match next {
                None => {
                    std::thread::sleep(Duration::from_millis(5));
                    self.on_idle()?;
                }
                Some((entity, _)) if entity == TRANSACTIONS_ENTITY => {
                    self.handle_transaction_record()?;
                }
                Some((entity, transaction)) => {
                    if let Some(txn) = &transaction {
                        if self.scheduler.current_txn() != Some(txn.id.as_str()) {
                            if self.scheduler.has_more_to_probe(TRANSACTIONS_ENTITY)? {
                                continue;
                            }
                            return Err(ExecutionError::Violation(format!(
                                "record on `{entity}` carries unknown transaction `{}`",
                                txn.id
                            )));
                        }
                    }

                    let (entity, record) = self.scheduler.pop()?.expect("peek guaranteed a record");
                    self.metrics.record_consumed(&entity);
                    if let Some(txn) = &record.transaction {
                        if Some(txn.id.as_str()) == self.scheduler.current_txn() {
                            *self.txn_counts.entry(entity.clone()).or_insert(0) += 1;
                        }
                    }

                    absorb_record(&entity, &record, &mut self.roots, &self.indices, &mut self.store)?;
                    self.drain_roots_over_trigger()?;
                }
            }
        }
        Ok(())
    }

    fn handle_transaction_record(&mut self) -> Result<(), ExecutionError> {
        let envelope = {
            let (_, record) = self
                .scheduler
                .peek()?
                .expect("caller confirmed the transactions stream has a head record");
            let value = record.value.as_ref().ok_or_else(|| {
                ExecutionError::Violation("transactions stream yielded a tombstone".to_string())
            })?;
            parse_transaction_envelope(value)?
        };

        match envelope {
            TransactionEnvelope::Begin { id } => {
                if self.scheduler.current_txn().is_some() {
                    return Err(ExecutionError::Violation(format!(
                        "BEGIN `{id}` received while a transaction is already open"
                    )));
                }
                self.scheduler.pop()?;
                self.scheduler.set_current_txn(Some(id));
                self.txn_counts.clear();
                Ok(())
            }
            TransactionEnvelope::End { id, data_collections } => {
                if self.scheduler.current_txn() != Some(id.as_str()) {
                    return Err(ExecutionError::Violation(format!(
                        "END `{id}` does not match the currently open transaction"
                    )));
                }
                if !self.counts_satisfied(&data_collections)? {
                    // Deferred: leave the END unpopped and keep probing the
                    // lagging streams named in `data_collections`.
                    return Ok(());
                }
                self.scheduler.pop()?;
                self.scheduler.set_current_txn(None);
                self.txn_counts.clear();
                // "no flush occurs while current_txn is set" (spec §8
                // invariant 6); now that it has cleared, drain immediately.
                self.drain_all_roots()?;
                self.check_triggers()?;
                Ok(())
            }
        }
    }

    /// Per spec §4.3: an alias not part of this deployment is vacuously
    /// satisfied; a known alias must have an observed count at least equal
    /// to the declared `event_count`.
    fn counts_satisfied(&self, data_collections: &[DataCollectionCount]) -> Result<bool, ExecutionError> {
        for dc in data_collections {
            let Some(entity) = self.entity_for_alias(&dc.data_collection) else {
                continue;
            };
            let observed = self.txn_counts.get(entity).copied().unwrap_or(0);
            if observed < dc.event_count {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn entity_for_alias(&self, alias: &str) -> Option<&str> {
        self.scheduler.entities().find(|entity| {
            self.scheduler
                .topic_name(entity)
                .map(|topic| self.config.topics.table_name_for(topic) == alias)
                .unwrap_or(false)
        })
    }

    fn drain_roots_over_trigger(&mut self) -> Result<(), ExecutionError> {
        if self.scheduler.current_txn().is_some() {
            return Ok(());
        }
        let trigger = self.config.create.records.trigger;
        for root in &mut self.roots {
            if root.exceeds_trigger(trigger) {
                denormalize_and_emit(root, &mut self.scheduler, &self.indices, &mut self.store, &self.metrics)?;
            }
        }
        Ok(())
    }

    fn drain_all_roots(&mut self) -> Result<(), ExecutionError> {
        for root in &mut self.roots {
            if !root.pending.is_empty() {
                denormalize_and_emit(root, &mut self.scheduler, &self.indices, &mut self.store, &self.metrics)?;
            }
        }
        Ok(())
    }

    fn on_idle(&mut self) -> Result<(), ExecutionError> {
        let mut total_lag = 0u64;
        for (entity, lag) in self.scheduler.lag_by_entity()? {
            self.metrics.set_lag(entity, lag);
            total_lag += lag;
        }
        self.metrics.set_total_lag(total_lag);
        let mut total_pending = 0usize;
        for root in &self.roots {
            self.metrics.set_pending(root.output_name(), root.pending.len());
            total_pending += root.pending.len();
        }
        self.metrics.set_total_pending(total_pending);

        if self.scheduler.current_txn().is_none() && total_lag <= self.config.total.lag.trigger {
            self.drain_all_roots()?;
        }
        self.check_triggers()
    }

    /// Commit/backup triggers, checked only at transaction boundaries or
    /// when idle (spec §4.6).
    fn check_triggers(&mut self) -> Result<(), ExecutionError> {
        if self.scheduler.current_txn().is_some() {
            return Ok(());
        }
        if self.durability.should_backup() {
            self.backup()?;
        } else if self.durability.should_commit() {
            self.commit()?;
        }
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), ExecutionError> {
        let start = Instant::now();
        self.commit_body()?;
        self.metrics.record_commit(start.elapsed());
        self.durability.reset_commit();
        Ok(())
    }

    pub fn backup(&mut self) -> Result<(), ExecutionError> {
        let start = Instant::now();
        self.commit_body()?;
        self.store.backup()?;
        self.metrics.record_backup_created(start.elapsed());
        self.durability.reset_backup();
        Ok(())
    }

    fn commit_body(&mut self) -> Result<(), ExecutionError> {
        for root in &mut self.roots {
            root.sink.flush()?;
        }
        self.indices.flush(&mut self.store)?;
        for root in &self.roots {
            let key = root.pending_set_key();
            self.store.put(&self.metadata, key.as_bytes(), &root.pending.to_bytes())?;
        }
        self.scheduler.commit_all()?;
        self.store.flush()?;
        Ok(())
    }

    pub fn verify_state(&self) -> Result<Vec<(String, Violation)>, ExecutionError> {
        self.indices.verify(&self.store)
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{ConsumerRecord, MemoryStreamHub};
    use indexmap::IndexMap;
    use serde_json::json;
    use southpaw_storage::LmdbStateStore;
    use southpaw_types::{JsonRecord, Key, TransactionMetadata};
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

    fn new_engine(
        hub: &mut MemoryStreamHub,
        relation: Relation,
        run_budget: Duration,
    ) -> (Engine<LmdbStateStore>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = LmdbStateStore::new(dir.path()).unwrap();
        let sink = hub.sink(relation.denormalized_name.as_deref().unwrap());
        let root = RootHandle::new(relation, Box::new(sink));

        let media = hub.source("media");
        let caption = hub.source("caption");
        let transactions = hub.source(TRANSACTIONS_ENTITY);

        let engine = Engine::new(
            store,
            Config::default(),
            vec![root],
            vec![
                ("media".to_string(), Box::new(media) as Box<dyn StreamSource>),
                ("caption".to_string(), Box::new(caption) as Box<dyn StreamSource>),
                (
                    TRANSACTIONS_ENTITY.to_string(),
                    Box::new(transactions) as Box<dyn StreamSource>,
                ),
            ],
            run_budget,
            Arc::new(AtomicBool::new(true)),
        )
        .unwrap();
        (engine, dir)
    }

    // S1 - single-table root insert.
    #[test]
    fn s1_single_table_root_insert() {
        let mut hub = MemoryStreamHub::new();
        let relation = Relation {
            denormalized_name: Some("feed".to_string()),
            entity: "media".to_string(),
            join_key: None,
            parent_key: None,
            children: vec![],
        };
        let (mut engine, _dir) = new_engine(&mut hub, relation, Duration::from_millis(60));
        hub.feed(
            "media",
            ConsumerRecord::new(Key::from(b"m1".as_slice()), Some(fields(&[("id", json!("m1")), ("title", json!("A"))])), 1),
        );
        engine.run().unwrap();

        let emitted = hub.emitted("feed");
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].0, Key::from(b"m1".as_slice()));
        assert_eq!(emitted[0].1.record["title"], json!("A"));
        assert!(emitted[0].1.children.is_empty());
    }

    // S2/S3 - child after parent, and child before parent converge on the
    // same final output once both rows have been seen.
    #[test]
    fn s2_s3_child_and_parent_converge_regardless_of_arrival_order() {
        for child_first in [false, true] {
            let mut hub = MemoryStreamHub::new();
            let (mut engine, _dir) = new_engine(&mut hub, media_with_caption(), Duration::from_millis(60));

            let media_record = ConsumerRecord::new(Key::from(b"m1".as_slice()), Some(fields(&[("id", json!("m1"))])), 1);
            let caption_record = ConsumerRecord::new(
                Key::from(b"c1".as_slice()),
                Some(fields(&[("id", json!("c1")), ("media_id", json!("m1"))])),
                2,
            );

            if child_first {
                hub.feed("caption", caption_record);
                hub.feed("media", media_record);
            } else {
                hub.feed("media", media_record);
                hub.feed("caption", caption_record);
            }

            engine.run().unwrap();

            let emitted = hub.emitted("feed");
            let (_, denorm) = emitted.iter().find(|(k, _)| *k == Key::from(b"m1".as_slice())).unwrap();
            assert_eq!(denorm.children["caption"].len(), 1);
            assert_eq!(denorm.children["caption"][0].record["id"], json!("c1"));
        }
    }

    // S4 - reparenting a child marks both the old and new parent pending.
    #[test]
    fn s4_reparent_child_updates_both_roots() {
        let mut hub = MemoryStreamHub::new();
        let (mut engine, _dir) = new_engine(&mut hub, media_with_caption(), Duration::from_millis(60));

        hub.feed("media", ConsumerRecord::new(Key::from(b"m1".as_slice()), Some(fields(&[("id", json!("m1"))])), 1));
        hub.feed(
            "caption",
            ConsumerRecord::new(
                Key::from(b"c1".as_slice()),
                Some(fields(&[("id", json!("c1")), ("media_id", json!("m1"))])),
                2,
            ),
        );
        engine.run().unwrap();

        hub.feed(
            "caption",
            ConsumerRecord::new(
                Key::from(b"c1".as_slice()),
                Some(fields(&[("id", json!("c1")), ("media_id", json!("m2"))])),
                3,
            ),
        );
        hub.feed("media", ConsumerRecord::new(Key::from(b"m2".as_slice()), Some(fields(&[("id", json!("m2"))])), 4));
        engine.run().unwrap();

        let emitted: HashMap<Key, _> = hub.emitted("feed").into_iter().collect();
        assert!(emitted[&Key::from(b"m1".as_slice())].children["caption"].is_empty());
        assert_eq!(emitted[&Key::from(b"m2".as_slice())].children["caption"].len(), 1);
    }

    // S5 - a root tombstone scrubs dependent filings and is not resurrected
    // by a later unrelated child update.
    #[test]
    fn s5_root_tombstone_is_not_resurrected() {
        let mut hub = MemoryStreamHub::new();
        let (mut engine, _dir) = new_engine(&mut hub, media_with_caption(), Duration::from_millis(60));

        hub.feed("media", ConsumerRecord::new(Key::from(b"m1".as_slice()), Some(fields(&[("id", json!("m1"))])), 1));
        hub.feed(
            "caption",
            ConsumerRecord::new(
                Key::from(b"c1".as_slice()),
                Some(fields(&[("id", json!("c1")), ("media_id", json!("m1"))])),
                2,
            ),
        );
        engine.run().unwrap();
        assert_eq!(hub.emitted("feed").len(), 1);

        hub.feed("media", ConsumerRecord::new(Key::from(b"m1".as_slice()), None, 3));
        engine.run().unwrap();

        hub.feed(
            "caption",
            ConsumerRecord::new(
                Key::from(b"c1".as_slice()),
                Some(fields(&[("id", json!("c1")), ("media_id", json!("m1"))])),
                4,
            ),
        );
        engine.run().unwrap();

        assert!(engine.roots[0].pending.is_empty());
        assert!(engine
            .indices
            .parent_index("media", "media", "id")
            .foreign_keys_of(&engine.store, &Key::from(b"m1".as_slice()))
            .unwrap()
            .is_empty());
    }

    // S6 - transactional grouping: no drain happens mid-transaction, and a
    // single drain after END emits every root touched by the transaction.
    #[test]
    fn s6_transaction_defers_emit_until_end() {
        let mut hub = MemoryStreamHub::new();
        let (mut engine, _dir) = new_engine(&mut hub, media_with_caption(), Duration::from_millis(200));

        // BEGIN/END carry the synthetic total_order sentinels from spec
        // §4.3 (-1 and +infinity) so they sort before/after every event
        // tagged with the same transaction at an equal timestamp.
        let mut begin = ConsumerRecord::new(
            Key::from(b"tx1-begin".as_slice()),
            Some(fields(&[("status", json!("BEGIN")), ("id", json!("tx1"))])),
            0,
        );
        begin.transaction = Some(TransactionMetadata {
            id: "tx1".to_string(),
            total_order: -1,
        });
        hub.feed(TRANSACTIONS_ENTITY, begin);

        let mut media_record = ConsumerRecord::new(Key::from(b"m1".as_slice()), Some(fields(&[("id", json!("m1"))])), 0);
        media_record.transaction = Some(TransactionMetadata {
            id: "tx1".to_string(),
            total_order: 0,
        });
        let mut caption_record = ConsumerRecord::new(
            Key::from(b"c1".as_slice()),
            Some(fields(&[("id", json!("c1")), ("media_id", json!("m1"))])),
            0,
        );
        caption_record.transaction = Some(TransactionMetadata {
            id: "tx1".to_string(),
            total_order: 1,
        });
        hub.feed("media", media_record);
        hub.feed("caption", caption_record);

        let mut end = ConsumerRecord::new(
            Key::from(b"tx1-end".as_slice()),
            Some(fields(&[
                ("status", json!("END")),
                ("id", json!("tx1")),
                (
                    "data_collections",
                    json!([{"data_collection": "media", "event_count": 1}, {"data_collection": "caption", "event_count": 1}]),
                ),
            ])),
            0,
        );
        end.transaction = Some(TransactionMetadata {
            id: "tx1".to_string(),
            total_order: i64::MAX,
        });
        hub.feed(TRANSACTIONS_ENTITY, end);

        engine.run().unwrap();

        let emitted = hub.emitted("feed");
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].1.children["caption"].len(), 1);
    }
}
