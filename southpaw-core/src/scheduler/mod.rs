//! Merge-by-time scheduler (spec §4.3): produces a single globally ordered
//! interleaving of pending records across every input stream, honoring
//! upstream transaction boundaries.

use std::collections::VecDeque;

use crate::errors::ExecutionError;
use crate::stream::{ConsumerRecord, StreamSource};
use southpaw_types::{JsonRecord, Key};

/// One input stream plus its currently-buffered batch. The scheduler reads
/// ahead in batches but only ever exposes the single head element, the way
/// a "record holder" does in the source material.
struct Holder {
    entity: String,
    source: Box<dyn StreamSource>,
    buffer: VecDeque<ConsumerRecord>,
}

impl Holder {
    fn fill(&mut self) -> Result<(), ExecutionError> {
        if self.buffer.is_empty() {
            let batch = self.source.read_next()?;
            self.buffer.extend(batch);
        }
        Ok(())
    }

    fn head(&self) -> Option<&ConsumerRecord> {
        self.buffer.front()
    }
}

/// Ordering key for the composite comparator in spec §4.3: timestamp
/// ascending, then "belongs to the current transaction" before "does not",
/// then `total_order` ascending.
fn order_key(record: &ConsumerRecord, current_txn: Option<&str>) -> (i64, u8, i64) {
    let belongs_to_current = match (&record.transaction, current_txn) {
        (Some(txn), Some(current)) if txn.id == current => 0u8,
        _ => 1u8,
    };
    let total_order = record.transaction.as_ref().map(|t| t.total_order).unwrap_or(0);
    (record.timestamp, belongs_to_current, total_order)
}

/// The scheduler's state: one `Holder` per configured input entity plus the
/// synthetic `transactions` stream, and the currently open transaction id
/// (if any), which the comparator above reads on every comparison — there
/// is no persistent heap to re-heapify, so a changing `current_txn` takes
/// effect on the very next pick with no separate rebuild step.
pub struct Scheduler {
    holders: Vec<Holder>,
    current_txn: Option<String>,
}

pub const TRANSACTIONS_ENTITY: &str = "transactions";

impl Scheduler {
    pub fn new() -> Self {
        Self {
            holders: Vec::new(),
            current_txn: None,
        }
    }

    pub fn register(&mut self, entity: impl Into<String>, source: Box<dyn StreamSource>) {
        self.holders.push(Holder {
            entity: entity.into(),
            source,
            buffer: VecDeque::new(),
        });
    }

    /// Current-record lookup by PK for the emit engine (spec §4.5), routed
    /// through the same per-entity stream the merge loop reads from.
    pub fn read_by_pk(&mut self, entity: &str, key: &Key) -> Result<Option<JsonRecord>, ExecutionError> {
        match self.holders.iter_mut().find(|h| h.entity == entity) {
            Some(holder) => holder.source.read_by_pk(key),
            None => Ok(None),
        }
    }

    /// Persists consumed position on every registered stream (spec §4.6
    /// commit step).
    pub fn commit_all(&mut self) -> Result<(), ExecutionError> {
        for holder in &mut self.holders {
            holder.source.commit()?;
        }
        Ok(())
    }

    /// Every registered entity name (input streams plus `transactions`).
    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.holders.iter().map(|h| h.entity.as_str())
    }

    /// The external topic name of `entity`'s stream, for `topics.prefixed`
    /// alias correlation (spec §9).
    pub fn topic_name(&self, entity: &str) -> Option<&str> {
        self.holders
            .iter()
            .find(|h| h.entity == entity)
            .map(|h| h.source.topic_name())
    }

    pub fn current_txn(&self) -> Option<&str> {
        self.current_txn.as_deref()
    }

    pub fn set_current_txn(&mut self, txn: Option<String>) {
        self.current_txn = txn;
    }

    /// Total records behind, summed across every registered stream, for the
    /// idle-flush trigger (spec §4.6).
    pub fn total_lag(&self) -> Result<u64, ExecutionError> {
        let mut total = 0u64;
        for holder in &self.holders {
            total += holder.source.lag()?;
        }
        Ok(total)
    }

    /// Per-input lag, for the per-input lag gauge (spec §4.7).
    pub fn lag_by_entity(&self) -> Result<Vec<(&str, u64)>, ExecutionError> {
        let mut out = Vec::with_capacity(self.holders.len());
        for holder in &self.holders {
            out.push((holder.entity.as_str(), holder.source.lag()?));
        }
        Ok(out)
    }

    /// Whether the named entity might still produce a record if probed
    /// again (non-empty buffer, or positive lag not yet drained into the
    /// buffer). Used to decide whether an out-of-order transaction tag is a
    /// deferral or a fatal violation (spec §4.3).
    pub fn has_more_to_probe(&self, entity: &str) -> Result<bool, ExecutionError> {
        for holder in &self.holders {
            if holder.entity == entity {
                if !holder.buffer.is_empty() {
                    return Ok(true);
                }
                return Ok(holder.source.lag()? > 0);
            }
        }
        Ok(false)
    }

    /// Probes every stream with an empty buffer, then returns the entity
    /// and record that currently sorts first, without consuming it. Calling
    /// `peek` again without an intervening `pop` may return a different
    /// record if probing revealed new data with a smaller order key; that
    /// reflects genuinely updated stream state, not scheduler nondeterminism.
    pub fn peek(&mut self) -> Result<Option<(&str, &ConsumerRecord)>, ExecutionError> {
        for holder in &mut self.holders {
            holder.fill()?;
        }

        let current_txn = self.current_txn.clone();
        let mut best: Option<usize> = None;
        let mut best_key = None;
        for (idx, holder) in self.holders.iter().enumerate() {
            if let Some(record) = holder.head() {
                let key = order_key(record, current_txn.as_deref());
                if best_key.is_none() || key < *best_key.as_ref().unwrap() {
                    best = Some(idx);
                    best_key = Some(key);
                }
            }
        }

        Ok(best.map(|idx| {
            let holder = &self.holders[idx];
            (holder.entity.as_str(), holder.head().unwrap())
        }))
    }

    /// Consumes the record last returned by `peek` (recomputed identically,
    /// so calling `pop` without a preceding `peek` is also well-defined).
    pub fn pop(&mut self) -> Result<Option<(String, ConsumerRecord)>, ExecutionError> {
        for holder in &mut self.holders {
            holder.fill()?;
        }

        let current_txn = self.current_txn.clone();
        let mut best: Option<usize> = None;
        let mut best_key = None;
        for (idx, holder) in self.holders.iter().enumerate() {
            if let Some(record) = holder.head() {
                let key = order_key(record, current_txn.as_deref());
                if best_key.is_none() || key < *best_key.as_ref().unwrap() {
                    best = Some(idx);
                    best_key = Some(key);
                }
            }
        }

        Ok(match best {
            Some(idx) => {
                let holder = &mut self.holders[idx];
                let record = holder.buffer.pop_front().expect("head exists");
                holder.fill()?;
                Some((holder.entity.clone(), record))
            }
            None => None,
        })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStreamHub;
    use southpaw_types::{JsonRecord, Key, TransactionMetadata};

    fn record(key: &str, ts: i64) -> ConsumerRecord {
        ConsumerRecord::new(Key::from(key.as_bytes()), Some(JsonRecord::empty()), ts)
    }

    #[test]
    fn orders_by_timestamp_across_streams() {
        let mut hub = MemoryStreamHub::new();
        let media_source = hub.source("media");
        let caption_source = hub.source("caption");
        hub.feed("media", record("m1", 5));
        hub.feed("caption", record("c1", 1));

        let mut scheduler = Scheduler::new();
        scheduler.register("media", Box::new(media_source));
        scheduler.register("caption", Box::new(caption_source));

        let (entity, _) = scheduler.pop().unwrap().unwrap();
        assert_eq!(entity, "caption");
        let (entity, _) = scheduler.pop().unwrap().unwrap();
        assert_eq!(entity, "media");
        assert!(scheduler.pop().unwrap().is_none());
    }

    #[test]
    fn tie_break_prefers_current_transaction_then_total_order() {
        let mut hub = MemoryStreamHub::new();
        let media_source = hub.source("media");
        let caption_source = hub.source("caption");

        let mut m1 = record("m1", 10);
        m1.transaction = Some(TransactionMetadata {
            id: "tx1".to_string(),
            total_order: 1,
        });
        let mut c1 = record("c1", 10);
        c1.transaction = Some(TransactionMetadata {
            id: "tx1".to_string(),
            total_order: 0,
        });
        let other = record("m2", 10);

        hub.feed("media", other);
        hub.feed("media", m1);
        hub.feed("caption", c1);

        let mut scheduler = Scheduler::new();
        scheduler.register("media", Box::new(media_source));
        scheduler.register("caption", Box::new(caption_source));
        scheduler.set_current_txn(Some("tx1".to_string()));

        let (entity, record) = scheduler.pop().unwrap().unwrap();
        assert_eq!(entity, "caption");
        assert_eq!(record.key, Key::from(b"c1".as_slice()));

        // m1 carries the current transaction (belongs_to_current wins);
        // m2 does not, so it sorts last despite both having timestamp 10.
        let (entity, record) = scheduler.pop().unwrap().unwrap();
        assert_eq!(entity, "media");
        assert_eq!(record.key, Key::from(b"m1".as_slice()));

        let (entity, record) = scheduler.pop().unwrap().unwrap();
        assert_eq!(entity, "media");
        assert_eq!(record.key, Key::from(b"m2".as_slice()));
    }

    #[test]
    fn total_lag_sums_across_streams() {
        let mut hub = MemoryStreamHub::new();
        let media_source = hub.source("media");
        hub.feed("media", record("m1", 1));
        hub.feed("media", record("m2", 2));

        let mut scheduler = Scheduler::new();
        scheduler.register("media", Box::new(media_source));
        assert_eq!(scheduler.total_lag().unwrap(), 2);
    }
}
