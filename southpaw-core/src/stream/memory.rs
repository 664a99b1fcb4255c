use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use indexmap::IndexMap;

use southpaw_types::{DenormalizedRecord, JsonRecord, Key};

use crate::errors::ExecutionError;

use super::{ConsumerRecord, StreamSink, StreamSource};

#[derive(Default)]
struct SourceState {
    topic: String,
    queue: VecDeque<ConsumerRecord>,
    by_pk: IndexMap<Key, JsonRecord>,
}

#[derive(Default)]
struct SinkState {
    records: IndexMap<Key, DenormalizedRecord>,
}

/// An in-process stand-in for the external stream client (spec §6), shared
/// by reference so test code can both feed input records and drive the
/// engine against the same queues. Not meant to survive process restart;
/// durability properties are exercised against `LmdbStateStore` instead.
#[derive(Default)]
pub struct MemoryStreamHub {
    sources: HashMap<String, Rc<RefCell<SourceState>>>,
    sinks: HashMap<String, Rc<RefCell<SinkState>>>,
}

impl MemoryStreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn source_state(&mut self, entity: &str) -> Rc<RefCell<SourceState>> {
        self.sources
            .entry(entity.to_string())
            .or_insert_with(|| {
                Rc::new(RefCell::new(SourceState {
                    topic: entity.to_string(),
                    ..Default::default()
                }))
            })
            .clone()
    }

    /// Gives a handle suitable for `StreamSource`, for the engine to own.
    /// Call `set_topic_name` beforehand if the test needs a topic name that
    /// differs from the entity name.
    pub fn source(&mut self, entity: &str) -> MemorySourceHandle {
        let state = self.source_state(entity);
        let topic = state.borrow().topic.clone();
        MemorySourceHandle {
            entity: entity.to_string(),
            topic,
            state,
        }
    }

    /// Sets the external topic name for an entity, for `topics.prefixed`
    /// correlation tests. Must be called before the engine reads the
    /// source's `topic_name()`.
    pub fn set_topic_name(&mut self, entity: &str, topic: &str) {
        self.source_state(entity).borrow_mut().topic = topic.to_string();
    }

    /// Pushes a record onto `entity`'s queue and updates its PK-lookup
    /// table, simulating a compacted upstream source.
    pub fn feed(&mut self, entity: &str, record: ConsumerRecord) {
        let state = self.source_state(entity);
        let mut state = state.borrow_mut();
        match &record.value {
            Some(value) => {
                state.by_pk.insert(record.key.clone(), value.clone());
            }
            None => {
                state.by_pk.shift_remove(&record.key);
            }
        }
        state.queue.push_back(record);
    }

    pub fn sink(&mut self, name: &str) -> MemorySinkHandle {
        let state = self
            .sinks
            .entry(name.to_string())
            .or_insert_with(|| Rc::new(RefCell::new(SinkState::default())))
            .clone();
        MemorySinkHandle { state }
    }

    /// Every `(key, record)` currently held by the named output, in write
    /// order, for test assertions.
    pub fn emitted(&self, name: &str) -> Vec<(Key, DenormalizedRecord)> {
        match self.sinks.get(name) {
            Some(state) => state
                .borrow()
                .records
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => Vec::new(),
        }
    }
}

/// `StreamSource` handle backed by `MemoryStreamHub`.
pub struct MemorySourceHandle {
    entity: String,
    topic: String,
    state: Rc<RefCell<SourceState>>,
}

impl StreamSource for MemorySourceHandle {
    fn read_next(&mut self) -> Result<Vec<ConsumerRecord>, ExecutionError> {
        Ok(self.state.borrow_mut().queue.drain(..).collect())
    }

    fn read_by_pk(&mut self, key: &Key) -> Result<Option<JsonRecord>, ExecutionError> {
        Ok(self.state.borrow().by_pk.get(key).cloned())
    }

    fn lag(&self) -> Result<u64, ExecutionError> {
        Ok(self.state.borrow().queue.len() as u64)
    }

    fn commit(&mut self) -> Result<(), ExecutionError> {
        Ok(())
    }

    fn table_name(&self) -> &str {
        &self.entity
    }

    fn topic_name(&self) -> &str {
        &self.topic
    }
}

/// `StreamSink` handle backed by `MemoryStreamHub`.
pub struct MemorySinkHandle {
    state: Rc<RefCell<SinkState>>,
}

impl StreamSink for MemorySinkHandle {
    fn write(&mut self, key: &Key, record: &DenormalizedRecord) -> Result<(), ExecutionError> {
        self.state.borrow_mut().records.insert(key.clone(), record.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ExecutionError> {
        Ok(())
    }
}
