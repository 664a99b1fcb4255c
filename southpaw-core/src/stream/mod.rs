//! Stream client interfaces (spec §6) and an in-memory test double used by
//! the engine's own test suite and by downstream integration tests.

mod memory;
#[cfg(feature = "kafka")]
mod kafka;

pub use memory::{MemorySinkHandle, MemorySourceHandle, MemoryStreamHub};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaStreamSink, KafkaStreamSource};

use southpaw_types::errors::BoxedError;
use southpaw_types::{JsonRecord, Key, Record, TransactionMetadata};

use crate::errors::ExecutionError;

/// `ConsumerRecord = { key_bytes, value_record_or_null, timestamp, metadata? }`
/// (spec §6). A `value` of `None` is a tombstone.
#[derive(Clone, Debug)]
pub struct ConsumerRecord {
    pub key: Key,
    pub value: Option<JsonRecord>,
    pub timestamp: i64,
    pub transaction: Option<TransactionMetadata>,
}

impl ConsumerRecord {
    pub fn new(key: Key, value: Option<JsonRecord>, timestamp: i64) -> Self {
        let transaction = value.as_ref().and_then(|v| v.transaction());
        Self {
            key,
            value,
            timestamp,
            transaction,
        }
    }

    pub fn with_transaction(mut self, transaction: TransactionMetadata) -> Self {
        self.transaction = Some(transaction);
        self
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Per-entity input stream (spec §6, "Stream client (input)").
pub trait StreamSource {
    /// A restartable, finite batch read. Returning an empty vector means
    /// "nothing ready right now", not end-of-stream; the scheduler treats
    /// the entity as needing to be probed again later.
    fn read_next(&mut self) -> Result<Vec<ConsumerRecord>, ExecutionError>;

    /// Current record for `key`, or `None` if absent/tombstoned.
    fn read_by_pk(&mut self, key: &Key) -> Result<Option<JsonRecord>, ExecutionError>;

    /// Non-negative count of records behind the stream's head.
    fn lag(&self) -> Result<u64, ExecutionError>;

    /// Persists consumed position up to the latest record yielded by
    /// `read_next`.
    fn commit(&mut self) -> Result<(), ExecutionError>;

    /// Stable table identifier used for transaction-alias correlation.
    fn table_name(&self) -> &str;

    /// Stable topic identifier (may differ from `table_name` by a prefix,
    /// spec §9 `topics.prefixed`).
    fn topic_name(&self) -> &str;
}

/// Per-root output stream (spec §6, "Stream client (output)").
pub trait StreamSink {
    fn write(&mut self, key: &Key, record: &southpaw_types::DenormalizedRecord) -> Result<(), ExecutionError>;

    fn flush(&mut self) -> Result<(), ExecutionError>;
}

/// `{status: "BEGIN"|"END", id, data_collections?}` carried by the
/// synthetic `transactions` stream (spec §4.3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionEnvelope {
    Begin { id: String },
    End {
        id: String,
        data_collections: Vec<DataCollectionCount>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataCollectionCount {
    pub data_collection: String,
    pub event_count: u64,
}

/// Decodes a `transactions` stream record's value into its envelope.
/// Protocol violations (missing/invalid `status`) are fatal per spec §7.
pub fn parse_transaction_envelope(record: &JsonRecord) -> Result<TransactionEnvelope, ExecutionError> {
    let status = record
        .field("status")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ExecutionError::Violation("transactions record missing `status`".into()))?;
    let id = record
        .field("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ExecutionError::Violation("transactions record missing `id`".into()))?
        .to_string();

    match status {
        "BEGIN" => Ok(TransactionEnvelope::Begin { id }),
        "END" => {
            let data_collections = record
                .field("data_collections")
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| {
                            let data_collection = item.get("data_collection")?.as_str()?.to_string();
                            let event_count = item.get("event_count")?.as_u64()?;
                            Some(DataCollectionCount {
                                data_collection,
                                event_count,
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(TransactionEnvelope::End { id, data_collections })
        }
        other => Err(ExecutionError::Violation(format!(
            "transactions record carries unknown status `{other}`"
        ))),
    }
}

pub(crate) fn boxed(err: impl std::error::Error + Send + Sync + 'static) -> BoxedError {
    Box::new(err)
}
