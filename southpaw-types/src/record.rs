use indexmap::IndexMap;
use serde_json::Value;

/// Transaction metadata optionally carried by a record, per spec §3.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionMetadata {
    pub id: String,
    pub total_order: i64,
}

/// Opaque key/value envelope produced by the source decoder (spec §3). The
/// engine only ever needs these three capabilities; concrete serializers
/// (Avro, protobuf, ...) are external collaborators that implement this
/// trait. `JsonRecord` below is the one concrete implementation this crate
/// ships, used by the in-memory stream test double and by the reference
/// join evaluator in the test suite.
pub trait Record {
    fn field(&self, name: &str) -> Option<&Value>;

    fn to_map(&self) -> IndexMap<String, Value>;

    fn is_empty(&self) -> bool;

    fn transaction(&self) -> Option<TransactionMetadata> {
        None
    }
}

/// A flat, ordered field map backed by `serde_json::Value`. This is the
/// record representation passed across the engine's public interfaces
/// (§6 stream client), since the engine's own job is purely structural
/// (join, not transform) and never needs a richer typed schema.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JsonRecord {
    fields: IndexMap<String, Value>,
    transaction: Option<TransactionMetadata>,
}

impl JsonRecord {
    pub fn new(fields: IndexMap<String, Value>) -> Self {
        Self {
            fields,
            transaction: None,
        }
    }

    pub fn with_transaction(mut self, txn: TransactionMetadata) -> Self {
        self.transaction = Some(txn);
        self
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl Record for JsonRecord {
    fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    fn to_map(&self) -> IndexMap<String, Value> {
        self.fields.clone()
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn transaction(&self) -> Option<TransactionMetadata> {
        self.transaction.clone()
    }
}
