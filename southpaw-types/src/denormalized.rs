use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

/// `{ Record: {...}, Children: { <entity> -> [DenormalizedRecord, ...] } }`
/// (spec §3 and §6). Child sequences are kept in the order they were
/// built by the emit engine, which sorts by canonical primary-key byte
/// order before recursing (spec §4.5) so the sequence here is already
/// deterministic; this type does not re-sort.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DenormalizedRecord {
    #[serde(rename = "Record")]
    pub record: IndexMap<String, Value>,
    #[serde(rename = "Children")]
    pub children: IndexMap<String, Vec<DenormalizedRecord>>,
}

impl DenormalizedRecord {
    pub fn new(record: IndexMap<String, Value>) -> Self {
        Self {
            record,
            children: IndexMap::new(),
        }
    }

    pub fn with_child_entity(mut self, entity: impl Into<String>, records: Vec<DenormalizedRecord>) -> Self {
        self.children.insert(entity.into(), records);
        self
    }
}
