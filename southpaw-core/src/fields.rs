//! Canonicalizes a record field's `serde_json::Value` into the `Key` bytes
//! used by the join/parent indices. Scalars map to their natural byte
//! representation; `null` and absent fields both mean "no value" (spec §4.4
//! `new_parent_value := record.value[child.join_key] (null if tombstone)").

use serde_json::Value;

use southpaw_types::errors::TypeError;
use southpaw_types::{JsonRecord, Key, Record};

use crate::errors::ExecutionError;

pub fn field_key(record: Option<&JsonRecord>, field: &str) -> Result<Option<Key>, ExecutionError> {
    let record = match record {
        Some(record) => record,
        None => return Ok(None),
    };
    match record.field(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(Key::from(s.as_bytes()))),
        Some(Value::Number(n)) => Ok(Some(Key::from(n.to_string().as_bytes()))),
        Some(Value::Bool(b)) => Ok(Some(Key::from(if *b { b"true".as_slice() } else { b"false".as_slice() }))),
        Some(_) => Err(ExecutionError::Field(TypeError::UnexpectedType(field.to_string(), "scalar"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn missing_and_null_both_mean_absent() {
        let mut fields = IndexMap::new();
        fields.insert("media_id".to_string(), Value::Null);
        let record = JsonRecord::new(fields);
        assert_eq!(field_key(Some(&record), "media_id").unwrap(), None);
        assert_eq!(field_key(Some(&record), "missing").unwrap(), None);
        assert_eq!(field_key(None, "media_id").unwrap(), None);
    }

    #[test]
    fn string_and_number_canonicalize_to_bytes() {
        let mut fields = IndexMap::new();
        fields.insert("id".to_string(), Value::String("m1".to_string()));
        fields.insert("rank".to_string(), serde_json::json!(7));
        let record = JsonRecord::new(fields);
        assert_eq!(field_key(Some(&record), "id").unwrap(), Some(Key::from(b"m1".as_slice())));
        assert_eq!(field_key(Some(&record), "rank").unwrap(), Some(Key::from(b"7".as_slice())));
    }
}
