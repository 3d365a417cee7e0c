//! Payload mapping for Qdrant points

use super::{CollectionSchema, KbRow, SearchHit, TextChunk};
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{ListValue, Struct, Value as QdrantValue};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Payload field holding the chunk position within its row
pub const CHUNK_INDEX_FIELD: &str = "chunk_index";

/// Payload field holding the heading path of a chunk
pub const HEADINGS_FIELD: &str = "headings";

/// Payload field holding the blake3 hash of the chunk text
pub const CHUNK_HASH_FIELD: &str = "chunk_hash";

/// Stable point id for one chunk of one row
pub fn point_id(collection: &str, key: &str, chunk_index: usize) -> Uuid {
    let name = format!("{}\u{0}{}\u{0}{}", collection, key, chunk_index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

/// Payload stored with each chunk: row key, content, chunk position, chunk hash and row metadata
pub fn chunk_payload(
    schema: &CollectionSchema,
    row: &KbRow,
    chunk: &TextChunk,
) -> HashMap<String, QdrantValue> {
    let mut map: HashMap<String, QdrantValue> = row
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), json_to_qdrant(v.clone())))
        .collect();

    map.insert(schema.id_column.to_string(), string_value(&row.id));
    map.insert(schema.content_column.to_string(), string_value(&chunk.text));
    map.insert(
        CHUNK_INDEX_FIELD.to_string(),
        QdrantValue {
            kind: Some(Kind::IntegerValue(chunk.index as i64)),
        },
    );
    map.insert(
        HEADINGS_FIELD.to_string(),
        json_to_qdrant(Value::from(chunk.headings.clone())),
    );
    map.insert(CHUNK_HASH_FIELD.to_string(), string_value(&chunk.hash));
    map
}

/// Rebuild a search hit from a point payload
pub fn hit_from_payload(
    schema: &CollectionSchema,
    score: f32,
    payload: HashMap<String, QdrantValue>,
) -> SearchHit {
    let mut metadata: Map<String, Value> = payload
        .into_iter()
        .map(|(k, v)| (k, qdrant_to_json(v)))
        .collect();

    let id = take_string(&mut metadata, schema.id_column);
    let content = take_string(&mut metadata, schema.content_column);

    SearchHit {
        id,
        score,
        content,
        metadata,
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> String {
    match map.remove(key) {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn string_value(s: &str) -> QdrantValue {
    QdrantValue {
        kind: Some(Kind::StringValue(s.to_string())),
    }
}

/// Convert serde_json Value to Qdrant value
pub fn json_to_qdrant(v: Value) -> QdrantValue {
    let kind = match v {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Kind::IntegerValue(i),
            None => Kind::DoubleValue(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Kind::StringValue(s),
        Value::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(json_to_qdrant).collect(),
        }),
        Value::Object(fields) => Kind::StructValue(Struct {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k, json_to_qdrant(v)))
                .collect(),
        }),
    };
    QdrantValue { kind: Some(kind) }
}

/// Convert Qdrant value to serde_json Value
pub fn qdrant_to_json(v: QdrantValue) -> Value {
    match v.kind {
        Some(Kind::NullValue(_)) | None => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => Number::from_f64(d).map(Value::Number).unwrap_or(Value::Null),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.into_iter().map(qdrant_to_json).collect())
        }
        Some(Kind::StructValue(s)) => Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, qdrant_to_json(v)))
                .collect(),
        ),
    }
}
