use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error; // For domain-specific errors
use uuid::Uuid;

// --- Domain Errors ---
#[derive(Error, Debug, PartialEq)]
pub enum DomainError {
    #[error("Failed to encode document: {0}")]
    Encode(String),
    #[error("Failed to decode document: {0}")]
    Decode(String),
    #[error("Unsupported value for field '{field}': {reason}")]
    UnsupportedValue { field: String, reason: String },
}

// --- Document ID ---
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: String) -> Self {
        Self(id)
    }
    /// Generates a fresh random identifier (hyphenated UUID v4).
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}
impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self::new(id.to_string())
    }
}
impl From<DocumentId> for String {
    fn from(doc_id: DocumentId) -> Self {
        doc_id.0
    }
}

// --- Field Values ---

/// Ordered mapping from field name to value; the open part of a document.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A single document field value.
///
/// Externally tagged so the same derives serve both the stored-record codec
/// and JSON. Byte blobs and numeric arrays survive a round trip exactly,
/// which a plain JSON value representation cannot guarantee.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Array(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Converts a JSON value into a typed field value.
    ///
    /// Integers become `Int`, all other numbers `Float`. `null` has no
    /// stored representation and is rejected.
    pub fn from_json(field: &str, value: &Value) -> Result<Self, DomainError> {
        match value {
            Value::String(s) => Ok(FieldValue::Str(s.clone())),
            Value::Bool(b) => Ok(FieldValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(FieldValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(FieldValue::Float(f))
                } else {
                    Err(DomainError::UnsupportedValue {
                        field: field.to_string(),
                        reason: format!("Number out of range: {n}"),
                    })
                }
            }
            Value::Array(items) => {
                let mut converted = Vec::with_capacity(items.len());
                for item in items {
                    converted.push(FieldValue::from_json(field, item)?);
                }
                Ok(FieldValue::Array(converted))
            }
            Value::Object(map) => {
                let mut converted = BTreeMap::new();
                for (name, item) in map {
                    converted.insert(name.clone(), FieldValue::from_json(field, item)?);
                }
                Ok(FieldValue::Map(converted))
            }
            Value::Null => Err(DomainError::UnsupportedValue {
                field: field.to_string(),
                reason: "null values cannot be stored".to_string(),
            }),
        }
    }

    /// Renders the value as JSON for the caller-facing boundary.
    ///
    /// Bytes render as an array of numbers (serde_json's own shape for
    /// `Vec<u8>`); non-finite floats have no JSON form and render as `null`.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Str(s) => Value::String(s.clone()),
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Bytes(bytes) => {
                Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())
            }
            FieldValue::Array(items) => {
                Value::Array(items.iter().map(FieldValue::to_json).collect())
            }
            FieldValue::Map(map) => Value::Object(
                map.iter()
                    .map(|(name, item)| (name.clone(), item.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}
impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}
impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}
impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}
impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}
impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}
impl From<Vec<f64>> for FieldValue {
    fn from(v: Vec<f64>) -> Self {
        FieldValue::Array(v.into_iter().map(FieldValue::Float).collect())
    }
}
impl From<Vec<f32>> for FieldValue {
    fn from(v: Vec<f32>) -> Self {
        FieldValue::Array(v.into_iter().map(|f| FieldValue::Float(f as f64)).collect())
    }
}

// --- Document ---

/// A document with an identity, a kind tag and arbitrary open fields.
///
/// `kind` names the concrete entity type for display and metadata; it never
/// partitions the key space. All kinds stored in one tenant share a flat
/// key space keyed by `id` alone.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Document {
    id: DocumentId,
    kind: String,
    /// Document data stored as field name -> value pairs.
    fields: FieldMap,
}

impl Document {
    /// Creates a document of the given kind with a freshly generated id.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            id: DocumentId::random(),
            kind: kind.into(),
            fields: FieldMap::new(),
        }
    }

    /// Replaces the generated id with a caller-supplied one.
    pub fn with_id(mut self, id: impl Into<DocumentId>) -> Self {
        self.id = id.into();
        self
    }

    /// Adds or replaces a field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Gets a specific field's value.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Exact-match predicate: true only if every filter entry matches.
    ///
    /// The reserved names `id` and `kind` match against the document header,
    /// letting callers of an enumeration disambiguate kinds sharing the flat
    /// key space. All other names match against the open fields.
    pub fn matches(&self, filter: &FieldMap) -> bool {
        filter.iter().all(|(name, expected)| match name.as_str() {
            "id" => matches!(expected, FieldValue::Str(s) if s == self.id.as_str()),
            "kind" => matches!(expected, FieldValue::Str(s) if s == &self.kind),
            _ => self.fields.get(name) == Some(expected),
        })
    }

    /// Serializes the full document, including all open fields, into the
    /// stored-record representation.
    pub fn encode(&self) -> Result<Vec<u8>, DomainError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| DomainError::Encode(e.to_string()))
    }

    /// Deserializes a stored record back into a document.
    pub fn decode(bytes: &[u8]) -> Result<Self, DomainError> {
        let (document, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| DomainError::Decode(e.to_string()))?;
        Ok(document)
    }
}

// --- Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk() -> Document {
        Document::new("chunk")
            .with_id("c1")
            .with_field("text", "a small passage")
            .with_field("page", 4i64)
            .with_field("score", 0.87)
            .with_field("archived", false)
            .with_field("digest", vec![0xde_u8, 0xad, 0xbe, 0xef])
            .with_field("embedding", vec![0.1_f32, -0.5, 0.25])
    }

    #[test]
    fn new_documents_get_unique_random_ids() {
        let a = Document::new("chunk");
        let b = Document::new("chunk");
        assert_ne!(a.id(), b.id());
        assert!(!a.id().as_str().is_empty());
    }

    #[test]
    fn builder_sets_header_and_fields() {
        let doc = chunk();
        assert_eq!(doc.id().as_str(), "c1");
        assert_eq!(doc.kind(), "chunk");
        assert_eq!(doc.field("page"), Some(&FieldValue::Int(4)));
        assert_eq!(doc.field("missing"), None);
        assert_eq!(doc.fields().len(), 6);
    }

    #[test]
    fn encode_decode_round_trip_preserves_all_field_types() {
        let doc = chunk();
        let bytes = doc.encode().unwrap();
        let decoded = Document::decode(&bytes).unwrap();
        assert_eq!(decoded, doc);
        // Binary and numeric-array fields must survive exactly
        assert_eq!(
            decoded.field("digest"),
            Some(&FieldValue::Bytes(vec![0xde, 0xad, 0xbe, 0xef]))
        );
        assert_eq!(
            decoded.field("embedding"),
            Some(&FieldValue::Array(vec![
                FieldValue::Float(0.1_f32 as f64),
                FieldValue::Float(-0.5_f32 as f64),
                FieldValue::Float(0.25_f32 as f64),
            ]))
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        let result = Document::decode(&[0xff, 0xff, 0xff, 0xff, 0xff]);
        assert!(matches!(result, Err(DomainError::Decode(_))));
    }

    #[test]
    fn nested_maps_round_trip() {
        let doc = Document::new("chunk").with_id("n1").with_field(
            "meta",
            FieldValue::Map(BTreeMap::from([
                ("source".to_string(), FieldValue::Str("upload".to_string())),
                (
                    "offsets".to_string(),
                    FieldValue::Array(vec![FieldValue::Int(0), FieldValue::Int(128)]),
                ),
            ])),
        );
        let decoded = Document::decode(&doc.encode().unwrap()).unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn matches_requires_every_filter_entry() {
        let doc = chunk();
        let mut filter = FieldMap::new();
        filter.insert("text".to_string(), "a small passage".into());
        filter.insert("page".to_string(), 4i64.into());
        assert!(doc.matches(&filter));

        filter.insert("archived".to_string(), true.into());
        assert!(!doc.matches(&filter));
    }

    #[test]
    fn matches_is_exact_not_coercing() {
        let doc = chunk();
        let mut filter = FieldMap::new();
        // Stored as Int(4); a float filter must not match
        filter.insert("page".to_string(), 4.0.into());
        assert!(!doc.matches(&filter));
    }

    #[test]
    fn matches_treats_id_and_kind_as_reserved_names() {
        let doc = chunk();
        let mut filter = FieldMap::new();
        filter.insert("id".to_string(), "c1".into());
        filter.insert("kind".to_string(), "chunk".into());
        assert!(doc.matches(&filter));

        let mut wrong_kind = FieldMap::new();
        wrong_kind.insert("kind".to_string(), "summary".into());
        assert!(!doc.matches(&wrong_kind));

        // A non-string id filter never matches the header
        let mut non_str = FieldMap::new();
        non_str.insert("id".to_string(), 1i64.into());
        assert!(!doc.matches(&non_str));
    }

    #[test]
    fn matches_on_missing_field_is_false() {
        let doc = chunk();
        let mut filter = FieldMap::new();
        filter.insert("nonexistent".to_string(), "x".into());
        assert!(!doc.matches(&filter));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(chunk().matches(&FieldMap::new()));
    }

    #[test]
    fn json_conversion_prefers_integers() {
        let v = FieldValue::from_json("page", &json!(42)).unwrap();
        assert_eq!(v, FieldValue::Int(42));
        let v = FieldValue::from_json("score", &json!(0.5)).unwrap();
        assert_eq!(v, FieldValue::Float(0.5));
    }

    #[test]
    fn json_conversion_rejects_null() {
        let result = FieldValue::from_json("broken", &json!(null));
        assert!(
            matches!(result, Err(DomainError::UnsupportedValue { field, .. }) if field == "broken")
        );
    }

    #[test]
    fn json_conversion_recurses_into_arrays_and_objects() {
        let v = FieldValue::from_json("meta", &json!({"tags": ["a", "b"], "rank": 3})).unwrap();
        assert_eq!(
            v,
            FieldValue::Map(BTreeMap::from([
                (
                    "tags".to_string(),
                    FieldValue::Array(vec!["a".into(), "b".into()])
                ),
                ("rank".to_string(), FieldValue::Int(3)),
            ]))
        );
        // A null nested anywhere poisons the conversion
        assert!(FieldValue::from_json("meta", &json!({"tags": [null]})).is_err());
    }

    #[test]
    fn to_json_renders_bytes_as_number_array() {
        let v = FieldValue::Bytes(vec![1, 2, 3]);
        assert_eq!(v.to_json(), json!([1, 2, 3]));
    }

    #[test]
    fn to_json_renders_non_finite_floats_as_null() {
        assert_eq!(FieldValue::Float(f64::NAN).to_json(), Value::Null);
        assert_eq!(FieldValue::Float(1.5).to_json(), json!(1.5));
    }
}
