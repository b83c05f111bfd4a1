//! The annotated document envelope

use serde::Serialize;
use serde_json::{Map, Value};

/// Fixed overhead charged per annotated value on top of its body.
const ENVELOPE_SIZE: usize = 64;

/// Provenance metadata of a stored document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentMeta {
    /// Document key in its keyspace
    pub id: String,
    /// Expiration (0 = never)
    pub expiration: u32,
    /// Extended attributes, if the storage engine returned any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xattrs: Option<Value>,
}

impl DocumentMeta {
    /// Metadata for a document key with no expiration and no xattrs.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Key/value/options triple prepared for an insert sub-pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertPayload {
    pub key: String,
    pub value: Value,
    pub options: Option<Value>,
}

/// Typed side fields operators attach to a document for downstream operators.
#[derive(Debug, Clone, Default)]
pub struct Attachments {
    /// Working copy of the target document, mutated by Set and written by SendUpdate
    pub clone: Option<Value>,
    /// Prepared insert payload (MERGE insert branch)
    pub insert: Option<InsertPayload>,
    /// Covered index entry values by projection name
    pub covers: Option<Map<String, Value>>,
    /// Full-text search metadata (score etc.)
    pub search_meta: Option<Value>,
    /// Metadata of documents joined or fetched under an alias
    pub alias_meta: Vec<(String, DocumentMeta)>,
}

/// A JSON document plus its execution envelope.
#[derive(Debug, Clone)]
pub struct AnnotatedValue {
    value: Value,
    meta: Option<DocumentMeta>,
    attachments: Attachments,
    bits: u64,
}

impl AnnotatedValue {
    /// Wraps a bare value with no metadata.
    pub fn new(value: Value) -> Self {
        Self {
            value,
            meta: None,
            attachments: Attachments::default(),
            bits: 0,
        }
    }

    /// An empty object, the shape scans emit before Fetch fills it.
    pub fn empty_object() -> Self {
        Self::new(Value::Object(Map::new()))
    }

    /// Wraps a value together with its document metadata.
    pub fn with_meta(value: Value, meta: DocumentMeta) -> Self {
        Self {
            value,
            meta: Some(meta),
            attachments: Attachments::default(),
            bits: 0,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    /// Consumes the envelope and returns the body.
    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn meta(&self) -> Option<&DocumentMeta> {
        self.meta.as_ref()
    }

    pub fn set_meta(&mut self, meta: DocumentMeta) {
        self.meta = Some(meta);
    }

    /// Key of the document this value primarily represents.
    pub fn document_key(&self) -> Option<&str> {
        self.meta.as_ref().map(|m| m.id.as_str())
    }

    /// Key of the document bound to `alias`, falling back to the primary key.
    pub fn key_for(&self, alias: &str) -> Option<&str> {
        self.alias_meta(alias)
            .map(|m| m.id.as_str())
            .or_else(|| self.document_key())
    }

    pub fn alias_meta(&self, alias: &str) -> Option<&DocumentMeta> {
        self.attachments
            .alias_meta
            .iter()
            .find(|(name, _)| name == alias)
            .map(|(_, meta)| meta)
    }

    pub fn set_alias_meta(&mut self, alias: &str, meta: DocumentMeta) {
        match self
            .attachments
            .alias_meta
            .iter_mut()
            .find(|(name, _)| name == alias)
        {
            Some(slot) => slot.1 = meta,
            None => self.attachments.alias_meta.push((alias.to_string(), meta)),
        }
    }

    pub fn attachments(&self) -> &Attachments {
        &self.attachments
    }

    pub fn attachments_mut(&mut self) -> &mut Attachments {
        &mut self.attachments
    }

    /// Reads a top-level field. Missing fields and non-object bodies yield `None`.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.value.as_object().and_then(|obj| obj.get(name))
    }

    /// Sets a top-level field, turning a non-object body into an object first.
    pub fn set_field(&mut self, name: &str, value: Value) {
        if !self.value.is_object() {
            self.value = Value::Object(Map::new());
        }
        if let Value::Object(obj) = &mut self.value {
            obj.insert(name.to_string(), value);
        }
    }

    /// Removes a top-level field, returning it.
    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        self.value.as_object_mut().and_then(|obj| obj.remove(name))
    }

    /// Set-operation provenance bits.
    pub fn bits(&self) -> u64 {
        self.bits
    }

    pub fn set_bits(&mut self, bits: u64) {
        self.bits = bits;
    }

    pub fn add_bits(&mut self, bits: u64) {
        self.bits |= bits;
    }

    /// Estimated in-memory footprint in bytes, used for quota tracking.
    pub fn size(&self) -> usize {
        let mut size = ENVELOPE_SIZE + estimate_size(&self.value);
        if let Some(clone) = &self.attachments.clone {
            size += estimate_size(clone);
        }
        if let Some(insert) = &self.attachments.insert {
            size += insert.key.len() + estimate_size(&insert.value);
        }
        if let Some(covers) = &self.attachments.covers {
            size += covers
                .iter()
                .map(|(k, v)| k.len() + estimate_size(v))
                .sum::<usize>();
        }
        size
    }

    /// Releases the document. The value is consumed and cannot be used again.
    pub fn recycle(self) {
        drop(self);
    }
}

/// Rough byte size of a JSON value.
pub fn estimate_size(value: &Value) -> usize {
    match value {
        Value::Null | Value::Bool(_) => 8,
        Value::Number(_) => 16,
        Value::String(s) => 24 + s.len(),
        Value::Array(items) => 24 + items.iter().map(estimate_size).sum::<usize>(),
        Value::Object(obj) => {
            32 + obj
                .iter()
                .map(|(k, v)| 24 + k.len() + estimate_size(v))
                .sum::<usize>()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_field_on_scalar_becomes_object() {
        let mut av = AnnotatedValue::new(json!(5));
        av.set_field("a", json!(1));
        assert_eq!(av.value(), &json!({"a": 1}));
    }

    #[test]
    fn test_key_for_prefers_alias_meta() {
        let mut av = AnnotatedValue::with_meta(json!({}), DocumentMeta::with_id("outer"));
        assert_eq!(av.key_for("b"), Some("outer"));

        av.set_alias_meta("b", DocumentMeta::with_id("inner"));
        assert_eq!(av.key_for("b"), Some("inner"));
        assert_eq!(av.document_key(), Some("outer"));

        av.set_alias_meta("b", DocumentMeta::with_id("inner2"));
        assert_eq!(av.attachments().alias_meta.len(), 1);
        assert_eq!(av.key_for("b"), Some("inner2"));
    }

    #[test]
    fn test_bits_accumulate() {
        let mut av = AnnotatedValue::empty_object();
        av.add_bits(0b01);
        av.add_bits(0b10);
        assert_eq!(av.bits(), 0b11);
    }

    #[test]
    fn test_size_grows_with_attachments() {
        let mut av = AnnotatedValue::new(json!({"name": "abc"}));
        let base = av.size();
        av.attachments_mut().clone = Some(json!({"name": "abcdef"}));
        assert!(av.size() > base);
    }

    #[test]
    fn test_estimate_size_nested() {
        assert!(estimate_size(&json!({"a": [1, 2, 3]})) > estimate_size(&json!({"a": []})));
    }
}
