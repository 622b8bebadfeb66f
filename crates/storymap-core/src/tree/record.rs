//! Flat records and the field mapping that gives them structure

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Pseudo field name addressing the record's own Bitable id
pub const RECORD_ID_FIELD: &str = "record_id";

/// One row as fetched from the source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatRecord {
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl FlatRecord {
    pub fn new(record_id: Option<String>, fields: Map<String, Value>) -> Self {
        Self { record_id, fields }
    }

    /// Parse a list-records item (`{"record_id": ..., "fields": {...}}`)
    pub fn from_bitable(item: &Value) -> Self {
        Self {
            record_id: item
                .get("record_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            fields: item
                .get("fields")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Text value of a field; [`RECORD_ID_FIELD`] reads the record's own id
    pub fn text(&self, field: &str) -> Option<String> {
        if field == RECORD_ID_FIELD {
            if let Some(id) = &self.record_id {
                return Some(id.clone());
            }
        }
        self.fields.get(field).and_then(extract_text)
    }

    /// Parent reference from the first configured parent field that holds one
    pub fn parent_reference(&self, mapping: &FieldMapping) -> Option<String> {
        mapping
            .parent_fields
            .iter()
            .filter_map(|name| self.fields.get(name))
            .filter_map(extract_reference)
            .map(|r| r.trim().to_string())
            .find(|r| !r.is_empty())
    }
}

/// Flatten a Bitable cell into text.
///
/// Cells come as plain strings/numbers, arrays of rich-text segments
/// (`[{"type":"text","text":"..."}]`), person/option objects with a `name`,
/// or link cells carrying record ids.
pub fn extract_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(extract_text).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.concat())
            }
        }
        Value::Object(map) => ["text", "name", "value"]
            .iter()
            .find_map(|key| map.get(*key).and_then(extract_text))
            .or_else(|| first_linked_id(map)),
    }
}

/// Read a parent reference: link cells yield their first record id,
/// anything else its text.
fn extract_reference(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => first_linked_id(map).or_else(|| extract_text(value)),
        Value::Array(items) => items
            .iter()
            .find_map(|item| item.as_object().and_then(first_linked_id))
            .or_else(|| extract_text(value)),
        other => extract_text(other),
    }
}

fn first_linked_id(map: &Map<String, Value>) -> Option<String> {
    ["link_record_ids", "record_ids"]
        .iter()
        .filter_map(|key| map.get(*key).and_then(Value::as_array))
        .find_map(|ids| ids.iter().find_map(Value::as_str))
        .map(str::to_string)
}

/// Accepted identifier formats
#[derive(Clone, Default)]
pub enum IdFormat {
    /// Any non-blank identifier
    #[default]
    Any,
    /// Fixed prefix followed by one or more ASCII digits, e.g. `S12`
    PrefixNumeric { prefix: String },
    Pattern(Regex),
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl IdFormat {
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(IdFormat::Pattern)
    }

    pub fn custom(check: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        IdFormat::Custom(Arc::new(check))
    }

    pub fn accepts(&self, id: &str) -> bool {
        if id.trim().is_empty() {
            return false;
        }
        match self {
            IdFormat::Any => true,
            IdFormat::PrefixNumeric { prefix } => id
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit())),
            IdFormat::Pattern(regex) => regex.is_match(id),
            IdFormat::Custom(check) => check(id),
        }
    }
}

impl std::fmt::Debug for IdFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdFormat::Any => write!(f, "Any"),
            IdFormat::PrefixNumeric { prefix } => write!(f, "PrefixNumeric({prefix:?})"),
            IdFormat::Pattern(regex) => write!(f, "Pattern({:?})", regex.as_str()),
            IdFormat::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Which fields carry the identifier, the parent reference and the payload
#[derive(Debug, Clone)]
pub struct FieldMapping {
    pub id_field: String,
    /// Tried in order; the first one holding a reference wins
    pub parent_fields: Vec<String>,
    /// Fields copied onto nodes; empty means every non-structural field
    pub payload_fields: Vec<String>,
    /// Field used as a node's display label
    pub label_field: Option<String>,
    pub id_format: IdFormat,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            id_field: RECORD_ID_FIELD.to_string(),
            parent_fields: vec![
                "Parent Tickets".to_string(),
                "父記錄".to_string(),
                "parent".to_string(),
            ],
            payload_fields: Vec::new(),
            label_field: Some("Story.No".to_string()),
            id_format: IdFormat::Any,
        }
    }
}

impl FieldMapping {
    /// Mapping with a single parent field and no payload filter
    pub fn new(id_field: impl Into<String>, parent_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
            parent_fields: vec![parent_field.into()],
            payload_fields: Vec::new(),
            label_field: None,
            id_format: IdFormat::Any,
        }
    }

    pub fn with_id_format(mut self, id_format: IdFormat) -> Self {
        self.id_format = id_format;
        self
    }

    pub fn with_label(mut self, label_field: impl Into<String>) -> Self {
        self.label_field = Some(label_field.into());
        self
    }

    pub fn with_payload(mut self, fields: Vec<String>) -> Self {
        self.payload_fields = fields;
        self
    }

    fn is_structural(&self, field: &str) -> bool {
        field == self.id_field || self.parent_fields.iter().any(|p| p == field)
    }

    /// Payload fields of a record under this mapping
    pub fn payload(&self, record: &FlatRecord) -> BTreeMap<String, Value> {
        if self.payload_fields.is_empty() {
            record
                .fields
                .iter()
                .filter(|(name, _)| !self.is_structural(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect()
        } else {
            self.payload_fields
                .iter()
                .filter_map(|name| {
                    record
                        .fields
                        .get(name)
                        .map(|value| (name.clone(), value.clone()))
                })
                .collect()
        }
    }

    /// Field the parent id is written to when flattening a tree
    pub fn primary_parent_field(&self) -> &str {
        self.parent_fields
            .first()
            .map(String::as_str)
            .unwrap_or("parent")
    }
}
