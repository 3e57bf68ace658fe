//! Tagged field values for the Registry wire format.
//!
//! Registry rows carry dynamically-shaped field values — a single-key
//! object per field, e.g. `{"text": "..."}` or `{"checkbox": true}`.
//! Single-select-like fields physically arrive as either `select` or
//! `status` depending on how the collection was set up; both parse to
//! the same logical value, and writers can flip between the two shapes
//! when the store reports a representation mismatch.
//!
//! Everything past the adapter boundary works with `FieldValue`; raw
//! JSON never reaches the core components.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Value, json};

/// A parsed Registry field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Title(String),
    Email(String),
    Select(String),
    Status(String),
    Date(Option<DateTime<Utc>>),
    Checkbox(bool),
    Relation(Vec<String>),
    /// Absent or unrecognized.
    Null,
}

/// An ordered map of field name → value, used for both reads and
/// partial updates.
pub type FieldMap = BTreeMap<String, FieldValue>;

impl FieldValue {
    /// Parse a wire value. Unknown shapes parse to `Null` rather than
    /// failing the whole row.
    pub fn from_json(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::Null;
        };
        if let Some(v) = obj.get("text").and_then(Value::as_str) {
            return Self::Text(v.to_string());
        }
        if let Some(v) = obj.get("title").and_then(Value::as_str) {
            return Self::Title(v.to_string());
        }
        if let Some(v) = obj.get("email").and_then(Value::as_str) {
            return Self::Email(v.to_string());
        }
        if let Some(v) = obj.get("select").and_then(Value::as_str) {
            return Self::Select(v.to_string());
        }
        if let Some(v) = obj.get("status").and_then(Value::as_str) {
            return Self::Status(v.to_string());
        }
        if let Some(v) = obj.get("checkbox").and_then(Value::as_bool) {
            return Self::Checkbox(v);
        }
        if let Some(v) = obj.get("relation").and_then(Value::as_array) {
            let ids = v
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            return Self::Relation(ids);
        }
        if let Some(v) = obj.get("date") {
            return match v {
                Value::Null => Self::Date(None),
                Value::String(s) => Self::Date(parse_date(s)),
                _ => Self::Null,
            };
        }
        Self::Null
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(v) => json!({ "text": v }),
            Self::Title(v) => json!({ "title": v }),
            Self::Email(v) => json!({ "email": v }),
            Self::Select(v) => json!({ "select": v }),
            Self::Status(v) => json!({ "status": v }),
            Self::Date(Some(v)) => json!({ "date": v.to_rfc3339() }),
            Self::Date(None) => json!({ "date": null }),
            Self::Checkbox(v) => json!({ "checkbox": v }),
            Self::Relation(ids) => json!({ "relation": ids }),
            Self::Null => Value::Null,
        }
    }

    /// The alternate physical representation for single-select-like
    /// values, used to retry after a type-mismatch error. `None` for
    /// every other kind.
    pub fn alternate(&self) -> Option<Self> {
        match self {
            Self::Select(v) => Some(Self::Status(v.clone())),
            Self::Status(v) => Some(Self::Select(v.clone())),
            _ => None,
        }
    }

    /// Plain-text view of text-like values (text, title, email).
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) | Self::Title(v) | Self::Email(v) => Some(v),
            _ => None,
        }
    }

    /// The option name of a select-like value, whichever shape it came in.
    pub fn as_select_like(&self) -> Option<&str> {
        match self {
            Self::Select(v) | Self::Status(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_checkbox(&self) -> Option<bool> {
        match self {
            Self::Checkbox(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(v) => *v,
            _ => None,
        }
    }

    pub fn as_relation(&self) -> Option<&[String]> {
        match self {
            Self::Relation(ids) => Some(ids),
            _ => None,
        }
    }
}

/// Parse a wire date: RFC 3339, a timezone-less datetime (taken as UTC),
/// or a bare date (midnight UTC).
fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let trimmed = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

/// Parse a wire row's `fields` object into a `FieldMap`.
pub fn parse_fields(fields: &Value) -> FieldMap {
    let mut map = FieldMap::new();
    if let Some(obj) = fields.as_object() {
        for (name, value) in obj {
            map.insert(name.clone(), FieldValue::from_json(value));
        }
    }
    map
}

/// Serialize a `FieldMap` for a partial update or create request.
pub fn fields_to_json(fields: &FieldMap) -> Value {
    let mut obj = serde_json::Map::new();
    for (name, value) in fields {
        obj.insert(name.clone(), value.to_json());
    }
    Value::Object(obj)
}
