//! Local copy of an annotation record as the store serves it.

use std::fmt;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::boxes::CornerPair;

/// Characters left as-is in a path segment (RFC 3986 unreserved).
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Store-assigned record identifier. The store may send it as a number or a string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnnotationId {
    Number(i64),
    Text(String),
}

impl AnnotationId {
    /// The id as a single URL path segment.
    pub fn path_segment(&self) -> String {
        match self {
            AnnotationId::Number(n) => n.to_string(),
            AnnotationId::Text(s) => utf8_percent_encode(s, PATH_SEGMENT).to_string(),
        }
    }
}

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationId::Number(n) => write!(f, "{n}"),
            AnnotationId::Text(s) => f.write_str(s),
        }
    }
}

/// One annotation under review.
///
/// Fields the workflow reads are typed; everything else the store sends is
/// kept in `extra` so it can be shown to the reviewer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub id: AnnotationId,

    /// Hand-detector boxes as embedded JSON text.
    #[serde(default, deserialize_with = "embedded_text")]
    pub hand_boxes: Option<String>,

    /// Object-detector bounds as a single-quoted token list.
    #[serde(default, deserialize_with = "embedded_text")]
    pub obj_bounds: Option<String>,

    #[serde(default, deserialize_with = "truthy")]
    pub verified: bool,

    #[serde(default, deserialize_with = "optional_truthy")]
    pub is_valid: Option<bool>,

    #[serde(default)]
    pub verified_hands: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnnotationRecord {
    /// Whether reviewer-corrected hand boxes have been stored.
    ///
    /// An empty list still counts: the reviewer confirmed there are no hands.
    pub fn has_verified_hands(&self) -> bool {
        match &self.verified_hands {
            None | Some(Value::Null) => false,
            Some(Value::String(text)) => !text.trim().is_empty(),
            Some(_) => true,
        }
    }

    pub fn apply_judgment(&mut self, is_valid: bool) {
        self.verified = true;
        self.is_valid = Some(is_valid);
    }

    pub fn apply_verified_hands(&mut self, pairs: &[CornerPair]) {
        self.verified_hands = Some(serde_json::json!(pairs));
    }

    /// Every field as `(name, rendered value)`, sorted by name.
    pub fn fields(&self) -> Vec<(String, String)> {
        let Ok(Value::Object(map)) = serde_json::to_value(self) else {
            return Vec::new();
        };
        let mut fields: Vec<(String, String)> = map
            .into_iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                (key, rendered)
            })
            .collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        fields
    }
}

/// Response body of the unverified-annotation query.
#[derive(Debug, Deserialize)]
pub struct AnnotationPage {
    #[serde(default)]
    pub annotations: Vec<Value>,
}

/// Accepts text as-is and re-serializes structured JSON, so a store that
/// already decoded the field does not fail the whole record.
fn embedded_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    })
}

fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(is_truthy(&Value::deserialize(deserializer)?))
}

fn optional_truthy<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok((!value.is_null()).then(|| is_truthy(&value)))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "t" | "yes" | "1"
        ),
        Value::Array(_) | Value::Object(_) => true,
    }
}
