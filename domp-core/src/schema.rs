//! # Content Schemas
//!
//! Per-kind schemas for event content: a list of required fields plus optional
//! JSON type constraints. Schema sets load from JSON keyed by kind number:
//!
//! ```json
//! {
//!   "300": {
//!     "required": ["product_name", "description", "price_satoshis"],
//!     "properties": { "price_satoshis": { "type": "integer" } }
//!   }
//! }
//! ```
//!
//! Only `type`, `required` and `properties` are understood. Any other keyword
//! (`minimum`, `maxLength`, `enum`, ...) is rejected when the set is loaded
//! rather than silently left unenforced.
//!
//! Without a schema file the embedded set is used, which carries the required
//! fields of every kind and no type constraints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::{
    error::{ConfigError, SchemaError},
    event::Kind,
};

/// JSON type names usable in a property constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Null,
}

impl FieldType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Null => value.is_null(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Null => "null",
        }
    }

    /// Name of the JSON type of `value`.
    pub fn describe(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertySchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,
}

/// Schema of one kind's content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KindSchema {
    /// Must be `object` when present.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<FieldType>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
}

impl KindSchema {
    fn required(fields: &[&str]) -> Self {
        Self {
            content_type: None,
            required: fields.iter().map(|f| f.to_string()).collect(),
            properties: BTreeMap::new(),
        }
    }
}

/// Schemas for every supported kind. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSet {
    kinds: BTreeMap<u32, KindSchema>,
}

impl Default for SchemaSet {
    fn default() -> Self {
        Self::embedded()
    }
}

impl SchemaSet {
    /// Required content fields of each kind.
    pub fn embedded() -> Self {
        let kinds = Kind::TRANSACTION_SEQUENCE
            .iter()
            .map(|kind| {
                let fields: &[&str] = match kind {
                    Kind::ProductListing => &["product_name", "description", "price_satoshis"],
                    Kind::BidSubmission => &[
                        "product_ref",
                        "bid_amount_satoshis",
                        "buyer_collateral_satoshis",
                    ],
                    Kind::BidAcceptance => &["bid_ref", "ln_invoice"],
                    Kind::PaymentConfirmation => &["bid_ref", "payment_proof", "payment_method"],
                    Kind::ReceiptConfirmation => &["payment_ref", "status"],
                };
                (kind.as_u32(), KindSchema::required(fields))
            })
            .collect();
        Self { kinds }
    }

    /// Parse a schema set from JSON keyed by kind number.
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        let raw: BTreeMap<String, KindSchema> =
            serde_json::from_str(json).map_err(|e| SchemaError::InvalidDefinition(e.to_string()))?;

        let mut kinds = BTreeMap::new();
        for (key, schema) in raw {
            let kind: u32 = key
                .parse()
                .map_err(|_| SchemaError::InvalidDefinition(format!("kind key `{key}` is not a number")))?;
            if Kind::from_u32(kind).is_none() {
                return Err(SchemaError::InvalidDefinition(format!(
                    "kind {kind} is not a DOMP kind"
                )));
            }
            if let Some(other) = schema.content_type.filter(|t| *t != FieldType::Object) {
                return Err(SchemaError::InvalidDefinition(format!(
                    "kind {kind} content type must be object, got {}",
                    other.as_str()
                )));
            }
            kinds.insert(kind, schema);
        }
        Ok(Self { kinds })
    }

    /// Load a schema set from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_json_str(&json)?)
    }

    pub fn get(&self, kind: u32) -> Option<&KindSchema> {
        self.kinds.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = u32> + '_ {
        self.kinds.keys().copied()
    }

    /// Check parsed content against the schema of `kind`.
    pub fn validate(&self, kind: u32, content: &Value) -> Result<(), SchemaError> {
        let schema = self.get(kind).ok_or(SchemaError::UnsupportedKind(kind))?;
        let object = content.as_object().ok_or(SchemaError::ContentNotObject)?;

        for field in &schema.required {
            if !object.contains_key(field) {
                return Err(SchemaError::MissingField {
                    kind,
                    field: field.clone(),
                });
            }
        }

        for (field, property) in &schema.properties {
            let (Some(value), Some(expected)) = (object.get(field), property.field_type) else {
                continue;
            };
            if !expected.matches(value) {
                return Err(SchemaError::WrongType {
                    field: field.clone(),
                    expected: expected.as_str().to_string(),
                    actual: FieldType::describe(value).to_string(),
                });
            }
        }
        Ok(())
    }
}
