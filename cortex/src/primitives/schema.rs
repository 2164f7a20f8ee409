//! JSON Schema wrapper for primitive payloads.

use jsonschema::JSONSchema;
use schemars::JsonSchema;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

use crate::error::{CortexError, CortexResult};

/// A compiled payload schema. Equality and serialization use the schema document.
#[derive(Clone)]
pub struct PrimitiveSchema {
    document: Value,
    validator: Arc<JSONSchema>,
}

impl PrimitiveSchema {
    pub fn new(primitive: &str, document: Value) -> CortexResult<Self> {
        Self::compile(document).map_err(|message| CortexError::InvalidSchema {
            primitive: primitive.to_string(),
            message,
        })
    }

    fn compile(document: Value) -> Result<Self, String> {
        let validator = JSONSchema::compile(&document).map_err(|e| e.to_string())?;
        Ok(Self {
            document,
            validator: Arc::new(validator),
        })
    }

    /// Schema accepting any params object.
    pub fn any_object(primitive: &str) -> CortexResult<Self> {
        Self::new(primitive, json!({ "type": "object" }))
    }

    /// Derive the schema from a typed argument struct.
    pub fn of<T: JsonSchema>(primitive: &str) -> CortexResult<Self> {
        let root = schemars::schema_for!(T);
        let document = serde_json::to_value(root).map_err(|e| CortexError::InvalidSchema {
            primitive: primitive.to_string(),
            message: e.to_string(),
        })?;
        Self::new(primitive, document)
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn is_valid(&self, params: &Value) -> bool {
        self.validator.is_valid(params)
    }

    /// Validate params, joining every violation into one message.
    pub fn validate(&self, params: &Value) -> Result<(), String> {
        self.validator.validate(params).map_err(|errors| {
            let messages: Vec<String> = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{}: {}", path, e)
                    }
                })
                .collect();
            messages.join("; ")
        })
    }
}

impl PartialEq for PrimitiveSchema {
    fn eq(&self, other: &Self) -> bool {
        self.document == other.document
    }
}

impl fmt::Debug for PrimitiveSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimitiveSchema")
            .field("document", &self.document)
            .finish()
    }
}

impl Serialize for PrimitiveSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.document.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PrimitiveSchema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let document = Value::deserialize(deserializer)?;
        Self::compile(document).map_err(|message| D::Error::custom(format!("invalid schema: {}", message)))
    }
}
