use crate::record::{RecordBuilder, RecordError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Value type accepted by a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    /// Any JSON value (objects, arrays, mixed)
    Json,
}

impl FieldKind {
    /// Returns true if `value` is acceptable for this kind
    ///
    /// Integers are accepted where floats are expected. `null` is handled by
    /// the builder, not here.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Json => true,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

/// A single declared field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    /// Required fields must be set explicitly or carry a default
    pub required: bool,
    pub default: Option<Value>,
}

/// Ordered schema for one record type
///
/// The schema name doubles as the sink target (table, collection, topic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    name: String,
    fields: Vec<FieldSpec>,
}

impl RecordSchema {
    /// Starts declaring a schema with the given target name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Declares an optional field (defaults to `null`)
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: false,
            default: None,
        });
        self
    }

    /// Declares a field that must be set when building a record
    pub fn required(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: true,
            default: None,
        });
        self
    }

    /// Declares a field that falls back to `default` when not set
    pub fn with_default(
        mut self,
        name: impl Into<String>,
        kind: FieldKind,
        default: impl Into<Value>,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: false,
            default: Some(default.into()),
        });
        self
    }

    /// Validates the declaration and freezes it for sharing between records
    pub fn finish(self) -> Result<Arc<Self>, RecordError> {
        if self.name.trim().is_empty() {
            return Err(RecordError::EmptySchemaName);
        }

        for (i, spec) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|other| other.name == spec.name) {
                return Err(RecordError::DuplicateField {
                    schema: self.name.clone(),
                    field: spec.name.clone(),
                });
            }

            if let Some(default) = &spec.default {
                if !default.is_null() && !spec.kind.accepts(default) {
                    return Err(RecordError::TypeMismatch {
                        schema: self.name.clone(),
                        field: spec.name.clone(),
                        expected: spec.kind,
                    });
                }
            }
        }

        Ok(Arc::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Position of a field in declaration order
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Starts building a record of this type
    pub fn builder(self: &Arc<Self>) -> RecordBuilder {
        RecordBuilder::new(Arc::clone(self))
    }
}
