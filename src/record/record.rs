use crate::record::{RecordError, RecordSchema};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// A validated record ready for the pipeline
#[derive(Clone, PartialEq)]
pub struct Record {
    schema: Arc<RecordSchema>,
    values: Vec<Value>,
    retry_count: u32,
}

impl Record {
    /// Sink target (the schema name)
    pub fn target(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    /// Value of a declared field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.schema.index_of(field).map(|i| &self.values[i])
    }

    /// Field/value pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.schema
            .fields()
            .iter()
            .map(|f| f.name.as_str())
            .zip(self.values.iter())
    }

    /// Number of times the pipeline has re-delivered this record
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Records one more delivery attempt from the retry lane
    pub fn retry(&mut self) {
        self.retry_count += 1;
    }

    /// JSON object of all fields
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Value::Object(map)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("target", &self.target())
            .field("values", &self.to_json())
            .field("retry_count", &self.retry_count)
            .finish()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.target(), self.to_json())
    }
}

/// Builder validating field names and types against a schema
///
/// Errors are deferred to `build()` so calls can be chained.
pub struct RecordBuilder {
    schema: Arc<RecordSchema>,
    values: Vec<Option<Value>>,
    error: Option<RecordError>,
}

impl RecordBuilder {
    pub(crate) fn new(schema: Arc<RecordSchema>) -> Self {
        let values = vec![None; schema.fields().len()];
        Self {
            schema,
            values,
            error: None,
        }
    }

    /// Sets a field value
    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        if self.error.is_some() {
            return self;
        }

        let value = value.into();
        match self.schema.index_of(field) {
            None => {
                self.error = Some(RecordError::UnknownField {
                    schema: self.schema.name().to_string(),
                    field: field.to_string(),
                });
            }
            Some(i) => {
                let spec = &self.schema.fields()[i];
                if value.is_null() && spec.required {
                    self.error = Some(RecordError::MissingField {
                        schema: self.schema.name().to_string(),
                        field: field.to_string(),
                    });
                } else if !value.is_null() && !spec.kind.accepts(&value) {
                    self.error = Some(RecordError::TypeMismatch {
                        schema: self.schema.name().to_string(),
                        field: field.to_string(),
                        expected: spec.kind,
                    });
                } else {
                    self.values[i] = Some(value);
                }
            }
        }
        self
    }

    /// Fills defaults and validates required fields
    pub fn build(self) -> Result<Record, RecordError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let mut values = Vec::with_capacity(self.values.len());
        for (spec, value) in self.schema.fields().iter().zip(self.values) {
            let value = match (value, &spec.default) {
                (Some(v), _) => v,
                (None, Some(default)) => default.clone(),
                (None, None) if spec.required => {
                    return Err(RecordError::MissingField {
                        schema: self.schema.name().to_string(),
                        field: spec.name.clone(),
                    });
                }
                (None, None) => Value::Null,
            };
            values.push(value);
        }

        Ok(Record {
            schema: self.schema,
            values,
            retry_count: 0,
        })
    }
}
