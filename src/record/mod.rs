//! Records produced by spider callbacks
//!
//! A record type is described by a `RecordSchema`: an ordered list of named,
//! typed fields with optional defaults. Records are assembled with a
//! `RecordBuilder` and validated once, at construction.
//!
//! # Example
//!
//! ```
//! use sumi_harvest::record::{FieldKind, RecordSchema};
//!
//! let schema = RecordSchema::new("articles")
//!     .required("title", FieldKind::String)
//!     .with_default("views", FieldKind::Integer, 0)
//!     .finish()
//!     .unwrap();
//!
//! let record = schema.builder().set("title", "Hello").build().unwrap();
//! assert_eq!(record.get("views"), Some(&serde_json::json!(0)));
//! ```

mod record;
mod schema;

pub use record::{Record, RecordBuilder};
pub use schema::{FieldKind, FieldSpec, RecordSchema};

use thiserror::Error;

/// Errors raised while declaring a schema or building a record
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("{schema}: unknown field '{field}'")]
    UnknownField { schema: String, field: String },

    #[error("{schema}: field '{field}' expects {expected}")]
    TypeMismatch {
        schema: String,
        field: String,
        expected: FieldKind,
    },

    #[error("{schema}: missing required field '{field}'")]
    MissingField { schema: String, field: String },

    #[error("{schema}: field '{field}' declared twice")]
    DuplicateField { schema: String, field: String },

    #[error("schema name cannot be empty")]
    EmptySchemaName,
}
