//! Schema resolution errors

use thiserror::Error;

/// Result type for schema resolution
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while resolving field paths against a collection
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("field '{0}' does not exist")]
    FieldNotFound(String),

    #[error("frame field '{0}' does not exist")]
    FrameFieldNotFound(String),

    #[error("field '{field}' must be a label type; found '{found}'")]
    NotALabelField { field: String, found: String },

    #[error("field '{field}' must be a labels list type; found '{found}'")]
    NotALabelsListField { field: String, found: String },
}
