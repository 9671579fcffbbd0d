//! Error types for stage construction, validation, and lowering.

use thiserror::Error;

use crate::expr::ExprError;
use crate::schema::SchemaError;

/// A specialized `Result` type for stage operations.
pub type StageResult<T> = Result<T, StageError>;

/// Errors that can occur while building or compiling a view stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    /// An id was not a valid UUID.
    #[error("invalid id '{0}': expected a UUID")]
    InvalidId(String),

    /// A private (underscore-prefixed) field was named in a selection.
    #[error("cannot select private field '{0}'")]
    SelectPrivateField(String),

    /// A private (underscore-prefixed) field was named in an exclusion.
    #[error("cannot exclude private field '{0}'")]
    ExcludePrivateField(String),

    /// A default field was named in an exclusion.
    #[error("cannot exclude default field '{0}'")]
    ExcludeDefaultField(String),

    /// A required field was named in a filter.
    #[error("cannot filter required field '{0}'")]
    FilterRequiredField(String),

    /// A pinned filter stage was applied to a different label kind.
    #[error("field '{field}' holds {found} labels, expected {expected}")]
    LabelKindMismatch {
        field: String,
        expected: String,
        found: String,
    },

    /// A serialized stage named a kind no registry entry covers.
    #[error("unknown stage kind '{0}'")]
    UnknownStageKind(String),

    /// A serialized stage document was structurally invalid.
    #[error("malformed stage document: {0}")]
    MalformedStage(String),

    /// A serialized stage was missing a required parameter.
    #[error("stage '{kind}' is missing parameter '{name}'")]
    MissingParameter { kind: String, name: String },

    /// A serialized stage carried a parameter of the wrong shape.
    #[error("invalid parameter '{name}' for stage '{kind}': {detail}")]
    InvalidParameter {
        kind: String,
        name: String,
        detail: String,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Expr(#[from] ExprError),
}
