//! Error types for expression compilation.

use thiserror::Error;

/// A specialized `Result` type for expression operations.
pub type ExprResult<T> = Result<T, ExprError>;

/// Errors that can occur while compiling an expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    /// A raw expression used an operator the engine does not implement.
    #[error("unknown operator '{0}' in raw expression")]
    UnknownOperator(String),

    /// A regular expression pattern failed to parse.
    #[error("invalid regex pattern '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },
}
