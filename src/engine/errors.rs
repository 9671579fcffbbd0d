//! Error types for plan execution.

use thiserror::Error;

/// A specialized `Result` type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while evaluating expressions or running a plan.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// An expression used an operator the engine does not implement.
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    /// An operator received an operand of the wrong shape or type.
    #[error("invalid operand for '{op}': {detail}")]
    InvalidOperand { op: String, detail: String },

    /// A `$$` variable was referenced outside of any binding scope.
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),

    /// Division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// A regular expression failed to parse at evaluation time.
    #[error("invalid regex pattern '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    /// A pipeline contained an operation the engine cannot run.
    #[error("unsupported pipeline operation '{0}'")]
    UnsupportedOperation(String),

    /// A pipeline operation was structurally malformed.
    #[error("malformed pipeline operation: {0}")]
    MalformedOperation(String),
}

pub(crate) fn invalid(op: &str, detail: impl Into<String>) -> EngineError {
    EngineError::InvalidOperand {
        op: op.to_string(),
        detail: detail.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EngineError::UnknownOperator("$floor".to_string());
        assert_eq!(err.to_string(), "unknown operator '$floor'");

        let err = invalid("$size", "expected an array");
        assert_eq!(
            err.to_string(),
            "invalid operand for '$size': expected an array"
        );
    }
}
