//! Error types for view composition and plan compilation.

use thiserror::Error;

use crate::stages::StageError;

/// A specialized `Result` type for view compilation.
pub type PlanResult<T> = Result<T, PlanError>;

/// Errors that abort a view compile. No partial plan is ever produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    /// A stage failed to validate or compile, identified by position.
    #[error("stage {index} ({kind}): {source}")]
    Stage {
        index: usize,
        kind: String,
        #[source]
        source: StageError,
    },

    /// A serialized stage could not be decoded, identified by position.
    #[error("stage {index} could not be decoded: {source}")]
    Decode {
        index: usize,
        #[source]
        source: StageError,
    },

    /// A serialized view document was structurally invalid.
    #[error("malformed view document: {0}")]
    MalformedView(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PlanError::Stage {
            index: 2,
            kind: "filter_labels".to_string(),
            source: StageError::FilterRequiredField("filepath".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "stage 2 (filter_labels): cannot filter required field 'filepath'"
        );

        let err = PlanError::MalformedView("missing 'stages' array".to_string());
        assert_eq!(
            err.to_string(),
            "malformed view document: missing 'stages' array"
        );
    }
}
