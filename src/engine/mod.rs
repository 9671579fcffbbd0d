//! Execution Engine for lightbox
//!
//! Runs compiled plans against in-memory documents. The engine is the
//! reference executor for plans produced by the pipeline composer: it
//! implements the same operation set and the same null and ordering
//! semantics a backing document store would.
//!
//! This module contains:
//! - `errors`: Engine error types
//! - `eval`: Aggregation expression evaluator
//! - `ops`: Plan operations and the runner
//! - `sort`: Total ordering over JSON values

mod errors;
mod eval;
mod ops;
mod sort;

pub use errors::{EngineError, EngineResult};
pub use ops::PlanRunner;
pub use sort::compare_values;

use serde_json::Value;

/// A source of documents that compiled plans execute against.
pub trait DocumentSource {
    /// Materializes the documents to run a plan over. When
    /// `attach_frames` is true, each video sample carries its frames
    /// under a `frames` array ordered by frame number.
    fn documents(&self, attach_frames: bool) -> Vec<Value>;
}
