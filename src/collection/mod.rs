//! Sample collections
//!
//! `SampleCollection` is the schema-side seam the compiler validates and
//! resolves against; `MemoryCollection` is the in-memory store used as the
//! storage collaborator.

mod memory;

pub use memory::MemoryCollection;

use crate::schema::{FieldSchema, MediaType};
use thiserror::Error;

/// Result type for collection mutations
pub type CollectionResult<T> = Result<T, CollectionError>;

/// Errors raised when inserting documents into a collection
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollectionError {
    #[error("sample documents must be JSON objects")]
    NotADocument,

    #[error("samples require a 'filepath'")]
    MissingFilepath,

    #[error("frames require an integer 'frame_number'")]
    MissingFrameNumber,

    #[error("unknown sample id '{0}'")]
    UnknownSampleId(String),

    #[error("frames require a video collection")]
    NotAVideoCollection,
}

/// The schema-side view of a collection that stages compile against
pub trait SampleCollection {
    /// The media type of the samples
    fn media_type(&self) -> MediaType;

    /// Declared sample-level fields
    fn field_schema(&self) -> &FieldSchema;

    /// Declared frame-level fields (empty for image collections)
    fn frame_field_schema(&self) -> &FieldSchema;

    /// Best-effort, idempotent index creation on a stored field path
    fn create_index(&self, path: &str);
}
