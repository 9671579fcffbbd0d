//! Schema Resolver subsystem for lightbox
//!
//! Answers the questions stages ask before compiling: does a field exist, is
//! it frame-scoped, what is its declared type, is it a labels-list container,
//! and which fields are defaults that selection stages must protect.
//!
//! # Design Principles
//!
//! - Label families are a closed, tagged set (no runtime type inspection)
//! - Frame scope is a path property (`frames.` prefix on video collections)
//! - Resolution is read-only and deterministic

mod defaults;
mod errors;
mod resolve;
mod types;

pub use defaults::{default_frame_paths, default_sample_paths, is_private, FRAMES_PREFIX};
pub use errors::{SchemaError, SchemaResult};
pub use resolve::{
    field_info, handle_frame_field, is_frame_field, labels_list_path, labels_path,
    list_segments, validate_fields_exist, FieldInfo, LabelsPath, PathSegment,
};
pub use types::{FieldSchema, FieldType, LabelKind, MediaType};
