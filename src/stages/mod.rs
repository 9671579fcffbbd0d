//! Stage Catalog subsystem for lightbox
//!
//! One tagged union, [`Stage`], covers every view stage. A stage is an
//! immutable value: validate it against a collection, ask whether it needs
//! frames, compile it to primitive operations. Serialized stages are
//! `{"kind", "uuid", "params"}` documents rebuilt through an explicit
//! [`StageRegistry`].
//!
//! # Design Principles
//!
//! - Validation is eager and fail-fast; compile assumes it ran
//! - Compilation is pure lowering to JSON, no collection state mutated
//!   (except best-effort index creation during sort validation)
//! - Randomized stages draw their multiplier once, at construction

mod errors;
mod fields;
mod filter;
mod mutate;
mod objects;
mod registry;
mod sample;
mod stage;

pub use errors::{StageError, StageResult};
pub use fields::SchemaScope;
pub use objects::ObjectRef;
pub use registry::{ParamTable, StageDecoder, StageRegistry};
pub use stage::{MatchFilter, SortTarget, Stage};
