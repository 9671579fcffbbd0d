//! lightbox - a deterministic view-stage pipeline compiler for
//! computer-vision datasets
//!
//! Declarative stages compose into a JSON aggregation plan that a document
//! engine executes over sample collections.

pub mod collection;
pub mod engine;
pub mod expr;
pub mod observability;
pub mod pipeline;
pub mod schema;
pub mod stages;
