//! Pipeline Composer subsystem for lightbox
//!
//! A [`View`] is an ordered list of stages; compiling one against a
//! collection yields a [`Plan`] of primitive operations for the document
//! engine, with each stage validated against the schema scope left by the
//! stages before it.
//!
//! # Design Principles
//!
//! - Fail-fast: any stage error aborts the compile, no partial plans
//! - Scope threading: selections and exclusions narrow what later stages see
//! - Frame attachment is a plan-level flag, computed once up front

mod composer;
mod errors;
mod view;

pub use composer::Plan;
pub use errors::{PlanError, PlanResult};
pub use view::{View, ViewStage};
