//! Observability subsystem for lightbox
//!
//! Structured JSON logs with deterministic key ordering, one line per event,
//! written synchronously with no buffering. Compilation and execution never
//! depend on logging side effects.

mod logger;

pub use logger::{Logger, Severity};
