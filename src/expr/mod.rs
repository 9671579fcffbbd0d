//! Expression Engine for lightbox
//!
//! User-level expressions are typed trees built with methods and operator
//! overloads, then compiled into the aggregation expression language. A bare
//! field reference binds to the compile context (the document root, or the
//! current list element inside `map`/`filter`/`reduce`); a leading `$` on a
//! path pins it to the root document regardless of nesting.
//!
//! # Usage
//!
//! ```ignore
//! use lightbox::expr::{field, Expr};
//!
//! // confidence > 0.9 && label == "cat"
//! let filter = field("confidence").gt(0.9) & field("label").eq("cat");
//!
//! // compiled against the current list element
//! let value = filter.compile(Some("$$this"))?;
//! ```

mod ast;
mod compile;
mod errors;

pub use ast::{field, ArithOp, CmpOp, Expr};
pub use compile::mentions_frames;
pub use errors::{ExprError, ExprResult};
