//! # coderloop-error
//!
//! Unified error handling for coderloop.
//!
//! ## Design Philosophy
//!
//! - **ErrorKind**: Know what error occurred (e.g., SandboxViolation, NetworkFailed)
//! - **ErrorStatus**: Know whether the condition could clear on its own
//! - **Error Context**: Assist in locating the cause with rich context
//! - **Error Source**: Wrap underlying errors without leaking raw types
//!
//! ## Usage
//!
//! ```rust
//! use coderloop_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::SandboxViolation, "path escapes workspace root")
//!         .with_operation("workspace::resolve")
//!         .with_context("path", "../outside.txt"))
//! }
//! ```
//!
//! ## Principles
//!
//! - All functions return `Result<T, coderloop_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - Same error handled once, subsequent ops only append context
//! - The status is informational: nothing in coderloop retries automatically

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using coderloop Error
pub type Result<T> = std::result::Result<T, Error>;
