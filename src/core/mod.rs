/*!
 * Core Module
 * Shared types, errors, flags and limits for the dispatch engine
 */

pub mod errors;
pub mod flags;
pub mod limits;
pub mod types;

pub use errors::{DispatchError, Result};
pub use flags::{FileFlags, OpFlags};
pub use types::{OpId, OpKind, Outcome};
