/*!
 * Error Types
 * Centralized error handling with thiserror and serde support
 */

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors surfaced by the dispatch engine.
///
/// Submission-time validation failures are returned synchronously from the
/// submission call; everything else travels through the failed operation's
/// future and is re-observed by every dependent, so the type is `Clone`.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum DispatchError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{op} failed for {path}: os error {code}")]
    Os {
        code: i32,
        op: String,
        path: PathBuf,
    },

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("short transfer: expected {expected} bytes, transferred {transferred}")]
    ShortTransfer { expected: u64, transferred: u64 },

    #[error("internal dispatch invariant violated: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Wrap an OS error with the syscall name and path for diagnostics
    pub fn os(op: &str, path: &Path, err: &io::Error) -> Self {
        DispatchError::Os {
            code: err.raw_os_error().unwrap_or(-1),
            op: op.to_string(),
            path: path.to_path_buf(),
        }
    }

    /// Shorthand for validation failures
    pub fn invalid(msg: impl Into<String>) -> Self {
        DispatchError::InvalidArgument(msg.into())
    }

    /// The raw OS error code, if this error came from a syscall
    pub fn os_code(&self) -> Option<i32> {
        match self {
            DispatchError::Os { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;
