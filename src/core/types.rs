/*!
 * Core Types
 * Common types shared across the dispatch engine
 */

use crate::core::errors::DispatchError;
use crate::handle::HandleRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Operation identifier (64-bit, monotonically increasing)
///
/// Zero is reserved for "no operation" and is never allocated.
/// Ids are never reused over the lifetime of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpId(pub u64);

impl OpId {
    /// The reserved "no operation" id
    pub const NONE: OpId = OpId(0);

    /// Whether this id refers to an actual operation
    #[inline]
    pub fn is_some(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operation kinds tracked by the dispatch table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    UserCall,
    Dir,
    Rmdir,
    File,
    Rmfile,
    Sync,
    Close,
    Read,
    Write,
    Truncate,
    Barrier,
    Enumerate,
}

impl OpKind {
    /// Get operation name for logging
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::UserCall => "user_call",
            OpKind::Dir => "dir",
            OpKind::Rmdir => "rmdir",
            OpKind::File => "file",
            OpKind::Rmfile => "rmfile",
            OpKind::Sync => "sync",
            OpKind::Close => "close",
            OpKind::Read => "read",
            OpKind::Write => "write",
            OpKind::Truncate => "truncate",
            OpKind::Barrier => "barrier",
            OpKind::Enumerate => "enumerate",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal result of an operation, as observed through its future.
///
/// `Ok(Some(..))` carries the resource handle the operation produced (or
/// passed through). `Ok(None)` is the outcome of an operation that has no
/// resource attached, such as a user call chained on nothing. `Err` is a
/// failed operation; every dependent observes the same error.
pub type Outcome = std::result::Result<Option<Arc<HandleRef>>, DispatchError>;
