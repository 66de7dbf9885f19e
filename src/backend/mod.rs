/*!
 * Backend Module
 * Capability trait for the per-platform operation implementations
 */

mod local;

pub use local::LocalBackend;

use crate::core::errors::Result;
use crate::core::flags::{FileFlags, OpFlags};
use crate::core::types::{OpId, Outcome};
use crate::dispatch::engine::Engine;
use crate::dispatch::requests::SharedBuf;
use crate::handle::HandleRef;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What an operation implementation reports back to the engine.
///
/// `Done` completes the operation on the spot with the given handle.
/// `Pending` parks it: the implementation has arranged for a completion to
/// be posted later (an OS callback, a barrier closer), which is only legal
/// for operations scheduled with [`OpFlags::DETACHED`].
pub enum OpStep {
    Done(Option<Arc<HandleRef>>),
    Pending,
}

/// Completion context handed to every backend operation.
///
/// A backend that defers work (overlapped I/O, completion ports) keeps the
/// context and posts the operation's outcome from the notifying thread.
pub struct OpCx {
    pub(crate) engine: Arc<Engine>,
    id: OpId,
}

impl OpCx {
    pub(crate) fn new(engine: Arc<Engine>, id: OpId) -> Self {
        Self { engine, id }
    }

    /// The id of the operation this context belongs to
    pub fn id(&self) -> OpId {
        self.id
    }

    /// Post the operation's terminal outcome. Used by backends whose
    /// operations returned [`OpStep::Pending`].
    pub fn complete(&self, outcome: Outcome) {
        self.engine.complete_op(self.id, outcome);
    }
}

/// A path-addressed request as the backend sees it: the dispatcher's flag
/// policy has already been applied and the precondition resolved.
#[derive(Debug, Clone)]
pub struct PathReq {
    pub path: PathBuf,
    pub flags: FileFlags,
}

/// The capability set of a dispatch backend.
///
/// Every method runs on a worker (or, for immediate continuations, on the
/// completing thread), returns `Done` to complete synchronously, or
/// `Pending` after arranging an asynchronous completion through the
/// provided context.
pub trait OpBackend: Send + Sync + 'static {
    /// Create and/or verify a directory; `READ` delegates to `file`
    fn dir(&self, cx: OpCx, req: PathReq) -> Result<OpStep>;

    /// Remove a directory
    fn rmdir(&self, cx: OpCx, req: PathReq) -> Result<OpStep>;

    /// Open (and possibly create) a file
    fn file(&self, cx: OpCx, req: PathReq) -> Result<OpStep>;

    /// Unlink a file
    fn rmfile(&self, cx: OpCx, req: PathReq) -> Result<OpStep>;

    /// Flush written data to storage
    fn sync(&self, cx: OpCx, handle: &Arc<HandleRef>) -> Result<OpStep>;

    /// Close the descriptor behind a handle
    fn close(&self, cx: OpCx, handle: &Arc<HandleRef>) -> Result<OpStep>;

    /// Positional vectored read into the request's buffers
    fn read(
        &self,
        cx: OpCx,
        handle: &Arc<HandleRef>,
        buffers: &[SharedBuf],
        at: u64,
    ) -> Result<OpStep>;

    /// Positional vectored write from the request's buffers
    fn write(
        &self,
        cx: OpCx,
        handle: &Arc<HandleRef>,
        buffers: &[Bytes],
        at: u64,
    ) -> Result<OpStep>;

    /// Set the file size
    fn truncate(&self, cx: OpCx, handle: &Arc<HandleRef>, size: u64) -> Result<OpStep>;

    /// Immediate children of a directory
    fn enumerate(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Scheduling flags for data operations. A completion-based backend
    /// returns `IMMEDIATE | DETACHED` so read/write park on the OS
    /// callback; the portable backend completes in-line on the worker.
    fn data_op_flags(&self) -> OpFlags {
        OpFlags::empty()
    }
}
