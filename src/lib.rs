/*!
 * iodispatch
 * Asynchronous file I/O dispatch engine
 *
 * Operations (directory and file lifecycle, positional reads and writes,
 * user callbacks, barriers) are submitted in batches, arranged into a
 * dependency graph at submission time, and driven to completion on a
 * fixed worker pool. Every submission returns a future-typed handle, so
 * pipelines compose without touching threads, and an operation's work
 * begins only after its declared precondition has succeeded.
 */

pub mod backend;
pub mod core;
pub mod dispatch;
pub mod handle;
pub mod pool;
pub mod registry;
pub mod sync;

pub use backend::{LocalBackend, OpBackend, OpCx, OpStep, PathReq};
pub use crate::core::errors::{DispatchError, Result};
pub use crate::core::flags::{FileFlags, OpFlags};
pub use crate::core::types::{OpId, OpKind, Outcome};
pub use dispatch::{
    shared_buf, CallFn, CompletionFn, Dispatcher, OpHandle, PathOpReq, ReadReq, SharedBuf,
    WriteReq,
};
pub use handle::HandleRef;
pub use pool::{process_pool, WorkerPool};
pub use registry::HandleRegistry;
pub use sync::{
    when_all, when_all_futures, when_all_settled, when_all_settled_futures, when_any,
    when_any_futures, when_any_settled, when_any_settled_futures, OpFuture, TypedFuture,
};
