/*!
 * Dispatch Module
 * The dispatcher: typed submission surface over the chaining engine
 *
 * Callers submit batches of operations with optional preconditions and get
 * a future-typed handle per operation. An operation's work begins only
 * after its declared precondition has finished; failures propagate to
 * every dependent through the outcome their thunks receive.
 */

mod barrier;
pub(crate) mod engine;
pub mod requests;
mod table;

pub use requests::{shared_buf, PathOpReq, ReadReq, SharedBuf, WriteReq};

use crate::backend::{LocalBackend, OpBackend, OpCx, OpStep, PathReq};
use crate::core::errors::{DispatchError, Result};
use crate::core::flags::{FileFlags, OpFlags};
use crate::core::types::{OpId, OpKind, Outcome};
use crate::handle::HandleRef;
use crate::pool::{process_pool, ImmediateQueue, WorkerPool};
use crate::registry::HandleRegistry;
use crate::sync::promise::{OpFuture, ResultCell, TypedFuture};
use engine::Engine;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// The caller-facing handle of a scheduled operation: its id plus the
/// shared future of its outcome. Cheap to clone; used as the precondition
/// of later submissions.
#[derive(Clone)]
pub struct OpHandle {
    pub(crate) id: OpId,
    pub(crate) dispatcher: u64,
    pub(crate) future: OpFuture,
}

impl OpHandle {
    pub fn id(&self) -> OpId {
        self.id
    }

    pub fn future(&self) -> &OpFuture {
        &self.future
    }

    /// Block until the operation completes; error if it failed
    pub fn get(&self) -> Result<Option<Arc<HandleRef>>> {
        self.future.get()
    }

    /// Block until the operation completes and return its outcome
    pub fn wait(&self) -> Outcome {
        self.future.wait()
    }

    pub fn is_ready(&self) -> bool {
        self.future.is_ready()
    }
}

impl std::fmt::Debug for OpHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpHandle")
            .field("id", &self.id)
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// A user callable scheduled through [`Dispatcher::call`]
pub type CallFn<T> = Box<dyn FnOnce() -> Result<T> + Send + 'static>;

/// A user completion routine scheduled through [`Dispatcher::completion`].
/// May return [`OpStep::Pending`] when scheduled with
/// [`OpFlags::DETACHED`]; the outcome is then posted later through
/// [`Dispatcher::post_completion`].
pub type CompletionFn =
    Box<dyn FnOnce(OpId, Option<Arc<HandleRef>>) -> Result<OpStep> + Send + 'static>;

/// An asynchronous file I/O dispatcher.
///
/// Operations are arranged into a dependency graph at submission time and
/// driven to completion on a fixed worker pool. Dropping the dispatcher
/// waits for every extant operation to finish.
pub struct Dispatcher {
    engine: Arc<Engine>,
}

impl Dispatcher {
    /// A dispatcher over the portable local backend, with a flag policy
    /// forced onto (and masked off) every request it processes
    pub fn new(pool: Arc<WorkerPool>, flags_force: FileFlags, flags_mask: FileFlags) -> Self {
        let registry = HandleRegistry::new();
        let backend: Arc<dyn OpBackend> = Arc::new(LocalBackend::new(Arc::clone(&registry)));
        info!(
            threads = pool.concurrency(),
            "dispatcher created over local backend"
        );
        Self {
            engine: Engine::new(pool, registry, backend, flags_force, flags_mask),
        }
    }

    /// A dispatcher over the process-wide pool with no flag policy
    pub fn with_defaults() -> Self {
        Self::new(process_pool(), FileFlags::empty(), FileFlags::empty())
    }

    /// A dispatcher over a caller-selected backend capability set
    pub fn with_backend(
        pool: Arc<WorkerPool>,
        registry: Arc<HandleRegistry>,
        backend: Arc<dyn OpBackend>,
        flags_force: FileFlags,
        flags_mask: FileFlags,
    ) -> Self {
        Self {
            engine: Engine::new(pool, registry, backend, flags_force, flags_mask),
        }
    }

    /// Number of live handles registered by this dispatcher
    pub fn count(&self) -> usize {
        self.engine.registry.count()
    }

    /// Number of operations currently in the dispatch table
    pub fn wait_queue_depth(&self) -> usize {
        self.engine.table.len()
    }

    /// The registry tracking this dispatcher's open handles
    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.engine.registry
    }

    // ------------------------------------------------------------------
    // Path-addressed operations
    // ------------------------------------------------------------------

    /// Create/verify directories
    pub fn dir(&self, reqs: Vec<PathOpReq>) -> Result<Vec<OpHandle>> {
        self.chain_path_ops(OpKind::Dir, reqs, |backend, cx, req| backend.dir(cx, req))
    }

    /// Remove directories
    pub fn rmdir(&self, reqs: Vec<PathOpReq>) -> Result<Vec<OpHandle>> {
        self.chain_path_ops(OpKind::Rmdir, reqs, |backend, cx, req| {
            backend.rmdir(cx, req)
        })
    }

    /// Open (and possibly create) files
    pub fn file(&self, reqs: Vec<PathOpReq>) -> Result<Vec<OpHandle>> {
        self.chain_path_ops(OpKind::File, reqs, |backend, cx, req| {
            backend.file(cx, req)
        })
    }

    /// Unlink files
    pub fn rmfile(&self, reqs: Vec<PathOpReq>) -> Result<Vec<OpHandle>> {
        self.chain_path_ops(OpKind::Rmfile, reqs, |backend, cx, req| {
            backend.rmfile(cx, req)
        })
    }

    // ------------------------------------------------------------------
    // Handle-addressed operations
    // ------------------------------------------------------------------

    /// Fsync the files behind the given operations' handles
    pub fn sync(&self, ops: Vec<OpHandle>) -> Result<Vec<OpHandle>> {
        self.chain_handle_ops(OpKind::Sync, ops, |backend, cx, handle| {
            backend.sync(cx, handle)
        })
    }

    /// Close the files behind the given operations' handles
    pub fn close(&self, ops: Vec<OpHandle>) -> Result<Vec<OpHandle>> {
        self.chain_handle_ops(OpKind::Close, ops, |backend, cx, handle| {
            backend.close(cx, handle)
        })
    }

    /// Set file sizes; `ops` and `sizes` are paired
    pub fn truncate(&self, ops: Vec<OpHandle>, sizes: Vec<u64>) -> Result<Vec<OpHandle>> {
        if ops.len() != sizes.len() {
            return Err(DispatchError::invalid(
                "truncate requires one size per operation",
            ));
        }
        self.validate_owned(ops.iter())?;

        let immediates = ImmediateQueue::new();
        let guard = self.engine.table.lock();
        let mut out = Vec::with_capacity(ops.len());
        for (target, size) in ops.iter().zip(sizes) {
            let backend = Arc::clone(&self.engine.backend);
            out.push(self.engine.chain_op(
                &immediates,
                OpKind::Truncate,
                Some(target),
                OpFlags::empty(),
                move |engine, id, input| {
                    let handle = require_handle(input)?;
                    backend.truncate(OpCx::new(Arc::clone(engine), id), &handle, size)
                },
            )?);
        }
        drop(guard);
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Data operations
    // ------------------------------------------------------------------

    /// Positional vectored reads
    pub fn read(&self, reqs: Vec<ReadReq>) -> Result<Vec<OpHandle>> {
        self.validate_owned(reqs.iter().map(|r| &r.precondition))?;
        let flags = self.engine.backend.data_op_flags();

        let immediates = ImmediateQueue::new();
        let guard = self.engine.table.lock();
        let mut out = Vec::with_capacity(reqs.len());
        for req in reqs {
            let backend = Arc::clone(&self.engine.backend);
            let ReadReq {
                precondition,
                buffers,
                at,
            } = req;
            out.push(self.engine.chain_op(
                &immediates,
                OpKind::Read,
                Some(&precondition),
                flags,
                move |engine, id, input| {
                    let handle = require_handle(input)?;
                    backend.read(OpCx::new(Arc::clone(engine), id), &handle, &buffers, at)
                },
            )?);
        }
        drop(guard);
        Ok(out)
    }

    /// Positional vectored writes
    pub fn write(&self, reqs: Vec<WriteReq>) -> Result<Vec<OpHandle>> {
        self.validate_owned(reqs.iter().map(|r| &r.precondition))?;
        let flags = self.engine.backend.data_op_flags();

        let immediates = ImmediateQueue::new();
        let guard = self.engine.table.lock();
        let mut out = Vec::with_capacity(reqs.len());
        for req in reqs {
            let backend = Arc::clone(&self.engine.backend);
            let WriteReq {
                precondition,
                buffers,
                at,
            } = req;
            out.push(self.engine.chain_op(
                &immediates,
                OpKind::Write,
                Some(&precondition),
                flags,
                move |engine, id, input| {
                    let handle = require_handle(input)?;
                    backend.write(OpCx::new(Arc::clone(engine), id), &handle, &buffers, at)
                },
            )?);
        }
        drop(guard);
        Ok(out)
    }

    // ------------------------------------------------------------------
    // User callbacks and combinators
    // ------------------------------------------------------------------

    /// Schedule user callables. Returns a typed future per callable next
    /// to the usual operation handles. `preconditions` is either empty or
    /// one per callable.
    pub fn call<T>(
        &self,
        preconditions: Vec<OpHandle>,
        callables: Vec<CallFn<T>>,
    ) -> Result<(Vec<TypedFuture<T>>, Vec<OpHandle>)>
    where
        T: Clone + Send + 'static,
    {
        if !preconditions.is_empty() && preconditions.len() != callables.len() {
            return Err(DispatchError::invalid(
                "preconditions must be empty or exactly one per callable",
            ));
        }
        self.validate_owned(preconditions.iter())?;

        let immediates = ImmediateQueue::new();
        let guard = self.engine.table.lock();
        let mut futures = Vec::with_capacity(callables.len());
        let mut handles = Vec::with_capacity(callables.len());
        for (index, callable) in callables.into_iter().enumerate() {
            let cell = ResultCell::new();
            futures.push(TypedFuture::new(Arc::clone(&cell)));
            handles.push(self.engine.chain_op(
                &immediates,
                OpKind::UserCall,
                preconditions.get(index),
                OpFlags::empty(),
                move |_engine, _id, input| match input {
                    Err(err) => {
                        cell.fulfil(Err(err.clone()));
                        Err(err)
                    }
                    Ok(handle) => match callable() {
                        Ok(value) => {
                            cell.fulfil(Ok(value));
                            Ok(OpStep::Done(handle))
                        }
                        Err(err) => {
                            cell.fulfil(Err(err.clone()));
                            Err(err)
                        }
                    },
                },
            )?);
        }
        drop(guard);
        Ok((futures, handles))
    }

    /// Schedule raw completion routines with explicit scheduling flags.
    /// `ops` is either empty or one precondition per callback.
    pub fn completion(
        &self,
        ops: Vec<OpHandle>,
        callbacks: Vec<(OpFlags, CompletionFn)>,
    ) -> Result<Vec<OpHandle>> {
        if !ops.is_empty() && ops.len() != callbacks.len() {
            return Err(DispatchError::invalid(
                "preconditions must be empty or exactly one per callback",
            ));
        }
        self.validate_owned(ops.iter())?;

        let immediates = ImmediateQueue::new();
        let guard = self.engine.table.lock();
        let mut out = Vec::with_capacity(callbacks.len());
        for (index, (flags, callback)) in callbacks.into_iter().enumerate() {
            out.push(self.engine.chain_op(
                &immediates,
                OpKind::UserCall,
                ops.get(index),
                flags,
                move |_engine, id, input| {
                    let handle = input?;
                    callback(id, handle)
                },
            )?);
        }
        drop(guard);
        Ok(out)
    }

    /// Post the outcome of an operation that deferred its completion
    /// (scheduled with [`OpFlags::DETACHED`])
    pub fn post_completion(&self, id: OpId, outcome: Outcome) {
        self.engine.complete_op(id, outcome);
    }

    /// Join `ops` and fan their individual outcomes back out: output i
    /// becomes ready only after every input has finished, and carries
    /// input i's own outcome (success or error)
    pub fn barrier(&self, ops: Vec<OpHandle>) -> Result<Vec<OpHandle>> {
        self.validate_owned(ops.iter())?;
        barrier::chain_barrier(&self.engine, &ops)
    }

    /// List the immediate children of each input directory. Returns one
    /// independent `TypedFuture<Vec<PathBuf>>` per path next to the usual
    /// operation handles. `preconditions` is either empty or one per path.
    pub fn enumerate(
        &self,
        preconditions: Vec<OpHandle>,
        paths: Vec<PathBuf>,
    ) -> Result<(Vec<TypedFuture<Vec<PathBuf>>>, Vec<OpHandle>)> {
        if !preconditions.is_empty() && preconditions.len() != paths.len() {
            return Err(DispatchError::invalid(
                "preconditions must be empty or exactly one per path",
            ));
        }
        if paths.iter().any(|p| p.as_os_str().is_empty()) {
            return Err(DispatchError::invalid("paths must not be empty"));
        }
        self.validate_owned(preconditions.iter())?;

        let immediates = ImmediateQueue::new();
        let guard = self.engine.table.lock();
        let mut futures = Vec::with_capacity(paths.len());
        let mut handles = Vec::with_capacity(paths.len());
        for (index, path) in paths.into_iter().enumerate() {
            let backend = Arc::clone(&self.engine.backend);
            let cell = ResultCell::new();
            futures.push(TypedFuture::new(Arc::clone(&cell)));
            handles.push(self.engine.chain_op(
                &immediates,
                OpKind::Enumerate,
                preconditions.get(index),
                OpFlags::empty(),
                move |_engine, _id, input| match input {
                    Err(err) => {
                        cell.fulfil(Err(err.clone()));
                        Err(err)
                    }
                    Ok(handle) => match backend.enumerate(&path) {
                        Ok(children) => {
                            cell.fulfil(Ok(children));
                            Ok(OpStep::Done(handle))
                        }
                        Err(err) => {
                            cell.fulfil(Err(err.clone()));
                            Err(err)
                        }
                    },
                },
            )?);
        }
        drop(guard);
        Ok((futures, handles))
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    fn chain_path_ops(
        &self,
        kind: OpKind,
        reqs: Vec<PathOpReq>,
        op: fn(&dyn OpBackend, OpCx, PathReq) -> Result<OpStep>,
    ) -> Result<Vec<OpHandle>> {
        self.validate_path_reqs(&reqs)?;

        let immediates = ImmediateQueue::new();
        let guard = self.engine.table.lock();
        let mut out = Vec::with_capacity(reqs.len());
        for req in reqs {
            let backend = Arc::clone(&self.engine.backend);
            let preq = PathReq {
                path: req.path,
                flags: self.engine.apply_flag_policy(req.flags),
            };
            out.push(self.engine.chain_op(
                &immediates,
                kind,
                req.precondition.as_ref(),
                OpFlags::empty(),
                move |engine, id, input| {
                    let _ = input?;
                    op(backend.as_ref(), OpCx::new(Arc::clone(engine), id), preq)
                },
            )?);
        }
        drop(guard);
        Ok(out)
    }

    fn chain_handle_ops(
        &self,
        kind: OpKind,
        ops: Vec<OpHandle>,
        op: fn(&dyn OpBackend, OpCx, &Arc<HandleRef>) -> Result<OpStep>,
    ) -> Result<Vec<OpHandle>> {
        self.validate_owned(ops.iter())?;

        let immediates = ImmediateQueue::new();
        let guard = self.engine.table.lock();
        let mut out = Vec::with_capacity(ops.len());
        for target in &ops {
            let backend = Arc::clone(&self.engine.backend);
            out.push(self.engine.chain_op(
                &immediates,
                kind,
                Some(target),
                OpFlags::empty(),
                move |engine, id, input| {
                    let handle = require_handle(input)?;
                    op(
                        backend.as_ref(),
                        OpCx::new(Arc::clone(engine), id),
                        &handle,
                    )
                },
            )?);
        }
        drop(guard);
        Ok(out)
    }

    fn validate_owned<'a>(&self, ops: impl Iterator<Item = &'a OpHandle>) -> Result<()> {
        for op in ops {
            if op.dispatcher != self.engine.instance {
                return Err(DispatchError::invalid(
                    "precondition was issued by a different dispatcher",
                ));
            }
        }
        Ok(())
    }

    fn validate_path_reqs(&self, reqs: &[PathOpReq]) -> Result<()> {
        if reqs.iter().any(|r| r.path.as_os_str().is_empty()) {
            return Err(DispatchError::invalid("paths must not be empty"));
        }
        self.validate_owned(reqs.iter().filter_map(|r| r.precondition.as_ref()))
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.engine.drain();
    }
}

fn require_handle(input: Outcome) -> Result<Arc<HandleRef>> {
    input?.ok_or_else(|| {
        DispatchError::invalid("operation requires a precondition carrying an open handle")
    })
}
