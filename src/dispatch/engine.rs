/*!
 * Chaining and Completion Engine
 * Allocates ids, wires continuations, and drives terminal completion
 */

use crate::backend::{OpBackend, OpStep};
use crate::core::errors::{DispatchError, Result};
use crate::core::flags::{FileFlags, OpFlags};
use crate::core::limits::DRAIN_POLL_INTERVAL;
use crate::core::types::{OpId, OpKind, Outcome};
use crate::dispatch::table::{OpRecord, OpTable, OpThunk};
use crate::dispatch::OpHandle;
use crate::pool::{ImmediateQueue, WorkerPool};
use crate::registry::HandleRegistry;
use crate::sync::promise::{OpFuture, ResultCell};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

static DISPATCHER_INSTANCES: AtomicU64 = AtomicU64::new(1);

/// The dispatcher's shared internals: the op table, the pool, the handle
/// registry and the selected backend.
///
/// Operation thunks hold a weak reference back here; the owning
/// [`Dispatcher`](crate::dispatch::Dispatcher) drains the table before the
/// engine is released.
pub(crate) struct Engine {
    pub table: OpTable,
    pub pool: Arc<WorkerPool>,
    pub registry: Arc<HandleRegistry>,
    pub backend: Arc<dyn OpBackend>,
    flags_force: FileFlags,
    flags_mask: FileFlags,
    pub instance: u64,
}

impl Engine {
    pub fn new(
        pool: Arc<WorkerPool>,
        registry: Arc<HandleRegistry>,
        backend: Arc<dyn OpBackend>,
        flags_force: FileFlags,
        flags_mask: FileFlags,
    ) -> Arc<Self> {
        Arc::new(Self {
            table: OpTable::new(),
            pool,
            registry,
            backend,
            flags_force,
            flags_mask,
            instance: DISPATCHER_INSTANCES.fetch_add(1, Ordering::SeqCst),
        })
    }

    /// Apply this dispatcher's flag policy to a request's flags
    pub fn apply_flag_policy(&self, flags: FileFlags) -> FileFlags {
        flags.force(self.flags_force, self.flags_mask)
    }

    /// Chain one operation: allocate its id, attach it to its precondition
    /// (or submit it straight away when the precondition has already
    /// finished), and install its record.
    ///
    /// The caller holds the table lock across a whole submission batch;
    /// this method re-locks reentrantly so the batch stays atomic.
    pub fn chain_op<F>(
        self: &Arc<Self>,
        immediates: &ImmediateQueue,
        kind: OpKind,
        precondition: Option<&OpHandle>,
        flags: OpFlags,
        op_fn: F,
    ) -> Result<OpHandle>
    where
        F: FnOnce(&Arc<Engine>, OpId, Outcome) -> Result<OpStep> + Send + 'static,
    {
        let guard = self.table.lock();
        let id = self.table.allocate_id();
        let cell = ResultCell::new();

        let engine = Arc::downgrade(self);
        let thunk: OpThunk = Box::new(move |input: Outcome| {
            if let Some(engine) = engine.upgrade() {
                engine.invoke_op(id, input, op_fn);
            }
        });

        let parent = precondition.map(|op| op.id).unwrap_or(OpId::NONE);
        let mut unsubmitted = Some(thunk);
        if parent.is_some() {
            match self.table.append_continuation(parent, id, unsubmitted.take().expect("fresh")) {
                Ok(()) => {}
                Err(returned) => unsubmitted = Some(returned),
            }
        }

        if let Some(thunk) = unsubmitted {
            // The precondition (if any) already completed: bind its
            // outcome now and enqueue directly.
            let input: Outcome = if parent.is_some() {
                match precondition.expect("checked above").future().try_outcome() {
                    Some(outcome) => outcome,
                    None => {
                        // A nonzero id absent from the table whose future
                        // is still unset breaks the table invariant.
                        debug_assert!(
                            false,
                            "precondition {parent} neither in flight nor completed"
                        );
                        return Err(DispatchError::Internal(format!(
                            "precondition {parent} neither in flight nor completed"
                        )));
                    }
                }
            } else {
                Ok(None)
            };
            if flags.contains(OpFlags::IMMEDIATE) {
                immediates.push(move || thunk(input));
            } else if self
                .pool
                .submit_task(Box::new(move || thunk(input)))
                .is_err()
            {
                // Nothing has been installed for this id yet, so failing
                // here leaves no trace in the table.
                return Err(DispatchError::Internal(
                    "worker pool is shut down".to_string(),
                ));
            }
        }

        self.table.insert(
            id,
            OpRecord {
                kind,
                flags,
                cell: Arc::clone(&cell),
                continuations: Vec::new(),
            },
        );
        trace!(
            id = id.0,
            parent = parent.0,
            kind = kind.name(),
            "chained operation"
        );
        drop(guard);

        Ok(OpHandle {
            id,
            dispatcher: self.instance,
            future: OpFuture::new(cell),
        })
    }

    /// Run an operation function and translate its step into table state
    fn invoke_op<F>(self: &Arc<Self>, id: OpId, input: Outcome, op_fn: F)
    where
        F: FnOnce(&Arc<Engine>, OpId, Outcome) -> Result<OpStep>,
    {
        // Read before running: a detached op may already be completed (and
        // erased) by another thread the moment its function returns
        let flags = self.table.flags_of(id);
        match op_fn(self, id, input) {
            Ok(OpStep::Done(handle)) => self.complete_op(id, Ok(handle)),
            Ok(OpStep::Pending) => {
                // Only detached ops may defer their completion
                debug_assert!(
                    flags.map_or(false, |f| f.contains(OpFlags::DETACHED)),
                    "operation {id} deferred completion without a detached future"
                );
            }
            Err(err) => {
                debug!(id = id.0, error = %err, "operation failed");
                self.complete_op(id, Err(err));
            }
        }
    }

    /// Terminal completion: splice this op's continuations into the pool
    /// (or the micro-queue), publish the outcome, and clear the record.
    pub(crate) fn complete_op(self: &Arc<Self>, id: OpId, outcome: Outcome) {
        let immediates = ImmediateQueue::new();
        let guard = self.table.lock();

        let continuations = self
            .table
            .take_continuations(id)
            .unwrap_or_else(|| panic!("operation {id} missing from the dispatch table"));
        for (child_id, thunk) in continuations {
            let child_flags = self.table.flags_of(child_id).unwrap_or_else(|| {
                panic!("continuation {child_id} missing from the dispatch table")
            });
            let input = outcome.clone();
            if child_flags.contains(OpFlags::IMMEDIATE) {
                immediates.push(move || thunk(input));
            } else if let Err(task) = self.pool.submit_task(Box::new(move || thunk(input))) {
                // Pool already shutting down: run in-line so the subgraph
                // still resolves and the table drains.
                immediates.push(task);
            }
            trace!(id = id.0, child = child_id.0, "continuation spliced");
        }

        let record = self
            .table
            .remove(id)
            .unwrap_or_else(|| panic!("operation {id} missing from the dispatch table"));
        record.cell.fulfil(outcome);
        trace!(id = id.0, kind = record.kind.name(), "operation completed");
        drop(guard);
        // The micro-queue flushes here, after the table lock is released
    }

    /// Block until the table is empty. New submissions racing with the
    /// drain are the caller's contract violation to avoid.
    pub fn drain(&self) {
        loop {
            let cells = self.table.snapshot_cells();
            if cells.is_empty() {
                break;
            }
            for cell in cells {
                cell.wait();
            }
            if self.table.len() > 0 {
                std::thread::sleep(DRAIN_POLL_INTERVAL);
            }
        }
    }
}
