/*!
 * Operation Table
 * The dispatch graph: id → record for every operation in flight
 */

use crate::core::flags::OpFlags;
use crate::core::types::{OpId, OpKind, Outcome};
use crate::sync::promise::ResultCell;
use ahash::RandomState;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::limits::OP_TABLE_PREALLOC;

/// A continuation bound to a dependent operation: runs with the parent's
/// outcome when the parent finishes.
pub(crate) type OpThunk = Box<dyn FnOnce(Outcome) + Send + 'static>;

/// Entry in the dispatch table
pub(crate) struct OpRecord {
    pub kind: OpKind,
    pub flags: OpFlags,
    /// The public result slot every reader of this op's future observes
    pub cell: Arc<ResultCell<Outcome>>,
    /// Dependents to re-enqueue when this op finishes, in install order
    pub continuations: Vec<(OpId, OpThunk)>,
}

pub(crate) struct TableInner {
    ops: HashMap<OpId, OpRecord, RandomState>,
}

/// The single source of truth for what is in flight.
///
/// Guarded by a reentrant mutex: completion code paths re-enter the table
/// while the completing thread already holds it (barrier fan-out installs
/// and resolves sibling completions in-line). Each method takes only a
/// short borrow of the inner map, so re-entry from the same thread is
/// always safe.
pub(crate) struct OpTable {
    inner: ReentrantMutex<RefCell<TableInner>>,
    next_id: AtomicU64,
}

impl OpTable {
    pub fn new() -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(TableInner {
                ops: HashMap::with_capacity_and_hasher(OP_TABLE_PREALLOC, RandomState::new()),
            })),
            next_id: AtomicU64::new(1),
        }
    }

    /// Hold the table across a multi-step section (chaining a batch,
    /// splicing completions). Reentrant: a thread may lock again while
    /// already holding the guard.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, RefCell<TableInner>> {
        self.inner.lock()
    }

    /// Allocate the next id, skipping the reserved zero
    pub fn allocate_id(&self) -> OpId {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            if id != 0 {
                return OpId(id);
            }
        }
    }

    /// Insert a freshly chained record. Called exactly once per id.
    pub fn insert(&self, id: OpId, record: OpRecord) {
        let guard = self.lock();
        let previous = guard.borrow_mut().ops.insert(id, record);
        debug_assert!(previous.is_none(), "operation id {id} reused");
    }

    /// Atomically test that `parent` is still in flight and append a
    /// continuation to it. Returns the thunk back if the parent is gone
    /// (already completed); the caller must then run it itself.
    pub fn append_continuation(
        &self,
        parent: OpId,
        child: OpId,
        thunk: OpThunk,
    ) -> Result<(), OpThunk> {
        let guard = self.lock();
        let mut inner = guard.borrow_mut();
        match inner.ops.get_mut(&parent) {
            Some(record) => {
                record.continuations.push((child, thunk));
                Ok(())
            }
            None => Err(thunk),
        }
    }

    /// Steal an op's continuation list, leaving it empty.
    /// `None` if the id is not in the table.
    pub fn take_continuations(&self, id: OpId) -> Option<Vec<(OpId, OpThunk)>> {
        let guard = self.lock();
        let mut inner = guard.borrow_mut();
        inner
            .ops
            .get_mut(&id)
            .map(|record| std::mem::take(&mut record.continuations))
    }

    /// Scheduling flags of an in-flight op
    pub fn flags_of(&self, id: OpId) -> Option<OpFlags> {
        let guard = self.lock();
        let inner = guard.borrow();
        inner.ops.get(&id).map(|record| record.flags)
    }

    /// Remove a record at terminal completion. Called exactly once per id.
    pub fn remove(&self, id: OpId) -> Option<OpRecord> {
        let guard = self.lock();
        let mut inner = guard.borrow_mut();
        inner.ops.remove(&id)
    }

    /// Result cells of every extant record (shutdown drain)
    pub fn snapshot_cells(&self) -> Vec<Arc<ResultCell<Outcome>>> {
        let guard = self.lock();
        let inner = guard.borrow();
        inner
            .ops
            .values()
            .map(|record| Arc::clone(&record.cell))
            .collect()
    }

    /// Number of extant records
    pub fn len(&self) -> usize {
        let guard = self.lock();
        let inner = guard.borrow();
        inner.ops.len()
    }
}
