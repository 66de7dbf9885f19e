/*!
 * Result Cells
 * Fulfil-once shared result slots backing every operation's public future
 */

use crate::core::errors::{DispatchError, Result};
use crate::core::types::Outcome;
use crate::handle::HandleRef;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

type ReadyCallback<T> = Box<dyn FnOnce(&T) + Send>;

struct CellState<T> {
    value: Option<T>,
    callbacks: Vec<ReadyCallback<T>>,
}

/// A shared result slot: fulfilled exactly once, read by any number of
/// blocking waiters and ready-callbacks.
///
/// This is the promise and the future in one allocation. The completion
/// engine fulfils it; callers wait on it through [`OpFuture`] or
/// [`TypedFuture`]; combinators register callbacks to join over many cells
/// without burning a thread.
pub struct ResultCell<T> {
    state: Mutex<CellState<T>>,
    ready: Condvar,
}

impl<T: Clone> ResultCell<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CellState {
                value: None,
                callbacks: Vec::new(),
            }),
            ready: Condvar::new(),
        })
    }

    /// Fulfil the cell. Returns false if it was already fulfilled; the
    /// first value wins and later attempts are ignored.
    pub fn fulfil(&self, value: T) -> bool {
        let callbacks;
        {
            let mut state = self.state.lock();
            if state.value.is_some() {
                return false;
            }
            state.value = Some(value.clone());
            callbacks = std::mem::take(&mut state.callbacks);
        }
        self.ready.notify_all();
        for callback in callbacks {
            callback(&value);
        }
        true
    }

    /// Register a callback to run when the cell becomes ready.
    /// Runs immediately (on this thread) if the cell is already fulfilled;
    /// otherwise runs on whichever thread fulfils it.
    pub fn on_ready(&self, callback: ReadyCallback<T>) {
        let ready_value = {
            let mut state = self.state.lock();
            match &state.value {
                Some(value) => Some(value.clone()),
                None => {
                    state.callbacks.push(callback);
                    return;
                }
            }
        };
        if let Some(value) = ready_value {
            callback(&value);
        }
    }

    /// Block until the cell is fulfilled, then clone the value out
    pub fn wait(&self) -> T {
        let mut state = self.state.lock();
        while state.value.is_none() {
            self.ready.wait(&mut state);
        }
        state.value.clone().expect("woken without a value")
    }

    /// Non-blocking read
    pub fn try_get(&self) -> Option<T> {
        self.state.lock().value.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().value.is_some()
    }
}

/// The public future of a dispatched operation.
///
/// Ready exactly when the operation's terminal completion has run; any
/// number of clones may wait concurrently.
#[derive(Clone)]
pub struct OpFuture {
    pub(crate) cell: Arc<ResultCell<Outcome>>,
}

impl OpFuture {
    pub(crate) fn new(cell: Arc<ResultCell<Outcome>>) -> Self {
        Self { cell }
    }

    /// Block until the operation completes and return its outcome
    pub fn wait(&self) -> Outcome {
        self.cell.wait()
    }

    /// Block until the operation completes; error if it failed
    pub fn get(&self) -> Result<Option<Arc<HandleRef>>> {
        self.cell.wait()
    }

    /// The outcome, if the operation has already completed
    pub fn try_outcome(&self) -> Option<Outcome> {
        self.cell.try_get()
    }

    pub fn is_ready(&self) -> bool {
        self.cell.is_ready()
    }
}

/// A future for a typed side-result (`call`, `enumerate`, combinators)
pub struct TypedFuture<T: Clone> {
    pub(crate) cell: Arc<ResultCell<Result<T>>>,
}

impl<T: Clone> std::fmt::Debug for TypedFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedFuture").finish_non_exhaustive()
    }
}

impl<T: Clone> Clone for TypedFuture<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Clone> TypedFuture<T> {
    pub(crate) fn new(cell: Arc<ResultCell<Result<T>>>) -> Self {
        Self { cell }
    }

    /// Block until the value is produced; error if the producer failed
    pub fn get(&self) -> Result<T> {
        self.cell.wait()
    }

    pub fn try_get(&self) -> Option<Result<T>> {
        self.cell.try_get()
    }

    pub fn is_ready(&self) -> bool {
        self.cell.is_ready()
    }

    /// A future already fulfilled with an error (validation failures)
    pub(crate) fn failed(err: DispatchError) -> Self {
        let cell = ResultCell::new();
        cell.fulfil(Err(err));
        Self { cell }
    }
}
