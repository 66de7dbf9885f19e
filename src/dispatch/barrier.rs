/*!
 * Barrier Primitive
 * Join N inputs, then fan out each input's individual outcome
 */

use crate::backend::OpStep;
use crate::core::errors::{DispatchError, Result};
use crate::core::flags::OpFlags;
use crate::core::types::{OpId, OpKind, Outcome};
use crate::dispatch::engine::Engine;
use crate::dispatch::OpHandle;
use crate::pool::ImmediateQueue;
use crate::sync::promise::OpFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared join state: one sub-op per input counts down the arrivals; the
/// last arrival (the closer) re-broadcasts every input's stored outcome.
struct BarrierState {
    remaining: AtomicUsize,
    sub_ids: Mutex<Vec<OpId>>,
    inputs: Vec<OpFuture>,
}

/// Chain one barrier sub-op per input.
///
/// Every sub-op is immediate (the countdown is cheap) and detached (all
/// but the closer park until the closer posts their completion). Output i
/// becomes ready only after all inputs have finished, carrying input i's
/// own outcome, success or error.
pub(crate) fn chain_barrier(engine: &Arc<Engine>, ops: &[OpHandle]) -> Result<Vec<OpHandle>> {
    let count = ops.len();
    if count == 0 {
        return Ok(Vec::new());
    }

    let state = Arc::new(BarrierState {
        remaining: AtomicUsize::new(count),
        sub_ids: Mutex::new(vec![OpId::NONE; count]),
        inputs: ops.iter().map(|op| op.future().clone()).collect(),
    });

    let immediates = ImmediateQueue::new();
    let guard = engine.table.lock();
    let mut out = Vec::with_capacity(count);
    for (index, op) in ops.iter().enumerate() {
        let state = Arc::clone(&state);
        out.push(engine.chain_op(
            &immediates,
            OpKind::Barrier,
            Some(op),
            OpFlags::IMMEDIATE | OpFlags::DETACHED,
            move |engine, id, input| barrier_step(engine, id, input, &state, index),
        )?);
    }
    drop(guard);
    Ok(out)
}

fn barrier_step(
    engine: &Arc<Engine>,
    id: OpId,
    input: Outcome,
    state: &BarrierState,
    index: usize,
) -> Result<OpStep> {
    state.sub_ids.lock()[index] = id;
    if state.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
        // Not the last arrival: park until the closer posts our outcome
        return Ok(OpStep::Pending);
    }

    // Last arrival: every input has finished and recorded its sub-op.
    // Complete each parked sibling with its own input's outcome.
    let sub_ids = state.sub_ids.lock().clone();
    for (i, sub_id) in sub_ids.iter().enumerate() {
        if i == index {
            continue;
        }
        let outcome = state.inputs[i].try_outcome().unwrap_or_else(|| {
            Err(DispatchError::Internal(format!(
                "barrier input {i} joined before completing"
            )))
        });
        engine.complete_op(*sub_id, outcome);
    }

    // The closer itself completes through the normal wrapper path,
    // faithfully carrying its own input's outcome
    match input {
        Ok(handle) => Ok(OpStep::Done(handle)),
        Err(err) => Err(err),
    }
}
