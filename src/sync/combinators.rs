/*!
 * Future Combinators
 * Join over many operation futures without burning a waiter thread
 */

use crate::core::errors::DispatchError;
use crate::core::types::Outcome;
use crate::dispatch::OpHandle;
use crate::handle::HandleRef;
use crate::sync::promise::{OpFuture, ResultCell, TypedFuture};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Wait for every input to finish; error with the first observed failure.
///
/// The aggregate future becomes ready only after *all* inputs are done,
/// even when the error arrives early.
pub fn when_all(ops: &[OpHandle]) -> TypedFuture<Vec<Option<Arc<HandleRef>>>> {
    when_all_futures(&collect_futures(ops))
}

/// Wait for every input to finish and yield each input's own outcome.
/// Never errors.
pub fn when_all_settled(ops: &[OpHandle]) -> TypedFuture<Vec<Outcome>> {
    when_all_settled_futures(&collect_futures(ops))
}

/// Wait for the first input to finish; error if that input failed
pub fn when_any(ops: &[OpHandle]) -> TypedFuture<(usize, Option<Arc<HandleRef>>)> {
    when_any_futures(&collect_futures(ops))
}

/// Wait for the first input to finish and yield its index and outcome.
/// Never errors.
pub fn when_any_settled(ops: &[OpHandle]) -> TypedFuture<(usize, Outcome)> {
    when_any_settled_futures(&collect_futures(ops))
}

fn collect_futures(ops: &[OpHandle]) -> Vec<OpFuture> {
    ops.iter().map(|op| op.future().clone()).collect()
}

pub fn when_all_futures(futures: &[OpFuture]) -> TypedFuture<Vec<Option<Arc<HandleRef>>>> {
    let settled = when_all_settled_futures(futures);
    let result = ResultCell::new();
    let out = Arc::clone(&result);
    settled.cell.on_ready(Box::new(move |outcomes| {
        let outcomes = match outcomes {
            Ok(outcomes) => outcomes,
            Err(err) => {
                out.fulfil(Err(err.clone()));
                return;
            }
        };
        match outcomes.iter().find_map(|o| o.as_ref().err()) {
            Some(err) => {
                out.fulfil(Err(err.clone()));
            }
            None => {
                let handles = outcomes
                    .iter()
                    .map(|o| o.as_ref().expect("error case handled above").clone())
                    .collect();
                out.fulfil(Ok(handles));
            }
        }
    }));
    TypedFuture::new(result)
}

pub fn when_all_settled_futures(futures: &[OpFuture]) -> TypedFuture<Vec<Outcome>> {
    let result = ResultCell::new();
    let count = futures.len();
    if count == 0 {
        result.fulfil(Ok(Vec::new()));
        return TypedFuture::new(result);
    }
    let remaining = Arc::new(AtomicUsize::new(count));
    let inputs: Arc<Vec<OpFuture>> = Arc::new(futures.to_vec());
    for future in futures {
        let remaining = Arc::clone(&remaining);
        let inputs = Arc::clone(&inputs);
        let result = Arc::clone(&result);
        future.cell.on_ready(Box::new(move |_| {
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                let outcomes = inputs
                    .iter()
                    .map(|f| f.try_outcome().expect("all inputs are ready"))
                    .collect();
                result.fulfil(Ok(outcomes));
            }
        }));
    }
    TypedFuture::new(result)
}

pub fn when_any_futures(futures: &[OpFuture]) -> TypedFuture<(usize, Option<Arc<HandleRef>>)> {
    let settled = when_any_settled_futures(futures);
    let result = ResultCell::new();
    let out = Arc::clone(&result);
    settled.cell.on_ready(Box::new(move |first| {
        match first {
            Ok((index, Ok(handle))) => {
                out.fulfil(Ok((*index, handle.clone())));
            }
            Ok((_, Err(err))) => {
                out.fulfil(Err(err.clone()));
            }
            Err(err) => {
                out.fulfil(Err(err.clone()));
            }
        };
    }));
    TypedFuture::new(result)
}

pub fn when_any_settled_futures(futures: &[OpFuture]) -> TypedFuture<(usize, Outcome)> {
    if futures.is_empty() {
        return TypedFuture::failed(DispatchError::invalid(
            "when_any requires at least one input",
        ));
    }
    let result = ResultCell::new();
    let won = Arc::new(AtomicBool::new(false));
    for (index, future) in futures.iter().enumerate() {
        let won = Arc::clone(&won);
        let result = Arc::clone(&result);
        future.cell.on_ready(Box::new(move |outcome| {
            if !won.swap(true, Ordering::AcqRel) {
                result.fulfil(Ok((index, outcome.clone())));
            }
        }));
    }
    TypedFuture::new(result)
}
