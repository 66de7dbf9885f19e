/*!
 * User Callback Tests
 * Typed call results, completion routines and detached completion
 */

use iodispatch::{
    when_all, CallFn, CompletionFn, DispatchError, Dispatcher, FileFlags, OpFlags, OpStep,
    WorkerPool,
};
use std::sync::mpsc;

fn dispatcher() -> Dispatcher {
    Dispatcher::new(WorkerPool::new(4), FileFlags::empty(), FileFlags::empty())
}

#[test]
fn test_call_resolves_typed_value() {
    let d = dispatcher();
    let (futures, handles) = d
        .call(vec![], vec![Box::new(|| Ok(78u32)) as CallFn<u32>])
        .unwrap();
    assert_eq!(futures[0].get().unwrap(), 78);
    // The associated handle succeeds with no resource attached
    assert!(handles[0].get().unwrap().is_none());
}

#[test]
fn test_failing_call_fails_future_and_handle() {
    let d = dispatcher();
    let (futures, handles) = d
        .call(
            vec![],
            vec![Box::new(|| -> iodispatch::Result<u32> {
                Err(DispatchError::invalid("user callback failed"))
            }) as CallFn<u32>],
        )
        .unwrap();
    assert!(futures[0].get().is_err());
    assert!(handles[0].get().is_err());
}

#[test]
fn test_call_chained_on_failed_call_propagates() {
    let d = dispatcher();
    let (_f1, h1) = d
        .call(
            vec![],
            vec![Box::new(|| -> iodispatch::Result<u32> {
                Err(DispatchError::invalid("parent failed"))
            }) as CallFn<u32>],
        )
        .unwrap();
    let (f2, h2) = d
        .call(vec![h1[0].clone()], vec![Box::new(|| Ok(1u32)) as CallFn<u32>])
        .unwrap();
    assert!(f2[0].get().is_err());
    assert!(h2[0].get().is_err());
}

#[test]
fn test_completion_passes_handle_through() {
    let d = dispatcher();
    let (_f, parent) = d
        .call(vec![], vec![Box::new(|| Ok(0u8)) as CallFn<u8>])
        .unwrap();
    let completed = d
        .completion(
            parent.clone(),
            vec![(
                OpFlags::IMMEDIATE,
                Box::new(|_id, handle| Ok(OpStep::Done(handle))) as CompletionFn,
            )],
        )
        .unwrap();
    assert!(completed[0].get().unwrap().is_none());
}

#[test]
fn test_detached_completion_resolves_on_post() {
    let d = dispatcher();
    let (notify, started) = mpsc::channel();

    let handles = d
        .completion(
            vec![],
            vec![(
                OpFlags::DETACHED,
                Box::new(move |id, _handle| {
                    notify.send(id).unwrap();
                    Ok(OpStep::Pending)
                }) as CompletionFn,
            )],
        )
        .unwrap();

    let id = started.recv().unwrap();
    assert!(!handles[0].is_ready());

    d.post_completion(id, Ok(None));
    assert!(handles[0].get().unwrap().is_none());
    assert_eq!(d.wait_queue_depth(), 0);
}

#[test]
fn test_detached_completion_can_fail_on_post() {
    let d = dispatcher();
    let (notify, started) = mpsc::channel();

    let handles = d
        .completion(
            vec![],
            vec![(
                OpFlags::DETACHED,
                Box::new(move |id, _handle| {
                    notify.send(id).unwrap();
                    Ok(OpStep::Pending)
                }) as CompletionFn,
            )],
        )
        .unwrap();

    let id = started.recv().unwrap();
    d.post_completion(id, Err(DispatchError::invalid("backend reported failure")));
    assert!(handles[0].get().is_err());
}

#[test]
fn test_mixed_batch_of_calls() {
    let d = dispatcher();
    let calls: Vec<CallFn<usize>> = (0..100)
        .map(|i| Box::new(move || Ok(i * 2usize)) as CallFn<usize>)
        .collect();
    let (futures, handles) = d.call(vec![], calls).unwrap();
    for (i, future) in futures.iter().enumerate() {
        assert_eq!(future.get().unwrap(), i * 2);
    }
    when_all(&handles).get().unwrap();
}
