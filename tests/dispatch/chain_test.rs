/*!
 * Chaining Tests
 * Dependency ordering, id allocation, table drain and submission validation
 */

use iodispatch::{
    when_all, CallFn, Dispatcher, FileFlags, OpHandle, PathOpReq, WorkerPool,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn dispatcher() -> Dispatcher {
    Dispatcher::new(WorkerPool::new(8), FileFlags::empty(), FileFlags::empty())
}

#[test]
fn test_directory_tree_create_write_remove() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("t");
    let d = dispatcher();
    let mut everything: Vec<OpHandle> = Vec::new();

    let mkdir = d
        .dir(vec![PathOpReq::new(&root, FileFlags::CREATE)])
        .unwrap()
        .remove(0);
    everything.push(mkdir.clone());

    let subdir_reqs: Vec<PathOpReq> = (0..100)
        .map(|i| PathOpReq::after(&mkdir, root.join(i.to_string()), FileFlags::CREATE))
        .collect();
    let subdirs = d.dir(subdir_reqs).unwrap();
    everything.extend(subdirs.iter().cloned());

    let mut file_reqs = Vec::new();
    for (i, subdir) in subdirs.iter().enumerate() {
        for j in 0..10 {
            file_reqs.push(PathOpReq::after(
                subdir,
                root.join(i.to_string()).join(j.to_string()),
                FileFlags::CREATE | FileFlags::WRITE,
            ));
        }
    }
    let files = d.file(file_reqs.clone()).unwrap();
    everything.extend(files.iter().cloned());

    let closed = d.close(files).unwrap();
    everything.extend(closed.iter().cloned());

    let rm_reqs: Vec<PathOpReq> = closed
        .iter()
        .zip(&file_reqs)
        .map(|(close, req)| PathOpReq::after(close, req.path.clone(), FileFlags::empty()))
        .collect();
    let removed = d.rmfile(rm_reqs).unwrap();
    everything.extend(removed.iter().cloned());

    // Each subdirectory goes once every one of its files is gone
    let mut rmdirs = Vec::new();
    for i in 0..100 {
        let group = removed[i * 10..(i + 1) * 10].to_vec();
        let joined = d.barrier(group).unwrap();
        everything.extend(joined.iter().cloned());
        let rmdir = d
            .rmdir(vec![PathOpReq::after(
                &joined[0],
                root.join(i.to_string()),
                FileFlags::empty(),
            )])
            .unwrap()
            .remove(0);
        rmdirs.push(rmdir);
    }
    everything.extend(rmdirs.iter().cloned());

    let all_removed = d.barrier(rmdirs).unwrap();
    everything.extend(all_removed.iter().cloned());
    let rmroot = d
        .rmdir(vec![PathOpReq::after(
            &all_removed[0],
            &root,
            FileFlags::empty(),
        )])
        .unwrap()
        .remove(0);
    everything.push(rmroot);

    when_all(&everything).get().unwrap();
    assert_eq!(d.count(), 0);
    assert_eq!(d.wait_queue_depth(), 0);
    assert!(!root.exists());
}

#[test]
fn test_ids_are_strictly_increasing_and_nonzero() {
    let d = dispatcher();
    let mut ids = Vec::new();
    for _ in 0..5 {
        let calls: Vec<CallFn<u32>> = (0..20).map(|_| Box::new(|| Ok(0u32)) as CallFn<u32>).collect();
        let (_futures, handles) = d.call(vec![], calls).unwrap();
        ids.extend(handles.iter().map(|h| h.id()));
        when_all(&handles).get().unwrap();
    }
    assert!(ids.iter().all(|id| id.is_some()));
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_dependent_runs_strictly_after_precondition() {
    let d = dispatcher();
    let first_done = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&first_done);
    let (_f1, h1) = d
        .call(
            vec![],
            vec![Box::new(move || {
                std::thread::sleep(Duration::from_millis(20));
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }) as CallFn<()>],
        )
        .unwrap();

    let flag = Arc::clone(&first_done);
    let (f2, h2) = d
        .call(
            vec![h1[0].clone()],
            vec![Box::new(move || Ok(flag.load(Ordering::SeqCst))) as CallFn<bool>],
        )
        .unwrap();

    assert!(f2[0].get().unwrap(), "dependent ran before its precondition");
    when_all(&h2).get().unwrap();
}

#[test]
fn test_many_dependents_all_observe_parent() {
    let d = dispatcher();
    let (_f, parent) = d
        .call(vec![], vec![Box::new(|| Ok(7u32)) as CallFn<u32>])
        .unwrap();

    let preconditions = vec![parent[0].clone(); 32];
    let calls: Vec<CallFn<u32>> = (0..32).map(|i| Box::new(move || Ok(i as u32)) as CallFn<u32>).collect();
    let (futures, handles) = d.call(preconditions, calls).unwrap();

    for (i, future) in futures.iter().enumerate() {
        assert_eq!(future.get().unwrap(), i as u32);
    }
    when_all(&handles).get().unwrap();
}

#[test]
fn test_drop_waits_for_extant_operations() {
    let finished = Arc::new(AtomicBool::new(false));
    {
        let d = dispatcher();
        let flag = Arc::clone(&finished);
        let (_f, _h) = d
            .call(
                vec![],
                vec![Box::new(move || {
                    std::thread::sleep(Duration::from_millis(50));
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }) as CallFn<()>],
            )
            .unwrap();
        // Dispatcher dropped here with the call still running
    }
    assert!(
        finished.load(Ordering::SeqCst),
        "dispatcher drop returned before the table drained"
    );
}

#[test]
fn test_invalid_submission_leaves_no_table_entry() {
    let d = dispatcher();

    // Empty path
    let err = d
        .dir(vec![PathOpReq::new("", FileFlags::CREATE)])
        .unwrap_err();
    assert!(err.to_string().contains("invalid argument"));

    // Mismatched pairing
    let (_f, h) = d
        .call(vec![], vec![Box::new(|| Ok(0u8)) as CallFn<u8>])
        .unwrap();
    assert!(d.truncate(vec![h[0].clone()], vec![1, 2]).is_err());

    when_all(&h).get().unwrap();
    assert_eq!(d.wait_queue_depth(), 0);
}

#[test]
fn test_foreign_precondition_is_rejected() {
    let d1 = dispatcher();
    let d2 = dispatcher();

    let (_f, h) = d1
        .call(vec![], vec![Box::new(|| Ok(0u8)) as CallFn<u8>])
        .unwrap();
    let err = d2
        .call(
            vec![h[0].clone()],
            vec![Box::new(|| Ok(0u8)) as CallFn<u8>],
        )
        .unwrap_err();
    assert!(err.to_string().contains("different dispatcher"));
    when_all(&h).get().unwrap();
}
