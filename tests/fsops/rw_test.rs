/*!
 * Read/Write Tests
 * Round trips, truncation, fsync chains and registry balance
 */

use bytes::Bytes;
use iodispatch::{
    shared_buf, when_all, Dispatcher, FileFlags, PathOpReq, ReadReq, WorkerPool, WriteReq,
};
use pretty_assertions::assert_eq;

fn dispatcher() -> Dispatcher {
    Dispatcher::new(WorkerPool::new(8), FileFlags::empty(), FileFlags::empty())
}

#[test]
fn test_write_close_open_read_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("f");
    let d = dispatcher();

    let payload = vec![0x4Eu8; 65536];

    let create = d
        .file(vec![PathOpReq::new(
            &path,
            FileFlags::CREATE | FileFlags::WRITE,
        )])
        .unwrap()
        .remove(0);
    let write = d
        .write(vec![WriteReq::single(&create, payload.clone(), 0)])
        .unwrap()
        .remove(0);
    let closed = d.close(vec![write]).unwrap().remove(0);

    let reopen = d
        .file(vec![PathOpReq::after(&closed, &path, FileFlags::READ)])
        .unwrap()
        .remove(0);
    let buffer = shared_buf(65536);
    let read = d
        .read(vec![ReadReq::new(&reopen, vec![buffer.clone()], 0)])
        .unwrap()
        .remove(0);
    let reclosed = d.close(vec![read]).unwrap().remove(0);

    when_all(&[reclosed]).get().unwrap();
    assert_eq!(*buffer.lock(), payload);
}

#[test]
fn test_vectored_write_and_read() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("v");
    let d = dispatcher();

    let create = d
        .file(vec![PathOpReq::new(
            &path,
            FileFlags::CREATE | FileFlags::READ_WRITE,
        )])
        .unwrap()
        .remove(0);
    let write = d
        .write(vec![WriteReq::new(
            &create,
            vec![
                Bytes::from(vec![1u8; 1000]),
                Bytes::from(vec![2u8; 2000]),
                Bytes::from(vec![3u8; 3000]),
            ],
            0,
        )])
        .unwrap()
        .remove(0);

    let first = shared_buf(1000);
    let rest = shared_buf(5000);
    let read = d
        .read(vec![ReadReq::new(
            &write,
            vec![first.clone(), rest.clone()],
            0,
        )])
        .unwrap()
        .remove(0);
    let closed = d.close(vec![read]).unwrap().remove(0);
    when_all(&[closed]).get().unwrap();

    assert!(first.lock().iter().all(|&b| b == 1));
    assert_eq!(&rest.lock()[..2000], vec![2u8; 2000].as_slice());
    assert_eq!(&rest.lock()[2000..], vec![3u8; 3000].as_slice());
}

#[test]
fn test_read_past_end_is_short_transfer() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("short");
    std::fs::write(&path, vec![9u8; 10]).unwrap();
    let d = dispatcher();

    let open = d
        .file(vec![PathOpReq::new(&path, FileFlags::READ)])
        .unwrap()
        .remove(0);
    let read = d
        .read(vec![ReadReq::new(&open, vec![shared_buf(100)], 0)])
        .unwrap()
        .remove(0);

    let err = read.get().unwrap_err();
    assert!(err.to_string().contains("short transfer"));
    d.close(vec![open]).unwrap();
}

#[test]
fn test_truncate_grows_and_shrinks() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("trunc");
    let d = dispatcher();

    let create = d
        .file(vec![PathOpReq::new(
            &path,
            FileFlags::CREATE | FileFlags::READ_WRITE,
        )])
        .unwrap()
        .remove(0);
    let grown = d.truncate(vec![create], vec![4096]).unwrap().remove(0);
    grown.get().unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);

    let shrunk = d.truncate(vec![grown], vec![100]).unwrap().remove(0);
    let closed = d.close(vec![shrunk]).unwrap().remove(0);
    closed.get().unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 100);
}

#[test]
fn test_sync_chain_with_autoflush_dispatcher() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("testdir");
    // Force AUTO_FLUSH onto every request this dispatcher sees
    let d = Dispatcher::new(
        WorkerPool::new(8),
        FileFlags::AUTO_FLUSH,
        FileFlags::empty(),
    );

    let payload = Bytes::from(vec![b'n'; 64]);
    let mkdir = d
        .dir(vec![PathOpReq::new(&root, FileFlags::CREATE)])
        .unwrap()
        .remove(0);
    let mkfile = d
        .file(vec![PathOpReq::after(
            &mkdir,
            root.join("foo"),
            FileFlags::CREATE | FileFlags::READ_WRITE,
        )])
        .unwrap()
        .remove(0);
    let write1 = d
        .write(vec![WriteReq::single(&mkfile, payload.clone(), 0)])
        .unwrap()
        .remove(0);
    let sync1 = d.sync(vec![write1]).unwrap().remove(0);
    let write2 = d
        .write(vec![WriteReq::single(&sync1, payload, 0)])
        .unwrap()
        .remove(0);
    let closed = d.close(vec![write2]).unwrap().remove(0);
    let rmfile = d
        .rmfile(vec![PathOpReq::after(
            &closed,
            root.join("foo"),
            FileFlags::empty(),
        )])
        .unwrap()
        .remove(0);
    let rmdir = d
        .rmdir(vec![PathOpReq::after(&rmfile, &root, FileFlags::empty())])
        .unwrap()
        .remove(0);

    when_all(&[rmdir]).get().unwrap();
    assert!(!root.exists());
}

#[test]
fn test_dir_create_is_idempotent_unless_exclusive() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("d");
    let d = dispatcher();

    let first = d
        .dir(vec![PathOpReq::new(&path, FileFlags::CREATE)])
        .unwrap()
        .remove(0);
    first.get().unwrap();
    let second = d
        .dir(vec![PathOpReq::new(&path, FileFlags::CREATE)])
        .unwrap()
        .remove(0);
    second.get().unwrap();

    let exclusive = d
        .dir(vec![PathOpReq::new(
            &path,
            FileFlags::CREATE_ONLY_IF_NOT_EXIST,
        )])
        .unwrap()
        .remove(0);
    let err = exclusive.get().unwrap_err();
    assert_eq!(err.os_code(), Some(libc::EEXIST));
}

#[test]
fn test_registry_balances_opens_and_closes() {
    let tmp = tempfile::tempdir().unwrap();
    let d = dispatcher();

    let reqs: Vec<PathOpReq> = (0..10)
        .map(|i| {
            PathOpReq::new(
                tmp.path().join(i.to_string()),
                FileFlags::CREATE | FileFlags::WRITE,
            )
        })
        .collect();
    let opens = d.file(reqs).unwrap();
    when_all(&opens).get().unwrap();
    assert_eq!(d.count(), 10);

    let closes = d.close(opens).unwrap();
    when_all(&closes).get().unwrap();
    assert_eq!(d.count(), 0);
}

#[test]
fn test_byte_counters_track_transfers() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("counted");
    let d = dispatcher();

    let create = d
        .file(vec![PathOpReq::new(
            &path,
            FileFlags::CREATE | FileFlags::READ_WRITE,
        )])
        .unwrap()
        .remove(0);
    let write = d
        .write(vec![WriteReq::single(&create, vec![5u8; 300], 0)])
        .unwrap()
        .remove(0);
    let read = d
        .read(vec![ReadReq::new(&write, vec![shared_buf(300)], 0)])
        .unwrap()
        .remove(0);

    let handle = read.get().unwrap().expect("read passes the handle through");
    assert_eq!(handle.write_count(), 300);
    assert_eq!(handle.read_count(), 300);
    d.close(vec![read]).unwrap();
}
