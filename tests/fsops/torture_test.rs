/*!
 * Random I/O Torture Test
 * Replays a simulated random read/write sequence against real files and
 * digests the results
 */

use bytes::Bytes;
use iodispatch::{
    shared_buf, when_all, CompletionFn, DispatchError, Dispatcher, FileFlags, OpFlags, OpStep,
    PathOpReq, ReadReq, WorkerPool, WriteReq,
};
use sha2::{Digest, Sha256};

const FILES: usize = 4;
const FILE_SIZE: usize = 256 * 1024;
const OPS_PER_FILE: usize = 64;
const MAX_SEGMENT: usize = 4096;

fn xorshift(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

#[test]
fn test_random_io_replay_matches_simulation() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("testdir");
    let d = Dispatcher::new(WorkerPool::new(8), FileFlags::empty(), FileFlags::empty());

    let mkdir = d
        .dir(vec![PathOpReq::new(&root, FileFlags::CREATE)])
        .unwrap()
        .remove(0);

    let mut final_buffers = Vec::with_capacity(FILES);
    let mut sim_images = Vec::with_capacity(FILES);
    let mut tails = Vec::with_capacity(FILES);

    for file_index in 0..FILES {
        let mut rng = 0x78ad_bcffu64 ^ (file_index as u64);
        let mut sim = vec![0u8; FILE_SIZE];

        let open = d
            .file(vec![PathOpReq::after(
                &mkdir,
                root.join(file_index.to_string()),
                FileFlags::CREATE | FileFlags::READ_WRITE,
            )])
            .unwrap()
            .remove(0);
        let mut prev = d
            .truncate(vec![open], vec![FILE_SIZE as u64])
            .unwrap()
            .remove(0);

        for op_index in 0..OPS_PER_FILE {
            let r = xorshift(&mut rng);
            let len = 512 + (r as usize % (MAX_SEGMENT - 512));
            let offset = xorshift(&mut rng) as usize % (FILE_SIZE - 2 * MAX_SEGMENT);
            // Seed the image with writes before mixing in reads
            let write = op_index < OPS_PER_FILE / 4 || r & (1 << 40) != 0;

            if write {
                let fill = (xorshift(&mut rng) & 0xff) as u8;
                sim[offset..offset + len].fill(fill);
                // Split some writes across two buffers to exercise the
                // vectored path
                let buffers = if len > 1024 && r & 1 == 0 {
                    vec![
                        Bytes::from(vec![fill; 1024]),
                        Bytes::from(vec![fill; len - 1024]),
                    ]
                } else {
                    vec![Bytes::from(vec![fill; len])]
                };
                prev = d
                    .write(vec![WriteReq::new(&prev, buffers, offset as u64)])
                    .unwrap()
                    .remove(0);
            } else {
                let expected = sim[offset..offset + len].to_vec();
                let buffer = shared_buf(len);
                let read = d
                    .read(vec![ReadReq::new(&prev, vec![buffer.clone()], offset as u64)])
                    .unwrap()
                    .remove(0);
                // Verify in-line on the completing thread, the cheap way
                prev = d
                    .completion(
                        vec![read],
                        vec![(
                            OpFlags::IMMEDIATE,
                            Box::new(move |_id, handle| {
                                if *buffer.lock() == expected {
                                    Ok(OpStep::Done(handle))
                                } else {
                                    Err(DispatchError::invalid(
                                        "read returned bytes the simulation never wrote",
                                    ))
                                }
                            }) as CompletionFn,
                        )],
                    )
                    .unwrap()
                    .remove(0);
            }
        }

        // Read the whole file back, then close it
        let image = shared_buf(FILE_SIZE);
        let full_read = d
            .read(vec![ReadReq::new(&prev, vec![image.clone()], 0)])
            .unwrap()
            .remove(0);
        let closed = d.close(vec![full_read]).unwrap().remove(0);

        final_buffers.push(image);
        sim_images.push(sim);
        tails.push(closed);
    }

    when_all(&tails).get().unwrap();
    assert_eq!(d.count(), 0);

    for file_index in 0..FILES {
        let simulated = Sha256::digest(&sim_images[file_index]);
        let replayed = Sha256::digest(final_buffers[file_index].lock().as_slice());
        assert_eq!(
            simulated, replayed,
            "file {file_index} diverged from the simulation"
        );

        // And the bytes on disk agree with what was read back
        let on_disk = std::fs::read(root.join(file_index.to_string())).unwrap();
        assert_eq!(Sha256::digest(&on_disk), simulated);
    }
}
