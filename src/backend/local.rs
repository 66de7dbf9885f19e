/*!
 * Local Backend
 * Portable operation implementations over the platform filesystem
 *
 * Every operation completes synchronously on the worker that runs it;
 * data operations use positional I/O so concurrent transfers on one
 * handle never race a shared file cursor.
 */

use super::{OpBackend, OpCx, OpStep, PathReq};
use crate::core::errors::{DispatchError, Result};
use crate::core::flags::FileFlags;
use crate::core::limits::IOV_CHUNK;
use crate::dispatch::requests::SharedBuf;
use crate::handle::HandleRef;
use crate::registry::HandleRegistry;
use ahash::RandomState;
use bytes::Bytes;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

/// Portable dispatch backend over `std::fs`.
///
/// Keeps a weak cache of containing-directory handles so that directory
/// metadata can be made durable after file creation, and so repeated
/// creates under one directory reuse a single descriptor.
pub struct LocalBackend {
    registry: Arc<HandleRegistry>,
    dir_cache: Mutex<HashMap<PathBuf, Weak<HandleRef>, RandomState>>,
    /// Serializes the seek+transfer pairs on platforms without positional
    /// reads and writes
    #[cfg(not(unix))]
    serial_io: Mutex<()>,
}

impl LocalBackend {
    pub fn new(registry: Arc<HandleRegistry>) -> Self {
        Self {
            registry,
            dir_cache: Mutex::new(HashMap::with_hasher(RandomState::new())),
            #[cfg(not(unix))]
            serial_io: Mutex::new(()),
        }
    }

    /// Open (or fetch from the weak cache) a handle to the directory
    /// containing `path`
    fn containing_dir_handle(&self, path: &Path) -> Result<Option<Arc<HandleRef>>> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => return Ok(None),
        };
        let mut cache = self.dir_cache.lock();
        if let Some(cached) = cache.get(parent).and_then(Weak::upgrade) {
            return Ok(Some(cached));
        }
        let file =
            File::open(parent).map_err(|e| DispatchError::os("opendir", parent, &e))?;
        let handle = HandleRef::unregistered(parent.to_path_buf(), file);
        cache.insert(parent.to_path_buf(), Arc::downgrade(&handle));
        Ok(Some(handle))
    }

    /// Whether creating at `path` with `flags` requires the containing
    /// directory to be fsynced for the new entry to be durable
    fn wants_parent_sync(flags: FileFlags) -> bool {
        cfg!(target_os = "linux")
            && flags.intersects(FileFlags::CREATE | FileFlags::CREATE_ONLY_IF_NOT_EXIST)
            && flags.intersects(FileFlags::AUTO_FLUSH | FileFlags::OS_SYNC)
    }

    fn sync_parent_dir(dirh: Option<&Arc<HandleRef>>) {
        if let Some(dirh) = dirh {
            match dirh.file() {
                Ok(file) => {
                    if let Err(e) = file.sync_all() {
                        warn!("directory fsync failed for {:?}: {}", dirh.path(), e);
                    }
                }
                Err(_) => warn!("directory handle for {:?} is not open", dirh.path()),
            }
        }
    }
}

impl OpBackend for LocalBackend {
    fn dir(&self, cx: OpCx, mut req: PathReq) -> Result<OpStep> {
        let creating = req
            .flags
            .intersects(FileFlags::CREATE | FileFlags::CREATE_ONLY_IF_NOT_EXIST);
        if creating {
            match fs::create_dir(&req.path) {
                Ok(()) => debug!("created directory {:?}", req.path),
                Err(e)
                    if e.kind() == std::io::ErrorKind::AlreadyExists
                        && !req.flags.contains(FileFlags::CREATE_ONLY_IF_NOT_EXIST) =>
                {
                    // Already exists is a silent success unless exclusive
                }
                Err(e) => return Err(DispatchError::os("mkdir", &req.path, &e)),
            }
            req.flags
                .remove(FileFlags::CREATE | FileFlags::CREATE_ONLY_IF_NOT_EXIST);
        }

        if let Ok(meta) = fs::metadata(&req.path) {
            if !meta.is_dir() {
                return Err(DispatchError::NotADirectory(req.path));
            }
        }

        if req.flags.contains(FileFlags::READ) {
            return self.file(cx, req);
        }

        let mut dirh = None;
        let durable = creating
            && cfg!(target_os = "linux")
            && req
                .flags
                .intersects(FileFlags::AUTO_FLUSH | FileFlags::OS_SYNC);
        if durable || req.flags.contains(FileFlags::FAST_DIRECTORY_ENUMERATION) {
            dirh = self.containing_dir_handle(&req.path)?;
        }
        if durable {
            Self::sync_parent_dir(dirh.as_ref());
        }
        Ok(OpStep::Done(Some(HandleRef::sentinel_with_dir(
            req.path, dirh,
        ))))
    }

    fn rmdir(&self, _cx: OpCx, req: PathReq) -> Result<OpStep> {
        fs::remove_dir(&req.path).map_err(|e| DispatchError::os("rmdir", &req.path, &e))?;
        Ok(OpStep::Done(Some(HandleRef::sentinel(req.path))))
    }

    fn file(&self, _cx: OpCx, req: PathReq) -> Result<OpStep> {
        let flags = req.flags;
        let mut options = OpenOptions::new();

        // Access mode; an empty mode opens read-only as the OS would
        if flags.contains(FileFlags::APPEND) {
            options.append(true);
            if flags.contains(FileFlags::READ) {
                options.read(true);
            }
        } else {
            if flags.contains(FileFlags::READ) {
                options.read(true);
            }
            if flags.contains(FileFlags::WRITE) {
                options.write(true);
            }
            if !flags.intersects(FileFlags::READ_WRITE) {
                options.read(true);
            }
        }

        if flags.contains(FileFlags::TRUNCATE) {
            options.truncate(true);
        }
        if flags.contains(FileFlags::CREATE_ONLY_IF_NOT_EXIST) {
            options.create_new(true);
        } else if flags.contains(FileFlags::CREATE) {
            options.create(true);
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let mut custom = 0;
            #[cfg(target_os = "linux")]
            {
                if flags.contains(FileFlags::OS_DIRECT) {
                    custom |= libc::O_DIRECT;
                }
            }
            if flags.contains(FileFlags::OS_SYNC) {
                custom |= libc::O_SYNC;
            }
            if custom != 0 {
                options.custom_flags(custom);
            }
        }

        let mut dirh = None;
        if Self::wants_parent_sync(flags) || flags.contains(FileFlags::FAST_DIRECTORY_ENUMERATION)
        {
            dirh = self.containing_dir_handle(&req.path)?;
        }

        let file = options
            .open(&req.path)
            .map_err(|e| DispatchError::os("open", &req.path, &e))?;

        if Self::wants_parent_sync(flags) {
            Self::sync_parent_dir(dirh.as_ref());
        }

        // Writing with autoflush requested, unless the descriptor is
        // already synchronous
        let autoflush = flags.contains(FileFlags::AUTO_FLUSH | FileFlags::WRITE)
            && !flags.contains(FileFlags::OS_SYNC);
        let handle = HandleRef::open(
            Arc::clone(&self.registry),
            req.path,
            file,
            autoflush,
            dirh,
        );
        Ok(OpStep::Done(Some(handle)))
    }

    fn rmfile(&self, _cx: OpCx, req: PathReq) -> Result<OpStep> {
        fs::remove_file(&req.path).map_err(|e| DispatchError::os("unlink", &req.path, &e))?;
        Ok(OpStep::Done(Some(HandleRef::sentinel(req.path))))
    }

    fn sync(&self, _cx: OpCx, handle: &Arc<HandleRef>) -> Result<OpStep> {
        handle.sync()?;
        Ok(OpStep::Done(Some(Arc::clone(handle))))
    }

    fn close(&self, _cx: OpCx, handle: &Arc<HandleRef>) -> Result<OpStep> {
        handle.close()?;
        Ok(OpStep::Done(Some(Arc::clone(handle))))
    }

    #[cfg(unix)]
    fn read(
        &self,
        _cx: OpCx,
        handle: &Arc<HandleRef>,
        buffers: &[SharedBuf],
        at: u64,
    ) -> Result<OpStep> {
        use std::os::unix::fs::FileExt;

        let file = handle.file()?;
        let mut offset = at;
        let mut expected = 0u64;
        let mut transferred = 0u64;
        for chunk in buffers.chunks(IOV_CHUNK) {
            for buffer in chunk {
                let mut buffer = buffer.lock();
                expected += buffer.len() as u64;
                let mut filled = 0;
                while filled < buffer.len() {
                    let n = file
                        .read_at(&mut buffer[filled..], offset)
                        .map_err(|e| DispatchError::os("pread", handle.path(), &e))?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                    offset += n as u64;
                    transferred += n as u64;
                }
            }
        }
        handle.add_bytes_read(transferred);
        if transferred != expected {
            return Err(DispatchError::ShortTransfer {
                expected,
                transferred,
            });
        }
        Ok(OpStep::Done(Some(Arc::clone(handle))))
    }

    #[cfg(not(unix))]
    fn read(
        &self,
        _cx: OpCx,
        handle: &Arc<HandleRef>,
        buffers: &[SharedBuf],
        at: u64,
    ) -> Result<OpStep> {
        use std::io::{Read, Seek, SeekFrom};

        // No positional reads here: serialize the seek+read pair across
        // the whole dispatcher
        let _serial = self.serial_io.lock();
        let file = handle.file()?;
        let mut reader = &*file;
        reader
            .seek(SeekFrom::Start(at))
            .map_err(|e| DispatchError::os("seek", handle.path(), &e))?;
        let mut expected = 0u64;
        let mut transferred = 0u64;
        for chunk in buffers.chunks(IOV_CHUNK) {
            for buffer in chunk {
                let mut buffer = buffer.lock();
                expected += buffer.len() as u64;
                let mut filled = 0;
                while filled < buffer.len() {
                    let n = reader
                        .read(&mut buffer[filled..])
                        .map_err(|e| DispatchError::os("read", handle.path(), &e))?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                    transferred += n as u64;
                }
            }
        }
        handle.add_bytes_read(transferred);
        if transferred != expected {
            return Err(DispatchError::ShortTransfer {
                expected,
                transferred,
            });
        }
        Ok(OpStep::Done(Some(Arc::clone(handle))))
    }

    #[cfg(unix)]
    fn write(
        &self,
        _cx: OpCx,
        handle: &Arc<HandleRef>,
        buffers: &[Bytes],
        at: u64,
    ) -> Result<OpStep> {
        use std::os::unix::fs::FileExt;

        let file = handle.file()?;
        let mut offset = at;
        let mut expected = 0u64;
        let mut transferred = 0u64;
        for chunk in buffers.chunks(IOV_CHUNK) {
            for buffer in chunk {
                expected += buffer.len() as u64;
                let mut written = 0;
                while written < buffer.len() {
                    let n = file
                        .write_at(&buffer[written..], offset)
                        .map_err(|e| DispatchError::os("pwrite", handle.path(), &e))?;
                    if n == 0 {
                        break;
                    }
                    written += n;
                    offset += n as u64;
                    transferred += n as u64;
                }
            }
        }
        handle.add_bytes_written(transferred);
        if transferred != expected {
            return Err(DispatchError::ShortTransfer {
                expected,
                transferred,
            });
        }
        Ok(OpStep::Done(Some(Arc::clone(handle))))
    }

    #[cfg(not(unix))]
    fn write(
        &self,
        _cx: OpCx,
        handle: &Arc<HandleRef>,
        buffers: &[Bytes],
        at: u64,
    ) -> Result<OpStep> {
        use std::io::{Seek, SeekFrom, Write};

        let _serial = self.serial_io.lock();
        let file = handle.file()?;
        let mut writer = &*file;
        writer
            .seek(SeekFrom::Start(at))
            .map_err(|e| DispatchError::os("seek", handle.path(), &e))?;
        let mut expected = 0u64;
        let mut transferred = 0u64;
        for chunk in buffers.chunks(IOV_CHUNK) {
            for buffer in chunk {
                expected += buffer.len() as u64;
                writer
                    .write_all(buffer)
                    .map_err(|e| DispatchError::os("write", handle.path(), &e))?;
                transferred += buffer.len() as u64;
            }
        }
        handle.add_bytes_written(transferred);
        if transferred != expected {
            return Err(DispatchError::ShortTransfer {
                expected,
                transferred,
            });
        }
        Ok(OpStep::Done(Some(Arc::clone(handle))))
    }

    fn truncate(&self, _cx: OpCx, handle: &Arc<HandleRef>, size: u64) -> Result<OpStep> {
        let file = handle.file()?;
        // Some platforms let a concurrent writer on the same descriptor
        // move the end-of-file between the set and the check; retry until
        // the observed size sticks
        loop {
            file.set_len(size)
                .map_err(|e| DispatchError::os("ftruncate", handle.path(), &e))?;
            let observed = file
                .metadata()
                .map_err(|e| DispatchError::os("fstat", handle.path(), &e))?
                .len();
            if observed == size {
                break;
            }
        }
        Ok(OpStep::Done(Some(Arc::clone(handle))))
    }

    fn enumerate(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let entries =
            fs::read_dir(path).map_err(|e| DispatchError::os("readdir", path, &e))?;
        let mut children = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DispatchError::os("readdir", path, &e))?;
            children.push(entry.path());
        }
        children.sort();
        Ok(children)
    }
}
