/*!
 * Handle Records
 * Owned open-resource records referenced by operation futures
 */

use crate::core::errors::{DispatchError, Result};
use crate::registry::{HandleRegistry, RawDescriptor};
use log::error;
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

#[cfg(unix)]
fn descriptor_of(file: &File) -> i64 {
    use std::os::unix::io::AsRawFd;
    i64::from(file.as_raw_fd())
}

#[cfg(not(unix))]
fn descriptor_of(_file: &File) -> i64 {
    static NEXT_DESCRIPTOR: AtomicI64 = AtomicI64::new(1);
    NEXT_DESCRIPTOR.fetch_add(1, Ordering::SeqCst)
}

/// An open resource (file or directory) produced by a dispatched operation.
///
/// Futures hand out `Arc<HandleRef>`; the last clone to drop closes the
/// descriptor, flushing first when autoflush is set and unsynced writes
/// exist. Sentinel records (no descriptor) represent path-only results
/// such as a created directory or a completed unlink.
pub struct HandleRef {
    path: PathBuf,
    file: RwLock<Option<File>>,
    descriptor: AtomicI64,
    registry: Option<Arc<HandleRegistry>>,
    registered: AtomicBool,
    autoflush: bool,
    /// Cached handle to the containing directory, kept for directory-entry
    /// durability and fast enumeration
    dirh: Option<Arc<HandleRef>>,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    bytes_written_at_last_sync: AtomicU64,
}

impl HandleRef {
    /// An open file or directory handle, registered for diagnostics
    pub(crate) fn open(
        registry: Arc<HandleRegistry>,
        path: PathBuf,
        file: File,
        autoflush: bool,
        dirh: Option<Arc<HandleRef>>,
    ) -> Arc<Self> {
        let descriptor = descriptor_of(&file);
        let handle = Arc::new(Self {
            path,
            file: RwLock::new(Some(file)),
            descriptor: AtomicI64::new(descriptor),
            registry: Some(registry),
            registered: AtomicBool::new(true),
            autoflush,
            dirh,
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            bytes_written_at_last_sync: AtomicU64::new(0),
        });
        handle
            .registry
            .as_ref()
            .expect("registry set above")
            .add(descriptor as RawDescriptor, &handle);
        handle
    }

    /// A path-only record with no descriptor behind it
    pub(crate) fn sentinel(path: PathBuf) -> Arc<Self> {
        Self::sentinel_with_dir(path, None)
    }

    pub(crate) fn sentinel_with_dir(path: PathBuf, dirh: Option<Arc<HandleRef>>) -> Arc<Self> {
        Arc::new(Self {
            path,
            file: RwLock::new(None),
            descriptor: AtomicI64::new(-1),
            registry: None,
            registered: AtomicBool::new(false),
            autoflush: false,
            dirh,
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            bytes_written_at_last_sync: AtomicU64::new(0),
        })
    }

    /// An open descriptor kept outside the registry (containing-directory
    /// cache entries)
    pub(crate) fn unregistered(path: PathBuf, file: File) -> Arc<Self> {
        let descriptor = descriptor_of(&file);
        Arc::new(Self {
            path,
            file: RwLock::new(Some(file)),
            descriptor: AtomicI64::new(descriptor),
            registry: None,
            registered: AtomicBool::new(false),
            autoflush: false,
            dirh: None,
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            bytes_written_at_last_sync: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The native descriptor, while the handle is open
    pub fn descriptor(&self) -> Option<RawDescriptor> {
        match self.descriptor.load(Ordering::Acquire) {
            d if d < 0 => None,
            d => Some(d as RawDescriptor),
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.read().is_some()
    }

    /// Borrow the open file; fails if the handle was closed or is a
    /// sentinel
    pub(crate) fn file(&self) -> Result<MappedRwLockReadGuard<'_, File>> {
        RwLockReadGuard::try_map(self.file.read(), |slot| slot.as_ref()).map_err(|_| {
            DispatchError::invalid(format!("handle for {} is not open", self.path.display()))
        })
    }

    pub(crate) fn add_bytes_read(&self, n: u64) {
        self.bytes_read.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes_written(&self, n: u64) {
        self.bytes_written.fetch_add(n, Ordering::Relaxed);
    }

    /// Total bytes read through this handle
    pub fn read_count(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Total bytes written through this handle
    pub fn write_count(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Bytes written since the last fsync through this handle
    pub fn write_count_since_sync(&self) -> u64 {
        self.bytes_written
            .load(Ordering::Relaxed)
            .saturating_sub(self.bytes_written_at_last_sync.load(Ordering::Relaxed))
    }

    fn mark_synced(&self, bytes: u64) {
        self.bytes_written_at_last_sync
            .fetch_add(bytes, Ordering::Relaxed);
    }

    /// Fsync the descriptor if unsynced writes exist
    pub(crate) fn sync(&self) -> Result<()> {
        let pending = self.write_count_since_sync();
        if pending > 0 {
            self.file()?
                .sync_all()
                .map_err(|e| DispatchError::os("fsync", &self.path, &e))?;
        }
        self.mark_synced(pending);
        Ok(())
    }

    /// Flush (when required), deregister and close the descriptor
    pub(crate) fn close(&self) -> Result<()> {
        let mut slot = self.file.write();
        if let Some(file) = slot.as_ref() {
            let pending = self.write_count_since_sync();
            if self.autoflush && pending > 0 {
                file.sync_all()
                    .map_err(|e| DispatchError::os("fsync", &self.path, &e))?;
                self.mark_synced(pending);
            }
        }
        if slot.take().is_some() {
            self.deregister();
            self.descriptor.store(-1, Ordering::Release);
        }
        Ok(())
    }

    fn deregister(&self) {
        if self.registered.swap(false, Ordering::AcqRel) {
            if let (Some(registry), d) = (&self.registry, self.descriptor.load(Ordering::Acquire))
            {
                if d >= 0 {
                    registry.remove(d as RawDescriptor);
                }
            }
        }
    }
}

impl Drop for HandleRef {
    fn drop(&mut self) {
        if let Some(file) = self.file.get_mut().take() {
            if self.autoflush && self.write_count_since_sync() > 0 {
                if let Err(e) = file.sync_all() {
                    error!("flush on drop failed for {:?}: {}", self.path, e);
                }
            }
        }
        self.deregister();
    }
}

impl std::fmt::Debug for HandleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleRef")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .field("bytes_read", &self.read_count())
            .field("bytes_written", &self.write_count())
            .finish()
    }
}
