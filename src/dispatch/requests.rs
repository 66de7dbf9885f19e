/*!
 * Request Types
 * Path- and data-addressed submission requests
 */

use crate::core::flags::FileFlags;
use crate::dispatch::OpHandle;
use bytes::Bytes;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

/// A request addressed by path (dir, rmdir, file, rmfile)
#[derive(Clone)]
pub struct PathOpReq {
    /// Operation that must succeed before this one runs
    pub precondition: Option<OpHandle>,
    pub path: PathBuf,
    pub flags: FileFlags,
}

impl PathOpReq {
    pub fn new(path: impl Into<PathBuf>, flags: FileFlags) -> Self {
        Self {
            precondition: None,
            path: path.into(),
            flags,
        }
    }

    /// Same request, sequenced after `precondition`
    pub fn after(precondition: &OpHandle, path: impl Into<PathBuf>, flags: FileFlags) -> Self {
        Self {
            precondition: Some(precondition.clone()),
            path: path.into(),
            flags,
        }
    }
}

/// A destination buffer a read fills in place. Shared so the caller can
/// inspect the bytes after the read's future resolves.
pub type SharedBuf = Arc<Mutex<Vec<u8>>>;

/// Allocate a zeroed shared read buffer
pub fn shared_buf(len: usize) -> SharedBuf {
    Arc::new(Mutex::new(vec![0u8; len]))
}

/// A positional vectored read request
#[derive(Clone)]
pub struct ReadReq {
    /// The open-file operation this read is sequenced after
    pub precondition: OpHandle,
    pub buffers: Vec<SharedBuf>,
    /// Absolute file offset of the first byte
    pub at: u64,
}

impl ReadReq {
    pub fn new(precondition: &OpHandle, buffers: Vec<SharedBuf>, at: u64) -> Self {
        Self {
            precondition: precondition.clone(),
            buffers,
            at,
        }
    }

    /// Total bytes this request transfers
    pub fn len(&self) -> u64 {
        self.buffers.iter().map(|b| b.lock().len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A positional vectored write request
#[derive(Clone)]
pub struct WriteReq {
    /// The open-file operation this write is sequenced after
    pub precondition: OpHandle,
    pub buffers: Vec<Bytes>,
    /// Absolute file offset of the first byte
    pub at: u64,
}

impl WriteReq {
    pub fn new(precondition: &OpHandle, buffers: Vec<Bytes>, at: u64) -> Self {
        Self {
            precondition: precondition.clone(),
            buffers,
            at,
        }
    }

    /// Shorthand for a single-buffer write
    pub fn single(precondition: &OpHandle, data: impl Into<Bytes>, at: u64) -> Self {
        Self::new(precondition, vec![data.into()], at)
    }

    pub fn len(&self) -> u64 {
        self.buffers.iter().map(|b| b.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
