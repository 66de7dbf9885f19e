/*!
 * Handle Registry
 * Process-wide table of live open handles keyed by native descriptor
 */

use crate::handle::HandleRef;
use ahash::RandomState;
use dashmap::DashMap;
use log::{debug, warn};
use std::sync::{Arc, Weak};

/// Native descriptor key (file descriptor widened, or a synthetic id on
/// platforms without integral descriptors)
pub type RawDescriptor = u64;

/// Registry of open handles.
///
/// Holds non-owning references only: the handles own themselves through
/// the futures and callers that hold them, and deregister on close or
/// drop. Lock sections are short and never held across I/O.
pub struct HandleRegistry {
    entries: DashMap<RawDescriptor, Weak<HandleRef>, RandomState>,
}

impl HandleRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::with_hasher(RandomState::new()),
        })
    }

    /// Record a freshly opened handle
    pub(crate) fn add(&self, key: RawDescriptor, handle: &Arc<HandleRef>) {
        debug!("registering descriptor {} for {:?}", key, handle.path());
        if self.entries.insert(key, Arc::downgrade(handle)).is_some() {
            warn!("descriptor {} re-registered while still tracked", key);
        }
    }

    /// Remove a handle record; called by close and by handle drop
    pub(crate) fn remove(&self, key: RawDescriptor) {
        if self.entries.remove(&key).is_some() {
            debug!("deregistered descriptor {}", key);
        }
    }

    /// Look up a live handle by descriptor
    pub fn get(&self, key: RawDescriptor) -> Option<Arc<HandleRef>> {
        self.entries.get(&key).and_then(|entry| entry.upgrade())
    }

    /// Number of registered handles
    pub fn count(&self) -> usize {
        self.entries.len()
    }
}
