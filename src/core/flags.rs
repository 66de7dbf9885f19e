/*!
 * Flag Bitsets
 * File open flags and per-operation scheduling flags
 */

use bitflags::bitflags;

bitflags! {
    /// Flags controlling how files and directories are opened and treated.
    ///
    /// A dispatcher can force flags on (and mask flags off) every request it
    /// sees; see [`FileFlags::force`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FileFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        const APPEND = 1 << 2;
        const TRUNCATE = 1 << 3;
        const CREATE = 1 << 4;
        const CREATE_ONLY_IF_NOT_EXIST = 1 << 5;
        /// Flush on close (and on handle drop) if unsynced writes exist
        const AUTO_FLUSH = 1 << 6;
        /// Bypass the OS page cache where the platform supports it
        const OS_DIRECT = 1 << 7;
        /// Synchronous writes at the OS level
        const OS_SYNC = 1 << 8;
        const WILL_BE_SEQUENTIALLY_ACCESSED = 1 << 9;
        /// Keep a cached handle to the containing directory
        const FAST_DIRECTORY_ENUMERATION = 1 << 10;
    }
}

bitflags! {
    /// Scheduling flags attached to each operation in the dispatch table
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpFlags: u8 {
        /// Continuations run in-line on the completing thread via the
        /// deferred micro-queue instead of re-crossing the worker pool
        const IMMEDIATE = 1 << 0;
        /// The public future is fulfilled by the operation itself at a
        /// moment of its choosing, not when its worker function returns
        const DETACHED = 1 << 1;
    }
}

impl Default for FileFlags {
    fn default() -> Self {
        FileFlags::empty()
    }
}

impl Default for OpFlags {
    fn default() -> Self {
        OpFlags::empty()
    }
}

impl FileFlags {
    /// Apply a dispatcher's flag policy: masked bits are cleared, forced
    /// bits are set, on every request the dispatcher processes.
    #[inline]
    pub fn force(self, forced: FileFlags, masked: FileFlags) -> FileFlags {
        (self & !masked) | forced
    }
}
