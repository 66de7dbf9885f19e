/*!
 * Engine Limits and Constants
 *
 * Centralized location for the engine's tunables and magic numbers.
 * All values include rationale comments explaining why they exist.
 */

use std::time::Duration;

/// Default worker pool concurrency for the process-wide pool.
/// This is effectively how many file I/O operations can be in flight at
/// once; the kernel imposes its own ceiling beyond it.
pub const DEFAULT_IO_PARALLELISM: usize = 8;

/// Initial capacity reserved in the dispatch table.
/// Sized for burst submission patterns (thousands of ops chained in one
/// call) without rehashing in the middle of a locked section.
pub const OP_TABLE_PREALLOC: usize = 10_000;

/// Maximum buffers handed to the OS in one positional transfer pass.
/// Mirrors the POSIX IOV_MAX floor; longer buffer lists are split.
pub const IOV_CHUNK: usize = 1024;

/// Polling interval while a dispatcher drains its table at shutdown.
/// Short enough that shutdown latency stays invisible, long enough not to
/// spin against the table lock.
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_micros(100);
