//! Async queue handles.
//!
//! An async argument of the sync sentinel means "do this work now,
//! synchronously"; any other value selects a per-thread queue obtained
//! from a collaborator. The queue's actual scheduling is an external
//! collaborator, out of scope for this crate; this module only defines
//! the handle type and the trait the map engine dispatches deferred
//! copies/removals through.

/// A reference to an async queue, or the synchronous sentinel.
///
/// Mirrors the OpenACC `acc_async_sync` convention: any non-sentinel
/// integer selects a caller-defined queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncHandle {
    /// Execute immediately rather than enqueuing.
    Sync,
    /// A specific async queue, identified by the caller's integer handle.
    Queue(i32),
}

impl AsyncHandle {
    pub fn is_sync(self) -> bool {
        matches!(self, AsyncHandle::Sync)
    }

    /// Convert from the OpenACC wire convention where `acc_async_sync`
    /// (-1) denotes synchronous execution.
    pub fn from_raw(raw: i32) -> Self {
        if raw == ACC_ASYNC_SYNC {
            AsyncHandle::Sync
        } else {
            AsyncHandle::Queue(raw)
        }
    }
}

/// The wire value of `acc_async_sync` in the OpenACC ABI.
pub const ACC_ASYNC_SYNC: i32 = -1;

/// An opaque, ordered stream of deferred memory operations.
///
/// Implementations guarantee operations on the same handle complete in
/// issue order; cross-handle ordering is the
/// caller's responsibility via explicit waits.
pub trait AsyncQueue: Send + Sync {
    /// Block until every operation queued on `handle` so far has
    /// completed.
    fn wait(&self, handle: AsyncHandle);
}
