//! Device context: the lock, the interval index, the driver handle, the
//! shared-memory capability flag, and the optional async-queue/profiling
//! collaborators.

use spin::Mutex;

use alloc::sync::Arc;

use crate::driver::Driver;
use crate::interval::Index;
use crate::profiling::{NullProfiler, ProfilingHook};
use crate::queue::AsyncQueue;

/// A host virtual address. Opaque: the runtime never dereferences it, only
/// reasons about the ranges it denotes.
pub type HostAddr = usize;

/// A device-side address, distinguished from [`HostAddr`] so the two
/// address spaces can't be mixed by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceAddr(pub usize);

impl DeviceAddr {
    pub const NULL: DeviceAddr = DeviceAddr(0);

    pub fn offset(self, by: usize) -> DeviceAddr {
        DeviceAddr(self.0 + by)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// One accelerator device's correspondence table plus its collaborators.
///
/// Holds a single [`spin::Mutex`] guarding the interval index and every
/// mapping entry's reference counts: that is the only lock the core uses,
/// and driver calls are never made while it is held.
pub struct DeviceContext {
    index: Mutex<Index>,
    driver: Arc<dyn Driver>,
    /// When set, `alloc` returns the host pointer verbatim, copies are
    /// `memmove`, and presence/attach/detach collapse to identity or
    /// no-ops: the shared-memory fast path.
    shared_memory: bool,
    /// External collaborator `GOACC_enter_exit_data` waits on before
    /// dispatching a batch. `None` until a caller attaches one with
    /// [`DeviceContext::with_async_queue`]; waits are then no-ops.
    queue: Option<Arc<dyn AsyncQueue>>,
    profiler: Arc<dyn ProfilingHook>,
}

impl DeviceContext {
    pub fn new(driver: Arc<dyn Driver>, shared_memory: bool) -> Self {
        log::debug!(target: "oaccrt::device", "device context created, shared_memory={shared_memory}");
        Self {
            index: Mutex::new(Index::new()),
            driver,
            shared_memory,
            queue: None,
            profiler: Arc::new(NullProfiler),
        }
    }

    /// Attaches the async-queue collaborator that resolves
    /// `GOACC_enter_exit_data`'s `waits` argument.
    pub fn with_async_queue(mut self, queue: Arc<dyn AsyncQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Attaches a profiling-event observer, replacing the default
    /// [`NullProfiler`].
    pub fn with_profiler(mut self, profiler: Arc<dyn ProfilingHook>) -> Self {
        self.profiler = profiler;
        self
    }

    pub fn is_shared_memory(&self) -> bool {
        self.shared_memory
    }

    pub fn driver(&self) -> &dyn Driver {
        &*self.driver
    }

    pub(crate) fn async_queue(&self) -> Option<&dyn AsyncQueue> {
        self.queue.as_deref()
    }

    pub(crate) fn profiler(&self) -> &dyn ProfilingHook {
        &*self.profiler
    }

    pub(crate) fn index(&self) -> &Mutex<Index> {
        &self.index
    }
}
