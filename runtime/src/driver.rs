//! The device driver plug-in contract.
//!
//! Device discovery and the actual alloc/free/copy primitives are external
//! collaborators, out of scope for this crate; this trait is the seam the
//! map engine calls through. It is an object-safe trait so
//! [`crate::device::DeviceContext`] can hold one as `Arc<dyn Driver>`
//! instead of calling architecture-specific free functions directly.

use crate::device::DeviceAddr;

/// Target-side memory operations a device plug-in must provide.
///
/// Implementations are opaque to this crate: it never assumes anything
/// about what `alloc`/`copy_h2d`/etc. actually do beyond their documented
/// contract. All methods may block; none may be called while the owning
/// [`crate::device::DeviceContext`]'s index lock is held (split-lock
/// protocol).
pub trait Driver: Send + Sync {
    /// Allocate `size` bytes of device memory. Returns `None` on
    /// exhaustion; the caller propagates that as a recoverable failure,
    /// never as a fatal diagnostic.
    fn alloc(&self, size: usize) -> Option<DeviceAddr>;

    /// Free a device allocation previously returned by `alloc`. Returns
    /// `false` if the driver rejects the free (treated as fatal by the
    /// caller).
    fn free(&self, addr: DeviceAddr) -> bool;

    /// Copy `len` bytes from the host range starting at `src` to the
    /// device range starting at `dst`, on the given async queue.
    fn copy_h2d(&self, queue: crate::queue::AsyncHandle, dst: DeviceAddr, src: usize, len: usize);

    /// Copy `len` bytes from the device range starting at `src` to the
    /// host range starting at `dst`, on the given async queue.
    fn copy_d2h(&self, queue: crate::queue::AsyncHandle, dst: usize, src: DeviceAddr, len: usize);
}
