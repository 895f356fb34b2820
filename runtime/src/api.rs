//! The public `acc_*` / `GOACC_enter_exit_data` surface.
//!
//! Every entry point is an inherent method on [`DeviceContext`] rather
//! than a free function reading an implicit thread-local "current
//! device": per-thread context lookup is a named external collaborator,
//! and a safe Rust API cannot thread a thread-local through safe code the
//! way the upstream `goacc_thread()` does in C. Callers (the
//! compiler-generated glue, or a thread-local-aware wrapper crate) are
//! expected to resolve "the current device" themselves and pass it in
//! explicitly. See `DESIGN.md` for this decision.

use crate::device::{DeviceAddr, DeviceContext, HostAddr};
use crate::flags::GoaccFlags;
use crate::kinds::MapKind;
use crate::map_engine::{self, MapTriple, Purpose};
use crate::profiling::ProfileEvent;
use crate::queue::AsyncHandle;

impl DeviceContext {
    // -- Allocation -----------------------------------------------------

    /// `acc_malloc(s) -> void*`. Zero-size requests return `None` without
    /// touching the device.
    pub fn acc_malloc(&self, size: usize) -> Option<DeviceAddr> {
        if size == 0 {
            return None;
        }
        self.driver().alloc(size)
    }

    /// `acc_free(d)`. Rejects freeing a device address whose byte range
    /// intersects any mapping entry.
    pub fn acc_free(&self, d: DeviceAddr) {
        {
            let idx = self.index().lock();
            if let Some(e) = idx.lookup_by_device(d, 1) {
                crate::fatal!(
                    "refusing to free device memory space at {:?} that is still mapped at [{:#x},+{}]",
                    d,
                    e.host_start,
                    e.size()
                );
            }
        }
        self.driver().free(d);
    }

    // -- Presence / translation ------------------------------------------

    /// `acc_is_present(h, s) -> {0,1}`. True iff a single entry covers
    /// `[h, h+s)`; false when the range straddles two adjacent entries.
    pub fn acc_is_present(&self, h: HostAddr, s: usize) -> bool {
        if s == 0 {
            return false;
        }
        if self.is_shared_memory() {
            return true;
        }
        let idx = self.index().lock();
        idx.lookup(h).is_some_and(|e| e.covers(h, s))
    }

    /// `acc_deviceptr(h) -> void* | null`.
    pub fn acc_deviceptr(&self, h: HostAddr) -> Option<DeviceAddr> {
        if self.is_shared_memory() {
            return Some(DeviceAddr(h));
        }
        let idx = self.index().lock();
        idx.lookup(h).map(|e| e.device_addr_for(h))
    }

    /// `acc_hostptr(d) -> void* | null`.
    pub fn acc_hostptr(&self, d: DeviceAddr) -> Option<HostAddr> {
        if self.is_shared_memory() {
            return Some(d.0);
        }
        let idx = self.index().lock();
        idx.lookup_by_device(d, 1).map(|e| {
            let base = e.device_base();
            e.host_start + (d.0 - base.0)
        })
    }

    // -- Dynamic mapping ---------------------------------------------------

    fn dynamic_enter(&self, queue: AsyncHandle, h: HostAddr, s: usize, kind: MapKind) {
        if self.is_shared_memory() {
            return;
        }
        self.profiler()
            .on_event(ProfileEvent::CreateStart { host: h, size: s });
        let batch = [MapTriple {
            host_addr: h,
            size: s,
            kind,
        }];
        let _ = map_engine::map_vars_async(self, queue, &batch, Purpose::OpenaccEnterData);
        let device = self.acc_deviceptr(h).unwrap_or(DeviceAddr::NULL);
        self.profiler()
            .on_event(ProfileEvent::CreateEnd { host: h, device });
    }

    fn dynamic_exit(&self, queue: AsyncHandle, h: HostAddr, s: usize, kind: MapKind, is_async: bool) {
        if self.is_shared_memory() {
            return;
        }
        self.profiler().on_event(ProfileEvent::DeleteStart { host: h });
        map_engine::remove_var(self, queue, h, s, kind, !is_async);
        self.profiler().on_event(ProfileEvent::DeleteEnd { host: h });
    }

    pub fn acc_create(&self, h: HostAddr, s: usize) {
        self.dynamic_enter(AsyncHandle::Sync, h, s, MapKind::Alloc);
    }
    pub fn acc_create_async(&self, h: HostAddr, s: usize, async_: i32) {
        self.dynamic_enter(AsyncHandle::from_raw(async_), h, s, MapKind::Alloc);
    }

    pub fn acc_copyin(&self, h: HostAddr, s: usize) {
        self.dynamic_enter(AsyncHandle::Sync, h, s, MapKind::To);
    }
    pub fn acc_copyin_async(&self, h: HostAddr, s: usize, async_: i32) {
        self.dynamic_enter(AsyncHandle::from_raw(async_), h, s, MapKind::To);
    }

    pub fn acc_delete(&self, h: HostAddr, s: usize) {
        self.dynamic_exit(AsyncHandle::Sync, h, s, MapKind::Release, false);
    }
    pub fn acc_delete_async(&self, h: HostAddr, s: usize, async_: i32) {
        self.dynamic_exit(AsyncHandle::from_raw(async_), h, s, MapKind::Release, true);
    }
    pub fn acc_delete_finalize(&self, h: HostAddr, s: usize) {
        self.dynamic_exit(AsyncHandle::Sync, h, s, MapKind::Delete, false);
    }
    pub fn acc_delete_finalize_async(&self, h: HostAddr, s: usize, async_: i32) {
        self.dynamic_exit(AsyncHandle::from_raw(async_), h, s, MapKind::Delete, true);
    }

    pub fn acc_copyout(&self, h: HostAddr, s: usize) {
        self.dynamic_exit(AsyncHandle::Sync, h, s, MapKind::From, false);
    }
    pub fn acc_copyout_async(&self, h: HostAddr, s: usize, async_: i32) {
        self.dynamic_exit(AsyncHandle::from_raw(async_), h, s, MapKind::From, true);
    }
    pub fn acc_copyout_finalize(&self, h: HostAddr, s: usize) {
        self.dynamic_exit(AsyncHandle::Sync, h, s, MapKind::ForceFrom, false);
    }
    pub fn acc_copyout_finalize_async(&self, h: HostAddr, s: usize, async_: i32) {
        self.dynamic_exit(AsyncHandle::from_raw(async_), h, s, MapKind::ForceFrom, true);
    }

    // -- Legacy aliases (same semantics, thin re-exports) --

    pub fn acc_present_or_create(&self, h: HostAddr, s: usize) {
        self.acc_create(h, s);
    }
    pub fn acc_pcreate(&self, h: HostAddr, s: usize) {
        self.acc_create(h, s);
    }
    pub fn acc_present_or_copyin(&self, h: HostAddr, s: usize) {
        self.acc_copyin(h, s);
    }
    pub fn acc_pcopyin(&self, h: HostAddr, s: usize) {
        self.acc_copyin(h, s);
    }

    // -- Transfer -----------------------------------------------------------

    /// `acc_memcpy_to_device`.
    pub fn acc_memcpy_to_device(&self, d: DeviceAddr, h: HostAddr, len: usize) {
        self.driver().copy_h2d(AsyncHandle::Sync, d, h, len);
    }
    pub fn acc_memcpy_to_device_async(&self, d: DeviceAddr, h: HostAddr, len: usize, async_: i32) {
        self.driver().copy_h2d(AsyncHandle::from_raw(async_), d, h, len);
    }

    /// `acc_memcpy_from_device`.
    pub fn acc_memcpy_from_device(&self, h: HostAddr, d: DeviceAddr, len: usize) {
        self.driver().copy_d2h(AsyncHandle::Sync, h, d, len);
    }
    pub fn acc_memcpy_from_device_async(&self, h: HostAddr, d: DeviceAddr, len: usize, async_: i32) {
        self.driver().copy_d2h(AsyncHandle::from_raw(async_), h, d, len);
    }

    // -- Update ---------------------------------------------------------------

    /// `acc_update_device`. Looks up the existing mapping and issues a
    /// host-to-device copy of `[h, h+s)`.
    pub fn acc_update_device(&self, h: HostAddr, s: usize) {
        self.acc_update_device_async(h, s, crate::queue::ACC_ASYNC_SYNC);
    }
    pub fn acc_update_device_async(&self, h: HostAddr, s: usize, async_: i32) {
        if h == 0 || self.is_shared_memory() {
            return;
        }
        let device_addr = {
            let idx = self.index().lock();
            match idx.lookup(h) {
                Some(e) if e.covers(h, s) => e.device_addr_for(h),
                Some(_) => crate::fatal!("[{:#x},+{}] outside mapped block", h, s),
                None => crate::fatal!("[{:#x},+{}] not mapped", h, s),
            }
        };
        self.driver()
            .copy_h2d(AsyncHandle::from_raw(async_), device_addr, h, s);
    }

    /// `acc_update_self`. A null host pointer is a no-op (Fortran's
    /// absent-optional-argument ABI).
    pub fn acc_update_self(&self, h: HostAddr, s: usize) {
        self.acc_update_self_async(h, s, crate::queue::ACC_ASYNC_SYNC);
    }
    pub fn acc_update_self_async(&self, h: HostAddr, s: usize, async_: i32) {
        if h == 0 || self.is_shared_memory() {
            return;
        }
        let device_addr = {
            let idx = self.index().lock();
            match idx.lookup(h) {
                Some(e) if e.covers(h, s) => e.device_addr_for(h),
                Some(_) => crate::fatal!("[{:#x},+{}] outside mapped block", h, s),
                None => crate::fatal!("[{:#x},+{}] not mapped", h, s),
            }
        };
        self.driver()
            .copy_d2h(AsyncHandle::from_raw(async_), h, device_addr, s);
    }

    // -- Pointer attach -------------------------------------------------------

    pub fn acc_attach(&self, hostaddr: HostAddr, pointee: usize) {
        self.attach(hostaddr, pointee);
    }
    pub fn acc_attach_async(&self, hostaddr: HostAddr, pointee: usize, _async_: i32) {
        self.attach(hostaddr, pointee);
    }
    pub fn acc_detach(&self, hostaddr: HostAddr) {
        self.detach(hostaddr, false);
    }
    pub fn acc_detach_async(&self, hostaddr: HostAddr, _async_: i32) {
        self.detach(hostaddr, false);
    }
    pub fn acc_detach_finalize(&self, hostaddr: HostAddr) {
        self.detach(hostaddr, true);
    }
    pub fn acc_detach_finalize_async(&self, hostaddr: HostAddr, _async_: i32) {
        self.detach(hostaddr, true);
    }

    // -- Bulk batch -------------------------------------------------------------

    /// `GOACC_enter_exit_data(flags, hostaddrs, sizes, kinds, async,
    /// num_waits, ...)`. Classifies the batch as enter or exit by
    /// scanning kinds for the first decisive one; `POINTER` and `TO_PSET`
    /// never decide, but on the exit side they still carry their own
    /// entry in the index and are run through the same decrement/remove
    /// path as `FROM`/`RELEASE`/`DELETE`.
    pub fn goacc_enter_exit_data(
        &self,
        flags: GoaccFlags,
        hostaddrs: &[HostAddr],
        sizes: &[usize],
        kinds: &[MapKind],
        async_: i32,
        waits: &[AsyncHandle],
    ) {
        if flags.contains(GoaccFlags::HOST_FALLBACK) || self.is_shared_memory() {
            return;
        }
        if let Some(q) = self.async_queue() {
            for &w in waits {
                q.wait(w);
            }
        }

        let is_enter = kinds.iter().any(|k| k.is_enter_decisive());
        let is_exit = kinds.iter().any(|k| k.is_exit_decisive());
        let queue = AsyncHandle::from_raw(async_);

        if is_enter && !is_exit {
            self.profiler().on_event(ProfileEvent::EnterDataStart);
            let mut i = 0;
            while i < kinds.len() {
                let last = crate::kinds::find_group_last(kinds, i);
                let batch: alloc::vec::Vec<MapTriple> = (i..=last)
                    .map(|j| MapTriple {
                        host_addr: hostaddrs[j],
                        size: kinds[j].fixed_size().unwrap_or(sizes[j]),
                        kind: kinds[j],
                    })
                    .collect();
                let _ = map_engine::map_vars_async(self, queue, &batch, Purpose::OpenaccEnterData);
                i = last + 1;
            }
            self.profiler().on_event(ProfileEvent::EnterDataEnd);
        } else if is_exit {
            self.profiler().on_event(ProfileEvent::ExitDataStart);
            for i in 0..kinds.len() {
                let size = kinds[i].fixed_size().unwrap_or(sizes[i]);
                match kinds[i] {
                    k if k.is_exit_decisive()
                        || matches!(k, MapKind::Pointer | MapKind::ToPset | MapKind::AlwaysPointer) =>
                    {
                        // A batch entry's owning allocation record may still
                        // have sibling entries later in this same batch
                        // (a `TO_PSET`/`POINTER` group shares one record
                        // across several indices), so an individual removal
                        // reaching a nonzero record refcount here is not a
                        // bug the way it would be for a standalone
                        // single-entry sync removal; always pass the weak
                        // (async-style) teardown check.
                        map_engine::remove_var(self, queue, hostaddrs[i], size, k, false);
                    }
                    other => crate::fatal!(
                        ">>>> GOACC_enter_exit_data UNHANDLED kind {:?}",
                        other
                    ),
                }
            }
            self.profiler().on_event(ProfileEvent::ExitDataEnd);
        } else {
            crate::fatal!(">>>> GOACC_enter_exit_data UNHANDLED kind (batch decides neither enter nor exit)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Driver;
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use spin::Mutex;

    struct RecordingDriver {
        next: AtomicUsize,
        allocs: AtomicUsize,
        frees: AtomicUsize,
        backing: Mutex<alloc::collections::BTreeMap<usize, alloc::vec::Vec<u8>>>,
    }

    impl RecordingDriver {
        fn new() -> Self {
            Self {
                next: AtomicUsize::new(0x1_0000),
                allocs: AtomicUsize::new(0),
                frees: AtomicUsize::new(0),
                backing: Mutex::new(alloc::collections::BTreeMap::new()),
            }
        }
    }

    impl Driver for RecordingDriver {
        fn alloc(&self, size: usize) -> Option<DeviceAddr> {
            self.allocs.fetch_add(1, Ordering::SeqCst);
            let addr = self.next.fetch_add(size, Ordering::SeqCst);
            self.backing
                .lock()
                .insert(addr, alloc::vec![0u8; size]);
            Some(DeviceAddr(addr))
        }
        fn free(&self, addr: DeviceAddr) -> bool {
            self.frees.fetch_add(1, Ordering::SeqCst);
            self.backing.lock().remove(&addr.0).is_some()
        }
        fn copy_h2d(&self, _q: AsyncHandle, _dst: DeviceAddr, _src: usize, _len: usize) {}
        fn copy_d2h(&self, _q: AsyncHandle, _dst: usize, _src: DeviceAddr, _len: usize) {}
    }

    #[test]
    fn malloc_then_free_creates_no_entries_scenario_1() {
        let ctx = DeviceContext::new(Arc::new(RecordingDriver::new()), false);
        let d = ctx.acc_malloc(4096).unwrap();
        assert!(ctx.index().lock().is_empty());
        ctx.acc_free(d);
        assert!(ctx.index().lock().is_empty());
    }

    #[test]
    fn zero_size_malloc_and_is_present_are_no_ops() {
        let ctx = DeviceContext::new(Arc::new(RecordingDriver::new()), false);
        assert!(ctx.acc_malloc(0).is_none());
        assert!(!ctx.acc_is_present(0x1000, 0));
    }

    #[test]
    fn is_present_false_when_range_straddles_two_entries() {
        let ctx = DeviceContext::new(Arc::new(RecordingDriver::new()), false);
        ctx.acc_create(0x1000, 0x80);
        ctx.acc_create(0x1080, 0x80);
        assert!(ctx.acc_is_present(0x1000, 0x80));
        assert!(!ctx.acc_is_present(0x1040, 0x80));
    }

    #[test]
    #[should_panic(expected = "refusing to free device memory")]
    fn free_of_mapped_device_address_is_fatal_scenario_4() {
        let ctx = DeviceContext::new(Arc::new(RecordingDriver::new()), false);
        ctx.acc_map_data(0x3000, 0xD200, 64);
        let d = ctx.acc_deviceptr(0x3000).unwrap();
        ctx.acc_free(d);
    }

    #[test]
    fn goacc_enter_exit_data_to_pointer_group_attaches_and_restores() {
        let ctx = DeviceContext::new(Arc::new(RecordingDriver::new()), false);
        // arr lives at 0x4000 (N=64 bytes); &arr is a pointer slot at 0x5000.
        ctx.goacc_enter_exit_data(
            GoaccFlags::empty(),
            &[0x4000, 0x5000],
            &[64, 8],
            &[MapKind::To, MapKind::Pointer],
            crate::queue::ACC_ASYNC_SYNC,
            &[],
        );
        assert_eq!(ctx.index().lock().len(), 2);

        ctx.goacc_enter_exit_data(
            GoaccFlags::empty(),
            &[0x4000, 0x5000],
            &[64, 8],
            &[MapKind::From, MapKind::Pointer],
            crate::queue::ACC_ASYNC_SYNC,
            &[],
        );
        assert!(ctx.index().lock().is_empty());
    }

    #[test]
    fn shared_memory_device_takes_zero_driver_calls_scenario_6() {
        let driver = Arc::new(RecordingDriver::new());
        let ctx = DeviceContext::new(driver.clone(), true);
        ctx.acc_copyin(0x1000, 64);
        assert_eq!(ctx.acc_deviceptr(0x1000), Some(DeviceAddr(0x1000)));
        assert!(ctx.acc_is_present(0x1000, 64));
        ctx.acc_copyout(0x1000, 64);
        assert_eq!(driver.allocs.load(Ordering::SeqCst), 0);
        assert_eq!(driver.frees.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn force_present_with_coverage_reuses_and_bumps_refcount() {
        let ctx = DeviceContext::new(Arc::new(RecordingDriver::new()), false);
        ctx.goacc_enter_exit_data(
            GoaccFlags::empty(),
            &[0x6000],
            &[64],
            &[MapKind::To],
            crate::queue::ACC_ASYNC_SYNC,
            &[],
        );
        ctx.goacc_enter_exit_data(
            GoaccFlags::empty(),
            &[0x6000],
            &[64],
            &[MapKind::ForcePresent],
            crate::queue::ACC_ASYNC_SYNC,
            &[],
        );
        let idx = ctx.index().lock();
        let e = idx.lookup_exact(0x6000).unwrap();
        assert_eq!(
            e.refcount,
            crate::refcount::RefCount::Counted {
                total: 2,
                virtual_refcount: 2
            }
        );
    }

    #[test]
    #[should_panic(expected = "not mapped")]
    fn force_present_without_coverage_is_fatal() {
        let ctx = DeviceContext::new(Arc::new(RecordingDriver::new()), false);
        ctx.goacc_enter_exit_data(
            GoaccFlags::empty(),
            &[0x7000],
            &[64],
            &[MapKind::ForcePresent],
            crate::queue::ACC_ASYNC_SYNC,
            &[],
        );
    }

    struct RecordingQueue {
        waited: Mutex<alloc::vec::Vec<AsyncHandle>>,
    }

    impl crate::queue::AsyncQueue for RecordingQueue {
        fn wait(&self, handle: AsyncHandle) {
            self.waited.lock().push(handle);
        }
    }

    #[test]
    fn goacc_enter_exit_data_waits_on_named_queues_before_dispatch() {
        let queue = Arc::new(RecordingQueue {
            waited: Mutex::new(alloc::vec::Vec::new()),
        });
        let ctx = DeviceContext::new(Arc::new(RecordingDriver::new()), false)
            .with_async_queue(queue.clone());
        ctx.goacc_enter_exit_data(
            GoaccFlags::empty(),
            &[0x8000],
            &[64],
            &[MapKind::To],
            crate::queue::ACC_ASYNC_SYNC,
            &[AsyncHandle::Queue(3), AsyncHandle::Queue(7)],
        );
        assert_eq!(
            *queue.waited.lock(),
            alloc::vec![AsyncHandle::Queue(3), AsyncHandle::Queue(7)]
        );
    }

    struct RecordingProfiler {
        events: Mutex<alloc::vec::Vec<&'static str>>,
    }

    impl crate::profiling::ProfilingHook for RecordingProfiler {
        fn on_event(&self, event: crate::profiling::ProfileEvent) {
            use crate::profiling::ProfileEvent::*;
            let tag = match event {
                EnterDataStart => "enter_start",
                EnterDataEnd => "enter_end",
                ExitDataStart => "exit_start",
                ExitDataEnd => "exit_end",
                CreateStart { .. } => "create_start",
                CreateEnd { .. } => "create_end",
                DeleteStart { .. } => "delete_start",
                DeleteEnd { .. } => "delete_end",
            };
            self.events.lock().push(tag);
        }
    }

    #[test]
    fn acc_create_dispatches_profiling_events_in_order() {
        let profiler = Arc::new(RecordingProfiler {
            events: Mutex::new(alloc::vec::Vec::new()),
        });
        let ctx = DeviceContext::new(Arc::new(RecordingDriver::new()), false)
            .with_profiler(profiler.clone());
        ctx.acc_create(0x9000, 64);
        assert_eq!(*profiler.events.lock(), alloc::vec!["create_start", "create_end"]);
    }
}
