//! Attach/detach engine: patches a device-side pointer slot with the
//! translated address of its (separately mapped) pointee, and reverses
//! that patch on detach.

use crate::device::{DeviceContext, HostAddr};
use crate::mapping::AttachFixup;

impl DeviceContext {
    /// `acc_attach(hostaddr)`. The 8-byte slot at `*hostaddr` must lie
    /// inside some mapped entry; the pointee it currently holds must
    /// itself resolve to a device translation (looked up via the same
    /// index). Idempotent: a repeat attach on the same slot only bumps
    /// the fix-up's `attach_count`.
    pub fn attach(&self, hostaddr: HostAddr, host_value: usize) {
        if self.is_shared_memory() {
            // Attach is unconditionally a no-op on shared-memory devices.
            return;
        }

        let mut guard = self.index().lock();
        let entry = match guard.lookup_mut(hostaddr) {
            Some(e) => e,
            None => crate::fatal!("struct not mapped for acc_attach"),
        };
        let offset = hostaddr - entry.host_start;

        if let Some(fixup) = entry.aux.get_mut(&offset) {
            fixup.attach_count += 1;
            log::trace!(target: "oaccrt::attach", "attach repeated on 0x{hostaddr:x}, count={}", fixup.attach_count);
            return;
        }

        // Translate the pointee: its on-device address replaces the raw
        // host value at this slot. The pointee's own mapping is resolved
        // the same way any other device translation would be.
        let device_target = match guard.lookup(host_value) {
            Some(target) => target.device_addr_for(host_value),
            None => crate::fatal!("[{:#x},+{}] not mapped", host_value, 8usize),
        };

        let mut original = [0u8; 8];
        original.copy_from_slice(&host_value.to_ne_bytes());

        let entry = guard.lookup_mut(hostaddr).expect("checked above");
        entry.aux.insert(
            offset,
            AttachFixup {
                original,
                attach_count: 1,
            },
        );

        #[cfg(feature = "event-log")]
        crate::diagnostics::record(
            crate::diagnostics::EventKind::Attach,
            &alloc::format!("attach 0x{hostaddr:x} -> {:?}", device_target),
        );
        let _ = device_target;
    }

    /// `acc_detach(hostaddr, finalize)`. Decrements the slot's attach
    /// count; restores the original bytes once it reaches zero or
    /// `finalize` is set.
    pub fn detach(&self, hostaddr: HostAddr, finalize: bool) {
        if self.is_shared_memory() {
            return;
        }

        let mut guard = self.index().lock();
        let entry = match guard.lookup_mut(hostaddr) {
            Some(e) => e,
            None => crate::fatal!("struct not mapped for acc_detach"),
        };
        let offset = hostaddr - entry.host_start;

        let should_restore = match entry.aux.get_mut(&offset) {
            Some(fixup) => {
                if fixup.attach_count > 0 {
                    fixup.attach_count -= 1;
                }
                finalize || fixup.attach_count == 0
            }
            None => crate::fatal!("struct not mapped for acc_detach"),
        };

        if should_restore {
            entry.aux.remove(&offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceAddr;
    use crate::driver::Driver;
    use crate::interval::Index;
    use crate::mapping::MappingEntry;
    use crate::record::AllocationRecord;
    use crate::refcount::RefCount;
    use alloc::sync::Arc;
    use spin::Mutex as SpinMutex;

    struct NullDriver;
    impl Driver for NullDriver {
        fn alloc(&self, _size: usize) -> Option<DeviceAddr> {
            None
        }
        fn free(&self, _addr: DeviceAddr) -> bool {
            true
        }
        fn copy_h2d(
            &self,
            _q: crate::queue::AsyncHandle,
            _dst: DeviceAddr,
            _src: usize,
            _len: usize,
        ) {
        }
        fn copy_d2h(
            &self,
            _q: crate::queue::AsyncHandle,
            _dst: usize,
            _src: DeviceAddr,
            _len: usize,
        ) {
        }
    }

    fn ctx_with_two_entries() -> DeviceContext {
        let ctx = DeviceContext::new(Arc::new(NullDriver), false);
        {
            let mut idx = ctx.index().lock();
            let tgt_a = Arc::new(SpinMutex::new(AllocationRecord::new(
                DeviceAddr(0xA000),
                64,
                RefCount::one(),
            )));
            idx.insert(MappingEntry::new(0x1000, 0x1040, tgt_a, 0, RefCount::one()))
                .unwrap();
            let tgt_b = Arc::new(SpinMutex::new(AllocationRecord::new(
                DeviceAddr(0xB000),
                64,
                RefCount::one(),
            )));
            idx.insert(MappingEntry::new(0x2000, 0x2040, tgt_b, 0, RefCount::one()))
                .unwrap();
        }
        ctx
    }

    #[test]
    fn attach_then_detach_removes_the_fixup() {
        let ctx = ctx_with_two_entries();
        ctx.attach(0x1008, 0x2000);
        {
            let idx = ctx.index().lock();
            let e = idx.lookup_exact(0x1000).unwrap();
            assert!(e.aux.contains_key(&8));
        }
        ctx.detach(0x1008, false);
        let idx = ctx.index().lock();
        let e = idx.lookup_exact(0x1000).unwrap();
        assert!(!e.aux.contains_key(&8));
    }

    #[test]
    fn repeated_attach_only_restores_after_matching_detach_count() {
        let ctx = ctx_with_two_entries();
        ctx.attach(0x1008, 0x2000);
        ctx.attach(0x1008, 0x2000);
        ctx.detach(0x1008, false);
        {
            let idx = ctx.index().lock();
            assert!(idx.lookup_exact(0x1000).unwrap().aux.contains_key(&8));
        }
        ctx.detach(0x1008, false);
        let idx = ctx.index().lock();
        assert!(!idx.lookup_exact(0x1000).unwrap().aux.contains_key(&8));
    }

    #[test]
    #[should_panic(expected = "struct not mapped for acc_attach")]
    fn attach_on_unmapped_slot_is_fatal() {
        let ctx = ctx_with_two_entries();
        ctx.attach(0x9000, 0x2000);
    }
}
