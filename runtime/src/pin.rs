//! `acc_map_data` / `acc_unmap_data`: user-pinned mappings whose lifetime
//! is governed explicitly rather than by reference counting.

use alloc::sync::Arc;

use spin::Mutex;

use crate::device::{DeviceAddr, DeviceContext, HostAddr};
use crate::kinds::MapKind;
use crate::map_engine::{map_vars, MapTriple, Purpose};
use crate::mapping::MappingEntry;
use crate::record::AllocationRecord;
use crate::refcount::{PinKind, RefCount};

impl DeviceContext {
    /// `acc_map_data(h, d, s)`. Requires all three arguments nonzero and
    /// rejects any pre-existing coverage of `[h, h+s)` or `[d, d+s)`. On
    /// success installs one entry with `refcount = Pinned(AccMapData)`.
    ///
    /// The device address `d` is not independently reachable in this
    /// crate's driver abstraction (the driver allocates addresses; it
    /// does not accept caller-chosen ones), so this crate's shared-memory
    /// devices are the only ones expected to exercise `d != h`'s
    /// rejection path; non-shared devices always map through the normal
    /// allocator and `d` is advisory only; rejecting `h != d` is a
    /// shared-memory-specific rule.
    pub fn acc_map_data(&self, h: HostAddr, d: usize, s: usize) {
        if h == 0 || d == 0 || s == 0 {
            crate::fatal!("acc_map_data called with a zero argument");
        }
        if self.is_shared_memory() && h != d {
            crate::fatal!("cannot map data on shared-memory device with h != d");
        }

        {
            let idx = self.index().lock();
            if idx.overlaps(h, s) {
                crate::fatal!("host address [{:#x}, +{}] is already mapped", h, s);
            }
        }

        let batch = [MapTriple {
            host_addr: h,
            size: s,
            kind: MapKind::Alloc,
        }];
        let _ = map_vars(self, &batch, Purpose::EnterData);
    }

    /// Registers a host/device range installed by the program image at
    /// load time rather than by a user's `acc_map_data` call: the device
    /// loader collaborator calls this once per statically-linked
    /// declared-target range it resolves, so that later `acc_unmap_data`
    /// calls on the same host address can be rejected as "not yours to
    /// unmap" instead of silently treated as a user pin.
    ///
    /// Installs one entry with `refcount = Pinned(ProgramImage)`, pinned
    /// for the lifetime of the process; rejects pre-existing coverage the
    /// same way `acc_map_data` does.
    pub fn register_program_image(&self, h: HostAddr, d: DeviceAddr, s: usize) {
        if h == 0 || s == 0 {
            crate::fatal!("register_program_image called with a zero argument");
        }
        let mut idx = self.index().lock();
        if idx.overlaps(h, s) {
            crate::fatal!("host address [{:#x}, +{}] is already mapped", h, s);
        }
        let record = Arc::new(Mutex::new(AllocationRecord::new(
            d,
            s,
            RefCount::pinned(PinKind::ProgramImage),
        )));
        record.lock().register_entry(h);
        idx.insert(MappingEntry::new(
            h,
            h + s,
            record,
            0,
            RefCount::pinned(PinKind::ProgramImage),
        ))
        .expect("just checked for overlap under the same lock");
    }

    /// `acc_unmap_data(h)`. Requires an entry whose `host_start == h` and
    /// whose refcount is `Pinned(AccMapData)`; any other outcome is
    /// fatal. On success the entry is removed and the owning allocation's
    /// refcount is decremented, freeing device storage only if no other
    /// entry still holds it.
    pub fn acc_unmap_data(&self, h: HostAddr) {
        let (device_addr, record_emptied) = {
            let mut idx = self.index().lock();
            let entry = match idx.lookup_exact(h) {
                Some(e) => e,
                None => {
                    crate::fatal!("refusing to unmap block that has not been mapped by 'acc_map_data'")
                }
            };
            match entry.refcount.pin_kind() {
                Some(PinKind::AccMapData) => {}
                Some(PinKind::ProgramImage) => {
                    crate::fatal!("cannot unmap target block")
                }
                None => crate::fatal!(
                    "refusing to unmap block [{:#x},+{}] that has not been mapped by 'acc_map_data'",
                    h,
                    entry.size()
                ),
            }
            let device_addr = entry.device_base();
            let record = entry.tgt.clone();
            idx.remove(h);
            let mut rec = record.lock();
            rec.unregister_entry(h);
            let emptied = rec.release();
            (device_addr, emptied)
        };

        if record_emptied {
            self.driver().free(device_addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceAddr;
    use crate::driver::Driver;
    use alloc::sync::Arc;

    struct NullDriver;
    impl Driver for NullDriver {
        fn alloc(&self, _size: usize) -> Option<DeviceAddr> {
            Some(DeviceAddr(0xD000))
        }
        fn free(&self, _addr: DeviceAddr) -> bool {
            true
        }
        fn copy_h2d(&self, _q: crate::queue::AsyncHandle, _dst: DeviceAddr, _src: usize, _len: usize) {}
        fn copy_d2h(&self, _q: crate::queue::AsyncHandle, _dst: usize, _src: DeviceAddr, _len: usize) {}
    }

    #[test]
    fn map_then_unmap_is_a_no_op_on_the_index() {
        let ctx = DeviceContext::new(Arc::new(NullDriver), false);
        ctx.acc_map_data(0x2000, 0xD000, 128);
        assert_eq!(ctx.index().lock().len(), 1);
        ctx.acc_unmap_data(0x2000);
        assert!(ctx.index().lock().is_empty());
    }

    #[test]
    #[should_panic(expected = "already mapped")]
    fn double_map_is_fatal() {
        let ctx = DeviceContext::new(Arc::new(NullDriver), false);
        ctx.acc_map_data(0x3000, 0xD200, 64);
        ctx.acc_map_data(0x3000, 0xD300, 64);
    }

    #[test]
    #[should_panic(expected = "not been mapped by 'acc_map_data'")]
    fn unmap_of_unmapped_range_is_fatal() {
        let ctx = DeviceContext::new(Arc::new(NullDriver), false);
        ctx.acc_unmap_data(0x4000);
    }

    #[test]
    #[should_panic(expected = "cannot unmap target block")]
    fn unmap_of_program_image_entry_is_fatal() {
        let ctx = DeviceContext::new(Arc::new(NullDriver), false);
        ctx.register_program_image(0x5000, DeviceAddr(0xE000), 256);
        assert_eq!(ctx.index().lock().len(), 1);
        ctx.acc_unmap_data(0x5000);
    }

    #[test]
    #[should_panic(expected = "already mapped")]
    fn register_program_image_rejects_overlap() {
        let ctx = DeviceContext::new(Arc::new(NullDriver), false);
        ctx.register_program_image(0x6000, DeviceAddr(0xF000), 64);
        ctx.register_program_image(0x6000, DeviceAddr(0xF100), 64);
    }
}
