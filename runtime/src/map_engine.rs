//! The map engine: `map_vars`/`map_vars_async` and `remove_var`/
//! `remove_var_async`.

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::device::{DeviceContext, HostAddr};
use crate::error::{OaccError, OaccResult};
use crate::kinds::MapKind;
use crate::mapping::MappingEntry;
use crate::queue::AsyncHandle;
use crate::record::AllocationRecord;
use crate::refcount::{PinKind, RefCount};

/// Selects which caller installed a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// From `acc_map_data`: forbids pre-existing overlap, pins
    /// `refcount = INFINITY`.
    EnterData,
    /// From `acc_copyin`/`acc_create`/bulk `enter data`: reuses existing
    /// coverage, bumps `refcount` and `virtual_refcount`.
    OpenaccEnterData,
}

/// One `(host_addr, size, kind)` triple from a compiler-emitted batch.
pub struct MapTriple {
    pub host_addr: HostAddr,
    pub size: usize,
    pub kind: MapKind,
}

enum Slot {
    Reused,
    New { offset: usize },
}

/// Install (or locate and refcount) a batch of host ranges as a single
/// allocation, performing any initial host-to-device copies the kinds
/// imply.
///
/// Entries already present in the index are reused: their refcount is
/// bumped in place and they contribute no bytes to the new allocation.
/// The remaining (uncovered) entries are packed contiguously into one
/// fresh device allocation. Returns the allocation record backing the
/// newly created entries, or `None` if every triple in the batch was
/// already covered. A `ForcePresent` triple with no existing coverage is
/// fatal rather than falling through to allocation: it asserts coverage,
/// it never creates it.
pub fn map_vars_async(
    ctx: &DeviceContext,
    queue: AsyncHandle,
    batch: &[MapTriple],
    purpose: Purpose,
) -> OaccResult<Option<Arc<Mutex<AllocationRecord>>>> {
    let mut slots = Vec::with_capacity(batch.len());
    let mut new_total = 0usize;

    {
        let mut idx = ctx.index().lock();
        for t in batch {
            if matches!(t.kind, MapKind::Pointer | MapKind::ToPset | MapKind::AlwaysPointer) {
                // Pointer-set companions are bookkeeping only; the public
                // surface wires their attach fix-ups after the group
                // installs.
                slots.push(Slot::New { offset: new_total });
                new_total += t.kind.fixed_size().unwrap_or(t.size);
                continue;
            }
            match idx.lookup_exact(t.host_addr) {
                Some(existing) if existing.host_end == t.host_addr + t.size => {
                    if purpose == Purpose::EnterData {
                        crate::fatal!(
                            "host address [{:#x}, +{}] is already mapped",
                            t.host_addr,
                            t.size
                        );
                    }
                    slots.push(Slot::Reused);
                }
                Some(_) => {
                    return Err(OaccError::OverlappingRange {
                        host_start: t.host_addr,
                        host_end: t.host_addr + t.size,
                    });
                }
                None if !t.kind.allocates() => {
                    crate::fatal!("[{:#x},+{}] not mapped", t.host_addr, t.size);
                }
                None => {
                    slots.push(Slot::New { offset: new_total });
                    new_total += t.size;
                }
            }
        }

        for (t, slot) in batch.iter().zip(slots.iter()) {
            if let Slot::Reused = slot {
                if let Some(e) = idx.lookup_exact_mut(t.host_addr) {
                    e.refcount.dynamic_enter();
                }
            }
        }
    }

    if new_total == 0 {
        return Ok(None);
    }

    // Allocate device storage for the uncovered portion with the index
    // lock dropped (split-lock protocol).
    let tgt_start = ctx
        .driver()
        .alloc(new_total)
        .ok_or(OaccError::DeviceAllocFailed { requested: new_total })?;

    let record_refcount = match purpose {
        Purpose::EnterData => RefCount::pinned(PinKind::AccMapData),
        Purpose::OpenaccEnterData => RefCount::Counted {
            total: 0,
            virtual_refcount: 0,
        },
    };
    let record = Arc::new(Mutex::new(AllocationRecord::new(
        tgt_start,
        new_total,
        record_refcount,
    )));

    {
        let mut idx = ctx.index().lock();
        for (t, slot) in batch.iter().zip(slots.iter()) {
            let offset = match slot {
                Slot::Reused => continue,
                Slot::New { offset } => *offset,
            };
            let size = t.kind.fixed_size().unwrap_or(t.size);
            let entry_refcount = match purpose {
                Purpose::EnterData => RefCount::pinned(PinKind::AccMapData),
                Purpose::OpenaccEnterData => RefCount::one_virtual(),
            };
            let entry = MappingEntry::new(
                t.host_addr,
                t.host_addr + size,
                Arc::clone(&record),
                offset,
                entry_refcount,
            );
            idx.insert(entry).map_err(|_| OaccError::OverlappingRange {
                host_start: t.host_addr,
                host_end: t.host_addr + size,
            })?;
            {
                let mut rec = record.lock();
                rec.register_entry(t.host_addr);
                if let RefCount::Counted { total, .. } = &mut rec.refcount {
                    *total += 1;
                }
            }

            if t.kind.copies_on_enter() {
                ctx.driver()
                    .copy_h2d(queue, tgt_start.offset(offset), t.host_addr, size);
            }
        }
    }

    #[cfg(feature = "event-log")]
    crate::diagnostics::record(
        crate::diagnostics::EventKind::MapEnter,
        &alloc::format!("map_vars installed {} new bytes", new_total),
    );

    Ok(Some(record))
}

pub fn map_vars(
    ctx: &DeviceContext,
    batch: &[MapTriple],
    purpose: Purpose,
) -> OaccResult<Option<Arc<Mutex<AllocationRecord>>>> {
    map_vars_async(ctx, AsyncHandle::Sync, batch, purpose)
}

/// Remove (reference-count-decrement, and possibly tear down) the entry
/// at host address `h`.
///
/// `strong_teardown` asserts the owning allocation was fully unmapped if
/// this removal happened to be its last entry. The async path passes
/// `false` because sibling entries of the same allocation may still have
/// outstanding copies in flight (async teardown ambiguity);
/// the sync path passes `true` and panics if the assertion is violated,
/// which would indicate a bug in this engine rather than caller misuse.
pub fn remove_var(
    ctx: &DeviceContext,
    queue: AsyncHandle,
    h: HostAddr,
    size: usize,
    kind: MapKind,
    strong_teardown: bool,
) {
    let finalize = kind.is_finalize();

    struct Teardown {
        copy_back: bool,
        device_addr: crate::device::DeviceAddr,
        entry_size: usize,
        record: Arc<Mutex<AllocationRecord>>,
        record_emptied: bool,
    }

    let teardown: Option<Teardown> = {
        let mut idx = ctx.index().lock();
        let entry = match idx.lookup_mut(h) {
            Some(e) => e,
            // Release of an already-unmapped range is not an error.
            None => return,
        };
        if !entry.covers(h, size) {
            crate::fatal!("[{:#x},+{}] outside mapped block", h, size);
        }

        if !entry.refcount.dynamic_exit(finalize) {
            return;
        }

        let copy_back = kind.copies_on_release() || kind.unconditional_copy_on_exit();
        let device_addr = entry.device_base();
        let entry_size = entry.size();
        let record = Arc::clone(&entry.tgt);

        idx.remove(h);
        let mut rec = record.lock();
        rec.unregister_entry(h);
        let record_emptied = rec.release();
        drop(rec);

        Some(Teardown {
            copy_back,
            device_addr,
            entry_size,
            record,
            record_emptied,
        })
    };

    let Some(t) = teardown else { return };

    // Driver calls happen with the index lock dropped.
    if t.copy_back {
        ctx.driver()
            .copy_d2h(queue, h, t.device_addr, t.entry_size);
    }

    if t.record_emptied {
        ctx.driver().free(t.record.lock().tgt_start);
    } else if strong_teardown {
        panic!("remove_var: synchronous removal left sibling entries mapped");
    }

    #[cfg(feature = "event-log")]
    crate::diagnostics::record(
        crate::diagnostics::EventKind::MapExit,
        &alloc::format!("remove_var unmapped 0x{h:x}"),
    );
}

pub fn remove_var_async(
    ctx: &DeviceContext,
    queue: AsyncHandle,
    h: HostAddr,
    size: usize,
    kind: MapKind,
) {
    remove_var(ctx, queue, h, size, kind, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceAddr;
    use crate::driver::Driver;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDriver {
        next: AtomicUsize,
        frees: AtomicUsize,
        h2d: AtomicUsize,
        d2h: AtomicUsize,
    }

    impl CountingDriver {
        fn new() -> Self {
            Self {
                next: AtomicUsize::new(0x1_0000),
                frees: AtomicUsize::new(0),
                h2d: AtomicUsize::new(0),
                d2h: AtomicUsize::new(0),
            }
        }
    }

    impl Driver for CountingDriver {
        fn alloc(&self, size: usize) -> Option<DeviceAddr> {
            Some(DeviceAddr(self.next.fetch_add(size, Ordering::SeqCst)))
        }
        fn free(&self, _addr: DeviceAddr) -> bool {
            self.frees.fetch_add(1, Ordering::SeqCst);
            true
        }
        fn copy_h2d(&self, _q: AsyncHandle, _dst: DeviceAddr, _src: usize, _len: usize) {
            self.h2d.fetch_add(1, Ordering::SeqCst);
        }
        fn copy_d2h(&self, _q: AsyncHandle, _dst: usize, _src: DeviceAddr, _len: usize) {
            self.d2h.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn copyin_twice_then_copyout_twice_matches_scenario_2() {
        let ctx = DeviceContext::new(Arc::new(CountingDriver::new()), false);
        let batch = [MapTriple {
            host_addr: 0x1000,
            size: 64,
            kind: MapKind::To,
        }];

        map_vars(&ctx, &batch, Purpose::OpenaccEnterData).unwrap();
        {
            let idx = ctx.index().lock();
            let e = idx.lookup_exact(0x1000).unwrap();
            assert_eq!(
                e.refcount,
                RefCount::Counted {
                    total: 1,
                    virtual_refcount: 1
                }
            );
        }

        map_vars(&ctx, &batch, Purpose::OpenaccEnterData).unwrap();
        {
            let idx = ctx.index().lock();
            let e = idx.lookup_exact(0x1000).unwrap();
            assert_eq!(
                e.refcount,
                RefCount::Counted {
                    total: 2,
                    virtual_refcount: 2
                }
            );
        }

        remove_var(&ctx, AsyncHandle::Sync, 0x1000, 64, MapKind::From, true);
        {
            let idx = ctx.index().lock();
            let e = idx.lookup_exact(0x1000).unwrap();
            assert_eq!(
                e.refcount,
                RefCount::Counted {
                    total: 1,
                    virtual_refcount: 1
                }
            );
        }

        remove_var(&ctx, AsyncHandle::Sync, 0x1000, 64, MapKind::From, true);
        let idx = ctx.index().lock();
        assert!(idx.lookup_exact(0x1000).is_none());
    }

    #[test]
    fn uncovered_after_fully_reused_batch_allocates_nothing() {
        let ctx = DeviceContext::new(Arc::new(CountingDriver::new()), false);
        let batch = [MapTriple {
            host_addr: 0x2000,
            size: 32,
            kind: MapKind::Alloc,
        }];
        map_vars(&ctx, &batch, Purpose::OpenaccEnterData).unwrap();
        let result = map_vars(&ctx, &batch, Purpose::OpenaccEnterData).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn force_present_reuses_existing_coverage_without_allocating() {
        let ctx = DeviceContext::new(Arc::new(CountingDriver::new()), false);
        let to_batch = [MapTriple {
            host_addr: 0x5000,
            size: 32,
            kind: MapKind::To,
        }];
        map_vars(&ctx, &to_batch, Purpose::OpenaccEnterData).unwrap();

        let present_batch = [MapTriple {
            host_addr: 0x5000,
            size: 32,
            kind: MapKind::ForcePresent,
        }];
        let result = map_vars(&ctx, &present_batch, Purpose::OpenaccEnterData).unwrap();
        assert!(result.is_none());
        let idx = ctx.index().lock();
        assert_eq!(
            idx.lookup_exact(0x5000).unwrap().refcount,
            RefCount::Counted {
                total: 2,
                virtual_refcount: 2
            }
        );
    }

    #[test]
    #[should_panic(expected = "not mapped")]
    fn force_present_without_coverage_is_fatal() {
        let ctx = DeviceContext::new(Arc::new(CountingDriver::new()), false);
        let batch = [MapTriple {
            host_addr: 0x6000,
            size: 32,
            kind: MapKind::ForcePresent,
        }];
        let _ = map_vars(&ctx, &batch, Purpose::OpenaccEnterData);
    }
}
