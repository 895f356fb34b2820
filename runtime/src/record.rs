//! Allocation record: one contiguous device-side region shared by one or
//! more mapping entries.

use alloc::vec::Vec;

use crate::device::{DeviceAddr, HostAddr};
use crate::refcount::RefCount;

/// A single device memory allocation and the host keys of the mapping
/// entries that currently refer into it.
///
/// `refcount` counts entries that still point at this record. When it
/// reaches zero the device region is freed and the record itself dropped.
/// `host_keys` lets the async exit path walk the owning allocation's
/// entries without a second index scan.
pub struct AllocationRecord {
    pub tgt_start: DeviceAddr,
    pub tgt_end: DeviceAddr,
    pub refcount: RefCount,
    host_keys: Vec<HostAddr>,
}

impl AllocationRecord {
    pub fn new(tgt_start: DeviceAddr, size: usize, refcount: RefCount) -> Self {
        Self {
            tgt_start,
            tgt_end: tgt_start.offset(size),
            refcount,
            host_keys: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.tgt_end.0 - self.tgt_start.0
    }

    pub fn contains_device(&self, addr: DeviceAddr, len: usize) -> bool {
        addr.0 >= self.tgt_start.0 && addr.0 + len <= self.tgt_end.0
    }

    pub fn register_entry(&mut self, host_start: HostAddr) {
        self.host_keys.push(host_start);
    }

    pub fn unregister_entry(&mut self, host_start: HostAddr) {
        if let Some(pos) = self.host_keys.iter().position(|&k| k == host_start) {
            self.host_keys.swap_remove(pos);
        }
    }

    pub fn entry_host_keys(&self) -> &[HostAddr] {
        &self.host_keys
    }

    /// Decrement the record's structural refcount. Returns `true` once it
    /// reaches zero, meaning the caller should free the device region.
    pub fn release(&mut self) -> bool {
        self.refcount.release_one()
    }
}
