//! The interval index: an ordered structure keyed by half-open host
//! intervals `[host_start, host_end)`. No invariant requires
//! self-balancing toward a particular shape, so a `BTreeMap` satisfies the
//! logarithmic-lookup, correct-containment contract without a bespoke
//! tree structure.

use alloc::collections::BTreeMap;

use crate::device::{DeviceAddr, HostAddr};
use crate::mapping::MappingEntry;

/// The per-device correspondence table.
#[derive(Default)]
pub struct Index {
    entries: BTreeMap<HostAddr, MappingEntry>,
}

impl Index {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Find the entry whose `[host_start, host_end)` contains `h`, if any.
    pub fn lookup(&self, h: HostAddr) -> Option<&MappingEntry> {
        self.entries
            .range(..=h)
            .next_back()
            .map(|(_, e)| e)
            .filter(|e| e.contains(h))
    }

    pub fn lookup_mut(&mut self, h: HostAddr) -> Option<&mut MappingEntry> {
        let key = self
            .entries
            .range(..=h)
            .next_back()
            .map(|(&k, _)| k)
            .filter(|&k| self.entries[&k].contains(h))?;
        self.entries.get_mut(&key)
    }

    /// Find the entry whose `host_start` is exactly `h` (used by
    /// `acc_unmap_data` and post-`map_vars` lookups).
    pub fn lookup_exact(&self, h: HostAddr) -> Option<&MappingEntry> {
        self.entries.get(&h)
    }

    pub fn lookup_exact_mut(&mut self, h: HostAddr) -> Option<&mut MappingEntry> {
        self.entries.get_mut(&h)
    }

    /// Deliberately O(n): walks entries to find one whose allocation
    /// covers `[d, d+size)`. Used only by `acc_free`/`acc_hostptr` on cold
    /// paths.
    pub fn lookup_by_device(&self, d: DeviceAddr, size: usize) -> Option<&MappingEntry> {
        self.entries
            .values()
            .find(|e| e.tgt.lock().contains_device(d, size))
    }

    /// True if `[h, h+size)` intersects any existing entry.
    pub fn overlaps(&self, h: HostAddr, size: usize) -> bool {
        let end = h + size;
        self.entries
            .range(..end)
            .next_back()
            .map(|(_, e)| e.host_start < end && h < e.host_end)
            .unwrap_or(false)
            || self
                .entries
                .range(h..end)
                .next()
                .map(|(_, e)| e.host_start < end && h < e.host_end)
                .unwrap_or(false)
    }

    /// Insert a new entry. Returns `Err(())` (translated by callers into a
    /// fatal diagnostic) if it overlaps an existing one.
    pub fn insert(&mut self, entry: MappingEntry) -> Result<(), ()> {
        if self.overlaps(entry.host_start, entry.size()) {
            return Err(());
        }
        self.entries.insert(entry.host_start, entry);
        Ok(())
    }

    pub fn remove(&mut self, host_start: HostAddr) -> Option<MappingEntry> {
        self.entries.remove(&host_start)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = &MappingEntry> {
        self.entries.values()
    }
}
