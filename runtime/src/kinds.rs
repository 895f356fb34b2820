//! The mapping-kind vocabulary and the grouping rule that batches
//! `TO_PSET`/`POINTER`/`ALWAYS_POINTER` runs into atomic units.
//!
//! Wire-protocol kinds carry a high byte of caller-supplied auxiliary
//! data alongside the low byte that selects the variant below; that
//! auxiliary data is masked off before it reaches this crate, so it is
//! not represented here.

/// One entry's mapping kind, as supplied by the compiler-emitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    /// Allocate device storage; no initial copy.
    Alloc,
    /// Like `Alloc`, but present-check is skipped (compiler asserts it
    /// is safe to always (re)allocate).
    ForceAlloc,
    /// Allocate and copy host to device on enter.
    To,
    /// Like `To`, unconditionally.
    ForceTo,
    /// Allocate, no initial copy; copy device to host when the last
    /// reference drops.
    From,
    /// Unconditional device-to-host copy at every exit, not just the last.
    ForceFrom,
    /// Decrement refcount on exit; free at zero. No allocation on enter.
    Release,
    /// Force teardown regardless of refcount residue (finalize kind).
    Delete,
    /// Sibling of the preceding entry (part of a `TO_PSET` group or
    /// standing alone); refcount-only bookkeeping.
    Pointer,
    /// Header of a pointer-set group: one or more `Pointer` entries
    /// follow and belong to it.
    ToPset,
    /// Attach fix-up companion that may trail any entry.
    AlwaysPointer,
    /// Requires existing coverage; never allocates.
    ForcePresent,
}

impl MapKind {
    /// `ALWAYS_FROM` is an alias of `ForceFrom` in the upstream
    /// vocabulary; kept as a constructor rather than a separate variant
    /// so match arms don't need to pair them up.
    pub const ALWAYS_FROM: MapKind = MapKind::ForceFrom;

    /// Whether this kind allocates device storage on enter when no
    /// coverage already exists.
    pub fn allocates(self) -> bool {
        matches!(
            self,
            MapKind::Alloc
                | MapKind::ForceAlloc
                | MapKind::To
                | MapKind::ForceTo
                | MapKind::From
                | MapKind::ForceFrom
        )
    }

    /// Whether this kind issues an initial host-to-device copy on enter.
    pub fn copies_on_enter(self) -> bool {
        matches!(self, MapKind::To | MapKind::ForceTo)
    }

    /// Whether this kind requires an unconditional device-to-host copy at
    /// every exit (not just when the refcount reaches zero).
    pub fn unconditional_copy_on_exit(self) -> bool {
        matches!(self, MapKind::ForceFrom)
    }

    /// Whether a copy-out is owed when the refcount reaches zero.
    pub fn copies_on_release(self) -> bool {
        matches!(self, MapKind::From | MapKind::ForceFrom)
    }

    /// Whether this kind forces teardown regardless of refcount residue
    /// (the "finalize" exit path).
    pub fn is_finalize(self) -> bool {
        matches!(self, MapKind::Delete | MapKind::ForceFrom)
    }

    /// Whether this kind decides the batch is an "enter" operation in
    /// `GOACC_enter_exit_data`'s classification.
    pub fn is_enter_decisive(self) -> bool {
        matches!(
            self,
            MapKind::Alloc
                | MapKind::ForceAlloc
                | MapKind::To
                | MapKind::ForceTo
                | MapKind::ForcePresent
        )
    }

    /// Whether this kind decides the batch is an "exit" operation.
    pub fn is_exit_decisive(self) -> bool {
        matches!(
            self,
            MapKind::From | MapKind::ForceFrom | MapKind::Release | MapKind::Delete
        )
    }

    /// `POINTER` entries carry a fixed size of one pointer width
    /// regardless of the caller-supplied size.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            MapKind::Pointer => Some(core::mem::size_of::<usize>()),
            _ => None,
        }
    }
}

/// Find the index of the last entry in the group that starts at
/// `kinds[start]`: a `ToPset` header is followed by one or more `Pointer`
/// entries belonging to it; any entry (including a lone one) may be
/// followed by a single `AlwaysPointer`.
///
/// Returns `start` itself when the entry at `start` opens no group (a
/// standalone entry with no trailing `Pointer`/`AlwaysPointer` run).
pub fn find_group_last(kinds: &[MapKind], start: usize) -> usize {
    let mut last = start;
    if kinds[start] == MapKind::ToPset {
        let mut i = start + 1;
        while i < kinds.len() && kinds[i] == MapKind::Pointer {
            last = i;
            i += 1;
        }
    }
    if last + 1 < kinds.len() && kinds[last + 1] == MapKind::AlwaysPointer {
        last += 1;
    }
    last
}
