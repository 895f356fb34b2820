//! Host-device memory correspondence core for an OpenACC-style offload
//! runtime.
//!
//! This crate tracks which ranges of host memory have a corresponding
//! allocation on an accelerator device, and drives the reference-counted
//! create/delete, copy, and pointer-attach protocols that an OpenACC
//! front end relies on. Device discovery, kernel/queue scheduling, and
//! `#pragma acc` lowering are out of scope: this crate only maintains the
//! correspondence table and calls out to a [`driver::Driver`] for the
//! actual memory operations.

#![no_std]

extern crate alloc;

// Host target: use the system allocator so unit tests can allocate normally.
// Downstream bare-metal consumers supply their own #[global_allocator].
#[cfg(test)]
extern crate std;
#[cfg(test)]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

pub mod attach;
pub mod device;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod flags;
pub mod interval;
pub mod kinds;
pub mod map_engine;
pub mod mapping;
pub mod pin;
pub mod profiling;
pub mod queue;
pub mod record;
pub mod refcount;
pub mod sync;

mod api;

pub use device::{DeviceAddr, DeviceContext};
pub use driver::Driver;
pub use error::{OaccError, OaccResult};
pub use kinds::MapKind;
pub use profiling::{NullProfiler, ProfileEvent, ProfilingHook};
pub use queue::AsyncQueue;
