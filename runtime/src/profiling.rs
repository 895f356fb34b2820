//! OpenACC profiling event dispatch.
//!
//! Structural only: profiling behavior is delegated to collaborators.
//! This crate defines the event shape, dispatches it from the public
//! surface at the right points, and never interprets the events itself;
//! [`DeviceContext`](crate::device::DeviceContext) holds a
//! [`ProfilingHook`] (defaulting to [`NullProfiler`]) and calls it after
//! its index lock has been released.

use crate::device::{DeviceAddr, HostAddr};

/// One profiling-relevant event raised by the public surface.
#[derive(Debug, Clone, Copy)]
pub enum ProfileEvent {
    EnterDataStart,
    EnterDataEnd,
    ExitDataStart,
    ExitDataEnd,
    CreateStart { host: HostAddr, size: usize },
    CreateEnd { host: HostAddr, device: DeviceAddr },
    DeleteStart { host: HostAddr },
    DeleteEnd { host: HostAddr },
}

/// A collaborator that observes [`ProfileEvent`]s as they are dispatched.
/// Control flow never depends on a hook's return value: dispatch is
/// fire-and-forget, and always happens after the device lock is released.
pub trait ProfilingHook: Send + Sync {
    fn on_event(&self, event: ProfileEvent);
}

/// A hook that discards every event, used when no profiler is attached.
pub struct NullProfiler;

impl ProfilingHook for NullProfiler {
    fn on_event(&self, _event: ProfileEvent) {}
}
