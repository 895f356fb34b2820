//! Recoverable error types for the host-device correspondence core.
//!
//! Programmer-contract violations (mapping a range that is not present,
//! double-freeing, detaching more often than attaching) are not modeled
//! here: those are fatal diagnostics handled by [`crate::diagnostics`],
//! matching the upstream runtime's behavior of terminating the process
//! rather than returning an error code. `OaccError` only covers the
//! handful of paths where failure is recoverable: driver-side allocation
//! failure and malformed bulk-mapping requests.

use core::fmt;

/// Errors that a caller can recover from without the process terminating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "oacc errors must be handled, not silently discarded"]
pub enum OaccError {
    /// The driver could not allocate device memory of the requested size.
    DeviceAllocFailed { requested: usize },
    /// The requested host range overlaps an existing, distinct mapping.
    OverlappingRange { host_start: usize, host_end: usize },
}

/// Result type alias for correspondence-table operations.
pub type OaccResult<T> = Result<T, OaccError>;

impl fmt::Display for OaccError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceAllocFailed { requested } => {
                write!(f, "device allocation of {} bytes failed", requested)
            }
            Self::OverlappingRange { host_start, host_end } => {
                write!(
                    f,
                    "host range [0x{:x}, 0x{:x}) overlaps an existing mapping",
                    host_start, host_end
                )
            }
        }
    }
}

#[macro_export]
macro_rules! oacc_error {
    (DeviceAllocFailed { requested: $req:expr }) => {
        $crate::error::OaccError::DeviceAllocFailed { requested: $req }
    };
    (OverlappingRange { host_start: $s:expr, host_end: $e:expr }) => {
        $crate::error::OaccError::OverlappingRange {
            host_start: $s,
            host_end: $e,
        }
    };
    ($variant:ident) => {
        $crate::error::OaccError::$variant
    };
}
