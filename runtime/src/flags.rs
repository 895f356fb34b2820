//! The flags word carried by `GOACC_enter_exit_data`'s call-marshaling
//! convention.

use bitflags::bitflags;

bitflags! {
    /// Bits unmarshaled from `GOACC_enter_exit_data`'s `flags` argument.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GoaccFlags: u32 {
        /// The compiler could not find a device for this construct and
        /// is falling back to running it on the host; the batch must be
        /// treated as a no-op rather than dispatched to a device.
        const HOST_FALLBACK = 1 << 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_fallback_bit_round_trips() {
        let f = GoaccFlags::HOST_FALLBACK;
        assert!(f.contains(GoaccFlags::HOST_FALLBACK));
        assert!(GoaccFlags::empty().is_empty());
    }
}
