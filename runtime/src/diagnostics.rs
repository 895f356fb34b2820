//! Fatal diagnostics and the structured event log.
//!
//! Programmer-contract violations terminate the process after the device
//! lock has been released; message formats are kept stable because some
//! consuming programs parse them. This module also carries a fixed-size,
//! heap-free ring buffer of structured events: a circular buffer behind a
//! `GlobalState` mutex, stamped with a monotonic sequence number rather
//! than a wall-clock timestamp since this crate has no timer collaborator.

#[cfg(feature = "event-log")]
use core::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "event-log")]
use crate::sync::once_lock::GlobalState;
#[cfg(feature = "event-log")]
use spin::Mutex;

/// Emit a fatal diagnostic and terminate via panic.
///
/// Callers must have already released the device lock: the device lock is
/// always released on the fatal path before the diagnostic fires. This
/// macro only formats and panics; lock discipline is the caller's
/// responsibility.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let msg = alloc::format!($($arg)*);
        log::error!(target: "oaccrt::fatal", "{}", msg);
        $crate::diagnostics::record_fatal(&msg);
        panic!("{}", msg);
    }};
}

#[cfg(feature = "event-log")]
pub use event_log::{drain, record_fatal, EventKind, EventLogEntry};

#[cfg(not(feature = "event-log"))]
pub fn record_fatal(_msg: &str) {}

#[cfg(feature = "event-log")]
mod event_log {
    use super::*;

    const EVENT_LOG_CAPACITY: usize = 256;
    const EVENT_MESSAGE_MAX_LEN: usize = 128;

    /// What kind of event a [`EventLogEntry`] records.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u8)]
    pub enum EventKind {
        Alloc = 0,
        Free = 1,
        MapEnter = 2,
        MapExit = 3,
        Attach = 4,
        Detach = 5,
        Fatal = 6,
    }

    #[derive(Clone, Copy)]
    struct EventEntry {
        seq: u64,
        kind: EventKind,
        message_buf: [u8; EVENT_MESSAGE_MAX_LEN],
        message_len: u8,
    }

    impl EventEntry {
        const fn empty() -> Self {
            Self {
                seq: 0,
                kind: EventKind::Alloc,
                message_buf: [0u8; EVENT_MESSAGE_MAX_LEN],
                message_len: 0,
            }
        }
    }

    /// A structured event, returned by [`drain`].
    pub struct EventLogEntry {
        pub seq: u64,
        pub kind: EventKind,
        pub message: alloc::string::String,
    }

    struct EventBuffer {
        entries: [EventEntry; EVENT_LOG_CAPACITY],
        head: usize,
        count: usize,
    }

    impl EventBuffer {
        fn new() -> Self {
            const EMPTY: EventEntry = EventEntry::empty();
            Self {
                entries: [EMPTY; EVENT_LOG_CAPACITY],
                head: 0,
                count: 0,
            }
        }

        fn push(&mut self, entry: EventEntry) {
            self.entries[self.head] = entry;
            self.head = (self.head + 1) % EVENT_LOG_CAPACITY;
            if self.count < EVENT_LOG_CAPACITY {
                self.count += 1;
            }
        }

        fn tail(&self) -> usize {
            if self.count < EVENT_LOG_CAPACITY {
                0
            } else {
                self.head
            }
        }

        fn get(&self, i: usize) -> Option<&EventEntry> {
            if i >= self.count {
                return None;
            }
            Some(&self.entries[(self.tail() + i) % EVENT_LOG_CAPACITY])
        }
    }

    static SEQ: AtomicU64 = AtomicU64::new(0);
    static EVENT_LOG: GlobalState<Mutex<EventBuffer>> = GlobalState::new();

    fn ensure_init() {
        let _ = EVENT_LOG.init(Mutex::new(EventBuffer::new()));
    }

    /// Record a structured event. Silently truncates messages longer than
    /// the inline buffer.
    pub fn record(kind: EventKind, message: &str) {
        ensure_init();
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let mut message_buf = [0u8; EVENT_MESSAGE_MAX_LEN];
        let len = message.len().min(EVENT_MESSAGE_MAX_LEN);
        message_buf[..len].copy_from_slice(&message.as_bytes()[..len]);
        let entry = EventEntry {
            seq,
            kind,
            message_buf,
            message_len: len as u8,
        };
        EVENT_LOG.with_mut(|lock| lock.lock().push(entry));
    }

    pub fn record_fatal(message: &str) {
        record(EventKind::Fatal, message);
    }

    /// Drain every buffered event, oldest first, into the given closure.
    pub fn drain<F: FnMut(EventLogEntry)>(mut f: F) {
        ensure_init();
        EVENT_LOG.with(|lock| {
            let buf = lock.lock();
            for i in 0..buf.count {
                if let Some(e) = buf.get(i) {
                    let len = e.message_len as usize;
                    let message = core::str::from_utf8(&e.message_buf[..len])
                        .unwrap_or("")
                        .into();
                    f(EventLogEntry {
                        seq: e.seq,
                        kind: e.kind,
                        message,
                    });
                }
            }
        });
    }
}

#[cfg(all(test, feature = "event-log"))]
mod tests {
    use super::event_log::*;

    #[test]
    fn record_and_drain_round_trips() {
        record(EventKind::Alloc, "alloc 64 bytes");
        let mut seen = alloc::vec::Vec::new();
        drain(|e| seen.push(e.message));
        assert!(seen.iter().any(|m| m == "alloc 64 bytes"));
    }
}
