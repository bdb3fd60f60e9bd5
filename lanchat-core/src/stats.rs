//! Session counters.
//!
//! Updated with relaxed atomics from both the dispatcher task and `send`
//! callers; never locked. Read through [`SessionStats::snapshot`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub datagrams_received: u64,
    pub events_emitted: u64,
    pub chat_sent: u64,
    pub control_sent: u64,
    /// Oversized or unrecognized frames.
    pub frames_rejected: u64,
    pub send_failures: u64,
}

#[derive(Debug, Default)]
pub struct SessionStats {
    datagrams_received: AtomicU64,
    events_emitted: AtomicU64,
    chat_sent: AtomicU64,
    control_sent: AtomicU64,
    frames_rejected: AtomicU64,
    send_failures: AtomicU64,
}

impl SessionStats {
    pub(crate) fn record_datagram(&self) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event(&self) {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_chat_sent(&self) {
        self.chat_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_control_sent(&self) {
        self.control_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            chat_sent: self.chat_sent.load(Ordering::Relaxed),
            control_sent: self.control_sent.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}
