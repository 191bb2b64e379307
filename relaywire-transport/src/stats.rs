//! Transport counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running transport counters.
#[derive(Debug, Default)]
pub struct TransportStats {
    messages_sent: AtomicU64,
    transmissions_sent: AtomicU64,
    batches_sent: AtomicU64,
    bytes_sent: AtomicU64,
    compressed_sent: AtomicU64,
    send_failures: AtomicU64,
    messages_received: AtomicU64,
}

/// Point-in-time copy of [`TransportStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Logical messages delivered to the host (a batch counts each item).
    pub messages_sent: u64,
    pub transmissions_sent: u64,
    pub batches_sent: u64,
    pub bytes_sent: u64,
    pub compressed_sent: u64,
    pub send_failures: u64,
    pub messages_received: u64,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one successful transmission carrying `messages` items.
    pub fn record_sent(&self, messages: usize, bytes: usize, batch: bool, compressed: bool) {
        self.messages_sent
            .fetch_add(messages as u64, Ordering::Relaxed);
        self.transmissions_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        if batch {
            self.batches_sent.fetch_add(1, Ordering::Relaxed);
        }
        if compressed {
            self.compressed_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self, messages: usize) {
        self.messages_received
            .fetch_add(messages as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            transmissions_sent: self.transmissions_sent.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            compressed_sent: self.compressed_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = TransportStats::new();
        stats.record_sent(1, 12, false, false);
        stats.record_sent(3, 40, true, true);
        stats.record_failure();
        stats.record_received(2);

        let snap = stats.snapshot();
        assert_eq!(snap.messages_sent, 4);
        assert_eq!(snap.transmissions_sent, 2);
        assert_eq!(snap.batches_sent, 1);
        assert_eq!(snap.bytes_sent, 52);
        assert_eq!(snap.compressed_sent, 1);
        assert_eq!(snap.send_failures, 1);
        assert_eq!(snap.messages_received, 2);
    }
}
