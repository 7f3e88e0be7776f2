//! Per-cluster client counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters shared by every connection of one cluster
#[derive(Debug, Default)]
pub struct ClientMetrics {
    requests_sent: AtomicU64,
    responses_received: AtomicU64,
    unmatched_responses: AtomicU64,
    request_timeouts: AtomicU64,

    messages_produced: AtomicU64,
    bytes_produced: AtomicU64,
    messages_consumed: AtomicU64,
    bytes_consumed: AtomicU64,
    checksum_mismatches: AtomicU64,

    connections_created: AtomicU64,
    connections_failed: AtomicU64,
}

impl ClientMetrics {
    pub fn record_request(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response(&self) {
        self.responses_received.fetch_add(1, Ordering::Relaxed);
    }

    /// A response arrived with no pending request for its correlation id
    pub fn record_unmatched_response(&self) {
        self.unmatched_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_timeout(&self) {
        self.request_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_produce(&self, message_count: u64, byte_count: u64) {
        self.messages_produced
            .fetch_add(message_count, Ordering::Relaxed);
        self.bytes_produced.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn record_consume(&self, message_count: u64, byte_count: u64) {
        self.messages_consumed
            .fetch_add(message_count, Ordering::Relaxed);
        self.bytes_consumed.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn record_checksum_mismatch(&self) {
        self.checksum_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_failed(&self) {
        self.connections_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            unmatched_responses: self.unmatched_responses.load(Ordering::Relaxed),
            request_timeouts: self.request_timeouts.load(Ordering::Relaxed),
            messages_produced: self.messages_produced.load(Ordering::Relaxed),
            bytes_produced: self.bytes_produced.load(Ordering::Relaxed),
            messages_consumed: self.messages_consumed.load(Ordering::Relaxed),
            bytes_consumed: self.bytes_consumed.load(Ordering::Relaxed),
            checksum_mismatches: self.checksum_mismatches.load(Ordering::Relaxed),
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_failed: self.connections_failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub unmatched_responses: u64,
    pub request_timeouts: u64,
    pub messages_produced: u64,
    pub bytes_produced: u64,
    pub messages_consumed: u64,
    pub bytes_consumed: u64,
    pub checksum_mismatches: u64,
    pub connections_created: u64,
    pub connections_failed: u64,
}
