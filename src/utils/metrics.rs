//! Exchange Metrics
//!
//! Atomic counters for frames, bytes and failures on both sides of the
//! exchange. A process only ever performs one exchange, so the counters are
//! mostly useful to tests and to the final log line of each binary.

use crate::error::ErrorClass;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for frame exchanges
#[derive(Debug)]
pub struct ExchangeMetrics {
    /// Connections opened by the client
    pub connections_opened: AtomicU64,
    /// Frames fully written by the client
    pub frames_sent: AtomicU64,
    /// Frames fully read by the server
    pub frames_received: AtomicU64,
    /// Frame bytes written
    pub bytes_sent: AtomicU64,
    /// Frame bytes read
    pub bytes_received: AtomicU64,
    /// ACKs written by the server
    pub acks_sent: AtomicU64,
    /// Valid ACKs read by the client
    pub acks_received: AtomicU64,
    /// Exchanges rejected by the server
    pub rejections: AtomicU64,
    /// Protocol-class failures (bad magic, bad lengths, bad ACK)
    pub protocol_errors: AtomicU64,
    /// Transport-class failures
    pub transport_errors: AtomicU64,
    /// Resource-class failures
    pub resource_errors: AtomicU64,
    start_time: Instant,
}

impl ExchangeMetrics {
    pub fn new() -> Self {
        Self {
            connections_opened: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            acks_sent: AtomicU64::new(0),
            acks_received: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            resource_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_sent(&self, byte_count: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn frame_received(&self, byte_count: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn ack_sent(&self) {
        self.acks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_received(&self) {
        self.acks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failure under its error class
    pub fn failure(&self, class: ErrorClass) {
        let counter = match class {
            ErrorClass::Protocol => &self.protocol_errors,
            ErrorClass::Resource => &self.resource_errors,
            ErrorClass::Transport => &self.transport_errors,
            ErrorClass::Configuration => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            resource_errors: self.resource_errors.load(Ordering::Relaxed),
            uptime_millis: self.start_time.elapsed().as_millis() as u64,
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_opened = snapshot.connections_opened,
            frames_sent = snapshot.frames_sent,
            frames_received = snapshot.frames_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            acks_sent = snapshot.acks_sent,
            acks_received = snapshot.acks_received,
            rejections = snapshot.rejections,
            protocol_errors = snapshot.protocol_errors,
            transport_errors = snapshot.transport_errors,
            resource_errors = snapshot.resource_errors,
            uptime_millis = snapshot.uptime_millis,
            "Exchange metrics snapshot"
        );
    }
}

impl Default for ExchangeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_opened: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    pub rejections: u64,
    pub protocol_errors: u64,
    pub transport_errors: u64,
    pub resource_errors: u64,
    pub uptime_millis: u64,
}

static METRICS: once_cell::sync::Lazy<ExchangeMetrics> =
    once_cell::sync::Lazy::new(ExchangeMetrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static ExchangeMetrics {
    &METRICS
}
