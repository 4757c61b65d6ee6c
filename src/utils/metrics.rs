//! Observability and Metrics
//!
//! Atomic counters for connection, framing and dispatch activity.
//! One collector exists per server instance so independent servers (and
//! tests) never share counts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for one server
#[derive(Debug)]
pub struct Metrics {
    /// Total connections accepted into the client registry
    pub connections_total: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Connections closed on arrival (duplicate identity or connection limit)
    pub connections_rejected: AtomicU64,
    /// Complete frames sliced off receive buffers
    pub frames_received: AtomicU64,
    /// Bytes covered by received frames
    pub bytes_received: AtomicU64,
    /// Packets decoded and handed to listeners
    pub packets_dispatched: AtomicU64,
    /// Frames written to sockets
    pub packets_sent: AtomicU64,
    /// Bytes written to sockets
    pub bytes_sent: AtomicU64,
    /// Unknown type headers skipped
    pub unknown_types: AtomicU64,
    /// Frames discarded because decoding failed
    pub malformed_frames: AtomicU64,
    /// Socket-level failures and buffer overflows
    pub transport_errors: AtomicU64,
    /// Errors returned by listeners
    pub listener_errors: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            packets_dispatched: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            unknown_types: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            listener_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self, byte_count: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn packet_dispatched(&self) {
        self.packets_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_sent(&self, byte_count: u64) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn unknown_types_skipped(&self, count: u64) {
        self.unknown_types.fetch_add(count, Ordering::Relaxed);
    }

    pub fn malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn listener_error(&self) {
        self.listener_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_dispatched: self.packets_dispatched.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            unknown_types: self.unknown_types.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            listener_errors: self.listener_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            connections_rejected = snapshot.connections_rejected,
            frames_received = snapshot.frames_received,
            bytes_received = snapshot.bytes_received,
            packets_dispatched = snapshot.packets_dispatched,
            packets_sent = snapshot.packets_sent,
            bytes_sent = snapshot.bytes_sent,
            unknown_types = snapshot.unknown_types,
            malformed_frames = snapshot.malformed_frames,
            transport_errors = snapshot.transport_errors,
            listener_errors = snapshot.listener_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Protocol metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub frames_received: u64,
    pub bytes_received: u64,
    pub packets_dispatched: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub unknown_types: u64,
    pub malformed_frames: u64,
    pub transport_errors: u64,
    pub listener_errors: u64,
    pub uptime_seconds: u64,
}
