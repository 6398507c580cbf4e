//! Observability and Metrics
//!
//! Counters for the device link, dispatcher, traceroute scheduler and proxy.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Global metrics collector for link and proxy operations
#[derive(Debug)]
pub struct Metrics {
    /// TCP sessions established with the device
    pub link_sessions: AtomicU64,
    /// Reconnect attempts scheduled after a failure
    pub reconnect_attempts: AtomicU64,
    /// Config handshakes started
    pub handshakes_total: AtomicU64,
    /// Config handshakes that reached config-complete
    pub handshakes_success: AtomicU64,
    /// Config handshakes abandoned (timeout or socket error)
    pub handshakes_failed: AtomicU64,
    /// Frames received from the device
    pub frames_received: AtomicU64,
    /// Frames written to the device
    pub frames_sent: AtomicU64,
    /// Payload bytes received from the device
    pub bytes_received: AtomicU64,
    /// Payload bytes written to the device
    pub bytes_sent: AtomicU64,
    /// Frames discarded by the codec
    pub frames_dropped: AtomicU64,
    /// Envelopes or payloads that failed protobuf decoding
    pub decode_failures: AtomicU64,
    /// Encrypted packets that could not be read on their channel
    pub unreadable_packets: AtomicU64,
    /// Proxy clients currently connected
    pub proxy_clients_active: AtomicU64,
    /// Proxy clients accepted since start
    pub proxy_clients_total: AtomicU64,
    /// Client frames relayed to the device
    pub proxy_frames_relayed: AtomicU64,
    /// Client frames refused by the denylist
    pub proxy_frames_denied: AtomicU64,
    /// Traceroute requests issued
    pub traceroutes_sent: AtomicU64,
    /// Traceroute responses recorded
    pub traceroutes_completed: AtomicU64,
    /// Traceroute tasks cleared without a response
    pub traceroutes_expired: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            link_sessions: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            unreadable_packets: AtomicU64::new(0),
            proxy_clients_active: AtomicU64::new(0),
            proxy_clients_total: AtomicU64::new(0),
            proxy_frames_relayed: AtomicU64::new(0),
            proxy_frames_denied: AtomicU64::new(0),
            traceroutes_sent: AtomicU64::new(0),
            traceroutes_completed: AtomicU64::new(0),
            traceroutes_expired: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn session_established(&self) {
        self.link_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_scheduled(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame received from the device
    pub fn frame_received(&self, byte_count: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a frame written to the device
    pub fn frame_sent(&self, byte_count: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unreadable_packet(&self) {
        self.unreadable_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn proxy_client_connected(&self) {
        self.proxy_clients_total.fetch_add(1, Ordering::Relaxed);
        self.proxy_clients_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn proxy_client_disconnected(&self) {
        self.proxy_clients_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn proxy_frame_relayed(&self) {
        self.proxy_frames_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn proxy_frame_denied(&self) {
        self.proxy_frames_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn traceroute_sent(&self) {
        self.traceroutes_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn traceroute_completed(&self) {
        self.traceroutes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn traceroute_expired(&self) {
        self.traceroutes_expired.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            link_sessions: self.link_sessions.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            unreadable_packets: self.unreadable_packets.load(Ordering::Relaxed),
            proxy_clients_active: self.proxy_clients_active.load(Ordering::Relaxed),
            proxy_clients_total: self.proxy_clients_total.load(Ordering::Relaxed),
            proxy_frames_relayed: self.proxy_frames_relayed.load(Ordering::Relaxed),
            proxy_frames_denied: self.proxy_frames_denied.load(Ordering::Relaxed),
            traceroutes_sent: self.traceroutes_sent.load(Ordering::Relaxed),
            traceroutes_completed: self.traceroutes_completed.load(Ordering::Relaxed),
            traceroutes_expired: self.traceroutes_expired.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let s = self.snapshot();
        info!(
            link_sessions = s.link_sessions,
            reconnect_attempts = s.reconnect_attempts,
            handshakes_total = s.handshakes_total,
            handshakes_success = s.handshakes_success,
            handshakes_failed = s.handshakes_failed,
            frames_received = s.frames_received,
            frames_sent = s.frames_sent,
            bytes_received = s.bytes_received,
            bytes_sent = s.bytes_sent,
            frames_dropped = s.frames_dropped,
            decode_failures = s.decode_failures,
            unreadable_packets = s.unreadable_packets,
            proxy_clients_active = s.proxy_clients_active,
            proxy_clients_total = s.proxy_clients_total,
            proxy_frames_relayed = s.proxy_frames_relayed,
            proxy_frames_denied = s.proxy_frames_denied,
            traceroutes_sent = s.traceroutes_sent,
            traceroutes_completed = s.traceroutes_completed,
            traceroutes_expired = s.traceroutes_expired,
            uptime_seconds = s.uptime_seconds,
            "Link metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub link_sessions: u64,
    pub reconnect_attempts: u64,
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub frames_received: u64,
    pub frames_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub frames_dropped: u64,
    pub decode_failures: u64,
    pub unreadable_packets: u64,
    pub proxy_clients_active: u64,
    pub proxy_clients_total: u64,
    pub proxy_frames_relayed: u64,
    pub proxy_frames_denied: u64,
    pub traceroutes_sent: u64,
    pub traceroutes_completed: u64,
    pub traceroutes_expired: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}
