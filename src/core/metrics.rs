//! Lock-free counters and gauges with Prometheus text exposition
//!
//! A single [`RelayMetrics`] instance is shared (behind an `Arc`) by the
//! session layer, the dispatcher, and the long-polling bridge. All updates
//! are relaxed atomic adds/subs so they never contend; the only
//! synchronization point is the `/metrics` endpoint reading a snapshot.
//!
//! The exposition format is the Prometheus v0.0.4 text form: one
//! `# HELP` / `# TYPE` pair followed by the sample line, per metric.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Aggregated counters for WebSocket and long-polling activity.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    // ===== Core WebSocket metrics =====
    /// Total WebSocket connections ever accepted.
    pub connections_total: AtomicU64,
    /// Currently open WebSocket connections.
    pub connections_active: AtomicI64,
    /// Total inbound text frames handed to the dispatcher.
    pub messages_in_total: AtomicU64,
    /// Total frames written to sockets.
    pub messages_out_total: AtomicU64,
    /// Total recovered errors (invalid envelopes, store failures).
    pub errors_total: AtomicU64,

    // ===== Long-polling fallback metrics =====
    /// Total long-poll sessions ever created.
    pub lp_sessions_total: AtomicU64,
    /// Long-poll sessions currently alive (not yet swept).
    pub lp_sessions_active: AtomicI64,
    /// Total `/ws/poll` calls.
    pub lp_polls_total: AtomicU64,
    /// Envelopes currently buffered across all long-poll sessions.
    pub lp_messages_buffered: AtomicI64,
    /// Total envelopes enqueued into long-poll buffers.
    pub lp_messages_enqueued_total: AtomicU64,
    /// Total envelopes drained via `/ws/poll`.
    pub lp_messages_drained_total: AtomicU64,
}

impl RelayMetrics {
    /// Create a zeroed metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Render all metrics in the Prometheus v0.0.4 text format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(2048);

        counter(
            &mut out,
            "relay_ws_connections_total",
            "Total WebSocket connections accepted",
            self.connections_total.load(Ordering::Relaxed),
        );
        gauge(
            &mut out,
            "relay_ws_connections_active",
            "Currently open WebSocket connections",
            self.connections_active.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "relay_ws_messages_in_total",
            "Total WebSocket messages received",
            self.messages_in_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "relay_ws_messages_out_total",
            "Total WebSocket messages sent",
            self.messages_out_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "relay_ws_errors_total",
            "Total recovered errors",
            self.errors_total.load(Ordering::Relaxed),
        );

        counter(
            &mut out,
            "relay_ws_lp_sessions_total",
            "Total long-polling sessions ever created",
            self.lp_sessions_total.load(Ordering::Relaxed),
        );
        gauge(
            &mut out,
            "relay_ws_lp_sessions_active",
            "Currently active long-polling sessions",
            self.lp_sessions_active.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "relay_ws_lp_polls_total",
            "Total /ws/poll HTTP calls",
            self.lp_polls_total.load(Ordering::Relaxed),
        );
        gauge(
            &mut out,
            "relay_ws_lp_messages_buffered",
            "Envelopes currently buffered for long-polling",
            self.lp_messages_buffered.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "relay_ws_lp_messages_enqueued_total",
            "Total envelopes enqueued into long-poll buffers",
            self.lp_messages_enqueued_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "relay_ws_lp_messages_drained_total",
            "Total envelopes drained via /ws/poll",
            self.lp_messages_drained_total.load(Ordering::Relaxed),
        );

        out
    }
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    sample(out, name, help, "counter", &value.to_string());
}

fn gauge(out: &mut String, name: &str, help: &str, value: i64) {
    sample(out, name, help, "gauge", &value.to_string());
}

fn sample(out: &mut String, name: &str, help: &str, kind: &str, value: &str) {
    out.push_str("# HELP ");
    out.push_str(name);
    out.push(' ');
    out.push_str(help);
    out.push_str("\n# TYPE ");
    out.push_str(name);
    out.push(' ');
    out.push_str(kind);
    out.push('\n');
    out.push_str(name);
    out.push(' ');
    out.push_str(value);
    out.push('\n');
}
