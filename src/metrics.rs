//! Prometheus metrics collection for glimpsed.
//!
//! Tracks broker health, frame throughput, admission outcomes, and social
//! activity, exposed on an HTTP endpoint for scraping.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry for all metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    // ========================================================================
    // Counters (monotonic increasing)
    // ========================================================================

    /// Total connections accepted past the rate gate.
    pub static ref CONNECTIONS_ACCEPTED: IntCounter = IntCounter::new(
        "glimpse_connections_accepted_total",
        "Connections accepted"
    ).unwrap();

    /// Total connections closed by the per-address rate limit.
    pub static ref CONNECTIONS_REJECTED: IntCounter = IntCounter::new(
        "glimpse_connections_rejected_total",
        "Connections rejected by rate limit"
    ).unwrap();

    /// Total successful admissions.
    pub static ref LOGINS: IntCounter = IntCounter::new(
        "glimpse_logins_total",
        "Sessions admitted"
    ).unwrap();

    /// Total identity-provider failures that degraded a login to guest.
    pub static ref AUTH_FAILURES: IntCounter = IntCounter::new(
        "glimpse_auth_failures_total",
        "Token validations that fell back to guest"
    ).unwrap();

    /// Total inbound frames dispatched.
    pub static ref FRAMES_IN: IntCounter = IntCounter::new(
        "glimpse_frames_in_total",
        "Inbound frames dispatched"
    ).unwrap();

    /// Total outbound frames written.
    pub static ref FRAMES_SENT: IntCounter = IntCounter::new(
        "glimpse_frames_sent_total",
        "Outbound frames written"
    ).unwrap();

    /// Total malformed frames answered with an error frame.
    pub static ref FRAMES_INVALID: IntCounter = IntCounter::new(
        "glimpse_frames_invalid_total",
        "Malformed inbound frames"
    ).unwrap();

    /// Total message rate limit hits.
    pub static ref RATE_LIMITED: IntCounter = IntCounter::new(
        "glimpse_rate_limited_total",
        "Message rate limit hits"
    ).unwrap();

    /// Total invite codes created.
    pub static ref INVITES_CREATED: IntCounter = IntCounter::new(
        "glimpse_invites_created_total",
        "Invite codes created"
    ).unwrap();

    /// Total invite codes redeemed.
    pub static ref INVITES_REDEEMED: IntCounter = IntCounter::new(
        "glimpse_invites_redeemed_total",
        "Invite codes redeemed"
    ).unwrap();

    /// Total chat messages stored.
    pub static ref CHAT_MESSAGES: IntCounter = IntCounter::new(
        "glimpse_chat_messages_total",
        "Chat messages stored"
    ).unwrap();

    /// Total fan-out cycles flushed.
    pub static ref BROADCAST_CYCLES: IntCounter = IntCounter::new(
        "glimpse_broadcast_cycles_total",
        "Debounced fan-out cycles"
    ).unwrap();

    /// Total store snapshots written.
    pub static ref BACKUPS: IntCounter = IntCounter::new(
        "glimpse_backups_total",
        "Store snapshots written"
    ).unwrap();

    // ========================================================================
    // Gauges (can increase/decrease)
    // ========================================================================

    /// Currently connected sessions.
    pub static ref SESSIONS: IntGauge = IntGauge::new(
        "glimpse_sessions",
        "Connected sessions"
    ).unwrap();

    /// Distinct handles currently online.
    pub static ref ONLINE_USERS: IntGauge = IntGauge::new(
        "glimpse_online_users",
        "Distinct online handles"
    ).unwrap();
}

/// Register all metrics with the global registry. Call once at startup.
pub fn init() {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(CONNECTIONS_ACCEPTED.clone()),
        Box::new(CONNECTIONS_REJECTED.clone()),
        Box::new(LOGINS.clone()),
        Box::new(AUTH_FAILURES.clone()),
        Box::new(FRAMES_IN.clone()),
        Box::new(FRAMES_SENT.clone()),
        Box::new(FRAMES_INVALID.clone()),
        Box::new(RATE_LIMITED.clone()),
        Box::new(INVITES_CREATED.clone()),
        Box::new(INVITES_REDEEMED.clone()),
        Box::new(CHAT_MESSAGES.clone()),
        Box::new(BROADCAST_CYCLES.clone()),
        Box::new(BACKUPS.clone()),
        Box::new(SESSIONS.clone()),
        Box::new(ONLINE_USERS.clone()),
    ];
    for metric in metrics {
        // Re-registration only happens when init() is called twice; ignore.
        let _ = REGISTRY.register(metric);
    }
}

/// Encode all registered metrics in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent_and_metrics_render() {
        init();
        init();
        FRAMES_IN.inc();
        let text = gather_metrics();
        assert!(text.contains("glimpse_frames_in_total"));
    }
}
