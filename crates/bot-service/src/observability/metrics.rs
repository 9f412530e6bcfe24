//! Metric definitions.
//!
//! All metrics use the `bot_` prefix, `_total` for counters and `_seconds`
//! for duration histograms. Labels are bounded:
//! - `status` on sync: success, error
//! - `outcome` on commands: ok, error, rejected, unknown
//! - `status` on joins: success or one of the four join step names

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus recorder with a scrape listener on `addr`.
///
/// Must run inside a tokio runtime.
///
/// # Errors
///
/// Returns an error if the address is invalid or a recorder is already
/// installed.
pub fn init_metrics_exporter(addr: &str) -> Result<(), String> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| format!("Invalid metrics bind address '{addr}': {e}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        // Joins span four network round-trips plus the media handshake
        .set_buckets_for_metric(
            Matcher::Full("bot_call_join_duration_seconds".to_string()),
            &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
        )
        .map_err(|e| format!("Failed to set join duration buckets: {e}"))?
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))
}

// ============================================================================
// Sync loop
// ============================================================================

/// Metric: `bot_sync_total`
/// Labels: `status` (success, error)
pub fn record_sync(status: &'static str) {
    counter!("bot_sync_total", "status" => status).increment(1);
}

/// Metric: `bot_sync_events_total`
pub fn record_sync_events(count: usize) {
    counter!("bot_sync_events_total").increment(count as u64);
}

/// Metric: `bot_commands_total`
/// Labels: `outcome` (ok, error, rejected, unknown)
pub fn record_command(outcome: &'static str) {
    counter!("bot_commands_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// Calls
// ============================================================================

/// Metric: `bot_call_join_total`
/// Labels: `status` (success, openid_token, rtc_credentials,
/// announce_membership, media_session)
pub fn record_call_join(status: &'static str) {
    counter!("bot_call_join_total", "status" => status).increment(1);
}

/// Metric: `bot_call_join_duration_seconds`
pub fn record_call_join_duration(duration: Duration) {
    histogram!("bot_call_join_duration_seconds").record(duration.as_secs_f64());
}

/// Metric: `bot_call_leave_total`
pub fn record_call_leave() {
    counter!("bot_call_leave_total").increment(1);
}

/// Metric: `bot_calls_active`
pub fn set_calls_active(count: usize) {
    // usize to f64 is exact for any realistic number of calls
    #[allow(clippy::cast_precision_loss)]
    gauge!("bot_calls_active").set(count as f64);
}
