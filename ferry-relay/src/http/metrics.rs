//! Prometheus metrics endpoint.

use crate::server::FerryRelay;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(relay): Extension<Arc<FerryRelay>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&relay),
    )
}

fn render(relay: &FerryRelay) -> String {
    let m = relay.metrics();

    // Gauges: current state
    let active = relay.active_tunnels();
    let pending = relay.registry().len().saturating_sub(active);
    let limiter_keys = relay.rate_limits().upload_keys_count();

    // Counters: monotonic since startup
    let uploads = m.uploads_total.load(Ordering::Relaxed);
    let failures = m.upload_failures.load(Ordering::Relaxed);
    let downloads = m.downloads_total.load(Ordering::Relaxed);
    let deletes = m.deletes_total.load(Ordering::Relaxed);
    let expirations = m.expirations_total.load(Ordering::Relaxed);
    let bytes_rx = m.bytes_received.load(Ordering::Relaxed);
    let bytes_tx = m.bytes_sent.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);

    format!(
        r#"# HELP ferry_relay_tunnels_active Tunnels waiting for a download
# TYPE ferry_relay_tunnels_active gauge
ferry_relay_tunnels_active {active}

# HELP ferry_relay_uploads_pending Uploads reserved but not yet published
# TYPE ferry_relay_uploads_pending gauge
ferry_relay_uploads_pending {pending}

# HELP ferry_relay_rate_limiter_keys Source addresses tracked by the upload limiter
# TYPE ferry_relay_rate_limiter_keys gauge
ferry_relay_rate_limiter_keys {limiter_keys}

# HELP ferry_relay_info Server information
# TYPE ferry_relay_info gauge
ferry_relay_info{{version="{version}"}} 1

# HELP ferry_relay_uploads_total Uploads published as tunnels
# TYPE ferry_relay_uploads_total counter
ferry_relay_uploads_total {uploads}

# HELP ferry_relay_upload_failures_total Upload sessions that ended before publishing
# TYPE ferry_relay_upload_failures_total counter
ferry_relay_upload_failures_total {failures}

# HELP ferry_relay_downloads_total Tunnels consumed by a direct download
# TYPE ferry_relay_downloads_total counter
ferry_relay_downloads_total {downloads}

# HELP ferry_relay_deletes_total Tunnels revoked through the delete link
# TYPE ferry_relay_deletes_total counter
ferry_relay_deletes_total {deletes}

# HELP ferry_relay_expirations_total Tunnels that expired unclaimed
# TYPE ferry_relay_expirations_total counter
ferry_relay_expirations_total {expirations}

# HELP ferry_relay_bytes_received_total Payload bytes received over SSH
# TYPE ferry_relay_bytes_received_total counter
ferry_relay_bytes_received_total {bytes_rx}

# HELP ferry_relay_bytes_sent_total Response bytes served for direct downloads
# TYPE ferry_relay_bytes_sent_total counter
ferry_relay_bytes_sent_total {bytes_tx}

# HELP ferry_relay_rate_limit_hits_total Upload sessions refused by the rate limiter
# TYPE ferry_relay_rate_limit_hits_total counter
ferry_relay_rate_limit_hits_total {rate_limits}
"#,
        version = env!("CARGO_PKG_VERSION"),
    )
}
