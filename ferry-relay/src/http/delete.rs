//! Delete endpoint.

use crate::error::HttpError;
use crate::server::FerryRelay;
use axum::extract::Path;
use axum::Extension;
use ferry_core::Link;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Confirmation body for a successful delete.
pub const DELETED_MESSAGE: &str = "File link deleted successfully!";

/// Revoke a tunnel and tell its sender it was deleted.
///
/// A link that is already gone answers 404, same as a fetch would.
pub async fn delete_handler(
    Extension(relay): Extension<Arc<FerryRelay>>,
    Path(link): Path<String>,
) -> Result<&'static str, HttpError> {
    let link = Link::parse(&link).ok_or(HttpError::LinkNotFound)?;
    let claimed = relay
        .registry()
        .remove(&link)
        .ok_or(HttpError::LinkNotFound)?;
    claimed.delete();

    relay.metrics().deletes_total.fetch_add(1, Ordering::Relaxed);
    tracing::info!(link = %link, "Tunnel deleted by request");
    Ok(DELETED_MESSAGE)
}
