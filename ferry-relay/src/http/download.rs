//! Describe and fetch endpoints.

use crate::config::Packaging;
use crate::console::direct_url;
use crate::error::HttpError;
use crate::server::FerryRelay;
use crate::tunnel::Tunnel;
use axum::body::Bytes;
use axum::extract::Path;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use ferry_core::{elapsed_label, expiry_label, sender_label, Link};
use serde::Serialize;
use std::io::{Cursor, Write};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Name of the archive served in zip mode.
pub const ARCHIVE_NAME: &str = "ferry.zip";

/// Landing page data for a tunnel.
#[derive(Debug, Clone, Serialize)]
pub struct LinkDescription {
    /// The link.
    pub link: String,
    /// Display name of the sender.
    pub sender: String,
    /// Whether the sender's key belongs to a verified subdomain.
    pub verified: bool,
    /// Time since the link was sent, e.g. `"2 minutes 5 seconds ago"`.
    pub elapsed: String,
    /// Lifetime label, e.g. `"in 15 minutes"`.
    pub expires: String,
    /// Sender's message.
    pub message: Option<String>,
    /// Where to fetch the file.
    pub direct_url: String,
    /// Payload size in bytes.
    pub size: u64,
}

impl LinkDescription {
    fn new(tunnel: &Tunnel, base_url: &str) -> Self {
        let options = &tunnel.sender.options;
        let subdomain = tunnel.sender.subdomain.as_deref();
        Self {
            link: tunnel.link.to_string(),
            sender: sender_label(options.from.as_deref(), subdomain).to_string(),
            verified: subdomain.is_some(),
            elapsed: elapsed_label(tunnel.elapsed()),
            expires: expiry_label(tunnel.ttl),
            message: options.message.clone(),
            direct_url: direct_url(base_url, &tunnel.link),
            size: tunnel.size(),
        }
    }
}

/// A packaged response body.
#[derive(Debug)]
pub struct Package {
    /// Name announced in `Content-Disposition`.
    pub filename: String,
    /// `Content-Type` value.
    pub content_type: &'static str,
    /// Response body.
    pub body: Bytes,
}

impl IntoResponse for Package {
    fn into_response(self) -> Response {
        let disposition = format!("attachment; filename=\"{}\"", header_safe(&self.filename));
        let disposition = match HeaderValue::from_str(&disposition) {
            Ok(value) => value,
            Err(e) => return HttpError::Packaging(e.to_string()).into_response(),
        };
        (
            [
                (CONTENT_TYPE, HeaderValue::from_static(self.content_type)),
                (CONTENT_DISPOSITION, disposition),
                (CONTENT_LENGTH, HeaderValue::from(self.body.len())),
            ],
            self.body,
        )
            .into_response()
    }
}

/// Describe a tunnel addressed under a sender subdomain.
///
/// The subdomain segment is cosmetic; the link alone addresses the tunnel.
pub async fn describe_under_subdomain(
    Extension(relay): Extension<Arc<FerryRelay>>,
    Path((_subdomain, link)): Path<(String, String)>,
) -> Result<Json<LinkDescription>, HttpError> {
    describe(&relay, &link)
}

/// Describe a tunnel.
pub async fn describe_handler(
    Extension(relay): Extension<Arc<FerryRelay>>,
    Path(link): Path<String>,
) -> Result<Json<LinkDescription>, HttpError> {
    describe(&relay, &link)
}

fn describe(relay: &FerryRelay, raw: &str) -> Result<Json<LinkDescription>, HttpError> {
    let link = Link::parse(raw).ok_or(HttpError::LinkNotFound)?;
    let tunnel = relay
        .registry()
        .lookup(&link)
        .ok_or(HttpError::LinkNotFound)?;
    Ok(Json(LinkDescription::new(
        &tunnel,
        &relay.config().server.base_url,
    )))
}

/// Direct download: consume the tunnel, package the payload, notify the sender.
///
/// The tunnel leaves the registry before it is packaged, so concurrent
/// requests for the same link get a 404 instead of building their own copy.
pub async fn fetch_handler(
    Extension(relay): Extension<Arc<FerryRelay>>,
    Path(link): Path<String>,
) -> Result<Package, HttpError> {
    let link = Link::parse(&link).ok_or(HttpError::LinkNotFound)?;
    // Losing this race means someone else consumed, deleted or expired it.
    let claimed = relay
        .registry()
        .remove(&link)
        .ok_or(HttpError::LinkNotFound)?;

    let packaging = relay.config().http.packaging;
    let tunnel = Arc::clone(&claimed.tunnel);
    let packaged = tokio::task::spawn_blocking(move || package(&tunnel, packaging))
        .await
        .map_err(|e| HttpError::Packaging(e.to_string()))
        .and_then(|result| result);
    let package = match packaged {
        Ok(package) => package,
        Err(e) => {
            tracing::warn!(link = %link, "Packaging failed, tunnel withdrawn: {}", e);
            claimed.expire();
            return Err(e);
        }
    };
    claimed.complete();

    let metrics = relay.metrics();
    metrics.downloads_total.fetch_add(1, Ordering::Relaxed);
    metrics
        .bytes_sent
        .fetch_add(package.body.len() as u64, Ordering::Relaxed);
    tracing::info!(link = %link, size = package.body.len(), "Tunnel consumed");

    Ok(package)
}

/// Build the response body for `tunnel`.
pub fn package(tunnel: &Tunnel, packaging: Packaging) -> Result<Package, HttpError> {
    match packaging {
        Packaging::Raw => Ok(Package {
            filename: tunnel.content_name().to_string(),
            content_type: "application/octet-stream",
            body: tunnel.payload.clone(),
        }),
        Packaging::Zip => Ok(Package {
            filename: ARCHIVE_NAME.to_string(),
            content_type: "application/zip",
            body: zip_single(&entry_name(tunnel.content_name()), &tunnel.payload)
                .map_err(|e| HttpError::Packaging(e.to_string()))?,
        }),
    }
}

fn zip_single(name: &str, data: &[u8]) -> zip::result::ZipResult<Bytes> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(data.len() as u64 >= u64::from(u32::MAX));
    writer.start_file(name, options)?;
    writer.write_all(data)?;
    let cursor = writer.finish()?;
    Ok(Bytes::from(cursor.into_inner()))
}

/// Archive entries stay at the top level.
fn entry_name(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

/// Printable ASCII only; quotes and backslashes would break the header.
fn header_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
