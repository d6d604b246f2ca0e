//! HTTP endpoints for ferry-relay.
//!
//! Provides the describe, fetch and delete routes for tunnels, plus health
//! checks and metrics. Every response is marked uncacheable: a link must
//! never be served from a cache once consumed.

mod delete;
pub mod download;
pub mod health;
mod metrics;

use crate::server::FerryRelay;
use axum::http::header::CACHE_CONTROL;
use axum::http::HeaderValue;
use axum::middleware::map_response;
use axum::response::Response;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

pub use delete::DELETED_MESSAGE;
pub use download::{LinkDescription, Package, ARCHIVE_NAME};
pub use health::HealthStatus;

/// `Cache-Control` value sent with every response.
pub const NO_STORE: &str = "no-store, no-cache, must-revalidate, proxy-revalidate";

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<FerryRelay>) -> Router {
    let mut router = Router::new()
        .route(
            "/download/:subdomain/:link",
            get(download::describe_under_subdomain),
        )
        .route("/download/:link", get(download::describe_handler))
        .route("/direct/:link", get(download::fetch_handler))
        .route("/delete/:link", get(delete::delete_handler))
        .route("/health", get(health::health_handler));

    if relay.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    router
        .layer(map_response(no_store))
        .layer(Extension(relay))
}

async fn no_store(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
    response
}
