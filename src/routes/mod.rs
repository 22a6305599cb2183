// ============================================================================
// Axum Routes Module
// ============================================================================
//
// Structure:
// - mod.rs: Main router assembly and middleware
// - inbox.rs: Signed inbox operations
// - health.rs: Health, capabilities and metrics endpoints
// - middleware.rs: Request logging
//
// ============================================================================

mod health;
mod inbox;
mod middleware;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderName, Method, header},
    routing::{get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::MAX_REQUEST_BODY_SIZE;
use crate::context::AppContext;

/// Create the main application router with all routes
pub fn create_router(app_context: Arc<AppContext>) -> Router {
    let cors = cors_layer(&app_context.config.auth.signature_header);

    Router::new()
        // Health and monitoring
        .route("/health", get(health::health_check))
        .route("/capabilities", get(health::capabilities))
        .route("/metrics", get(health::metrics))
        // Inbox
        .route("/send", post(inbox::send))
        .route("/read", post(inbox::read))
        .route("/set-read", post(inbox::set_read))
        .route("/count-unread", post(inbox::count_unread))
        .route("/delete", post(inbox::delete))
        // Apply middleware (order matters - last added runs first)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(middleware::request_logging))
                .layer(cors)
                .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_SIZE))
                .into_inner(),
        )
        .with_state(app_context)
}

/// Browser clients call the inbox cross-origin and send the signature header
fn cors_layer(signature_header: &str) -> CorsLayer {
    let mut allowed_headers = vec![header::CONTENT_TYPE];
    match HeaderName::from_bytes(signature_header.as_bytes()) {
        Ok(name) => allowed_headers.push(name),
        Err(e) => tracing::warn!(error = %e, "Signature header is not a valid header name"),
    }

    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(allowed_headers)
        .max_age(std::time::Duration::from_secs(86400))
}
