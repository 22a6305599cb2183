// ============================================================================
// Health, Capabilities and Metrics Routes
// ============================================================================
//
// Endpoints:
// - GET /health       - store reachability
// - GET /capabilities - which inbox operations this deployment supports
// - GET /metrics      - Prometheus metrics
//
// ============================================================================

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;
use std::sync::Arc;

use crate::context::AppContext;
use crate::metrics;

/// GET /health
pub async fn health_check(State(app_context): State<Arc<AppContext>>) -> impl IntoResponse {
    match app_context.inbox.ping().await {
        Ok(()) => (StatusCode::OK, "OK"),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
        }
    }
}

/// GET /capabilities
///
/// Lets clients discover whether read is destructive and whether messages
/// can be addressed by id (set-read, delete) before they call those routes.
pub async fn capabilities(State(app_context): State<Arc<AppContext>>) -> impl IntoResponse {
    let capabilities = app_context.inbox.capabilities();
    Json(json!({
        "backend": app_context.inbox.backend(),
        "addressable": capabilities.addressable,
        "destructive_read": capabilities.destructive_read,
        "signature_header": app_context.config.auth.signature_header,
        "operations": {
            "send": true,
            "read": true,
            "count_unread": true,
            "set_read": capabilities.addressable,
            "delete": capabilities.addressable,
        },
    }))
}

/// GET /metrics
pub async fn metrics() -> impl IntoResponse {
    match metrics::gather_metrics() {
        Ok(metrics_data) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            metrics_data,
        ),
        Err(e) => {
            tracing::error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("Content-Type", "text/plain")],
                "Internal Server Error".to_string(),
            )
        }
    }
}
