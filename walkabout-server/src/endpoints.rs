use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use walkabout_core::EntityId;

use crate::state::AppState;

/// `GET /` service metadata.
pub async fn service_metadata(State(state): State<AppState>) -> Response {
    let body = json!({
        "service": state.service_name,
        "version": state.service_version,
        "description": "object-spatial application server",
        "api_prefix": "/api",
        "endpoints": state.registry.endpoints().len(),
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// `GET /health`. Degrades to 503 with diagnostics when the backend is
/// unreachable.
pub async fn health(State(state): State<AppState>) -> Response {
    let backend = state.ctx.backend();
    match backend.ping().await {
        Ok(()) => {
            let root_node = state
                .ctx
                .get_node(&EntityId::root())
                .await
                .ok()
                .flatten()
                .is_some();
            let body = json!({
                "status": "healthy",
                "database": backend.name(),
                "root_node": root_node,
                "service": state.service_name,
                "version": state.service_version,
            });
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "health check failed");
            let body = json!({
                "status": "unhealthy",
                "database": "unreachable",
                "root_node": false,
                "service": state.service_name,
                "version": state.service_version,
            });
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
    }
}
