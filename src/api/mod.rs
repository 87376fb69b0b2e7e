//! HTTP health endpoint using Axum
//!
//! - `GET /health`: aggregate report for every registered check
//! - `GET /health?tag=<tag>`: aggregate report for checks carrying `tag`
//! - `GET /health/:unit`: report for one unit
//!
//! Responses are `200 OK` unless the status is `Unhealthy`, which maps to
//! `503 Service Unavailable` so load balancers and probes can act on it.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::health::HealthStatus;
use crate::registry::ServiceRegistry;
use crate::types::UnitKey;

/// Shared state for the health routes.
pub type ApiState = Arc<ServiceRegistry>;

fn status_code(status: HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Degraded | HealthStatus::Healthy => StatusCode::OK,
    }
}

/// Query parameters for the aggregate endpoint
#[derive(Debug, Default, Deserialize)]
pub struct HealthQuery {
    /// Only report checks carrying this tag
    pub tag: Option<String>,
}

/// GET /health
pub async fn get_health(
    State(registry): State<ApiState>,
    Query(query): Query<HealthQuery>,
) -> Response {
    let report = registry.check_tagged(query.tag.as_deref());
    (status_code(report.status), Json(report)).into_response()
}

/// GET /health/:unit
pub async fn get_unit_health(
    State(registry): State<ApiState>,
    Path(unit): Path<String>,
) -> Response {
    match registry.health_check(&UnitKey::new(&unit)) {
        Some(check) => {
            let report = check.check();
            (status_code(report.status), Json(report)).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("no health check for unit '{unit}'") })),
        )
            .into_response(),
    }
}

/// Create the router serving the health endpoints.
pub fn create_app(registry: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/health/:unit", get(get_unit_health))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}
