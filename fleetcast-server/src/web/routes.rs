//! REST API route handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::StoreError;
use crate::web::AppState;

#[derive(Deserialize)]
pub struct LocationParams {
    limit: Option<i64>,
}

fn clamp_i64(val: i64, min: i64, max: i64) -> i64 {
    val.max(min).min(max)
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({"ok": true}))
}

/// GET /api/stats — live viewers plus ingest counters.
pub async fn api_stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    let connections = state.hub.connection_count().await;
    Json(json!({
        "connections": connections,
        "ingest": state.stats.snapshot(),
    }))
}

/// GET /api/vehicles/:id/locations — latest stored points, newest first.
pub async fn api_vehicle_locations(
    State(state): State<Arc<AppState>>,
    Path(vehicle_id): Path<String>,
    Query(params): Query<LocationParams>,
) -> impl IntoResponse {
    let limit = clamp_i64(params.limit.unwrap_or(100), 1, 5000);
    let store = state.store.clone();

    let result = tokio::task::spawn_blocking(move || {
        if !store.vehicle_exists(&vehicle_id)? {
            return Err(StoreError::VehicleNotFound(vehicle_id));
        }
        store.recent_locations(&vehicle_id, limit)
    })
    .await
    .map_err(StoreError::from)
    .and_then(|r| r);

    match result {
        Ok(rows) => (StatusCode::OK, Json(json!(rows))),
        Err(e @ StoreError::VehicleNotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": e.to_string()})),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Location query failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": e.to_string()})),
            )
        }
    }
}
