//! Web server — WebSocket fan-out endpoint plus a small JSON API.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use http::header::{self, HeaderValue};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::db::SqliteStore;
use crate::hub::HubHandle;
use crate::ingest::IngestStats;

pub mod routes;
pub mod ws;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub hub: HubHandle,
    pub store: SqliteStore,
    pub stats: Arc<IngestStats>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", axum::routing::get(ws::ws_upgrade))
        .route("/health", axum::routing::get(routes::health))
        .route("/api/stats", axum::routing::get(routes::api_stats))
        .route(
            "/api/vehicles/:id/locations",
            axum::routing::get(routes::api_vehicle_locations),
        )
        .with_state(state)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(cors)
}

/// Serve `state` on `addr` until ctrl-c.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::hub::tests::mock_connection;
    use crate::hub::{ConnectionId, Hub};

    fn test_state() -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db").to_str().unwrap().to_string();
        let (hub, handle) = Hub::new(8, Duration::from_millis(200));
        tokio::spawn(hub.run());
        let state = Arc::new(AppState {
            hub: handle,
            store: SqliteStore::open(&db_path).unwrap(),
            stats: Arc::new(IngestStats::default()),
        });
        (state, dir)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _dir) = test_state();
        let (status, json) = get_json(build_router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);
    }

    #[tokio::test]
    async fn test_api_stats_counts_connections() {
        let (state, _dir) = test_state();
        let (conn, _peer) = mock_connection(false);
        state.hub.register(ConnectionId::new(), conn);

        let (status, json) = get_json(build_router(state), "/api/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["connections"], 1);
        assert_eq!(json["ingest"]["received"], 0);
    }

    #[tokio::test]
    async fn test_cache_control_header() {
        let (state, _dir) = test_state();
        let response = build_router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    }

    #[tokio::test]
    async fn test_vehicle_locations() {
        let (state, _dir) = test_state();
        state.store.add_vehicle("bus-42", None).unwrap();
        state.store.insert_location("bus-42", 9.93, -84.08).unwrap();
        state.store.insert_location("bus-42", 9.94, -84.09).unwrap();

        let (status, json) =
            get_json(build_router(state), "/api/vehicles/bus-42/locations?limit=1").await;
        assert_eq!(status, StatusCode::OK);
        let rows = json.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["lat"], 9.94);
    }

    #[tokio::test]
    async fn test_vehicle_locations_unknown_vehicle() {
        let (state, _dir) = test_state();
        let (status, json) = get_json(build_router(state), "/api/vehicles/ghost/locations").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_ws_without_upgrade_is_server_error() {
        let (state, _dir) = test_state();
        let response = build_router(state.clone())
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(state.hub.connection_count().await, 0);
    }
}
