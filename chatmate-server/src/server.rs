//! Axum server setup and router configuration.

use crate::state::AppState;
use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
}

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    store: &'static str,
    streams: usize,
    tracked_sanctions: usize,
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let streams = state.streams.read().await.streams.len();
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        store: state.store.kind(),
        streams,
        tracked_sanctions: state.sanctions.tracked().len(),
    })
}

/// Run the server until `shutdown` completes.
pub async fn run_server(
    router: Router,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chatmate_core::clock::SystemClock;
    use chatmate_core::config::{ConfigStore, StreamConfig, StreamsConfig};
    use chatmate_core::processors::SanctionScheduler;
    use chatmate_core::store::MemoryEventStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_reports_store_and_streams() {
        let state = AppState::new(
            Arc::new(MemoryEventStore::new()),
            SanctionScheduler::new(Arc::new(SystemClock), Duration::from_secs(300)),
            ConfigStore::new(StreamsConfig {
                streams: vec![StreamConfig::new("abc"), StreamConfig::new("def")],
            }),
        );

        let response = build_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["store"], "memory");
        assert_eq!(json["streams"], 2);
        assert_eq!(json["tracked_sanctions"], 0);
    }
}
