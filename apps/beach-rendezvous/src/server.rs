use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use rendezvous_bus::{Coordination, LocalBus, RedisBus};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::crypto::Ed25519Verifier;
use crate::registry::SessionRegistry;
use crate::turn::TurnIssuer;
use crate::websocket::websocket_handler;

#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    /// Absent when no recorder is installed (tests).
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
    instance: String,
    active_attempts: usize,
}

/// Build the registry with the bus `config` asks for.
pub async fn build_registry(config: &Config) -> Result<SessionRegistry> {
    let bus: Arc<dyn Coordination> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisBus::connect(url, config.bus_prefix.clone())
                .await
                .context("failed to connect to redis")?,
        ),
        None => {
            info!("REDIS_URL not set; using the in-process bus");
            Arc::new(LocalBus::new())
        }
    };
    Ok(SessionRegistry::new(
        config.instance_id.clone(),
        bus,
        Arc::new(Ed25519Verifier),
        TurnIssuer::new(config.turn_settings()),
        config.registry_settings(),
    ))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(websocket_handler))
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then close every attempt.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = state.registry.clone();
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("shutdown requested; closing attempts");
            registry.shutdown().await;
        })
        .await
        .context("server error")
}

pub async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        instance: state.registry.instance().to_string(),
        active_attempts: state.registry.active_attempts(),
    })
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
