//! HTTP entry points and process wiring for the fulfillment services.
//!
//! Exposes catalog administration, order placement and direct settlement as
//! REST endpoints, with structured logging (tracing) and Prometheus metrics.
//! The settlement consumer and the pending-order reconciler run beside the
//! server as background tasks.

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, LogFormat};
pub use state::{AppState, Backends, Services, build_services};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health))
        .route(
            "/products",
            post(routes::products::create).get(routes::products::list),
        )
        .route(
            "/products/{id}",
            get(routes::products::get)
                .put(routes::products::update)
                .delete(routes::products::delete),
        )
        .route(
            "/orders",
            post(routes::orders::create).get(routes::orders::list),
        )
        .route("/orders/{id}", get(routes::orders::get))
        .route(
            "/payments",
            post(routes::payments::create).get(routes::payments::list),
        )
        .route("/payments/{id}", get(routes::payments::get))
        .route(
            "/payments/{id}/transaction",
            post(routes::payments::transaction),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
