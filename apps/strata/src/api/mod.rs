//! # Strata HTTP API Module
//!
//! This module implements the HTTP REST API server using axum.
//!
//! ## Endpoints
//!
//! - `GET /health`, `GET /v1/health` - Health check
//! - `GET|POST /v1/tenants` - List / create tenants
//! - `GET|PUT|DELETE /v1/tenants/{tenant_id}` - Get / update / delete (`?cascade=`)
//! - `POST /v1/graph/{tenant_id}/nodes` - Upsert a node
//! - `POST /v1/graph/{tenant_id}/nodes/batch` - Upsert nodes all-or-nothing
//! - `GET|DELETE /v1/graph/{tenant_id}/nodes/{node_id}` - Get / delete (`?cascade=`)
//! - `GET /v1/graph/{tenant_id}/nodes/{node_id}/history` - Node versions
//! - `POST /v1/graph/{tenant_id}/edges` - Upsert an edge
//! - `POST /v1/graph/{tenant_id}/edges/batch` - Upsert edges all-or-nothing
//! - `GET|DELETE /v1/graph/{tenant_id}/edges/{edge_id}` - Get / delete
//! - `GET /v1/graph/{tenant_id}/edges/{edge_id}/history` - Edge versions
//! - `POST /v1/graph/{tenant_id}/query` - Execute a query
//! - `GET /v1/graph/{tenant_id}/stats` - Counts and head sequence
//! - `GET /v1/graph/{tenant_id}/export` - Full dump (`?as_of=`)

mod handlers;
mod types;

pub use types::{
    ApiError, ApiResponse, CascadeParams, DeleteResponse, EdgeBatchRequest, EdgeRequest,
    ExportParams, HealthResponse, NodeBatchRequest, NodeRequest, QueryRequest, status_for,
};

use crate::config::ServerConfig;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use std::sync::Arc;
use strata_core::{Engine, StrataError};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state containing the engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build the CORS layer from the configured origins.
///
/// - `["*"]`: allows all origins
/// - empty: localhost only
/// - otherwise: the listed origins; unparsable entries are skipped
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS: Allowing ALL origins. This is insecure for production!");
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(hv) => {
                tracing::info!("CORS: Allowing origin: {}", origin);
                Some(hv)
            }
            Err(e) => {
                tracing::warn!("CORS: Invalid origin '{}': {}", origin, e);
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        if !origins.is_empty() {
            tracing::warn!("CORS: No valid origins configured, defaulting to localhost only");
        }
        return restricted_cors(localhost_origins());
    }
    restricted_cors(allowed)
}

fn localhost_origins() -> Vec<HeaderValue> {
    [
        "http://localhost:3000",
        "http://localhost:8000",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8000",
    ]
    .into_iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect()
}

fn restricted_cors(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. CORS - handles preflight requests
/// 3. Body limit - caps request bodies at `body_limit_bytes`
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let graph = Router::new()
        .route("/nodes", post(handlers::upsert_node_handler))
        .route("/nodes/batch", post(handlers::batch_nodes_handler))
        .route(
            "/nodes/{node_id}",
            get(handlers::get_node_handler).delete(handlers::delete_node_handler),
        )
        .route("/nodes/{node_id}/history", get(handlers::node_history_handler))
        .route("/edges", post(handlers::upsert_edge_handler))
        .route("/edges/batch", post(handlers::batch_edges_handler))
        .route(
            "/edges/{edge_id}",
            get(handlers::get_edge_handler).delete(handlers::delete_edge_handler),
        )
        .route("/edges/{edge_id}/history", get(handlers::edge_history_handler))
        .route("/query", post(handlers::query_handler))
        .route("/stats", get(handlers::stats_handler))
        .route("/export", get(handlers::export_handler));

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/v1/health", get(handlers::health_handler))
        .route(
            "/v1/tenants",
            get(handlers::list_tenants_handler).post(handlers::create_tenant_handler),
        )
        .route(
            "/v1/tenants/{tenant_id}",
            get(handlers::get_tenant_handler)
                .put(handlers::update_tenant_handler)
                .delete(handlers::delete_tenant_handler),
        )
        .nest("/v1/graph/{tenant_id}", graph)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer(&config.cors_origins))
                .layer(axum::extract::DefaultBodyLimit::max(config.body_limit_bytes)),
        )
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server and run until Ctrl+C.
pub async fn run_server(config: &ServerConfig, engine: Engine) -> Result<(), StrataError> {
    let state = AppState::new(engine);
    let router = create_router(state, config);
    let addr = config.addr();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| StrataError::Unavailable(format!("Bind failed on {}: {}", addr, e)))?;

    tracing::info!("Strata HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| StrataError::Unavailable(format!("Server error: {}", e)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
