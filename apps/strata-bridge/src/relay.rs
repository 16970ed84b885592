//! # Relay Router
//!
//! Mirrors the core's route table. Each handler checks the request shape
//! against the strata-core types (path ids, JSON bodies) and then forwards
//! the original request bytes unchanged. Whatever the core answers, status
//! and body, is relayed as is; only transport failures are translated, to
//! `503 Service Unavailable`.
//!
//! Item payloads are also run through the engine's own validators, so a
//! batch the core would refuse never leaves the bridge.

use crate::client::{ClientError, CoreClient, CoreResponse};
use crate::config::{BridgeConfig, DEFAULT_BODY_LIMIT_BYTES};
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, OriginalUri, Path, State, rejection::BytesRejection},
    http::{Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_core::primitives::MAX_BATCH_SIZE;
use strata_core::{
    EdgeId, Ingestor, NewTenant, Node, NodeId, Query, StrataError, TenantId, TenantPatch,
    TimeEdge,
};
use tower_http::trace::TraceLayer;

// =============================================================================
// STATE
// =============================================================================

#[derive(Clone)]
pub struct BridgeState {
    pub client: Arc<CoreClient>,
    /// Largest request body accepted for relay.
    pub body_limit_bytes: usize,
}

impl BridgeState {
    #[must_use]
    pub fn new(client: CoreClient) -> Self {
        Self {
            client: Arc::new(client),
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
        }
    }

    #[must_use]
    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit_bytes = bytes;
        self
    }
}

// =============================================================================
// REQUEST SHAPES
// =============================================================================

/// A request body the bridge parses and checks before relaying.
trait Payload: DeserializeOwned {
    fn check(&self) -> Result<(), StrataError> {
        Ok(())
    }
}

impl Payload for NewTenant {}

impl Payload for TenantPatch {}

#[derive(Deserialize)]
struct NodeBody {
    node: Node,
}

impl Payload for NodeBody {
    fn check(&self) -> Result<(), StrataError> {
        Ingestor::validate_node(&self.node)
    }
}

#[derive(Deserialize)]
struct NodeBatchBody {
    nodes: Vec<Node>,
}

impl Payload for NodeBatchBody {
    fn check(&self) -> Result<(), StrataError> {
        check_batch_len(self.nodes.len())?;
        self.nodes
            .iter()
            .enumerate()
            .try_for_each(|(i, node)| Ingestor::validate_node(node).map_err(|e| e.at_index(i)))
    }
}

#[derive(Deserialize)]
struct EdgeBody {
    edge: TimeEdge,
}

impl Payload for EdgeBody {
    fn check(&self) -> Result<(), StrataError> {
        Ingestor::validate_edge(&self.edge)
    }
}

#[derive(Deserialize)]
struct EdgeBatchBody {
    edges: Vec<TimeEdge>,
}

impl Payload for EdgeBatchBody {
    fn check(&self) -> Result<(), StrataError> {
        check_batch_len(self.edges.len())?;
        self.edges
            .iter()
            .enumerate()
            .try_for_each(|(i, edge)| Ingestor::validate_edge(edge).map_err(|e| e.at_index(i)))
    }
}

/// Queries are checked for structural limits too.
#[derive(Deserialize)]
struct QueryBody {
    query: Query,
}

impl Payload for QueryBody {
    fn check(&self) -> Result<(), StrataError> {
        self.query.query_type.validate()
    }
}

fn check_batch_len(len: usize) -> Result<(), StrataError> {
    if len > MAX_BATCH_SIZE {
        return Err(StrataError::BadRequest(format!(
            "batch of {} items exceeds the limit of {}",
            len, MAX_BATCH_SIZE
        )));
    }
    Ok(())
}

// =============================================================================
// RESPONSES
// =============================================================================

/// Bridge health. `degraded` while the core cannot be reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeHealth {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<Utc>,
}

fn envelope_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = serde_json::json!({
        "success": false,
        "error": message.into(),
        "timestamp": Utc::now(),
    });
    (status, Json(body)).into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    envelope_error(StatusCode::BAD_REQUEST, message)
}

fn relay_response(core: CoreResponse) -> Response {
    let mut response = Response::new(Body::from(core.body));
    *response.status_mut() = core.status;
    if let Some(content_type) = core.content_type {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type);
    }
    response
}

fn unavailable(err: &ClientError) -> Response {
    tracing::warn!("Core unreachable: {}", err);
    envelope_error(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
}

// =============================================================================
// VALIDATION
// =============================================================================

fn check_tenant(raw: &str) -> Result<(), Response> {
    TenantId::parse(raw)
        .map(|_| ())
        .map_err(|e| bad_request(e.to_string()))
}

fn check_node(raw: &str) -> Result<(), Response> {
    raw.parse::<NodeId>()
        .map(|_| ())
        .map_err(|e| bad_request(e.to_string()))
}

fn check_edge(raw: &str) -> Result<(), Response> {
    raw.parse::<EdgeId>()
        .map(|_| ())
        .map_err(|e| bad_request(e.to_string()))
}

fn check_body<T: Payload>(body: &Bytes) -> Result<T, Response> {
    let payload: T = serde_json::from_slice(body)
        .map_err(|e| bad_request(format!("Invalid request body: {}", e)))?;
    payload.check().map_err(|e| bad_request(e.to_string()))?;
    Ok(payload)
}

/// Oversized or unreadable bodies keep their status but get the envelope.
fn read_body(body: Result<Bytes, BytesRejection>) -> Result<Bytes, Response> {
    body.map_err(|rejection| {
        envelope_error(
            rejection.status(),
            format!("Invalid request body: {}", rejection.body_text()),
        )
    })
}

// =============================================================================
// FORWARDING
// =============================================================================

async fn relay(state: &BridgeState, method: Method, uri: &Uri, body: Option<Bytes>) -> Response {
    let target = uri.path_and_query().map_or_else(|| uri.path(), |pq| pq.as_str());
    tracing::debug!(%method, target, "Relaying to core");
    match state.client.forward(method, target, body).await {
        Ok(core) => relay_response(core),
        Err(err) => unavailable(&err),
    }
}

/// Validate `body` as `T`, then forward the original bytes.
async fn relay_json<T: Payload>(
    state: &BridgeState,
    method: Method,
    uri: &Uri,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match read_body(body) {
        Ok(body) => body,
        Err(rejection) => return rejection,
    };
    if let Err(rejection) = check_body::<T>(&body) {
        return rejection;
    }
    relay(state, method, uri, Some(body)).await
}

// =============================================================================
// HANDLERS
// =============================================================================

pub async fn health_handler(State(state): State<BridgeState>) -> Json<BridgeHealth> {
    let status = match state.client.health().await {
        Ok(true) => "ok",
        Ok(false) => "degraded",
        Err(err) => {
            tracing::warn!("Health check: {}", err);
            "degraded"
        }
    };
    Json(BridgeHealth {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

async fn list_tenants(State(state): State<BridgeState>, OriginalUri(uri): OriginalUri) -> Response {
    relay(&state, Method::GET, &uri, None).await
}

async fn create_tenant(
    State(state): State<BridgeState>,
    OriginalUri(uri): OriginalUri,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    relay_json::<NewTenant>(&state, Method::POST, &uri, body).await
}

async fn tenant_item(
    State(state): State<BridgeState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path(tenant): Path<String>,
) -> Response {
    if let Err(rejection) = check_tenant(&tenant) {
        return rejection;
    }
    relay(&state, method, &uri, None).await
}

async fn update_tenant(
    State(state): State<BridgeState>,
    OriginalUri(uri): OriginalUri,
    Path(tenant): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    if let Err(rejection) = check_tenant(&tenant) {
        return rejection;
    }
    relay_json::<TenantPatch>(&state, Method::PUT, &uri, body).await
}

async fn upsert_node(
    State(state): State<BridgeState>,
    OriginalUri(uri): OriginalUri,
    Path(tenant): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    if let Err(rejection) = check_tenant(&tenant) {
        return rejection;
    }
    relay_json::<NodeBody>(&state, Method::POST, &uri, body).await
}

async fn batch_nodes(
    State(state): State<BridgeState>,
    OriginalUri(uri): OriginalUri,
    Path(tenant): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    if let Err(rejection) = check_tenant(&tenant) {
        return rejection;
    }
    relay_json::<NodeBatchBody>(&state, Method::POST, &uri, body).await
}

async fn node_item(
    State(state): State<BridgeState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path((tenant, node)): Path<(String, String)>,
) -> Response {
    if let Err(rejection) = check_tenant(&tenant).and_then(|()| check_node(&node)) {
        return rejection;
    }
    relay(&state, method, &uri, None).await
}

async fn upsert_edge(
    State(state): State<BridgeState>,
    OriginalUri(uri): OriginalUri,
    Path(tenant): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    if let Err(rejection) = check_tenant(&tenant) {
        return rejection;
    }
    relay_json::<EdgeBody>(&state, Method::POST, &uri, body).await
}

async fn batch_edges(
    State(state): State<BridgeState>,
    OriginalUri(uri): OriginalUri,
    Path(tenant): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    if let Err(rejection) = check_tenant(&tenant) {
        return rejection;
    }
    relay_json::<EdgeBatchBody>(&state, Method::POST, &uri, body).await
}

async fn edge_item(
    State(state): State<BridgeState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path((tenant, edge)): Path<(String, String)>,
) -> Response {
    if let Err(rejection) = check_tenant(&tenant).and_then(|()| check_edge(&edge)) {
        return rejection;
    }
    relay(&state, method, &uri, None).await
}

async fn query(
    State(state): State<BridgeState>,
    OriginalUri(uri): OriginalUri,
    Path(tenant): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    if let Err(rejection) = check_tenant(&tenant) {
        return rejection;
    }
    relay_json::<QueryBody>(&state, Method::POST, &uri, body).await
}

// =============================================================================
// ROUTER
// =============================================================================

/// The bridge router, with the same paths as the core.
pub fn create_router(state: BridgeState) -> Router {
    let body_limit = state.body_limit_bytes;
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/health", get(health_handler))
        .route("/v1/tenants", get(list_tenants).post(create_tenant))
        .route(
            "/v1/tenants/{tenant_id}",
            get(tenant_item)
                .put(update_tenant)
                .delete(tenant_item),
        )
        .route("/v1/graph/{tenant_id}/nodes", post(upsert_node))
        .route("/v1/graph/{tenant_id}/nodes/batch", post(batch_nodes))
        .route(
            "/v1/graph/{tenant_id}/nodes/{node_id}",
            get(node_item).delete(node_item),
        )
        .route("/v1/graph/{tenant_id}/nodes/{node_id}/history", get(node_item))
        .route("/v1/graph/{tenant_id}/edges", post(upsert_edge))
        .route("/v1/graph/{tenant_id}/edges/batch", post(batch_edges))
        .route(
            "/v1/graph/{tenant_id}/edges/{edge_id}",
            get(edge_item).delete(edge_item),
        )
        .route("/v1/graph/{tenant_id}/edges/{edge_id}/history", get(edge_item))
        .route("/v1/graph/{tenant_id}/query", post(query))
        .route("/v1/graph/{tenant_id}/stats", get(tenant_item))
        .route("/v1/graph/{tenant_id}/export", get(tenant_item))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl+C.
pub async fn run_bridge(config: &BridgeConfig, client: CoreClient) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    tracing::info!(
        body_limit_bytes = config.body_limit_bytes,
        "Strata bridge listening on {}, relaying to {}",
        config.addr,
        client.base_url()
    );
    let state = BridgeState::new(client).with_body_limit(config.body_limit_bytes);
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await
}
