//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers.
//!
//! The engine is synchronous: its write sections may wait for up to the
//! configured lock timeout, so every engine call runs on tokio's blocking
//! pool through [`run_blocking`].

use super::{
    AppState,
    types::{
        ApiError, ApiResponse, CascadeParams, DeleteResponse, EdgeBatchRequest, EdgeRequest,
        ExportParams, HealthResponse, NodeBatchRequest, NodeRequest, QueryRequest,
    },
};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
};
use std::sync::Arc;
use strata_core::{
    EdgeId, EdgeVersion, EdgeView, EdgeWrite, Engine, GraphStats, NewTenant, NodeId, NodeVersion,
    NodeView, NodeWrite, QueryResult, StrataError, Tenant, TenantExport, TenantId, TenantPatch,
};
use tracing::{debug, info};

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// =============================================================================
// HELPERS
// =============================================================================

/// Run `f` against the engine on the blocking pool.
async fn run_blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Engine) -> Result<T, StrataError> + Send + 'static,
    T: Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| ApiError::internal(format!("engine task failed: {}", e)))?
        .map_err(ApiError::from)
}

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

fn tenant_id(raw: String) -> Result<TenantId, ApiError> {
    TenantId::parse(raw).map_err(ApiError::from)
}

fn node_id(raw: &str) -> Result<NodeId, ApiError> {
    raw.parse().map_err(ApiError::from)
}

fn edge_id(raw: &str) -> Result<EdgeId, ApiError> {
    raw.parse().map_err(ApiError::from)
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

// =============================================================================
// TENANT HANDLERS
// =============================================================================

pub async fn list_tenants_handler(State(state): State<AppState>) -> ApiResult<Vec<Tenant>> {
    let tenants = run_blocking(&state, |engine| Ok(engine.list_tenants())).await?;
    debug!("Listed {} tenants", tenants.len());
    ok(tenants)
}

pub async fn create_tenant_handler(
    State(state): State<AppState>,
    body: Result<Json<NewTenant>, JsonRejection>,
) -> ApiResult<Tenant> {
    let Json(new) = body?;
    let tenant = run_blocking(&state, move |engine| engine.create_tenant(new)).await?;
    info!(tenant = %tenant.id, model = %tenant.isolation_model, "Created tenant");
    ok(tenant)
}

pub async fn get_tenant_handler(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> ApiResult<Tenant> {
    let id = tenant_id(raw)?;
    ok(run_blocking(&state, move |engine| engine.get_tenant(&id)).await?)
}

pub async fn update_tenant_handler(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    body: Result<Json<TenantPatch>, JsonRejection>,
) -> ApiResult<Tenant> {
    let id = tenant_id(raw)?;
    let Json(patch) = body?;
    let tenant = run_blocking(&state, move |engine| engine.update_tenant(&id, patch)).await?;
    info!(tenant = %tenant.id, status = %tenant.status, "Updated tenant");
    ok(tenant)
}

pub async fn delete_tenant_handler(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    params: Result<Query<CascadeParams>, QueryRejection>,
) -> ApiResult<DeleteResponse> {
    let id = tenant_id(raw)?;
    let Query(CascadeParams { cascade }) = params?;
    let deleted = id.clone();
    run_blocking(&state, move |engine| engine.delete_tenant(&deleted, cascade)).await?;
    info!(tenant = %id, cascade, "Deleted tenant");
    ok(DeleteResponse::new(id))
}

// =============================================================================
// NODE HANDLERS
// =============================================================================

pub async fn upsert_node_handler(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    body: Result<Json<NodeRequest>, JsonRejection>,
) -> ApiResult<NodeWrite> {
    let tenant = tenant_id(raw)?;
    let Json(NodeRequest { node }) = body?;
    ok(run_blocking(&state, move |engine| engine.upsert_node(&tenant, node)).await?)
}

pub async fn batch_nodes_handler(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    body: Result<Json<NodeBatchRequest>, JsonRejection>,
) -> ApiResult<Vec<NodeWrite>> {
    let tenant = tenant_id(raw)?;
    let Json(NodeBatchRequest { nodes }) = body?;
    debug!(tenant = %tenant, items = nodes.len(), "Node batch");
    ok(run_blocking(&state, move |engine| engine.batch_upsert_nodes(&tenant, nodes)).await?)
}

pub async fn get_node_handler(
    State(state): State<AppState>,
    Path((raw, id)): Path<(String, String)>,
) -> ApiResult<NodeView> {
    let tenant = tenant_id(raw)?;
    let id = node_id(&id)?;
    ok(run_blocking(&state, move |engine| engine.get_node(&tenant, id)).await?)
}

pub async fn delete_node_handler(
    State(state): State<AppState>,
    Path((raw, id)): Path<(String, String)>,
    params: Result<Query<CascadeParams>, QueryRejection>,
) -> ApiResult<DeleteResponse> {
    let tenant = tenant_id(raw)?;
    let id = node_id(&id)?;
    let Query(CascadeParams { cascade }) = params?;
    let closed = run_blocking(&state, move |engine| engine.delete_node(&tenant, id, cascade)).await?;
    let mut response = DeleteResponse::new(id);
    response.closed_edges = closed;
    ok(response)
}

pub async fn node_history_handler(
    State(state): State<AppState>,
    Path((raw, id)): Path<(String, String)>,
) -> ApiResult<Vec<NodeVersion>> {
    let tenant = tenant_id(raw)?;
    let id = node_id(&id)?;
    ok(run_blocking(&state, move |engine| engine.node_history(&tenant, id)).await?)
}

// =============================================================================
// EDGE HANDLERS
// =============================================================================

pub async fn upsert_edge_handler(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    body: Result<Json<EdgeRequest>, JsonRejection>,
) -> ApiResult<EdgeWrite> {
    let tenant = tenant_id(raw)?;
    let Json(EdgeRequest { edge }) = body?;
    ok(run_blocking(&state, move |engine| engine.upsert_edge(&tenant, edge)).await?)
}

pub async fn batch_edges_handler(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    body: Result<Json<EdgeBatchRequest>, JsonRejection>,
) -> ApiResult<Vec<EdgeWrite>> {
    let tenant = tenant_id(raw)?;
    let Json(EdgeBatchRequest { edges }) = body?;
    debug!(tenant = %tenant, items = edges.len(), "Edge batch");
    ok(run_blocking(&state, move |engine| engine.batch_upsert_edges(&tenant, edges)).await?)
}

pub async fn get_edge_handler(
    State(state): State<AppState>,
    Path((raw, id)): Path<(String, String)>,
) -> ApiResult<EdgeView> {
    let tenant = tenant_id(raw)?;
    let id = edge_id(&id)?;
    ok(run_blocking(&state, move |engine| engine.get_edge(&tenant, id)).await?)
}

pub async fn delete_edge_handler(
    State(state): State<AppState>,
    Path((raw, id)): Path<(String, String)>,
) -> ApiResult<DeleteResponse> {
    let tenant = tenant_id(raw)?;
    let id = edge_id(&id)?;
    run_blocking(&state, move |engine| engine.delete_edge(&tenant, id)).await?;
    ok(DeleteResponse::new(id))
}

pub async fn edge_history_handler(
    State(state): State<AppState>,
    Path((raw, id)): Path<(String, String)>,
) -> ApiResult<Vec<EdgeVersion>> {
    let tenant = tenant_id(raw)?;
    let id = edge_id(&id)?;
    ok(run_blocking(&state, move |engine| engine.edge_history(&tenant, id)).await?)
}

// =============================================================================
// QUERY, STATS AND EXPORT HANDLERS
// =============================================================================

/// Execute a query against the tenant's current snapshot.
pub async fn query_handler(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<QueryResult> {
    let tenant = tenant_id(raw)?;
    let Json(QueryRequest { query }) = body?;
    let result = run_blocking(&state, move |engine| engine.execute(&tenant, &query)).await?;
    debug!(
        nodes = result.nodes.len(),
        edges = result.edges.len(),
        truncated = result.truncated,
        "Query executed"
    );
    ok(result)
}

pub async fn stats_handler(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> ApiResult<GraphStats> {
    let tenant = tenant_id(raw)?;
    ok(run_blocking(&state, move |engine| engine.stats(&tenant)).await?)
}

/// Full dump of a tenant, optionally narrowed to edges valid `as_of`.
pub async fn export_handler(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    params: Result<Query<ExportParams>, QueryRejection>,
) -> ApiResult<TenantExport> {
    let tenant = tenant_id(raw)?;
    let Query(ExportParams { as_of }) = params?;
    ok(run_blocking(&state, move |engine| engine.export(&tenant, as_of)).await?)
}
