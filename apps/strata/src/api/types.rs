//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API.
//!
//! Every response body is an `ApiResponse` envelope:
//! `{"success": bool, "data"?: T, "error"?: string, "timestamp": rfc3339}`.

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_core::{EdgeId, Node, Query, StrataError, TimeEdge};

// =============================================================================
// RESPONSE ENVELOPE
// =============================================================================

/// Uniform response wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    #[must_use]
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// HTTP status for an engine error.
#[must_use]
pub fn status_for(err: &StrataError) -> StatusCode {
    match err {
        StrataError::NotFound(_) => StatusCode::NOT_FOUND,
        StrataError::Conflict(_) => StatusCode::CONFLICT,
        StrataError::BadRequest(_) => StatusCode::BAD_REQUEST,
        StrataError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        StrataError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        StrataError::Storage(_) | StrataError::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// A failed request, rendered as an error envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }
}

impl From<StrataError> for ApiError {
    fn from(err: StrataError) -> Self {
        Self {
            status: status_for(&err),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(format!("Invalid query string: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(status = %self.status, "{}", self.message);
        } else {
            tracing::debug!(status = %self.status, "{}", self.message);
        }
        (self.status, Json(ApiResponse::<()>::error(self.message))).into_response()
    }
}

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// GRAPH REQUESTS
// =============================================================================

/// `{"node": Node}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRequest {
    pub node: Node,
}

/// `{"nodes": [Node, ...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeBatchRequest {
    pub nodes: Vec<Node>,
}

/// `{"edge": TimeEdge}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRequest {
    pub edge: TimeEdge,
}

/// `{"edges": [TimeEdge, ...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeBatchRequest {
    pub edges: Vec<TimeEdge>,
}

/// `{"query": Query}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: Query,
}

// =============================================================================
// QUERY-STRING PARAMETERS
// =============================================================================

/// `?cascade=true|false` on deletes.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CascadeParams {
    #[serde(default)]
    pub cascade: bool,
}

/// `?as_of=<rfc3339>` on export.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ExportParams {
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

// =============================================================================
// DELETE RESPONSE
// =============================================================================

/// Body of a successful delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub id: String,
    pub deleted: bool,
    /// Edges closed by a node cascade.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub closed_edges: Vec<EdgeId>,
}

impl DeleteResponse {
    #[must_use]
    pub fn new(id: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            deleted: true,
            closed_edges: Vec::new(),
        }
    }
}
