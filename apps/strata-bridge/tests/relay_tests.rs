//! Relay tests: the bridge in front of a real core router bound to an
//! ephemeral port.

#![allow(clippy::unwrap_used, clippy::panic)]

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{Value, json};
use std::time::Duration;
use strata::api::AppState;
use strata::config::ServerConfig;
use strata_bridge::{BridgeHealth, BridgeState, CoreClient, create_router};
use strata_core::{Engine, EngineConfig};

// =============================================================================
// HELPERS
// =============================================================================

/// Serve a fresh in-memory core on 127.0.0.1 and return its base URL.
async fn spawn_core() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(Engine::in_memory(EngineConfig::default()));
    let router = strata::api::create_router(state, &ServerConfig::default());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A base URL nothing listens on.
async fn dead_core() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// A base URL that accepts connections and never answers.
async fn silent_core() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{}", addr)
}

fn bridge(core_url: String) -> TestServer {
    let client = CoreClient::new(core_url, Duration::from_secs(5)).unwrap();
    TestServer::new(create_router(BridgeState::new(client))).unwrap()
}

async fn bridge_with_core() -> TestServer {
    bridge(spawn_core().await)
}

async fn create_tenant(server: &TestServer, id: &str) {
    server
        .post("/v1/tenants")
        .json(&json!({"id": id}))
        .await
        .assert_status_ok();
}

async fn upsert(server: &TestServer, tenant: &str, alias: &str) -> String {
    let body: Value = server
        .post(&format!("/v1/graph/{}/nodes", tenant))
        .json(&json!({"node": {"id_alias": alias, "label": "Person"}}))
        .await
        .json();
    body["data"]["id"].as_str().unwrap().to_string()
}

// =============================================================================
// HEALTH
// =============================================================================

#[tokio::test]
async fn test_health_ok_when_core_up() {
    let server = bridge_with_core().await;

    for path in ["/health", "/v1/health"] {
        let response = server.get(path).await;
        response.assert_status_ok();
        let health: BridgeHealth = response.json();
        assert_eq!(health.status, "ok");
    }
}

#[tokio::test]
async fn test_health_degraded_when_core_down() {
    let server = bridge(dead_core().await);

    let response = server.get("/health").await;
    response.assert_status_ok();
    let health: BridgeHealth = response.json();
    assert_eq!(health.status, "degraded");
}

// =============================================================================
// TRANSPORT FAILURES
// =============================================================================

#[tokio::test]
async fn test_transport_failure_is_503() {
    let server = bridge(dead_core().await);

    let response = server.get("/v1/tenants").await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["success"], json!(false));
    assert!(body["error"].as_str().unwrap().contains("Cannot connect"));
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_core_timeout_is_503() {
    let client = CoreClient::new(silent_core().await, Duration::from_millis(100)).unwrap();
    let server = TestServer::new(create_router(BridgeState::new(client))).unwrap();

    let response = server.get("/v1/tenants").await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["success"], json!(false));
    assert!(body["error"].as_str().unwrap().contains("did not respond"));
    assert!(body["timestamp"].is_string());
}

// =============================================================================
// VERBATIM RELAY
// =============================================================================

#[tokio::test]
async fn test_core_errors_relayed_with_status_and_body() {
    let server = bridge_with_core().await;
    create_tenant(&server, "acme").await;

    let response = server.post("/v1/tenants").json(&json!({"id": "acme"})).await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["success"], json!(false));
    assert!(body["error"].as_str().unwrap().contains("acme"));

    server
        .get("/v1/tenants/ghost")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_query_string_relayed() {
    let server = bridge_with_core().await;
    create_tenant(&server, "t1").await;
    upsert(&server, "t1", "alice").await;

    server
        .delete("/v1/tenants/t1")
        .await
        .assert_status(StatusCode::CONFLICT);
    server
        .delete("/v1/tenants/t1")
        .add_query_param("cascade", "true")
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_query_round_trip() {
    let server = bridge_with_core().await;
    create_tenant(&server, "t1").await;
    let alice = upsert(&server, "t1", "alice").await;
    let bob = upsert(&server, "t1", "bob").await;

    server
        .post("/v1/graph/t1/edges")
        .json(&json!({"edge": {
            "from_node_id": alice,
            "to_node_id": bob,
            "kind": "knows",
            "valid_from": "2024-01-01T00:00:00Z"
        }}))
        .await
        .assert_status_ok();

    let response = server
        .post("/v1/graph/t1/query")
        .json(&json!({"query": {
            "type": "traverse",
            "start": [{"alias": "alice"}],
            "time": {"as_of": "2024-06-01T00:00:00Z"}
        }}))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["edges"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["nodes"].as_array().unwrap().len(), 2);
}

// =============================================================================
// SHAPE VALIDATION
// =============================================================================

#[tokio::test]
async fn test_malformed_body_stops_at_bridge() {
    let server = bridge_with_core().await;
    create_tenant(&server, "t1").await;

    let response = server
        .post("/v1/graph/t1/nodes")
        .json(&json!({"label": "Person"}))
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().starts_with("Invalid request body"));

    let stats: Value = server.get("/v1/graph/t1/stats").await.json();
    assert_eq!(stats["data"]["head"], json!(0));
}

#[tokio::test]
async fn test_bad_path_ids_rejected() {
    let server = bridge_with_core().await;

    server
        .get("/v1/tenants/not%20valid")
        .await
        .assert_status_bad_request();
    server
        .get("/v1/graph/t1/nodes/42")
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn test_query_limits_checked_at_bridge() {
    let server = bridge(dead_core().await);

    // Rejected before any transport attempt, so no 503.
    let response = server
        .post("/v1/graph/t1/query")
        .json(&json!({"query": {"type": "traverse", "start": [], "max_depth": 2}}))
        .await;
    response.assert_status_bad_request();
}

// =============================================================================
// BODY LIMIT
// =============================================================================

#[tokio::test]
async fn test_batch_over_two_megabytes_relayed() {
    let server = bridge_with_core().await;
    create_tenant(&server, "t1").await;

    let bio = "x".repeat(2500);
    let nodes: Vec<Value> = (0..1000)
        .map(|i| json!({"id_alias": format!("n{}", i), "label": "Person", "props": {"bio": bio}}))
        .collect();
    let batch = json!({ "nodes": nodes });
    assert!(serde_json::to_vec(&batch).unwrap().len() > 2 * 1024 * 1024);

    server
        .post("/v1/graph/t1/nodes/batch")
        .json(&batch)
        .await
        .assert_status_ok();

    let stats: Value = server.get("/v1/graph/t1/stats").await.json();
    assert_eq!(stats["data"]["head"], json!(1000));
}

#[tokio::test]
async fn test_oversized_body_gets_envelope() {
    let client = CoreClient::new(dead_core().await, Duration::from_secs(5)).unwrap();
    let state = BridgeState::new(client).with_body_limit(1024);
    let server = TestServer::new(create_router(state)).unwrap();

    let response = server
        .post("/v1/graph/t1/nodes")
        .json(&json!({"node": {"label": "Person", "props": {"bio": "x".repeat(4096)}}}))
        .await;
    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    let body: Value = response.json();
    assert_eq!(body["success"], json!(false));
    assert!(body["error"].as_str().unwrap().starts_with("Invalid request body"));
}

#[tokio::test]
async fn test_invalid_item_stops_at_bridge() {
    let server = bridge(dead_core().await);

    let response = server
        .post("/v1/graph/t1/nodes/batch")
        .json(&json!({"nodes": [{"label": "Person"}, {"label": ""}]}))
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("item 1"));
}
