//! Gateway regression tests.
//!
//! Drives the full router over an in-memory backend: provisioning,
//! placement, termination, listing, validation and TTL expiry.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use nimbus_api::build_router;
use nimbus_backend::{BackendPhase, InMemoryBackend};
use nimbus_core::NimbusConfig;
use nimbus_scheduler::ClusterScheduler;

fn test_cluster() -> (Arc<InMemoryBackend>, Arc<ClusterScheduler>, Router) {
    let config = NimbusConfig::two_node_default();
    let backend = Arc::new(InMemoryBackend::new());
    let scheduler = Arc::new(ClusterScheduler::new(&config.nodes, backend.clone()));
    let router = build_router(scheduler.clone());
    (backend, scheduler, router)
}

fn provision_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/provision")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn provision_places_on_best_fit_node() {
    let (_backend, _scheduler, router) = test_cluster();

    let (status, body) = send(
        &router,
        provision_request(json!({
            "name": "web",
            "image": "nginx:latest",
            "cpu": 1.0,
            "memory": 2048,
            "ttl": ""
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["node_id"], "node1");
    assert_eq!(body["data"]["status"], "running");
    assert_eq!(body["data"]["cpu"], 1.0);
    assert_eq!(body["data"]["memory_mb"], 2048);
}

#[tokio::test]
async fn provision_then_status_then_terminate() {
    let (backend, _scheduler, router) = test_cluster();

    let (_, body) = send(
        &router,
        provision_request(json!({
            "name": "job",
            "image": "alpine:3",
            "cpu": 0.5,
            "memory": 256,
            "ttl": "10m",
            "command": ["sleep", "600"]
        })),
    )
    .await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&router, get(&format!("/status/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["ttl"], "10m0s");

    let (status, body) = send(&router, post(&format!("/terminate/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "terminated");
    assert_eq!(backend.unit_count(), 0);

    let (status, body) = send(&router, get(&format!("/status/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn terminate_unknown_is_not_found() {
    let (_backend, _scheduler, router) = test_cluster();
    let (status, body) = send(&router, post("/terminate/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("does-not-exist"));
}

#[tokio::test]
async fn list_spans_both_nodes() {
    let (_backend, _scheduler, router) = test_cluster();

    let mut ids = Vec::new();
    // 3 cores fit node1 first; the second 3-core request only fits node2.
    for cpu in [3.0, 3.0] {
        let (status, body) = send(
            &router,
            provision_request(json!({"name": "w", "image": "busybox", "cpu": cpu, "memory": 512})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        ids.push(body["data"]["id"].as_str().unwrap().to_string());
    }

    let (status, body) = send(&router, get("/list")).await;
    assert_eq!(status, StatusCode::OK);
    let listed = body["data"].as_array().unwrap();
    assert_eq!(listed.len(), 2);

    let mut nodes: Vec<&str> = listed.iter().map(|w| w["node_id"].as_str().unwrap()).collect();
    nodes.sort();
    assert_eq!(nodes, vec!["node1", "node2"]);

    let mut listed_ids: Vec<String> = listed
        .iter()
        .map(|w| w["id"].as_str().unwrap().to_string())
        .collect();
    listed_ids.sort();
    ids.sort();
    assert_eq!(listed_ids, ids);
}

#[tokio::test]
async fn nodes_report_capacity() {
    let (_backend, _scheduler, router) = test_cluster();
    let (status, body) = send(&router, get("/nodes")).await;
    assert_eq!(status, StatusCode::OK);

    let nodes = body["data"].as_array().unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0]["id"], "node1");
    assert_eq!(nodes[0]["total_cpu"], 4.0);
    assert_eq!(nodes[1]["total_memory_mb"], 16384);
    assert_eq!(nodes[1]["workloads"], 0);
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let (backend, _scheduler, router) = test_cluster();

    let cases = [
        json!({"name": "x", "image": "nginx", "cpu": 1.0, "memory": 512, "ttl": "soon"}),
        json!({"name": "x", "image": "nginx", "cpu": 0.0, "memory": 512}),
        json!({"name": "x", "image": "nginx", "cpu": 1.0, "memory": -1}),
        json!({"name": "x", "image": "", "cpu": 1.0, "memory": 512}),
        json!({"name": "x", "cpu": 1.0, "memory": 512}),
        json!({"name": "x", "image": "nginx", "cpu": "lots", "memory": 512}),
    ];
    for case in cases {
        let (status, body) = send(&router, provision_request(case.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "accepted {case}");
        assert_eq!(body["success"], false);
    }

    let req = Request::builder()
        .method("POST")
        .uri("/provision")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(&router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(backend.unit_count(), 0);
}

#[tokio::test]
async fn oversized_request_is_unavailable() {
    let (_backend, scheduler, router) = test_cluster();
    let (status, body) = send(
        &router,
        provision_request(json!({"name": "huge", "image": "nginx", "cpu": 64.0, "memory": 512})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("no node has capacity"));
    assert!(scheduler.list_all().await.is_empty());
}

#[tokio::test]
async fn backend_failure_is_bad_gateway_and_rolled_back() {
    let (backend, scheduler, router) = test_cluster();
    backend.fail_on(BackendPhase::Start);

    let (status, _) = send(
        &router,
        provision_request(json!({"name": "w", "image": "nginx", "cpu": 1.0, "memory": 512})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(backend.unit_count(), 0);
    for node in scheduler.node_summaries().await {
        assert_eq!(node.used_cpu, 0.0);
        assert_eq!(node.used_memory_mb, 0);
    }
}

#[tokio::test(start_paused = true)]
async fn ttl_workloads_disappear_after_expiry() {
    let (backend, scheduler, router) = test_cluster();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handles = scheduler.start_expiration_sweeps(Duration::from_secs(1), shutdown_rx);

    let (_, body) = send(
        &router,
        provision_request(json!({"name": "t", "image": "nginx", "cpu": 1.0, "memory": 512, "ttl": "2s"})),
    )
    .await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    tokio::time::sleep(Duration::from_millis(3500)).await;

    let (status, _) = send(&router, get(&format!("/status/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(backend.unit_count(), 0);

    let (_, body) = send(&router, get("/nodes")).await;
    for node in body["data"].as_array().unwrap() {
        assert_eq!(node["used_cpu"], 0.0);
        assert_eq!(node["workloads"], 0);
    }

    shutdown_tx.send(true).unwrap();
    for h in handles {
        h.await.unwrap();
    }
}
