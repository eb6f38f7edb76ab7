//! REST API handlers.
//!
//! Each handler delegates to the `ClusterScheduler` and maps its errors
//! onto HTTP status codes.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::warn;

use nimbus_core::{ContainerSpec, parse_duration};
use nimbus_lifecycle::LifecycleError;
use nimbus_scheduler::SchedulerError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// HTTP status for a scheduler failure.
fn status_for(err: &SchedulerError) -> StatusCode {
    match err {
        SchedulerError::NotFound(_) | SchedulerError::Lifecycle(LifecycleError::NotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        SchedulerError::NoCapacity { .. }
        | SchedulerError::Lifecycle(LifecycleError::InsufficientResources { .. })
        | SchedulerError::Lifecycle(LifecycleError::ReservationFailed(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SchedulerError::Lifecycle(LifecycleError::Backend(_)) => StatusCode::BAD_GATEWAY,
    }
}

fn scheduler_error(err: SchedulerError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(error = %err, status = status.as_u16(), "request failed");
    }
    error_response(&err.to_string(), status)
}

// ── Provisioning ───────────────────────────────────────────────

/// Provision request body.
#[derive(Debug, Deserialize)]
pub struct ProvisionRequest {
    #[serde(default)]
    pub name: String,
    pub image: String,
    pub cpu: f64,
    /// Memory in MB.
    pub memory: i64,
    /// Duration string such as "10s" or "1m30s". Empty means no expiry.
    #[serde(default)]
    pub ttl: Option<String>,
    #[serde(default)]
    pub command: Vec<String>,
}

impl ProvisionRequest {
    /// Validate and convert into a container spec.
    pub fn into_spec(self) -> Result<ContainerSpec, String> {
        if self.image.trim().is_empty() {
            return Err("image must not be empty".to_string());
        }
        if !self.cpu.is_finite() || self.cpu <= 0.0 {
            return Err("cpu must be greater than zero".to_string());
        }
        let memory_mb = u64::try_from(self.memory)
            .ok()
            .filter(|m| *m > 0)
            .ok_or_else(|| "memory must be greater than zero".to_string())?;
        let ttl = match self.ttl.as_deref().map(str::trim) {
            None | Some("") => std::time::Duration::ZERO,
            Some(s) => parse_duration(s)
                .map_err(|e| format!("invalid ttl (example: \"10s\", \"5m\"): {e}"))?,
        };

        Ok(ContainerSpec {
            name: self.name,
            image: self.image,
            cpu: self.cpu,
            memory_mb,
            command: self.command,
            ttl,
        })
    }
}

/// POST /provision
pub async fn provision(
    State(state): State<ApiState>,
    body: Result<Json<ProvisionRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return error_response(&format!("invalid request body: {}", rejection.body_text()), StatusCode::BAD_REQUEST);
        }
    };
    let spec = match req.into_spec() {
        Ok(spec) => spec,
        Err(msg) => return error_response(&msg, StatusCode::BAD_REQUEST),
    };

    match state.scheduler.schedule(spec).await {
        Ok(info) => (StatusCode::CREATED, ApiResponse::ok(info)).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// POST /terminate/{id}
pub async fn terminate(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.scheduler.terminate(&id).await {
        Ok(info) => ApiResponse::ok(info).into_response(),
        Err(e) => scheduler_error(e),
    }
}

// ── Queries ────────────────────────────────────────────────────

/// GET /status/{id}
pub async fn status(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.scheduler.status(&id).await {
        Ok(info) => ApiResponse::ok(info).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// GET /list
pub async fn list(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.scheduler.list_all().await).into_response()
}

/// GET /nodes
pub async fn list_nodes(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.scheduler.node_summaries().await).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use nimbus_backend::{BackendError, BackendPhase, InMemoryBackend};
    use nimbus_core::NodeConfig;
    use nimbus_scheduler::ClusterScheduler;

    fn test_state() -> (Arc<InMemoryBackend>, ApiState) {
        let backend = Arc::new(InMemoryBackend::new());
        let nodes = [NodeConfig {
            id: "node1".to_string(),
            cpu: 2.0,
            memory_mb: 2048,
        }];
        let scheduler = Arc::new(ClusterScheduler::new(&nodes, backend.clone()));
        (backend, ApiState { scheduler })
    }

    fn request(cpu: f64, memory: i64, ttl: Option<&str>) -> ProvisionRequest {
        ProvisionRequest {
            name: "web".to_string(),
            image: "nginx:latest".to_string(),
            cpu,
            memory,
            ttl: ttl.map(str::to_string),
            command: Vec::new(),
        }
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn ttl_parsing() {
        assert_eq!(request(1.0, 1, None).into_spec().unwrap().ttl, Duration::ZERO);
        assert_eq!(request(1.0, 1, Some("")).into_spec().unwrap().ttl, Duration::ZERO);
        assert_eq!(
            request(1.0, 1, Some("1m30s")).into_spec().unwrap().ttl,
            Duration::from_secs(90)
        );
        assert!(request(1.0, 1, Some("ten seconds")).into_spec().is_err());
        assert!(request(1.0, 1, Some("-5s")).into_spec().is_err());
    }

    #[test]
    fn rejects_non_positive_resources() {
        assert!(request(0.0, 512, None).into_spec().is_err());
        assert!(request(-1.0, 512, None).into_spec().is_err());
        assert!(request(f64::NAN, 512, None).into_spec().is_err());
        assert!(request(1.0, 0, None).into_spec().is_err());
        assert!(request(1.0, -512, None).into_spec().is_err());
    }

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(
            status_for(&SchedulerError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&SchedulerError::NoCapacity { cpu: 1.0, memory_mb: 1 }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&SchedulerError::Lifecycle(LifecycleError::ReservationFailed("x".into()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&SchedulerError::Lifecycle(LifecycleError::Backend(BackendError::new(
                BackendPhase::Create,
                "boom"
            )))),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn provision_and_status() {
        let (_backend, state) = test_state();

        let resp = provision(State(state.clone()), Ok(Json(request(1.0, 512, Some("30s"))))).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["node_id"], "node1");
        assert_eq!(body["data"]["ttl"], "30s");
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let resp = status(State(state), Path(id.clone())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["data"]["id"], id.as_str());
    }

    #[tokio::test]
    async fn provision_invalid_is_bad_request() {
        let (backend, state) = test_state();
        let resp = provision(State(state), Ok(Json(request(1.0, 0, None)))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(body.get("data").is_none());
        assert_eq!(backend.unit_count(), 0);
    }

    #[tokio::test]
    async fn provision_without_capacity_is_unavailable() {
        let (_backend, state) = test_state();
        let resp = provision(State(state), Ok(Json(request(4.0, 512, None)))).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn backend_failure_is_bad_gateway() {
        let (backend, state) = test_state();
        backend.fail_on(BackendPhase::Image);
        let resp = provision(State(state), Ok(Json(request(1.0, 512, None)))).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert!(body_json(resp).await["error"].as_str().unwrap().contains("image"));
    }

    #[tokio::test]
    async fn terminate_and_missing() {
        let (_backend, state) = test_state();
        let info = state
            .scheduler
            .schedule(request(1.0, 512, None).into_spec().unwrap())
            .await
            .unwrap();

        let resp = terminate(State(state.clone()), Path(info.id.clone())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["data"]["status"], "terminated");

        let resp = terminate(State(state.clone()), Path(info.id)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = status(State(state), Path("nope".to_string())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_and_nodes() {
        let (_backend, state) = test_state();
        let resp = list(State(state.clone())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["data"], serde_json::json!([]));

        state
            .scheduler
            .schedule(request(0.5, 256, None).into_spec().unwrap())
            .await
            .unwrap();

        let body = body_json(list(State(state.clone())).await).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let body = body_json(list_nodes(State(state)).await).await;
        assert_eq!(body["data"][0]["id"], "node1");
        assert_eq!(body["data"][0]["workloads"], 1);
        assert_eq!(body["data"][0]["used_memory_mb"], 256);
    }
}
