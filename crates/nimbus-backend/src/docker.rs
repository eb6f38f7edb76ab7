//! Docker Engine API backend.
//!
//! Each call opens a fresh HTTP/1 connection to the daemon (unix socket or
//! TCP), sends one request and drains the response body.

use std::path::PathBuf;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::{
    BackendError, BackendFuture, BackendPhase, ExecutionBackend, UnitDetail, UnitSpec, UnitState,
    UnitSummary,
};

const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// Where the Docker daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerEndpoint {
    Unix(PathBuf),
    /// `host:port`
    Tcp(String),
}

impl DockerEndpoint {
    /// Parse `unix:///path`, `tcp://host:port` or `http://host:port`.
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err("unix endpoint without a socket path".to_string());
            }
            return Ok(DockerEndpoint::Unix(PathBuf::from(path)));
        }
        let addr = s
            .strip_prefix("tcp://")
            .or_else(|| s.strip_prefix("http://"))
            .ok_or_else(|| format!("unsupported docker host: {s}"))?;
        let addr = addr.trim_end_matches('/');
        if addr.is_empty() || !addr.contains(':') {
            return Err(format!("docker host needs host:port: {s}"));
        }
        Ok(DockerEndpoint::Tcp(addr.to_string()))
    }

    /// Explicit value, then `DOCKER_HOST`, then the default socket.
    pub fn resolve(explicit: Option<&str>) -> Result<Self, String> {
        match explicit {
            Some(host) => Self::parse(host),
            None => match std::env::var("DOCKER_HOST") {
                Ok(host) if !host.trim().is_empty() => Self::parse(&host),
                _ => Ok(DockerEndpoint::Unix(PathBuf::from(DEFAULT_SOCKET))),
            },
        }
    }
}

/// Execution backend that drives a Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    endpoint: DockerEndpoint,
}

#[derive(Deserialize)]
struct CreateResponse {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Warnings", default)]
    warnings: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct ListEntry {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Names", default)]
    names: Vec<String>,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "State", default)]
    state: String,
}

#[derive(Deserialize)]
struct InspectResponse {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Config")]
    config: InspectConfig,
    #[serde(rename = "State")]
    state: InspectState,
    #[serde(rename = "HostConfig")]
    host_config: InspectHostConfig,
}

#[derive(Deserialize)]
struct InspectConfig {
    #[serde(rename = "Image", default)]
    image: String,
}

#[derive(Deserialize)]
struct InspectState {
    #[serde(rename = "Status", default)]
    status: String,
}

#[derive(Deserialize)]
struct InspectHostConfig {
    #[serde(rename = "NanoCpus", default)]
    nano_cpus: i64,
    #[serde(rename = "Memory", default)]
    memory: i64,
}

impl DockerBackend {
    pub fn new(endpoint: DockerEndpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &DockerEndpoint {
        &self.endpoint
    }

    /// Send one request and return the status and full body.
    async fn request(
        &self,
        phase: BackendPhase,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(StatusCode, Bytes), BackendError> {
        let err = |e: String| BackendError::new(phase, e);

        let payload = match &body {
            Some(v) => Bytes::from(serde_json::to_vec(v).map_err(|e| err(e.to_string()))?),
            None => Bytes::new(),
        };

        let req = http::Request::builder()
            .method(method)
            .uri(path)
            .header("host", "docker")
            .header("user-agent", "nimbus-backend/0.1")
            .header("content-type", "application/json")
            .body(Full::new(payload))
            .map_err(|e| err(e.to_string()))?;

        debug!(%path, "docker request");

        match &self.endpoint {
            DockerEndpoint::Tcp(addr) => {
                let stream = tokio::net::TcpStream::connect(addr)
                    .await
                    .map_err(|e| err(format!("connect {addr}: {e}")))?;
                send(stream, req).await.map_err(err)
            }
            #[cfg(unix)]
            DockerEndpoint::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path)
                    .await
                    .map_err(|e| err(format!("connect {}: {e}", path.display())))?;
                send(stream, req).await.map_err(err)
            }
            #[cfg(not(unix))]
            DockerEndpoint::Unix(path) => Err(err(format!(
                "unix sockets are not supported on this platform: {}",
                path.display()
            ))),
        }
    }

    /// Like [`request`](Self::request) but turns non-2xx into an error.
    async fn expect_success(
        &self,
        phase: BackendPhase,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Bytes, BackendError> {
        let (status, bytes) = self.request(phase, method, path, body).await?;
        // 304: already started / already stopped.
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            Ok(bytes)
        } else {
            Err(BackendError::new(phase, error_message(status, &bytes)))
        }
    }
}

async fn send<S>(stream: S, req: http::Request<Full<Bytes>>) -> Result<(StatusCode, Bytes), String>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| format!("handshake: {e}"))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| format!("request: {e}"))?;
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| format!("read body: {e}"))?
        .to_bytes();
    Ok((status, body))
}

/// Extract Docker's `{"message": ...}` or fall back to the raw body.
fn error_message(status: StatusCode, body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct DockerError {
        message: String,
    }
    match serde_json::from_slice::<DockerError>(body) {
        Ok(e) => format!("{status}: {}", e.message),
        Err(_) => format!("{status}: {}", String::from_utf8_lossy(body).trim()),
    }
}

/// The image pull endpoint streams JSON progress lines with 200 OK even
/// when the pull fails; the failure shows up as an `error` field.
fn pull_stream_error(body: &[u8]) -> Option<String> {
    String::from_utf8_lossy(body)
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .find_map(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
}

/// Split an image reference into `(repository, tag)`.
///
/// Digest references are passed through whole with no tag.
fn split_image_ref(image: &str) -> (String, Option<String>) {
    if image.contains('@') {
        return (image.to_string(), None);
    }
    let last_slash = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[last_slash..].rfind(':') {
        Some(i) => {
            let at = last_slash + i;
            (image[..at].to_string(), Some(image[at + 1..].to_string()))
        }
        None => (image.to_string(), Some("latest".to_string())),
    }
}

/// Build a request path with a form-encoded query string.
fn with_query<'a>(path: &str, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    if query.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{query}")
    }
}

/// Percent-encode one path segment.
fn path_segment(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Request body for `POST /containers/create`.
fn create_body(spec: &UnitSpec) -> serde_json::Value {
    let mut body = json!({
        "Image": spec.image,
        "HostConfig": {
            "NanoCpus": (spec.cpu * 1e9) as i64,
            "Memory": spec.memory_mb as i64 * 1024 * 1024,
        },
    });
    if !spec.command.is_empty() {
        body["Cmd"] = json!(spec.command);
    }
    body
}

impl ExecutionBackend for DockerBackend {
    fn kind(&self) -> &'static str {
        "docker"
    }

    fn ensure_image<'a>(&'a self, image: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let (repo, tag) = split_image_ref(image);
            let mut query = vec![("fromImage", repo.as_str())];
            if let Some(tag) = tag.as_deref() {
                query.push(("tag", tag));
            }
            let path = with_query("/images/create", query);
            let body = self
                .expect_success(BackendPhase::Image, Method::POST, &path, None)
                .await?;
            if let Some(e) = pull_stream_error(&body) {
                return Err(BackendError::new(BackendPhase::Image, e));
            }
            debug!(%image, "image pulled");
            Ok(())
        })
    }

    fn create_unit<'a>(&'a self, spec: &'a UnitSpec) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let path = with_query("/containers/create", [("name", spec.name.as_str())]);
            let body = self
                .expect_success(
                    BackendPhase::Create,
                    Method::POST,
                    &path,
                    Some(create_body(spec)),
                )
                .await?;
            let created: CreateResponse = serde_json::from_slice(&body)
                .map_err(|e| BackendError::new(BackendPhase::Create, e.to_string()))?;
            for warning in created.warnings.unwrap_or_default() {
                warn!(name = %spec.name, %warning, "docker create warning");
            }
            Ok(created.id)
        })
    }

    fn start_unit<'a>(&'a self, id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("/containers/{}/start", path_segment(id));
            self.expect_success(BackendPhase::Start, Method::POST, &path, None)
                .await
                .map(|_| ())
        })
    }

    fn stop_unit<'a>(&'a self, id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("/containers/{}/stop", path_segment(id));
            self.expect_success(BackendPhase::Stop, Method::POST, &path, None)
                .await
                .map(|_| ())
        })
    }

    fn remove_unit<'a>(&'a self, id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let path = with_query(&format!("/containers/{}", path_segment(id)), [("force", "true")]);
            self.expect_success(BackendPhase::Remove, Method::DELETE, &path, None)
                .await
                .map(|_| ())
        })
    }

    fn list_units(&self) -> BackendFuture<'_, Vec<UnitSummary>> {
        Box::pin(async move {
            let body = self
                .expect_success(BackendPhase::List, Method::GET, "/containers/json?all=true", None)
                .await?;
            let entries: Vec<ListEntry> = serde_json::from_slice(&body)
                .map_err(|e| BackendError::new(BackendPhase::List, e.to_string()))?;
            Ok(entries
                .into_iter()
                .map(|e| UnitSummary {
                    id: e.id,
                    name: e
                        .names
                        .first()
                        .map(|n| n.trim_start_matches('/').to_string())
                        .unwrap_or_default(),
                    image: e.image,
                    state: UnitState::from_runtime(&e.state),
                })
                .collect())
        })
    }

    fn inspect_unit<'a>(&'a self, id: &'a str) -> BackendFuture<'a, UnitDetail> {
        Box::pin(async move {
            let path = format!("/containers/{}/json", path_segment(id));
            let body = self
                .expect_success(BackendPhase::Inspect, Method::GET, &path, None)
                .await?;
            let detail: InspectResponse = serde_json::from_slice(&body)
                .map_err(|e| BackendError::new(BackendPhase::Inspect, e.to_string()))?;
            Ok(UnitDetail {
                id: detail.id,
                name: detail.name.trim_start_matches('/').to_string(),
                image: detail.config.image,
                state: UnitState::from_runtime(&detail.state.status),
                cpu: detail.host_config.nano_cpus as f64 / 1e9,
                memory_mb: (detail.host_config.memory.max(0) as u64) / (1024 * 1024),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the raw request.
    async fn serve_once(status_line: &str, body: &str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let response = format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if buf.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&buf).to_string()
        });
        (addr, handle)
    }

    #[test]
    fn parse_endpoints() {
        assert_eq!(
            DockerEndpoint::parse("unix:///var/run/docker.sock").unwrap(),
            DockerEndpoint::Unix(PathBuf::from("/var/run/docker.sock"))
        );
        assert_eq!(
            DockerEndpoint::parse("tcp://127.0.0.1:2375").unwrap(),
            DockerEndpoint::Tcp("127.0.0.1:2375".to_string())
        );
        assert!(DockerEndpoint::parse("ftp://x").is_err());
        assert!(DockerEndpoint::parse("tcp://nohostport").is_err());
        assert!(DockerEndpoint::parse("unix://").is_err());
    }

    #[test]
    fn explicit_endpoint_wins() {
        assert_eq!(
            DockerEndpoint::resolve(Some("tcp://10.0.0.1:2376")).unwrap(),
            DockerEndpoint::Tcp("10.0.0.1:2376".to_string())
        );
    }

    #[test]
    fn image_refs() {
        assert_eq!(
            split_image_ref("nginx"),
            ("nginx".to_string(), Some("latest".to_string()))
        );
        assert_eq!(
            split_image_ref("nginx:1.25"),
            ("nginx".to_string(), Some("1.25".to_string()))
        );
        assert_eq!(
            split_image_ref("localhost:5000/team/app"),
            ("localhost:5000/team/app".to_string(), Some("latest".to_string()))
        );
        assert_eq!(
            split_image_ref("localhost:5000/team/app:v2"),
            ("localhost:5000/team/app".to_string(), Some("v2".to_string()))
        );
        assert_eq!(split_image_ref("alpine@sha256:abc").1, None);
    }

    #[test]
    fn query_encoding() {
        assert_eq!(
            with_query(
                "/images/create",
                [("fromImage", "localhost:5000/team/app"), ("tag", "v2")]
            ),
            "/images/create?fromImage=localhost%3A5000%2Fteam%2Fapp&tag=v2"
        );
        assert_eq!(with_query("/containers/json", std::iter::empty()), "/containers/json");
        assert_eq!(path_segment("abc/def"), "abc%2Fdef");
        assert_eq!(path_segment("a-b_c.d"), "a-b_c.d");
    }

    #[test]
    fn create_body_converts_units() {
        let spec = UnitSpec {
            image: "nginx".to_string(),
            name: "web".to_string(),
            cpu: 1.5,
            memory_mb: 512,
            command: vec!["sleep".to_string(), "60".to_string()],
        };
        let body = create_body(&spec);
        assert_eq!(body["HostConfig"]["NanoCpus"], 1_500_000_000i64);
        assert_eq!(body["HostConfig"]["Memory"], 512i64 * 1024 * 1024);
        assert_eq!(body["Cmd"][1], "60");

        let bare = create_body(&UnitSpec {
            command: Vec::new(),
            ..spec
        });
        assert!(bare.get("Cmd").is_none());
    }

    #[test]
    fn pull_errors_are_detected() {
        let ok = b"{\"status\":\"Pulling\"}\n{\"status\":\"Done\"}\n";
        assert_eq!(pull_stream_error(ok), None);

        let failed = b"{\"status\":\"Pulling\"}\n{\"error\":\"manifest unknown\"}\n";
        assert_eq!(pull_stream_error(failed).as_deref(), Some("manifest unknown"));
    }

    #[test]
    fn error_message_prefers_docker_message() {
        let msg = error_message(StatusCode::NOT_FOUND, br#"{"message":"No such container: x"}"#);
        assert_eq!(msg, "404 Not Found: No such container: x");
    }

    #[tokio::test]
    async fn create_unit_parses_id() {
        let (addr, server) = serve_once("201 Created", r#"{"Id":"abc123","Warnings":[]}"#).await;
        let backend = DockerBackend::new(DockerEndpoint::Tcp(addr));

        let spec = UnitSpec {
            image: "nginx".to_string(),
            name: "web".to_string(),
            cpu: 1.0,
            memory_mb: 128,
            command: Vec::new(),
        };
        let id = backend.create_unit(&spec).await.unwrap();
        assert_eq!(id, "abc123");

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /containers/create?name=web HTTP/1.1"));
        assert!(raw.contains("\"NanoCpus\":1000000000"));
    }

    #[tokio::test]
    async fn non_success_maps_to_phase_error() {
        let (addr, server) =
            serve_once("404 Not Found", r#"{"message":"No such container: gone"}"#).await;
        let backend = DockerBackend::new(DockerEndpoint::Tcp(addr));

        let err = backend.stop_unit("gone").await.unwrap_err();
        assert_eq!(err.phase, BackendPhase::Stop);
        assert!(err.message.contains("No such container"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connection_refused_is_backend_error() {
        let backend = DockerBackend::new(DockerEndpoint::Tcp("127.0.0.1:1".to_string()));
        let err = backend.start_unit("x").await.unwrap_err();
        assert_eq!(err.phase, BackendPhase::Start);
    }
}
