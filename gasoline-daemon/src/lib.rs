mod adapters;
pub mod app; // Public for benchmarks
pub mod domain;
mod ports;

use adapters::settings::FileSettingsStore;
use anyhow::{anyhow, Context};
use app::capture::{
    spawn_expiry_sweep, Capture, CaptureConfig, DeliveryOutcome, ExpirySweepHandle,
};
use app::mcp::{McpBridgeError, McpBridgeService};
use app::settings::SettingsHeartbeat;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use domain::capture::{CommandResult, CorrelationId, SettingsUpdate, TrackingUpdate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tracing::{debug, info, warn};

pub const SETTINGS_PATH_ENV: &str = "GASOLINE_SETTINGS_PATH";
const SETTINGS_FILE_NAME: &str = ".gasoline-settings.json";
const SETTINGS_BODY_LIMIT: usize = 10 * 1024;
const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";
const LEGACY_PROTOCOL_VERSION: &str = "2024-11-05";
const PROXY_TIMEOUT: Duration = Duration::from_secs(15);
const STRIPPED_PROXY_HEADERS: &[&str] = &[
    "content-security-policy",
    "content-security-policy-report-only",
    "x-frame-options",
];
// Recomputed by the server for the rewritten response.
const HOP_BY_HOP_HEADERS: &[&str] = &["connection", "transfer-encoding", "content-length"];

type SettingsService = SettingsHeartbeat<FileSettingsStore>;

/// Whether the daemon may fetch arbitrary pages on behalf of the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityMode {
    #[default]
    Standard,
    InsecureProxy,
}

impl SecurityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityMode::Standard => "standard",
            SecurityMode::InsecureProxy => "insecure_proxy",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(SecurityMode::Standard),
            "insecure_proxy" | "insecure-proxy" => Ok(SecurityMode::InsecureProxy),
            other => Err(format!(
                "unknown security mode '{other}' (expected standard|insecure_proxy)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub listen: SocketAddr,
    pub settings_path: PathBuf,
    pub query_timeout: Duration,
    pub security_mode: SecurityMode,
    pub sweep_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 7890)),
            settings_path: default_settings_path(),
            query_timeout: Duration::from_secs(30),
            security_mode: SecurityMode::Standard,
            sweep_interval: Duration::from_millis(250),
        }
    }
}

/// `$GASOLINE_SETTINGS_PATH`, else `~/.gasoline-settings.json`.
pub fn default_settings_path() -> PathBuf {
    if let Some(path) = env::var_os(SETTINGS_PATH_ENV).filter(|value| !value.is_empty()) {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(SETTINGS_FILE_NAME)
}

#[derive(Clone)]
struct AppState {
    capture: Capture,
    mcp: Arc<McpBridgeService>,
    settings: Arc<SettingsService>,
    sweep: ExpirySweepHandle,
    security_mode: SecurityMode,
    http: reqwest::Client,
}

impl AppState {
    fn new(settings: &Settings) -> anyhow::Result<Self> {
        let capture = Capture::new(CaptureConfig {
            query_timeout: settings.query_timeout,
            ..CaptureConfig::default()
        });
        let store = Arc::new(FileSettingsStore::new(settings.settings_path.clone()));
        let http = reqwest::Client::builder()
            .timeout(PROXY_TIMEOUT)
            .no_proxy()
            .build()
            .context("building insecure-proxy HTTP client")?;
        Ok(Self {
            mcp: Arc::new(McpBridgeService::new(capture.clone())),
            settings: Arc::new(SettingsHeartbeat::new(capture.clone(), store)),
            sweep: spawn_expiry_sweep(capture.clone(), Some(settings.sweep_interval)),
            security_mode: settings.security_mode,
            capture,
            http,
        })
    }
}

pub async fn run(settings: Settings) -> anyhow::Result<()> {
    if settings.query_timeout.is_zero() {
        return Err(anyhow!("query timeout must be greater than zero"));
    }
    let state = AppState::new(&settings)?;
    state.settings.load_from_disk().await;

    let app = router(state.clone());
    let listener = TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("binding {}", settings.listen))?;
    info!(
        listening = %settings.listen,
        settings_path = %settings.settings_path.display(),
        security_mode = %settings.security_mode,
        query_timeout_ms = settings.query_timeout.as_millis() as u64,
        "gasoline daemon started"
    );

    let capture = state.capture.clone();
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // In-flight tool calls would otherwise hold the server open until
            // their deadlines.
            let cancelled = capture.cancel_all("daemon shutting down");
            info!(cancelled, "cancelled in-flight commands");
        })
        .await?;

    state.sweep.shutdown().await;
    state.settings.shutdown().await;
    info!("gasoline daemon stopped");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/mcp", post(mcp_http))
        .route(
            "/settings",
            get(get_settings)
                .post(post_settings)
                .options(preflight)
                .layer(DefaultBodyLimit::max(SETTINGS_BODY_LIMIT)),
        )
        .route(
            "/api/extension-status",
            get(get_extension_status)
                .post(post_extension_status)
                .options(preflight),
        )
        .route("/pilot-status", get(pilot_status))
        .route("/pending-queries", get(pending_queries))
        .route("/command-result", post(command_result).options(preflight))
        .route("/insecure-proxy", get(insecure_proxy))
        .with_state(state)
}

async fn shutdown_signal() {
    let _ = ctrl_c().await;
    info!("msg" = "shutdown signal received");
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn preflight() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [
            ("access-control-allow-origin", "*"),
            ("access-control-allow-methods", "GET, POST, OPTIONS"),
            ("access-control-allow-headers", "content-type"),
        ],
    )
}

async fn get_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.settings.view())
}

async fn post_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    debug!(headers = ?redacted_headers(&headers), "settings heartbeat received");
    let update: SettingsUpdate = serde_json::from_slice(&body)
        .map_err(|err| ApiError::invalid("invalid_settings", err.to_string()))?;
    let applied = state.settings.apply(&update);
    Ok(Json(json!({
        "status": "ok",
        "timestamp": applied.snapshot.timestamp.to_rfc3339(),
    })))
}

async fn get_extension_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.capture.tracking_status(Utc::now()))
}

async fn post_extension_status(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let update: TrackingUpdate = serde_json::from_slice(&body)
        .map_err(|err| ApiError::invalid("invalid_status", err.to_string()))?;
    state.capture.update_tracking(update);
    Ok(Json(json!({"status": "ok"})))
}

async fn pilot_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.capture.pilot_status(Utc::now()))
}

async fn pending_queries(State(state): State<AppState>) -> impl IntoResponse {
    let commands = state.capture.drain_pending();
    if !commands.is_empty() {
        debug!(count = commands.len(), "handing commands to extension");
    }
    Json(commands)
}

#[derive(Debug, Deserialize)]
struct CommandResultRequest {
    correlation_id: CorrelationId,
    #[serde(flatten)]
    result: CommandResult,
}

async fn command_result(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: CommandResultRequest = serde_json::from_slice(&body)
        .map_err(|err| ApiError::invalid("invalid_result", err.to_string()))?;
    let status = match state.capture.deliver(&request.correlation_id, request.result) {
        DeliveryOutcome::Resolved => "ok",
        DeliveryOutcome::Unknown => "ignored",
    };
    Ok(Json(json!({"status": status})))
}

#[derive(Debug, Deserialize)]
struct ProxyQuery {
    url: Option<String>,
}

async fn insecure_proxy(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
) -> Result<Response, ApiError> {
    if state.security_mode != SecurityMode::InsecureProxy {
        return Err(ApiError::forbidden(
            "insecure_proxy_disabled",
            "insecure proxy requires --security-mode insecure_proxy",
        ));
    }
    let raw = query
        .url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| ApiError::invalid("missing_url", "query parameter 'url' is required"))?;
    let target = reqwest::Url::parse(&raw)
        .map_err(|err| ApiError::invalid("invalid_url", err.to_string()))?;
    if !matches!(target.scheme(), "http" | "https") {
        return Err(ApiError::invalid(
            "invalid_url",
            format!("unsupported scheme '{}'", target.scheme()),
        ));
    }

    warn!(url = %target, "proxying request with security headers stripped");
    let upstream = state
        .http
        .get(target)
        .send()
        .await
        .map_err(|err| ApiError::bad_gateway("proxy_fetch_failed", err.to_string()))?;
    let status = upstream.status();
    let mut headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        let lower = name.as_str();
        if STRIPPED_PROXY_HEADERS.contains(&lower) || HOP_BY_HOP_HEADERS.contains(&lower) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );
    let body = upstream
        .bytes()
        .await
        .map_err(|err| ApiError::bad_gateway("proxy_read_failed", err.to_string()))?;
    Ok((status, headers, body).into_response())
}

/// Header list safe to log: credentials-bearing values are masked.
fn redacted_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name = name.as_str().to_string();
            let sensitive = ["auth", "token", "cookie"]
                .iter()
                .any(|needle| name.contains(needle));
            let value = if sensitive {
                "[redacted]".to_string()
            } else {
                value.to_str().unwrap_or("<binary>").to_string()
            };
            (name, value)
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn reply(id: Value, outcome: Result<Value, JsonRpcError>) -> Self {
        match outcome {
            Ok(result) => Self {
                jsonrpc: "2.0",
                id,
                result: Some(result),
                error: None,
            },
            Err(error) => Self {
                jsonrpc: "2.0",
                id,
                result: None,
                error: Some(error),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl JsonRpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    protocol_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    match requested {
        Some(LEGACY_PROTOCOL_VERSION) => LEGACY_PROTOCOL_VERSION,
        _ => LATEST_PROTOCOL_VERSION,
    }
}

async fn mcp_http(State(state): State<AppState>, body: Bytes) -> Response {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            warn!(%err, "invalid JSON-RPC payload");
            let error = JsonRpcError::new(-32700, format!("Parse error: {err}"));
            return Json(JsonRpcResponse::reply(Value::Null, Err(error))).into_response();
        }
    };

    if request.jsonrpc != "2.0" {
        let error = JsonRpcError::new(-32600, "Invalid JSON-RPC version");
        let id = request.id.unwrap_or(Value::Null);
        return Json(JsonRpcResponse::reply(id, Err(error))).into_response();
    }

    // Notifications get no response body.
    let Some(id) = request.id else {
        debug!(method = %request.method, "notification received");
        return StatusCode::ACCEPTED.into_response();
    };

    let outcome = match request.method.as_str() {
        "initialize" => {
            let params: InitializeParams = request
                .params
                .and_then(|value| serde_json::from_value(value).ok())
                .unwrap_or_default();
            let version = negotiate_protocol_version(params.protocol_version.as_deref());
            info!(
                requested = ?params.protocol_version,
                negotiated = version,
                "MCP session initialized"
            );
            Ok(json!({
                "protocolVersion": version,
                "serverInfo": {
                    "name": "gasoline",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": {
                    "tools": {
                        "listChanged": false
                    }
                }
            }))
        }
        "tools/list" => Ok(state.mcp.list_tools()),
        "tools/call" => {
            let params_value = request.params.unwrap_or(Value::Null);
            match serde_json::from_value::<ToolCallParams>(params_value) {
                Ok(params) => {
                    info!(tool = %params.name, "tool call");
                    state
                        .mcp
                        .call_tool(&params.name, params.arguments)
                        .await
                        .map(|output| output.into_result())
                        .map_err(map_mcp_error)
                }
                Err(err) => Err(map_mcp_error(McpBridgeError::Protocol(format!(
                    "invalid tools/call params: {err}"
                )))),
            }
        }
        "ping" => Ok(json!({})),
        _ => Err(map_mcp_error(McpBridgeError::UnsupportedTool(
            request.method,
        ))),
    };
    Json(JsonRpcResponse::reply(id, outcome)).into_response()
}

fn map_mcp_error(err: McpBridgeError) -> JsonRpcError {
    match err {
        McpBridgeError::Protocol(message) => JsonRpcError::new(-32602, message),
        McpBridgeError::UnsupportedTool(tool) => {
            JsonRpcError::new(-32601, format!("Unsupported method/tool: {tool}"))
        }
        McpBridgeError::Internal(message) => JsonRpcError::new(-32603, message),
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn invalid(code: &'static str, err: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, code, err)
    }

    fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::FORBIDDEN, code, message)
    }

    fn bad_gateway(code: &'static str, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_GATEWAY, code, message)
    }

    fn with_status(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status;
        let body = Json(self.body);
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::capture::CommandKind;
    use axum::body::Body;
    use axum::http::Request;
    use futures::TryStreamExt;
    use serde_json::Map;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state(temp: &TempDir, security_mode: SecurityMode) -> AppState {
        let settings = Settings {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            settings_path: temp.path().join(SETTINGS_FILE_NAME),
            query_timeout: Duration::from_millis(200),
            security_mode,
            sweep_interval: Duration::from_millis(50),
        };
        AppState::new(&settings).unwrap()
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = body.map(|value| value.to_string()).unwrap_or_default();
        send_raw(app, method, uri, body).await
    }

    async fn send_raw(app: Router, method: &str, uri: &str, body: String) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response
            .into_body()
            .into_data_stream()
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn rpc(id: u64, method: &str, params: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let temp = TempDir::new().unwrap();
        let app = router(test_state(&temp, SecurityMode::Standard));
        let (status, body) = send(app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn settings_round_trip_and_validation() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp, SecurityMode::Standard);

        let (status, body) = send_raw(router(state.clone()), "POST", "/settings", "{nope".into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_settings");

        let (status, body) = send(
            router(state.clone()),
            "POST",
            "/settings",
            Some(json!({"session_id": "s-1", "settings": {"aiWebPilotEnabled": true}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (_, body) = send(router(state.clone()), "GET", "/settings", None).await;
        assert_eq!(body["ai_web_pilot_enabled"], true);
        assert_eq!(body["session_id"], "s-1");

        let (status, _) = send(router(state.clone()), "OPTIONS", "/settings", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(router(state), "DELETE", "/settings", None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn oversized_settings_body_is_rejected() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp, SecurityMode::Standard);
        let padding = "x".repeat(SETTINGS_BODY_LIMIT + 1);
        let body = json!({"session_id": padding, "settings": {}}).to_string();
        let (status, _) = send_raw(router(state.clone()), "POST", "/settings", body).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(state.settings.view().session_id.is_none());
    }

    #[tokio::test]
    async fn pending_queries_drain_and_mark_poll() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp, SecurityMode::Standard);
        let id = state
            .capture
            .enqueue_detached(CommandKind::Refresh, Map::new(), Duration::from_secs(5));

        let (status, body) = send(router(state.clone()), "GET", "/pending-queries", None).await;
        assert_eq!(status, StatusCode::OK);
        let commands = body.as_array().unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0]["correlation_id"], id.as_str());
        assert_eq!(commands[0]["kind"], "refresh");

        let (_, body) = send(router(state.clone()), "GET", "/pending-queries", None).await;
        assert_eq!(body, json!([]));

        let (_, body) = send(router(state), "GET", "/pilot-status", None).await;
        assert_eq!(body["source"], "extension_poll");
        assert_eq!(body["extension_connected"], true);
    }

    #[tokio::test]
    async fn command_result_validation_and_unknown_ids() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp, SecurityMode::Standard);

        let (status, _) = send(
            router(state.clone()),
            "POST",
            "/command-result",
            Some(json!({"ok": true})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            router(state.clone()),
            "POST",
            "/command-result",
            Some(json!({"correlation_id": "cmd-none-1", "ok": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ignored");

        let id = state
            .capture
            .enqueue_detached(CommandKind::ExecuteJs, Map::new(), Duration::from_secs(5));
        let (_, body) = send(
            router(state.clone()),
            "POST",
            "/command-result",
            Some(json!({"correlation_id": id, "ok": true, "data": {"value": 2}})),
        )
        .await;
        assert_eq!(body["status"], "ok");
        let record = state.capture.command_record(&id).unwrap();
        assert_eq!(record.data.unwrap()["value"], 2);
    }

    #[tokio::test]
    async fn extension_status_tracks_tab() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp, SecurityMode::Standard);
        let (_, body) = send(router(state.clone()), "GET", "/api/extension-status", None).await;
        assert_eq!(body["extension_connected"], false);

        let (status, _) = send(
            router(state.clone()),
            "POST",
            "/api/extension-status",
            Some(json!({
                "tracking_enabled": true,
                "tracked_tab_id": 42,
                "tracked_tab_url": "https://shop.test/cart",
                "tracked_tab_title": "Cart",
                "extension_version": "5.2.0"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(router(state), "GET", "/api/extension-status", None).await;
        assert_eq!(body["extension_connected"], true);
        assert_eq!(body["tracked_tab_id"], 42);
        assert_eq!(body["extension_version"], "5.2.0");
    }

    #[tokio::test]
    async fn mcp_protocol_errors() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp, SecurityMode::Standard);

        let (status, body) = send_raw(router(state.clone()), "POST", "/mcp", "{".into()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"]["code"], -32700);
        assert_eq!(body["id"], Value::Null);

        let (_, body) = send(
            router(state.clone()),
            "POST",
            "/mcp",
            Some(json!({"jsonrpc": "1.0", "id": 1, "method": "ping"})),
        )
        .await;
        assert_eq!(body["error"]["code"], -32600);

        let (_, body) = send(router(state.clone()), "POST", "/mcp", Some(rpc(2, "resources/list", json!({})))).await;
        assert_eq!(body["error"]["code"], -32601);

        let (_, body) = send(
            router(state.clone()),
            "POST",
            "/mcp",
            Some(rpc(3, "tools/call", json!({"name": "no_such_tool"}))),
        )
        .await;
        assert_eq!(body["error"]["code"], -32601);

        let (_, body) = send(router(state), "POST", "/mcp", Some(rpc(4, "tools/call", json!({"arguments": {}})))).await;
        assert_eq!(body["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn mcp_notifications_are_accepted_without_body() {
        let temp = TempDir::new().unwrap();
        let app = router(test_state(&temp, SecurityMode::Standard));
        let (status, body) = send(
            app,
            "POST",
            "/mcp",
            Some(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn initialize_negotiates_protocol_version() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp, SecurityMode::Standard);
        for (requested, expected) in [
            (json!("2024-11-05"), LEGACY_PROTOCOL_VERSION),
            (json!("2025-06-18"), LATEST_PROTOCOL_VERSION),
            (json!("1999-01-01"), LATEST_PROTOCOL_VERSION),
        ] {
            let (_, body) = send(
                router(state.clone()),
                "POST",
                "/mcp",
                Some(rpc(1, "initialize", json!({"protocolVersion": requested}))),
            )
            .await;
            assert_eq!(body["result"]["protocolVersion"], expected);
            assert_eq!(body["result"]["serverInfo"]["name"], "gasoline");
        }
    }

    #[tokio::test]
    async fn tools_call_returns_tool_errors_as_content() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp, SecurityMode::Standard);
        let (_, body) = send(
            router(state.clone()),
            "POST",
            "/mcp",
            Some(rpc(9, "tools/call", json!({"name": "interact", "arguments": {"action": "refresh"}}))),
        )
        .await;
        assert_eq!(body["id"], 9);
        assert_eq!(body["result"]["isError"], true);
        let text = body["result"]["content"][0]["text"].as_str().unwrap();
        let payload: Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["error"], "extension_not_connected");

        let (_, body) = send(router(state), "POST", "/mcp", Some(rpc(10, "tools/list", json!({})))).await;
        assert_eq!(body["result"]["tools"].as_array().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn insecure_proxy_is_forbidden_in_standard_mode() {
        let temp = TempDir::new().unwrap();
        let app = router(test_state(&temp, SecurityMode::Standard));
        let (status, body) = send(app, "GET", "/insecure-proxy?url=http://127.0.0.1:1/", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "insecure_proxy_disabled");
    }

    #[tokio::test]
    async fn insecure_proxy_strips_frame_and_csp_headers() {
        let upstream = Router::new().route(
            "/page",
            get(|| async {
                (
                    [
                        ("content-security-policy", "default-src 'none'"),
                        ("x-frame-options", "DENY"),
                        ("x-upstream", "kept"),
                    ],
                    "<html>hello</html>",
                )
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, upstream).await.unwrap();
        });

        let temp = TempDir::new().unwrap();
        let state = test_state(&temp, SecurityMode::InsecureProxy);
        let response = router(state.clone())
            .oneshot(
                Request::builder()
                    .uri(format!("/insecure-proxy?url=http://{addr}/page"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert!(headers.get("content-security-policy").is_none());
        assert!(headers.get("x-frame-options").is_none());
        assert_eq!(headers.get("x-upstream").unwrap(), "kept");
        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");

        let (status, _) = send(router(state), "GET", "/insecure-proxy?url=file:///etc/passwd", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        server.abort();
    }

    #[test]
    fn sensitive_headers_are_redacted() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        headers.insert("x-api-token", HeaderValue::from_static("t0k3n"));
        headers.insert("cookie", HeaderValue::from_static("sid=1"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let redacted = redacted_headers(&headers);
        for (name, value) in &redacted {
            if name == "content-type" {
                assert_eq!(value, "application/json");
            } else {
                assert_eq!(value, "[redacted]", "{name} leaked");
            }
        }
        assert_eq!(redacted.len(), 4);
    }

    #[test]
    fn security_mode_parses_both_spellings() {
        assert_eq!("standard".parse::<SecurityMode>().unwrap(), SecurityMode::Standard);
        assert_eq!(
            "insecure-proxy".parse::<SecurityMode>().unwrap(),
            SecurityMode::InsecureProxy
        );
        assert!("open".parse::<SecurityMode>().is_err());
    }

    #[test]
    fn bridge_errors_map_to_json_rpc_codes() {
        let cases = [
            (McpBridgeError::Protocol("bad".into()), -32602),
            (McpBridgeError::UnsupportedTool("nope".into()), -32601),
            (McpBridgeError::Internal("boom".into()), -32603),
        ];
        for (err, code) in cases {
            assert_eq!(map_mcp_error(err).code, code);
        }
    }
}
