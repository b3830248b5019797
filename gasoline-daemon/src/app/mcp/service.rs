use super::errors::{ToolError, ToolOutput};
use super::params::{self, Args};
use super::{reproduction, tools};
use crate::app::capture::Capture;
use crate::domain::capture::{CommandKind, CorrelationId, ReadinessDecision, WaitOutcome};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const MAX_QUERY_TIMEOUT_MS: u64 = 300_000;

/// Translates MCP tool calls into browser commands and waits for the
/// extension to answer them.
#[derive(Clone)]
pub struct McpBridgeService {
    capture: Capture,
}

#[derive(Debug, Error)]
pub enum McpBridgeError {
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("unsupported tool: {0}")]
    UnsupportedTool(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl McpBridgeService {
    pub fn new(capture: Capture) -> Self {
        Self { capture }
    }

    pub fn list_tools(&self) -> Value {
        tools::catalogue()
    }

    /// Runs one tool. Unknown tool names and internal faults are protocol-level
    /// errors; everything else comes back as tool output with `isError` set.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolOutput, McpBridgeError> {
        let outcome = match tool_name {
            "observe" | "interact" | "configure" | "generate" | "browser_action" | "highlight"
            | "manage_state" | "execute_js" => self.dispatch(tool_name, arguments).await,
            other => return Err(McpBridgeError::UnsupportedTool(other.to_string())),
        };
        match outcome {
            Err(ToolError::Internal(message)) => {
                warn!(tool = tool_name, %message, "tool call hit an internal error");
                Err(McpBridgeError::Internal(message))
            }
            outcome => {
                if let Err(err) = &outcome {
                    warn!(tool = tool_name, kind = err.kind(), %err, "tool call failed");
                }
                Ok(ToolOutput::from(outcome))
            }
        }
    }

    async fn dispatch(&self, tool_name: &str, arguments: Value) -> Result<Value, ToolError> {
        let args = params::decode_arguments(arguments)?;
        match tool_name {
            "observe" => self.observe(&args),
            "configure" => self.configure(&args),
            "generate" => self.generate(&args),
            "interact" => {
                let kind = params::interact_kind(params::required_str(&args, "action")?)?;
                self.command(kind, &args).await
            }
            "browser_action" => {
                let kind = params::browser_action_kind(params::required_str(&args, "action")?)?;
                self.command(kind, &args).await
            }
            "manage_state" => {
                let kind = params::manage_state_kind(params::required_str(&args, "action")?)?;
                self.command(kind, &args).await
            }
            "highlight" => self.command(CommandKind::Highlight, &args).await,
            "execute_js" => self.command(CommandKind::ExecuteJs, &args).await,
            other => Err(ToolError::Internal(format!("no handler for {other}"))),
        }
    }

    async fn command(&self, kind: CommandKind, args: &Args) -> Result<Value, ToolError> {
        let params = params::command_params(kind, args)?;
        let warning = self.ensure_ready()?;

        if kind == CommandKind::ExecuteJs {
            let script_timeout = params
                .get("timeout_ms")
                .and_then(Value::as_u64)
                .unwrap_or(params::DEFAULT_SCRIPT_TIMEOUT_MS);
            let ttl = self.capture.query_timeout() + Duration::from_millis(script_timeout);
            let id = self.capture.enqueue_detached(kind, params, ttl);
            info!(correlation_id = %id, "script queued");
            return Ok(with_warning(
                json!({
                    "status": "queued",
                    "correlation_id": id,
                    "message": format!(
                        "poll observe({{what:'command_result', correlation_id:'{id}'}}) for the result"
                    ),
                }),
                warning,
            ));
        }

        let timeout = self.capture.query_timeout();
        let waiter = self.capture.enqueue(kind, params);
        let correlation_id = waiter.correlation_id().clone();
        debug!(%correlation_id, %kind, "awaiting extension result");
        match waiter.wait().await {
            WaitOutcome::Delivered(result) if result.ok => Ok(with_warning(
                json!({
                    "status": "complete",
                    "action": kind,
                    "correlation_id": correlation_id,
                    "result": result.data,
                }),
                warning,
            )),
            WaitOutcome::Delivered(result) => {
                Err(ToolError::from_extension(correlation_id, result.error))
            }
            WaitOutcome::TimedOut => Err(ToolError::ExtensionTimeout {
                correlation_id,
                timeout,
            }),
            WaitOutcome::Cancelled(reason) => Err(ToolError::Cancelled {
                correlation_id,
                reason,
            }),
        }
    }

    fn ensure_ready(&self) -> Result<Option<String>, ToolError> {
        match self.capture.check_readiness(Utc::now()) {
            ReadinessDecision::Proceed { warning } => Ok(warning),
            ReadinessDecision::RejectNotConnected => Err(ToolError::ExtensionNotConnected),
            ReadinessDecision::RejectPilotDisabled { reason } => {
                Err(ToolError::PilotDisabled(reason))
            }
        }
    }

    fn observe(&self, args: &Args) -> Result<Value, ToolError> {
        let now = Utc::now();
        match params::required_str(args, "what")? {
            "pilot" => to_json(&self.capture.pilot_status(now)),
            "command_result" => {
                let raw = params::required_str(args, "correlation_id")?;
                let id = CorrelationId::new(raw)
                    .map_err(|err| ToolError::invalid("correlation_id", err))?;
                match self.capture.command_record(&id) {
                    Some(record) => to_json(&record),
                    None => Err(ToolError::NotFound(format!(
                        "no command with correlation_id '{id}'"
                    ))),
                }
            }
            "pending_commands" => {
                let commands = self.capture.pending_commands();
                Ok(json!({"count": commands.len(), "commands": commands}))
            }
            "failed_commands" => {
                let commands = self.capture.failed_commands();
                Ok(json!({"count": commands.len(), "commands": commands}))
            }
            "polling" => {
                let entries = self.capture.polling_log();
                Ok(json!({
                    "count": entries.len(),
                    "pilot": self.capture.pilot_status(now),
                    "entries": entries,
                }))
            }
            "tabs" => to_json(&self.capture.tracking_status(now)),
            other => Err(ToolError::invalid(
                "what",
                format!(
                    "'{other}' is not one of pilot, command_result, pending_commands, failed_commands, polling, tabs"
                ),
            )),
        }
    }

    fn configure(&self, args: &Args) -> Result<Value, ToolError> {
        match params::required_str(args, "action")? {
            "health" => Ok(json!({
                "capture": self.capture.health(),
                "pilot": self.capture.pilot_status(Utc::now()),
            })),
            "query_timeout" => {
                let timeout_ms = params::optional_u64(args, "timeout_ms")?
                    .ok_or_else(|| ToolError::missing("timeout_ms"))?;
                if !(1..=MAX_QUERY_TIMEOUT_MS).contains(&timeout_ms) {
                    return Err(ToolError::invalid(
                        "timeout_ms",
                        format!("must be between 1 and {MAX_QUERY_TIMEOUT_MS}"),
                    ));
                }
                let previous = self.capture.query_timeout();
                self.capture
                    .set_query_timeout(Duration::from_millis(timeout_ms));
                info!(timeout_ms, "query timeout updated");
                Ok(json!({
                    "query_timeout_ms": timeout_ms,
                    "previous_ms": previous.as_millis() as u64,
                }))
            }
            "clear_failed" => Ok(json!({"cleared": self.capture.clear_failed()})),
            other => Err(ToolError::invalid(
                "action",
                format!("'{other}' is not one of health, query_timeout, clear_failed"),
            )),
        }
    }

    fn generate(&self, args: &Args) -> Result<Value, ToolError> {
        let completed = self.capture.completed_commands();
        match params::required_str(args, "format")? {
            "reproduction" => Ok(json!({
                "format": "reproduction",
                "command_count": completed.len(),
                "script": reproduction::playwright_script(&completed),
            })),
            "commands" => Ok(json!({
                "format": "commands",
                "count": completed.len(),
                "commands": completed,
            })),
            other => Err(ToolError::invalid(
                "format",
                format!("'{other}' is not one of reproduction, commands"),
            )),
        }
    }
}

fn with_warning(mut payload: Value, warning: Option<String>) -> Value {
    if let (Some(warning), Some(map)) = (warning, payload.as_object_mut()) {
        map.insert("warning".into(), Value::String(warning));
    }
    payload
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|err| ToolError::Internal(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::capture::CaptureConfig;
    use crate::domain::capture::{
        CommandResult, CommandStatus, ExtensionSettings, SettingsUpdate,
    };
    use chrono::Duration as ChronoDuration;
    use serde_json::Map;
    use tokio::task::JoinHandle;

    fn connected(timeout: Duration) -> Capture {
        let capture = Capture::new(CaptureConfig {
            query_timeout: timeout,
            ..CaptureConfig::default()
        });
        capture.set_last_poll_at(Some(Utc::now()));
        capture.set_pilot(true, Some(Utc::now()));
        capture
    }

    /// Answers every queued command with `reply` until aborted.
    fn fake_extension(
        capture: Capture,
        reply: impl Fn(CommandKind) -> CommandResult + Send + 'static,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                for command in capture.drain_pending() {
                    capture.deliver(&command.correlation_id, reply(command.kind));
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    }

    fn payload(output: &ToolOutput) -> &Value {
        &output.payload
    }

    #[tokio::test]
    async fn unknown_tool_is_a_protocol_error() {
        let service = McpBridgeService::new(Capture::default());
        let err = service.call_tool("agent.exec", Value::Null).await.unwrap_err();
        assert!(matches!(err, McpBridgeError::UnsupportedTool(name) if name == "agent.exec"));
    }

    #[tokio::test]
    async fn rejects_when_extension_never_connected() {
        let service = McpBridgeService::new(Capture::default());
        let output = service
            .call_tool("interact", json!({"action": "click", "selector": "#go"}))
            .await
            .unwrap();
        assert!(output.is_error);
        assert_eq!(payload(&output)["error"], "extension_not_connected");
    }

    #[tokio::test]
    async fn validation_runs_before_readiness() {
        let service = McpBridgeService::new(Capture::default());
        let output = service
            .call_tool("interact", json!({"action": "click"}))
            .await
            .unwrap();
        assert_eq!(payload(&output)["error"], "missing_param");

        let output = service.call_tool("interact", json!("{oops")).await.unwrap();
        assert_eq!(payload(&output)["error"], "invalid_json");
    }

    #[tokio::test]
    async fn rejects_when_pilot_disabled() {
        let capture = Capture::default();
        capture.set_last_poll_at(Some(Utc::now()));
        capture.set_pilot(false, Some(Utc::now()));
        let service = McpBridgeService::new(capture.clone());
        let output = service
            .call_tool("highlight", json!({"selector": "h1"}))
            .await
            .unwrap();
        assert_eq!(payload(&output)["error"], "pilot_disabled");
        assert!(capture.pending_commands().is_empty());
    }

    #[tokio::test]
    async fn command_round_trips_through_extension() {
        let capture = connected(Duration::from_secs(5));
        let extension = fake_extension(capture.clone(), |_| {
            CommandResult::success(json!({"clicked": true}).as_object().cloned().unwrap())
        });
        let service = McpBridgeService::new(capture.clone());

        let output = service
            .call_tool("interact", json!({"action": "click", "selector": "#go"}))
            .await
            .unwrap();
        extension.abort();

        assert!(!output.is_error);
        let body = payload(&output);
        assert_eq!(body["status"], "complete");
        assert_eq!(body["action"], "click");
        assert_eq!(body["result"]["clicked"], true);
        assert!(body.get("warning").is_none());
        let id = CorrelationId::new(body["correlation_id"].as_str().unwrap()).unwrap();
        assert_eq!(
            capture.command_record(&id).map(|record| record.status),
            Some(CommandStatus::Complete)
        );
    }

    #[tokio::test]
    async fn stale_poll_adds_warning() {
        let capture = connected(Duration::from_secs(5));
        capture.set_last_poll_at(Some(Utc::now() - ChronoDuration::seconds(30)));
        let extension = fake_extension(capture.clone(), |_| CommandResult::success(Map::new()));
        // Draining refreshes the poll timestamp, so the warning is decided first.
        let service = McpBridgeService::new(capture);
        let output = service
            .call_tool("browser_action", json!({"action": "refresh"}))
            .await
            .unwrap();
        extension.abort();
        assert!(!output.is_error);
        assert!(payload(&output)["warning"]
            .as_str()
            .unwrap()
            .contains("settings heartbeat"));
    }

    async fn wait_until_queued(capture: &Capture) -> CorrelationId {
        tokio::time::timeout(Duration::from_millis(500), async {
            loop {
                if let Some(command) = capture.pending_commands().into_iter().next() {
                    return command.correlation_id;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("command was never queued")
    }

    fn session(id: &str) -> SettingsUpdate {
        SettingsUpdate {
            session_id: Some(id.to_string()),
            settings: ExtensionSettings {
                ai_web_pilot_enabled: Some(true),
            },
        }
    }

    #[tokio::test]
    async fn session_change_cancels_tool_call() {
        let capture = connected(Duration::from_secs(5));
        capture.apply_settings(&session("tab-session-1"));
        let service = McpBridgeService::new(capture.clone());
        let call = tokio::spawn({
            let service = service.clone();
            async move {
                service
                    .call_tool("interact", json!({"action": "click", "selector": "#buy"}))
                    .await
            }
        });
        let id = wait_until_queued(&capture).await;

        let applied = capture.apply_settings(&session("tab-session-2"));
        assert!(applied.session_changed);
        assert_eq!(applied.cancelled, 1);

        let output = call.await.unwrap().unwrap();
        assert!(output.is_error);
        assert_eq!(payload(&output)["error"], "cancelled");
        assert_eq!(payload(&output)["correlation_id"], json!(id));
        let record = capture.command_record(&id).unwrap();
        assert_eq!(record.status, CommandStatus::Cancelled);
    }

    #[tokio::test]
    async fn shutdown_cancels_tool_call() {
        let capture = connected(Duration::from_secs(5));
        let service = McpBridgeService::new(capture.clone());
        let call = tokio::spawn({
            let service = service.clone();
            async move { service.call_tool("highlight", json!({"selector": "h1"})).await }
        });
        let id = wait_until_queued(&capture).await;

        assert_eq!(capture.cancel_all("daemon shutting down"), 1);
        let output = call.await.unwrap().unwrap();
        assert!(output.is_error);
        assert_eq!(payload(&output)["error"], "cancelled");
        assert_eq!(payload(&output)["correlation_id"], json!(id));
        assert!(payload(&output)["message"]
            .as_str()
            .unwrap()
            .contains("daemon shutting down"));
    }

    #[tokio::test]
    async fn extension_failure_becomes_command_failed() {
        let capture = connected(Duration::from_secs(5));
        let extension = fake_extension(capture.clone(), |_| {
            CommandResult::failure("element_not_found", "no element matches #missing")
        });
        let service = McpBridgeService::new(capture.clone());
        let output = service
            .call_tool("interact", json!({"action": "focus", "selector": "#missing"}))
            .await
            .unwrap();
        extension.abort();
        assert!(output.is_error);
        assert_eq!(payload(&output)["error"], "command_failed");
        assert_eq!(payload(&output)["extension_error"], "element_not_found");
        assert_eq!(capture.failed_commands().len(), 1);
    }

    #[tokio::test]
    async fn timeout_reports_correlation_id() {
        let capture = connected(Duration::from_millis(50));
        let service = McpBridgeService::new(capture.clone());
        let output = service
            .call_tool("browser_action", json!({"action": "open", "url": "https://a.test"}))
            .await
            .unwrap();
        assert_eq!(payload(&output)["error"], "extension_timeout");
        let id = CorrelationId::new(payload(&output)["correlation_id"].as_str().unwrap()).unwrap();
        assert_eq!(
            capture.command_record(&id).map(|record| record.status),
            Some(CommandStatus::Timeout)
        );
        assert!(capture.pending_commands().is_empty());
    }

    #[tokio::test]
    async fn execute_js_is_queued_and_observable() {
        let capture = connected(Duration::from_secs(5));
        let service = McpBridgeService::new(capture.clone());
        let output = service
            .call_tool("execute_js", json!({"script": "return document.title"}))
            .await
            .unwrap();
        let body = payload(&output).clone();
        assert_eq!(body["status"], "queued");
        let raw_id = body["correlation_id"].as_str().unwrap().to_string();
        assert!(body["message"].as_str().unwrap().contains(&raw_id));

        let observed = service
            .call_tool("observe", json!({"what": "command_result", "correlation_id": raw_id}))
            .await
            .unwrap();
        assert_eq!(payload(&observed)["status"], "pending");

        let pending = capture.drain_pending();
        assert_eq!(pending[0].params["timeout_ms"], 5000);
        capture.deliver(
            &pending[0].correlation_id,
            CommandResult::success(json!({"value": "Shop"}).as_object().cloned().unwrap()),
        );
        let observed = service
            .call_tool("observe", json!({"what": "command_result", "correlation_id": raw_id}))
            .await
            .unwrap();
        assert_eq!(payload(&observed)["status"], "complete");
        assert_eq!(payload(&observed)["data"]["value"], "Shop");
    }

    #[tokio::test]
    async fn observe_unknown_correlation_id_is_not_found() {
        let service = McpBridgeService::new(Capture::default());
        let output = service
            .call_tool("observe", json!({"what": "command_result", "correlation_id": "cmd-x-1"}))
            .await
            .unwrap();
        assert_eq!(payload(&output)["error"], "not_found");

        let output = service.call_tool("observe", json!({"what": "weather"})).await.unwrap();
        assert_eq!(payload(&output)["error"], "invalid_param");
    }

    #[tokio::test]
    async fn observe_pilot_works_without_extension() {
        let service = McpBridgeService::new(Capture::default());
        let output = service.call_tool("observe", json!({"what": "pilot"})).await.unwrap();
        assert!(!output.is_error);
        assert_eq!(payload(&output)["source"], "never_connected");
        assert_eq!(payload(&output)["extension_connected"], false);
    }

    #[tokio::test]
    async fn configure_query_timeout_validates_range() {
        let capture = Capture::default();
        let service = McpBridgeService::new(capture.clone());
        for bad in [json!(0), json!(300_001), json!("fast")] {
            let output = service
                .call_tool("configure", json!({"action": "query_timeout", "timeout_ms": bad}))
                .await
                .unwrap();
            assert_eq!(payload(&output)["error"], "invalid_param");
        }
        let output = service
            .call_tool("configure", json!({"action": "query_timeout", "timeout_ms": 1500}))
            .await
            .unwrap();
        assert_eq!(payload(&output)["previous_ms"], 30_000);
        assert_eq!(capture.query_timeout(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn configure_clear_failed_empties_ring() {
        let capture = connected(Duration::from_millis(20));
        let service = McpBridgeService::new(capture.clone());
        service
            .call_tool("interact", json!({"action": "back"}))
            .await
            .unwrap();
        assert_eq!(capture.failed_commands().len(), 1);
        let output = service
            .call_tool("configure", json!({"action": "clear_failed"}))
            .await
            .unwrap();
        assert_eq!(payload(&output)["cleared"], 1);
        assert!(capture.failed_commands().is_empty());
    }

    #[tokio::test]
    async fn generate_reproduction_uses_completed_commands() {
        let capture = connected(Duration::from_secs(5));
        let extension = fake_extension(capture.clone(), |_| CommandResult::success(Map::new()));
        let service = McpBridgeService::new(capture);
        service
            .call_tool("browser_action", json!({"action": "navigate", "url": "https://shop.test"}))
            .await
            .unwrap();
        service
            .call_tool("interact", json!({"action": "get_text", "selector": ".price"}))
            .await
            .unwrap();
        service
            .call_tool("interact", json!({"action": "click", "selector": "#buy"}))
            .await
            .unwrap();
        extension.abort();

        let output = service
            .call_tool("generate", json!({"format": "reproduction"}))
            .await
            .unwrap();
        let script = payload(&output)["script"].as_str().unwrap();
        assert!(script.contains("page.goto(\"https://shop.test\")"));
        assert!(script.contains("page.locator(\"#buy\").click()"));
        assert!(!script.contains(".price"));

        let output = service
            .call_tool("generate", json!({"format": "commands"}))
            .await
            .unwrap();
        assert_eq!(payload(&output)["count"], 3);
    }
}
