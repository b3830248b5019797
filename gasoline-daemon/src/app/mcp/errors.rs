use crate::domain::capture::{CommandError, CorrelationId};
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;

/// Extension error kind reported when the user turned the pilot off in the
/// browser after the command was already queued.
const EXTENSION_PILOT_DISABLED: &str = "ai_web_pilot_disabled";

/// Failures a tool call reports back to the assistant as `isError` content.
/// Each variant maps to a stable kind string callers can branch on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("{0}")]
    InvalidJson(String),
    #[error("{0}")]
    MissingParam(String),
    #[error("{0}")]
    InvalidParam(String),
    #[error("browser extension has never connected; open the browser with the extension enabled")]
    ExtensionNotConnected,
    #[error("{0}")]
    PilotDisabled(String),
    #[error("extension did not return a result within {}ms", .timeout.as_millis())]
    ExtensionTimeout {
        correlation_id: CorrelationId,
        timeout: Duration,
    },
    #[error("command cancelled: {reason}")]
    Cancelled {
        correlation_id: CorrelationId,
        reason: String,
    },
    #[error("{message}")]
    CommandFailed {
        correlation_id: CorrelationId,
        kind: String,
        message: String,
    },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ToolError {
    pub fn missing(field: &str) -> Self {
        ToolError::MissingParam(format!("required parameter '{field}' is missing"))
    }

    pub fn invalid(field: &str, detail: impl AsRef<str>) -> Self {
        ToolError::InvalidParam(format!("invalid '{field}': {}", detail.as_ref()))
    }

    pub fn kind(&self) -> &str {
        match self {
            ToolError::InvalidJson(_) => "invalid_json",
            ToolError::MissingParam(_) => "missing_param",
            ToolError::InvalidParam(_) => "invalid_param",
            ToolError::ExtensionNotConnected => "extension_not_connected",
            ToolError::PilotDisabled(_) => "pilot_disabled",
            ToolError::ExtensionTimeout { .. } => "extension_timeout",
            ToolError::Cancelled { .. } => "cancelled",
            ToolError::CommandFailed { .. } => "command_failed",
            ToolError::NotFound(_) => "not_found",
            ToolError::Internal(_) => "internal",
        }
    }

    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            ToolError::ExtensionTimeout { correlation_id, .. }
            | ToolError::Cancelled { correlation_id, .. }
            | ToolError::CommandFailed { correlation_id, .. } => Some(correlation_id),
            _ => None,
        }
    }

    /// Translates an `ok: false` result from the extension.
    pub fn from_extension(correlation_id: CorrelationId, error: Option<CommandError>) -> Self {
        match error {
            Some(error) if error.kind == EXTENSION_PILOT_DISABLED => ToolError::PilotDisabled(
                "AI Web Pilot was disabled in the extension before the command ran".to_string(),
            ),
            Some(error) => ToolError::CommandFailed {
                correlation_id,
                message: if error.message.is_empty() {
                    format!("extension reported {}", error.kind)
                } else {
                    error.message
                },
                kind: error.kind,
            },
            None => ToolError::CommandFailed {
                correlation_id,
                kind: "unknown".to_string(),
                message: "extension reported failure without details".to_string(),
            },
        }
    }

    pub fn to_payload(&self) -> Value {
        let mut payload = Map::new();
        payload.insert("error".into(), json!(self.kind()));
        payload.insert("message".into(), json!(self.to_string()));
        if let Some(id) = self.correlation_id() {
            payload.insert("correlation_id".into(), json!(id));
        }
        if let ToolError::CommandFailed { kind, .. } = self {
            payload.insert("extension_error".into(), json!(kind));
        }
        Value::Object(payload)
    }
}

/// Payload of one `tools/call` response before it is wrapped in MCP content.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub payload: Value,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(payload: Value) -> Self {
        Self {
            payload,
            is_error: false,
        }
    }

    pub fn error(err: &ToolError) -> Self {
        Self {
            payload: err.to_payload(),
            is_error: true,
        }
    }

    pub fn into_result(self) -> Value {
        json!({
            "content": [
                {
                    "type": "text",
                    "text": self.payload.to_string(),
                }
            ],
            "isError": self.is_error,
        })
    }
}

impl From<Result<Value, ToolError>> for ToolOutput {
    fn from(outcome: Result<Value, ToolError>) -> Self {
        match outcome {
            Ok(payload) => ToolOutput::ok(payload),
            Err(err) => ToolOutput::error(&err),
        }
    }
}
