use super::value_object::{CommandKind, CorrelationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Command waiting for the extension to pick it up on its next poll.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PendingCommand {
    pub correlation_id: CorrelationId,
    pub kind: CommandKind,
    pub params: Map<String, Value>,
    #[serde(skip)]
    pub enqueued_at: DateTime<Utc>,
}

impl PendingCommand {
    pub fn new(correlation_id: CorrelationId, kind: CommandKind, params: Map<String, Value>) -> Self {
        Self {
            correlation_id,
            kind,
            params,
            enqueued_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandError {
    pub kind: String,
    #[serde(default)]
    pub message: String,
}

/// Outcome reported by the extension for one command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub ok: bool,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

impl CommandResult {
    pub fn success(data: Map<String, Value>) -> Self {
        Self {
            ok: true,
            data,
            error: None,
        }
    }

    pub fn failure(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: Map::new(),
            error: Some(CommandError {
                kind: kind.into(),
                message: message.into(),
            }),
        }
    }
}

/// What a waiting tool call eventually observes. Exactly one is produced per
/// correlation id.
#[derive(Clone, Debug, PartialEq)]
pub enum WaitOutcome {
    Delivered(CommandResult),
    TimedOut,
    Cancelled(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Complete,
    Error,
    Timeout,
    Expired,
    Cancelled,
}

impl CommandStatus {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CommandStatus::Error
                | CommandStatus::Timeout
                | CommandStatus::Expired
                | CommandStatus::Cancelled
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandStatus::Pending)
    }
}

/// Observable history of one command, kept after its waiter is gone.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CommandRecord {
    pub correlation_id: CorrelationId,
    pub kind: CommandKind,
    pub params: Map<String, Value>,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

impl CommandRecord {
    pub fn pending(command: &PendingCommand) -> Self {
        Self {
            correlation_id: command.correlation_id.clone(),
            kind: command.kind,
            params: command.params.clone(),
            status: CommandStatus::Pending,
            created_at: command.enqueued_at,
            completed_at: None,
            data: None,
            error: None,
        }
    }

    /// Moves the record to a terminal status. Returns false if it already had
    /// one, leaving the record untouched.
    pub fn finish(
        &mut self,
        status: CommandStatus,
        data: Option<Map<String, Value>>,
        error: Option<CommandError>,
    ) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.data = data;
        self.error = error;
        self.completed_at = Some(Utc::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_command() -> PendingCommand {
        let params = json!({"selector": "#x"}).as_object().cloned().unwrap();
        PendingCommand::new(CorrelationId::new("cmd-t-1").unwrap(), CommandKind::Click, params)
    }

    #[test]
    fn pending_command_wire_shape_omits_timestamp() {
        let value = serde_json::to_value(sample_command()).unwrap();
        assert_eq!(
            value,
            json!({"correlation_id": "cmd-t-1", "kind": "click", "params": {"selector": "#x"}})
        );
    }

    #[test]
    fn command_result_defaults_missing_data() {
        let result: CommandResult = serde_json::from_value(json!({"ok": true})).unwrap();
        assert!(result.ok);
        assert!(result.data.is_empty());
        assert!(result.error.is_none());
        assert!(serde_json::from_value::<CommandResult>(json!({"data": {}})).is_err());
    }

    #[test]
    fn record_finishes_once() {
        let mut record = CommandRecord::pending(&sample_command());
        let failure = CommandResult::failure("boom", "failed");
        assert!(record.finish(CommandStatus::Error, Some(failure.data), failure.error));
        assert_eq!(record.status, CommandStatus::Error);
        assert!(!record.finish(CommandStatus::Timeout, None, None));
        assert_eq!(record.status, CommandStatus::Error);
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn failure_statuses() {
        assert!(!CommandStatus::Complete.is_failure());
        assert!(!CommandStatus::Pending.is_failure());
        for status in [
            CommandStatus::Error,
            CommandStatus::Timeout,
            CommandStatus::Expired,
            CommandStatus::Cancelled,
        ] {
            assert!(status.is_failure());
            assert!(status.is_terminal());
        }
    }
}
