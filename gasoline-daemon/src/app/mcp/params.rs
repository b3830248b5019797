use super::errors::ToolError;
use crate::domain::capture::CommandKind;
use serde_json::{Map, Value};
use std::path::Path;

pub const DEFAULT_HIGHLIGHT_MS: u64 = 3000;
pub const DEFAULT_SCRIPT_TIMEOUT_MS: u64 = 5000;

pub type Args = Map<String, Value>;

/// Normalises a `tools/call` arguments value into an object.
pub fn decode_arguments(arguments: Value) -> Result<Args, ToolError> {
    match arguments {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ToolError::InvalidJson(
                "arguments must be a JSON object".to_string(),
            )),
            Err(err) => Err(ToolError::InvalidJson(format!(
                "arguments are not valid JSON: {err}"
            ))),
        },
        other => Err(ToolError::InvalidJson(format!(
            "arguments must be a JSON object, got {}",
            json_type(&other)
        ))),
    }
}

pub fn required_str<'a>(args: &'a Args, field: &str) -> Result<&'a str, ToolError> {
    match args.get(field) {
        None | Some(Value::Null) => Err(ToolError::missing(field)),
        Some(Value::String(value)) if value.trim().is_empty() => Err(ToolError::missing(field)),
        Some(Value::String(value)) => Ok(value.as_str()),
        Some(other) => Err(ToolError::invalid(
            field,
            format!("expected string, got {}", json_type(other)),
        )),
    }
}

pub fn optional_bool(args: &Args, field: &str) -> Result<Option<bool>, ToolError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(value)) => Ok(Some(*value)),
        Some(other) => Err(ToolError::invalid(
            field,
            format!("expected boolean, got {}", json_type(other)),
        )),
    }
}

pub fn optional_u64(args: &Args, field: &str) -> Result<Option<u64>, ToolError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| ToolError::invalid(field, "expected a non-negative integer")),
    }
}

pub fn optional_i64(args: &Args, field: &str) -> Result<Option<i64>, ToolError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| ToolError::invalid(field, "expected an integer")),
    }
}

/// Validates the arguments of a browser command and keeps only the fields
/// the extension understands.
pub fn command_params(kind: CommandKind, args: &Args) -> Result<Args, ToolError> {
    let mut params = Map::new();
    let copy_str = |field: &str, params: &mut Args| -> Result<(), ToolError> {
        let value = required_str(args, field)?;
        params.insert(field.to_string(), Value::String(value.to_string()));
        Ok(())
    };

    match kind {
        CommandKind::Navigate | CommandKind::NewTab => copy_str("url", &mut params)?,
        CommandKind::Click
        | CommandKind::Focus
        | CommandKind::Check
        | CommandKind::GetText
        | CommandKind::GetValue
        | CommandKind::WaitFor
        | CommandKind::ScrollTo
        | CommandKind::QueryDom => copy_str("selector", &mut params)?,
        CommandKind::Type => {
            copy_str("selector", &mut params)?;
            // Empty text is a legitimate value for `type`.
            match args.get("text") {
                Some(Value::String(text)) => {
                    params.insert("text".into(), Value::String(text.clone()));
                }
                None | Some(Value::Null) => return Err(ToolError::missing("text")),
                Some(other) => {
                    return Err(ToolError::invalid(
                        "text",
                        format!("expected string, got {}", json_type(other)),
                    ))
                }
            }
            if let Some(clear) = optional_bool(args, "clear")? {
                params.insert("clear".into(), Value::Bool(clear));
            }
        }
        CommandKind::GetAttribute => {
            copy_str("selector", &mut params)?;
            copy_str("name", &mut params)?;
        }
        CommandKind::SetAttribute => {
            copy_str("selector", &mut params)?;
            copy_str("name", &mut params)?;
            match args.get("value") {
                Some(Value::String(value)) => {
                    params.insert("value".into(), Value::String(value.clone()));
                }
                None | Some(Value::Null) => return Err(ToolError::missing("value")),
                Some(other) => {
                    params.insert("value".into(), Value::String(other.to_string()));
                }
            }
        }
        CommandKind::Upload => {
            copy_str("selector", &mut params)?;
            let file_path = required_str(args, "file_path")?;
            if !Path::new(file_path).is_absolute() {
                return Err(ToolError::invalid("file_path", "must be an absolute path"));
            }
            params.insert("file_path".into(), Value::String(file_path.to_string()));
        }
        CommandKind::Highlight => {
            copy_str("selector", &mut params)?;
            let duration = optional_u64(args, "duration_ms")?.unwrap_or(DEFAULT_HIGHLIGHT_MS);
            params.insert("duration_ms".into(), Value::from(duration));
        }
        CommandKind::ExecuteJs => {
            copy_str("script", &mut params)?;
            let timeout = optional_u64(args, "timeout_ms")?.unwrap_or(DEFAULT_SCRIPT_TIMEOUT_MS);
            params.insert("timeout_ms".into(), Value::from(timeout));
        }
        CommandKind::SaveState => {
            copy_str("snapshot_name", &mut params)?;
            let include_url = optional_bool(args, "include_url")?.unwrap_or(true);
            params.insert("include_url".into(), Value::Bool(include_url));
        }
        CommandKind::LoadState | CommandKind::DeleteState => {
            copy_str("snapshot_name", &mut params)?
        }
        CommandKind::ListStates
        | CommandKind::Refresh
        | CommandKind::Back
        | CommandKind::Forward => {}
    }

    if let Some(tab_id) = optional_i64(args, "tab_id")? {
        params.insert("tab_id".into(), Value::from(tab_id));
    }
    Ok(params)
}

/// Resolves `browser_action` names, which accept `open` for a new tab.
pub fn browser_action_kind(action: &str) -> Result<CommandKind, ToolError> {
    match action {
        "navigate" => Ok(CommandKind::Navigate),
        "open" | "new_tab" => Ok(CommandKind::NewTab),
        "refresh" => Ok(CommandKind::Refresh),
        "back" => Ok(CommandKind::Back),
        "forward" => Ok(CommandKind::Forward),
        other => Err(ToolError::invalid(
            "action",
            format!("'{other}' is not one of navigate, open, new_tab, refresh, back, forward"),
        )),
    }
}

pub fn manage_state_kind(action: &str) -> Result<CommandKind, ToolError> {
    match action {
        "save" => Ok(CommandKind::SaveState),
        "load" => Ok(CommandKind::LoadState),
        "list" => Ok(CommandKind::ListStates),
        "delete" => Ok(CommandKind::DeleteState),
        other => Err(ToolError::invalid(
            "action",
            format!("'{other}' is not one of save, load, list, delete"),
        )),
    }
}

pub fn interact_kind(action: &str) -> Result<CommandKind, ToolError> {
    if action == "open" {
        return Ok(CommandKind::NewTab);
    }
    action
        .parse::<CommandKind>()
        .map_err(|err| ToolError::invalid("action", err))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
