use crate::domain::capture::CommandKind;
use serde_json::{json, Value};

fn selector_prop() -> Value {
    json!({"type": "string", "description": "CSS selector of the target element"})
}

fn tab_prop() -> Value {
    json!({"type": "integer", "description": "Target tab; defaults to the tracked tab"})
}

/// Tool catalogue returned by `tools/list`.
pub fn catalogue() -> Value {
    let actions: Vec<&str> = CommandKind::ALL.iter().map(|kind| kind.as_str()).collect();
    json!({
        "tools": [
            {
                "name": "observe",
                "description": "Read daemon-side state: pilot readiness, command results, queues, polling activity and the tracked tab",
                "inputSchema": {
                    "type": "object",
                    "required": ["what"],
                    "properties": {
                        "what": {
                            "type": "string",
                            "enum": ["pilot", "command_result", "pending_commands", "failed_commands", "polling", "tabs"]
                        },
                        "correlation_id": {"type": "string", "description": "Required for command_result"}
                    }
                }
            },
            {
                "name": "interact",
                "description": "Run a browser command through the extension and wait for its result",
                "inputSchema": {
                    "type": "object",
                    "required": ["action"],
                    "properties": {
                        "action": {"type": "string", "enum": actions},
                        "selector": selector_prop(),
                        "url": {"type": "string"},
                        "text": {"type": "string"},
                        "clear": {"type": "boolean"},
                        "name": {"type": "string", "description": "Attribute name"},
                        "value": {"type": "string", "description": "Attribute value"},
                        "file_path": {"type": "string", "description": "Absolute path of the file to upload"},
                        "duration_ms": {"type": "integer"},
                        "script": {"type": "string"},
                        "timeout_ms": {"type": "integer"},
                        "snapshot_name": {"type": "string"},
                        "include_url": {"type": "boolean"},
                        "tab_id": tab_prop()
                    }
                }
            },
            {
                "name": "configure",
                "description": "Inspect or tune the daemon",
                "inputSchema": {
                    "type": "object",
                    "required": ["action"],
                    "properties": {
                        "action": {"type": "string", "enum": ["health", "query_timeout", "clear_failed"]},
                        "timeout_ms": {"type": "integer", "minimum": 1, "maximum": 300000}
                    }
                }
            },
            {
                "name": "generate",
                "description": "Produce artifacts from the commands completed so far",
                "inputSchema": {
                    "type": "object",
                    "required": ["format"],
                    "properties": {
                        "format": {"type": "string", "enum": ["reproduction", "commands"]}
                    }
                }
            },
            {
                "name": "browser_action",
                "description": "Navigate the browser: go to a URL, open a tab, reload or move through history",
                "inputSchema": {
                    "type": "object",
                    "required": ["action"],
                    "properties": {
                        "action": {"type": "string", "enum": ["navigate", "open", "new_tab", "refresh", "back", "forward"]},
                        "url": {"type": "string"},
                        "tab_id": tab_prop()
                    }
                }
            },
            {
                "name": "highlight",
                "description": "Visually highlight an element on the page",
                "inputSchema": {
                    "type": "object",
                    "required": ["selector"],
                    "properties": {
                        "selector": selector_prop(),
                        "duration_ms": {"type": "integer", "default": 3000},
                        "tab_id": tab_prop()
                    }
                }
            },
            {
                "name": "manage_state",
                "description": "Save, restore, list or delete page state snapshots",
                "inputSchema": {
                    "type": "object",
                    "required": ["action"],
                    "properties": {
                        "action": {"type": "string", "enum": ["save", "load", "list", "delete"]},
                        "snapshot_name": {"type": "string"},
                        "include_url": {"type": "boolean", "default": true},
                        "tab_id": tab_prop()
                    }
                }
            },
            {
                "name": "execute_js",
                "description": "Queue a script for execution in the page; poll observe with what=command_result for the outcome",
                "inputSchema": {
                    "type": "object",
                    "required": ["script"],
                    "properties": {
                        "script": {"type": "string"},
                        "timeout_ms": {"type": "integer", "default": 5000},
                        "tab_id": tab_prop()
                    }
                }
            }
        ]
    })
}
