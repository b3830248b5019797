use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Opaque identifier binding a pending command to its waiter and result.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(value: impl Into<String>) -> Result<Self, String> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err("correlation_id cannot be empty".to_string());
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for CorrelationId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CorrelationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        CorrelationId::new(value).map_err(D::Error::custom)
    }
}

/// Issues correlation ids that never repeat within one process.
///
/// Ids combine a random per-process nonce with a monotonic counter, so two
/// daemons started back to back cannot hand out the same id to a long-lived
/// extension either.
#[derive(Debug)]
pub struct CorrelationIdGenerator {
    nonce: String,
    counter: AtomicU64,
}

impl CorrelationIdGenerator {
    pub fn new() -> Self {
        let nonce = Uuid::new_v4().simple().to_string();
        Self {
            nonce: nonce[..8].to_string(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> CorrelationId {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        CorrelationId(format!("cmd-{}-{seq}", self.nonce))
    }
}

impl Default for CorrelationIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Browser-side command understood by the extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Navigate,
    Refresh,
    Back,
    Forward,
    NewTab,
    Click,
    Type,
    GetText,
    GetValue,
    GetAttribute,
    SetAttribute,
    WaitFor,
    ScrollTo,
    Focus,
    Check,
    Upload,
    Highlight,
    ExecuteJs,
    SaveState,
    LoadState,
    ListStates,
    DeleteState,
    QueryDom,
}

impl CommandKind {
    pub const ALL: [CommandKind; 23] = [
        CommandKind::Navigate,
        CommandKind::Refresh,
        CommandKind::Back,
        CommandKind::Forward,
        CommandKind::NewTab,
        CommandKind::Click,
        CommandKind::Type,
        CommandKind::GetText,
        CommandKind::GetValue,
        CommandKind::GetAttribute,
        CommandKind::SetAttribute,
        CommandKind::WaitFor,
        CommandKind::ScrollTo,
        CommandKind::Focus,
        CommandKind::Check,
        CommandKind::Upload,
        CommandKind::Highlight,
        CommandKind::ExecuteJs,
        CommandKind::SaveState,
        CommandKind::LoadState,
        CommandKind::ListStates,
        CommandKind::DeleteState,
        CommandKind::QueryDom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Navigate => "navigate",
            CommandKind::Refresh => "refresh",
            CommandKind::Back => "back",
            CommandKind::Forward => "forward",
            CommandKind::NewTab => "new_tab",
            CommandKind::Click => "click",
            CommandKind::Type => "type",
            CommandKind::GetText => "get_text",
            CommandKind::GetValue => "get_value",
            CommandKind::GetAttribute => "get_attribute",
            CommandKind::SetAttribute => "set_attribute",
            CommandKind::WaitFor => "wait_for",
            CommandKind::ScrollTo => "scroll_to",
            CommandKind::Focus => "focus",
            CommandKind::Check => "check",
            CommandKind::Upload => "upload",
            CommandKind::Highlight => "highlight",
            CommandKind::ExecuteJs => "execute_js",
            CommandKind::SaveState => "save_state",
            CommandKind::LoadState => "load_state",
            CommandKind::ListStates => "list_states",
            CommandKind::DeleteState => "delete_state",
            CommandKind::QueryDom => "query_dom",
        }
    }

    /// Commands that change the page rather than read from it.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            CommandKind::GetText
                | CommandKind::GetValue
                | CommandKind::GetAttribute
                | CommandKind::ListStates
                | CommandKind::QueryDom
                | CommandKind::WaitFor
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        CommandKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| format!("unknown command kind '{value}'"))
    }
}
