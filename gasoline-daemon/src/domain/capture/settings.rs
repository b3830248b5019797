use super::readiness::FRESHNESS_WINDOW;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// On-disk heartbeat written after every settings update from the extension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedSettings {
    #[serde(default)]
    pub ai_web_pilot_enabled: Option<bool>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub session_id: String,
}

impl PersistedSettings {
    /// A snapshot older than the freshness window must not override what the
    /// extension reports after a restart.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.timestamp > FRESHNESS_WINDOW
    }
}

/// Body of `POST /settings`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub settings: ExtensionSettings,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ExtensionSettings {
    #[serde(rename = "aiWebPilotEnabled", default)]
    pub ai_web_pilot_enabled: Option<bool>,
}
