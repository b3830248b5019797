use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PollingEndpoint {
    #[serde(rename = "pending-queries")]
    PendingQueries,
    #[serde(rename = "settings")]
    Settings,
}

/// One extension touch recorded in the bounded polling log.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PollingLogEntry {
    pub timestamp: DateTime<Utc>,
    pub endpoint: PollingEndpoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pilot_enabled: Option<bool>,
    pub command_count: usize,
}

impl PollingLogEntry {
    pub fn poll(command_count: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            endpoint: PollingEndpoint::PendingQueries,
            session_id: None,
            pilot_enabled: None,
            command_count,
        }
    }

    pub fn settings(session_id: Option<String>, pilot_enabled: Option<bool>) -> Self {
        Self {
            timestamp: Utc::now(),
            endpoint: PollingEndpoint::Settings,
            session_id,
            pilot_enabled,
            command_count: 0,
        }
    }
}

/// Snapshot of the tab the extension is bound to.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackingStatus {
    pub tracking_enabled: bool,
    pub tracked_tab_id: i64,
    pub tracked_tab_url: String,
    pub tracked_tab_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension_version: Option<String>,
    pub tracking_updated: Option<DateTime<Utc>>,
    pub extension_connected: bool,
}

/// Body of `POST /api/extension-status`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TrackingUpdate {
    #[serde(default)]
    pub tracking_enabled: bool,
    #[serde(default)]
    pub tracked_tab_id: i64,
    #[serde(default)]
    pub tracked_tab_url: String,
    #[serde(default)]
    pub tracked_tab_title: String,
    #[serde(default)]
    pub extension_version: Option<String>,
}
