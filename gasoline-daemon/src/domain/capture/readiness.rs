use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Window within which a poll or a settings write counts as live.
pub const FRESHNESS_WINDOW: Duration = Duration::seconds(5);

/// Window for the tracked-tab `extension_connected` indicator.
pub const TRACKING_WINDOW: Duration = Duration::seconds(120);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadinessState {
    NeverConnected,
    PilotOnFresh,
    PilotOffFresh,
    SettingsHeartbeat,
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PilotSource {
    NeverConnected,
    ExtensionPoll,
    SettingsHeartbeat,
    Stale,
}

impl PilotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PilotSource::NeverConnected => "never_connected",
            PilotSource::ExtensionPoll => "extension_poll",
            PilotSource::SettingsHeartbeat => "settings_heartbeat",
            PilotSource::Stale => "stale",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReadinessDecision {
    Proceed { warning: Option<String> },
    RejectNotConnected,
    RejectPilotDisabled { reason: String },
}

/// Timestamps and flag the evaluator needs, read under one lock.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReadinessInputs {
    pub pilot_enabled: bool,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub pilot_updated_at: Option<DateTime<Utc>>,
}

impl ReadinessInputs {
    pub fn classify(&self, now: DateTime<Utc>) -> ReadinessState {
        let poll_fresh = is_fresh(self.last_poll_at, now, FRESHNESS_WINDOW);
        let settings_fresh = is_fresh(self.pilot_updated_at, now, FRESHNESS_WINDOW);
        match (self.last_poll_at, self.pilot_updated_at) {
            (None, None) => ReadinessState::NeverConnected,
            _ if poll_fresh && self.pilot_enabled => ReadinessState::PilotOnFresh,
            _ if poll_fresh => ReadinessState::PilotOffFresh,
            _ if settings_fresh => ReadinessState::SettingsHeartbeat,
            _ => ReadinessState::Stale,
        }
    }

    pub fn source(&self, now: DateTime<Utc>) -> PilotSource {
        match self.classify(now) {
            ReadinessState::NeverConnected => PilotSource::NeverConnected,
            ReadinessState::PilotOnFresh | ReadinessState::PilotOffFresh => {
                PilotSource::ExtensionPoll
            }
            ReadinessState::SettingsHeartbeat => PilotSource::SettingsHeartbeat,
            ReadinessState::Stale => PilotSource::Stale,
        }
    }

    /// Decides whether a browser-action tool call may go ahead.
    pub fn decide(&self, now: DateTime<Utc>) -> ReadinessDecision {
        match self.classify(now) {
            ReadinessState::NeverConnected => ReadinessDecision::RejectNotConnected,
            ReadinessState::PilotOnFresh => ReadinessDecision::Proceed { warning: None },
            ReadinessState::PilotOffFresh => ReadinessDecision::RejectPilotDisabled {
                reason: "AI Web Pilot is disabled in the extension popup".to_string(),
            },
            ReadinessState::SettingsHeartbeat if self.pilot_enabled => {
                let poll_age = age_label(self.last_poll_at, now);
                ReadinessDecision::Proceed {
                    warning: Some(format!(
                        "polling stale ({poll_age} since last poll), relying on settings heartbeat"
                    )),
                }
            }
            ReadinessState::SettingsHeartbeat => ReadinessDecision::RejectPilotDisabled {
                reason: "AI Web Pilot is disabled (reported by settings heartbeat)".to_string(),
            },
            ReadinessState::Stale => {
                let poll_age = age_label(self.last_poll_at, now);
                let settings_age = age_label(self.pilot_updated_at, now);
                ReadinessDecision::Proceed {
                    warning: Some(format!(
                        "connection may be stale (last poll {poll_age} ago, last settings update {settings_age} ago)"
                    )),
                }
            }
        }
    }
}

/// Read-only view served by `/pilot-status` and `observe {what: "pilot"}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PilotStatus {
    pub enabled: bool,
    pub extension_connected: bool,
    pub source: PilotSource,
    pub last_update: Option<String>,
    pub last_poll_ago: Option<String>,
}

impl PilotStatus {
    pub fn evaluate(inputs: &ReadinessInputs, now: DateTime<Utc>) -> Self {
        let source = inputs.source(now);
        Self {
            enabled: inputs.pilot_enabled,
            extension_connected: source != PilotSource::NeverConnected,
            source,
            last_update: inputs.pilot_updated_at.map(|at| at.to_rfc3339()),
            last_poll_ago: inputs.last_poll_at.map(|at| format_age(now - at)),
        }
    }
}

pub fn is_fresh(at: Option<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) -> bool {
    match at {
        Some(at) => now - at <= window,
        None => false,
    }
}

fn age_label(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match at {
        Some(at) => format_age(now - at),
        None => "never".to_string(),
    }
}

pub fn format_age(age: Duration) -> String {
    let millis = age.num_milliseconds().max(0);
    format!("{:.1}s", millis as f64 / 1000.0)
}
