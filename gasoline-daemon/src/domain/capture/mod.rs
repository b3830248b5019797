pub mod command;
pub mod events;
pub mod readiness;
pub mod settings;
pub mod value_object;

pub use command::{
    CommandError, CommandRecord, CommandResult, CommandStatus, PendingCommand, WaitOutcome,
};
pub use events::{PollingEndpoint, PollingLogEntry, TrackingStatus, TrackingUpdate};
pub use readiness::{
    PilotSource, PilotStatus, ReadinessDecision, ReadinessInputs, ReadinessState,
    FRESHNESS_WINDOW, TRACKING_WINDOW,
};
pub use settings::{ExtensionSettings, PersistedSettings, SettingsUpdate};
pub use value_object::{CommandKind, CorrelationId, CorrelationIdGenerator};
