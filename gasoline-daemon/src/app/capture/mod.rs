#[allow(clippy::module_inception)]
pub mod capture;
pub mod sweep;

pub use capture::{
    Capture, CaptureConfig, CaptureHealth, DeliveryOutcome, EvictReason, SettingsApplied,
    SettingsView, WaiterHandle, DEFAULT_QUERY_TIMEOUT,
};
pub use sweep::{spawn_expiry_sweep, ExpirySweepHandle};
