pub mod heartbeat;

pub use heartbeat::{SettingsHeartbeat, SettingsWriterHandle};
