use crate::domain::capture::PersistedSettings;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsStoreError {
    #[error("settings file i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings file is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Durable home of the pilot settings heartbeat.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Returns `Ok(None)` when nothing has been stored yet.
    async fn load(&self) -> Result<Option<PersistedSettings>, SettingsStoreError>;
    async fn save(&self, settings: &PersistedSettings) -> Result<(), SettingsStoreError>;
}
