use crate::domain::capture::PersistedSettings;
use crate::ports::settings::{SettingsStore, SettingsStoreError};
use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemorySettingsStore {
    inner: RwLock<Option<PersistedSettings>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(settings: PersistedSettings) -> Self {
        Self {
            inner: RwLock::new(Some(settings)),
        }
    }

    pub async fn current(&self) -> Option<PersistedSettings> {
        self.inner.read().await.clone()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn load(&self) -> Result<Option<PersistedSettings>, SettingsStoreError> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, settings: &PersistedSettings) -> Result<(), SettingsStoreError> {
        *self.inner.write().await = Some(settings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn store_round_trip() {
        let store = InMemorySettingsStore::new();
        assert!(store.load().await.unwrap().is_none());
        let snapshot = PersistedSettings {
            ai_web_pilot_enabled: Some(false),
            timestamp: Utc::now(),
            session_id: "abc".into(),
        };
        store.save(&snapshot).await.unwrap();
        assert_eq!(store.current().await, Some(snapshot));
    }
}
