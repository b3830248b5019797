use crate::domain::capture::PersistedSettings;
use crate::ports::settings::{SettingsStore, SettingsStoreError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const TMP_SUFFIX: &str = ".tmp";

/// JSON settings file replaced atomically through a sibling temp file.
pub struct FileSettingsStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut raw = self.path.clone().into_os_string();
        raw.push(TMP_SUFFIX);
        PathBuf::from(raw)
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn load(&self) -> Result<Option<PersistedSettings>, SettingsStoreError> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&data)?))
    }

    async fn save(&self, settings: &PersistedSettings) -> Result<(), SettingsStoreError> {
        let json = serde_json::to_vec_pretty(settings)?;
        // Concurrent saves would otherwise race on the shared temp file.
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = self.tmp_path();
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&json).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}
