use crate::app::capture::{Capture, SettingsApplied, SettingsView};
use crate::domain::capture::{PersistedSettings, SettingsUpdate};
use crate::ports::settings::SettingsStore;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Handle to the task that owns settings disk writes. Only the newest
/// snapshot matters, so writes queued behind a slow disk are coalesced.
#[derive(Clone)]
pub struct SettingsWriterHandle {
    tx: Arc<watch::Sender<Option<PersistedSettings>>>,
    stop: mpsc::Sender<oneshot::Sender<()>>,
}

impl SettingsWriterHandle {
    pub fn submit(&self, snapshot: PersistedSettings) {
        self.tx.send_replace(Some(snapshot));
    }

    /// Writes any snapshot still waiting for the disk, then stops the task.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.stop.send(ack_tx).await.is_err() {
            return;
        }
        let _ = ack_rx.await;
    }
}

pub fn spawn_settings_writer<S>(store: Arc<S>) -> SettingsWriterHandle
where
    S: SettingsStore + 'static,
{
    let (tx, mut rx) = watch::channel::<Option<PersistedSettings>>(None);
    let (stop_tx, mut stop_rx) = mpsc::channel::<oneshot::Sender<()>>(1);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = rx.borrow_and_update().clone();
                    persist(store.as_ref(), snapshot).await;
                }
                ack = stop_rx.recv() => {
                    if rx.has_changed().unwrap_or(false) {
                        let snapshot = rx.borrow_and_update().clone();
                        persist(store.as_ref(), snapshot).await;
                    }
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                    break;
                }
            }
        }
        debug!("settings writer stopped");
    });
    SettingsWriterHandle {
        tx: Arc::new(tx),
        stop: stop_tx,
    }
}

async fn persist<S: SettingsStore>(store: &S, snapshot: Option<PersistedSettings>) {
    let Some(snapshot) = snapshot else {
        return;
    };
    match store.save(&snapshot).await {
        Ok(()) => debug!(session_id = %snapshot.session_id, "settings persisted"),
        Err(err) => error!(%err, "failed to persist settings"),
    }
}

/// Settings channel between the extension and the daemon: applies updates to
/// the capture and mirrors them to disk as a liveness heartbeat.
pub struct SettingsHeartbeat<S>
where
    S: SettingsStore,
{
    capture: Capture,
    store: Arc<S>,
    writer: SettingsWriterHandle,
}

impl<S> SettingsHeartbeat<S>
where
    S: SettingsStore + 'static,
{
    pub fn new(capture: Capture, store: Arc<S>) -> Self {
        let writer = spawn_settings_writer(store.clone());
        Self {
            capture,
            store,
            writer,
        }
    }

    /// Restores the pilot flag from the last heartbeat if it is fresh enough.
    /// Read or decode failures leave the capture untouched.
    pub async fn load_from_disk(&self) -> bool {
        match self.store.load().await {
            Ok(Some(persisted)) => {
                let applied = self.capture.restore_settings(&persisted, Utc::now());
                if applied {
                    info!(
                        pilot_enabled = ?persisted.ai_web_pilot_enabled,
                        session_id = %persisted.session_id,
                        "restored persisted settings"
                    );
                }
                applied
            }
            Ok(None) => false,
            Err(err) => {
                warn!(%err, "ignoring unreadable settings file");
                false
            }
        }
    }

    pub fn apply(&self, update: &SettingsUpdate) -> SettingsApplied {
        let applied = self.capture.apply_settings(update);
        if applied.session_changed {
            info!(
                previous = ?applied.previous_session,
                current = %applied.snapshot.session_id,
                cancelled = applied.cancelled,
                "extension session changed"
            );
        }
        self.writer.submit(applied.snapshot.clone());
        applied
    }

    pub fn view(&self) -> SettingsView {
        self.capture.settings_view()
    }

    /// Flushes the last heartbeat so the next start restores it.
    pub async fn shutdown(&self) {
        self.writer.shutdown().await;
    }
}
