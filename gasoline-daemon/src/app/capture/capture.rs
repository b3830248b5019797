use crate::domain::capture::{
    CommandError, CommandKind, CommandRecord, CommandResult, CommandStatus, CorrelationId,
    CorrelationIdGenerator, PendingCommand, PersistedSettings, PilotStatus, PollingLogEntry,
    ReadinessDecision, ReadinessInputs, SettingsUpdate, TrackingStatus, TrackingUpdate,
    WaitOutcome, TRACKING_WINDOW,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lru::LruCache;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);
pub const POLLING_LOG_CAPACITY: usize = 200;
pub const FAILED_COMMANDS_CAPACITY: usize = 100;
const DEFAULT_RECORD_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub query_timeout: Duration,
    pub record_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            record_capacity: DEFAULT_RECORD_CAPACITY,
        }
    }
}

/// Why a waiter left the table without a delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvictReason {
    Timeout,
    Cancelled(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Resolved,
    Unknown,
}

/// Result of applying one `POST /settings` body.
#[derive(Clone, Debug)]
pub struct SettingsApplied {
    pub snapshot: PersistedSettings,
    pub previous_session: Option<String>,
    pub session_changed: bool,
    pub cancelled: usize,
}

/// Body of `GET /settings`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SettingsView {
    pub ai_web_pilot_enabled: Option<bool>,
    pub session_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CaptureHealth {
    pub pending_commands: usize,
    pub in_flight_waiters: usize,
    pub command_records: usize,
    pub failed_commands: usize,
    pub query_timeout_ms: u64,
    pub extension_session: Option<String>,
}

// The record stays with its waiter until the command settles, so in-flight
// commands never compete with finished ones for cache space.
struct Waiter {
    kind: CommandKind,
    slot: Option<oneshot::Sender<WaitOutcome>>,
    deadline: Instant,
    record: CommandRecord,
}

#[derive(Default)]
struct Tracking {
    enabled: bool,
    tab_id: i64,
    url: String,
    title: String,
    extension_version: Option<String>,
    updated: Option<DateTime<Utc>>,
}

struct CaptureState {
    pilot_enabled: bool,
    // Whether the flag was ever set explicitly; decides what gets persisted.
    pilot_known: bool,
    pilot_updated_at: Option<DateTime<Utc>>,
    last_poll_at: Option<DateTime<Utc>>,
    extension_session: Option<String>,
    tracking: Tracking,
    pending: VecDeque<PendingCommand>,
    waiters: HashMap<CorrelationId, Waiter>,
    records: LruCache<CorrelationId, CommandRecord>,
    failed: VecDeque<CommandRecord>,
    query_timeout: Duration,
    polling_log: VecDeque<PollingLogEntry>,
}

impl CaptureState {
    fn push_polling_entry(&mut self, entry: PollingLogEntry) {
        if self.polling_log.len() == POLLING_LOG_CAPACITY {
            self.polling_log.pop_front();
        }
        self.polling_log.push_back(entry);
    }

    fn remove_pending(&mut self, id: &CorrelationId) -> bool {
        match self
            .pending
            .iter()
            .position(|command| &command.correlation_id == id)
        {
            Some(index) => self.pending.remove(index).is_some(),
            None => false,
        }
    }

    fn settle_record(
        &mut self,
        mut record: CommandRecord,
        status: CommandStatus,
        data: Option<Map<String, Value>>,
        error: Option<CommandError>,
    ) {
        if !record.finish(status, data, error) {
            return;
        }
        if status.is_failure() {
            self.push_failed(record);
        } else {
            self.records.put(record.correlation_id.clone(), record);
        }
    }

    fn push_failed(&mut self, record: CommandRecord) {
        if self.failed.len() == FAILED_COMMANDS_CAPACITY {
            self.failed.pop_front();
        }
        self.failed.push_back(record);
    }

    /// Removes a waiter that never received a delivery. The command leaves the
    /// queue with it so the extension never runs work nobody waits for.
    fn evict(&mut self, id: &CorrelationId, reason: &EvictReason) -> bool {
        let Some(waiter) = self.waiters.remove(id) else {
            return false;
        };
        self.remove_pending(id);
        let detached = waiter.slot.is_none();
        let (status, outcome, message) = match reason {
            EvictReason::Timeout if detached => (
                CommandStatus::Expired,
                WaitOutcome::TimedOut,
                "command expired before the extension returned a result".to_string(),
            ),
            EvictReason::Timeout => (
                CommandStatus::Timeout,
                WaitOutcome::TimedOut,
                "extension did not return a result before the deadline".to_string(),
            ),
            EvictReason::Cancelled(why) => (
                CommandStatus::Cancelled,
                WaitOutcome::Cancelled(why.clone()),
                why.clone(),
            ),
        };
        if let Some(slot) = waiter.slot {
            // The receiver may already be gone when its caller disconnected.
            let _ = slot.send(outcome);
        }
        self.settle_record(
            waiter.record,
            status,
            None,
            Some(CommandError {
                kind: match status {
                    CommandStatus::Cancelled => "cancelled".to_string(),
                    _ => "extension_timeout".to_string(),
                },
                message,
            }),
        );
        debug!(correlation_id = %id, kind = %waiter.kind, ?reason, "waiter evicted");
        true
    }

    fn readiness_inputs(&self) -> ReadinessInputs {
        ReadinessInputs {
            pilot_enabled: self.pilot_enabled,
            last_poll_at: self.last_poll_at,
            pilot_updated_at: self.pilot_updated_at,
        }
    }

    fn settings_snapshot(&self) -> PersistedSettings {
        PersistedSettings {
            ai_web_pilot_enabled: self.pilot_known.then_some(self.pilot_enabled),
            timestamp: self.pilot_updated_at.unwrap_or_else(Utc::now),
            session_id: self.extension_session.clone().unwrap_or_default(),
        }
    }
}

struct CaptureInner {
    state: RwLock<CaptureState>,
    ids: CorrelationIdGenerator,
}

/// Shared record of everything the daemon knows about the extension and the
/// commands in flight. Cloning is cheap; all clones see the same state.
#[derive(Clone)]
pub struct Capture {
    inner: Arc<CaptureInner>,
}

impl Capture {
    pub fn new(config: CaptureConfig) -> Self {
        let capacity = NonZeroUsize::new(config.record_capacity).unwrap_or(NonZeroUsize::MIN);
        let state = CaptureState {
            pilot_enabled: false,
            pilot_known: false,
            pilot_updated_at: None,
            last_poll_at: None,
            extension_session: None,
            tracking: Tracking::default(),
            pending: VecDeque::new(),
            waiters: HashMap::new(),
            records: LruCache::new(capacity),
            failed: VecDeque::new(),
            query_timeout: config.query_timeout,
            polling_log: VecDeque::new(),
        };
        Self {
            inner: Arc::new(CaptureInner {
                state: RwLock::new(state),
                ids: CorrelationIdGenerator::new(),
            }),
        }
    }

    pub fn query_timeout(&self) -> Duration {
        self.inner.state.read().query_timeout
    }

    pub fn set_query_timeout(&self, timeout: Duration) {
        self.inner.state.write().query_timeout = timeout;
    }

    /// Queues a command and installs a waiter for its result.
    pub fn enqueue(&self, kind: CommandKind, params: Map<String, Value>) -> WaiterHandle {
        let id = self.inner.ids.next_id();
        let (tx, rx) = oneshot::channel();
        let command = PendingCommand::new(id.clone(), kind, params);
        let deadline = {
            let mut state = self.inner.state.write();
            let deadline = Instant::now() + state.query_timeout;
            // The waiter goes in before the command becomes drainable.
            state.waiters.insert(
                id.clone(),
                Waiter {
                    kind,
                    slot: Some(tx),
                    deadline,
                    record: CommandRecord::pending(&command),
                },
            );
            state.pending.push_back(command);
            deadline
        };
        debug!(correlation_id = %id, %kind, "command enqueued");
        WaiterHandle {
            capture: self.clone(),
            correlation_id: id,
            deadline,
            rx,
            settled: false,
        }
    }

    /// Queues a command whose result is fetched later by correlation id.
    pub fn enqueue_detached(
        &self,
        kind: CommandKind,
        params: Map<String, Value>,
        ttl: Duration,
    ) -> CorrelationId {
        let id = self.inner.ids.next_id();
        let command = PendingCommand::new(id.clone(), kind, params);
        {
            let mut state = self.inner.state.write();
            state.waiters.insert(
                id.clone(),
                Waiter {
                    kind,
                    slot: None,
                    deadline: Instant::now() + ttl,
                    record: CommandRecord::pending(&command),
                },
            );
            state.pending.push_back(command);
        }
        debug!(correlation_id = %id, %kind, ttl_ms = ttl.as_millis() as u64, "detached command enqueued");
        id
    }

    /// Hands every queued command to the polling extension, oldest first.
    pub fn drain_pending(&self) -> Vec<PendingCommand> {
        let mut state = self.inner.state.write();
        let drained: Vec<PendingCommand> = state.pending.drain(..).collect();
        state.last_poll_at = Some(Utc::now());
        state.push_polling_entry(PollingLogEntry::poll(drained.len()));
        drained
    }

    /// Non-draining copy of the queue.
    pub fn pending_commands(&self) -> Vec<PendingCommand> {
        self.inner.state.read().pending.iter().cloned().collect()
    }

    pub fn deliver(&self, id: &CorrelationId, result: CommandResult) -> DeliveryOutcome {
        let outcome = {
            let mut state = self.inner.state.write();
            match state.waiters.remove(id) {
                Some(waiter) => {
                    state.remove_pending(id);
                    let status = if result.ok {
                        CommandStatus::Complete
                    } else {
                        CommandStatus::Error
                    };
                    state.settle_record(
                        waiter.record,
                        status,
                        Some(result.data.clone()),
                        result.error.clone(),
                    );
                    if let Some(slot) = waiter.slot {
                        let _ = slot.send(WaitOutcome::Delivered(result));
                    }
                    DeliveryOutcome::Resolved
                }
                None => DeliveryOutcome::Unknown,
            }
        };
        match outcome {
            DeliveryOutcome::Resolved => debug!(correlation_id = %id, "command result delivered"),
            DeliveryOutcome::Unknown => {
                warn!(correlation_id = %id, "dropping result for unknown or resolved command")
            }
        }
        outcome
    }

    /// Removes a waiter whose deadline passed. Returns false if it was already
    /// resolved by a delivery or cancellation.
    pub fn evict_waiter(&self, id: &CorrelationId, reason: EvictReason) -> bool {
        self.inner.state.write().evict(id, &reason)
    }

    pub fn cancel(&self, id: &CorrelationId, reason: impl Into<String>) -> bool {
        self.evict_waiter(id, EvictReason::Cancelled(reason.into()))
    }

    /// Cancels every in-flight command and empties the queue.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let mut state = self.inner.state.write();
        cancel_all_locked(&mut state, reason)
    }

    /// Evicts waiters whose deadline is at or before `now`.
    pub fn expire_overdue(&self, now: Instant) -> usize {
        let mut state = self.inner.state.write();
        let overdue: Vec<CorrelationId> = state
            .waiters
            .iter()
            .filter(|(_, waiter)| waiter.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        overdue
            .iter()
            .filter(|id| state.evict(id, &EvictReason::Timeout))
            .count()
    }

    /// Drops finished records older than `max_age`.
    pub fn prune_records(&self, max_age: ChronoDuration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut state = self.inner.state.write();
        let stale: Vec<CorrelationId> = state
            .records
            .iter()
            .filter(|(_, record)| record.completed_at.is_some_and(|at| at < cutoff))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            state.records.pop(id);
        }
        stale.len()
    }

    pub fn command_record(&self, id: &CorrelationId) -> Option<CommandRecord> {
        let state = self.inner.state.read();
        state
            .waiters
            .get(id)
            .map(|waiter| waiter.record.clone())
            .or_else(|| state.records.peek(id).cloned())
            .or_else(|| {
                state
                    .failed
                    .iter()
                    .rev()
                    .find(|record| &record.correlation_id == id)
                    .cloned()
            })
    }

    pub fn failed_commands(&self) -> Vec<CommandRecord> {
        self.inner.state.read().failed.iter().cloned().collect()
    }

    pub fn clear_failed(&self) -> usize {
        let mut state = self.inner.state.write();
        let cleared = state.failed.len();
        state.failed.clear();
        cleared
    }

    /// Completed commands in the order they were enqueued.
    pub fn completed_commands(&self) -> Vec<CommandRecord> {
        let state = self.inner.state.read();
        let mut completed: Vec<CommandRecord> = state
            .records
            .iter()
            .filter(|(_, record)| record.status == CommandStatus::Complete)
            .map(|(_, record)| record.clone())
            .collect();
        completed.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        completed
    }

    pub fn readiness_inputs(&self) -> ReadinessInputs {
        self.inner.state.read().readiness_inputs()
    }

    pub fn check_readiness(&self, now: DateTime<Utc>) -> ReadinessDecision {
        self.readiness_inputs().decide(now)
    }

    pub fn pilot_status(&self, now: DateTime<Utc>) -> PilotStatus {
        PilotStatus::evaluate(&self.readiness_inputs(), now)
    }

    /// Applies a settings heartbeat from the extension in one critical section.
    pub fn apply_settings(&self, update: &SettingsUpdate) -> SettingsApplied {
        let now = Utc::now();
        let mut state = self.inner.state.write();
        let previous_session = state.extension_session.clone();
        let incoming = update
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|session| !session.is_empty())
            .map(str::to_string);

        let mut session_changed = false;
        let mut cancelled = 0;
        if let Some(session) = incoming {
            if previous_session.as_deref() != Some(session.as_str()) {
                if previous_session.is_some() {
                    session_changed = true;
                    cancelled = cancel_all_locked(&mut state, "extension session changed");
                }
                state.extension_session = Some(session);
            }
        }

        if let Some(enabled) = update.settings.ai_web_pilot_enabled {
            state.pilot_enabled = enabled;
            state.pilot_known = true;
        }
        let updated_at = match state.pilot_updated_at {
            Some(previous) if previous > now => previous,
            _ => now,
        };
        state.pilot_updated_at = Some(updated_at);
        let entry = PollingLogEntry::settings(
            state.extension_session.clone(),
            update.settings.ai_web_pilot_enabled,
        );
        state.push_polling_entry(entry);

        SettingsApplied {
            snapshot: state.settings_snapshot(),
            previous_session,
            session_changed,
            cancelled,
        }
    }

    /// What the settings writer would persist right now.
    pub fn settings_snapshot(&self) -> PersistedSettings {
        self.inner.state.read().settings_snapshot()
    }

    pub fn settings_view(&self) -> SettingsView {
        let state = self.inner.state.read();
        SettingsView {
            ai_web_pilot_enabled: state.pilot_known.then_some(state.pilot_enabled),
            session_id: state.extension_session.clone(),
            timestamp: state.pilot_updated_at,
        }
    }

    /// Applies settings read from disk at startup unless they are stale.
    pub fn restore_settings(&self, persisted: &PersistedSettings, now: DateTime<Utc>) -> bool {
        if persisted.is_stale(now) {
            info!(
                timestamp = %persisted.timestamp.to_rfc3339(),
                "ignoring stale persisted settings"
            );
            return false;
        }
        let mut state = self.inner.state.write();
        if let Some(enabled) = persisted.ai_web_pilot_enabled {
            state.pilot_enabled = enabled;
            state.pilot_known = true;
        }
        if state.pilot_updated_at.map_or(true, |at| at < persisted.timestamp) {
            state.pilot_updated_at = Some(persisted.timestamp);
        }
        if !persisted.session_id.is_empty() {
            state.extension_session = Some(persisted.session_id.clone());
        }
        true
    }

    pub fn update_tracking(&self, update: TrackingUpdate) {
        let mut state = self.inner.state.write();
        let extension_version = update
            .extension_version
            .or_else(|| state.tracking.extension_version.take());
        state.tracking = Tracking {
            enabled: update.tracking_enabled,
            tab_id: update.tracked_tab_id,
            url: update.tracked_tab_url,
            title: update.tracked_tab_title,
            extension_version,
            updated: Some(Utc::now()),
        };
    }

    pub fn tracking_status(&self, now: DateTime<Utc>) -> TrackingStatus {
        let state = self.inner.state.read();
        let tracking = &state.tracking;
        TrackingStatus {
            tracking_enabled: tracking.enabled,
            tracked_tab_id: tracking.tab_id,
            tracked_tab_url: tracking.url.clone(),
            tracked_tab_title: tracking.title.clone(),
            extension_version: tracking.extension_version.clone(),
            tracking_updated: tracking.updated,
            extension_connected: crate::domain::capture::readiness::is_fresh(
                tracking.updated,
                now,
                TRACKING_WINDOW,
            ),
        }
    }

    pub fn polling_log(&self) -> Vec<PollingLogEntry> {
        self.inner.state.read().polling_log.iter().cloned().collect()
    }

    pub fn health(&self) -> CaptureHealth {
        let state = self.inner.state.read();
        CaptureHealth {
            pending_commands: state.pending.len(),
            in_flight_waiters: state.waiters.len(),
            command_records: state.records.len() + state.waiters.len(),
            failed_commands: state.failed.len(),
            query_timeout_ms: state.query_timeout.as_millis() as u64,
            extension_session: state.extension_session.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn set_last_poll_at(&self, at: Option<DateTime<Utc>>) {
        self.inner.state.write().last_poll_at = at;
    }

    #[cfg(test)]
    pub(crate) fn set_pilot(&self, enabled: bool, updated_at: Option<DateTime<Utc>>) {
        let mut state = self.inner.state.write();
        state.pilot_enabled = enabled;
        state.pilot_known = true;
        state.pilot_updated_at = updated_at;
    }
}

impl Default for Capture {
    fn default() -> Self {
        Self::new(CaptureConfig::default())
    }
}

fn cancel_all_locked(state: &mut CaptureState, reason: &str) -> usize {
    let ids: Vec<CorrelationId> = state.waiters.keys().cloned().collect();
    let reason = EvictReason::Cancelled(reason.to_string());
    let cancelled = ids.iter().filter(|id| state.evict(id, &reason)).count();
    // Anything still queued has no waiter left.
    state.pending.clear();
    cancelled
}

/// Single-use claim on the result of one enqueued command.
///
/// Dropping the handle before it resolves cancels the command, which is what
/// happens when the tool caller disconnects mid-call.
pub struct WaiterHandle {
    capture: Capture,
    correlation_id: CorrelationId,
    deadline: Instant,
    rx: oneshot::Receiver<WaitOutcome>,
    settled: bool,
}

impl WaiterHandle {
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub async fn wait(mut self) -> WaitOutcome {
        let outcome = match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => WaitOutcome::Cancelled("waiter slot closed".to_string()),
            Err(_) => {
                if self
                    .capture
                    .evict_waiter(&self.correlation_id, EvictReason::Timeout)
                {
                    WaitOutcome::TimedOut
                } else {
                    // Someone else resolved the slot under the lock first.
                    self.rx.try_recv().unwrap_or(WaitOutcome::TimedOut)
                }
            }
        };
        self.settled = true;
        outcome
    }
}

impl Drop for WaiterHandle {
    fn drop(&mut self) {
        if !self.settled {
            self.capture
                .cancel(&self.correlation_id, "tool call abandoned by caller");
        }
    }
}
