use super::capture::Capture;
use chrono::Duration as ChronoDuration;
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info};

const DEFAULT_INTERVAL: Duration = Duration::from_millis(250);
const CHANNEL_CAPACITY: usize = 1;
const RECORD_RETENTION_MINUTES: i64 = 10;

#[derive(Clone)]
pub struct ExpirySweepHandle {
    tx: mpsc::Sender<SweepCommand>,
}

impl ExpirySweepHandle {
    pub async fn shutdown(&self) {
        let _ = self.tx.send(SweepCommand::Shutdown).await;
    }
}

enum SweepCommand {
    Shutdown,
}

/// Periodically evicts waiters past their deadline. Tool calls time out on
/// their own timers; the sweep covers detached commands nobody awaits.
pub fn spawn_expiry_sweep(capture: Capture, interval: Option<Duration>) -> ExpirySweepHandle {
    let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
    let handle = ExpirySweepHandle { tx };
    let mut ticker = time::interval(interval.unwrap_or(DEFAULT_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                cmd = rx.recv() => {
                    match cmd {
                        Some(SweepCommand::Shutdown) | None => {
                            info!("expiry sweep stopped");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => sweep_once(&capture),
            }
        }
    });

    handle
}

fn sweep_once(capture: &Capture) {
    let expired = capture.expire_overdue(Instant::now());
    let pruned = capture.prune_records(ChronoDuration::minutes(RECORD_RETENTION_MINUTES));
    if expired > 0 || pruned > 0 {
        debug!(expired, pruned, "expiry sweep pass");
    }
}
