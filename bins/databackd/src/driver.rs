use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use databack_core::job::ObjectKey;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::executor::{BackupExecutor, BackupRequest};
use crate::registry::{JobDefinition, JobRegistry};
use crate::schedule::initial_delay;
use crate::status::{result_failed, StatusPublisher, StatusUpdate, RESULT_OK};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    /// No timer: disabled or misconfigured.
    Idle,
    /// Armed for the first daily fire.
    Scheduled,
    /// Fired at least once, re-arming every period.
    Running,
    /// Task exited; timer released.
    Stopped,
}

/// Shared collaborators handed to every driver.
#[derive(Clone)]
pub struct DriverDeps {
    pub registry: Arc<JobRegistry>,
    pub executor: Arc<dyn BackupExecutor>,
    pub publisher: Arc<StatusPublisher>,
    /// Number of driver tasks currently alive.
    pub live: Arc<AtomicUsize>,
}

/// Owner's side of a running driver. Dropping it without [`DriverHandle::stop`]
/// also ends the task, but without waiting for it.
pub struct DriverHandle {
    key: ObjectKey,
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<DriverState>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    pub fn spawn(def: Arc<JobDefinition>, deps: DriverDeps) -> Self {
        let (stop_tx, stop) = watch::channel(false);
        let (state, state_rx) = watch::channel(DriverState::Idle);
        let key = def.key.clone();
        let driver = Driver { def, deps, stop, state };
        let task = tokio::spawn(driver.run());
        Self { key, stop_tx, state_rx, task }
    }

    pub fn state(&self) -> DriverState { *self.state_rx.borrow() }

    /// Signal the driver and wait until it has exited. An executor call or
    /// status write already in progress completes first.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(job = %self.key, "driver task failed: {e}");
        }
    }
}

struct Driver {
    def: Arc<JobDefinition>,
    deps: DriverDeps,
    stop: watch::Receiver<bool>,
    state: watch::Sender<DriverState>,
}

/// Maps monotonic instants onto the wall clock sampled when the driver armed.
struct WallClock {
    wall: DateTime<Local>,
    at: Instant,
}

impl WallClock {
    fn now() -> Self { Self { wall: Local::now(), at: Instant::now() } }

    fn unix_at(&self, t: Instant) -> i64 {
        let since = chrono::Duration::from_std(t.saturating_duration_since(self.at))
            .unwrap_or_else(|_| chrono::Duration::zero());
        (self.wall + since).timestamp()
    }
}

impl Driver {
    async fn run(mut self) {
        self.deps.live.fetch_add(1, Ordering::SeqCst);
        self.drive().await;
        self.state.send_replace(DriverState::Stopped);
        self.deps.live.fetch_sub(1, Ordering::SeqCst);
        info!(job = %self.def.key, "driver stopped");
    }

    async fn drive(&mut self) {
        let def = self.def.clone();
        let key = &def.key;
        let spec = &def.spec;

        if !spec.enable {
            info!(job = %key, "job disabled");
            self.publish(StatusUpdate { active: Some(false), ..Default::default() }).await;
            return self.idle().await;
        }
        let start = match spec.validate() {
            Ok(start) => start,
            Err(e) => {
                warn!(job = %key, "invalid configuration: {e}");
                self.publish(StatusUpdate {
                    active: Some(false),
                    last_backup_result: Some(format!("invalid configuration: {e}")),
                    ..Default::default()
                })
                .await;
                return self.idle().await;
            }
        };

        let clock = WallClock::now();
        let first = clock.at + initial_delay(start, &clock.wall);
        let period = Duration::from_secs((spec.period as u64).saturating_mul(60));
        let req = BackupRequest {
            job_name: def.name().to_string(),
            origin: spec.origin.clone(),
            destination: spec.destination.clone(),
        };

        self.publish(StatusUpdate {
            active: Some(true),
            next_time: Some(clock.unix_at(first)),
            ..Default::default()
        })
        .await;
        self.state.send_replace(DriverState::Scheduled);
        info!(job = %key, start = %start, period_min = spec.period, "driver armed");

        // The one timer this driver owns; released when the loop ends.
        let mut timer = interval_at(first, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let fired = tokio::select! {
                biased;
                _ = self.stop.changed() => break,
                t = timer.tick() => t,
            };
            if *self.stop.borrow() || !self.still_bound() {
                debug!(job = %key, "fire discarded, driver retired");
                break;
            }
            self.state.send_replace(DriverState::Running);
            let next_time = clock.unix_at(fired + period);

            let last = match self.deps.executor.execute(&req).await {
                Ok(out) => {
                    info!(job = %key, artifact = %out.artifact.display(), "backup ok");
                    RESULT_OK.to_string()
                }
                Err(e) => {
                    warn!(job = %key, "backup failed: {e:#}");
                    result_failed(&e)
                }
            };
            self.publish(StatusUpdate {
                active: Some(true),
                next_time: Some(next_time),
                last_backup_result: Some(last),
            })
            .await;
        }
    }

    /// Park without a timer until stopped.
    async fn idle(&mut self) {
        self.state.send_replace(DriverState::Idle);
        let _ = self.stop.wait_for(|stopped| *stopped).await;
    }

    /// Whether the registry still holds the definition this driver runs.
    fn still_bound(&self) -> bool {
        self.deps
            .registry
            .get(&self.def.key)
            .is_some_and(|current| current.spec == self.def.spec)
    }

    async fn publish(&self, update: StatusUpdate) {
        if let Err(e) = self.deps.publisher.publish(&self.def.key, &update).await {
            warn!(job = %self.def.key, "status publish failed: {e}");
        }
    }
}
