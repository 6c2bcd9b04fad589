use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use databack_core::job::{BackupSpec, ObjectKey};
use databack_core::store::SharedStore;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::driver::{DriverDeps, DriverHandle, DriverState};
use crate::error::Result;
use crate::registry::JobDefinition;

/// Desired state carried by one reconciliation event.
#[derive(Debug, Clone)]
pub enum Change {
    Apply(BackupSpec),
    Deleted,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub key: ObjectKey,
    pub change: Change,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Noop,
    Started,
    Restarted,
    Stopped,
}

type Slot = Arc<Mutex<Option<DriverHandle>>>;

/// Turns reconciliation events into driver starts and stops.
///
/// Each job has a slot holding its driver; the slot's async mutex is held for
/// the whole decision, so events for one job apply one at a time in arrival
/// order while other jobs proceed concurrently. Lock order is slot, then
/// registry (briefly); drivers only ever take the registry and publisher
/// locks, never a slot, so stopping a driver under its slot cannot deadlock.
pub struct Gate {
    store: SharedStore,
    deps: DriverDeps,
    slots: DashMap<ObjectKey, Slot>,
}

impl Gate {
    pub fn new(store: SharedStore, deps: DriverDeps) -> Self {
        Self { store, deps, slots: DashMap::new() }
    }

    /// Reconcile `key` against the store. A missing object is a deletion.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Decision> {
        let change = match self.store.get(key)? {
            Some(obj) => Change::Apply(obj.spec),
            None => Change::Deleted,
        };
        Ok(self.handle(Notification { key: key.clone(), change }).await)
    }

    pub async fn handle(&self, n: Notification) -> Decision {
        let slot = self.slot(&n.key);
        let mut driver = slot.lock().await;

        let decision = match n.change {
            Change::Deleted => {
                let known = self.deps.registry.remove(&n.key).is_some();
                match driver.take() {
                    Some(old) => {
                        old.stop().await;
                        Decision::Stopped
                    }
                    None if known => Decision::Stopped,
                    None => Decision::Noop,
                }
            }
            Change::Apply(spec) => {
                let (changed, def) = self.deps.registry.upsert(JobDefinition::new(n.key.clone(), spec));
                if !changed && driver.is_some() {
                    Decision::Noop
                } else {
                    let restarted = match driver.take() {
                        Some(old) => {
                            old.stop().await;
                            true
                        }
                        None => false,
                    };
                    *driver = Some(DriverHandle::spawn(def, self.deps.clone()));
                    if restarted { Decision::Restarted } else { Decision::Started }
                }
            }
        };

        let empty = driver.is_none();
        drop(driver);
        if empty {
            self.release(&n.key, slot);
        }
        match decision {
            Decision::Noop => debug!(job = %n.key, "reconcile noop"),
            d => info!(job = %n.key, decision = ?d, "reconciled"),
        }
        decision
    }

    fn slot(&self, key: &ObjectKey) -> Slot {
        self.slots.entry(key.clone()).or_default().clone()
    }

    /// Drop an empty slot unless another event is already queued on it.
    fn release(&self, key: &ObjectKey, slot: Slot) {
        // Clones are only handed out under the shard lock held by `remove_if`,
        // so two references (map + ours) means nobody else is waiting.
        self.slots.remove_if(key, |_, held| {
            Arc::ptr_eq(held, &slot) && Arc::strong_count(held) == 2 && held.try_lock().is_ok_and(|d| d.is_none())
        });
    }

    /// Current driver state per job.
    pub async fn states(&self) -> Vec<(ObjectKey, DriverState)> {
        let slots: Vec<(ObjectKey, Slot)> = self.slots.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        let mut out = Vec::with_capacity(slots.len());
        for (key, slot) in slots {
            if let Some(d) = slot.lock().await.as_ref() {
                out.push((key, d.state()));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn live_drivers(&self) -> usize { self.deps.live.load(Ordering::SeqCst) }

    pub fn deps(&self) -> &DriverDeps { &self.deps }

    /// Stop every driver, waiting for each. The registry is left as is.
    pub async fn shutdown(&self) {
        let slots: Vec<Slot> = self.slots.iter().map(|e| e.value().clone()).collect();
        for slot in slots {
            if let Some(d) = slot.lock().await.take() {
                d.stop().await;
            }
        }
        info!("all drivers stopped");
    }
}
