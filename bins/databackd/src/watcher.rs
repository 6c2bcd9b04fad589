use std::collections::HashMap;

use databack_core::job::ObjectKey;
use databack_core::store::SharedStore;
use futures::future::join_all;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::gate::Gate;
use crate::module::{Module, ModuleCtx};

/// Control loop: polls the store and asks the gate to reconcile whatever
/// changed or vanished, plus everything on each resync.
pub struct Watcher {
    poll: Duration,
    resync: Duration,
}

impl Watcher {
    pub fn new(poll_ms: u64, resync_secs: u64) -> Self {
        Self { poll: Duration::from_millis(poll_ms.max(1)), resync: Duration::from_secs(resync_secs) }
    }
}

impl Module for Watcher {
    fn name(&self) -> &'static str { "watcher" }

    fn spawn(self: Box<Self>, mut ctx: ModuleCtx) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move {
            let mut tick = interval(self.poll);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut seen = HashMap::new();
            let mut last_resync = Instant::now();

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let resync = last_resync.elapsed() >= self.resync;
                        if resync {
                            last_resync = Instant::now();
                        }
                        if let Err(e) = poll_once(&ctx.store, &ctx.gate, &mut seen, resync).await {
                            warn!("watch poll failed: {e}");
                        }
                    }
                    changed = ctx.shutdown.changed() => {
                        if changed.is_err() || *ctx.shutdown.borrow() {
                            info!("watcher stopping");
                            break;
                        }
                    }
                }
            }
            Ok(())
        })
    }
}

/// One pass over the store. `seen` maps each reconciled key to the generation
/// it was reconciled at; keys whose reconciliation failed stay out of date
/// and are retried on the next pass.
pub async fn poll_once(
    store: &SharedStore,
    gate: &Gate,
    seen: &mut HashMap<ObjectKey, u64>,
    resync: bool,
) -> anyhow::Result<usize> {
    let objects = store.list()?;

    let mut due: Vec<(ObjectKey, Option<u64>)> = Vec::new();
    for obj in &objects {
        if resync || seen.get(&obj.metadata) != Some(&obj.generation) {
            due.push((obj.metadata.clone(), Some(obj.generation)));
        }
    }
    for key in seen.keys() {
        if !objects.iter().any(|o| &o.metadata == key) {
            due.push((key.clone(), None));
        }
    }
    if due.is_empty() {
        return Ok(0);
    }

    let results = join_all(due.iter().map(|(key, _)| gate.reconcile(key))).await;
    for ((key, generation), res) in due.iter().zip(results) {
        match res {
            Ok(decision) => {
                debug!(job = %key, ?decision, "reconciled from store");
                match generation {
                    Some(g) => seen.insert(key.clone(), *g),
                    None => seen.remove(key),
                };
            }
            Err(e) => warn!(job = %key, "reconcile failed, will retry: {e}"),
        }
    }
    Ok(due.len())
}
