use databack_core::job::{BackupStatus, ObjectKey};
use databack_core::store::{SharedStore, StoreError};
use tokio::sync::Mutex;
use tracing::debug;

pub const RESULT_OK: &str = "databack successful";

pub fn result_failed(err: &anyhow::Error) -> String { format!("databack failed: {err:#}") }

/// Partial status write; `None` fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pub active: Option<bool>,
    pub next_time: Option<i64>,
    pub last_backup_result: Option<String>,
}

impl StatusUpdate {
    pub fn apply_to(&self, status: &mut BackupStatus) {
        if let Some(active) = self.active {
            status.active = active;
        }
        if let Some(next) = self.next_time {
            status.next_time = next;
        }
        if let Some(result) = &self.last_backup_result {
            status.last_backup_result = result.clone();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Published {
    Written,
    /// The object was deleted concurrently.
    Dropped,
}

/// Writes job status back to the store.
///
/// Every publish, for every job, runs its read-merge-write inside one
/// critical section. The section never touches the job registry, and the
/// mutex is FIFO so a driver's publishes land in the order it issued them.
pub struct StatusPublisher {
    store: SharedStore,
    write: Mutex<()>,
}

impl StatusPublisher {
    pub fn new(store: SharedStore) -> Self { Self { store, write: Mutex::new(()) } }

    pub async fn publish(&self, key: &ObjectKey, update: &StatusUpdate) -> Result<Published, StoreError> {
        let _guard = self.write.lock().await;
        let Some(obj) = self.store.get(key)? else {
            debug!(job = %key, "status dropped, object gone");
            return Ok(Published::Dropped);
        };
        let mut status = obj.status;
        update.apply_to(&mut status);
        if self.store.write_status(key, &status)? {
            debug!(job = %key, active = status.active, next = status.next_time, "status written");
            Ok(Published::Written)
        } else {
            debug!(job = %key, "status dropped, object gone");
            Ok(Published::Dropped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{manifest, TestStore};
    use databack_core::store::ObjectStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn merges_only_given_fields() {
        let store = TestStore::new();
        let key = store.apply(&manifest("orders", "01:00", 60)).unwrap().metadata;
        let publisher = StatusPublisher::new(store.shared());

        let full = StatusUpdate { active: Some(true), next_time: Some(1000), last_backup_result: Some(RESULT_OK.into()) };
        assert_eq!(publisher.publish(&key, &full).await.unwrap(), Published::Written);

        let partial = StatusUpdate { active: Some(false), ..Default::default() };
        publisher.publish(&key, &partial).await.unwrap();

        let status = store.get(&key).unwrap().unwrap().status;
        assert_eq!(status, BackupStatus { active: false, next_time: 1000, last_backup_result: RESULT_OK.into() });
    }

    #[tokio::test]
    async fn deleted_object_is_silently_dropped() {
        let store = TestStore::new();
        let publisher = StatusPublisher::new(store.shared());
        let key = ObjectKey::new("default", "gone");
        let update = StatusUpdate { active: Some(true), ..Default::default() };
        assert_eq!(publisher.publish(&key, &update).await.unwrap(), Published::Dropped);
        assert!(store.status_writes().is_empty());
    }

    #[tokio::test]
    async fn store_failures_surface() {
        let store = TestStore::new();
        let key = store.apply(&manifest("orders", "01:00", 60)).unwrap().metadata;
        store.fail(true);
        let publisher = StatusPublisher::new(store.shared());
        let update = StatusUpdate { active: Some(true), ..Default::default() };
        assert!(publisher.publish(&key, &update).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_publishes_do_not_lose_fields() {
        let store = TestStore::new();
        let key = store.apply(&manifest("orders", "01:00", 60)).unwrap().metadata;
        let publisher = Arc::new(StatusPublisher::new(store.shared()));

        // One writer owns `next_time`, the other `last_backup_result`; an
        // interleaved read-modify-write would clobber one of them.
        let a = {
            let (p, k) = (publisher.clone(), key.clone());
            tokio::spawn(async move {
                for i in 1..=50 {
                    let u = StatusUpdate { next_time: Some(i), ..Default::default() };
                    p.publish(&k, &u).await.unwrap();
                }
            })
        };
        let b = {
            let (p, k) = (publisher.clone(), key.clone());
            tokio::spawn(async move {
                for i in 1..=50 {
                    let u = StatusUpdate { last_backup_result: Some(format!("run {i}")), ..Default::default() };
                    p.publish(&k, &u).await.unwrap();
                }
            })
        };
        a.await.unwrap();
        b.await.unwrap();

        let status = store.get(&key).unwrap().unwrap().status;
        assert_eq!(status.next_time, 50);
        assert_eq!(status.last_backup_result, "run 50");
    }
}
