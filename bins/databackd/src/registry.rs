use std::collections::HashMap;
use std::sync::Arc;

use databack_core::job::{BackupSpec, ObjectKey};
use parking_lot::RwLock;

/// Accepted configuration of one job. Never mutated once in the registry;
/// updates swap in a new `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub key: ObjectKey,
    pub spec: BackupSpec,
}

impl JobDefinition {
    pub fn new(key: ObjectKey, spec: BackupSpec) -> Self { Self { key, spec } }

    pub fn name(&self) -> &str { &self.key.name }
}

/// Latest accepted definition per job.
///
/// The lock is never held across an await point and nothing else is locked
/// while it is held.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<ObjectKey, Arc<JobDefinition>>>,
}

impl JobRegistry {
    pub fn new() -> Self { Self::default() }

    /// Store `def`, returning whether its configuration differs from the
    /// previous one (first sight counts as a change) and the stored snapshot.
    /// An identical definition leaves the existing snapshot in place.
    pub fn upsert(&self, def: JobDefinition) -> (bool, Arc<JobDefinition>) {
        let mut jobs = self.jobs.write();
        if let Some(prev) = jobs.get(&def.key) {
            if prev.spec == def.spec {
                return (false, prev.clone());
            }
        }
        let def = Arc::new(def);
        jobs.insert(def.key.clone(), def.clone());
        (true, def)
    }

    pub fn remove(&self, key: &ObjectKey) -> Option<Arc<JobDefinition>> {
        self.jobs.write().remove(key)
    }

    pub fn get(&self, key: &ObjectKey) -> Option<Arc<JobDefinition>> {
        self.jobs.read().get(key).cloned()
    }

    /// All definitions, ordered by key.
    pub fn snapshot(&self) -> Vec<Arc<JobDefinition>> {
        let mut out: Vec<_> = self.jobs.read().values().cloned().collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    pub fn len(&self) -> usize { self.jobs.read().len() }
}
