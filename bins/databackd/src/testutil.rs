//! Fixtures shared by the unit tests.

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use databack_core::job::{BackupSpec, BackupStatus, Databack, Destination, ObjectKey, Origin};
use databack_core::store::{open_object_store, DefaultKv, KvObjectStore, ObjectStore, SharedStore, StoreError, StoreResult};
use parking_lot::Mutex;
use tokio::time::{sleep, Duration, Instant};

use crate::driver::DriverDeps;
use crate::executor::{BackupExecutor, BackupOutcome, BackupRequest};
use crate::registry::JobRegistry;
use crate::status::StatusPublisher;

pub fn spec(start: &str, period: i64) -> BackupSpec {
    BackupSpec {
        enable: true,
        start_time: start.into(),
        period,
        origin: Origin { host: "db.local".into(), port: 3306, username: "root".into(), password: "secret".into() },
        destination: Destination {
            endpoint: "https://s3.local".into(),
            access_key: "ak".into(),
            access_secret: "sk".into(),
            bucket_name: "backups".into(),
        },
    }
}

pub fn manifest(name: &str, start: &str, period: i64) -> Databack {
    Databack {
        metadata: ObjectKey::new("default", name),
        generation: 0,
        spec: spec(start, period),
        status: BackupStatus::default(),
    }
}

/// File-backed store in a temp dir that records status writes and can be
/// switched into failing mode.
#[derive(Clone)]
pub struct TestStore {
    inner: Arc<Inner>,
}

struct Inner {
    _dir: tempfile::TempDir,
    store: KvObjectStore<DefaultKv>,
    writes: Mutex<Vec<(ObjectKey, BackupStatus)>>,
    failing: AtomicBool,
}

impl TestStore {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = open_object_store(dir.path()).unwrap();
        Self {
            inner: Arc::new(Inner { _dir: dir, store, writes: Mutex::new(Vec::new()), failing: AtomicBool::new(false) }),
        }
    }

    pub fn shared(&self) -> SharedStore { Arc::new(self.clone()) }

    pub fn fail(&self, on: bool) { self.inner.failing.store(on, Ordering::SeqCst); }

    /// Write a status without recording it.
    pub fn seed_status(&self, key: &ObjectKey, status: &BackupStatus) {
        assert!(self.inner.store.write_status(key, status).unwrap());
    }

    pub fn status_writes(&self) -> Vec<(ObjectKey, BackupStatus)> { self.inner.writes.lock().clone() }

    pub fn writes_for(&self, key: &ObjectKey) -> Vec<BackupStatus> {
        self.inner.writes.lock().iter().filter(|(k, _)| k == key).map(|(_, s)| s.clone()).collect()
    }

    fn check(&self) -> StoreResult<()> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "store offline")));
        }
        Ok(())
    }
}

impl ObjectStore for TestStore {
    fn get(&self, key: &ObjectKey) -> StoreResult<Option<Databack>> {
        self.check()?;
        self.inner.store.get(key)
    }

    fn list(&self) -> StoreResult<Vec<Databack>> {
        self.check()?;
        self.inner.store.list()
    }

    fn apply(&self, manifest: &Databack) -> StoreResult<Databack> {
        self.check()?;
        self.inner.store.apply(manifest)
    }

    fn delete(&self, key: &ObjectKey) -> StoreResult<bool> {
        self.check()?;
        self.inner.store.delete(key)
    }

    fn write_status(&self, key: &ObjectKey, status: &BackupStatus) -> StoreResult<bool> {
        self.check()?;
        let written = self.inner.store.write_status(key, status)?;
        if written {
            self.inner.writes.lock().push((key.clone(), status.clone()));
        }
        Ok(written)
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub job: String,
    pub at: Instant,
}

/// Executor that records calls and replays scripted results (success once
/// the script runs out).
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<Call>>,
    script: Mutex<VecDeque<Result<(), String>>>,
    delay: Mutex<Option<Duration>>,
    started: AtomicUsize,
}

impl RecordingExecutor {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    pub fn script(&self, results: impl IntoIterator<Item = Result<(), String>>) {
        self.script.lock().extend(results);
    }

    pub fn set_delay(&self, d: Duration) { *self.delay.lock() = Some(d); }

    pub fn calls(&self) -> Vec<Call> { self.calls.lock().clone() }

    pub fn started(&self) -> usize { self.started.load(Ordering::SeqCst) }
}

#[async_trait]
impl BackupExecutor for RecordingExecutor {
    async fn execute(&self, req: &BackupRequest) -> anyhow::Result<BackupOutcome> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(Call { job: req.job_name.clone(), at: Instant::now() });
        let delay = *self.delay.lock();
        if let Some(d) = delay {
            sleep(d).await;
        }
        let next = self.script.lock().pop_front();
        match next {
            Some(Err(msg)) => Err(anyhow!(msg)),
            _ => Ok(BackupOutcome { artifact: PathBuf::from(format!("/backups/{}.sql", req.job_name)) }),
        }
    }
}

pub fn deps(store: &TestStore, executor: Arc<RecordingExecutor>) -> DriverDeps {
    DriverDeps {
        registry: Arc::new(JobRegistry::new()),
        executor,
        publisher: Arc::new(StatusPublisher::new(store.shared())),
        live: Arc::new(AtomicUsize::new(0)),
    }
}

/// Poll `cond` on virtual time; panics after ten simulated days.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10 * 24 * 3600);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached");
        sleep(Duration::from_secs(5)).await;
    }
}
