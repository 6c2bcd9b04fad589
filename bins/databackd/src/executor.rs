use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local};
use databack_core::job::{Destination, Origin};
use tokio::fs;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

/// Everything one backup attempt needs.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub job_name: String,
    pub origin: Origin,
    pub destination: Destination,
}

/// What a successful attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOutcome {
    pub artifact: PathBuf,
}

/// Performs one backup attempt. Failures are reported, never retried here.
#[async_trait]
pub trait BackupExecutor: Send + Sync + 'static {
    async fn execute(&self, req: &BackupRequest) -> Result<BackupOutcome>;
}

/// Dumps a MySQL server with `mysqldump --all-databases` into a dated folder.
pub struct MysqlDumpExecutor {
    root: PathBuf,
    program: String,
    timeout: Option<Duration>,
}

impl MysqlDumpExecutor {
    pub fn new(root: impl Into<PathBuf>, program: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self { root: root.into(), program: program.into(), timeout }
    }

    /// `<root>/<job>/<MM-DD>/<job>#<N>.sql`, `N` one past the entries already there.
    /// Creates the day folder if needed.
    pub async fn next_artifact_path(&self, job: &str, now: DateTime<Local>) -> Result<PathBuf> {
        let folder = self.root.join(job).join(format!("{:02}-{:02}", now.month(), now.day()));
        create_private_dir(&folder).await?;
        let mut entries = fs::read_dir(&folder)
            .await
            .with_context(|| format!("read {}", folder.display()))?;
        let mut existing = 0usize;
        while entries.next_entry().await?.is_some() {
            existing += 1;
        }
        Ok(folder.join(format!("{job}#{}.sql", existing + 1)))
    }
}

async fn create_private_dir(dir: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder
        .create(dir)
        .await
        .with_context(|| format!("create backup dir {}", dir.display()))
}

#[async_trait]
impl BackupExecutor for MysqlDumpExecutor {
    async fn execute(&self, req: &BackupRequest) -> Result<BackupOutcome> {
        let artifact = self.next_artifact_path(&req.job_name, Local::now()).await?;
        let out = fs::File::create(&artifact)
            .await
            .with_context(|| format!("create {}", artifact.display()))?
            .into_std()
            .await;

        let mut c = Command::new(&self.program);
        c.arg(format!("-h{}", req.origin.host))
            .arg(format!("-P{}", req.origin.port))
            .arg(format!("-u{}", req.origin.username))
            .arg("--all-databases")
            .env("MYSQL_PWD", &req.origin.password)
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!(job = %req.job_name, program = %self.program, host = %req.origin.host, "dump start");

        let res = run(c, self.timeout).await;
        if let Err(e) = res {
            let _ = fs::remove_file(&artifact).await;
            return Err(e);
        }
        // Upload to `req.destination` is not wired up; artifacts stay local.
        info!(job = %req.job_name, artifact = %artifact.display(), "dump ok");
        Ok(BackupOutcome { artifact })
    }
}

async fn run(mut c: Command, limit: Option<Duration>) -> Result<()> {
    let child = c.spawn().context("spawn dump")?;
    let fut = child.wait_with_output();
    let output = match limit {
        Some(t) => timeout(t, fut).await.context("dump timeout")??,
        None => fut.await?,
    };
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("dump exit status {:?}: {}", output.status.code(), stderr.trim());
    }
    Ok(())
}
