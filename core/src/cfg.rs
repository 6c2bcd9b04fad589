use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Identifier used to compute per-app configuration directories.
#[derive(Clone, Copy)]
pub struct AppId {
    /// Reverse-DNS style qualifier, e.g. `"com"`.
    pub qualifier: &'static str,
    /// Organization or vendor name, e.g. `"local"`.
    pub organization: &'static str,
    /// Application name, e.g. `"databackd"`.
    pub application: &'static str,
}

/// Application configuration persisted to `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Tracing level to use if `RUST_LOG` is not set (e.g. `"info"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines.
    #[serde(default)]
    pub log_json: bool,
    /// Directory of the desired-state store; defaults to `<data_dir>/store`.
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
    /// Root under which backup artifacts are written; defaults to `<data_dir>/backups`.
    #[serde(default)]
    pub backup_root: Option<PathBuf>,
    /// How often the control loop polls the store (ms).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How often every job is re-delivered regardless of changes (s).
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,
    /// Dump program invoked by the backup executor.
    #[serde(default = "default_dump_command")]
    pub dump_command: String,
    /// Optional upper bound for one dump (s).
    #[serde(default)]
    pub dump_timeout_secs: Option<u64>,
    /// Listen address of the HTTP status surface, if enabled.
    #[serde(default)]
    pub http_addr: Option<SocketAddr>,
}

fn default_log_level() -> String { "info".to_string() }
fn default_poll_interval_ms() -> u64 { 2_000 }
fn default_resync_interval_secs() -> u64 { 300 }
fn default_dump_command() -> String { "mysqldump".to_string() }

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            store_dir: None,
            backup_root: None,
            poll_interval_ms: default_poll_interval_ms(),
            resync_interval_secs: default_resync_interval_secs(),
            dump_command: default_dump_command(),
            dump_timeout_secs: None,
            http_addr: None,
        }
    }
}

impl Config {
    /// Store directory, falling back to the shared data dir.
    pub fn store_dir(&self) -> Result<PathBuf> {
        match &self.store_dir {
            Some(p) => Ok(p.clone()),
            None => Ok(shared_data_dir()?.join("store")),
        }
    }

    /// Backup root, falling back to the shared data dir.
    pub fn backup_root(&self) -> Result<PathBuf> {
        match &self.backup_root {
            Some(p) => Ok(p.clone()),
            None => Ok(shared_data_dir()?.join("backups")),
        }
    }
}

/// Data dir shared by the daemon and the CLI so both see the same store.
const SHARED: AppId = AppId { qualifier: "com", organization: "local", application: "databack" };

fn shared_data_dir() -> Result<PathBuf> {
    let pd = project_dirs(&SHARED)?;
    Ok(pd.data_dir().to_path_buf())
}

fn project_dirs(app: &AppId) -> Result<ProjectDirs> {
    ProjectDirs::from(app.qualifier, app.organization, app.application)
        .ok_or_else(|| anyhow::anyhow!("failed to resolve ProjectDirs"))
}

/// Return the configuration directory for this app, creating it if needed.
pub fn config_dir(app: &AppId) -> Result<PathBuf> {
    let dir = project_dirs(app)?.config_dir().to_path_buf();
    fs::create_dir_all(&dir).with_context(|| format!("create config dir {}", dir.display()))?;
    Ok(dir)
}

/// Load `config.toml` from the app config dir or create a default one.
pub fn load_or_init(app: &AppId) -> Result<Config> {
    let path = config_dir(app)?.join("config.toml");
    if path.exists() {
        load_from(&path)
    } else {
        let cfg = Config::default();
        save_config(&path, &cfg)?;
        Ok(cfg)
    }
}

/// Load a config file from an explicit path.
pub fn load_from(path: &Path) -> Result<Config> {
    let txt = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: Config = toml::from_str(&txt).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

fn save_config(path: &Path, cfg: &Config) -> Result<()> {
    let s = toml::to_string_pretty(cfg)?;
    fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
