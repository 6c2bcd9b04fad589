use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use databack_core::cfg::{self, AppId};
use databack_core::logx;
use databack_core::store::{open_object_store, SharedStore};
use tokio::time::Duration;
use tracing::{debug, error, info};

mod driver;
mod error;
mod executor;
mod gate;
mod module;
mod registry;
mod schedule;
mod status;
#[cfg(test)]
mod testutil;
mod watcher;
mod web;

use driver::DriverDeps;
use executor::MysqlDumpExecutor;
use gate::Gate;
use module::{Module, ModuleCtx};
use registry::JobRegistry;
use status::StatusPublisher;
use watcher::Watcher;

const APP: AppId = AppId {
    qualifier: "com",
    organization: "local",
    application: env!("CARGO_PKG_NAME"),
};

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"), version, about = "Scheduled database backup operator")]
struct Cli {
    /// Config file (default: per-user config dir)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Desired-state store directory
    #[arg(long)]
    store_dir: Option<PathBuf>,
    /// Root directory for backup artifacts
    #[arg(long)]
    backup_root: Option<PathBuf>,
    /// Log level override (info,debug,trace)
    #[arg(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut c = match &cli.config {
        Some(path) => cfg::load_from(path)?,
        None => cfg::load_or_init(&APP)?,
    };
    if cli.store_dir.is_some() {
        c.store_dir = cli.store_dir;
    }
    if cli.backup_root.is_some() {
        c.backup_root = cli.backup_root;
    }
    logx::init(cli.log.as_deref().unwrap_or(&c.log_level), c.log_json);

    let store_dir = c.store_dir()?;
    let backup_root = c.backup_root()?;
    info!("{} boot store={} backups={}", APP.application, store_dir.display(), backup_root.display());

    let store: SharedStore = Arc::new(
        open_object_store(&store_dir).with_context(|| format!("open store {}", store_dir.display()))?,
    );
    let deps = DriverDeps {
        registry: Arc::new(JobRegistry::new()),
        executor: Arc::new(MysqlDumpExecutor::new(
            backup_root,
            c.dump_command.clone(),
            c.dump_timeout_secs.map(Duration::from_secs),
        )),
        publisher: Arc::new(StatusPublisher::new(store.clone())),
        live: Arc::new(AtomicUsize::new(0)),
    };
    let gate = Arc::new(Gate::new(store.clone(), deps));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let ctx = ModuleCtx { store, gate: gate.clone(), shutdown: shutdown_rx };

    let mut modules: Vec<Box<dyn Module>> = vec![Box::new(Watcher::new(c.poll_interval_ms, c.resync_interval_secs))];
    modules.extend(web_module(&c));

    let handles: Vec<_> = modules
        .into_iter()
        .map(|m| {
            let name = m.name();
            info!("module {name} starting");
            (name, m.spawn(ctx.clone()))
        })
        .collect();

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    for (name, h) in handles {
        match h.await {
            Ok(Ok(())) => info!("module {name} stopped"),
            Ok(Err(e)) => error!("module {name} failed: {e:#}"),
            Err(e) => error!("module {name} panicked: {e}"),
        }
    }
    for (key, state) in gate.states().await {
        debug!(job = %key, ?state, "stopping driver");
    }
    info!("stopping {} jobs", gate.deps().registry.len());
    gate.shutdown().await;
    Ok(())
}

#[cfg(feature = "web-api")]
fn web_module(c: &cfg::Config) -> Option<Box<dyn Module>> {
    c.http_addr.map(|addr| Box::new(web::WebServer::new(addr)) as Box<dyn Module>)
}

#[cfg(not(feature = "web-api"))]
fn web_module(c: &cfg::Config) -> Option<Box<dyn Module>> {
    if let Some(addr) = c.http_addr {
        tracing::warn!("http_addr {addr} ignored, built without web-api");
    }
    None
}
