use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use databack_core::cfg::{self, AppId};
use databack_core::job::{Databack, ObjectKey, DEFAULT_NAMESPACE};
use databack_core::logx;
use databack_core::store::{open_object_store, ObjectStore};
use tracing::{debug, info};

const APP: AppId = AppId {
    qualifier: "com",
    organization: "local",
    application: env!("CARGO_PKG_NAME"),
};

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"), version, about = "Manage scheduled database backups")]
struct Cli {
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Config file (default: per-user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Desired-state store directory
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or update a job from a JSON or TOML manifest
    Apply {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Delete a job
    Delete {
        name: String,
        #[arg(short, long, default_value = DEFAULT_NAMESPACE)]
        namespace: String,
    },
    /// Show one job with its status
    Get {
        name: String,
        #[arg(short, long, default_value = DEFAULT_NAMESPACE)]
        namespace: String,
    },
    /// List all jobs
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose { 0 => "warn", 1 => "info", 2 => "debug", _ => "trace" };
    logx::init(level, false);

    let store_dir = match cli.store_dir {
        Some(dir) => dir,
        None => {
            let c = match &cli.config {
                Some(path) => cfg::load_from(path)?,
                None => cfg::load_or_init(&APP)?,
            };
            c.store_dir()?
        }
    };
    debug!("store {}", store_dir.display());
    let store = open_object_store(&store_dir).with_context(|| format!("open store {}", store_dir.display()))?;

    match cli.cmd {
        Command::Apply { file } => {
            let manifest = read_manifest(&file)?;
            let obj = store.apply(&manifest)?;
            info!("applied {} generation={}", obj.metadata, obj.generation);
            println!("{} applied (generation {})", obj.metadata, obj.generation);
        }
        Command::Delete { name, namespace } => {
            let key = ObjectKey::new(namespace, name);
            if !store.delete(&key)? {
                bail!("{key} not found");
            }
            println!("{key} deleted");
        }
        Command::Get { name, namespace } => {
            let key = ObjectKey::new(namespace, name);
            let Some(mut obj) = store.get(&key)? else {
                bail!("{key} not found");
            };
            obj.spec.origin.password = redact(&obj.spec.origin.password);
            obj.spec.destination.access_secret = redact(&obj.spec.destination.access_secret);
            println!("{}", serde_json::to_string_pretty(&obj)?);
        }
        Command::List => {
            for obj in store.list()? {
                let s = &obj.status;
                let result = if s.last_backup_result.is_empty() { "-" } else { s.last_backup_result.as_str() };
                println!(
                    "{}\tenable={}\tstart={}\tperiod={}m\tactive={}\tnext={}\tlast={}",
                    obj.metadata, obj.spec.enable, obj.spec.start_time, obj.spec.period, s.active, s.next_time, result
                );
            }
        }
    }
    Ok(())
}

fn read_manifest(path: &Path) -> Result<Databack> {
    let txt = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let manifest: Databack = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&txt).with_context(|| format!("parse {}", path.display()))?,
        _ => serde_json::from_str(&txt).with_context(|| format!("parse {}", path.display()))?,
    };
    if manifest.metadata.name.is_empty() {
        bail!("manifest {} has no metadata.name", path.display());
    }
    Ok(manifest)
}

fn redact(secret: &str) -> String {
    if secret.is_empty() { String::new() } else { "***".to_string() }
}
