#![deny(missing_docs)]
//! databack_core: shared building blocks (config, object store, logging, job model).

/// Configuration helpers (AppId, dirs, load_or_init, etc.)
pub mod cfg;
/// File-backed KV and the backup object store on top of it.
pub mod store;
/// Tracing/log initialization helpers.
pub mod logx;
/// Backup job model shared by the daemon and the CLI.
pub mod job;
