use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::job::{BackupSpec, BackupStatus, Databack, ObjectKey};

/// Errors raised by the desired-state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure underneath the KV.
    #[error("store io error: {0}")]
    Io(#[from] io::Error),
    /// Stored bytes could not be (de)serialized.
    #[error("codec error for key {key}: {source}")]
    Codec {
        /// Printable form of the key involved.
        key: String,
        /// Underlying bincode error.
        #[source]
        source: bincode::Error,
    },
    /// The object does not exist.
    #[error("object {0} not found")]
    NotFound(ObjectKey),
}

/// Convenience alias for store results.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Filesystem-backed key/value store used as the default KV engine.
#[derive(Clone)]
pub struct FsKv {
    root: PathBuf,
}

/// Minimal key/value interface over byte keys and values.
pub trait Kv: Clone + Send + Sync + 'static {
    /// Get value bytes for `key`, if present.
    fn get(&self, key: &[u8]) -> io::Result<Option<Vec<u8>>>;
    /// Set value bytes for `key`, overwriting if it exists.
    fn put(&self, key: &[u8], val: &[u8]) -> io::Result<()>;
    /// Delete `key`; returns `true` if a value existed.
    fn delete(&self, key: &[u8]) -> io::Result<bool>;
}

/// Serde helpers layered on top of any [`Kv`] implementation.
pub trait KvSerde: Kv {
    /// Deserialize type `T` stored at `key` using `bincode`.
    fn get_t<T: DeserializeOwned>(&self, key: &[u8]) -> StoreResult<Option<T>> {
        match self.get(key)? {
            Some(bytes) => {
                let v = bincode::deserialize::<T>(&bytes).map_err(|source| StoreError::Codec {
                    key: String::from_utf8_lossy(key).into_owned(),
                    source,
                })?;
                Ok(Some(v))
            }
            None => Ok(None),
        }
    }
    /// Serialize `val` with `bincode` and store at `key`.
    fn put_t<T: Serialize>(&self, key: &[u8], val: &T) -> StoreResult<()> {
        let buf = bincode::serialize(val).map_err(|source| StoreError::Codec {
            key: String::from_utf8_lossy(key).into_owned(),
            source,
        })?;
        self.put(key, &buf)?;
        Ok(())
    }
}
impl<T: Kv> KvSerde for T {}

/// Default KV type exported by this crate (FS-backed).
pub type DefaultKv = FsKv;

/// Open an FS-backed KV rooted at `dir` (created if missing).
pub fn open_default<P: AsRef<Path>>(dir: P) -> StoreResult<DefaultKv> {
    let root = dir.as_ref().to_path_buf();
    fs::create_dir_all(&root)?;
    Ok(FsKv { root })
}

/// Build a namespaced key as bytes: `"{ns}:{key}"`.
pub fn ns(ns: &str, key: &str) -> Vec<u8> {
    let mut s = String::with_capacity(ns.len() + 1 + key.len());
    s.push_str(ns);
    s.push(':');
    s.push_str(key);
    s.into_bytes()
}

/* --------------------- impl FsKv --------------------- */

impl FsKv {
    fn path_for(&self, key: &[u8]) -> PathBuf {
        // Map arbitrary key bytes to a portable hex file name.
        let mut name = String::with_capacity(key.len() * 2);
        for &b in key {
            name.push(hex_digit(b >> 4));
            name.push(hex_digit(b & 0xF));
        }
        self.root.join(name)
    }
}

fn hex_digit(n: u8) -> char {
    match n {
        0..=9 => (b'0' + n) as char,
        10..=15 => (b'a' + (n - 10)) as char,
        _ => '?',
    }
}

impl Kv for FsKv {
    fn get(&self, key: &[u8]) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(buf) => Ok(Some(buf)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn put(&self, key: &[u8], val: &[u8]) -> io::Result<()> {
        let path = self.path_for(key);
        // The daemon and the CLI share the directory; keep temp names per process.
        let tmp = path.with_extension(format!("tmp{}", std::process::id()));
        let mut f = fs::File::create(&tmp)?;
        f.write_all(val)?;
        f.sync_all()?;
        fs::rename(tmp, path)
    }

    fn delete(&self, key: &[u8]) -> io::Result<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/* --------------------- object layer --------------------- */

/// Object API of the desired-state store.
///
/// Spec and status are written independently: [`ObjectStore::apply`] never
/// touches status and [`ObjectStore::write_status`] never touches the spec.
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetch one object.
    fn get(&self, key: &ObjectKey) -> StoreResult<Option<Databack>>;
    /// Fetch all objects in index order.
    fn list(&self) -> StoreResult<Vec<Databack>>;
    /// Create or replace the spec of `manifest.metadata`; returns the stored object.
    fn apply(&self, manifest: &Databack) -> StoreResult<Databack>;
    /// Remove an object; returns `true` if it existed.
    fn delete(&self, key: &ObjectKey) -> StoreResult<bool>;
    /// Replace the status of an existing object; `false` if the object is gone.
    fn write_status(&self, key: &ObjectKey, status: &BackupStatus) -> StoreResult<bool>;
}

/// Shared handle to whichever store backs the process.
pub type SharedStore = Arc<dyn ObjectStore>;

#[derive(Serialize, Deserialize)]
struct SpecRecord {
    generation: u64,
    spec: BackupSpec,
}

/// [`ObjectStore`] laid out over a [`Kv`].
#[derive(Clone)]
pub struct KvObjectStore<K: Kv> {
    kv: K,
}

const NS: &str = "databacks";

impl<K: Kv> KvObjectStore<K> {
    /// Wrap a KV.
    pub fn new(kv: K) -> Self { Self { kv } }

    fn index_key() -> Vec<u8> { ns(NS, "index") }
    fn seq_key() -> Vec<u8> { ns(NS, "seq") }
    fn spec_key(key: &ObjectKey) -> Vec<u8> { ns(NS, &format!("{key}:spec")) }
    fn status_key(key: &ObjectKey) -> Vec<u8> { ns(NS, &format!("{key}:status")) }

    fn index(&self) -> StoreResult<Vec<ObjectKey>> {
        Ok(self.kv.get_t(&Self::index_key())?.unwrap_or_default())
    }

    /// Next value of the store-wide generation counter. Generations never
    /// repeat, not even for an object deleted and created again.
    fn next_generation(&self) -> StoreResult<u64> {
        let next = self.kv.get_t::<u64>(&Self::seq_key())?.unwrap_or(0) + 1;
        self.kv.put_t(&Self::seq_key(), &next)?;
        Ok(next)
    }
}

/// Open the default file-backed object store rooted at `dir`.
pub fn open_object_store<P: AsRef<Path>>(dir: P) -> StoreResult<KvObjectStore<DefaultKv>> {
    Ok(KvObjectStore::new(open_default(dir)?))
}

impl<K: Kv> ObjectStore for KvObjectStore<K> {
    fn get(&self, key: &ObjectKey) -> StoreResult<Option<Databack>> {
        let Some(rec) = self.kv.get_t::<SpecRecord>(&Self::spec_key(key))? else {
            return Ok(None);
        };
        let status = self.kv.get_t::<BackupStatus>(&Self::status_key(key))?.unwrap_or_default();
        Ok(Some(Databack { metadata: key.clone(), generation: rec.generation, spec: rec.spec, status }))
    }

    fn list(&self) -> StoreResult<Vec<Databack>> {
        let mut out = Vec::new();
        for key in self.index()? {
            if let Some(obj) = self.get(&key)? {
                out.push(obj);
            }
        }
        Ok(out)
    }

    fn apply(&self, manifest: &Databack) -> StoreResult<Databack> {
        let key = &manifest.metadata;
        let spec_key = Self::spec_key(key);
        let generation = match self.kv.get_t::<SpecRecord>(&spec_key)? {
            Some(prev) if prev.spec == manifest.spec => prev.generation,
            Some(_) => self.next_generation()?,
            None => {
                self.kv.delete(&Self::status_key(key))?;
                self.next_generation()?
            }
        };
        self.kv.put_t(&spec_key, &SpecRecord { generation, spec: manifest.spec.clone() })?;

        let mut ids = self.index()?;
        if !ids.contains(key) {
            ids.push(key.clone());
            self.kv.put_t(&Self::index_key(), &ids)?;
        }
        self.get(key)?.ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    fn delete(&self, key: &ObjectKey) -> StoreResult<bool> {
        let mut ids = self.index()?;
        let before = ids.len();
        ids.retain(|k| k != key);
        if ids.len() != before {
            self.kv.put_t(&Self::index_key(), &ids)?;
        }
        let existed = self.kv.delete(&Self::spec_key(key))?;
        self.kv.delete(&Self::status_key(key))?;
        Ok(existed)
    }

    fn write_status(&self, key: &ObjectKey, status: &BackupStatus) -> StoreResult<bool> {
        if self.kv.get(&Self::spec_key(key))?.is_none() {
            return Ok(false);
        }
        self.kv.put_t(&Self::status_key(key), status)?;
        Ok(true)
    }
}
