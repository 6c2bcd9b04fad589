use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Namespace used when a manifest does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

fn default_namespace() -> String { DEFAULT_NAMESPACE.to_string() }

/// Address of a backup object in the desired-state store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace the object lives in.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Job name, unique within its namespace.
    pub name: String,
}

impl ObjectKey {
    /// Build a key from namespace and name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Database the backup is taken from.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Origin {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: String,
}

/// Object storage the artifacts are meant for.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Object storage endpoint URL.
    pub endpoint: String,
    /// Access key id.
    pub access_key: String,
    /// Access key secret.
    pub access_secret: String,
    /// Target bucket. Older manifests spell it `buketName`.
    #[serde(alias = "buketName")]
    pub bucket_name: String,
}

/// Desired state of one backup job. Every field is configuration; status
/// lives in [`BackupStatus`] and never takes part in comparisons.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// Whether the job is scheduled at all.
    pub enable: bool,
    /// Daily wall-clock start, `"HH:MM"`.
    pub start_time: String,
    /// Minutes between runs once started.
    pub period: i64,
    /// Source database.
    pub origin: Origin,
    /// Upload target.
    #[serde(default)]
    pub destination: Destination,
}

impl BackupSpec {
    /// Check the fields the scheduler depends on for an enabled job.
    ///
    /// Disabled jobs are never scheduled, so the scheduler does not call
    /// this for them. The period only has to be positive while enabled.
    pub fn validate(&self) -> Result<StartTime, ConfigError> {
        let start = self.start_time.parse::<StartTime>()?;
        if self.enable && self.period <= 0 {
            return Err(ConfigError::NonPositivePeriod(self.period));
        }
        Ok(start)
    }
}

/// Observed state written back by the scheduler.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    /// A driver is armed or running for the job.
    pub active: bool,
    /// Unix seconds of the next planned run, 0 when unknown.
    pub next_time: i64,
    /// Outcome of the most recent run, empty before the first one.
    pub last_backup_result: String,
}

/// A backup object as stored: identity, generation, desired and observed state.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Databack {
    /// Identity of the object.
    pub metadata: ObjectKey,
    /// Store-wide counter value taken when the spec last changed; never reused,
    /// even across delete and recreate. 0 for manifests not yet stored.
    #[serde(default)]
    pub generation: u64,
    /// Desired state.
    pub spec: BackupSpec,
    /// Observed state.
    #[serde(default)]
    pub status: BackupStatus,
}

/// Problems with a job's configuration that keep it from being scheduled.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `startTime` is not a valid `"HH:MM"`.
    #[error("invalid start time {0:?}, expected HH:MM")]
    InvalidStartTime(String),
    /// `period` must be positive for enabled jobs.
    #[error("period must be greater than 0 minutes, got {0}")]
    NonPositivePeriod(i64),
}

/// Parsed daily start time with minute resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct StartTime {
    /// Hour of day, 0..=23.
    pub hour: u32,
    /// Minute of hour, 0..=59.
    pub minute: u32,
}

impl StartTime {
    /// Minutes since midnight.
    pub fn minutes_from_midnight(&self) -> u32 { self.hour * 60 + self.minute }
}

impl FromStr for StartTime {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ConfigError::InvalidStartTime(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(bad)?;
        if h.is_empty() || m.len() != 2 || h.len() > 2 {
            return Err(bad());
        }
        let hour: u32 = h.parse().map_err(|_| bad())?;
        let minute: u32 = m.parse().map_err(|_| bad())?;
        if hour > 23 || minute > 59 {
            return Err(bad());
        }
        Ok(Self { hour, minute })
    }
}

impl fmt::Display for StartTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}
