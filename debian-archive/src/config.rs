// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Archive configuration.

Configuration is defined in a YAML document. See [ArchiveConfig] for the recognized keys.
*/

use {
    crate::{
        error::{ArchiveError, Result},
        lock::DailyLock,
        reference::OverrideType,
    },
    serde::{Deserialize, Serialize},
    std::{
        path::{Path, PathBuf},
        str::FromStr,
        time::Duration,
    },
};

/// Environment variable holding the path of the configuration file.
pub const CONFIG_ENV: &str = "DAT_CONFIG";

fn default_distribution() -> String {
    "Debian".to_string()
}

fn default_components() -> Vec<String> {
    vec!["main".into(), "contrib".into(), "non-free".into()]
}

fn default_override_types() -> Vec<String> {
    vec!["deb".into(), "udeb".into(), "dsc".into()]
}

fn default_priorities() -> Vec<String> {
    ["required", "important", "standard", "optional", "extra", "source"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_queue() -> String {
    "new".to_string()
}

fn default_package_lock_dir() -> String {
    "new".to_string()
}

fn default_daily_lock() -> String {
    "processnew.lock".to_string()
}

fn default_lock_retries() -> u32 {
    5
}

fn default_lock_backoff_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

/// Definition of a suite.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteConfig {
    /// Name of the suite. e.g. `unstable`.
    pub name: String,

    /// Codename of the suite. e.g. `sid`.
    pub codename: String,

    /// Codename of the suite whose override namespace this suite uses.
    ///
    /// Defaults to the suite's own codename.
    pub override_codename: Option<String>,

    /// Name of a suite that new overrides for this suite are written to instead.
    pub override_suite: Option<String>,
}

/// A suite whose overrides are reconciled by `check-overrides`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OverrideSuiteConfig {
    /// Name of the suite whose override rows are edited.
    pub suite: String,

    /// Whether the suite is processed at all.
    #[serde(default = "default_true")]
    pub process: bool,

    /// Suite consulted for missing or drifted overrides.
    pub origin_suite: Option<String>,
}

/// A policy queue holding uploads awaiting a decision.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyQueueConfig {
    /// Name of the queue. e.g. `new`.
    pub name: String,

    /// Directory holding the files of queued uploads.
    pub path: PathBuf,
}

/// Settings for NEW queue processing.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessNewConfig {
    /// Policy queue processed when none is given on the command line.
    #[serde(default = "default_queue")]
    pub default_queue: String,

    /// Sub-directory of the lock directory holding per-package locks.
    #[serde(default = "default_package_lock_dir")]
    pub package_lock_dir: String,

    /// Name of the daily processing lock.
    #[serde(default = "default_daily_lock")]
    pub daily_lock: String,

    /// How many times acquisition of the daily lock is retried.
    #[serde(default = "default_lock_retries")]
    pub daily_lock_retries: u32,

    /// Initial delay between daily lock attempts. Doubles on every retry.
    #[serde(default = "default_lock_backoff_ms")]
    pub daily_lock_backoff_ms: u64,

    /// Whether to send a notification describing newly classified binary packages.
    #[serde(default)]
    pub bxa_notify: bool,

    /// Recipient of BXA notifications.
    pub bxa_address: Option<String>,
}

impl Default for ProcessNewConfig {
    fn default() -> Self {
        Self {
            default_queue: default_queue(),
            package_lock_dir: default_package_lock_dir(),
            daily_lock: default_daily_lock(),
            daily_lock_retries: default_lock_retries(),
            daily_lock_backoff_ms: default_lock_backoff_ms(),
            bxa_notify: false,
            bxa_address: None,
        }
    }
}

/// Configuration of an archive.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    /// Name of the distribution. Used in notifications.
    #[serde(default = "default_distribution")]
    pub distribution: String,

    /// Path to the SQLite catalog.
    pub database: PathBuf,

    /// Directory holding lock markers.
    pub lock_dir: PathBuf,

    /// Directory receiving audit logs.
    pub log_dir: PathBuf,

    /// Holding area for accepted uploads not yet installed.
    ///
    /// Packages with files in here are never removed by override reconciliation.
    pub accepted_dir: PathBuf,

    /// Directory receiving rejected uploads.
    pub rejected_dir: PathBuf,

    /// Sender address of mails generated by the archive.
    pub from_address: Option<String>,

    #[serde(default = "default_components")]
    pub components: Vec<String>,

    #[serde(default = "default_override_types")]
    pub override_types: Vec<String>,

    #[serde(default = "default_priorities")]
    pub priorities: Vec<String>,

    #[serde(default)]
    pub sections: Vec<String>,

    #[serde(default)]
    pub suites: Vec<SuiteConfig>,

    #[serde(default)]
    pub policy_queues: Vec<PolicyQueueConfig>,

    /// Suites whose overrides are reconciled.
    #[serde(default)]
    pub check_overrides: Vec<OverrideSuiteConfig>,

    #[serde(default)]
    pub process_new: ProcessNewConfig,
}

impl ArchiveConfig {
    /// Parse a configuration from YAML text.
    pub fn from_yaml(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    /// Load a configuration from a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let f = std::fs::File::open(path)?;

        Ok(serde_yaml::from_reader(f)?)
    }

    /// Resolve configured override types, with `dsc` moved first.
    ///
    /// Source overrides are synthesized from binary overrides, so source
    /// reconciliation must happen before any other type.
    pub fn ordered_override_types(&self) -> Result<Vec<OverrideType>> {
        let mut types = self
            .override_types
            .iter()
            .map(|s| OverrideType::from_str(s))
            .collect::<Result<Vec<_>>>()?;

        types.sort_by_key(|t| *t != OverrideType::Dsc);
        types.dedup();

        Ok(types)
    }

    /// Directory holding per-package locks.
    pub fn package_lock_path(&self) -> PathBuf {
        self.lock_dir.join(&self.process_new.package_lock_dir)
    }

    /// Delay before the first daily lock retry.
    pub fn daily_lock_backoff(&self) -> Duration {
        Duration::from_millis(self.process_new.daily_lock_backoff_ms)
    }

    /// The daily processing lock with its configured retry policy.
    pub fn daily_lock(&self) -> DailyLock {
        DailyLock::new(
            &self.process_new.daily_lock,
            self.process_new.daily_lock_retries,
            self.daily_lock_backoff(),
        )
    }

    /// Find the configuration of a named policy queue.
    pub fn policy_queue(&self, name: &str) -> Result<&PolicyQueueConfig> {
        self.policy_queues
            .iter()
            .find(|q| q.name == name)
            .ok_or_else(|| ArchiveError::UnknownPolicyQueue(name.to_string()))
    }
}
