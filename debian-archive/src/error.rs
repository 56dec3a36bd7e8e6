// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0:?}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("YAML error: {0:?}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("Suite '{0}' not recognised")]
    UnknownSuite(String),

    #[error("Component '{0}' not recognised")]
    UnknownComponent(String),

    #[error("Type '{0}' not recognised. (Valid types are deb, udeb and dsc)")]
    UnknownOverrideType(String),

    #[error("Priority '{0}' not recognised")]
    UnknownPriority(String),

    #[error("Section '{0}' not recognised")]
    UnknownSection(String),

    #[error("policy queue '{0}' not recognised")]
    UnknownPolicyQueue(String),

    #[error("couldn't find ids of all suites sharing override codename {0}")]
    OverrideSuitesNotFound(String),

    #[error("can't get lock {0}; held by {1}")]
    DailyLockUnavailable(String, String),

    #[error("seems to be locked by {holder} already")]
    PackageLocked { package: String, holder: String },

    #[error("{0} invocation failed (exit status {1:?})")]
    EditorFailed(String, Option<i32>),

    #[error("inspect command failed: {0}")]
    InspectCommandFailed(String),

    #[error("invalid override for {package}: {reason}")]
    InvalidOverride { package: String, reason: String },

    #[error("invalid Debian version string: {0}")]
    Version(String),

    #[error("control file parse error: {0}")]
    ControlParse(String),

    #[error("unexpected database user_version {0}; database likely corrupted")]
    SchemaVersion(usize),

    #[error("catalog integrity error: {0}")]
    CatalogIntegrity(String),

    #[error("{0}")]
    Notification(String),
}

impl ArchiveError {
    /// Whether this error stems from a configuration problem.
    ///
    /// Configuration errors abort a whole run, not just the unit of work that hit them.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownSuite(_)
                | Self::UnknownComponent(_)
                | Self::UnknownOverrideType(_)
                | Self::UnknownPolicyQueue(_)
                | Self::OverrideSuitesNotFound(_)
                | Self::SerdeYaml(_)
                | Self::SchemaVersion(_)
        )
    }

    /// Whether this error must terminate the entire run.
    pub fn is_fatal(&self) -> bool {
        self.is_configuration_error() || matches!(self, Self::EditorFailed(_, _))
    }
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, ArchiveError>;
