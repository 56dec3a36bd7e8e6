// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Uploads waiting in policy queues.

An [Upload] is a pending submission described by a `.changes` file. It references binary
packages, at most one source package and possibly files needing manual (*byhand*)
processing. Operators attach [Note]s to the source package name while they review it.
*/

use {
    crate::{
        error::{ArchiveError, Result},
        reference::OverrideType,
    },
    chrono::{DateTime, Utc},
    debian_packaging::package_version::PackageVersion,
    std::{
        cmp::Ordering,
        path::{Path, PathBuf},
    },
    tempfile::TempDir,
};

/// A policy queue.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PolicyQueue {
    pub id: i64,
    pub name: String,
    /// Directory holding the files of queued uploads.
    pub path: PathBuf,
}

/// A binary package contained in an upload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UploadBinary {
    pub package: String,
    pub version: String,
    pub architecture: String,
    pub override_type: OverrideType,
    /// Section declared by the package's control file.
    pub section: String,
    /// Priority declared by the package's control file.
    pub priority: String,
    pub filename: String,
    pub size: u64,
    /// The package's short description.
    pub description: String,
}

/// The source package contained in an upload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UploadSource {
    pub source: String,
    pub version: String,
    pub section: String,
    /// File name of the `.dsc`.
    pub filename: String,
    pub size: u64,
}

/// A file requiring manual processing before the upload can be accepted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ByhandFile {
    pub filename: String,
    pub processed: bool,
}

/// A pending upload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Upload {
    pub id: i64,
    /// File name of the `.changes` file.
    pub changes_name: String,
    /// Name of the source package.
    pub source: String,
    pub version: String,
    /// Name of the suite the upload targets.
    pub target_suite: String,
    pub maintainer: String,
    pub changed_by: String,
    pub binaries: Vec<UploadBinary>,
    pub source_package: Option<UploadSource>,
    pub byhand: Vec<ByhandFile>,
}

impl Upload {
    /// Parsed Debian version of the upload.
    pub fn package_version(&self) -> Result<PackageVersion> {
        PackageVersion::parse(&self.version)
            .map_err(|e| ArchiveError::Version(format!("{}: {:?}", self.version, e)))
    }

    /// Total size of the upload's package files in bytes.
    pub fn size(&self) -> u64 {
        self.binaries.iter().map(|b| b.size).sum::<u64>()
            + self.source_package.as_ref().map(|s| s.size).unwrap_or(0)
    }

    /// File names of every package file in the upload.
    pub fn filenames(&self) -> Vec<&str> {
        let mut names = vec![self.changes_name.as_str()];
        if let Some(source) = &self.source_package {
            names.push(source.filename.as_str());
        }
        names.extend(self.binaries.iter().map(|b| b.filename.as_str()));
        names.extend(self.byhand.iter().map(|b| b.filename.as_str()));

        names
    }

    /// Byhand files not yet processed that still exist in the queue directory.
    pub fn unprocessed_byhand<'a>(&'a self, queue_dir: &Path) -> Vec<&'a str> {
        self.byhand
            .iter()
            .filter(|f| !f.processed && queue_dir.join(&f.filename).exists())
            .map(|f| f.filename.as_str())
            .collect()
    }
}

/// Order uploads by source name, version, presence of source, and changes name.
pub fn compare_uploads(a: &Upload, b: &Upload) -> Ordering {
    a.source
        .cmp(&b.source)
        .then_with(|| match (a.package_version(), b.package_version()) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            _ => a.version.cmp(&b.version),
        })
        .then_with(|| {
            b.source_package
                .is_some()
                .cmp(&a.source_package.is_some())
        })
        .then_with(|| a.changes_name.cmp(&b.changes_name))
}

/// An operator annotation attached to a source package.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Note {
    pub id: i64,
    pub package: String,
    pub version: String,
    pub author: String,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
    /// Whether the note was written in trainee mode.
    pub trainee: bool,
}

/// A private copy of an upload's files.
///
/// Inspection tools work on the copy so nothing they do can affect the queued upload.
/// The copy is deleted when this instance is dropped.
pub struct UploadCopy {
    dir: TempDir,
}

impl UploadCopy {
    /// Copy all files of an upload present in the queue directory.
    pub fn new(upload: &Upload, queue_dir: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", upload.source))
            .tempdir()?;

        for name in upload.filenames() {
            let source = queue_dir.join(name);
            if source.exists() {
                std::fs::copy(&source, dir.path().join(name))?;
            }
        }

        Ok(Self { dir })
    }

    pub fn directory(&self) -> &Path {
        self.dir.path()
    }
}
