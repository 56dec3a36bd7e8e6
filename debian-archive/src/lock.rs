// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Mutual exclusion between concurrent archive runs.

Two kinds of locks exist:

* The *daily processing lock* is a single well known key. It is held by `check-overrides`
  for its whole run and by `process-new` while an upload is accepted. Acquisition retries
  with a bounded, doubling backoff.
* *Package locks* are keyed by source package name. They are held while an upload is
  triaged. Contention is never retried: the holder is reported and the upload skipped.

Locks live in a [LockRegistry], a mapping of keys to holder identities with atomic
create-if-absent semantics. Acquired locks are represented by a [LockGuard], which
releases the lock when dropped.
*/

use {
    crate::error::{ArchiveError, Result},
    log::{debug, warn},
    std::{
        collections::HashMap,
        io::{ErrorKind, Write},
        path::{Path, PathBuf},
        sync::Mutex,
        time::Duration,
    },
};

/// Identity of the user running this process.
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Outcome of a lock acquisition attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LockAttempt {
    Acquired,
    /// The lock is held by someone else.
    Held(String),
}

/// A store of held locks.
pub trait LockRegistry: Send + Sync {
    /// Attempt to take the lock `key` on behalf of `holder`.
    fn try_acquire(&self, key: &str, holder: &str) -> Result<LockAttempt>;

    /// Release the lock `key`.
    fn release(&self, key: &str) -> Result<()>;
}

/// A [LockRegistry] backed by marker files in a directory.
///
/// Each marker contains the identity of its holder. Markers are written completely
/// before they appear under their key.
pub struct FilesystemLockRegistry {
    dir: PathBuf,
}

impl FilesystemLockRegistry {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        Ok(Self { dir })
    }

    fn marker(&self, key: &str) -> PathBuf {
        self.dir.join(key.replace('/', "_"))
    }
}

impl LockRegistry for FilesystemLockRegistry {
    fn try_acquire(&self, key: &str, holder: &str) -> Result<LockAttempt> {
        let path = self.marker(key);

        let mut staged = tempfile::Builder::new()
            .prefix(".lock-")
            .tempfile_in(&self.dir)?;
        staged.write_all(holder.as_bytes())?;
        staged.flush()?;

        match staged.persist_noclobber(&path) {
            Ok(_) => {
                debug!("acquired lock {}", path.display());

                Ok(LockAttempt::Acquired)
            }
            Err(e)
                if matches!(
                    e.error.kind(),
                    ErrorKind::AlreadyExists | ErrorKind::PermissionDenied
                ) =>
            {
                let holder = std::fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .ok()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "TotallyUnknown".to_string());

                Ok(LockAttempt::Held(holder))
            }
            Err(e) => Err(e.error.into()),
        }
    }

    fn release(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.marker(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A [LockRegistry] local to this process.
#[derive(Default)]
pub struct MemoryLockRegistry {
    held: Mutex<HashMap<String, String>>,
}

impl MemoryLockRegistry {
    pub fn holder(&self, key: &str) -> Option<String> {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }
}

impl LockRegistry for MemoryLockRegistry {
    fn try_acquire(&self, key: &str, holder: &str) -> Result<LockAttempt> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = held.get(key) {
            Ok(LockAttempt::Held(existing.clone()))
        } else {
            held.insert(key.to_string(), holder.to_string());
            Ok(LockAttempt::Acquired)
        }
    }

    fn release(&self, key: &str) -> Result<()> {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);

        Ok(())
    }
}

/// A held lock. Released when dropped.
pub struct LockGuard<'a> {
    registry: &'a dyn LockRegistry,
    key: String,
    released: bool,
}

impl<'a> LockGuard<'a> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock, surfacing any error.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.registry.release(&self.key)
    }
}

impl<'a> Drop for LockGuard<'a> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.registry.release(&self.key) {
                warn!("W: failed to release lock {}: {}", self.key, e);
            }
        }
    }
}

/// Take the lock of a source package.
///
/// Fails with [ArchiveError::PackageLocked] naming the holder if it is taken.
pub fn lock_package<'a>(
    registry: &'a dyn LockRegistry,
    package: &str,
    holder: &str,
) -> Result<LockGuard<'a>> {
    match registry.try_acquire(package, holder)? {
        LockAttempt::Acquired => Ok(LockGuard {
            registry,
            key: package.to_string(),
            released: false,
        }),
        LockAttempt::Held(holder) => Err(ArchiveError::PackageLocked {
            package: package.to_string(),
            holder,
        }),
    }
}

/// The daily processing lock and its retry policy.
#[derive(Clone, Debug)]
pub struct DailyLock {
    pub key: String,
    pub retries: u32,
    pub backoff: Duration,
}

impl DailyLock {
    pub fn new(key: impl ToString, retries: u32, backoff: Duration) -> Self {
        Self {
            key: key.to_string(),
            retries,
            backoff,
        }
    }

    /// Acquire the lock, retrying with a doubling delay while it is held.
    ///
    /// Fails with [ArchiveError::DailyLockUnavailable] once retries are exhausted.
    pub fn acquire<'a>(
        &self,
        registry: &'a dyn LockRegistry,
        holder: &str,
    ) -> Result<LockGuard<'a>> {
        let mut delay = self.backoff;
        let mut attempt = 0;

        loop {
            match registry.try_acquire(&self.key, holder)? {
                LockAttempt::Acquired => {
                    return Ok(LockGuard {
                        registry,
                        key: self.key.clone(),
                        released: false,
                    });
                }
                LockAttempt::Held(existing) => {
                    if attempt >= self.retries {
                        return Err(ArchiveError::DailyLockUnavailable(self.key.clone(), existing));
                    }

                    debug!(
                        "lock {} held by {}; retrying in {:?}",
                        self.key, existing, delay
                    );
                    std::thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }
}
