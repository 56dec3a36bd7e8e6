// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The archive action log.

Every change a program makes to the archive is appended to a monthly log file as a
`|`-separated record:

```text
20220314153045|process-new|jdoe|NEW ACCEPT|foo_1.0-1_amd64.changes
```

Diagnostics do not go here. They go through the [log] facade.
*/

use {
    crate::error::Result,
    chrono::{DateTime, Utc},
    log::info,
    std::{
        fs::{File, OpenOptions},
        io::Write,
        path::Path,
        sync::Mutex,
    },
};

enum Sink {
    File(Mutex<File>),
    Dry,
    Memory(Mutex<Vec<Vec<String>>>),
}

/// Appends records to the archive action log.
pub struct AuditLog {
    program: String,
    user: String,
    sink: Sink,
}

impl AuditLog {
    /// Open the log file of the current month in a directory.
    pub fn open(log_dir: impl AsRef<Path>, program: &str, user: &str) -> Result<Self> {
        let log_dir = log_dir.as_ref();
        std::fs::create_dir_all(log_dir)?;

        let path = log_dir.join(Utc::now().format("%Y-%m").to_string());
        let fh = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            program: program.to_string(),
            user: user.to_string(),
            sink: Sink::File(Mutex::new(fh)),
        })
    }

    /// A log that reports records but persists nothing.
    pub fn dry(program: &str, user: &str) -> Self {
        Self {
            program: program.to_string(),
            user: user.to_string(),
            sink: Sink::Dry,
        }
    }

    /// A log retaining records in memory.
    pub fn memory(program: &str, user: &str) -> Self {
        Self {
            program: program.to_string(),
            user: user.to_string(),
            sink: Sink::Memory(Mutex::new(vec![])),
        }
    }

    /// Whether records are persisted.
    pub fn is_dry(&self) -> bool {
        matches!(self.sink, Sink::Dry)
    }

    /// Format a record as it appears in the log file.
    pub fn format_record(&self, when: DateTime<Utc>, fields: &[&str]) -> String {
        let mut parts = vec![
            when.format("%Y%m%d%H%M%S").to_string(),
            self.program.clone(),
            self.user.clone(),
        ];
        parts.extend(fields.iter().map(|s| s.replace('|', " ")));

        parts.join("|")
    }

    /// Append a record.
    pub fn log(&self, fields: &[&str]) -> Result<()> {
        match &self.sink {
            Sink::File(fh) => {
                let line = self.format_record(Utc::now(), fields);
                let mut fh = fh.lock().unwrap_or_else(|e| e.into_inner());
                writeln!(fh, "{}", line)?;
                fh.flush()?;
            }
            Sink::Dry => {
                info!("(not logged) {}", fields.join("|"));
            }
            Sink::Memory(records) => {
                records
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(fields.iter().map(|s| s.to_string()).collect());
            }
        }

        Ok(())
    }

    /// Records captured by a memory log.
    pub fn records(&self) -> Vec<Vec<String>> {
        match &self.sink {
            Sink::Memory(records) => records.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            _ => vec![],
        }
    }
}
