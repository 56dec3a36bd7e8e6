// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! SQLite storage of the catalog. */

use {
    super::{CatalogQueries, OverrideTarget},
    crate::{
        config::{ArchiveConfig, SuiteConfig},
        error::{ArchiveError, Result},
        reference::OverrideType,
        upload::Upload,
    },
    chrono::{DateTime, Utc},
    indoc::indoc,
    log::debug,
    rusqlite::{params, Connection, Transaction},
    std::path::Path,
};

const SCHEMA: &[&str] = &[
    indoc! {"
        CREATE TABLE suite (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            codename TEXT NOT NULL,
            override_codename TEXT,
            override_suite TEXT
        )
    "},
    "CREATE TABLE component (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE)",
    "CREATE TABLE override_type (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE)",
    indoc! {"
        CREATE TABLE priority (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            level INTEGER NOT NULL
        )
    "},
    "CREATE TABLE section (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE)",
    indoc! {"
        CREATE TABLE binary_package (
            id INTEGER PRIMARY KEY,
            package TEXT NOT NULL,
            version TEXT NOT NULL,
            architecture TEXT NOT NULL,
            type TEXT NOT NULL,
            component_id INTEGER NOT NULL REFERENCES component(id)
        )
    "},
    indoc! {"
        CREATE TABLE binary_association (
            suite_id INTEGER NOT NULL REFERENCES suite(id) ON DELETE CASCADE,
            binary_id INTEGER NOT NULL REFERENCES binary_package(id) ON DELETE CASCADE,
            PRIMARY KEY (suite_id, binary_id)
        )
    "},
    indoc! {"
        CREATE TABLE source_package (
            id INTEGER PRIMARY KEY,
            source TEXT NOT NULL,
            version TEXT NOT NULL,
            component_id INTEGER NOT NULL REFERENCES component(id)
        )
    "},
    indoc! {"
        CREATE TABLE source_association (
            suite_id INTEGER NOT NULL REFERENCES suite(id) ON DELETE CASCADE,
            source_id INTEGER NOT NULL REFERENCES source_package(id) ON DELETE CASCADE,
            PRIMARY KEY (suite_id, source_id)
        )
    "},
    indoc! {"
        CREATE TABLE override (
            package TEXT NOT NULL,
            suite_id INTEGER NOT NULL REFERENCES suite(id),
            component_id INTEGER NOT NULL REFERENCES component(id),
            type_id INTEGER NOT NULL REFERENCES override_type(id),
            priority_id INTEGER NOT NULL,
            section_id INTEGER NOT NULL,
            maintainer TEXT NOT NULL DEFAULT ''
        )
    "},
    "CREATE UNIQUE INDEX override_identity ON override(package, suite_id, component_id, type_id)",
    "CREATE INDEX override_partition ON override(suite_id, component_id, type_id)",
    indoc! {"
        CREATE TABLE policy_queue (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            path TEXT NOT NULL
        )
    "},
    indoc! {"
        CREATE TABLE upload (
            id INTEGER PRIMARY KEY,
            policy_queue_id INTEGER NOT NULL REFERENCES policy_queue(id),
            changes_name TEXT NOT NULL,
            source TEXT NOT NULL,
            version TEXT NOT NULL,
            target_suite_id INTEGER NOT NULL REFERENCES suite(id),
            maintainer TEXT NOT NULL,
            changed_by TEXT NOT NULL
        )
    "},
    indoc! {"
        CREATE TABLE upload_binary (
            upload_id INTEGER NOT NULL REFERENCES upload(id) ON DELETE CASCADE,
            package TEXT NOT NULL,
            version TEXT NOT NULL,
            architecture TEXT NOT NULL,
            type TEXT NOT NULL,
            section TEXT NOT NULL,
            priority TEXT NOT NULL,
            filename TEXT NOT NULL,
            size INTEGER NOT NULL,
            description TEXT NOT NULL DEFAULT ''
        )
    "},
    indoc! {"
        CREATE TABLE upload_source (
            upload_id INTEGER NOT NULL UNIQUE REFERENCES upload(id) ON DELETE CASCADE,
            source TEXT NOT NULL,
            version TEXT NOT NULL,
            section TEXT NOT NULL,
            filename TEXT NOT NULL,
            size INTEGER NOT NULL
        )
    "},
    indoc! {"
        CREATE TABLE upload_byhand (
            upload_id INTEGER NOT NULL REFERENCES upload(id) ON DELETE CASCADE,
            filename TEXT NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0
        )
    "},
    indoc! {"
        CREATE TABLE new_comment (
            id INTEGER PRIMARY KEY,
            package TEXT NOT NULL,
            version TEXT NOT NULL,
            author TEXT NOT NULL,
            comment TEXT NOT NULL,
            notedate TEXT NOT NULL,
            trainee INTEGER NOT NULL DEFAULT 0
        )
    "},
    "CREATE INDEX new_comment_package ON new_comment(package)",
    "PRAGMA user_version=1",
];

/// A connection to the catalog database.
pub struct Catalog {
    conn: Connection,
}

impl CatalogQueries for Catalog {
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Catalog {
    /// Open a new catalog held in memory.
    pub fn new_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        let slf = Self { conn };
        slf.init()?;

        Ok(slf)
    }

    /// Open the catalog stored at a filesystem path, creating it if needed.
    pub fn new_path(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;

        let slf = Self { conn };
        slf.init()?;

        Ok(slf)
    }

    fn init(&self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;

        let user_version: usize = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        match user_version {
            0 => {
                debug!("initializing catalog schema");
                for statement in SCHEMA {
                    self.conn.execute(statement, [])?;
                }
            }
            1 => {}
            v => {
                return Err(ArchiveError::SchemaVersion(v));
            }
        }

        Ok(())
    }

    /// Begin a transaction.
    ///
    /// Dropping the returned value without calling [CatalogTransaction::commit] rolls back.
    pub fn transaction(&mut self) -> Result<CatalogTransaction<'_>> {
        Ok(CatalogTransaction {
            txn: self.conn.transaction()?,
        })
    }

    /// Execute a function in the context of a transaction.
    pub fn with_transaction<T>(
        &mut self,
        f: impl FnOnce(CatalogTransaction) -> Result<T>,
    ) -> Result<T> {
        let txn = self.transaction()?;

        f(txn)
    }
}

/// A transaction against the catalog.
pub struct CatalogTransaction<'txn> {
    txn: Transaction<'txn>,
}

impl<'txn> CatalogQueries for CatalogTransaction<'txn> {
    fn connection(&self) -> &Connection {
        &self.txn
    }
}

impl<'txn> CatalogTransaction<'txn> {
    pub fn commit(self) -> Result<()> {
        Ok(self.txn.commit()?)
    }

    /// Insert a new override row.
    ///
    /// Fails if the package already has an override in the partition.
    pub fn insert_override(
        &self,
        package: &str,
        target: OverrideTarget,
        priority_id: i64,
        section_id: i64,
        maintainer: &str,
    ) -> Result<()> {
        let mut statement = self.txn.prepare_cached(indoc! {"
            INSERT INTO override
                (package, suite_id, component_id, type_id, priority_id, section_id, maintainer)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "})?;

        statement.execute(params![
            package,
            target.suite_id,
            target.component_id,
            target.override_type_id,
            priority_id,
            section_id,
            maintainer
        ])?;

        Ok(())
    }

    /// Delete the override of a package in a partition.
    ///
    /// Returns whether a row was deleted.
    pub fn delete_override(&self, package: &str, target: OverrideTarget) -> Result<bool> {
        let mut statement = self.txn.prepare_cached(indoc! {"
            DELETE FROM override
            WHERE package = ? AND suite_id = ? AND component_id = ? AND type_id = ?
        "})?;

        let count = statement.execute(params![
            package,
            target.suite_id,
            target.component_id,
            target.override_type_id
        ])?;

        Ok(count > 0)
    }

    /// Update the override of a package in a partition.
    ///
    /// `priority_id` of `None` leaves the priority untouched.
    pub fn update_override(
        &self,
        package: &str,
        target: OverrideTarget,
        priority_id: Option<i64>,
        section_id: i64,
        maintainer: &str,
    ) -> Result<bool> {
        let mut statement = self.txn.prepare_cached(indoc! {"
            UPDATE override
            SET priority_id = COALESCE(?, priority_id), section_id = ?, maintainer = ?
            WHERE package = ? AND suite_id = ? AND component_id = ? AND type_id = ?
        "})?;

        let count = statement.execute(params![
            priority_id,
            section_id,
            maintainer,
            package,
            target.suite_id,
            target.component_id,
            target.override_type_id
        ])?;

        Ok(count > 0)
    }

    /// Attach a note to a source package.
    pub fn add_note(
        &self,
        package: &str,
        version: &str,
        author: &str,
        comment: &str,
        timestamp: DateTime<Utc>,
        trainee: bool,
    ) -> Result<i64> {
        self.txn.execute(
            indoc! {"
                INSERT INTO new_comment (package, version, author, comment, notedate, trainee)
                VALUES (?, ?, ?, ?, ?, ?)
            "},
            params![
                package,
                version,
                author,
                comment,
                timestamp.to_rfc3339(),
                trainee
            ],
        )?;

        Ok(self.txn.last_insert_rowid())
    }

    /// Delete notes of a source package, optionally only those of one version.
    pub fn delete_notes(&self, package: &str, version: Option<&str>) -> Result<usize> {
        Ok(self.txn.execute(
            "DELETE FROM new_comment WHERE package = ?1 AND (?2 IS NULL OR version = ?2)",
            params![package, version],
        )?)
    }

    /// Remove an upload from its policy queue.
    pub fn remove_upload(&self, upload_id: i64) -> Result<()> {
        self.txn
            .execute("DELETE FROM upload WHERE id = ?", params![upload_id])?;

        Ok(())
    }

    fn ensure_named(&self, table: &str, name: &str) -> Result<i64> {
        self.txn.execute(
            &format!("INSERT OR IGNORE INTO {} (name) VALUES (?)", table),
            params![name],
        )?;

        Ok(self.txn.query_row(
            &format!("SELECT id FROM {} WHERE name = ?", table),
            params![name],
            |row| row.get(0),
        )?)
    }

    pub fn ensure_component(&self, name: &str) -> Result<i64> {
        self.ensure_named("component", name)
    }

    pub fn ensure_override_type(&self, override_type: OverrideType) -> Result<i64> {
        self.ensure_named("override_type", override_type.as_str())
    }

    pub fn ensure_section(&self, name: &str) -> Result<i64> {
        self.ensure_named("section", name)
    }

    /// Register a priority. `level` orders priorities for display.
    pub fn ensure_priority(&self, name: &str, level: i64) -> Result<i64> {
        self.txn.execute(
            "INSERT OR IGNORE INTO priority (name, level) VALUES (?, ?)",
            params![name, level],
        )?;

        Ok(self.txn.query_row(
            "SELECT id FROM priority WHERE name = ?",
            params![name],
            |row| row.get(0),
        )?)
    }

    pub fn ensure_suite(&self, suite: &SuiteConfig) -> Result<i64> {
        self.txn.execute(
            indoc! {"
                INSERT OR IGNORE INTO suite (name, codename, override_codename, override_suite)
                VALUES (?, ?, ?, ?)
            "},
            params![
                suite.name,
                suite.codename,
                suite.override_codename,
                suite.override_suite
            ],
        )?;

        Ok(self.require_suite(&suite.name)?.id)
    }

    pub fn ensure_policy_queue(&self, name: &str, path: &Path) -> Result<i64> {
        self.txn.execute(
            "INSERT OR IGNORE INTO policy_queue (name, path) VALUES (?, ?)",
            params![name, path.display().to_string()],
        )?;

        Ok(self.txn.query_row(
            "SELECT id FROM policy_queue WHERE name = ?",
            params![name],
            |row| row.get(0),
        )?)
    }

    /// Insert the reference data, suites and policy queues of a configuration.
    ///
    /// Existing rows are left untouched.
    pub fn import_config(&self, config: &ArchiveConfig) -> Result<()> {
        for component in &config.components {
            self.ensure_component(component)?;
        }
        for override_type in config.ordered_override_types()? {
            self.ensure_override_type(override_type)?;
        }
        for (level, priority) in config.priorities.iter().enumerate() {
            self.ensure_priority(priority, level as i64 + 1)?;
        }
        for section in &config.sections {
            self.ensure_section(section)?;
        }
        for suite in &config.suites {
            self.ensure_suite(suite)?;
        }
        for queue in &config.policy_queues {
            self.ensure_policy_queue(&queue.name, &queue.path)?;
        }

        Ok(())
    }

    /// Record a binary package and associate it with a suite.
    pub fn add_binary(
        &self,
        suite_id: i64,
        component_id: i64,
        override_type: OverrideType,
        package: &str,
        version: &str,
        architecture: &str,
    ) -> Result<i64> {
        self.txn.execute(
            indoc! {"
                INSERT INTO binary_package (package, version, architecture, type, component_id)
                VALUES (?, ?, ?, ?, ?)
            "},
            params![
                package,
                version,
                architecture,
                override_type.as_str(),
                component_id
            ],
        )?;
        let binary_id = self.txn.last_insert_rowid();

        self.txn.execute(
            "INSERT INTO binary_association (suite_id, binary_id) VALUES (?, ?)",
            params![suite_id, binary_id],
        )?;

        Ok(binary_id)
    }

    /// Record a source package and associate it with a suite.
    pub fn add_source(
        &self,
        suite_id: i64,
        component_id: i64,
        source: &str,
        version: &str,
    ) -> Result<i64> {
        self.txn.execute(
            "INSERT INTO source_package (source, version, component_id) VALUES (?, ?, ?)",
            params![source, version, component_id],
        )?;
        let source_id = self.txn.last_insert_rowid();

        self.txn.execute(
            "INSERT INTO source_association (suite_id, source_id) VALUES (?, ?)",
            params![suite_id, source_id],
        )?;

        Ok(source_id)
    }

    /// Place an upload in a policy queue.
    ///
    /// The `id` and `target_suite` of the passed upload are ignored in favor of the
    /// arguments.
    pub fn add_upload(&self, queue_id: i64, target_suite_id: i64, upload: &Upload) -> Result<i64> {
        self.txn.execute(
            indoc! {"
                INSERT INTO upload
                    (policy_queue_id, changes_name, source, version, target_suite_id, maintainer,
                     changed_by)
                VALUES (?, ?, ?, ?, ?, ?, ?)
            "},
            params![
                queue_id,
                upload.changes_name,
                upload.source,
                upload.version,
                target_suite_id,
                upload.maintainer,
                upload.changed_by
            ],
        )?;
        let upload_id = self.txn.last_insert_rowid();

        let mut statement = self.txn.prepare_cached(indoc! {"
            INSERT INTO upload_binary
                (upload_id, package, version, architecture, type, section, priority, filename,
                 size, description)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "})?;
        for binary in &upload.binaries {
            statement.execute(params![
                upload_id,
                binary.package,
                binary.version,
                binary.architecture,
                binary.override_type.as_str(),
                binary.section,
                binary.priority,
                binary.filename,
                binary.size as i64,
                binary.description
            ])?;
        }

        if let Some(source) = &upload.source_package {
            self.txn.execute(
                indoc! {"
                    INSERT INTO upload_source (upload_id, source, version, section, filename, size)
                    VALUES (?, ?, ?, ?, ?, ?)
                "},
                params![
                    upload_id,
                    source.source,
                    source.version,
                    source.section,
                    source.filename,
                    source.size as i64
                ],
            )?;
        }

        for byhand in &upload.byhand {
            self.txn.execute(
                "INSERT INTO upload_byhand (upload_id, filename, processed) VALUES (?, ?, ?)",
                params![upload_id, byhand.filename, byhand.processed],
            )?;
        }

        Ok(upload_id)
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            catalog::OverrideRow,
            upload::{test::binary, test::upload, ByhandFile, UploadSource},
        },
        std::path::PathBuf,
    };

    fn suite(name: &str, codename: &str, override_codename: Option<&str>) -> SuiteConfig {
        SuiteConfig {
            name: name.to_string(),
            codename: codename.to_string(),
            override_codename: override_codename.map(String::from),
            override_suite: None,
        }
    }

    fn find(
        catalog: &impl CatalogQueries,
        package: &str,
        target: OverrideTarget,
    ) -> Result<Option<OverrideRow>> {
        Ok(catalog
            .list_overrides(target.suite_id, target.component_id, target.override_type_id)?
            .into_iter()
            .find(|row| row.package == package))
    }

    #[test]
    fn schema_version() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = td.path().join("catalog.db");

        Catalog::new_path(&path)?;
        // Reopening an initialized database is fine.
        Catalog::new_path(&path)?;

        {
            let conn = Connection::open(&path)?;
            conn.pragma_update(None, "user_version", 42)?;
        }

        assert!(matches!(
            Catalog::new_path(&path),
            Err(ArchiveError::SchemaVersion(42))
        ));

        Ok(())
    }

    #[test]
    fn reference_data() -> Result<()> {
        let mut catalog = Catalog::new_memory()?;

        catalog.with_transaction(|txn| {
            let main = txn.ensure_component("main")?;
            assert_eq!(txn.ensure_component("main")?, main);
            txn.ensure_priority("optional", 4)?;
            txn.ensure_priority("required", 1)?;
            txn.ensure_section("libs")?;
            txn.ensure_override_type(OverrideType::Dsc)?;
            txn.ensure_suite(&suite("unstable", "sid", None))?;
            txn.ensure_suite(&suite("experimental", "rc-buggy", Some("sid")))?;
            txn.commit()
        })?;

        assert_eq!(
            catalog
                .list_priorities()?
                .into_iter()
                .map(|(_, name)| name)
                .collect::<Vec<_>>(),
            vec!["required", "optional"]
        );
        assert!(catalog.lookup_component("main")?.is_some());
        assert!(catalog.lookup_component("contrib")?.is_none());
        assert!(catalog.lookup_override_type(OverrideType::Dsc)?.is_some());
        assert!(catalog.lookup_override_type(OverrideType::Deb)?.is_none());

        let experimental = catalog.require_suite("experimental")?;
        assert_eq!(experimental.override_codename.as_deref(), Some("sid"));
        assert_eq!(
            catalog
                .suites_sharing_overrides("sid")?
                .into_iter()
                .map(|s| s.name)
                .collect::<Vec<_>>(),
            vec!["experimental", "unstable"]
        );
        assert!(matches!(
            catalog.require_suite("stable"),
            Err(ArchiveError::UnknownSuite(_))
        ));

        Ok(())
    }

    #[test]
    fn overrides() -> Result<()> {
        let mut catalog = Catalog::new_memory()?;

        let target = catalog.with_transaction(|txn| {
            let target = OverrideTarget {
                suite_id: txn.ensure_suite(&suite("unstable", "sid", None))?,
                component_id: txn.ensure_component("main")?,
                override_type_id: txn.ensure_override_type(OverrideType::Deb)?,
            };
            let optional = txn.ensure_priority("optional", 4)?;
            let libs = txn.ensure_section("libs")?;

            txn.insert_override("foo", target, optional, libs, "")?;
            assert!(txn.insert_override("foo", target, optional, libs, "").is_err());
            txn.insert_override("bar", target, optional, libs, "")?;
            txn.commit()?;

            Ok(target)
        })?;

        let rows = catalog.list_overrides(
            target.suite_id,
            target.component_id,
            target.override_type_id,
        )?;
        assert_eq!(
            rows.iter().map(|r| r.package.as_str()).collect::<Vec<_>>(),
            vec!["bar", "foo"]
        );

        // Uncommitted transactions roll back.
        catalog.with_transaction(|txn| {
            assert!(txn.delete_override("foo", target)?);
            assert!(find(&txn, "foo", target)?.is_none());
            Ok(())
        })?;
        assert!(find(&catalog, "foo", target)?.is_some());

        catalog.with_transaction(|txn| {
            let extra = txn.ensure_priority("extra", 5)?;
            let net = txn.ensure_section("net")?;
            assert!(txn.update_override("foo", target, None, net, "Jane Doe")?);
            let row = find(&txn, "foo", target)?.ok_or_else(|| {
                ArchiveError::CatalogIntegrity("override vanished".into())
            })?;
            assert_eq!(row.section_id, net);
            assert_ne!(row.priority_id, extra);
            assert_eq!(row.maintainer, "Jane Doe");
            assert!(!txn.update_override("baz", target, Some(extra), net, "")?);
            txn.commit()
        })?;

        assert!(catalog.has_override_in_suite("foo", target.suite_id, target.override_type_id)?);
        assert!(!catalog.has_override_in_suite("baz", target.suite_id, target.override_type_id)?);

        Ok(())
    }

    #[test]
    fn packages() -> Result<()> {
        let mut catalog = Catalog::new_memory()?;

        let (unstable, experimental, main) = catalog.with_transaction(|txn| {
            let unstable = txn.ensure_suite(&suite("unstable", "sid", None))?;
            let experimental = txn.ensure_suite(&suite("experimental", "rc-buggy", Some("sid")))?;
            let main = txn.ensure_component("main")?;
            let contrib = txn.ensure_component("contrib")?;

            txn.add_binary(unstable, main, OverrideType::Deb, "foo", "1.0-1", "amd64")?;
            txn.add_binary(unstable, main, OverrideType::Deb, "foo", "1.0-1", "arm64")?;
            txn.add_binary(experimental, main, OverrideType::Deb, "bar", "2.0-1", "amd64")?;
            txn.add_binary(unstable, main, OverrideType::Udeb, "foo-udeb", "1.0-1", "amd64")?;
            txn.add_binary(unstable, contrib, OverrideType::Deb, "baz", "1.0-1", "all")?;
            txn.add_source(unstable, main, "foo", "1.0-1")?;
            txn.add_source(experimental, main, "bar", "2.0-1")?;
            txn.commit()?;

            Ok((unstable, experimental, main))
        })?;

        assert_eq!(
            catalog
                .list_binary_packages(&[unstable, experimental], main, OverrideType::Deb)?
                .into_iter()
                .collect::<Vec<_>>(),
            vec!["bar", "foo"]
        );
        assert_eq!(
            catalog
                .list_binary_packages(&[unstable], main, OverrideType::Udeb)?
                .into_iter()
                .collect::<Vec<_>>(),
            vec!["foo-udeb"]
        );
        assert_eq!(
            catalog
                .list_source_packages(&[experimental], main)?
                .into_iter()
                .collect::<Vec<_>>(),
            vec!["bar"]
        );

        Ok(())
    }

    #[test]
    fn uploads_and_notes() -> Result<()> {
        let mut catalog = Catalog::new_memory()?;

        let mut u = upload("foo", "1.0-1");
        u.binaries.push(binary("foo", "utils", "optional"));
        u.binaries.push(binary("libfoo1", "libs", "optional"));
        u.source_package = Some(UploadSource {
            source: "foo".into(),
            version: "1.0-1".into(),
            section: "utils".into(),
            filename: "foo_1.0-1.dsc".into(),
            size: 512,
        });
        u.byhand.push(ByhandFile {
            filename: "foo_1.0-1_doc.tar.gz".into(),
            processed: true,
        });

        let (queue_id, upload_id) = catalog.with_transaction(|txn| {
            let suite_id = txn.ensure_suite(&suite("unstable", "sid", None))?;
            let queue_id = txn.ensure_policy_queue("new", &PathBuf::from("/srv/queue/new"))?;
            let upload_id = txn.add_upload(queue_id, suite_id, &u)?;

            let now = Utc::now();
            txn.add_note("foo", "1.0-1", "jdoe", "needs copyright review", now, false)?;
            txn.add_note("foo", "0.9-1", "jdoe", "old note", now, true)?;
            txn.add_note("bar", "2.0-1", "rroe", "fine", now, false)?;
            txn.commit()?;

            Ok((queue_id, upload_id))
        })?;

        let queue = catalog
            .lookup_policy_queue("new")?
            .ok_or_else(|| ArchiveError::UnknownPolicyQueue("new".into()))?;
        assert_eq!(queue.id, queue_id);
        assert_eq!(queue.path, PathBuf::from("/srv/queue/new"));

        let uploads = catalog.queue_uploads(queue_id)?;
        assert_eq!(uploads.len(), 1);
        let mut expected = u.clone();
        expected.id = upload_id;
        assert_eq!(uploads[0], expected);

        assert_eq!(catalog.notes("foo", None)?.len(), 2);
        assert_eq!(catalog.notes("foo", Some("1.0-1"))?.len(), 1);
        assert!(catalog.notes("foo", Some("1.0-1"))?[0].comment.contains("copyright"));
        assert_eq!(
            catalog
                .notes_for_packages(&["bar".to_string(), "foo".to_string()])?
                .into_iter()
                .map(|n| format!("{}_{}", n.package, n.version))
                .collect::<Vec<_>>(),
            vec!["bar_2.0-1", "foo_0.9-1", "foo_1.0-1"]
        );

        catalog.with_transaction(|txn| {
            assert_eq!(txn.delete_notes("foo", Some("1.0-1"))?, 1);
            txn.remove_upload(upload_id)?;
            txn.commit()
        })?;

        assert_eq!(catalog.notes("foo", None)?.len(), 1);
        assert!(catalog.queue_uploads(queue_id)?.is_empty());
        let count: i64 = catalog.connection().query_row(
            "SELECT COUNT(*) FROM upload_binary",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(count, 0);

        Ok(())
    }
}
