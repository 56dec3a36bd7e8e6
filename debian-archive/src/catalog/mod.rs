// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The catalog of suites, packages, overrides and queued uploads.

The catalog is the single source of truth for the archive. It is stored in SQLite; see
[sqlite::Catalog] for the connection type and [sqlite::CatalogTransaction] for mutating it.

Read queries are defined on the [CatalogQueries] trait so they work identically against a
plain connection and from within a transaction.
*/

pub mod sqlite;

pub use sqlite::{Catalog, CatalogTransaction};

use {
    crate::{
        error::{ArchiveError, Result},
        reference::OverrideType,
        upload::{ByhandFile, Note, PolicyQueue, Upload, UploadBinary, UploadSource},
    },
    chrono::{DateTime, Utc},
    indoc::indoc,
    rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension},
    std::{collections::BTreeSet, path::PathBuf, str::FromStr},
};

/// A suite known to the catalog.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Suite {
    pub id: i64,
    pub name: String,
    pub codename: String,
    /// Codename of the override namespace this suite uses.
    pub override_codename: Option<String>,
    /// Name of the suite receiving new overrides on behalf of this suite.
    pub override_suite: Option<String>,
}

/// An override row within a (suite, component, type) partition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OverrideRow {
    pub package: String,
    pub override_type_id: i64,
    pub priority_id: i64,
    pub section_id: i64,
    pub maintainer: String,
}

impl OverrideRow {
    /// Whether the classification of two rows differs.
    pub fn differs_from(&self, other: &OverrideRow) -> bool {
        self.priority_id != other.priority_id
            || self.section_id != other.section_id
            || self.maintainer != other.maintainer
    }
}

/// Fully qualified identity of an override row.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OverrideTarget {
    pub suite_id: i64,
    pub component_id: i64,
    pub override_type_id: i64,
}

fn id_list(ids: &[i64]) -> String {
    vec!["?"; ids.len()].join(", ")
}

fn parse_timestamp(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Read queries against the catalog.
pub trait CatalogQueries {
    /// The connection queries are issued on.
    fn connection(&self) -> &Connection;

    /// Look up a suite by name.
    fn lookup_suite(&self, name: &str) -> Result<Option<Suite>> {
        let mut statement = self.connection().prepare_cached(indoc! {"
            SELECT id, name, codename, override_codename, override_suite
            FROM suite
            WHERE name = ?
        "})?;

        Ok(statement
            .query_row(params![name], |row| {
                Ok(Suite {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    codename: row.get(2)?,
                    override_codename: row.get(3)?,
                    override_suite: row.get(4)?,
                })
            })
            .optional()?)
    }

    /// Look up a suite by name, treating absence as a configuration error.
    fn require_suite(&self, name: &str) -> Result<Suite> {
        self.lookup_suite(name)?
            .ok_or_else(|| ArchiveError::UnknownSuite(name.to_string()))
    }

    /// All suites whose override namespace is `codename`.
    fn suites_sharing_overrides(&self, codename: &str) -> Result<Vec<Suite>> {
        let mut statement = self.connection().prepare_cached(indoc! {"
            SELECT id, name, codename, override_codename, override_suite
            FROM suite
            WHERE COALESCE(override_codename, codename) = ?
            ORDER BY name ASC
        "})?;

        let res = statement.query_map(params![codename], |row| {
            Ok(Suite {
                id: row.get(0)?,
                name: row.get(1)?,
                codename: row.get(2)?,
                override_codename: row.get(3)?,
                override_suite: row.get(4)?,
            })
        })?;

        Ok(res.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn lookup_component(&self, name: &str) -> Result<Option<i64>> {
        Ok(self
            .connection()
            .query_row("SELECT id FROM component WHERE name = ?", params![name], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn lookup_override_type(&self, override_type: OverrideType) -> Result<Option<i64>> {
        Ok(self
            .connection()
            .query_row(
                "SELECT id FROM override_type WHERE name = ?",
                params![override_type.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn lookup_priority(&self, name: &str) -> Result<Option<i64>> {
        Ok(self
            .connection()
            .query_row("SELECT id FROM priority WHERE name = ?", params![name], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn list_priorities(&self) -> Result<Vec<(i64, String)>> {
        list_names(self.connection(), "SELECT id, name FROM priority ORDER BY level, name")
    }

    fn list_sections(&self) -> Result<Vec<(i64, String)>> {
        list_names(self.connection(), "SELECT id, name FROM section ORDER BY name")
    }

    fn list_components(&self) -> Result<Vec<(i64, String)>> {
        list_names(self.connection(), "SELECT id, name FROM component ORDER BY name")
    }

    /// Names of binary packages of a type associated with any of the given suites.
    fn list_binary_packages(
        &self,
        suite_ids: &[i64],
        component_id: i64,
        override_type: OverrideType,
    ) -> Result<BTreeSet<String>> {
        let sql = format!(
            indoc! {"
                SELECT DISTINCT b.package
                FROM binary_package b, binary_association ba
                WHERE b.id = ba.binary_id
                    AND b.type = ?
                    AND b.component_id = ?
                    AND ba.suite_id IN ({})
            "},
            id_list(suite_ids)
        );

        let mut values = vec![
            Value::Text(override_type.as_str().to_string()),
            Value::Integer(component_id),
        ];
        values.extend(suite_ids.iter().map(|id| Value::Integer(*id)));

        let mut statement = self.connection().prepare(&sql)?;
        let res = statement.query_map(params_from_iter(values.iter()), |row| row.get(0))?;

        Ok(res.collect::<rusqlite::Result<BTreeSet<String>>>()?)
    }

    /// Names of source packages associated with any of the given suites.
    fn list_source_packages(
        &self,
        suite_ids: &[i64],
        component_id: i64,
    ) -> Result<BTreeSet<String>> {
        let sql = format!(
            indoc! {"
                SELECT DISTINCT s.source
                FROM source_package s, source_association sa
                WHERE s.id = sa.source_id
                    AND s.component_id = ?
                    AND sa.suite_id IN ({})
            "},
            id_list(suite_ids)
        );

        let mut values = vec![Value::Integer(component_id)];
        values.extend(suite_ids.iter().map(|id| Value::Integer(*id)));

        let mut statement = self.connection().prepare(&sql)?;
        let res = statement.query_map(params_from_iter(values.iter()), |row| row.get(0))?;

        Ok(res.collect::<rusqlite::Result<BTreeSet<String>>>()?)
    }

    /// Override rows of one (suite, component, type) partition, ordered by package.
    fn list_overrides(
        &self,
        suite_id: i64,
        component_id: i64,
        override_type_id: i64,
    ) -> Result<Vec<OverrideRow>> {
        let mut statement = self.connection().prepare_cached(indoc! {"
            SELECT package, type_id, priority_id, section_id, maintainer
            FROM override
            WHERE suite_id = ? AND component_id = ? AND type_id = ?
            ORDER BY package ASC
        "})?;

        let res = statement.query_map(params![suite_id, component_id, override_type_id], |row| {
            override_row(row)
        })?;

        Ok(res.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Override rows of every type in a (suite, component) partition.
    ///
    /// Rows are ordered by package then type.
    fn list_overrides_any_type(
        &self,
        suite_id: i64,
        component_id: i64,
    ) -> Result<Vec<OverrideRow>> {
        let mut statement = self.connection().prepare_cached(indoc! {"
            SELECT package, type_id, priority_id, section_id, maintainer
            FROM override
            WHERE suite_id = ? AND component_id = ?
            ORDER BY package ASC, type_id ASC
        "})?;

        let res = statement.query_map(params![suite_id, component_id], |row| override_row(row))?;

        Ok(res.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Whether a package has an override of a type in a suite, in any component.
    fn has_override_in_suite(
        &self,
        package: &str,
        suite_id: i64,
        override_type_id: i64,
    ) -> Result<bool> {
        let count: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM override WHERE package = ? AND suite_id = ? AND type_id = ?",
            params![package, suite_id, override_type_id],
            |row| row.get(0),
        )?;

        Ok(count > 0)
    }

    fn lookup_policy_queue(&self, name: &str) -> Result<Option<PolicyQueue>> {
        Ok(self
            .connection()
            .query_row(
                "SELECT id, name, path FROM policy_queue WHERE name = ?",
                params![name],
                |row| {
                    let path: String = row.get(2)?;

                    Ok(PolicyQueue {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        path: PathBuf::from(path),
                    })
                },
            )
            .optional()?)
    }

    /// All uploads waiting in a policy queue.
    fn queue_uploads(&self, queue_id: i64) -> Result<Vec<Upload>> {
        let ids = {
            let mut statement = self
                .connection()
                .prepare_cached("SELECT id FROM upload WHERE policy_queue_id = ? ORDER BY id")?;
            let res = statement.query_map(params![queue_id], |row| row.get(0))?;
            res.collect::<rusqlite::Result<Vec<i64>>>()?
        };

        ids.into_iter().map(|id| self.upload(id)).collect()
    }

    /// Load an upload with everything it contains.
    fn upload(&self, upload_id: i64) -> Result<Upload> {
        let conn = self.connection();

        let mut upload = conn.query_row(
            indoc! {"
                SELECT upload.id, changes_name, source, version, suite.name, maintainer, changed_by
                FROM upload, suite
                WHERE upload.id = ? AND suite.id = upload.target_suite_id
            "},
            params![upload_id],
            |row| {
                Ok(Upload {
                    id: row.get(0)?,
                    changes_name: row.get(1)?,
                    source: row.get(2)?,
                    version: row.get(3)?,
                    target_suite: row.get(4)?,
                    maintainer: row.get(5)?,
                    changed_by: row.get(6)?,
                    binaries: vec![],
                    source_package: None,
                    byhand: vec![],
                })
            },
        )?;

        let mut statement = conn.prepare_cached(indoc! {"
            SELECT package, version, architecture, type, section, priority, filename, size,
                description
            FROM upload_binary
            WHERE upload_id = ?
            ORDER BY package ASC, architecture ASC
        "})?;
        let rows = statement.query_map(params![upload_id], |row| {
            let override_type: String = row.get(3)?;

            Ok((
                override_type,
                UploadBinary {
                    package: row.get(0)?,
                    version: row.get(1)?,
                    architecture: row.get(2)?,
                    override_type: OverrideType::Deb,
                    section: row.get(4)?,
                    priority: row.get(5)?,
                    filename: row.get(6)?,
                    size: row.get::<_, i64>(7)? as u64,
                    description: row.get(8)?,
                },
            ))
        })?;
        for row in rows {
            let (override_type, mut binary) = row?;
            binary.override_type = OverrideType::from_str(&override_type)?;
            upload.binaries.push(binary);
        }

        upload.source_package = conn
            .query_row(
                indoc! {"
                    SELECT source, version, section, filename, size
                    FROM upload_source
                    WHERE upload_id = ?
                "},
                params![upload_id],
                |row| {
                    Ok(UploadSource {
                        source: row.get(0)?,
                        version: row.get(1)?,
                        section: row.get(2)?,
                        filename: row.get(3)?,
                        size: row.get::<_, i64>(4)? as u64,
                    })
                },
            )
            .optional()?;

        let mut statement = conn.prepare_cached(
            "SELECT filename, processed FROM upload_byhand WHERE upload_id = ? ORDER BY filename",
        )?;
        let rows = statement.query_map(params![upload_id], |row| {
            Ok(ByhandFile {
                filename: row.get(0)?,
                processed: row.get(1)?,
            })
        })?;
        upload.byhand = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(upload)
    }

    /// Notes attached to a source package, optionally restricted to a version.
    ///
    /// Notes are ordered oldest first.
    fn notes(&self, package: &str, version: Option<&str>) -> Result<Vec<Note>> {
        let mut statement = self.connection().prepare_cached(indoc! {"
            SELECT id, package, version, author, comment, notedate, trainee
            FROM new_comment
            WHERE package = ?1 AND (?2 IS NULL OR version = ?2)
            ORDER BY notedate ASC, id ASC
        "})?;

        let res = statement.query_map(params![package, version], |row| note_row(row))?;

        Ok(res.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Notes attached to any of the given source packages, ordered by package and version.
    fn notes_for_packages(&self, packages: &[String]) -> Result<Vec<Note>> {
        if packages.is_empty() {
            return Ok(vec![]);
        }

        let sql = format!(
            indoc! {"
                SELECT id, package, version, author, comment, notedate, trainee
                FROM new_comment
                WHERE package IN ({})
                ORDER BY package ASC, version ASC, id ASC
            "},
            vec!["?"; packages.len()].join(", ")
        );

        let mut statement = self.connection().prepare(&sql)?;
        let res = statement.query_map(params_from_iter(packages.iter()), |row| note_row(row))?;

        Ok(res.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn list_names(conn: &Connection, sql: &str) -> Result<Vec<(i64, String)>> {
    let mut statement = conn.prepare_cached(sql)?;
    let res = statement.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

    Ok(res.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn override_row(row: &rusqlite::Row) -> rusqlite::Result<OverrideRow> {
    Ok(OverrideRow {
        package: row.get(0)?,
        override_type_id: row.get(1)?,
        priority_id: row.get(2)?,
        section_id: row.get(3)?,
        maintainer: row.get(4)?,
    })
}

fn note_row(row: &rusqlite::Row) -> rusqlite::Result<Note> {
    let timestamp: String = row.get(5)?;

    Ok(Note {
        id: row.get(0)?,
        package: row.get(1)?,
        version: row.get(2)?,
        author: row.get(3)?,
        comment: row.get(4)?,
        timestamp: parse_timestamp(&timestamp)?,
        trainee: row.get(6)?,
    })
}
