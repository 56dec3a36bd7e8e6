// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Reference data used by reconciliation and triage.

Priorities, sections and components are identified by database ids in storage but by
name everywhere a human is involved. [ReferenceTables] holds both directions of the
mapping. It is built once per run and shared immutably.
*/

use {
    crate::{
        catalog::CatalogQueries,
        error::{ArchiveError, Result},
    },
    log::warn,
    std::{
        collections::{BTreeSet, HashMap},
        fmt::{Display, Formatter},
        path::Path,
        str::FromStr,
    },
};

/// The priority all source overrides carry.
pub const SOURCE_PRIORITY: &str = "source";

/// Section reserved for installer packages.
pub const INSTALLER_SECTION: &str = "debian-installer";

/// Component used when a section carries no component prefix.
pub const DEFAULT_COMPONENT: &str = "main";

/// The kind of package an override applies to.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum OverrideType {
    /// A regular binary package (`.deb`).
    Deb,
    /// An installer binary package (`.udeb`).
    Udeb,
    /// A source package (`.dsc`).
    Dsc,
}

impl OverrideType {
    /// The name of this type as stored in the catalog.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deb => "deb",
            Self::Udeb => "udeb",
            Self::Dsc => "dsc",
        }
    }
}

impl Display for OverrideType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverrideType {
    type Err = ArchiveError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "deb" => Ok(Self::Deb),
            "udeb" => Ok(Self::Udeb),
            "dsc" => Ok(Self::Dsc),
            _ => Err(ArchiveError::UnknownOverrideType(s.to_string())),
        }
    }
}

/// Derive the component a section belongs to.
///
/// `contrib/net` belongs to `contrib`. Sections without a `/` belong to the default
/// component. The section itself is kept whole.
pub fn component_from_section(section: &str) -> &str {
    match section.split_once('/') {
        Some((component, _)) => component,
        None => DEFAULT_COMPONENT,
    }
}

/// A bidirectional mapping between names and ids.
#[derive(Clone, Debug, Default)]
pub struct NameTable {
    by_name: HashMap<String, i64>,
    by_id: HashMap<i64, String>,
}

impl NameTable {
    pub fn new(rows: impl IntoIterator<Item = (i64, String)>) -> Self {
        let mut table = Self::default();

        for (id, name) in rows {
            table.by_name.insert(name.clone(), id);
            table.by_id.insert(id, name);
        }

        table
    }

    pub fn id(&self, name: &str) -> Option<i64> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: i64) -> Option<&str> {
        self.by_id.get(&id).map(|s| s.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names = self.by_name.keys().map(|s| s.as_str()).collect::<Vec<_>>();
        names.sort_unstable();

        names
    }

    /// Names starting with a prefix, for input completion.
    pub fn complete(&self, prefix: &str) -> Vec<&str> {
        self.names()
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .collect()
    }
}

/// Priority, section and component lookup tables.
#[derive(Clone, Debug, Default)]
pub struct ReferenceTables {
    pub priorities: NameTable,
    pub sections: NameTable,
    pub components: NameTable,
}

impl ReferenceTables {
    /// Load the tables from a catalog.
    pub fn load(catalog: &impl CatalogQueries) -> Result<Self> {
        Ok(Self {
            priorities: NameTable::new(catalog.list_priorities()?),
            sections: NameTable::new(catalog.list_sections()?),
            components: NameTable::new(catalog.list_components()?),
        })
    }

    /// Resolve a priority id to its display name.
    pub fn priority_name(&self, id: i64) -> Result<&str> {
        self.priorities
            .name(id)
            .ok_or_else(|| ArchiveError::CatalogIntegrity(format!("unknown priority id {}", id)))
    }

    /// Resolve a section id to its display name.
    pub fn section_name(&self, id: i64) -> Result<&str> {
        self.sections
            .name(id)
            .ok_or_else(|| ArchiveError::CatalogIntegrity(format!("unknown section id {}", id)))
    }

    pub fn priority_id(&self, name: &str) -> Result<i64> {
        self.priorities
            .id(name)
            .ok_or_else(|| ArchiveError::UnknownPriority(name.to_string()))
    }

    pub fn section_id(&self, name: &str) -> Result<i64> {
        self.sections
            .id(name)
            .ok_or_else(|| ArchiveError::UnknownSection(name.to_string()))
    }

    pub fn component_id(&self, name: &str) -> Result<i64> {
        self.components
            .id(name)
            .ok_or_else(|| ArchiveError::UnknownComponent(name.to_string()))
    }

    /// Explain why a proposed classification is unusable, if it is.
    pub fn classification_problem(
        &self,
        override_type: OverrideType,
        priority: &str,
        section: &str,
    ) -> Option<String> {
        if !self.priorities.contains(priority) {
            Some(format!("unknown priority {}", priority))
        } else if !self.sections.contains(section) {
            Some(format!("unknown section {}", section))
        } else if !self.components.contains(component_from_section(section)) {
            Some(format!(
                "unknown component {}",
                component_from_section(section)
            ))
        } else if override_type == OverrideType::Udeb && section != INSTALLER_SECTION {
            Some(format!("udeb must be in section {}", INSTALLER_SECTION))
        } else if override_type == OverrideType::Deb && section == INSTALLER_SECTION {
            Some(format!("section {} is reserved for udebs", INSTALLER_SECTION))
        } else if override_type == OverrideType::Dsc && priority != SOURCE_PRIORITY {
            Some(format!("source packages must have priority {}", SOURCE_PRIORITY))
        } else {
            None
        }
    }
}

/// Package names that must never lose their overrides.
///
/// Built from the file listing of the holding area for accepted uploads: an upload in
/// there has been accepted but not installed yet, so the catalog doesn't know about its
/// packages.
#[derive(Clone, Debug, Default)]
pub struct Blacklist {
    packages: BTreeSet<String>,
}

impl Blacklist {
    pub fn new(packages: impl IntoIterator<Item = String>) -> Self {
        Self {
            packages: packages.into_iter().collect(),
        }
    }

    /// Build from the file names in a directory.
    ///
    /// File names are truncated at the first `_`, so `foo_1.0-1_amd64.deb` protects `foo`.
    pub fn from_directory(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            warn!(
                "W: {} does not exist; no packages are protected",
                path.display()
            );
            return Ok(Self::default());
        }

        let mut packages = BTreeSet::new();

        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();

            let package = name.split('_').next().unwrap_or_default();
            if !package.is_empty() {
                packages.insert(package.to_string());
            }
        }

        Ok(Self { packages })
    }

    pub fn contains(&self, package: &str) -> bool {
        self.packages.contains(package)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tables() -> ReferenceTables {
        ReferenceTables {
            priorities: NameTable::new(vec![
                (1, "optional".to_string()),
                (2, "extra".to_string()),
                (3, "source".to_string()),
            ]),
            sections: NameTable::new(vec![
                (1, "libs".to_string()),
                (2, "net".to_string()),
                (3, "debian-installer".to_string()),
                (4, "contrib/net".to_string()),
                (5, "bogus/net".to_string()),
            ]),
            components: NameTable::new(vec![(1, "main".to_string()), (2, "contrib".to_string())]),
        }
    }

    #[test]
    fn override_type_names() -> Result<()> {
        for t in [OverrideType::Deb, OverrideType::Udeb, OverrideType::Dsc] {
            assert_eq!(OverrideType::from_str(t.as_str())?, t);
        }
        assert!(OverrideType::from_str("rpm").is_err());

        Ok(())
    }

    #[test]
    fn section_components() {
        assert_eq!(component_from_section("net"), "main");
        assert_eq!(component_from_section("contrib/net"), "contrib");
        assert_eq!(component_from_section("non-free/libs/extra"), "non-free");
    }

    #[test]
    fn name_table() {
        let tables = tables();

        assert_eq!(tables.priorities.id("optional"), Some(1));
        assert_eq!(tables.priorities.name(3), Some("source"));
        assert_eq!(tables.sections.complete("n"), vec!["net"]);
        assert_eq!(tables.sections.complete("contrib"), vec!["contrib/net"]);
        assert!(tables.section_name(42).is_err());
    }

    #[test]
    fn classification_rules() {
        let tables = tables();

        assert_eq!(
            tables.classification_problem(OverrideType::Deb, "optional", "libs"),
            None
        );
        assert_eq!(
            tables.classification_problem(OverrideType::Deb, "optional", "contrib/net"),
            None
        );
        assert!(tables
            .classification_problem(OverrideType::Deb, "important", "libs")
            .is_some());
        assert!(tables
            .classification_problem(OverrideType::Deb, "optional", "games")
            .is_some());
        assert!(tables
            .classification_problem(OverrideType::Deb, "optional", "bogus/net")
            .is_some());
        assert!(tables
            .classification_problem(OverrideType::Udeb, "optional", "libs")
            .is_some());
        assert_eq!(
            tables.classification_problem(OverrideType::Udeb, "extra", "debian-installer"),
            None
        );
        assert!(tables
            .classification_problem(OverrideType::Deb, "optional", "debian-installer")
            .is_some());
        assert_eq!(
            tables.classification_problem(OverrideType::Dsc, "source", "net"),
            None
        );
        assert!(tables
            .classification_problem(OverrideType::Dsc, "optional", "net")
            .is_some());
    }

    #[test]
    fn blacklist_from_directory() -> Result<()> {
        let td = tempfile::tempdir()?;
        for name in ["foo_1.0-1_amd64.deb", "foo_1.0-1.dsc", "bar_2.0_all.changes"] {
            std::fs::write(td.path().join(name), b"")?;
        }

        let blacklist = Blacklist::from_directory(td.path())?;
        assert_eq!(blacklist.len(), 2);
        assert!(blacklist.contains("foo"));
        assert!(blacklist.contains("bar"));
        assert!(!blacklist.contains("baz"));

        let missing = Blacklist::from_directory(td.path().join("missing"))?;
        assert!(missing.is_empty());

        Ok(())
    }
}
