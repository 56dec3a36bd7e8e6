// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! NEW queue triage.

Uploads introducing packages without overrides wait in the NEW policy queue until an
operator classifies them. For every upload the set of [MissingOverride] entries is
recomputed on each pass of the decision loop. An upload may only be accepted once every
entry carries a valid classification, no notes are attached to its source package and
all byhand files have been dealt with.

The decision logic is in [machine], a pure transition function. [edit] holds the
override editing dialogs and [session] drives uploads through the loop, performing the
effects the machine asks for.
*/

pub mod edit;
pub mod machine;
pub mod session;

use {
    crate::{
        catalog::CatalogQueries,
        error::{ArchiveError, Result},
        reference::{component_from_section, OverrideType, ReferenceTables, SOURCE_PRIORITY},
        upload::Upload,
    },
    std::collections::HashSet,
};

/// A package of an upload lacking an override in the upload's target suite.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MissingOverride {
    pub package: String,
    pub override_type: OverrideType,
    pub priority: String,
    pub section: String,
    pub component: String,
    /// Whether the proposed classification is acceptable.
    pub valid: bool,
}

impl MissingOverride {
    pub fn new(
        package: impl ToString,
        override_type: OverrideType,
        priority: impl ToString,
        section: impl ToString,
    ) -> Self {
        let section = section.to_string();

        Self {
            package: package.to_string(),
            override_type,
            priority: priority.to_string(),
            component: component_from_section(&section).to_string(),
            section,
            valid: false,
        }
    }

    /// Name shown to operators: `type:package` for anything but `deb`.
    pub fn display_name(&self) -> String {
        if self.override_type == OverrideType::Deb {
            self.package.clone()
        } else {
            format!("{}:{}", self.override_type, self.package)
        }
    }

    fn same_package(&self, other: &Self) -> bool {
        self.override_type == other.override_type && self.package == other.package
    }
}

/// Recompute validity flags of entries.
///
/// Returns whether every entry is valid.
pub fn check_valid(missing: &mut [MissingOverride], refs: &ReferenceTables) -> bool {
    for entry in missing.iter_mut() {
        entry.valid = refs
            .classification_problem(entry.override_type, &entry.priority, &entry.section)
            .is_none();
    }

    missing.iter().all(|entry| entry.valid)
}

/// Name of the suite new overrides of an upload are written to.
pub fn override_suite_name(catalog: &impl CatalogQueries, upload: &Upload) -> Result<String> {
    let suite = catalog.require_suite(&upload.target_suite)?;

    Ok(suite.override_suite.unwrap_or(suite.name))
}

/// Determine the packages of an upload lacking an override.
///
/// Classifications the packages declare are proposed, unless `hints` holds an entry for
/// the same package, in which case the hint's classification wins. This preserves
/// operator edits across passes of the decision loop.
pub fn compute_missing(
    upload: &Upload,
    catalog: &impl CatalogQueries,
    refs: &ReferenceTables,
    hints: &[MissingOverride],
) -> Result<Vec<MissingOverride>> {
    let suite = catalog.require_suite(&override_suite_name(catalog, upload)?)?;

    let mut seen = HashSet::new();
    let mut missing = vec![];

    let mut proposals = upload
        .binaries
        .iter()
        .map(|b| MissingOverride::new(&b.package, b.override_type, &b.priority, &b.section))
        .collect::<Vec<_>>();
    if let Some(source) = &upload.source_package {
        proposals.push(MissingOverride::new(
            &source.source,
            OverrideType::Dsc,
            SOURCE_PRIORITY,
            &source.section,
        ));
    }

    for proposal in proposals {
        if !seen.insert((proposal.override_type, proposal.package.clone())) {
            continue;
        }

        let type_id = catalog
            .lookup_override_type(proposal.override_type)?
            .ok_or_else(|| ArchiveError::UnknownOverrideType(proposal.override_type.to_string()))?;

        if catalog.has_override_in_suite(&proposal.package, suite.id, type_id)? {
            continue;
        }

        let entry = hints
            .iter()
            .find(|hint| hint.same_package(&proposal))
            .cloned()
            .unwrap_or(proposal);

        missing.push(entry);
    }

    check_valid(&mut missing, refs);

    Ok(missing)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            testing,
            upload::{test::binary, test::upload, UploadSource},
        },
    };

    fn foo_upload() -> Upload {
        let mut u = upload("foo", "1.0-1");
        u.binaries.push(binary("foo", "utils", "optional"));
        u.binaries.push(binary("libfoo1", "libs", "optional"));

        let mut other_arch = binary("libfoo1", "libs", "optional");
        other_arch.architecture = "arm64".into();
        other_arch.filename = "libfoo1_1.0-1_arm64.deb".into();
        u.binaries.push(other_arch);

        let mut udeb = binary("foo-udeb", "debian-installer", "optional");
        udeb.override_type = OverrideType::Udeb;
        u.binaries.push(udeb);

        u.source_package = Some(UploadSource {
            source: "foo".into(),
            version: "1.0-1".into(),
            section: "utils".into(),
            filename: "foo_1.0-1.dsc".into(),
            size: 100,
        });

        u
    }

    #[test]
    fn display_names() {
        assert_eq!(
            MissingOverride::new("foo", OverrideType::Deb, "optional", "utils").display_name(),
            "foo"
        );
        assert_eq!(
            MissingOverride::new("foo", OverrideType::Dsc, "source", "utils").display_name(),
            "dsc:foo"
        );
        assert_eq!(
            MissingOverride::new("bar", OverrideType::Deb, "optional", "contrib/net").component,
            "contrib"
        );
    }

    #[test]
    fn missing_entries() -> Result<()> {
        let td = tempfile::tempdir()?;
        let config = testing::config(td.path())?;
        let mut catalog = testing::catalog(&config)?;
        let refs = ReferenceTables::load(&catalog)?;

        let u = foo_upload();
        let missing = compute_missing(&u, &catalog, &refs, &[])?;

        assert_eq!(
            missing
                .iter()
                .map(|m| (m.display_name(), m.priority.as_str(), m.valid))
                .collect::<Vec<_>>(),
            vec![
                ("foo".to_string(), "optional", true),
                ("libfoo1".to_string(), "optional", true),
                ("udeb:foo-udeb".to_string(), "optional", true),
                ("dsc:foo".to_string(), "source", true),
            ]
        );

        testing::add_override(
            &mut catalog,
            "libfoo1",
            ("unstable", "main", OverrideType::Deb),
            "optional",
            "libs",
            "",
        )?;
        testing::add_override(
            &mut catalog,
            "foo",
            ("unstable", "main", OverrideType::Dsc),
            "source",
            "utils",
            "",
        )?;

        let missing = compute_missing(&u, &catalog, &refs, &[])?;
        assert_eq!(
            missing
                .iter()
                .map(|m| m.display_name())
                .collect::<Vec<_>>(),
            vec!["foo", "udeb:foo-udeb"]
        );

        Ok(())
    }

    #[test]
    fn hints_and_validity() -> Result<()> {
        let td = tempfile::tempdir()?;
        let config = testing::config(td.path())?;
        let catalog = testing::catalog(&config)?;
        let refs = ReferenceTables::load(&catalog)?;

        let mut u = foo_upload();
        u.binaries[0].section = "games".into();

        let missing = compute_missing(&u, &catalog, &refs, &[])?;
        assert!(!missing[0].valid);
        assert!(missing[1..].iter().all(|m| m.valid));

        let hints = vec![MissingOverride::new("foo", OverrideType::Deb, "optional", "net")];
        let missing = compute_missing(&u, &catalog, &refs, &hints)?;
        assert_eq!(missing[0].section, "net");
        assert!(missing[0].valid);

        let mut entries = missing.clone();
        entries[2].section = "libs".into();
        assert!(!check_valid(&mut entries, &refs));
        assert!(!entries[2].valid);

        Ok(())
    }

    #[test]
    fn override_suite_indirection() -> Result<()> {
        let td = tempfile::tempdir()?;
        let config = testing::config(td.path())?;
        let mut catalog = testing::catalog(&config)?;
        let refs = ReferenceTables::load(&catalog)?;

        let mut u = upload("bar", "2.0-1");
        u.target_suite = "unstable-proposed".into();
        u.binaries.push(binary("bar", "net", "optional"));

        assert_eq!(override_suite_name(&catalog, &u)?, "unstable");
        assert_eq!(compute_missing(&u, &catalog, &refs, &[])?.len(), 1);

        testing::add_override(
            &mut catalog,
            "bar",
            ("unstable", "main", OverrideType::Deb),
            "optional",
            "net",
            "",
        )?;
        assert!(compute_missing(&u, &catalog, &refs, &[])?.is_empty());

        u.target_suite = "oldstable".into();
        assert!(matches!(
            compute_missing(&u, &catalog, &refs, &[]),
            Err(ArchiveError::UnknownSuite(_))
        ));

        Ok(())
    }
}
