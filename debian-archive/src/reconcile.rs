// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Override reconciliation.

Reconciliation keeps the override rows of a suite consistent with the packages that
actually exist in the suites sharing its override namespace. It works on one
(suite, component, type) *unit* at a time:

1. Overrides of packages that no longer exist are removed, unless the package has
   files in the holding area for accepted uploads (see [Blacklist]).
2. For source overrides, packages with a binary override but no source override get a
   source override derived from the binary one.
3. If an origin suite is configured, overrides it has for existing packages lacking one
   are copied, and overrides differing from the origin's are synced to it.
4. Existing packages still lacking an override are reported.

All changes of a unit are computed up front and written in one transaction. In no-action
mode the same changes are computed and reported but nothing is written.
*/

use {
    crate::{
        audit::AuditLog,
        catalog::{
            Catalog, CatalogQueries, CatalogTransaction, OverrideRow, OverrideTarget, Suite,
        },
        config::ArchiveConfig,
        error::{ArchiveError, Result},
        lock::LockRegistry,
        reference::{Blacklist, OverrideType, ReferenceTables, SOURCE_PRIORITY},
    },
    log::{info, warn},
    std::{
        collections::{BTreeMap, BTreeSet},
        fmt::{Display, Formatter},
    },
};

/// Classification of an override expressed with names.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OverrideValues {
    pub priority: String,
    pub section: String,
    pub maintainer: String,
}

/// Something that happened while reconciling a unit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReconcileEvent {
    /// An override of a package that no longer exists was removed.
    Removed {
        package: String,
        values: OverrideValues,
    },
    /// A source override was derived from a binary override.
    Synthesized {
        package: String,
        values: OverrideValues,
    },
    /// An override was copied from the origin suite.
    Copied {
        package: String,
        values: OverrideValues,
    },
    /// An override was changed to match the origin suite.
    Synced {
        package: String,
        old: OverrideValues,
        new: OverrideValues,
    },
    /// An unused override was kept because the package is in the accepted holding area.
    Protected { package: String },
    /// An existing package has no override.
    NoOverride { package: String },
    /// A row references an unknown priority or section and was skipped.
    IntegrityProblem { package: String, problem: String },
}

impl ReconcileEvent {
    /// Whether this event changes the catalog.
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Removed { .. }
                | Self::Synthesized { .. }
                | Self::Copied { .. }
                | Self::Synced { .. }
        )
    }

    pub fn package(&self) -> &str {
        match self {
            Self::Removed { package, .. }
            | Self::Synthesized { package, .. }
            | Self::Copied { package, .. }
            | Self::Synced { package, .. }
            | Self::Protected { package }
            | Self::NoOverride { package }
            | Self::IntegrityProblem { package, .. } => package,
        }
    }

    /// Fields of the action log record of a change.
    pub fn log_fields(&self, unit: &ReconcileUnit) -> Option<Vec<String>> {
        let (action, package, values) = match self {
            Self::Removed { package, values } => {
                ("removing unused override", package, vec![values])
            }
            Self::Synthesized { package, values } => {
                ("add missing override", package, vec![values])
            }
            Self::Copied { package, values } => {
                ("copying missing override", package, vec![values])
            }
            Self::Synced { package, old, new } => ("syncing override", package, vec![old, new]),
            _ => return None,
        };

        let mut fields = vec![
            action.to_string(),
            unit.suite.name.clone(),
            unit.component.clone(),
            unit.override_type.to_string(),
            package.clone(),
        ];
        for v in values {
            fields.extend([v.priority.clone(), v.section.clone(), v.maintainer.clone()]);
        }

        Some(fields)
    }
}

impl Display for ReconcileEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Removed { package, values } => write!(
                f,
                "removing unused override for {} ({}/{})",
                package, values.priority, values.section
            ),
            Self::Synthesized { package, values } => write!(
                f,
                "adding missing source override for {} ({})",
                package, values.section
            ),
            Self::Copied { package, values } => write!(
                f,
                "copying missing override for {} ({}/{})",
                package, values.priority, values.section
            ),
            Self::Synced { package, old, new } => write!(
                f,
                "syncing override for {}: {}/{}/{} -> {}/{}/{}",
                package,
                old.priority,
                old.section,
                old.maintainer,
                new.priority,
                new.section,
                new.maintainer
            ),
            Self::Protected { package } => write!(f, "{} in incoming, not touching", package),
            Self::NoOverride { package } => write!(f, "{} has no override!", package),
            Self::IntegrityProblem { package, problem } => {
                write!(f, "skipping {}: {}", package, problem)
            }
        }
    }
}

/// One (suite, component, type) unit of reconciliation.
#[derive(Clone, Debug)]
pub struct ReconcileUnit {
    /// Suite whose overrides are edited.
    pub suite: Suite,
    /// Suites sharing the override namespace of `suite`.
    pub affected_suites: Vec<Suite>,
    /// Suite consulted for missing and drifted overrides.
    pub origin: Option<Suite>,
    pub component: String,
    pub component_id: i64,
    pub override_type: OverrideType,
    pub override_type_id: i64,
}

impl ReconcileUnit {
    fn target(&self) -> OverrideTarget {
        OverrideTarget {
            suite_id: self.suite.id,
            component_id: self.component_id,
            override_type_id: self.override_type_id,
        }
    }

    fn affected_suite_ids(&self) -> Vec<i64> {
        self.affected_suites.iter().map(|s| s.id).collect()
    }
}

impl Display for ReconcileUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{} - {}]",
            self.suite.name, self.component, self.override_type
        )
    }
}

/// Outcome of a reconciliation run.
#[derive(Clone, Debug, Default)]
pub struct ReconcileReport {
    pub events: Vec<ReconcileEvent>,
    /// Units that failed, with their error.
    pub failures: Vec<(String, String)>,
}

impl ReconcileReport {
    /// Number of catalog changes.
    pub fn change_count(&self) -> usize {
        self.events.iter().filter(|e| e.is_change()).count()
    }

    /// Packages reported as having no override.
    pub fn packages_without_override(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter(|e| matches!(e, ReconcileEvent::NoOverride { .. }))
            .map(|e| e.package())
            .collect()
    }
}

enum Write {
    Delete,
    Insert {
        priority_id: i64,
        section_id: i64,
        maintainer: String,
    },
    Update {
        priority_id: Option<i64>,
        section_id: i64,
        maintainer: String,
    },
}

/// Computed changes of a unit.
struct Plan {
    steps: Vec<(ReconcileEvent, Option<Write>)>,
}

impl Plan {
    fn push(&mut self, event: ReconcileEvent, write: Option<Write>) {
        self.steps.push((event, write));
    }
}

/// Performs reconciliation.
pub struct Reconciler<'a> {
    refs: &'a ReferenceTables,
    blacklist: &'a Blacklist,
    audit: &'a AuditLog,
    no_action: bool,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        refs: &'a ReferenceTables,
        blacklist: &'a Blacklist,
        audit: &'a AuditLog,
        no_action: bool,
    ) -> Self {
        Self {
            refs,
            blacklist,
            audit,
            no_action,
        }
    }

    fn values(&self, row: &OverrideRow) -> Result<OverrideValues> {
        Ok(OverrideValues {
            priority: self.refs.priority_name(row.priority_id)?.to_string(),
            section: self.refs.section_name(row.section_id)?.to_string(),
            maintainer: row.maintainer.clone(),
        })
    }

    fn source_values(&self, row: &OverrideRow) -> Result<OverrideValues> {
        Ok(OverrideValues {
            priority: SOURCE_PRIORITY.to_string(),
            section: self.refs.section_name(row.section_id)?.to_string(),
            maintainer: row.maintainer.clone(),
        })
    }

    fn plan(&self, catalog: &impl CatalogQueries, unit: &ReconcileUnit) -> Result<Plan> {
        let mut plan = Plan { steps: vec![] };
        let is_source = unit.override_type == OverrideType::Dsc;
        let target = unit.target();
        let suite_ids = unit.affected_suite_ids();

        let existing = if is_source {
            catalog.list_source_packages(&suite_ids, unit.component_id)?
        } else {
            catalog.list_binary_packages(&suite_ids, unit.component_id, unit.override_type)?
        };

        let mut confirmed = BTreeSet::new();
        let mut current = BTreeMap::new();

        let rows = catalog.list_overrides(
            target.suite_id,
            target.component_id,
            target.override_type_id,
        )?;

        for row in rows {
            if existing.contains(&row.package) {
                confirmed.insert(row.package.clone());
                current.insert(row.package.clone(), row);
            } else if self.blacklist.contains(&row.package) {
                plan.push(
                    ReconcileEvent::Protected {
                        package: row.package.clone(),
                    },
                    None,
                );
                current.insert(row.package.clone(), row);
            } else {
                match self.values(&row) {
                    Ok(values) => plan.push(
                        ReconcileEvent::Removed {
                            package: row.package.clone(),
                            values,
                        },
                        Some(Write::Delete),
                    ),
                    Err(e) => {
                        plan.push(
                            ReconcileEvent::IntegrityProblem {
                                package: row.package.clone(),
                                problem: e.to_string(),
                            },
                            None,
                        );
                        current.insert(row.package.clone(), row);
                    }
                }
            }
        }

        let source_priority_id = if is_source {
            Some(self.refs.priority_id(SOURCE_PRIORITY)?)
        } else {
            None
        };

        if let Some(source_priority_id) = source_priority_id {
            for row in catalog.list_overrides_any_type(target.suite_id, target.component_id)? {
                if !existing.contains(&row.package) || confirmed.contains(&row.package) {
                    continue;
                }

                let values = match self.source_values(&row) {
                    Ok(values) => values,
                    Err(e) => {
                        plan.push(
                            ReconcileEvent::IntegrityProblem {
                                package: row.package.clone(),
                                problem: e.to_string(),
                            },
                            None,
                        );
                        continue;
                    }
                };

                confirmed.insert(row.package.clone());
                plan.push(
                    ReconcileEvent::Synthesized {
                        package: row.package.clone(),
                        values,
                    },
                    Some(Write::Insert {
                        priority_id: source_priority_id,
                        section_id: row.section_id,
                        maintainer: row.maintainer.clone(),
                    }),
                );
                current.insert(
                    row.package.clone(),
                    OverrideRow {
                        priority_id: source_priority_id,
                        override_type_id: target.override_type_id,
                        ..row
                    },
                );
            }
        }

        if let Some(origin) = &unit.origin {
            for origin_row in
                catalog.list_overrides(origin.id, target.component_id, target.override_type_id)?
            {
                let package = origin_row.package.clone();

                if let Some(target_row) = current.get(&package) {
                    let differs = if is_source {
                        target_row.section_id != origin_row.section_id
                            || target_row.maintainer != origin_row.maintainer
                    } else {
                        target_row.differs_from(&origin_row)
                    };
                    if !differs {
                        continue;
                    }

                    let values = if is_source {
                        self.source_values(target_row)
                            .and_then(|old| Ok((old, self.source_values(&origin_row)?)))
                    } else {
                        self.values(target_row)
                            .and_then(|old| Ok((old, self.values(&origin_row)?)))
                    };

                    match values {
                        Ok((old, new)) => {
                            plan.push(
                                ReconcileEvent::Synced {
                                    package: package.clone(),
                                    old,
                                    new,
                                },
                                Some(Write::Update {
                                    priority_id: if is_source {
                                        None
                                    } else {
                                        Some(origin_row.priority_id)
                                    },
                                    section_id: origin_row.section_id,
                                    maintainer: origin_row.maintainer.clone(),
                                }),
                            );
                            let mut updated = target_row.clone();
                            if !is_source {
                                updated.priority_id = origin_row.priority_id;
                            }
                            updated.section_id = origin_row.section_id;
                            updated.maintainer = origin_row.maintainer.clone();
                            current.insert(package, updated);
                        }
                        Err(e) => plan.push(
                            ReconcileEvent::IntegrityProblem {
                                package,
                                problem: e.to_string(),
                            },
                            None,
                        ),
                    }
                } else if existing.contains(&package) && !confirmed.contains(&package) {
                    let values = if is_source {
                        self.source_values(&origin_row)
                    } else {
                        self.values(&origin_row)
                    };

                    match values {
                        Ok(values) => {
                            let priority_id = source_priority_id.unwrap_or(origin_row.priority_id);

                            confirmed.insert(package.clone());
                            plan.push(
                                ReconcileEvent::Copied {
                                    package: package.clone(),
                                    values,
                                },
                                Some(Write::Insert {
                                    priority_id,
                                    section_id: origin_row.section_id,
                                    maintainer: origin_row.maintainer.clone(),
                                }),
                            );
                            current.insert(
                                package,
                                OverrideRow {
                                    priority_id,
                                    ..origin_row
                                },
                            );
                        }
                        Err(e) => plan.push(
                            ReconcileEvent::IntegrityProblem {
                                package,
                                problem: e.to_string(),
                            },
                            None,
                        ),
                    }
                }
            }
        }

        for package in existing.difference(&confirmed) {
            plan.push(
                ReconcileEvent::NoOverride {
                    package: package.clone(),
                },
                None,
            );
        }

        Ok(plan)
    }

    fn apply(
        &self,
        txn: &CatalogTransaction,
        unit: &ReconcileUnit,
        package: &str,
        write: Write,
    ) -> Result<()> {
        let target = unit.target();

        match write {
            Write::Delete => {
                txn.delete_override(package, target)?;
            }
            Write::Insert {
                priority_id,
                section_id,
                maintainer,
            } => {
                txn.insert_override(package, target, priority_id, section_id, &maintainer)?;
            }
            Write::Update {
                priority_id,
                section_id,
                maintainer,
            } => {
                txn.update_override(package, target, priority_id, section_id, &maintainer)?;
            }
        }

        Ok(())
    }

    /// Reconcile one unit.
    ///
    /// All writes are committed in a single transaction. Nothing is written in no-action
    /// mode.
    pub fn reconcile(
        &self,
        catalog: &mut Catalog,
        unit: &ReconcileUnit,
    ) -> Result<Vec<ReconcileEvent>> {
        let txn = catalog.transaction()?;
        let plan = self.plan(&txn, unit)?;

        let mut events = Vec::with_capacity(plan.steps.len());

        for (event, write) in plan.steps {
            if let Some(fields) = event.log_fields(unit) {
                self.audit
                    .log(&fields.iter().map(|s| s.as_str()).collect::<Vec<_>>())?;
            } else {
                warn!("W: {}", event);
            }

            if let Some(write) = write {
                if !self.no_action {
                    self.apply(&txn, unit, event.package(), write)?;
                }
            }

            events.push(event);
        }

        if !self.no_action {
            txn.commit()?;
        }

        Ok(events)
    }

    /// Resolve the units of a configured suite.
    ///
    /// Source units come first within each component.
    pub fn units(
        &self,
        catalog: &impl CatalogQueries,
        config: &ArchiveConfig,
        suite: &str,
        origin: Option<&str>,
    ) -> Result<Vec<ReconcileUnit>> {
        let suite = catalog.require_suite(suite)?;
        let origin = origin.map(|name| catalog.require_suite(name)).transpose()?;

        let affected_suites = catalog.suites_sharing_overrides(&suite.codename)?;
        if affected_suites.is_empty() {
            return Err(ArchiveError::OverrideSuitesNotFound(suite.codename.clone()));
        }

        let mut units = vec![];

        for component in &config.components {
            let component_id = catalog
                .lookup_component(component)?
                .ok_or_else(|| ArchiveError::UnknownComponent(component.clone()))?;

            for override_type in config.ordered_override_types()? {
                let override_type_id = catalog
                    .lookup_override_type(override_type)?
                    .ok_or_else(|| ArchiveError::UnknownOverrideType(override_type.to_string()))?;

                units.push(ReconcileUnit {
                    suite: suite.clone(),
                    affected_suites: affected_suites.clone(),
                    origin: origin.clone(),
                    component: component.clone(),
                    component_id,
                    override_type,
                    override_type_id,
                });
            }
        }

        Ok(units)
    }

    /// Reconcile every configured suite.
    ///
    /// The daily processing lock is held for the whole run. A failing unit is reported
    /// and skipped unless the failure is a configuration error, which aborts the run.
    pub fn run(
        &self,
        catalog: &mut Catalog,
        config: &ArchiveConfig,
        locks: &dyn LockRegistry,
        holder: &str,
    ) -> Result<ReconcileReport> {
        let _lock = config.daily_lock().acquire(locks, holder)?;
        let mut report = ReconcileReport::default();

        for entry in &config.check_overrides {
            if !entry.process {
                continue;
            }

            info!(
                "Processing {}{}...",
                entry.suite,
                entry
                    .origin_suite
                    .as_ref()
                    .map(|s| format!(" taking missing from {}", s))
                    .unwrap_or_default()
            );

            for unit in self.units(catalog, config, &entry.suite, entry.origin_suite.as_deref())? {
                info!(
                    "Processing {} using {}...",
                    unit,
                    unit.affected_suites
                        .iter()
                        .map(|s| s.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );

                match self.reconcile(catalog, &unit) {
                    Ok(events) => report.events.extend(events),
                    Err(e) if e.is_configuration_error() => return Err(e),
                    Err(e) => {
                        warn!("E: reconciling {} failed: {}", unit, e);
                        report.failures.push((unit.to_string(), e.to_string()));
                    }
                }
            }
        }

        Ok(report)
    }
}
