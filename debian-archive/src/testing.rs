// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixtures and deterministic collaborators for tests.

use {
    crate::{
        catalog::{Catalog, CatalogQueries, OverrideTarget},
        config::ArchiveConfig,
        error::{ArchiveError, Result},
        external::{Inspector, Notification, Notifier, TextEditor, UploadActions},
        reference::OverrideType,
        triage::session::Operator,
        upload::Upload,
    },
    indoc::indoc,
    std::{
        cell::{Cell, RefCell},
        collections::VecDeque,
        io::ErrorKind,
        path::Path,
    },
};

pub const CONFIG: &str = indoc! {"
    database: catalog.db
    lock_dir: lock
    log_dir: log
    accepted_dir: accepted
    rejected_dir: rejected
    components: [main, contrib]
    sections: [libs, net, utils, doc, debian-installer, contrib/net]
    suites:
      - name: unstable
        codename: sid
      - name: unstable-proposed
        codename: sid-proposed
        override_codename: sid
        override_suite: unstable
      - name: experimental
        codename: rc-buggy
    policy_queues:
      - name: new
        path: queue/new
    check_overrides:
      - suite: unstable
      - suite: experimental
        origin_suite: unstable
    process_new:
      daily_lock_retries: 1
      daily_lock_backoff_ms: 1
"};

/// The test configuration with all directories placed under `root`.
pub fn config(root: &Path) -> Result<ArchiveConfig> {
    let mut config = ArchiveConfig::from_yaml(CONFIG)?;

    config.database = root.join(&config.database);
    config.lock_dir = root.join(&config.lock_dir);
    config.log_dir = root.join(&config.log_dir);
    config.accepted_dir = root.join(&config.accepted_dir);
    config.rejected_dir = root.join(&config.rejected_dir);
    for queue in config.policy_queues.iter_mut() {
        queue.path = root.join(&queue.path);
        std::fs::create_dir_all(&queue.path)?;
    }

    Ok(config)
}

/// An in-memory catalog holding the reference data of a configuration.
pub fn catalog(config: &ArchiveConfig) -> Result<Catalog> {
    let mut catalog = Catalog::new_memory()?;

    catalog.with_transaction(|txn| {
        txn.import_config(config)?;
        txn.commit()
    })?;

    Ok(catalog)
}

/// Resolve the partition of a (suite, component, type) triple.
pub fn target(
    catalog: &impl CatalogQueries,
    suite: &str,
    component: &str,
    override_type: OverrideType,
) -> Result<OverrideTarget> {
    Ok(OverrideTarget {
        suite_id: catalog.require_suite(suite)?.id,
        component_id: catalog
            .lookup_component(component)?
            .ok_or_else(|| ArchiveError::UnknownComponent(component.to_string()))?,
        override_type_id: catalog
            .lookup_override_type(override_type)?
            .ok_or_else(|| ArchiveError::UnknownOverrideType(override_type.to_string()))?,
    })
}

/// Insert an override by names.
pub fn add_override(
    catalog: &mut Catalog,
    package: &str,
    (suite, component, override_type): (&str, &str, OverrideType),
    priority: &str,
    section: &str,
    maintainer: &str,
) -> Result<()> {
    catalog.with_transaction(|txn| {
        let target = target(&txn, suite, component, override_type)?;
        let priority_id = txn
            .lookup_priority(priority)?
            .ok_or_else(|| ArchiveError::UnknownPriority(priority.to_string()))?;
        let section_id = txn
            .list_sections()?
            .into_iter()
            .find(|(_, name)| name == section)
            .map(|(id, _)| id)
            .ok_or_else(|| ArchiveError::UnknownSection(section.to_string()))?;

        txn.insert_override(package, target, priority_id, section_id, maintainer)?;
        txn.commit()
    })
}

/// Associate a binary package with a suite.
pub fn add_binary(
    catalog: &mut Catalog,
    suite: &str,
    component: &str,
    override_type: OverrideType,
    package: &str,
) -> Result<()> {
    catalog.with_transaction(|txn| {
        let target = target(&txn, suite, component, override_type)?;
        txn.add_binary(
            target.suite_id,
            target.component_id,
            override_type,
            package,
            "1.0-1",
            "amd64",
        )?;
        txn.commit()
    })
}

/// Associate a source package with a suite.
pub fn add_source(catalog: &mut Catalog, suite: &str, component: &str, source: &str) -> Result<()> {
    catalog.with_transaction(|txn| {
        let target = target(&txn, suite, component, OverrideType::Dsc)?;
        txn.add_source(target.suite_id, target.component_id, source, "1.0-1")?;
        txn.commit()
    })
}

/// Describe the overrides of a partition as `package priority section maintainer` lines.
pub fn overrides(
    catalog: &Catalog,
    suite: &str,
    component: &str,
    override_type: OverrideType,
) -> Result<Vec<String>> {
    let target = target(catalog, suite, component, override_type)?;
    let priorities = catalog.list_priorities()?;
    let sections = catalog.list_sections()?;

    let name = |table: &[(i64, String)], id: i64| {
        table
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, name)| name.clone())
            .unwrap_or_default()
    };

    Ok(catalog
        .list_overrides(target.suite_id, target.component_id, target.override_type_id)?
        .into_iter()
        .map(|row| {
            format!(
                "{} {} {} {}",
                row.package,
                name(&priorities, row.priority_id),
                name(&sections, row.section_id),
                row.maintainer
            )
            .trim_end()
            .to_string()
        })
        .collect())
}

/// An [Operator] answering prompts from a script.
///
/// Prompting past the end of the script is an error.
#[derive(Default)]
pub struct ScriptedOperator {
    answers: RefCell<VecDeque<String>>,
    prompts: RefCell<Vec<String>>,
    shown: RefCell<Vec<String>>,
    warnings: RefCell<Vec<String>>,
    paged: RefCell<Vec<String>>,
    pager_limit: Cell<Option<usize>>,
}

impl ScriptedOperator {
    pub fn new<S: ToString>(answers: impl IntoIterator<Item = S>) -> Self {
        Self {
            answers: RefCell::new(answers.into_iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    /// Make paging fail with a broken pipe after `count` successful pages.
    pub fn close_pager_after(&self, count: usize) {
        self.pager_limit.set(Some(count));
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn shown(&self) -> Vec<String> {
        self.shown.borrow().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.borrow().clone()
    }

    pub fn paged(&self) -> Vec<String> {
        self.paged.borrow().clone()
    }
}

impl Operator for ScriptedOperator {
    fn prompt(&self, question: &str) -> Result<String> {
        self.prompts.borrow_mut().push(question.to_string());

        self.answers.borrow_mut().pop_front().ok_or_else(|| {
            ArchiveError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("no scripted answer to {}", question),
            ))
        })
    }

    fn show(&self, text: &str) {
        self.shown.borrow_mut().push(text.to_string());
    }

    fn warn(&self, message: &str) {
        self.warnings.borrow_mut().push(message.to_string());
    }

    fn page(&self, text: &str) -> std::io::Result<()> {
        let mut paged = self.paged.borrow_mut();
        paged.push(text.to_string());

        match self.pager_limit.get() {
            Some(limit) if paged.len() > limit => Err(ErrorKind::BrokenPipe.into()),
            _ => Ok(()),
        }
    }
}

/// A [TextEditor] applying a function to the seed text.
pub struct StubEditor {
    edit: Box<dyn Fn(&str) -> String>,
    exit_status: Option<i32>,
    seeds: RefCell<Vec<String>>,
}

impl StubEditor {
    pub fn new(edit: impl Fn(&str) -> String + 'static) -> Self {
        Self {
            edit: Box::new(edit),
            exit_status: None,
            seeds: RefCell::new(vec![]),
        }
    }

    /// An editor exiting with `status` on every invocation.
    pub fn failing(status: i32) -> Self {
        Self {
            exit_status: Some(status),
            ..Self::new(|text: &str| text.to_string())
        }
    }

    /// Texts the editor was started with.
    pub fn seeds(&self) -> Vec<String> {
        self.seeds.borrow().clone()
    }
}

impl TextEditor for StubEditor {
    fn edit(&self, seed: &str) -> Result<String> {
        self.seeds.borrow_mut().push(seed.to_string());

        if let Some(status) = self.exit_status {
            return Err(ArchiveError::EditorFailed("stub-editor".into(), Some(status)));
        }

        Ok((self.edit)(seed))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// An [Inspector] describing files by name.
#[derive(Default)]
pub struct StubInspector;

impl Inspector for StubInspector {
    fn display_changes(&self, suite: &str, changes: &Path) -> Result<String> {
        Ok(format!("changes {} ({})\n", file_name(changes), suite))
    }

    fn check_source(&self, suite: &str, dsc: &Path) -> Result<String> {
        Ok(format!("source {} ({})\n", file_name(dsc), suite))
    }

    fn check_binary(&self, suite: &str, deb: &Path) -> Result<String> {
        Ok(format!("binary {} ({})\n", file_name(deb), suite))
    }
}

/// A [Notifier] retaining what it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: RefCell<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.borrow().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, notification: &Notification) -> Result<()> {
        self.sent.borrow_mut().push(notification.clone());

        Ok(())
    }
}

/// [UploadActions] retaining the uploads they were applied to.
#[derive(Default)]
pub struct RecordingActions {
    accepted: RefCell<Vec<String>>,
    rejected: RefCell<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingActions {
    /// Actions whose file moves always fail.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn check(&self) -> Result<()> {
        if self.fail {
            Err(std::io::Error::new(ErrorKind::PermissionDenied, "queue is read-only").into())
        } else {
            Ok(())
        }
    }

    pub fn accepted(&self) -> Vec<String> {
        self.accepted.borrow().clone()
    }

    /// Rejected changes files with their reasons.
    pub fn rejected(&self) -> Vec<(String, String)> {
        self.rejected.borrow().clone()
    }
}

impl UploadActions for RecordingActions {
    fn accept(&self, upload: &Upload, _queue_dir: &Path) -> Result<()> {
        self.check()?;
        self.accepted.borrow_mut().push(upload.changes_name.clone());

        Ok(())
    }

    fn reject(&self, upload: &Upload, _queue_dir: &Path, reason: &str) -> Result<()> {
        self.check()?;
        self.rejected
            .borrow_mut()
            .push((upload.changes_name.clone(), reason.to_string()));

        Ok(())
    }
}
