// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Driving uploads through triage.

A [TriageEngine] processes the uploads of a policy queue one at a time. Each upload is
processed while holding its source package's lock, on a private copy of its files.
Decisions come from [super::machine]; this module performs their effects against the
catalog and the external collaborators.
*/

use {
    super::{
        compute_missing, edit,
        machine::{
            conclude, decide, Command, Disposition, Effect, Outcome, ReviewStatus, TriageFlags,
            TriageState,
        },
        override_suite_name, MissingOverride,
    },
    crate::{
        audit::AuditLog,
        catalog::{Catalog, CatalogQueries, OverrideTarget},
        error::{ArchiveError, Result},
        external::{InspectCommand, Inspector, Notification, Notifier, TextEditor, UploadActions},
        lock::{lock_package, DailyLock, LockRegistry},
        reference::{OverrideType, ReferenceTables},
        upload::{compare_uploads, Note, PolicyQueue, Upload, UploadCopy},
    },
    chrono::Utc,
    log::{debug, info, warn},
    std::{collections::HashSet, io::ErrorKind, path::Path},
};

/// The person making triage decisions.
pub trait Operator {
    /// Ask a question and return the answer.
    fn prompt(&self, question: &str) -> Result<String>;

    /// Display text.
    fn show(&self, text: &str);

    /// Display a warning.
    fn warn(&self, message: &str);

    /// Display long text through a pager.
    ///
    /// [ErrorKind::BrokenPipe] signals the operator closed the pager early.
    fn page(&self, text: &str) -> std::io::Result<()>;
}

/// External collaborators used during triage.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub operator: &'a dyn Operator,
    pub editor: &'a dyn TextEditor,
    pub inspector: &'a dyn Inspector,
    pub notifier: &'a dyn Notifier,
    pub actions: &'a dyn UploadActions,
    /// Registry holding per-package locks.
    pub package_locks: &'a dyn LockRegistry,
    /// Registry holding the daily processing lock.
    pub daily_locks: &'a dyn LockRegistry,
}

/// Settings of a triage run.
#[derive(Clone, Debug, Default)]
pub struct TriageOptions {
    pub flags: TriageFlags,
    /// Don't move binary-only NEW uploads to the front.
    pub no_binaries: bool,
    /// Only print the notes of the selected uploads.
    pub comments: bool,
    /// Text seeding rejection reasons.
    pub manual_reject: Option<String>,
    /// Command run on every upload before the decision loop.
    pub inspect: Option<InspectCommand>,
    /// Recipient of BXA notifications. None disables them.
    pub bxa_address: Option<String>,
    /// Distribution named in notifications.
    pub distribution: String,
}

/// Format a byte count the way run summaries do.
pub fn size_type(bytes: u64) -> String {
    let mut size = bytes;
    let mut unit = " b";

    if size > 10000 {
        size /= 1000;
        unit = " Kb";
    }
    if size > 10000 {
        size /= 1000;
        unit = " Mb";
    }

    format!("{}{}", size, unit)
}

/// Tally of a triage run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunSummary {
    pub accepted: usize,
    pub accepted_bytes: u64,
    pub rejected: usize,
    pub skipped: usize,
}

impl RunSummary {
    /// Line reporting acceptances, if there were any.
    pub fn message(&self) -> Option<String> {
        if self.accepted == 0 {
            return None;
        }

        Some(format!(
            "Accepted {} package {}, {}.",
            self.accepted,
            if self.accepted > 1 { "sets" } else { "set" },
            size_type(self.accepted_bytes)
        ))
    }
}

/// How processing of one upload ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UploadOutcome {
    Accepted,
    Rejected,
    Skipped,
    /// Someone else holds the package lock.
    Locked(String),
    /// The operator ended the run.
    QuitRun,
}

enum Composed {
    Confirmed(String),
    Abandoned,
    Quit,
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("  {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Describe newly classified `deb` packages for a BXA notification.
pub fn bxa_summary(missing: &[MissingOverride], upload: &Upload) -> String {
    let new = missing
        .iter()
        .filter(|m| m.override_type == OverrideType::Deb)
        .map(|m| m.package.as_str())
        .collect::<HashSet<_>>();

    let mut seen = HashSet::new();
    let mut summary = String::new();

    for binary in &upload.binaries {
        if !new.contains(binary.package.as_str()) || !seen.insert(binary.package.as_str()) {
            continue;
        }

        summary.push_str(&format!(
            "\nPackage: {}\nDescription: {}\n",
            binary.package, binary.description
        ));
    }

    summary
}

/// Order uploads for processing.
///
/// Unless `binaries_first` is false, uploads of source packages already known to the
/// target suite are moved to the front.
pub fn sort_uploads(
    catalog: &impl CatalogQueries,
    uploads: &mut [Upload],
    binaries_first: bool,
) -> Result<()> {
    uploads.sort_by(compare_uploads);

    if !binaries_first {
        return Ok(());
    }

    let dsc_id = catalog
        .lookup_override_type(OverrideType::Dsc)?
        .ok_or_else(|| ArchiveError::UnknownOverrideType(OverrideType::Dsc.to_string()))?;

    let mut binary_only = HashSet::new();
    for upload in uploads.iter() {
        let suite = catalog.require_suite(&override_suite_name(catalog, upload)?)?;

        if catalog.has_override_in_suite(&upload.source, suite.id, dsc_id)? {
            binary_only.insert(upload.id);
        }
    }

    uploads.sort_by_key(|u| !binary_only.contains(&u.id));

    Ok(())
}

/// Processes the uploads of a policy queue.
pub struct TriageEngine<'a> {
    catalog: &'a mut Catalog,
    refs: &'a ReferenceTables,
    audit: &'a AuditLog,
    io: Collaborators<'a>,
    options: TriageOptions,
    daily_lock: DailyLock,
    user: String,
    summary: RunSummary,
}

impl<'a> TriageEngine<'a> {
    pub fn new(
        catalog: &'a mut Catalog,
        refs: &'a ReferenceTables,
        audit: &'a AuditLog,
        io: Collaborators<'a>,
        options: TriageOptions,
        daily_lock: DailyLock,
        user: impl ToString,
    ) -> Self {
        Self {
            catalog,
            refs,
            audit,
            io,
            options,
            daily_lock,
            user: user.to_string(),
            summary: RunSummary::default(),
        }
    }

    /// Load the uploads of a queue, optionally restricted to named changes files.
    pub fn select_uploads(
        &self,
        queue_name: &str,
        changes: &[String],
    ) -> Result<(PolicyQueue, Vec<Upload>)> {
        let queue = self
            .catalog
            .lookup_policy_queue(queue_name)?
            .ok_or_else(|| ArchiveError::UnknownPolicyQueue(queue_name.to_string()))?;

        let uploads = self
            .catalog
            .queue_uploads(queue.id)?
            .into_iter()
            .filter(|u| changes.is_empty() || changes.contains(&u.changes_name))
            .collect();

        Ok((queue, uploads))
    }

    /// Print the notes attached to uploads.
    pub fn show_comments(&self, uploads: &[Upload]) -> Result<()> {
        let sources = uploads.iter().map(|u| u.source.clone()).collect::<Vec<_>>();

        for note in self.catalog.notes_for_packages(&sources)? {
            self.io.operator.show(&format!(
                "{}_{}\n{}\n({})\n\n",
                note.package, note.version, note.comment, note.author
            ));
        }

        Ok(())
    }

    /// Process a policy queue.
    ///
    /// Returns the run summary, which is also recorded in the audit log.
    pub fn run(&mut self, queue_name: &str, changes: &[String]) -> Result<RunSummary> {
        let (queue, mut uploads) = self.select_uploads(queue_name, changes)?;

        if uploads.len() > 1 {
            info!("Sorting changes...");
        }
        sort_uploads(&*self.catalog, &mut uploads, !self.options.no_binaries)?;

        if self.options.comments {
            self.show_comments(&uploads)?;
        } else {
            for upload in &uploads {
                self.io.operator.show(&format!("\n{}", upload.changes_name));

                match self.process_upload(&queue, upload) {
                    Ok(UploadOutcome::QuitRun) => break,
                    Ok(outcome) => {
                        debug!("{}: {:?}", upload.changes_name, outcome);
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        self.io
                            .operator
                            .warn(&format!("{} aborted: {}", upload.changes_name, e));
                        self.summary.skipped += 1;
                    }
                }
            }
        }

        self.finish()
    }

    fn finish(&mut self) -> Result<RunSummary> {
        if self.summary.accepted > 0 {
            self.audit.log(&[
                "total",
                &self.summary.accepted.to_string(),
                &self.summary.accepted_bytes.to_string(),
            ])?;
        }

        Ok(self.summary.clone())
    }

    /// Triage a single upload.
    pub fn process_upload(
        &mut self,
        queue: &PolicyQueue,
        upload: &Upload,
    ) -> Result<UploadOutcome> {
        let locks = self.io.package_locks;

        let guard = match lock_package(locks, &upload.source, &self.user) {
            Ok(guard) => guard,
            Err(ArchiveError::PackageLocked { holder, .. }) => {
                self.io.operator.show(&format!(
                    "Seems to be locked by {} already, skipping...",
                    holder
                ));
                self.summary.skipped += 1;
                return Ok(UploadOutcome::Locked(holder));
            }
            Err(e) => return Err(e),
        };

        let copy = UploadCopy::new(upload, &queue.path)?;
        let outcome = self.review(queue, upload, &copy)?;

        match outcome {
            UploadOutcome::Accepted => {
                self.summary.accepted += 1;
                self.summary.accepted_bytes += upload.size();
            }
            UploadOutcome::Rejected => self.summary.rejected += 1,
            UploadOutcome::Skipped => self.summary.skipped += 1,
            _ => {}
        }

        drop(copy);
        guard.release()?;

        Ok(outcome)
    }

    fn review(
        &mut self,
        queue: &PolicyQueue,
        upload: &Upload,
        copy: &UploadCopy,
    ) -> Result<UploadOutcome> {
        let operator = self.io.operator;

        operator.show("NEW\n");

        if let Some(command) = &self.options.inspect {
            command.run(copy.directory(), upload)?;
        }

        let mut missing: Vec<MissingOverride> = vec![];

        loop {
            missing = compute_missing(upload, &*self.catalog, self.refs, &missing)?;
            let notes = self.catalog.notes(&upload.source, None)?;
            let byhand = upload.unprocessed_byhand(&queue.path);

            let listing = edit::render_missing(&missing, false);
            if !listing.is_empty() {
                operator.show(listing.trim_end());
            }
            for note in &notes {
                operator.show(&edit::render_note(note));
            }
            for name in &byhand {
                operator.warn(&format!(
                    "{} still present; please process byhand components and try again",
                    name
                ));
            }

            let status = ReviewStatus {
                missing: missing.len(),
                broken: missing.iter().any(|m| !m.valid),
                has_notes: !notes.is_empty(),
                unprocessed_byhand: !byhand.is_empty(),
            };

            if status.broken {
                operator.warn("[!] marked entries must be fixed before package can be processed.");
            }
            if status.has_notes {
                operator.warn("note must be removed before package can be processed.");
            }

            let command = match status.automatic_command(&self.options.flags) {
                Some(command) => command,
                None => self.ask(&status)?,
            };

            let transition = decide(&status, &self.options.flags, command);

            let outcome = match transition.effect {
                None => Outcome::Completed,
                Some(Effect::Refuse(message)) => {
                    operator.warn(&message);
                    Outcome::Abandoned
                }
                Some(Effect::Accept) => self.accept(queue, upload, &missing)?,
                Some(Effect::Inspect) => self.check(upload, copy.directory())?,
                Some(Effect::EditOverrides) => {
                    missing = edit::edit_overrides(operator, self.io.editor, self.refs, missing)?;
                    Outcome::Completed
                }
                Some(Effect::ComposeRejection) => self.reject(queue, upload, &notes)?,
                Some(Effect::EditNote) => self.edit_note(upload, &notes)?,
                Some(Effect::ProdMaintainer) => self.prod(upload)?,
                Some(Effect::RemoveNotes { all }) => self.remove_notes(upload, all)?,
                Some(Effect::QuitRun) => Outcome::QuitRun,
            };

            let disposition = conclude(transition.state, outcome);
            debug!("{}: {:?} -> {}", upload.changes_name, command, disposition);

            match disposition {
                Disposition::QuitRun => return Ok(UploadOutcome::QuitRun),
                Disposition::Next(TriageState::Accepted) => return Ok(UploadOutcome::Accepted),
                Disposition::Next(TriageState::Rejected) => return Ok(UploadOutcome::Rejected),
                Disposition::Next(TriageState::Skipped) => return Ok(UploadOutcome::Skipped),
                Disposition::Next(_) => {}
            }
        }
    }

    fn ask(&self, status: &ReviewStatus) -> Result<Command> {
        let prompt = status.prompt();

        loop {
            let answer = self.io.operator.prompt(&prompt)?;

            if let Some(command) = status.parse_answer(&answer) {
                return Ok(command);
            }
        }
    }

    /// Run the editor until the operator confirms, abandons or quits.
    fn compose(&self, seed: &str, header: &str, prompt: &str) -> Result<Composed> {
        let mut text = seed.to_string();

        loop {
            text = self.io.editor.edit(&text)?;

            self.io.operator.show(header);
            self.io.operator.show(&indent(&text));

            match edit::choose(self.io.operator, prompt)? {
                'E' => {}
                'A' => return Ok(Composed::Abandoned),
                'Q' => return Ok(Composed::Quit),
                _ => return Ok(Composed::Confirmed(text)),
            }
        }
    }

    fn accept(
        &mut self,
        queue: &PolicyQueue,
        upload: &Upload,
        missing: &[MissingOverride],
    ) -> Result<Outcome> {
        let guard = match self.daily_lock.acquire(self.io.daily_locks, &self.user) {
            Ok(guard) => guard,
            Err(ArchiveError::DailyLockUnavailable(key, holder)) => {
                debug!("{} held by {}", key, holder);
                self.io.operator.show(
                    "Dinstall in the locked area, cant process packages, come back later",
                );
                return Ok(Outcome::Abandoned);
            }
            Err(e) => return Err(e),
        };

        let suite_name = override_suite_name(&*self.catalog, upload)?;
        let refs = self.refs;
        let actions = self.io.actions;

        // Files move last so a failed move rolls back every catalog write.
        self.catalog.with_transaction(|txn| {
            let suite = txn.require_suite(&suite_name)?;

            for entry in missing {
                let invalid = |reason: String| ArchiveError::InvalidOverride {
                    package: entry.package.clone(),
                    reason,
                };

                let target = OverrideTarget {
                    suite_id: suite.id,
                    component_id: refs
                        .component_id(&entry.component)
                        .map_err(|e| invalid(e.to_string()))?,
                    override_type_id: txn
                        .lookup_override_type(entry.override_type)?
                        .ok_or_else(|| {
                            ArchiveError::UnknownOverrideType(entry.override_type.to_string())
                        })?,
                };
                let priority_id = refs
                    .priority_id(&entry.priority)
                    .map_err(|e| invalid(e.to_string()))?;
                let section_id = refs
                    .section_id(&entry.section)
                    .map_err(|e| invalid(e.to_string()))?;

                txn.insert_override(&entry.package, target, priority_id, section_id, "")?;
            }

            txn.remove_upload(upload.id)?;
            actions.accept(upload, &queue.path)?;
            txn.commit()
        })?;

        self.audit.log(&["NEW ACCEPT", &upload.changes_name])?;

        if let Some(address) = &self.options.bxa_address {
            let summary = bxa_summary(missing, upload);

            if !summary.is_empty() {
                let notification = Notification {
                    to: vec![address.clone()],
                    subject: format!("{} archive addition notification", self.options.distribution),
                    body: summary,
                };

                if let Err(e) = self.io.notifier.send(&notification) {
                    warn!("W: BXA notification for {} failed: {}", upload.changes_name, e);
                }
            }
        }

        guard.release()?;

        Ok(Outcome::Completed)
    }

    fn check(&self, upload: &Upload, directory: &Path) -> Result<Outcome> {
        let inspector = self.io.inspector;
        let suite = upload.target_suite.as_str();

        let mut text =
            inspector.display_changes(suite, &directory.join(&upload.changes_name))?;
        if let Some(source) = &upload.source_package {
            text.push_str(&inspector.check_source(suite, &directory.join(&source.filename))?);
        }
        for binary in &upload.binaries {
            text.push_str(&inspector.check_binary(suite, &directory.join(&binary.filename))?);
        }

        match self.io.operator.page(&text) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                warn!("W: pager closed; skipping remaining inspection output");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Outcome::Completed)
    }

    fn reject(
        &mut self,
        queue: &PolicyQueue,
        upload: &Upload,
        notes: &[Note],
    ) -> Result<Outcome> {
        let mut seed = format!("{}\n", self.options.manual_reject.as_deref().unwrap_or_default());
        seed.push_str(
            &notes
                .iter()
                .map(|n| n.comment.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        );

        let composed = self.compose(&seed, "Reject message:", "[R]eject, Edit, Abandon, Quit ?")?;

        let reason = match composed {
            Composed::Confirmed(reason) => reason,
            Composed::Abandoned => return Ok(Outcome::Abandoned),
            Composed::Quit => return Ok(Outcome::QuitRun),
        };

        let actions = self.io.actions;

        self.catalog.with_transaction(|txn| {
            txn.remove_upload(upload.id)?;
            actions.reject(upload, &queue.path, &reason)?;
            txn.commit()
        })?;

        self.audit.log(&["NEW REJECT", &upload.changes_name])?;

        Ok(Outcome::Completed)
    }

    fn edit_note(&mut self, upload: &Upload, notes: &[Note]) -> Result<Outcome> {
        let seed = notes.last().map(|n| n.comment.as_str()).unwrap_or_default();

        let text = match self.compose(seed, "New Note:", "[D]one, Edit, Abandon, Quit ?")? {
            Composed::Confirmed(text) => text,
            Composed::Abandoned => return Ok(Outcome::Abandoned),
            Composed::Quit => return Ok(Outcome::QuitRun),
        };

        let user = self.user.clone();
        let trainee = self.options.flags.trainee;

        self.catalog.with_transaction(|txn| {
            txn.add_note(
                &upload.source,
                &upload.version,
                &user,
                text.trim_end(),
                Utc::now(),
                trainee,
            )?;
            txn.commit()
        })?;

        Ok(Outcome::Completed)
    }

    fn prod(&self, upload: &Upload) -> Result<Outcome> {
        let body = match self.compose("", "Prod message:", "[P]rod, Edit, Abandon, Quit ?")? {
            Composed::Confirmed(body) => body,
            Composed::Abandoned => return Ok(Outcome::Abandoned),
            Composed::Quit => return Ok(Outcome::QuitRun),
        };

        let mut to = vec![upload.maintainer.clone()];
        if upload.changed_by != upload.maintainer {
            to.push(upload.changed_by.clone());
        }

        self.io.notifier.send(&Notification {
            to,
            subject: format!("Comments regarding {}", upload.changes_name),
            body,
        })?;
        self.audit.log(&["NEW PROD", &upload.changes_name])?;

        Ok(Outcome::Completed)
    }

    fn remove_notes(&mut self, upload: &Upload, all: bool) -> Result<Outcome> {
        let question = if all {
            "Really clear all notes (y/N)? "
        } else {
            "Really clear note (y/N)? "
        };

        if !self
            .io
            .operator
            .prompt(question)?
            .trim()
            .eq_ignore_ascii_case("y")
        {
            return Ok(Outcome::Abandoned);
        }

        let version = if all {
            None
        } else {
            Some(upload.version.as_str())
        };

        let removed = self.catalog.with_transaction(|txn| {
            let removed = txn.delete_notes(&upload.source, version)?;
            txn.commit()?;

            Ok(removed)
        })?;
        debug!("removed {} notes of {}", removed, upload.source);

        Ok(Outcome::Completed)
    }
}
