// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The triage decision machine.

Everything here is free of I/O. [decide] maps the current [ReviewStatus] and a chosen
[Command] to the state entered plus the [Effect] the caller must perform. Once the
effect has run, [conclude] maps its [Outcome] to the state the upload ends up in.
*/

use std::fmt::{Display, Formatter};

/// States an upload passes through during triage.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TriageState {
    Reviewing,
    EditingOverrides,
    CheckingArtifacts,
    ManualRejecting,
    AnnotatingNote,
    ProddingMaintainer,
    Accepted,
    Rejected,
    Skipped,
}

impl TriageState {
    /// Whether processing of the upload is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected | Self::Skipped)
    }
}

/// Run-wide flags influencing decisions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TriageFlags {
    /// Decide without asking. Uploads are accepted when possible and skipped otherwise.
    pub automatic: bool,
    /// Change nothing. Every upload is skipped.
    pub no_action: bool,
    /// Refuse every privileged command.
    pub trainee: bool,
}

/// Operator commands available while reviewing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    Accept,
    Check,
    EditOverrides,
    ManualReject,
    NoteEdit,
    Prod,
    RemoveNote,
    RemoveAllNotes,
    Skip,
    Quit,
}

impl Command {
    /// The answer selecting this command.
    pub fn key(&self) -> char {
        match self {
            Self::Accept => 'A',
            Self::Check => 'C',
            Self::EditOverrides => 'E',
            Self::ManualReject => 'M',
            Self::NoteEdit => 'N',
            Self::Prod => 'P',
            Self::RemoveNote => 'R',
            Self::RemoveAllNotes => 'O',
            Self::Skip => 'S',
            Self::Quit => 'Q',
        }
    }

    /// Whether trainees are refused this command.
    pub fn is_privileged(&self) -> bool {
        matches!(
            self,
            Self::Accept
                | Self::EditOverrides
                | Self::ManualReject
                | Self::Prod
                | Self::RemoveNote
                | Self::RemoveAllNotes
        )
    }
}

/// What is known about an upload at the start of a review pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReviewStatus {
    /// Number of packages lacking an override.
    pub missing: usize,
    /// Whether any missing entry has an invalid classification.
    pub broken: bool,
    /// Whether notes are attached to the source package.
    pub has_notes: bool,
    /// Whether byhand files await processing.
    pub unprocessed_byhand: bool,
}

impl ReviewStatus {
    /// Whether nothing but the missing overrides stands between the upload and acceptance.
    pub fn can_accept(&self) -> bool {
        !self.broken && !self.has_notes && !self.unprocessed_byhand
    }

    /// Commands offered, in prompt order.
    pub fn offered(&self) -> Vec<Command> {
        let mut commands = vec![];

        if self.can_accept() {
            commands.push(Command::Accept);
        }
        if self.has_notes {
            commands.push(Command::RemoveAllNotes);
            commands.push(Command::RemoveNote);
        }
        commands.extend([
            Command::EditOverrides,
            Command::Check,
            Command::ManualReject,
            Command::NoteEdit,
            Command::Prod,
            Command::Skip,
            Command::Quit,
        ]);

        commands
    }

    /// Command chosen by an empty answer.
    pub fn default_command(&self) -> Command {
        if self.can_accept() && self.missing == 0 {
            Command::Accept
        } else {
            Command::Skip
        }
    }

    /// Command chosen without asking, if any.
    pub fn automatic_command(&self, flags: &TriageFlags) -> Option<Command> {
        if flags.no_action {
            Some(Command::Skip)
        } else if flags.automatic {
            Some(self.default_command())
        } else {
            None
        }
    }

    fn label(&self, command: Command) -> &'static str {
        match command {
            Command::Accept if self.missing == 0 => "Accept",
            Command::Accept => "Add overrides",
            Command::Check => "Check",
            Command::EditOverrides => "Edit overrides",
            Command::ManualReject => "Manual reject",
            Command::NoteEdit => "Note edit",
            Command::Prod => "Prod",
            Command::RemoveNote => "Remove note",
            Command::RemoveAllNotes => "RemOve all notes",
            Command::Skip => "Skip",
            Command::Quit => "Quit",
        }
    }

    /// The question put to the operator.
    ///
    /// The default answer is bracketed.
    pub fn prompt(&self) -> String {
        let default = self.default_command();

        let labels = self
            .offered()
            .into_iter()
            .map(|command| {
                let label = self.label(command);

                if command == default {
                    format!("[{}]{}", &label[..1], &label[1..])
                } else {
                    label.to_string()
                }
            })
            .collect::<Vec<_>>();

        format!("{} ?", labels.join(", "))
    }

    /// Interpret an operator answer.
    ///
    /// Only the first character counts. Answers naming commands not on offer yield `None`.
    pub fn parse_answer(&self, answer: &str) -> Option<Command> {
        let key = match answer.trim().chars().next() {
            Some(c) => c.to_ascii_uppercase(),
            None => return Some(self.default_command()),
        };

        self.offered()
            .into_iter()
            .find(|command| command.key() == key)
    }
}

/// Work requested by a transition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Effect {
    /// Tell the operator why nothing happens.
    Refuse(String),
    /// Add missing overrides and accept the upload.
    Accept,
    /// Show inspection output.
    Inspect,
    EditOverrides,
    /// Compose and confirm a rejection.
    ComposeRejection,
    EditNote,
    ProdMaintainer,
    /// Delete notes of the upload's version, or of every version.
    RemoveNotes { all: bool },
    /// End the whole run.
    QuitRun,
}

/// Result of [decide].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transition {
    pub state: TriageState,
    pub effect: Option<Effect>,
}

impl Transition {
    fn to(state: TriageState, effect: Effect) -> Self {
        Self {
            state,
            effect: Some(effect),
        }
    }

    fn refuse(message: impl ToString) -> Self {
        Self::to(TriageState::Reviewing, Effect::Refuse(message.to_string()))
    }
}

/// Decide what a command does.
pub fn decide(status: &ReviewStatus, flags: &TriageFlags, command: Command) -> Transition {
    if flags.trainee && command.is_privileged() {
        return Transition::refuse("Trainees can't do that");
    }

    match command {
        Command::Accept if !status.can_accept() => {
            Transition::refuse("upload can't be accepted in its current state")
        }
        Command::Accept => Transition::to(TriageState::Accepted, Effect::Accept),
        Command::Check => Transition::to(TriageState::CheckingArtifacts, Effect::Inspect),
        Command::EditOverrides => {
            Transition::to(TriageState::EditingOverrides, Effect::EditOverrides)
        }
        Command::ManualReject => {
            Transition::to(TriageState::ManualRejecting, Effect::ComposeRejection)
        }
        Command::NoteEdit => Transition::to(TriageState::AnnotatingNote, Effect::EditNote),
        Command::Prod => Transition::to(TriageState::ProddingMaintainer, Effect::ProdMaintainer),
        Command::RemoveNote | Command::RemoveAllNotes if !status.has_notes => {
            Transition::refuse("no notes to remove")
        }
        Command::RemoveNote => {
            Transition::to(TriageState::Reviewing, Effect::RemoveNotes { all: false })
        }
        Command::RemoveAllNotes => {
            Transition::to(TriageState::Reviewing, Effect::RemoveNotes { all: true })
        }
        Command::Skip => Transition {
            state: TriageState::Skipped,
            effect: None,
        },
        Command::Quit => Transition::to(TriageState::Skipped, Effect::QuitRun),
    }
}

/// How an effect ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The effect did what it was asked to.
    Completed,
    /// The operator backed out, or a precondition such as a lock was not met.
    Abandoned,
    /// The operator asked to end the run.
    QuitRun,
}

/// Where an upload goes after an effect.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Disposition {
    Next(TriageState),
    QuitRun,
}

impl Display for Disposition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Next(state) => write!(f, "{:?}", state),
            Self::QuitRun => f.write_str("quit"),
        }
    }
}

/// Settle the state entered by [decide] once its effect ran.
pub fn conclude(state: TriageState, outcome: Outcome) -> Disposition {
    match (state, outcome) {
        (_, Outcome::QuitRun) => Disposition::QuitRun,
        (TriageState::Accepted | TriageState::Rejected, Outcome::Completed) => {
            Disposition::Next(state)
        }
        (TriageState::ManualRejecting, Outcome::Completed) => {
            Disposition::Next(TriageState::Rejected)
        }
        (TriageState::Skipped, _) => Disposition::Next(TriageState::Skipped),
        _ => Disposition::Next(TriageState::Reviewing),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn clean() -> ReviewStatus {
        ReviewStatus::default()
    }

    #[test]
    fn prompts() {
        assert_eq!(
            clean().prompt(),
            "[A]ccept, Edit overrides, Check, Manual reject, Note edit, Prod, Skip, Quit ?"
        );

        let status = ReviewStatus {
            missing: 2,
            ..clean()
        };
        assert_eq!(
            status.prompt(),
            "Add overrides, Edit overrides, Check, Manual reject, Note edit, Prod, [S]kip, Quit ?"
        );

        let status = ReviewStatus {
            missing: 1,
            has_notes: true,
            ..clean()
        };
        assert_eq!(
            status.prompt(),
            "RemOve all notes, Remove note, Edit overrides, Check, Manual reject, Note edit, \
            Prod, [S]kip, Quit ?"
        );
    }

    #[test]
    fn answers() {
        let status = ReviewStatus {
            missing: 1,
            ..clean()
        };

        assert_eq!(status.parse_answer(""), Some(Command::Skip));
        assert_eq!(status.parse_answer("a"), Some(Command::Accept));
        assert_eq!(status.parse_answer("edit"), Some(Command::EditOverrides));
        assert_eq!(status.parse_answer("  q"), Some(Command::Quit));
        assert_eq!(status.parse_answer("o"), None);
        assert_eq!(status.parse_answer("x"), None);

        assert_eq!(clean().parse_answer(""), Some(Command::Accept));

        let noted = ReviewStatus {
            has_notes: true,
            ..clean()
        };
        assert_eq!(noted.parse_answer("A"), None);
        assert_eq!(noted.parse_answer("o"), Some(Command::RemoveAllNotes));
        assert_eq!(noted.parse_answer("r"), Some(Command::RemoveNote));
    }

    #[test]
    fn acceptance_gating() {
        let flags = TriageFlags::default();

        let blockers = [
            ReviewStatus {
                broken: true,
                missing: 1,
                ..clean()
            },
            ReviewStatus {
                has_notes: true,
                ..clean()
            },
            ReviewStatus {
                unprocessed_byhand: true,
                ..clean()
            },
        ];

        for status in blockers {
            let transition = decide(&status, &flags, Command::Accept);
            assert_eq!(transition.state, TriageState::Reviewing);
            assert!(matches!(transition.effect, Some(Effect::Refuse(_))));
            assert!(!status.offered().contains(&Command::Accept));
        }

        let transition = decide(&clean(), &flags, Command::Accept);
        assert_eq!(transition.state, TriageState::Accepted);
        assert_eq!(transition.effect, Some(Effect::Accept));

        let with_missing = ReviewStatus {
            missing: 3,
            ..clean()
        };
        assert_eq!(
            decide(&with_missing, &flags, Command::Accept).effect,
            Some(Effect::Accept)
        );
    }

    #[test]
    fn trainee_refusals() {
        let flags = TriageFlags {
            trainee: true,
            ..Default::default()
        };
        let status = ReviewStatus {
            has_notes: true,
            ..clean()
        };

        for command in [
            Command::Accept,
            Command::EditOverrides,
            Command::ManualReject,
            Command::Prod,
            Command::RemoveNote,
            Command::RemoveAllNotes,
        ] {
            assert_eq!(
                decide(&status, &flags, command),
                Transition::refuse("Trainees can't do that")
            );
        }

        assert_eq!(
            decide(&status, &flags, Command::NoteEdit).effect,
            Some(Effect::EditNote)
        );
        assert_eq!(
            decide(&status, &flags, Command::Check).state,
            TriageState::CheckingArtifacts
        );
    }

    #[test]
    fn automatic_decisions() {
        let automatic = TriageFlags {
            automatic: true,
            ..Default::default()
        };
        let no_action = TriageFlags {
            no_action: true,
            automatic: true,
            ..Default::default()
        };

        assert_eq!(clean().automatic_command(&automatic), Some(Command::Accept));
        assert_eq!(clean().automatic_command(&no_action), Some(Command::Skip));
        assert_eq!(clean().automatic_command(&TriageFlags::default()), None);

        let status = ReviewStatus {
            missing: 1,
            ..clean()
        };
        assert_eq!(status.automatic_command(&automatic), Some(Command::Skip));
    }

    #[test]
    fn conclusions() {
        use TriageState::*;

        assert_eq!(conclude(Accepted, Outcome::Completed), Disposition::Next(Accepted));
        assert_eq!(conclude(Accepted, Outcome::Abandoned), Disposition::Next(Reviewing));
        assert_eq!(conclude(ManualRejecting, Outcome::Completed), Disposition::Next(Rejected));
        assert_eq!(conclude(ManualRejecting, Outcome::Abandoned), Disposition::Next(Reviewing));
        assert_eq!(conclude(AnnotatingNote, Outcome::QuitRun), Disposition::QuitRun);
        assert_eq!(conclude(EditingOverrides, Outcome::Completed), Disposition::Next(Reviewing));
        assert_eq!(conclude(Skipped, Outcome::Completed), Disposition::Next(Skipped));

        let quit = decide(&clean(), &TriageFlags::default(), Command::Quit);
        assert_eq!(quit.effect, Some(Effect::QuitRun));
        assert!(quit.state.is_terminal());
        assert!(!Reviewing.is_terminal());
    }
}
