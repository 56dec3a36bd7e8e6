// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Collaborators living outside the archive.

Triage calls out to an editor, package inspection tools, a mail transport and the
machinery that moves accepted and rejected uploads out of a queue. Each is a trait here,
with an implementation invoking the real programs.
*/

use {
    crate::{
        error::{ArchiveError, Result},
        upload::Upload,
    },
    debian_packaging::control::ControlParagraphReader,
    duct::cmd,
    log::{info, warn},
    std::{
        io::{BufReader, ErrorKind},
        path::{Path, PathBuf},
    },
};

/// Environment variable holding an operator command run on each upload.
pub const INSPECT_UPLOAD_ENV: &str = "DAK_INSPECT_UPLOAD";

/// Edits text interactively.
pub trait TextEditor {
    /// Present `seed` for editing and return the edited text.
    fn edit(&self, seed: &str) -> Result<String>;
}

/// Runs the editor named by `$EDITOR` on a temporary file.
pub struct ProcessEditor {
    command: String,
}

impl ProcessEditor {
    pub fn new(command: impl ToString) -> Self {
        Self {
            command: command.to_string(),
        }
    }

    /// Use `$EDITOR`, falling back to `vi`.
    pub fn from_env() -> Self {
        Self::new(std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string()))
    }
}

impl TextEditor for ProcessEditor {
    fn edit(&self, seed: &str) -> Result<String> {
        let td = tempfile::Builder::new().prefix("dat-edit-").tempdir()?;
        let path = td.path().join("edit.txt");
        std::fs::write(&path, seed)?;

        let output = cmd(
            "sh",
            vec![
                "-c".to_string(),
                format!("{} \"$1\"", self.command),
                "sh".to_string(),
                path.display().to_string(),
            ],
        )
        .unchecked()
        .run()?;

        if !output.status.success() {
            return Err(ArchiveError::EditorFailed(
                self.command.clone(),
                output.status.code(),
            ));
        }

        Ok(std::fs::read_to_string(&path)?)
    }
}

/// Produces human readable analyses of package files.
pub trait Inspector {
    /// Describe a `.changes` file.
    fn display_changes(&self, suite: &str, changes: &Path) -> Result<String>;

    /// Describe a `.dsc` file.
    fn check_source(&self, suite: &str, dsc: &Path) -> Result<String>;

    /// Describe a binary package file.
    fn check_binary(&self, suite: &str, deb: &Path) -> Result<String>;
}

/// Extract the payload of a cleartext signed document.
///
/// Unsigned text is returned unaltered.
pub fn strip_signature(text: &str) -> String {
    if !text.starts_with("-----BEGIN PGP SIGNED MESSAGE-----") {
        return text.to_string();
    }

    text.lines()
        .skip_while(|line| !line.is_empty())
        .skip(1)
        .take_while(|line| !line.starts_with("-----BEGIN PGP SIGNATURE-----"))
        .map(|line| line.strip_prefix("- ").unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render the fields of a control file, one `Name: value` per line.
pub fn render_control_file(text: &str) -> Result<String> {
    let payload = strip_signature(text);
    let reader = ControlParagraphReader::new(BufReader::new(payload.as_bytes()));

    let mut out = String::new();

    for paragraph in reader {
        let paragraph = paragraph.map_err(|e| ArchiveError::ControlParse(format!("{:?}", e)))?;

        for field in paragraph.iter_fields() {
            out.push_str(&format!("{}: {}\n", field.name(), field.value_str()));
        }
        out.push('\n');
    }

    Ok(out)
}

/// Run a program and capture its combined output.
///
/// A missing program is reported in the output rather than as an error.
fn program_output(program: &str, args: Vec<String>) -> Result<String> {
    match cmd(program, args)
        .stderr_to_stdout()
        .stdout_capture()
        .unchecked()
        .run()
    {
        Ok(output) => Ok(String::from_utf8_lossy(&output.stdout).to_string()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Ok(format!("({} is not available)\n", program))
        }
        Err(e) => Err(e.into()),
    }
}

/// Inspects packages with `lintian` and `dpkg-deb`.
#[derive(Default)]
pub struct CommandInspector;

impl Inspector for CommandInspector {
    fn display_changes(&self, suite: &str, changes: &Path) -> Result<String> {
        let text = std::fs::read_to_string(changes)?;

        Ok(format!(
            "{} (target suite {})\n\n{}",
            changes.display(),
            suite,
            render_control_file(&text)?
        ))
    }

    fn check_source(&self, suite: &str, dsc: &Path) -> Result<String> {
        let text = std::fs::read_to_string(dsc)?;

        Ok(format!(
            "{} (target suite {})\n\n{}\nlintian:\n{}",
            dsc.display(),
            suite,
            render_control_file(&text)?,
            program_output("lintian", vec![dsc.display().to_string()])?
        ))
    }

    fn check_binary(&self, suite: &str, deb: &Path) -> Result<String> {
        let path = deb.display().to_string();

        Ok(format!(
            "{} (target suite {})\n\n{}\ncontents:\n{}\nlintian:\n{}",
            path,
            suite,
            program_output("dpkg-deb", vec!["--info".to_string(), path.clone()])?,
            program_output("dpkg-deb", vec!["--contents".to_string(), path.clone()])?,
            program_output("lintian", vec![path.clone()])?
        ))
    }
}

/// A mail to deliver.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Notification {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl Notification {
    /// Render as an RFC 822 message.
    pub fn to_message(&self, from: Option<&str>) -> String {
        let mut message = String::new();

        if let Some(from) = from {
            message.push_str(&format!("From: {}\n", from));
        }
        message.push_str(&format!("To: {}\n", self.to.join(", ")));
        message.push_str(&format!("Subject: {}\n", self.subject));
        message.push_str("X-DAK: dak process-new\n");
        message.push('\n');
        message.push_str(&self.body);
        if !self.body.ends_with('\n') {
            message.push('\n');
        }

        message
    }
}

/// Delivers notifications.
pub trait Notifier {
    fn send(&self, notification: &Notification) -> Result<()>;
}

/// Delivers mail through `sendmail`.
pub struct SendmailNotifier {
    program: PathBuf,
    from: Option<String>,
}

impl SendmailNotifier {
    pub fn new(from: Option<String>) -> Self {
        Self {
            program: PathBuf::from("/usr/sbin/sendmail"),
            from,
        }
    }
}

impl Notifier for SendmailNotifier {
    fn send(&self, notification: &Notification) -> Result<()> {
        let message = notification.to_message(self.from.as_deref());

        let output = cmd(&self.program, vec!["-oi", "-t"])
            .stdin_bytes(message.into_bytes())
            .stderr_to_stdout()
            .stdout_capture()
            .unchecked()
            .run()?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ArchiveError::Notification(format!(
                "{} failed: {}",
                self.program.display(),
                String::from_utf8_lossy(&output.stdout)
            )))
        }
    }
}

/// Durable side effects of a triage decision.
pub trait UploadActions {
    /// Move an accepted upload on for installation.
    fn accept(&self, upload: &Upload, queue_dir: &Path) -> Result<()>;

    /// Bounce an upload with a reason.
    fn reject(&self, upload: &Upload, queue_dir: &Path, reason: &str) -> Result<()>;
}

/// Moves upload files out of the queue directory.
pub struct QueueUploadActions {
    accepted_dir: PathBuf,
    rejected_dir: PathBuf,
}

impl QueueUploadActions {
    pub fn new(accepted_dir: impl AsRef<Path>, rejected_dir: impl AsRef<Path>) -> Self {
        Self {
            accepted_dir: accepted_dir.as_ref().to_path_buf(),
            rejected_dir: rejected_dir.as_ref().to_path_buf(),
        }
    }

    fn move_files(&self, upload: &Upload, queue_dir: &Path, dest_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dest_dir)?;

        for name in upload.filenames() {
            let source = queue_dir.join(name);

            if !source.exists() {
                warn!("W: {} missing from {}", name, queue_dir.display());
                continue;
            }

            let dest = dest_dir.join(name);
            if std::fs::rename(&source, &dest).is_err() {
                std::fs::copy(&source, &dest)?;
                std::fs::remove_file(&source)?;
            }
        }

        Ok(())
    }
}

impl UploadActions for QueueUploadActions {
    fn accept(&self, upload: &Upload, queue_dir: &Path) -> Result<()> {
        info!(
            "moving {} to {}",
            upload.changes_name,
            self.accepted_dir.display()
        );
        self.move_files(upload, queue_dir, &self.accepted_dir)
    }

    fn reject(&self, upload: &Upload, queue_dir: &Path, reason: &str) -> Result<()> {
        info!(
            "moving {} to {}",
            upload.changes_name,
            self.rejected_dir.display()
        );
        self.move_files(upload, queue_dir, &self.rejected_dir)?;

        std::fs::write(
            self.rejected_dir
                .join(format!("{}.reason", upload.changes_name)),
            reason,
        )?;

        Ok(())
    }
}

/// An operator supplied shell command run against each upload.
///
/// `{directory}`, `{dsc}` and `{changes}` in the template are replaced by the directory
/// holding the upload, the name of its `.dsc` (or the empty string) and the name of its
/// `.changes` file.
#[derive(Clone, Debug)]
pub struct InspectCommand {
    template: String,
}

impl InspectCommand {
    pub fn new(template: impl ToString) -> Self {
        Self {
            template: template.to_string(),
        }
    }

    /// Read the template from the environment, if set.
    pub fn from_env() -> Option<Self> {
        std::env::var(INSPECT_UPLOAD_ENV).ok().map(Self::new)
    }

    pub fn render(&self, directory: &Path, upload: &Upload) -> String {
        let dsc = upload
            .source_package
            .as_ref()
            .map(|s| s.filename.as_str())
            .unwrap_or_default();

        self.template
            .replace("{directory}", &directory.display().to_string())
            .replace("{dsc}", dsc)
            .replace("{changes}", &upload.changes_name)
    }

    /// Run the command through the shell.
    pub fn run(&self, directory: &Path, upload: &Upload) -> Result<()> {
        let command = self.render(directory, upload);

        let output = cmd("sh", vec!["-c", command.as_str()]).unchecked().run()?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ArchiveError::InspectCommandFailed(format!(
                "{} (exit status {:?})",
                command,
                output.status.code()
            )))
        }
    }
}
