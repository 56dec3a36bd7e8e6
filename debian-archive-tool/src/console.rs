// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Terminal front end for NEW queue triage.

use {
    debian_archive::{error::Result, triage::session::Operator},
    dialoguer::{theme::Theme, Input},
    duct::cmd,
    std::{
        fmt,
        io::{ErrorKind, Write},
    },
};

/// Renders prompts exactly as given.
///
/// Triage prompts carry their own choices and trailing `?`.
struct BareTheme;

impl Theme for BareTheme {
    fn format_input_prompt(
        &self,
        f: &mut dyn fmt::Write,
        prompt: &str,
        _default: Option<&str>,
    ) -> fmt::Result {
        write!(f, "{}", prompt)
    }

    fn format_input_prompt_selection(
        &self,
        f: &mut dyn fmt::Write,
        prompt: &str,
        sel: &str,
    ) -> fmt::Result {
        write!(f, "{}{}", prompt, sel)
    }
}

/// An operator sitting at a terminal.
pub struct ConsoleOperator {
    pager: String,
}

impl Default for ConsoleOperator {
    /// Pages through `$PAGER`, or `less` when it is unset.
    fn default() -> Self {
        Self::with_pager(std::env::var("PAGER").unwrap_or_else(|_| "less".to_string()))
    }
}

impl ConsoleOperator {
    pub fn with_pager(pager: impl ToString) -> Self {
        Self {
            pager: pager.to_string(),
        }
    }
}

impl Operator for ConsoleOperator {
    fn prompt(&self, question: &str) -> Result<String> {
        Ok(Input::<String>::with_theme(&BareTheme)
            .with_prompt(question)
            .allow_empty(true)
            .interact_text()?)
    }

    fn show(&self, text: &str) {
        println!("{}", text);
    }

    fn warn(&self, message: &str) {
        eprintln!("W: {}", message);
    }

    fn page(&self, text: &str) -> std::io::Result<()> {
        let args: &[&str] = if self.pager == "less" { &["-R"] } else { &[] };

        match cmd(&self.pager, args).stdin_bytes(text.as_bytes()).run() {
            Ok(_) => Ok(()),
            // No pager installed. Print directly.
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let mut stdout = std::io::stdout();
                stdout.write_all(text.as_bytes())?;
                stdout.flush()
            }
            Err(e) => Err(e),
        }
    }
}
