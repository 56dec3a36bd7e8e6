// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rendering and editing of missing overrides.

use {
    super::{check_valid, session::Operator, MissingOverride},
    crate::{
        error::Result,
        external::TextEditor,
        reference::{component_from_section, NameTable, OverrideType, ReferenceTables},
        upload::Note,
    },
    std::str::FromStr,
};

/// Render missing entries one per line, optionally numbered from 1.
///
/// Entries with an invalid classification are marked with `[!]`.
pub fn render_missing(missing: &[MissingOverride], indexed: bool) -> String {
    let mut out = String::new();

    for (index, entry) in missing.iter().enumerate() {
        let line = if indexed {
            format!(
                "({}): {:<20} {:<20} {:<20}",
                index + 1,
                entry.display_name(),
                entry.priority,
                entry.section
            )
        } else {
            format!(
                "{:<20} {:<20} {:<20}",
                entry.display_name(),
                entry.priority,
                entry.section
            )
        };

        out.push_str(line.trim());
        if !entry.valid {
            out.push_str(" [!]");
        }
        out.push('\n');
    }

    out
}

pub fn render_note(note: &Note) -> String {
    format!(
        "\nAuthor: {}\nVersion: {}\nTimestamp: {}\n\n{}\n{}",
        note.author,
        note.version,
        note.timestamp.format("%Y-%m-%d %H:%M:%S"),
        note.comment,
        "-".repeat(72)
    )
}

/// Parse text produced by [render_missing] after an operator edited it.
///
/// Lines read `[type:]package priority section`. Blank lines and lines starting with `#`
/// are ignored. Omitted fields keep their current value. Only entries present in `current`
/// are recognized; the names of others are returned separately. Entries not mentioned in
/// the text are dropped.
pub fn parse_edited(
    text: &str,
    current: &[MissingOverride],
) -> (Vec<MissingOverride>, Vec<String>) {
    let mut entries = vec![];
    let mut unknown = vec![];

    for line in text.lines().map(|l| l.trim()) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or_default();
        let priority = words.next();
        let section = words.next();

        let (override_type, package) = match name.split_once(':') {
            Some((t, package)) => match OverrideType::from_str(t) {
                Ok(t) => (t, package),
                Err(_) => {
                    unknown.push(package.to_string());
                    continue;
                }
            },
            None => (OverrideType::Deb, name),
        };

        let existing = match current
            .iter()
            .find(|m| m.override_type == override_type && m.package == package)
        {
            Some(existing) => existing,
            None => {
                unknown.push(package.to_string());
                continue;
            }
        };

        let section = section.unwrap_or(&existing.section);

        entries.push(MissingOverride {
            package: package.to_string(),
            override_type,
            priority: priority.unwrap_or(&existing.priority).to_string(),
            section: section.to_string(),
            component: component_from_section(section).to_string(),
            valid: existing.valid,
        });
    }

    (entries, unknown)
}

/// Resolve operator input against a reference table.
///
/// Exact names win. Otherwise a prefix completing to exactly one name selects it.
pub fn resolve_name(input: &str, table: &NameTable) -> Option<String> {
    let input = input.trim();

    if table.contains(input) {
        return Some(input.to_string());
    }

    match table.complete(input).as_slice() {
        [name] if !input.is_empty() => Some(name.to_string()),
        _ => None,
    }
}

/// Ask a question until one of its choices is picked.
///
/// Choices are the upper case letters of `prompt`. A bracketed letter is the default
/// picked by an empty answer.
pub fn choose(operator: &dyn Operator, prompt: &str) -> Result<char> {
    let choices = prompt
        .chars()
        .filter(|c| c.is_ascii_uppercase())
        .collect::<Vec<_>>();
    let default = prompt
        .split_once('[')
        .and_then(|(_, rest)| rest.chars().next());

    loop {
        let answer = operator.prompt(prompt)?;

        let picked = match answer.trim().chars().next() {
            Some(c) => Some(c.to_ascii_uppercase()),
            None => default,
        };

        if let Some(c) = picked.filter(|c| choices.contains(c)) {
            return Ok(c);
        }
    }
}

fn ask_name(
    operator: &dyn Operator,
    question: &str,
    kind: &str,
    table: &NameTable,
) -> Result<String> {
    loop {
        let answer = operator.prompt(question)?;

        match resolve_name(&answer, table) {
            Some(name) => return Ok(name),
            None => operator.show(&format!(
                "E: '{}' is not a valid {}, try again.",
                answer.trim(),
                kind
            )),
        }
    }
}

/// Edit the classification of one entry.
///
/// Source entries only have their section edited; their priority is fixed.
pub fn edit_index(
    operator: &dyn Operator,
    refs: &ReferenceTables,
    entry: &mut MissingOverride,
) -> Result<()> {
    let prompt = if entry.override_type == OverrideType::Dsc {
        "[S]ection, Done ? "
    } else {
        "[B]oth, Priority, Section, Done ? "
    };

    loop {
        operator.show(&[entry.package.as_str(), &entry.priority, &entry.section].join("\t"));

        let (priority, section) = match choose(operator, prompt)? {
            'B' => (true, true),
            'P' => (true, false),
            'S' => (false, true),
            _ => break,
        };

        if priority {
            entry.priority = ask_name(operator, "New priority: ", "priority", &refs.priorities)?;
        }
        if section {
            entry.section = ask_name(operator, "New section: ", "section", &refs.sections)?;
        }
    }

    entry.component = component_from_section(&entry.section).to_string();

    Ok(())
}

/// Let the operator rework every entry in the editor.
pub fn edit_in_editor(
    operator: &dyn Operator,
    editor: &dyn TextEditor,
    refs: &ReferenceTables,
    missing: &[MissingOverride],
) -> Result<Vec<MissingOverride>> {
    let text = editor.edit(&render_missing(missing, false))?;

    let (mut entries, unknown) = parse_edited(&text, missing);
    for package in unknown {
        operator.warn(&format!("Ignoring unknown package '{}'", package));
    }
    check_valid(&mut entries, refs);

    Ok(entries)
}

/// The override editing dialog.
///
/// Entries are edited by index or all at once in the editor until the operator is done.
pub fn edit_overrides(
    operator: &dyn Operator,
    editor: &dyn TextEditor,
    refs: &ReferenceTables,
    mut missing: Vec<MissingOverride>,
) -> Result<Vec<MissingOverride>> {
    operator.show("");

    loop {
        check_valid(&mut missing, refs);
        operator.show(render_missing(&missing, true).trim_end());

        let answer = loop {
            let answer = operator.prompt("edit override <n>, Editor, Done ? ")?;
            let answer = answer.trim();

            if let Ok(index) = answer.parse::<usize>() {
                if index < 1 || index > missing.len() {
                    operator.show(&format!("{} is not a valid index.  Please retry.", index));
                } else {
                    break Some(index - 1);
                }
                continue;
            }

            match answer.chars().next().map(|c| c.to_ascii_uppercase()) {
                Some('E') => {
                    missing = edit_in_editor(operator, editor, refs, &missing)?;
                    break None;
                }
                Some('D') => return Ok(missing),
                _ => {}
            }
        };

        if let Some(index) = answer {
            edit_index(operator, refs, &mut missing[index])?;
        }
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            reference::NameTable,
            testing::{ScriptedOperator, StubEditor},
        },
        chrono::Utc,
        indoc::indoc,
    };

    fn refs() -> ReferenceTables {
        ReferenceTables {
            priorities: NameTable::new(vec![
                (1, "optional".to_string()),
                (2, "extra".to_string()),
                (3, "source".to_string()),
            ]),
            sections: NameTable::new(vec![
                (1, "libs".to_string()),
                (2, "net".to_string()),
                (3, "utils".to_string()),
                (4, "debian-installer".to_string()),
                (5, "contrib/net".to_string()),
            ]),
            components: NameTable::new(vec![(1, "main".to_string()), (2, "contrib".to_string())]),
        }
    }

    fn entries() -> Vec<MissingOverride> {
        let mut entries = vec![
            MissingOverride::new("foo", OverrideType::Deb, "optional", "utils"),
            MissingOverride::new("foo-udeb", OverrideType::Udeb, "optional", "utils"),
            MissingOverride::new("foo", OverrideType::Dsc, "source", "utils"),
        ];
        check_valid(&mut entries, &refs());

        entries
    }

    #[test]
    fn rendering() {
        assert_eq!(
            render_missing(&entries(), false),
            indoc! {"
                foo                  optional             utils
                udeb:foo-udeb        optional             utils [!]
                dsc:foo              source               utils
            "}
        );
        assert!(render_missing(&entries(), true).starts_with("(1): foo "));

        let note = Note {
            id: 1,
            package: "foo".into(),
            version: "1.0-1".into(),
            author: "jdoe".into(),
            comment: "copyright file incomplete".into(),
            timestamp: Utc::now(),
            trainee: false,
        };
        let text = render_note(&note);
        assert!(text.starts_with("\nAuthor: jdoe\nVersion: 1.0-1\nTimestamp: "));
        assert!(text.ends_with(&format!("copyright file incomplete\n{}", "-".repeat(72))));
    }

    #[test]
    fn editor_text() {
        let text = indoc! {"
            # comment
            foo extra contrib/net
            udeb:foo-udeb optional debian-installer

            bar optional libs
            rpm:foo optional libs
            dsc:foo
        "};

        let (parsed, unknown) = parse_edited(text, &entries());
        assert_eq!(unknown, vec!["bar", "foo"]);
        assert_eq!(parsed.len(), 3);

        assert_eq!(parsed[0].priority, "extra");
        assert_eq!(parsed[0].section, "contrib/net");
        assert_eq!(parsed[0].component, "contrib");
        assert_eq!(parsed[1].override_type, OverrideType::Udeb);
        assert_eq!(parsed[1].component, "main");
        assert_eq!(parsed[2].priority, "source");
        assert_eq!(parsed[2].section, "utils");

        let (parsed, _) = parse_edited("foo-udeb optional libs\n", &entries());
        assert!(parsed.is_empty());
    }

    #[test]
    fn name_resolution() {
        let refs = refs();

        assert_eq!(resolve_name("net", &refs.sections).as_deref(), Some("net"));
        assert_eq!(resolve_name("ut", &refs.sections).as_deref(), Some("utils"));
        assert_eq!(resolve_name("contrib", &refs.sections).as_deref(), Some("contrib/net"));
        assert_eq!(resolve_name("", &refs.sections), None);
        assert_eq!(resolve_name("games", &refs.sections), None);
        assert_eq!(resolve_name("ex", &refs.priorities).as_deref(), Some("extra"));
    }

    #[test]
    fn choices() -> Result<()> {
        let operator = ScriptedOperator::new(["x", "", "edit"]);

        assert_eq!(choose(&operator, "[R]eject, Edit, Abandon, Quit ?")?, 'R');
        assert_eq!(choose(&operator, "[R]eject, Edit, Abandon, Quit ?")?, 'E');
        assert_eq!(operator.prompts().len(), 3);

        Ok(())
    }

    #[test]
    fn index_edit() -> Result<()> {
        let refs = refs();
        let operator = ScriptedOperator::new(["b", "important", "ex", "contrib/net", "d"]);

        let mut entry = MissingOverride::new("foo", OverrideType::Deb, "optional", "utils");
        edit_index(&operator, &refs, &mut entry)?;

        assert_eq!(entry.priority, "extra");
        assert_eq!(entry.section, "contrib/net");
        assert_eq!(entry.component, "contrib");
        assert!(operator
            .shown()
            .contains(&"E: 'important' is not a valid priority, try again.".to_string()));

        let operator = ScriptedOperator::new(["p", "s", "net", "d"]);
        let mut entry = MissingOverride::new("foo", OverrideType::Dsc, "source", "utils");
        edit_index(&operator, &refs, &mut entry)?;
        assert_eq!(entry.priority, "source");
        assert_eq!(entry.section, "net");
        assert_eq!(operator.prompts()[..2], ["[S]ection, Done ? ", "[S]ection, Done ? "]);

        Ok(())
    }

    #[test]
    fn overrides_dialog() -> Result<()> {
        let refs = refs();
        let operator = ScriptedOperator::new(["7", "2", "s", "debian-installer", "d", "e", "D"]);
        let editor = StubEditor::new(|text: &str| text.replace("optional", "extra"));

        let edited = edit_overrides(&operator, &editor, &refs, entries())?;

        assert!(operator
            .shown()
            .contains(&"7 is not a valid index.  Please retry.".to_string()));
        assert_eq!(edited.len(), 3);
        assert!(edited.iter().all(|e| e.valid));
        assert_eq!(edited[0].priority, "extra");
        assert_eq!(edited[1].section, "debian-installer");
        assert_eq!(edited[1].priority, "extra");
        assert_eq!(editor.seeds().len(), 1);

        Ok(())
    }
}
