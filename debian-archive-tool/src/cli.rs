// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::console::ConsoleOperator,
    anyhow::{anyhow, Result},
    clap::{Arg, ArgMatches, Command},
    debian_archive::{
        audit::AuditLog,
        catalog::Catalog,
        config::{ArchiveConfig, CONFIG_ENV},
        external::{
            CommandInspector, InspectCommand, ProcessEditor, QueueUploadActions,
            SendmailNotifier,
        },
        lock::{current_user, FilesystemLockRegistry},
        reconcile::Reconciler,
        reference::{Blacklist, ReferenceTables},
        triage::{
            machine::TriageFlags,
            session::{Collaborators, TriageEngine, TriageOptions},
        },
    },
    log::{info, warn, LevelFilter},
};

const CONFIG_ABOUT: &str = "\
Archive configuration

Every command reads a YAML document describing the archive. Its path is given
with --config or the DAT_CONFIG environment variable.

The document names the SQLite catalog (`database`), the directories for locks
(`lock_dir`), audit logs (`log_dir`), accepted uploads (`accepted_dir`) and
rejected uploads (`rejected_dir`), plus the reference data of the archive:
`components`, `override_types`, `priorities`, `sections`, `suites` and
`policy_queues`.

`check_overrides` lists the suites whose overrides are reconciled. Each entry
has a `suite`, a `process` flag and an optional `origin_suite` from which
missing overrides are copied.

`process_new` holds settings for NEW queue triage: the `default_queue`, the
`package_lock_dir` sub-directory, the `daily_lock` name with its retry budget
(`daily_lock_retries`, `daily_lock_backoff_ms`) and BXA notification settings
(`bxa_notify`, `bxa_address`).
";

const CHECK_OVERRIDES_ABOUT: &str = "\
Reconcile overrides with the packages in the archive.

For every suite listed in the `check_overrides` section of the configuration,
each (component, override type) partition of the suite's override namespace
is examined:

* Overrides of packages no longer in any suite sharing the namespace are
  removed. Packages with files in the accepted holding area are kept.
* Source packages without a source override get one derived from the
  override of one of their binary packages.
* When an origin suite is configured, overrides missing from the target are
  copied from the origin and existing overrides are synchronized to it.
* Packages still lacking an override are reported.

The daily processing lock is held for the whole run. Every change is written
to the audit log.

With --no-action the same report is produced but nothing is changed.
";

const PROCESS_NEW_ABOUT: &str = "\
Triage uploads waiting in the NEW queue.

Each upload of the policy queue is presented together with the packages it
introduces and their proposed priority and section. For every upload one of
the following may be chosen:

A  Accept the upload, adding the missing overrides
C  Check the upload's files
E  Edit the proposed overrides
M  Manually reject the upload
N  Edit a note on the upload
P  Prod the maintainer
R  Remove the note for the upload's version
O  Remove all notes of the source package
S  Skip to the next upload
Q  Quit

An upload can only be accepted once every proposed override is valid, no notes
are attached and all byhand files are processed.

Uploads locked by another operator are skipped. Uploads are processed in order
of source name and version, with uploads of already known source packages
first unless --no-binaries is given.

The DAK_INSPECT_UPLOAD environment variable may hold a shell command run for
each upload before it is presented. The following placeholders are replaced:

{directory}
   Directory holding a private copy of the upload's files.
{dsc}
   File name of the source package description.
{changes}
   File name of the upload's changes file.

For example, to open a tmux window listing the upload's files:

   DAK_INSPECT_UPLOAD='tmux new-window -d -c {directory} ls -l' dat process-new

A failing command skips the upload.
";

const INIT_CATALOG_ABOUT: &str = "\
Initialize the archive catalog.

Creates the catalog database if needed and inserts the reference data declared
in the configuration. Existing rows are left untouched.
";

pub fn run_cli() -> Result<()> {
    let app = Command::new("Debian Archive Tool")
        .version("0.1")
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Maintain overrides and the NEW queue of a Debian archive")
        .arg_required_else_help(true);

    let app = app
        .arg(
            Arg::new("config")
                .long("config")
                .takes_value(true)
                .global(true)
                .allow_invalid_utf8(true)
                .help("Path to the YAML archive configuration"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(
        Command::new("check-overrides")
            .about("Reconcile overrides with the packages in the archive")
            .long_about(CHECK_OVERRIDES_ABOUT)
            .arg(
                Arg::new("no-action")
                    .short('n')
                    .long("no-action")
                    .help("Report what would change without changing anything"),
            ),
    );

    let app = app.subcommand(
        Command::new("process-new")
            .about("Triage uploads waiting in the NEW queue")
            .long_about(PROCESS_NEW_ABOUT)
            .arg(
                Arg::new("automatic")
                    .short('a')
                    .long("automatic")
                    .help("Accept uploads without asking when possible"),
            )
            .arg(
                Arg::new("no-binaries")
                    .short('b')
                    .long("no-binaries")
                    .help("Do not move uploads of known source packages to the front"),
            )
            .arg(
                Arg::new("comments")
                    .short('c')
                    .long("comments")
                    .help("Print the notes attached to uploads and exit"),
            )
            .arg(
                Arg::new("manual-reject")
                    .short('m')
                    .long("manual-reject")
                    .takes_value(true)
                    .help("Text prepended to rejection messages"),
            )
            .arg(
                Arg::new("no-action")
                    .short('n')
                    .long("no-action")
                    .help("Change nothing; every upload is skipped"),
            )
            .arg(
                Arg::new("trainee")
                    .short('t')
                    .long("trainee")
                    .help("Refuse commands reserved to archive administrators"),
            )
            .arg(
                Arg::new("queue")
                    .short('q')
                    .long("queue")
                    .takes_value(true)
                    .help("Policy queue to process"),
            )
            .arg(
                Arg::new("changes")
                    .multiple_occurrences(true)
                    .help("Restrict processing to these changes files"),
            ),
    );

    let app = app.subcommand(
        Command::new("init-catalog")
            .about("Create the catalog and insert configured reference data")
            .long_about(INIT_CATALOG_ABOUT),
    );

    let mut app =
        app.subcommand(Command::new("config").about("Print documentation about the configuration"));

    let matches = app.clone().get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    match matches.subcommand() {
        Some(("check-overrides", args)) => command_check_overrides(args),
        Some(("process-new", args)) => command_process_new(args),
        Some(("init-catalog", args)) => command_init_catalog(args),
        Some(("config", _)) => {
            println!("{}", CONFIG_ABOUT);
            Ok(())
        }
        Some((command, _)) => Err(anyhow!("invalid sub-command: {}", command)),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}

fn load_config(args: &ArgMatches) -> Result<ArchiveConfig> {
    let path = match args.value_of_os("config") {
        Some(path) => path.to_os_string(),
        None => std::env::var_os(CONFIG_ENV)
            .ok_or_else(|| anyhow!("no configuration given; use --config or {}", CONFIG_ENV))?,
    };

    info!("loading configuration from {}", path.to_string_lossy());

    Ok(ArchiveConfig::from_path(path)?)
}

fn command_check_overrides(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let no_action = args.is_present("no-action");
    let user = current_user();

    let mut catalog = Catalog::new_path(&config.database)?;
    let audit = if no_action {
        AuditLog::dry("check-overrides", &user)
    } else {
        AuditLog::open(&config.log_dir, "check-overrides", &user)?
    };

    let blacklist = Blacklist::from_directory(&config.accepted_dir)?;
    let refs = ReferenceTables::load(&catalog)?;
    let locks = FilesystemLockRegistry::new(&config.lock_dir)?;

    let reconciler = Reconciler::new(&refs, &blacklist, &audit, no_action);
    let report = reconciler.run(&mut catalog, &config, &locks, &user)?;

    let missing = report.packages_without_override();
    if no_action {
        info!(
            "{} change(s) would be made; {} package(s) lack an override",
            report.change_count(),
            missing.len()
        );
    } else {
        info!(
            "{} change(s) made; {} package(s) lack an override",
            report.change_count(),
            missing.len()
        );
    }

    if report.failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("{} unit(s) could not be reconciled", report.failures.len()))
    }
}

fn command_process_new(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let user = current_user();

    let mut flags = TriageFlags {
        automatic: args.is_present("automatic"),
        no_action: args.is_present("no-action"),
        trainee: args.is_present("trainee"),
    };

    let audit = if flags.no_action {
        AuditLog::dry("process-new", &user)
    } else {
        match AuditLog::open(&config.log_dir, "process-new", &user) {
            Ok(audit) => audit,
            Err(e) => {
                warn!("unable to open audit log ({}); continuing in trainee mode", e);
                flags.trainee = true;
                AuditLog::dry("process-new", &user)
            }
        }
    };

    let queue = args
        .value_of("queue")
        .unwrap_or(&config.process_new.default_queue)
        .to_string();
    let changes = args
        .values_of("changes")
        .map(|values| values.map(|v| v.to_string()).collect::<Vec<_>>())
        .unwrap_or_default();

    let mut catalog = Catalog::new_path(&config.database)?;
    let refs = ReferenceTables::load(&catalog)?;

    let package_locks = FilesystemLockRegistry::new(config.package_lock_path())?;
    let daily_locks = FilesystemLockRegistry::new(&config.lock_dir)?;

    let operator = ConsoleOperator::default();
    let editor = ProcessEditor::from_env();
    let inspector = CommandInspector::default();
    let notifier = SendmailNotifier::new(config.from_address.clone());
    let actions = QueueUploadActions::new(&config.accepted_dir, &config.rejected_dir);

    let io = Collaborators {
        operator: &operator,
        editor: &editor,
        inspector: &inspector,
        notifier: &notifier,
        actions: &actions,
        package_locks: &package_locks,
        daily_locks: &daily_locks,
    };

    let options = TriageOptions {
        flags,
        no_binaries: args.is_present("no-binaries"),
        comments: args.is_present("comments"),
        manual_reject: args.value_of("manual-reject").map(|s| s.to_string()),
        inspect: InspectCommand::from_env(),
        bxa_address: if config.process_new.bxa_notify {
            config.process_new.bxa_address.clone()
        } else {
            None
        },
        distribution: config.distribution.clone(),
    };

    let mut engine = TriageEngine::new(
        &mut catalog,
        &refs,
        &audit,
        io,
        options,
        config.daily_lock(),
        &user,
    );

    let summary = engine.run(&queue, &changes)?;

    if let Some(message) = summary.message() {
        eprintln!("{}", message);
    }

    Ok(())
}

fn command_init_catalog(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;

    let mut catalog = Catalog::new_path(&config.database)?;
    catalog.with_transaction(|txn| {
        txn.import_config(&config)?;
        txn.commit()
    })?;

    info!("catalog {} initialized", config.database.display());

    Ok(())
}
