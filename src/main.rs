use chainbak::{
    default_config, dump_config, full_backup, incremental_backup, init_logging, load_config,
    plan_incremental, BackupKind, ChainbakError, Config, PathIndex,
};
use clap::error::ErrorKind;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::{Path, PathBuf};
use std::process;
use tracing::warn;

fn main() {
    let result = run();
    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(error) => {
            eprintln!("Error: {error}");

            let suggestions = error.suggestions();
            if !suggestions.is_empty() {
                eprintln!("\nSuggestions:");
                for suggestion in suggestions {
                    eprintln!("  - {suggestion}");
                }
            }

            process::exit(error.exit_code());
        }
    }
}

fn build_cli() -> Command {
    Command::new("chainbak")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Full and incremental directory backups")
        .long_about(
            "chainbak copies a working directory into a timestamped snapshot under a backup root.\n\
             A full backup copies everything; an incremental backup copies only what changed\n\
             since the last full backup. Restore with chainbak-restore.\n\
             Example: chainbak full ~/project /mnt/backups",
        )
        .arg(
            Arg::new("mode")
                .help("Backup mode: full or incremental")
                .value_name("MODE")
                .required_unless_present("dump-config"),
        )
        .arg(
            Arg::new("working-dir")
                .help("Directory to back up")
                .value_name("WORKING_DIR")
                .value_parser(value_parser!(PathBuf))
                .required_unless_present("dump-config"),
        )
        .arg(
            Arg::new("backup-root")
                .help("Directory holding the snapshots")
                .value_name("BACKUP_ROOT")
                .value_parser(value_parser!(PathBuf))
                .required_unless_present("dump-config"),
        )
        .arg(
            Arg::new("dry-run")
                .short('n')
                .long("dry-run")
                .help("Show what would be backed up without doing it")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Show detailed information")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Suppress all output except errors")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose"),
        )
        .arg(
            Arg::new("no-progress")
                .long("no-progress")
                .help("Disable progress indication completely")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dump-config")
                .long("dump-config")
                .help("Display current configuration settings and exit")
                .action(ArgAction::SetTrue),
        )
}

fn run() -> Result<i32, ChainbakError> {
    let matches = match build_cli().try_get_matches() {
        Ok(matches) => matches,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => {
                let _ = e.print();
                return Ok(1);
            }
        },
    };

    let dry_run = matches.get_flag("dry-run");
    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");
    init_logging(verbose, quiet);

    let mut config = load_config().unwrap_or_else(|e| {
        warn!("Could not load config, using defaults: {e}");
        default_config()
    });
    if quiet || matches.get_flag("no-progress") {
        config.progress = false;
    }

    if matches.get_flag("dump-config") {
        dump_config(&config)?;
        return Ok(0);
    }

    let (kind, working_dir, backup_root) = backup_args(&matches)?;

    setup_signal_handler();
    process_backup(
        kind,
        working_dir,
        backup_root,
        &config,
        dry_run,
        verbose,
        quiet,
    )?;
    Ok(0)
}

fn backup_args(matches: &ArgMatches) -> Result<(BackupKind, &Path, &Path), ChainbakError> {
    let missing = || ChainbakError::validation("Missing arguments. Use --help for usage information.");

    let kind = matches
        .get_one::<String>("mode")
        .ok_or_else(missing)?
        .parse()?;
    let working_dir = matches
        .get_one::<PathBuf>("working-dir")
        .ok_or_else(missing)?;
    let backup_root = matches
        .get_one::<PathBuf>("backup-root")
        .ok_or_else(missing)?;
    Ok((kind, working_dir.as_path(), backup_root.as_path()))
}

fn process_backup(
    kind: BackupKind,
    working_dir: &Path,
    backup_root: &Path,
    config: &Config,
    dry_run: bool,
    verbose: bool,
    quiet: bool,
) -> Result<(), ChainbakError> {
    if dry_run {
        match kind {
            BackupKind::Full => {
                let index = PathIndex::build(working_dir, config.follow_symlinks)?;
                index.ensure_recordable()?;
                println!(
                    "Would create full backup under {} ({} entries, {})",
                    backup_root.display(),
                    index.len(),
                    chainbak::format_size(index.total_file_size())
                );
            }
            BackupKind::Incremental => {
                let plan = plan_incremental(working_dir, backup_root, config)?;
                println!(
                    "Would create incremental backup under {} against {} at {} ({} to copy, {}; {} unchanged)",
                    backup_root.display(),
                    plan.previous,
                    plan.previous_dir.display(),
                    plan.copy.len(),
                    chainbak::format_size(plan.bytes_to_copy()),
                    plan.unchanged.len()
                );
                if verbose {
                    for entry in &plan.copy {
                        println!("  + {}", entry.rel_path.display());
                    }
                }
            }
        }
        return Ok(());
    }

    let report = match kind {
        BackupKind::Full => full_backup(working_dir, backup_root, config)?,
        BackupKind::Incremental => incremental_backup(working_dir, backup_root, config)?,
    };

    if verbose {
        println!("Backed up: {}", working_dir.display());
        println!("  → {}", report.snapshot_dir.display());
        println!("  Chain root: {}", report.root);
        println!("  Files: {}", report.files_copied);
        println!("  Directories: {}", report.dirs_created);
        println!("  Links: {}", report.links_copied);
        if kind == BackupKind::Incremental {
            println!("  Unchanged: {}", report.unchanged);
        }
        println!("  Size: {}", chainbak::format_size(report.bytes_copied));
        println!("  Duration: {:.2}s", report.duration.as_secs_f64());
    } else if !quiet {
        println!("{}", report.summary());
    }

    Ok(())
}

fn setup_signal_handler() {
    let result = ctrlc::set_handler(|| {
        eprintln!("\nInterrupted by user. The snapshot being written may be incomplete.");
        process::exit(ChainbakError::Interrupted.exit_code());
    });
    if let Err(e) = result {
        warn!("Could not install Ctrl-C handler: {e}");
    }
}
