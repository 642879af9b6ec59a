use chainbak::{
    default_config, dump_config, init_logging, load_config, restore, ChainbakError, Config,
};
use clap::error::ErrorKind;
use clap::{value_parser, Arg, ArgAction, Command};
use std::path::{Path, PathBuf};
use std::process;
use tracing::warn;

fn main() {
    match run() {
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
    Command::new("chainbak-restore")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Restore a chainbak snapshot into a working directory")
        .long_about(
            "chainbak-restore replaces the contents of WORKING_DIR with the state captured by\n\
             SNAPSHOT_DIR. Incremental snapshots are completed from their root full backup,\n\
             which must sit next to them under the same backup root.\n\
             Example: chainbak-restore /mnt/backups/2024-05-01_12-00-00 ~/project",
        )
        .arg(
            Arg::new("snapshot-dir")
                .help("Snapshot directory to restore")
                .value_name("SNAPSHOT_DIR")
                .value_parser(value_parser!(PathBuf))
                .required_unless_present("dump-config"),
        )
        .arg(
            Arg::new("working-dir")
                .help("Directory to restore into; existing contents are removed")
                .value_name("WORKING_DIR")
                .value_parser(value_parser!(PathBuf))
                .required_unless_present("dump-config"),
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

    let (Some(snapshot_dir), Some(working_dir)) = (
        matches.get_one::<PathBuf>("snapshot-dir"),
        matches.get_one::<PathBuf>("working-dir"),
    ) else {
        return Err(ChainbakError::validation(
            "Missing arguments. Use --help for usage information.",
        ));
    };

    setup_signal_handler();
    process_restore(snapshot_dir, working_dir, &config, verbose, quiet)?;
    Ok(0)
}

fn process_restore(
    snapshot_dir: &Path,
    working_dir: &Path,
    config: &Config,
    verbose: bool,
    quiet: bool,
) -> Result<(), ChainbakError> {
    let report = restore(snapshot_dir, working_dir, config)?;

    if verbose {
        println!("Restored: {}", report.snapshot_dir.display());
        println!("  → {}", report.destination.display());
        if let Some(root_dir) = &report.root_dir {
            println!("  From root {}: {}", root_dir.display(), report.from_root);
        }
        println!("  From snapshot: {}", report.from_snapshot);
        println!("  Size: {}", chainbak::format_size(report.bytes_restored));
        println!("  Duration: {:.2}s", report.duration.as_secs_f64());
    } else if !quiet {
        println!("{}", report.summary());
    }

    Ok(())
}

fn setup_signal_handler() {
    let result = ctrlc::set_handler(|| {
        eprintln!("\nInterrupted by user. The destination may be partially restored.");
        process::exit(ChainbakError::Interrupted.exit_code());
    });
    if let Err(e) = result {
        warn!("Could not install Ctrl-C handler: {e}");
    }
}
