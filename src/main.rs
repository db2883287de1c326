use anyhow::{Context, Result as AnyhowResult};
use clap::Parser;
use std::io;
use std::os::fd::AsFd;
use std::path::PathBuf;

use witness::classify::PatternClassifier;
use witness::config::Config;
use witness::services::terminal_modes::{self, TerminalModes};
use witness::services::{log_dirs, signal_handler, tracing_setup};
use witness::snapshot::GitSnapshotStore;
use witness::supervisor::{launcher, ErrorTrigger, Transcript};

/// A session supervisor that records error-time snapshots
#[derive(Parser, Debug)]
#[command(name = "witness")]
#[command(about = "Supervise a shell session and snapshot the working directory when it errors", long_about = None)]
#[command(version)]
struct Args {
    /// Transcript output file (default: "typescript" in the working directory)
    #[arg(value_name = "FILE")]
    transcript: Option<PathBuf>,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Shell to supervise (default: $SHELL, then /bin/sh)
    #[arg(long, value_name = "PATH")]
    shell: Option<String>,

    /// Path to log file for supervisor diagnostics (default: system temp dir)
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    dump_config: bool,
}

fn main() -> AnyhowResult<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    if let Some(shell) = args.shell {
        config.shell = Some(shell);
    }
    if let Some(transcript) = args.transcript {
        config.transcript = transcript;
    }

    // Handle --dump-config early (no terminal setup needed)
    if args.dump_config {
        let json = serde_json::to_string_pretty(&config).context("Failed to serialize config")?;
        println!("{json}");
        return Ok(());
    }

    let log_path = args.log_file.unwrap_or_else(log_dirs::default_log_path);
    if !tracing_setup::init_global(&log_path) {
        eprintln!(
            "witness: cannot open log file {}, continuing unlogged",
            log_path.display()
        );
    }
    tracing::info!("session supervisor starting");

    run(config)
}

/// Anything that fails before the loop starts is a fatal setup error: a
/// diagnostic on stderr via the anyhow chain and exit code 1, before any
/// interactive behavior is observed.
fn run(config: Config) -> AnyhowResult<()> {
    let mut transcript = Transcript::create(&config.transcript).with_context(|| {
        format!(
            "cannot open transcript file {}",
            config.transcript.display()
        )
    })?;

    let window = launcher::query_window().context("the supervisor needs a controlling terminal")?;
    signal_handler::install_resize_handler();

    let classifier = PatternClassifier::new(&config.analyzer.patterns);
    let workdir = std::env::current_dir().context("cannot determine the working directory")?;
    let mut store = GitSnapshotStore::new(workdir);
    let mut trigger = ErrorTrigger::new(&classifier, &mut store, config.snapshot.clone());

    let mut session =
        launcher::launch(&config, window).context("failed to launch the supervised session")?;

    // From here on the terminal is ours; make sure a panic hands it back.
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        terminal_modes::emergency_cleanup();
        original_hook(panic);
    }));
    let mut modes = TerminalModes::enable();

    let stdin = io::stdin();
    let stdout = io::stdout();
    let result = session.run(stdin.as_fd(), stdout.as_fd(), &mut transcript, &mut trigger);

    modes.undo();
    session.shutdown();

    let end = result.context("session i/o failed")?;
    tracing::info!(
        ?end,
        transcript = %config.transcript.display(),
        "session ended"
    );
    Ok(())
}
