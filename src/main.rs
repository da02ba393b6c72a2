mod config;
mod daemon;
mod emit;
mod extract;
mod sink;
mod store;
mod tail;

use clap::Parser;
use config::FuseConfig;
use daemon::Daemon;
use emit::{EmissionGate, EmitMode};
use sink::RotatingSink;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tail::CheckpointedTail;
use tracing_subscriber::EnvFilter;

/// Correlates fragmented MTA log lines into per-transaction JSON records:
/// tail the mail log, merge each delivery's lines by queue id, and append
/// one flat JSON document per completed transaction to a size-rotated,
/// compressed output file.
#[derive(Parser, Debug)]
#[command(name = "mailfuse", version, about)]
pub struct Cli {
    /// Mail log to tail (overrides [input].file in the config)
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// Config file path
    #[arg(short, long, default_value = "mailfuse.toml")]
    config: PathBuf,

    /// Output file path (overrides config)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Poll interval in seconds (overrides config)
    #[arg(short, long)]
    interval: Option<u64>,

    /// Emission mode: permissive or strict (overrides config)
    #[arg(short, long)]
    mode: Option<EmitMode>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (per-line extraction, cycle stats)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.quiet {
        "warn"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let mut config = match FuseConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "could not load configuration");
            return ExitCode::FAILURE;
        }
    };

    // CLI overrides
    if let Some(input) = cli.input {
        config.input.file = Some(input);
    }
    if let Some(output) = cli.output {
        config.output.file = output;
    }
    if let Some(interval) = cli.interval {
        config.poll.interval_secs = interval;
    }
    if let Some(mode) = cli.mode {
        config.emit.mode = mode;
    }

    let Some(input) = config.input.file.clone() else {
        eprintln!("Please specify the input file path: e.g. mailfuse /var/log/mail/mail.log");
        return ExitCode::FAILURE;
    };

    let tail = match config.input.checkpoint_file.clone() {
        Some(checkpoint) => CheckpointedTail::with_checkpoint(&input, checkpoint),
        None => CheckpointedTail::new(&input),
    };

    if cli.dry_run {
        println!("mailfuse v{}", env!("CARGO_PKG_VERSION"));
        println!("  input:          {}", input.display());
        println!("  checkpoint:     {}", tail.checkpoint_path().display());
        println!("  output:         {}", config.output.file.display());
        println!("  poll interval:  {}s", config.poll.interval_secs);
        println!("  clear on cycle: {}", config.poll.clear_between_cycles);
        println!("  emit mode:      {:?}", config.emit.mode);
        println!("  rotate at:      {} bytes", config.rotation.max_bytes);
        println!("  keep archives:  {}", config.rotation.keep_archives);
        return ExitCode::SUCCESS;
    }

    // Setup failures are fatal here rather than degrading into a loop
    // whose writes can never succeed.
    let sink = match RotatingSink::open(
        &config.output.file,
        config.rotation.max_bytes,
        config.rotation.keep_archives,
    ) {
        Ok(sink) => sink,
        Err(e) => {
            tracing::error!(error = %e, "could not open output file");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        input = %input.display(),
        output = %config.output.file.display(),
        mode = ?config.emit.mode,
        "mailfuse starting"
    );

    let mut daemon = Daemon::new(
        tail,
        EmissionGate::new(config.emit.mode),
        sink,
        Duration::from_secs(config.poll.interval_secs),
        config.poll.clear_between_cycles,
    );
    daemon.run().await;

    ExitCode::SUCCESS
}
