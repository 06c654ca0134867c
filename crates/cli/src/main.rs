//! Thin command-line client for the relay synchronization engine.
//!
//! The binary translates flags into the engine's configuration record,
//! wires Ctrl-C to the cancellation token, runs one operation, and prints
//! the final counters and error summary. Everything interesting happens in
//! `relay_engine`.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use relay_engine::{
    CancellationToken, ConflictConfig, ConflictDescriptor, ConflictStrategy, EngineConfig,
    InteractiveDecision, PerformanceConfig, Resolution, SyncEngine, SyncMode, SyncOptions,
    SyncProfile, SyncStats,
};

#[derive(Parser)]
#[command(
    name = "relay",
    version,
    about = "Concurrent directory mirroring and synchronization"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// One-way mirror: make DESTINATION reflect SOURCE.
    Mirror {
        /// Tree to read from.
        source: PathBuf,
        /// Tree to write to.
        destination: PathBuf,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Synchronize SOURCE into DESTINATION under a conflict policy.
    Sync {
        /// Tree to read from.
        source: PathBuf,
        /// Tree to write to.
        destination: PathBuf,
        /// Plan and count, but write nothing.
        #[arg(long)]
        dry_run: bool,
        /// Remove destination entries absent from the source.
        #[arg(long)]
        delete: bool,
        /// Skip digest comparison when sizes and times match.
        #[arg(long)]
        no_checksum: bool,
        /// Do not re-apply source permissions and times.
        #[arg(long)]
        no_preserve: bool,
        /// Conflict strategy: newest, source, destination, smart, skip, or
        /// interactive.
        #[arg(long, default_value = "newest")]
        strategy: String,
        /// Back up destination files before overwriting them.
        #[arg(long)]
        backup: bool,
        /// Directory for backups (default: .relay-backups).
        #[arg(long)]
        backup_dir: Option<PathBuf>,
        /// Abort the whole operation after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Watch SOURCE and apply debounced changes to DESTINATION until
    /// interrupted.
    Watch {
        /// Tree to watch.
        source: PathBuf,
        /// Tree to apply changes to.
        destination: PathBuf,
    },
}

#[derive(Args)]
struct Tuning {
    /// Worker-pool size (0 = auto).
    #[arg(long, default_value_t = 0)]
    workers: usize,
    /// Copy buffer size in bytes (0 = default).
    #[arg(long, default_value_t = 0)]
    buffer_size: usize,
    /// Disable the kernel zero-copy fast path.
    #[arg(long)]
    no_zero_copy: bool,
    /// Digest algorithm: blake3 or sha256.
    #[arg(long)]
    digest: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    relay_logging::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("relay: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    match cli.command {
        Command::Mirror {
            source,
            destination,
            tuning,
        } => {
            let engine = build_engine(&source, &destination, SyncMode::Mirror, &tuning, None)?;
            let stats = engine.mirror(&cancel, &source, &destination).await?;
            print_report(&engine, &stats);
        }
        Command::Sync {
            source,
            destination,
            dry_run,
            delete,
            no_checksum,
            no_preserve,
            strategy,
            backup,
            backup_dir,
            timeout_secs,
            tuning,
        } => {
            let conflict = ConflictConfig {
                strategy: parse_strategy(&strategy)?,
                backup,
                backup_dir,
            };
            let engine = build_engine(
                &source,
                &destination,
                SyncMode::Sync,
                &tuning,
                Some(conflict),
            )?;
            if engine.config().conflict.strategy == ConflictStrategy::Interactive {
                engine.set_interactive_callback(Arc::new(prompt_for_resolution));
            }

            let options = SyncOptions {
                dry_run,
                recursive: true,
                preserve_perms: !no_preserve,
                preserve_times: !no_preserve,
                delete_extraneous: delete,
                checksum_verify: !no_checksum,
                workers: tuning.workers,
                buffer_size: tuning.buffer_size,
                timeout: timeout_secs.map(Duration::from_secs),
            };
            let stats = engine.sync(&cancel, &source, &destination, options).await?;
            print_report(&engine, &stats);
        }
        Command::Watch {
            source,
            destination,
        } => {
            let tuning = Tuning {
                workers: 0,
                buffer_size: 0,
                no_zero_copy: false,
                digest: None,
            };
            let engine = build_engine(&source, &destination, SyncMode::Watch, &tuning, None)?;
            engine.watch(&cancel).await?;
            let summary = engine.error_summary();
            if !summary.is_empty() {
                eprintln!("errors by category: {summary:?}");
            }
        }
    }

    Ok(())
}

fn build_engine(
    source: &PathBuf,
    destination: &PathBuf,
    mode: SyncMode,
    tuning: &Tuning,
    conflict: Option<ConflictConfig>,
) -> Result<SyncEngine, Box<dyn std::error::Error>> {
    let config = EngineConfig {
        profile: SyncProfile {
            source: source.clone(),
            destination: destination.clone(),
            mode,
            workers: tuning.workers,
            buffer_size: tuning.buffer_size,
        },
        conflict: conflict.unwrap_or_default(),
        performance: PerformanceConfig {
            use_zero_copy: !tuning.no_zero_copy,
            digest_algorithm: tuning.digest.clone(),
            ..PerformanceConfig::default()
        },
        ..EngineConfig::default()
    };
    Ok(SyncEngine::with_config(config)?)
}

fn parse_strategy(name: &str) -> Result<ConflictStrategy, String> {
    match name.to_ascii_lowercase().as_str() {
        "newest" => Ok(ConflictStrategy::Newest),
        "source" => Ok(ConflictStrategy::Source),
        "destination" => Ok(ConflictStrategy::Destination),
        "smart" => Ok(ConflictStrategy::Smart),
        "skip" => Ok(ConflictStrategy::Skip),
        "interactive" => Ok(ConflictStrategy::Interactive),
        other => Err(format!(
            "unknown conflict strategy '{other}' (expected newest, source, destination, smart, skip, or interactive)"
        )),
    }
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nrelay: interrupt received, cancelling");
            cancel.cancel();
        }
    });
}

fn print_report(engine: &SyncEngine, stats: &SyncStats) {
    println!(
        "scanned {}  created {}  modified {}  deleted {}  bytes {}  conflicts {}/{}  errors {}  in {:.2?}",
        stats.files_scanned,
        stats.files_created,
        stats.files_modified,
        stats.files_deleted,
        stats.bytes_transferred,
        stats.conflicts_resolved,
        stats.conflicts_found,
        stats.errors_encountered,
        stats.duration,
    );

    for error in engine.errors() {
        eprintln!("  {error}");
        eprintln!("    hint: {}", error.suggestion);
    }
}

/// Blocking stdin prompt used by the interactive conflict strategy.
fn prompt_for_resolution(conflict: &ConflictDescriptor) -> io::Result<InteractiveDecision> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    println!("\nconflict: {}", conflict.relative_path.display());
    println!("  reason: {}", conflict.kind.describe());
    println!(
        "  source:      {} bytes, modified {:?}",
        conflict.source.size, conflict.source.modified
    );
    println!(
        "  destination: {} bytes, modified {:?}",
        conflict.destination.size, conflict.destination.modified
    );
    println!("  [s] use source  [d] use destination  [b] backup then source  [k] skip  [a] apply source to all");

    loop {
        print!("choice [s/d/b/k/a]: ");
        stdout.flush()?;

        let mut line = String::new();
        stdin.lock().read_line(&mut line)?;

        let decision = match line.trim().to_ascii_lowercase().as_str() {
            "s" | "source" => InteractiveDecision {
                resolution: Resolution::UseSource,
                apply_to_all: None,
            },
            "d" | "dest" | "destination" => InteractiveDecision {
                resolution: Resolution::UseDestination,
                apply_to_all: None,
            },
            "b" | "backup" => InteractiveDecision {
                resolution: Resolution::BackupThenUseSource,
                apply_to_all: None,
            },
            "k" | "skip" => InteractiveDecision {
                resolution: Resolution::Skip,
                apply_to_all: None,
            },
            "a" | "all" => InteractiveDecision {
                resolution: Resolution::UseSource,
                apply_to_all: Some(ConflictStrategy::Source),
            },
            _ => {
                println!("invalid choice");
                continue;
            }
        };
        return Ok(decision);
    }
}
