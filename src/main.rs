//! ferry - copy, move and delete files with progress and conflict handling.
//!
//! Usage:
//!   ferry copy SOURCES... DEST     Copy into a directory
//!   ferry move SOURCES... DEST     Move into a directory
//!   ferry delete PATHS...          Delete files and directories
//!   ferry scan SOURCES...          Count what an operation would touch
//!   ferry --help                   Show help

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ferryfile_core::{
    ConflictDescriptor, ConflictPolicy, ConflictResolution, DryRunResult, OperationId,
    OperationKind, ProgressSnapshot, TransferConfig, TransferEvent,
};
use ferryfile_ops::TransferEngine;
use ferryfile_scan::{ScanOptions, Scanner};

#[derive(Parser)]
#[command(
    name = "ferry",
    version,
    about = "Copy, move and delete files with progress and conflict handling",
    long_about = "ferry runs file transfers the way a file manager does: it scans first, \
                  reports progress while it works, and asks before touching anything \
                  that already exists at the destination."
)]
struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy files and directories into a destination directory
    Copy {
        /// Files or directories to copy
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Destination directory
        destination: PathBuf,

        #[command(flatten)]
        options: TransferArgs,
    },

    /// Move files and directories into a destination directory
    Move {
        /// Files or directories to move
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Destination directory
        destination: PathBuf,

        #[command(flatten)]
        options: TransferArgs,
    },

    /// Delete files and directories
    Delete {
        /// Files or directories to delete
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        options: TransferArgs,
    },

    /// Count files and bytes, and list conflicts with a destination
    Scan {
        /// Files or directories to scan
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Destination directory to check for conflicts
        #[arg(long)]
        into: Option<PathBuf>,
    },
}

#[derive(Args)]
struct TransferArgs {
    /// What to do when a destination entry exists (stop, skip, overwrite, rename)
    #[arg(short, long, default_value = "stop")]
    policy: ConflictPolicy,

    /// Only report what would happen
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Milliseconds between progress updates
    #[arg(long, default_value = "200")]
    interval_ms: u64,
}

impl TransferArgs {
    fn config(&self) -> Result<TransferConfig> {
        TransferConfig::builder()
            .conflict_policy(self.policy)
            .dry_run(self.dry_run)
            .progress_interval_ms(self.interval_ms)
            .build()
            .context("Invalid options")
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let format = cli.format;
    let (engine, events) = TransferEngine::with_channel();

    let id = match cli.command {
        Command::Copy {
            sources,
            destination,
            options,
        } => engine
            .start_copy(sources, destination, options.config()?)
            .context("Cannot copy")?,
        Command::Move {
            sources,
            destination,
            options,
        } => engine
            .start_move(sources, destination, options.config()?)
            .context("Cannot move")?,
        Command::Delete { paths, options } => engine
            .start_delete(paths, options.config()?)
            .context("Cannot delete")?,
        Command::Scan { sources, into } => return run_scan(&sources, into, format),
    };

    follow(&engine, events, id, format).await
}

/// Log to stderr, filtered by `RUST_LOG` (warnings by default).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Print an operation's events until it ends, answering conflicts from stdin.
async fn follow(
    engine: &TransferEngine,
    mut events: UnboundedReceiver<TransferEvent>,
    id: OperationId,
    format: OutputFormat,
) -> Result<()> {
    while let Some(event) = events.recv().await {
        if event.operation_id() != id {
            continue;
        }
        if let OutputFormat::Json = format {
            println!("{}", serde_json::to_string(&event)?);
        }

        match event {
            TransferEvent::Progress { kind, snapshot, .. } => {
                if let OutputFormat::Text = format {
                    print_progress(kind, &snapshot);
                }
            }
            TransferEvent::ScanProgress {
                files_found,
                bytes_found,
                ..
            } => {
                if let OutputFormat::Text = format {
                    eprint!(
                        "\r\x1b[2KScanning: {files_found} files, {}",
                        format_size(bytes_found)
                    );
                }
            }
            TransferEvent::Conflict { descriptor, .. } => {
                let (resolution, apply_to_all) = prompt_conflict(descriptor).await?;
                engine.resolve_conflict(id, resolution, apply_to_all);
            }
            TransferEvent::ScanConflict { .. } => {}
            TransferEvent::Complete {
                kind,
                files_processed,
                bytes_processed,
                failures,
                ..
            } => {
                if let OutputFormat::Text = format {
                    eprintln!();
                    println!(
                        " {} {files_processed} entries ({})",
                        past_tense(kind),
                        format_size(bytes_processed)
                    );
                    for failure in &failures {
                        println!("   failed: {failure}");
                    }
                }
                if !failures.is_empty() {
                    bail!("{} entries failed", failures.len());
                }
                return Ok(());
            }
            TransferEvent::DryRunComplete { kind, result, .. } => {
                if let OutputFormat::Text = format {
                    eprintln!();
                    print_preview(Some(kind), &result);
                }
                return Ok(());
            }
            TransferEvent::Error { error, .. } => {
                if let OutputFormat::Text = format {
                    eprintln!();
                }
                return Err::<(), _>(error).context("Operation failed");
            }
            TransferEvent::Cancelled {
                files_processed,
                reason,
                ..
            } => {
                if let OutputFormat::Text = format {
                    eprintln!();
                }
                bail!("Cancelled ({reason}) after {files_processed} entries");
            }
        }
    }

    bail!("Engine stopped without reporting an outcome")
}

/// Ask on stderr, answer on stdin: s/o/r/c, uppercase applies to all.
async fn prompt_conflict(descriptor: ConflictDescriptor) -> Result<(ConflictResolution, bool)> {
    let answer = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut stderr = std::io::stderr();
        writeln!(stderr)?;
        writeln!(
            stderr,
            " {} already exists ({}, incoming {}{})",
            descriptor.destination_path.display(),
            format_size(descriptor.destination_size),
            format_size(descriptor.source_size),
            if descriptor.destination_is_newer {
                ", existing is newer"
            } else {
                ""
            }
        )?;

        let mut line = String::new();
        let stdin = std::io::stdin();
        loop {
            write!(
                stderr,
                " [s]kip, [o]verwrite, [r]ename, [c]ancel (uppercase: all) > "
            )?;
            stderr.flush()?;
            line.clear();
            if stdin.lock().read_line(&mut line)? == 0 {
                return Ok("c".to_string());
            }
            let trimmed = line.trim();
            if matches!(trimmed, "s" | "o" | "r" | "c" | "S" | "O" | "R" | "C") {
                return Ok(trimmed.to_string());
            }
        }
    })
    .await?
    .context("Failed to read answer")?;

    let apply_to_all = answer.chars().all(|c| c.is_ascii_uppercase());
    let resolution = match answer.to_ascii_lowercase().as_str() {
        "s" => ConflictResolution::Skip,
        "o" => ConflictResolution::Overwrite,
        "r" => ConflictResolution::Rename,
        _ => ConflictResolution::Cancel,
    };
    Ok((resolution, apply_to_all))
}

/// Standalone scan: totals and conflicts without starting an operation.
fn run_scan(sources: &[PathBuf], into: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let options = match into {
        Some(destination) => ScanOptions::for_destination(
            destination
                .canonicalize()
                .context("Invalid destination")?,
        ),
        None => ScanOptions::default(),
    };

    eprintln!("Scanning {} source(s)...", sources.len());
    let result = Scanner::new(options)
        .scan(sources, &CancellationToken::new(), &())
        .context("Scan failed")?;
    let preview = result.into_dry_run();

    match format {
        OutputFormat::Text => print_preview(None, &preview),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&preview)?),
    }
    Ok(())
}

fn print_progress(kind: OperationKind, snapshot: &ProgressSnapshot) {
    eprint!(
        "\r\x1b[2K{} {:>3}% {}/{} files, {}/{} {}",
        kind.verb(),
        snapshot.percent_complete(),
        snapshot.files_done,
        snapshot.files_total,
        format_size(snapshot.bytes_done),
        format_size(snapshot.bytes_total),
        snapshot.current_file.as_deref().unwrap_or("")
    );
}

fn print_preview(kind: Option<OperationKind>, preview: &DryRunResult) {
    println!("{}", "─".repeat(60));
    match kind {
        Some(kind) => println!(
            " Would {} {} files in {} directories ({})",
            kind,
            preview.files_total,
            preview.dirs_total,
            format_size(preview.bytes_total)
        ),
        None => println!(
            " {} files in {} directories ({})",
            preview.files_total,
            preview.dirs_total,
            format_size(preview.bytes_total)
        ),
    }
    println!("{}", "─".repeat(60));

    if preview.conflicts_total > 0 {
        println!();
        println!(" {} conflict(s):", preview.conflicts_total);
        for conflict in &preview.conflicts {
            println!(
                "   {} (existing {}, incoming {})",
                conflict.destination_path.display(),
                format_size(conflict.destination_size),
                format_size(conflict.source_size)
            );
        }
        if preview.sampled {
            println!(
                "   ... and {} more",
                preview.conflicts_total - preview.conflicts.len() as u64
            );
        }
    }

    if !preview.skipped.is_empty() {
        println!();
        println!("{} entries skipped during scan", preview.skipped.len());
    }
}

fn past_tense(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Copy => "Copied",
        OperationKind::Move => "Moved",
        OperationKind::Delete => "Deleted",
    }
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}
