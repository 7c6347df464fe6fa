//! CardCopy - Command-line front-end for the multi-card copy engine.
//!
//! Selects the source cards (explicit paths and/or discovery), starts one
//! copy job per card, renders consolidated progress to stderr and prints a
//! summary. Ctrl-C cancels every running job.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use cardcopy_engine::{
    CancelToken, CollisionPolicy, CopyOptions, CopyOutcome, CopyRequest, JobSupervisor,
    MarkerFileLister, ProgressSnapshot, Source, SourceLister,
};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use tracing_subscriber::EnvFilter;

/// CardCopy - Copy recordings from several camera cards into one folder
#[derive(Parser, Debug)]
#[command(name = "cardcopy")]
#[command(version = "0.1.0")]
#[command(about = "Copy VID_ and PIC_ folders from multiple cards in parallel, merging into the destination")]
struct Args {
    /// Source card root (repeatable)
    #[arg(long, value_name = "PATH")]
    src: Vec<PathBuf>,

    /// Destination directory
    #[arg(long, value_name = "PATH")]
    dst: PathBuf,

    /// Add every card found below the mount roots
    #[arg(long)]
    find_cards: bool,

    /// Mount root searched by --find-cards (repeatable; defaults to the platform's removable media roots)
    #[arg(long, value_name = "PATH", requires = "find_cards")]
    mount_root: Vec<PathBuf>,

    /// Copy each card below its own subfolder of the destination
    #[arg(long)]
    namespace_by_source: bool,

    /// Start even if the destination looks too small
    #[arg(long)]
    no_space_check: bool,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,
}

/// How a run ended, mapped to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunStatus {
    Completed,
    PartiallyFailed,
    Cancelled,
}

impl RunStatus {
    fn from_outcome(outcome: &CopyOutcome) -> Self {
        if outcome.has_failures() {
            RunStatus::PartiallyFailed
        } else if outcome.was_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        }
    }

    fn heading(self) -> &'static str {
        match self {
            RunStatus::Completed => "Transfer complete!",
            RunStatus::PartiallyFailed => "Transfer finished with errors.",
            RunStatus::Cancelled => "Transfer cancelled.",
        }
    }

    fn exit_code(self) -> i32 {
        match self {
            RunStatus::Completed => 0,
            RunStatus::PartiallyFailed | RunStatus::Cancelled => 1,
        }
    }
}

/// Renders consolidated progress to stderr.
struct CliProgress {
    verbose: bool,
    start_time: Instant,
    last_render: Option<Instant>,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            start_time: Instant::now(),
            last_render: None,
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn progress_bar(percent: u32) -> String {
        let filled = (percent.min(100) / 5) as usize;
        let empty = 20 - filled;
        format!("[{}{}] {}%", "=".repeat(filled), " ".repeat(empty), percent)
    }

    fn status_line(snapshot: &ProgressSnapshot) -> String {
        let bar = match snapshot.percent() {
            Some(percent) => Self::progress_bar(percent),
            None => "[planning...]".to_string(),
        };
        format!(
            "Progress: {} | {}/{} | jobs {}/{} ({} planned)",
            bar,
            Self::format_bytes(snapshot.bytes_done),
            Self::format_bytes(snapshot.bytes_total),
            snapshot.jobs_finished(),
            snapshot.jobs_total,
            snapshot.jobs_planned
        )
    }

    /// Redraw the status line, at most once per 200ms unless forced.
    fn render(&mut self, snapshot: &ProgressSnapshot, force: bool) {
        if !force && self.last_render.is_some_and(|t| t.elapsed() < Duration::from_millis(200)) {
            return;
        }
        self.last_render = Some(Instant::now());

        eprint!("\r{}", Self::status_line(snapshot));
        if self.verbose && !snapshot.active_entries.is_empty() {
            let active: Vec<_> = snapshot
                .active_entries
                .iter()
                .map(|(source, entry)| format!("{source}/{entry}"))
                .collect();
            eprint!(" | {}", active.join(", "));
        }
        let _ = std::io::Write::flush(&mut std::io::stderr());
    }

    fn print_summary(&self, status: RunStatus, outcome: &CopyOutcome, snapshot: &ProgressSnapshot) {
        eprintln!();
        eprintln!("{}", status.heading());

        for result in &outcome.results {
            eprintln!(
                "  {} ({}): {} | {} copied, {} skipped, {} failed | {}",
                result.source.id,
                result.source.root.display(),
                result.status,
                result.files_copied(),
                result.files_skipped(),
                result.files_failed(),
                Self::format_bytes(result.bytes_copied)
            );
            if let Some(error) = &result.job_error {
                eprintln!("    {}", error);
            }
        }

        eprintln!("Bytes copied: {}", Self::format_bytes(outcome.bytes_copied()));
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));

        if !snapshot.errors.is_empty() {
            eprintln!();
            eprintln!("Failed files:");
            for error in &snapshot.errors {
                let source = error.source.as_deref().unwrap_or("(unknown)");
                match &error.path {
                    Some(path) => eprintln!("  [{}] {}: {}", source, path.display(), error.message),
                    None => eprintln!("  [{}] {}", source, error.message),
                }
            }
            if snapshot.hidden_errors > 0 {
                eprintln!("  ... and {} more", snapshot.hidden_errors);
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose { "warn,cardcopy_engine=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

/// Parse and validate command-line arguments, then run the copy
fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let interrupt = CancelToken::new();
    let handler_token = interrupt.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    let exit_code = match run_cli(&args, &interrupt) {
        Ok(status) => status.exit_code(),
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Collect the sources named on the command line and found by discovery.
fn select_sources(args: &Args) -> Vec<Source> {
    let mut sources: Vec<Source> = args.src.iter().map(Source::new).collect();

    if args.find_cards {
        let mount_roots = if args.mount_root.is_empty() {
            MarkerFileLister::default_mount_roots()
        } else {
            args.mount_root.clone()
        };
        let found = MarkerFileLister::new(mount_roots).list_available_sources();
        if found.is_empty() {
            eprintln!("No cards found.");
        }
        for card in found {
            if sources.iter().all(|s| s.root != card.root) {
                eprintln!("Found card: {}", card.root.display());
                sources.push(card);
            }
        }
    }
    sources
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args, interrupt: &CancelToken) -> Result<RunStatus, String> {
    let sources = select_sources(args);
    if sources.is_empty() {
        return Err("No source selected. Use --src or --find-cards".to_string());
    }

    let options = CopyOptions {
        collision: if args.namespace_by_source {
            CollisionPolicy::NamespaceBySource
        } else {
            CollisionPolicy::Merge
        },
        check_free_space: !args.no_space_check,
        ..CopyOptions::default()
    };
    let request = CopyRequest::new(sources, &args.dst).with_options(options);

    let handle = JobSupervisor::new()
        .start(request)
        .map_err(|e| format!("Failed to start copy: {}", e.detailed_message()))?;

    eprintln!("Copying {} card(s) to {}", handle.jobs().len(), args.dst.display());

    let mut progress = handle.aggregator();
    let mut renderer = CliProgress::new(args.verbose);
    loop {
        if interrupt.is_cancelled() {
            handle.cancel();
        }
        match handle.events().recv_timeout(Duration::from_millis(200)) {
            Ok(event) => {
                progress.apply(&event);
                renderer.render(&progress.snapshot(), false);
            }
            Err(RecvTimeoutError::Timeout) => renderer.render(&progress.snapshot(), false),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    let snapshot = progress.snapshot();
    renderer.render(&snapshot, true);

    let outcome = handle.wait();
    let status = RunStatus::from_outcome(&outcome);
    renderer.print_summary(status, &outcome, &snapshot);
    Ok(status)
}
