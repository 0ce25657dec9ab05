//! Ferry - Command-line interface for the transfer engine.
//!
//! Drives one transfer job: shows progress on stderr while the job runs on its
//! worker thread, and answers failed attempts either interactively or with a
//! fixed policy.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use engine::{
    ErrorHandler, FileReport, FileState, FixedPolicy, JobConfig, JobObserver, JobState, JobSummary,
    LocalFile, Mode, OverwritePolicy, RetryDecision, RetryLimit, StorageFile, TransferFailure,
    TransferJob, UNLIMITED,
};
use serde_json::json;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Ferry - copy or move files with pause, throttling and retries
#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(version)]
#[command(about = "Copy or move files into a folder with progress, throttling and retries")]
struct Args {
    /// Files or folders to transfer
    #[arg(value_name = "SRC", required = true)]
    sources: Vec<PathBuf>,

    /// Destination folder (created if missing)
    #[arg(long, value_name = "DIR")]
    dst: PathBuf,

    /// Move instead of copy: sources are deleted once transferred
    #[arg(long = "move")]
    move_files: bool,

    /// What to do when a file already exists at the destination
    #[arg(long, value_enum, value_name = "POLICY", default_value_t = OverwriteArg::Overwrite)]
    overwrite: OverwriteArg,

    /// Throughput limit in bytes per second
    #[arg(long, value_name = "BYTES_PER_SEC", value_parser = clap::value_parser!(u64).range(1..))]
    limit: Option<u64>,

    /// How to answer failed transfers
    #[arg(long, value_enum, value_name = "ACTION", default_value_t = OnErrorArg::Ask)]
    on_error: OnErrorArg,

    /// Retries per file before skipping it, with --on-error retry
    #[arg(long, value_name = "N", default_value_t = 3)]
    max_retries: u32,

    /// Always stream, even where a native copy is available. Native copies
    /// cannot be paused or stopped mid-file and report progress only once the
    /// file is done; streaming keeps pause, stop and live progress per file.
    #[arg(long)]
    no_direct_copy: bool,

    /// Print the job summary as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OverwriteArg {
    Skip,
    Overwrite,
    Resume,
    Smart,
}

impl From<OverwriteArg> for OverwritePolicy {
    fn from(arg: OverwriteArg) -> Self {
        match arg {
            OverwriteArg::Skip => OverwritePolicy::Skip,
            OverwriteArg::Overwrite => OverwritePolicy::Overwrite,
            OverwriteArg::Resume => OverwritePolicy::Resume,
            OverwriteArg::Smart => OverwritePolicy::SmartUpdate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OnErrorArg {
    Ask,
    Skip,
    Retry,
    Cancel,
}

/// Asks the user what to do about a failed attempt.
///
/// Reading stops at end of input, which cancels the job. `asking` is set
/// while a question is pending so the status line stays out of the way.
struct PromptHandler<R> {
    input: Mutex<R>,
    asking: Arc<AtomicBool>,
}

/// Clears the `asking` flag when the prompt returns.
struct Asking<'a>(&'a AtomicBool);

impl Drop for Asking<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<R: BufRead + Send> PromptHandler<R> {
    fn new(input: R, asking: Arc<AtomicBool>) -> Self {
        PromptHandler {
            input: Mutex::new(input),
            asking,
        }
    }

    fn parse_answer(answer: &str, offered: &[RetryDecision]) -> Option<RetryDecision> {
        let decision = match answer.trim().to_lowercase().as_str() {
            "s" | "skip" => RetryDecision::Skip,
            "r" | "retry" => RetryDecision::Retry,
            "a" | "append" => RetryDecision::Append,
            "c" | "cancel" => RetryDecision::Cancel,
            _ => return None,
        };
        offered.contains(&decision).then_some(decision)
    }
}

impl<R: BufRead + Send> ErrorHandler for PromptHandler<R> {
    fn decide(&self, failure: &TransferFailure) -> RetryDecision {
        let choices = failure
            .choices
            .iter()
            .map(|c| format!("[{}]{}", &c.to_string()[..1], &c.to_string()[1..]))
            .collect::<Vec<_>>()
            .join(", ");

        let mut input = match self.input.lock() {
            Ok(input) => input,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.asking.store(true, Ordering::SeqCst);
        let _asking = Asking(&self.asking);
        loop {
            eprintln!();
            eprintln!(
                "{} {} (attempt {}): {}",
                failure.kind, failure.path, failure.attempt, failure.message
            );
            eprint!("{}? ", choices);
            let _ = io::stderr().flush();

            let mut line = String::new();
            match input.read_line(&mut line) {
                Ok(0) | Err(_) => {
                    eprintln!();
                    return RetryDecision::Cancel;
                }
                Ok(_) => {}
            }
            if let Some(decision) = Self::parse_answer(&line, failure.choices) {
                return decision;
            }
            eprintln!("Please answer one of: {}", choices);
        }
    }
}

/// CLI implementation of JobObserver for per-file output
struct CliProgress {
    verbose: bool,
}

impl CliProgress {
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

    fn progress_bar(fraction: f64) -> String {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0) as u32;
        let filled = (percent / 5) as usize;
        let empty = 20 - filled;
        format!("[{}{}] {:3}%", "=".repeat(filled), " ".repeat(empty), percent)
    }

    /// Redraws the status line from the job's counters.
    fn draw(job: &TransferJob, started: Instant) {
        let elapsed = started.elapsed();
        let bytes = job.total_bytes_processed();
        let rate = if elapsed.as_secs_f64() > 0.0 {
            (bytes as f64 / elapsed.as_secs_f64()) as u64
        } else {
            0
        };
        let paused = if job.state() == JobState::Paused { " (paused)" } else { "" };
        eprint!(
            "\r{} {} | {}/s | {}{}\x1b[K",
            Self::progress_bar(job.total_percent_done()),
            Self::format_bytes(bytes),
            Self::format_bytes(rate),
            job.current_file_name().unwrap_or_default(),
            paused,
        );
        let _ = io::stderr().flush();
    }

    fn print_summary(summary: &JobSummary, reports: &[FileReport], elapsed: Duration) {
        eprintln!();
        match summary.state {
            JobState::Finished => eprintln!("Transfer complete!"),
            state => eprintln!("Transfer {}", state.to_string().to_lowercase()),
        }
        eprintln!(
            "Summary: {} done, {} skipped, {} cancelled (of {} items)",
            summary.done, summary.skipped, summary.cancelled, summary.total_files
        );
        eprintln!("Bytes transferred: {}", Self::format_bytes(summary.total_bytes));
        eprintln!("Elapsed: {}", Self::format_duration(elapsed));

        let problems: Vec<_> = reports
            .iter()
            .filter(|r| (r.failure.is_some() && r.state != FileState::Done) || r.warning.is_some())
            .collect();
        if !problems.is_empty() {
            eprintln!();
            eprintln!("Problems:");
            for report in problems {
                if let Some(failure) = report.failure.as_ref().filter(|_| report.state != FileState::Done) {
                    eprintln!("  {}: {} ({})", report.path, failure.kind, failure.message);
                }
                if let Some(warning) = &report.warning {
                    eprintln!("  {}: {}", report.path, warning);
                }
            }
        }
    }
}

impl JobObserver for CliProgress {
    fn file_started(&self, _id: Uuid, name: &str, size: i64) {
        if self.verbose {
            let size = u64::try_from(size)
                .map(Self::format_bytes)
                .unwrap_or_else(|_| "unknown size".to_string());
            eprintln!("\rStarting: {} ({})\x1b[K", name, size);
        }
    }

    fn file_completed(&self, _id: Uuid, report: &FileReport) {
        if self.verbose && !report.is_dir {
            let status = match report.state {
                FileState::Done => "Done",
                FileState::Skipped => "Skipped",
                FileState::Cancelled => "Cancelled",
            };
            eprintln!("\r{}: {}\x1b[K", status, report.name);
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

/// Parse arguments, run the job, exit with its result
fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let exit_code = match run_cli(&args, io::BufReader::new(io::stdin())) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

fn error_handler<R>(args: &Args, input: R, asking: Arc<AtomicBool>) -> Arc<dyn ErrorHandler>
where
    R: BufRead + Send + 'static,
{
    match args.on_error {
        OnErrorArg::Ask => Arc::new(PromptHandler::new(input, asking)),
        OnErrorArg::Skip => Arc::new(FixedPolicy(RetryDecision::Skip)),
        OnErrorArg::Retry => Arc::new(RetryLimit {
            max_retries: args.max_retries,
            then: RetryDecision::Skip,
        }),
        OnErrorArg::Cancel => Arc::new(FixedPolicy(RetryDecision::Cancel)),
    }
}

fn job_config(args: &Args) -> Result<JobConfig> {
    let throughput_limit = match args.limit {
        Some(limit) => i64::try_from(limit).context("throughput limit is too large")?,
        None => UNLIMITED,
    };
    Ok(JobConfig {
        mode: if args.move_files { Mode::Move } else { Mode::Copy },
        overwrite_policy: args.overwrite.into(),
        throughput_limit,
        prefer_direct_copy: !args.no_direct_copy,
        ..JobConfig::default()
    })
}

/// Main CLI logic - separated for testability. Returns the exit code.
fn run_cli<R>(args: &Args, input: R) -> Result<i32>
where
    R: BufRead + Send + 'static,
{
    for source in &args.sources {
        if !source.exists() {
            bail!("source does not exist: {}", source.display());
        }
    }
    if args.dst.exists() && !args.dst.is_dir() {
        bail!("destination is not a folder: {}", args.dst.display());
    }
    std::fs::create_dir_all(&args.dst)
        .with_context(|| format!("cannot create destination {}", args.dst.display()))?;

    let asking = Arc::new(AtomicBool::new(false));
    let files: Vec<Arc<dyn StorageFile>> = args.sources.iter().map(LocalFile::shared).collect();
    let job = TransferJob::builder(files, LocalFile::shared(&args.dst))
        .config(job_config(args)?)
        .error_handler(error_handler(args, input, Arc::clone(&asking)))
        .observer(Arc::new(CliProgress {
            verbose: args.verbose > 0,
        }))
        .build()
        .context("cannot set up transfer")?;

    info!(job = %job.id(), sources = args.sources.len(), dst = %args.dst.display(), "transfer starting");
    let started = Instant::now();
    job.start().context("cannot start transfer")?;

    while !job.wait_timeout(Duration::from_millis(200)).is_terminal() {
        if !asking.load(Ordering::SeqCst) {
            CliProgress::draw(&job, started);
        }
    }
    CliProgress::draw(&job, started);
    let state = job.join().context("transfer worker failed")?;
    debug!(state = %state, "transfer ended");

    let summary = job.summary();
    let reports = job.reports();
    CliProgress::print_summary(&summary, &reports, started.elapsed());

    if args.json {
        let output = json!({ "summary": summary, "files": reports });
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    Ok(if summary.state == JobState::Finished && summary.is_clean() {
        0
    } else {
        1
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::FailureKind;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn args(sources: Vec<PathBuf>, dst: PathBuf) -> Args {
        Args {
            sources,
            dst,
            move_files: false,
            overwrite: OverwriteArg::Overwrite,
            limit: None,
            on_error: OnErrorArg::Skip,
            max_retries: 3,
            no_direct_copy: false,
            json: false,
            verbose: 0,
        }
    }

    fn no_input() -> Cursor<Vec<u8>> {
        Cursor::new(Vec::new())
    }

    fn failure(kind: FailureKind) -> TransferFailure {
        TransferFailure {
            kind,
            file_name: "a.txt".to_string(),
            path: "/src/a.txt".to_string(),
            message: "connection lost".to_string(),
            attempt: 1,
            choices: engine::decision::choices_for(kind),
        }
    }

    #[test]
    fn test_args_parse() {
        let parsed = Args::try_parse_from([
            "ferry", "--dst", "/out", "--move", "--overwrite", "smart", "--limit", "1000",
            "--on-error", "retry", "-vv", "a", "b",
        ])
        .unwrap();
        assert_eq!(parsed.sources, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert!(parsed.move_files);
        assert_eq!(parsed.overwrite, OverwriteArg::Smart);
        assert_eq!(parsed.limit, Some(1000));
        assert_eq!(parsed.on_error, OnErrorArg::Retry);
        assert_eq!(parsed.verbose, 2);

        let config = job_config(&parsed).unwrap();
        assert_eq!(config.mode, Mode::Move);
        assert_eq!(config.overwrite_policy, OverwritePolicy::SmartUpdate);
        assert_eq!(config.throughput_limit, 1000);
    }

    #[test]
    fn test_args_reject_bad_values() {
        assert!(Args::try_parse_from(["ferry", "--dst", "/out"]).is_err());
        assert!(Args::try_parse_from(["ferry", "--dst", "/out", "--limit", "0", "a"]).is_err());
        assert!(Args::try_parse_from(["ferry", "--dst", "/out", "--overwrite", "ask", "a"]).is_err());
        assert!(Args::try_parse_from(["ferry", "--dst", "/out", "--on-error", "later", "a"]).is_err());
    }

    #[test]
    fn test_direct_copy_help_explains_tradeoff() {
        use clap::CommandFactory;
        let help = Args::command().render_long_help().to_string();
        assert!(help.contains("cannot be paused or stopped mid-file"), "{}", help);
    }

    #[test]
    fn test_cli_copies_files_and_folders() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        let file = src_dir.path().join("test.txt");
        std::fs::write(&file, "hello").expect("Failed to write file");
        let folder = src_dir.path().join("docs");
        std::fs::create_dir(&folder).expect("Failed to create folder");
        std::fs::write(folder.join("readme.md"), "# docs").expect("Failed to write file");

        let code = run_cli(&args(vec![file, folder], dst_dir.path().to_path_buf()), no_input()).unwrap();
        assert_eq!(code, 0);
        assert_eq!(std::fs::read_to_string(dst_dir.path().join("test.txt")).unwrap(), "hello");
        assert_eq!(
            std::fs::read_to_string(dst_dir.path().join("docs").join("readme.md")).unwrap(),
            "# docs"
        );
    }

    #[test]
    fn test_cli_move_with_limit_and_json() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        let file = src_dir.path().join("data.bin");
        std::fs::write(&file, vec![7u8; 2048]).expect("Failed to write file");

        let mut args = args(vec![file.clone()], dst_dir.path().join("nested"));
        args.move_files = true;
        args.limit = Some(1_000_000);
        args.json = true;

        assert_eq!(run_cli(&args, no_input()).unwrap(), 0);
        assert!(!file.exists());
        assert_eq!(std::fs::read(dst_dir.path().join("nested").join("data.bin")).unwrap().len(), 2048);
    }

    #[test]
    fn test_cli_skip_policy_returns_one() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        let file = src_dir.path().join("test.txt");
        std::fs::write(&file, "new").expect("Failed to write file");
        std::fs::write(dst_dir.path().join("test.txt"), "old").expect("Failed to write file");

        let mut args = args(vec![file], dst_dir.path().to_path_buf());
        args.overwrite = OverwriteArg::Skip;

        assert_eq!(run_cli(&args, no_input()).unwrap(), 1);
        assert_eq!(std::fs::read_to_string(dst_dir.path().join("test.txt")).unwrap(), "old");
    }

    #[test]
    fn test_cli_rejects_missing_source() {
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        let args = args(vec![PathBuf::from("/nonexistent/path")], dst_dir.path().to_path_buf());
        assert!(run_cli(&args, no_input()).is_err());
    }

    #[test]
    fn test_cli_rejects_file_destination() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let file = src_dir.path().join("test.txt");
        std::fs::write(&file, "hello").expect("Failed to write file");

        let args = args(vec![file.clone()], file);
        assert!(run_cli(&args, no_input()).is_err());
    }

    #[test]
    fn test_prompt_reads_answers() {
        let handler = PromptHandler::new(Cursor::new(b"maybe\nappend\n".to_vec()), Arc::default());
        assert_eq!(handler.decide(&failure(FailureKind::Transferring)), RetryDecision::Append);

        let handler = PromptHandler::new(Cursor::new(b"r\n".to_vec()), Arc::default());
        assert_eq!(handler.decide(&failure(FailureKind::OpeningSource)), RetryDecision::Retry);
    }

    #[test]
    fn test_prompt_refuses_unoffered_choice() {
        let handler = PromptHandler::new(Cursor::new(b"a\ns\n".to_vec()), Arc::default());
        assert_eq!(handler.decide(&failure(FailureKind::OpeningDestination)), RetryDecision::Skip);
    }

    #[test]
    fn test_prompt_cancels_at_end_of_input() {
        let handler = PromptHandler::new(no_input(), Arc::default());
        assert_eq!(handler.decide(&failure(FailureKind::Transferring)), RetryDecision::Cancel);
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(CliProgress::format_bytes(512), "512.00 B");
        assert_eq!(CliProgress::format_bytes(1536), "1.50 KB");
        assert_eq!(CliProgress::format_duration(Duration::from_secs(3725)), "1h 2m 5s");
        assert_eq!(CliProgress::format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(CliProgress::progress_bar(0.5), format!("[{}{}]  50%", "=".repeat(10), " ".repeat(10)));
    }
}
