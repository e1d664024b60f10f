//! # bak-to-git CLI - Rebuild history from backup files
//!
//! Command-line front end for the bak-to-git library.
//!
//! ## Workflow
//! 1. `scan` a backup tree into an annotation CSV
//! 2. edit the CSV: commit messages, `SKIP_Y`, `pre:`/`post:`/`rename:` commands
//!    (`review` walks the changes in a diff tool, `import-prior` carries
//!    annotations over from an earlier pass)
//! 3. `replay` the CSV into a repository, what-if first, then `--do-commit`
//!
//! ## Usage
//! ```bash
//! # Find changed backups
//! bak-to-git scan ~/wipbak --output-dir ./output --write-debug
//!
//! # Show the commits that would be made
//! bak-to-git plan ./output/20211201_101500/step-1-files-changed.csv
//!
//! # Dry run, then the real thing
//! bak-to-git replay changes.csv ./repo --vcs git
//! bak-to-git replay changes.csv ./repo --vcs git --do-commit
//! ```

use bak_to_git::{
    action_log::{default_log_name, ActionLog},
    annotations::{import_prior_work, read_annotations, write_annotations},
    change_detection::detect_changes,
    grouping::{commit_groups, group_records},
    review::{run_review, ExternalDiff, StdinAnswers, DEFAULT_DIFF_TOOL},
    scanner::{BackupScanner, DEFAULT_PATTERN},
    stats::{load_events, progress_report, ProgressCounts, ProgressLog},
    timestamp::now_tag,
    BakError, ProgressInfo, ReplayBuilder, ReplayState, Result, VcsKind,
};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// bak-to-git - Turn timestamped backups into version control history
#[derive(Parser)]
#[command(name = "bak-to-git")]
#[command(version)]
#[command(about = "Rebuild a git or fossil history from timestamped .bak files")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan backups and write the annotation CSV
    Scan {
        /// Directory tree holding the backup files
        source_dir: PathBuf,

        /// Output directory, which must already exist (defaults to ./output)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Include the run timestamp in the output file name
        #[arg(short, long)]
        timestamp: bool,

        /// Also write debug listings of all files, names and tags
        #[arg(long)]
        write_debug: bool,

        /// File name pattern for backups
        #[arg(long, default_value = DEFAULT_PATTERN)]
        pattern: String,
    },

    /// Walk the changes in a diff tool
    Review {
        /// Annotation CSV
        csv: PathBuf,

        /// Diff program, run as `<exe> <left> <right>`
        #[arg(long, default_value = DEFAULT_DIFF_TOOL)]
        diff_tool: String,

        /// Append review progress events to this file
        #[arg(long)]
        stats_file: Option<PathBuf>,
    },

    /// Copy annotations from an earlier CSV into a new one
    #[command(name = "import-prior")]
    ImportPrior {
        /// CSV holding the earlier annotations
        source_csv: PathBuf,

        /// Newly scanned CSV to annotate
        target_csv: PathBuf,
    },

    /// Replay the annotated CSV into a repository
    Replay {
        /// Annotation CSV
        csv: PathBuf,

        /// Repository working directory
        repo_dir: PathBuf,

        /// Version control system
        #[arg(long, value_enum, default_value = "git")]
        vcs: VcsMode,

        /// Run the commands (default is what-if)
        #[arg(long)]
        do_commit: bool,

        /// Fossil repository file name (defaults to <repo dir name>.fossil)
        #[arg(long)]
        repo_name: Option<String>,

        /// Create a new fossil repository dated at this ISO date-time
        #[arg(long)]
        init_date: Option<String>,

        /// VCS executable
        #[arg(long)]
        vcs_exe: Option<String>,

        /// Replacement list applied to copied files
        #[arg(long)]
        filter_file: Option<PathBuf>,

        /// Directory for the action log (defaults to current)
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Show the commits a replay would make
    Plan {
        /// Annotation CSV
        csv: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print the review progress report
    Stats {
        /// Progress event file
        stats_file: PathBuf,

        /// Annotation CSV to count rows from
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Total rows (when no CSV is given)
        #[arg(long, default_value_t = 0)]
        rows: usize,

        /// Rows with commit messages (when no CSV is given)
        #[arg(long, default_value_t = 0)]
        commits: usize,

        /// Skipped rows (when no CSV is given)
        #[arg(long, default_value_t = 0)]
        skips: usize,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum VcsMode {
    Git,
    Fossil,
}

impl From<VcsMode> for VcsKind {
    fn from(mode: VcsMode) -> Self {
        match mode {
            VcsMode::Git => VcsKind::Git,
            VcsMode::Fossil => VcsKind::Fossil,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Scan {
            source_dir,
            output_dir,
            timestamp,
            write_debug,
            pattern,
        } => cmd_scan(source_dir, output_dir, timestamp, write_debug, pattern),
        Commands::Review {
            csv,
            diff_tool,
            stats_file,
        } => cmd_review(csv, diff_tool, stats_file),
        Commands::ImportPrior {
            source_csv,
            target_csv,
        } => cmd_import_prior(source_csv, target_csv),
        Commands::Replay {
            csv,
            repo_dir,
            vcs,
            do_commit,
            repo_name,
            init_date,
            vcs_exe,
            filter_file,
            log_dir,
        } => {
            let mut builder = ReplayBuilder::new(repo_dir)
                .vcs(vcs.into())
                .do_commit(do_commit);
            if let Some(name) = repo_name {
                builder = builder.repo_name(name);
            }
            if let Some(date) = init_date {
                builder = builder.init_date(date);
            }
            if let Some(exe) = vcs_exe {
                builder = builder.vcs_exe(exe);
            }
            if let Some(path) = filter_file {
                builder = builder.filter_file(path);
            }
            cmd_replay(csv, builder, log_dir)
        }
        Commands::Plan { csv, json } => cmd_plan(csv, json),
        Commands::Stats {
            stats_file,
            csv,
            rows,
            commits,
            skips,
        } => cmd_stats(stats_file, csv, ProgressCounts { rows, commits, skips }),
    }
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message.to_string());
    pb
}

/// Scan backups and write the step 1 CSV
///
/// Output goes to a new run directory `<output>/<runstamp>/`. The source
/// and output directories must exist; the run directory must not.
fn cmd_scan(
    source_dir: PathBuf,
    output_dir: Option<PathBuf>,
    timestamp: bool,
    write_debug: bool,
    pattern: String,
) -> Result<()> {
    if !source_dir.is_dir() {
        return Err(BakError::DirectoryNotFound(source_dir));
    }
    let output_dir = output_dir.unwrap_or_else(|| PathBuf::from("output"));
    if !output_dir.is_dir() {
        return Err(BakError::DirectoryNotFound(output_dir));
    }
    let runstamp = now_tag();
    let run_dir = output_dir.join(&runstamp);
    if run_dir.exists() {
        return Err(BakError::AlreadyExists(run_dir));
    }
    fs::create_dir(&run_dir)?;

    println!("{}", "Scanning backups...".blue().bold());
    let start = Instant::now();

    let pb = spinner("Scanning files...");
    let scan = BackupScanner::new(source_dir)
        .with_pattern(pattern)
        .scan(Some(|info: ProgressInfo| {
            if let Some(item) = info.current_item {
                pb.set_message(format!("{} {}", info.operation, item));
            }
        }));
    let scan = match scan {
        Ok(scan) => scan,
        Err(e) => {
            pb.finish_and_clear();
            return Err(e);
        }
    };
    let changes = detect_changes(
        &scan.snapshots,
        Some(|info: ProgressInfo| {
            if let Some(pct) = info.percentage() {
                pb.set_message(format!("{} ({:.0}%)", info.operation, pct));
            }
        }),
    );
    pb.finish_and_clear();
    let changes = changes?;

    if write_debug {
        for path in scan.write_debug_files(&run_dir)? {
            println!("  Debug: {}", path.display().to_string().dimmed());
        }
    }

    let file_name = if timestamp {
        format!("step-1-files-changed-{}.csv", runstamp)
    } else {
        "step-1-files-changed.csv".to_string()
    };
    let csv_path = run_dir.join(file_name);
    let summary = changes.summary.clone();
    let rows = group_records(changes.records);
    write_annotations(&csv_path, &rows)?;

    println!("{} Wrote {}", "✓".green().bold(), csv_path.display().to_string().cyan());
    println!("  Backups: {}", summary.snapshots_seen.to_string().cyan());
    println!("  New files: {}", summary.new_files.to_string().cyan());
    println!("  Changed: {}", summary.changed_files.to_string().cyan());
    println!("  Identical (discarded): {}", summary.unchanged_discarded.to_string().dimmed());
    println!("  Time: {}", format_duration(whole_millis(start.elapsed())).to_string().cyan());
    Ok(())
}

/// Walk changes in the diff tool, recording progress if asked
fn cmd_review(csv: PathBuf, diff_tool: String, stats_file: Option<PathBuf>) -> Result<()> {
    let rows = read_annotations(&csv)?;

    let mut stats = match stats_file {
        Some(path) => {
            let mut log = ProgressLog::new(path)?.with_save_immediate(true);
            log.start_session(&csv)?;
            Some(log)
        }
        None => None,
    };

    let mut diff = ExternalDiff::new(diff_tool);
    let outcome = run_review(&rows, &mut diff, &mut StdinAnswers, stats.as_mut());

    if let Some(log) = stats.as_mut() {
        log.stop_session()?;
    }
    let outcome = outcome?;

    println!();
    println!("{}", "Review summary:".blue().bold());
    println!("  Rows: {}", outcome.rows_visited.to_string().cyan());
    println!("  Compared: {}", outcome.compared.to_string().cyan());
    println!("  New files: {}", outcome.new_files.to_string().cyan());
    println!("  Already reviewed: {}", outcome.already_reviewed.to_string().dimmed());
    println!("  Skipped: {}", outcome.skipped.to_string().dimmed());
    if outcome.unexpected > 0 {
        println!("  Unexpected previous versions: {}", outcome.unexpected.to_string().yellow());
    }
    if let Some(row) = outcome.stopped_at {
        println!("  Stopped at row {}", row.to_string().yellow());
    }
    Ok(())
}

/// Merge annotations from an earlier pass
fn cmd_import_prior(source_csv: PathBuf, target_csv: PathBuf) -> Result<()> {
    let report = import_prior_work(&source_csv, &target_csv)?;

    println!("{} Wrote {}", "✓".green().bold(), report.output_path.display().to_string().cyan());
    println!("  Rows matched: {}", report.rows_matched.to_string().cyan());
    println!("  Fields copied: {}", report.fields_copied.to_string().cyan());
    if !report.unmatched_source_keys.is_empty() {
        println!(
            "  {} source rows not found in target:",
            report.unmatched_source_keys.len().to_string().yellow()
        );
        for key in &report.unmatched_source_keys {
            println!("    {}", key.dimmed());
        }
    }
    Ok(())
}

/// Replay the annotated CSV
fn cmd_replay(csv: PathBuf, builder: ReplayBuilder, log_dir: Option<PathBuf>) -> Result<()> {
    let log_dir = log_dir.unwrap_or_else(|| PathBuf::from("."));
    if !log_dir.is_dir() {
        return Err(BakError::DirectoryNotFound(log_dir));
    }
    let log_path = log_dir.join(default_log_name(&now_tag()));

    let mut engine = builder.build()?;
    let live = engine.config().do_commit;
    let mut log = ActionLog::open(&log_path)?;

    if live {
        println!("{}", "Replaying into repository...".blue().bold());
    } else {
        println!("{}", "What-if replay (nothing will be changed)...".blue().bold());
    }

    let start = Instant::now();
    let result = engine.run_file(&csv, &mut log);
    let report = engine.report().clone();
    println!("  Log: {}", log_path.display().to_string().dimmed());

    match result {
        Ok(_) => {
            println!("{} Replay {}", "✓".green().bold(), ReplayState::Done.to_string().green());
        }
        Err(e) => {
            if let Some(tag) = &report.failed_tag {
                println!("{} Stopped at {}", "✗".red().bold(), tag.yellow());
            }
            println!("  Committed before failure: {}", report.groups_committed.to_string().cyan());
            return Err(e);
        }
    }

    println!("  Commits: {}", report.groups_committed.to_string().cyan());
    println!("  Files copied: {}", report.files_copied.to_string().cyan());
    println!("  Adds: {}", report.adds_issued.to_string().cyan());
    if report.pre_commands_run + report.post_commands_run > 0 {
        println!(
            "  Commands: {} pre, {} post",
            report.pre_commands_run.to_string().cyan(),
            report.post_commands_run.to_string().cyan()
        );
    }
    if report.filter_hits > 0 {
        println!("  Filter replacements: {}", report.filter_hits.to_string().yellow());
    }
    println!("  Time: {}", format_duration(whole_millis(start.elapsed())).to_string().cyan());
    if !live {
        println!("\nRun again with {} to apply.", "--do-commit".yellow());
    }
    Ok(())
}

/// Print the commit groups a replay would produce
fn cmd_plan(csv: PathBuf, json: bool) -> Result<()> {
    let rows = read_annotations(&csv)?;
    let groups = commit_groups(&rows);

    if json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }

    if groups.is_empty() {
        println!("{}", "Nothing to commit.".yellow());
        return Ok(());
    }

    println!("{}", "Commits:".blue().bold());
    println!();
    for group in &groups {
        let message = group.message()?;
        println!("{} {}", group.tag.as_str().yellow().bold(), message.cyan());
        println!("    {}", group.dates.commit_string().dimmed());
        for member in &group.members {
            let marker = if member.is_new_file() { "+".green() } else { "~".yellow() };
            print!("    {} {}", marker, member.logical_id);
            if !member.aux_command.is_none() {
                print!("  {}", member.aux_command.to_string().dimmed());
            }
            println!();
        }
    }
    println!("\n{}", format!("{} commits", groups.len()).dimmed());
    Ok(())
}

/// Print the review progress report
fn cmd_stats(stats_file: PathBuf, csv: Option<PathBuf>, counts: ProgressCounts) -> Result<()> {
    let counts = match csv {
        Some(path) => ProgressCounts::from_rows(&read_annotations(&path)?),
        None => counts,
    };
    let loaded = load_events(&stats_file)?;
    println!("{}", progress_report(&counts, &loaded));
    Ok(())
}

fn whole_millis(elapsed: Duration) -> Duration {
    Duration::from_millis(elapsed.as_millis() as u64)
}
