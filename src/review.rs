//! Interactive review of annotated changes
//!
//! Before a replay, every change row is read in file order and compared
//! against the last version of the same logical file that the operator
//! accepted. Rows that already carry a commit message are treated as
//! reviewed unless `SKIP_Y` is `N`.
//!
//! ## Decisions
//!
//! | Row                                   | Decision                          |
//! |---------------------------------------|-----------------------------------|
//! | `SKIP_Y = Y`                          | [`ReviewDecision::Skip`]           |
//! | message present, `SKIP_Y != N`        | [`ReviewDecision::AlreadyReviewed`] |
//! | logical id accepted before            | compare against that version      |
//! | no previous backup                    | [`ReviewDecision::NewFile`]        |
//! | otherwise                             | compare against the previous backup, flagged unexpected |
//!
//! After each compare the operator continues (the right side becomes the
//! new baseline), keeps the left side as the baseline, or stops.

use crate::error::{BakError, Result};
use crate::stats::ProgressLog;
use crate::types::{AnnotatedRow, ChangeRecord};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Diff tool launched when none is configured
pub const DEFAULT_DIFF_TOOL: &str = "bcompare";

/// What the review does with one row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ReviewDecision {
    /// Row is excluded from replay
    Skip,
    /// Row already has a commit message
    AlreadyReviewed,
    /// First version of a file
    NewFile,
    /// Show the two versions side by side
    Compare {
        /// Baseline version
        left: PathBuf,
        /// Version under review
        right: PathBuf,
        /// The baseline came from the row's previous backup, not from an
        /// earlier review
        unexpected: bool,
    },
}

/// Operator answer after a compare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAnswer {
    /// Accept the right side as the new baseline
    Continue,
    /// Keep the left side as the baseline
    KeepLeft,
    /// End the review
    Stop,
}

impl ReviewAnswer {
    /// Parse a typed answer; blank means continue
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "" | "y" => Some(ReviewAnswer::Continue),
            "k" => Some(ReviewAnswer::KeepLeft),
            "n" => Some(ReviewAnswer::Stop),
            _ => None,
        }
    }
}

/// Tracks the accepted baseline per logical file
#[derive(Debug, Clone, Default)]
pub struct ReviewPlanner {
    baselines: HashMap<String, PathBuf>,
}

impl ReviewPlanner {
    /// A planner with no baselines kept
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide what to do with `record`
    ///
    /// Rows that need no answer update the baseline immediately. For a
    /// compare, the baseline changes only through [`answer`](Self::answer).
    pub fn decide(&mut self, record: &ChangeRecord) -> ReviewDecision {
        if record.skip_flag.is_skip() {
            return ReviewDecision::Skip;
        }

        if record.has_message() && !record.skip_flag.is_force_include() {
            self.accept(record);
            return ReviewDecision::AlreadyReviewed;
        }

        if let Some(left) = self.baselines.get(&record.logical_id) {
            return ReviewDecision::Compare {
                left: left.clone(),
                right: record.current_path.clone(),
                unexpected: false,
            };
        }

        match &record.previous_path {
            None => {
                self.accept(record);
                ReviewDecision::NewFile
            }
            Some(previous) => ReviewDecision::Compare {
                left: previous.clone(),
                right: record.current_path.clone(),
                unexpected: true,
            },
        }
    }

    /// Apply the operator's answer for a compared `record`
    pub fn answer(&mut self, record: &ChangeRecord, answer: ReviewAnswer) {
        if answer == ReviewAnswer::Continue {
            self.accept(record);
        }
    }

    /// Baseline currently held for a logical id
    pub fn baseline(&self, logical_id: &str) -> Option<&Path> {
        self.baselines.get(logical_id).map(PathBuf::as_path)
    }

    fn accept(&mut self, record: &ChangeRecord) {
        self.baselines
            .insert(record.logical_id.clone(), record.current_path.clone());
    }
}

/// Launches a side-by-side diff of two files
pub trait DiffLauncher {
    /// Show `left` and `right`, returning when the viewer is closed
    fn launch(&mut self, left: &Path, right: &Path) -> Result<()>;
}

/// Runs an external diff program as `<exe> <left> <right>`
#[derive(Debug, Clone)]
pub struct ExternalDiff {
    exe: String,
}

impl ExternalDiff {
    /// Run `exe <left> <right>` for each compare
    pub fn new(exe: impl Into<String>) -> Self {
        Self { exe: exe.into() }
    }
}

impl Default for ExternalDiff {
    fn default() -> Self {
        Self::new(DEFAULT_DIFF_TOOL)
    }
}

impl DiffLauncher for ExternalDiff {
    fn launch(&mut self, left: &Path, right: &Path) -> Result<()> {
        debug!("Launching {} {:?} {:?}", self.exe, left, right);
        // Exit status is ignored; only a failure to start is an error.
        Command::new(&self.exe)
            .arg(left)
            .arg(right)
            .status()
            .map_err(|e| BakError::CommandFailed {
                command: format!("{} {} {}", self.exe, left.display(), right.display()),
                status: "not started".to_string(),
                output: e.to_string(),
            })?;
        Ok(())
    }
}

/// Asks the operator how to proceed after a compare
pub trait AnswerSource {
    /// Answer for the record just compared
    fn ask(&mut self, record: &ChangeRecord) -> Result<ReviewAnswer>;
}

/// Reads answers from standard input, asking again on anything unrecognized
#[derive(Debug, Default)]
pub struct StdinAnswers;

impl AnswerSource for StdinAnswers {
    fn ask(&mut self, _record: &ChangeRecord) -> Result<ReviewAnswer> {
        let stdin = io::stdin();
        let mut input = String::new();
        loop {
            input.clear();
            print!("Continue (or Keep left) [Y,n,k]? ");
            io::stdout().flush()?;

            // End of input counts as stop.
            if stdin.lock().read_line(&mut input)? == 0 {
                return Ok(ReviewAnswer::Stop);
            }
            if let Some(answer) = ReviewAnswer::parse(&input) {
                return Ok(answer);
            }
        }
    }
}

/// Counts from one review session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReviewOutcome {
    /// Change rows visited
    pub rows_visited: usize,
    /// Rows flagged skip
    pub skipped: usize,
    /// Rows with a message accepted without a compare
    pub already_reviewed: usize,
    /// First versions of files
    pub new_files: usize,
    /// Compares shown
    pub compared: usize,
    /// Compares against a previous backup rather than a reviewed version
    pub unexpected: usize,
    /// Row at which the operator stopped
    pub stopped_at: Option<usize>,
}

/// Walk `rows`, launching compares and collecting answers
///
/// Each compare is recorded in `stats` (when given) as a `compare` action,
/// so the time between answers feeds the progress estimate.
pub fn run_review<D, A>(
    rows: &[AnnotatedRow],
    diff: &mut D,
    answers: &mut A,
    mut stats: Option<&mut ProgressLog>,
) -> Result<ReviewOutcome>
where
    D: DiffLauncher + ?Sized,
    A: AnswerSource + ?Sized,
{
    let mut planner = ReviewPlanner::new();
    let mut outcome = ReviewOutcome::default();

    for record in rows.iter().filter_map(AnnotatedRow::as_change) {
        outcome.rows_visited += 1;
        match planner.decide(record) {
            ReviewDecision::Skip => {
                debug!("Skip {}", record.sort_key);
                outcome.skipped += 1;
            }
            ReviewDecision::AlreadyReviewed => {
                debug!("Already reviewed {}", record.sort_key);
                outcome.already_reviewed += 1;
            }
            ReviewDecision::NewFile => {
                println!("New file: {}", record.logical_id);
                outcome.new_files += 1;
            }
            ReviewDecision::Compare {
                left,
                right,
                unexpected,
            } => {
                if unexpected {
                    println!("UNEXPECTED PREVIOUS VERSION: {}", record.logical_id);
                    outcome.unexpected += 1;
                }
                println!("Compare\n  L: {}\n  R: {}", left.display(), right.display());
                diff.launch(&left, &right)?;
                outcome.compared += 1;

                let answer = answers.ask(record)?;
                if let Some(log) = stats.as_deref_mut() {
                    log.log_act("compare")?;
                }
                match answer {
                    ReviewAnswer::Stop => {
                        outcome.stopped_at = Some(record.row_number);
                        break;
                    }
                    ReviewAnswer::KeepLeft => {
                        println!("(Keep previous Left file for comparison).");
                    }
                    ReviewAnswer::Continue => {}
                }
                planner.answer(record, answer);
            }
        }
    }

    info!(
        "Review visited {} rows: {} compared, {} skipped, {} already reviewed",
        outcome.rows_visited, outcome.compared, outcome.skipped, outcome.already_reviewed
    );
    Ok(outcome)
}
