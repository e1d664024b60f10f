//! # bak-to-git - Rebuild version history from timestamped backups
//!
//! Turns a directory of timestamped backup copies into a commit history in a
//! git or fossil repository, with a human annotation step in between.
//!
//! ## Overview
//!
//! Editors and backup scripts often leave files like
//! `notes.txt.20211001_083010.bak` behind. This library:
//! - Scans a tree for backups and parses their timestamp tags
//! - Discards backups identical to the last kept version of the same file
//! - Writes the remaining changes to an annotation CSV, grouped by timestamp
//! - Lets a human review each change and write commit messages into the CSV
//! - Replays the annotated CSV into a repository, one commit per timestamp
//!
//! ## Architecture
//!
//! ```text
//! Scanner → Change Detector → Grouping → annotation CSV
//!                                              │  (human edits, Review Planner)
//!                                              ▼
//!                                   Replay Engine → VCS Adapter
//! ```
//!
//! - **Scanner**: walks the source tree and builds [`BackupSnapshot`]s
//! - **Change Detector**: exact byte comparison against the last retained
//!   snapshot per logical file
//! - **Annotations**: the CSV contract between the machine and the human,
//!   including merging annotations from an earlier pass
//! - **Replay Engine**: a state machine per timestamp group, what-if by
//!   default, with an append-only [`ActionLog`]
//! - **VCS Adapter**: builds and runs git or fossil command lines
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bak_to_git::{
//!     annotations::write_annotations, change_detection::detect_changes,
//!     grouping::group_records, scanner::BackupScanner, ProgressInfo,
//! };
//! use std::path::{Path, PathBuf};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let scan = BackupScanner::new(PathBuf::from("./backups")).scan::<fn(ProgressInfo)>(None)?;
//! let changes = detect_changes::<fn(ProgressInfo)>(&scan.snapshots, None)?;
//! let rows = group_records(changes.records);
//! write_annotations(Path::new("step-1-files-changed.csv"), &rows)?;
//! # Ok(())
//! # }
//! ```
//!
//! After the CSV has been annotated:
//!
//! ```rust,no_run
//! use bak_to_git::{ActionLog, ReplayBuilder, VcsKind};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut engine = ReplayBuilder::new("./repo")
//!     .vcs(VcsKind::Git)
//!     .do_commit(true)
//!     .build()?;
//! let mut log = ActionLog::open(Path::new("log-bak-to-git.txt"))?;
//! engine.run_file(Path::new("step-1-files-changed.csv"), &mut log)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return `Result<T, BakError>`. Input errors (bad names,
//! malformed rows, unknown commands) and invariant violations (duplicate
//! keys, annotation conflicts, non-ASCII messages) are distinguished by
//! [`BakError::is_input_error`] and [`BakError::is_invariant_violation`].
//!
//! ## Module Organization
//!
//! - [`scanner`]: Backup discovery
//! - [`change_detection`]: Retained-snapshot change detection
//! - [`grouping`]: Timestamp grouping and commit message aggregation
//! - [`annotations`]: Annotation CSV format and prior-work merge
//! - [`filter`]: String replacement while copying
//! - [`replay`]: Replay state machine
//! - [`vcs`]: Git and fossil adapters
//! - [`review`]: Interactive review of changes
//! - [`stats`]: Review progress statistics
//! - [`action_log`]: Replay audit trail
//! - [`timestamp`], [`text`], [`types`]: Shared building blocks
//! - [`error`]: Error types and handling

pub mod action_log;
pub mod annotations;
pub mod change_detection;
pub mod error;
pub mod filter;
pub mod grouping;
pub mod replay;
pub mod review;
pub mod scanner;
pub mod stats;
pub mod text;
pub mod timestamp;
pub mod types;
pub mod vcs;

// Re-export main types for convenience
pub use action_log::ActionLog;
pub use error::{BakError, Result};
pub use grouping::CommitGroup;
pub use replay::{ReplayBuilder, ReplayConfig, ReplayEngine, ReplayReport, ReplayState};
pub use scanner::{BackupScanner, ScanResult};
pub use timestamp::{CommitDates, TimestampTag};
pub use types::*;
pub use vcs::{VcsAction, VcsAdapter, VcsKind};
