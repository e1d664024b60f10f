//! Error types for the bak-to-git library
//!
//! This module defines all error types that can occur while scanning backups,
//! reading or merging annotation files, and replaying commits. Every error is
//! fatal to the current run: the pipeline never retries and never skips a
//! failing step silently.
//!
//! Errors fall into three groups:
//!
//! - **Input errors**: missing or unreadable files, malformed timestamp tags,
//!   malformed filter-list lines, duplicate sort keys on merge
//! - **Invariant violations**: overwriting an annotated field during merge,
//!   commit messages with characters outside printable ASCII
//! - **External tool failures**: a VCS subprocess exiting non-zero

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the bak-to-git library
pub type Result<T> = std::result::Result<T, BakError>;

/// Main error type for all bak-to-git operations
#[derive(Debug, Error)]
pub enum BakError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors reading or writing the annotation CSV
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Errors during JSON serialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Invalid backup file name pattern
    #[error("Invalid backup pattern: {0}")]
    Pattern(#[from] globset::Error),

    /// A required directory does not exist
    #[error("Directory not found: {0:?}")]
    DirectoryNotFound(PathBuf),

    /// A required file does not exist
    #[error("File not found: {0:?}")]
    FileNotFound(PathBuf),

    /// An output file or directory already exists and must not be overwritten
    #[error("Refusing to overwrite existing path: {0:?}")]
    AlreadyExists(PathBuf),

    /// A snapshot could not be read during change detection
    #[error("Cannot read backup {path:?}: {source}")]
    SnapshotUnreadable {
        /// Path of the backup file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// A timestamp tag is not in `yyyymmdd_hhmmss` form
    #[error("Invalid timestamp tag '{0}' (expected yyyymmdd_hhmmss)")]
    InvalidTimestampTag(String),

    /// A backup file name does not carry a `.{tag}.bak` suffix
    #[error("Invalid backup file name: {0:?}")]
    InvalidBackupName(PathBuf),

    /// Malformed line in a filter list
    #[error("Invalid filter list line {line} in {path:?}: '{text}'")]
    InvalidFilterLine {
        /// Path of the filter list
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// Offending text
        text: String,
    },

    /// Unrecognised or empty auxiliary command
    #[error("Invalid ADD_COMMAND '{0}' (expected pre:, post: or rename:)")]
    InvalidAuxCommand(String),

    /// Malformed annotation row
    #[error("Invalid annotation row {row}: {reason}")]
    InvalidRow {
        /// Row number as read from the file
        row: usize,
        /// What is wrong with it
        reason: String,
    },

    /// A sort key occurs more than once in a merge source
    #[error("Duplicate sort_key in merge source: {0}")]
    DuplicateSortKey(String),

    /// A merge would overwrite an already annotated field
    #[error("Refusing to overwrite {field} for sort_key {sort_key}: '{existing}'")]
    AnnotationConflict {
        /// Sort key of the target row
        sort_key: String,
        /// Column name
        field: &'static str,
        /// Value already present in the target
        existing: String,
    },

    /// A commit message contains characters outside printable ASCII
    #[error("Commit message for {sort_key} contains non-ASCII text: {escaped}")]
    NonAsciiMessage {
        /// Sort key of the offending record
        sort_key: String,
        /// Message with offending characters escaped
        escaped: String,
    },

    /// A VCS subprocess exited with a non-zero status
    #[error("Command failed ({status}): {command}\n{output}")]
    CommandFailed {
        /// Rendered command line
        command: String,
        /// Exit status description
        status: String,
        /// Captured stdout and stderr
        output: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A replay group failed; wraps the cause with the group tag
    #[error("Replay aborted at {tag}: {source}")]
    ReplayAborted {
        /// Timestamp tag of the failing group
        tag: String,
        /// Underlying error
        source: Box<BakError>,
    },
}

impl BakError {
    /// Create an invalid configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        BakError::InvalidConfiguration(msg.into())
    }

    /// Create an invalid row error
    pub fn row(row: usize, reason: impl Into<String>) -> Self {
        BakError::InvalidRow {
            row,
            reason: reason.into(),
        }
    }

    /// Wrap an error with the timestamp tag of the group being replayed
    pub fn aborted_at(tag: impl Into<String>, source: BakError) -> Self {
        BakError::ReplayAborted {
            tag: tag.into(),
            source: Box::new(source),
        }
    }

    /// Innermost error, unwrapping any [`BakError::ReplayAborted`] layers
    pub fn root_cause(&self) -> &BakError {
        match self {
            BakError::ReplayAborted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Check if this error was caused by bad input data
    pub fn is_input_error(&self) -> bool {
        matches!(
            self.root_cause(),
            BakError::DirectoryNotFound(_)
                | BakError::FileNotFound(_)
                | BakError::SnapshotUnreadable { .. }
                | BakError::InvalidTimestampTag(_)
                | BakError::InvalidBackupName(_)
                | BakError::InvalidFilterLine { .. }
                | BakError::InvalidAuxCommand(_)
                | BakError::InvalidRow { .. }
                | BakError::DuplicateSortKey(_)
        )
    }

    /// Check if this error is an operator or programmer invariant violation
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self.root_cause(),
            BakError::AnnotationConflict { .. } | BakError::NonAsciiMessage { .. }
        )
    }
}
