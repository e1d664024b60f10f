//! Core data types used throughout the bak-to-git library
//!
//! This module contains the data structures shared by the scanner, the change
//! detector, the grouping engine, the annotation file, and the replay engine.
//!
//! ## Overview
//!
//! - **Discovery**: [`BackupSnapshot`], one backup file found on disk
//! - **History**: [`ChangeRecord`], one retained transition of a logical file,
//!   and [`AnnotatedRow`], a row of the annotation file
//! - **Human input**: [`SkipFlag`] and [`AuxCommand`], decoded once when the
//!   annotation file is read
//! - **Reporting**: [`ChangeSummary`] and [`ProgressInfo`]

use crate::error::{BakError, Result};
use crate::text::strip_outer_quotes;
use crate::timestamp::TimestampTag;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Extension carried by every backup file
pub const BACKUP_EXTENSION: &str = "bak";

/// Build the composite sort key `"{tag}:{logical_id}"`
pub fn sort_key(tag: &TimestampTag, logical_id: &str) -> String {
    format!("{}:{}", tag, logical_id)
}

/// One backup file discovered by the scanner
///
/// # Examples
///
/// ```rust
/// # use bak_to_git::types::BackupSnapshot;
/// # use std::path::Path;
/// let snap = BackupSnapshot::from_path(Path::new("/baks/notes.v2.txt.20211001_083010.bak"))?;
/// assert_eq!(snap.logical_id, "notes.v2.txt");
/// assert_eq!(snap.timestamp_tag.as_str(), "20211001_083010");
/// assert_eq!(snap.sort_key, "20211001_083010:notes.v2.txt");
/// # Ok::<(), bak_to_git::BakError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    /// Absolute path to the backup file
    pub full_path: PathBuf,
    /// Base name including the tag and extension
    pub file_name: String,
    /// Identity of the tracked file across all its snapshots
    pub logical_id: String,
    /// Tag extracted from the file name
    pub timestamp_tag: TimestampTag,
    /// `"{timestamp_tag}:{logical_id}"`
    pub sort_key: String,
}

impl BackupSnapshot {
    /// Parse a backup path of the form `<logical_id>.<tag>.bak`
    ///
    /// Exactly the last two dot-separated segments are removed to obtain the
    /// logical id, so ids may themselves contain dots.
    pub fn from_path(path: &Path) -> Result<Self> {
        let invalid = || BakError::InvalidBackupName(path.to_path_buf());

        let file_name = path.file_name().and_then(|n| n.to_str()).ok_or_else(invalid)?;

        let mut parts = file_name.rsplitn(3, '.');
        let extension = parts.next().ok_or_else(invalid)?;
        let tag_text = parts.next().ok_or_else(invalid)?;
        let logical_id = parts.next().ok_or_else(invalid)?;

        if extension != BACKUP_EXTENSION || logical_id.is_empty() {
            return Err(invalid());
        }

        let timestamp_tag = TimestampTag::parse(tag_text)?;

        Ok(Self {
            full_path: path.to_path_buf(),
            file_name: file_name.to_string(),
            logical_id: logical_id.to_string(),
            sort_key: sort_key(&timestamp_tag, logical_id),
            timestamp_tag,
        })
    }
}

/// Tri-state skip flag entered by a human in the `SKIP_Y` column
///
/// Anything other than `Y`, `N` or blank is kept verbatim as a narrative
/// note and behaves like [`SkipFlag::Unset`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipFlag {
    /// Blank: defer to message-presence heuristics
    #[default]
    Unset,
    /// `Y`: always excluded from replay and review
    Yes,
    /// `N`: always included and compared, even with a message
    No,
    /// Free text typed into the column
    Narrative(String),
}

impl SkipFlag {
    /// Decode the raw column value (case-insensitive, surrounding space ignored)
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            SkipFlag::Unset
        } else if trimmed.eq_ignore_ascii_case("y") {
            SkipFlag::Yes
        } else if trimmed.eq_ignore_ascii_case("n") {
            SkipFlag::No
        } else {
            SkipFlag::Narrative(raw.to_string())
        }
    }

    /// Whether the row is forced out of replay
    pub fn is_skip(&self) -> bool {
        matches!(self, SkipFlag::Yes)
    }

    /// Whether the row is forced into review
    pub fn is_force_include(&self) -> bool {
        matches!(self, SkipFlag::No)
    }
}

impl fmt::Display for SkipFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipFlag::Unset => Ok(()),
            SkipFlag::Yes => f.write_str("Y"),
            SkipFlag::No => f.write_str("N"),
            SkipFlag::Narrative(text) => f.write_str(text),
        }
    }
}

/// Auxiliary command from the `ADD_COMMAND` column
///
/// # Examples
///
/// ```rust
/// # use bak_to_git::types::AuxCommand;
/// assert_eq!(AuxCommand::parse("")?, AuxCommand::None);
/// assert_eq!(
///     AuxCommand::parse("Rename: \"old name.txt\"")?,
///     AuxCommand::Rename { from: "old name.txt".to_string() }
/// );
/// assert!(AuxCommand::parse("later: tag").is_err());
/// # Ok::<(), bak_to_git::BakError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuxCommand {
    /// No command
    #[default]
    None,
    /// VCS command run before the group's files are copied
    Pre(String),
    /// VCS command run after the group's commit
    Post(String),
    /// Move `from` to this record's logical id before copying
    Rename {
        /// Previous name of the file in the working tree
        from: String,
    },
}

impl AuxCommand {
    /// Decode the raw column value; prefixes are case-insensitive
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(AuxCommand::None);
        }

        let invalid = || BakError::InvalidAuxCommand(raw.to_string());

        let (prefix, payload) = trimmed.split_once(':').ok_or_else(invalid)?;
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(invalid());
        }

        match prefix.trim().to_ascii_lowercase().as_str() {
            "pre" => Ok(AuxCommand::Pre(payload.to_string())),
            "post" => Ok(AuxCommand::Post(payload.to_string())),
            "rename" => {
                let from = strip_outer_quotes(payload);
                if from.is_empty() {
                    return Err(invalid());
                }
                Ok(AuxCommand::Rename { from })
            }
            _ => Err(invalid()),
        }
    }

    /// Whether there is no command
    pub fn is_none(&self) -> bool {
        matches!(self, AuxCommand::None)
    }
}

impl fmt::Display for AuxCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuxCommand::None => Ok(()),
            AuxCommand::Pre(cmd) => write!(f, "pre: {}", cmd),
            AuxCommand::Post(cmd) => write!(f, "post: {}", cmd),
            AuxCommand::Rename { from } => write!(f, "rename: {}", from),
        }
    }
}

/// One retained transition in a logical file's history
///
/// Emitted by the change detector for the first snapshot of a logical id and
/// for every later snapshot whose content differs from the last retained one.
/// The annotation fields are filled in by a human between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Row identity within the annotation file
    pub row_number: usize,
    /// `"{timestamp_tag}:{logical_id}"`
    pub sort_key: String,
    /// Tag of the triggering snapshot
    pub timestamp_tag: TimestampTag,
    /// Identity of the tracked file
    pub logical_id: String,
    /// Backup holding the new content
    pub current_path: PathBuf,
    /// Previously retained backup (None for a new file)
    pub previous_path: Option<PathBuf>,
    /// `SKIP_Y` column
    pub skip_flag: SkipFlag,
    /// `COMMIT_MESSAGE` column
    pub commit_message: String,
    /// `ADD_COMMAND` column
    pub aux_command: AuxCommand,
    /// `NOTES` column, never interpreted
    pub notes: String,
}

impl ChangeRecord {
    /// Create an unannotated record for a snapshot
    pub fn new(snapshot: &BackupSnapshot, previous: Option<&BackupSnapshot>) -> Self {
        Self {
            row_number: 0,
            sort_key: snapshot.sort_key.clone(),
            timestamp_tag: snapshot.timestamp_tag.clone(),
            logical_id: snapshot.logical_id.clone(),
            current_path: snapshot.full_path.clone(),
            previous_path: previous.map(|p| p.full_path.clone()),
            skip_flag: SkipFlag::Unset,
            commit_message: String::new(),
            aux_command: AuxCommand::None,
            notes: String::new(),
        }
    }

    /// Whether this record introduces a logical id
    pub fn is_new_file(&self) -> bool {
        self.previous_path.is_none()
    }

    /// Whether the commit message column holds anything
    pub fn has_message(&self) -> bool {
        !self.commit_message.trim().is_empty()
    }
}

/// A row of the annotation file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnotatedRow {
    /// Blank row between timestamp groups
    Separator {
        /// Row identity
        row_number: usize,
    },
    /// A change record
    Change(ChangeRecord),
}

impl AnnotatedRow {
    /// Row identity of either variant
    pub fn row_number(&self) -> usize {
        match self {
            AnnotatedRow::Separator { row_number } => *row_number,
            AnnotatedRow::Change(record) => record.row_number,
        }
    }

    /// The change record, if this is not a separator
    pub fn as_change(&self) -> Option<&ChangeRecord> {
        match self {
            AnnotatedRow::Change(record) => Some(record),
            AnnotatedRow::Separator { .. } => None,
        }
    }
}

/// Statistics from a change detection pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    /// Snapshots examined
    pub snapshots_seen: usize,
    /// Records emitted for first occurrences
    pub new_files: usize,
    /// Records emitted for content changes
    pub changed_files: usize,
    /// Snapshots discarded as identical to their predecessor
    pub unchanged_discarded: usize,
}

impl ChangeSummary {
    /// Total records emitted
    pub fn records(&self) -> usize {
        self.new_files + self.changed_files
    }
}

/// Progress callback for long-running operations
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// Information passed to progress callbacks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Operation being performed
    pub operation: String,
    /// Current item being processed
    pub current_item: Option<String>,
    /// Items processed so far
    pub processed: usize,
    /// Total items to process (if known)
    pub total: Option<usize>,
}

impl ProgressInfo {
    /// Get progress as a percentage (0-100)
    pub fn percentage(&self) -> Option<f32> {
        match self.total {
            Some(total) if total > 0 => Some((self.processed as f32 / total as f32) * 100.0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_from_path() {
        let snap = BackupSnapshot::from_path(Path::new("/a/b/test.txt.20211001_083010.bak")).unwrap();
        assert_eq!(snap.file_name, "test.txt.20211001_083010.bak");
        assert_eq!(snap.logical_id, "test.txt");
        assert_eq!(snap.sort_key, "20211001_083010:test.txt");
        assert_eq!(snap.full_path, PathBuf::from("/a/b/test.txt.20211001_083010.bak"));
    }

    #[test]
    fn test_snapshot_logical_id_without_extension() {
        let snap = BackupSnapshot::from_path(Path::new("Makefile.20211001_083010.bak")).unwrap();
        assert_eq!(snap.logical_id, "Makefile");
    }

    #[test]
    fn test_snapshot_rejects_bad_names() {
        for bad in [
            "test.txt.bak",
            "20211001_083010.bak",
            "test.txt.20211001_083010.orig",
            "test.txt.2021-10-01.bak",
            ".20211001_083010.bak",
        ] {
            assert!(BackupSnapshot::from_path(Path::new(bad)).is_err(), "accepted {}", bad);
        }
    }

    #[test]
    fn test_skip_flag_parse() {
        assert_eq!(SkipFlag::parse(""), SkipFlag::Unset);
        assert_eq!(SkipFlag::parse("  "), SkipFlag::Unset);
        assert_eq!(SkipFlag::parse("y"), SkipFlag::Yes);
        assert_eq!(SkipFlag::parse(" Y "), SkipFlag::Yes);
        assert_eq!(SkipFlag::parse("n"), SkipFlag::No);
        assert_eq!(
            SkipFlag::parse("Y - same as before"),
            SkipFlag::Narrative("Y - same as before".to_string())
        );
        assert!(!SkipFlag::parse("Yes").is_skip());
        assert_eq!(SkipFlag::parse("y").to_string(), "Y");
    }

    #[test]
    fn test_aux_command_parse() {
        assert_eq!(AuxCommand::parse("  ").unwrap(), AuxCommand::None);
        assert_eq!(
            AuxCommand::parse("PRE: mv a.txt b.txt").unwrap(),
            AuxCommand::Pre("mv a.txt b.txt".to_string())
        );
        assert_eq!(
            AuxCommand::parse("post:tag add v1 current").unwrap(),
            AuxCommand::Post("tag add v1 current".to_string())
        );
        assert_eq!(
            AuxCommand::parse("rename: 'old.txt'").unwrap(),
            AuxCommand::Rename { from: "old.txt".to_string() }
        );
        assert!(AuxCommand::parse("rename:").is_err());
        assert!(AuxCommand::parse("rename: \"\"").is_err());
        assert!(AuxCommand::parse("mv a b").is_err());
    }

    #[test]
    fn test_aux_command_display_reparses() {
        let cmd = AuxCommand::Post("tag add v1 current".to_string());
        assert_eq!(AuxCommand::parse(&cmd.to_string()).unwrap(), cmd);
    }
}
