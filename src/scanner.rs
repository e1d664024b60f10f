//! Backup discovery
//!
//! This module walks a directory tree and turns every backup file it finds
//! into a [`BackupSnapshot`]. It is the first step of the pipeline and is
//! strictly read-only.
//!
//! ## Naming Convention
//!
//! The external backup script writes copies named
//! `<logical_id>.<yyyymmdd_hhmmss>.bak`, for example
//! `bak_to_git_1.py.20200905_105914.bak`. Any file matching the scan pattern
//! (`*.bak` by default) must follow this convention; a matching file with a
//! malformed tag stops the scan.
//!
//! ## Ordering
//!
//! Results are sorted by sort key and then by absolute path. Two backups with
//! the same name in different directories are both kept and appear in path
//! order; only exact duplicate absolute paths are collapsed.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use bak_to_git::scanner::BackupScanner;
//! use bak_to_git::types::ProgressInfo;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let scan = BackupScanner::new(PathBuf::from("./baks"))
//!     .scan::<fn(ProgressInfo)>(None)?;
//!
//! println!("{} backups of {} files", scan.snapshots.len(), scan.logical_ids().len());
//! # Ok(())
//! # }
//! ```

use crate::error::{BakError, Result};
use crate::timestamp::TimestampTag;
use crate::types::{BackupSnapshot, ProgressInfo};
use globset::{Glob, GlobMatcher};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};
use walkdir::WalkDir;

/// Default file name pattern for backups
pub const DEFAULT_PATTERN: &str = "*.bak";

/// Recursive backup file scanner
///
/// ## Configuration Options
///
/// - `root_path`: directory to search
/// - `pattern`: glob matched against file names (not paths)
/// - `follow_symlinks`: whether to descend into symlinked directories;
///   symlinks to files are always included
#[derive(Debug, Clone)]
pub struct BackupScanner {
    /// Directory to search
    root_path: PathBuf,
    /// Glob matched against each file name
    pattern: String,
    /// Whether to follow symbolic links during traversal
    follow_symlinks: bool,
}

impl BackupScanner {
    /// Create a scanner with the default `*.bak` pattern
    pub fn new(root_path: PathBuf) -> Self {
        Self {
            root_path,
            pattern: DEFAULT_PATTERN.to_string(),
            follow_symlinks: false,
        }
    }

    /// Set the file name pattern
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    /// Set symbolic link following behavior
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Scan the root directory for backups
    ///
    /// # Errors
    ///
    /// - [`BakError::DirectoryNotFound`] if the root does not exist
    /// - [`BakError::Pattern`] if the pattern is not a valid glob
    /// - [`BakError::InvalidBackupName`] / [`BakError::InvalidTimestampTag`]
    ///   for a matching file that does not follow the naming convention
    /// - [`BakError::WalkDir`] if traversal fails
    pub fn scan<F>(&self, progress_callback: Option<F>) -> Result<ScanResult>
    where
        F: Fn(ProgressInfo),
    {
        if !self.root_path.is_dir() {
            return Err(BakError::DirectoryNotFound(self.root_path.clone()));
        }
        let root = self.root_path.canonicalize()?;
        let matcher = self.matcher()?;

        info!("Scanning {:?} for {}", root, self.pattern);

        let mut paths = BTreeSet::new();
        for entry in WalkDir::new(&root).follow_links(self.follow_symlinks) {
            let entry = entry?;
            // Symlinked files are kept even when links are not followed.
            let is_file = entry.file_type().is_file() || (entry.path_is_symlink() && entry.path().is_file());
            if !is_file {
                continue;
            }
            if matcher.is_match(entry.file_name()) {
                trace!("Matched {:?}", entry.path());
                paths.insert(entry.into_path());
            }
        }

        let total = paths.len();
        let mut snapshots = Vec::with_capacity(total);
        for (index, path) in paths.into_iter().enumerate() {
            let snapshot = BackupSnapshot::from_path(&path)?;
            if let Some(callback) = &progress_callback {
                callback(ProgressInfo {
                    operation: "Scanning backups".to_string(),
                    current_item: Some(snapshot.file_name.clone()),
                    processed: index + 1,
                    total: Some(total),
                });
            }
            snapshots.push(snapshot);
        }

        snapshots.sort_by(|a, b| {
            a.sort_key
                .cmp(&b.sort_key)
                .then_with(|| a.full_path.cmp(&b.full_path))
        });

        debug!("Found {} backups", snapshots.len());

        Ok(ScanResult { root, snapshots })
    }

    fn matcher(&self) -> Result<GlobMatcher> {
        Ok(Glob::new(&self.pattern)?.compile_matcher())
    }
}

/// Snapshots found by a scan
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Canonical root directory that was scanned
    pub root: PathBuf,
    /// Snapshots sorted by sort key, then path
    pub snapshots: Vec<BackupSnapshot>,
}

impl ScanResult {
    /// Distinct logical ids, sorted
    pub fn logical_ids(&self) -> Vec<String> {
        self.snapshots
            .iter()
            .map(|s| s.logical_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct timestamp tags, ascending
    pub fn timestamp_tags(&self) -> Vec<TimestampTag> {
        self.snapshots
            .iter()
            .map(|s| s.timestamp_tag.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Snapshots of each logical id, in tag order
    pub fn by_logical_id(&self) -> BTreeMap<&str, Vec<&BackupSnapshot>> {
        let mut map: BTreeMap<&str, Vec<&BackupSnapshot>> = BTreeMap::new();
        for snapshot in &self.snapshots {
            map.entry(snapshot.logical_id.as_str()).or_default().push(snapshot);
        }
        map
    }

    /// Write the three debug listings into `dir`
    ///
    /// - `debug-1-all-files.csv`: every snapshot
    /// - `debug-2-base_names.csv`: distinct logical ids
    /// - `debug-3-datetime_tags.csv`: distinct tags
    pub fn write_debug_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let all_files = dir.join("debug-1-all-files.csv");
        let mut writer = csv::Writer::from_path(&all_files)?;
        writer.write_record(["sort_key", "full_name", "file_name", "base_name", "datetime_tag"])?;
        for snapshot in &self.snapshots {
            let full_name = snapshot.full_path.to_string_lossy();
            writer.write_record([
                snapshot.sort_key.as_str(),
                full_name.as_ref(),
                snapshot.file_name.as_str(),
                snapshot.logical_id.as_str(),
                snapshot.timestamp_tag.as_str(),
            ])?;
        }
        writer.flush()?;

        let base_names = dir.join("debug-2-base_names.csv");
        fs::write(&base_names, single_column("base_name", self.logical_ids()))?;

        let tags = dir.join("debug-3-datetime_tags.csv");
        let tag_lines = self.timestamp_tags().into_iter().map(|t| t.as_str().to_string());
        fs::write(&tags, single_column("datetime_tag", tag_lines))?;

        debug!("Wrote debug listings to {:?}", dir);
        Ok(vec![all_files, base_names, tags])
    }
}

fn single_column(header: &str, values: impl IntoIterator<Item = String>) -> String {
    let mut text = format!("{}\n", header);
    for value in values {
        text.push_str(&value);
        text.push('\n');
    }
    text
}
