//! Change detection between successive backups
//!
//! For every logical file the detector walks its snapshots in timestamp
//! order and keeps only the ones that matter for history:
//!
//! - the first snapshot of a logical id always becomes a record (new file)
//! - a later snapshot becomes a record only if its bytes differ from the
//!   last *retained* snapshot (changed file)
//! - a snapshot identical to the last retained one is discarded, and the
//!   retained snapshot stays the same
//!
//! The last-retained state is a plain map passed through [`detect_step`], so
//! a pass has no hidden state and can be driven one snapshot at a time.
//!
//! Comparison is exact: file sizes first, then the full bytes. A snapshot that
//! vanished or cannot be read since the scan is a fatal error.

use crate::error::{BakError, Result};
use crate::types::{BackupSnapshot, ChangeRecord, ChangeSummary, ProgressInfo};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, trace};

/// Last retained snapshot per logical id
pub type RetainedSnapshots<'a> = HashMap<&'a str, &'a BackupSnapshot>;

/// Records and statistics produced by a detection pass
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Retained transitions in sort key order
    pub records: Vec<ChangeRecord>,
    /// Counts of what happened to each snapshot
    pub summary: ChangeSummary,
}

/// Run the detector over snapshots already sorted by sort key
///
/// Snapshots of the same logical id sharing a tag are processed in input
/// order.
pub fn detect_changes<F>(snapshots: &[BackupSnapshot], progress_callback: Option<F>) -> Result<ChangeSet>
where
    F: Fn(ProgressInfo),
{
    let mut retained = RetainedSnapshots::new();
    let mut change_set = ChangeSet::default();

    for (index, snapshot) in snapshots.iter().enumerate() {
        change_set.summary.snapshots_seen += 1;

        match detect_step(snapshot, &mut retained)? {
            Some(record) if record.is_new_file() => {
                change_set.summary.new_files += 1;
                change_set.records.push(record);
            }
            Some(record) => {
                change_set.summary.changed_files += 1;
                change_set.records.push(record);
            }
            None => change_set.summary.unchanged_discarded += 1,
        }

        if let Some(callback) = &progress_callback {
            callback(ProgressInfo {
                operation: "Comparing backups".to_string(),
                current_item: Some(snapshot.sort_key.clone()),
                processed: index + 1,
                total: Some(snapshots.len()),
            });
        }
    }

    info!(
        "Detected {} new and {} changed files ({} identical backups discarded)",
        change_set.summary.new_files,
        change_set.summary.changed_files,
        change_set.summary.unchanged_discarded
    );

    Ok(change_set)
}

/// Decide whether one snapshot is a new file, a change, or a duplicate
///
/// Updates `retained` when a record is emitted.
pub fn detect_step<'a>(
    snapshot: &'a BackupSnapshot,
    retained: &mut RetainedSnapshots<'a>,
) -> Result<Option<ChangeRecord>> {
    match retained.get(snapshot.logical_id.as_str()).copied() {
        None => {
            // Unreadable first snapshots are fatal too.
            fs::metadata(&snapshot.full_path).map_err(|e| unreadable(&snapshot.full_path, e))?;
            debug!("New file {}", snapshot.sort_key);
            retained.insert(snapshot.logical_id.as_str(), snapshot);
            Ok(Some(ChangeRecord::new(snapshot, None)))
        }
        Some(previous) => {
            if same_content(&previous.full_path, &snapshot.full_path)? {
                trace!("Unchanged {}", snapshot.sort_key);
                return Ok(None);
            }
            debug!("Changed {}", snapshot.sort_key);
            let record = ChangeRecord::new(snapshot, Some(previous));
            retained.insert(snapshot.logical_id.as_str(), snapshot);
            Ok(Some(record))
        }
    }
}

/// Byte-for-byte comparison of two files
pub fn same_content(a: &Path, b: &Path) -> Result<bool> {
    let len_a = fs::metadata(a).map_err(|e| unreadable(a, e))?.len();
    let len_b = fs::metadata(b).map_err(|e| unreadable(b, e))?.len();
    if len_a != len_b {
        return Ok(false);
    }

    let bytes_a = fs::read(a).map_err(|e| unreadable(a, e))?;
    let bytes_b = fs::read(b).map_err(|e| unreadable(b, e))?;
    Ok(bytes_a == bytes_b)
}

fn unreadable(path: &Path, source: std::io::Error) -> BakError {
    BakError::SnapshotUnreadable {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn backup(dir: &Path, logical: &str, tag: &str, content: &str) -> BackupSnapshot {
        let path = dir.join(format!("{}.{}.bak", logical, tag));
        fs::write(&path, content).unwrap();
        BackupSnapshot::from_path(&path).unwrap()
    }

    #[test]
    fn test_first_snapshot_is_new_file() {
        let temp_dir = TempDir::new().unwrap();
        let snaps = vec![backup(temp_dir.path(), "a.txt", "20211001_083010", "One")];

        let set = detect_changes::<fn(ProgressInfo)>(&snaps, None).unwrap();
        assert_eq!(set.records.len(), 1);
        assert!(set.records[0].is_new_file());
        assert_eq!(set.summary.new_files, 1);
    }

    #[test]
    fn test_duplicates_collapse_against_last_retained() {
        let temp_dir = TempDir::new().unwrap();
        let snaps = vec![
            backup(temp_dir.path(), "a.txt", "20211001_000001", "One"),
            backup(temp_dir.path(), "a.txt", "20211001_000002", "One"),
            backup(temp_dir.path(), "a.txt", "20211001_000003", "Two"),
            backup(temp_dir.path(), "a.txt", "20211001_000004", "Two"),
            backup(temp_dir.path(), "a.txt", "20211001_000005", "One"),
        ];

        let set = detect_changes::<fn(ProgressInfo)>(&snaps, None).unwrap();
        let tags: Vec<&str> = set.records.iter().map(|r| r.timestamp_tag.as_str()).collect();
        assert_eq!(tags, vec!["20211001_000001", "20211001_000003", "20211001_000005"]);

        // Each change points at the last retained snapshot, not the discarded one.
        assert_eq!(set.records[1].previous_path.as_ref(), Some(&snaps[0].full_path));
        assert_eq!(set.records[2].previous_path.as_ref(), Some(&snaps[2].full_path));
        assert_eq!(set.summary.unchanged_discarded, 2);
        assert_eq!(set.summary.records(), 3);
    }

    #[test]
    fn test_logical_ids_are_independent() {
        let temp_dir = TempDir::new().unwrap();
        let snaps = vec![
            backup(temp_dir.path(), "a.txt", "20211001_000001", "same"),
            backup(temp_dir.path(), "b.txt", "20211001_000001", "same"),
        ];

        let set = detect_changes::<fn(ProgressInfo)>(&snaps, None).unwrap();
        assert_eq!(set.summary.new_files, 2);
    }

    #[test]
    fn test_same_size_different_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let snaps = vec![
            backup(temp_dir.path(), "a.txt", "20211001_000001", "abc"),
            backup(temp_dir.path(), "a.txt", "20211001_000002", "abd"),
        ];

        let set = detect_changes::<fn(ProgressInfo)>(&snaps, None).unwrap();
        assert_eq!(set.summary.changed_files, 1);
    }

    #[test]
    fn test_missing_snapshot_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let first = backup(temp_dir.path(), "a.txt", "20211001_000001", "One");
        let second = backup(temp_dir.path(), "a.txt", "20211001_000002", "Two");
        fs::remove_file(&second.full_path).unwrap();

        let result = detect_changes::<fn(ProgressInfo)>(&[first, second], None);
        match result {
            Err(BakError::SnapshotUnreadable { path, .. }) => {
                assert!(path.ends_with("a.txt.20211001_000002.bak"))
            }
            other => panic!("unexpected result: {:?}", other.map(|s| s.records.len())),
        }
    }

    #[test]
    fn test_same_tag_duplicates_follow_input_order() {
        let temp_dir = TempDir::new().unwrap();
        let one = temp_dir.path().join("one");
        let two = temp_dir.path().join("two");
        fs::create_dir(&one).unwrap();
        fs::create_dir(&two).unwrap();
        let snaps = vec![
            backup(&one, "a.txt", "20211001_000001", "first"),
            backup(&two, "a.txt", "20211001_000001", "second"),
        ];

        let set = detect_changes::<fn(ProgressInfo)>(&snaps, None).unwrap();
        assert_eq!(set.records.len(), 2);
        assert_eq!(set.records[0].current_path, snaps[0].full_path);
        assert_eq!(
            set.records[1].previous_path,
            Some(PathBuf::from(&snaps[0].full_path))
        );
    }
}
