//! Main test module for bak-to-git
//!
//! This module includes all test suites:
//! - Integration tests for the scan, annotate, review and replay workflow
//! - Property-based tests for invariants
//! - Edge cases around file names and annotation files

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::bak_to_git::*;
    use bak_to_git::annotations::{read_annotations, write_annotations};
    use bak_to_git::change_detection::detect_changes;
    use bak_to_git::grouping::group_records;
    use bak_to_git::vcs::{FossilVcs, RecordingVcs};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_source_directory() {
        let temp_dir = TempDir::new().unwrap();
        let scan = BackupScanner::new(temp_dir.path().to_path_buf())
            .scan::<fn(ProgressInfo)>(None)
            .unwrap();
        assert!(scan.snapshots.is_empty());

        let changes = detect_changes::<fn(ProgressInfo)>(&scan.snapshots, None).unwrap();
        let rows = group_records(changes.records);
        assert!(rows.is_empty());

        // The header is still written.
        let csv = temp_dir.path().join("empty.csv");
        write_annotations(&csv, &rows).unwrap();
        assert_eq!(fs::read_to_string(&csv).unwrap().lines().count(), 1);
        assert!(read_annotations(&csv).unwrap().is_empty());
    }

    #[test]
    fn test_special_logical_ids() {
        let temp_dir = TempDir::new().unwrap();
        let names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file.with.dots.txt",
            "file,with,commas.txt",
            "file(with)parens.txt",
            "no_extension",
        ];

        let mut created = Vec::new();
        for name in &names {
            let path = temp_dir.path().join(format!("{}.20211001_083010.bak", name));
            if fs::write(&path, name).is_ok() {
                created.push(*name);
            }
        }

        let scan = BackupScanner::new(temp_dir.path().to_path_buf())
            .scan::<fn(ProgressInfo)>(None)
            .unwrap();
        let mut ids = scan.logical_ids();
        ids.sort();
        let mut expected: Vec<String> = created.iter().map(|s| s.to_string()).collect();
        expected.sort();
        assert_eq!(ids, expected);

        // Commas and spaces survive the CSV round trip.
        let changes = detect_changes::<fn(ProgressInfo)>(&scan.snapshots, None).unwrap();
        let rows = group_records(changes.records);
        let csv = temp_dir.path().join("changes.csv");
        write_annotations(&csv, &rows).unwrap();
        assert_eq!(read_annotations(&csv).unwrap(), rows);
    }

    #[test]
    fn test_unicode_content_is_copied_exactly() {
        let temp_dir = TempDir::new().unwrap();
        let baks = temp_dir.path().join("baks");
        let repo = temp_dir.path().join("repo");
        fs::create_dir_all(&baks).unwrap();
        fs::create_dir_all(&repo).unwrap();

        let content = "файл 文件 ファイル 🚀\n";
        fs::write(baks.join("notes.txt.20211001_083010.bak"), content).unwrap();

        let scan = BackupScanner::new(baks).scan::<fn(ProgressInfo)>(None).unwrap();
        let changes = detect_changes::<fn(ProgressInfo)>(&scan.snapshots, None).unwrap();
        let rows = group_records(changes.records);

        let mut engine = ReplayBuilder::new(&repo)
            .vcs(VcsKind::Fossil)
            .do_commit(true)
            .build_with(RecordingVcs::new(FossilVcs::new(&repo)))
            .unwrap();
        engine.run(&rows, &mut ActionLog::in_memory()).unwrap();

        assert_eq!(fs::read_to_string(repo.join("notes.txt")).unwrap(), content);
    }

    #[test]
    fn test_non_ascii_message_aborts_replay() {
        let temp_dir = TempDir::new().unwrap();
        let baks = temp_dir.path().join("baks");
        let repo = temp_dir.path().join("repo");
        fs::create_dir_all(&baks).unwrap();
        fs::create_dir_all(&repo).unwrap();
        fs::write(baks.join("a.txt.20211001_083010.bak"), "a").unwrap();

        let scan = BackupScanner::new(baks).scan::<fn(ProgressInfo)>(None).unwrap();
        let changes = detect_changes::<fn(ProgressInfo)>(&scan.snapshots, None).unwrap();
        let mut rows = group_records(changes.records);
        if let AnnotatedRow::Change(record) = &mut rows[0] {
            // Typographic quotes are fine; the accent is not.
            record.commit_message = "\u{201C}Café\u{201D}".to_string();
        }

        let mut engine = ReplayBuilder::new(&repo)
            .vcs(VcsKind::Fossil)
            .do_commit(true)
            .build_with(RecordingVcs::new(FossilVcs::new(&repo)))
            .unwrap();
        let err = engine.run(&rows, &mut ActionLog::in_memory()).unwrap_err();

        assert!(err.root_cause().is_invariant_violation());
        assert_eq!(engine.state(), ReplayState::Aborted);
        assert!(!repo.join("a.txt").exists());
    }
}

// Re-export test utilities
pub use integration::{BackupTreeHarness, FileGenerator};
