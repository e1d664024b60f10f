//! Property-based testing for bak-to-git
//!
//! Uses proptest to check detection, grouping and text handling invariants
//! across randomly generated backup histories and strings.

use ::bak_to_git::*;
use bak_to_git::annotations::write_rows;
use bak_to_git::change_detection::detect_changes;
use bak_to_git::grouping::{aggregate_message, group_records};
use bak_to_git::text::split_quoted;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Tag for the `index`-th backup; one per minute from 2021-10-01 08:00
fn tag_for(index: usize) -> String {
    format!("20211001_{:02}{:02}00", 8 + index / 60, index % 60)
}

/// Write one backup per content value and scan the result
fn snapshots_for(dir: &Path, logical_id: &str, contents: &[String]) -> Vec<BackupSnapshot> {
    let mut snapshots = Vec::new();
    for (index, content) in contents.iter().enumerate() {
        let path = dir.join(format!("{}.{}.bak", logical_id, tag_for(index)));
        fs::write(&path, content).unwrap();
        snapshots.push(BackupSnapshot::from_path(&path).unwrap());
    }
    snapshots
}

fn record_for(tag_index: usize, name: &str) -> ChangeRecord {
    let path = PathBuf::from(format!("/baks/{}.{}.bak", name, tag_for(tag_index)));
    ChangeRecord::new(&BackupSnapshot::from_path(&path).unwrap(), None)
}

fn rendered(rows: &[AnnotatedRow]) -> Vec<u8> {
    let mut out = Vec::new();
    write_rows(&mut out, rows).unwrap();
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Contiguous runs of identical content collapse to one record per run
    #[test]
    fn runs_collapse_to_one_record_each(
        run_lengths in prop::collection::vec(1..5usize, 1..8)
    ) {
        let temp_dir = TempDir::new().unwrap();
        let contents: Vec<String> = run_lengths
            .iter()
            .enumerate()
            .flat_map(|(run, len)| std::iter::repeat(format!("content {}", run)).take(*len))
            .collect();
        let snapshots = snapshots_for(temp_dir.path(), "doc.txt", &contents);

        let changes = detect_changes::<fn(ProgressInfo)>(&snapshots, None).unwrap();

        prop_assert_eq!(changes.records.len(), run_lengths.len());
        prop_assert!(changes.records[0].is_new_file());
        prop_assert_eq!(changes.summary.unchanged_discarded, contents.len() - run_lengths.len());
    }

    /// Each record's previous path is the last retained snapshot, which
    /// always holds different bytes
    #[test]
    fn records_follow_content_changes(
        values in prop::collection::vec(0..3u8, 1..20)
    ) {
        let temp_dir = TempDir::new().unwrap();
        let contents: Vec<String> = values.iter().map(|v| format!("v{}", v)).collect();
        let snapshots = snapshots_for(temp_dir.path(), "doc.txt", &contents);

        let changes = detect_changes::<fn(ProgressInfo)>(&snapshots, None).unwrap();

        let expected = 1 + values.windows(2).filter(|w| w[0] != w[1]).count();
        prop_assert_eq!(changes.records.len(), expected);
        for record in &changes.records[1..] {
            let previous = record.previous_path.as_ref().unwrap();
            prop_assert_ne!(fs::read(previous).unwrap(), fs::read(&record.current_path).unwrap());
        }
    }

    /// Grouping the same records in any input order gives identical output
    #[test]
    fn grouping_is_stable(
        keys in prop::collection::btree_set((0..6usize, "[a-d]{1,3}\\.txt"), 1..20)
            .prop_map(|set| set.into_iter().collect::<Vec<_>>())
            .prop_shuffle()
    ) {
        let records: Vec<ChangeRecord> = keys.iter().map(|(tag, name)| record_for(*tag, name)).collect();
        let mut reversed = records.clone();
        reversed.reverse();

        let first = group_records(records);
        let second = group_records(reversed);

        prop_assert_eq!(rendered(&first), rendered(&second));

        let tags: BTreeSet<usize> = keys.iter().map(|(tag, _)| *tag).collect();
        let separators = first.iter().filter(|r| r.as_change().is_none()).count();
        prop_assert_eq!(separators, tags.len());
        for (index, row) in first.iter().enumerate() {
            prop_assert_eq!(row.row_number(), index + 1);
        }
    }

    /// Messages without periods are joined with ". " and closed with "."
    #[test]
    fn aggregate_joins_fragments(
        messages in prop::collection::vec("[A-Za-z][A-Za-z ]{0,15}[A-Za-z]", 1..5)
    ) {
        let records: Vec<ChangeRecord> = messages
            .iter()
            .map(|message| {
                let mut record = record_for(0, "a.txt");
                record.commit_message = message.clone();
                record
            })
            .collect();

        let aggregated = aggregate_message(&records[0].timestamp_tag, &records).unwrap();

        prop_assert_eq!(aggregated, format!("{}.", messages.join(". ")));
    }

    /// A quoted run of words stays one token, with its quotes removed
    #[test]
    fn split_keeps_quoted_runs(
        before in prop::collection::vec("[a-z]{1,6}", 0..3),
        quoted in prop::collection::vec("[a-z]{1,6}", 1..4),
        after in prop::collection::vec("[a-z]{1,6}", 0..3),
        single in any::<bool>()
    ) {
        let quote = if single { '\'' } else { '"' };
        let phrase = quoted.join(" ");
        let mut parts = before.clone();
        parts.push(format!("{}{}{}", quote, phrase, quote));
        parts.extend(after.iter().cloned());

        let mut expected = before.clone();
        expected.push(phrase);
        expected.extend(after);

        prop_assert_eq!(split_quoted(&parts.join(" ")), expected);
    }

    /// Only Y and N have meaning in the skip column, in either case
    #[test]
    fn skip_flag_parsing(raw in "[ ]{0,2}[A-Za-z]{0,3}[ ]{0,2}") {
        let flag = SkipFlag::parse(&raw);
        let trimmed = raw.trim().to_ascii_uppercase();
        prop_assert_eq!(flag.is_skip(), trimmed == "Y");
        prop_assert_eq!(flag.is_force_include(), trimmed == "N");
    }
}
