//! Integration tests for the bak-to-git pipeline
//!
//! Drives scan, detection, grouping, annotation, review and replay together
//! against real files in temporary directories. VCS commands are captured by
//! the recording adapter instead of being executed.

use ::bak_to_git::*;
use bak_to_git::annotations::{
    import_prior_work, merged_output_path, read_annotations, read_raw_rows, write_annotations,
    write_raw_rows, RawRow,
};
use bak_to_git::change_detection::detect_changes;
use bak_to_git::grouping::{commit_groups, group_records};
use bak_to_git::review::{run_review, AnswerSource, DiffLauncher, ReviewAnswer};
use bak_to_git::stats::ProgressCounts;
use bak_to_git::vcs::{GitVcs, RecordingVcs};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// Temporary backup tree, output directory and git working tree
pub struct BackupTreeHarness {
    pub temp_dir: TempDir,
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub repo_dir: PathBuf,
}

impl BackupTreeHarness {
    /// Create empty directories; the repository gets a bare `.git` marker
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let source_dir = temp_dir.path().join("wipbak");
        let output_dir = temp_dir.path().join("output");
        let repo_dir = temp_dir.path().join("repo");
        fs::create_dir_all(&source_dir).unwrap();
        fs::create_dir_all(&output_dir).unwrap();
        fs::create_dir_all(repo_dir.join(".git")).unwrap();

        Self {
            temp_dir,
            source_dir,
            output_dir,
            repo_dir,
        }
    }

    /// Write `<logical_id>.<tag>.bak` into the source tree
    pub fn backup(&self, logical_id: &str, tag: &str, content: &str) -> PathBuf {
        let path = self.source_dir.join(format!("{}.{}.bak", logical_id, tag));
        fs::write(&path, content).unwrap();
        path
    }

    /// Scan, detect and group the current source tree
    pub fn annotate(&self) -> anyhow::Result<Vec<AnnotatedRow>> {
        let scan = BackupScanner::new(self.source_dir.clone()).scan::<fn(ProgressInfo)>(None)?;
        let changes = detect_changes::<fn(ProgressInfo)>(&scan.snapshots, None)?;
        info!("Annotated {} records", changes.records.len());
        Ok(group_records(changes.records))
    }

    /// Write the step 1 CSV under the output directory
    pub fn write_step_one(&self, name: &str) -> anyhow::Result<PathBuf> {
        let path = self.output_dir.join(name);
        write_annotations(&path, &self.annotate()?)?;
        Ok(path)
    }

    /// Edit a CSV in place, the way a human would in a spreadsheet
    pub fn edit_csv<F>(&self, path: &Path, mut edit: F) -> anyhow::Result<()>
    where
        F: FnMut(&mut RawRow),
    {
        let mut rows = read_raw_rows(fs::File::open(path)?)?;
        for row in rows.iter_mut() {
            edit(row);
        }
        write_raw_rows(fs::File::create(path)?, &rows)?;
        Ok(())
    }

    /// Replay engine over the recording adapter
    pub fn engine(&self, live: bool) -> ReplayEngine<RecordingVcs> {
        ReplayBuilder::new(&self.repo_dir)
            .do_commit(live)
            .build_with(RecordingVcs::new(GitVcs::new(&self.repo_dir)))
            .unwrap()
    }
}

impl Default for BackupTreeHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic random backup histories
pub struct FileGenerator {
    pub rng: StdRng,
}

impl FileGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Content drawn from a small alphabet so repeats are common
    pub fn content(&mut self) -> String {
        let choice = self.rng.random_range(0..4);
        format!("version {}\n", choice)
    }

    /// Ascending tags, one per day starting 2021-10-01
    pub fn tags(&mut self, count: usize) -> Vec<String> {
        (0..count)
            .map(|day| {
                let hour = self.rng.random_range(0..24);
                format!("202110{:02}_{:02}0000", day + 1, hour)
            })
            .collect()
    }
}

/// Rows of the three-version history used in several tests
fn three_versions(harness: &BackupTreeHarness) {
    harness.backup("test.txt", "20211001_083010", "One");
    harness.backup("test.txt", "20211101_093011", "Tahoo");
    harness.backup("test.txt", "20211201_103012", "Tharee");
}

fn annotate_three_versions(harness: &BackupTreeHarness, csv: &Path) {
    harness
        .edit_csv(csv, |row| match row.datetime_tag.as_str() {
            "20211001_083010" => row.commit_message = "Initial commit.".to_string(),
            "20211101_093011" => row.skip_y = "y".to_string(),
            "20211201_103012" => row.commit_message = "Corrected Mr. Owl's typos.".to_string(),
            _ => {}
        })
        .unwrap();
}

#[test]
fn test_three_backups_end_to_end() {
    let harness = BackupTreeHarness::new();
    three_versions(&harness);

    let csv = harness.write_step_one("step-1-files-changed.csv").unwrap();
    let text = fs::read_to_string(&csv).unwrap();

    // Header, three records, three separators, trailing newline.
    assert_eq!(text.split('\n').count(), 8);
    assert!(text.ends_with('\n'));

    let rows = read_annotations(&csv).unwrap();
    let records: Vec<&ChangeRecord> = rows.iter().filter_map(AnnotatedRow::as_change).collect();
    assert_eq!(records.len(), 3);
    assert!(records[0].is_new_file());
    assert!(!records[1].is_new_file());
    assert!(!records[2].is_new_file());
    assert_eq!(rows.iter().filter(|r| r.as_change().is_none()).count(), 3);
}

#[test]
fn test_annotated_replay_issues_one_add_and_two_commits() {
    let harness = BackupTreeHarness::new();
    three_versions(&harness);
    let csv = harness.write_step_one("step-1-files-changed.csv").unwrap();
    annotate_three_versions(&harness, &csv);

    let mut engine = harness.engine(true);
    let mut log = ActionLog::in_memory();
    let report = engine.run_file(&csv, &mut log).unwrap();

    assert_eq!(engine.vcs().adds(), 1);
    assert_eq!(engine.vcs().commits(), 2);
    assert_eq!(report.groups_committed, 2);
    assert_eq!(
        fs::read_to_string(harness.repo_dir.join("test.txt")).unwrap(),
        "Tharee"
    );

    let messages: Vec<String> = engine
        .vcs()
        .actions()
        .iter()
        .filter_map(|action| match action {
            VcsAction::Commit { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(messages, vec!["Initial commit.", "Corrected Mr. Owl's typos."]);
}

#[test]
fn test_what_if_and_live_logs_match() {
    let harness = BackupTreeHarness::new();
    three_versions(&harness);
    let csv = harness.write_step_one("step-1-files-changed.csv").unwrap();
    annotate_three_versions(&harness, &csv);

    let mut what_if_log = ActionLog::in_memory();
    harness.engine(false).run_file(&csv, &mut what_if_log).unwrap();
    assert!(!harness.repo_dir.join("test.txt").exists());

    let mut live_log = ActionLog::in_memory();
    harness.engine(true).run_file(&csv, &mut live_log).unwrap();

    let without_mode = |log: &ActionLog| -> Vec<String> {
        log.entries()
            .iter()
            .filter(|line| !line.starts_with("MODE:"))
            .cloned()
            .collect()
    };
    assert_eq!(without_mode(&what_if_log), without_mode(&live_log));
    assert_ne!(what_if_log.entries(), live_log.entries());
}

#[test]
fn test_replay_twice_adds_once() {
    let harness = BackupTreeHarness::new();
    harness.backup("a.txt", "20211001_083010", "a1");
    harness.backup("b.txt", "20211001_083010", "b1");
    harness.backup("a.txt", "20211002_083010", "a2");
    let csv = harness.write_step_one("changes.csv").unwrap();

    let mut first = harness.engine(true);
    first.run_file(&csv, &mut ActionLog::in_memory()).unwrap();
    assert_eq!(first.vcs().adds(), 2);

    let mut second = harness.engine(true);
    second.run_file(&csv, &mut ActionLog::in_memory()).unwrap();
    assert_eq!(second.vcs().adds(), 0);
    assert_eq!(second.vcs().commits(), 2);
}

#[test]
fn test_forced_review_row_is_replayed() {
    let harness = BackupTreeHarness::new();
    three_versions(&harness);
    let csv = harness.write_step_one("changes.csv").unwrap();
    harness
        .edit_csv(&csv, |row| {
            if row.datetime_tag == "20211101_093011" {
                row.skip_y = "N".to_string();
                row.commit_message = "Kept.".to_string();
            }
        })
        .unwrap();

    let rows = read_annotations(&csv).unwrap();
    let groups = commit_groups(&rows);
    assert_eq!(groups.len(), 3);
    assert_eq!(groups[1].message().unwrap(), "Kept.");
}

#[test]
fn test_import_prior_work_after_rescan() {
    let harness = BackupTreeHarness::new();
    three_versions(&harness);
    let first = harness.write_step_one("first.csv").unwrap();
    annotate_three_versions(&harness, &first);

    harness.backup("test.txt", "20220101_080000", "Fourth");
    let second = harness.write_step_one("second.csv").unwrap();

    let report = import_prior_work(&first, &second).unwrap();
    assert_eq!(report.output_path, merged_output_path(&second));
    assert_eq!(report.rows_matched, 3);
    assert!(report.unmatched_source_keys.is_empty());

    let rows = read_annotations(&report.output_path).unwrap();
    let records: Vec<&ChangeRecord> = rows.iter().filter_map(AnnotatedRow::as_change).collect();
    assert_eq!(records.len(), 4);
    assert_eq!(records[0].commit_message, "Initial commit.");
    assert!(records[1].skip_flag.is_skip());
    assert!(records[3].commit_message.is_empty());

    // A second import would overwrite the merged file.
    assert!(matches!(
        import_prior_work(&first, &second),
        Err(BakError::AlreadyExists(_))
    ));
}

#[test]
fn test_filter_applied_during_replay() {
    let harness = BackupTreeHarness::new();
    harness.backup("notes.txt", "20211001_083010", "by me (me@example.com)\nok\n");
    let csv = harness.write_step_one("changes.csv").unwrap();

    let filters = harness.temp_dir.path().join("filters.txt");
    fs::write(&filters, "# strip address\n\" (me@example.com)\", \"\"\n").unwrap();

    let mut engine = ReplayBuilder::new(&harness.repo_dir)
        .do_commit(true)
        .filter_file(&filters)
        .build_with(RecordingVcs::new(GitVcs::new(&harness.repo_dir)))
        .unwrap();
    let mut log = ActionLog::in_memory();
    let report = engine.run_file(&csv, &mut log).unwrap();

    assert_eq!(report.filter_hits, 1);
    assert_eq!(
        fs::read_to_string(harness.repo_dir.join("notes.txt")).unwrap(),
        "by me\nok\n"
    );
    assert!(log.entries().iter().any(|line| line.starts_with("FILTER ")));
}

#[test]
fn test_replayed_content_has_plain_quotes() {
    let harness = BackupTreeHarness::new();
    harness.backup("quotes.txt", "20211001_083010", "say \u{201c}hi\u{201d} it\u{2019}s\n");
    let rows = harness.annotate().unwrap();

    let mut engine = harness.engine(true);
    let report = engine.run(&rows, &mut ActionLog::in_memory()).unwrap();

    assert_eq!(report.files_copied, 1);
    assert_eq!(report.filter_hits, 0);
    assert_eq!(
        fs::read_to_string(harness.repo_dir.join("quotes.txt")).unwrap(),
        "say \"hi\" it's\n"
    );
}

#[test]
fn test_random_histories_keep_every_change() {
    let harness = BackupTreeHarness::new();
    let mut generator = FileGenerator::new(42);
    let mut expected = 0;

    for name in ["a.txt", "b.md", "c.rs"] {
        let mut previous: Option<String> = None;
        for tag in generator.tags(12) {
            let content = generator.content();
            if previous.as_deref() != Some(content.as_str()) {
                expected += 1;
            }
            harness.backup(name, &tag, &content);
            previous = Some(content);
        }
    }

    let rows = harness.annotate().unwrap();
    let records = rows.iter().filter_map(AnnotatedRow::as_change).count();
    assert_eq!(records, expected);
}

#[derive(Default)]
struct CountingDiff {
    launches: usize,
}

impl DiffLauncher for CountingDiff {
    fn launch(&mut self, _left: &Path, _right: &Path) -> Result<()> {
        self.launches += 1;
        Ok(())
    }
}

struct AlwaysContinue;

impl AnswerSource for AlwaysContinue {
    fn ask(&mut self, _record: &ChangeRecord) -> Result<ReviewAnswer> {
        Ok(ReviewAnswer::Continue)
    }
}

#[test]
fn test_review_of_annotated_csv() {
    let harness = BackupTreeHarness::new();
    three_versions(&harness);
    let csv = harness.write_step_one("changes.csv").unwrap();
    harness
        .edit_csv(&csv, |row| {
            if row.datetime_tag == "20211001_083010" {
                row.commit_message = "Initial commit.".to_string();
            }
        })
        .unwrap();
    let rows = read_annotations(&csv).unwrap();

    let mut diff = CountingDiff::default();
    let outcome = run_review(&rows, &mut diff, &mut AlwaysContinue, None).unwrap();

    assert_eq!(outcome.already_reviewed, 1);
    assert_eq!(outcome.compared, 2);
    assert_eq!(outcome.unexpected, 0);
    assert_eq!(diff.launches, 2);

    let counts = ProgressCounts::from_rows(&rows);
    assert_eq!(counts.rows, 3);
    assert_eq!(counts.commits, 1);
    assert_eq!(counts.remaining(), 2);
}
