//! The annotation file
//!
//! The annotation file is the CSV contract between the scan step and the
//! replay step. The scan step writes it, a human fills in the `SKIP_Y`,
//! `COMMIT_MESSAGE`, `ADD_COMMAND` and `NOTES` columns in a spreadsheet, and
//! the replay step reads it back.
//!
//! ## Columns
//!
//! ```text
//! row,sort_key,full_name,prev_full_name,datetime_tag,base_name,SKIP_Y,COMMIT_MESSAGE,ADD_COMMAND,NOTES
//! ```
//!
//! Files written by older versions of the tool lack `row`, `ADD_COMMAND` and
//! `NOTES`. They are read with those columns empty and the row number taken
//! from the position in the file. Unknown extra columns are ignored.
//!
//! A row whose `sort_key` and `full_name` are both empty is a separator.
//!
//! ## Importing Prior Work
//!
//! [`import_prior_work`] copies the human-entered columns from a previously
//! annotated file into a freshly generated one, matching rows by sort key.
//! It works on the raw column text so that nothing typed by hand is
//! reformatted on the way through.

use crate::error::{BakError, Result};
use crate::timestamp::TimestampTag;
use crate::types::{AnnotatedRow, AuxCommand, ChangeRecord, SkipFlag};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Column names in the order they are written
pub const HEADER: [&str; 10] = [
    "row",
    "sort_key",
    "full_name",
    "prev_full_name",
    "datetime_tag",
    "base_name",
    "SKIP_Y",
    "COMMIT_MESSAGE",
    "ADD_COMMAND",
    "NOTES",
];

/// Suffix appended to the target file stem by [`import_prior_work`]
pub const MERGED_SUFFIX: &str = "-with-prior-imported";

/// One row exactly as it appears in the file
///
/// Every column defaults to empty so that older, narrower files load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    /// 1-based row number
    #[serde(default)]
    pub row: String,
    /// `<tag>:<logical id>`; empty on separators
    #[serde(default)]
    pub sort_key: String,
    /// Absolute path of the backup
    #[serde(default)]
    pub full_name: String,
    /// Path of the last retained earlier backup, if any
    #[serde(default)]
    pub prev_full_name: String,
    /// Timestamp tag
    #[serde(default)]
    pub datetime_tag: String,
    /// Logical id
    #[serde(default)]
    pub base_name: String,
    /// `Y` to skip, `N` to force review
    #[serde(rename = "SKIP_Y", default)]
    pub skip_y: String,
    /// Message fragment for the group's commit
    #[serde(rename = "COMMIT_MESSAGE", default)]
    pub commit_message: String,
    /// `pre:`, `post:` or `rename:` command
    #[serde(rename = "ADD_COMMAND", default)]
    pub add_command: String,
    /// Free text, never interpreted
    #[serde(rename = "NOTES", default)]
    pub notes: String,
}

impl RawRow {
    /// Whether this row separates two timestamp groups
    pub fn is_separator(&self) -> bool {
        self.sort_key.trim().is_empty() && self.full_name.trim().is_empty()
    }

    fn from_annotated(row: &AnnotatedRow) -> Self {
        match row {
            AnnotatedRow::Separator { row_number } => RawRow {
                row: row_number.to_string(),
                ..RawRow::default()
            },
            AnnotatedRow::Change(record) => RawRow {
                row: record.row_number.to_string(),
                sort_key: record.sort_key.clone(),
                full_name: path_text(&record.current_path),
                prev_full_name: record.previous_path.as_deref().map(path_text).unwrap_or_default(),
                datetime_tag: record.timestamp_tag.to_string(),
                base_name: record.logical_id.clone(),
                skip_y: record.skip_flag.to_string(),
                commit_message: record.commit_message.clone(),
                add_command: record.aux_command.to_string(),
                notes: record.notes.clone(),
            },
        }
    }

    /// Decode into an [`AnnotatedRow`]
    ///
    /// `position` is the 1-based data row index, used when the `row` column
    /// is absent or blank.
    fn decode(self, position: usize) -> Result<AnnotatedRow> {
        let row_number = match self.row.trim() {
            "" => position,
            text => text
                .parse::<usize>()
                .map_err(|_| BakError::row(position, format!("row number '{}' is not a number", text)))?,
        };

        if self.is_separator() {
            return Ok(AnnotatedRow::Separator { row_number });
        }
        if self.sort_key.trim().is_empty() {
            return Err(BakError::row(row_number, "missing sort_key"));
        }
        if self.base_name.trim().is_empty() {
            return Err(BakError::row(row_number, "missing base_name"));
        }

        let timestamp_tag = TimestampTag::parse(self.datetime_tag.trim())?;
        let previous = self.prev_full_name.trim();

        Ok(AnnotatedRow::Change(ChangeRecord {
            row_number,
            sort_key: self.sort_key.trim().to_string(),
            timestamp_tag,
            logical_id: self.base_name.trim().to_string(),
            current_path: PathBuf::from(self.full_name.trim()),
            previous_path: if previous.is_empty() {
                None
            } else {
                Some(PathBuf::from(previous))
            },
            skip_flag: SkipFlag::parse(&self.skip_y),
            commit_message: self.commit_message,
            aux_command: AuxCommand::parse(&self.add_command)?,
            notes: self.notes,
        }))
    }
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Read raw rows from any reader
pub fn read_raw_rows<R: Read>(reader: R) -> Result<Vec<RawRow>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let mut rows = Vec::new();
    for result in csv_reader.deserialize() {
        rows.push(result?);
    }
    Ok(rows)
}

/// Decode annotation rows from any reader
pub fn read_rows<R: Read>(reader: R) -> Result<Vec<AnnotatedRow>> {
    read_raw_rows(reader)?
        .into_iter()
        .enumerate()
        .map(|(index, raw)| raw.decode(index + 1))
        .collect()
}

/// Load an annotation file
///
/// # Errors
///
/// - [`BakError::FileNotFound`] if the file does not exist
/// - [`BakError::Csv`] for malformed CSV
/// - [`BakError::InvalidRow`], [`BakError::InvalidTimestampTag`] or
///   [`BakError::InvalidAuxCommand`] for a row that cannot be decoded
pub fn read_annotations(path: &Path) -> Result<Vec<AnnotatedRow>> {
    let file = open_existing(path)?;
    let rows = read_rows(file)?;
    info!("Loaded {} rows from {:?}", rows.len(), path);
    Ok(rows)
}

/// Write raw rows with the full header to any writer
pub fn write_raw_rows<W: Write>(writer: W, rows: &[RawRow]) -> Result<()> {
    // Header written explicitly so an empty file still carries it.
    let mut csv_writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    csv_writer.write_record(HEADER)?;
    for row in rows {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Write annotation rows to any writer
pub fn write_rows<W: Write>(writer: W, rows: &[AnnotatedRow]) -> Result<()> {
    let raw: Vec<RawRow> = rows.iter().map(RawRow::from_annotated).collect();
    write_raw_rows(writer, &raw)
}

/// Write a new annotation file, refusing to overwrite an existing one
pub fn write_annotations(path: &Path, rows: &[AnnotatedRow]) -> Result<()> {
    let file = create_new(path)?;
    write_rows(file, rows)?;
    info!("Wrote {} rows to {:?}", rows.len(), path);
    Ok(())
}

/// Outcome of [`import_prior_work`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// File that was written
    pub output_path: PathBuf,
    /// Target rows that had a matching source row
    pub rows_matched: usize,
    /// Non-empty fields copied from source to target
    pub fields_copied: usize,
    /// Source sort keys that do not appear in the target
    pub unmatched_source_keys: Vec<String>,
}

/// Output path used by [`import_prior_work`] for a given target
pub fn merged_output_path(target: &Path) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!("{}{}.csv", stem, MERGED_SUFFIX))
}

/// Copy annotations from a previously edited file into a regenerated one
///
/// The result is written to `<target-stem>-with-prior-imported.csv` next to
/// the target; neither input is modified.
///
/// # Errors
///
/// - [`BakError::AlreadyExists`] if the output file exists
/// - [`BakError::DuplicateSortKey`] if a sort key occurs twice in the source
/// - [`BakError::AnnotationConflict`] if a non-empty source field would
///   replace a non-empty target field
pub fn import_prior_work(source: &Path, target: &Path) -> Result<MergeReport> {
    let output_path = merged_output_path(target);
    if output_path.exists() {
        return Err(BakError::AlreadyExists(output_path));
    }

    let source_rows = read_raw_rows(open_existing(source)?)?;
    let mut target_rows = read_raw_rows(open_existing(target)?)?;

    let mut report = merge_rows(&source_rows, &mut target_rows)?;

    write_raw_rows(create_new(&output_path)?, &target_rows)?;
    info!(
        "Imported {} fields into {} rows, wrote {:?}",
        report.fields_copied, report.rows_matched, output_path
    );
    report.output_path = output_path;
    Ok(report)
}

/// Merge annotation columns from `source` into `target` in memory
///
/// Rows are matched by sort key. Target rows without `row` numbers get their
/// position, so the written file always carries the column.
pub fn merge_rows(source: &[RawRow], target: &mut [RawRow]) -> Result<MergeReport> {
    let mut by_key: HashMap<&str, &RawRow> = HashMap::new();
    for row in source.iter().filter(|r| !r.is_separator()) {
        if by_key.insert(row.sort_key.trim(), row).is_some() {
            return Err(BakError::DuplicateSortKey(row.sort_key.trim().to_string()));
        }
    }

    let mut report = MergeReport::default();
    let mut matched_keys = HashSet::new();

    for (index, row) in target.iter_mut().enumerate() {
        if row.row.trim().is_empty() {
            row.row = (index + 1).to_string();
        }
        if row.is_separator() {
            continue;
        }
        let key = row.sort_key.trim().to_string();
        let Some(prior) = by_key.get(key.as_str()) else {
            continue;
        };

        report.rows_matched += 1;
        matched_keys.insert(key.clone());

        let pairs: [(&'static str, &String, &mut String); 4] = [
            ("SKIP_Y", &prior.skip_y, &mut row.skip_y),
            ("COMMIT_MESSAGE", &prior.commit_message, &mut row.commit_message),
            ("ADD_COMMAND", &prior.add_command, &mut row.add_command),
            ("NOTES", &prior.notes, &mut row.notes),
        ];
        for (field, from, to) in pairs {
            if from.trim().is_empty() {
                continue;
            }
            if !to.trim().is_empty() {
                return Err(BakError::AnnotationConflict {
                    sort_key: key.clone(),
                    field,
                    existing: to.clone(),
                });
            }
            *to = from.clone();
            report.fields_copied += 1;
        }
        debug!("Imported annotations for {}", key);
    }

    let mut unmatched: Vec<String> = by_key
        .keys()
        .filter(|k| !matched_keys.contains(**k))
        .map(|k| k.to_string())
        .collect();
    unmatched.sort();
    for key in &unmatched {
        warn!("Prior annotation has no matching row: {}", key);
    }
    report.unmatched_source_keys = unmatched;

    Ok(report)
}

fn open_existing(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => BakError::FileNotFound(path.to_path_buf()),
        _ => BakError::Io(e),
    })
}

fn create_new(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => BakError::AlreadyExists(path.to_path_buf()),
            _ => BakError::Io(e),
        })
}
