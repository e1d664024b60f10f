//! Grouping change records into commits
//!
//! This module turns the flat list of change records into the two ordered
//! structures the rest of the pipeline works with:
//!
//! - the **persisted layout** written to the annotation file: every timestamp
//!   group's records in sort key order followed by a blank separator row,
//!   with row numbers assigned across the whole file
//! - the **commit groups** used by replay: the non-skipped records of each
//!   tag, re-sorted by sort key regardless of the order found in the file
//!
//! ## Structure
//!
//! ```text
//! row 1  20211001_083010:a.txt   ┐ group 20211001_083010
//! row 2  20211001_083010:b.txt   ┘
//! row 3  (separator)
//! row 4  20211101_093011:a.txt   ] group 20211101_093011
//! row 5  (separator)
//! ```
//!
//! Both transforms are pure: the same input always yields the same output.

use crate::error::{BakError, Result};
use crate::text::{escape_non_printable, normalize_message, plain_quotes};
use crate::timestamp::{CommitDates, TimestampTag};
use crate::types::{AnnotatedRow, ChangeRecord};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Lay out records for the annotation file
///
/// Records are stably re-sorted by sort key, emitted tag by tag with a
/// separator after each tag, and numbered from 1.
pub fn group_records(mut records: Vec<ChangeRecord>) -> Vec<AnnotatedRow> {
    records.sort_by(|a, b| a.sort_key.cmp(&b.sort_key));

    let mut rows = Vec::with_capacity(records.len() * 2);
    let mut current_tag: Option<TimestampTag> = None;

    for record in records {
        if let Some(tag) = &current_tag {
            if *tag != record.timestamp_tag {
                rows.push(AnnotatedRow::Separator { row_number: 0 });
            }
        }
        current_tag = Some(record.timestamp_tag.clone());
        rows.push(AnnotatedRow::Change(record));
    }
    if current_tag.is_some() {
        rows.push(AnnotatedRow::Separator { row_number: 0 });
    }

    for (index, row) in rows.iter_mut().enumerate() {
        match row {
            AnnotatedRow::Separator { row_number } => *row_number = index + 1,
            AnnotatedRow::Change(record) => record.row_number = index + 1,
        }
    }

    debug!("Laid out {} rows", rows.len());
    rows
}

/// All non-skipped records sharing one timestamp tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitGroup {
    /// Shared timestamp tag
    pub tag: TimestampTag,
    /// Author and commit dates derived from the tag
    pub dates: CommitDates,
    /// Members in sort key order
    pub members: Vec<ChangeRecord>,
}

impl CommitGroup {
    /// Aggregated commit message for the group
    ///
    /// See [`aggregate_message`].
    pub fn message(&self) -> Result<String> {
        aggregate_message(&self.tag, &self.members)
    }
}

/// Build replay groups from annotation rows
///
/// Separators and rows flagged `SKIP_Y = Y` are dropped; the remainder is
/// re-sorted by sort key and grouped by tag in ascending order.
pub fn commit_groups<'a, I>(rows: I) -> Vec<CommitGroup>
where
    I: IntoIterator<Item = &'a AnnotatedRow>,
{
    let mut by_tag: BTreeMap<TimestampTag, Vec<ChangeRecord>> = BTreeMap::new();
    for record in rows.into_iter().filter_map(AnnotatedRow::as_change) {
        if record.skip_flag.is_skip() {
            debug!("Skipping {}", record.sort_key);
            continue;
        }
        by_tag
            .entry(record.timestamp_tag.clone())
            .or_default()
            .push(record.clone());
    }

    by_tag
        .into_iter()
        .map(|(tag, mut members)| {
            members.sort_by(|a, b| a.sort_key.cmp(&b.sort_key));
            CommitGroup {
                dates: tag.commit_dates(),
                tag,
                members,
            }
        })
        .collect()
}

/// Concatenate member messages into one commit message
///
/// Each message has its quotes normalized and is validated as printable
/// ASCII before single-character "ditto" messages are dropped. Kept messages
/// are terminated with `". "`, or `" "` if already ending with a period. The result is trimmed. A group with no
/// messages gets `"({tag})"`.
///
/// # Examples
///
/// ```rust
/// # use bak_to_git::grouping::aggregate_message;
/// # use bak_to_git::types::{BackupSnapshot, ChangeRecord};
/// # use std::path::Path;
/// # let snap = BackupSnapshot::from_path(Path::new("a.txt.20211001_083010.bak"))?;
/// let mut records = vec![ChangeRecord::new(&snap, None); 3];
/// records[0].commit_message = "Fix bug".to_string();
/// records[2].commit_message = "Add feature.".to_string();
///
/// assert_eq!(aggregate_message(&snap.timestamp_tag, &records)?, "Fix bug. Add feature.");
/// assert_eq!(aggregate_message(&snap.timestamp_tag, &[])?, "(20211001_083010)");
/// # Ok::<(), bak_to_git::BakError>(())
/// ```
pub fn aggregate_message(tag: &TimestampTag, members: &[ChangeRecord]) -> Result<String> {
    let mut message = String::new();

    for record in members {
        let cleaned = plain_quotes(record.commit_message.trim());
        if let Some(escaped) = escape_non_printable(&cleaned) {
            return Err(BakError::NonAsciiMessage {
                sort_key: record.sort_key.clone(),
                escaped,
            });
        }
        let fragment = normalize_message(&cleaned);
        if fragment.is_empty() {
            continue;
        }
        message.push_str(&fragment);
        if fragment.ends_with('.') {
            message.push(' ');
        } else {
            message.push_str(". ");
        }
    }

    let message = message.trim();
    if message.is_empty() {
        Ok(format!("({})", tag))
    } else {
        Ok(message.to_string())
    }
}
