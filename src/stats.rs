//! Review progress statistics
//!
//! Reviewing a long annotation file takes many sittings. The review session
//! appends a small event log (one line per session start, stop, and human
//! action) so that a report can estimate how much review time is left.
//!
//! ## File Format
//!
//! ```text
//! TYPE,TIME,SOURCE,ACT
//! "S","2021-12-11 10:00:00","input.csv","start"
//! "A","2021-12-11 10:00:10","","compare"
//! "S","2021-12-11 10:05:00","","stop"
//! ```
//!
//! ## Estimates
//!
//! Durations are measured between consecutive events after a session start.
//! The median uses every duration (the higher middle value for even counts);
//! the mean leaves out durations of five minutes or more, which are assumed
//! to be breaks.

use crate::error::{BakError, Result};
use crate::types::AnnotatedRow;
use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Time format used in the event log
pub const STATS_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Durations at or above this many seconds are left out of the mean
pub const OUTLIER_SECS: i64 = 5 * 60;

const STATS_HEADER: &str = "TYPE,TIME,SOURCE,ACT";

/// Kind of progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    /// Session start or stop (`S`)
    Session,
    /// Human action (`A`)
    Action,
}

impl EventKind {
    fn code(&self) -> &'static str {
        match self {
            EventKind::Session => "S",
            EventKind::Action => "A",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "S" => Some(EventKind::Session),
            "A" => Some(EventKind::Action),
            _ => None,
        }
    }
}

/// One line of the event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// Event kind
    pub kind: EventKind,
    /// Local time of the event
    pub time: NaiveDateTime,
    /// Annotation file, on session start
    pub source: String,
    /// What happened
    pub act: String,
}

/// Buffered writer for the event log
#[derive(Debug)]
pub struct ProgressLog {
    path: PathBuf,
    pending: Vec<ProgressEvent>,
    save_immediate: bool,
}

impl ProgressLog {
    /// Create a log writing to `path`
    ///
    /// The parent directory must exist; the file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(BakError::DirectoryNotFound(parent.to_path_buf()));
            }
        }
        Ok(Self {
            path,
            pending: Vec::new(),
            save_immediate: false,
        })
    }

    /// Save after every event instead of on [`save`](Self::save)
    pub fn with_save_immediate(mut self, immediate: bool) -> Self {
        self.save_immediate = immediate;
        self
    }

    /// Events not yet saved
    pub fn pending(&self) -> &[ProgressEvent] {
        &self.pending
    }

    /// Record a session start for `source`
    pub fn start_session(&mut self, source: &Path) -> Result<()> {
        self.start_session_at(source, now())
    }

    /// Record a session start at a given time
    pub fn start_session_at(&mut self, source: &Path, time: NaiveDateTime) -> Result<()> {
        self.push(EventKind::Session, time, source.display().to_string(), "start")
    }

    /// Record a session stop
    pub fn stop_session(&mut self) -> Result<()> {
        self.stop_session_at(now())
    }

    /// Record a session stop at a given time
    pub fn stop_session_at(&mut self, time: NaiveDateTime) -> Result<()> {
        self.push(EventKind::Session, time, String::new(), "stop")
    }

    /// Record a human action
    pub fn log_act(&mut self, act: &str) -> Result<()> {
        self.log_act_at(act, now())
    }

    /// Record a human action at a given time
    pub fn log_act_at(&mut self, act: &str, time: NaiveDateTime) -> Result<()> {
        self.push(EventKind::Action, time, String::new(), act)
    }

    fn push(&mut self, kind: EventKind, time: NaiveDateTime, source: String, act: &str) -> Result<()> {
        self.pending.push(ProgressEvent {
            kind,
            time,
            source,
            act: act.to_string(),
        });
        if self.save_immediate {
            self.save()?;
        }
        Ok(())
    }

    /// Append pending events, writing the header if the file is new
    pub fn save(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let is_new = !self.path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        if is_new {
            writeln!(file, "{}", STATS_HEADER)?;
        }

        let mut writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Always)
            .from_writer(file);
        for event in &self.pending {
            let time = event.time.format(STATS_TIME_FORMAT).to_string();
            writer.write_record([event.kind.code(), time.as_str(), event.source.as_str(), event.act.as_str()])?;
        }
        writer.flush()?;

        debug!("Saved {} progress events to {:?}", self.pending.len(), self.path);
        self.pending.clear();
        Ok(())
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Events read from a log, plus messages about lines that were not understood
#[derive(Debug, Clone, Default)]
pub struct LoadedEvents {
    /// Parsed events in file order
    pub events: Vec<ProgressEvent>,
    /// One message per malformed line
    pub messages: Vec<String>,
}

/// Parse event log text
///
/// Lines with four fields and an `S` or `A` type become events. The header
/// and other four-field lines are ignored. Anything else produces a message
/// rather than an error.
pub fn parse_events(text: &str) -> LoadedEvents {
    let mut loaded = LoadedEvents::default();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    for (index, record) in reader.records().enumerate() {
        let number = index + 1;
        let record = match record {
            Ok(record) if record.len() == 4 => record,
            _ => {
                loaded.messages.push(format!("ERROR: Invalid format in row {}.", number));
                continue;
            }
        };
        let Some(kind) = EventKind::from_code(record[0].trim()) else {
            continue;
        };
        match NaiveDateTime::parse_from_str(record[1].trim(), STATS_TIME_FORMAT) {
            Ok(time) => loaded.events.push(ProgressEvent {
                kind,
                time,
                source: record[2].to_string(),
                act: record[3].to_string(),
            }),
            Err(_) => loaded
                .messages
                .push(format!("ERROR: Invalid time in row {}.", number)),
        }
    }
    loaded
}

/// Load an event log file
pub fn load_events(path: &Path) -> Result<LoadedEvents> {
    if !path.is_file() {
        return Err(BakError::FileNotFound(path.to_path_buf()));
    }
    Ok(parse_events(&std::fs::read_to_string(path)?))
}

/// Summary of action durations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DurationStats {
    /// Number of durations measured
    pub count: usize,
    /// Whole seconds, outliers excluded
    pub mean_secs: i64,
    /// Whole seconds, higher middle value
    pub median_secs: i64,
    /// Durations left out of the mean
    pub outliers: usize,
}

/// Measure the time between consecutive events
///
/// Returns `None` when there is no action after a session start.
pub fn duration_stats(events: &[ProgressEvent]) -> Option<DurationStats> {
    let mut durations = Vec::new();
    let mut last: Option<NaiveDateTime> = None;
    for event in events {
        match event.kind {
            EventKind::Session => last = Some(event.time),
            EventKind::Action => {
                if let Some(previous) = last {
                    durations.push((event.time - previous).num_seconds());
                }
                last = Some(event.time);
            }
        }
    }
    if durations.is_empty() {
        return None;
    }

    let kept: Vec<i64> = durations.iter().copied().filter(|d| *d < OUTLIER_SECS).collect();
    let outliers = durations.len() - kept.len();
    let mean_secs = if kept.is_empty() {
        0
    } else {
        kept.iter().sum::<i64>() / kept.len() as i64
    };

    let mut sorted = durations.clone();
    sorted.sort_unstable();
    let median_secs = sorted[sorted.len() / 2];

    Some(DurationStats {
        count: durations.len(),
        mean_secs,
        median_secs,
        outliers,
    })
}

/// Row counts from an annotation file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressCounts {
    /// Change rows
    pub rows: usize,
    /// Rows with a commit message
    pub commits: usize,
    /// Rows flagged `SKIP_Y = Y`
    pub skips: usize,
}

impl ProgressCounts {
    /// Count rows; a skipped row counts as a skip even if it has a message
    pub fn from_rows(rows: &[AnnotatedRow]) -> Self {
        let mut counts = Self::default();
        for record in rows.iter().filter_map(AnnotatedRow::as_change) {
            counts.rows += 1;
            if record.skip_flag.is_skip() {
                counts.skips += 1;
            } else if record.has_message() {
                counts.commits += 1;
            }
        }
        counts
    }

    /// Rows reviewed so far
    pub fn done(&self) -> usize {
        self.commits + self.skips
    }

    /// Rows still to review
    pub fn remaining(&self) -> usize {
        self.rows.saturating_sub(self.done())
    }
}

fn estimate(secs_per_item: i64, items: usize) -> String {
    let total = secs_per_item.max(0) as u64 * items as u64;
    humantime::format_duration(Duration::from_secs(total)).to_string()
}

/// Render the progress report
pub fn progress_report(counts: &ProgressCounts, loaded: &LoadedEvents) -> String {
    let mut messages = loaded.messages.clone();
    let mut lines = vec![String::new(), format!("{:>43}", "PROGRESS REPORT")];

    let done = counts.done();
    let todo = counts.remaining();
    let pct = if counts.rows > 0 && done > 0 {
        format!("{:.0}%", done as f64 * 100.0 / counts.rows as f64)
    } else {
        "(?)".to_string()
    };

    lines.push(format!("{:>42}: {}", "Total", counts.rows));
    lines.push(format!(
        "{:>42}: {}  (Commit: {}, Skip: {})",
        "Completed", done, counts.commits, counts.skips
    ));
    lines.push(format!("{:>42}: {}", "Remaining", todo));
    lines.push(format!("{:>42}: {}", "% Complete", pct));
    lines.push(String::new());

    if let Some(stats) = duration_stats(&loaded.events) {
        if stats.outliers > 0 {
            messages.push(format!("NOTE: Outliers removed from mean = {}.", stats.outliers));
        }
        if todo > 0 {
            lines.push(format!("{:>42}: {}", "Number of data points", stats.count));
            lines.push(format!("{:>42}: {}", "Mean seconds per item", stats.mean_secs));
            lines.push(format!(
                "{:>42}: {}",
                "Estimated time remaining based on mean",
                estimate(stats.mean_secs, todo)
            ));
            lines.push(format!("{:>42}: {}", "Median seconds per item", stats.median_secs));
            lines.push(format!(
                "{:>42}: {}",
                "Estimated time remaining based on median",
                estimate(stats.median_secs, todo)
            ));
            lines.push(String::new());
        }
    }

    if !messages.is_empty() {
        lines.push("Messages:".to_string());
        lines.extend(messages);
        lines.push(String::new());
    }
    lines.join("\n")
}
