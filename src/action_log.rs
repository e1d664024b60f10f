//! Replay audit trail
//!
//! Every action the replay engine plans or performs is written here, in both
//! what-if and live mode. Lines go to three places:
//!
//! - an append-only text file, each line prefixed with `[yyyymmdd_hhmmss]`
//! - a `tracing` event at INFO level
//! - an in-memory list, without the time prefix, so runs can be compared
//!
//! The file is opened in append mode; a log is never truncated.

use crate::error::Result;
use crate::timestamp::now_tag;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Default log file name for a run started at `runstamp`
pub fn default_log_name(runstamp: &str) -> String {
    format!("log-bak-to-git-{}.txt", runstamp)
}

/// Append-only action log
#[derive(Debug, Default)]
pub struct ActionLog {
    file: Option<File>,
    path: Option<PathBuf>,
    entries: Vec<String>,
}

impl ActionLog {
    /// A log kept only in memory and in tracing output
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A log that also appends to `path`
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some(file),
            path: Some(path.to_path_buf()),
            entries: Vec::new(),
        })
    }

    /// Record one line
    pub fn write(&mut self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        info!("{}", message);
        if let Some(file) = &mut self.file {
            writeln!(file, "[{}] {}", now_tag(), message)?;
        }
        self.entries.push(message);
        Ok(())
    }

    /// Lines recorded so far, without time prefixes
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
