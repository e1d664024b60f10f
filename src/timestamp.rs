//! Timestamp tags embedded in backup file names
//!
//! The external backup script names every copy `<name>.<yyyymmdd_hhmmss>.bak`.
//! The 15-character tag is the only source of time information in the whole
//! pipeline: it orders snapshots, groups them into commits, and is turned back
//! into the author and committer dates handed to the VCS.
//!
//! Because the tag is fixed-width and zero-padded, lexicographic order is
//! chronological order, so [`TimestampTag`] simply orders by its string.

use crate::error::{BakError, Result};
use chrono::{Duration, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

/// Format of the tag itself
pub const TAG_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Format used for VCS date overrides (ISO 8601 without zone)
pub const VCS_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Seconds the author date precedes the commit date
pub const AUTHOR_OFFSET_SECS: i64 = 5;

/// Length of a valid tag
pub const TAG_LEN: usize = 15;

/// A validated `yyyymmdd_hhmmss` tag
///
/// # Examples
///
/// ```rust
/// use bak_to_git::timestamp::TimestampTag;
///
/// let tag: TimestampTag = "20211001_083010".parse()?;
/// assert_eq!(tag.commit_dates().commit_string(), "2021-10-01T08:30:10");
/// assert_eq!(tag.commit_dates().author_string(), "2021-10-01T08:30:05");
/// assert!("2021-10-01".parse::<TimestampTag>().is_err());
/// # Ok::<(), bak_to_git::BakError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimestampTag(String);

impl TimestampTag {
    /// Parse and validate a tag
    ///
    /// The tag must be exactly 15 characters, eight digits, an underscore and
    /// six digits, and must name a real calendar date and time.
    pub fn parse(text: &str) -> Result<Self> {
        let bytes = text.as_bytes();
        let well_formed = bytes.len() == TAG_LEN
            && bytes[8] == b'_'
            && bytes[..8].iter().all(u8::is_ascii_digit)
            && bytes[9..].iter().all(u8::is_ascii_digit);

        if !well_formed || NaiveDateTime::parse_from_str(text, TAG_FORMAT).is_err() {
            return Err(BakError::InvalidTimestampTag(text.to_string()));
        }

        Ok(Self(text.to_string()))
    }

    /// The tag text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The tag as a naive (zone-less) date and time
    pub fn to_datetime(&self) -> NaiveDateTime {
        // Validated in `parse`, so the fallback is unreachable in practice.
        NaiveDateTime::parse_from_str(&self.0, TAG_FORMAT).unwrap_or_default()
    }

    /// Synthesized commit and author dates for this tag
    pub fn commit_dates(&self) -> CommitDates {
        CommitDates::from_commit(self.to_datetime())
    }
}

impl fmt::Display for TimestampTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TimestampTag {
    type Err = BakError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TimestampTag {
    type Error = BakError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TimestampTag> for String {
    fn from(tag: TimestampTag) -> Self {
        tag.0
    }
}

/// Author and committer dates for one commit group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDates {
    /// Author date, a few seconds before the commit date
    pub author: NaiveDateTime,
    /// Commit date, the exact time of the tag
    pub commit: NaiveDateTime,
}

impl CommitDates {
    /// Derive the author date from a commit date
    pub fn from_commit(commit: NaiveDateTime) -> Self {
        Self {
            author: commit - Duration::seconds(AUTHOR_OFFSET_SECS),
            commit,
        }
    }

    /// Commit date in VCS override format
    pub fn commit_string(&self) -> String {
        self.commit.format(VCS_DATE_FORMAT).to_string()
    }

    /// Author date in VCS override format
    pub fn author_string(&self) -> String {
        self.author.format(VCS_DATE_FORMAT).to_string()
    }

    /// Commit date interpreted in the local time zone, for file mtimes
    ///
    /// Falls back to UTC when the local time is ambiguous or skipped by a
    /// daylight saving transition.
    pub fn commit_system_time(&self) -> SystemTime {
        match Local.from_local_datetime(&self.commit).earliest() {
            Some(local) => local.into(),
            None => self.commit.and_utc().into(),
        }
    }
}

/// Parse an ISO `yyyy-mm-ddThh:mm:ss` string, as accepted by `--init-date`
pub fn parse_iso_datetime(text: &str) -> Result<NaiveDateTime> {
    if text.len() != 19 {
        return Err(BakError::config(format!("Invalid date string: '{}'", text)));
    }
    NaiveDateTime::parse_from_str(text, VCS_DATE_FORMAT)
        .map_err(|_| BakError::config(format!("Invalid date string: '{}'", text)))
}

/// Tag for the current local time, used to name run directories and logs
pub fn now_tag() -> String {
    Local::now().format(TAG_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_tag() {
        let tag = TimestampTag::parse("20211101_093011").unwrap();
        assert_eq!(tag.as_str(), "20211101_093011");
        assert_eq!(tag.to_string(), "20211101_093011");
    }

    #[test]
    fn test_parse_rejects_malformed_tags() {
        for bad in [
            "",
            "20211101093011",
            "20211101_09301",
            "20211101-093011",
            "2021110a_093011",
            "20211101_0930111",
            "20211301_093011", // month 13
            "20210230_093011", // Feb 30
        ] {
            assert!(TimestampTag::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_tag_order_is_chronological() {
        let a = TimestampTag::parse("20211001_083010").unwrap();
        let b = TimestampTag::parse("20211001_083011").unwrap();
        let c = TimestampTag::parse("20220101_000000").unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_commit_dates_offset() {
        let dates = TimestampTag::parse("20211201_000003").unwrap().commit_dates();
        assert_eq!(dates.commit_string(), "2021-12-01T00:00:03");
        // Crosses the day boundary.
        assert_eq!(dates.author_string(), "2021-11-30T23:59:58");
    }

    #[test]
    fn test_parse_iso_datetime() {
        let dt = parse_iso_datetime("2021-07-14T16:20:01").unwrap();
        assert_eq!(dt.format(TAG_FORMAT).to_string(), "20210714_162001");
        assert!(parse_iso_datetime("2021-07-14 16:20").is_err());
        assert!(parse_iso_datetime("2021-13-14T16:20:01").is_err());
    }

    #[test]
    fn test_serde_round_trip_validates() {
        let json = serde_json::to_string(&TimestampTag::parse("20211001_083010").unwrap()).unwrap();
        assert_eq!(json, "\"20211001_083010\"");
        assert!(serde_json::from_str::<TimestampTag>("\"nope\"").is_err());
    }
}
