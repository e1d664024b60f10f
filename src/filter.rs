//! String replacement filter applied while copying backups
//!
//! A filter list is a small text file of `old, new` pairs, one per line:
//!
//! ```text
//! # Remove the address I was using at the time.
//! "(someone@example.com)", ""
//! "someone@example.com", "someone"
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. Both sides have their
//! outer quotes stripped. Every pair is applied to every line of the file, in
//! list order.
//!
//! Copies also replace typographic quotes with plain ones, whether or not the
//! list has pairs. Pairs are matched against the normalized line.

use crate::error::{BakError, Result};
use crate::text::{plain_quotes, strip_outer_quotes};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// One `old, new` replacement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterItem {
    /// Text to find
    pub old: String,
    /// Replacement text
    pub new: String,
}

impl fmt::Display for FilterItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "('{}', '{}')", self.old, self.new)
    }
}

/// One replacement that fired during a copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterHit {
    /// 1-based line number in the source file
    pub line: usize,
    /// The pair that matched
    pub item: FilterItem,
}

/// Ordered list of replacements
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterList {
    items: Vec<FilterItem>,
}

impl FilterList {
    /// An empty list; copies only normalize quotes
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a filter list file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(BakError::FileNotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        let list = Self::parse(&text, path)?;
        debug!("Loaded {} filter items from {:?}", list.items.len(), path);
        Ok(list)
    }

    /// Parse filter list text; `path` is only used in error messages
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let mut items = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let s = line.trim();
            if s.is_empty() || s.starts_with('#') {
                continue;
            }
            let invalid = || BakError::InvalidFilterLine {
                path: path.to_path_buf(),
                line: index + 1,
                text: line.to_string(),
            };

            let parts: Vec<&str> = s.split(',').collect();
            if parts.len() != 2 {
                return Err(invalid());
            }
            let old = plain_quotes(&strip_outer_quotes(parts[0]));
            if old.is_empty() {
                return Err(invalid());
            }
            items.push(FilterItem {
                old,
                new: strip_outer_quotes(parts[1]),
            });
        }
        Ok(Self { items })
    }

    /// Replacement pairs in order
    pub fn items(&self) -> &[FilterItem] {
        &self.items
    }

    /// Whether the list has no pairs
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Apply every pair to one line, returning the new line and the pairs
    /// that matched
    pub fn apply_line<'a>(&'a self, line: &str) -> (String, Vec<&'a FilterItem>) {
        let mut out = line.to_string();
        let mut matched = Vec::new();
        for item in &self.items {
            if out.contains(&item.old) {
                out = out.replace(&item.old, &item.new);
                matched.push(item);
            }
        }
        (out, matched)
    }

    /// Copy `src` to `dst`, normalizing quotes and applying the list line
    /// by line
    ///
    /// Line endings are preserved. Only list replacements are reported as
    /// hits. When the source is not UTF-8 text the bytes are copied
    /// unchanged.
    pub fn copy_filtered(&self, src: &Path, dst: &Path) -> Result<Vec<FilterHit>> {
        let (content, hits) = self.filter_bytes(src, fs::read(src)?);
        fs::write(dst, content)?;
        Ok(hits)
    }

    /// Replacements [`copy_filtered`](Self::copy_filtered) would make,
    /// without writing anything
    pub fn preview_hits(&self, src: &Path) -> Result<Vec<FilterHit>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.filter_bytes(src, fs::read(src)?).1)
    }

    fn filter_bytes(&self, src: &Path, bytes: Vec<u8>) -> (Vec<u8>, Vec<FilterHit>) {
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                if self.is_empty() {
                    debug!("Copying {:?} unchanged: content is not UTF-8", src);
                } else {
                    warn!("Not filtering {:?}: content is not UTF-8", src);
                }
                return (e.into_bytes(), Vec::new());
            }
        };

        let mut hits = Vec::new();
        let mut out = String::with_capacity(text.len());
        for (index, line) in text.split_inclusive('\n').enumerate() {
            let (filtered, matched) = self.apply_line(&plain_quotes(line));
            hits.extend(matched.into_iter().map(|item| FilterHit {
                line: index + 1,
                item: item.clone(),
            }));
            out.push_str(&filtered);
        }
        (out.into_bytes(), hits)
    }
}
