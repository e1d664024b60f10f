//! Text helpers for hand-edited annotation values
//!
//! Annotation files are edited in spreadsheet programs that like to replace
//! plain quotes with typographic ones. These helpers normalize that text,
//! split quoted command strings into arguments, and format argument lists
//! for the action log.

/// Typographic single quotes replaced by `'`
const SINGLE_QUOTES: [char; 2] = ['\u{2018}', '\u{2019}'];

/// Typographic double quotes replaced by `"`
const DOUBLE_QUOTES: [char; 2] = ['\u{201c}', '\u{201d}'];

/// Replace left/right single and double quotes with `'` and `"`
pub fn plain_quotes(text: &str) -> String {
    text.chars()
        .map(|c| {
            if SINGLE_QUOTES.contains(&c) {
                '\''
            } else if DOUBLE_QUOTES.contains(&c) {
                '"'
            } else {
                c
            }
        })
        .collect()
}

/// Whether `c` is in the printable ASCII range (space through `~`)
pub fn is_printable_ascii(c: char) -> bool {
    (' '..='~').contains(&c)
}

/// Escape every character outside printable ASCII as `\u{xxxx}`
///
/// Returns `None` when the text is entirely printable ASCII.
pub fn escape_non_printable(text: &str) -> Option<String> {
    if text.chars().all(is_printable_ascii) {
        return None;
    }
    Some(
        text.chars()
            .map(|c| {
                if is_printable_ascii(c) {
                    c.to_string()
                } else {
                    format!("\\u{{{:04x}}}", c as u32)
                }
            })
            .collect(),
    )
}

/// Normalize one record's commit message
///
/// Trims, converts typographic quotes, and treats a single-character message
/// as empty: a lone character marks a row as reviewed while its message lives
/// on a sibling row of the same group.
pub fn normalize_message(raw: &str) -> String {
    let message = plain_quotes(raw.trim());
    if message.chars().count() == 1 {
        String::new()
    } else {
        message
    }
}

/// Split a command string into words, keeping quoted runs together
///
/// The first quote character found decides the quoting style: double quotes
/// (plain or typographic) or single quotes. Quotes of the other style inside a
/// quoted run are kept as literal text. Quotes are removed from the result.
/// Nested quoting is not supported.
///
/// # Examples
///
/// ```rust
/// use bak_to_git::text::split_quoted;
///
/// assert_eq!(split_quoted("a \"b c\" d"), vec!["a", "b c", "d"]);
/// assert_eq!(split_quoted("a 'b \"c d\"'"), vec!["a", "b \"c d\""]);
/// ```
pub fn split_quoted(text: &str) -> Vec<String> {
    let s = text.trim();

    let marks: &[char] = match s.chars().find(|c| *c == '"' || *c == '\'' || DOUBLE_QUOTES.contains(c)) {
        Some('\'') => &['\''],
        Some(_) => &['"', DOUBLE_QUOTES[0], DOUBLE_QUOTES[1]],
        None => return s.split_whitespace().map(str::to_string).collect(),
    };

    let mut result = Vec::new();
    let mut word = String::new();
    let mut in_quote = false;
    let mut quoted = false;

    for c in s.chars() {
        if marks.contains(&c) {
            in_quote = !in_quote;
            quoted = true;
        } else if c.is_whitespace() && !in_quote {
            if !word.is_empty() || quoted {
                result.push(std::mem::take(&mut word));
            }
            quoted = false;
        } else {
            word.push(c);
        }
    }
    if !word.is_empty() || quoted {
        result.push(word);
    }
    result
}

/// Remove surrounding whitespace and one style of outer quotes
pub fn strip_outer_quotes(text: &str) -> String {
    let s = text.trim();
    if s.starts_with('"') {
        s.trim_matches('"').to_string()
    } else if s.starts_with('\'') {
        s.trim_matches('\'').to_string()
    } else {
        s.to_string()
    }
}

/// Render an argument list for the log, quoting items that contain spaces
pub fn format_command_line<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(|item| {
            let item = item.as_ref();
            if item.contains(' ') {
                format!("\"{}\"", item)
            } else {
                item.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
