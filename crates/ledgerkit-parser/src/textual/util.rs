//! Line splitting helpers shared by the directive handlers.

use regex::{Regex, RegexBuilder};

/// Split `s` at its first whitespace into `(head, rest)`.
///
/// With `variable`, a single space does not split: only a tab, two spaces,
/// or a trailing space does. This is how account names containing spaces
/// are told apart from the amount that follows them. `rest` has its leading
/// whitespace trimmed and is empty when there was nothing to split.
pub fn next_element(s: &str, variable: bool) -> (&str, &str) {
    let bytes = s.as_bytes();
    let mut start = 0;
    while let Some(offset) = s.get(start..).and_then(|t| t.find(|c: char| c == ' ' || c == '\t')) {
        let pos = start + offset;
        let splits = !variable
            || bytes[pos] == b'\t'
            || pos + 1 == bytes.len()
            || bytes[pos + 1] == b' ';
        if splits {
            return (&s[..pos], s[pos..].trim_start());
        }
        start = pos + 1;
    }
    (s, "")
}

/// Split `s` at the first `separator` into `(head, tail)`.
///
/// With `variable`, the separator only counts when it follows a tab or two
/// whitespace characters, so a payee may contain a `;` of its own. The head
/// has trailing whitespace trimmed.
pub fn split_by_separator(s: &str, separator: char, variable: bool) -> (&str, Option<&str>) {
    let bytes = s.as_bytes();
    let mut start = 0;
    while let Some(offset) = s.get(start..).and_then(|t| t.find(separator)) {
        let pos = start + offset;
        let splits = !variable
            || (pos > 2
                && (bytes[pos - 1] == b'\t'
                    || (bytes[pos - 2].is_ascii_whitespace() && bytes[pos - 1].is_ascii_whitespace())));
        if splits {
            return (s[..pos].trim_end(), Some(&s[pos + separator.len_utf8()..]));
        }
        start = pos + separator.len_utf8();
    }
    (s, None)
}

/// Compile a file name glob (`*`, `?`, `[set]`, `\x`) into an anchored,
/// case-insensitive regex.
pub fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::from("^");
    let mut chars = glob.chars();
    while let Some(c) = chars.next() {
        match c {
            '?' => pattern.push('.'),
            '*' => pattern.push_str(".*"),
            '[' => {
                pattern.push('[');
                for c in chars.by_ref() {
                    pattern.push(c);
                    if c == ']' {
                        break;
                    }
                }
            }
            '\\' => match chars.next() {
                Some(escaped) => pattern.push_str(&regex::escape(escaped.encode_utf8(&mut [0; 4]))),
                None => pattern.push_str(r"\\"),
            },
            other => pattern.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    pattern.push('$');
    RegexBuilder::new(&pattern).case_insensitive(true).build()
}
