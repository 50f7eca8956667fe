//! Per-file parsing state.

use std::path::{Path, PathBuf};

use ledgerkit_core::{AccountId, ItemPosition, TimeLog};

use crate::error::{ParseError, ParseWarning};
use crate::fs::FileSystem;
use crate::Span;

/// Reading position, counters and diagnostics for one file or string.
#[derive(Debug)]
pub struct ParseContext {
    /// Path of the source; a pseudo-path for in-memory input.
    pub path: PathBuf,
    source: String,
    /// Byte offset just past the last line read.
    pub curr_pos: usize,
    /// Byte offset of the start of the last line read.
    pub line_beg_pos: usize,
    /// 1-based number of the last line read.
    pub line_num: usize,
    /// Transactions added so far.
    pub count: usize,
    /// Next item sequence number.
    pub sequence: usize,
    /// Account relative to which names in this file are resolved.
    pub master: AccountId,
    /// Errors recovered from so far.
    pub errors: Vec<ParseError>,
    /// Warnings raised so far.
    pub warnings: Vec<ParseWarning>,
    pub(crate) error_flag: bool,
    pub(crate) timelog: TimeLog,
}

impl ParseContext {
    /// A context reading `source` as if it came from `path`.
    pub fn from_string(path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        let mut source = source.into();
        if source.starts_with('\u{feff}') {
            source.drain(..'\u{feff}'.len_utf8());
        }
        Self {
            path: path.into(),
            source,
            curr_pos: 0,
            line_beg_pos: 0,
            line_num: 0,
            count: 0,
            sequence: 1,
            master: AccountId::ROOT,
            errors: Vec::new(),
            warnings: Vec::new(),
            error_flag: false,
            timelog: TimeLog::new(),
        }
    }

    /// Open `path` through `fs`.
    pub fn open(path: &Path, fs: &dyn FileSystem) -> std::io::Result<Self> {
        let source = fs.read_to_string(path)?;
        Ok(Self::from_string(path, source))
    }

    /// The whole source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether every line has been read.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.curr_pos >= self.source.len()
    }

    /// Read the next line, trailing whitespace removed.
    pub fn read_line(&mut self) -> Option<String> {
        if self.is_eof() {
            return None;
        }
        self.line_beg_pos = self.curr_pos;
        let rest = &self.source[self.curr_pos..];
        let (line, consumed) = match rest.find('\n') {
            Some(end) => (&rest[..end], end + 1),
            None => (rest, rest.len()),
        };
        let line = line.trim_end().to_string();
        self.curr_pos += consumed;
        self.line_num += 1;
        Some(line)
    }

    /// Whether the next line starts with a space or tab.
    #[must_use]
    pub fn peek_whitespace_line(&self) -> bool {
        self.source
            .get(self.curr_pos..)
            .is_some_and(|rest| rest.starts_with(|c: char| c == ' ' || c == '\t'))
    }

    /// `"path", line N:` for the last line read.
    #[must_use]
    pub fn location(&self) -> String {
        format!("\"{}\", line {}:", self.path.display(), self.line_num)
    }

    /// The source between `beg` and the current position, each line
    /// prefixed with `prefix`.
    #[must_use]
    pub fn source_excerpt(&self, beg: usize, prefix: &str) -> String {
        let text = Span::new(beg, self.curr_pos).text(&self.source).trim_end();
        if text.is_empty() {
            return "<no source context>".to_string();
        }
        text.lines()
            .map(|line| format!("{prefix}{line}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Start a position record at the last line read and take a sequence
    /// number.
    pub fn begin_item(&mut self) -> ItemPosition {
        let sequence = self.sequence;
        self.sequence += 1;
        ItemPosition {
            path: self.path.clone(),
            beg_pos: self.line_beg_pos,
            beg_line: self.line_num,
            end_pos: self.curr_pos,
            end_line: self.line_num,
            sequence,
        }
    }

    /// Close `position` at the current reading position.
    pub fn end_item(&self, position: &mut ItemPosition) {
        position.end_pos = self.curr_pos;
        position.end_line = self.line_num;
    }

    /// Record a warning at the current line.
    pub fn warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(path = %self.path.display(), line = self.line_num, %message, "parse warning");
        self.warnings.push(ParseWarning {
            message,
            path: self.path.clone(),
            line: self.line_num,
        });
    }

    /// Fold an included file's results back into this context.
    pub fn absorb(&mut self, child: Self) {
        self.count += child.count;
        self.sequence = self.sequence.max(child.sequence);
        self.errors.extend(child.errors);
        self.warnings.extend(child.warnings);
    }
}

/// The files being read, innermost last.
///
/// There is always a current context; the ones below it are the files that
/// included it.
#[derive(Debug)]
pub struct ParseContextStack {
    current: ParseContext,
    parents: Vec<ParseContext>,
}

impl ParseContextStack {
    /// A stack holding only `root`.
    #[must_use]
    pub const fn new(root: ParseContext) -> Self {
        Self {
            current: root,
            parents: Vec::new(),
        }
    }

    /// The context being read.
    #[must_use]
    pub const fn current(&self) -> &ParseContext {
        &self.current
    }

    /// The context being read, mutably.
    pub fn current_mut(&mut self) -> &mut ParseContext {
        &mut self.current
    }

    /// Number of open contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parents.len() + 1
    }

    /// A stack always has a current context.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Make `context` current.
    pub fn push(&mut self, context: ParseContext) {
        tracing::debug!(path = %context.path.display(), depth = self.len() + 1, "opening context");
        let parent = std::mem::replace(&mut self.current, context);
        self.parents.push(parent);
    }

    /// Close the current context and return it; `None` for the root.
    pub fn pop(&mut self) -> Option<ParseContext> {
        let parent = self.parents.pop()?;
        let closed = std::mem::replace(&mut self.current, parent);
        tracing::debug!(path = %closed.path.display(), "closing context");
        Some(closed)
    }

    /// The including files, outermost first.
    pub fn parents(&self) -> impl DoubleEndedIterator<Item = &ParseContext> {
        self.parents.iter()
    }

    /// Unwrap the root context.
    #[must_use]
    pub fn into_root(mut self) -> ParseContext {
        while self.pop().is_some() {}
        self.current
    }
}
