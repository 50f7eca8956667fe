//! Source map for tracking file locations.

use ledgerkit_parser::Span;
use std::path::{Path, PathBuf};

/// A file read during a session.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Unique ID for this file.
    pub id: usize,
    /// Path to the file, or the name given to in-memory input.
    pub path: PathBuf,
    /// Source content.
    pub source: String,
    /// Byte positions where each line starts.
    line_starts: Vec<usize>,
}

impl SourceFile {
    fn new(id: usize, path: PathBuf, source: String) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();

        Self {
            id,
            path,
            source,
            line_starts,
        }
    }

    /// Get the line and column (1-based) for a byte offset.
    #[must_use]
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let line = self
            .line_starts
            .iter()
            .rposition(|&start| start <= offset)
            .unwrap_or(0);
        let col = offset.saturating_sub(self.line_starts[line]);
        (line + 1, col + 1)
    }

    /// Byte offset of the start of a 1-based line.
    #[must_use]
    pub fn line_start(&self, line_num: usize) -> Option<usize> {
        line_num
            .checked_sub(1)
            .and_then(|i| self.line_starts.get(i))
            .copied()
    }

    /// Get the source text for a span.
    #[must_use]
    pub fn span_text(&self, span: &Span) -> &str {
        span.text(&self.source)
    }

    /// Get a specific line (1-based), without its line ending.
    #[must_use]
    pub fn line(&self, line_num: usize) -> Option<&str> {
        let start = self.line_start(line_num)?;
        let end = self
            .line_starts
            .get(line_num)
            .map_or(self.source.len(), |next| next - 1);
        Some(self.source[start..end].trim_end_matches('\r'))
    }

    /// Get the total number of lines.
    #[must_use]
    pub fn num_lines(&self) -> usize {
        self.line_starts.len()
    }
}

/// Every file read in a session, for error reporting.
#[derive(Debug, Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

impl SourceMap {
    /// Create a new source map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file to the source map, replacing an earlier copy of the same
    /// path.
    ///
    /// Returns the file ID.
    pub fn add_file(&mut self, path: PathBuf, source: String) -> usize {
        if let Some(existing) = self.files.iter_mut().find(|f| f.path == path) {
            let id = existing.id;
            *existing = SourceFile::new(id, path, source);
            return id;
        }
        let id = self.files.len();
        self.files.push(SourceFile::new(id, path, source));
        id
    }

    /// Get a file by ID.
    #[must_use]
    pub fn get(&self, id: usize) -> Option<&SourceFile> {
        self.files.get(id)
    }

    /// Get a file by path.
    #[must_use]
    pub fn get_by_path(&self, path: &Path) -> Option<&SourceFile> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Get all files.
    #[must_use]
    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    /// Number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether no file has been read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Forget every file.
    pub fn clear(&mut self) {
        self.files.clear();
    }

    /// Format a span as `path:line:column`.
    #[must_use]
    pub fn format_span(&self, path: &Path, span: &Span) -> String {
        if let Some(file) = self.get_by_path(path) {
            let (line, col) = file.line_col(span.start);
            format!("{}:{}:{}", file.path.display(), line, col)
        } else {
            format!("{}:{span}", path.display())
        }
    }
}
