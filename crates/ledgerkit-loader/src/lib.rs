//! Ledger journal sessions.
//!
//! A [`Session`] owns everything that outlives a single file: the
//! commodity pool, the journal, the option settings and the symbol scope
//! that journal `--option` lines resolve against. It reads journals through
//! the parser and keeps a [`SourceMap`] of every file read, includes
//! included, for diagnostics.
//!
//! # Example
//!
//! ```ignore
//! use ledgerkit_loader::{Options, Session};
//! use std::path::Path;
//!
//! let mut session = Session::new(Options::new());
//! let result = session.read_journal(Path::new("household.ledger"))?;
//! println!("{} transactions, {} errors", result.xact_count, result.errors.len());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod options;
mod source_map;

pub use options::{is_known, known_names, OptionTargets, OptionWarning, Options};
pub use source_map::{SourceFile, SourceMap};

use std::cell::RefCell;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use ledgerkit_core::{CommodityPool, Journal, Scope, Symbol, SymbolKind, SymbolScope, Value};
use ledgerkit_parser::{
    CancellationToken, FileSystem, OsFileSystem, ParseContext, ParseError, ParseWarning,
    TextualParser,
};
use thiserror::Error;

/// Errors that stop a load.
///
/// Ordinary parse errors are not among them; they are collected in
/// [`LoadResult::errors`] and reading goes on.
#[derive(Debug, Error)]
pub enum LoadError {
    /// IO error reading a top-level file.
    #[error("failed to read file {path}: {source}")]
    Io {
        /// The path that failed to read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The session's cancellation token was raised.
    #[error("loading was cancelled")]
    Cancelled,

    /// An error the parser could not recover from.
    #[error("{0}")]
    Fatal(ParseError),

    /// The load finished with recoverable errors.
    #[error("{count} {}", error_noun(*.count))]
    Errors {
        /// Number of errors.
        count: usize,
    },
}

const fn error_noun(count: usize) -> &'static str {
    if count == 1 {
        "error"
    } else {
        "errors"
    }
}

/// What reading one or more journals produced.
#[derive(Debug, Default)]
pub struct LoadResult {
    /// Transactions added, including those from included files.
    pub xact_count: usize,
    /// Errors recovered from, in input order.
    pub errors: Vec<ParseError>,
    /// Warnings raised by the parser.
    pub warnings: Vec<ParseWarning>,
    /// Options rejected while reading.
    pub option_warnings: Vec<OptionWarning>,
}

impl LoadResult {
    /// Whether nothing was recovered from.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fail with [`LoadError::Errors`] if any errors were recorded.
    pub fn into_checked(self) -> Result<Self, LoadError> {
        if self.errors.is_empty() {
            Ok(self)
        } else {
            Err(LoadError::Errors {
                count: self.errors.len(),
            })
        }
    }

    fn absorb(&mut self, ctx: ParseContext) {
        self.xact_count += ctx.count;
        self.errors.extend(ctx.errors);
        self.warnings.extend(ctx.warnings);
    }
}

/// A [`FileSystem`] that remembers what was read through it.
struct RecordingFs<'a> {
    inner: &'a dyn FileSystem,
    read: RefCell<Vec<(PathBuf, String)>>,
}

impl<'a> RecordingFs<'a> {
    fn new(inner: &'a dyn FileSystem) -> Self {
        Self {
            inner,
            read: RefCell::new(Vec::new()),
        }
    }

    fn into_files(self) -> Vec<(PathBuf, String)> {
        self.read.into_inner()
    }
}

impl FileSystem for RecordingFs<'_> {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let contents = self.inner.read_to_string(path)?;
        self.read
            .borrow_mut()
            .push((path.to_path_buf(), contents.clone()));
        Ok(contents)
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        self.inner.list_dir(dir)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.inner.is_file(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.inner.is_dir(path)
    }
}

/// Everything one run of the tool works on.
pub struct Session {
    options: Rc<RefCell<Options>>,
    pool: CommodityPool,
    journal: Journal,
    scope: SymbolScope<'static>,
    source_map: SourceMap,
    cancel: CancellationToken,
    fs: Box<dyn FileSystem>,
}

impl Session {
    /// A session reading from disk with `options` in effect.
    #[must_use]
    pub fn new(options: Options) -> Self {
        let session = Self {
            options: Rc::new(RefCell::new(options)),
            pool: CommodityPool::with_builtins(),
            journal: Journal::new(),
            scope: SymbolScope::new(),
            source_map: SourceMap::new(),
            cancel: CancellationToken::new(),
            fs: Box::new(OsFileSystem),
        };
        session.install_options();
        session
    }

    /// Read files through `fs` instead of the disk.
    #[must_use]
    pub fn with_file_system(mut self, fs: impl FileSystem + 'static) -> Self {
        self.fs = Box::new(fs);
        self
    }

    /// Stop reading once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The journal read so far.
    #[must_use]
    pub const fn journal(&self) -> &Journal {
        &self.journal
    }

    /// The journal read so far, mutably.
    pub fn journal_mut(&mut self) -> &mut Journal {
        &mut self.journal
    }

    /// The session's commodity pool.
    #[must_use]
    pub const fn pool(&self) -> &CommodityPool {
        &self.pool
    }

    /// The current option settings.
    #[must_use]
    pub fn options(&self) -> std::cell::Ref<'_, Options> {
        self.options.borrow()
    }

    /// Set an option as if it came from the command line.
    pub fn set_option(&self, name: &str, value: Option<&str>) {
        self.options.borrow_mut().set(name, value);
        self.apply_options();
    }

    /// The scope journal expressions and option lines resolve against.
    #[must_use]
    pub fn scope(&self) -> &dyn Scope {
        &self.scope
    }

    /// Every file read since the last [`reset`](Self::reset).
    #[must_use]
    pub const fn source_map(&self) -> &SourceMap {
        &self.source_map
    }

    /// Read the journal at `path`.
    pub fn read_journal(&mut self, path: &Path) -> Result<LoadResult, LoadError> {
        self.read_journal_files(&[path.to_path_buf()])
    }

    /// Read `source` as a journal named `name`.
    ///
    /// Relative includes resolve against the directory of `name`.
    pub fn read_journal_from_string(
        &mut self,
        name: impl Into<PathBuf>,
        source: impl Into<String>,
    ) -> Result<LoadResult, LoadError> {
        let mut result = LoadResult::default();
        self.read_price_db(&mut result)?;
        let name = name.into();
        let source = source.into();
        self.source_map.add_file(name.clone(), source.clone());
        self.parse_context(ParseContext::from_string(name, source), &mut result)?;
        self.finish(result)
    }

    /// Read each of `paths` in turn; the `file` option supplies them when
    /// `paths` is empty.
    ///
    /// Options, the epoch and the pool carry over from one file to the
    /// next, as if the files had been concatenated.
    pub fn read_journal_files(&mut self, paths: &[PathBuf]) -> Result<LoadResult, LoadError> {
        let paths = if paths.is_empty() {
            self.options.borrow().files.clone()
        } else {
            paths.to_vec()
        };

        let mut result = LoadResult::default();
        self.read_price_db(&mut result)?;
        for path in &paths {
            tracing::info!(path = %path.display(), "reading journal");
            let ctx = self.open(path)?;
            self.parse_context(ctx, &mut result)?;
        }
        self.finish(result)
    }

    /// Throw away everything read and start over with a fresh pool,
    /// journal and scope. Options are kept and applied again.
    pub fn reset(&mut self) {
        tracing::debug!("resetting session");
        self.pool.reset();
        self.journal = Journal::new();
        self.scope.clear();
        self.source_map.clear();
        self.install_options();
    }

    fn open(&mut self, path: &Path) -> Result<ParseContext, LoadError> {
        let source = self.fs.read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.source_map.add_file(path.to_path_buf(), source.clone());
        Ok(ParseContext::from_string(path, source))
    }

    fn read_price_db(&mut self, result: &mut LoadResult) -> Result<(), LoadError> {
        let price_db = self.options.borrow().price_db.clone();
        let Some(path) = price_db else {
            return Ok(());
        };
        if !self.fs.is_file(&path) {
            tracing::debug!(path = %path.display(), "price database not found, skipping");
            return Ok(());
        }
        tracing::info!(path = %path.display(), "reading price database");
        let ctx = self.open(&path)?;
        self.parse_context(ctx, result)
    }

    fn parse_context(&mut self, mut ctx: ParseContext, result: &mut LoadResult) -> Result<(), LoadError> {
        let master = self.options.borrow().master_account.clone();
        if let Some(name) = master {
            ctx.master = self.journal.find_account(&name);
        }

        let recording = RecordingFs::new(self.fs.as_ref());
        let outcome = {
            let mut parser = TextualParser::new(
                &mut self.journal,
                &self.pool,
                &self.scope,
                &recording,
                ctx,
            )
            .with_cancellation(self.cancel.clone());
            parser.parse().map(|_| parser.into_context())
        };
        for (path, contents) in recording.into_files() {
            self.source_map.add_file(path, contents);
        }

        match outcome {
            Ok(ctx) => {
                result.absorb(ctx);
                Ok(())
            }
            Err(err) if err.is_cancelled() => Err(LoadError::Cancelled),
            Err(err) => Err(LoadError::Fatal(err)),
        }
    }

    fn finish(&mut self, mut result: LoadResult) -> Result<LoadResult, LoadError> {
        result.option_warnings = self.options.borrow_mut().take_warnings();
        tracing::info!(
            xacts = result.xact_count,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "journal loaded"
        );
        Ok(result)
    }

    fn apply_options(&self) {
        self.options
            .borrow()
            .apply_to(&OptionTargets::of(&self.pool, &self.journal));
    }

    /// Bind every known option in the scope so journal `--name` lines
    /// reach it, then apply the current settings.
    fn install_options(&self) {
        let targets = OptionTargets::of(&self.pool, &self.journal);
        for name in known_names() {
            let options = Rc::clone(&self.options);
            let targets = targets.clone();
            self.scope.define(
                SymbolKind::Option,
                name,
                Symbol::function(move |args| {
                    let value = args.first().map(Value::to_text);
                    let mut options = options.borrow_mut();
                    options.set(name, value.as_deref());
                    options.apply_to(&targets);
                    Ok(Value::Boolean(true))
                }),
            );
        }
        self.apply_options();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Options::new())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("options", &self.options.borrow())
            .field("pool", &self.pool)
            .field("xacts", &self.journal.xacts.len())
            .field("files", &self.source_map.len())
            .finish_non_exhaustive()
    }
}
