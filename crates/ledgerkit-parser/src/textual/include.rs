//! `include` and the timelog directives.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use ledgerkit_core::{times, ExprError, TimeEvent};

use super::util::{glob_to_regex, next_element};
use super::TextualParser;
use crate::apply::{Applied, ApplyStack};
use crate::context::ParseContext;
use crate::error::{ParseError, ParseErrorKind, ParseResult};

fn io_error(path: &Path, err: &std::io::Error) -> ParseError {
    ParseErrorKind::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
    .into()
}

fn expand_home(path: &str) -> PathBuf {
    let Some(rest) = path.strip_prefix('~') else {
        return PathBuf::from(path);
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest.trim_start_matches(|c: char| c == '/' || c == '\\')),
        None => PathBuf::from(path),
    }
}

impl TextualParser<'_> {
    /// Resolve an include argument against the including file.
    fn include_path(&self, arg: &str) -> PathBuf {
        if arg.starts_with(|c: char| c == '/' || c == '\\' || c == '~') {
            return expand_home(arg);
        }
        match self.ctx().path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(arg),
            _ => PathBuf::from(arg),
        }
    }

    /// `include PATH`, where the file name part may be a glob. Every match
    /// is read in directory order; no match at all is an error.
    pub(super) fn include_directive(&mut self, arg: &str, apply: &ApplyStack<'_>) -> ParseResult<()> {
        let path = self.include_path(arg.trim());
        tracing::debug!(path = %path.display(), "include");

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let pattern = path
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or_default();
        let glob = glob_to_regex(pattern).map_err(|e| ExprError::Regex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        let mut found = false;
        if self.fs.is_dir(&dir) {
            let entries = self.fs.list_dir(&dir).map_err(|e| io_error(&dir, &e))?;
            for entry in entries {
                let matched = entry
                    .file_name()
                    .and_then(OsStr::to_str)
                    .is_some_and(|name| glob.is_match(name));
                if matched && self.fs.is_file(&entry) {
                    self.include_file(&entry, apply)?;
                    found = true;
                }
            }
        }

        if !found {
            return Err(ParseErrorKind::IncludeNotFound(path.display().to_string()).into());
        }
        Ok(())
    }

    /// Read one included file in a context of its own, then fold its
    /// results into the includer's.
    fn include_file(&mut self, path: &Path, apply: &ApplyStack<'_>) -> ParseResult<()> {
        let master = apply.top_account();
        let mut child = ParseContext::open(path, self.fs).map_err(|e| io_error(path, &e))?;
        child.master = master;
        child.sequence = self.ctx().sequence;
        tracing::debug!(path = %path.display(), master = %self.journal.accounts.full_name(master), "including file");

        self.contexts.push(child);
        let mut child_apply = ApplyStack::with_parent(apply);
        child_apply.push(Applied::Account(master));
        let result = self.parse_current(&mut child_apply);

        if let Some(done) = self.contexts.pop() {
            self.ctx_mut().absorb(done);
        }
        result
    }

    /// Read `i`/`o` lines: `i YYYY/MM/DD HH:MM:SS ACCOUNT  PAYEE  ; NOTE`.
    fn clock_event(&mut self, line: &str, completed: bool, apply: &ApplyStack<'_>) -> ParseResult<TimeEvent> {
        let datetime = line.get(2..line.len().min(21)).unwrap_or_default();
        let rest = line.get(22..).unwrap_or_default().trim();
        let (account, after) = next_element(rest, true);
        let (desc, end) = next_element(after, true);

        let when = times::parse_datetime(datetime.trim(), self.pool.date_context())?;
        let account = if account.is_empty() {
            None
        } else {
            self.journal
                .accounts
                .find_account(apply.top_account(), account, true)
        };

        let mut event = TimeEvent::new(when, account);
        event.desc = desc.to_string();
        event.note = end.strip_prefix(';').map(|note| note.trim_start().to_string());
        event.completed = completed;
        event.position = Some(self.ctx_mut().begin_item());
        Ok(event)
    }

    pub(super) fn clock_in_directive(&mut self, line: &str, completed: bool, apply: &ApplyStack<'_>) -> ParseResult<()> {
        let event = self.clock_event(line, completed, apply)?;
        self.contexts.current_mut().timelog.clock_in(event)?;
        Ok(())
    }

    pub(super) fn clock_out_directive(&mut self, line: &str, completed: bool, apply: &ApplyStack<'_>) -> ParseResult<()> {
        let event = self.clock_event(line, completed, apply)?;
        let count = self
            .contexts
            .current_mut()
            .timelog
            .clock_out(event, self.journal, self.pool, self.scope)?;
        self.ctx_mut().count += count;
        Ok(())
    }
}
