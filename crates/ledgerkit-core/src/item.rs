//! Fields shared by transactions and postings: state, dates, notes,
//! metadata and source position.

use std::collections::BTreeMap;
use std::path::PathBuf;

use bitflags::bitflags;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ExprResult;
use crate::expr::Expr;
use crate::pool::CommodityPool;
use crate::scope::Scope;
use crate::times;

/// Clearing state of a transaction or posting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemState {
    /// No mark.
    #[default]
    Uncleared,
    /// Marked with `*`.
    Cleared,
    /// Marked with `!`.
    Pending,
}

impl ItemState {
    /// Read a leading `*` or `!` mark, returning the state and the rest.
    pub fn parse_mark(text: &str) -> (Option<Self>, &str) {
        if let Some(rest) = text.strip_prefix('*') {
            (Some(Self::Cleared), rest.trim_start())
        } else if let Some(rest) = text.strip_prefix('!') {
            (Some(Self::Pending), rest.trim_start())
        } else {
            (None, text)
        }
    }
}

bitflags! {
    /// Item flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ItemFlags: u8 {
        /// Created by the engine rather than read from input.
        const GENERATED = 0x01;
        /// Holds temporary data that is discarded after a report.
        const TEMP = 0x02;
        /// The note was given on its own line.
        const NOTE_ON_NEXT_LINE = 0x04;
        /// Flags inferred from the enclosing transaction.
        const INFERRED = 0x08;
    }
}

/// Where an item was read from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPosition {
    /// Source path, or a pseudo-path such as `/dev/stdin`.
    pub path: PathBuf,
    /// Byte offset of the first line.
    pub beg_pos: usize,
    /// One-based number of the first line.
    pub beg_line: usize,
    /// Byte offset just past the last line.
    pub end_pos: usize,
    /// One-based number of the last line.
    pub end_line: usize,
    /// Order of the item among everything read from the same context.
    pub sequence: usize,
}

/// Common state of journal items.
#[derive(Debug, Clone, Default)]
pub struct Item {
    /// Clearing state.
    pub state: ItemState,
    /// Flags.
    pub flags: ItemFlags,
    /// Primary date.
    pub date: Option<NaiveDate>,
    /// Auxiliary (effective) date.
    pub aux_date: Option<NaiveDate>,
    /// Free-form note text.
    pub note: Option<String>,
    /// Tags and `key: value` pairs, keyed by name.
    pub metadata: BTreeMap<String, Option<String>>,
    /// Source position.
    pub position: Option<ItemPosition>,
}

impl Item {
    /// An item with the given state and nothing else.
    #[must_use]
    pub fn with_state(state: ItemState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    /// Whether this item was generated rather than parsed.
    pub const fn is_generated(&self) -> bool {
        self.flags.contains(ItemFlags::GENERATED)
    }

    /// Whether the tag or metadata key `name` is present.
    pub fn has_tag(&self, name: &str) -> bool {
        self.metadata.contains_key(name)
    }

    /// Value of the metadata key `name`, if it has one.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.metadata.get(name).and_then(|v| v.as_deref())
    }

    /// Set a tag, optionally with a value.
    ///
    /// An existing value is replaced only when `overwrite` is set.
    pub fn set_tag(&mut self, name: &str, value: Option<String>, overwrite: bool) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        match self.metadata.get_mut(name) {
            Some(existing) if overwrite => *existing = value,
            Some(_) => {}
            None => {
                self.metadata.insert(name.to_string(), value);
            }
        }
    }

    /// Append `note` to this item's note and parse any tags in it.
    pub fn append_note(
        &mut self,
        note: &str,
        pool: &CommodityPool,
        scope: &dyn Scope,
        overwrite: bool,
    ) -> ExprResult<()> {
        match &mut self.note {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(note);
            }
            None => self.note = Some(note.to_string()),
        }
        self.parse_tags(note, pool, scope, overwrite)
    }

    /// Parse tags (`:a:b:`), a leading `key: value` pair, or bracketed
    /// `[date=aux]` dates out of a note.
    ///
    /// A key written `key::` has its value evaluated as an expression.
    pub fn parse_tags(
        &mut self,
        note: &str,
        pool: &CommodityPool,
        scope: &dyn Scope,
        overwrite: bool,
    ) -> ExprResult<()> {
        if note.is_empty() {
            return Ok(());
        }

        if !note.contains(':') {
            self.parse_note_dates(note, pool)?;
            return Ok(());
        }

        let mut rest = note.trim_start();
        let mut first = true;
        while !rest.is_empty() {
            let (word, after) = match rest.find(char::is_whitespace) {
                Some(idx) => (&rest[..idx], rest[idx..].trim_start()),
                None => (rest, ""),
            };
            rest = after;
            if word.chars().count() < 2 {
                first = false;
                continue;
            }

            if word.starts_with(':') && word.ends_with(':') {
                for tag in word[1..word.len() - 1].split(':') {
                    self.set_tag(tag, None, overwrite);
                }
            } else if first && word.ends_with(':') {
                let (key, by_value) = match word.strip_suffix("::") {
                    Some(key) => (key, true),
                    None => (&word[..word.len() - 1], false),
                };
                let field = rest.trim();
                let value = if by_value {
                    Expr::parse(field, pool)?.calc(scope)?.to_text()
                } else {
                    field.to_string()
                };
                self.set_tag(key, Some(value), overwrite);
                break;
            }
            first = false;
        }
        Ok(())
    }

    fn parse_note_dates(&mut self, note: &str, pool: &CommodityPool) -> ExprResult<()> {
        let Some(open) = note.find('[') else {
            return Ok(());
        };
        let inner = &note[open + 1..];
        if !inner.starts_with(|c: char| c.is_ascii_digit() || c == '=') {
            return Ok(());
        }
        let Some(close) = inner.find(']') else {
            return Ok(());
        };
        let dates = &inner[..close];
        let (primary, aux) = match dates.split_once('=') {
            Some((primary, aux)) => (primary, Some(aux)),
            None => (dates, None),
        };
        if let Some(aux) = aux.filter(|a| !a.is_empty()) {
            self.aux_date = Some(times::parse_date(aux, pool.date_context())?);
        }
        if !primary.is_empty() {
            self.date = Some(times::parse_date(primary, pool.date_context())?);
        }
        Ok(())
    }

    /// Copy the descriptive fields of `other`, leaving position alone.
    pub fn copy_details(&mut self, other: &Self) {
        self.state = other.state;
        self.flags = other.flags;
        self.date = other.date;
        self.aux_date = other.aux_date;
        self.note.clone_from(&other.note);
        self.metadata.clone_from(&other.metadata);
    }
}
