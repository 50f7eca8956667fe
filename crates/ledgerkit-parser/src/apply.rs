//! Scopes opened by `apply` directives.
//!
//! Each file being parsed owns an [`ApplyStack`]. A file pulled in by
//! `include` gets a fresh stack whose parent is the including file's stack,
//! so applications made by the outer file stay visible inside the included
//! one but `end` can only close frames opened in the same file.

use chrono::NaiveDateTime;
use ledgerkit_core::{AccountId, Amount, CommodityRef};

/// One applied scope.
#[derive(Debug, Clone)]
pub enum Applied {
    /// `apply account`: names are resolved below this account.
    Account(AccountId),
    /// `apply tag`: the note (`:tag:` or `key: value`) added to each item.
    Tag(String),
    /// `apply fixed`: postings in `commodity` get a fixated lot price.
    FixedRate {
        /// The commodity whose price is fixed.
        commodity: CommodityRef,
        /// Its per-unit price.
        price: Amount,
    },
    /// `apply year`: holds the epoch to restore when the frame is closed.
    Year(Option<NaiveDateTime>),
}

impl Applied {
    /// The keyword used to open this frame, as matched by `end apply KIND`.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Account(_) => "account",
            Self::Tag(_) => "tag",
            Self::FixedRate { .. } => "fixed",
            Self::Year(_) => "year",
        }
    }
}

/// A stack of [`Applied`] frames with an optional parent stack.
#[derive(Debug, Default)]
pub struct ApplyStack<'p> {
    frames: Vec<Applied>,
    parent: Option<&'p ApplyStack<'p>>,
}

impl<'p> ApplyStack<'p> {
    /// An empty root stack.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            frames: Vec::new(),
            parent: None,
        }
    }

    /// An empty stack that sees everything applied in `parent`.
    #[must_use]
    pub const fn with_parent(parent: &'p ApplyStack<'p>) -> Self {
        Self {
            frames: Vec::new(),
            parent: Some(parent),
        }
    }

    /// Open a frame.
    pub fn push(&mut self, frame: Applied) {
        tracing::trace!(kind = frame.label(), depth = self.frames.len() + 1, "apply");
        self.frames.push(frame);
    }

    /// Close the innermost local frame.
    pub fn pop(&mut self) -> Option<Applied> {
        let frame = self.frames.pop();
        if let Some(frame) = &frame {
            tracing::trace!(kind = frame.label(), depth = self.frames.len(), "end apply");
        }
        frame
    }

    /// The innermost local frame.
    #[must_use]
    pub fn front(&self) -> Option<&Applied> {
        self.frames.last()
    }

    /// Label of the innermost local frame.
    #[must_use]
    pub fn front_label(&self) -> Option<&'static str> {
        self.front().map(Applied::label)
    }

    /// Number of local frames; the parent's frames are not counted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no local frame is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Every visible frame, innermost first, walking into the parents.
    pub fn iter(&self) -> impl Iterator<Item = &Applied> + '_ {
        chain(self)
    }

    /// The nearest frame `pick` accepts.
    pub fn find<'s, T>(&'s self, pick: impl FnMut(&'s Applied) -> Option<T>) -> Option<T> {
        self.iter().find_map(pick)
    }

    /// Every frame `pick` accepts, innermost first.
    pub fn find_all<'s, T>(&'s self, pick: impl FnMut(&'s Applied) -> Option<T>) -> Vec<T> {
        self.iter().filter_map(pick).collect()
    }

    /// The innermost applied account, or the root account.
    #[must_use]
    pub fn top_account(&self) -> AccountId {
        self.find(|frame| match frame {
            Applied::Account(id) => Some(*id),
            _ => None,
        })
        .unwrap_or(AccountId::ROOT)
    }

    /// Every applied tag note, innermost first.
    #[must_use]
    pub fn tags(&self) -> Vec<&str> {
        self.find_all(|frame| match frame {
            Applied::Tag(tag) => Some(tag.as_str()),
            _ => None,
        })
    }

    /// Every applied fixed rate, innermost first.
    #[must_use]
    pub fn fixed_rates(&self) -> Vec<(&CommodityRef, &Amount)> {
        self.find_all(|frame| match frame {
            Applied::FixedRate { commodity, price } => Some((commodity, price)),
            _ => None,
        })
    }
}

fn chain<'s>(stack: &'s ApplyStack<'s>) -> impl Iterator<Item = &'s Applied> + 's {
    let mut next = Some(stack);
    std::iter::from_fn(move || {
        let current = next?;
        next = current.parent;
        Some(current.frames.iter().rev())
    })
    .flatten()
}
