//! The account tree.
//!
//! Accounts live in an arena owned by [`Accounts`] and refer to each other
//! by [`AccountId`]. Index 0 is the unnamed root, the "master" account all
//! others descend from.

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;

use crate::amount::Amount;
use crate::balance::Balance;
use crate::error::BalanceResult;

/// Handle of an account in an [`Accounts`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(usize);

impl AccountId {
    /// The root account.
    pub const ROOT: Self = Self(0);

    /// Position in the arena.
    pub const fn index(self) -> usize {
        self.0
    }
}

bitflags! {
    /// Account flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccountFlags: u8 {
        /// Declared with an `account` directive or seen under `--strict`.
        const KNOWN = 0x01;
        /// Only used by generated postings.
        const GENERATED = 0x02;
        /// Created to hold temporary report data.
        const TEMP = 0x04;
    }
}

/// One node of the account tree.
#[derive(Debug, Clone, Default)]
pub struct Account {
    /// Last path component.
    pub name: String,
    /// Parent, `None` only for the root.
    pub parent: Option<AccountId>,
    /// Children by name.
    pub children: BTreeMap<String, AccountId>,
    /// Flags.
    pub flags: AccountFlags,
    /// Note from the `account` directive.
    pub note: Option<String>,
    /// Valuation expression from the `account` directive.
    pub value_expr: Option<String>,
    /// Running total of every posting added so far.
    pub total: Balance,
    /// Number of postings added.
    pub post_count: usize,
    depth: usize,
    full_name: String,
}

impl Account {
    /// Nesting depth; the root is at 0.
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Colon-separated path from the root.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Whether the account was declared.
    pub const fn is_known(&self) -> bool {
        self.flags.contains(AccountFlags::KNOWN)
    }
}

/// Arena holding the whole account tree.
#[derive(Debug, Clone)]
pub struct Accounts {
    nodes: Vec<Account>,
}

impl Default for Accounts {
    fn default() -> Self {
        Self::new()
    }
}

impl Accounts {
    /// A tree holding only the root.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![Account::default()],
        }
    }

    /// Number of accounts, the root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether only the root exists.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Borrow an account.
    ///
    /// # Panics
    ///
    /// Panics if `id` comes from another arena.
    pub fn get(&self, id: AccountId) -> &Account {
        &self.nodes[id.0]
    }

    /// Mutably borrow an account.
    pub fn get_mut(&mut self, id: AccountId) -> &mut Account {
        &mut self.nodes[id.0]
    }

    /// Full name of `id`.
    pub fn full_name(&self, id: AccountId) -> &str {
        self.nodes[id.0].full_name()
    }

    /// Find `path` below `from`, creating missing components when
    /// `auto_create` is set.
    pub fn find_account(&mut self, from: AccountId, path: &str, auto_create: bool) -> Option<AccountId> {
        let mut current = from;
        for part in path.split(':') {
            current = match self.nodes[current.0].children.get(part) {
                Some(&child) => child,
                None if auto_create => self.create_child(current, part),
                None => return None,
            };
        }
        Some(current)
    }

    /// Look `path` up below `from` without creating anything.
    pub fn lookup(&self, from: AccountId, path: &str) -> Option<AccountId> {
        path.split(':').try_fold(from, |current, part| {
            self.nodes[current.0].children.get(part).copied()
        })
    }

    fn create_child(&mut self, parent: AccountId, name: &str) -> AccountId {
        let id = AccountId(self.nodes.len());
        let parent_node = &self.nodes[parent.0];
        let full_name = if parent_node.parent.is_none() && parent_node.name.is_empty() {
            name.to_string()
        } else {
            format!("{}:{name}", parent_node.full_name)
        };
        tracing::trace!(account = %full_name, "creating account");
        let node = Account {
            name: name.to_string(),
            parent: Some(parent),
            depth: parent_node.depth + 1,
            full_name,
            ..Account::default()
        };
        self.nodes.push(node);
        self.nodes[parent.0].children.insert(name.to_string(), id);
        id
    }

    /// Add `amount` to the running total of `id`.
    pub fn add_to_total(&mut self, id: AccountId, amount: &Amount) -> BalanceResult<()> {
        let node = &mut self.nodes[id.0];
        node.post_count += 1;
        if amount.is_null() {
            return Ok(());
        }
        node.total.add_amount(amount)
    }

    /// Iterate over every account except the root, in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (AccountId, &Account)> {
        self.nodes
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, a)| (AccountId(i), a))
    }

    /// Whether `id` is `ancestor` or lies below it.
    pub fn is_descendant(&self, id: AccountId, ancestor: AccountId) -> bool {
        let mut current = Some(id);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.nodes[c.0].parent;
        }
        false
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
