//! Postings: one line of a transaction moving an amount into an account.

use bitflags::bitflags;

use crate::account::AccountId;
use crate::amount::Amount;
use crate::expr::Expr;
use crate::item::{Item, ItemFlags, ItemState};

bitflags! {
    /// Posting flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PostFlags: u16 {
        /// `(Account)` or `[Account]`.
        const VIRTUAL = 0x0001;
        /// `[Account]`: virtual, yet balanced with the real postings.
        const MUST_BALANCE = 0x0002;
        /// The amount was inferred while balancing.
        const CALCULATED = 0x0004;
        /// The cost was inferred from a two-commodity transaction.
        const COST_CALCULATED = 0x0008;
        /// Cost written with `@@`.
        const COST_IN_FULL = 0x0010;
        /// Cost written with `{=...}` or `@ =...`.
        const COST_FIXATED = 0x0020;
        /// Cost written with `(@)` or `(@@)`; no price is recorded.
        const COST_VIRTUAL = 0x0040;
        /// `<Account>`: applied once the whole input is read.
        const DEFERRED = 0x0080;
        /// The amount was given as an expression.
        const AMOUNT_EXPR = 0x0100;
    }
}

/// A posting.
#[derive(Debug, Clone)]
pub struct Post {
    /// Shared item fields.
    pub item: Item,
    /// Target account.
    pub account: AccountId,
    /// The amount; null when elided and not yet inferred.
    pub amount: Amount,
    /// Expression the amount is computed from, kept for templates.
    pub amount_expr: Option<Expr>,
    /// Total cost in another commodity.
    pub cost: Option<Amount>,
    /// The cost as written, before any adjustment.
    pub given_cost: Option<Amount>,
    /// Target of a balance assignment or assertion (`= AMOUNT`).
    pub assigned_amount: Option<Amount>,
    /// Flags.
    pub flags: PostFlags,
}

impl Post {
    /// A real posting of `amount` to `account`.
    pub fn new(account: AccountId, amount: Amount) -> Self {
        Self {
            item: Item::default(),
            account,
            amount,
            amount_expr: None,
            cost: None,
            given_cost: None,
            assigned_amount: None,
            flags: PostFlags::empty(),
        }
    }

    /// A posting marked as generated.
    pub fn generated(account: AccountId, amount: Amount, state: ItemState) -> Self {
        let mut post = Self::new(account, amount);
        post.item.state = state;
        post.item.flags |= ItemFlags::GENERATED;
        post
    }

    /// Whether this posting takes part in balancing.
    pub const fn must_balance(&self) -> bool {
        !self.flags.contains(PostFlags::VIRTUAL) || self.flags.contains(PostFlags::MUST_BALANCE)
    }

    /// Whether the posting is `(virtual)` or `[virtual]`.
    pub const fn is_virtual(&self) -> bool {
        self.flags.contains(PostFlags::VIRTUAL)
    }

    /// The cost if present, otherwise the amount.
    pub fn cost_or_amount(&self) -> &Amount {
        self.cost.as_ref().unwrap_or(&self.amount)
    }

    /// Copy amount-independent details of a template posting.
    pub fn copy_details(&mut self, other: &Self) {
        self.item.copy_details(&other.item);
        self.flags = other.flags;
        self.assigned_amount.clone_from(&other.assigned_amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_must_balance() {
        let mut post = Post::new(AccountId::ROOT, Amount::from_i64(1));
        assert!(post.must_balance());
        post.flags |= PostFlags::VIRTUAL;
        assert!(!post.must_balance());
        post.flags |= PostFlags::MUST_BALANCE;
        assert!(post.must_balance());
        assert!(post.is_virtual());
    }

    #[test]
    fn test_cost_or_amount() {
        let mut post = Post::new(AccountId::ROOT, Amount::from_i64(10));
        assert_eq!(post.cost_or_amount(), &Amount::from_i64(10));
        post.cost = Some(Amount::from_i64(25));
        assert_eq!(post.cost_or_amount(), &Amount::from_i64(25));
    }

    #[test]
    fn test_generated_post() {
        let post = Post::generated(AccountId::ROOT, Amount::null(), ItemState::Cleared);
        assert!(post.item.is_generated());
        assert_eq!(post.item.state, ItemState::Cleared);
        assert!(post.amount.is_null());
    }
}
