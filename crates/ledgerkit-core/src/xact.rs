//! Transactions and balancing.
//!
//! [`Xact`] is an ordinary dated transaction, [`AutoXact`] a template
//! applied to matching postings of later transactions, and [`PeriodXact`]
//! a recurring budget template. All three hold postings; [`finalize_posts`]
//! balances them.

use std::cell::RefCell;
use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};

use crate::account::{AccountId, Accounts};
use crate::amount::Amount;
use crate::annotation::{Annotation, AnnotationFlags};
use crate::balance::Balance;
use crate::error::XactError;
use crate::expr::Expr;
use crate::item::Item;
use crate::pool::CommodityPool;
use crate::post::{Post, PostFlags};
use crate::predicate::Predicate;
use crate::times::DateInterval;

/// What balancing needs from the journal.
#[derive(Debug, Clone, Copy)]
pub struct FinalizeContext<'a> {
    /// The account tree, for names in diagnostics.
    pub accounts: &'a Accounts,
    /// Commodity pool for price recording.
    pub pool: &'a CommodityPool,
    /// Account that absorbs the remainder of single-posting transactions.
    pub bucket: Option<AccountId>,
}

/// An ordinary transaction.
#[derive(Debug, Clone, Default)]
pub struct Xact {
    /// Shared item fields.
    pub item: Item,
    /// Code written in parentheses after the date.
    pub code: Option<String>,
    /// Payee.
    pub payee: String,
    /// Postings, in input order.
    pub posts: Vec<Post>,
}

impl Xact {
    /// An empty transaction on `date`.
    pub fn new(date: NaiveDate, payee: impl Into<String>) -> Self {
        Self {
            item: Item {
                date: Some(date),
                ..Item::default()
            },
            payee: payee.into(),
            ..Self::default()
        }
    }

    /// Balance the postings and reduce their amounts.
    ///
    /// Returns `Ok(false)` when every posting is still null, in which case
    /// the transaction should be ignored.
    pub fn finalize(&mut self, ctx: &FinalizeContext<'_>) -> Result<bool, XactError> {
        finalize_posts(&mut self.posts, self.item.date, ctx)?;

        let mut all_null = true;
        let mut some_null = false;
        for post in &mut self.posts {
            if post.amount.is_null() {
                some_null = true;
            } else {
                all_null = false;
                post.amount = post.amount.reduced()?;
            }
        }
        if all_null {
            return Ok(false);
        }
        if some_null {
            return Err(XactError::NullAmountsAfterBalancing);
        }
        Ok(true)
    }

    /// Re-check the balance after postings were added.
    pub fn verify(&self) -> Result<(), XactError> {
        verify_posts(&self.posts)
    }
}

/// How a check expression reacts to a false result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    /// `expr`/`eval`: evaluated for its side effects only.
    General,
    /// `assert`: an error.
    Assertion,
    /// `check`: a warning.
    Check,
}

/// An expression evaluated against each matching posting.
#[derive(Debug, Clone)]
pub struct CheckExpr {
    /// The expression.
    pub expr: Expr,
    /// What a false result means.
    pub kind: CheckKind,
}

/// A note to be appended to postings an automated transaction touches.
#[derive(Debug, Clone)]
pub struct DeferredNote {
    /// Note text.
    pub text: String,
    /// Replace existing metadata values.
    pub overwrite: bool,
    /// Template posting the note belongs to; `None` for the matched posting.
    pub post_index: Option<usize>,
}

/// A template applied to matching postings of later transactions.
#[derive(Debug, Clone)]
pub struct AutoXact {
    /// Shared item fields.
    pub item: Item,
    /// Which postings trigger the template.
    pub predicate: Predicate,
    /// Checks evaluated on each matching posting.
    pub check_exprs: Vec<CheckExpr>,
    /// Notes for matched and generated postings.
    pub deferred_notes: Vec<DeferredNote>,
    /// Template postings.
    pub posts: Vec<Post>,
    memo: RefCell<HashMap<String, bool>>,
}

impl AutoXact {
    /// A template with no postings.
    pub fn new(predicate: Predicate) -> Self {
        Self {
            item: Item::default(),
            predicate,
            check_exprs: Vec::new(),
            deferred_notes: Vec::new(),
            posts: Vec::new(),
            memo: RefCell::new(HashMap::new()),
        }
    }

    /// Cached predicate result for an account, when the predicate looks at
    /// the account alone.
    pub fn memoized(&self, account: &str) -> Option<bool> {
        if !self.predicate.depends_only_on_account() {
            return None;
        }
        self.memo.borrow().get(account).copied()
    }

    /// Remember a predicate result for an account.
    pub fn memoize(&self, account: &str, matched: bool) {
        if self.predicate.depends_only_on_account() {
            self.memo.borrow_mut().insert(account.to_string(), matched);
        }
    }

    /// Short description for diagnostics.
    pub fn description(&self) -> String {
        self.item.position.as_ref().map_or_else(
            || "generated automated transaction".to_string(),
            |p| format!("automated transaction at line {}", p.beg_line),
        )
    }
}

/// A recurring template (`~ monthly`).
#[derive(Debug, Clone)]
pub struct PeriodXact {
    /// Shared item fields.
    pub item: Item,
    /// The parsed period.
    pub period: DateInterval,
    /// The period as written.
    pub period_text: String,
    /// Template postings.
    pub posts: Vec<Post>,
}

impl PeriodXact {
    /// A template with no postings.
    pub fn new(period: DateInterval, period_text: impl Into<String>) -> Self {
        Self {
            item: Item::default(),
            period,
            period_text: period_text.into(),
            posts: Vec::new(),
        }
    }

    /// Balance the template postings.
    pub fn finalize(&mut self, ctx: &FinalizeContext<'_>) -> Result<(), XactError> {
        finalize_posts(&mut self.posts, None, ctx)
    }
}

fn balancing_amount(amount: &Amount) -> Result<Amount, XactError> {
    Ok(if amount.keep_precision() {
        amount.rounded()?.reduced()?
    } else {
        amount.reduced()?
    })
}

fn ends_with_special_char(name: &str) -> bool {
    name.chars()
        .last()
        .is_some_and(|c| c.is_ascii_digit() || matches!(c, ')' | '}' | ']'))
}

/// Sum of the positive postings, at cost where a cost is known.
pub fn magnitude(posts: &[Post]) -> Result<Balance, XactError> {
    let mut total = Balance::new();
    for post in posts {
        if !post.amount.is_null() && post.amount.sign()? > 0 {
            total.add_amount(post.cost_or_amount())?;
        }
    }
    Ok(total)
}

fn unbalanced(remainder: &Balance, posts: &[Post]) -> Result<XactError, XactError> {
    Ok(XactError::DoesNotBalance {
        remainder: remainder.to_string(),
        magnitude: magnitude(posts)?.to_string(),
    })
}

/// Balance a list of postings.
///
/// Infers the amount of a single null posting (adding one generated posting
/// per extra commodity), routes single-posting remainders to the bucket,
/// derives a per-unit cost for two-commodity postings without costs, and,
/// when `date` is known, records prices and folds lot gains or losses into
/// the cost.
pub fn finalize_posts(
    posts: &mut Vec<Post>,
    date: Option<NaiveDate>,
    ctx: &FinalizeContext<'_>,
) -> Result<(), XactError> {
    let mut balance = Balance::new();
    let mut null_post: Option<usize> = None;

    for (idx, post) in posts.iter().enumerate() {
        if !post.must_balance() {
            continue;
        }
        let p = post.cost_or_amount();
        if !p.is_null() {
            balance.add_amount(&balancing_amount(p)?)?;
        } else if let Some(first) = null_post {
            let this_name = ctx.accounts.full_name(post.account);
            let first_name = ctx.accounts.full_name(posts[first].account);
            if ends_with_special_char(this_name) {
                return Err(XactError::MisspelledNullPostAccount(this_name.to_string()));
            }
            if ends_with_special_char(first_name) {
                return Err(XactError::MisspelledNullPostAccount(first_name.to_string()));
            }
            return Err(XactError::MultipleNullPosts);
        } else {
            null_post = Some(idx);
        }
    }
    tracing::debug!(balance = %balance, "initial transaction balance");

    if let Some(bucket) = ctx.bucket {
        if posts.len() == 1 && !balance.is_empty() {
            let state = posts[0].item.state;
            posts.push(Post::generated(bucket, Amount::null(), state));
            null_post = Some(posts.len() - 1);
        }
    }

    if null_post.is_none() && balance.len() == 2 {
        infer_per_unit_cost(posts, &mut balance)?;
    }

    if date.is_some() {
        fold_costs(posts, date, &mut balance, ctx.pool)?;
    }

    if let Some(idx) = null_post {
        let state = posts[idx].item.state;
        let account = posts[idx].account;
        let virtual_flags = posts[idx].flags & (PostFlags::VIRTUAL | PostFlags::MUST_BALANCE);
        let sorted: Vec<Amount> = balance.sorted_amounts().into_iter().cloned().collect();
        for (n, amount) in sorted.iter().enumerate() {
            let negated = amount.negated()?;
            if n == 0 {
                posts[idx].amount = negated;
                posts[idx].flags |= PostFlags::CALCULATED;
            } else {
                let mut post = Post::generated(account, negated, state);
                post.flags |= PostFlags::CALCULATED | virtual_flags;
                posts.push(post);
            }
        }
        balance = Balance::new();
    }

    if !balance.is_empty() && !balance.is_zero()? {
        tracing::debug!(remainder = %balance, "transaction does not balance");
        return Err(unbalanced(&balance, posts)?);
    }
    Ok(())
}

fn infer_per_unit_cost(posts: &mut [Post], balance: &mut Balance) -> Result<(), XactError> {
    let mut saw_cost = false;
    let mut top_post: Option<usize> = None;
    for (idx, post) in posts.iter().enumerate() {
        if !post.amount.is_null() && post.must_balance() {
            if post.amount.has_annotation()? || top_post.is_none() {
                top_post = Some(idx);
            }
        }
        if post.cost.is_some() && !post.flags.contains(PostFlags::COST_CALCULATED) {
            saw_cost = true;
            break;
        }
    }
    let Some(top) = top_post.filter(|_| !saw_cost) else {
        return Ok(());
    };

    let pair: Vec<Amount> = balance.amounts().cloned().collect();
    let (mut x, mut y) = (pair[0].clone(), pair[1].clone());
    if !(x.is_nonzero()? && y.is_nonzero()?) {
        return Ok(());
    }
    if !same_commodity(&x, &posts[top].amount) {
        std::mem::swap(&mut x, &mut y);
    }
    let per_unit_cost = y.checked_div(&x)?.abs()?.unrounded()?;
    tracing::debug!(primary = %x, secondary = %y, per_unit_cost = %per_unit_cost, "inferring cost");

    for post in posts.iter_mut() {
        if post.must_balance() && !post.amount.is_null() && same_commodity(&post.amount, &x) {
            balance.sub_amount(&post.amount)?;
            let cost = per_unit_cost.checked_mul(&post.amount)?;
            balance.add_amount(&cost)?;
            post.cost = Some(cost);
            post.flags |= PostFlags::COST_CALCULATED;
        }
    }
    Ok(())
}

fn same_commodity(a: &Amount, b: &Amount) -> bool {
    match (a.commodity(), b.commodity()) {
        (Some(x), Some(y)) => std::rc::Rc::ptr_eq(x, y),
        (None, None) => true,
        _ => false,
    }
}

fn fold_costs(
    posts: &mut [Post],
    date: Option<NaiveDate>,
    balance: &mut Balance,
    pool: &CommodityPool,
) -> Result<(), XactError> {
    let moment = date.map(|d| d.and_time(NaiveTime::MIN));
    for post in posts.iter_mut() {
        let Some(cost) = post.cost.clone() else {
            continue;
        };
        if same_commodity(&post.amount, &cost) {
            return Err(XactError::CostInSameCommodity);
        }

        let add_price = !post.flags.contains(PostFlags::COST_VIRTUAL);
        let breakdown = pool.exchange(&post.amount, &cost, false, add_price, moment, None)?;

        let lot_price = if post.amount.has_annotation()? {
            post.amount.annotation()?.price.is_some()
        } else {
            false
        };
        if lot_price {
            if same_commodity(&breakdown.basis_cost, &breakdown.final_cost) {
                let gain_loss = breakdown.basis_cost.checked_sub(&breakdown.final_cost)?;
                if gain_loss.is_nonzero()? {
                    let gain_loss = gain_loss.rounded()?;
                    tracing::debug!(gain_loss = %gain_loss, "folding gain or loss into cost");
                    if post.must_balance() {
                        balance.add_amount(&gain_loss.reduced()?)?;
                    }
                    post.cost = Some(cost.checked_add(&gain_loss)?);
                }
            }
        } else {
            post.amount = retag(&breakdown.amount, &post.amount, pool)?;
        }

        if post.flags.contains(PostFlags::COST_FIXATED) && post.amount.has_annotation()? {
            let details = post.amount.annotation()?;
            if details.price.is_some() {
                details.set_flags(AnnotationFlags::PRICE_FIXATED, true);
            }
        }
    }
    Ok(())
}

/// Keep the lot tag the posting was written with on the exchanged amount.
fn retag(exchanged: &Amount, original: &Amount, pool: &CommodityPool) -> Result<Amount, XactError> {
    if !exchanged.has_annotation()? || !original.has_annotation()? {
        return Ok(exchanged.clone());
    }
    let current = exchanged.annotation()?;
    let tag = original.annotation()?.tag.clone();
    if tag.is_none() || tag == current.tag {
        return Ok(exchanged.clone());
    }
    let mut details = Annotation::new(current.price.clone(), current.date, tag);
    details.value_expr.clone_from(&current.value_expr);
    let details = details.with_flags(current.flags());
    Ok(exchanged.annotate(details, pool)?)
}

/// Check that balanced postings still sum to zero.
pub fn verify_posts(posts: &[Post]) -> Result<(), XactError> {
    let mut balance = Balance::new();
    for post in posts.iter().filter(|p| p.must_balance()) {
        let p = post.cost_or_amount();
        if !p.is_null() {
            balance.add_amount(&balancing_amount(p)?)?;
        }
    }
    for post in posts {
        if let Some(cost) = &post.cost {
            if same_commodity(&post.amount, cost) {
                return Err(XactError::CostInSameCommodity);
            }
        }
    }
    if !balance.is_empty() && !balance.is_zero()? {
        return Err(unbalanced(&balance, posts)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (CommodityPool, Accounts) {
        (CommodityPool::with_builtins(), Accounts::new())
    }

    fn post(accounts: &mut Accounts, name: &str, amount: &str, pool: &CommodityPool) -> Post {
        let id = accounts.find_account(AccountId::ROOT, name, true).unwrap();
        let amount = if amount.is_empty() {
            Amount::null()
        } else {
            Amount::parse(amount, pool).unwrap()
        };
        Post::new(id, amount)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    #[test]
    fn test_null_post_inferred() {
        let (pool, mut accounts) = setup();
        let mut xact = Xact::new(date(), "Grocer");
        xact.posts.push(post(&mut accounts, "Expenses:Food", "$12.50", &pool));
        xact.posts.push(post(&mut accounts, "Assets:Cash", "", &pool));

        let ctx = FinalizeContext { accounts: &accounts, pool: &pool, bucket: None };
        assert!(xact.finalize(&ctx).unwrap());
        assert_eq!(xact.posts[1].amount.to_string(), "$-12.50");
        assert!(xact.posts[1].flags.contains(PostFlags::CALCULATED));
    }

    #[test]
    fn test_null_post_splits_per_commodity() {
        let (pool, mut accounts) = setup();
        let mut xact = Xact::new(date(), "Trip");
        xact.posts.push(post(&mut accounts, "Expenses:Food", "$10.00", &pool));
        xact.posts.push(post(&mut accounts, "Expenses:Hotel", "20 EUR", &pool));
        xact.posts.push(post(&mut accounts, "Assets:Cash", "", &pool));

        let ctx = FinalizeContext { accounts: &accounts, pool: &pool, bucket: None };
        assert!(xact.finalize(&ctx).unwrap());
        assert_eq!(xact.posts.len(), 4);
        assert!(xact.posts[3].item.is_generated());
        assert_eq!(xact.posts[2].account, xact.posts[3].account);
    }

    #[test]
    fn test_unbalanced() {
        let (pool, mut accounts) = setup();
        let mut xact = Xact::new(date(), "Grocer");
        xact.posts.push(post(&mut accounts, "Expenses:Food", "$12.50", &pool));
        xact.posts.push(post(&mut accounts, "Assets:Cash", "$-12.00", &pool));

        let ctx = FinalizeContext { accounts: &accounts, pool: &pool, bucket: None };
        let err = xact.finalize(&ctx).unwrap_err();
        assert_eq!(err.to_string(), "Transaction does not balance");
        match err {
            XactError::DoesNotBalance { remainder, magnitude } => {
                assert_eq!(remainder, "$0.50");
                assert_eq!(magnitude, "$12.50");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_two_null_posts() {
        let (pool, mut accounts) = setup();
        let mut xact = Xact::new(date(), "Grocer");
        xact.posts.push(post(&mut accounts, "Expenses:Food", "$12.50", &pool));
        xact.posts.push(post(&mut accounts, "Assets:Cash", "", &pool));
        xact.posts.push(post(&mut accounts, "Assets:Bank", "", &pool));
        let ctx = FinalizeContext { accounts: &accounts, pool: &pool, bucket: None };
        assert_eq!(xact.finalize(&ctx).unwrap_err(), XactError::MultipleNullPosts);
    }

    #[test]
    fn test_misspelled_null_post_account() {
        let (pool, mut accounts) = setup();
        let mut xact = Xact::new(date(), "Grocer");
        xact.posts.push(post(&mut accounts, "Assets:Cash", "", &pool));
        xact.posts.push(post(&mut accounts, "Expenses:Food $12.50", "", &pool));
        let ctx = FinalizeContext { accounts: &accounts, pool: &pool, bucket: None };
        assert_eq!(
            xact.finalize(&ctx).unwrap_err(),
            XactError::MisspelledNullPostAccount("Expenses:Food $12.50".to_string())
        );
    }

    #[test]
    fn test_bucket_absorbs_single_post() {
        let (pool, mut accounts) = setup();
        let bucket = accounts.find_account(AccountId::ROOT, "Assets:Checking", true).unwrap();
        let mut xact = Xact::new(date(), "Rent");
        xact.posts.push(post(&mut accounts, "Expenses:Rent", "$500.00", &pool));
        let ctx = FinalizeContext { accounts: &accounts, pool: &pool, bucket: Some(bucket) };
        assert!(xact.finalize(&ctx).unwrap());
        assert_eq!(xact.posts.len(), 2);
        assert_eq!(xact.posts[1].account, bucket);
        assert_eq!(xact.posts[1].amount.to_string(), "$-500.00");
    }

    #[test]
    fn test_two_commodities_infer_cost() {
        let (pool, mut accounts) = setup();
        let mut xact = Xact::new(date(), "Broker");
        xact.posts.push(post(&mut accounts, "Assets:Broker", "10 AAPL", &pool));
        xact.posts.push(post(&mut accounts, "Assets:Cash", "$-1500.00", &pool));
        let ctx = FinalizeContext { accounts: &accounts, pool: &pool, bucket: None };
        assert!(xact.finalize(&ctx).unwrap());
        assert!(xact.posts[0].flags.contains(PostFlags::COST_CALCULATED));
        let expected = Amount::parse("$1500.00", &pool).unwrap();
        let cost = xact.posts[0].cost.as_ref().unwrap();
        assert_eq!(cost.compare(&expected).unwrap(), std::cmp::Ordering::Equal);

        let aapl = pool.find("AAPL").unwrap();
        let prices = pool.prices(&aapl);
        assert_eq!(prices.len(), 1);
        let per_unit = Amount::parse("$150", &pool).unwrap();
        assert_eq!(prices[0].price.compare(&per_unit).unwrap(), std::cmp::Ordering::Equal);
        assert!(xact.posts[0].amount.has_annotation().unwrap());
    }

    #[test]
    fn test_cost_in_same_commodity() {
        let (pool, mut accounts) = setup();
        let mut xact = Xact::new(date(), "Odd");
        let mut p = post(&mut accounts, "Assets:Cash", "$10.00", &pool);
        p.cost = Some(Amount::parse("$10.00", &pool).unwrap());
        xact.posts.push(p);
        xact.posts.push(post(&mut accounts, "Income", "", &pool));
        let ctx = FinalizeContext { accounts: &accounts, pool: &pool, bucket: None };
        assert_eq!(xact.finalize(&ctx).unwrap_err(), XactError::CostInSameCommodity);
    }

    #[test]
    fn test_all_null_ignored() {
        let (pool, mut accounts) = setup();
        let mut xact = Xact::new(date(), "Nothing");
        xact.posts.push(post(&mut accounts, "Assets:Cash", "", &pool));
        let ctx = FinalizeContext { accounts: &accounts, pool: &pool, bucket: None };
        assert!(!xact.finalize(&ctx).unwrap());
    }

    #[test]
    fn test_virtual_posts_do_not_balance() {
        let (pool, mut accounts) = setup();
        let mut xact = Xact::new(date(), "Budget");
        let mut p = post(&mut accounts, "Budget:Food", "$50.00", &pool);
        p.flags |= PostFlags::VIRTUAL;
        xact.posts.push(p);
        xact.posts.push(post(&mut accounts, "Expenses:Food", "$5.00", &pool));
        xact.posts.push(post(&mut accounts, "Assets:Cash", "", &pool));
        let ctx = FinalizeContext { accounts: &accounts, pool: &pool, bucket: None };
        assert!(xact.finalize(&ctx).unwrap());
        assert_eq!(xact.posts[2].amount.to_string(), "$-5.00");
        assert!(verify_posts(&xact.posts).is_ok());
    }
}
