//! The journal: everything read from the input, plus the registries that
//! decide whether accounts, commodities, payees and tags are known.

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;
use std::sync::OnceLock;

use regex::{NoExpand, Regex};

use crate::account::{AccountFlags, AccountId, Accounts};
use crate::amount::Amount;
use crate::commodity::{CommodityFlags, CommodityRef};
use crate::error::{JournalError, JournalResult};
use crate::item::{Item, ItemFlags, ItemState};
use crate::pool::CommodityPool;
use crate::post::{Post, PostFlags};
use crate::scope::{BindScope, Scope, Symbol, SymbolKind};
use crate::value::Value;
use crate::xact::{AutoXact, CheckExpr, CheckKind, FinalizeContext, PeriodXact, Xact};

/// How strictly undeclared names are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CheckingStyle {
    /// No checks, and balance assertions are not enforced.
    Permissive,
    /// No checks.
    #[default]
    Normal,
    /// Undeclared names produce warnings (`--strict`).
    Warning,
    /// Undeclared names are errors (`--pedantic`).
    Error,
}

impl CheckingStyle {
    const fn checks(self) -> bool {
        matches!(self, Self::Warning | Self::Error)
    }
}

/// Journal settings that options may change while input is being read.
#[derive(Debug, Default)]
pub struct JournalOptions {
    checking_style: Cell<CheckingStyle>,
    check_payees: Cell<bool>,
    recursive_aliases: Cell<bool>,
    no_aliases: Cell<bool>,
    day_break: Cell<bool>,
}

impl JournalOptions {
    /// Treatment of undeclared names.
    pub fn checking_style(&self) -> CheckingStyle {
        self.checking_style.get()
    }

    /// Set the treatment of undeclared names.
    pub fn set_checking_style(&self, style: CheckingStyle) {
        self.checking_style.set(style);
    }

    /// Whether payees are subject to the checking style.
    pub fn check_payees(&self) -> bool {
        self.check_payees.get()
    }

    /// Subject payees to the checking style.
    pub fn set_check_payees(&self, on: bool) {
        self.check_payees.set(on);
    }

    /// Whether aliases of aliases are expanded.
    pub fn recursive_aliases(&self) -> bool {
        self.recursive_aliases.get()
    }

    /// Expand aliases of aliases.
    pub fn set_recursive_aliases(&self, on: bool) {
        self.recursive_aliases.set(on);
    }

    /// Whether account aliases are ignored.
    pub fn no_aliases(&self) -> bool {
        self.no_aliases.get()
    }

    /// Ignore account aliases.
    pub fn set_no_aliases(&self, on: bool) {
        self.no_aliases.set(on);
    }

    /// Whether timelog entries are split at midnight.
    pub fn day_break(&self) -> bool {
        self.day_break.get()
    }

    /// Split timelog entries at midnight.
    pub fn set_day_break(&self, on: bool) {
        self.day_break.set(on);
    }
}

/// Everything read into a session.
#[derive(Debug, Default)]
pub struct Journal {
    /// The account tree.
    pub accounts: Accounts,
    /// Account that balances single-posting transactions (`bucket`/`A`).
    pub bucket: Option<AccountId>,
    /// Finalized transactions, in input order.
    pub xacts: Vec<Xact>,
    /// Automated transactions.
    pub auto_xacts: Vec<AutoXact>,
    /// Periodic transactions.
    pub period_xacts: Vec<PeriodXact>,
    options: Rc<JournalOptions>,
    /// Default valuation expression (`value` directive).
    pub value_expr: Option<String>,
    /// Checks attached to metadata keys by the `tag` directive.
    pub tag_check_exprs: Vec<(String, CheckExpr)>,
    account_aliases: HashMap<String, AccountId>,
    payee_aliases: Vec<(Regex, String)>,
    payee_uuids: HashMap<String, String>,
    payees_for_unknown_accounts: Vec<(Regex, AccountId)>,
    known_payees: BTreeSet<String>,
    known_tags: BTreeSet<String>,
    deferred_posts: Vec<Post>,
    warnings: Vec<String>,
}

fn account_variable() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$account\b").unwrap_or_else(|_| unreachable!()))
}

impl Journal {
    /// An empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings shared with option handlers.
    pub fn options(&self) -> &Rc<JournalOptions> {
        &self.options
    }

    /// The root account.
    pub const fn master(&self) -> AccountId {
        AccountId::ROOT
    }

    /// Find or create an account by full name.
    pub fn find_account(&mut self, name: &str) -> AccountId {
        self.accounts
            .find_account(AccountId::ROOT, name, true)
            .unwrap_or(AccountId::ROOT)
    }

    /// Record a warning for the parser to report.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%message, "journal warning");
        self.warnings.push(message);
    }

    /// Drain the warnings recorded so far.
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    /// Make `alias` stand for `account`.
    pub fn add_account_alias(&mut self, alias: &str, account: AccountId) {
        tracing::debug!(alias, account = self.accounts.full_name(account), "account alias");
        self.account_aliases.insert(alias.to_string(), account);
    }

    /// Rewrite payees matching `mask` to `payee`.
    pub fn add_payee_alias(&mut self, mask: Regex, payee: impl Into<String>) {
        self.payee_aliases.push((mask, payee.into()));
    }

    /// Map a transaction `UUID` metadata value to a payee.
    pub fn add_payee_uuid(&mut self, uuid: impl Into<String>, payee: impl Into<String>) {
        self.payee_uuids.insert(uuid.into(), payee.into());
    }

    /// Payee registered for `uuid`.
    pub fn payee_for_uuid(&self, uuid: &str) -> Option<&str> {
        self.payee_uuids.get(uuid).map(String::as_str)
    }

    /// Postings to `Unknown` with a payee matching `mask` go to `account`.
    pub fn add_payee_for_unknown_account(&mut self, mask: Regex, account: AccountId) {
        self.payees_for_unknown_accounts.push((mask, account));
    }

    /// Resolve account aliases in `name`, if any apply.
    ///
    /// A whole-name alias wins over an alias of the first component. With
    /// `recursive_aliases`, the result is expanded again.
    pub fn expand_aliases(&mut self, name: &str) -> JournalResult<Option<AccountId>> {
        if self.options.no_aliases() || self.account_aliases.is_empty() {
            return Ok(None);
        }
        let mut result = None;
        let mut seen: Vec<String> = Vec::new();
        let mut name = name.to_string();
        loop {
            if let Some(&target) = self.account_aliases.get(&name) {
                if seen.contains(&name) {
                    return Err(JournalError::AliasRecursion(name));
                }
                seen.push(name.clone());
                result = Some(target);
            } else if let Some((first, rest)) = name.split_once(':') {
                let Some(&target) = self.account_aliases.get(first) else {
                    break;
                };
                if seen.iter().any(|s| s == first) {
                    return Err(JournalError::AliasRecursion(first.to_string()));
                }
                seen.push(first.to_string());
                let expanded = format!("{}:{rest}", self.accounts.full_name(target));
                result = self.accounts.find_account(AccountId::ROOT, &expanded, true);
            } else {
                break;
            }

            match result {
                Some(id) if self.options.recursive_aliases() => name = self.accounts.full_name(id).to_string(),
                _ => break,
            }
        }
        Ok(result)
    }

    /// Resolve an account name used in the input.
    ///
    /// `payee` is the payee of the transaction the name was used in, or
    /// `None` when the account is being declared.
    pub fn register_account(
        &mut self,
        name: &str,
        payee: Option<&str>,
        master: AccountId,
    ) -> JournalResult<AccountId> {
        let mut result = match self.expand_aliases(name)? {
            Some(id) => id,
            None => self
                .accounts
                .find_account(master, name, true)
                .unwrap_or(master),
        };

        if self.accounts.get(result).name == "Unknown" {
            if let Some(payee) = payee {
                if let Some((_, account)) = self
                    .payees_for_unknown_accounts
                    .iter()
                    .find(|(mask, _)| mask.is_match(payee))
                {
                    result = *account;
                }
            }
        }

        if !self.accounts.get(result).is_known() {
            let full_name = self.accounts.full_name(result).to_string();
            match (payee, self.options.checking_style()) {
                (None, _) => self.accounts.get_mut(result).flags |= AccountFlags::KNOWN,
                (Some(_), CheckingStyle::Warning) => {
                    self.warn(format!("Unknown account '{full_name}'"));
                }
                (Some(_), CheckingStyle::Error) => {
                    return Err(JournalError::UnknownAccount(full_name));
                }
                _ => {}
            }
        }
        Ok(result)
    }

    /// Check a commodity used in the input; `from_post` is false for
    /// declarations.
    pub fn register_commodity(&mut self, commodity: &CommodityRef, from_post: bool) -> JournalResult<()> {
        let base = commodity.referent();
        if base.has_flags(CommodityFlags::KNOWN) {
            return Ok(());
        }
        if !from_post {
            base.add_flags(CommodityFlags::KNOWN);
            return Ok(());
        }
        match self.options.checking_style() {
            CheckingStyle::Warning => {
                self.warn(format!("Unknown commodity '{}'", base.symbol()));
                Ok(())
            }
            CheckingStyle::Error => Err(JournalError::UnknownCommodity(base.symbol().to_string())),
            _ => Ok(()),
        }
    }

    /// Check a payee and apply payee aliases; `from_xact` is false for
    /// declarations.
    pub fn register_payee(&mut self, name: &str, from_xact: bool) -> JournalResult<String> {
        if self.options.check_payees() && self.options.checking_style().checks() && !self.known_payees.contains(name) {
            if !from_xact {
                self.known_payees.insert(name.to_string());
            } else if self.options.checking_style() == CheckingStyle::Warning {
                self.warn(format!("Unknown payee '{name}'"));
            } else {
                return Err(JournalError::UnknownPayee(name.to_string()));
            }
        }
        Ok(self
            .payee_aliases
            .iter()
            .find(|(mask, _)| mask.is_match(name))
            .map_or_else(|| name.to_string(), |(_, payee)| payee.clone()))
    }

    /// Check a metadata key and run its `tag` checks against `value`.
    ///
    /// With no `scope` the key is being declared.
    pub fn register_metadata(
        &mut self,
        key: &str,
        value: Option<&str>,
        scope: Option<&dyn Scope>,
    ) -> JournalResult<()> {
        self.check_known_tag(key, scope.is_some())?;
        if let (Some(value), Some(scope)) = (value, scope) {
            let mut warnings = Vec::new();
            self.run_tag_checks(key, value, scope, &mut warnings)?;
            self.warnings.extend(warnings);
        }
        Ok(())
    }

    fn check_known_tag(&mut self, key: &str, used: bool) -> JournalResult<()> {
        if !self.options.checking_style().checks() || self.known_tags.contains(key) {
            return Ok(());
        }
        if !used {
            self.known_tags.insert(key.to_string());
        } else if self.options.checking_style() == CheckingStyle::Warning {
            self.warn(format!("Unknown metadata tag '{key}'"));
        } else {
            return Err(JournalError::UnknownMetadataTag(key.to_string()));
        }
        Ok(())
    }

    fn run_tag_checks(
        &self,
        key: &str,
        value: &str,
        scope: &dyn Scope,
        warnings: &mut Vec<String>,
    ) -> JournalResult<()> {
        for (tag, check) in self.tag_check_exprs.iter().filter(|(tag, _)| tag == key) {
            let bound = BindScope::new(scope).bind("value", value);
            if check.kind == CheckKind::General {
                check.expr.calc(&bound)?;
                continue;
            }
            if check.expr.calc(&bound)?.is_true()? {
                continue;
            }
            if check.kind == CheckKind::Assertion {
                return Err(JournalError::MetadataAssertion {
                    key: tag.clone(),
                    value: value.to_string(),
                    expr: check.expr.to_string(),
                });
            }
            warnings.push(format!(
                "Metadata check failed for ({tag}: {value}): {}",
                check.expr
            ));
        }
        Ok(())
    }

    /// Register an automated transaction.
    pub fn add_auto_xact(&mut self, auto: AutoXact) {
        tracing::debug!(predicate = ?auto.predicate, "adding automated transaction");
        self.auto_xacts.push(auto);
    }

    /// Register a periodic transaction.
    pub fn add_period_xact(&mut self, period: PeriodXact) {
        tracing::debug!(period = %period.period_text, "adding periodic transaction");
        self.period_xacts.push(period);
    }

    /// Finalize `xact`, apply automated transactions to it, and record it.
    ///
    /// Returns `Ok(false)` if the transaction held only null postings and
    /// was dropped.
    pub fn add_xact(
        &mut self,
        mut xact: Xact,
        pool: &CommodityPool,
        scope: &dyn Scope,
    ) -> JournalResult<bool> {
        let ctx = FinalizeContext {
            accounts: &self.accounts,
            pool,
            bucket: self.bucket,
        };
        if !xact.finalize(&ctx)? {
            tracing::debug!(payee = %xact.payee, "ignoring transaction with only null postings");
            return Ok(false);
        }

        self.extend_xact(&mut xact, pool, scope)?;
        self.check_all_metadata(&xact, scope)?;

        for post in &xact.posts {
            if post.flags.contains(PostFlags::DEFERRED) {
                self.deferred_posts.push(post.clone());
            } else {
                self.accounts.add_to_total(post.account, &post.amount)?;
            }
        }
        tracing::debug!(payee = %xact.payee, posts = xact.posts.len(), "added transaction");
        self.xacts.push(xact);
        Ok(true)
    }

    /// Add deferred postings to their accounts' totals. Returns how many
    /// were applied.
    pub fn apply_deferred_posts(&mut self) -> JournalResult<usize> {
        let deferred = std::mem::take(&mut self.deferred_posts);
        for post in &deferred {
            self.accounts.add_to_total(post.account, &post.amount)?;
        }
        Ok(deferred.len())
    }

    /// Number of deferred postings not yet applied.
    pub fn deferred_len(&self) -> usize {
        self.deferred_posts.len()
    }

    fn check_all_metadata(&mut self, xact: &Xact, scope: &dyn Scope) -> JournalResult<()> {
        let mut keys: Vec<String> = xact.item.metadata.keys().cloned().collect();
        let mut warnings = Vec::new();

        let bound_xact = xact_scope(scope, xact);
        for (key, value) in &xact.item.metadata {
            if let Some(value) = value {
                self.run_tag_checks(key, value, &bound_xact, &mut warnings)?;
            }
        }
        for post in &xact.posts {
            let bound = PostScope::new(scope, xact, post, &self.accounts);
            for (key, value) in &post.item.metadata {
                keys.push(key.clone());
                if let Some(value) = value {
                    self.run_tag_checks(key, value, &bound, &mut warnings)?;
                }
            }
        }

        self.warnings.extend(warnings);
        for key in keys {
            self.check_known_tag(&key, true)?;
        }
        Ok(())
    }

    fn extend_xact(&mut self, xact: &mut Xact, pool: &CommodityPool, scope: &dyn Scope) -> JournalResult<()> {
        if self.auto_xacts.is_empty() {
            return Ok(());
        }
        let autos = std::mem::take(&mut self.auto_xacts);
        let result = autos
            .iter()
            .try_for_each(|auto| self.apply_auto_xact(auto, xact, pool, scope));
        self.auto_xacts = autos;
        result
    }

    fn apply_auto_xact(
        &mut self,
        auto: &AutoXact,
        xact: &mut Xact,
        pool: &CommodityPool,
        scope: &dyn Scope,
    ) -> JournalResult<()> {
        let initial = xact.posts.len();
        let mut needs_verify = false;

        for idx in 0..initial {
            if xact.posts[idx].item.is_generated() {
                continue;
            }
            let matched_account = self.accounts.full_name(xact.posts[idx].account).to_string();
            let mut amounts = Vec::with_capacity(auto.posts.len());
            {
                let bound = PostScope::new(scope, xact, &xact.posts[idx], &self.accounts);
                let matched = match auto.memoized(&matched_account) {
                    Some(m) => m,
                    None => {
                        let m = auto.predicate.matches(&bound)?;
                        auto.memoize(&matched_account, m);
                        m
                    }
                };
                if !matched {
                    continue;
                }
                tracing::trace!(account = %matched_account, auto = %auto.description(), "automated transaction matched");

                for check in &auto.check_exprs {
                    let result = check.expr.calc(&bound)?;
                    if check.kind == CheckKind::General || result.is_true()? {
                        continue;
                    }
                    if check.kind == CheckKind::Assertion {
                        return Err(JournalError::TransactionAssertion(check.expr.to_string()));
                    }
                    self.warnings
                        .push(format!("Transaction check failed: {}", check.expr));
                }

                for template in &auto.posts {
                    let amount = if template.amount.is_null() {
                        let expr = template
                            .amount_expr
                            .as_ref()
                            .ok_or(JournalError::AutoPostWithoutAmount)?;
                        match expr.calc(&bound)? {
                            Value::Integer(i) => Amount::from_i64(i),
                            Value::Amount(a) => a,
                            _ => return Err(JournalError::AmountExprNotSimple),
                        }
                    } else {
                        template.amount.clone()
                    };
                    let amount = if amount.has_commodity() {
                        amount
                    } else {
                        xact.posts[idx].amount.checked_mul(&amount)?
                    };
                    amounts.push(amount);
                }
            }

            for note in auto.deferred_notes.iter().filter(|n| n.post_index.is_none()) {
                xact.posts[idx]
                    .item
                    .append_note(&note.text, pool, scope, note.overwrite)?;
            }

            for (t_idx, (template, amount)) in auto.posts.iter().zip(amounts).enumerate() {
                let template_name = self.accounts.full_name(template.account).to_string();
                let account_name = if template_name.contains("$account") {
                    account_variable()
                        .replace_all(&template_name, NoExpand(&matched_account))
                        .into_owned()
                } else {
                    template_name
                };

                let mut post = Post::new(template.account, amount);
                post.copy_details(template);
                if xact.item.state == ItemState::Cleared {
                    post.item.state = ItemState::Cleared;
                }
                post.item.flags |= ItemFlags::GENERATED;
                post.account = self.register_account(&account_name, Some(&xact.payee), AccountId::ROOT)?;

                for note in auto
                    .deferred_notes
                    .iter()
                    .filter(|n| n.post_index == Some(t_idx))
                {
                    post.item.append_note(&note.text, pool, scope, note.overwrite)?;
                }
                needs_verify |= post.must_balance();
                xact.posts.push(post);
            }
        }

        if needs_verify {
            xact.verify()?;
        }
        Ok(())
    }
}

/// Exposes `payee`, `date` and `code` of `xact` in front of `parent`.
pub fn xact_scope<'a>(parent: &'a dyn Scope, xact: &Xact) -> BindScope<'a> {
    let mut bound = BindScope::new(parent).bind("payee", xact.payee.as_str());
    if let Some(date) = xact.item.date {
        bound = bound.bind("date", date);
    }
    if let Some(code) = &xact.code {
        bound = bound.bind("code", code.as_str());
    }
    bound
}

/// Exposes one posting, and its transaction, to expressions.
///
/// Binds `account`, `account_base`, `payee`, `code`, `note`, `date`,
/// `amount`, `cost`, `total`, `state`, `cleared`, `pending`, `virtual`,
/// `real`, `has_tag(name)` and `tag(name)`; anything else is looked up in
/// the parent.
pub struct PostScope<'a> {
    parent: &'a dyn Scope,
    xact: &'a Xact,
    post: &'a Post,
    accounts: &'a Accounts,
}

impl<'a> PostScope<'a> {
    /// Bind `post` of `xact` in front of `parent`.
    pub fn new(parent: &'a dyn Scope, xact: &'a Xact, post: &'a Post, accounts: &'a Accounts) -> Self {
        Self {
            parent,
            xact,
            post,
            accounts,
        }
    }

    fn metadata(&self) -> Rc<BTreeMap<String, Option<String>>> {
        let mut merged = self.xact.item.metadata.clone();
        merged.extend(self.post.item.metadata.clone());
        Rc::new(merged)
    }

    fn note(item: &Item) -> Option<Value> {
        item.note.as_deref().map(Value::from)
    }
}

fn find_tag<'m>(
    metadata: &'m BTreeMap<String, Option<String>>,
    args: &[Value],
) -> Option<(&'m String, &'m Option<String>)> {
    match args.first()? {
        Value::Mask(re) => metadata.iter().find(|(k, _)| re.is_match(k)),
        other => {
            let name = other.to_text();
            metadata.get_key_value(&name)
        }
    }
}

impl Scope for PostScope<'_> {
    fn lookup(&self, kind: SymbolKind, name: &str) -> Option<Symbol> {
        if kind != SymbolKind::Function {
            return self.parent.lookup(kind, name);
        }
        let post = self.post;
        let value = match name {
            "account" => Value::from(self.accounts.full_name(post.account)),
            "account_base" => Value::from(self.accounts.get(post.account).name.as_str()),
            "payee" => Value::from(self.xact.payee.as_str()),
            "code" => self
                .xact
                .code
                .as_deref()
                .map_or(Value::Null, Value::from),
            "note" => Self::note(&post.item)
                .or_else(|| Self::note(&self.xact.item))
                .unwrap_or_default(),
            "date" => post
                .item
                .date
                .or(self.xact.item.date)
                .map_or(Value::Null, Value::Date),
            "amount" if post.amount.is_null() => Value::Null,
            "amount" => Value::Amount(post.amount.clone()),
            "cost" if post.cost_or_amount().is_null() => Value::Null,
            "cost" => Value::Amount(post.cost_or_amount().clone()),
            "total" => Value::Balance(self.accounts.get(post.account).total.clone()),
            "state" => Value::Integer(match post.item.state {
                ItemState::Uncleared => 0,
                ItemState::Cleared => 1,
                ItemState::Pending => 2,
            }),
            "cleared" => Value::Boolean(post.item.state == ItemState::Cleared),
            "pending" => Value::Boolean(post.item.state == ItemState::Pending),
            "virtual" => Value::Boolean(post.is_virtual()),
            "real" => Value::Boolean(!post.is_virtual()),
            "has_tag" => {
                let metadata = self.metadata();
                return Some(Symbol::function(move |args| {
                    Ok(Value::Boolean(find_tag(&metadata, args).is_some()))
                }));
            }
            "tag" => {
                let metadata = self.metadata();
                return Some(Symbol::function(move |args| {
                    Ok(match find_tag(&metadata, args) {
                        Some((_, Some(value))) => Value::from(value.as_str()),
                        Some((_, None)) => Value::Boolean(true),
                        None => Value::Null,
                    })
                }));
            }
            _ => return self.parent.lookup(kind, name),
        };
        Some(Symbol::Value(value))
    }

    fn define(&self, kind: SymbolKind, name: &str, symbol: Symbol) {
        self.parent.define(kind, name, symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{compile_mask, Expr};
    use crate::predicate::Predicate;
    use crate::scope::SymbolScope;
    use chrono::NaiveDate;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
    }

    fn xact(journal: &mut Journal, pool: &CommodityPool, lines: &[(&str, &str)]) -> Xact {
        let mut xact = Xact::new(date(), "Grocer");
        for (account, amount) in lines {
            let id = journal.find_account(account);
            let amount = if amount.is_empty() {
                Amount::null()
            } else {
                Amount::parse(amount, pool).unwrap()
            };
            xact.posts.push(Post::new(id, amount));
        }
        xact
    }

    #[test]
    fn test_add_xact_updates_totals() {
        let pool = CommodityPool::with_builtins();
        let scope = SymbolScope::new();
        let mut journal = Journal::new();
        let x = xact(&mut journal, &pool, &[("Expenses:Food", "$20.00"), ("Assets:Cash", "")]);
        assert!(journal.add_xact(x, &pool, &scope).unwrap());

        let cash = journal.accounts.lookup(AccountId::ROOT, "Assets:Cash").unwrap();
        assert_eq!(journal.accounts.get(cash).total.to_string(), "$-20.00");
        assert_eq!(journal.xacts.len(), 1);
    }

    #[test]
    fn test_aliases() {
        let mut journal = Journal::new();
        let checking = journal.find_account("Assets:Bank:Checking");
        journal.add_account_alias("chk", checking);
        let bank = journal.find_account("Assets:Bank");
        journal.add_account_alias("bank", bank);

        let id = journal.register_account("chk", None, AccountId::ROOT).unwrap();
        assert_eq!(id, checking);
        let id = journal.register_account("bank:Savings", None, AccountId::ROOT).unwrap();
        assert_eq!(journal.accounts.full_name(id), "Assets:Bank:Savings");

        journal.options().set_no_aliases(true);
        let id = journal.register_account("chk", None, AccountId::ROOT).unwrap();
        assert_eq!(journal.accounts.full_name(id), "chk");
    }

    #[test]
    fn test_recursive_alias_loop() {
        let mut journal = Journal::new();
        journal.options().set_recursive_aliases(true);
        let a = journal.find_account("A");
        let b = journal.find_account("B");
        journal.add_account_alias("A", b);
        journal.add_account_alias("B", a);
        assert_eq!(
            journal.expand_aliases("A").unwrap_err(),
            JournalError::AliasRecursion("A".to_string())
        );
    }

    #[test]
    fn test_pedantic_unknown_account() {
        let mut journal = Journal::new();
        journal.options().set_checking_style(CheckingStyle::Error);
        journal.register_account("Assets:Cash", None, AccountId::ROOT).unwrap();
        assert!(journal.register_account("Assets:Cash", Some("Shop"), AccountId::ROOT).is_ok());
        assert_eq!(
            journal
                .register_account("Expenses:Food", Some("Shop"), AccountId::ROOT)
                .unwrap_err(),
            JournalError::UnknownAccount("Expenses:Food".to_string())
        );
    }

    #[test]
    fn test_strict_unknown_payee_warns() {
        let mut journal = Journal::new();
        journal.options().set_checking_style(CheckingStyle::Warning);
        journal.options().set_check_payees(true);
        journal.register_payee("Landlord", false).unwrap();
        journal.register_payee("Landlord", true).unwrap();
        journal.register_payee("Grocer", true).unwrap();
        assert_eq!(journal.take_warnings(), vec!["Unknown payee 'Grocer'".to_string()]);
    }

    #[test]
    fn test_payee_alias_and_unknown_account() {
        let mut journal = Journal::new();
        journal.add_payee_alias(compile_mask("^kroger").unwrap(), "Kroger");
        assert_eq!(journal.register_payee("KROGER #123", true).unwrap(), "Kroger");

        let food = journal.find_account("Expenses:Food");
        journal.add_payee_for_unknown_account(compile_mask("kroger").unwrap(), food);
        let id = journal
            .register_account("Unknown", Some("Kroger"), AccountId::ROOT)
            .unwrap();
        assert_eq!(id, food);
    }

    #[test]
    fn test_auto_xact_multiplies_matched_amount() {
        let pool = CommodityPool::with_builtins();
        let scope = SymbolScope::new();
        let mut journal = Journal::new();

        let mut auto = AutoXact::new(Predicate::parse("Food", &pool).unwrap());
        let budget = journal.find_account("Budget:Food");
        let mut template = Post::new(budget, Amount::parse("-1", &pool).unwrap());
        template.flags |= PostFlags::VIRTUAL;
        auto.posts.push(template);
        journal.add_auto_xact(auto);

        let x = xact(&mut journal, &pool, &[("Expenses:Food", "$20.00"), ("Assets:Cash", "")]);
        assert!(journal.add_xact(x, &pool, &scope).unwrap());
        let added = &journal.xacts[0];
        assert_eq!(added.posts.len(), 3);
        assert!(added.posts[2].item.is_generated());
        assert_eq!(added.posts[2].amount.to_string(), "$-20.00");
        assert_eq!(journal.accounts.get(budget).total.to_string(), "$-20.00");
    }

    #[test]
    fn test_auto_xact_account_variable() {
        let pool = CommodityPool::with_builtins();
        let scope = SymbolScope::new();
        let mut journal = Journal::new();

        let mut auto = AutoXact::new(Predicate::parse("Expenses", &pool).unwrap());
        let target = journal.find_account("$account:Tax");
        let mut template = Post::new(target, Amount::parse("0.1", &pool).unwrap());
        template.flags |= PostFlags::VIRTUAL;
        auto.posts.push(template);
        journal.add_auto_xact(auto);

        let x = xact(&mut journal, &pool, &[("Expenses:Food", "$20.00"), ("Assets:Cash", "")]);
        journal.add_xact(x, &pool, &scope).unwrap();
        let generated = &journal.xacts[0].posts[2];
        assert_eq!(journal.accounts.full_name(generated.account), "Expenses:Food:Tax");
    }

    #[test]
    fn test_auto_xact_assertion() {
        let pool = CommodityPool::with_builtins();
        let scope = SymbolScope::new();
        let mut journal = Journal::new();

        let mut auto = AutoXact::new(Predicate::AccountName("Expenses:Food".to_string()));
        auto.check_exprs.push(CheckExpr {
            expr: Expr::parse("amount < $10", &pool).unwrap(),
            kind: CheckKind::Assertion,
        });
        journal.add_auto_xact(auto);

        let x = xact(&mut journal, &pool, &[("Expenses:Food", "$20.00"), ("Assets:Cash", "")]);
        assert_eq!(
            journal.add_xact(x, &pool, &scope).unwrap_err(),
            JournalError::TransactionAssertion("amount < $10".to_string())
        );
    }

    #[test]
    fn test_auto_xact_check_warns() {
        let pool = CommodityPool::with_builtins();
        let scope = SymbolScope::new();
        let mut journal = Journal::new();

        let mut auto = AutoXact::new(Predicate::AccountName("Expenses:Food".to_string()));
        auto.check_exprs.push(CheckExpr {
            expr: Expr::parse("payee == 'Market'", &pool).unwrap(),
            kind: CheckKind::Check,
        });
        journal.add_auto_xact(auto);

        let x = xact(&mut journal, &pool, &[("Expenses:Food", "$20.00"), ("Assets:Cash", "")]);
        assert!(journal.add_xact(x, &pool, &scope).unwrap());
        assert_eq!(
            journal.take_warnings(),
            vec!["Transaction check failed: payee == 'Market'".to_string()]
        );
    }

    #[test]
    fn test_deferred_posts_applied_later() {
        let pool = CommodityPool::with_builtins();
        let scope = SymbolScope::new();
        let mut journal = Journal::new();
        let mut x = xact(&mut journal, &pool, &[("Liabilities:Card", "$-5.00"), ("Expenses:Fees", "")]);
        x.posts[0].flags |= PostFlags::DEFERRED;
        journal.add_xact(x, &pool, &scope).unwrap();

        let card = journal.accounts.lookup(AccountId::ROOT, "Liabilities:Card").unwrap();
        assert!(journal.accounts.get(card).total.is_empty());
        assert_eq!(journal.deferred_len(), 1);
        assert_eq!(journal.apply_deferred_posts().unwrap(), 1);
        assert_eq!(journal.accounts.get(card).total.to_string(), "$-5.00");
    }

    #[test]
    fn test_metadata_assertion() {
        let pool = CommodityPool::with_builtins();
        let scope = SymbolScope::new();
        let mut journal = Journal::new();
        journal.tag_check_exprs.push((
            "Receipt".to_string(),
            CheckExpr {
                expr: Expr::parse("value =~ /^yes$/", &pool).unwrap(),
                kind: CheckKind::Assertion,
            },
        ));
        let mut x = xact(&mut journal, &pool, &[("Expenses:Food", "$1.00"), ("Assets:Cash", "")]);
        x.item.set_tag("Receipt", Some("no".to_string()), true);
        assert_eq!(
            journal.add_xact(x, &pool, &scope).unwrap_err().to_string(),
            "Metadata assertion failed for (Receipt: no): value =~ /^yes$/"
        );
    }

    #[test]
    fn test_post_scope_bindings() {
        let pool = CommodityPool::with_builtins();
        let scope = SymbolScope::new();
        let mut journal = Journal::new();
        let mut x = xact(&mut journal, &pool, &[("Expenses:Food", "$2.50")]);
        x.posts[0].item.set_tag("trip", None, true);
        let bound = PostScope::new(&scope, &x, &x.posts[0], &journal.accounts);

        let eval = |text: &str| Expr::parse(text, &pool).unwrap().calc(&bound).unwrap();
        assert_eq!(eval("account").to_text(), "Expenses:Food");
        assert_eq!(eval("payee").to_text(), "Grocer");
        assert!(eval("real").is_true().unwrap());
        assert!(eval("has_tag('trip')").is_true().unwrap());
        assert!(!eval("has_tag('work')").is_true().unwrap());
        assert!(eval("amount == $2.50").is_true().unwrap());
    }
}
