//! Transactions: plain, automated (`=`) and periodic (`~`), and the
//! posting lines they share.

use std::rc::Rc;

use ledgerkit_core::{
    times, xact_scope, Amount, Annotation, AnnotationFlags, AutoXact, Balance, CheckExpr, CheckKind,
    CheckingStyle, DateInterval, DeferredNote, Expr, FinalizeContext, ItemFlags, ItemState,
    JournalError, KeepDetails, ParseFlags, PeriodXact, Post, PostFlags, PostScope, Predicate, Value,
    Xact,
};

use super::util::{next_element, split_by_separator};
use super::TextualParser;
use crate::apply::ApplyStack;
use crate::error::{ParseError, ParseErrorKind, ParseResult};

const UNSPECIFIED_PAYEE: &str = "<Unspecified payee>";

/// `assert EXPR`, `check EXPR`, `expr EXPR` (and `eval EXPR` where
/// `allow_eval`) inside a transaction body.
fn inline_check(line: &str, allow_eval: bool) -> Option<(&str, &str)> {
    let (keyword, rest) = line.split_once(|c: char| c == ' ' || c == '\t')?;
    let known = matches!(keyword, "assert" | "check" | "expr") || (allow_eval && keyword == "eval");
    known.then(|| (keyword, rest.trim_start()))
}

/// The amount an amount expression produced.
fn simple_amount(value: Value) -> ParseResult<Amount> {
    match value {
        Value::Integer(i) => Ok(Amount::from_i64(i)),
        Value::Amount(amount) => Ok(amount),
        _ => Err(JournalError::AmountExprNotSimple.into()),
    }
}

fn posting_context(err: ParseError, line: &str) -> ParseError {
    err.with_context(format!("While parsing posting:\n  {line}"))
}

impl TextualParser<'_> {
    fn with_source_context(&self, err: ParseError, what: &str, beg: usize) -> ParseError {
        let excerpt = self.ctx().source_excerpt(beg, "> ");
        err.with_context(format!("While parsing {what}:\n{excerpt}"))
    }

    /// A dated transaction and its postings.
    pub(super) fn xact_directive(&mut self, line: &str, apply: &ApplyStack<'_>) -> ParseResult<()> {
        let beg = self.ctx().line_beg_pos;
        let added = match self.parse_xact(line, apply) {
            Ok(xact) => self.journal.add_xact(xact, self.pool, self.scope).map_err(ParseError::from),
            Err(err) => Err(err),
        };
        match added {
            Ok(true) => {
                self.ctx_mut().count += 1;
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(err) => Err(self.with_source_context(err, "transaction", beg)),
        }
    }

    fn parse_xact(&mut self, line: &str, apply: &ApplyStack<'_>) -> ParseResult<Xact> {
        let mut position = self.ctx_mut().begin_item();

        let (dates, rest) = next_element(line, false);
        let (date, aux_date) = split_by_separator(dates, '=', false);
        let mut xact = Xact::new(times::parse_date(date, self.pool.date_context())?, "");
        if let Some(aux) = aux_date {
            xact.item.aux_date = Some(times::parse_date(aux, self.pool.date_context())?);
        }

        let (state, mut rest) = ItemState::parse_mark(rest);
        if let Some(state) = state {
            xact.item.state = state;
        }
        if let Some((code, after)) = rest.strip_prefix('(').and_then(|r| r.split_once(')')) {
            xact.code = Some(code.to_string());
            rest = after.trim_start();
        }

        let (payee, note) = split_by_separator(rest, ';', true);
        xact.payee = if payee.is_empty() {
            UNSPECIFIED_PAYEE.to_string()
        } else {
            self.journal.register_payee(payee, true)?
        };
        if let Some(note) = note {
            xact.item.append_note(note.trim_start(), self.pool, self.scope, false)?;
        }
        for tag in apply.tags() {
            xact.item.parse_tags(tag, self.pool, self.scope, false)?;
        }

        while self.ctx().peek_whitespace_line() {
            let raw = self.read_line()?.unwrap_or_default();
            let line = raw.trim_start();
            if line.is_empty() {
                break;
            }

            if let Some(note) = line.strip_prefix(';') {
                let item = match xact.posts.last_mut() {
                    Some(post) => &mut post.item,
                    None => &mut xact.item,
                };
                item.append_note(note.trim_start(), self.pool, self.scope, true)?;
                item.flags |= ItemFlags::NOTE_ON_NEXT_LINE;
                if let Some(pos) = item.position.as_mut() {
                    self.contexts.current().end_item(pos);
                }
                continue;
            }

            if let Some((keyword, text)) = inline_check(line, false) {
                let expr = Expr::parse(text, self.pool)?;
                let value = match xact.posts.last() {
                    Some(post) => expr.calc(&PostScope::new(self.scope, &xact, post, &self.journal.accounts))?,
                    None => expr.calc(&xact_scope(self.scope, &xact))?,
                };
                if keyword != "expr" && !value.is_true()? {
                    if keyword == "assert" {
                        return Err(JournalError::TransactionAssertion(text.to_string()).into());
                    }
                    self.ctx_mut().warning(format!("Transaction check failed: {text}"));
                }
                continue;
            }

            if xact.posts.is_empty() {
                let mapped = xact
                    .item
                    .tag_value("UUID")
                    .and_then(|uuid| self.journal.payee_for_uuid(uuid))
                    .map(str::to_string);
                if let Some(payee) = mapped {
                    xact.payee = payee;
                }
            }

            let post = self.parse_post(line, Some(&xact), apply, false)?;
            xact.posts.push(post);
        }

        self.ctx().end_item(&mut position);
        xact.item.position = Some(position);
        tracing::trace!(payee = %xact.payee, posts = xact.posts.len(), "parsed transaction");
        Ok(xact)
    }

    /// One posting line, already stripped of its indentation.
    ///
    /// `xact` is the transaction being built, if any; balance assignments
    /// need it. With `defer`, amount expressions are kept for later
    /// evaluation instead of being computed now.
    fn parse_post(
        &mut self,
        line: &str,
        xact: Option<&Xact>,
        apply: &ApplyStack<'_>,
        defer: bool,
    ) -> ParseResult<Post> {
        self.parse_post_line(line, xact, apply, defer)
            .map_err(|err| posting_context(err, line))
    }

    fn parse_post_line(
        &mut self,
        line: &str,
        xact: Option<&Xact>,
        apply: &ApplyStack<'_>,
        defer: bool,
    ) -> ParseResult<Post> {
        let mut post = Post::new(apply.top_account(), Amount::null());
        post.item.position = Some(self.ctx_mut().begin_item());

        let (state, line) = ItemState::parse_mark(line);
        match state {
            Some(state) => post.item.state = state,
            None => {
                if let Some(xact) = xact {
                    post.item.state = xact.item.state;
                }
            }
        }
        if line.is_empty() || line.starts_with(';') {
            return Err(ParseErrorKind::PostingHasNoAccount.into());
        }

        let (name, mut rest) = next_element(line, true);
        let name = if let Some(inner) = name.strip_prefix('[').and_then(|n| n.strip_suffix(']')) {
            post.flags |= PostFlags::VIRTUAL | PostFlags::MUST_BALANCE;
            inner
        } else if let Some(inner) = name.strip_prefix('(').and_then(|n| n.strip_suffix(')')) {
            post.flags |= PostFlags::VIRTUAL;
            inner
        } else if let Some(inner) = name.strip_prefix('<').and_then(|n| n.strip_suffix('>')) {
            post.flags |= PostFlags::DEFERRED;
            inner
        } else {
            name
        };
        let payee = xact.map_or("", |x| x.payee.as_str());
        post.account = self
            .journal
            .register_account(name, Some(payee), apply.top_account())?;

        if !rest.is_empty() && !rest.starts_with(|c: char| c == ';' || c == '=') {
            if rest.starts_with('(') {
                let (expr, after) = Expr::parse_single(rest, self.pool)?;
                if !defer {
                    let value = match xact {
                        Some(xact) => expr.calc(&PostScope::new(self.scope, xact, &post, &self.journal.accounts))?,
                        None => expr.calc(self.scope)?,
                    };
                    post.amount = simple_amount(value)?;
                }
                post.amount_expr = Some(expr);
                post.flags |= PostFlags::AMOUNT_EXPR;
                rest = after.trim_start();
            } else if let Some((amount, after)) = Amount::parse_prefix(rest, self.pool, ParseFlags::NO_REDUCE)? {
                post.amount = amount;
                rest = after.trim_start();
            }

            if let Some(commodity) = post.amount.commodity() {
                self.journal.register_commodity(commodity, true)?;
            }
            self.apply_fixed_rate(&mut post, apply)?;
        }

        rest = self.parse_cost(&mut post, rest)?;

        if let Some(xact) = xact {
            if let Some(after) = rest.strip_prefix('=') {
                rest = self.parse_assignment(&mut post, xact, after)?;
            }
        }

        if let Some(note) = rest.strip_prefix(';') {
            post.item.append_note(note.trim_start(), self.pool, self.scope, true)?;
            rest = "";
        }
        if let Some(c) = rest.chars().next() {
            return Err(ParseErrorKind::UnexpectedText(c.to_string()).into());
        }

        for tag in apply.tags() {
            post.item.parse_tags(tag, self.pool, self.scope, true)?;
        }
        Ok(post)
    }

    /// Under `apply fixed`, give an unannotated amount in a fixed commodity
    /// its fixated lot price.
    fn apply_fixed_rate(&self, post: &mut Post, apply: &ApplyStack<'_>) -> ParseResult<()> {
        if post.amount.is_null() || post.amount.has_annotation()? {
            return Ok(());
        }
        let Some(commodity) = post.amount.commodity().cloned() else {
            return Ok(());
        };
        let rate = apply
            .fixed_rates()
            .into_iter()
            .find(|(fixed, _)| Rc::ptr_eq(fixed, &commodity));
        if let Some((_, price)) = rate {
            let details = Annotation::new(Some(price.clone()), None, None)
                .with_flags(AnnotationFlags::PRICE_FIXATED);
            post.amount = post.amount.annotate(details, self.pool)?;
        }
        Ok(())
    }

    /// `@ COST`, `@@ TOTAL`, `(@) COST`, `(@@) TOTAL`, each optionally
    /// written `@ =COST` to fixate it. Returns the text after the cost.
    fn parse_cost<'l>(&self, post: &mut Post, rest: &'l str) -> ParseResult<&'l str> {
        let (after, virtual_cost) = if let Some(after) = rest.strip_prefix("(@") {
            (after, true)
        } else if let Some(after) = rest.strip_prefix('@') {
            (after, false)
        } else {
            return Ok(rest);
        };
        let (after, per_unit) = match after.strip_prefix('@') {
            Some(after) => (after, false),
            None => (after, true),
        };
        let after = if virtual_cost {
            after.strip_prefix(')').unwrap_or(after)
        } else {
            after
        };

        let mut after = after.trim_start();
        let fixated = if let Some(fixed) = after.strip_prefix('=') {
            if fixed.trim().is_empty() {
                return Err(ParseErrorKind::MissingCostAmount.into());
            }
            after = fixed.trim_start();
            true
        } else {
            false
        };
        if after.is_empty() {
            return Err(ParseErrorKind::ExpectedCostAmount.into());
        }

        let (mut cost, after) = if after.starts_with('(') {
            let (expr, after) = Expr::parse_single(after, self.pool)?;
            (simple_amount(expr.calc(self.scope)?)?, after)
        } else {
            match Amount::parse_prefix(after, self.pool, ParseFlags::NO_MIGRATE)? {
                Some(parsed) => parsed,
                None => return Err(ParseErrorKind::ExpectedCostAmount.into()),
            }
        };

        if cost.sign()? < 0 {
            return Err(ParseErrorKind::NegativeCost.into());
        }
        cost = cost.unrounded()?;
        if per_unit {
            let commodity = cost.commodity().cloned();
            cost = cost.checked_mul(&post.amount)?;
            cost.set_commodity(commodity);
        } else {
            post.flags |= PostFlags::COST_IN_FULL;
            if post.amount.sign()? < 0 {
                cost = cost.negated()?;
            }
        }

        if virtual_cost {
            post.flags |= PostFlags::COST_VIRTUAL;
        }
        if fixated {
            post.flags |= PostFlags::COST_FIXATED;
        }
        post.given_cost = Some(cost.clone());
        post.cost = Some(cost);
        Ok(after.trim_start())
    }

    /// `= AMOUNT` after a posting: fill in a missing amount so the account
    /// reaches `AMOUNT`, or check that it does. Returns the text after it.
    fn parse_assignment<'l>(&self, post: &mut Post, xact: &Xact, text: &'l str) -> ParseResult<&'l str> {
        let text = text.trim_start();
        if text.is_empty() {
            return Err(ParseErrorKind::ExpectedAssignmentAmount.into());
        }

        let (target, after) = if text.starts_with('(') {
            let (expr, after) = Expr::parse_single(text, self.pool)?;
            let value = expr.calc(&PostScope::new(self.scope, xact, post, &self.journal.accounts))?;
            let target = match value {
                Value::Null => Amount::null(),
                other => simple_amount(other)?,
            };
            (target, after)
        } else {
            Amount::parse_prefix(text, self.pool, ParseFlags::NO_MIGRATE)?
                .unwrap_or((Amount::null(), text))
        };
        if target.is_null() {
            return Err(if post.amount.is_null() {
                ParseErrorKind::AssignmentNotConstant
            } else {
                ParseErrorKind::AssertionNotConstant
            }
            .into());
        }

        let account_total = &self.journal.accounts.get(post.account).total;
        let mut diff = Balance::from_amount(&target)?;
        diff.sub_balance(&account_total.strip_annotations(KeepDetails::NONE, self.pool)?)?;
        for prior in xact
            .posts
            .iter()
            .filter(|p| p.account == post.account && !p.amount.is_null())
        {
            diff.sub_amount(&prior.amount.strip_annotations(KeepDetails::NONE, self.pool)?)?;
        }
        if let Some(commodity) = target.commodity() {
            let narrowed = match diff.commodity_amount(Some(commodity), self.pool)? {
                Some(amount) => amount,
                None => target.checked_sub(&target)?,
            };
            diff = Balance::from_amount(&narrowed)?;
        }
        tracing::trace!(
            account = self.journal.accounts.full_name(post.account),
            target = %target,
            diff = %diff,
            "balance assignment"
        );

        if post.amount.is_null() {
            // A satisfied assignment still gets a zero in the target's
            // commodity, so finalization never treats the post as null.
            post.amount = if diff.is_zero()? {
                target.checked_sub(&target)?
            } else {
                diff.to_amount()?
            };
        } else {
            diff.sub_amount(&post.amount)?;
            let permissive = self.journal.options().checking_style() == CheckingStyle::Permissive;
            if !permissive && !diff.is_zero()? {
                let mut expected = diff.negated()?;
                expected.add_amount(&target)?;
                return Err(ParseErrorKind::BalanceAssertion {
                    diff: diff.to_string(),
                    expected: expected.to_string(),
                }
                .into());
            }
        }
        post.assigned_amount = Some(target);
        Ok(after.trim_start())
    }

    /// `= PREDICATE` and its template postings.
    pub(super) fn automated_xact_directive(&mut self, line: &str, apply: &ApplyStack<'_>) -> ParseResult<()> {
        let beg = self.ctx().line_beg_pos;
        match self.parse_auto_xact(line, apply) {
            Ok(auto) => {
                self.journal.add_auto_xact(auto);
                Ok(())
            }
            Err(err) => Err(self.with_source_context(err, "automated transaction", beg)),
        }
    }

    fn parse_auto_xact(&mut self, line: &str, apply: &ApplyStack<'_>) -> ParseResult<AutoXact> {
        let mut position = self.ctx_mut().begin_item();
        let query = line.strip_prefix('=').unwrap_or(line).trim();
        if query.is_empty() {
            return Err(ParseErrorKind::ExpectedPredicate.into());
        }
        let mut auto = AutoXact::new(Predicate::parse(query, self.pool)?);

        while let Some(line) = self.next_block_line()? {
            if let Some(note) = line.strip_prefix(';') {
                auto.deferred_notes.push(DeferredNote {
                    text: note.trim_start().to_string(),
                    overwrite: true,
                    post_index: auto.posts.len().checked_sub(1),
                });
                continue;
            }
            if let Some((keyword, text)) = inline_check(&line, true) {
                let kind = match keyword {
                    "assert" => CheckKind::Assertion,
                    "check" => CheckKind::Check,
                    _ => CheckKind::General,
                };
                auto.check_exprs.push(CheckExpr {
                    expr: Expr::parse(text, self.pool)?,
                    kind,
                });
                continue;
            }
            let post = self.parse_post(&line, None, apply, true)?;
            auto.posts.push(post);
        }

        self.ctx().end_item(&mut position);
        auto.item.position = Some(position);
        tracing::debug!(predicate = query, posts = auto.posts.len(), "automated transaction");
        Ok(auto)
    }

    /// `~ PERIOD` and its budget postings.
    pub(super) fn period_xact_directive(&mut self, line: &str, apply: &ApplyStack<'_>) -> ParseResult<()> {
        let beg = self.ctx().line_beg_pos;
        match self.parse_period_xact(line, apply) {
            Ok(period) => {
                self.journal.add_period_xact(period);
                Ok(())
            }
            Err(err) => Err(self.with_source_context(err, "periodic transaction", beg)),
        }
    }

    fn parse_period_xact(&mut self, line: &str, apply: &ApplyStack<'_>) -> ParseResult<PeriodXact> {
        let mut position = self.ctx_mut().begin_item();
        let text = line.strip_prefix('~').unwrap_or(line).trim();
        let interval = DateInterval::parse(text, self.pool.date_context())?;
        let mut period = PeriodXact::new(interval, text);

        while let Some(line) = self.next_block_line()? {
            if line.starts_with(';') {
                continue;
            }
            let post = self.parse_post(&line, None, apply, false)?;
            period.posts.push(post);
        }

        if !period.posts.is_empty() {
            let ctx = FinalizeContext {
                accounts: &self.journal.accounts,
                pool: self.pool,
                bucket: self.journal.bucket,
            };
            if let Err(err) = period.finalize(&ctx) {
                tracing::debug!(period = text, %err, "periodic transaction does not balance");
                return Err(ParseErrorKind::PeriodUnbalanced.into());
            }
        }

        self.ctx().end_item(&mut position);
        period.item.position = Some(position);
        Ok(period)
    }
}

#[cfg(test)]
mod tests {
    use crate::context::ParseContext;
    use crate::error::ParseErrorKind;
    use crate::fs::MemoryFileSystem;
    use crate::textual::TextualParser;
    use ledgerkit_core::{
        AccountId, CheckKind, CheckingStyle, CommodityPool, ItemFlags, ItemState, Journal, NaiveDate,
        PostFlags, SymbolScope,
    };

    struct Parsed {
        journal: Journal,
        ctx: ParseContext,
        pool: CommodityPool,
    }

    fn parse_with(journal: Journal, text: &str) -> Parsed {
        let pool = CommodityPool::with_builtins();
        let mut journal = journal;
        let scope = SymbolScope::new();
        let fs = MemoryFileSystem::new();
        let ctx = {
            let mut parser = TextualParser::new(
                &mut journal,
                &pool,
                &scope,
                &fs,
                ParseContext::from_string("test.ledger", text),
            );
            parser.parse().unwrap();
            parser.into_context()
        };
        Parsed { journal, ctx, pool }
    }

    fn parse(text: &str) -> Parsed {
        parse_with(Journal::new(), text)
    }

    fn account(parsed: &Parsed, id: AccountId) -> &str {
        parsed.journal.accounts.full_name(id)
    }

    #[test]
    fn test_xact_header() {
        let parsed = parse(
            "2024/01/15=2024/01/17 * (1042) Grocery Store  ; weekly shop\n  Expenses:Food  $42.50\n  Assets:Checking\n",
        );
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        let xact = &parsed.journal.xacts[0];
        assert_eq!(xact.item.date, NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(xact.item.aux_date, NaiveDate::from_ymd_opt(2024, 1, 17));
        assert_eq!(xact.item.state, ItemState::Cleared);
        assert_eq!(xact.code.as_deref(), Some("1042"));
        assert_eq!(xact.payee, "Grocery Store");
        assert_eq!(xact.item.note.as_deref(), Some("weekly shop"));
        assert_eq!(xact.posts.len(), 2);
        assert_eq!(xact.posts[0].item.state, ItemState::Cleared);
        assert_eq!(xact.posts[1].amount.to_string(), "$-42.50");
    }

    #[test]
    fn test_unspecified_payee() {
        let parsed = parse("2024/01/15\n  A  $1\n  B\n");
        assert_eq!(parsed.journal.xacts[0].payee, "<Unspecified payee>");
    }

    #[test]
    fn test_positions_and_sequence() {
        let parsed = parse("; header\n2024/01/15 Shop\n  A  $1\n  B\n\n2024/01/16 Shop\n  A  $2\n  B\n");
        let first = parsed.journal.xacts[0].item.position.as_ref().unwrap();
        let second = parsed.journal.xacts[1].item.position.as_ref().unwrap();
        assert_eq!((first.beg_line, first.end_line), (2, 4));
        assert_eq!(first.beg_pos, "; header\n".len());
        assert_eq!((second.beg_line, second.end_line), (6, 8));
        assert!(second.sequence > first.sequence);

        let post = parsed.journal.xacts[0].posts[0].item.position.as_ref().unwrap();
        assert_eq!(post.beg_line, 3);
        assert!(post.sequence > first.sequence);
    }

    #[test]
    fn test_account_brackets() {
        let parsed = parse("2024/01/15 Shop\n  [Budget:Food]  $5\n  (Tracking)  $1\n  <Later>  $2\n  Assets  $-5\n  [Budget:Cash]\n");
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        let posts = &parsed.journal.xacts[0].posts;
        assert_eq!(account(&parsed, posts[0].account), "Budget:Food");
        assert!(posts[0].flags.contains(PostFlags::VIRTUAL | PostFlags::MUST_BALANCE));
        assert_eq!(account(&parsed, posts[1].account), "Tracking");
        assert!(posts[1].flags.contains(PostFlags::VIRTUAL));
        assert!(!posts[1].flags.contains(PostFlags::MUST_BALANCE));
        assert!(posts[2].flags.contains(PostFlags::DEFERRED));
    }

    #[test]
    fn test_balance_assignment_fills_amount() {
        let parsed = parse(
            "2024/01/15 Deposit\n  Assets:Checking  $5.00\n  Assets:Checking  = $20.00\n  Income:Salary\n",
        );
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        let post = &parsed.journal.xacts[0].posts[1];
        assert_eq!(post.amount.to_string(), "$15.00");
        assert_eq!(post.assigned_amount.as_ref().unwrap().to_string(), "$20.00");
    }

    #[test]
    fn test_balance_assignment_uses_running_total() {
        let parsed = parse(
            "2024/01/01 Open\n  Assets:Checking  $100\n  Equity\n\n2024/01/02 Fees\n  Assets:Checking  = $90\n  Expenses:Fees\n",
        );
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        assert_eq!(parsed.journal.xacts[1].posts[0].amount.to_string(), "$-10");
    }

    #[test]
    fn test_balance_assignment_other_commodity_is_zero() {
        let parsed = parse(
            "2024/01/01 Open\n  Assets:Broker  10 AAPL\n  Equity\n\n2024/01/02 Check\n  Assets:Broker  = 0 EUR\n  Equity  0 EUR\n",
        );
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        let post = &parsed.journal.xacts[1].posts[0];
        assert!(post.amount.is_realzero().unwrap());
        assert_eq!(post.amount.commodity().unwrap().symbol(), "EUR");
    }

    #[test]
    fn test_satisfied_balance_assignment_is_explicit_zero() {
        let parsed = parse(
            "2024/01/01 Open\n  Assets:Checking  $100\n  Equity\n\n2024/01/02 Move\n  Assets:Checking  = $100\n  Assets:Savings  $5\n  Equity  $-5\n",
        );
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        let post = &parsed.journal.xacts[1].posts[0];
        assert!(!post.amount.is_null());
        assert!(post.amount.is_realzero().unwrap());
        assert_eq!(post.amount.commodity().unwrap().symbol(), "$");
        assert_eq!(post.assigned_amount.as_ref().unwrap().to_string(), "$100");
    }

    #[test]
    fn test_balance_assertion_failure() {
        let parsed = parse(
            "2024/01/01 Open\n  Assets:Checking  $100\n  Equity\n\n2024/01/02 Pay\n  Assets:Checking  $-10 = $80\n  Expenses\n",
        );
        assert_eq!(parsed.ctx.errors.len(), 1);
        let err = &parsed.ctx.errors[0];
        assert_eq!(
            err.kind,
            ParseErrorKind::BalanceAssertion {
                diff: "$-10".into(),
                expected: "$90".into(),
            }
        );
        assert_eq!(err.message(), "Balance assertion off by $-10 (expected to see $90)");
        assert!(err.context.iter().any(|c| c.starts_with("While parsing posting:")));
        assert!(err.context.iter().any(|c| c.starts_with("While parsing transaction:\n> 2024/01/02 Pay")));
        assert_eq!(parsed.ctx.count, 1);
    }

    #[test]
    fn test_balance_assertion_passes() {
        let parsed = parse(
            "2024/01/01 Open\n  Assets:Checking  $100\n  Equity\n\n2024/01/02 Pay\n  Assets:Checking  $-10 = $90\n  Expenses\n",
        );
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        assert_eq!(parsed.ctx.count, 2);
    }

    #[test]
    fn test_permissive_skips_assertions() {
        let journal = Journal::new();
        journal.options().set_checking_style(CheckingStyle::Permissive);
        let parsed = parse_with(
            journal,
            "2024/01/02 Pay\n  Assets:Checking  $-10 = $80\n  Expenses\n",
        );
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
    }

    #[test]
    fn test_assignment_errors() {
        let parsed = parse("2024/01/02 Pay\n  Assets:Checking  $5 =\n  Expenses\n");
        assert_eq!(parsed.ctx.errors[0].kind, ParseErrorKind::ExpectedAssignmentAmount);
    }

    #[test]
    fn test_per_unit_cost() {
        let parsed = parse("2024/01/02 Buy\n  Assets:Broker  10 AAPL @ $150.00\n  Assets:Cash\n");
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        let post = &parsed.journal.xacts[0].posts[0];
        assert_eq!(post.cost.as_ref().unwrap().to_string(), "$1500.00");
        assert!(!post.flags.contains(PostFlags::COST_IN_FULL));
        assert_eq!(parsed.journal.xacts[0].posts[1].amount.to_string(), "$-1500.00");
    }

    #[test]
    fn test_total_cost_negated_for_sale() {
        let parsed = parse("2024/01/02 Sell\n  Assets:Broker  -10 AAPL @@ $1600.00\n  Assets:Cash\n");
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        let post = &parsed.journal.xacts[0].posts[0];
        assert_eq!(post.given_cost.as_ref().unwrap().to_string(), "$-1600.00");
        assert!(post.flags.contains(PostFlags::COST_IN_FULL));
    }

    #[test]
    fn test_fixated_and_virtual_cost() {
        let parsed = parse("2024/01/02 Buy\n  Assets:Broker  10 AAPL (@) =$15\n  Assets:Cash\n");
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        let post = &parsed.journal.xacts[0].posts[0];
        assert!(post.flags.contains(PostFlags::COST_FIXATED | PostFlags::COST_VIRTUAL));
    }

    #[test]
    fn test_cost_errors() {
        let cases = [
            ("  A  10 X @ =\n", ParseErrorKind::MissingCostAmount),
            ("  A  10 X @ $-1\n", ParseErrorKind::NegativeCost),
            ("  A  10 X @\n", ParseErrorKind::ExpectedCostAmount),
        ];
        for (post, kind) in cases {
            let parsed = parse(&format!("2024/01/02 Buy\n{post}  B\n"));
            assert_eq!(parsed.ctx.errors.len(), 1, "{post}");
            assert_eq!(parsed.ctx.errors[0].kind, kind, "{post}");
        }
    }

    #[test]
    fn test_amount_expression() {
        let parsed = parse("2024/01/02 Split\n  Expenses:Food  ($30 / 2)\n  Assets:Cash\n");
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        let post = &parsed.journal.xacts[0].posts[0];
        assert_eq!(post.amount.to_string(), "$15");
        assert!(post.flags.contains(PostFlags::AMOUNT_EXPR));
        assert_eq!(post.amount_expr.as_ref().unwrap().text(), "($30 / 2)");
    }

    #[test]
    fn test_unexpected_text_after_amount() {
        let parsed = parse("2024/01/02 Split\n  Expenses:Food  $30 / 2\n  Assets:Cash\n");
        assert_eq!(parsed.ctx.errors.len(), 1);
        assert_eq!(parsed.ctx.errors[0].kind, ParseErrorKind::UnexpectedText("/".into()));
        assert_eq!(
            parsed.ctx.errors[0].message(),
            "Unexpected char '/' (Note: inline math requires parentheses)"
        );
    }

    #[test]
    fn test_bad_thousands_grouping_fails() {
        let parsed = parse("2024/01/02 Shop\n  Expenses  12,34.56 USD\n  Assets\n");
        assert_eq!(parsed.ctx.errors.len(), 1);
        assert!(matches!(parsed.ctx.errors[0].kind, ParseErrorKind::Amount(_)));
        assert_eq!(parsed.ctx.count, 0);
    }

    #[test]
    fn test_posting_without_account() {
        let parsed = parse("2024/01/02 Shop\n  *\n");
        assert_eq!(parsed.ctx.errors[0].kind, ParseErrorKind::PostingHasNoAccount);
    }

    #[test]
    fn test_notes_on_following_lines() {
        let parsed = parse(
            "2024/01/02 Shop\n  ; :trip:\n  Expenses  $5\n  ; Receipt: scan.png\n  Assets\n",
        );
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        let xact = &parsed.journal.xacts[0];
        assert!(xact.item.has_tag("trip"));
        assert!(xact.item.flags.contains(ItemFlags::NOTE_ON_NEXT_LINE));
        assert_eq!(xact.posts[0].item.tag_value("Receipt"), Some("scan.png"));
        let position = xact.posts[0].item.position.as_ref().unwrap();
        assert_eq!((position.beg_line, position.end_line), (3, 4));
    }

    #[test]
    fn test_inline_assert_and_check() {
        let parsed = parse(
            "2024/01/02 Shop\n  Expenses  $5\n  check account =~ /Income/\n  Assets\n",
        );
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        assert_eq!(parsed.ctx.warnings.len(), 1);
        assert_eq!(
            parsed.ctx.warnings[0].message,
            "Transaction check failed: account =~ /Income/"
        );

        let parsed = parse("2024/01/02 Shop\n  assert payee == \"Bank\"\n  Expenses  $5\n  Assets\n");
        assert_eq!(parsed.ctx.errors.len(), 1);
        assert_eq!(
            parsed.ctx.errors[0].message(),
            "Transaction assertion failed: payee == \"Bank\""
        );
    }

    #[test]
    fn test_uuid_maps_payee() {
        let parsed = parse(
            "payee Whole Foods\n  uuid 2a2e21d4\n\n2024/01/02 WFM 1234\n  ; UUID: 2a2e21d4\n  Expenses  $5\n  Assets\n",
        );
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        assert_eq!(parsed.journal.xacts[0].payee, "Whole Foods");
    }

    #[test]
    fn test_applied_tag_on_xact_and_posts() {
        let parsed = parse("apply tag trip\n2024/01/02 Shop\n  Expenses  $5\n  Assets\nend apply tag\n");
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        let xact = &parsed.journal.xacts[0];
        assert!(xact.item.has_tag("trip"));
        assert!(xact.posts.iter().all(|p| p.item.has_tag("trip")));
    }

    #[test]
    fn test_fixed_rate_annotates_amounts() {
        let parsed = parse(
            "apply fixed CAD $0.90\n2024/01/02 Shop\n  Expenses  10 CAD\n  Assets\nend apply fixed\n",
        );
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        let amount = &parsed.journal.xacts[0].posts[0].amount;
        assert!(amount.has_annotation().unwrap());
        assert_eq!(amount.price().unwrap().unwrap().to_string(), "$0.90");
        assert_eq!(parsed.journal.xacts[0].posts[1].amount.to_string(), "$-9.00");
    }

    #[test]
    fn test_apply_year_resolves_partial_dates() {
        let parsed = parse(
            "apply year 2020\n11/01 Shop\n  A  $1\n  B\nend apply\n",
        );
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        assert_eq!(
            parsed.journal.xacts[0].item.date,
            NaiveDate::from_ymd_opt(2020, 11, 1)
        );
        assert_eq!(parsed.pool.date_context().epoch(), None);
    }

    #[test]
    fn test_unbalanced_xact() {
        let parsed = parse("2024/01/02 Shop\n  Expenses  $5\n  Assets  $-4\n\n2024/01/03 Ok\n  A  $1\n  B\n");
        assert_eq!(parsed.ctx.errors.len(), 1);
        assert!(matches!(parsed.ctx.errors[0].kind, ParseErrorKind::Xact(_)));
        assert_eq!(parsed.ctx.count, 1);
    }

    #[test]
    fn test_automated_xact() {
        let parsed = parse(
            "= /^Expenses:Food/\n  ; :auto:\n  (Budget:Food)  -1\n  ; Source: rule\n  check amount > 0\n\n2024/01/02 Shop\n  Expenses:Food  $5\n  Assets\n",
        );
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        let auto = &parsed.journal.auto_xacts[0];
        assert_eq!(auto.posts.len(), 1);
        assert_eq!(auto.deferred_notes.len(), 2);
        assert_eq!(auto.deferred_notes[0].post_index, None);
        assert_eq!(auto.deferred_notes[1].post_index, Some(0));
        assert_eq!(auto.check_exprs[0].kind, CheckKind::Check);

        let xact = &parsed.journal.xacts[0];
        assert_eq!(xact.posts.len(), 3);
        let generated = &xact.posts[2];
        assert_eq!(account(&parsed, generated.account), "Budget:Food");
        assert_eq!(generated.amount.to_string(), "$-5");
        assert_eq!(generated.item.tag_value("Source"), Some("rule"));
    }

    #[test]
    fn test_automated_xact_keeps_expression() {
        let parsed = parse("= expr account =~ /Income/\n  (Savings)  (amount * 0.1)\n");
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        let post = &parsed.journal.auto_xacts[0].posts[0];
        assert!(post.amount.is_null());
        assert_eq!(post.amount_expr.as_ref().unwrap().text(), "(amount * 0.1)");
    }

    #[test]
    fn test_automated_xact_needs_predicate() {
        let parsed = parse("=\n  (Budget)  -1\n");
        assert_eq!(parsed.ctx.errors.len(), 1);
        assert_eq!(parsed.ctx.errors[0].kind, ParseErrorKind::ExpectedPredicate);
    }

    #[test]
    fn test_period_xact() {
        let parsed = parse("~ Monthly\n  Expenses:Rent  $1200\n  ; budget line\n  Assets\n");
        assert!(parsed.ctx.errors.is_empty(), "{:?}", parsed.ctx.errors);
        let period = &parsed.journal.period_xacts[0];
        assert_eq!(period.period_text, "Monthly");
        assert_eq!(period.posts.len(), 2);
        assert_eq!(period.posts[1].amount.to_string(), "$-1200");
    }

    #[test]
    fn test_period_xact_unbalanced() {
        let parsed = parse("~ Monthly\n  Expenses:Rent  $1200\n  Assets  $-1000\n");
        assert_eq!(parsed.ctx.errors.len(), 1);
        assert_eq!(parsed.ctx.errors[0].kind, ParseErrorKind::PeriodUnbalanced);
        assert!(parsed.journal.period_xacts.is_empty());
    }
}
