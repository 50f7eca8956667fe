//! The line-oriented journal reader.
//!
//! [`TextualParser`] reads one directive at a time from the current
//! [`ParseContext`], recovering from errors at directive granularity: a
//! failed directive is located, given its context chain and recorded, and
//! reading resumes on the next line. Only cancellation unwinds the whole
//! parse.

mod blocks;
mod include;
pub mod util;
mod xact;

use ledgerkit_core::{
    times, AccountFlags, AccountId, Amount, CommodityFlags, CommodityPool, Expr, Journal, Scope,
    SymbolKind, Value,
};

use crate::apply::{Applied, ApplyStack};
use crate::cancel::CancellationToken;
use crate::context::{ParseContext, ParseContextStack};
use crate::error::{ParseError, ParseErrorKind, ParseResult};
use crate::fs::FileSystem;
use crate::Span;

use util::next_element;

/// Characters that start a comment line.
const COMMENT_CHARS: &str = ";#|*";

/// Reads a journal into a [`Journal`].
///
/// The journal, commodity pool and scope are shared with every file pulled
/// in by `include`; each included file gets its own [`ParseContext`] on the
/// context stack and its own [`ApplyStack`] chained to the includer's.
pub struct TextualParser<'a> {
    journal: &'a mut Journal,
    pool: &'a CommodityPool,
    scope: &'a dyn Scope,
    fs: &'a dyn FileSystem,
    cancel: CancellationToken,
    contexts: ParseContextStack,
}

impl<'a> TextualParser<'a> {
    /// A parser that will read `context` into `journal`.
    pub fn new(
        journal: &'a mut Journal,
        pool: &'a CommodityPool,
        scope: &'a dyn Scope,
        fs: &'a dyn FileSystem,
        context: ParseContext,
    ) -> Self {
        Self {
            journal,
            pool,
            scope,
            fs,
            cancel: CancellationToken::new(),
            contexts: ParseContextStack::new(context),
        }
    }

    /// Poll `token` before every line.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The context being read.
    #[must_use]
    pub fn context(&self) -> &ParseContext {
        self.contexts.current()
    }

    /// Give back the root context with its counts, errors and warnings.
    #[must_use]
    pub fn into_context(self) -> ParseContext {
        self.contexts.into_root()
    }

    /// Read the whole input.
    ///
    /// Returns the number of transactions added. Recoverable errors are
    /// collected in the context rather than returned; the only error
    /// returned is cancellation, or a failure applying deferred postings.
    pub fn parse(&mut self) -> ParseResult<usize> {
        tracing::info!(path = %self.ctx().path.display(), "parsing journal");
        let mut apply = ApplyStack::new();
        apply.push(Applied::Account(self.ctx().master));
        self.parse_current(&mut apply)?;

        let applied = self.journal.apply_deferred_posts()?;
        if applied > 0 {
            tracing::debug!(count = applied, "applied deferred postings");
        }
        let ctx = self.ctx();
        tracing::info!(
            path = %ctx.path.display(),
            xacts = ctx.count,
            errors = ctx.errors.len(),
            "done parsing journal"
        );
        Ok(ctx.count)
    }

    fn ctx(&self) -> &ParseContext {
        self.contexts.current()
    }

    fn ctx_mut(&mut self) -> &mut ParseContext {
        self.contexts.current_mut()
    }

    /// Read the current context to its end. `apply` must hold the base
    /// frame for this context, which is popped on the way out.
    fn parse_current(&mut self, apply: &mut ApplyStack<'_>) -> ParseResult<()> {
        self.ctx_mut().error_flag = false;
        while !self.ctx().is_eof() {
            let start = self.ctx().curr_pos;
            if let Err(err) = self.read_next_directive(apply) {
                if err.is_cancelled() {
                    return Err(err);
                }
                self.recover(err, start);
            }
            self.collect_journal_warnings();
        }

        let mut timelog = std::mem::take(&mut self.ctx_mut().timelog);
        if !timelog.is_empty() {
            let start = self.ctx().curr_pos;
            match timelog.close(self.journal, self.pool, self.scope) {
                Ok(count) => self.ctx_mut().count += count,
                Err(err) => self.recover(err.into(), start),
            }
            self.collect_journal_warnings();
        }

        if let Some(Applied::Year(epoch)) = apply.front() {
            self.pool.date_context().set_epoch(*epoch);
        }
        apply.pop();
        Ok(())
    }

    /// Locate `err`, add the file context chain and record it.
    fn recover(&mut self, err: ParseError, start: usize) {
        let ctx = self.contexts.current();
        let mut err = if err.line == 0 {
            err.at(ctx.path.clone(), ctx.line_num, Span::new(start, ctx.curr_pos))
        } else {
            err
        };
        err = err.with_context(format!("While parsing file {}", ctx.location()));
        for parent in self.contexts.parents() {
            err = err.with_context(format!("In file included from {}", parent.location()));
        }
        tracing::debug!(path = %err.path.display(), line = err.line, error = %err.kind, "recovered from parse error");

        let ctx = self.ctx_mut();
        ctx.error_flag = true;
        ctx.errors.push(err);
    }

    fn collect_journal_warnings(&mut self) {
        for message in self.journal.take_warnings() {
            self.ctx_mut().warning(message);
        }
    }

    fn read_line(&mut self) -> ParseResult<Option<String>> {
        self.cancel.check()?;
        Ok(self.ctx_mut().read_line())
    }

    /// The next indented, non-blank line of a block, trimmed; `None` once
    /// the block ends.
    fn next_block_line(&mut self) -> ParseResult<Option<String>> {
        if !self.ctx().peek_whitespace_line() {
            return Ok(None);
        }
        let line = self.read_line()?.unwrap_or_default();
        let line = line.trim_start();
        Ok((!line.is_empty()).then(|| line.to_string()))
    }

    fn read_next_directive(&mut self, apply: &mut ApplyStack<'_>) -> ParseResult<()> {
        let Some(line) = self.read_line()? else {
            return Ok(());
        };
        let Some(first) = line.chars().next() else {
            return Ok(());
        };

        if first.is_whitespace() {
            // Indented lines after a failed directive belong to it.
            if self.ctx().error_flag {
                return Ok(());
            }
            return Err(ParseErrorKind::UnexpectedWhitespace.into());
        }
        self.ctx_mut().error_flag = false;

        match first {
            c if COMMENT_CHARS.contains(c) => Ok(()),
            '-' => self.option_directive(&line),
            c if c.is_ascii_digit() => self.xact_directive(&line, apply),
            '=' => self.automated_xact_directive(&line, apply),
            '~' => self.period_xact_directive(&line, apply),
            _ => {
                let rest = line.strip_prefix(|c: char| c == '!' || c == '@').unwrap_or(&line);
                if self.general_directive(rest, apply)? {
                    return Ok(());
                }
                self.legacy_directive(first, rest, apply)
            }
        }
    }

    /// `--name value` or `--name=value`.
    fn option_directive(&mut self, line: &str) -> ParseResult<()> {
        let (mut name, mut value) = next_element(line, false);
        if value.is_empty() {
            if let Some((head, tail)) = name.split_once('=') {
                name = head;
                value = tail;
            }
        }
        let name = name.trim_start_matches('-').replace('_', "-");
        let Some(option) = self.scope.lookup(SymbolKind::Option, &name) else {
            return Err(ParseErrorKind::IllegalOption(name).into());
        };
        tracing::debug!(option = %name, value, "option directive");
        let args = if value.is_empty() {
            Vec::new()
        } else {
            vec![Value::from(value)]
        };
        option.call(&args, self.scope)?;
        Ok(())
    }

    /// Keyword directives. Returns `false` if `line` names none of them.
    fn general_directive(&mut self, line: &str, apply: &mut ApplyStack<'_>) -> ParseResult<bool> {
        let (keyword, arg) = next_element(line, false);

        if arg.is_empty()
            && !matches!(keyword, "comment" | "end" | "python" | "test")
            && !keyword.starts_with('Y')
        {
            return Err(ParseErrorKind::MissingArgument(keyword.to_string()).into());
        }

        match keyword {
            "account" => self.account_directive(arg, apply)?,
            "alias" => self.alias_directive(arg, apply)?,
            "apply" => self.apply_directive(arg, apply)?,
            "assert" => self.assert_directive(arg)?,
            "bucket" => self.default_account_directive(arg, apply),
            "check" => self.check_directive(arg)?,
            "comment" | "test" => self.comment_directive()?,
            "commodity" => self.commodity_directive(arg)?,
            "def" | "define" | "eval" | "expr" => self.eval_directive(arg)?,
            "end" => self.end_apply_directive(arg, apply)?,
            "include" => self.include_directive(arg, apply)?,
            "import" => return Err(ParseErrorKind::PythonUnsupported("import").into()),
            "payee" => self.payee_directive(arg)?,
            "python" => return Err(ParseErrorKind::PythonUnsupported("python").into()),
            "tag" => self.tag_directive(arg)?,
            "value" => self.value_directive(arg)?,
            "year" => self.apply_year_directive(arg, apply)?,
            _ => {
                let Some(directive) = self.scope.lookup(SymbolKind::Directive, keyword) else {
                    return Ok(false);
                };
                tracing::debug!(keyword, "user-defined directive");
                directive.call(&[Value::from(line)], self.scope)?;
            }
        }
        Ok(true)
    }

    /// Single-letter directives, keyed on the line's first character.
    fn legacy_directive(&mut self, first: char, line: &str, apply: &mut ApplyStack<'_>) -> ParseResult<()> {
        let arg = line.get(1..).unwrap_or_default();
        match first {
            'i' | 'I' => self.clock_in_directive(line, first == 'I', apply),
            'o' | 'O' => self.clock_out_directive(line, first == 'O', apply),
            'A' => {
                self.default_account_directive(arg, apply);
                Ok(())
            }
            'C' => self.price_conversion_directive(line),
            'D' => self.default_commodity_directive(arg),
            'N' => self.nomarket_directive(arg),
            'P' => self.price_xact_directive(arg),
            'Y' => {
                if arg.trim().is_empty() {
                    return Err(ParseErrorKind::MissingArgument(line.to_string()).into());
                }
                self.apply_year_directive(arg, apply)
            }
            _ => {
                tracing::trace!(directive = %first, "ignoring unknown directive");
                Ok(())
            }
        }
    }

    fn apply_directive(&mut self, arg: &str, apply: &mut ApplyStack<'_>) -> ParseResult<()> {
        let (keyword, value) = next_element(arg, false);
        match keyword {
            "account" => {
                let account = self
                    .journal
                    .accounts
                    .find_account(apply.top_account(), value.trim(), true)
                    .ok_or_else(|| ParseErrorKind::MissingArgument("apply account".to_string()))?;
                apply.push(Applied::Account(account));
            }
            "tag" => {
                let tag = value.trim();
                let tag = if tag.contains(':') {
                    tag.to_string()
                } else {
                    format!(":{tag}:")
                };
                apply.push(Applied::Tag(tag));
            }
            "fixed" | "rate" => {
                let (commodity, point) = self
                    .pool
                    .parse_price_directive(value.trim(), true, true)?
                    .ok_or(ParseErrorKind::FixedDirective)?;
                apply.push(Applied::FixedRate {
                    commodity,
                    price: point.price,
                });
            }
            "year" => self.apply_year_directive(value, apply)?,
            _ => tracing::trace!(keyword, "ignoring unknown apply kind"),
        }
        Ok(())
    }

    /// `apply year`, `year` and `Y`: remember the epoch, then move it to the
    /// last day of the year so partial dates land inside it.
    fn apply_year_directive(&mut self, arg: &str, apply: &mut ApplyStack<'_>) -> ParseResult<()> {
        let arg = arg.trim();
        let epoch = arg
            .parse::<i32>()
            .ok()
            .and_then(|year| times::year_end(year).ok())
            .ok_or_else(|| ParseErrorKind::InvalidYear(arg.to_string()))?;
        let dates = self.pool.date_context();
        apply.push(Applied::Year(dates.epoch()));
        dates.set_epoch(Some(epoch));
        tracing::debug!(year = arg, "setting current year");
        Ok(())
    }

    fn end_apply_directive(&mut self, arg: &str, apply: &mut ApplyStack<'_>) -> ParseResult<()> {
        let (name, _) = next_element(arg, false);
        if apply.len() <= 1 {
            return Err(if name.is_empty() {
                ParseErrorKind::EndWithoutApply
            } else {
                ParseErrorKind::EndApplyWithoutApply(name.to_string())
            }
            .into());
        }
        if let Some(open) = apply.front_label().filter(|open| !name.is_empty() && name != *open) {
            return Err(ParseErrorKind::EndApplyMismatch {
                found: name.to_string(),
                open: open.to_string(),
            }
            .into());
        }
        if let Some(Applied::Year(epoch)) = apply.front() {
            self.pool.date_context().set_epoch(*epoch);
        }
        apply.pop();
        Ok(())
    }

    /// `alias NAME=ACCOUNT`.
    fn alias_directive(&mut self, arg: &str, apply: &ApplyStack<'_>) -> ParseResult<()> {
        let Some((alias, target)) = arg.split_once('=') else {
            return Ok(());
        };
        let account = self
            .journal
            .accounts
            .find_account(apply.top_account(), target.trim(), true)
            .unwrap_or_else(|| apply.top_account());
        self.account_alias(account, alias)
    }

    fn account_alias(&mut self, account: AccountId, alias: &str) -> ParseResult<()> {
        let alias = alias.trim();
        let full_name = self.journal.accounts.full_name(account);
        if alias == full_name {
            return Err(ParseErrorKind::IllegalAlias {
                alias: alias.to_string(),
                account: full_name.to_string(),
            }
            .into());
        }
        self.journal.add_account_alias(alias, account);
        Ok(())
    }

    fn assert_directive(&mut self, arg: &str) -> ParseResult<()> {
        if !Expr::parse(arg, self.pool)?.calc(self.scope)?.is_true()? {
            return Err(ParseErrorKind::AssertionFailed(arg.to_string()).into());
        }
        Ok(())
    }

    fn check_directive(&mut self, arg: &str) -> ParseResult<()> {
        if !Expr::parse(arg, self.pool)?.calc(self.scope)?.is_true()? {
            self.ctx_mut().warning(format!("Check failed: {arg}"));
        }
        Ok(())
    }

    fn eval_directive(&mut self, arg: &str) -> ParseResult<()> {
        Expr::parse(arg, self.pool)?.calc(self.scope)?;
        Ok(())
    }

    fn value_directive(&mut self, arg: &str) -> ParseResult<()> {
        let expr = Expr::parse(arg, self.pool)?;
        self.journal.value_expr = Some(expr.text().to_string());
        Ok(())
    }

    /// Skip to `end comment` or `end test`.
    fn comment_directive(&mut self) -> ParseResult<()> {
        while let Some(line) = self.read_line()? {
            let line = line.trim();
            if line.starts_with("end comment") || line.starts_with("end test") {
                break;
            }
        }
        Ok(())
    }

    /// `bucket` and `A`: the account that balances single-posting
    /// transactions.
    fn default_account_directive(&mut self, arg: &str, apply: &ApplyStack<'_>) {
        let accounts = &mut self.journal.accounts;
        if let Some(account) = accounts.find_account(apply.top_account(), arg.trim(), true) {
            accounts.get_mut(account).flags |= AccountFlags::KNOWN;
            self.journal.bucket = Some(account);
        }
    }

    /// `C 1.0h = 60m`.
    fn price_conversion_directive(&mut self, line: &str) -> ParseResult<()> {
        if let Some((larger, smaller)) = line.get(1..).and_then(|rest| rest.split_once('=')) {
            Amount::parse_conversion(larger, smaller, self.pool)?;
        }
        Ok(())
    }

    /// `D $1,000.00`: the commodity and display style for bare numbers.
    fn default_commodity_directive(&mut self, arg: &str) -> ParseResult<()> {
        let amount = Amount::parse(arg.trim(), self.pool)?;
        if let Some(commodity) = amount.commodity() {
            commodity.add_flags(CommodityFlags::KNOWN);
            self.pool.set_default_commodity(Some(commodity.clone()));
        }
        Ok(())
    }

    fn nomarket_directive(&mut self, arg: &str) -> ParseResult<()> {
        let (symbol, _) = ledgerkit_core::commodity::parse_symbol(arg.trim())?;
        if !symbol.is_empty() {
            self.pool
                .find_or_create(&symbol)
                .add_flags(CommodityFlags::NOMARKET | CommodityFlags::KNOWN);
        }
        Ok(())
    }

    /// `P DATE [TIME] SYMBOL PRICE`.
    fn price_xact_directive(&mut self, arg: &str) -> ParseResult<()> {
        let (commodity, point) = self
            .pool
            .parse_price_directive(arg.trim(), false, false)?
            .ok_or(ParseErrorKind::PricingEntry)?;
        tracing::debug!(commodity = %commodity.symbol(), price = %point.price, when = %point.when, "price entry");
        Ok(())
    }
}
