//! Directives that own a block of indented sub-directives: `account`,
//! `commodity`, `payee` and `tag`.

use ledgerkit_core::expr::compile_mask;
use ledgerkit_core::{
    commodity, Amount, AutoXact, BindScope, CheckExpr, CheckKind, CommodityFlags, Expr, Predicate,
};

use super::util::next_element;
use super::TextualParser;
use crate::apply::ApplyStack;
use crate::error::{ParseErrorKind, ParseResult};

fn missing(directive: &'static str, keyword: &str) -> ParseErrorKind {
    ParseErrorKind::SubDirectiveMissingArgument {
        directive,
        keyword: keyword.to_string(),
    }
}

fn check_kind(keyword: &str) -> CheckKind {
    if keyword == "assert" {
        CheckKind::Assertion
    } else {
        CheckKind::Check
    }
}

impl TextualParser<'_> {
    /// `account NAME` and its `alias`, `payee`, `value`, `default`,
    /// `assert`/`check`, `eval`/`expr` and `note` lines.
    pub(super) fn account_directive(&mut self, arg: &str, apply: &ApplyStack<'_>) -> ParseResult<()> {
        let beg_pos = self.ctx().line_beg_pos;
        let beg_line = self.ctx().line_num;
        let account = self
            .journal
            .register_account(arg.trim_start(), None, apply.top_account())?;
        let full_name = self.journal.accounts.full_name(account).to_string();
        let mut checks: Option<AutoXact> = None;

        while let Some(line) = self.next_block_line()? {
            let (keyword, value) = next_element(&line, false);
            if value.is_empty() && keyword != "default" {
                return Err(missing("Account", keyword).into());
            }
            match keyword {
                "alias" => self.account_alias(account, value)?,
                "payee" => {
                    let mask = compile_mask(value.trim())?;
                    self.journal.add_payee_for_unknown_account(mask, account);
                }
                "value" => {
                    let expr = Expr::parse(value, self.pool)?;
                    self.journal.accounts.get_mut(account).value_expr = Some(expr.text().to_string());
                }
                "default" => self.journal.bucket = Some(account),
                "assert" | "check" => {
                    let expr = Expr::parse(value, self.pool)?;
                    if checks.is_none() {
                        let mut position = self.ctx_mut().begin_item();
                        position.beg_pos = beg_pos;
                        position.beg_line = beg_line;
                        let mut auto = AutoXact::new(Predicate::AccountName(full_name.clone()));
                        auto.item.position = Some(position);
                        checks = Some(auto);
                    }
                    if let Some(auto) = checks.as_mut() {
                        auto.check_exprs.push(CheckExpr {
                            expr,
                            kind: check_kind(keyword),
                        });
                    }
                }
                "eval" | "expr" => {
                    let bound = BindScope::new(self.scope).bind("account", full_name.as_str());
                    Expr::parse(value, self.pool)?.calc(&bound)?;
                }
                "note" => self.journal.accounts.get_mut(account).note = Some(value.to_string()),
                _ => tracing::trace!(keyword, "ignoring unknown account sub-directive"),
            }
        }

        if let Some(mut auto) = checks {
            if let Some(position) = auto.item.position.as_mut() {
                self.ctx().end_item(position);
            }
            self.journal.add_auto_xact(auto);
        }
        Ok(())
    }

    /// `commodity SYMBOL` and its `alias`, `value`, `format`, `nomarket`,
    /// `default` and `note` lines.
    pub(super) fn commodity_directive(&mut self, arg: &str) -> ParseResult<()> {
        let (symbol, _) = commodity::parse_symbol(arg.trim_start())?;
        let commodity = self.pool.find_or_create(&symbol);
        self.journal.register_commodity(&commodity, false)?;

        while let Some(line) = self.next_block_line()? {
            let (keyword, value) = next_element(&line, false);
            if value.is_empty() && keyword != "nomarket" && keyword != "default" {
                return Err(missing("Commodity", keyword).into());
            }
            match keyword {
                "alias" => {
                    self.pool.alias(value.trim(), &commodity);
                }
                "value" => {
                    let expr = Expr::parse(value, self.pool)?;
                    commodity.set_value_expr(Some(expr.text().to_string()));
                }
                "format" => {
                    // The sample fixes the display style for good.
                    let sample = Amount::parse(value.trim(), self.pool)?;
                    if let Some(styled) = sample.commodity() {
                        styled.add_flags(CommodityFlags::STYLE_NO_MIGRATE);
                    }
                }
                "nomarket" => commodity.add_flags(CommodityFlags::NOMARKET),
                "default" => self.pool.set_default_commodity(Some(commodity.clone())),
                "note" => commodity.set_note(Some(value.to_string())),
                _ => tracing::trace!(keyword, "ignoring unknown commodity sub-directive"),
            }
        }
        Ok(())
    }

    /// `payee NAME` and its `alias` and `uuid` lines.
    pub(super) fn payee_directive(&mut self, arg: &str) -> ParseResult<()> {
        let payee = self.journal.register_payee(arg, false)?;

        while let Some(line) = self.next_block_line()? {
            let (keyword, value) = next_element(&line, false);
            if value.is_empty() {
                return Err(missing("Payee", keyword).into());
            }
            match keyword {
                "alias" => {
                    let mask = compile_mask(value.trim())?;
                    self.journal.add_payee_alias(mask, payee.clone());
                }
                "uuid" => self.journal.add_payee_uuid(value.trim(), payee.clone()),
                _ => tracing::trace!(keyword, "ignoring unknown payee sub-directive"),
            }
        }
        Ok(())
    }

    /// `tag NAME` and its `assert`/`check` lines, run against every value
    /// the tag is later given.
    pub(super) fn tag_directive(&mut self, arg: &str) -> ParseResult<()> {
        let tag = arg.trim_start();
        self.journal.register_metadata(tag, None, None)?;

        while let Some(line) = self.next_block_line()? {
            let (keyword, value) = next_element(&line, false);
            if matches!(keyword, "assert" | "check") {
                let expr = Expr::parse(value, self.pool)?;
                self.journal.tag_check_exprs.push((
                    tag.to_string(),
                    CheckExpr {
                        expr,
                        kind: check_kind(keyword),
                    },
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::context::ParseContext;
    use crate::fs::MemoryFileSystem;
    use crate::textual::TextualParser;
    use ledgerkit_core::{
        AccountId, CheckKind, CheckingStyle, CommodityFlags, CommodityPool, Journal, Predicate, SymbolScope,
    };

    fn parse_into(journal: &mut Journal, pool: &CommodityPool, source: &str) -> ParseContext {
        let scope = SymbolScope::new();
        let fs = MemoryFileSystem::new();
        let mut parser = TextualParser::new(journal, pool, &scope, &fs, ParseContext::from_string("t.ledger", source));
        parser.parse().unwrap();
        parser.into_context()
    }

    #[test]
    fn test_account_block() {
        let pool = CommodityPool::with_builtins();
        let mut journal = Journal::new();
        let ctx = parse_into(
            &mut journal,
            &pool,
            "account Assets:Checking\n  note Main account\n  alias chk\n  default\n  value market(amount)\n",
        );
        assert!(ctx.errors.is_empty(), "{:?}", ctx.errors);

        let id = journal.accounts.lookup(AccountId::ROOT, "Assets:Checking").unwrap();
        let account = journal.accounts.get(id);
        assert!(account.is_known());
        assert_eq!(account.note.as_deref(), Some("Main account"));
        assert_eq!(account.value_expr.as_deref(), Some("market(amount)"));
        assert_eq!(journal.bucket, Some(id));
        assert_eq!(journal.expand_aliases("chk").unwrap(), Some(id));
    }

    #[test]
    fn test_account_sub_directive_needs_argument() {
        let pool = CommodityPool::with_builtins();
        let mut journal = Journal::new();
        let ctx = parse_into(&mut journal, &pool, "account Assets:Cash\n  note\n");
        assert_eq!(ctx.errors[0].message(), "Account directive 'note' requires an argument");
    }

    #[test]
    fn test_account_checks_become_automated_transaction() {
        let pool = CommodityPool::with_builtins();
        let mut journal = Journal::new();
        let ctx = parse_into(
            &mut journal,
            &pool,
            "; header\naccount Expenses:Food\n  assert amount < $100\n  check amount < $50\n",
        );
        assert!(ctx.errors.is_empty(), "{:?}", ctx.errors);
        assert_eq!(journal.auto_xacts.len(), 1);

        let auto = &journal.auto_xacts[0];
        assert!(matches!(&auto.predicate, Predicate::AccountName(name) if name == "Expenses:Food"));
        let kinds: Vec<_> = auto.check_exprs.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![CheckKind::Assertion, CheckKind::Check]);
        let position = auto.item.position.as_ref().unwrap();
        assert_eq!((position.beg_line, position.end_line), (2, 4));
    }

    #[test]
    fn test_account_check_runs_on_matching_posts() {
        let pool = CommodityPool::with_builtins();
        let mut journal = Journal::new();
        let ctx = parse_into(
            &mut journal,
            &pool,
            "account Expenses:Food\n  check amount < $50\n\n2024/01/01 Feast\n  Expenses:Food  $80\n  Assets:Cash\n",
        );
        assert!(ctx.errors.is_empty(), "{:?}", ctx.errors);
        assert_eq!(ctx.warnings.len(), 1);
        assert!(ctx.warnings[0].message.starts_with("Transaction check failed"));
    }

    #[test]
    fn test_account_payee_mapping_for_unknown() {
        let pool = CommodityPool::with_builtins();
        let mut journal = Journal::new();
        let ctx = parse_into(
            &mut journal,
            &pool,
            "account Expenses:Groceries\n  payee ^Grocer\n\n2024/01/01 Grocer\n  Unknown  $5\n  Assets:Cash\n",
        );
        assert!(ctx.errors.is_empty(), "{:?}", ctx.errors);
        let post = &journal.xacts[0].posts[0];
        assert_eq!(journal.accounts.full_name(post.account), "Expenses:Groceries");
    }

    #[test]
    fn test_commodity_block() {
        let pool = CommodityPool::with_builtins();
        let mut journal = Journal::new();
        let ctx = parse_into(
            &mut journal,
            &pool,
            "commodity EUR\n  note Euro\n  format 1.000,00 EUR\n  nomarket\n  alias Euro\n  default\n",
        );
        assert!(ctx.errors.is_empty(), "{:?}", ctx.errors);
        let eur = pool.find("EUR").unwrap();
        assert_eq!(eur.note().as_deref(), Some("Euro"));
        assert!(eur.has_flags(CommodityFlags::KNOWN));
        assert!(eur.has_flags(CommodityFlags::NOMARKET));
        assert!(eur.has_flags(CommodityFlags::STYLE_NO_MIGRATE));
        assert_eq!(eur.precision(), 2);
        assert!(pool.default_commodity().is_some());
        assert!(pool.find("Euro").is_some());
    }

    #[test]
    fn test_commodity_sub_directive_needs_argument() {
        let pool = CommodityPool::with_builtins();
        let mut journal = Journal::new();
        let ctx = parse_into(&mut journal, &pool, "commodity EUR\n  alias\n");
        assert_eq!(ctx.errors[0].message(), "Commodity directive 'alias' requires an argument");
    }

    #[test]
    fn test_payee_block() {
        let pool = CommodityPool::with_builtins();
        let mut journal = Journal::new();
        let ctx = parse_into(
            &mut journal,
            &pool,
            "payee Whole Foods\n  alias ^WFM\n  uuid 2a2e21d434356f886c84371eebac6e44f1337fda\n\n2024/01/01 WFM #1234\n  Expenses:Food  $5\n  Assets:Cash\n",
        );
        assert!(ctx.errors.is_empty(), "{:?}", ctx.errors);
        assert_eq!(journal.xacts[0].payee, "Whole Foods");
        assert_eq!(
            journal.payee_for_uuid("2a2e21d434356f886c84371eebac6e44f1337fda"),
            Some("Whole Foods")
        );
    }

    #[test]
    fn test_tag_block_checks_values() {
        let pool = CommodityPool::with_builtins();
        let mut journal = Journal::new();
        let ctx = parse_into(
            &mut journal,
            &pool,
            "tag Receipt\n  check value =~ /\\.pdf$/\n\n2024/01/01 Shop\n  ; Receipt: scan.png\n  Expenses  $5\n  Assets\n",
        );
        assert!(ctx.errors.is_empty(), "{:?}", ctx.errors);
        assert_eq!(journal.tag_check_exprs.len(), 1);
        assert_eq!(ctx.warnings.len(), 1);
        assert!(ctx.warnings[0].message.starts_with("Metadata check failed for (Receipt: scan.png)"));
    }

    #[test]
    fn test_declared_names_pass_pedantic_checks() {
        let pool = CommodityPool::with_builtins();
        let mut journal = Journal::new();
        journal.options().set_checking_style(CheckingStyle::Error);
        let ctx = parse_into(
            &mut journal,
            &pool,
            "account Expenses\naccount Assets\ncommodity $\n\n2024/01/01 Shop\n  Expenses  $5\n  Assets\n\n2024/01/02 Shop\n  Expenses:Typo  $5\n  Assets\n",
        );
        assert_eq!(ctx.errors.len(), 1);
        assert_eq!(ctx.errors[0].message(), "Unknown account 'Expenses:Typo'");
        assert_eq!(journal.xacts.len(), 1);
    }
}
