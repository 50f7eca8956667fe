//! Integration tests for the parser crate.
//!
//! Tests cover whole journals: includes, scoping, error recovery and the
//! state a parse leaves behind in the journal and commodity pool.

use std::path::{Path, PathBuf};

use ledgerkit_core::{AccountId, AmountError, CommodityPool, Journal, NaiveDate, SymbolScope};
use ledgerkit_parser::{
    parse_source, CancellationToken, MemoryFileSystem, OsFileSystem, ParseContext,
    ParseErrorKind, TextualParser,
};

// ============================================================================
// Helper Functions
// ============================================================================

struct Parsed {
    journal: Journal,
    pool: CommodityPool,
    ctx: ParseContext,
}

fn parse(source: &str) -> Parsed {
    let pool = CommodityPool::with_builtins();
    let scope = SymbolScope::new();
    let mut journal = Journal::new();
    let ctx = parse_source("test.ledger", source, &mut journal, &pool, &scope)
        .expect("parse should not be cancelled");
    Parsed { journal, pool, ctx }
}

fn parse_ok(source: &str) -> Parsed {
    let parsed = parse(source);
    assert!(
        parsed.ctx.errors.is_empty(),
        "expected no errors, got: {:?}",
        parsed.ctx.errors
    );
    parsed
}

fn fixtures_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn parse_fixture(name: &str) -> Parsed {
    let pool = CommodityPool::with_builtins();
    let scope = SymbolScope::new();
    let mut journal = Journal::new();
    let path = fixtures_path(name);
    let ctx = ParseContext::open(&path, &OsFileSystem).expect("fixture exists");
    let ctx = {
        let mut parser = TextualParser::new(&mut journal, &pool, &scope, &OsFileSystem, ctx);
        parser.parse().expect("parse should not be cancelled");
        parser.into_context()
    };
    Parsed { journal, pool, ctx }
}

fn total(parsed: &Parsed, account: &str) -> String {
    let id = parsed
        .journal
        .accounts
        .lookup(AccountId::ROOT, account)
        .unwrap_or_else(|| panic!("no account {account}"));
    parsed.journal.accounts.get(id).total.to_string()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// ============================================================================
// Transactions and Postings
// ============================================================================

#[test]
fn test_balance_assignment_computes_amount() {
    let parsed = parse_ok(
        "2024/01/01 Opening\n  Assets:Checking  $5.00\n  Equity:Opening\n\n\
         2024/01/02 Statement\n  Assets:Checking  = $20.00\n  Income:Interest\n",
    );
    let post = &parsed.journal.xacts[1].posts[0];
    assert_eq!(post.amount.to_string(), "$15.00");
    assert_eq!(parsed.journal.xacts[1].posts[1].amount.to_string(), "$-15.00");
    assert_eq!(total(&parsed, "Assets:Checking"), "$20.00");
}

#[test]
fn test_thousands_grouping_is_checked() {
    let parsed = parse(
        "2024/01/01 Good\n  Expenses:Food  1,234.56 USD\n  Assets:Cash\n\n\
         2024/01/02 Bad\n  Expenses:Food  12,34.56 USD\n  Assets:Cash\n",
    );
    assert_eq!(parsed.ctx.count, 1);
    assert_eq!(parsed.ctx.errors.len(), 1);
    assert_eq!(
        parsed.ctx.errors[0].kind,
        ParseErrorKind::Amount(AmountError::IncorrectThousandMarkComma)
    );
    assert_eq!(parsed.ctx.errors[0].line, 6);
    assert_eq!(
        parsed.journal.xacts[0].posts[0].amount.to_string(),
        "1,234.56 USD"
    );
}

#[test]
fn test_multiple_commodities_balance_through_cost() {
    let parsed = parse_ok(
        "2024/03/01 Exchange\n  Assets:Euro  100 EUR @ $1.10\n  Assets:Checking\n",
    );
    let xact = &parsed.journal.xacts[0];
    assert_eq!(xact.posts[1].amount.to_string(), "$-110.00");
    let eur = parsed.pool.find("EUR").unwrap();
    assert_eq!(parsed.pool.prices(&eur).len(), 1);
}

#[test]
fn test_posting_tags_and_pending_state() {
    let parsed = parse_ok(
        "2024/01/05 * Landlord\n  Expenses:Rent  $900.00  ; :housing:\n  ! Assets:Checking\n",
    );
    let xact = &parsed.journal.xacts[0];
    assert!(xact.posts[0].item.has_tag("housing"));
    assert!(!xact.posts[1].item.has_tag("housing"));
    assert_ne!(xact.posts[1].item.state, xact.posts[0].item.state);
}

// ============================================================================
// Scoping Directives
// ============================================================================

#[test]
fn test_apply_year_resolves_short_dates() {
    let parsed = parse_ok(
        "apply year 2020\n11/01 Haircut\n  Expenses:Personal  $30\n  Assets:Cash\nend apply year\n",
    );
    assert_eq!(parsed.journal.xacts[0].item.date, Some(date(2020, 11, 1)));
    assert!(parsed.pool.date_context().epoch().is_none());
}

#[test]
fn test_apply_account_and_tag() {
    let parsed = parse_ok(
        "apply account Business\napply tag acme\n\
         2024/02/01 Invoice\n  Assets:Receivable  $500\n  Income:Consulting\n\
         end apply tag\nend apply account\n\
         2024/02/02 Lunch\n  Expenses:Food  $12\n  Assets:Cash\n",
    );
    let accounts = &parsed.journal.accounts;
    let first = &parsed.journal.xacts[0];
    assert_eq!(
        accounts.full_name(first.posts[0].account),
        "Business:Assets:Receivable"
    );
    assert!(first.item.has_tag("acme"));
    let second = &parsed.journal.xacts[1];
    assert_eq!(accounts.full_name(second.posts[0].account), "Expenses:Food");
    assert!(!second.item.has_tag("acme"));
}

#[test]
fn test_alias_directive() {
    let parsed = parse_ok(
        "alias chk=Assets:Bank:Checking\n2024/01/01 Deposit\n  chk  $100\n  Income\n",
    );
    let post = &parsed.journal.xacts[0].posts[0];
    assert_eq!(
        parsed.journal.accounts.full_name(post.account),
        "Assets:Bank:Checking"
    );
}

// ============================================================================
// Error Recovery
// ============================================================================

#[test]
fn test_unmatched_end_is_recovered() {
    let parsed = parse("2024/01/01 Shop\n  Expenses  $1\n  Assets\nend\n");
    assert_eq!(parsed.ctx.count, 1);
    assert_eq!(parsed.ctx.errors.len(), 1);
    assert_eq!(parsed.ctx.errors[0].kind, ParseErrorKind::EndWithoutApply);
    assert_eq!(parsed.ctx.errors[0].line, 4);
}

#[test]
fn test_broken_fixture_reports_every_error() {
    let parsed = parse_fixture("broken.ledger");
    assert_eq!(parsed.ctx.count, 2);

    let lines: Vec<_> = parsed.ctx.errors.iter().map(|e| e.line).collect();
    assert_eq!(lines, vec![5, 8, 16]);
    assert_eq!(parsed.ctx.errors[0].kind, ParseErrorKind::EndWithoutApply);
    assert!(matches!(parsed.ctx.errors[1].kind, ParseErrorKind::Amount(_)));
    assert_eq!(parsed.ctx.errors[2].kind, ParseErrorKind::UnexpectedWhitespace);

    let payees: Vec<_> = parsed.journal.xacts.iter().map(|x| x.payee.as_str()).collect();
    assert_eq!(payees, vec!["Opening", "Coffee"]);
}

#[test]
fn test_unbalanced_transaction() {
    let parsed = parse("2024/01/01 Oops\n  Expenses  $10\n  Assets  $-9\n");
    assert_eq!(parsed.ctx.count, 0);
    assert_eq!(parsed.ctx.errors.len(), 1);
    assert!(matches!(parsed.ctx.errors[0].kind, ParseErrorKind::Xact(_)));
    assert!(parsed.ctx.errors[0]
        .to_string()
        .ends_with("Error: Transaction does not balance"));
}

#[test]
fn test_cancellation_aborts() {
    let pool = CommodityPool::with_builtins();
    let scope = SymbolScope::new();
    let mut journal = Journal::new();
    let fs = MemoryFileSystem::new();
    let token = CancellationToken::new();
    token.cancel();
    let mut parser = TextualParser::new(
        &mut journal,
        &pool,
        &scope,
        &fs,
        ParseContext::from_string("c.ledger", "2024/01/01 Shop\n  Expenses  $1\n  Assets\n"),
    )
    .with_cancellation(token);
    let err = parser.parse().unwrap_err();
    assert!(err.is_cancelled());
    assert!(journal.xacts.is_empty());
}

// ============================================================================
// Real-world Journals
// ============================================================================

#[test]
fn test_household_journal() {
    let parsed = parse_fixture("household.ledger");
    assert!(
        parsed.ctx.errors.is_empty(),
        "expected no errors, got: {:?}",
        parsed.ctx.errors
    );
    assert_eq!(parsed.ctx.count, 4);

    let dates: Vec<_> = parsed
        .journal
        .xacts
        .iter()
        .map(|x| x.item.date.unwrap())
        .collect();
    assert_eq!(
        dates,
        vec![date(2020, 1, 1), date(2020, 1, 15), date(2020, 2, 1), date(2020, 2, 2)]
    );

    // the statement's balance assignment absorbs the difference
    let statement = &parsed.journal.xacts[3];
    assert_eq!(statement.posts[0].amount.to_string(), "$-10.00");
    assert_eq!(total(&parsed, "Assets:Checking"), "$2,940.00");

    // the automated transaction tracks the grocery budget
    assert_eq!(total(&parsed, "Budget:Groceries"), "$-50.00");
    assert_eq!(parsed.journal.auto_xacts.len(), 1);
    assert_eq!(parsed.journal.period_xacts.len(), 1);

    let eur = parsed.pool.find("EUR").unwrap();
    assert_eq!(parsed.pool.prices(&eur).len(), 1);
    assert!(parsed.pool.date_context().epoch().is_none());
}

#[test]
fn test_household_positions_point_into_included_files() {
    let parsed = parse_fixture("household.ledger");
    let position = parsed.journal.xacts[2].item.position.as_ref().unwrap();
    assert!(position.path.ends_with("household/2020-02.ledger"));
    assert_eq!(position.beg_line, 1);
}

#[test]
fn test_include_on_disk_with_error_chain() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("main.ledger"),
        "include accounts.ledger\ninclude months/*.ledger\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("accounts.ledger"), "account Assets:Cash\n").unwrap();
    std::fs::create_dir(dir.path().join("months")).unwrap();
    std::fs::write(
        dir.path().join("months/01.ledger"),
        "2024/01/03 Shop\n  Expenses:Food  $5\n  Assets:Cash\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("months/02.ledger"), "; February\nend apply\n").unwrap();

    let pool = CommodityPool::with_builtins();
    let scope = SymbolScope::new();
    let mut journal = Journal::new();
    let main = dir.path().join("main.ledger");
    let ctx = ParseContext::open(&main, &OsFileSystem).unwrap();
    let ctx = {
        let mut parser = TextualParser::new(&mut journal, &pool, &scope, &OsFileSystem, ctx);
        parser.parse().unwrap();
        parser.into_context()
    };

    assert_eq!(ctx.count, 1);
    assert_eq!(ctx.errors.len(), 1);
    let err = &ctx.errors[0];
    assert_eq!(err.path, dir.path().join("months/02.ledger"));
    assert_eq!(err.line, 2);
    assert!(err
        .context
        .iter()
        .any(|c| c.starts_with("In file included from") && c.contains("main.ledger")));
}

#[test]
fn test_include_missing_file_is_an_error() {
    let parsed = parse("include /definitely/not/here-*.ledger\n");
    assert_eq!(parsed.ctx.errors.len(), 1);
    assert!(matches!(
        parsed.ctx.errors[0].kind,
        ParseErrorKind::IncludeNotFound(_)
    ));
}
