#![no_main]
//! Fuzz target for transactions.
//!
//! Generates journal text that looks like real transactions, so amounts,
//! costs and balance assignments get exercised past the header parser.

use arbitrary::Arbitrary;
use ledgerkit_core::{CommodityPool, Journal, SymbolScope};
use ledgerkit_parser::parse_source;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct FuzzPost {
    account: String,
    quantity: String,
    commodity: String,
    kind: u8,
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    year: u16,
    month: u8,
    day: u8,
    payee: String,
    posts: Vec<FuzzPost>,
}

fn clean(text: &str, keep: impl Fn(char) -> bool, max: usize) -> String {
    text.chars().filter(|&c| keep(c)).take(max).collect()
}

impl FuzzInput {
    fn to_ledger(&self) -> String {
        let mut out = format!(
            "{:04}/{:02}/{:02} {}\n",
            self.year % 3000,
            (self.month % 12) + 1,
            (self.day % 28) + 1,
            clean(&self.payee, |c| c != '\n' && c != '\r', 60)
        );
        for post in self.posts.iter().take(8) {
            let account = clean(&post.account, |c| c.is_alphanumeric() || c == ':', 40);
            let account = if account.is_empty() { "Assets:Cash".to_string() } else { account };
            let quantity = clean(&post.quantity, |c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'), 20);
            let commodity = clean(&post.commodity, |c| c.is_alphabetic() || c == '$', 5);
            let amount = format!("{quantity} {commodity}");
            let line = match post.kind % 5 {
                0 => format!("  {account}  {amount}"),
                1 => format!("  {account}"),
                2 => format!("  {account}  {amount} @ $1.50"),
                3 => format!("  {account}  = {amount}"),
                _ => format!("  ({account})  {amount}"),
            };
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

fuzz_target!(|input: FuzzInput| {
    let text = input.to_ledger();
    let pool = CommodityPool::with_builtins();
    let scope = SymbolScope::new();
    let mut journal = Journal::new();
    let _ = parse_source("/fuzz.ledger", text, &mut journal, &pool, &scope);
});
