//! Parser performance benchmarks.
//!
//! Run with: cargo bench -p ledgerkit-parser

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ledgerkit_core::{CommodityPool, Journal, SymbolScope};
use ledgerkit_parser::{MemoryFileSystem, ParseContext, TextualParser};

/// Generate a synthetic journal with N transactions.
fn generate_journal(num_transactions: usize) -> String {
    let mut lines = vec![
        "account Assets:Bank:Checking".to_string(),
        "account Expenses:Food".to_string(),
        "account Expenses:Coffee".to_string(),
        "account Expenses:Groceries".to_string(),
        "account Expenses:Transport".to_string(),
        "commodity $".to_string(),
        "  format $1,000.00".to_string(),
        String::new(),
        "= /^Expenses:Coffee/".to_string(),
        "  (Budget:Coffee)  -1".to_string(),
        String::new(),
    ];

    let categories = ["Food", "Coffee", "Groceries", "Transport"];
    let payees = ["Store A", "Store B", "Cafe", "Gas Station", "Supermarket"];
    let mut day = 1;
    let mut month = 1;
    let mut year = 2024;

    for i in 0..num_transactions {
        let category = categories[i % categories.len()];
        let payee = payees[i % payees.len()];
        let amount = format!("{:.2}", 10.0 + (i % 100) as f64);

        lines.push(format!("{year:04}/{month:02}/{day:02} * {payee}  ; Transaction {i}"));
        lines.push(format!("  Expenses:{category}  ${amount}"));
        if i % 10 == 0 {
            lines.push("  ; :review:".to_string());
        }
        lines.push("  Assets:Bank:Checking".to_string());
        lines.push(String::new());

        day += 1;
        if day > 28 {
            day = 1;
            month += 1;
            if month > 12 {
                month = 1;
                year += 1;
            }
        }
    }

    lines.join("\n")
}

fn parse(source: &str) -> usize {
    let pool = CommodityPool::with_builtins();
    let scope = SymbolScope::new();
    let fs = MemoryFileSystem::new();
    let mut journal = Journal::new();
    let context = ParseContext::from_string("bench.ledger", source);
    let mut parser = TextualParser::new(&mut journal, &pool, &scope, &fs, context);
    parser.parse().unwrap_or_default()
}

fn bench_parse_small(c: &mut Criterion) {
    let journal = generate_journal(10);

    let mut group = c.benchmark_group("parse_small");
    group.throughput(Throughput::Bytes(journal.len() as u64));
    group.bench_function("10_transactions", |b| {
        b.iter(|| parse(black_box(&journal)));
    });
    group.finish();
}

fn bench_parse_large(c: &mut Criterion) {
    let journal = generate_journal(1000);

    let mut group = c.benchmark_group("parse_large");
    group.throughput(Throughput::Bytes(journal.len() as u64));
    group.bench_function("1000_transactions", |b| {
        b.iter(|| parse(black_box(&journal)));
    });
    group.finish();
}

fn bench_parse_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_scaling");

    for size in [10, 100, 500, 1000] {
        let journal = generate_journal(size);
        group.throughput(Throughput::Bytes(journal.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &journal, |b, journal| {
            b.iter(|| parse(black_box(journal)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parse_small, bench_parse_large, bench_parse_scaling);
criterion_main!(benches);
