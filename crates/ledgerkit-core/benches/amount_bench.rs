//! Amount, balance and expression benchmarks.
//!
//! Run with: cargo bench -p ledgerkit-core

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ledgerkit_core::{Amount, Balance, CommodityPool, Expr, SymbolScope};

const SYMBOLS: [&str; 4] = ["USD", "EUR", "AAPL", "BTC"];

fn bench_amount_parse(c: &mut Criterion) {
    let pool = CommodityPool::with_builtins();
    let inputs = ["$1,234.56", "-12.5 EUR", "10 AAPL {$150.00} [2024/01/15]", "1.5h"];

    let mut group = c.benchmark_group("amount_parse");
    for input in inputs {
        group.bench_with_input(BenchmarkId::from_parameter(input), &input, |b, input| {
            b.iter(|| black_box(Amount::parse(input, &pool).unwrap()));
        });
    }
    group.finish();
}

fn bench_balance_add(c: &mut Criterion) {
    let pool = CommodityPool::with_builtins();
    let mut group = c.benchmark_group("balance_add");

    for size in [10, 100, 1000] {
        let amounts: Vec<Amount> = (0..size)
            .map(|i| {
                let symbol = SYMBOLS[i % SYMBOLS.len()];
                Amount::parse(&format!("{}.{:02} {symbol}", i, i % 100), &pool).unwrap()
            })
            .collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &amounts, |b, amounts| {
            b.iter(|| {
                let mut balance = Balance::new();
                for amount in amounts {
                    balance.add_amount(amount).unwrap();
                }
                black_box(balance)
            });
        });
    }
    group.finish();
}

fn bench_expr_calc(c: &mut Criterion) {
    let pool = CommodityPool::with_builtins();
    let scope = SymbolScope::new();
    let expr = Expr::parse("(2 + 3) * 4 > 10 ? $1.00 * 3 : $0.50", &pool).unwrap();

    c.bench_function("expr_calc", |b| {
        b.iter(|| black_box(expr.calc(&scope).unwrap()));
    });
}

criterion_group!(benches, bench_amount_parse, bench_balance_add, bench_expr_calc);
criterion_main!(benches);
