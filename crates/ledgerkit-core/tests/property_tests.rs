//! Property-based tests for ledgerkit-core.
//!
//! These tests check arithmetic invariants of amounts and balances for
//! arbitrary inputs using proptest.
//!
//! Run with: cargo test -p ledgerkit-core --test `property_tests`

use std::cmp::Ordering;

use ledgerkit_core::{Amount, Balance, CommodityPool};
use proptest::prelude::*;
use rust_decimal::Decimal;

// ============================================================================
// Arbitrary generators
// ============================================================================

fn arb_decimal() -> impl Strategy<Value = Decimal> {
    (-1_000_000i64..1_000_000i64).prop_map(|n| Decimal::new(n, 2))
}

fn arb_nonzero_decimal() -> impl Strategy<Value = Decimal> {
    arb_decimal().prop_filter("non-zero", |d| !d.is_zero())
}

fn arb_symbol() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("USD"), Just("EUR"), Just("AAPL"), Just("BTC")]
}

fn amount(pool: &CommodityPool, number: Decimal, symbol: &str) -> Amount {
    Amount::parse(&format!("{number} {symbol}"), pool).unwrap()
}

// ============================================================================
// Amount arithmetic
// ============================================================================

proptest! {
    #[test]
    fn add_is_commutative(a in arb_decimal(), b in arb_decimal(), sym in arb_symbol()) {
        let pool = CommodityPool::with_builtins();
        let x = amount(&pool, a, sym);
        let y = amount(&pool, b, sym);
        let left = x.checked_add(&y).unwrap();
        let right = y.checked_add(&x).unwrap();
        prop_assert_eq!(left.compare(&right).unwrap(), Ordering::Equal);
    }

    #[test]
    fn subtracting_self_is_zero(a in arb_decimal(), sym in arb_symbol()) {
        let pool = CommodityPool::with_builtins();
        let x = amount(&pool, a, sym);
        let diff = x.checked_sub(&x).unwrap();
        prop_assert!(diff.is_realzero().unwrap());
        prop_assert!(diff.is_zero().unwrap());
    }

    #[test]
    fn double_negation_is_identity(a in arb_decimal(), sym in arb_symbol()) {
        let pool = CommodityPool::with_builtins();
        let x = amount(&pool, a, sym);
        let back = x.negated().unwrap().negated().unwrap();
        prop_assert_eq!(back, x);
    }

    #[test]
    fn sign_matches_decimal(a in arb_decimal()) {
        let x = Amount::from_decimal(a);
        let expected = match a.cmp(&Decimal::ZERO) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        };
        prop_assert_eq!(x.sign().unwrap(), expected);
    }

    #[test]
    fn multiply_then_divide_restores(a in arb_decimal(), b in arb_nonzero_decimal()) {
        let x = Amount::from_decimal(a);
        let y = Amount::from_decimal(b);
        let back = x.checked_mul(&y).unwrap().checked_div(&y).unwrap();
        prop_assert_eq!(back.compare(&x).unwrap(), Ordering::Equal);
    }

    #[test]
    fn decimal_interop_is_exact(a in arb_decimal()) {
        prop_assert_eq!(Amount::from_decimal(a).to_decimal().unwrap(), a);
    }

    #[test]
    fn commodity_mismatch_is_rejected(a in arb_decimal(), b in arb_decimal()) {
        let pool = CommodityPool::with_builtins();
        let x = amount(&pool, a, "USD");
        let y = amount(&pool, b, "EUR");
        prop_assert!(x.checked_add(&y).is_err());
    }
}

// ============================================================================
// Balance invariants
// ============================================================================

proptest! {
    #[test]
    fn balance_add_then_sub_is_empty(
        entries in prop::collection::vec((arb_nonzero_decimal(), arb_symbol()), 1..12)
    ) {
        let pool = CommodityPool::with_builtins();
        let amounts: Vec<Amount> = entries
            .iter()
            .map(|(n, s)| amount(&pool, *n, s))
            .collect();

        let mut balance = Balance::new();
        for a in &amounts {
            balance.add_amount(a).unwrap();
        }
        for a in &amounts {
            balance.sub_amount(a).unwrap();
        }
        prop_assert!(balance.is_empty());
    }

    #[test]
    fn balance_holds_one_entry_per_commodity(
        entries in prop::collection::vec((arb_nonzero_decimal(), arb_symbol()), 1..20)
    ) {
        let pool = CommodityPool::with_builtins();
        let mut balance = Balance::new();
        for (n, s) in &entries {
            balance.add_amount(&amount(&pool, *n, s)).unwrap();
        }
        let mut symbols: Vec<&str> = entries.iter().map(|(_, s)| *s).collect();
        symbols.sort_unstable();
        symbols.dedup();
        prop_assert!(balance.len() <= symbols.len());
    }

    #[test]
    fn balance_negation_cancels(
        entries in prop::collection::vec((arb_nonzero_decimal(), arb_symbol()), 1..8)
    ) {
        let pool = CommodityPool::with_builtins();
        let mut balance = Balance::new();
        for (n, s) in &entries {
            balance.add_amount(&amount(&pool, *n, s)).unwrap();
        }
        let mut sum = balance.clone();
        sum.add_balance(&balance.negated().unwrap()).unwrap();
        prop_assert!(sum.is_empty());
    }
}
