//! End-to-end tests of `ledgerkit-check` through its `run` entry point.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use ledgerkit::cmd::check::{run, Args};
use serde_json::Value;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn check(args: &[&str]) -> (u8, String) {
    let args = Args::parse_from(
        std::iter::once("ledgerkit-check")
            .chain(["--no-color"])
            .chain(args.iter().copied()),
    );
    let mut out = Vec::new();
    let code = run(&args, &mut out).unwrap();
    (code, String::from_utf8(out).unwrap())
}

fn check_json(args: &[&str]) -> (u8, Value) {
    let mut full = vec!["--format", "json"];
    full.extend_from_slice(args);
    let (code, out) = check(&full);
    (code, serde_json::from_str(&out).unwrap())
}

#[test]
fn test_clean_journal() {
    let path = fixture("clean.ledger");
    let (code, out) = check(&["--strict", path.to_str().unwrap()]);
    assert_eq!(code, 0, "{out}");
    assert!(out.contains("No errors found"), "{out}");
}

#[test]
fn test_broken_journal_text() {
    let path = fixture("broken.ledger");
    let (code, out) = check(&[path.to_str().unwrap()]);
    assert_eq!(code, 1);
    assert!(out.contains("P0016"), "{out}");
    assert!(out.contains("P0033"), "{out}");
    assert!(out.contains("Transaction does not balance"), "{out}");
    assert!(out.contains("2 errors"), "{out}");
}

#[test]
fn test_broken_journal_json() {
    let path = fixture("broken.ledger");
    let (code, json) = check_json(&[path.to_str().unwrap()]);
    assert_eq!(code, 1);
    assert_eq!(json["error_count"], 2);
    assert_eq!(json["warning_count"], 0);
    assert_eq!(json["xact_count"], 1);

    let end = &json["diagnostics"][0];
    assert_eq!(end["code"], "P0016");
    assert_eq!(end["severity"], "error");
    assert_eq!(end["line"], 5);
    assert_eq!(end["column"], 1);
    assert!(end["file"].as_str().unwrap().ends_with("broken.ledger"));
    assert!(end["context"]
        .as_str()
        .unwrap()
        .starts_with("While parsing file"));

    assert_eq!(json["diagnostics"][1]["code"], "P0033");
}

#[test]
fn test_strict_warnings_do_not_fail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("loose.ledger");
    fs::write(
        &path,
        "2024/03/01 Corner Shop\n  Expenses:Snacks  $3.00\n  Assets:Cash\n",
    )
    .unwrap();

    let (code, json) = check_json(&["--strict", path.to_str().unwrap()]);
    assert_eq!(code, 0);
    assert_eq!(json["error_count"], 0);
    let warnings = json["diagnostics"].as_array().unwrap();
    assert!(!warnings.is_empty());
    assert!(warnings.iter().all(|w| w["severity"] == "warning"));
    assert!(warnings
        .iter()
        .any(|w| w["message"] == "Unknown account 'Expenses:Snacks'"));
}

#[test]
fn test_pedantic_turns_warnings_into_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("loose.ledger");
    fs::write(
        &path,
        "account Assets:Cash\ncommodity $\n\n2024/03/01 Corner Shop\n  Expenses:Snacks  $3.00\n  Assets:Cash\n",
    )
    .unwrap();

    let (code, out) = check(&["--pedantic", path.to_str().unwrap()]);
    assert_eq!(code, 1);
    assert!(out.contains("Unknown account 'Expenses:Snacks'"), "{out}");
}

#[test]
fn test_include_chain_in_json() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("sub.ledger"), "2024/01/01 Shop\n  Expenses  $1\n  Assets\nend\n")
        .unwrap();
    let main = dir.path().join("main.ledger");
    fs::write(&main, "include sub.ledger\n").unwrap();

    let (code, json) = check_json(&[main.to_str().unwrap()]);
    assert_eq!(code, 1);
    let diag = &json["diagnostics"][0];
    assert!(diag["file"].as_str().unwrap().ends_with("sub.ledger"));
    assert_eq!(diag["line"], 4);
    let context = diag["context"].as_str().unwrap();
    assert!(context.starts_with("In file included from"), "{context}");
    assert!(context.contains("While parsing file"), "{context}");
}

#[test]
fn test_decimal_comma_flag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eu.ledger");
    fs::write(
        &path,
        "2024/02/01 Bäckerei\n  Expenses:Food  1.250,00 EUR\n  Assets:Bank\n",
    )
    .unwrap();

    let (code, out) = check(&["--decimal-comma", path.to_str().unwrap()]);
    assert_eq!(code, 0, "{out}");
}

#[test]
fn test_quiet_prints_nothing() {
    let path = fixture("broken.ledger");
    let (code, out) = check(&["--quiet", path.to_str().unwrap()]);
    assert_eq!(code, 1);
    assert!(out.is_empty());
}

#[test]
fn test_missing_file_is_fatal() {
    let args = Args::parse_from(["ledgerkit-check", "/nonexistent/journal.ledger"]);
    let mut out = Vec::new();
    let err = run(&args, &mut out).unwrap_err();
    assert!(format!("{err:#}").contains("failed to read /nonexistent/journal.ledger"));
}

#[test]
fn test_summary_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("one.ledger");
    fs::write(&path, "2024/01/01 Oops\n  Expenses  $10\n  Assets  $-9\n").unwrap();

    let (code, json) = check_json(&[path.to_str().unwrap()]);
    assert_eq!(code, 1);
    let diag = &json["diagnostics"][0];
    insta::assert_snapshot!(
        format!("{} {} {}", diag["severity"], diag["code"], diag["message"]),
        @r#""error" "P0033" "Transaction does not balance""#
    );
}
