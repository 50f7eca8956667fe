#![no_main]
//! Fuzz target for the journal reader.
//!
//! Arbitrary text must come back as recorded errors, never as a panic.

use ledgerkit_core::{CommodityPool, Journal, SymbolScope};
use ledgerkit_parser::{MemoryFileSystem, ParseContext, TextualParser};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let pool = CommodityPool::with_builtins();
        let scope = SymbolScope::new();
        let mut journal = Journal::new();
        // includes resolve against an empty in-memory tree
        let fs = MemoryFileSystem::new();
        let mut parser = TextualParser::new(
            &mut journal,
            &pool,
            &scope,
            &fs,
            ParseContext::from_string("/fuzz.ledger", input),
        );
        let _ = parser.parse();
    }
});
