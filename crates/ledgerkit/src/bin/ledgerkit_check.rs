//! ledgerkit-check - read ledger journals and report errors.

use std::process::ExitCode;

fn main() -> ExitCode {
    ledgerkit::cmd::check::main()
}
