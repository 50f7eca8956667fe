//! Cooperative cancellation of a running parse.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ParseError, ParseErrorKind};

/// A flag another thread can raise to stop a parse between directives.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of this token to stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with [`ParseErrorKind::Cancelled`] once cancelled.
    pub fn check(&self) -> Result<(), ParseError> {
        if self.is_cancelled() {
            Err(ParseError::new(ParseErrorKind::Cancelled))
        } else {
            Ok(())
        }
    }
}
