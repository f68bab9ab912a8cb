//! Cooperative cancellation.
//!
//! An external watchdog holds a clone of the token and raises it when a
//! comparison has run too long. Every phase and every recursion entry
//! point checks the token and short-circuits with
//! [`MatchError::Timeout`], which callers propagate with `?` rather than
//! catching: partially built session state is not reusable after a
//! timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{MatchError, MatchResult};

/// Shared cancellation flag. Clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that never fires unless [`CancellationToken::cancel`] is
    /// called on a clone.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the signal has been raised.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Short-circuit with [`MatchError::Timeout`] once cancelled.
    pub fn check(&self) -> MatchResult<()> {
        if self.is_cancelled() {
            Err(MatchError::Timeout)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_passes() {
        let token = CancellationToken::new();
        assert!(token.check().is_ok());
    }

    #[test]
    fn cancelled_clone_is_observed() {
        let token = CancellationToken::new();
        let watchdog = token.clone();
        watchdog.cancel();
        assert_eq!(token.check(), Err(MatchError::Timeout));
    }
}
