//! Error types for the matching engine.
//!
//! "No match found" is never an error here: the replacement finder and the
//! scoring functions report it as a normal result and fragments stay in
//! the leftover pools. Errors are reserved for the two conditions that
//! invalidate a session: a cooperative timeout raised by an external
//! watchdog, and a contract violation (a fragment kind an invariant
//! assumed impossible). Both abort the session pair; partial state is
//! discarded by the caller.

use thiserror::Error;

use seam_core::FragmentId;

/// Errors raised while matching a container pair.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatchError {
    /// The external watchdog cancelled the comparison. Propagated
    /// unmodified through every recursive call boundary; never
    /// reinterpreted as "no match".
    #[error("matching cancelled by watchdog")]
    Timeout,

    /// An invariant assumed a specific fragment kind and found another.
    /// Failing fast beats silently mis-scoring, which would corrupt
    /// downstream refactoring detection.
    #[error("contract violation on {fragment}: {message}")]
    ContractViolation {
        fragment: FragmentId,
        message: String,
    },
}

impl MatchError {
    /// Create a contract violation for `fragment`.
    pub fn contract(fragment: FragmentId, message: impl Into<String>) -> Self {
        MatchError::ContractViolation {
            fragment,
            message: message.into(),
        }
    }
}

/// Result type for matching operations.
pub type MatchResult<T> = Result<T, MatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display_mentions_watchdog() {
        assert_eq!(MatchError::Timeout.to_string(), "matching cancelled by watchdog");
    }

    #[test]
    fn contract_violation_names_the_fragment() {
        let err = MatchError::contract(FragmentId(7), "expected a composite");
        assert_eq!(
            err.to_string(),
            "contract violation on frag_7: expected a composite"
        );
    }
}
