//! Shared fixtures for the integration suites.

use seam_core::Container;
use seam_match::cancel::CancellationToken;
use seam_match::config::MatchConfig;
use seam_match::context::NullDiffContext;
use seam_match::session::MatchSession;

static NULL_CTX: NullDiffContext = NullDiffContext;

/// Run a full two-body comparison with defaults.
pub fn run<'a>(before: &'a Container, after: &'a Container) -> MatchSession<'a> {
    MatchSession::between(
        before,
        after,
        &NULL_CTX,
        MatchConfig::default(),
        CancellationToken::new(),
    )
    .expect("matching pass")
}

/// The accepted (before, after) pairs with their replacement kinds, for
/// determinism comparisons.
pub fn mapping_signature(session: &MatchSession<'_>) -> Vec<(u32, u32, Vec<String>)> {
    session
        .mappings()
        .map(|m| {
            (
                m.before.0,
                m.after.0,
                m.replacements.iter().map(|r| format!("{:?}", r.kind)).collect(),
            )
        })
        .collect()
}
