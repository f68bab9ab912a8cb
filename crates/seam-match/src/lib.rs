//! Statement-tree matching engine for refactoring mining.
//!
//! Given the body of a method/lambda/initializer "before" a change and the
//! body of the same logical unit "after" it, a [`session::MatchSession`]
//! pairs fragments across the two trees, computes localized
//! [`replacement::Replacement`]s for near-matches, resolves ambiguity with
//! scoring and tie-break rules, and opportunistically records the
//! refactorings only the matcher has enough context to see
//! (extract/inline variable, loop↔pipeline, if↔switch, merge/split
//! conditional).
//!
//! Inputs are immutable statement trees from `seam-core`; the engine does
//! no I/O and keeps all mutable state on the session.

pub mod analysis;
pub mod cancel;
pub mod candidate;
pub mod config;
pub mod context;
pub mod detect;
pub mod error;
pub mod finder;
pub mod mapping;
pub mod refactoring;
pub mod replacement;
pub mod score;
pub mod session;
pub mod text;

pub use cancel::CancellationToken;
pub use config::MatchConfig;
pub use context::{DiffContext, NullDiffContext, OperationStub};
pub use error::{MatchError, MatchResult};
pub use mapping::{Mapping, MappingId, MappingKind, MappingStore};
pub use refactoring::Refactoring;
pub use replacement::{Replacement, ReplacementKind};
pub use session::MatchSession;
