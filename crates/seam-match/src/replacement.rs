//! Replacements: localized, typed differences inside an otherwise-matched
//! fragment pair.
//!
//! The taxonomy is closed. Most kinds are plain token substitutions; the
//! aggregate kinds (`Composite`, `LoopWithPipeline`, `SwitchCaseWithIf`)
//! additionally enumerate the statements they absorb, because the
//! structural-move detectors accept whole related sets atomically instead
//! of mapping members one by one.

use serde::{Deserialize, Serialize};

use seam_core::FragmentId;

/// Kind of a localized difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplacementKind {
    VariableName,
    MethodInvocationName,
    Type,
    InfixOperator,
    InvertConditional,
    BooleanLiteral,
    NumberLiteral,
    StringLiteral,
    NullLiteral,
    Argument,
    Conditional,
    /// Aggregate: one side's statement absorbed additional statements of
    /// the other side.
    Composite,
    /// Aggregate: a loop rewritten as a collection pipeline (or back).
    LoopWithPipeline,
    /// Aggregate: a switch case rewritten as an if condition (or back).
    SwitchCaseWithIf,
}

impl ReplacementKind {
    /// Whether the kind is one of the aggregates produced by
    /// structural-move detection.
    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            ReplacementKind::Composite
                | ReplacementKind::LoopWithPipeline
                | ReplacementKind::SwitchCaseWithIf
        )
    }
}

/// Extra payload carried by aggregate replacements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsorbedStatements {
    /// Fragments on the "before" side explained by this aggregate.
    pub before: Vec<FragmentId>,
    /// Fragments on the "after" side explained by this aggregate.
    pub after: Vec<FragmentId>,
}

impl AbsorbedStatements {
    /// Total number of statements this aggregate additionally explains.
    pub fn total(&self) -> usize {
        self.before.len() + self.after.len()
    }
}

/// A localized, typed difference with its before/after tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub kind: ReplacementKind,
    pub before: String,
    pub after: String,
    /// Populated for aggregate kinds only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absorbed: Option<AbsorbedStatements>,
}

impl Replacement {
    /// Create a plain (non-aggregate) replacement.
    pub fn new(kind: ReplacementKind, before: impl Into<String>, after: impl Into<String>) -> Self {
        Replacement {
            kind,
            before: before.into(),
            after: after.into(),
            absorbed: None,
        }
    }

    /// Create an aggregate replacement with its absorbed statements.
    pub fn aggregate(
        kind: ReplacementKind,
        before: impl Into<String>,
        after: impl Into<String>,
        absorbed: AbsorbedStatements,
    ) -> Self {
        Replacement {
            kind,
            before: before.into(),
            after: after.into(),
            absorbed: Some(absorbed),
        }
    }

    /// Number of statements the aggregate payload explains, zero for
    /// plain replacements.
    pub fn absorbed_total(&self) -> usize {
        self.absorbed.as_ref().map_or(0, AbsorbedStatements::total)
    }
}
