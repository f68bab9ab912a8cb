//! Class/model diff context consumed by the matcher.
//!
//! The whole-class diff (which operations were added or removed, how calls
//! resolve to declarations, which type names denote the same logical type)
//! is computed by an outer layer and supplied read-only. The matcher uses
//! it for extract/inline scoring credit and the `this`-parameter
//! heuristics; [`NullDiffContext`] is the empty implementation used when
//! no class context exists.

use seam_core::Invocation;

/// Signature and body summary of an operation known to the class diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStub {
    pub name: String,
    /// Formal parameter names, in order.
    pub parameters: Vec<String>,
    /// Canonical per-statement strings of the body, for containment checks.
    pub body_statements: Vec<String>,
}

impl OperationStub {
    pub fn new(name: impl Into<String>, parameters: &[&str], body_statements: &[&str]) -> Self {
        OperationStub {
            name: name.into(),
            parameters: parameters.iter().map(|p| p.to_string()).collect(),
            body_statements: body_statements.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Whether every statement string of `sequence` occurs literally in
    /// this operation's body.
    pub fn contains_sequence(&self, sequence: &[&str]) -> bool {
        !sequence.is_empty()
            && sequence.iter().all(|s| {
                self.body_statements
                    .iter()
                    .any(|body| body.contains(s.trim()))
            })
    }
}

/// Read-only class/model diff context.
pub trait DiffContext {
    /// Operations added by the change (present only in the "after" class).
    fn added_operations(&self) -> &[OperationStub];

    /// Operations removed by the change (present only in the "before"
    /// class).
    fn removed_operations(&self) -> &[OperationStub];

    /// Resolve a call against a candidate list, accounting for overloads:
    /// the name must match and the candidate must accept the call's
    /// argument count.
    fn resolve_call<'a>(
        &self,
        invocation: &Invocation,
        candidates: &'a [OperationStub],
    ) -> Option<&'a OperationStub> {
        candidates
            .iter()
            .find(|op| op.name == invocation.name && op.parameters.len() == invocation.arguments.len())
    }

    /// Whether two type names denote the same logical type (used by the
    /// `this`-parameter heuristics).
    fn same_logical_type(&self, a: &str, b: &str) -> bool {
        let last = |s: &str| {
            s.rsplit('.')
                .next()
                .unwrap_or(s)
                .to_string()
        };
        !a.is_empty() && last(a) == last(b)
    }
}

/// Empty context: no class diff information available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDiffContext;

impl DiffContext for NullDiffContext {
    fn added_operations(&self) -> &[OperationStub] {
        &[]
    }

    fn removed_operations(&self) -> &[OperationStub] {
        &[]
    }
}

/// Plain-struct context carrying precomputed lists.
#[derive(Debug, Clone, Default)]
pub struct StaticDiffContext {
    pub added: Vec<OperationStub>,
    pub removed: Vec<OperationStub>,
}

impl DiffContext for StaticDiffContext {
    fn added_operations(&self) -> &[OperationStub] {
        &self.added
    }

    fn removed_operations(&self) -> &[OperationStub] {
        &self.removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seam_core::constructs::scan_invocations;

    #[test]
    fn resolve_call_matches_name_and_arity() {
        let ctx = StaticDiffContext {
            added: vec![
                OperationStub::new("emit", &["a"], &[]),
                OperationStub::new("emit", &["a", "b"], &[]),
            ],
            removed: vec![],
        };
        let invocations = scan_invocations("emit(x, y);");
        let resolved = ctx
            .resolve_call(&invocations[0], ctx.added_operations())
            .unwrap();
        assert_eq!(resolved.parameters.len(), 2);
    }

    #[test]
    fn same_logical_type_ignores_qualifiers() {
        let ctx = NullDiffContext;
        assert!(ctx.same_logical_type("com.acme.Widget", "Widget"));
        assert!(!ctx.same_logical_type("Widget", "Gadget"));
    }

    #[test]
    fn sequence_containment_requires_every_statement() {
        let op = OperationStub::new("moved", &[], &["int x = 0;", "emit(x);"]);
        assert!(op.contains_sequence(&["int x = 0;"]));
        assert!(!op.contains_sequence(&["int x = 0;", "other();"]));
        assert!(!op.contains_sequence(&[]));
    }
}
