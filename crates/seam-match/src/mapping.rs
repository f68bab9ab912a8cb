//! Mappings and the session mapping store.
//!
//! A mapping pairs one "before" fragment with one "after" fragment. Each
//! side of a statement fragment belongs to at most one retained mapping at
//! a time; sub-expression mappings are exempt from that exclusivity but
//! must stay subordinate to a primary mapping (or to the refactoring
//! record that justified them). The store keeps insertion order for
//! reproducible downstream consumption and supports eviction when a
//! better correspondence is discovered later.

use std::collections::HashMap;

use serde::Serialize;

use seam_core::FragmentId;

use crate::error::{MatchError, MatchResult};
use crate::replacement::Replacement;

/// Stable identifier of a mapping within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, PartialOrd, Ord)]
pub struct MappingId(pub u32);

impl std::fmt::Display for MappingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "map_{}", self.0)
    }
}

/// What the mapping pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MappingKind {
    Leaf,
    Composite,
    /// Auxiliary: one side is a sub-expression fragment. Exempt from
    /// primary exclusivity.
    Expression,
}

/// A sub-expression correspondence attached to a primary mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubExpressionMapping {
    /// Expression text on the "before" side.
    pub before: String,
    /// Expression text on the "after" side.
    pub after: String,
    /// Fragment carrying the before text, when it is materialized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_fragment: Option<FragmentId>,
    /// Fragment carrying the after text, when it is materialized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_fragment: Option<FragmentId>,
}

/// An accepted correspondence between a before-fragment and an
/// after-fragment.
#[derive(Debug, Clone, Serialize)]
pub struct Mapping {
    pub id: MappingId,
    pub before: FragmentId,
    pub after: FragmentId,
    pub kind: MappingKind,
    /// Localized differences explaining the pair; empty for exact pairs.
    pub replacements: Vec<Replacement>,
    /// Whether the pair matched on identical (or argumentization-identical)
    /// text.
    pub exact: bool,
    /// Auxiliary sub-expression correspondences.
    pub subexpressions: Vec<SubExpressionMapping>,
    /// Index into the session's refactoring list, when this mapping
    /// carries an inline-detected refactoring.
    pub refactoring: Option<usize>,
    /// Structural-move cluster membership: mappings accepted atomically
    /// share a cluster and are excused from consistency repair.
    pub cluster: Option<u32>,
}

impl Mapping {
    /// Whether any replacement is an aggregate.
    pub fn has_aggregate(&self) -> bool {
        self.replacements.iter().any(|r| r.kind.is_aggregate())
    }
}

/// Mapping store with per-side exclusivity and stable insertion order.
#[derive(Debug, Default)]
pub struct MappingStore {
    slots: Vec<Option<Mapping>>,
    order: Vec<MappingId>,
    by_before: HashMap<FragmentId, MappingId>,
    by_after: HashMap<FragmentId, MappingId>,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a mapping, enforcing primary exclusivity for non-expression
    /// mappings. Returns the assigned id.
    pub fn insert(
        &mut self,
        before: FragmentId,
        after: FragmentId,
        kind: MappingKind,
        replacements: Vec<Replacement>,
        exact: bool,
    ) -> MatchResult<MappingId> {
        if kind != MappingKind::Expression {
            if self.by_before.contains_key(&before) {
                return Err(MatchError::contract(
                    before,
                    "before fragment already holds a retained mapping",
                ));
            }
            if self.by_after.contains_key(&after) {
                return Err(MatchError::contract(
                    after,
                    "after fragment already holds a retained mapping",
                ));
            }
        }
        let id = MappingId(self.slots.len() as u32);
        self.slots.push(Some(Mapping {
            id,
            before,
            after,
            kind,
            replacements,
            exact,
            subexpressions: Vec::new(),
            refactoring: None,
            cluster: None,
        }));
        self.order.push(id);
        if kind != MappingKind::Expression {
            self.by_before.insert(before, id);
            self.by_after.insert(after, id);
        }
        Ok(id)
    }

    /// Evict a mapping, freeing its fragments for re-matching. Returns the
    /// evicted mapping.
    pub fn evict(&mut self, id: MappingId) -> Option<Mapping> {
        let mapping = self.slots.get_mut(id.0 as usize)?.take()?;
        self.order.retain(|&m| m != id);
        if mapping.kind != MappingKind::Expression {
            self.by_before.remove(&mapping.before);
            self.by_after.remove(&mapping.after);
        }
        Some(mapping)
    }

    pub fn get(&self, id: MappingId) -> Option<&Mapping> {
        self.slots.get(id.0 as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: MappingId) -> Option<&mut Mapping> {
        self.slots.get_mut(id.0 as usize)?.as_mut()
    }

    /// Retained mappings in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Mapping> {
        self.order.iter().filter_map(|&id| self.get(id))
    }

    /// Number of retained mappings.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Retained primary mapping owning `before`, if any.
    pub fn by_before(&self, before: FragmentId) -> Option<&Mapping> {
        self.by_before.get(&before).and_then(|&id| self.get(id))
    }

    /// Retained primary mapping owning `after`, if any.
    pub fn by_after(&self, after: FragmentId) -> Option<&Mapping> {
        self.by_after.get(&after).and_then(|&id| self.get(id))
    }

    /// Whether the exact pair (before, after) is retained.
    pub fn contains_pair(&self, before: FragmentId, after: FragmentId) -> bool {
        self.by_before(before).is_some_and(|m| m.after == after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replacement::{Replacement, ReplacementKind};

    fn store_with_one() -> (MappingStore, MappingId) {
        let mut store = MappingStore::new();
        let id = store
            .insert(FragmentId(1), FragmentId(2), MappingKind::Leaf, Vec::new(), true)
            .unwrap();
        (store, id)
    }

    mod exclusivity {
        use super::*;

        #[test]
        fn before_side_is_exclusive() {
            let (mut store, _) = store_with_one();
            let err = store
                .insert(FragmentId(1), FragmentId(9), MappingKind::Leaf, Vec::new(), true)
                .unwrap_err();
            assert!(matches!(err, MatchError::ContractViolation { .. }));
        }

        #[test]
        fn after_side_is_exclusive() {
            let (mut store, _) = store_with_one();
            assert!(store
                .insert(FragmentId(9), FragmentId(2), MappingKind::Leaf, Vec::new(), true)
                .is_err());
        }

        #[test]
        fn expression_mappings_are_exempt() {
            let (mut store, _) = store_with_one();
            // The same statement may participate in auxiliary expression
            // mappings without violating primary exclusivity.
            assert!(store
                .insert(
                    FragmentId(1),
                    FragmentId(7),
                    MappingKind::Expression,
                    vec![Replacement::new(ReplacementKind::VariableName, "a", "b")],
                    false,
                )
                .is_ok());
        }
    }

    mod eviction {
        use super::*;

        #[test]
        fn evicted_fragments_can_be_remapped() {
            let (mut store, id) = store_with_one();
            let evicted = store.evict(id).unwrap();
            assert_eq!(evicted.before, FragmentId(1));
            assert!(store.is_empty());
            assert!(store
                .insert(FragmentId(1), FragmentId(5), MappingKind::Leaf, Vec::new(), true)
                .is_ok());
        }
    }

    mod ordering {
        use super::*;

        #[test]
        fn iteration_follows_insertion() {
            let mut store = MappingStore::new();
            for i in 0..5u32 {
                store
                    .insert(
                        FragmentId(i),
                        FragmentId(100 + i),
                        MappingKind::Leaf,
                        Vec::new(),
                        true,
                    )
                    .unwrap();
            }
            let befores: Vec<u32> = store.iter().map(|m| m.before.0).collect();
            assert_eq!(befores, vec![0, 1, 2, 3, 4]);
        }
    }
}
