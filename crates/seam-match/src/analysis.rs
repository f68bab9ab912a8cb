//! Derived variable analysis.
//!
//! After a pass completes, consistent variable-name replacement evidence
//! across the retained mappings is distilled into rename/merge/split
//! records. The session computes this lazily and caches the result; the
//! store is immutable by then.

use crate::mapping::{MappingId, MappingStore};
use crate::refactoring::Refactoring;
use crate::replacement::ReplacementKind;

/// Accumulated evidence for one observed name pair.
#[derive(Debug)]
struct NamePair {
    before: String,
    after: String,
    mappings: Vec<MappingId>,
}

/// Derive rename/merge/split variable records from the retained mappings.
pub fn derive_variable_refactorings(store: &MappingStore) -> Vec<Refactoring> {
    let mut pairs: Vec<NamePair> = Vec::new();
    for mapping in store.iter() {
        for replacement in &mapping.replacements {
            if replacement.kind != ReplacementKind::VariableName {
                continue;
            }
            match pairs
                .iter_mut()
                .find(|p| p.before == replacement.before && p.after == replacement.after)
            {
                Some(pair) => pair.mappings.push(mapping.id),
                None => pairs.push(NamePair {
                    before: replacement.before.clone(),
                    after: replacement.after.clone(),
                    mappings: vec![mapping.id],
                }),
            }
        }
    }

    let mut out = Vec::new();
    let mut consumed = vec![false; pairs.len()];

    // Merges: several before-names consistently replaced by one after-name.
    for i in 0..pairs.len() {
        if consumed[i] {
            continue;
        }
        let group: Vec<usize> = (0..pairs.len())
            .filter(|&j| !consumed[j] && pairs[j].after == pairs[i].after)
            .collect();
        if group.len() >= 2 {
            let mut before_names = Vec::new();
            let mut mappings = Vec::new();
            for &j in &group {
                before_names.push(pairs[j].before.clone());
                mappings.extend(pairs[j].mappings.iter().copied());
                consumed[j] = true;
            }
            mappings.sort();
            mappings.dedup();
            out.push(Refactoring::MergeVariables {
                before_names,
                after_name: pairs[i].after.clone(),
                mappings,
            });
        }
    }

    // Splits: one before-name replaced by several after-names.
    for i in 0..pairs.len() {
        if consumed[i] {
            continue;
        }
        let group: Vec<usize> = (0..pairs.len())
            .filter(|&j| !consumed[j] && pairs[j].before == pairs[i].before)
            .collect();
        if group.len() >= 2 {
            let mut after_names = Vec::new();
            let mut mappings = Vec::new();
            for &j in &group {
                after_names.push(pairs[j].after.clone());
                mappings.extend(pairs[j].mappings.iter().copied());
                consumed[j] = true;
            }
            mappings.sort();
            mappings.dedup();
            out.push(Refactoring::SplitVariable {
                before_name: pairs[i].before.clone(),
                after_names,
                mappings,
            });
        }
    }

    // Renames: the remaining 1:1 pairs.
    for (i, pair) in pairs.iter().enumerate() {
        if consumed[i] {
            continue;
        }
        out.push(Refactoring::RenameVariable {
            before_name: pair.before.clone(),
            after_name: pair.after.clone(),
            mappings: pair.mappings.clone(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingKind;
    use crate::replacement::Replacement;
    use seam_core::FragmentId;

    fn store_with(replacements: Vec<Vec<(&str, &str)>>) -> MappingStore {
        let mut store = MappingStore::new();
        for (i, pairs) in replacements.into_iter().enumerate() {
            let reps = pairs
                .into_iter()
                .map(|(b, a)| Replacement::new(ReplacementKind::VariableName, b, a))
                .collect();
            store
                .insert(
                    FragmentId(i as u32),
                    FragmentId(100 + i as u32),
                    MappingKind::Leaf,
                    reps,
                    false,
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn consistent_pair_is_a_rename() {
        let store = store_with(vec![vec![("count", "total")], vec![("count", "total")]]);
        let derived = derive_variable_refactorings(&store);
        assert_eq!(derived.len(), 1);
        match &derived[0] {
            Refactoring::RenameVariable {
                before_name,
                after_name,
                mappings,
            } => {
                assert_eq!(before_name, "count");
                assert_eq!(after_name, "total");
                assert_eq!(mappings.len(), 2);
            }
            other => panic!("expected rename, got {other:?}"),
        }
    }

    #[test]
    fn two_befores_one_after_is_a_merge() {
        let store = store_with(vec![vec![("first", "combined")], vec![("second", "combined")]]);
        let derived = derive_variable_refactorings(&store);
        assert_eq!(derived.len(), 1);
        match &derived[0] {
            Refactoring::MergeVariables {
                before_names,
                after_name,
                ..
            } => {
                assert_eq!(before_names, &vec!["first".to_string(), "second".to_string()]);
                assert_eq!(after_name, "combined");
            }
            other => panic!("expected merge, got {other:?}"),
        }
    }

    #[test]
    fn one_before_two_afters_is_a_split() {
        let store = store_with(vec![vec![("bulk", "head")], vec![("bulk", "tail")]]);
        let derived = derive_variable_refactorings(&store);
        assert_eq!(derived.len(), 1);
        assert!(matches!(derived[0], Refactoring::SplitVariable { .. }));
    }

    #[test]
    fn no_variable_evidence_derives_nothing() {
        let store = store_with(vec![vec![]]);
        assert!(derive_variable_refactorings(&store).is_empty());
    }
}
