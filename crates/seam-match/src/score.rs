//! Composite child-matching score and the soft-accept override set.
//!
//! The score estimates how much of a composite pair's subtree already
//! corresponds: mapped direct children over the larger child count, with
//! a descendant-leaf fallback when no direct child is mapped, credit for
//! content that moved into/out of a newly added/removed method, and
//! additive try/catch/finally composition.

use seam_core::{BodyArena, CompositeKind, FragmentId, FragmentKind};

use crate::context::DiffContext;
use crate::mapping::MappingStore;
use crate::replacement::{Replacement, ReplacementKind};
use crate::text::{contains_token, erase_generics};

/// Child-matching score, or the sentinel for kind families that cannot be
/// compared numerically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompositeScore {
    Incomparable,
    Of(f64),
}

impl CompositeScore {
    /// Numeric value; the sentinel never accepts.
    pub fn value(self) -> Option<f64> {
        match self {
            CompositeScore::Incomparable => None,
            CompositeScore::Of(v) => Some(v),
        }
    }

    /// Acceptance condition for a composite mapping: a positive score, or
    /// zero statement children on both sides.
    pub fn accepts(self, children_before: usize, children_after: usize) -> bool {
        match self {
            CompositeScore::Incomparable => false,
            CompositeScore::Of(v) => v > 0.0 || children_before.max(children_after) == 0,
        }
    }
}

/// Read-only inputs the score consults.
pub struct ScoreInputs<'a> {
    pub before: &'a BodyArena,
    pub after: &'a BodyArena,
    pub store: &'a MappingStore,
    pub ctx: &'a dyn DiffContext,
    /// Nested sessions flatten a lone explicit block around a single
    /// child before counting.
    pub nested: bool,
}

/// Score a composite pair.
pub fn composite_score(inputs: &ScoreInputs<'_>, c1: FragmentId, c2: FragmentId) -> CompositeScore {
    let k1 = match inputs.before.get(c1).kind.as_composite() {
        Some(k) => k,
        None => return CompositeScore::Incomparable,
    };
    let k2 = match inputs.after.get(c2).kind.as_composite() {
        Some(k) => k,
        None => return CompositeScore::Incomparable,
    };
    if k1.is_try_family() != k2.is_try_family() {
        return CompositeScore::Incomparable;
    }
    if k1 == CompositeKind::Try && k2 == CompositeKind::Try {
        return CompositeScore::Of(try_score(inputs, c1, c2));
    }
    CompositeScore::Of(child_score(inputs, c1, c2))
}

fn child_score(inputs: &ScoreInputs<'_>, c1: FragmentId, c2: FragmentId) -> f64 {
    let mut children1 = statement_children(inputs.before, c1);
    let mut children2 = statement_children(inputs.after, c2);

    // A lone explicit block on one side only is transparent in nested
    // sessions (extracted bodies often gain or lose braces).
    if inputs.nested
        && inputs.before.get(c1).kind == inputs.after.get(c2).kind
        && children1.len() == 1
        && children2.len() == 1
    {
        let lone1 = inputs.before.get(children1[0]);
        let lone2 = inputs.after.get(children2[0]);
        if lone1.is_block() && !lone2.is_block() {
            children1.extend(lone1.children.iter().copied());
        }
        if !lone1.is_block() && lone2.is_block() {
            children2.extend(lone2.children.iter().copied());
        }
    }

    let mapped_children = children1
        .iter()
        .filter(|&&b| {
            inputs
                .store
                .by_before(b)
                .is_some_and(|m| children2.contains(&m.after))
        })
        .count();
    if mapped_children > 0 {
        let max = children1.len().max(children2.len());
        return mapped_children as f64 / max as f64;
    }

    let leaves1 = inputs.before.leaves_under(c1);
    let leaves2 = inputs.after.leaves_under(c2);
    let mut mapped_leaves = leaves1
        .iter()
        .filter(|&&b| {
            inputs
                .store
                .by_before(b)
                .is_some_and(|m| leaves2.contains(&m.after))
        })
        .count();
    if mapped_leaves == 0 {
        mapped_leaves += extract_inline_credit(inputs, c1, c2, &leaves1, &leaves2);
        if leaves1.len() == 1
            && leaves2.len() == 1
            && inputs.before.get(leaves1[0]).text.trim() == "continue;"
            && inputs.after.get(leaves2[0]).text.trim() == "return null;"
        {
            mapped_leaves += 1;
        }
    }
    let max = leaves1.len().max(leaves2.len());
    if max == 0 {
        0.0
    } else {
        mapped_leaves as f64 / max as f64
    }
}

/// Credit for leaves whose content moved into an added method (after
/// side) or out of a removed one (before side): the call must resolve, or
/// the candidate's statement sequence must occur literally in that
/// method's body.
fn extract_inline_credit(
    inputs: &ScoreInputs<'_>,
    c1: FragmentId,
    c2: FragmentId,
    leaves1: &[FragmentId],
    leaves2: &[FragmentId],
) -> usize {
    let mut credit = 0usize;
    if leaves2.len() <= 2 {
        for &leaf in leaves2 {
            let constructs = &inputs.after.get(leaf).constructs;
            if let Some(inv) = constructs.covering_invocation() {
                if inputs.ctx.resolve_call(inv, inputs.ctx.added_operations()).is_some() {
                    credit += 1;
                }
            }
        }
        if credit == 0 {
            let sequence = inputs.before.string_sequence(c1);
            if inputs
                .ctx
                .added_operations()
                .iter()
                .any(|op| op.contains_sequence(&sequence))
            {
                credit += 1;
            }
        }
    } else if leaves1.len() <= 2 {
        for &leaf in leaves1 {
            let constructs = &inputs.before.get(leaf).constructs;
            if let Some(inv) = constructs.covering_invocation() {
                if inputs.ctx.resolve_call(inv, inputs.ctx.removed_operations()).is_some() {
                    credit += 1;
                }
            }
        }
        if credit == 0 {
            let sequence = inputs.after.string_sequence(c2);
            if inputs
                .ctx
                .removed_operations()
                .iter()
                .any(|op| op.contains_sequence(&sequence))
            {
                credit += 1;
            }
        }
    }
    credit
}

/// Try statements score compositionally: the try block's own score plus 1
/// for each catch-clause pair and the finally pair that independently
/// score a perfect match. Structurally identical exception handling keeps
/// rewarding the pair even when the try body changed.
fn try_score(inputs: &ScoreInputs<'_>, t1: FragmentId, t2: FragmentId) -> f64 {
    let mut score = child_score(inputs, t1, t2);
    let catches1 = clause_children(inputs.before, t1, CompositeKind::CatchClause);
    let catches2 = clause_children(inputs.after, t2, CompositeKind::CatchClause);
    if catches1.len() == catches2.len() {
        for (&cc1, &cc2) in catches1.iter().zip(catches2.iter()) {
            if child_score(inputs, cc1, cc2) == 1.0 {
                score += 1.0;
            }
        }
    }
    let finally1 = clause_children(inputs.before, t1, CompositeKind::Finally);
    let finally2 = clause_children(inputs.after, t2, CompositeKind::Finally);
    if let (Some(&f1), Some(&f2)) = (finally1.first(), finally2.first()) {
        if child_score(inputs, f1, f2) == 1.0 {
            score += 1.0;
        }
    }
    score
}

/// Direct statement children, catch/finally clauses excluded.
pub fn statement_children(arena: &BodyArena, id: FragmentId) -> Vec<FragmentId> {
    arena
        .get(id)
        .children
        .iter()
        .copied()
        .filter(|&c| {
            !matches!(
                arena.get(c).kind,
                FragmentKind::Composite(CompositeKind::CatchClause)
                    | FragmentKind::Composite(CompositeKind::Finally)
            )
        })
        .collect()
}

fn clause_children(arena: &BodyArena, id: FragmentId, kind: CompositeKind) -> Vec<FragmentId> {
    arena
        .get(id)
        .children
        .iter()
        .copied()
        .filter(|&c| arena.get(c).kind == FragmentKind::Composite(kind))
        .collect()
}

/// The closed override set: grants a zero-scoring composite pair the
/// residual soft-accept score when independent evidence supports it.
pub fn soft_accept_override(
    inputs: &ScoreInputs<'_>,
    c1: FragmentId,
    c2: FragmentId,
    replacements: &[Replacement],
) -> bool {
    let f1 = inputs.before.get(c1);
    let f2 = inputs.after.get(c2);

    // Lone operator flip or boolean inversion with no mismatched children.
    if replacements.len() == 1
        && matches!(
            replacements[0].kind,
            ReplacementKind::InfixOperator | ReplacementKind::InvertConditional
        )
        && statement_children(inputs.before, c1).len() == statement_children(inputs.after, c2).len()
    {
        return true;
    }

    // Identical embedded comments.
    if !f1.constructs.comments.is_empty() && f1.constructs.comments == f2.constructs.comments {
        return true;
    }

    // Compatible generic-type narrowing.
    if f1.text != f2.text && erase_generics(&f1.text) == erase_generics(&f2.text) {
        return true;
    }

    // Equal-sized, type-compatible catch sets on an already-matched try.
    if catch_sets_on_matched_try(inputs, c1, c2) {
        return true;
    }

    // Classic for vs enhanced for over the same iterable.
    if classic_vs_enhanced_for(inputs, c1, c2) {
        return true;
    }

    false
}

fn catch_sets_on_matched_try(inputs: &ScoreInputs<'_>, c1: FragmentId, c2: FragmentId) -> bool {
    let f1 = inputs.before.get(c1);
    let f2 = inputs.after.get(c2);
    if f1.kind != FragmentKind::Composite(CompositeKind::CatchClause)
        || f2.kind != FragmentKind::Composite(CompositeKind::CatchClause)
    {
        return false;
    }
    let (t1, t2) = match (f1.parent, f2.parent) {
        (Some(t1), Some(t2)) => (t1, t2),
        _ => return false,
    };
    if !inputs.store.contains_pair(t1, t2) {
        return false;
    }
    let catches1 = clause_children(inputs.before, t1, CompositeKind::CatchClause);
    let catches2 = clause_children(inputs.after, t2, CompositeKind::CatchClause);
    if catches1.len() != catches2.len() {
        return false;
    }
    let ty1 = caught_type(&f1.text);
    let ty2 = caught_type(&f2.text);
    match (ty1, ty2) {
        (Some(a), Some(b)) => a == b || a.ends_with(&b) || b.ends_with(&a),
        _ => false,
    }
}

/// Exception type of a `catch(Type name)` header.
fn caught_type(text: &str) -> Option<String> {
    let open = text.find('(')?;
    let close = text[open..].find(')')? + open;
    let inside = text[open + 1..close].trim();
    Some(inside.split_whitespace().next()?.to_string())
}

fn classic_vs_enhanced_for(inputs: &ScoreInputs<'_>, c1: FragmentId, c2: FragmentId) -> bool {
    let k1 = inputs.before.get(c1).kind.as_composite();
    let k2 = inputs.after.get(c2).kind.as_composite();
    // Ids are arena-scoped, so the classic side must be tracked explicitly.
    let (classic_text, enhanced_text) = match (k1, k2) {
        (Some(CompositeKind::For), Some(CompositeKind::EnhancedFor)) => {
            (&inputs.before.get(c1).text, &inputs.after.get(c2).text)
        }
        (Some(CompositeKind::EnhancedFor), Some(CompositeKind::For)) => {
            (&inputs.after.get(c2).text, &inputs.before.get(c1).text)
        }
        _ => return false,
    };
    match iterable_of_enhanced_for(enhanced_text) {
        Some(iterable) => contains_token(classic_text, &iterable),
        None => false,
    }
}

/// The iterable expression of `for(T x : iterable)`.
fn iterable_of_enhanced_for(text: &str) -> Option<String> {
    let colon = text.find(':')?;
    let rest = text[colon + 1..].trim();
    let iterable = rest.trim_end_matches(')').trim();
    // Strip a trailing call so `items.values()` still yields a token.
    let token = iterable.split(['.', '(']).next().unwrap_or(iterable).trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
