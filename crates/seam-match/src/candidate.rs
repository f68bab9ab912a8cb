//! Candidate ordering: the tie-break rules that resolve ambiguity when
//! one fragment has several viable counterparts.
//!
//! Both comparators are total orders ending in first-encountered order,
//! so selection is deterministic and independent of container iteration
//! order.

use std::cmp::Ordering;

use seam_core::FragmentId;

use crate::replacement::Replacement;

/// A scored leaf pairing awaiting selection.
#[derive(Debug, Clone)]
pub struct LeafCandidate {
    pub before: FragmentId,
    pub after: FragmentId,
    pub replacements: Vec<Replacement>,
    pub exact: bool,
    /// Normalized edit distance between the two texts.
    pub distance: f64,
    /// Identical once an extracted variable is substituted back.
    pub extract_identical: bool,
    /// Identical once an inlined variable is substituted back.
    pub inline_identical: bool,
    /// Number of leading identical ancestors on the two parent chains.
    pub ancestor_prefix: usize,
    /// Summed normalized distance along the two parent chains.
    pub ancestor_divergence: f64,
    pub depth_diff: u32,
    pub index_diff: u32,
    /// Combined start lines; proximity to accepted neighbors.
    pub line_sum: u32,
    /// First-encountered order within the candidate sweep.
    pub encounter: u32,
}

impl LeafCandidate {
    fn absorbed(&self) -> usize {
        self.replacements.iter().map(Replacement::absorbed_total).sum()
    }

    /// Total-order comparison; `Less` means "preferred".
    pub fn compare(&self, other: &Self) -> Ordering {
        // Aggregates explaining more statements win outright.
        other
            .absorbed()
            .cmp(&self.absorbed())
            // Candidates identical modulo an extracted/inlined variable
            // beat plain replacement candidates.
            .then_with(|| other.extract_identical.cmp(&self.extract_identical))
            .then_with(|| other.inline_identical.cmp(&self.inline_identical))
            // Fewest, then cheapest, replacements.
            .then_with(|| self.replacements.len().cmp(&other.replacements.len()))
            .then_with(|| self.distance.total_cmp(&other.distance))
            // Shallower divergence from accepted surroundings.
            .then_with(|| other.ancestor_prefix.cmp(&self.ancestor_prefix))
            .then_with(|| self.ancestor_divergence.total_cmp(&other.ancestor_divergence))
            .then_with(|| self.depth_diff.cmp(&other.depth_diff))
            .then_with(|| self.index_diff.cmp(&other.index_diff))
            // Line proximity, then first-encountered order.
            .then_with(|| self.line_sum.cmp(&other.line_sum))
            .then_with(|| self.encounter.cmp(&other.encounter))
    }
}

/// A scored composite pairing awaiting selection.
#[derive(Debug, Clone)]
pub struct CompositeCandidate {
    pub before: FragmentId,
    pub after: FragmentId,
    pub replacements: Vec<Replacement>,
    pub exact: bool,
    pub score: f64,
    /// The pair's enclosing try statements are already mapped to each
    /// other.
    pub enclosing_try_matched: bool,
    /// Both composites embed the same non-empty comments.
    pub identical_comments: bool,
    pub line_sum: u32,
    pub encounter: u32,
}

impl CompositeCandidate {
    /// Total-order comparison; `Less` means "preferred".
    pub fn compare(&self, other: &Self) -> Ordering {
        other
            .enclosing_try_matched
            .cmp(&self.enclosing_try_matched)
            .then_with(|| other.identical_comments.cmp(&self.identical_comments))
            .then_with(|| other.score.total_cmp(&self.score))
            .then_with(|| self.line_sum.cmp(&other.line_sum))
            .then_with(|| self.encounter.cmp(&other.encounter))
    }
}

/// Pick the preferred candidate, if any.
pub fn best_leaf(candidates: Vec<LeafCandidate>) -> Option<LeafCandidate> {
    candidates.into_iter().min_by(|a, b| a.compare(b))
}

/// Pick the preferred composite candidate, if any.
pub fn best_composite(candidates: Vec<CompositeCandidate>) -> Option<CompositeCandidate> {
    candidates.into_iter().min_by(|a, b| a.compare(b))
}
