//! Mapper orchestration: the matching session.
//!
//! One session per body pair. Construction runs the whole matching pass —
//! normalization, leaf matching, composite matching, expression-vs-leaf
//! matching, structural-move revision, consistency repair — and the
//! completed session is immutable afterwards. Nested sessions handle
//! extracted/inlined method bodies and lambda bodies, scoped to a call
//! site in the parent.

use std::cell::OnceCell;
use std::collections::HashMap;

use tracing::{debug, trace};

use seam_core::{BodyArena, CompositeKind, Container, FragmentId, FragmentKind};

use crate::analysis::derive_variable_refactorings;
use crate::cancel::CancellationToken;
use crate::candidate::{best_composite, best_leaf, CompositeCandidate, LeafCandidate};
use crate::config::MatchConfig;
use crate::context::DiffContext;
use crate::detect::{
    chain_branches, if_chain, loop_variables, pipeline_shape, pipeline_stages_justified,
    switch_if_labels,
};
use crate::error::MatchResult;
use crate::finder::{find_replacements, FinderInput, FoundReplacements};
use crate::mapping::{Mapping, MappingId, MappingKind, MappingStore, SubExpressionMapping};
use crate::refactoring::Refactoring;
use crate::replacement::{AbsorbedStatements, Replacement, ReplacementKind};
use crate::score::{composite_score, soft_accept_override, statement_children, ScoreInputs};
use crate::text::{contains_token, normalized_distance, replace_token};

/// Which container a fragment id resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Before,
    After,
}

/// Call-site bracketing for nested sessions: candidates on the side
/// shared with the parent must fall between the nearest accepted parent
/// mappings around the call site.
#[derive(Debug, Clone)]
struct Bracket {
    on_before: bool,
    lo: Option<u32>,
    hi: Option<u32>,
}

/// Matching tiers, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    ExactAtDepth,
    ExactAnywhere,
    WithReplacements,
}

/// A matching session over one container pair.
pub struct MatchSession<'a> {
    before: &'a Container,
    after: &'a Container,
    ctx: &'a dyn DiffContext,
    config: MatchConfig,
    cancel: CancellationToken,
    store: MappingStore,
    leftover_leaves_before: Vec<FragmentId>,
    leftover_leaves_after: Vec<FragmentId>,
    leftover_composites_before: Vec<FragmentId>,
    leftover_composites_after: Vec<FragmentId>,
    refactorings: Vec<Refactoring>,
    subst_before: HashMap<FragmentId, String>,
    subst_after: HashMap<FragmentId, String>,
    /// Fragments flattened out of a lambda body, keyed to the body root
    /// that owns them.
    lambda_scope_before: HashMap<FragmentId, FragmentId>,
    lambda_scope_after: HashMap<FragmentId, FragmentId>,
    nested: bool,
    bracket: Option<Bracket>,
    next_cluster: u32,
    all_refactorings: OnceCell<Vec<Refactoring>>,
}

impl<'a> MatchSession<'a> {
    /// Full two-body comparison.
    pub fn between(
        before: &'a Container,
        after: &'a Container,
        ctx: &'a dyn DiffContext,
        config: MatchConfig,
        cancel: CancellationToken,
    ) -> MatchResult<Self> {
        let mut session = Self::empty(before, after, ctx, config, cancel, false, None);
        session.apply_this_parameter_heuristic();
        session.populate_pools();
        session.run_phases()?;
        Ok(session)
    }

    /// Single-fragment comparison (initializers, default values): the same
    /// pipeline over containers that wrap one fragment each.
    pub fn single_fragment(
        before: &'a Container,
        after: &'a Container,
        ctx: &'a dyn DiffContext,
        config: MatchConfig,
        cancel: CancellationToken,
    ) -> MatchResult<Self> {
        Self::between(before, after, ctx, config, cancel)
    }

    /// Nested session for an extract scenario: `callee` is the added
    /// method whose body is compared against the caller's residual
    /// "before" fragments near `call_site` (a leaf in the parent's
    /// "after" body).
    pub fn extracted(
        parent: &MatchSession<'a>,
        callee: &'a Container,
        param_to_arg: &[(String, String)],
        call_site: FragmentId,
    ) -> MatchResult<MatchSession<'a>> {
        let mut session = Self::empty(
            parent.before,
            callee,
            parent.ctx,
            parent.config.clone(),
            parent.cancel.clone(),
            true,
            Some(parent.bracket_around(call_site, Side::After)),
        );
        session.leftover_leaves_before = parent.residual_leaves(Side::Before);
        session.leftover_composites_before = parent.residual_composites(Side::Before);
        session.leftover_leaves_after = callee.leaves();
        session.leftover_composites_after = callee.inner_nodes();
        session.apply_argument_substitution(Side::After, param_to_arg, parent);
        session.run_phases()?;
        Ok(session)
    }

    /// Nested session for an inline scenario: `callee` is the removed
    /// method whose body is compared against the caller's residual
    /// "after" fragments near `call_site` (a leaf in the parent's
    /// "before" body).
    pub fn inlined(
        parent: &MatchSession<'a>,
        callee: &'a Container,
        param_to_arg: &[(String, String)],
        call_site: FragmentId,
    ) -> MatchResult<MatchSession<'a>> {
        let mut session = Self::empty(
            callee,
            parent.after,
            parent.ctx,
            parent.config.clone(),
            parent.cancel.clone(),
            true,
            Some(parent.bracket_around(call_site, Side::Before)),
        );
        session.leftover_leaves_before = callee.leaves();
        session.leftover_composites_before = callee.inner_nodes();
        session.leftover_leaves_after = parent.residual_leaves(Side::After);
        session.leftover_composites_after = parent.residual_composites(Side::After);
        session.apply_argument_substitution(Side::Before, param_to_arg, parent);
        session.run_phases()?;
        Ok(session)
    }

    /// Nested session over two lambda bodies carried by an accepted
    /// mapping of the parent.
    pub fn lambda_pair(
        parent: &MatchSession<'a>,
        before_body: FragmentId,
        after_body: FragmentId,
    ) -> MatchResult<MatchSession<'a>> {
        let mut session = Self::empty(
            parent.before,
            parent.after,
            parent.ctx,
            parent.config.clone(),
            parent.cancel.clone(),
            true,
            None,
        );
        session.leftover_leaves_before = parent.before.body.leaves_under(before_body);
        session.leftover_leaves_after = parent.after.body.leaves_under(after_body);
        session.leftover_composites_before = parent.before.body.composites_under(before_body);
        session.leftover_composites_after = parent.after.body.composites_under(after_body);
        session.run_phases()?;
        Ok(session)
    }

    fn empty(
        before: &'a Container,
        after: &'a Container,
        ctx: &'a dyn DiffContext,
        config: MatchConfig,
        cancel: CancellationToken,
        nested: bool,
        bracket: Option<Bracket>,
    ) -> Self {
        MatchSession {
            before,
            after,
            ctx,
            config,
            cancel,
            store: MappingStore::new(),
            leftover_leaves_before: Vec::new(),
            leftover_leaves_after: Vec::new(),
            leftover_composites_before: Vec::new(),
            leftover_composites_after: Vec::new(),
            refactorings: Vec::new(),
            subst_before: HashMap::new(),
            subst_after: HashMap::new(),
            lambda_scope_before: HashMap::new(),
            lambda_scope_after: HashMap::new(),
            nested,
            bracket,
            next_cluster: 0,
            all_refactorings: OnceCell::new(),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Retained mappings in insertion order.
    pub fn mappings(&self) -> impl Iterator<Item = &Mapping> {
        self.store.iter()
    }

    pub fn store(&self) -> &MappingStore {
        &self.store
    }

    /// Leftover "before" leaves, in insertion order.
    pub fn leftover_leaves_before(&self) -> &[FragmentId] {
        &self.leftover_leaves_before
    }

    pub fn leftover_leaves_after(&self) -> &[FragmentId] {
        &self.leftover_leaves_after
    }

    pub fn leftover_composites_before(&self) -> &[FragmentId] {
        &self.leftover_composites_before
    }

    pub fn leftover_composites_after(&self) -> &[FragmentId] {
        &self.leftover_composites_after
    }

    pub fn before_container(&self) -> &Container {
        self.before
    }

    pub fn after_container(&self) -> &Container {
        self.after
    }

    /// Refactorings recorded opportunistically during the pass.
    pub fn inline_refactorings(&self) -> &[Refactoring] {
        &self.refactorings
    }

    /// The lambda body root that owns a flattened "before" fragment, if
    /// the fragment entered the pools through lambda flattening.
    pub fn lambda_scope_before(&self, id: FragmentId) -> Option<FragmentId> {
        self.lambda_scope_before.get(&id).copied()
    }

    /// Symmetric to [`MatchSession::lambda_scope_before`] for the "after"
    /// side.
    pub fn lambda_scope_after(&self, id: FragmentId) -> Option<FragmentId> {
        self.lambda_scope_after.get(&id).copied()
    }

    /// All refactorings: the opportunistic records plus the lazily
    /// derived variable rename/merge/split analysis. Computed once and
    /// cached.
    pub fn refactorings(&self) -> &[Refactoring] {
        self.all_refactorings.get_or_init(|| {
            let mut all = self.refactorings.clone();
            all.extend(derive_variable_refactorings(&self.store));
            all
        })
    }

    // ------------------------------------------------------------------
    // Construction helpers
    // ------------------------------------------------------------------

    fn arena(&self, side: Side) -> &BodyArena {
        match side {
            Side::Before => &self.before.body,
            Side::After => &self.after.body,
        }
    }

    fn subst(&self, side: Side) -> &HashMap<FragmentId, String> {
        match side {
            Side::Before => &self.subst_before,
            Side::After => &self.subst_after,
        }
    }

    fn text_of(&self, side: Side, id: FragmentId) -> &str {
        self.subst(side)
            .get(&id)
            .map(String::as_str)
            .unwrap_or(&self.arena(side).get(id).text)
    }

    fn argumentized_of(&self, side: Side, id: FragmentId) -> &str {
        self.subst(side)
            .get(&id)
            .map(String::as_str)
            .unwrap_or(&self.arena(side).get(id).argumentized)
    }

    /// One added or removed parameter whose type looks like the other
    /// side's declaring type signals an instance method converted to a
    /// `this`-passing static (or back): qualify both sides accordingly.
    fn apply_this_parameter_heuristic(&mut self) {
        let added: Vec<_> = self
            .after
            .parameters
            .iter()
            .filter(|p| !self.before.has_parameter(&p.name))
            .collect();
        let removed: Vec<_> = self
            .before
            .parameters
            .iter()
            .filter(|p| !self.after.has_parameter(&p.name))
            .collect();
        let mut rules_before: Vec<(String, String)> = Vec::new();
        let mut rules_after: Vec<(String, String)> = Vec::new();
        if added.len() == 1 && self.ctx.same_logical_type(&added[0].type_name, &self.before.type_name) {
            rules_before.push(("this.".to_string(), String::new()));
            rules_after.push((format!("{}.", added[0].name), String::new()));
        }
        if removed.len() == 1 && self.ctx.same_logical_type(&removed[0].type_name, &self.after.type_name) {
            rules_before.push((format!("{}.", removed[0].name), String::new()));
            rules_after.push(("this.".to_string(), String::new()));
        }
        self.apply_prefix_rules(Side::Before, &rules_before);
        self.apply_prefix_rules(Side::After, &rules_after);
    }

    fn apply_prefix_rules(&mut self, side: Side, rules: &[(String, String)]) {
        if rules.is_empty() {
            return;
        }
        let mut changed = Vec::new();
        for fragment in self.arena(side).iter() {
            let mut text = fragment.text.clone();
            for (from, to) in rules {
                text = text.replace(from.as_str(), to);
            }
            if text != fragment.text {
                changed.push((fragment.id, text));
            }
        }
        let map = match side {
            Side::Before => &mut self.subst_before,
            Side::After => &mut self.subst_after,
        };
        for (id, text) in changed {
            map.insert(id, text);
        }
    }

    /// Nested sessions replace the callee's formal parameters with the
    /// call site's argument texts; when an argument is held by a caller
    /// temporary, the substitution retargets to the temporary's name.
    fn apply_argument_substitution(
        &mut self,
        callee_side: Side,
        param_to_arg: &[(String, String)],
        parent: &MatchSession<'a>,
    ) {
        if param_to_arg.is_empty() {
            return;
        }
        let caller = match callee_side {
            Side::After => parent.before,
            Side::Before => parent.after,
        };
        let effective: Vec<(String, String)> = param_to_arg
            .iter()
            .map(|(param, arg)| {
                let retargeted = caller
                    .variable_declarations()
                    .into_iter()
                    .find(|(_, d)| d.initializer.as_deref() == Some(arg.as_str()))
                    .map(|(_, d)| d.name.clone());
                (param.clone(), retargeted.unwrap_or_else(|| arg.clone()))
            })
            .collect();
        let mut changed = Vec::new();
        for fragment in self.arena(callee_side).iter() {
            let mut text = fragment.text.clone();
            for (param, arg) in &effective {
                text = replace_token(&text, param, arg);
            }
            if text != fragment.text {
                changed.push((fragment.id, text));
            }
        }
        let map = match callee_side {
            Side::Before => &mut self.subst_before,
            Side::After => &mut self.subst_after,
        };
        for (id, text) in changed {
            map.insert(id, text);
        }
    }

    /// Fill the pools, flattening lambda bodies when the two sides stay
    /// size-comparable afterwards.
    fn populate_pools(&mut self) {
        self.leftover_leaves_before = self.before.leaves();
        self.leftover_leaves_after = self.after.leaves();
        self.leftover_composites_before = self.before.inner_nodes();
        self.leftover_composites_after = self.after.inner_nodes();

        let lambda_nodes = |container: &Container| -> usize {
            container
                .body
                .iter()
                .flat_map(|f| f.constructs.lambdas.iter())
                .map(|l| container.body.leaves_under(l.body).len() + container.body.composites_under(l.body).len())
                .sum()
        };
        let lam1 = lambda_nodes(self.before);
        let lam2 = lambda_nodes(self.after);
        if lam1 == 0 && lam2 == 0 {
            return;
        }
        let t1 = (self.before.statement_count() + lam1) as f64;
        let t2 = (self.after.statement_count() + lam2) as f64;
        let (lo, hi) = if t1 < t2 { (t1, t2) } else { (t2, t1) };
        if lo == 0.0 || hi > lo * self.config.collapse_node_ratio {
            debug!(t1, t2, "lambda flattening skipped: sides would not stay comparable");
            return;
        }
        for (side_leaves, side_composites, scope, container) in [
            (
                &mut self.leftover_leaves_before,
                &mut self.leftover_composites_before,
                &mut self.lambda_scope_before,
                self.before,
            ),
            (
                &mut self.leftover_leaves_after,
                &mut self.leftover_composites_after,
                &mut self.lambda_scope_after,
                self.after,
            ),
        ] {
            let lambdas: Vec<FragmentId> = container
                .body
                .iter()
                .flat_map(|f| f.constructs.lambdas.iter().map(|l| l.body))
                .collect();
            for body in lambdas {
                for leaf in container.body.leaves_under(body) {
                    if !side_leaves.contains(&leaf) {
                        side_leaves.push(leaf);
                        scope.insert(leaf, body);
                    }
                }
                for composite in container.body.composites_under(body) {
                    if !side_composites.contains(&composite) {
                        side_composites.push(composite);
                        scope.insert(composite, body);
                    }
                }
            }
        }
    }

    fn run_phases(&mut self) -> MatchResult<()> {
        self.cancel.check()?;
        let oversized = self.before.statement_count() > self.config.statement_count_ceiling
            && self.after.statement_count() > self.config.statement_count_ceiling
            && self.before.body_hash() != self.after.body_hash();
        if oversized {
            debug!(
                before = self.before.statement_count(),
                after = self.after.statement_count(),
                "both bodies exceed the statement ceiling with different hashes; leaf matching skipped"
            );
            return Ok(());
        }
        self.match_leaves()?;
        self.match_composites()?;
        self.match_expressions_to_leaves()?;
        let revised = self.structural_revision()?;
        if revised {
            // Widened pools: one re-run over the affected leftovers,
            // bounded by the number of detected patterns.
            self.match_leaves()?;
            self.match_composites()?;
            self.match_expressions_to_leaves()?;
        }
        self.consistency_repair()?;
        self.sweep_extract_inline()?;
        self.attach_subexpressions();
        debug!(
            mappings = self.store.len(),
            leftovers_before = self.leftover_leaves_before.len() + self.leftover_composites_before.len(),
            leftovers_after = self.leftover_leaves_after.len() + self.leftover_composites_after.len(),
            "matching pass complete"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Leaf matching
    // ------------------------------------------------------------------

    fn match_leaves(&mut self) -> MatchResult<()> {
        for tier in [Tier::ExactAtDepth, Tier::ExactAnywhere, Tier::WithReplacements] {
            self.match_leaf_tier(tier)?;
        }
        Ok(())
    }

    fn match_leaf_tier(&mut self, tier: Tier) -> MatchResult<()> {
        self.cancel.check()?;
        let from_before = self.leftover_leaves_before.len() <= self.leftover_leaves_after.len();
        let outer = if from_before {
            self.leftover_leaves_before.clone()
        } else {
            self.leftover_leaves_after.clone()
        };
        for o in outer {
            self.cancel.check()?;
            let pool_gone = if from_before {
                !self.leftover_leaves_before.contains(&o)
            } else {
                !self.leftover_leaves_after.contains(&o)
            };
            if pool_gone {
                continue;
            }
            let inner = if from_before {
                self.leftover_leaves_after.clone()
            } else {
                self.leftover_leaves_before.clone()
            };
            let mut candidates = Vec::new();
            for (encounter, &i) in inner.iter().enumerate() {
                let (b, a) = if from_before { (o, i) } else { (i, o) };
                if !self.bracket_allows(b, a) {
                    continue;
                }
                if let Some(candidate) = self.leaf_candidate(tier, b, a, encounter as u32) {
                    candidates.push(candidate);
                }
            }
            if let Some(best) = best_leaf(candidates) {
                self.accept_leaf(best)?;
            }
        }
        Ok(())
    }

    fn leaf_candidate(
        &self,
        tier: Tier,
        b: FragmentId,
        a: FragmentId,
        encounter: u32,
    ) -> Option<LeafCandidate> {
        let tb = self.text_of(Side::Before, b);
        let ta = self.text_of(Side::After, a);
        let ab = self.argumentized_of(Side::Before, b);
        let aa = self.argumentized_of(Side::After, a);
        let fb = self.arena(Side::Before).get(b);
        let fa = self.arena(Side::After).get(a);
        let found = match tier {
            Tier::ExactAtDepth => {
                if (tb == ta || ab == aa) && fb.depth == fa.depth {
                    FoundReplacements {
                        replacements: Vec::new(),
                        exact: true,
                        distance: 0.0,
                    }
                } else {
                    return None;
                }
            }
            Tier::ExactAnywhere => {
                if tb == ta || ab == aa {
                    FoundReplacements {
                        replacements: Vec::new(),
                        exact: true,
                        distance: 0.0,
                    }
                } else {
                    return None;
                }
            }
            Tier::WithReplacements => {
                find_replacements(FinderInput::new(tb, ab), FinderInput::new(ta, aa), &self.config)?
            }
        };
        let (prefix, divergence) = self.ancestor_metrics(b, a);
        let (extract_identical, inline_identical) =
            self.variable_substitution_identity(tb, ta, &found.replacements);
        Some(LeafCandidate {
            before: b,
            after: a,
            replacements: found.replacements,
            exact: found.exact,
            distance: found.distance,
            extract_identical,
            inline_identical,
            ancestor_prefix: prefix,
            ancestor_divergence: divergence,
            depth_diff: fb.depth.abs_diff(fa.depth),
            index_diff: fb.index.abs_diff(fa.index),
            line_sum: fb.location.start_line + fa.location.start_line,
            encounter,
        })
    }

    /// Whether substituting a declared temporary back makes the pair
    /// identical: evidence for extract-variable (declaration on the
    /// "after" side) or inline-variable (declaration on the "before"
    /// side).
    fn variable_substitution_identity(
        &self,
        tb: &str,
        ta: &str,
        replacements: &[Replacement],
    ) -> (bool, bool) {
        let mut extract = false;
        let mut inline = false;
        for r in replacements {
            if !matches!(r.kind, ReplacementKind::VariableName | ReplacementKind::Argument) {
                continue;
            }
            for &leaf in &self.leftover_leaves_after {
                for decl in &self.arena(Side::After).get(leaf).constructs.declarations {
                    if decl.name == r.after
                        && decl.initializer.as_deref() == Some(r.before.as_str())
                        && replace_token(ta, &decl.name, r.before.as_str()) == tb
                    {
                        extract = true;
                    }
                }
            }
            for &leaf in &self.leftover_leaves_before {
                for decl in &self.arena(Side::Before).get(leaf).constructs.declarations {
                    if decl.name == r.before
                        && decl.initializer.as_deref() == Some(r.after.as_str())
                        && replace_token(tb, &decl.name, r.after.as_str()) == ta
                    {
                        inline = true;
                    }
                }
            }
        }
        (extract, inline)
    }

    fn accept_leaf(&mut self, candidate: LeafCandidate) -> MatchResult<()> {
        trace!(before = %candidate.before, after = %candidate.after, exact = candidate.exact, "leaf mapping accepted");
        let id = self.store.insert(
            candidate.before,
            candidate.after,
            MappingKind::Leaf,
            candidate.replacements.clone(),
            candidate.exact,
        )?;
        self.leftover_leaves_before.retain(|&x| x != candidate.before);
        self.leftover_leaves_after.retain(|&x| x != candidate.after);
        self.record_assert_rewrite(&candidate, id);
        Ok(())
    }

    fn record_assert_rewrite(&mut self, candidate: &LeafCandidate, id: MappingId) {
        if candidate.exact {
            return;
        }
        let name_changed = candidate
            .replacements
            .iter()
            .any(|r| r.kind == ReplacementKind::MethodInvocationName);
        if !name_changed {
            return;
        }
        let is_assert = |side: Side, frag: FragmentId| {
            self.arena(side)
                .get(frag)
                .constructs
                .covering_invocation()
                .is_some_and(|inv| inv.name.starts_with("assert"))
        };
        if is_assert(Side::Before, candidate.before) && is_assert(Side::After, candidate.after) {
            let before_call = self.text_of(Side::Before, candidate.before).to_string();
            let after_call = self.text_of(Side::After, candidate.after).to_string();
            let index = self.refactorings.len();
            self.refactorings.push(Refactoring::AssertRewrite {
                before_call,
                after_call,
                mapping: id,
            });
            if let Some(mapping) = self.store.get_mut(id) {
                mapping.refactoring = Some(index);
            }
        }
    }

    fn ancestor_metrics(&self, b: FragmentId, a: FragmentId) -> (usize, f64) {
        let mut p1 = self.arena(Side::Before).non_block_parent(b);
        let mut p2 = self.arena(Side::After).non_block_parent(a);
        let mut prefix = 0usize;
        let mut divergence = 0.0f64;
        let mut counting_prefix = true;
        loop {
            let d = match (p1, p2) {
                (None, None) => break,
                (Some(x), Some(y)) => {
                    normalized_distance(self.text_of(Side::Before, x), self.text_of(Side::After, y))
                }
                _ => 1.0,
            };
            divergence += d;
            if d == 0.0 && counting_prefix {
                prefix += 1;
            } else {
                counting_prefix = false;
            }
            p1 = p1.and_then(|x| self.arena(Side::Before).non_block_parent(x));
            p2 = p2.and_then(|y| self.arena(Side::After).non_block_parent(y));
        }
        (prefix, divergence)
    }

    fn bracket_allows(&self, b: FragmentId, a: FragmentId) -> bool {
        match &self.bracket {
            None => true,
            Some(bracket) => {
                let (side, id) = if bracket.on_before {
                    (Side::Before, b)
                } else {
                    (Side::After, a)
                };
                let line = self.arena(side).get(id).location.start_line;
                bracket.lo.is_none_or(|lo| line >= lo) && bracket.hi.is_none_or(|hi| line <= hi)
            }
        }
    }

    // ------------------------------------------------------------------
    // Composite matching
    // ------------------------------------------------------------------

    fn match_composites(&mut self) -> MatchResult<()> {
        for tier in [Tier::ExactAtDepth, Tier::ExactAnywhere, Tier::WithReplacements] {
            self.match_composite_tier(tier)?;
        }
        Ok(())
    }

    fn match_composite_tier(&mut self, tier: Tier) -> MatchResult<()> {
        self.cancel.check()?;
        let from_before =
            self.leftover_composites_before.len() <= self.leftover_composites_after.len();
        let outer = if from_before {
            self.leftover_composites_before.clone()
        } else {
            self.leftover_composites_after.clone()
        };
        for o in outer {
            self.cancel.check()?;
            let pool_gone = if from_before {
                !self.leftover_composites_before.contains(&o)
            } else {
                !self.leftover_composites_after.contains(&o)
            };
            if pool_gone {
                continue;
            }
            let inner = if from_before {
                self.leftover_composites_after.clone()
            } else {
                self.leftover_composites_before.clone()
            };
            let mut candidates = Vec::new();
            for (encounter, &i) in inner.iter().enumerate() {
                let (b, a) = if from_before { (o, i) } else { (i, o) };
                if !self.bracket_allows(b, a) {
                    continue;
                }
                if let Some(candidate) = self.composite_candidate(tier, b, a, encounter as u32) {
                    candidates.push(candidate);
                }
            }
            if let Some(best) = best_composite(candidates) {
                self.accept_composite(best)?;
            }
        }
        Ok(())
    }

    fn composite_candidate(
        &self,
        tier: Tier,
        b: FragmentId,
        a: FragmentId,
        encounter: u32,
    ) -> Option<CompositeCandidate> {
        let tb = self.text_of(Side::Before, b);
        let ta = self.text_of(Side::After, a);
        let ab = self.argumentized_of(Side::Before, b);
        let aa = self.argumentized_of(Side::After, a);
        let fb = self.arena(Side::Before).get(b);
        let fa = self.arena(Side::After).get(a);

        // Switch-against-if is structural-move territory: pairing them by
        // score here would rob the conversion detector of its pattern.
        let kinds = (fb.kind.as_composite()?, fa.kind.as_composite()?);
        if matches!(
            kinds,
            (CompositeKind::Switch, CompositeKind::If) | (CompositeKind::If, CompositeKind::Switch)
        ) {
            return None;
        }

        let found = match tier {
            Tier::ExactAtDepth => {
                if (tb == ta || ab == aa) && fb.depth == fa.depth {
                    FoundReplacements {
                        replacements: Vec::new(),
                        exact: true,
                        distance: 0.0,
                    }
                } else {
                    return None;
                }
            }
            Tier::ExactAnywhere => {
                if tb == ta || ab == aa {
                    FoundReplacements {
                        replacements: Vec::new(),
                        exact: true,
                        distance: 0.0,
                    }
                } else {
                    return None;
                }
            }
            Tier::WithReplacements => {
                find_replacements(FinderInput::new(tb, ab), FinderInput::new(ta, aa), &self.config)?
            }
        };

        let inputs = self.score_inputs();
        let score = composite_score(&inputs, b, a);
        let children_b = statement_children(&self.before.body, b).len();
        let children_a = statement_children(&self.after.body, a).len();
        let mut value = score.value()?;
        if value == 0.0
            && tier == Tier::WithReplacements
            && soft_accept_override(&inputs, b, a, &found.replacements)
        {
            value = self.config.soft_accept_score;
        }
        if !(value > 0.0 || children_b.max(children_a) == 0) {
            return None;
        }

        let enclosing_try_matched = self.enclosing_try_matched(b, a);
        let identical_comments = !fb.constructs.comments.is_empty()
            && fb.constructs.comments == fa.constructs.comments;
        Some(CompositeCandidate {
            before: b,
            after: a,
            replacements: found.replacements,
            exact: found.exact,
            score: value,
            enclosing_try_matched,
            identical_comments,
            line_sum: fb.location.start_line + fa.location.start_line,
            encounter,
        })
    }

    fn enclosing_try_matched(&self, b: FragmentId, a: FragmentId) -> bool {
        let try_of = |arena: &BodyArena, mut id: FragmentId| -> Option<FragmentId> {
            while let Some(parent) = arena.get(id).parent {
                if arena.get(parent).kind == FragmentKind::Composite(CompositeKind::Try) {
                    return Some(parent);
                }
                id = parent;
            }
            None
        };
        match (
            try_of(self.arena(Side::Before), b),
            try_of(self.arena(Side::After), a),
        ) {
            (Some(t1), Some(t2)) => self.store.contains_pair(t1, t2),
            _ => false,
        }
    }

    fn score_inputs(&self) -> ScoreInputs<'_> {
        ScoreInputs {
            before: &self.before.body,
            after: &self.after.body,
            store: &self.store,
            ctx: self.ctx,
            nested: self.nested,
        }
    }

    fn accept_composite(&mut self, candidate: CompositeCandidate) -> MatchResult<()> {
        trace!(before = %candidate.before, after = %candidate.after, score = candidate.score, "composite mapping accepted");
        let id = self.store.insert(
            candidate.before,
            candidate.after,
            MappingKind::Composite,
            candidate.replacements.clone(),
            candidate.exact,
        )?;
        self.leftover_composites_before.retain(|&x| x != candidate.before);
        self.leftover_composites_after.retain(|&x| x != candidate.after);
        if candidate.identical_comments && candidate.score == self.config.soft_accept_score {
            let comment = self
                .arena(Side::Before)
                .get(candidate.before)
                .constructs
                .comments
                .first()
                .map(|c| c.text.clone())
                .unwrap_or_default();
            let index = self.refactorings.len();
            self.refactorings
                .push(Refactoring::CommentGroupedMapping { comment, mapping: id });
            if let Some(mapping) = self.store.get_mut(id) {
                mapping.refactoring = Some(index);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expression-vs-leaf matching
    // ------------------------------------------------------------------

    /// Match leftover composites' sub-expressions against leftover leaves
    /// on the opposite side: a leaf declaring a temporary whose
    /// initializer is the expression text is an extract (or, mirrored, an
    /// inline) of that expression.
    fn match_expressions_to_leaves(&mut self) -> MatchResult<()> {
        self.cancel.check()?;

        // Before-composite expressions against after-leaf declarations.
        let mut extracts: Vec<(FragmentId, FragmentId, String)> = Vec::new();
        for &composite in &self.leftover_composites_before {
            for &expr in &self.arena(Side::Before).get(composite).expressions {
                let expr_text = self.text_of(Side::Before, expr);
                for &leaf in &self.leftover_leaves_after {
                    for decl in &self.arena(Side::After).get(leaf).constructs.declarations {
                        if decl.initializer.as_deref() == Some(expr_text)
                            && !self.has_expression_mapping(expr, leaf)
                            && !extracts.iter().any(|(e, l, _)| *e == expr && *l == leaf)
                        {
                            extracts.push((expr, leaf, decl.name.clone()));
                        }
                    }
                }
            }
        }
        for (expr, leaf, name) in extracts {
            let id = self
                .store
                .insert(expr, leaf, MappingKind::Expression, Vec::new(), false)?;
            let index = self.refactorings.len();
            self.refactorings.push(Refactoring::ExtractVariable {
                name,
                declaration: leaf,
                references: vec![id],
            });
            if let Some(mapping) = self.store.get_mut(id) {
                mapping.refactoring = Some(index);
            }
        }

        // Before-leaf declarations against after-composite expressions.
        let mut inlines: Vec<(FragmentId, FragmentId, String)> = Vec::new();
        for &composite in &self.leftover_composites_after {
            for &expr in &self.arena(Side::After).get(composite).expressions {
                let expr_text = self.text_of(Side::After, expr);
                for &leaf in &self.leftover_leaves_before {
                    for decl in &self.arena(Side::Before).get(leaf).constructs.declarations {
                        if decl.initializer.as_deref() == Some(expr_text)
                            && !self.has_expression_mapping(leaf, expr)
                            && !inlines.iter().any(|(l, e, _)| *l == leaf && *e == expr)
                        {
                            inlines.push((leaf, expr, decl.name.clone()));
                        }
                    }
                }
            }
        }
        for (leaf, expr, name) in inlines {
            let id = self
                .store
                .insert(leaf, expr, MappingKind::Expression, Vec::new(), false)?;
            let index = self.refactorings.len();
            self.refactorings.push(Refactoring::InlineVariable {
                name,
                declaration: leaf,
                references: vec![id],
            });
            if let Some(mapping) = self.store.get_mut(id) {
                mapping.refactoring = Some(index);
            }
        }
        Ok(())
    }

    fn has_expression_mapping(&self, before: FragmentId, after: FragmentId) -> bool {
        self.store
            .iter()
            .any(|m| m.kind == MappingKind::Expression && m.before == before && m.after == after)
    }

    // ------------------------------------------------------------------
    // Structural-move revision
    // ------------------------------------------------------------------

    fn structural_revision(&mut self) -> MatchResult<bool> {
        self.cancel.check()?;
        let mut revised = false;
        revised |= self.detect_if_chain_clusters()?;
        revised |= self.detect_switch_if()?;
        revised |= self.detect_loop_pipeline()?;
        Ok(revised)
    }

    /// If every branch of one chain maps into a branch of the other, the
    /// whole chain is accepted as one unit; condition redistribution
    /// becomes merge/split conditional records. Chains whose members were
    /// already mapped individually are promoted into the cluster rather
    /// than re-scored.
    fn detect_if_chain_clusters(&mut self) -> MatchResult<bool> {
        let heads_before = self.chain_heads(Side::Before);
        let heads_after = self.chain_heads(Side::After);
        let mut revised = false;
        for &h1 in &heads_before {
            if self.store.by_before(h1).is_some_and(|m| m.cluster.is_some()) {
                continue;
            }
            for &h2 in &heads_after {
                if self.store.by_after(h2).is_some_and(|m| m.cluster.is_some()) {
                    continue;
                }
                if self.try_chain_cluster(h1, h2)? {
                    revised = true;
                    break;
                }
            }
        }
        Ok(revised)
    }

    /// Every if of a side that does not hang in else position of another
    /// if, mapped or not.
    fn chain_heads(&self, side: Side) -> Vec<FragmentId> {
        let arena = self.arena(side);
        arena
            .inner_nodes()
            .into_iter()
            .filter(|&id| {
                let fragment = arena.get(id);
                if fragment.kind != FragmentKind::Composite(CompositeKind::If) {
                    return false;
                }
                match fragment.parent {
                    Some(parent) => {
                        let p = arena.get(parent);
                        !(p.kind == FragmentKind::Composite(CompositeKind::If)
                            && p.children.get(1) == Some(&id))
                    }
                    None => true,
                }
            })
            .collect()
    }

    fn try_chain_cluster(&mut self, h1: FragmentId, h2: FragmentId) -> MatchResult<bool> {
        let chain1 = if_chain(&self.before.body, h1);
        let chain2 = if_chain(&self.after.body, h2);
        let branches1 = chain_branches(&self.before.body, &chain1);
        let branches2 = chain_branches(&self.after.body, &chain2);
        if branches1.is_empty() || branches2.is_empty() {
            return Ok(false);
        }
        if chain1.len() == chain2.len() && branches1.len() == branches2.len() {
            // Same shape on both sides: ordinary scoring already handles
            // it, and a single out-of-place branch must not be clustered.
            return Ok(false);
        }

        // Every branch of the larger chain must land inside a single
        // branch of the other, and every branch of the smaller chain must
        // be covered.
        let sequences1: Vec<Vec<&str>> = branches1
            .iter()
            .map(|&b| self.before.body.string_sequence(b))
            .collect();
        let sequences2: Vec<Vec<&str>> = branches2
            .iter()
            .map(|&b| self.after.body.string_sequence(b))
            .collect();
        let forward = branches2.len() >= branches1.len();
        let (from, to) = if forward {
            (&sequences2, &sequences1)
        } else {
            (&sequences1, &sequences2)
        };
        let mut assignment: Vec<usize> = Vec::with_capacity(from.len());
        for seq in from {
            let home = to
                .iter()
                .position(|target| !seq.is_empty() && seq.iter().all(|s| target.contains(s)));
            match home {
                Some(i) => assignment.push(i),
                None => return Ok(false),
            }
        }
        if !(0..to.len()).all(|i| assignment.contains(&i)) {
            return Ok(false);
        }

        debug!(before = %h1, after = %h2, "if-chain cluster accepted");
        let cluster = self.next_cluster;
        self.next_cluster += 1;
        let mut cluster_mappings: Vec<MappingId> = Vec::new();

        // Chain member ifs pair in order; members mapped to each other
        // already are promoted into the cluster.
        for (&m1, &m2) in chain1.iter().zip(chain2.iter()) {
            if let Some(id) = self.promote_or_insert_cluster_member(m1, m2, cluster, true)? {
                cluster_mappings.push(id);
            }
        }

        // Branch bodies pair by the coverage assignment, first-come; the
        // branches of the larger chain left unpaired are absorbed below.
        let mut used: Vec<usize> = Vec::new();
        let mut extra_branches: Vec<FragmentId> = Vec::new();
        for (j, &home) in assignment.iter().enumerate() {
            if used.contains(&home) {
                extra_branches.push(if forward { branches2[j] } else { branches1[j] });
                continue;
            }
            let (b1, b2) = if forward {
                (branches1[home], branches2[j])
            } else {
                (branches1[j], branches2[home])
            };
            if let Some(id) = self.promote_or_insert_cluster_member(b1, b2, cluster, false)? {
                cluster_mappings.push(id);
            }
            used.push(home);
        }

        // Extra chain members on one side redistribute conditions.
        let conditions = |session: &Self, side: Side, chain: &[FragmentId]| -> Vec<String> {
            chain.iter().map(|&m| session.text_of(side, m).to_string()).collect()
        };
        match chain2.len().cmp(&chain1.len()) {
            std::cmp::Ordering::Greater => {
                let mut absorbed: Vec<FragmentId> = chain2[chain1.len()..].to_vec();
                absorbed.extend(extra_branches.iter().copied());
                self.attach_chain_aggregate(&cluster_mappings, &absorbed, Side::After);
                self.refactorings.push(Refactoring::SplitConditional {
                    before_condition: self.text_of(Side::Before, *chain1.last().expect("chain")).to_string(),
                    after_conditions: conditions(self, Side::After, &chain2[chain1.len() - 1..]),
                    mappings: cluster_mappings.clone(),
                });
            }
            std::cmp::Ordering::Less => {
                let mut absorbed: Vec<FragmentId> = chain1[chain2.len()..].to_vec();
                absorbed.extend(extra_branches.iter().copied());
                self.attach_chain_aggregate(&cluster_mappings, &absorbed, Side::Before);
                self.refactorings.push(Refactoring::MergeConditional {
                    before_conditions: conditions(self, Side::Before, &chain1[chain2.len() - 1..]),
                    after_condition: self.text_of(Side::After, *chain2.last().expect("chain")).to_string(),
                    mappings: cluster_mappings.clone(),
                });
            }
            std::cmp::Ordering::Equal => {}
        }
        Ok(true)
    }

    /// Mark an existing (before, after) mapping as a cluster member, or
    /// create it when both sides are free. Pairs mapped elsewhere are
    /// left alone.
    fn promote_or_insert_cluster_member(
        &mut self,
        m1: FragmentId,
        m2: FragmentId,
        cluster: u32,
        condition_replacement: bool,
    ) -> MatchResult<Option<MappingId>> {
        if let Some(existing) = self.store.by_before(m1) {
            if existing.after != m2 {
                return Ok(None);
            }
            let id = existing.id;
            if let Some(mapping) = self.store.get_mut(id) {
                mapping.cluster = Some(cluster);
            }
            return Ok(Some(id));
        }
        if self.store.by_after(m2).is_some() {
            return Ok(None);
        }
        let t1 = self.text_of(Side::Before, m1).to_string();
        let t2 = self.text_of(Side::After, m2).to_string();
        let replacements = if t1 == t2 || !condition_replacement {
            Vec::new()
        } else {
            vec![Replacement::new(ReplacementKind::Conditional, t1.clone(), t2.clone())]
        };
        let id = self
            .store
            .insert(m1, m2, MappingKind::Composite, replacements, t1 == t2)?;
        if let Some(mapping) = self.store.get_mut(id) {
            mapping.cluster = Some(cluster);
        }
        self.leftover_composites_before.retain(|&x| x != m1);
        self.leftover_composites_after.retain(|&x| x != m2);
        Ok(Some(id))
    }

    fn attach_chain_aggregate(
        &mut self,
        cluster_mappings: &[MappingId],
        absorbed: &[FragmentId],
        side: Side,
    ) {
        let Some(&head) = cluster_mappings.first() else {
            return;
        };
        let absorbed_statements = match side {
            Side::Before => AbsorbedStatements {
                before: absorbed.to_vec(),
                after: Vec::new(),
            },
            Side::After => AbsorbedStatements {
                before: Vec::new(),
                after: absorbed.to_vec(),
            },
        };
        if let Some(mapping) = self.store.get_mut(head) {
            let (b, a) = (mapping.before, mapping.after);
            mapping.replacements.push(Replacement::aggregate(
                ReplacementKind::Composite,
                format!("{b}"),
                format!("{a}"),
                absorbed_statements,
            ));
        }
        // The absorbed members are explained by the aggregate; they no
        // longer count as leftovers.
        for &id in absorbed {
            match side {
                Side::Before => self.leftover_composites_before.retain(|&x| x != id),
                Side::After => self.leftover_composites_after.retain(|&x| x != id),
            }
        }
    }

    fn detect_switch_if(&mut self) -> MatchResult<bool> {
        let mut revised = false;
        // Switch before, if after.
        let switches: Vec<FragmentId> = self
            .leftover_composites_before
            .iter()
            .copied()
            .filter(|&id| {
                self.before.body.get(id).kind == FragmentKind::Composite(CompositeKind::Switch)
            })
            .collect();
        for s in switches {
            let ifs: Vec<FragmentId> = self
                .leftover_composites_after
                .iter()
                .copied()
                .filter(|&id| {
                    self.after.body.get(id).kind == FragmentKind::Composite(CompositeKind::If)
                })
                .collect();
            for i in ifs {
                let labels = switch_if_labels(
                    self.before.body.get(s),
                    &self.before.body,
                    self.after.body.get(i),
                );
                if let Some(labels) = labels {
                    self.accept_switch_if(s, i, labels, true)?;
                    revised = true;
                    break;
                }
            }
        }
        // If before, switch after.
        let switches: Vec<FragmentId> = self
            .leftover_composites_after
            .iter()
            .copied()
            .filter(|&id| {
                self.after.body.get(id).kind == FragmentKind::Composite(CompositeKind::Switch)
            })
            .collect();
        for s in switches {
            let ifs: Vec<FragmentId> = self
                .leftover_composites_before
                .iter()
                .copied()
                .filter(|&id| {
                    self.before.body.get(id).kind == FragmentKind::Composite(CompositeKind::If)
                })
                .collect();
            for i in ifs {
                let labels = switch_if_labels(
                    self.after.body.get(s),
                    &self.after.body,
                    self.before.body.get(i),
                );
                if let Some(labels) = labels {
                    self.accept_switch_if(i, s, labels, false)?;
                    revised = true;
                    break;
                }
            }
        }
        Ok(revised)
    }

    fn accept_switch_if(
        &mut self,
        b: FragmentId,
        a: FragmentId,
        labels: Vec<String>,
        switch_on_before: bool,
    ) -> MatchResult<()> {
        debug!(before = %b, after = %a, "switch/if conversion accepted");
        let (switch_side, switch_id) = if switch_on_before {
            (Side::Before, b)
        } else {
            (Side::After, a)
        };
        let cases: Vec<FragmentId> = self
            .arena(switch_side)
            .get(switch_id)
            .children
            .iter()
            .copied()
            .filter(|&c| {
                self.arena(switch_side).get(c).kind
                    == FragmentKind::Composite(CompositeKind::SwitchCase)
            })
            .collect();
        let absorbed = if switch_on_before {
            AbsorbedStatements {
                before: cases.clone(),
                after: Vec::new(),
            }
        } else {
            AbsorbedStatements {
                before: Vec::new(),
                after: cases.clone(),
            }
        };
        let replacement = Replacement::aggregate(
            ReplacementKind::SwitchCaseWithIf,
            self.text_of(Side::Before, b).to_string(),
            self.text_of(Side::After, a).to_string(),
            absorbed,
        );
        let id = self
            .store
            .insert(b, a, MappingKind::Composite, vec![replacement], false)?;
        self.leftover_composites_before.retain(|&x| x != b);
        self.leftover_composites_after.retain(|&x| x != a);
        for &case in &cases {
            match switch_side {
                Side::Before => self.leftover_composites_before.retain(|&x| x != case),
                Side::After => self.leftover_composites_after.retain(|&x| x != case),
            }
        }
        let index = self.refactorings.len();
        let record = if switch_on_before {
            Refactoring::ReplaceSwitchWithIf {
                switch_fragment: b,
                if_fragment: a,
                case_labels: labels,
            }
        } else {
            Refactoring::ReplaceIfWithSwitch {
                if_fragment: b,
                switch_fragment: a,
                case_labels: labels,
            }
        };
        self.refactorings.push(record);
        if let Some(mapping) = self.store.get_mut(id) {
            mapping.refactoring = Some(index);
        }
        Ok(())
    }

    fn detect_loop_pipeline(&mut self) -> MatchResult<bool> {
        let mut revised = false;
        revised |= self.detect_loop_pipeline_direction(true)?;
        revised |= self.detect_loop_pipeline_direction(false)?;
        Ok(revised)
    }

    /// `loop_on_before`: loop on the before side, pipeline leaf on the
    /// after side (the usual modernization direction); mirrored otherwise.
    fn detect_loop_pipeline_direction(&mut self, loop_on_before: bool) -> MatchResult<bool> {
        let (loop_side, leaf_side) = if loop_on_before {
            (Side::Before, Side::After)
        } else {
            (Side::After, Side::Before)
        };
        let loops: Vec<FragmentId> = {
            let pool = match loop_side {
                Side::Before => &self.leftover_composites_before,
                Side::After => &self.leftover_composites_after,
            };
            pool.iter()
                .copied()
                .filter(|&id| {
                    self.arena(loop_side)
                        .get(id)
                        .kind
                        .as_composite()
                        .is_some_and(CompositeKind::is_loop)
                })
                .collect()
        };
        let leaves: Vec<FragmentId> = match leaf_side {
            Side::Before => self.leftover_leaves_before.clone(),
            Side::After => self.leftover_leaves_after.clone(),
        };
        let mut revised = false;
        for loop_id in loops {
            let loop_vars = loop_variables(self.arena(loop_side).get(loop_id));
            if loop_vars.is_empty() {
                continue;
            }
            for &leaf in &leaves {
                let leaf_fragment = self.arena(leaf_side).get(leaf);
                let Some(shape) = pipeline_shape(leaf_fragment) else {
                    continue;
                };
                let overlap = shape
                    .bound_parameters
                    .iter()
                    .any(|p| loop_vars.contains(p));
                if !overlap {
                    continue;
                }
                if !pipeline_stages_justified(
                    leaf_fragment,
                    &shape,
                    self.arena(loop_side),
                    loop_id,
                    &loop_vars,
                ) {
                    continue;
                }
                self.accept_loop_pipeline(loop_id, leaf, loop_on_before)?;
                revised = true;
                break;
            }
        }
        Ok(revised)
    }

    fn accept_loop_pipeline(
        &mut self,
        loop_id: FragmentId,
        leaf: FragmentId,
        loop_on_before: bool,
    ) -> MatchResult<()> {
        debug!(loop_fragment = %loop_id, pipeline = %leaf, "loop/pipeline conversion accepted");
        let (loop_side, leaf_side) = if loop_on_before {
            (Side::Before, Side::After)
        } else {
            (Side::After, Side::Before)
        };
        let under_loop: Vec<FragmentId> = self.arena(loop_side).statements_under(loop_id);
        let absorbed_loop: Vec<FragmentId> = under_loop
            .iter()
            .copied()
            .filter(|&id| !self.arena(loop_side).get(id).is_block())
            .collect();
        let absorbed_leaf: Vec<FragmentId> = self
            .arena(leaf_side)
            .get(leaf)
            .constructs
            .lambdas
            .iter()
            .flat_map(|l| self.arena(leaf_side).leaves_under(l.body))
            .collect();
        let (b, a) = if loop_on_before {
            (loop_id, leaf)
        } else {
            (leaf, loop_id)
        };
        let absorbed = if loop_on_before {
            AbsorbedStatements {
                before: absorbed_loop.clone(),
                after: absorbed_leaf.clone(),
            }
        } else {
            AbsorbedStatements {
                before: absorbed_leaf.clone(),
                after: absorbed_loop.clone(),
            }
        };
        let replacement = Replacement::aggregate(
            ReplacementKind::LoopWithPipeline,
            self.text_of(Side::Before, b).to_string(),
            self.text_of(Side::After, a).to_string(),
            absorbed,
        );
        let kind = MappingKind::Composite;
        let id = self.store.insert(b, a, kind, vec![replacement], false)?;

        match loop_side {
            Side::Before => {
                self.leftover_composites_before.retain(|&x| x != loop_id);
                self.leftover_leaves_before.retain(|x| !under_loop.contains(x));
                self.leftover_composites_before.retain(|x| !under_loop.contains(x));
            }
            Side::After => {
                self.leftover_composites_after.retain(|&x| x != loop_id);
                self.leftover_leaves_after.retain(|x| !under_loop.contains(x));
                self.leftover_composites_after.retain(|x| !under_loop.contains(x));
            }
        }
        match leaf_side {
            Side::Before => {
                self.leftover_leaves_before.retain(|&x| x != leaf);
                self.leftover_leaves_before.retain(|x| !absorbed_leaf.contains(x));
            }
            Side::After => {
                self.leftover_leaves_after.retain(|&x| x != leaf);
                self.leftover_leaves_after.retain(|x| !absorbed_leaf.contains(x));
            }
        }

        let index = self.refactorings.len();
        let record = if loop_on_before {
            Refactoring::ReplaceLoopWithPipeline {
                loop_fragment: loop_id,
                pipeline_fragment: leaf,
                absorbed_before: absorbed_loop,
                absorbed_after: absorbed_leaf,
            }
        } else {
            Refactoring::ReplacePipelineWithLoop {
                pipeline_fragment: leaf,
                loop_fragment: loop_id,
                absorbed_before: absorbed_leaf,
                absorbed_after: absorbed_loop,
            }
        };
        self.refactorings.push(record);
        if let Some(mapping) = self.store.get_mut(id) {
            mapping.refactoring = Some(index);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Consistency repair
    // ------------------------------------------------------------------

    /// Evict replacement-based mappings whose two parents are mapped, but
    /// not to each other, with no excuse (cluster membership, aggregates,
    /// refactoring links, exact moves, expression mappings).
    fn consistency_repair(&mut self) -> MatchResult<()> {
        self.cancel.check()?;
        loop {
            let victim = self.store.iter().find_map(|m| {
                if m.exact
                    || m.kind == MappingKind::Expression
                    || m.cluster.is_some()
                    || m.refactoring.is_some()
                    || m.has_aggregate()
                {
                    return None;
                }
                let pb = self.before.body.non_block_parent(m.before)?;
                let pa = self.after.body.non_block_parent(m.after)?;
                let mapped_b = self.store.by_before(pb)?;
                let mapped_a = self.store.by_after(pa)?;
                if mapped_b.after != pa && mapped_a.before != pb {
                    // Excuse divergence explained by a cluster or an
                    // aggregate on either parent mapping.
                    if mapped_b.cluster.is_some()
                        || mapped_a.cluster.is_some()
                        || mapped_b.has_aggregate()
                        || mapped_a.has_aggregate()
                    {
                        return None;
                    }
                    Some(m.id)
                } else {
                    None
                }
            });
            match victim {
                Some(id) => {
                    let Some(evicted) = self.store.evict(id) else {
                        break;
                    };
                    trace!(mapping = %id, "inconsistent mapping evicted");
                    match evicted.kind {
                        MappingKind::Leaf => {
                            self.leftover_leaves_before.push(evicted.before);
                            self.leftover_leaves_after.push(evicted.after);
                        }
                        MappingKind::Composite => {
                            self.leftover_composites_before.push(evicted.before);
                            self.leftover_composites_after.push(evicted.after);
                        }
                        MappingKind::Expression => {}
                    }
                }
                None => break,
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Opportunistic extract/inline variable
    // ------------------------------------------------------------------

    /// An unmapped after-leaf that declares a variable referenced
    /// identically inside an accepted mapping is an extract-variable; the
    /// mirrored case on the before side is an inline-variable.
    fn sweep_extract_inline(&mut self) -> MatchResult<()> {
        self.cancel.check()?;

        struct Hit {
            mapping: MappingId,
            declaration: FragmentId,
            name: String,
            initializer: String,
            extract: bool,
        }
        let mut hits: Vec<Hit> = Vec::new();

        for mapping in self.store.iter() {
            if mapping.kind == MappingKind::Expression || mapping.exact {
                continue;
            }
            let tb = self.text_of(Side::Before, mapping.before);
            let ta = self.text_of(Side::After, mapping.after);
            for &leaf in &self.leftover_leaves_after {
                for decl in &self.arena(Side::After).get(leaf).constructs.declarations {
                    let Some(init) = decl.initializer.as_deref() else {
                        continue;
                    };
                    if contains_token(ta, &decl.name)
                        && replace_token(ta, &decl.name, init) == tb
                        && !hits.iter().any(|h| h.mapping == mapping.id)
                    {
                        hits.push(Hit {
                            mapping: mapping.id,
                            declaration: leaf,
                            name: decl.name.clone(),
                            initializer: init.to_string(),
                            extract: true,
                        });
                    }
                }
            }
            for &leaf in &self.leftover_leaves_before {
                for decl in &self.arena(Side::Before).get(leaf).constructs.declarations {
                    let Some(init) = decl.initializer.as_deref() else {
                        continue;
                    };
                    if contains_token(tb, &decl.name)
                        && replace_token(tb, &decl.name, init) == ta
                        && !hits.iter().any(|h| h.mapping == mapping.id)
                    {
                        hits.push(Hit {
                            mapping: mapping.id,
                            declaration: leaf,
                            name: decl.name.clone(),
                            initializer: init.to_string(),
                            extract: false,
                        });
                    }
                }
            }
        }

        for hit in hits {
            let index = self.refactorings.len();
            let record = if hit.extract {
                Refactoring::ExtractVariable {
                    name: hit.name.clone(),
                    declaration: hit.declaration,
                    references: vec![hit.mapping],
                }
            } else {
                Refactoring::InlineVariable {
                    name: hit.name.clone(),
                    declaration: hit.declaration,
                    references: vec![hit.mapping],
                }
            };
            self.refactorings.push(record);
            if let Some(mapping) = self.store.get_mut(hit.mapping) {
                mapping.refactoring = Some(index);
                mapping.subexpressions.push(SubExpressionMapping {
                    before: hit.initializer.clone(),
                    after: if hit.extract {
                        hit.name.clone()
                    } else {
                        hit.initializer.clone()
                    },
                    before_fragment: None,
                    after_fragment: None,
                });
            }
        }
        Ok(())
    }

    /// Attach expression mappings as sub-expression records on the
    /// primary mapping of the expression's owning composite, when one
    /// exists.
    fn attach_subexpressions(&mut self) {
        let attachments: Vec<(MappingId, SubExpressionMapping)> = self
            .store
            .iter()
            .filter(|m| m.kind == MappingKind::Expression)
            .filter_map(|m| {
                let before_fragment = self.before.body.get(m.before);
                // The owning composite lives on whichever side carries the
                // expression fragment; ids are arena-scoped, so the lookup
                // must stay on that side.
                let primary = if before_fragment.kind.is_expression() {
                    self.store.by_before(before_fragment.parent?)?
                } else {
                    self.store.by_after(self.after.body.get(m.after).parent?)?
                };
                Some((
                    primary.id,
                    SubExpressionMapping {
                        before: self.text_of(Side::Before, m.before).to_string(),
                        after: self.text_of(Side::After, m.after).to_string(),
                        before_fragment: Some(m.before),
                        after_fragment: Some(m.after),
                    },
                ))
            })
            .collect();
        for (id, sub) in attachments {
            if let Some(mapping) = self.store.get_mut(id) {
                mapping.subexpressions.push(sub);
            }
        }
    }

    // ------------------------------------------------------------------
    // Parent/child coordination
    // ------------------------------------------------------------------

    /// Parent leftovers plus inexact-mapped fragments: the candidate set a
    /// nested session may claim on the shared side.
    fn residual_leaves(&self, side: Side) -> Vec<FragmentId> {
        let mut out = match side {
            Side::Before => self.leftover_leaves_before.clone(),
            Side::After => self.leftover_leaves_after.clone(),
        };
        for m in self.store.iter() {
            if m.kind != MappingKind::Leaf || m.replacements.is_empty() {
                continue;
            }
            let id = match side {
                Side::Before => m.before,
                Side::After => m.after,
            };
            if !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }

    fn residual_composites(&self, side: Side) -> Vec<FragmentId> {
        let mut out = match side {
            Side::Before => self.leftover_composites_before.clone(),
            Side::After => self.leftover_composites_after.clone(),
        };
        for m in self.store.iter() {
            if m.kind != MappingKind::Composite || m.replacements.is_empty() {
                continue;
            }
            let id = match side {
                Side::Before => m.before,
                Side::After => m.after,
            };
            if !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }

    /// The lexical bracket around `call_site` (on `site_side` of this
    /// session): the shared-side lines of the nearest accepted mappings
    /// before and after the call site.
    fn bracket_around(&self, call_site: FragmentId, site_side: Side) -> Bracket {
        let site_line = self.arena(site_side).get(call_site).location.start_line;
        let mut lo: Option<u32> = None;
        let mut hi: Option<u32> = None;
        for m in self.store.iter() {
            if m.kind == MappingKind::Expression {
                continue;
            }
            let (site_id, shared_id) = match site_side {
                Side::After => (m.after, m.before),
                Side::Before => (m.before, m.after),
            };
            let shared_side = match site_side {
                Side::After => Side::Before,
                Side::Before => Side::After,
            };
            let mapped_line = self.arena(site_side).get(site_id).location.start_line;
            let shared_line = self.arena(shared_side).get(shared_id).location.start_line;
            if mapped_line < site_line {
                if lo.is_none_or(|cur| shared_line > cur) {
                    lo = Some(shared_line);
                }
            } else if mapped_line > site_line && hi.is_none_or(|cur| shared_line < cur) {
                hi = Some(shared_line);
            }
        }
        Bracket {
            on_before: site_side == Side::After,
            lo,
            hi,
        }
    }
}
