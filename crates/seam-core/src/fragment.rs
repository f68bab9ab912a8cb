//! Fragment arena: leaves, composites, and sub-expression fragments.
//!
//! All fragments of one container body live in a single arena and are
//! addressed by stable [`FragmentId`] indices. Parents are stored as
//! indices and children as index lists, so the conceptually cyclic
//! parent/child graph has no shared-ownership cycles.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constructs::Constructs;
use crate::location::Location;

/// Stable index of a fragment within its body arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct FragmentId(pub u32);

impl FragmentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for FragmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frag_{}", self.0)
    }
}

/// Kind of a leaf fragment (no nested statement children).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeafKind {
    Statement,
    VariableDeclaration,
    Return,
    Break,
    Continue,
    Throw,
}

/// Kind of a composite fragment (ordered statement children, optional
/// sub-expressions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompositeKind {
    /// The one kind used for flattening; carries no header text of its own.
    Block,
    If,
    For,
    EnhancedFor,
    While,
    DoWhile,
    Try,
    CatchClause,
    Finally,
    Switch,
    SwitchCase,
    Synchronized,
    LambdaBody,
}

impl CompositeKind {
    /// Whether this kind belongs to the try/catch/finally family, which
    /// scores compositionally and is incomparable with other kinds.
    pub fn is_try_family(self) -> bool {
        matches!(self, CompositeKind::Try | CompositeKind::CatchClause | CompositeKind::Finally)
    }

    /// Whether this kind is a loop.
    pub fn is_loop(self) -> bool {
        matches!(
            self,
            CompositeKind::For | CompositeKind::EnhancedFor | CompositeKind::While | CompositeKind::DoWhile
        )
    }
}

/// Role of a sub-expression fragment within its owning composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpressionRole {
    Condition,
    Initializer,
    Update,
    CaseLabel,
    Expression,
}

/// Closed kind tag for every fragment. Matching phases dispatch
/// exhaustively on this, so a new kind forces every phase to be revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FragmentKind {
    Leaf(LeafKind),
    Composite(CompositeKind),
    Expression(ExpressionRole),
}

impl FragmentKind {
    pub fn is_leaf(self) -> bool {
        matches!(self, FragmentKind::Leaf(_))
    }

    pub fn is_composite(self) -> bool {
        matches!(self, FragmentKind::Composite(_))
    }

    pub fn is_expression(self) -> bool {
        matches!(self, FragmentKind::Expression(_))
    }

    pub fn as_composite(self) -> Option<CompositeKind> {
        match self {
            FragmentKind::Composite(k) => Some(k),
            _ => None,
        }
    }
}

/// One fragment of a statement tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub id: FragmentId,
    pub kind: FragmentKind,
    /// Normalized statement text.
    pub text: String,
    /// Text with formal parameter names replaced by canonical `$pN`
    /// placeholders, so signatures differing only in parameter names still
    /// compare equal.
    pub argumentized: String,
    pub location: Location,
    /// Nesting depth; the root composite is depth 0.
    pub depth: u32,
    /// Sibling index among the parent's statement children.
    pub index: u32,
    pub parent: Option<FragmentId>,
    /// Ordered statement children (composites only).
    pub children: Vec<FragmentId>,
    /// Sub-expression fragments (composites only): condition, initializers,
    /// updates, case labels.
    pub expressions: Vec<FragmentId>,
    /// Referenced constructs: invocations, declarations, literals, lambdas,
    /// comments.
    pub constructs: Constructs,
}

impl Fragment {
    pub fn is_block(&self) -> bool {
        self.kind == FragmentKind::Composite(CompositeKind::Block)
    }
}

/// Arena owning every fragment of one container body.
///
/// Iteration orders are insertion orders and therefore deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyArena {
    fragments: Vec<Fragment>,
    root: FragmentId,
}

impl BodyArena {
    pub(crate) fn from_parts(fragments: Vec<Fragment>, root: FragmentId) -> Self {
        BodyArena { fragments, root }
    }

    /// Root composite of the body.
    pub fn root(&self) -> FragmentId {
        self.root
    }

    pub fn get(&self, id: FragmentId) -> &Fragment {
        &self.fragments[id.index()]
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// All fragments in arena order.
    pub fn iter(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.iter()
    }

    /// Ordered leaves of the main body, excluding lambda subtrees.
    pub fn leaves(&self) -> Vec<FragmentId> {
        let mut out = Vec::new();
        self.collect_leaves(self.root, &mut out);
        out
    }

    /// Ordered inner composites of the main body, excluding the root and
    /// lambda subtrees.
    pub fn inner_nodes(&self) -> Vec<FragmentId> {
        let mut out = Vec::new();
        self.collect_inner(self.root, &mut out);
        out
    }

    /// Ordered leaves of the subtree rooted at `id` (inclusive scan).
    pub fn leaves_under(&self, id: FragmentId) -> Vec<FragmentId> {
        let mut out = Vec::new();
        self.collect_leaves(id, &mut out);
        out
    }

    /// Ordered composites of the subtree rooted at `id`, excluding `id`.
    pub fn composites_under(&self, id: FragmentId) -> Vec<FragmentId> {
        let mut out = Vec::new();
        self.collect_inner(id, &mut out);
        out
    }

    /// Every statement (leaf or composite) of the subtree under `id`,
    /// excluding `id` itself, in document order.
    pub fn statements_under(&self, id: FragmentId) -> Vec<FragmentId> {
        let mut out = Vec::new();
        for &child in &self.get(id).children {
            out.push(child);
            out.extend(self.statements_under(child));
        }
        out
    }

    /// Total statement count of the main body (leaves + composites,
    /// excluding the root and lambda subtrees).
    pub fn statement_count(&self) -> usize {
        self.leaves().len() + self.inner_nodes().len()
    }

    /// Canonical per-statement string list for substring-containment checks.
    pub fn string_sequence(&self, id: FragmentId) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_strings(id, &mut out);
        out
    }

    /// Content hash over the main body's statement texts.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for id in self.leaves() {
            hasher.update(self.get(id).text.as_bytes());
            hasher.update([0u8]);
        }
        for id in self.inner_nodes() {
            hasher.update(self.get(id).text.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Nearest non-block ancestor of `id`, if any.
    pub fn non_block_parent(&self, id: FragmentId) -> Option<FragmentId> {
        let mut cur = self.get(id).parent;
        while let Some(pid) = cur {
            let parent = self.get(pid);
            if !parent.is_block() {
                return Some(pid);
            }
            cur = parent.parent;
        }
        None
    }

    /// Whether `ancestor` appears on `id`'s parent chain.
    pub fn is_ancestor(&self, ancestor: FragmentId, id: FragmentId) -> bool {
        let mut cur = self.get(id).parent;
        while let Some(pid) = cur {
            if pid == ancestor {
                return true;
            }
            cur = self.get(pid).parent;
        }
        false
    }

    fn collect_leaves(&self, id: FragmentId, out: &mut Vec<FragmentId>) {
        let fragment = self.get(id);
        match fragment.kind {
            FragmentKind::Leaf(_) => out.push(id),
            FragmentKind::Composite(_) => {
                for &child in &fragment.children {
                    self.collect_leaves(child, out);
                }
            }
            FragmentKind::Expression(_) => {}
        }
    }

    fn collect_inner(&self, id: FragmentId, out: &mut Vec<FragmentId>) {
        for &child in &self.get(id).children {
            if self.get(child).kind.is_composite() {
                out.push(child);
                self.collect_inner(child, out);
            }
        }
    }

    fn collect_strings<'a>(&'a self, id: FragmentId, out: &mut Vec<&'a str>) {
        let fragment = self.get(id);
        if !fragment.is_block() {
            out.push(fragment.text.as_str());
        }
        for &child in &fragment.children {
            self.collect_strings(child, out);
        }
    }
}
