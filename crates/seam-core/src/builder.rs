//! Programmatic construction of container bodies.
//!
//! Model providers (and tests) build statement trees through
//! [`BodyBuilder`]: open a composite, append leaves, close, finish.
//! The builder assigns depths, sibling indexes, synthetic line numbers,
//! and computes argumentized text from the container's parameter list.

use crate::constructs::{
    scan_declaration, scan_invocations, Comment, Constructs, Lambda,
};
use crate::container::{Container, Parameter};
use crate::fragment::{
    BodyArena, CompositeKind, ExpressionRole, Fragment, FragmentId, FragmentKind, LeafKind,
};
use crate::location::Location;

/// Builder for one container body.
pub struct BodyBuilder {
    name: String,
    type_name: String,
    parameters: Vec<Parameter>,
    annotations: Vec<String>,
    is_constructor: bool,
    file: String,
    fragments: Vec<Fragment>,
    stack: Vec<FragmentId>,
    next_line: u32,
}

impl BodyBuilder {
    /// Start a builder for a container named `name` declared on logical
    /// type `type_name`.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let mut builder = BodyBuilder {
            name: name.into(),
            type_name: type_name.into(),
            parameters: Vec::new(),
            annotations: Vec::new(),
            is_constructor: false,
            file: "body.src".to_string(),
            fragments: Vec::new(),
            stack: Vec::new(),
            next_line: 1,
        };
        let root = builder.push_fragment(
            FragmentKind::Composite(CompositeKind::Block),
            "{".to_string(),
            None,
        );
        builder.stack.push(root);
        builder
    }

    /// Declare a formal parameter. Must precede `finish`.
    pub fn param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.parameters.push(Parameter::new(name, type_name));
        self
    }

    /// Attach an annotation to the container signature.
    pub fn annotation(mut self, text: impl Into<String>) -> Self {
        self.annotations.push(text.into());
        self
    }

    /// Mark the container as a constructor.
    pub fn constructor(mut self) -> Self {
        self.is_constructor = true;
        self
    }

    /// Override the synthetic file name used for locations.
    pub fn file(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }

    /// Append a leaf statement to the innermost open composite. The leaf
    /// kind is inferred from the text; use [`BodyBuilder::leaf_kind`] to
    /// force one.
    pub fn leaf(&mut self, text: impl Into<String>) -> FragmentId {
        let text = text.into();
        let kind = infer_leaf_kind(&text);
        self.leaf_kind(kind, text)
    }

    /// Append a leaf statement with an explicit kind.
    pub fn leaf_kind(&mut self, kind: LeafKind, text: impl Into<String>) -> FragmentId {
        let text = text.into();
        let parent = self.current();
        let id = self.push_fragment(FragmentKind::Leaf(kind), text, Some(parent));
        self.populate_constructs(id);
        id
    }

    /// Open a composite statement; subsequent fragments nest inside until
    /// [`BodyBuilder::close`].
    pub fn open(&mut self, kind: CompositeKind, text: impl Into<String>) -> FragmentId {
        let parent = self.current();
        let id = self.push_fragment(FragmentKind::Composite(kind), text.into(), Some(parent));
        self.stack.push(id);
        id
    }

    /// Convenience: open a `{ ... }` block.
    pub fn open_block(&mut self) -> FragmentId {
        self.open(CompositeKind::Block, "{")
    }

    /// Attach a sub-expression fragment to the innermost open composite.
    pub fn expr(&mut self, role: ExpressionRole, text: impl Into<String>) -> FragmentId {
        let owner = self.current();
        let line = self.fragments[owner.index()].location.start_line;
        let id = FragmentId(self.fragments.len() as u32);
        let depth = self.fragments[owner.index()].depth + 1;
        let fragment = Fragment {
            id,
            kind: FragmentKind::Expression(role),
            text: text.into(),
            argumentized: String::new(),
            location: Location::line(self.file.clone(), line),
            depth,
            index: self.fragments[owner.index()].expressions.len() as u32,
            parent: Some(owner),
            children: Vec::new(),
            expressions: Vec::new(),
            constructs: Constructs::default(),
        };
        self.fragments.push(fragment);
        self.fragments[owner.index()].expressions.push(id);
        id
    }

    /// Close the innermost open composite.
    pub fn close(&mut self) {
        let id = self.stack.pop().expect("close without open composite");
        assert!(!self.stack.is_empty(), "cannot close the root block");
        let end = self.next_line.saturating_sub(1).max(1);
        let loc = &mut self.fragments[id.index()].location;
        loc.end_line = end;
        loc.end_offset = end * 1000 + 999;
    }

    /// Build a lambda body carried by the leaf `carrier`. Body fragments
    /// are appended inside the closure and live in the same arena, rooted
    /// at a `LambdaBody` composite reachable only through the carrier.
    pub fn lambda(
        &mut self,
        carrier: FragmentId,
        parameters: &[&str],
        build: impl FnOnce(&mut Self),
    ) -> FragmentId {
        let body = self.push_fragment(
            FragmentKind::Composite(CompositeKind::LambdaBody),
            "->".to_string(),
            None,
        );
        self.fragments[body.index()].parent = Some(carrier);
        self.fragments[body.index()].depth = self.fragments[carrier.index()].depth + 1;
        self.stack.push(body);
        build(self);
        let id = self.stack.pop().expect("lambda body scope");
        debug_assert_eq!(id, body);
        self.fragments[carrier.index()].constructs.lambdas.push(Lambda {
            parameters: parameters.iter().map(|p| p.to_string()).collect(),
            body,
        });
        body
    }

    /// Attach a comment to an existing fragment.
    pub fn comment_on(&mut self, id: FragmentId, text: impl Into<String>) {
        self.fragments[id.index()]
            .constructs
            .comments
            .push(Comment { text: text.into() });
    }

    /// Finish the body: closes the root, computes argumentized texts, and
    /// returns the container.
    pub fn finish(mut self) -> Container {
        assert_eq!(self.stack.len(), 1, "unclosed composite at finish");
        let root = self.stack.pop().expect("root block");
        let end = self.next_line.saturating_sub(1).max(1);
        let loc = &mut self.fragments[root.index()].location;
        loc.end_line = end;
        loc.end_offset = end * 1000 + 999;

        let placeholders: Vec<(String, String)> = self
            .parameters
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), format!("$p{i}")))
            .collect();
        for fragment in &mut self.fragments {
            fragment.argumentized = argumentize(&fragment.text, &placeholders);
        }

        Container {
            name: self.name,
            parameters: self.parameters,
            annotations: self.annotations,
            is_constructor: self.is_constructor,
            type_name: self.type_name,
            body: BodyArena::from_parts(self.fragments, root),
        }
    }

    fn current(&self) -> FragmentId {
        *self.stack.last().expect("no open composite")
    }

    fn push_fragment(
        &mut self,
        kind: FragmentKind,
        text: String,
        parent: Option<FragmentId>,
    ) -> FragmentId {
        let id = FragmentId(self.fragments.len() as u32);
        let line = self.next_line;
        self.next_line += 1;
        let (depth, index) = match parent {
            Some(pid) => {
                let p = &self.fragments[pid.index()];
                (p.depth + 1, p.children.len() as u32)
            }
            None => (0, 0),
        };
        let fragment = Fragment {
            id,
            kind,
            text,
            argumentized: String::new(),
            location: Location::line(self.file.clone(), line),
            depth,
            index,
            parent,
            children: Vec::new(),
            expressions: Vec::new(),
            constructs: Constructs::default(),
        };
        self.fragments.push(fragment);
        if let Some(pid) = parent {
            self.fragments[pid.index()].children.push(id);
        }
        id
    }

    fn populate_constructs(&mut self, id: FragmentId) {
        let text = self.fragments[id.index()].text.clone();
        let invocations = scan_invocations(&text);
        let declarations =
            if self.fragments[id.index()].kind == FragmentKind::Leaf(LeafKind::VariableDeclaration) {
                scan_declaration(&text).into_iter().collect()
            } else {
                Vec::new()
            };
        let existing = &mut self.fragments[id.index()].constructs;
        existing.invocations = invocations;
        existing.declarations = declarations;
        let mut scratch = Constructs::default();
        scan_literals(&text, &mut scratch);
        existing.string_literals = scratch.string_literals;
        existing.number_literals = scratch.number_literals;
        existing.boolean_literals = scratch.boolean_literals;
    }
}

fn infer_leaf_kind(text: &str) -> LeafKind {
    let trimmed = text.trim_start();
    if trimmed.starts_with("return") {
        LeafKind::Return
    } else if trimmed.starts_with("break") {
        LeafKind::Break
    } else if trimmed.starts_with("continue") {
        LeafKind::Continue
    } else if trimmed.starts_with("throw") {
        LeafKind::Throw
    } else if scan_declaration(text).is_some_and(|d| !d.type_name.is_empty()) {
        LeafKind::VariableDeclaration
    } else {
        LeafKind::Statement
    }
}

/// Replace whole-token occurrences of parameter names with placeholders.
fn argumentize(text: &str, placeholders: &[(String, String)]) -> String {
    if placeholders.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut token = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() || c == '_' || c == '$' {
            token.push(c);
        } else {
            flush_token(&mut out, &mut token, placeholders);
            out.push(c);
        }
    }
    flush_token(&mut out, &mut token, placeholders);
    out
}

fn flush_token(out: &mut String, token: &mut String, placeholders: &[(String, String)]) {
    if token.is_empty() {
        return;
    }
    match placeholders.iter().find(|(name, _)| name == token) {
        Some((_, placeholder)) => out.push_str(placeholder),
        None => out.push_str(token),
    }
    token.clear();
}

fn scan_literals(text: &str, constructs: &mut Constructs) {
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                let mut end = None;
                for (j, d) in chars.by_ref() {
                    if d == '"' {
                        end = Some(j);
                        break;
                    }
                }
                if let Some(j) = end {
                    constructs.string_literals.push(text[i..=j].to_string());
                }
            }
            _ if c.is_ascii_digit() => {
                let prev_is_word = i > 0
                    && text[..i]
                        .chars()
                        .next_back()
                        .is_some_and(|p| p.is_alphanumeric() || p == '_');
                let mut literal = String::from(c);
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '.' || d == '_' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if !prev_is_word {
                    constructs.number_literals.push(literal);
                }
            }
            _ => {}
        }
    }
    let mut token = String::new();
    for c in text.chars().chain(std::iter::once(' ')) {
        if c.is_alphanumeric() || c == '_' {
            token.push(c);
        } else {
            if token == "true" || token == "false" {
                constructs.boolean_literals.push(token.clone());
            }
            token.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_body() -> Container {
        let mut b = BodyBuilder::new("count", "Widget").param("items", "List<String>");
        b.leaf("int total = 0;");
        b.open(CompositeKind::EnhancedFor, "for(String s : items)");
        b.expr(ExpressionRole::Condition, "items");
        b.open_block();
        b.leaf("total++;");
        b.close();
        b.close();
        b.leaf("return total;");
        b.finish()
    }

    mod structure {
        use super::*;

        #[test]
        fn depth_and_index_follow_nesting() {
            let container = simple_body();
            let arena = &container.body;
            let leaves = arena.leaves();
            assert_eq!(leaves.len(), 3);
            let decl = arena.get(leaves[0]);
            assert_eq!(decl.depth, 1);
            assert_eq!(decl.index, 0);
            let increment = arena.get(leaves[1]);
            assert_eq!(increment.depth, 3);
            let inner = arena.inner_nodes();
            assert_eq!(inner.len(), 2); // for + block
        }

        #[test]
        fn leaf_kinds_are_inferred() {
            let container = simple_body();
            let arena = &container.body;
            let leaves = arena.leaves();
            assert_eq!(
                arena.get(leaves[0]).kind,
                FragmentKind::Leaf(LeafKind::VariableDeclaration)
            );
            assert_eq!(arena.get(leaves[2]).kind, FragmentKind::Leaf(LeafKind::Return));
        }

        #[test]
        fn declarations_are_scanned() {
            let container = simple_body();
            let decls = container.variable_declarations();
            assert_eq!(decls.len(), 1);
            assert_eq!(decls[0].1.name, "total");
            assert_eq!(decls[0].1.initializer.as_deref(), Some("0"));
        }
    }

    mod argumentization {
        use super::*;

        #[test]
        fn parameter_names_become_placeholders() {
            let mut b = BodyBuilder::new("add", "Calc").param("value", "int");
            b.leaf("total += value;");
            let container = b.finish();
            let leaf = container.leaves()[0];
            assert_eq!(container.body.get(leaf).argumentized, "total += $p0;");
        }

        #[test]
        fn substrings_of_parameter_names_are_untouched() {
            let mut b = BodyBuilder::new("add", "Calc").param("value", "int");
            b.leaf("values.add(value);");
            let container = b.finish();
            let leaf = container.leaves()[0];
            assert_eq!(container.body.get(leaf).argumentized, "values.add($p0);");
        }
    }

    mod lambdas {
        use super::*;

        #[test]
        fn lambda_body_is_not_a_main_body_leaf() {
            let mut b = BodyBuilder::new("sum", "Calc");
            let carrier = b.leaf("xs.forEach(x -> total += x);");
            b.lambda(carrier, &["x"], |lb| {
                lb.leaf("total += x;");
            });
            let container = b.finish();
            assert_eq!(container.leaves().len(), 1);
            let lambda = &container.body.get(carrier).constructs.lambdas[0];
            assert_eq!(lambda.parameters, vec!["x"]);
            let inner = container.body.leaves_under(lambda.body);
            assert_eq!(inner.len(), 1);
            assert_eq!(container.body.get(inner[0]).text, "total += x;");
        }
    }

    mod hashing {
        use super::*;

        #[test]
        fn identical_bodies_hash_identically() {
            let a = simple_body();
            let b = simple_body();
            assert_eq!(a.body_hash(), b.body_hash());
        }

        #[test]
        fn different_bodies_hash_differently() {
            let a = simple_body();
            let mut builder = BodyBuilder::new("count", "Widget");
            builder.leaf("return 0;");
            let b = builder.finish();
            assert_ne!(a.body_hash(), b.body_hash());
        }
    }
}
