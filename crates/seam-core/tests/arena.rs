//! Arena and container integrity.

use seam_core::{BodyBuilder, CompositeKind, ExpressionRole, FragmentKind, LeafKind};

fn nested_body() -> seam_core::Container {
    let mut b = BodyBuilder::new("transfer", "Account")
        .param("amount", "long")
        .annotation("@Transactional");
    b.leaf("validate(amount);");
    b.open(CompositeKind::Try, "try");
    b.open_block();
    b.leaf("ledger.apply(amount);");
    b.close();
    b.open(CompositeKind::CatchClause, "catch(LedgerException e)");
    b.leaf("rollback();");
    b.close();
    b.open(CompositeKind::Finally, "finally");
    b.leaf("audit();");
    b.close();
    b.close();
    b.leaf("return true;");
    b.finish()
}

#[test]
fn traversals_follow_document_order() {
    let container = nested_body();
    let arena = &container.body;
    let leaf_texts: Vec<&str> = arena
        .leaves()
        .into_iter()
        .map(|id| arena.get(id).text.as_str())
        .collect();
    assert_eq!(
        leaf_texts,
        vec![
            "validate(amount);",
            "ledger.apply(amount);",
            "rollback();",
            "audit();",
            "return true;",
        ]
    );
    let inner_kinds: Vec<FragmentKind> = arena
        .inner_nodes()
        .into_iter()
        .map(|id| arena.get(id).kind)
        .collect();
    assert_eq!(
        inner_kinds,
        vec![
            FragmentKind::Composite(CompositeKind::Try),
            FragmentKind::Composite(CompositeKind::Block),
            FragmentKind::Composite(CompositeKind::CatchClause),
            FragmentKind::Composite(CompositeKind::Finally),
        ]
    );
}

#[test]
fn parent_chain_and_containment_agree() {
    let container = nested_body();
    let arena = &container.body;
    let apply = arena
        .leaves()
        .into_iter()
        .find(|&id| arena.get(id).text.starts_with("ledger"))
        .unwrap();
    let try_id = arena
        .inner_nodes()
        .into_iter()
        .find(|&id| arena.get(id).kind == FragmentKind::Composite(CompositeKind::Try))
        .unwrap();
    assert!(arena.is_ancestor(try_id, apply));
    assert!(arena.get(try_id).location.subsumes(&arena.get(apply).location));
    assert_eq!(arena.non_block_parent(apply), Some(try_id));
}

#[test]
fn string_sequence_skips_block_braces() {
    let container = nested_body();
    let arena = &container.body;
    let try_id = arena.inner_nodes()[0];
    let sequence = arena.string_sequence(try_id);
    assert!(sequence.contains(&"ledger.apply(amount);"));
    assert!(!sequence.contains(&"{"));
}

#[test]
fn argumentized_text_is_positional() {
    let container = nested_body();
    let arena = &container.body;
    let validate = container.leaves()[0];
    assert_eq!(arena.get(validate).argumentized, "validate($p0);");
}

#[test]
fn expression_fragments_do_not_count_as_statements() {
    let mut b = BodyBuilder::new("m", "T");
    b.open(CompositeKind::While, "while(running)");
    b.expr(ExpressionRole::Condition, "running");
    b.open_block();
    b.leaf("tick();");
    b.close();
    b.close();
    let container = b.finish();
    assert_eq!(container.statement_count(), 3); // while + block + tick
    let while_id = container.inner_nodes()[0];
    let exprs = &container.body.get(while_id).expressions;
    assert_eq!(exprs.len(), 1);
    assert!(container.body.get(exprs[0]).kind.is_expression());
}

#[test]
fn locations_round_trip_through_json() {
    let loc = seam_core::Location::new("a.src", 1, 2, 10, 20);
    let json = serde_json::to_string(&loc).unwrap();
    let back: seam_core::Location = serde_json::from_str(&json).unwrap();
    assert_eq!(loc, back);
}

#[test]
fn leaf_kind_inference_covers_control_leaves() {
    let mut b = BodyBuilder::new("m", "T");
    let ret = b.leaf("return x;");
    let brk = b.leaf("break;");
    let thr = b.leaf("throw new IllegalStateException();");
    let decl = b.leaf("long total = 0;");
    let plain = b.leaf("x++;");
    let container = b.finish();
    let kind = |id| container.body.get(id).kind;
    assert_eq!(kind(ret), FragmentKind::Leaf(LeafKind::Return));
    assert_eq!(kind(brk), FragmentKind::Leaf(LeafKind::Break));
    assert_eq!(kind(thr), FragmentKind::Leaf(LeafKind::Throw));
    assert_eq!(kind(decl), FragmentKind::Leaf(LeafKind::VariableDeclaration));
    assert_eq!(kind(plain), FragmentKind::Leaf(LeafKind::Statement));
}
