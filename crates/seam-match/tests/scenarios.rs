//! End-to-end matching scenarios.

mod support;

use seam_core::{BodyBuilder, CompositeKind, Container};
use seam_match::refactoring::Refactoring;
use seam_match::replacement::ReplacementKind;

// ----------------------------------------------------------------------
// Exact-body law
// ----------------------------------------------------------------------

fn return_body() -> Container {
    let mut b = BodyBuilder::new("increment", "Counter");
    b.leaf("return x + 1;");
    b.finish()
}

#[test]
fn identical_bodies_map_exactly_with_no_refactorings() {
    let before = return_body();
    let after = return_body();
    let session = support::run(&before, &after);

    assert_eq!(session.store().len(), 1);
    let mapping = session.mappings().next().unwrap();
    assert!(mapping.exact);
    assert!(mapping.replacements.is_empty());
    assert!(session.refactorings().is_empty());
    assert!(session.leftover_leaves_before().is_empty());
    assert!(session.leftover_leaves_after().is_empty());
}

// ----------------------------------------------------------------------
// Inline variable
// ----------------------------------------------------------------------

#[test]
fn eliminated_declaration_becomes_an_inline_variable() {
    let mut b = BodyBuilder::new("emit", "Sink");
    b.leaf("int y = compute();");
    b.leaf("use(y);");
    let before = b.finish();

    let mut b = BodyBuilder::new("emit", "Sink");
    b.leaf("use(compute());");
    let after = b.finish();

    let session = support::run(&before, &after);

    // The consuming statements map with a localized replacement.
    let consuming = session
        .mappings()
        .find(|m| m.replacements.iter().any(|r| r.before == "y"))
        .expect("consuming statement pair");
    assert!(!consuming.exact);

    // The eliminated declaration is referenced by an inline-variable
    // record, and the consuming pair carries a sub-expression mapping on
    // the inlined call.
    let inline = session
        .refactorings()
        .iter()
        .find_map(|r| match r {
            Refactoring::InlineVariable { name, declaration, references } => {
                Some((name.clone(), *declaration, references.clone()))
            }
            _ => None,
        })
        .expect("inline-variable record");
    assert_eq!(inline.0, "y");
    assert!(inline.2.contains(&consuming.id));
    assert!(session.leftover_leaves_before().contains(&inline.1));
    assert!(consuming.subexpressions.iter().any(|s| s.before == "compute()"));
}

// ----------------------------------------------------------------------
// If-chain reshaping
// ----------------------------------------------------------------------

fn chain_before() -> Container {
    let mut b = BodyBuilder::new("route", "Router");
    b.open(CompositeKind::If, "if(a)");
    b.open_block();
    b.leaf("logA();");
    b.close();
    b.open(CompositeKind::If, "if(b)");
    b.open_block();
    b.leaf("b1();");
    b.leaf("b2();");
    b.close();
    b.open_block();
    b.leaf("logC();");
    b.close();
    b.close();
    b.close();
    b.finish()
}

fn chain_after() -> Container {
    let mut b = BodyBuilder::new("route", "Router");
    b.open(CompositeKind::If, "if(a)");
    b.open_block();
    b.leaf("logA();");
    b.close();
    b.open(CompositeKind::If, "if(b && x)");
    b.open_block();
    b.leaf("b1();");
    b.close();
    b.open(CompositeKind::If, "if(b && !x)");
    b.open_block();
    b.leaf("b2();");
    b.close();
    b.open_block();
    b.leaf("logC();");
    b.close();
    b.close();
    b.close();
    b.close();
    b.finish()
}

#[test]
fn split_branch_chain_is_accepted_as_one_cluster() {
    let before = chain_before();
    let after = chain_after();
    let session = support::run(&before, &after);

    // Every composite mapping between chain members and branch bodies
    // belongs to one cluster.
    let clustered: Vec<_> = session
        .mappings()
        .filter(|m| m.cluster.is_some())
        .collect();
    assert!(
        clustered.len() >= 4,
        "expected the chain heads and branch bodies to cluster, got {}",
        clustered.len()
    );
    let cluster_id = clustered[0].cluster;
    assert!(clustered.iter().all(|m| m.cluster == cluster_id));

    // The redistribution is recorded as a split conditional.
    let split = session
        .refactorings()
        .iter()
        .find(|r| matches!(r, Refactoring::SplitConditional { .. }))
        .expect("split-conditional record");
    if let Refactoring::SplitConditional { before_condition, after_conditions, .. } = split {
        assert_eq!(before_condition, "if(b)");
        assert_eq!(after_conditions.len(), 2);
    }

    // The extra branch is absorbed, not left over.
    assert!(session.leftover_composites_after().is_empty());
}

// ----------------------------------------------------------------------
// Loop to pipeline
// ----------------------------------------------------------------------

#[test]
fn filtering_loop_rewritten_as_pipeline_is_one_aggregate_mapping() {
    let mut b = BodyBuilder::new("collect", "Gatherer");
    b.leaf("List<String> out = new ArrayList<>();");
    let loop_id = b.open(CompositeKind::EnhancedFor, "for(String s : items)");
    b.open_block();
    b.open(CompositeKind::If, "if(s.startsWith(prefix))");
    b.open_block();
    b.leaf("out.add(s);");
    b.close();
    b.close();
    b.close();
    b.close();
    b.leaf("return out;");
    let before = b.finish();

    let mut b = BodyBuilder::new("collect", "Gatherer");
    b.leaf("List<String> out = new ArrayList<>();");
    let pipeline_id =
        b.leaf("items.stream().filter(s -> s.startsWith(prefix)).forEach(s -> out.add(s));");
    b.lambda(pipeline_id, &["s"], |lb| {
        lb.leaf("out.add(s);");
    });
    b.leaf("return out;");
    let after = b.finish();

    let session = support::run(&before, &after);

    let aggregate = session
        .mappings()
        .find(|m| m.before == loop_id && m.after == pipeline_id)
        .expect("loop to pipeline mapping");
    assert_eq!(aggregate.replacements.len(), 1);
    assert_eq!(aggregate.replacements[0].kind, ReplacementKind::LoopWithPipeline);

    let record = session
        .refactorings()
        .iter()
        .find_map(|r| match r {
            Refactoring::ReplaceLoopWithPipeline {
                loop_fragment,
                pipeline_fragment,
                absorbed_before,
                absorbed_after,
            } => Some((*loop_fragment, *pipeline_fragment, absorbed_before.clone(), absorbed_after.clone())),
            _ => None,
        })
        .expect("loop-with-pipeline record");
    assert_eq!(record.0, loop_id);
    assert_eq!(record.1, pipeline_id);
    // Every statement inside the loop is absorbed on the before side, and
    // the lambda body statements on the after side.
    assert_eq!(record.2.len(), 2);
    assert_eq!(record.3.len(), 1);

    // The loop is explained: nothing of it stays in the leftovers.
    assert!(!session.leftover_composites_before().contains(&loop_id));
    assert!(!session.leftover_leaves_after().contains(&pipeline_id));
}

// ----------------------------------------------------------------------
// Switch to if conversion
// ----------------------------------------------------------------------

#[test]
fn switch_rewritten_as_if_chain_yields_an_aggregate_replacement() {
    let mut b = BodyBuilder::new("dispatch", "Machine");
    let switch_id = b.open(CompositeKind::Switch, "switch(mode)");
    b.open(CompositeKind::SwitchCase, "case READY:");
    b.leaf("start();");
    b.close();
    b.open(CompositeKind::SwitchCase, "case DONE:");
    b.leaf("stop();");
    b.close();
    b.close();
    let before = b.finish();

    let mut b = BodyBuilder::new("dispatch", "Machine");
    let if_id = b.open(CompositeKind::If, "if(mode == READY)");
    b.open_block();
    b.leaf("start();");
    b.close();
    b.open(CompositeKind::If, "if(mode == DONE)");
    b.open_block();
    b.leaf("stop();");
    b.close();
    b.close();
    b.close();
    let after = b.finish();

    let session = support::run(&before, &after);

    let mapping = session
        .mappings()
        .find(|m| m.before == switch_id && m.after == if_id)
        .expect("switch/if mapping");
    assert_eq!(mapping.replacements.len(), 1);
    assert_eq!(mapping.replacements[0].kind, ReplacementKind::SwitchCaseWithIf);

    let labels = session
        .refactorings()
        .iter()
        .find_map(|r| match r {
            Refactoring::ReplaceSwitchWithIf { case_labels, .. } => Some(case_labels.clone()),
            _ => None,
        })
        .expect("switch-with-if record");
    assert!(labels.contains(&"READY".to_string()));

    // The case bodies still map ordinarily.
    assert!(session.leftover_leaves_before().is_empty());
}

// ----------------------------------------------------------------------
// Assert rewrites and comment grouping
// ----------------------------------------------------------------------

#[test]
fn renamed_assertion_call_is_recorded() {
    let mut b = BodyBuilder::new("checks", "SuiteTest");
    b.leaf("assertEquals(expected, actual);");
    let before = b.finish();
    let mut b = BodyBuilder::new("checks", "SuiteTest");
    b.leaf("assertSame(expected, actual);");
    let after = b.finish();

    let session = support::run(&before, &after);
    let rewrite = session.refactorings().iter().find_map(|r| match r {
        Refactoring::AssertRewrite { before_call, after_call, .. } => {
            Some((before_call.clone(), after_call.clone()))
        }
        _ => None,
    });
    let (from, to) = rewrite.expect("assert-rewrite record");
    assert!(from.starts_with("assertEquals"));
    assert!(to.starts_with("assertSame"));
}

#[test]
fn identical_comments_soft_accept_a_zero_scoring_pair() {
    let mut b = BodyBuilder::new("tick", "Clock");
    let w1 = b.open(CompositeKind::While, "while(a)");
    b.open_block();
    b.leaf("pollSensors();");
    b.close();
    b.close();
    b.comment_on(w1, "drain the backlog before rollover");
    let before = b.finish();

    let mut b = BodyBuilder::new("tick", "Clock");
    let w2 = b.open(CompositeKind::While, "while(b)");
    b.open_block();
    b.leaf("flushBuffers();");
    b.close();
    b.close();
    b.comment_on(w2, "drain the backlog before rollover");
    let after = b.finish();

    let session = support::run(&before, &after);
    let mapping = session
        .mappings()
        .find(|m| m.before == w1 && m.after == w2)
        .expect("comment-justified mapping");
    assert!(!mapping.exact);
    assert!(session.refactorings().iter().any(|r| matches!(
        r,
        Refactoring::CommentGroupedMapping { comment, .. } if comment == "drain the backlog before rollover"
    )));
}

// ----------------------------------------------------------------------
// Oversized-body guard
// ----------------------------------------------------------------------

#[test]
fn oversized_differing_bodies_skip_matching_without_error() {
    let mut b = BodyBuilder::new("bulk", "Generated");
    for i in 0..2100 {
        b.leaf(format!("alpha{i}();"));
    }
    let before = b.finish();

    let mut b = BodyBuilder::new("bulk", "Generated");
    for i in 0..2100 {
        b.leaf(format!("beta{i}();"));
    }
    let after = b.finish();

    let session = support::run(&before, &after);
    assert!(session.store().is_empty());
    assert_eq!(session.leftover_leaves_before().len(), 2100);
    assert_eq!(session.leftover_leaves_after().len(), 2100);
}

#[test]
fn oversized_identical_bodies_still_match() {
    let build = || {
        let mut b = BodyBuilder::new("bulk", "Generated");
        for i in 0..2100 {
            b.leaf(format!("alpha{i}();"));
        }
        b.finish()
    };
    let before = build();
    let after = build();
    let session = support::run(&before, &after);
    assert_eq!(session.store().len(), 2100);
}
