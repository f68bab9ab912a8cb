//! Structural-move pattern recognition.
//!
//! Pure classifiers over fragments: if/else-if chains, switch↔if
//! correspondence, and loop↔pipeline correspondence. The session applies
//! them during the revision phase and accepts whole related sets
//! atomically; nothing here mutates state.

use seam_core::{BodyArena, CompositeKind, Fragment, FragmentId, FragmentKind};

use crate::text::{contains_token, replace_token};

/// Pipeline stage names recognized on a call chain.
const PIPELINE_STAGES: &[&str] = &[
    "stream",
    "parallelStream",
    "filter",
    "map",
    "mapToInt",
    "mapToObj",
    "flatMap",
    "distinct",
    "sorted",
    "limit",
    "forEach",
    "collect",
    "reduce",
    "anyMatch",
    "allMatch",
    "noneMatch",
    "count",
    "removeIf",
    "toList",
];

/// A recognized collection pipeline carried by a leaf.
#[derive(Debug, Clone)]
pub struct PipelineShape {
    /// Receiver collection expression, if present.
    pub receiver: Option<String>,
    /// Names of the chain's stages, in call order.
    pub stages: Vec<String>,
    /// Lambda parameters bound anywhere in the pipeline.
    pub bound_parameters: Vec<String>,
}

/// Recognize a chained collection pipeline on a leaf.
pub fn pipeline_shape(fragment: &Fragment) -> Option<PipelineShape> {
    let invocation = fragment.constructs.covering_invocation()?;
    let stage_hits = invocation
        .chain
        .iter()
        .filter(|s| PIPELINE_STAGES.contains(&s.name.as_str()))
        .count();
    if stage_hits == 0 {
        return None;
    }
    if invocation.chain.len() == 1 && !matches!(invocation.chain[0].name.as_str(), "forEach" | "removeIf") {
        return None;
    }
    let mut bound = Vec::new();
    for lambda in &fragment.constructs.lambdas {
        for p in &lambda.parameters {
            if !bound.contains(p) {
                bound.push(p.clone());
            }
        }
    }
    // Fall back to `x ->` shapes in the argument texts when the model did
    // not materialize lambda bodies.
    for stage in &invocation.chain {
        for arg in &stage.arguments {
            if let Some(pos) = arg.find("->") {
                let param = arg[..pos].trim().trim_matches(['(', ')']).trim();
                if !param.is_empty()
                    && param.chars().all(|c| c.is_alphanumeric() || c == '_')
                    && !bound.contains(&param.to_string())
                {
                    bound.push(param.to_string());
                }
            }
        }
    }
    Some(PipelineShape {
        receiver: invocation.receiver.clone(),
        stages: invocation.chain.iter().map(|s| s.name.clone()).collect(),
        bound_parameters: bound,
    })
}

/// Iteration variables of a loop composite, from its header text.
pub fn loop_variables(fragment: &Fragment) -> Vec<String> {
    let text = fragment.text.as_str();
    match fragment.kind {
        FragmentKind::Composite(CompositeKind::EnhancedFor) => {
            // for(T x : iterable)
            match text.find(':') {
                Some(colon) => {
                    let head = text[..colon].trim_end();
                    head.rsplit([' ', '('])
                        .next()
                        .filter(|v| !v.is_empty())
                        .map(|v| vec![v.to_string()])
                        .unwrap_or_default()
                }
                None => Vec::new(),
            }
        }
        FragmentKind::Composite(CompositeKind::For) => {
            // for(init; cond; update) — the declared/assigned init variable.
            let inner = text
                .trim_start_matches("for")
                .trim()
                .trim_start_matches('(')
                .trim_end_matches(')');
            let init = inner.split(';').next().unwrap_or("");
            match seam_core::constructs::scan_declaration(init) {
                Some(decl) => vec![decl.name],
                None => init
                    .split('=')
                    .next()
                    .map(|lhs| lhs.trim().rsplit(' ').next().unwrap_or("").to_string())
                    .filter(|v| !v.is_empty())
                    .map(|v| vec![v])
                    .unwrap_or_default(),
            }
        }
        FragmentKind::Composite(CompositeKind::While | CompositeKind::DoWhile) => {
            // Identifiers of the condition, in order.
            crate::text::tokenize(text)
                .into_iter()
                .filter(|t| {
                    t.kind == crate::text::TokenKind::Identifier && t.text != "while" && t.text != "do"
                })
                .map(|t| t.text)
                .collect()
        }
        _ => Vec::new(),
    }
}

/// Whether every pipeline stage is justified by content inside the loop
/// body, with the pipeline's bound parameters substituted by the loop's
/// iteration variables.
pub fn pipeline_stages_justified(
    pipeline: &Fragment,
    shape: &PipelineShape,
    loop_arena: &BodyArena,
    loop_fragment: FragmentId,
    loop_vars: &[String],
) -> bool {
    let body_statements: Vec<&str> = loop_arena.string_sequence(loop_fragment);
    let invocation = match pipeline.constructs.covering_invocation() {
        Some(inv) => inv,
        None => return false,
    };
    invocation.chain.iter().all(|stage| {
        if stage.arguments.is_empty() {
            // stream(), count(), distinct(): no content to justify.
            return true;
        }
        stage.arguments.iter().all(|arg| {
            let payload = match arg.find("->") {
                Some(pos) => arg[pos + 2..].trim(),
                None => arg.trim(),
            };
            let payload = payload.trim_matches(['{', '}', '(', ')']).trim();
            if payload.is_empty() {
                return true;
            }
            body_statements.iter().any(|statement| {
                if statement.contains(payload) {
                    return true;
                }
                shape.bound_parameters.iter().any(|param| {
                    loop_vars.iter().any(|var| {
                        let substituted = replace_token(payload, param, var);
                        statement.contains(&substituted)
                    })
                })
            })
        })
    })
}

/// The members of an if/else-if chain starting at `head`: the head plus
/// every `If` hanging in else position, in order.
pub fn if_chain(arena: &BodyArena, head: FragmentId) -> Vec<FragmentId> {
    let mut chain = Vec::new();
    let mut cur = head;
    loop {
        chain.push(cur);
        let fragment = arena.get(cur);
        if fragment.kind != FragmentKind::Composite(CompositeKind::If) {
            break;
        }
        // Children of an if: [then, else?]; an else-if hangs as the second
        // child, directly or under a block.
        match fragment.children.get(1) {
            Some(&next) => {
                let next_fragment = arena.get(next);
                if next_fragment.kind == FragmentKind::Composite(CompositeKind::If) {
                    cur = next;
                } else if next_fragment.is_block()
                    && next_fragment.children.len() == 1
                    && arena.get(next_fragment.children[0]).kind
                        == FragmentKind::Composite(CompositeKind::If)
                {
                    cur = next_fragment.children[0];
                } else {
                    break;
                }
            }
            None => break,
        }
    }
    chain
}

/// Branch bodies of an if/else-if chain: each member's then-branch plus
/// the final else branch when it is not another if.
pub fn chain_branches(arena: &BodyArena, chain: &[FragmentId]) -> Vec<FragmentId> {
    let mut branches = Vec::new();
    for (i, &member) in chain.iter().enumerate() {
        let fragment = arena.get(member);
        if fragment.kind != FragmentKind::Composite(CompositeKind::If) {
            branches.push(member);
            continue;
        }
        if let Some(&then) = fragment.children.first() {
            branches.push(then);
        }
        if i == chain.len() - 1 {
            if let Some(&last) = fragment.children.get(1) {
                if arena.get(last).kind != FragmentKind::Composite(CompositeKind::If) {
                    branches.push(last);
                }
            }
        }
    }
    branches
}

/// Switch↔if correspondence: the if condition must contain the switch
/// discriminant and embed at least one case label inside an equality
/// comparison. Returns the matched labels.
pub fn switch_if_labels(switch: &Fragment, arena: &BodyArena, if_fragment: &Fragment) -> Option<Vec<String>> {
    let discriminant = switch_discriminant(&switch.text)?;
    let condition = &if_fragment.text;
    if !contains_token(condition, &discriminant) {
        return None;
    }
    let mut matched = Vec::new();
    for &child in &switch.children {
        let case = arena.get(child);
        if case.kind != FragmentKind::Composite(CompositeKind::SwitchCase) {
            continue;
        }
        if let Some(label) = case_label(&case.text) {
            if label_in_equality(condition, &label) && !matched.contains(&label) {
                matched.push(label);
            }
        }
    }
    if matched.is_empty() {
        None
    } else {
        Some(matched)
    }
}

fn switch_discriminant(text: &str) -> Option<String> {
    let open = text.find('(')?;
    let close = text.rfind(')')?;
    let inside = text.get(open + 1..close)?.trim();
    if inside.is_empty() {
        None
    } else {
        Some(inside.to_string())
    }
}

fn case_label(text: &str) -> Option<String> {
    let rest = text.trim().strip_prefix("case")?.trim();
    let label = rest.trim_end_matches(':').trim();
    if label.is_empty() {
        None
    } else {
        Some(label.to_string())
    }
}

fn label_in_equality(condition: &str, label: &str) -> bool {
    condition.contains(&format!("== {label}"))
        || condition.contains(&format!("{label} =="))
        || condition.contains(&format!("=={label}"))
        || condition.contains(&format!("{label}=="))
        || condition.contains(&format!(".equals({label})"))
        || condition.contains(&format!("{label}.equals"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use seam_core::{BodyBuilder, CompositeKind};

    mod pipelines {
        use super::*;

        #[test]
        fn chained_stream_call_is_a_pipeline() {
            let mut b = BodyBuilder::new("m", "T");
            let leaf = b.leaf("items.stream().filter(s -> !s.isEmpty()).forEach(s -> out.add(s));");
            let container = b.finish();
            let shape = pipeline_shape(container.body.get(leaf)).unwrap();
            assert_eq!(shape.stages, vec!["stream", "filter", "forEach"]);
            assert_eq!(shape.bound_parameters, vec!["s"]);
            assert_eq!(shape.receiver.as_deref(), Some("items"));
        }

        #[test]
        fn ordinary_call_is_not_a_pipeline() {
            let mut b = BodyBuilder::new("m", "T");
            let leaf = b.leaf("helper.process(x);");
            let container = b.finish();
            assert!(pipeline_shape(container.body.get(leaf)).is_none());
        }
    }

    mod loops {
        use super::*;

        #[test]
        fn enhanced_for_variable() {
            let mut b = BodyBuilder::new("m", "T");
            b.open(CompositeKind::EnhancedFor, "for(String s : items)");
            b.open_block();
            b.leaf("use(s);");
            b.close();
            b.close();
            let container = b.finish();
            let loop_id = container.inner_nodes()[0];
            assert_eq!(loop_variables(container.body.get(loop_id)), vec!["s"]);
        }

        #[test]
        fn classic_for_variable() {
            let mut b = BodyBuilder::new("m", "T");
            b.open(CompositeKind::For, "for(int i = 0; i < n; i++)");
            b.open_block();
            b.leaf("use(i);");
            b.close();
            b.close();
            let container = b.finish();
            let loop_id = container.inner_nodes()[0];
            assert_eq!(loop_variables(container.body.get(loop_id)), vec!["i"]);
        }
    }

    mod chains {
        use super::*;

        #[test]
        fn else_if_chain_is_collected_in_order() {
            let mut b = BodyBuilder::new("m", "T");
            let head = b.open(CompositeKind::If, "if(a)");
            b.open_block();
            b.leaf("one();");
            b.close();
            let second = b.open(CompositeKind::If, "if(b)");
            b.open_block();
            b.leaf("two();");
            b.close();
            b.open_block();
            b.leaf("three();");
            b.close();
            b.close();
            b.close();
            let container = b.finish();
            let chain = if_chain(&container.body, head);
            assert_eq!(chain, vec![head, second]);
            let branches = chain_branches(&container.body, &chain);
            assert_eq!(branches.len(), 3);
        }
    }

    mod switches {
        use super::*;

        #[test]
        fn case_label_embedded_in_equality() {
            let mut b = BodyBuilder::new("m", "T");
            let switch = b.open(CompositeKind::Switch, "switch(mode)");
            b.open(CompositeKind::SwitchCase, "case READY:");
            b.leaf("start();");
            b.close();
            b.close();
            let before = b.finish();

            let mut b = BodyBuilder::new("m", "T");
            let if_id = b.open(CompositeKind::If, "if(mode == READY)");
            b.open_block();
            b.leaf("start();");
            b.close();
            b.close();
            let after = b.finish();

            let labels = switch_if_labels(
                before.body.get(switch),
                &before.body,
                after.body.get(if_id),
            )
            .unwrap();
            assert_eq!(labels, vec!["READY"]);
        }
    }
}
