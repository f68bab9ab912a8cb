//! The replacement finder.
//!
//! Given two candidate fragments, compute the set of localized typed
//! differences that explains one as a changed version of the other, or
//! report that no viable correspondence exists. "No correspondence" is a
//! normal result, not an error.
//!
//! The finder aligns the two token streams with an LCS, then classifies
//! every mismatched region pair into a replacement kind. A pair whose
//! regions cannot all be classified, that shares no identifier anchor, or
//! whose overall distance exceeds the configured ratio is rejected.

use crate::config::MatchConfig;
use crate::replacement::{Replacement, ReplacementKind};
use crate::text::{complement_operator, normalized_distance, tokenize, Token, TokenKind};

/// One side of a candidate pair as the finder sees it: session-substituted
/// text plus the argumentized form.
#[derive(Debug, Clone, Copy)]
pub struct FinderInput<'a> {
    pub text: &'a str,
    pub argumentized: &'a str,
    /// Whether the fragment is a condition-role sub-expression; condition
    /// rewrites classify as `Conditional` instead of `Argument`.
    pub is_condition: bool,
}

impl<'a> FinderInput<'a> {
    pub fn new(text: &'a str, argumentized: &'a str) -> Self {
        FinderInput {
            text,
            argumentized,
            is_condition: false,
        }
    }

    pub fn condition(text: &'a str, argumentized: &'a str) -> Self {
        FinderInput {
            text,
            argumentized,
            is_condition: true,
        }
    }
}

/// Result of a successful finder run.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundReplacements {
    pub replacements: Vec<Replacement>,
    /// True when the pair matched on identical text (possibly after
    /// argumentization) and the set is empty.
    pub exact: bool,
    /// Normalized edit distance between the two texts.
    pub distance: f64,
}

/// Compute the replacement set transforming `before` into `after`.
pub fn find_replacements(
    before: FinderInput<'_>,
    after: FinderInput<'_>,
    config: &MatchConfig,
) -> Option<FoundReplacements> {
    if before.text == after.text || before.argumentized == after.argumentized {
        return Some(FoundReplacements {
            replacements: Vec::new(),
            exact: true,
            distance: 0.0,
        });
    }

    let distance = normalized_distance(before.text, after.text);
    let tokens_before = tokenize(before.text);
    let tokens_after = tokenize(after.text);
    let regions = diff_regions(&tokens_before, &tokens_after);
    if regions.is_empty() {
        // Token streams agree but raw texts differ (whitespace only).
        return Some(FoundReplacements {
            replacements: Vec::new(),
            exact: true,
            distance,
        });
    }

    // Reject pairs with no shared identifier anchor: a replacement must be
    // localized inside an otherwise-matched fragment.
    let changed: usize = regions.iter().map(|r| r.before.len() + r.after.len()).sum();
    let common = tokens_before.len() + tokens_after.len() - changed;
    if !has_identifier_anchor(&tokens_before, &tokens_after, &regions) || common == 0 {
        return None;
    }

    // The change must stay localized: the side that kept more of its text
    // anchors the pair, and a pure insertion may not dominate its side
    // (that shape is a structural move, not a replacement).
    let chars = |ts: &[Token]| ts.iter().map(|t| t.text.chars().count()).sum::<usize>();
    let total_b = chars(&tokens_before).max(1);
    let total_a = chars(&tokens_after).max(1);
    let changed_b: usize = regions.iter().map(|r| chars(r.before)).sum();
    let changed_a: usize = regions.iter().map(|r| chars(r.after)).sum();
    let ratio_b = changed_b as f64 / total_b as f64;
    let ratio_a = changed_a as f64 / total_a as f64;
    if ratio_b.min(ratio_a) > config.max_replacement_ratio {
        return None;
    }
    for region in &regions {
        if region.before.is_empty()
            && chars(region.after) as f64 / total_a as f64 > config.max_replacement_ratio
        {
            return None;
        }
        if region.after.is_empty()
            && chars(region.before) as f64 / total_b as f64 > config.max_replacement_ratio
        {
            return None;
        }
    }

    let mut replacements: Vec<Replacement> = Vec::new();
    for region in &regions {
        let replacement = classify_region(region, before.is_condition || after.is_condition)?;
        if !replacements.contains(&replacement) {
            replacements.push(replacement);
        }
    }
    Some(FoundReplacements {
        replacements,
        exact: false,
        distance,
    })
}

/// A maximal run of mismatched tokens on both sides between two LCS
/// anchors.
#[derive(Debug)]
struct Region<'a> {
    before: &'a [Token],
    after: &'a [Token],
}

fn diff_regions<'a>(before: &'a [Token], after: &'a [Token]) -> Vec<Region<'a>> {
    let common = lcs_pairs(before, after);
    let mut regions = Vec::new();
    let mut bi = 0usize;
    let mut ai = 0usize;
    for &(cb, ca) in &common {
        if cb > bi || ca > ai {
            regions.push(Region {
                before: &before[bi..cb],
                after: &after[ai..ca],
            });
        }
        bi = cb + 1;
        ai = ca + 1;
    }
    if bi < before.len() || ai < after.len() {
        regions.push(Region {
            before: &before[bi..],
            after: &after[ai..],
        });
    }
    regions
}

/// Indices of an LCS over tokens. Tokens match on text AND paren depth,
/// so punctuation at different nesting levels never anchors the diff.
fn lcs_pairs(before: &[Token], after: &[Token]) -> Vec<(usize, usize)> {
    let same = |a: &Token, b: &Token| a.text == b.text && a.depth == b.depth;
    let n = before.len();
    let m = after.len();
    let mut table = vec![0u32; (n + 1) * (m + 1)];
    let at = |i: usize, j: usize| i * (m + 1) + j;
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[at(i, j)] = if same(&before[i], &after[j]) {
                table[at(i + 1, j + 1)] + 1
            } else {
                table[at(i + 1, j)].max(table[at(i, j + 1)])
            };
        }
    }
    let mut out = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < n && j < m {
        if same(&before[i], &after[j]) {
            out.push((i, j));
            i += 1;
            j += 1;
        } else if table[at(i + 1, j)] >= table[at(i, j + 1)] {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

fn has_identifier_anchor(before: &[Token], after: &[Token], regions: &[Region<'_>]) -> bool {
    let changed_before: usize = regions.iter().map(|r| r.before.len()).sum();
    let ident_before = before.iter().filter(|t| t.kind == TokenKind::Identifier).count();
    let changed_idents: usize = regions
        .iter()
        .flat_map(|r| r.before.iter())
        .filter(|t| t.kind == TokenKind::Identifier)
        .count();
    // At least one identifier (or the whole statement shape) must survive.
    ident_before > changed_idents || (ident_before == 0 && changed_before < before.len())
}

fn classify_region(region: &Region<'_>, in_condition: bool) -> Option<Replacement> {
    let b = region.before;
    let a = region.after;

    // A bare negation appearing or disappearing inverts the condition.
    if (b.is_empty() && is_lone_negation(a)) || (a.is_empty() && is_lone_negation(b)) {
        return Some(Replacement::new(
            ReplacementKind::InvertConditional,
            join_tokens(b),
            join_tokens(a),
        ));
    }

    if b.len() == 1 && a.len() == 1 {
        return Some(classify_single(&b[0], &a[0]));
    }

    if in_condition {
        return Some(Replacement::new(
            ReplacementKind::Conditional,
            join_tokens(b),
            join_tokens(a),
        ));
    }

    // Any remaining region swaps as one expression; the anchor and ratio
    // guards upstream keep this honest.
    Some(Replacement::new(
        ReplacementKind::Argument,
        join_tokens(b),
        join_tokens(a),
    ))
}

fn classify_single(b: &Token, a: &Token) -> Replacement {
    let make = |kind| Replacement::new(kind, b.text.clone(), a.text.clone());
    match (b.kind, a.kind) {
        (TokenKind::Identifier, TokenKind::Identifier) => {
            if b.text == "null" || a.text == "null" {
                make(ReplacementKind::NullLiteral)
            } else if is_boolean(&b.text) && is_boolean(&a.text) {
                make(ReplacementKind::BooleanLiteral)
            } else if b.is_call_name() && a.is_call_name() {
                make(ReplacementKind::MethodInvocationName)
            } else if is_type_name(&b.text) && is_type_name(&a.text) {
                make(ReplacementKind::Type)
            } else {
                make(ReplacementKind::VariableName)
            }
        }
        (TokenKind::Number, TokenKind::Number) => make(ReplacementKind::NumberLiteral),
        (TokenKind::Str, TokenKind::Str) => make(ReplacementKind::StringLiteral),
        (TokenKind::Operator, TokenKind::Operator) => {
            if complement_operator(&b.text) == Some(a.text.as_str()) {
                make(ReplacementKind::InvertConditional)
            } else {
                make(ReplacementKind::InfixOperator)
            }
        }
        _ => {
            if b.text == "null" || a.text == "null" {
                make(ReplacementKind::NullLiteral)
            } else if b.depth >= 1 && a.depth >= 1 {
                make(ReplacementKind::Argument)
            } else {
                make(ReplacementKind::VariableName)
            }
        }
    }
}

fn is_lone_negation(tokens: &[Token]) -> bool {
    tokens.len() == 1 && tokens[0].text == "!"
}

fn is_boolean(s: &str) -> bool {
    s == "true" || s == "false"
}

fn is_type_name(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_uppercase())
}

/// Join tokens back into readable text: a space only between two
/// word-like tokens.
fn join_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut prev_word = false;
    for t in tokens {
        let word = matches!(t.kind, TokenKind::Identifier | TokenKind::Number | TokenKind::Str);
        if word && prev_word {
            out.push(' ');
        }
        out.push_str(&t.text);
        prev_word = word;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(before: &str, after: &str) -> Option<FoundReplacements> {
        let config = MatchConfig::default();
        find_replacements(
            FinderInput::new(before, before),
            FinderInput::new(after, after),
            &config,
        )
    }

    mod exact {
        use super::*;

        #[test]
        fn identical_texts_are_exact_with_no_replacements() {
            let found = find("return x + 1;", "return x + 1;").unwrap();
            assert!(found.exact);
            assert!(found.replacements.is_empty());
        }

        #[test]
        fn argumentized_identity_counts_as_exact() {
            let config = MatchConfig::default();
            let found = find_replacements(
                FinderInput::new("emit(first);", "emit($p0);"),
                FinderInput::new("emit(start);", "emit($p0);"),
                &config,
            )
            .unwrap();
            assert!(found.exact);
        }
    }

    mod variables {
        use super::*;

        #[test]
        fn single_variable_rename() {
            let found = find("int count = items.size();", "int total = items.size();").unwrap();
            assert_eq!(found.replacements.len(), 1);
            let r = &found.replacements[0];
            assert_eq!(r.kind, ReplacementKind::VariableName);
            assert_eq!(r.before, "count");
            assert_eq!(r.after, "total");
        }

        #[test]
        fn variable_replaced_with_call_is_an_argument_swap() {
            let found = find("use(y);", "use(compute());").unwrap();
            assert_eq!(found.replacements.len(), 1);
            let r = &found.replacements[0];
            assert_eq!(r.before, "y");
            assert_eq!(r.after, "compute()");
        }
    }

    mod literals_and_operators {
        use super::*;

        #[test]
        fn number_literal_change() {
            let found = find("retry(3);", "retry(5);").unwrap();
            assert_eq!(found.replacements[0].kind, ReplacementKind::NumberLiteral);
        }

        #[test]
        fn complemented_operator_is_an_inversion() {
            let found = find("done = a == b;", "done = a != b;").unwrap();
            assert_eq!(found.replacements[0].kind, ReplacementKind::InvertConditional);
        }

        #[test]
        fn plain_operator_change() {
            let found = find("x = a + b;", "x = a - b;").unwrap();
            assert_eq!(found.replacements[0].kind, ReplacementKind::InfixOperator);
        }

        #[test]
        fn negation_prefix_is_an_inversion() {
            let config = MatchConfig::default();
            let found = find_replacements(
                FinderInput::condition("valid", "valid"),
                FinderInput::condition("!valid", "!valid"),
                &config,
            )
            .unwrap();
            assert_eq!(found.replacements[0].kind, ReplacementKind::InvertConditional);
        }
    }

    mod rejection {
        use super::*;

        #[test]
        fn unrelated_statements_have_no_correspondence() {
            assert!(find("return widget.render();", "log.warn(state);").is_none());
        }

        #[test]
        fn wholesale_rewrites_are_rejected() {
            assert!(find("a.b();", "somethingEntirelyDifferent(x, y, z);").is_none());
        }

        #[test]
        fn dominating_insertion_is_not_a_replacement() {
            // The whole pipeline swallowing a small statement is a
            // structural move, handled elsewhere.
            assert!(find(
                "out.add(s);",
                "items.stream().filter(s -> s.startsWith(p)).forEach(s -> out.add(s));",
            )
            .is_none());
        }
    }
}
