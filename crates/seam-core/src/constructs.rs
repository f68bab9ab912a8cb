//! Leaf constructs: the nested entities a fragment may reference.
//!
//! Leaves have no statement children, but they can reference invocations,
//! variable declarations, literals, lambda bodies, and comments. Heuristics
//! in the matching engine read these; nothing here is mutated after build.

use serde::{Deserialize, Serialize};

use crate::fragment::FragmentId;

/// One stage of a method-call chain, e.g. `filter(p)` in
/// `xs.stream().filter(p).collect(c)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStage {
    /// Invoked name.
    pub name: String,
    /// Argument texts, outermost commas only.
    pub arguments: Vec<String>,
}

/// A method invocation or object creation referenced by a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    /// Receiver expression text, if any (`xs` in `xs.add(e)`).
    pub receiver: Option<String>,
    /// Invoked name (the last stage's name for a chain).
    pub name: String,
    /// Argument texts of the last stage.
    pub arguments: Vec<String>,
    /// Whether this is an object creation rather than a call.
    pub is_creation: bool,
    /// Whether the invocation covers the entire fragment text
    /// (modulo assignment target and trailing terminator).
    pub covers_fragment: bool,
    /// The full dotted chain, in call order. A plain call has one stage.
    pub chain: Vec<ChainStage>,
}

impl Invocation {
    /// Names of every stage in the chain, in call order.
    pub fn chain_names(&self) -> Vec<&str> {
        self.chain.iter().map(|s| s.name.as_str()).collect()
    }
}

/// A local variable declaration inside a leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDeclaration {
    /// Declared name.
    pub name: String,
    /// Declared type text, empty when inferred.
    pub type_name: String,
    /// Initializer expression text, if present.
    pub initializer: Option<String>,
}

/// A comment attached to (embedded within) a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Comment text without delimiters, trimmed.
    pub text: String,
}

/// A lambda or anonymous-class body carried by a leaf.
///
/// The body fragments live in the same arena as the carrier leaf, rooted at
/// a `LambdaBody` composite that is reachable only through this reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lambda {
    /// Bound parameter names.
    pub parameters: Vec<String>,
    /// Root of the body subtree in the owning arena.
    pub body: FragmentId,
}

/// All constructs referenced by one fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constructs {
    pub invocations: Vec<Invocation>,
    pub declarations: Vec<VariableDeclaration>,
    pub string_literals: Vec<String>,
    pub number_literals: Vec<String>,
    pub boolean_literals: Vec<String>,
    pub comments: Vec<Comment>,
    pub lambdas: Vec<Lambda>,
}

impl Constructs {
    /// The invocation covering the entire fragment, if one exists.
    pub fn covering_invocation(&self) -> Option<&Invocation> {
        self.invocations.iter().find(|inv| inv.covers_fragment)
    }
}

/// Scan a normalized statement text for invocation chains.
///
/// This is model-provider work: the engine only reads the result. The
/// scanner recognizes `recv.a(x).b(y)` shapes at the top paren level and
/// records each stage with its outermost-comma argument split.
pub fn scan_invocations(text: &str) -> Vec<Invocation> {
    let trimmed = text.trim().trim_end_matches(';').trim();
    // Strip an assignment target or declaration prefix so the right-hand
    // side chain still counts as covering the fragment.
    let (stripped, had_prefix) = match split_top_level(trimmed, '=') {
        Some((_, rhs)) => (rhs.trim(), true),
        None => (trimmed, false),
    };
    let mut out = Vec::new();
    if let Some(chain) = scan_chain(stripped) {
        let last = chain.last().cloned();
        if let Some(last) = last {
            let receiver = receiver_text(stripped, &chain);
            out.push(Invocation {
                receiver,
                name: last.name,
                arguments: last.arguments,
                is_creation: stripped.starts_with("new "),
                covers_fragment: chain_covers(stripped, had_prefix),
                chain,
            });
        }
    }
    out
}

/// Parse a declaration of the shape `type name = initializer` (terminator
/// already normalized away by the caller or left trailing).
pub fn scan_declaration(text: &str) -> Option<VariableDeclaration> {
    let trimmed = text.trim().trim_end_matches(';').trim();
    let (lhs, rhs) = match split_top_level(trimmed, '=') {
        Some((l, r)) => (l.trim(), Some(r.trim().to_string())),
        None => (trimmed, None),
    };
    let mut parts = lhs.rsplitn(2, char::is_whitespace);
    let name = parts.next()?.trim();
    let type_name = parts.next().unwrap_or("").trim();
    if name.is_empty() || !is_identifier(name) || !is_type_text(type_name) {
        return None;
    }
    Some(VariableDeclaration {
        name: name.to_string(),
        type_name: type_name.to_string(),
        initializer: rhs,
    })
}

fn is_type_text(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '<' | '>' | '[' | ']' | ',' | '.' | ' '))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Split at the first top-level (paren depth 0) occurrence of `sep` that is
/// not part of a two-character operator.
fn split_top_level(text: &str, sep: char) -> Option<(&str, &str)> {
    let bytes = text.as_bytes();
    let mut depth = 0u32;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ if c == sep && depth == 0 => {
                let prev = if i > 0 { bytes[i - 1] } else { b' ' };
                let next = bytes.get(i + 1).copied().unwrap_or(b' ');
                if sep == '='
                    && (matches!(prev, b'=' | b'!' | b'<' | b'>' | b'+' | b'-' | b'*' | b'/')
                        || next == b'=')
                {
                    continue;
                }
                return Some((&text[..i], &text[i + 1..]));
            }
            _ => {}
        }
    }
    None
}

fn scan_chain(expr: &str) -> Option<Vec<ChainStage>> {
    let mut stages = Vec::new();
    let mut rest = expr;
    if let Some(stripped) = rest.strip_prefix("new ") {
        rest = stripped;
    }
    loop {
        let open = find_top_level_call(rest)?;
        let (name_part, after_name) = rest.split_at(open);
        let name = name_part
            .rsplit(['.', ' '])
            .next()
            .unwrap_or(name_part)
            .trim()
            .to_string();
        let close = matching_paren(after_name)?;
        let args_text = &after_name[1..close];
        stages.push(ChainStage {
            name,
            arguments: split_arguments(args_text),
        });
        let tail = &after_name[close + 1..];
        if let Some(next) = tail.strip_prefix('.') {
            rest = next;
        } else {
            return if tail.trim().is_empty() { Some(stages) } else { None };
        }
    }
}

/// Byte index of the first `(` at top level.
fn find_top_level_call(expr: &str) -> Option<usize> {
    let mut depth = 0u32;
    for (i, c) in expr.char_indices() {
        match c {
            '(' if depth == 0 => return Some(i),
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    None
}

/// Byte index of the `)` matching the `(` at index 0.
fn matching_paren(text: &str) -> Option<usize> {
    let mut depth = 0u32;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split argument text at top-level commas.
pub fn split_arguments(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0u32;
    let mut start = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' | '<' => depth += 1,
            ')' | ']' | '}' | '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                let arg = text[start..i].trim();
                if !arg.is_empty() {
                    out.push(arg.to_string());
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = text[start..].trim();
    if !last.is_empty() {
        out.push(last.to_string());
    }
    out
}

fn receiver_text(expr: &str, chain: &[ChainStage]) -> Option<String> {
    let first = chain.first()?;
    let needle = format!("{}(", first.name);
    let name_pos = expr.find(&needle)?;
    if name_pos == 0 {
        return None;
    }
    let recv = expr[..name_pos].trim_end_matches('.').trim();
    if recv.is_empty() {
        None
    } else {
        Some(recv.to_string())
    }
}

fn chain_covers(expr: &str, _had_prefix: bool) -> bool {
    // The chain scanner already consumed the whole expression if it
    // succeeded; a trailing non-empty tail returns None upstream.
    !expr.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    mod invocation_scanning {
        use super::*;

        #[test]
        fn plain_call() {
            let invs = scan_invocations("compute();");
            assert_eq!(invs.len(), 1);
            assert_eq!(invs[0].name, "compute");
            assert!(invs[0].covers_fragment);
            assert!(invs[0].arguments.is_empty());
            assert_eq!(invs[0].chain.len(), 1);
        }

        #[test]
        fn chained_pipeline() {
            let invs = scan_invocations("result = xs.stream().filter(p -> p > 0).collect(toList());");
            assert_eq!(invs.len(), 1);
            let inv = &invs[0];
            assert_eq!(inv.chain_names(), vec!["stream", "filter", "collect"]);
            assert_eq!(inv.name, "collect");
            assert_eq!(inv.receiver.as_deref(), Some("xs"));
        }

        #[test]
        fn call_with_receiver_and_arguments() {
            let invs = scan_invocations("names.add(person.getName(), 2);");
            assert_eq!(invs.len(), 1);
            let inv = &invs[0];
            assert_eq!(inv.name, "add");
            assert_eq!(inv.arguments, vec!["person.getName()", "2"]);
            assert_eq!(inv.receiver.as_deref(), Some("names"));
        }

        #[test]
        fn non_call_yields_nothing() {
            assert!(scan_invocations("x + 1;").is_empty());
            assert!(scan_invocations("return x;").is_empty());
        }
    }

    mod declaration_scanning {
        use super::*;

        #[test]
        fn typed_declaration_with_initializer() {
            let decl = scan_declaration("int y = compute();").unwrap();
            assert_eq!(decl.name, "y");
            assert_eq!(decl.type_name, "int");
            assert_eq!(decl.initializer.as_deref(), Some("compute()"));
        }

        #[test]
        fn declaration_without_initializer() {
            let decl = scan_declaration("List<String> names;").unwrap();
            assert_eq!(decl.name, "names");
            assert_eq!(decl.type_name, "List<String>");
            assert!(decl.initializer.is_none());
        }

        #[test]
        fn equality_operator_is_not_an_assignment() {
            // `==` must not split as a declaration.
            assert!(scan_declaration("x == y;").is_none());
        }
    }

    mod argument_splitting {
        use super::*;

        #[test]
        fn nested_commas_stay_together() {
            let args = split_arguments("f(a, b), c");
            assert_eq!(args, vec!["f(a, b)", "c"]);
        }
    }
}
