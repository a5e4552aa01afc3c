//! Canonicalization of derivative residuals.
//!
//! Rewrites are structural and language-preserving for this grammar. The
//! pass is bottom-up and idempotent: `simplify(&simplify(p)) == simplify(p)`.

use super::ast::{Node, Pattern};

pub fn simplify(pattern: &Pattern) -> Pattern {
    let mut out = Vec::with_capacity(pattern.nodes.len());
    for node in &pattern.nodes {
        simplify_into(node, &mut out);
    }
    Pattern::new(out)
}

/// Simplifies `node` and appends the result, which may be zero, one or
/// several nodes, to `out`.
fn simplify_into(node: &Node, out: &mut Vec<Node>) {
    match node {
        Node::Literal(_) | Node::Class(_) | Node::EndAnchor => out.push(node.clone()),
        Node::Group(inner) => {
            let inner = simplify(inner);
            match inner.nodes.as_slice() {
                [] => {}
                [Node::Alternation(_)] => out.push(Node::Group(inner)),
                [_] => out.extend(inner.nodes),
                _ => out.push(Node::Group(inner)),
            }
        }
        Node::Repeat { min, max, body } => {
            let body = simplify(body);
            if body.is_empty() || *max == Some(0) {
                return;
            }
            if *min == 1 && *max == Some(1) {
                out.extend(body.nodes);
                return;
            }
            out.push(Node::Repeat {
                min: *min,
                max: *max,
                body,
            });
        }
        Node::Alternation(branches) => simplify_alternation(branches, out),
    }
}

fn simplify_alternation(branches: &[Pattern], out: &mut Vec<Node>) {
    let mut flat: Vec<Pattern> = Vec::with_capacity(branches.len());
    for branch in branches {
        let branch = simplify(branch);
        match lone_alternation(&branch) {
            Some(nested) => {
                for b in nested {
                    push_unique(&mut flat, b.clone());
                }
            }
            None => push_unique(&mut flat, branch),
        }
    }

    match flat.len() {
        0 => {}
        1 => out.extend(flat.remove(0).nodes),
        2 if flat.iter().any(Pattern::is_empty) => {
            // `x|` is `x?`. Only the two-branch shape is rewritten.
            let other = flat.into_iter().find(|b| !b.is_empty()).unwrap_or_default();
            let body = if other.len() > 1 {
                Pattern::new(vec![Node::Group(other)])
            } else {
                other
            };
            out.push(Node::Repeat {
                min: 0,
                max: Some(1),
                body,
            });
        }
        _ => out.push(Node::Alternation(flat)),
    }
}

/// Branches of a branch that is nothing but an alternation, bare or grouped.
fn lone_alternation(branch: &Pattern) -> Option<&[Pattern]> {
    match branch.nodes.as_slice() {
        [Node::Alternation(nested)] => Some(nested),
        [Node::Group(inner)] => match inner.nodes.as_slice() {
            [Node::Alternation(nested)] => Some(nested),
            _ => None,
        },
        _ => None,
    }
}

fn push_unique(branches: &mut Vec<Pattern>, branch: Pattern) {
    if !branches.contains(&branch) {
        branches.push(branch);
    }
}
