//! Character derivatives over the pattern AST.
//!
//! `derive_char(p, c)` is the pattern matching exactly the suffixes `s` such
//! that `c s` matches `p`, or `None` when no such suffix exists. Results are
//! not simplified here; see [`super::simplify`].

use super::ast::{Node, Pattern};

impl Node {
    /// Whether this node can be passed over without consuming a character
    /// when the next character belongs to whatever follows it. `$` cannot:
    /// a following character means input has not ended.
    pub fn is_skippable(&self) -> bool {
        match self {
            Node::Literal(_) | Node::Class(_) | Node::EndAnchor => false,
            Node::Group(inner) => inner.nodes.iter().all(Node::is_skippable),
            Node::Alternation(branches) => branches
                .iter()
                .any(|b| b.nodes.iter().all(Node::is_skippable)),
            Node::Repeat { min, max, body } => {
                *min == 0 || *max == Some(0) || body.nodes.iter().all(Node::is_skippable)
            }
        }
    }

    /// Whether the node matches the empty string at end of input.
    pub fn accepts_empty(&self) -> bool {
        match self {
            Node::Literal(_) | Node::Class(_) => false,
            Node::EndAnchor => true,
            Node::Group(inner) => inner.accepts_empty(),
            Node::Alternation(branches) => branches.iter().any(Pattern::accepts_empty),
            Node::Repeat { min, max, body } => {
                *min == 0 || *max == Some(0) || body.accepts_empty()
            }
        }
    }
}

impl Pattern {
    /// Whether the empty remaining input is accepted.
    pub fn accepts_empty(&self) -> bool {
        self.nodes.iter().all(Node::accepts_empty)
    }
}

/// One-character derivative. `None` means the character is rejected.
pub fn derive_char(pattern: &Pattern, c: char) -> Option<Pattern> {
    derive_seq(&pattern.nodes, c).map(Pattern::new)
}

/// Derives a sequence. Each head in the leading run of skippable nodes may
/// take `c`; every head that can contributes one path, and the paths are
/// joined as alternation branches. Iterative, so stack depth does not grow
/// with sequence length.
fn derive_seq(nodes: &[Node], c: char) -> Option<Vec<Node>> {
    let mut paths: Vec<Vec<Node>> = Vec::new();
    for (i, head) in nodes.iter().enumerate() {
        if let Some(mut residual) = derive_head(head, c) {
            residual.extend(nodes[i + 1..].iter().cloned());
            if !paths.contains(&residual) {
                paths.push(residual);
            }
        }
        // An optional head that could not take `c` (or could, but need not)
        // leaves the character to the rest of the sequence.
        if !head.is_skippable() {
            break;
        }
    }

    match paths.len() {
        0 => None,
        1 => paths.pop(),
        _ => Some(vec![Node::Alternation(
            paths.into_iter().map(Pattern::new).collect(),
        )]),
    }
}

/// Derivative of a single node; the caller appends the rest of the sequence.
fn derive_head(node: &Node, c: char) -> Option<Vec<Node>> {
    match node {
        Node::Literal(l) => (*l == c).then(Vec::new),
        Node::Class(class) => class.matches(c).then(Vec::new),
        Node::EndAnchor => None,
        Node::Group(inner) => {
            derive_seq(&inner.nodes, c).map(|residual| vec![Node::Group(Pattern::new(residual))])
        }
        Node::Alternation(branches) => {
            let survivors: Vec<Pattern> = branches
                .iter()
                .filter_map(|branch| derive_seq(&branch.nodes, c).map(Pattern::new))
                .collect();
            if survivors.is_empty() {
                None
            } else {
                Some(vec![Node::Alternation(survivors)])
            }
        }
        Node::Repeat { min, max, body } => {
            if *max == Some(0) {
                return None;
            }
            let mut residual = derive_seq(&body.nodes, c)?;
            let min = min.saturating_sub(1);
            let max = max.map(|m| m.saturating_sub(1).max(min));
            if max != Some(0) {
                residual.push(Node::Repeat {
                    min,
                    max,
                    body: body.clone(),
                });
            }
            Some(residual)
        }
    }
}
