//! Syntax tree of the restricted pattern grammar and its serialization.
//!
//! A [`Pattern`] is an ordered sequence of [`Node`]s; concatenation is
//! implicit in list position. Serializing a pattern with `Display` produces
//! pattern text that parses back to an equivalent tree, which is what
//! syntactic pattern equality is defined over.

use std::fmt::{self, Write};

/// One element of a pattern sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    Literal(char),
    Class(CharClass),
    /// `body` repeated between `min` and `max` times; `None` is unbounded.
    Repeat {
        min: u32,
        max: Option<u32>,
        body: Pattern,
    },
    /// Ordered branches; never empty.
    Alternation(Vec<Pattern>),
    /// Parenthesized sub-pattern. Structural only.
    Group(Pattern),
    /// `$`: matches only at end of input.
    EndAnchor,
}

/// A sequence of nodes. The empty pattern matches only the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Pattern {
    pub nodes: Vec<Node>,
}

impl Pattern {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

impl From<Vec<Node>> for Pattern {
    fn from(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassItem {
    Literal(char),
    /// Inclusive range; `low <= high` is checked by the parser.
    Range(char, char),
}

/// A bracketed character class: a union of literals and ranges.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharClass {
    pub items: Vec<ClassItem>,
}

impl CharClass {
    pub fn new(items: Vec<ClassItem>) -> Self {
        Self { items }
    }

    pub fn matches(&self, c: char) -> bool {
        self.items.iter().any(|item| match *item {
            ClassItem::Literal(l) => l == c,
            ClassItem::Range(low, high) => low <= c && c <= high,
        })
    }
}

const METACHARS: &[char] = &[
    '\\', '.', '^', '$', '|', '?', '*', '+', '(', ')', '[', ']', '{', '}',
];

fn write_control(f: &mut fmt::Formatter<'_>, c: char) -> Result<bool, fmt::Error> {
    let escaped = match c {
        '\n' => "\\n",
        '\t' => "\\t",
        '\r' => "\\r",
        '\u{0b}' => "\\v",
        '\u{0c}' => "\\f",
        _ => return Ok(false),
    };
    f.write_str(escaped)?;
    Ok(true)
}

fn write_literal(f: &mut fmt::Formatter<'_>, c: char) -> fmt::Result {
    if write_control(f, c)? {
        return Ok(());
    }
    if METACHARS.contains(&c) {
        f.write_char('\\')?;
    }
    f.write_char(c)
}

fn write_class_char(f: &mut fmt::Formatter<'_>, c: char) -> fmt::Result {
    if write_control(f, c)? {
        return Ok(());
    }
    // `&`, `~` and `-` double up into set operators in the host syntax.
    if matches!(c, '\\' | ']' | '[' | '^' | '-' | '&' | '~') {
        f.write_char('\\')?;
    }
    f.write_char(c)
}

impl fmt::Display for CharClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char('[')?;
        for item in &self.items {
            match *item {
                ClassItem::Literal(c) => write_class_char(f, c)?,
                ClassItem::Range(low, high) => {
                    write_class_char(f, low)?;
                    f.write_char('-')?;
                    write_class_char(f, high)?;
                }
            }
        }
        f.write_char(']')
    }
}

fn quantifier_suffix(min: u32, max: Option<u32>) -> Option<String> {
    match (min, max) {
        (0, None) => Some("*".into()),
        (1, None) => Some("+".into()),
        (0, Some(1)) => Some("?".into()),
        (1, Some(1)) => None,
        (n, None) => Some(format!("{{{n},}}")),
        (n, Some(m)) if n == m => Some(format!("{{{n}}}")),
        (n, Some(m)) => Some(format!("{{{n},{m}}}")),
    }
}

/// Writes a repetition body, parenthesizing anything that is not a single
/// atom.
fn write_repeat_body(f: &mut fmt::Formatter<'_>, body: &Pattern) -> fmt::Result {
    match body.nodes.as_slice() {
        [node @ (Node::Literal(_) | Node::Class(_) | Node::Group(_))] => write_node(f, node, false),
        _ => write!(f, "({body})"),
    }
}

fn write_node(f: &mut fmt::Formatter<'_>, node: &Node, in_sequence: bool) -> fmt::Result {
    match node {
        Node::Literal(c) => write_literal(f, *c),
        Node::Class(class) => write!(f, "{class}"),
        Node::Repeat { min, max, body } => {
            write_repeat_body(f, body)?;
            if let Some(suffix) = quantifier_suffix(*min, *max) {
                f.write_str(&suffix)?;
            }
            Ok(())
        }
        Node::Alternation(branches) => {
            // An alternation sharing a sequence with siblings needs parens to
            // keep its scope.
            if in_sequence {
                f.write_char('(')?;
            }
            for (i, branch) in branches.iter().enumerate() {
                if i > 0 {
                    f.write_char('|')?;
                }
                write!(f, "{branch}")?;
            }
            if in_sequence {
                f.write_char(')')?;
            }
            Ok(())
        }
        Node::Group(inner) => write!(f, "({inner})"),
        Node::EndAnchor => f.write_char('$'),
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let in_sequence = self.nodes.len() > 1;
        for node in &self.nodes {
            write_node(f, node, in_sequence)?;
        }
        Ok(())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_node(f, self, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(c: char) -> Node {
        Node::Literal(c)
    }

    #[test]
    fn test_display_escapes_metachars() {
        let p = Pattern::new(vec![lit('a'), lit('.'), lit('*'), lit('\n')]);
        assert_eq!(p.to_string(), r"a\.\*\n");
    }

    #[test]
    fn test_display_quantifiers() {
        let rep = |min, max| Node::Repeat {
            min,
            max,
            body: Pattern::new(vec![lit('a')]),
        };
        assert_eq!(rep(0, None).to_string(), "a*");
        assert_eq!(rep(1, None).to_string(), "a+");
        assert_eq!(rep(0, Some(1)).to_string(), "a?");
        assert_eq!(rep(1, Some(1)).to_string(), "a");
        assert_eq!(rep(3, Some(3)).to_string(), "a{3}");
        assert_eq!(rep(2, None).to_string(), "a{2,}");
        assert_eq!(rep(2, Some(5)).to_string(), "a{2,5}");
    }

    #[test]
    fn test_display_parenthesizes_compound_bodies() {
        let body = Pattern::new(vec![lit('a'), lit('b')]);
        let rep = Node::Repeat {
            min: 0,
            max: Some(1),
            body,
        };
        assert_eq!(rep.to_string(), "(ab)?");
    }

    #[test]
    fn test_display_alternation_scope() {
        let alt = Node::Alternation(vec![
            Pattern::new(vec![lit('a')]),
            Pattern::new(vec![lit('b')]),
        ]);
        assert_eq!(Pattern::new(vec![alt.clone()]).to_string(), "a|b");
        assert_eq!(Pattern::new(vec![alt, lit('c')]).to_string(), "(a|b)c");
    }

    #[test]
    fn test_class_display_and_match() {
        let class = CharClass::new(vec![
            ClassItem::Range('0', '9'),
            ClassItem::Literal('-'),
            ClassItem::Literal(']'),
        ]);
        assert_eq!(class.to_string(), r"[0-9\-\]]");
        assert!(class.matches('5'));
        assert!(class.matches('-'));
        assert!(!class.matches('a'));
    }
}
