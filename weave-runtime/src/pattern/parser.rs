//! Recursive-descent parser for the restricted pattern grammar.
//!
//! Anything outside the grammar is rejected here, never approximated: a
//! construct the derivative engine cannot step through would otherwise make
//! it silently accept or reject the wrong continuations.

use weave_core::{Result, WeaveError};

use super::ast::{CharClass, ClassItem, Node, Pattern};
use super::MAX_PATTERN_LEN;
/// Maximum nesting depth of groups.
const MAX_DEPTH: usize = 256;

pub fn parse(pattern: &str) -> Result<Pattern> {
    let mut parser = Parser {
        source: pattern,
        chars: pattern.chars().collect(),
        pos: 0,
        depth: 0,
    };
    if parser.chars.len() > MAX_PATTERN_LEN {
        return Err(parser.invalid(format!(
            "pattern too long ({} chars, max {MAX_PATTERN_LEN})",
            parser.chars.len()
        )));
    }
    let parsed = parser.parse_alternation()?;
    if parser.pos < parser.chars.len() {
        return Err(parser.invalid("unbalanced ')'"));
    }
    Ok(parsed)
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn invalid(&self, reason: impl Into<String>) -> WeaveError {
        WeaveError::InvalidPattern {
            pattern: self.source.to_string(),
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn unsupported(&self, construct: impl Into<String>) -> WeaveError {
        WeaveError::UnsupportedPattern {
            pattern: self.source.to_string(),
            offset: self.pos,
            construct: construct.into(),
        }
    }

    fn parse_alternation(&mut self) -> Result<Pattern> {
        let mut branches = vec![self.parse_sequence()?];
        while self.peek() == Some('|') {
            self.bump();
            branches.push(self.parse_sequence()?);
        }
        if branches.len() == 1 {
            return Ok(branches.pop().unwrap_or_default());
        }
        Ok(Pattern::new(vec![Node::Alternation(branches)]))
    }

    fn parse_sequence(&mut self) -> Result<Pattern> {
        let mut nodes = Vec::new();
        while let Some(c) = self.peek() {
            if c == '|' || c == ')' {
                break;
            }
            let atom = self.parse_atom()?;
            nodes.push(self.parse_quantifier(atom)?);
        }
        Ok(Pattern::new(nodes))
    }

    fn parse_atom(&mut self) -> Result<Node> {
        let c = self
            .peek()
            .ok_or_else(|| self.invalid("unexpected end of pattern"))?;
        match c {
            '(' => self.parse_group(),
            '[' => self.parse_class(),
            '\\' => {
                self.bump();
                Ok(Node::Literal(self.parse_escape()?))
            }
            '$' => {
                self.bump();
                Ok(Node::EndAnchor)
            }
            '^' => Err(self.unsupported("start anchor '^'")),
            '.' => Err(self.unsupported("wildcard '.'")),
            '*' | '+' | '?' => Err(self.invalid("nothing to repeat")),
            _ => {
                self.bump();
                Ok(Node::Literal(c))
            }
        }
    }

    fn parse_group(&mut self) -> Result<Node> {
        self.bump();
        if self.peek() == Some('?') {
            if self.peek_at(1) != Some(':') {
                return Err(self.unsupported("extension group '(?'"));
            }
            self.pos += 2;
        }
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.invalid("groups nested too deeply"));
        }
        let inner = self.parse_alternation()?;
        self.depth -= 1;
        if self.bump() != Some(')') {
            return Err(self.invalid("missing ')'"));
        }
        Ok(Node::Group(inner))
    }

    /// Parses the character after a backslash.
    fn parse_escape(&mut self) -> Result<char> {
        let c = self
            .peek()
            .ok_or_else(|| self.invalid("trailing backslash"))?;
        let resolved = match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'f' => '\u{0c}',
            'v' => '\u{0b}',
            'x' => return self.parse_hex_escape(),
            'd' | 'D' | 'w' | 'W' | 's' | 'S' => {
                return Err(self.unsupported(format!("shorthand class '\\{c}'")))
            }
            '1'..='9' => return Err(self.unsupported(format!("backreference '\\{c}'"))),
            'b' | 'B' | 'A' | 'Z' | 'z' => {
                return Err(self.unsupported(format!("anchor '\\{c}'")))
            }
            c if c.is_ascii_alphanumeric() => {
                return Err(self.unsupported(format!("escape '\\{c}'")))
            }
            c => c,
        };
        self.bump();
        Ok(resolved)
    }

    /// `\xHH`
    fn parse_hex_escape(&mut self) -> Result<char> {
        self.bump();
        let hex: String = (0..2).filter_map(|i| self.peek_at(i)).collect();
        if hex.len() != 2 {
            return Err(self.invalid("incomplete \\x escape"));
        }
        let code = u32::from_str_radix(&hex, 16).map_err(|_| self.invalid("bad \\x escape"))?;
        let c = char::from_u32(code).ok_or_else(|| self.invalid("bad \\x escape"))?;
        self.pos += 2;
        Ok(c)
    }

    fn parse_class(&mut self) -> Result<Node> {
        self.bump();
        if self.peek() == Some('^') {
            return Err(self.unsupported("negated class '[^'"));
        }
        let mut items = Vec::new();
        let mut first = true;
        loop {
            let c = self
                .peek()
                .ok_or_else(|| self.invalid("unterminated character class"))?;
            if c == ']' && !first {
                self.bump();
                break;
            }
            first = false;
            if c == '[' && self.peek_at(1) == Some(':') {
                return Err(self.unsupported("POSIX class '[:'"));
            }
            let low = self.parse_class_char()?;
            let is_range = self.peek() == Some('-')
                && self.peek_at(1).map(|n| n != ']').unwrap_or(false);
            if is_range {
                self.bump();
                let high = self.parse_class_char()?;
                if low > high {
                    return Err(self.invalid(format!("bad character range {low}-{high}")));
                }
                items.push(ClassItem::Range(low, high));
            } else {
                items.push(ClassItem::Literal(low));
            }
        }
        Ok(Node::Class(CharClass::new(items)))
    }

    fn parse_class_char(&mut self) -> Result<char> {
        match self.bump() {
            Some('\\') => self.parse_escape(),
            Some(c) => Ok(c),
            None => Err(self.invalid("unterminated character class")),
        }
    }

    fn parse_quantifier(&mut self, atom: Node) -> Result<Node> {
        let (min, max) = match self.peek() {
            Some('*') => {
                self.bump();
                (0, None)
            }
            Some('+') => {
                self.bump();
                (1, None)
            }
            Some('?') => {
                self.bump();
                (0, Some(1))
            }
            Some('{') => match self.parse_braces()? {
                Some(bounds) => bounds,
                None => return Ok(atom),
            },
            _ => return Ok(atom),
        };
        if matches!(atom, Node::EndAnchor) {
            return Err(self.invalid("nothing to repeat"));
        }
        match self.peek() {
            Some('?') => return Err(self.unsupported("lazy quantifier")),
            Some('+') => return Err(self.unsupported("possessive quantifier")),
            Some('*') => return Err(self.invalid("multiple repeat")),
            Some('{') => {
                let save = self.pos;
                if self.parse_braces()?.is_some() {
                    return Err(self.invalid("multiple repeat"));
                }
                self.pos = save;
            }
            _ => {}
        }
        Ok(Node::Repeat {
            min,
            max,
            body: Pattern::new(vec![atom]),
        })
    }

    /// Parses `{n}`, `{n,}`, `{,m}` or `{n,m}`. Returns `None` (position
    /// unchanged) when the brace does not start a quantifier, in which case
    /// it is an ordinary literal.
    fn parse_braces(&mut self) -> Result<Option<(u32, Option<u32>)>> {
        let start = self.pos;
        self.bump();
        let min_digits = self.take_digits();
        let (max_digits, has_comma) = if self.peek() == Some(',') {
            self.bump();
            (self.take_digits(), true)
        } else {
            (String::new(), false)
        };
        if self.peek() != Some('}') || (min_digits.is_empty() && max_digits.is_empty()) {
            self.pos = start;
            return Ok(None);
        }
        self.bump();
        let parse_bound = |digits: &str, this: &Self| {
            digits
                .parse::<u32>()
                .map_err(|_| this.invalid("repeat count too large"))
        };
        let min = if min_digits.is_empty() {
            0
        } else {
            parse_bound(&min_digits, self)?
        };
        let max = if !has_comma {
            Some(min)
        } else if max_digits.is_empty() {
            None
        } else {
            Some(parse_bound(&max_digits, self)?)
        };
        if let Some(max) = max {
            if min > max {
                return Err(self.invalid("min repeat greater than max repeat"));
            }
        }
        Ok(Some((min, max)))
    }

    fn take_digits(&mut self) -> String {
        let mut digits = String::new();
        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            digits.push(c);
            self.bump();
        }
        digits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(p: &str) -> String {
        parse(p).unwrap().to_string()
    }

    #[test]
    fn test_parse_literals_and_quantifiers() {
        assert_eq!(roundtrip("abc"), "abc");
        assert_eq!(roundtrip("a*bc"), "a*bc");
        assert_eq!(roundtrip("a+b?c{2}d{1,3}e{2,}"), "a+b?c{2}d{1,3}e{2,}");
        assert_eq!(roundtrip("a{,3}"), "a{0,3}");
    }

    #[test]
    fn test_parse_groups_and_alternation() {
        assert_eq!(roundtrip("(a|bb)c"), "(a|bb)c");
        assert_eq!(roundtrip("a|b"), "a|b");
        assert_eq!(roundtrip("(?:ab)+"), "(ab)+");
        assert_eq!(roundtrip("(|b)c"), "(|b)c");

        let parsed = parse("(a|bb)c").unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(matches!(parsed.nodes[0], Node::Group(_)));
    }

    #[test]
    fn test_parse_classes() {
        assert_eq!(roundtrip("[1-9]a"), "[1-9]a");
        assert_eq!(roundtrip("[]a]"), r"[\]a]");
        assert_eq!(roundtrip("[a-]"), r"[a\-]");
        assert_eq!(roundtrip(r"[\n\]]"), r"[\n\]]");
    }

    #[test]
    fn test_parse_escapes_and_anchor() {
        assert_eq!(roundtrip(r"a\.b\\"), r"a\.b\\");
        assert_eq!(roundtrip(r"\x41"), "A");
        assert_eq!(roundtrip("ab$"), "ab$");
        assert_eq!(roundtrip("a{b"), r"a\{b");
    }

    #[test]
    fn test_parse_rejects_unsupported() {
        for p in [".", "^a", "[^a]", r"\d", r"(a)\1", r"\b", "(?=a)", "(?<=a)b", "a*?", "a++"] {
            match parse(p) {
                Err(WeaveError::UnsupportedPattern { .. }) => {}
                other => panic!("expected unsupported for {p:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for p in ["(ab", "ab)", "[ab", "[z-a]", "a{3,1}", "*a", "a**", "a{2}{3}", "$*", "\\"] {
            match parse(p) {
                Err(WeaveError::InvalidPattern { .. }) => {}
                other => panic!("expected invalid for {p:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_length_limit_counts_chars() {
        let at_limit = "é".repeat(MAX_PATTERN_LEN);
        assert!(parse(&at_limit).is_ok());
        assert!(parse(&format!("{at_limit}é")).is_err());
    }
}
