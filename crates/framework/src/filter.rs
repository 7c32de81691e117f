//! LDAP-style attribute filters.
//!
//! Boolean expressions over property maps: `=`, `<=`, `>=`, `~=` (approximate),
//! `!`, `&`, `|`, presence `(key=*)` and substring patterns `(key=a*b)`.
//! The registry and the service listeners depend only on [`Filter::matches`].

use serde_json::Value;
use std::fmt;

use crate::errors::{FrameworkError, FrameworkResult};
use crate::properties::Properties;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Le,
    Ge,
    Approx,
}

#[derive(Debug, Clone)]
enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Present(String),
    Cmp {
        attr: String,
        op: CmpOp,
        value: String,
    },
    /// Pattern segments produced by splitting the value on unescaped `*`.
    /// `a*b` → `["a", "b"]`; leading/trailing empty segments keep the
    /// open-ended sides of the pattern.
    Substring {
        attr: String,
        parts: Vec<String>,
    },
}

/// A parsed, immutable filter expression.
#[derive(Debug, Clone)]
pub struct Filter {
    node: Node,
    source: String,
}

impl Filter {
    /// Parse an LDAP filter expression.
    pub fn parse(expr: &str) -> FrameworkResult<Filter> {
        let mut parser = Parser {
            bytes: expr.as_bytes(),
            pos: 0,
        };
        parser.skip_ws();
        let node = parser.parse_filter()?;
        parser.skip_ws();
        if parser.pos != parser.bytes.len() {
            return Err(parser.error("trailing characters after filter"));
        }
        Ok(Filter {
            node,
            source: expr.to_string(),
        })
    }

    /// Evaluate the filter against a property map.
    pub fn matches(&self, props: &Properties) -> bool {
        eval(&self.node, props)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> FrameworkError {
        FrameworkError::FilterParse {
            position: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn expect(&mut self, byte: u8) -> FrameworkResult<()> {
        match self.peek() {
            Some(b) if b == byte => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error(&format!("expected '{}'", byte as char))),
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
    }

    fn parse_filter(&mut self) -> FrameworkResult<Node> {
        self.expect(b'(')?;
        let node = match self.peek() {
            Some(b'&') => {
                self.bump();
                Node::And(self.parse_filter_list()?)
            }
            Some(b'|') => {
                self.bump();
                Node::Or(self.parse_filter_list()?)
            }
            Some(b'!') => {
                self.bump();
                self.skip_ws();
                Node::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_operation()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.skip_ws();
        self.expect(b')')?;
        Ok(node)
    }

    fn parse_filter_list(&mut self) -> FrameworkResult<Vec<Node>> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'(') => items.push(self.parse_filter()?),
                _ => break,
            }
        }
        if items.is_empty() {
            return Err(self.error("composite operator requires at least one operand"));
        }
        Ok(items)
    }

    fn parse_operation(&mut self) -> FrameworkResult<Node> {
        let attr = self.parse_attr()?;
        let op = match self.bump() {
            Some(b'=') => CmpOp::Eq,
            Some(b'<') => {
                self.expect(b'=')?;
                CmpOp::Le
            }
            Some(b'>') => {
                self.expect(b'=')?;
                CmpOp::Ge
            }
            Some(b'~') => {
                self.expect(b'=')?;
                CmpOp::Approx
            }
            _ => return Err(self.error("expected comparison operator")),
        };

        let (value, wildcards) = self.parse_value()?;

        if op == CmpOp::Eq {
            if wildcards {
                let parts = split_pattern(&value);
                if parts.len() == 2 && parts[0].is_empty() && parts[1].is_empty() {
                    return Ok(Node::Present(attr));
                }
                return Ok(Node::Substring { attr, parts });
            }
        } else if wildcards {
            return Err(self.error("wildcard is only valid with '='"));
        }

        Ok(Node::Cmp {
            attr,
            op,
            value: unescape(&value),
        })
    }

    fn parse_attr(&mut self) -> FrameworkResult<String> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b'=' | b'<' | b'>' | b'~' | b'(' | b')') {
                break;
            }
            self.pos += 1;
        }
        let attr = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| self.error("attribute is not valid utf-8"))?
            .trim()
            .to_string();
        if attr.is_empty() {
            return Err(self.error("empty attribute name"));
        }
        Ok(attr)
    }

    /// Returns the raw (still escaped) value text and whether it contains an
    /// unescaped `*`.
    fn parse_value(&mut self) -> FrameworkResult<(String, bool)> {
        let mut raw = Vec::new();
        let mut wildcards = false;
        loop {
            match self.peek() {
                Some(b')') | None => break,
                Some(b'\\') => {
                    self.bump();
                    match self.bump() {
                        Some(escaped) => {
                            raw.push(b'\\');
                            raw.push(escaped);
                        }
                        None => return Err(self.error("dangling escape")),
                    }
                }
                Some(b'(') => return Err(self.error("unescaped '(' in value")),
                Some(b'*') => {
                    wildcards = true;
                    raw.push(b'*');
                    self.bump();
                }
                Some(b) => {
                    raw.push(b);
                    self.bump();
                }
            }
        }
        let raw =
            String::from_utf8(raw).map_err(|_| self.error("value is not valid utf-8"))?;
        Ok((raw, wildcards))
    }
}

/// Split a raw pattern on unescaped `*`, unescaping each segment.
fn split_pattern(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '*' => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn eval(node: &Node, props: &Properties) -> bool {
    match node {
        Node::And(children) => children.iter().all(|c| eval(c, props)),
        Node::Or(children) => children.iter().any(|c| eval(c, props)),
        Node::Not(child) => !eval(child, props),
        Node::Present(attr) => props.contains_key(attr),
        Node::Cmp { attr, op, value } => props
            .get(attr)
            .map(|v| compare_value(v, *op, value))
            .unwrap_or(false),
        Node::Substring { attr, parts } => props
            .get(attr)
            .map(|v| match v {
                Value::String(s) => substring_match(s, parts),
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|s| substring_match(s, parts)),
                _ => false,
            })
            .unwrap_or(false),
    }
}

fn compare_value(prop: &Value, op: CmpOp, rhs: &str) -> bool {
    match prop {
        Value::String(s) => compare_str(s, op, rhs),
        Value::Number(n) => {
            if let (Some(lhs), Ok(parsed)) = (n.as_i64(), rhs.trim().parse::<i64>()) {
                return match op {
                    CmpOp::Eq | CmpOp::Approx => lhs == parsed,
                    CmpOp::Le => lhs <= parsed,
                    CmpOp::Ge => lhs >= parsed,
                };
            }
            if let (Some(lhs), Ok(parsed)) = (n.as_f64(), rhs.trim().parse::<f64>()) {
                return match op {
                    CmpOp::Eq | CmpOp::Approx => lhs == parsed,
                    CmpOp::Le => lhs <= parsed,
                    CmpOp::Ge => lhs >= parsed,
                };
            }
            false
        }
        Value::Bool(b) => rhs
            .trim()
            .parse::<bool>()
            .map(|parsed| match op {
                CmpOp::Eq | CmpOp::Approx => *b == parsed,
                // ordering over booleans is meaningless; reject
                CmpOp::Le | CmpOp::Ge => false,
            })
            .unwrap_or(false),
        Value::Array(items) => items.iter().any(|item| compare_value(item, op, rhs)),
        Value::Null | Value::Object(_) => false,
    }
}

fn compare_str(lhs: &str, op: CmpOp, rhs: &str) -> bool {
    match op {
        CmpOp::Eq => lhs == rhs,
        CmpOp::Le => lhs <= rhs,
        CmpOp::Ge => lhs >= rhs,
        CmpOp::Approx => normalize(lhs) == normalize(rhs),
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Greedy wildcard match over the segments of a `*`-pattern.
fn substring_match(text: &str, parts: &[String]) -> bool {
    debug_assert!(!parts.is_empty());
    let mut remaining = text;

    // first segment is anchored at the start
    let first = &parts[0];
    if !remaining.starts_with(first.as_str()) {
        return false;
    }
    remaining = &remaining[first.len()..];

    if parts.len() == 1 {
        // no '*' at all: must consume the whole text
        return remaining.is_empty();
    }

    // middle segments float
    for part in &parts[1..parts.len() - 1] {
        match remaining.find(part.as_str()) {
            Some(idx) => remaining = &remaining[idx + part.len()..],
            None => return false,
        }
    }

    // last segment is anchored at the end
    let last = &parts[parts.len() - 1];
    remaining.len() >= last.len() && remaining.ends_with(last.as_str())
}
