//! Block filter queries over index keys.
//!
//! A query is a boolean expression over keys: `a || b`, `a && b`, grouping
//! with parentheses, and juxtaposition meaning `&&`. `&&` binds tighter than
//! `||`. Keys may be quoted with `'` or `"` to include reserved characters.

use crate::error::{Result, StrataError};
use roaring::RoaringTreemap;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    /// A single key.
    Key(String),
    /// Every child must match.
    And(Vec<Expression>),
    /// At least one child must match.
    Or(Vec<Expression>),
}

impl Expression {
    /// Parse `input`.
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(invalid(input, "query is empty"));
        }
        let mut parser = Parser {
            input,
            tokens,
            pos: 0,
        };
        let expr = parser.or_expr()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(invalid(input, &format!("unexpected {token}"))),
        }
    }

    /// Evaluate against the keys emitted for one block.
    pub fn matches_keys(&self, keys: &HashSet<&str>) -> bool {
        match self {
            Self::Key(k) => keys.contains(k.as_str()),
            Self::And(children) => children.iter().all(|c| c.matches_keys(keys)),
            Self::Or(children) => children.iter().any(|c| c.matches_keys(keys)),
        }
    }

    /// Evaluate against precomputed bitmaps, giving the matching blocks.
    pub fn apply(&self, bitmaps: &HashMap<String, RoaringTreemap>) -> RoaringTreemap {
        match self {
            Self::Key(k) => bitmaps.get(k).cloned().unwrap_or_else(RoaringTreemap::new),
            Self::And(children) => {
                let mut iter = children.iter();
                let mut out = iter
                    .next()
                    .map(|c| c.apply(bitmaps))
                    .unwrap_or_else(RoaringTreemap::new);
                for child in iter {
                    out &= child.apply(bitmaps);
                }
                out
            }
            Self::Or(children) => children.iter().fold(RoaringTreemap::new(), |mut acc, c| {
                acc |= c.apply(bitmaps);
                acc
            }),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => f.write_str(k),
            Self::And(children) => write_group(f, children, "&&"),
            Self::Or(children) => write_group(f, children, "||"),
        }
    }
}

fn write_group(f: &mut fmt::Formatter<'_>, children: &[Expression], op: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, " {op} ")?;
        }
        write!(f, "{child}")?;
    }
    f.write_str(")")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Name(String),
    And,
    Or,
    LeftParen,
    RightParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(n) => write!(f, "key '{n}'"),
            Self::And => f.write_str("'&&'"),
            Self::Or => f.write_str("'||'"),
            Self::LeftParen => f.write_str("'('"),
            Self::RightParen => f.write_str("')'"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LeftParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RightParen);
            }
            '&' | '|' => {
                chars.next();
                if chars.next() != Some(c) {
                    return Err(invalid(input, &format!("expected '{c}{c}'")));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
            }
            '-' => return Err(invalid(input, "negation is not supported")),
            '\'' | '"' => {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some(q) if q == c => break,
                        Some(other) => name.push(other),
                        None => return Err(invalid(input, "unterminated quoted key")),
                    }
                }
                tokens.push(Token::Name(name));
            }
            _ => {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if n.is_whitespace() || matches!(n, '(' | ')' | '\'' | '"') {
                        break;
                    }
                    if (n == '&' || n == '|') && !name.is_empty() {
                        break;
                    }
                    name.push(n);
                    chars.next();
                }
                tokens.push(Token::Name(name));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn or_expr(&mut self) -> Result<Expression> {
        let mut children = vec![self.and_expr()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            children.push(self.and_expr()?);
        }
        Ok(collapse(children, Expression::Or))
    }

    fn and_expr(&mut self) -> Result<Expression> {
        let mut children = vec![self.unary()?];
        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.pos += 1;
                    children.push(self.unary()?);
                }
                Some(Token::Name(_)) | Some(Token::LeftParen) => children.push(self.unary()?),
                _ => break,
            }
        }
        Ok(collapse(children, Expression::And))
    }

    fn unary(&mut self) -> Result<Expression> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        match token {
            Some(Token::Name(name)) => Ok(Expression::Key(name)),
            Some(Token::LeftParen) => {
                let inner = self.or_expr()?;
                match self.peek() {
                    Some(Token::RightParen) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(invalid(self.input, "missing closing parenthesis")),
                }
            }
            Some(other) => Err(invalid(self.input, &format!("unexpected {other}"))),
            None => Err(invalid(self.input, "unexpected end of query")),
        }
    }
}

fn collapse(mut children: Vec<Expression>, wrap: fn(Vec<Expression>) -> Expression) -> Expression {
    if children.len() == 1 {
        children.remove(0)
    } else {
        wrap(children)
    }
}

fn invalid(input: &str, reason: &str) -> StrataError {
    StrataError::InvalidRequest {
        cause: format!("invalid block filter query '{input}': {reason}"),
    }
}
