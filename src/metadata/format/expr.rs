//! Offset correction expressions.
//!
//! Vendor-specific offset quirks are stored as data: a tiny arithmetic grammar
//! over exactly two inputs, `start` (the position being corrected) and `base`
//! (the parent directory's base).
//!
//! ```text
//! expr  := term (('+' | '-') term)*
//! term  := unary ('*' unary)*
//! unary := '-' unary | atom
//! atom  := INT | HEX | 'start' | 'base' | '(' expr ')'
//! ```
//!
//! Identifiers may carry an optional `$` prefix (`$start - 8`).

use std::fmt;

use crate::metadata::types::error::{MetaError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Const(i64),
    Start,
    Base,
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Int(i64),
    Start,
    Base,
    Plus,
    Minus,
    Star,
    Open,
    Close,
}

impl Expr {
    /// Parses an expression; fails on any token outside the grammar.
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens: &tokens,
            pos: 0,
        };
        let expr = parser.expr()?;
        if parser.pos != tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    /// Evaluates with checked arithmetic.
    pub fn eval(&self, start: i64, base: i64) -> Result<i64> {
        self.eval_checked(start, base).ok_or_else(|| MetaError::BadExpression {
            expr: self.to_string(),
            reason: format!("arithmetic overflow (start={}, base={})", start, base),
        })
    }

    fn eval_checked(&self, start: i64, base: i64) -> Option<i64> {
        match self {
            Expr::Const(value) => Some(*value),
            Expr::Start => Some(start),
            Expr::Base => Some(base),
            Expr::Neg(inner) => inner.eval_checked(start, base)?.checked_neg(),
            Expr::Add(a, b) => a.eval_checked(start, base)?.checked_add(b.eval_checked(start, base)?),
            Expr::Sub(a, b) => a.eval_checked(start, base)?.checked_sub(b.eval_checked(start, base)?),
            Expr::Mul(a, b) => a.eval_checked(start, base)?.checked_mul(b.eval_checked(start, base)?),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Const(value) => write!(f, "{}", value),
            Expr::Start => f.write_str("start"),
            Expr::Base => f.write_str("base"),
            Expr::Neg(inner) => write!(f, "-({})", inner),
            Expr::Add(a, b) => write!(f, "({} + {})", a, b),
            Expr::Sub(a, b) => write!(f, "({} - {})", a, b),
            Expr::Mul(a, b) => write!(f, "({} * {})", a, b),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let bad = |reason: String| MetaError::BadExpression {
        expr: source.to_string(),
        reason,
    };
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' => i += 1,
            b'+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            b'-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            b'*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            b'(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            b')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            b'0'..=b'9' => {
                let begin = i;
                while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
                    i += 1;
                }
                let literal = &source[begin..i];
                let parsed = match literal.strip_prefix("0x").or_else(|| literal.strip_prefix("0X")) {
                    Some(hex) => i64::from_str_radix(hex, 16),
                    None => literal.parse::<i64>(),
                };
                let value = parsed.map_err(|_| bad(format!("invalid number {:?}", literal)))?;
                tokens.push(Token::Int(value));
            }
            b'$' | b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                let begin = if c == b'$' { i + 1 } else { i };
                i = begin;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                match &source[begin..i] {
                    "start" => tokens.push(Token::Start),
                    "base" => tokens.push(Token::Base),
                    other => return Err(bad(format!("unknown input {:?}", other))),
                }
            }
            _ => return Err(bad(format!("unexpected character {:?}", c as char))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> MetaError {
        MetaError::BadExpression {
            expr: self.source.to_string(),
            reason: format!("{} at token {}", reason, self.pos),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    lhs = Expr::Add(Box::new(lhs), Box::new(self.term()?));
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    lhs = Expr::Sub(Box::new(lhs), Box::new(self.term()?));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        while let Some(Token::Star) = self.peek() {
            self.pos += 1;
            lhs = Expr::Mul(Box::new(lhs), Box::new(self.unary()?));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        if let Some(Token::Minus) = self.peek() {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Expr> {
        let token = self.peek().cloned().ok_or_else(|| self.error("unexpected end of expression"))?;
        self.pos += 1;
        match token {
            Token::Int(value) => Ok(Expr::Const(value)),
            Token::Start => Ok(Expr::Start),
            Token::Base => Ok(Expr::Base),
            Token::Open => {
                let inner = self.expr()?;
                match self.peek() {
                    Some(Token::Close) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(self.error("missing ')'")),
                }
            }
            _ => Err(self.error("expected a number, input or '('")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_and_inputs() {
        let expr = Expr::parse("$start - 8 + base * 2").unwrap();
        assert_eq!(expr.eval(100, 10).unwrap(), 112);
        let expr = Expr::parse("-(start - 0x10)").unwrap();
        assert_eq!(expr.eval(20, 0).unwrap(), -4);
    }

    #[test]
    fn rejects_anything_outside_the_grammar() {
        assert!(Expr::parse("start / 2").is_err());
        assert!(Expr::parse("offset + 1").is_err());
        assert!(Expr::parse("(start").is_err());
        assert!(Expr::parse("start 4").is_err());
        assert!(Expr::parse("").is_err());
    }

    #[test]
    fn overflow_is_an_error_not_a_wrap() {
        let expr = Expr::parse("start * 4").unwrap();
        assert!(matches!(expr.eval(i64::MAX, 0), Err(MetaError::BadExpression { .. })));
    }
}
