//! Recursive-descent parser: tokens -> [`Expr`].
//!
//! Precedence, highest to lowest: atom > NOT > AND > OR. Two adjacent
//! primaries are an implicit AND. Sugar handled here: `!field` and
//! `NOT field` become `field:false`, `has:NAME` becomes a presence
//! check, `FIELD:lo..hi` becomes a range, and bare terms become
//! full-text predicates.

use ministore_core::time;
use ministore_core::{Error, Result};

use crate::ast::{classify_pattern, CmpOp, Expr, Predicate};
use crate::token::{lex, Token};

/// Parses a query string into an expression tree.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = lex(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    parser.expect_eof()?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .unwrap_or(&Token::Eof)
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect_eof(&self) -> Result<()> {
        match self.peek() {
            Token::Eof => Ok(()),
            other => Err(Error::query_parse(format!(
                "unexpected {}",
                other.describe()
            ))),
        }
    }

    /// Does the current token start a primary?
    fn starts_primary(&self) -> bool {
        matches!(
            self.peek(),
            Token::Ident(_) | Token::Str(_) | Token::Number(_) | Token::Not | Token::LParen
        )
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Token::Or) {
            self.bump();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        loop {
            if matches!(self.peek(), Token::And) {
                self.bump();
            } else if !self.starts_primary() {
                break;
            }
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if !matches!(self.peek(), Token::Not) {
            return self.parse_primary();
        }
        self.bump();
        // `NOT field` with no following `:` or comparison is the negated
        // boolean sugar.
        if let Token::Ident(name) = self.peek().clone() {
            if !matches!(
                self.peek_at(1),
                Token::Colon | Token::Gt | Token::Ge | Token::Lt | Token::Le
            ) {
                self.bump();
                return Ok(Expr::pred(Predicate::Bool {
                    field: name,
                    value: false,
                }));
            }
        }
        Ok(Expr::Not(Box::new(self.parse_not()?)))
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.bump() {
            Token::LParen => {
                let expr = self.parse_or()?;
                match self.bump() {
                    Token::RParen => Ok(expr),
                    other => Err(Error::query_parse(format!(
                        "expected ')' but found {}",
                        other.describe()
                    ))),
                }
            }
            Token::Str(s) => Ok(Expr::pred(Predicate::Text {
                field: None,
                query: s,
            })),
            Token::Number(n) => Ok(Expr::pred(Predicate::Text {
                field: None,
                query: n,
            })),
            Token::Ident(name) => self.parse_after_ident(name),
            other => Err(Error::query_parse(format!(
                "unexpected {}",
                other.describe()
            ))),
        }
    }

    /// An identifier was consumed; decide between a field predicate and a
    /// bare full-text term.
    fn parse_after_ident(&mut self, name: String) -> Result<Expr> {
        match self.peek() {
            Token::Colon => {
                self.bump();
                self.parse_field_value(name)
            }
            Token::Gt | Token::Ge | Token::Lt | Token::Le => {
                let op = match self.bump() {
                    Token::Gt => CmpOp::Gt,
                    Token::Ge => CmpOp::Ge,
                    Token::Lt => CmpOp::Lt,
                    Token::Le => CmpOp::Le,
                    _ => unreachable!(),
                };
                self.parse_comparison(name, op)
            }
            _ => Ok(Expr::pred(Predicate::Text {
                field: None,
                query: name,
            })),
        }
    }

    /// `FIELD:VALUE` forms.
    fn parse_field_value(&mut self, field: String) -> Result<Expr> {
        if field == "has" {
            let target = match self.bump() {
                Token::Ident(s) => s,
                Token::Str(s) => s,
                other => {
                    return Err(Error::query_parse(format!(
                        "has: expects a field name, found {}",
                        other.describe()
                    )));
                }
            };
            return Ok(Expr::pred(Predicate::Has { field: target }));
        }

        let value = self.bump();
        if field == "path" {
            let pattern = match value {
                Token::Ident(s) | Token::Str(s) | Token::Number(s) => s,
                other => {
                    return Err(Error::query_parse(format!(
                        "path: expects a pattern, found {}",
                        other.describe()
                    )));
                }
            };
            return Ok(Expr::pred(Predicate::PathGlob { pattern }));
        }

        match value {
            Token::Number(n) => {
                if matches!(self.peek(), Token::Range) {
                    self.bump();
                    let hi = self.range_end()?;
                    return self.number_range(field, &n, &hi);
                }
                let value = parse_number(&n)?;
                Ok(Expr::pred(Predicate::NumberCmp {
                    field,
                    op: CmpOp::Eq,
                    value,
                }))
            }
            Token::Ident(s) | Token::Str(s) => {
                if matches!(self.peek(), Token::Range) {
                    self.bump();
                    let hi = self.range_end()?;
                    return self.literal_range(field, &s, &hi);
                }
                Ok(Expr::pred(Predicate::Keyword {
                    field,
                    kind: classify_pattern(&s),
                    pattern: s,
                }))
            }
            other => Err(Error::query_parse(format!(
                "expected a value after ':', found {}",
                other.describe()
            ))),
        }
    }

    /// The closing literal of a `lo..hi` range.
    fn range_end(&mut self) -> Result<String> {
        match self.bump() {
            Token::Ident(s) | Token::Str(s) | Token::Number(s) => Ok(s),
            other => Err(Error::query_parse(format!(
                "expected a range end after '..', found {}",
                other.describe()
            ))),
        }
    }

    /// `lo..hi` where `lo` lexed as a number: numeric range, unless both
    /// ends parse as dates.
    fn number_range(&self, field: String, lo: &str, hi: &str) -> Result<Expr> {
        if let (Some(lo_ms), Some(hi_ms)) =
            (time::parse_date_ms(lo), time::parse_date_ms(hi))
        {
            return Ok(Expr::pred(Predicate::DateRangeAbs {
                field,
                lo_ms,
                hi_ms,
            }));
        }
        let lo = parse_number(lo)?;
        let hi = parse_number(hi)?;
        Ok(Expr::pred(Predicate::NumberRange { field, lo, hi }))
    }

    /// `lo..hi` where `lo` lexed as a word or string: date range first,
    /// numeric range as fallback.
    fn literal_range(&self, field: String, lo: &str, hi: &str) -> Result<Expr> {
        if let (Some(lo_ms), Some(hi_ms)) =
            (time::parse_date_ms(lo), time::parse_date_ms(hi))
        {
            return Ok(Expr::pred(Predicate::DateRangeAbs {
                field,
                lo_ms,
                hi_ms,
            }));
        }
        if let (Ok(lo), Ok(hi)) = (lo.parse::<f64>(), hi.parse::<f64>()) {
            return Ok(Expr::pred(Predicate::NumberRange { field, lo, hi }));
        }
        Err(Error::query_parse(format!(
            "range ends must both be dates or both be numbers ({lo:?}..{hi:?})"
        )))
    }

    /// `FIELD op VALUE`.
    fn parse_comparison(&mut self, field: String, op: CmpOp) -> Result<Expr> {
        match self.bump() {
            Token::Number(n) => {
                let value = parse_number(&n)?;
                Ok(Expr::pred(Predicate::NumberCmp { field, op, value }))
            }
            Token::Ident(s) | Token::Str(s) => {
                if let Some((amount, unit)) = time::parse_relative(&s) {
                    return Ok(Expr::pred(Predicate::DateCmpRel {
                        field,
                        op,
                        amount,
                        unit,
                    }));
                }
                if let Some(at_ms) = time::parse_date_ms(&s) {
                    return Ok(Expr::pred(Predicate::DateCmpAbs { field, op, at_ms }));
                }
                Err(Error::query_parse(format!(
                    "expected a number, date or duration after comparison, found {s:?}"
                )))
            }
            other => Err(Error::query_parse(format!(
                "expected a comparison value, found {}",
                other.describe()
            ))),
        }
    }
}

fn parse_number(s: &str) -> Result<f64> {
    s.parse::<f64>()
        .map_err(|_| Error::query_parse(format!("invalid number {s:?}")))
}
