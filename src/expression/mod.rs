//! Expressions - the binding strings consumed by directives and text bindings.
//!
//! Only the small path language needed to reach collections and locals:
//!
//! ```text
//! expr    := primary postfix*
//! primary := '@' ident        local, resolved through the frame chain
//!          | ident            host property
//!          | integer | 'string' | true | false | null
//! postfix := '.' ident | '[' expr ']'
//! ```
//!
//! `@item.values[0]`, `items`, `@value` are all valid.

mod directive;
mod evaluator;

pub use directive::*;
pub use evaluator::*;

use std::fmt;

use crate::error::ParseError;

/// A parsed expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Local(String),
    Property(String),
    Int(i64),
    Str(String),
    Bool(bool),
    Null,
    Field(Box<Expression>, String),
    Index(Box<Expression>, Box<Expression>),
}

impl Expression {
    pub fn parse(input: &str) -> Result<Expression, ParseError> {
        let mut parser = Parser {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        };
        let expr = parser.expression()?;
        parser.skip_ws();
        if parser.pos < parser.bytes.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    /// Locals referenced anywhere in the expression.
    pub fn locals(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_locals(&mut out);
        out
    }

    fn collect_locals<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expression::Local(name) => out.push(name),
            Expression::Field(base, _) => base.collect_locals(out),
            Expression::Index(base, index) => {
                base.collect_locals(out);
                index.collect_locals(out);
            }
            _ => {}
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Local(name) => write!(f, "@{name}"),
            Expression::Property(name) => f.write_str(name),
            Expression::Int(n) => write!(f, "{n}"),
            Expression::Str(s) => write!(f, "'{s}'"),
            Expression::Bool(b) => write!(f, "{b}"),
            Expression::Null => f.write_str("null"),
            Expression::Field(base, field) => write!(f, "{base}.{field}"),
            Expression::Index(base, index) => write!(f, "{base}[{index}]"),
        }
    }
}

/// Whether `name` is a valid local/property identifier.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

// =============================================================================
// Parser
// =============================================================================

struct Parser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> ParseError {
        ParseError::new(self.input, self.pos, message)
    }

    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expression(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.primary()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'.') => {
                    self.pos += 1;
                    self.skip_ws();
                    let field = self.ident()?;
                    expr = Expression::Field(Box::new(expr), field);
                }
                Some(b'[') => {
                    self.pos += 1;
                    let index = self.expression()?;
                    self.skip_ws();
                    if self.peek() != Some(b']') {
                        return Err(self.error("expected `]`"));
                    }
                    self.pos += 1;
                    expr = Expression::Index(Box::new(expr), Box::new(index));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Expression, ParseError> {
        self.skip_ws();
        match self.peek() {
            Some(b'@') => {
                self.pos += 1;
                Ok(Expression::Local(self.ident()?))
            }
            Some(b'\'') => self.string(),
            Some(c) if c.is_ascii_digit() || c == b'-' => self.integer(),
            Some(_) => {
                let ident = self.ident()?;
                Ok(match ident.as_str() {
                    "true" => Expression::Bool(true),
                    "false" => Expression::Bool(false),
                    "null" => Expression::Null,
                    _ => Expression::Property(ident),
                })
            }
            None => Err(self.error("expected expression")),
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            let ok = if self.pos == start {
                c.is_ascii_alphabetic() || c == b'_' || c == b'$'
            } else {
                c.is_ascii_alphanumeric() || c == b'_' || c == b'$'
            };
            if !ok {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected identifier"));
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn integer(&mut self) -> Result<Expression, ParseError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        self.input[start..self.pos]
            .parse()
            .map(Expression::Int)
            .map_err(|_| ParseError::new(self.input, start, "invalid integer"))
    }

    fn string(&mut self) -> Result<Expression, ParseError> {
        let start = self.pos;
        self.pos += 1;
        let body_start = self.pos;
        while let Some(c) = self.peek() {
            if c == b'\'' {
                let body = self.input[body_start..self.pos].to_string();
                self.pos += 1;
                return Ok(Expression::Str(body));
            }
            self.pos += 1;
        }
        Err(ParseError::new(self.input, start, "unterminated string"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_paths() {
        let expr = Expression::parse("@item.values[0]").unwrap();
        assert_eq!(
            expr,
            Expression::Index(
                Box::new(Expression::Field(
                    Box::new(Expression::Local("item".into())),
                    "values".into()
                )),
                Box::new(Expression::Int(0)),
            )
        );
        assert_eq!(expr.to_string(), "@item.values[0]");
    }

    #[test]
    fn test_parse_literals_and_properties() {
        assert_eq!(Expression::parse(" items ").unwrap(), Expression::Property("items".into()));
        assert_eq!(Expression::parse("-3").unwrap(), Expression::Int(-3));
        assert_eq!(Expression::parse("'a b'").unwrap(), Expression::Str("a b".into()));
        assert_eq!(Expression::parse("null").unwrap(), Expression::Null);
    }

    #[test]
    fn test_parse_errors_report_offset() {
        let err = Expression::parse("@").unwrap_err();
        assert_eq!(err.offset, 1);
        assert!(Expression::parse("items]").is_err());
        assert!(Expression::parse("@a[1").is_err());
        assert!(Expression::parse("'open").is_err());
    }

    #[test]
    fn test_locals_lists_references() {
        let expr = Expression::parse("@item.values[@index]").unwrap();
        assert_eq!(expr.locals(), vec!["item", "index"]);
    }

    #[test]
    fn test_identifier_check() {
        assert!(is_identifier("item"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier(""));
    }
}
