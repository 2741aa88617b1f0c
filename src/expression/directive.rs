//! Repeating directive text: `[local:] source`.
//!
//! ```text
//! "items"                 → local = None (default `item`), source = items
//! "value: @item.values"   → local = value,                 source = @item.values
//! ```

use std::fmt;

use crate::error::ParseError;

use super::{is_identifier, Expression};

/// A parsed repeating directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// Element local name, `None` for the configured default.
    pub local: Option<String>,
    pub source: Expression,
    /// Key expression evaluated per element with the element bound.
    pub key: Option<Expression>,
    /// Original text, kept for diagnostics.
    pub text: String,
}

impl Directive {
    pub fn parse(text: &str) -> Result<Directive, ParseError> {
        let (local, source_text) = split_local(text)?;
        let source = Expression::parse(source_text)?;
        Ok(Directive {
            local,
            source,
            key: None,
            text: text.trim().to_string(),
        })
    }

    /// Attach a key expression (`[keyName:] expression` form).
    ///
    /// A `name:` prefix on the key text is accepted and ignored; the key is
    /// always exposed as `@key`.
    pub fn keyed_by(mut self, key: &str) -> Result<Directive, ParseError> {
        let (_, key_text) = split_local(key)?;
        self.key = Some(Expression::parse(key_text)?);
        Ok(self)
    }

    /// Element local name with the default applied.
    pub fn local_name<'a>(&'a self, default: &'a str) -> &'a str {
        self.local.as_deref().unwrap_or(default)
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn split_local(text: &str) -> Result<(Option<String>, &str), ParseError> {
    let Some(colon) = unquoted_colon(text) else {
        return Ok((None, text));
    };
    let (head, rest) = (&text[..colon], &text[colon + 1..]);
    let name = head.trim();
    if !is_identifier(name) {
        let offset = text.len() - text.trim_start().len();
        return Err(ParseError::new(text, offset, "local name must be an identifier"));
    }
    Ok((Some(name.to_string()), rest))
}

/// Byte offset of the first `:` outside a `'...'` literal.
fn unquoted_colon(text: &str) -> Option<usize> {
    let mut quoted = false;
    for (i, c) in text.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            ':' if !quoted => return Some(i),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_source_uses_default_local() {
        let directive = Directive::parse("items").unwrap();
        assert_eq!(directive.local, None);
        assert_eq!(directive.local_name("item"), "item");
        assert_eq!(directive.source, Expression::Property("items".into()));
    }

    #[test]
    fn test_local_prefix() {
        let directive = Directive::parse("value: @item.values").unwrap();
        assert_eq!(directive.local.as_deref(), Some("value"));
        assert_eq!(directive.source.to_string(), "@item.values");
        assert_eq!(directive.to_string(), "value: @item.values");
    }

    #[test]
    fn test_bad_local_prefix() {
        assert!(Directive::parse("1x: items").is_err());
        assert!(Directive::parse("value:").is_err());
    }

    #[test]
    fn test_key_expression() {
        let directive = Directive::parse("todos").unwrap().keyed_by("id: @item.id").unwrap();
        assert_eq!(directive.key.map(|k| k.to_string()), Some("@item.id".to_string()));
    }

    #[test]
    fn test_colon_inside_string_literal() {
        let directive = Directive::parse("items").unwrap().keyed_by("'a:b'").unwrap();
        assert_eq!(directive.key, Some(Expression::Str("a:b".into())));

        let directive = Directive::parse("items").unwrap().keyed_by("id: 'a:b'").unwrap();
        assert_eq!(directive.key, Some(Expression::Str("a:b".into())));

        let directive = Directive::parse("entry: groups['a:b']").unwrap();
        assert_eq!(directive.local.as_deref(), Some("entry"));
        assert_eq!(directive.source.to_string(), "groups['a:b']");
    }
}
