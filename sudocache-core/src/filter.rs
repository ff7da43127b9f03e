//! Match expressions over cached entries.
//!
//! A [`MatchExpr`] is the structural query the cache evaluates against its
//! entries. It renders to the LDAP-style filter text understood by directory
//! caches (`(&(objectClass=sudoRule)(|(sudoUser=ALL)))`) and can be parsed
//! back from that text, so callers holding a textual purge filter can still
//! use the typed API.
//!
//! Literal values are escaped on output per RFC 4515 (`*`, `(`, `)`, `\` and
//! NUL become `\2a`, `\28`, `\29`, `\5c`, `\00`). The only wildcard forms
//! supported are a trailing `*` ([`MatchExpr::Prefix`]) and a bare `*`
//! ([`MatchExpr::Present`]).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{RuleAttrs, SudoResult, ValidationError};

/// Structural match expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum MatchExpr {
    /// All children must match. An empty conjunction matches everything.
    And { children: Vec<MatchExpr> },
    /// At least one child must match. An empty disjunction matches nothing.
    Or { children: Vec<MatchExpr> },
    /// Negation.
    Not { child: Box<MatchExpr> },
    /// Some value of `attribute` equals `value`.
    Eq { attribute: String, value: String },
    /// Some value of `attribute` starts with `prefix`.
    Prefix { attribute: String, prefix: String },
    /// `attribute` has at least one value.
    Present { attribute: String },
}

impl MatchExpr {
    /// Create an equality clause.
    pub fn eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        MatchExpr::Eq {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Create a prefix (trailing wildcard) clause.
    pub fn prefix(attribute: impl Into<String>, prefix: impl Into<String>) -> Self {
        MatchExpr::Prefix {
            attribute: attribute.into(),
            prefix: prefix.into(),
        }
    }

    /// Create a presence clause.
    pub fn present(attribute: impl Into<String>) -> Self {
        MatchExpr::Present {
            attribute: attribute.into(),
        }
    }

    pub fn and(children: Vec<MatchExpr>) -> Self {
        MatchExpr::And { children }
    }

    pub fn or(children: Vec<MatchExpr>) -> Self {
        MatchExpr::Or { children }
    }

    pub fn negate(child: MatchExpr) -> Self {
        MatchExpr::Not {
            child: Box::new(child),
        }
    }

    /// Evaluate against an entry.
    ///
    /// Attribute names compare case-insensitively; values compare exactly.
    pub fn matches(&self, entry: &RuleAttrs) -> bool {
        match self {
            MatchExpr::And { children } => children.iter().all(|c| c.matches(entry)),
            MatchExpr::Or { children } => children.iter().any(|c| c.matches(entry)),
            MatchExpr::Not { child } => !child.matches(entry),
            MatchExpr::Eq { attribute, value } => {
                entry.values(attribute).iter().any(|v| v == value)
            }
            MatchExpr::Prefix { attribute, prefix } => entry
                .values(attribute)
                .iter()
                .any(|v| v.starts_with(prefix.as_str())),
            MatchExpr::Present { attribute } => entry.contains(attribute),
        }
    }

    /// Render as filter text.
    pub fn to_filter_string(&self) -> String {
        self.to_string()
    }

    /// Parse filter text produced by [`to_filter_string`](Self::to_filter_string)
    /// or by an equivalent directory filter.
    pub fn parse(input: &str) -> SudoResult<MatchExpr> {
        let mut parser = FilterParser {
            input: input.as_bytes(),
            pos: 0,
        };
        parser.skip_ws();
        let expr = parser.parse_filter(0)?;
        parser.skip_ws();
        if parser.pos != parser.input.len() {
            return Err(parser.error("trailing characters after filter"));
        }
        Ok(expr)
    }
}

impl fmt::Display for MatchExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchExpr::And { children } => {
                f.write_str("(&")?;
                for child in children {
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
            MatchExpr::Or { children } => {
                f.write_str("(|")?;
                for child in children {
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
            MatchExpr::Not { child } => write!(f, "(!{child})"),
            MatchExpr::Eq { attribute, value } => {
                write!(f, "({attribute}={})", escape_value(value))
            }
            MatchExpr::Prefix { attribute, prefix } => {
                write!(f, "({attribute}={}*)", escape_value(prefix))
            }
            MatchExpr::Present { attribute } => write!(f, "({attribute}=*)"),
        }
    }
}

/// Escape a literal assertion value.
pub fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            other => out.push(other),
        }
    }
    out
}

// Deeply nested input is rejected rather than recursing without bound.
const MAX_DEPTH: usize = 64;

struct FilterParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl FilterParser<'_> {
    fn error(&self, reason: &str) -> crate::SudoCacheError {
        ValidationError::InvalidFilter {
            position: self.pos,
            reason: reason.to_string(),
        }
        .into()
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> SudoResult<()> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", byte as char)))
        }
    }

    fn parse_filter(&mut self, depth: usize) -> SudoResult<MatchExpr> {
        if depth > MAX_DEPTH {
            return Err(self.error("filter nested too deeply"));
        }
        self.expect(b'(')?;
        let expr = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                MatchExpr::And {
                    children: self.parse_children(depth)?,
                }
            }
            Some(b'|') => {
                self.pos += 1;
                MatchExpr::Or {
                    children: self.parse_children(depth)?,
                }
            }
            Some(b'!') => {
                self.pos += 1;
                self.skip_ws();
                MatchExpr::Not {
                    child: Box::new(self.parse_filter(depth + 1)?),
                }
            }
            Some(_) => self.parse_item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.skip_ws();
        self.expect(b')')?;
        Ok(expr)
    }

    fn parse_children(&mut self, depth: usize) -> SudoResult<Vec<MatchExpr>> {
        let mut children = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'(') => children.push(self.parse_filter(depth + 1)?),
                _ => return Ok(children),
            }
        }
    }

    fn parse_item(&mut self) -> SudoResult<MatchExpr> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b';' || b == b'.' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.error("expected attribute name"));
        }
        let attribute = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
        self.expect(b'=')?;

        // Split the raw assertion on unescaped '*' so wildcards and escapes
        // are told apart before decoding.
        let mut segments: Vec<Vec<u8>> = vec![Vec::new()];
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated assertion value")),
                Some(b')') => break,
                Some(b'(') => return Err(self.error("unescaped '(' in value")),
                Some(b'*') => {
                    segments.push(Vec::new());
                    self.pos += 1;
                }
                Some(b'\\') => {
                    let byte = self.parse_escape()?;
                    if let Some(last) = segments.last_mut() {
                        last.push(byte);
                    }
                }
                Some(b) => {
                    if let Some(last) = segments.last_mut() {
                        last.push(b);
                    }
                    self.pos += 1;
                }
            }
        }

        let decode = |bytes: Vec<u8>, parser: &Self| {
            String::from_utf8(bytes).map_err(|_| parser.error("value is not valid UTF-8"))
        };

        match segments.len() {
            1 => {
                let value = decode(segments.remove(0), self)?;
                Ok(MatchExpr::Eq { attribute, value })
            }
            2 if segments[1].is_empty() => {
                if segments[0].is_empty() {
                    Ok(MatchExpr::Present { attribute })
                } else {
                    let prefix = decode(segments.remove(0), self)?;
                    Ok(MatchExpr::Prefix { attribute, prefix })
                }
            }
            _ => Err(self.error("only trailing '*' wildcards are supported")),
        }
    }

    fn parse_escape(&mut self) -> SudoResult<u8> {
        // consume the backslash
        self.pos += 1;
        let hex = self
            .input
            .get(self.pos..self.pos + 2)
            .ok_or_else(|| self.error("truncated escape sequence"))?;
        let text = std::str::from_utf8(hex).map_err(|_| self.error("bad escape sequence"))?;
        let byte = u8::from_str_radix(text, 16).map_err(|_| self.error("bad escape sequence"))?;
        self.pos += 2;
        Ok(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> RuleAttrs {
        RuleAttrs::new()
            .with("objectClass", "sudoRule")
            .with("name", "admins")
            .with("sudoUser", "%wheel")
            .with("sudoUser", "+devs")
    }

    #[test]
    fn test_render_nested() {
        let expr = MatchExpr::and(vec![
            MatchExpr::eq("objectClass", "sudoRule"),
            MatchExpr::or(vec![
                MatchExpr::eq("sudoUser", "ALL"),
                MatchExpr::prefix("sudoUser", "+"),
            ]),
        ]);
        assert_eq!(
            expr.to_filter_string(),
            "(&(objectClass=sudoRule)(|(sudoUser=ALL)(sudoUser=+*)))"
        );
    }

    #[test]
    fn test_render_escapes_literals() {
        let expr = MatchExpr::eq("sudoUser", "a*b(c)\\d");
        assert_eq!(expr.to_string(), "(sudoUser=a\\2ab\\28c\\29\\5cd)");
    }

    #[test]
    fn test_matches() {
        let e = entry();
        assert!(MatchExpr::eq("sudoUser", "%wheel").matches(&e));
        assert!(MatchExpr::eq("SUDOUSER", "%wheel").matches(&e));
        assert!(!MatchExpr::eq("sudoUser", "%WHEEL").matches(&e));
        assert!(MatchExpr::prefix("sudoUser", "+").matches(&e));
        assert!(MatchExpr::present("name").matches(&e));
        assert!(!MatchExpr::present("sudoHost").matches(&e));
        assert!(MatchExpr::negate(MatchExpr::present("sudoHost")).matches(&e));
        assert!(MatchExpr::and(vec![]).matches(&e));
        assert!(!MatchExpr::or(vec![]).matches(&e));
    }

    #[test]
    fn test_parse_roundtrip_of_rendered_filter() {
        let text = "(&(objectClass=sudoRule)(|(sudoUser=ALL)(name=defaults)(sudoUser=#1000)(sudoUser=%wheel)(sudoUser=+*)))";
        let expr = MatchExpr::parse(text).unwrap();
        assert_eq!(expr.to_string(), text);
        match &expr {
            MatchExpr::And { children } => assert_eq!(children.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_escapes_and_wildcards() {
        assert_eq!(
            MatchExpr::parse("(sudoUser=a\\2ab)").unwrap(),
            MatchExpr::eq("sudoUser", "a*b")
        );
        assert_eq!(
            MatchExpr::parse("(cn=*)").unwrap(),
            MatchExpr::present("cn")
        );
        assert_eq!(
            MatchExpr::parse(" (!(cn=x)) ").unwrap(),
            MatchExpr::negate(MatchExpr::eq("cn", "x"))
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "",
            "cn=x",
            "(cn=x",
            "(=x)",
            "(cn=a*b)",
            "(cn=*x)",
            "(cn=x))",
            "(cn=\\zz)",
            "(cn=\\2)",
            "(&(cn=x)",
        ] {
            let err = MatchExpr::parse(bad).unwrap_err();
            assert!(
                matches!(
                    err,
                    crate::SudoCacheError::Validation(ValidationError::InvalidFilter { .. })
                ),
                "{bad:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_parse_rejects_deep_nesting() {
        let text = format!("{}(cn=x){}", "(!".repeat(100), ")".repeat(100));
        assert!(MatchExpr::parse(&text).is_err());
    }
}
