//! Parser for the one InfluxQL shape legacy clients send:
//! `SELECT LAST(<column>) FROM <metric> WHERE <key>=<value>`.
//!
//! Keywords are case-sensitive. The scanner walks the input clause by clause so
//! a rejection names the clause that did not match.

use crate::error::{Result, ServiceError};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegacyQuery {
    pub column: String,
    pub metric: String,
    pub where_key: String,
    pub where_value: String,
}

pub fn parse(input: &str) -> Result<LegacyQuery> {
    let mut scanner = Scanner::new(input);

    scanner.skip_whitespace();
    scanner.keyword("SELECT")?;
    scanner.separator("SELECT")?;

    if !scanner.eat("LAST(") {
        return Err(invalid("expected LAST(<column>) after SELECT, only LAST is supported"));
    }
    let column = scanner.take_while(|c| c != ')' && c != '\n');
    if column.is_empty() {
        return Err(invalid("LAST() requires a column"));
    }
    if !scanner.eat(")") {
        return Err(invalid("unterminated LAST( call"));
    }
    scanner.separator("LAST(...)")?;

    scanner.keyword("FROM")?;
    scanner.separator("FROM")?;
    let metric = scanner.take_while(|c| !is_space(c));
    if metric.is_empty() {
        return Err(invalid("expected metric name after FROM"));
    }
    scanner.separator("metric name")?;

    scanner.keyword("WHERE")?;
    scanner.separator("WHERE")?;
    let (where_key, where_value) = parse_predicate(&mut scanner)?;

    scanner.skip_whitespace();
    if !scanner.is_done() {
        return Err(invalid(format!(
            "unexpected trailing input \"{}\", only a single key=value predicate is supported",
            scanner.rest()
        )));
    }

    Ok(LegacyQuery {
        column: column.to_string(),
        metric: metric.to_string(),
        where_key: where_key.to_string(),
        where_value: where_value.to_string(),
    })
}

fn parse_predicate<'a>(scanner: &mut Scanner<'a>) -> Result<(&'a str, &'a str)> {
    let key = scanner.take_while(|c| !is_space(c) && c != '=');
    if key.is_empty() {
        return Err(invalid("where key is empty"));
    }
    if !scanner.eat("=") {
        return Err(invalid(
            "where clause must be a single key=value equality predicate",
        ));
    }

    let quote = scanner.peek().filter(|c| is_quote(*c));
    if quote.is_some() {
        scanner.advance(1);
    }

    let value = scanner.take_while(|c| !is_space(c) && c != '=' && !is_quote(c));
    if value.is_empty() {
        return Err(invalid("where value is empty"));
    }

    match (quote, scanner.peek()) {
        (Some(open), Some(close)) if open == close => scanner.advance(1),
        (Some(_), _) => return Err(invalid("unterminated quote in where value")),
        (None, Some(close)) if is_quote(close) => {
            return Err(invalid("unbalanced quote in where value"))
        }
        (None, _) => {}
    }

    Ok((key, value))
}

fn invalid(message: impl Into<String>) -> ServiceError {
    ServiceError::InvalidQueryFormat(message.into())
}

fn is_space(c: char) -> bool {
    c.is_ascii_whitespace()
}

fn is_quote(c: char) -> bool {
    c == '\'' || c == '"'
}

struct Scanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn is_done(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    // Callers only advance past ASCII characters they have already peeked.
    fn advance(&mut self, bytes: usize) {
        self.pos = (self.pos + bytes).min(self.input.len());
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let rest = self.rest();
        let end = rest.find(|c: char| !pred(c)).unwrap_or(rest.len());
        self.pos += end;
        &rest[..end]
    }

    fn skip_whitespace(&mut self) -> bool {
        !self.take_while(is_space).is_empty()
    }

    fn keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat(keyword) {
            Ok(())
        } else {
            Err(invalid(format!("expected {keyword} clause")))
        }
    }

    fn separator(&mut self, after: &str) -> Result<()> {
        if self.skip_whitespace() {
            Ok(())
        } else {
            Err(invalid(format!("expected whitespace after {after}")))
        }
    }
}
