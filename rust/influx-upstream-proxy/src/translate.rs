//! Renders a parsed legacy query as a PromQL instant-query expression.

use crate::{
    error::{Result, ServiceError},
    parser::LegacyQuery,
};

/// How far `last_over_time` looks back for the most recent sample.
pub const LOOKBACK_WINDOW: &str = "1y";

/// Label that carries the legacy `db` form field.
pub const DATABASE_LABEL: &str = "db";

/// `last_over_time(<metric>_<column>{db="<database>", <key>="<value>"}[1y])`
///
/// Label values are quoted and escaped. The metric name and the where key are
/// written bare, so they must already be valid PromQL identifiers.
pub fn translate(query: &LegacyQuery, database: &str) -> Result<String> {
    let metric = format!("{}_{}", query.metric, query.column);
    if !is_metric_name(&metric) {
        return Err(ServiceError::InvalidQueryFormat(format!(
            "\"{metric}\" is not a valid metric name"
        )));
    }
    if !is_label_name(&query.where_key) {
        return Err(ServiceError::InvalidQueryFormat(format!(
            "\"{}\" is not a valid label name",
            query.where_key
        )));
    }

    Ok(format!(
        "last_over_time({}{{{}=\"{}\", {}=\"{}\"}}[{}])",
        metric,
        DATABASE_LABEL,
        escape_label_value(database),
        query.where_key,
        escape_label_value(&query.where_value),
        LOOKBACK_WINDOW,
    ))
}

// [a-zA-Z_:][a-zA-Z0-9_:]*
fn is_metric_name(name: &str) -> bool {
    is_identifier(name, |c| c.is_ascii_alphabetic() || c == '_' || c == ':')
}

// [a-zA-Z_][a-zA-Z0-9_]*
fn is_label_name(name: &str) -> bool {
    is_identifier(name, |c| c.is_ascii_alphabetic() || c == '_')
        && !name.contains(':')
}

fn is_identifier(name: &str, is_start: impl Fn(char) -> bool) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if is_start(first) => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        }
        _ => false,
    }
}

fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    escaped
}
