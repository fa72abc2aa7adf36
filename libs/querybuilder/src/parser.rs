//! Filter string parser
//!
//! ```text
//! filter  := clause ( " AND " clause )*
//! clause  := tags "." key "=" value
//!          | tags "=" "[" value ("," value)* "]"
//!          | (name | hostname | filename) strop value
//!          | logline "search" terms
//!          | path cmpop value
//! strop   := "=" | "~^" | "~" | "~*" | "!~" | "!~*"
//! cmpop   := "=" | "!=" | ">" | "<" | ">=" | "<="
//! ```
//!
//! Selector keywords are case-insensitive and values may be bare or quoted.
//! `AND` inside a single- or double-quoted value does not split clauses.

use crate::error::{FilterError, Result};
use crate::filter::{Clause, Comparison, FilterExpression, Literal, StringField, StringOperator};
use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;
use tracing::debug;

static CONJUNCTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+and\s+").unwrap());

static SELECTOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s=!<>~]+").unwrap());

static OPERATOR_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?P<op>[=!<>~^*]+)\s*(?P<value>.*)$").unwrap());

static SEARCH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s+search\s+(?P<terms>.+)$").unwrap());

static PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w/\-]+(?:\.[\w/\-]+)*$").unwrap());

/// Parse a filter string; an empty or blank string yields an empty expression
pub fn parse(input: &str) -> Result<FilterExpression> {
    if input.trim().is_empty() {
        return Ok(FilterExpression::default());
    }

    let clauses = split_clauses(input)
        .into_iter()
        .map(parse_clause)
        .collect::<Result<Vec<_>>>()?;

    debug!(clauses = clauses.len(), "Filter parsed");
    Ok(FilterExpression::new(clauses))
}

impl FromStr for FilterExpression {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self> {
        parse(s)
    }
}

fn split_clauses(input: &str) -> Vec<&str> {
    let mut clauses = Vec::new();
    let mut start = 0;

    for m in CONJUNCTION.find_iter(input) {
        if open_quote(&input[start..m.start()]).is_some() {
            continue;
        }
        clauses.push(&input[start..m.start()]);
        start = m.end();
    }
    clauses.push(&input[start..]);
    clauses
}

/// Quote character still unclosed at the end of `text`
fn open_quote(text: &str) -> Option<char> {
    text.chars().fold(None, |open, c| match open {
        Some(quote) if c == quote => None,
        None if c == '"' || c == '\'' => Some(c),
        open => open,
    })
}

fn parse_clause(raw: &str) -> Result<Clause> {
    let clause = raw.trim();
    let selector = SELECTOR
        .find(clause)
        .map(|m| m.as_str())
        .ok_or_else(|| FilterError::unrecognized(clause))?;
    let rest = &clause[selector.len()..];
    let keyword = selector.to_ascii_lowercase();

    if keyword == "tags" || keyword.starts_with("tags.") {
        return parse_tags(clause, &selector[4..], rest);
    }
    if let Some(field) = StringField::parse(&keyword) {
        return parse_string_field(clause, field, rest);
    }
    if keyword == "logline" {
        return parse_search(clause, rest);
    }
    if PATH.is_match(selector) {
        return parse_json_path(clause, selector, rest);
    }

    Err(FilterError::unrecognized(clause))
}

/// Operator and raw value following the selector
fn operator_value<'a>(clause: &str, rest: &'a str) -> Result<(&'a str, &'a str)> {
    let caps = OPERATOR_VALUE
        .captures(rest)
        .ok_or_else(|| FilterError::unrecognized(clause))?;

    match (caps.name("op"), caps.name("value")) {
        (Some(op), Some(value)) => Ok((op.as_str(), value.as_str())),
        _ => Err(FilterError::unrecognized(clause)),
    }
}

/// Strip one pair of surrounding quotes; reports whether the value was quoted
fn unquote(value: &str) -> (&str, bool) {
    let value = value.trim();
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return (&value[1..value.len() - 1], true);
        }
    }
    (value, false)
}

fn non_empty_value(clause: &str, raw: &str) -> Result<String> {
    let (value, _) = unquote(raw);
    if value.is_empty() {
        return Err(FilterError::invalid_value(clause, "missing value"));
    }
    Ok(value.to_string())
}

fn parse_tags(clause: &str, key: &str, rest: &str) -> Result<Clause> {
    let (op, raw) = operator_value(clause, rest)?;
    if op != "=" {
        return Err(FilterError::InvalidOperator {
            selector: "tags".to_string(),
            operator: op.to_string(),
        });
    }

    if let Some(key) = key.strip_prefix('.') {
        if !PATH.is_match(key) {
            return Err(FilterError::invalid_value(clause, "invalid tag key"));
        }
        return Ok(Clause::TagEquals {
            key: key.split('.').map(str::to_string).collect(),
            value: non_empty_value(clause, raw)?,
        });
    }

    let list = raw
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| FilterError::invalid_value(clause, "expected a bracketed tag list"))?;

    let tags = list
        .split(',')
        .map(|item| non_empty_value(clause, item))
        .collect::<Result<Vec<_>>>()?;

    Ok(Clause::TagsContainAll(tags))
}

fn parse_string_field(clause: &str, field: StringField, rest: &str) -> Result<Clause> {
    let (op, raw) = operator_value(clause, rest)?;
    let operator = StringOperator::parse(op).ok_or_else(|| FilterError::InvalidOperator {
        selector: field.column().to_string(),
        operator: op.to_string(),
    })?;

    Ok(Clause::Field {
        field,
        operator,
        value: non_empty_value(clause, raw)?,
    })
}

fn parse_search(clause: &str, rest: &str) -> Result<Clause> {
    match SEARCH.captures(rest).and_then(|caps| caps.name("terms")) {
        Some(terms) => {
            // Quotes only group words for the reader; tsquery groups by operator
            let terms = terms.as_str().replace('"', "");
            if terms.trim().is_empty() {
                return Err(FilterError::invalid_value(clause, "missing search terms"));
            }
            Ok(Clause::Search { terms })
        }
        None => Err(FilterError::InvalidOperator {
            selector: "logline".to_string(),
            operator: rest.split_whitespace().next().unwrap_or_default().to_string(),
        }),
    }
}

fn parse_json_path(clause: &str, selector: &str, rest: &str) -> Result<Clause> {
    let (op, raw) = operator_value(clause, rest)?;
    let comparison = Comparison::parse(op).ok_or_else(|| FilterError::InvalidOperator {
        selector: selector.to_string(),
        operator: op.to_string(),
    })?;

    let (value, quoted) = unquote(raw);
    if value.is_empty() {
        return Err(FilterError::invalid_value(clause, "missing value"));
    }

    let value = match value.parse::<f64>() {
        Ok(n) if !quoted && n.is_finite() => Literal::Number(n),
        _ => Literal::Text(value.to_string()),
    };

    Ok(Clause::JsonPath {
        path: selector.split('.').map(str::to_string).collect(),
        comparison,
        value,
    })
}
