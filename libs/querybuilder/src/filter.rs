//! Parsed filter expressions and their PostgreSQL rendering
//!
//! A [`FilterExpression`] is an ordered list of [`Clause`]s that are always
//! conjoined. Each clause renders independently to a predicate fragment; the
//! caller interpolates the joined fragment into its own `WHERE` clause.

use std::fmt;

/// Column that accepts the string matching operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringField {
    Name,
    Hostname,
    Filename,
}

impl StringField {
    pub fn parse(selector: &str) -> Option<Self> {
        match selector.to_ascii_lowercase().as_str() {
            "name" => Some(Self::Name),
            "hostname" => Some(Self::Hostname),
            "filename" => Some(Self::Filename),
            _ => None,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Hostname => "hostname",
            Self::Filename => "filename",
        }
    }
}

/// String matching operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOperator {
    /// `=`
    Equal,
    /// `~^`
    StartsWith,
    /// `~`
    Matches,
    /// `~*`
    MatchesInsensitive,
    /// `!~`
    NotMatches,
    /// `!~*`
    NotMatchesInsensitive,
}

impl StringOperator {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "=" => Some(Self::Equal),
            "~^" => Some(Self::StartsWith),
            "~" => Some(Self::Matches),
            "~*" => Some(Self::MatchesInsensitive),
            "!~" => Some(Self::NotMatches),
            "!~*" => Some(Self::NotMatchesInsensitive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::StartsWith => "~^",
            Self::Matches => "~",
            Self::MatchesInsensitive => "~*",
            Self::NotMatches => "!~",
            Self::NotMatchesInsensitive => "!~*",
        }
    }
}

/// Comparison operators for nested document values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "=" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Gte),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Lte),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

/// Right-hand side of a nested document comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Text(String),
}

/// One comparison within a filter
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// `tags.key = value`
    TagEquals { key: Vec<String>, value: String },
    /// `Tags = ["a","b"]`: every listed tag present
    TagsContainAll(Vec<String>),
    /// `Name ~^ "web"` and friends
    Field {
        field: StringField,
        operator: StringOperator,
        value: String,
    },
    /// `/free.Memory.Free > 10000000`
    JsonPath {
        path: Vec<String>,
        comparison: Comparison,
        value: Literal,
    },
    /// `Logline search error && timeout`
    Search { terms: String },
}

impl Clause {
    /// PostgreSQL predicate fragment for this clause
    pub fn to_sql(&self) -> String {
        match self {
            Self::TagEquals { key, value } => {
                format!("tags #>> '{}' = {}", path_literal(key), quote(value))
            }
            Self::TagsContainAll(tags) => {
                let items: Vec<_> = tags.iter().map(|t| quote(t)).collect();
                format!("tags ?& array[{}]", items.join(","))
            }
            Self::Field {
                field,
                operator: StringOperator::StartsWith,
                value,
            } => format!(
                "{} LIKE '{}%'",
                field.column(),
                escape(&escape_like(value))
            ),
            Self::Field {
                field,
                operator,
                value,
            } => format!("{} {} {}", field.column(), operator.as_str(), quote(value)),
            Self::JsonPath {
                path,
                comparison,
                value: Literal::Number(n),
            } => format!(
                "(data #>> '{}')::float8 {} {}",
                path_literal(path),
                comparison.as_sql(),
                n
            ),
            Self::JsonPath {
                path,
                comparison,
                value: Literal::Text(s),
            } => format!(
                "data #>> '{}' {} {}",
                path_literal(path),
                comparison.as_sql(),
                quote(s)
            ),
            Self::Search { terms } => full_text_search("logline", terms),
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

/// Conjunction of clauses in input order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterExpression {
    pub clauses: Vec<Clause>,
}

impl FilterExpression {
    pub fn new(clauses: Vec<Clause>) -> Self {
        Self { clauses }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Clauses joined with ` and `; empty when there are no clauses
    pub fn to_sql(&self) -> String {
        self.clauses
            .iter()
            .map(Clause::to_sql)
            .collect::<Vec<_>>()
            .join(" and ")
    }
}

/// Single-quoted SQL string literal
fn quote(value: &str) -> String {
    format!("'{}'", escape(value))
}

fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// `'{a,b,c}'` text array used by the `#>>` operator
fn path_literal(path: &[String]) -> String {
    format!("{{{}}}", escape(&path.join(",")))
}

/// Term groups separated by `&&` / `||` become tsquery calls joined by the
/// same operators. A group with its own `|` or `&` is taken as raw tsquery
/// syntax, anything else as plain text.
fn full_text_search(column: &str, terms: &str) -> String {
    fn flush(group: &mut Vec<&str>, parts: &mut Vec<String>) {
        if group.is_empty() {
            return;
        }
        let text = group.join(" ");
        let function = if text.contains('|') || text.contains('&') {
            "to_tsquery"
        } else {
            "plainto_tsquery"
        };
        parts.push(format!("{}('english', {})", function, quote(&text)));
        group.clear();
    }

    let mut parts = Vec::new();
    let mut group: Vec<&str> = Vec::new();

    for word in terms.split_whitespace() {
        if word == "&&" || word == "||" {
            flush(&mut group, &mut parts);
            parts.push(word.to_string());
        } else {
            group.push(word);
        }
    }
    flush(&mut group, &mut parts);

    format!(
        "(to_tsvector('english', regexp_replace({col}, '[^\\w]+', ' ', 'gi')) || to_tsvector('english', {col})) @@ ({query})",
        col = column,
        query = parts.join(" ")
    )
}
