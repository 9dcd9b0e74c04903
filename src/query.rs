//! Query specifications.
//!
//! A query pairs a baseline ([`ClockSpec`]) with an expression that selects
//! files and a list of fields to render for each match. Subscriptions own a
//! query and rewrite its baseline after every delivery.
//!
//! Only a small expression language is supported: `true`, `false`,
//! `exists`, `not`, `allof`, `anyof`, `name` and `suffix`.

use crate::error::{Result, WatchError};
use crate::types::{ClockPosition, ClockSpec};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;

/// Fields rendered when the query does not name any.
pub const DEFAULT_FIELDS: &[&str] = &["name", "exists", "new", "size"];

const KNOWN_FIELDS: &[&str] = &["name", "exists", "new", "size"];

/// Default time a query waits to synchronize with the filesystem.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// Default time a query waits for the view lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// File metadata a view hands to a query for matching and rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    /// Path relative to the watched root.
    pub name: String,
    pub exists: bool,
    /// Created after the query's baseline.
    pub is_new: bool,
    pub size: u64,
}

/// Outcome of a successful query execution.
#[derive(Clone, Debug)]
pub struct QueryResult {
    /// Rendered matches.
    pub files: Vec<Value>,
    /// True if the result is a full enumeration rather than a delta.
    pub is_fresh_instance: bool,
    /// View position captured when the query took the view lock.
    pub clock_at_start: ClockPosition,
}

/// File selection expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expression {
    True,
    False,
    Exists,
    Not(Box<Expression>),
    AllOf(Vec<Expression>),
    AnyOf(Vec<Expression>),
    /// Basename equals one of the names.
    Name(Vec<String>),
    /// Extension equals one of the suffixes (case-insensitive).
    Suffix(Vec<String>),
}

impl Expression {
    /// Parse an expression term.
    pub fn parse(term: &Value) -> Result<Self> {
        match term {
            Value::String(op) => Self::parse_op(op, &[]),
            Value::Array(items) => {
                let op = items
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| parse_error("expression must start with an operator name"))?;
                Self::parse_op(op, &items[1..])
            }
            _ => Err(parse_error("expected an array or string for an expression term")),
        }
    }

    fn parse_op(op: &str, args: &[Value]) -> Result<Self> {
        match op {
            "true" => Ok(Expression::True),
            "false" => Ok(Expression::False),
            "exists" => Ok(Expression::Exists),
            "not" => match args {
                [inner] => Ok(Expression::Not(Box::new(Self::parse(inner)?))),
                _ => Err(parse_error("'not' expects exactly one term")),
            },
            "allof" => Ok(Expression::AllOf(
                args.iter().map(Self::parse).collect::<Result<_>>()?,
            )),
            "anyof" => Ok(Expression::AnyOf(
                args.iter().map(Self::parse).collect::<Result<_>>()?,
            )),
            "name" => Ok(Expression::Name(string_args(op, args)?)),
            "suffix" => Ok(Expression::Suffix(
                string_args(op, args)?
                    .into_iter()
                    .map(|s| s.to_lowercase())
                    .collect(),
            )),
            other => Err(parse_error(&format!("unknown expression term '{}'", other))),
        }
    }

    /// Check whether a file matches.
    pub fn matches(&self, file: &FileInfo) -> bool {
        match self {
            Expression::True => true,
            Expression::False => false,
            Expression::Exists => file.exists,
            Expression::Not(inner) => !inner.matches(file),
            Expression::AllOf(terms) => terms.iter().all(|t| t.matches(file)),
            Expression::AnyOf(terms) => terms.iter().any(|t| t.matches(file)),
            Expression::Name(names) => {
                let base = Path::new(&file.name)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(&file.name);
                names.iter().any(|n| n == base)
            }
            Expression::Suffix(suffixes) => Path::new(&file.name)
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| {
                    let ext = ext.to_lowercase();
                    suffixes.iter().any(|s| *s == ext)
                })
                .unwrap_or(false),
        }
    }
}

/// `["name", "a"]` or `["name", ["a", "b"]]`.
fn string_args(op: &str, args: &[Value]) -> Result<Vec<String>> {
    let invalid = || parse_error(&format!("'{}' expects a string or array of strings", op));
    match args {
        [Value::String(s)] => Ok(vec![s.clone()]),
        [Value::Array(items)] => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

fn parse_error(msg: &str) -> WatchError {
    WatchError::QueryParse(msg.to_string())
}

/// A compiled query.
#[derive(Clone, Debug)]
pub struct Query {
    /// Baseline; `None` produces a fresh-instance result.
    pub since: Option<ClockSpec>,
    pub expression: Expression,
    pub fields: Vec<String>,
    pub sync_timeout: Duration,
    pub lock_timeout: Duration,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            since: None,
            expression: Expression::True,
            fields: DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect(),
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl Query {
    /// Compile a query from its JSON specification.
    ///
    /// Keys this parser does not know about (including the subscription
    /// fields `defer`, `drop` and `defer_vcs`) are ignored.
    pub fn parse(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| parse_error("query must be an object"))?;

        let mut query = Query::default();

        if let Some(since) = obj.get("since") {
            let since = since
                .as_str()
                .ok_or_else(|| parse_error("'since' must be a clock string"))?;
            query.since = Some(
                since
                    .parse::<ClockSpec>()
                    .map_err(|e| WatchError::QueryParse(e.to_string()))?,
            );
        }

        if let Some(expr) = obj.get("expression") {
            query.expression = Expression::parse(expr)?;
        }

        if let Some(fields) = obj.get("fields") {
            let fields = fields
                .as_array()
                .ok_or_else(|| parse_error("'fields' must be an array of strings"))?;
            let mut parsed = Vec::with_capacity(fields.len());
            for field in fields {
                let name = field
                    .as_str()
                    .ok_or_else(|| parse_error("'fields' must be an array of strings"))?;
                if !KNOWN_FIELDS.contains(&name) {
                    return Err(parse_error(&format!("unknown field name '{}'", name)));
                }
                parsed.push(name.to_string());
            }
            if parsed.is_empty() {
                return Err(parse_error("'fields' must not be empty"));
            }
            query.fields = parsed;
        }

        if let Some(ms) = timeout_field(obj, "sync_timeout")? {
            query.sync_timeout = ms;
        }
        if let Some(ms) = timeout_field(obj, "lock_timeout")? {
            query.lock_timeout = ms;
        }

        Ok(query)
    }

    /// Render a matched file according to the query's field list.
    pub fn render(&self, file: &FileInfo) -> Value {
        let mut out = Map::new();
        for field in &self.fields {
            let value = match field.as_str() {
                "name" => Value::from(file.name.clone()),
                "exists" => Value::from(file.exists),
                "new" => Value::from(file.is_new),
                "size" => Value::from(file.size),
                _ => continue,
            };
            out.insert(field.clone(), value);
        }
        Value::Object(out)
    }
}

fn timeout_field(obj: &Map<String, Value>, key: &str) -> Result<Option<Duration>> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|ms| Some(Duration::from_millis(ms)))
            .ok_or_else(|| parse_error(&format!("'{}' must be a non-negative integer", key))),
    }
}
