//! Query construction: a fluent builder and a serde JSON query AST.
//!
//! ```
//! use sift::query::QueryBuilder;
//!
//! let query = QueryBuilder::new()
//!     .eq("level", "error")
//!     .or(|b| b.gt("status", 499).exists("exception"))
//!     .build()?;
//! assert_eq!(
//!     query.to_string(),
//!     "(level = \"error\" AND (status > 499 OR exception EXISTS))"
//! );
//! # Ok::<(), sift::query::QueryError>(())
//! ```

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::query::{
    ast::{ExprId, Filter, FilterOperation, Query},
    column::ColumnDescriptor,
    errors::QueryError,
    literal::Literal,
};

/// JSON query AST.
///
/// `{"and": [...]}`, `{"or": [...]}`, `{"not": {...}}` and
/// `{"filter": {"column": "a.b", "op": "eq", "value": ...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuerySpec {
    /// Conjunction.
    And(Vec<QuerySpec>),
    /// Disjunction.
    Or(Vec<QuerySpec>),
    /// Negation.
    Not(Box<QuerySpec>),
    /// Column predicate.
    Filter(FilterSpec),
}

/// Filter node of a [`QuerySpec`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Column path.
    pub column: String,
    /// Operator.
    pub op: FilterOperation,
    /// Literal; `Some(Null)` when the JSON carried an explicit `null`.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<JsonValue>,
}

fn deserialize_present<'de, D>(deserializer: D) -> std::result::Result<Option<JsonValue>, D::Error>
where
    D: Deserializer<'de>,
{
    JsonValue::deserialize(deserializer).map(Some)
}

impl QuerySpec {
    /// Parses the JSON form.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Lowers the JSON form into a [`Query`].
    pub fn to_query(&self) -> std::result::Result<Query, QueryError> {
        let clause = self.to_clause()?;
        Ok(lower_root(&clause))
    }

    fn to_clause(&self) -> std::result::Result<Clause, QueryError> {
        match self {
            QuerySpec::And(children) => {
                if children.is_empty() {
                    return Err(QueryError::EmptyPredicate { context: "and" });
                }
                Ok(Clause::And(children.iter().map(Self::to_clause).collect::<std::result::Result<_, _>>()?))
            }
            QuerySpec::Or(children) => {
                if children.is_empty() {
                    return Err(QueryError::EmptyPredicate { context: "or" });
                }
                Ok(Clause::Or(children.iter().map(Self::to_clause).collect::<std::result::Result<_, _>>()?))
            }
            QuerySpec::Not(child) => Ok(Clause::Not(Box::new(child.to_clause()?))),
            QuerySpec::Filter(spec) => {
                let literal = spec.value.as_ref().map(literal_from_json).transpose()?;
                filter_clause(&spec.column, spec.op, literal)
            }
        }
    }
}

/// Converts a JSON value into a query literal.
///
/// Numbers become integers (floats when fractional or out of range), `null`
/// becomes the unquoted `null` string literal, and `{"timestamp": ...}`
/// takes either an RFC 3339 string or epoch milliseconds.
pub fn literal_from_json(value: &JsonValue) -> std::result::Result<Literal, QueryError> {
    let invalid = || QueryError::InvalidLiteral {
        value: value.to_string(),
    };
    match value {
        JsonValue::Null => Ok(Literal::string("null")),
        JsonValue::Bool(v) => Ok(Literal::Boolean(*v)),
        JsonValue::String(text) => Ok(Literal::string(text.as_str())),
        JsonValue::Number(number) => match number.as_i64() {
            Some(v) => Ok(Literal::int(v)),
            None => number.as_f64().map(Literal::float).ok_or_else(invalid),
        },
        JsonValue::Object(fields) if fields.len() == 1 => match fields.get("timestamp") {
            Some(JsonValue::String(text)) => Literal::timestamp_from_rfc3339(text),
            Some(JsonValue::Number(number)) => number
                .as_i64()
                .map(Literal::Timestamp)
                .ok_or_else(|| QueryError::InvalidTimestamp {
                    value: number.to_string(),
                }),
            _ => Err(invalid()),
        },
        JsonValue::Object(_) | JsonValue::Array(_) => Err(invalid()),
    }
}

/// Builder-side expression before it is placed in an arena.
#[derive(Clone, Debug)]
enum Clause {
    Filter(Filter),
    And(Vec<Clause>),
    Or(Vec<Clause>),
    Not(Box<Clause>),
}

fn filter_clause(column: &str, op: FilterOperation, literal: Option<Literal>) -> std::result::Result<Clause, QueryError> {
    let descriptor = ColumnDescriptor::parse(column)?;
    match (op.is_existence(), literal) {
        (true, Some(_)) => Err(QueryError::UnexpectedOperand {
            column: column.to_owned(),
            op: op.name(),
        }),
        (false, None) => Err(QueryError::MissingOperand {
            column: column.to_owned(),
            op: op.name(),
        }),
        (_, literal) => Ok(Clause::Filter(Filter {
            op,
            column: descriptor,
            operand: literal.map(Arc::new),
        })),
    }
}

fn lower_root(clause: &Clause) -> Query {
    let mut query = Query::empty();
    let root = lower(&mut query, clause, false);
    query.set_root(root);
    query.copy()
}

fn lower(query: &mut Query, clause: &Clause, inverted: bool) -> ExprId {
    match clause {
        Clause::Filter(filter) => query.add_filter(filter.clone(), inverted),
        Clause::And(children) => {
            let ops = children.iter().map(|child| lower(query, child, false)).collect();
            query.add_and(ops, inverted)
        }
        Clause::Or(children) => {
            let ops = children.iter().map(|child| lower(query, child, false)).collect();
            query.add_or(ops, inverted)
        }
        Clause::Not(child) => lower(query, child, !inverted),
    }
}

/// Fluent builder; top-level clauses are joined with `AND`.
#[derive(Debug, Default)]
pub struct QueryBuilder {
    clauses: Vec<Clause>,
    error: Option<QueryError>,
}

impl QueryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, column: &str, op: FilterOperation, literal: Option<Literal>) -> Self {
        if self.error.is_some() {
            return self;
        }
        match filter_clause(column, op, literal) {
            Ok(clause) => self.clauses.push(clause),
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// `column = value`.
    pub fn eq(self, column: &str, value: impl Into<Literal>) -> Self {
        self.push(column, FilterOperation::Eq, Some(value.into()))
    }

    /// `column != value`.
    pub fn neq(self, column: &str, value: impl Into<Literal>) -> Self {
        self.push(column, FilterOperation::Neq, Some(value.into()))
    }

    /// `column < value`.
    pub fn lt(self, column: &str, value: impl Into<Literal>) -> Self {
        self.push(column, FilterOperation::Lt, Some(value.into()))
    }

    /// `column <= value`.
    pub fn lte(self, column: &str, value: impl Into<Literal>) -> Self {
        self.push(column, FilterOperation::Lte, Some(value.into()))
    }

    /// `column > value`.
    pub fn gt(self, column: &str, value: impl Into<Literal>) -> Self {
        self.push(column, FilterOperation::Gt, Some(value.into()))
    }

    /// `column >= value`.
    pub fn gte(self, column: &str, value: impl Into<Literal>) -> Self {
        self.push(column, FilterOperation::Gte, Some(value.into()))
    }

    /// `column EXISTS`.
    pub fn exists(self, column: &str) -> Self {
        self.push(column, FilterOperation::Exists, None)
    }

    /// `column NOT EXISTS`.
    pub fn not_exists(self, column: &str) -> Self {
        self.push(column, FilterOperation::NotExists, None)
    }

    /// Adds the conjunction of the clauses `build` adds.
    pub fn and<F>(self, build: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.nest(build, "and", Clause::And)
    }

    /// Adds the disjunction of the clauses `build` adds.
    pub fn or<F>(self, build: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.nest(build, "or", Clause::Or)
    }

    /// Adds the negated conjunction of the clauses `build` adds.
    pub fn not<F>(self, build: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.nest(build, "not", |mut clauses| {
            let inner = if clauses.len() == 1 {
                clauses.remove(0)
            } else {
                Clause::And(clauses)
            };
            Clause::Not(Box::new(inner))
        })
    }

    fn nest<F>(mut self, build: F, context: &'static str, wrap: fn(Vec<Clause>) -> Clause) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        if self.error.is_some() {
            return self;
        }
        let nested = build(QueryBuilder::new());
        if let Some(err) = nested.error {
            self.error = Some(err);
        } else if nested.clauses.is_empty() {
            self.error = Some(QueryError::EmptyPredicate { context });
        } else {
            self.clauses.push(wrap(nested.clauses));
        }
        self
    }

    /// Builds the query.
    pub fn build(self) -> std::result::Result<Query, QueryError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let mut clauses = self.clauses;
        match clauses.len() {
            0 => Err(QueryError::EmptyPredicate { context: "query" }),
            1 => Ok(lower_root(&clauses.remove(0))),
            _ => Ok(lower_root(&Clause::And(clauses))),
        }
    }
}
