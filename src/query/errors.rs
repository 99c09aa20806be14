#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

/// Structured errors emitted while building or compiling a search query.
///
/// Compilation passes never fail on data they do not understand; they fold
/// such filters to constants instead. The variants below cover malformed
/// input and namespaces that cannot be resolved against an archive.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Column path could not be split into tokens.
    #[error("invalid column path '{path}': {reason}")]
    ColumnTokenization { path: String, reason: &'static str },
    /// A comparison filter was declared without a literal.
    #[error("operator '{op}' on '{column}' requires a literal operand")]
    MissingOperand { column: String, op: &'static str },
    /// An existence filter was given a literal it cannot use.
    #[error("operator '{op}' on '{column}' does not accept a literal operand")]
    UnexpectedOperand { column: String, op: &'static str },
    /// JSON value cannot be turned into a query literal.
    #[error("unsupported literal {value}")]
    InvalidLiteral { value: String },
    /// Timestamp literal failed to parse or does not fit in 64-bit milliseconds.
    #[error("invalid timestamp literal '{value}'")]
    InvalidTimestamp { value: String },
    /// Boolean connective with no operands.
    #[error("{context} requires at least one operand")]
    EmptyPredicate { context: &'static str },
    /// Filter namespace that must be consumed before schema matching survived.
    #[error("namespace '{namespace}' on column '{column}' cannot be resolved against the schema tree")]
    UnsupportedNamespace {
        column: String,
        namespace: &'static str,
    },
    /// Projection column is not a concrete path in the default namespace.
    #[error("projection column '{column}' must be a concrete path")]
    InvalidProjection { column: String },
    /// Projection column listed twice.
    #[error("projection column '{column}' listed more than once")]
    DuplicateProjection { column: String },
}

/// Convenience wrapper that formats query errors with their codes.
pub struct QueryErrorWithCode<'a>(pub &'a QueryError);

impl fmt::Display for QueryErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}

impl QueryError {
    /// Builds a [`QueryError::ColumnTokenization`] for `path`.
    pub fn tokenization(path: impl Into<String>, reason: &'static str) -> Self {
        QueryError::ColumnTokenization {
            path: path.into(),
            reason,
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::ColumnTokenization { .. } => "ColumnTokenization",
            QueryError::MissingOperand { .. } => "MissingOperand",
            QueryError::UnexpectedOperand { .. } => "UnexpectedOperand",
            QueryError::InvalidLiteral { .. } => "InvalidLiteral",
            QueryError::InvalidTimestamp { .. } => "InvalidTimestamp",
            QueryError::EmptyPredicate { .. } => "EmptyPredicate",
            QueryError::UnsupportedNamespace { .. } => "UnsupportedNamespace",
            QueryError::InvalidProjection { .. } => "InvalidProjection",
            QueryError::DuplicateProjection { .. } => "DuplicateProjection",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coded_display_prefixes_variant_code() {
        let err = QueryError::tokenization("a..b", "empty token");
        assert_eq!(
            QueryErrorWithCode(&err).to_string(),
            "[ColumnTokenization] invalid column path 'a..b': empty token"
        );
    }
}
