#![forbid(unsafe_code)]

//! Matching descriptor tokens and a filter against raw JSON.
//!
//! Used for unstructured array content and for range-index metadata fields,
//! neither of which is decomposed into columns. Arrays are transparent: a
//! path matches if any element matches. A wildcard token spans zero or more
//! object levels.

use std::borrow::Cow;
use std::cmp::Ordering;

use serde_json::Value as JsonValue;

use crate::query::ast::FilterOperation;
use crate::query::column::DescriptorToken;
use crate::query::literal::{Literal, LiteralType, LiteralTypes};
use crate::search::string_query::WildcardPattern;

/// Returns true if `ordering` (value compared to literal) satisfies `op`.
pub fn ordering_satisfies(op: FilterOperation, ordering: Ordering) -> bool {
    match op {
        FilterOperation::Eq => ordering == Ordering::Equal,
        FilterOperation::Neq => ordering != Ordering::Equal,
        FilterOperation::Lt => ordering == Ordering::Less,
        FilterOperation::Lte => ordering != Ordering::Greater,
        FilterOperation::Gt => ordering == Ordering::Greater,
        FilterOperation::Gte => ordering != Ordering::Less,
        FilterOperation::Exists | FilterOperation::NotExists => false,
    }
}

/// Scalar test applied at the end of a JSON path.
///
/// `NotExists` is not expressible per scalar; callers test `Exists` and
/// negate the path result. String patterns are compiled once per predicate.
#[derive(Clone, Debug)]
pub struct ValuePredicate<'a> {
    op: FilterOperation,
    literal: Option<&'a Literal>,
    types: LiteralTypes,
    clp: Option<Cow<'a, WildcardPattern>>,
    var: Option<Cow<'a, WildcardPattern>>,
}

impl<'a> ValuePredicate<'a> {
    /// Builds a predicate, compiling the literal's string patterns.
    pub fn new(op: FilterOperation, literal: Option<&'a Literal>, types: LiteralTypes, case_sensitive: bool) -> Self {
        let compile = |ty: LiteralType, pattern: Option<Cow<'a, str>>| -> Option<Cow<'a, WildcardPattern>> {
            let pattern = pattern.filter(|_| types.contains(ty))?;
            Some(Cow::Owned(WildcardPattern::new(&pattern, case_sensitive)))
        };
        let clp = compile(LiteralType::ClpString, literal.and_then(|l| l.as_clp_string(op)));
        let var = compile(LiteralType::VarString, literal.and_then(|l| l.as_var_string(op)));
        ValuePredicate {
            op,
            literal,
            types,
            clp,
            var,
        }
    }

    /// Builds a predicate around patterns compiled elsewhere.
    pub fn with_patterns(
        op: FilterOperation,
        literal: Option<&'a Literal>,
        types: LiteralTypes,
        clp: Option<&'a WildcardPattern>,
        var: Option<&'a WildcardPattern>,
    ) -> Self {
        ValuePredicate {
            op,
            literal,
            types,
            clp: clp.map(Cow::Borrowed),
            var: var.map(Cow::Borrowed),
        }
    }

    /// Tests one scalar JSON value.
    pub fn matches_scalar(&self, value: &JsonValue) -> bool {
        let exists = self.op == FilterOperation::Exists;
        match value {
            JsonValue::Null => {
                self.types.contains(LiteralType::Null)
                    && (exists || (self.op == FilterOperation::Eq && self.literal.is_some_and(|l| l.as_null(self.op))))
            }
            JsonValue::Bool(v) => {
                self.types.contains(LiteralType::Boolean)
                    && (exists
                        || self
                            .literal
                            .and_then(|l| l.as_bool(self.op))
                            .is_some_and(|l| ordering_satisfies(self.op, v.cmp(&l))))
            }
            JsonValue::Number(number) => self.matches_number(number, exists),
            JsonValue::String(text) => {
                let ty = if text.contains(' ') {
                    LiteralType::ClpString
                } else {
                    LiteralType::VarString
                };
                if !self.types.contains(ty) {
                    return false;
                }
                if exists {
                    return true;
                }
                let pattern = match ty {
                    LiteralType::ClpString => self.clp.as_deref(),
                    _ => self.var.as_deref(),
                };
                match (pattern, self.op) {
                    (Some(pattern), FilterOperation::Eq) => pattern.is_match(text),
                    (Some(pattern), FilterOperation::Neq) => !pattern.is_match(text),
                    _ => false,
                }
            }
            JsonValue::Array(_) | JsonValue::Object(_) => false,
        }
    }

    fn matches_number(&self, number: &serde_json::Number, exists: bool) -> bool {
        if let Some(v) = number.as_i64() {
            return self.types.contains(LiteralType::Integer)
                && (exists || self.literal.is_some_and(|l| compare_signed(self.op, v, l)));
        }
        if let Some(v) = number.as_u64() {
            return self.types.contains(LiteralType::Integer)
                && (exists || self.literal.is_some_and(|l| compare_unsigned(self.op, v, l)));
        }
        match number.as_f64() {
            Some(v) => {
                self.types.contains(LiteralType::Float)
                    && (exists || self.literal.is_some_and(|l| compare_float(self.op, v, l)))
            }
            None => false,
        }
    }
}

/// Compares a signed integer value against `literal`.
pub fn compare_signed(op: FilterOperation, value: i64, literal: &Literal) -> bool {
    literal
        .as_int(op)
        .is_some_and(|l| ordering_satisfies(op, value.cmp(&l)))
}

/// Compares an integer above `i64::MAX` against `literal`.
pub fn compare_unsigned(op: FilterOperation, value: u64, literal: &Literal) -> bool {
    if let Some(l) = literal.as_int(op) {
        let ordering = match i64::try_from(value) {
            Ok(v) => v.cmp(&l),
            Err(_) => Ordering::Greater,
        };
        return ordering_satisfies(op, ordering);
    }
    compare_float(op, value as f64, literal)
}

/// Compares a float value against `literal`. NaN never matches.
pub fn compare_float(op: FilterOperation, value: f64, literal: &Literal) -> bool {
    literal
        .as_float(op)
        .and_then(|l| value.partial_cmp(&l))
        .is_some_and(|ordering| ordering_satisfies(op, ordering))
}

/// True if a scalar reachable from `value` along `tokens` satisfies
/// `predicate`.
pub fn path_matches(tokens: &[DescriptorToken], value: &JsonValue, predicate: &ValuePredicate<'_>) -> bool {
    match value {
        JsonValue::Array(items) => items.iter().any(|item| path_matches(tokens, item, predicate)),
        JsonValue::Object(fields) => match tokens.split_first() {
            None => false,
            Some((DescriptorToken::Key(key), rest)) => fields
                .get(key.as_str())
                .is_some_and(|child| path_matches(rest, child, predicate)),
            Some((DescriptorToken::Wildcard, rest)) => {
                (!rest.is_empty() && path_matches(rest, value, predicate))
                    || fields.values().any(|child| path_matches(tokens, child, predicate))
            }
        },
        scalar => match tokens {
            [] => predicate.matches_scalar(scalar),
            [DescriptorToken::Wildcard, rest @ ..] => path_matches(rest, scalar, predicate),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn key(name: &str) -> DescriptorToken {
        DescriptorToken::Key(name.to_owned())
    }

    #[test]
    fn arrays_are_transparent() {
        let literal = Literal::int(1000);
        let predicate = ValuePredicate::new(FilterOperation::Gt, Some(&literal), LiteralTypes::ALL, true);
        assert!(path_matches(&[key("b")], &json!([{"b": 500}, {"b": 2000}]), &predicate));
        assert!(!path_matches(&[key("b")], &json!([{"b": 500}]), &predicate));
        assert!(path_matches(&[], &json!([1, [2, 1001]]), &predicate));
    }

    #[test]
    fn wildcards_span_levels() {
        let literal = Literal::string("deep");
        let predicate = ValuePredicate::new(FilterOperation::Eq, Some(&literal), LiteralTypes::ALL, true);
        let doc = json!({"a": {"b": {"c": "deep"}}});
        assert!(path_matches(&[DescriptorToken::Wildcard], &doc, &predicate));
        assert!(path_matches(&[key("a"), DescriptorToken::Wildcard, key("c")], &doc, &predicate));
        assert!(path_matches(&[DescriptorToken::Wildcard, key("c")], &doc, &predicate));
        assert!(!path_matches(&[key("c")], &doc, &predicate));
    }

    #[test]
    fn numbers_cover_signed_unsigned_and_float() {
        let literal = Literal::int(5);
        let gt = ValuePredicate::new(FilterOperation::Gt, Some(&literal), LiteralTypes::ALL, true);
        assert!(gt.matches_scalar(&json!(u64::MAX)));
        assert!(gt.matches_scalar(&json!(5.5)));
        assert!(!gt.matches_scalar(&json!(-3)));
        let ints_only = ValuePredicate::new(FilterOperation::Gt, Some(&literal), LiteralTypes::only(LiteralType::Integer), true);
        assert!(!ints_only.matches_scalar(&json!(5.5)));
    }

    #[test]
    fn strings_respect_storage_type_and_case() {
        let literal = Literal::string("ERR*");
        let insensitive = ValuePredicate::new(FilterOperation::Eq, Some(&literal), LiteralTypes::ALL, false);
        assert!(insensitive.matches_scalar(&json!("error")));
        assert!(insensitive.matches_scalar(&json!("error happened")));
        let sensitive = ValuePredicate::new(FilterOperation::Eq, Some(&literal), LiteralTypes::ALL, true);
        assert!(!sensitive.matches_scalar(&json!("error")));
        let neq = ValuePredicate::new(FilterOperation::Neq, Some(&literal), LiteralTypes::ALL, true);
        assert!(neq.matches_scalar(&json!("warn")));
    }

    #[test]
    fn float_literals_match_their_own_rendering() {
        let literal = Literal::float(1.0);
        let predicate = ValuePredicate::new(FilterOperation::Eq, Some(&literal), LiteralTypes::ALL, true);
        assert!(predicate.matches_scalar(&json!("1.0")));
        assert!(!predicate.matches_scalar(&json!("1")));
        assert!(predicate.matches_scalar(&json!(1)));
    }

    #[test]
    fn existence_respects_types() {
        let exists_null = ValuePredicate::new(FilterOperation::Exists, None, LiteralTypes::only(LiteralType::Null), true);
        assert!(exists_null.matches_scalar(&json!(null)));
        assert!(!exists_null.matches_scalar(&json!(1)));
        assert!(path_matches(&[key("a")], &json!({"a": null}), &exists_null));
        assert!(!path_matches(&[key("b")], &json!({"a": null}), &exists_null));
    }
}
