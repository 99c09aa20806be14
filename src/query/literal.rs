#![forbid(unsafe_code)]

//! Query literals, the column type lattice, and operator-aware coercions.
//!
//! Every literal can be probed for each [`LiteralType`] under a given
//! [`FilterOperation`]. Type narrowing keeps a type on a column descriptor
//! only if the probe succeeds, and the evaluator uses the same coercions to
//! obtain the concrete value it compares against.

use std::borrow::Cow;
use std::fmt;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::query::ast::FilterOperation;
use crate::query::errors::QueryError;

/// Storage types a column may hold and a literal may be compared against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LiteralType {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Float,
    /// Free text containing whitespace, stored in the log dictionary.
    ClpString,
    /// Single-token string stored in the variable dictionary.
    VarString,
    /// Boolean.
    Boolean,
    /// Unstructured array stored as raw JSON.
    Array,
    /// Explicit null.
    Null,
    /// Epoch timestamp in milliseconds.
    Timestamp,
}

impl LiteralType {
    /// Every type, in lattice order.
    pub const ALL: [LiteralType; 8] = [
        LiteralType::Integer,
        LiteralType::Float,
        LiteralType::ClpString,
        LiteralType::VarString,
        LiteralType::Boolean,
        LiteralType::Array,
        LiteralType::Null,
        LiteralType::Timestamp,
    ];

    const fn bit(self) -> u16 {
        1 << (self as u16)
    }

    /// Short lowercase name used in explain output.
    pub fn name(self) -> &'static str {
        match self {
            LiteralType::Integer => "int",
            LiteralType::Float => "float",
            LiteralType::ClpString => "clpstring",
            LiteralType::VarString => "varstring",
            LiteralType::Boolean => "bool",
            LiteralType::Array => "array",
            LiteralType::Null => "null",
            LiteralType::Timestamp => "timestamp",
        }
    }
}

/// Set of [`LiteralType`]s.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LiteralTypes(u16);

impl LiteralTypes {
    /// No types.
    pub const EMPTY: LiteralTypes = LiteralTypes(0);
    /// Every type.
    pub const ALL: LiteralTypes = LiteralTypes(0xFF);
    /// Both string storage types.
    pub const STRINGS: LiteralTypes =
        LiteralTypes(LiteralType::ClpString.bit() | LiteralType::VarString.bit());
    /// Types an epoch timestamp column may be stored as.
    pub const EPOCH: LiteralTypes = LiteralTypes(
        LiteralType::Timestamp.bit() | LiteralType::Integer.bit() | LiteralType::Float.bit(),
    );

    /// Set holding exactly `ty`.
    pub const fn only(ty: LiteralType) -> Self {
        LiteralTypes(ty.bit())
    }

    /// Returns true if `ty` is a member.
    pub fn contains(self, ty: LiteralType) -> bool {
        self.0 & ty.bit() != 0
    }

    /// Returns true if the sets share a member.
    pub fn intersects(self, other: LiteralTypes) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns true if every member of `self` is in `other`.
    pub fn is_subset(self, other: LiteralTypes) -> bool {
        self.0 & !other.0 == 0
    }

    /// Adds `ty`.
    pub fn insert(&mut self, ty: LiteralType) {
        self.0 |= ty.bit();
    }

    /// Removes `ty`.
    pub fn remove(&mut self, ty: LiteralType) {
        self.0 &= !ty.bit();
    }

    /// Union of two sets.
    pub fn union(self, other: LiteralTypes) -> Self {
        LiteralTypes(self.0 | other.0)
    }

    /// Intersection of two sets.
    pub fn intersection(self, other: LiteralTypes) -> Self {
        LiteralTypes(self.0 & other.0)
    }

    /// Members of `self` not in `other`.
    pub fn difference(self, other: LiteralTypes) -> Self {
        LiteralTypes(self.0 & !other.0)
    }

    /// Returns true if the set has no members.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of members.
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Members in lattice order.
    pub fn iter(self) -> impl Iterator<Item = LiteralType> {
        LiteralType::ALL
            .into_iter()
            .filter(move |ty| self.contains(*ty))
    }
}

impl From<LiteralType> for LiteralTypes {
    fn from(ty: LiteralType) -> Self {
        LiteralTypes::only(ty)
    }
}

impl FromIterator<LiteralType> for LiteralTypes {
    fn from_iter<I: IntoIterator<Item = LiteralType>>(iter: I) -> Self {
        let mut types = LiteralTypes::EMPTY;
        for ty in iter {
            types.insert(ty);
        }
        types
    }
}

impl fmt::Debug for LiteralTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for LiteralTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == LiteralTypes::ALL {
            return f.write_str("any");
        }
        if self.is_empty() {
            return f.write_str("none");
        }
        for (idx, ty) in self.iter().enumerate() {
            if idx > 0 {
                f.write_str("|")?;
            }
            f.write_str(ty.name())?;
        }
        Ok(())
    }
}

/// Numeric literal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Integral {
    /// Signed integer.
    Int(i64),
    /// Floating point value.
    Float(f64),
}

/// String literal together with the string storage types it may match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StringLiteral {
    value: String,
    types: LiteralTypes,
}

impl StringLiteral {
    /// Classifies `value`: text with a space can only live in the log
    /// dictionary, a single token only in the variable dictionary, and a
    /// token with unescaped wildcards may expand into either.
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let mut types = LiteralTypes::EMPTY;
        if value.contains(' ') {
            types.insert(LiteralType::ClpString);
        } else {
            types.insert(LiteralType::VarString);
            if has_unescaped_wildcards(&value) {
                types.insert(LiteralType::ClpString);
            }
        }
        StringLiteral { value, types }
    }

    /// Raw pattern text.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// String storage types the pattern may match.
    pub fn types(&self) -> LiteralTypes {
        self.types
    }
}

/// Returns true if `pattern` contains a `*` or `?` not preceded by `\`.
pub fn has_unescaped_wildcards(pattern: &str) -> bool {
    let mut escaped = false;
    for ch in pattern.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '*' | '?' => return true,
            _ => {}
        }
    }
    false
}

/// Immutable query literal. Filters share literals instead of copying them.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    /// Integer or float.
    Integral(Integral),
    /// String pattern, possibly with wildcards.
    String(StringLiteral),
    /// Boolean.
    Boolean(bool),
    /// Epoch timestamp in milliseconds.
    Timestamp(i64),
}

impl Literal {
    /// Integer literal.
    pub fn int(value: i64) -> Self {
        Literal::Integral(Integral::Int(value))
    }

    /// Float literal.
    pub fn float(value: f64) -> Self {
        Literal::Integral(Integral::Float(value))
    }

    /// String literal.
    pub fn string(value: impl Into<String>) -> Self {
        Literal::String(StringLiteral::new(value))
    }

    /// Parses an RFC 3339 timestamp into a millisecond timestamp literal.
    pub fn timestamp_from_rfc3339(text: &str) -> Result<Self, QueryError> {
        parse_rfc3339_millis(text)
            .map(Literal::Timestamp)
            .ok_or_else(|| QueryError::InvalidTimestamp {
                value: text.to_owned(),
            })
    }

    /// Returns true if the literal can be compared against a column of `ty`
    /// under `op`.
    pub fn admits(&self, ty: LiteralType, op: FilterOperation) -> bool {
        match ty {
            LiteralType::Integer => self.as_int(op).is_some(),
            LiteralType::Float => self.as_float(op).is_some(),
            LiteralType::ClpString => self.as_clp_string(op).is_some(),
            LiteralType::VarString => self.as_var_string(op).is_some(),
            LiteralType::Boolean => self.as_bool(op).is_some(),
            LiteralType::Timestamp => self.as_timestamp(op).is_some(),
            LiteralType::Null => self.as_null(op),
            LiteralType::Array => true,
        }
    }

    /// Integer view. Floats round toward the side that keeps the comparison
    /// equivalent; equality needs an exact integral value.
    pub fn as_int(&self, op: FilterOperation) -> Option<i64> {
        if !op.is_comparison() {
            return None;
        }
        match self {
            Literal::Integral(Integral::Int(value)) => Some(*value),
            Literal::Integral(Integral::Float(value)) => float_to_int(*value, op),
            Literal::Timestamp(millis) => Some(*millis),
            Literal::String(_) | Literal::Boolean(_) => None,
        }
    }

    /// Float view.
    pub fn as_float(&self, op: FilterOperation) -> Option<f64> {
        if !op.is_comparison() {
            return None;
        }
        match self {
            Literal::Integral(Integral::Int(value)) => Some(*value as f64),
            Literal::Integral(Integral::Float(value)) => Some(*value),
            Literal::Timestamp(millis) => Some(*millis as f64),
            Literal::String(_) | Literal::Boolean(_) => None,
        }
    }

    /// Millisecond timestamp view.
    pub fn as_timestamp(&self, op: FilterOperation) -> Option<i64> {
        match self {
            Literal::Timestamp(millis) if op.is_comparison() => Some(*millis),
            Literal::Integral(_) => self.as_int(op),
            _ => None,
        }
    }

    /// Boolean view, equality only.
    pub fn as_bool(&self, op: FilterOperation) -> Option<bool> {
        match self {
            Literal::Boolean(value) if op.is_equality() => Some(*value),
            _ => None,
        }
    }

    /// Pattern to match against variable-dictionary strings, equality only.
    /// Numbers are compared by their decimal rendering; floats keep their
    /// fractional part (`1.0`, not `1`).
    pub fn as_var_string(&self, op: FilterOperation) -> Option<Cow<'_, str>> {
        if !op.is_equality() {
            return None;
        }
        match self {
            Literal::String(s) if s.types.contains(LiteralType::VarString) => {
                Some(Cow::Borrowed(s.value.as_str()))
            }
            Literal::Integral(Integral::Int(value)) => Some(Cow::Owned(value.to_string())),
            Literal::Integral(Integral::Float(value)) if value.is_finite() => {
                Some(Cow::Owned(format!("{value:?}")))
            }
            _ => None,
        }
    }

    /// Pattern to match against log-dictionary strings, equality only.
    pub fn as_clp_string(&self, op: FilterOperation) -> Option<Cow<'_, str>> {
        match self {
            Literal::String(s)
                if op.is_equality() && s.types.contains(LiteralType::ClpString) =>
            {
                Some(Cow::Borrowed(s.value.as_str()))
            }
            _ => None,
        }
    }

    /// True if the literal is the null keyword under an equality operator.
    pub fn as_null(&self, op: FilterOperation) -> bool {
        matches!(self, Literal::String(s) if op.is_equality() && s.value == "null")
    }

    /// True if the literal is the bare `*` pattern, which matches any value.
    pub fn as_any(&self, op: FilterOperation) -> bool {
        matches!(self, Literal::String(s) if op.is_equality() && s.value == "*")
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Integral(Integral::Int(value)) => write!(f, "{value}"),
            Literal::Integral(Integral::Float(value)) => write!(f, "{value:?}"),
            Literal::String(s) => write!(f, "{:?}", s.value),
            Literal::Boolean(value) => write!(f, "{value}"),
            Literal::Timestamp(millis) => write!(f, "timestamp({millis})"),
        }
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::int(value)
    }
}

impl From<i32> for Literal {
    fn from(value: i32) -> Self {
        Literal::int(i64::from(value))
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::float(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Boolean(value)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::string(value)
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::string(value)
    }
}

fn float_to_int(value: f64, op: FilterOperation) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    let rounded = match op {
        FilterOperation::Lt | FilterOperation::Gte => value.ceil(),
        FilterOperation::Gt | FilterOperation::Lte => value.floor(),
        FilterOperation::Eq | FilterOperation::Neq => {
            if value.fract() != 0.0 {
                return None;
            }
            value
        }
        FilterOperation::Exists | FilterOperation::NotExists => return None,
    };
    // i64::MAX as f64 rounds up to 2^63, which is already out of range.
    if rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
        return None;
    }
    Some(rounded as i64)
}

/// Parses an RFC 3339 timestamp into epoch milliseconds.
pub fn parse_rfc3339_millis(text: &str) -> Option<i64> {
    let parsed = OffsetDateTime::parse(text, &Rfc3339).ok()?;
    i64::try_from(parsed.unix_timestamp_nanos() / 1_000_000).ok()
}
