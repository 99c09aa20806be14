#![forbid(unsafe_code)]

//! Column descriptors: tokenized paths plus the type and binding state
//! accumulated as a query is compiled against an archive.

use std::fmt;

use smallvec::SmallVec;

use crate::archive::NodeId;
use crate::query::errors::QueryError;
use crate::query::literal::{LiteralType, LiteralTypes};

/// One path segment of a column descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorToken {
    /// Exact key.
    Key(String),
    /// Matches zero or more levels.
    Wildcard,
}

impl DescriptorToken {
    /// Returns the key for exact tokens.
    pub fn key(&self) -> Option<&str> {
        match self {
            DescriptorToken::Key(key) => Some(key),
            DescriptorToken::Wildcard => None,
        }
    }
}

/// Token storage; most paths are a handful of segments.
pub type Tokens = SmallVec<[DescriptorToken; 4]>;

/// Column namespace, selected by a leading path sigil.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    /// User-provided fields.
    Default,
    /// Fields generated during ingestion (`@` prefix).
    Autogen,
    /// Range-index metadata fields (`$` prefix).
    RangeIndex,
}

impl Namespace {
    /// Path prefix selecting the namespace.
    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::Default => "",
            Namespace::Autogen => "@",
            Namespace::RangeIndex => "$",
        }
    }

    /// Human readable name.
    pub fn name(self) -> &'static str {
        match self {
            Namespace::Default => "default",
            Namespace::Autogen => "autogen",
            Namespace::RangeIndex => "range-index",
        }
    }
}

/// Which schema-tree subtree a descriptor resolves under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubtreeType {
    /// Record fields.
    Object,
    /// Per-record metadata such as the log event index.
    Metadata,
}

/// A possibly wildcarded path to one or more columns.
///
/// Starts out unbound, carrying the set of types it may still match. Schema
/// splitting binds it to a concrete schema-tree node and storage type; when
/// the path descends into an unstructured array the remaining tokens are kept
/// in `unresolved_tokens` and matched against the array content per record.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDescriptor {
    tokens: Tokens,
    namespace: Namespace,
    subtree: SubtreeType,
    matching_types: LiteralTypes,
    column_id: Option<NodeId>,
    column_type: Option<LiteralType>,
    unresolved_tokens: Vec<DescriptorToken>,
}

impl ColumnDescriptor {
    /// Parses a dotted path. `\` escapes the next character, a bare `*`
    /// segment is a wildcard, and a leading `@` or `$` selects the namespace.
    pub fn parse(path: &str) -> Result<Self, QueryError> {
        let (namespace, tokens) = tokenize_path(path)?;
        Ok(Self::from_tokens(tokens, namespace))
    }

    /// Builds an unbound descriptor matching every type.
    pub fn from_tokens(tokens: impl IntoIterator<Item = DescriptorToken>, namespace: Namespace) -> Self {
        ColumnDescriptor {
            tokens: tokens.into_iter().collect(),
            namespace,
            subtree: SubtreeType::Object,
            matching_types: LiteralTypes::ALL,
            column_id: None,
            column_type: None,
            unresolved_tokens: Vec::new(),
        }
    }

    /// Descriptor for a single exact key in the default namespace.
    pub fn key(name: impl Into<String>) -> Self {
        Self::from_tokens([DescriptorToken::Key(name.into())], Namespace::Default)
    }

    /// The `*` descriptor matching any column.
    pub fn wildcard() -> Self {
        Self::from_tokens([DescriptorToken::Wildcard], Namespace::Default)
    }

    /// Moves the descriptor to another subtree.
    pub fn with_subtree(mut self, subtree: SubtreeType) -> Self {
        self.subtree = subtree;
        self
    }

    /// Restricts the descriptor to `types`.
    pub fn with_matching_types(mut self, types: LiteralTypes) -> Self {
        self.matching_types = types;
        self
    }

    /// Path tokens, namespace prefix excluded.
    pub fn tokens(&self) -> &[DescriptorToken] {
        &self.tokens
    }

    /// Namespace selected by the path prefix.
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Object or metadata subtree.
    pub fn subtree(&self) -> SubtreeType {
        self.subtree
    }

    /// Column types the descriptor may still bind to.
    pub fn matching_types(&self) -> LiteralTypes {
        self.matching_types
    }

    /// Replaces the matching types.
    pub fn set_matching_types(&mut self, types: LiteralTypes) {
        self.matching_types = types;
    }

    /// True if `ty` is still a matching type.
    pub fn matches_type(&self, ty: LiteralType) -> bool {
        self.matching_types.contains(ty)
    }

    /// True if any of `types` is still a matching type.
    pub fn matches_any(&self, types: LiteralTypes) -> bool {
        self.matching_types.intersects(types)
    }

    /// Single wildcard token: matches every column in the namespace.
    pub fn is_pure_wildcard(&self) -> bool {
        matches!(self.tokens.as_slice(), [DescriptorToken::Wildcard])
    }

    /// True if any token is `*`.
    pub fn has_wildcard(&self) -> bool {
        self.tokens.iter().any(|t| matches!(t, DescriptorToken::Wildcard))
    }

    /// Wildcarded and not yet expanded to a concrete node.
    pub fn is_unresolved(&self) -> bool {
        self.column_id.is_none() && self.has_wildcard()
    }

    /// Keys of a wildcard-free path.
    pub fn exact_keys(&self) -> Option<Vec<&str>> {
        self.tokens.iter().map(DescriptorToken::key).collect()
    }

    /// Node the descriptor was bound to.
    pub fn column_id(&self) -> Option<NodeId> {
        self.column_id
    }

    /// Storage type fixed at binding.
    pub fn column_type(&self) -> Option<LiteralType> {
        self.column_type
    }

    /// Suffix still to match inside an unstructured array.
    pub fn unresolved_tokens(&self) -> &[DescriptorToken] {
        &self.unresolved_tokens
    }

    /// Pins the descriptor to schema-tree `node` without fixing its type.
    /// Used when a wildcard path is expanded into concrete alternatives.
    pub fn resolve_to(&mut self, node: NodeId, unresolved: Vec<DescriptorToken>) {
        self.column_id = Some(node);
        self.unresolved_tokens = unresolved;
    }

    /// Binds the descriptor to `node` stored as `column_type`.
    pub fn bind(&mut self, node: NodeId, column_type: LiteralType, unresolved: Vec<DescriptorToken>) {
        self.column_id = Some(node);
        self.column_type = Some(column_type);
        self.unresolved_tokens = unresolved;
    }

    /// Namespace-prefixed path with escapes.
    pub fn path(&self) -> String {
        let mut out = String::from(self.namespace.prefix());
        for (idx, token) in self.tokens.iter().enumerate() {
            if idx > 0 {
                out.push('.');
            }
            match token {
                DescriptorToken::Wildcard => out.push('*'),
                DescriptorToken::Key(key) => {
                    if key == "*" {
                        out.push('\\');
                    }
                    for (pos, ch) in key.chars().enumerate() {
                        let leading_sigil = idx == 0 && pos == 0 && matches!(ch, '@' | '$');
                        if matches!(ch, '.' | '\\') || leading_sigil {
                            out.push('\\');
                        }
                        out.push(ch);
                    }
                }
            }
        }
        out
    }
}

impl fmt::Display for ColumnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.subtree == SubtreeType::Metadata {
            f.write_str("meta:")?;
        }
        f.write_str(&self.path())?;
        if let Some(node) = self.column_id {
            write!(f, "#{}", node.0)?;
        }
        if let Some(ty) = self.column_type {
            write!(f, ":{}", ty.name())?;
        } else if self.matching_types != LiteralTypes::ALL {
            write!(f, "<{}>", self.matching_types)?;
        }
        if !self.unresolved_tokens.is_empty() {
            f.write_str("[")?;
            for (idx, token) in self.unresolved_tokens.iter().enumerate() {
                if idx > 0 {
                    f.write_str(".")?;
                }
                match token {
                    DescriptorToken::Key(key) => f.write_str(key)?,
                    DescriptorToken::Wildcard => f.write_str("*")?,
                }
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

/// Splits `path` into its namespace and tokens.
pub fn tokenize_path(path: &str) -> Result<(Namespace, Tokens), QueryError> {
    let (namespace, body) = match path.chars().next() {
        Some('@') => (Namespace::Autogen, &path[1..]),
        Some('$') => (Namespace::RangeIndex, &path[1..]),
        _ => (Namespace::Default, path),
    };
    if body.is_empty() {
        return Err(QueryError::tokenization(path, "empty path"));
    }

    let mut tokens = Tokens::new();
    let mut current = String::new();
    let mut escaped = false;
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some(next) => {
                    current.push(next);
                    escaped = true;
                }
                None => return Err(QueryError::tokenization(path, "trailing escape")),
            },
            '.' => {
                tokens.push(finish_token(path, &mut current, escaped)?);
                escaped = false;
            }
            _ => current.push(ch),
        }
    }
    tokens.push(finish_token(path, &mut current, escaped)?);
    Ok((namespace, tokens))
}

fn finish_token(path: &str, current: &mut String, escaped: bool) -> Result<DescriptorToken, QueryError> {
    if current.is_empty() {
        return Err(QueryError::tokenization(path, "empty token"));
    }
    let token = std::mem::take(current);
    if token == "*" && !escaped {
        Ok(DescriptorToken::Wildcard)
    } else {
        Ok(DescriptorToken::Key(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> DescriptorToken {
        DescriptorToken::Key(name.to_owned())
    }

    #[test]
    fn tokenizes_dotted_paths() -> Result<(), QueryError> {
        let column = ColumnDescriptor::parse("a.b.c")?;
        assert_eq!(column.tokens(), &[key("a"), key("b"), key("c")]);
        assert_eq!(column.namespace(), Namespace::Default);
        assert!(!column.has_wildcard());
        Ok(())
    }

    #[test]
    fn escapes_and_wildcards() -> Result<(), QueryError> {
        let column = ColumnDescriptor::parse("a\\.b.*.\\*")?;
        assert_eq!(
            column.tokens(),
            &[key("a.b"), DescriptorToken::Wildcard, key("*")]
        );
        assert!(column.is_unresolved());
        assert!(!column.is_pure_wildcard());
        assert_eq!(column.path(), "a\\.b.*.\\*");
        assert!(ColumnDescriptor::parse("*")?.is_pure_wildcard());
        Ok(())
    }

    #[test]
    fn namespace_prefixes() -> Result<(), QueryError> {
        let autogen = ColumnDescriptor::parse("@log_event_idx")?;
        assert_eq!(autogen.namespace(), Namespace::Autogen);
        assert_eq!(autogen.tokens(), &[key("log_event_idx")]);
        let ranged = ColumnDescriptor::parse("$filename")?;
        assert_eq!(ranged.namespace(), Namespace::RangeIndex);
        let literal_at = ColumnDescriptor::parse("\\@user")?;
        assert_eq!(literal_at.namespace(), Namespace::Default);
        assert_eq!(literal_at.path(), "\\@user");
        Ok(())
    }

    #[test]
    fn malformed_paths_are_rejected() {
        for bad in ["", "a..b", "a.", "a\\", "@", "$"] {
            let err = ColumnDescriptor::parse(bad).expect_err(bad);
            assert_eq!(err.code(), "ColumnTokenization");
        }
    }

    #[test]
    fn binding_records_column_and_suffix() {
        let mut column = ColumnDescriptor::parse("arr.b").expect("parse");
        column.bind(NodeId(7), LiteralType::Array, vec![key("b")]);
        assert_eq!(column.column_id(), Some(NodeId(7)));
        assert_eq!(column.column_type(), Some(LiteralType::Array));
        assert_eq!(column.to_string(), "arr.b#7:array[b]");
    }
}
