#![forbid(unsafe_code)]

//! Resolving column descriptors against the schema tree and splitting a
//! normalized query into one query per matching schema.
//!
//! The pipeline:
//!
//! 1. Expand every wildcarded (but not pure `*`) descriptor into an `Or` of
//!    concrete descriptors, one per schema-tree node it can reach.
//! 2. Fold filters that resolve to no node at all.
//! 3. Compute, per conjunction of the Or-of-And query, the schemas that can
//!    satisfy it: the intersection of the schemas of its filters. Inverted
//!    comparisons, `NOT EXISTS`, and pure wildcards are satisfiable by
//!    records lacking the column, so they do not restrict the set.
//! 4. For every schema, copy the conjunctions that may match, bind each
//!    descriptor to the column that schema holds, and fold filters the
//!    schema decides on its own.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::archive::{NodeId, NodeType, Schema, SchemaId, SchemaMap, SchemaTree};
use crate::query::ast::{ExprId, ExprKind, Filter, FilterOperation, NodeClass, Query};
use crate::query::column::{ColumnDescriptor, DescriptorToken, Namespace, SubtreeType};
use crate::query::errors::QueryError;
use crate::query::literal::{LiteralType, LiteralTypes};
use crate::query::normalize::normalize;
use crate::query::propagate::{constant_propagate, propagate, FilterOracle, Truth};

/// A schema-tree node a descriptor may bind to, plus the path suffix still
/// to be matched inside an unstructured array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    /// Node reached by the descriptor.
    pub node: NodeId,
    /// Tokens left over below an array node.
    pub unresolved: Vec<DescriptorToken>,
}

/// Resolves descriptors and splits queries for one archive.
pub struct SchemaMatcher<'a> {
    tree: &'a SchemaTree,
    schemas: &'a SchemaMap,
}

impl<'a> SchemaMatcher<'a> {
    /// Matcher over one archive's schema tree and schemas.
    pub fn new(tree: &'a SchemaTree, schemas: &'a SchemaMap) -> Self {
        SchemaMatcher { tree, schemas }
    }

    /// Splits `query` (in Or-of-And form) into per-schema queries. Schemas
    /// the query can never match are absent from the result.
    pub fn split(&self, query: Query) -> Result<BTreeMap<SchemaId, Query>, QueryError> {
        self.reject_unsupported_namespaces(&query)?;

        let query = self.expand_wildcards(query);
        let query = propagate(query, &mut ResolutionOracle { matcher: self });
        if query.is_empty() {
            return Ok(BTreeMap::new());
        }
        if query.is_match_all() {
            return Ok(self.schemas.keys().map(|id| (*id, Query::match_all())).collect());
        }

        let root = query.root();
        let conjunctions: Vec<ExprId> = match query.kind(root) {
            ExprKind::Or(ops) if !query.is_inverted(root) => ops.clone(),
            _ => vec![root],
        };

        let mut resolved: FxHashMap<ExprId, Vec<Candidate>> = FxHashMap::default();
        for id in query.filter_ids() {
            if let Some(filter) = query.filter(id) {
                if !filter.column.is_pure_wildcard() {
                    resolved.insert(id, self.resolve(&filter.column));
                }
            }
        }
        let node_schemas = self.node_schema_index(resolved.values().flatten().map(|c| c.node));

        let mut split: BTreeMap<SchemaId, Query> = BTreeMap::new();
        for conjunction in conjunctions {
            let filters: Vec<ExprId> = match query.class(conjunction) {
                NodeClass::And => query.operands(conjunction).to_vec(),
                _ => vec![conjunction],
            };
            let schemas = self.conjunction_schemas(&query, &filters, &resolved, &node_schemas);
            trace!(conjunction = %conjunction_label(&query, conjunction), schemas = schemas.len(), "query.schema_match.intersect");
            for schema_id in schemas {
                let Some(schema) = self.schemas.get(&schema_id) else {
                    continue;
                };
                let Some(bound) = self.bind_conjunction(&query, &filters, &resolved, schema) else {
                    continue;
                };
                let target = split.entry(schema_id).or_insert_with(|| {
                    let mut empty_or = Query::empty();
                    let or = empty_or.add_or(Vec::new(), false);
                    empty_or.set_root(or);
                    empty_or
                });
                let root = target.root();
                bound.copy_append(bound.root(), target, root);
            }
        }

        let mut out = BTreeMap::new();
        for (schema_id, query) in split {
            let query = normalize(constant_propagate(query));
            if !query.is_empty() {
                out.insert(schema_id, query);
            }
        }
        debug!(schemas = out.len(), total = self.schemas.len(), "query.schema_match.split");
        Ok(out)
    }

    fn reject_unsupported_namespaces(&self, query: &Query) -> Result<(), QueryError> {
        for id in query.filter_ids() {
            if let Some(filter) = query.filter(id) {
                if filter.column.namespace() == Namespace::RangeIndex {
                    return Err(QueryError::UnsupportedNamespace {
                        column: filter.column.path(),
                        namespace: Namespace::RangeIndex.name(),
                    });
                }
            }
        }
        Ok(())
    }

    fn subtree_root(&self, column: &ColumnDescriptor) -> Option<NodeId> {
        match column.subtree() {
            SubtreeType::Metadata => self.tree.metadata_subtree(),
            SubtreeType::Object => self.tree.object_subtree(column.namespace()),
        }
    }

    /// Every node `column` can reach, deduplicated by node and suffix.
    pub fn resolve(&self, column: &ColumnDescriptor) -> Vec<Candidate> {
        if let Some(node) = column.column_id() {
            return vec![Candidate {
                node,
                unresolved: column.unresolved_tokens().to_vec(),
            }];
        }
        let Some(root) = self.subtree_root(column) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        self.walk(column.tokens(), root, column.matching_types(), &mut found);

        // A wildcard can reach one array node with several suffixes.
        let mut unique: Vec<Candidate> = Vec::with_capacity(found.len());
        for candidate in found {
            if !unique.contains(&candidate) {
                unique.push(candidate);
            }
        }
        unique.sort_by_key(|candidate| candidate.node);
        unique
    }

    /// Matches `tokens` against the children of `node`.
    fn walk(&self, tokens: &[DescriptorToken], node: NodeId, types: LiteralTypes, out: &mut Vec<Candidate>) {
        let Some((first, rest)) = tokens.split_first() else {
            return;
        };
        match first {
            DescriptorToken::Key(key) => {
                for child in self.tree.children(node).filter(|child| child.name == *key) {
                    self.visit(rest, child.id, types, out);
                }
            }
            DescriptorToken::Wildcard => {
                let mut rest = rest;
                while let Some((DescriptorToken::Wildcard, tail)) = rest.split_first() {
                    rest = tail;
                }
                if !rest.is_empty() {
                    self.walk(rest, node, types, out);
                }
                for child in self.tree.children(node) {
                    match child.node_type {
                        NodeType::Object => self.walk(tokens, child.id, types, out),
                        NodeType::UnstructuredArray => {
                            if types.contains(LiteralType::Array) {
                                let mut unresolved = vec![DescriptorToken::Wildcard];
                                unresolved.extend_from_slice(rest);
                                out.push(Candidate {
                                    node: child.id,
                                    unresolved,
                                });
                            }
                        }
                        _ => self.visit(rest, child.id, types, out),
                    }
                }
            }
        }
    }

    /// Handles arrival at `node` with `rest` still to match.
    fn visit(&self, rest: &[DescriptorToken], node: NodeId, types: LiteralTypes, out: &mut Vec<Candidate>) {
        let Some(node_type) = self.tree.node_type(node) else {
            return;
        };
        if rest.is_empty() {
            if node_type
                .literal_type()
                .is_some_and(|ty| types.contains(ty))
            {
                out.push(Candidate {
                    node,
                    unresolved: Vec::new(),
                });
            }
            return;
        }
        match node_type {
            NodeType::Object => self.walk(rest, node, types, out),
            NodeType::UnstructuredArray if types.contains(LiteralType::Array) => out.push(Candidate {
                node,
                unresolved: rest.to_vec(),
            }),
            _ => {}
        }
    }

    /// Replaces wildcarded descriptors with an `Or` over concrete ones.
    fn expand_wildcards(&self, mut query: Query) -> Query {
        let mut expanded = false;
        for id in query.filter_ids() {
            let Some(filter) = query.filter(id) else {
                continue;
            };
            if !filter.column.is_unresolved() || filter.column.is_pure_wildcard() {
                continue;
            }
            let filter = filter.clone();
            let inverted = query.is_inverted(id);
            let candidates = self.resolve(&filter.column);
            trace!(column = %filter.column, candidates = candidates.len(), "query.schema_match.expand");
            let alternatives: Vec<ExprId> = candidates
                .into_iter()
                .map(|candidate| {
                    let mut concrete = filter.clone();
                    concrete.column = self.concrete_descriptor(&filter.column, candidate);
                    query.add_filter(concrete, false)
                })
                .collect();
            if alternatives.is_empty() {
                // Folded later by the resolution oracle.
                continue;
            }
            // NOT EXISTS over alternatives holds only if every alternative is absent.
            let replacement = if filter.op == FilterOperation::NotExists {
                query.add_and(alternatives, inverted)
            } else {
                query.add_or(alternatives, inverted)
            };
            query.replace(id, replacement);
            expanded = true;
        }
        if expanded {
            normalize(constant_propagate(query))
        } else {
            query
        }
    }

    fn concrete_descriptor(&self, column: &ColumnDescriptor, candidate: Candidate) -> ColumnDescriptor {
        let mut tokens: Vec<DescriptorToken> = self
            .tree
            .path(candidate.node)
            .into_iter()
            .map(|key| DescriptorToken::Key(key.to_owned()))
            .collect();
        tokens.extend(candidate.unresolved.iter().cloned());
        let types = match self.tree.node_type(candidate.node).and_then(NodeType::literal_type) {
            Some(LiteralType::Array) | None => column.matching_types(),
            Some(ty) => column.matching_types().intersection(LiteralTypes::only(ty)),
        };
        let mut concrete = ColumnDescriptor::from_tokens(tokens, column.namespace())
            .with_subtree(column.subtree())
            .with_matching_types(types);
        concrete.resolve_to(candidate.node, candidate.unresolved);
        concrete
    }

    fn node_schema_index(&self, nodes: impl Iterator<Item = NodeId>) -> FxHashMap<NodeId, BTreeSet<SchemaId>> {
        let wanted: BTreeSet<NodeId> = nodes.collect();
        let mut index: FxHashMap<NodeId, BTreeSet<SchemaId>> = FxHashMap::default();
        for (schema_id, schema) in self.schemas {
            for node in schema.nodes().iter().filter(|node| wanted.contains(*node)) {
                index.entry(*node).or_default().insert(*schema_id);
            }
        }
        index
    }

    /// Schemas where every filter of the conjunction may hold.
    fn conjunction_schemas(
        &self,
        query: &Query,
        filters: &[ExprId],
        resolved: &FxHashMap<ExprId, Vec<Candidate>>,
        node_schemas: &FxHashMap<NodeId, BTreeSet<SchemaId>>,
    ) -> BTreeSet<SchemaId> {
        let mut schemas: BTreeSet<SchemaId> = self.schemas.keys().copied().collect();
        for id in filters {
            let Some(filter) = query.filter(*id) else {
                if query.class(*id) == NodeClass::Empty && !query.is_inverted(*id) {
                    return BTreeSet::new();
                }
                continue;
            };
            let inverted = query.is_inverted(*id);
            let Some(candidates) = resolved.get(id) else {
                continue;
            };
            let effective = filter.op.effective(inverted);
            let restriction: Option<BTreeSet<SchemaId>> = match effective {
                _ if inverted && filter.op.is_comparison() => None,
                FilterOperation::NotExists => {
                    let definite: BTreeSet<SchemaId> = candidates
                        .iter()
                        .filter(|c| c.unresolved.is_empty())
                        .flat_map(|c| node_schemas.get(&c.node).into_iter().flatten().copied())
                        .collect();
                    Some(self.schemas.keys().copied().filter(|s| !definite.contains(s)).collect())
                }
                _ => Some(
                    candidates
                        .iter()
                        .flat_map(|c| node_schemas.get(&c.node).into_iter().flatten().copied())
                        .collect(),
                ),
            };
            if let Some(restriction) = restriction {
                schemas = schemas.intersection(&restriction).copied().collect();
            }
            if schemas.is_empty() {
                break;
            }
        }
        schemas
    }

    /// Copies a conjunction with descriptors bound to `schema`. Returns
    /// `None` if the schema decides the conjunction false.
    fn bind_conjunction(
        &self,
        query: &Query,
        filters: &[ExprId],
        resolved: &FxHashMap<ExprId, Vec<Candidate>>,
        schema: &Schema,
    ) -> Option<Query> {
        let mut bound = Query::match_all();
        let and = bound.root();
        for id in filters {
            let inverted = query.is_inverted(*id);
            let Some(filter) = query.filter(*id) else {
                match (query.class(*id), inverted) {
                    (NodeClass::Empty, false) => return None,
                    (NodeClass::Empty, true) => continue,
                    _ => {
                        query.copy_append(*id, &mut bound, and);
                        continue;
                    }
                }
            };
            let binding = if filter.column.is_pure_wildcard() {
                self.bind_pure_wildcard(filter, schema)
            } else {
                let candidates = resolved.get(id).map(Vec::as_slice).unwrap_or(&[]);
                self.bind_filter(filter, candidates, schema)
            };
            match binding {
                Binding::Decided(truth) => match truth.invert_if(inverted) {
                    Truth::False => return None,
                    Truth::True | Truth::Unknown => {}
                },
                Binding::Keep(filter) => {
                    let id = bound.add_filter(filter, inverted);
                    bound.push_operand(and, id);
                }
            }
        }
        Some(bound)
    }

    fn bind_filter(&self, filter: &Filter, candidates: &[Candidate], schema: &Schema) -> Binding {
        let Some(candidate) = candidates.iter().find(|c| schema.contains(c.node)) else {
            return Binding::Decided(Truth::from_bool(filter.op == FilterOperation::NotExists));
        };
        let Some(column_type) = self.tree.node_type(candidate.node).and_then(NodeType::literal_type) else {
            return Binding::Decided(Truth::from_bool(filter.op == FilterOperation::NotExists));
        };
        let in_array = column_type == LiteralType::Array;
        if filter.op.is_existence() && (!in_array || candidate.unresolved.is_empty()) {
            return Binding::Decided(Truth::from_bool(filter.op == FilterOperation::Exists));
        }
        let mut bound = filter.clone();
        bound
            .column
            .bind(candidate.node, column_type, candidate.unresolved.clone());
        if !in_array {
            bound.column.set_matching_types(LiteralTypes::only(column_type));
        }
        Binding::Keep(bound)
    }

    /// Pure wildcards stay unbound; the evaluator fans out over the
    /// schema's compatible columns. Existence is decided here when a scalar
    /// column is present.
    fn bind_pure_wildcard(&self, filter: &Filter, schema: &Schema) -> Binding {
        let types = filter.column.matching_types();
        let namespace_root = self.tree.object_subtree(filter.column.namespace());
        let mut scalar = false;
        let mut array = false;
        for node in schema.nodes() {
            if namespace_root.is_none() || Some(self.tree.subtree_root(*node)) != namespace_root {
                continue;
            }
            match self.tree.node_type(*node).and_then(NodeType::literal_type) {
                Some(LiteralType::Array) if types.contains(LiteralType::Array) => array = true,
                Some(ty) if types.contains(ty) => scalar = true,
                _ => {}
            }
        }
        match filter.op {
            FilterOperation::Exists if scalar => Binding::Decided(Truth::True),
            FilterOperation::NotExists if scalar => Binding::Decided(Truth::False),
            _ if scalar || array => Binding::Keep(filter.clone()),
            op => Binding::Decided(Truth::from_bool(op == FilterOperation::NotExists)),
        }
    }
}

enum Binding {
    Decided(Truth),
    Keep(Filter),
}

fn conjunction_label(query: &Query, id: ExprId) -> String {
    query.copy_subtree(id).to_string()
}

/// Folds filters whose descriptor reaches no node in the archive.
struct ResolutionOracle<'m, 'a> {
    matcher: &'m SchemaMatcher<'a>,
}

impl FilterOracle for ResolutionOracle<'_, '_> {
    fn evaluate(&mut self, filter: &Filter) -> Truth {
        let reachable = if filter.column.is_pure_wildcard() {
            self.matcher.any_compatible(&filter.column)
        } else {
            !self.matcher.resolve(&filter.column).is_empty()
        };
        if reachable {
            Truth::Unknown
        } else {
            Truth::from_bool(filter.op == FilterOperation::NotExists)
        }
    }
}

impl SchemaMatcher<'_> {
    fn any_compatible(&self, column: &ColumnDescriptor) -> bool {
        let Some(root) = self.subtree_root(column) else {
            return false;
        };
        let types = column.matching_types();
        self.tree.nodes().iter().any(|node| {
            node.node_type
                .literal_type()
                .is_some_and(|ty| types.contains(ty))
                && self.tree.subtree_root(node.id) == root
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveBuilder, ArchiveReader, InMemoryArchive};
    use crate::query::literal::Literal;
    use serde_json::json;

    fn archive(records: &[serde_json::Value]) -> InMemoryArchive {
        let mut builder = ArchiveBuilder::new("test");
        for record in records {
            builder.add_record(record).expect("record");
        }
        builder.finish()
    }

    fn filter(path: &str, op: FilterOperation, literal: Literal, inverted: bool) -> Query {
        let mut query = Query::empty();
        let id = query.add_filter(Filter::new(ColumnDescriptor::parse(path).expect("path"), op, literal), inverted);
        query.set_root(id);
        query
    }

    #[test]
    fn resolves_concrete_and_wildcard_paths() {
        let archive = archive(&[json!({"a": {"b": 1, "c": {"b": "x"}}, "arr": [1]})]);
        let matcher = SchemaMatcher::new(archive.schema_tree(), archive.schema_map());
        let concrete = matcher.resolve(&ColumnDescriptor::parse("a.b").expect("path"));
        assert_eq!(concrete.len(), 1);
        assert!(concrete[0].unresolved.is_empty());

        let wildcard = matcher.resolve(&ColumnDescriptor::parse("a.*.b").expect("path"));
        assert_eq!(wildcard.len(), 2);

        let into_array = matcher.resolve(&ColumnDescriptor::parse("arr.x").expect("path"));
        assert_eq!(into_array.len(), 1);
        assert_eq!(into_array[0].unresolved, vec![DescriptorToken::Key("x".into())]);

        assert!(matcher.resolve(&ColumnDescriptor::parse("missing").expect("path")).is_empty());
    }

    #[test]
    fn wildcards_keep_every_suffix_into_one_array() {
        let archive = archive(&[json!({"b": [{"b": 5}]})]);
        let matcher = SchemaMatcher::new(archive.schema_tree(), archive.schema_map());
        let candidates = matcher.resolve(&ColumnDescriptor::parse("*.b").expect("path"));
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].node, candidates[1].node);
        assert!(candidates.iter().any(|c| c.unresolved.is_empty()));
        assert!(candidates
            .iter()
            .any(|c| c.unresolved == vec![DescriptorToken::Wildcard, DescriptorToken::Key("b".into())]));
    }

    #[test]
    fn splits_by_schema_and_binds_columns() -> Result<(), QueryError> {
        let archive = archive(&[json!({"key": "value"}), json!({"other": 1})]);
        let matcher = SchemaMatcher::new(archive.schema_tree(), archive.schema_map());
        let split = matcher.split(filter("key", FilterOperation::Eq, Literal::string("value"), false))?;
        assert_eq!(split.keys().copied().collect::<Vec<_>>(), vec![SchemaId(0)]);
        let query = &split[&SchemaId(0)];
        let bound = query.filter(query.root()).expect("filter");
        assert!(bound.column.column_id().is_some());
        assert_eq!(bound.column.column_type(), Some(LiteralType::VarString));
        Ok(())
    }

    #[test]
    fn inverted_comparison_keeps_schemas_without_the_column() -> Result<(), QueryError> {
        let archive = archive(&[json!({"a": "b"}), json!({"z": 1})]);
        let matcher = SchemaMatcher::new(archive.schema_tree(), archive.schema_map());
        let split = matcher.split(filter("a", FilterOperation::Eq, Literal::string("b"), true))?;
        assert_eq!(split.len(), 2);
        assert!(split[&SchemaId(1)].is_match_all());
        Ok(())
    }

    #[test]
    fn unreachable_columns_fold_before_splitting() -> Result<(), QueryError> {
        let archive = archive(&[json!({"a": 1})]);
        let matcher = SchemaMatcher::new(archive.schema_tree(), archive.schema_map());
        assert!(matcher
            .split(filter("missing", FilterOperation::Eq, Literal::int(1), false))?
            .is_empty());
        let everything = matcher.split(filter("missing", FilterOperation::Eq, Literal::int(1), true))?;
        assert!(everything[&SchemaId(0)].is_match_all());
        Ok(())
    }

    #[test]
    fn existence_on_scalar_columns_is_decided_per_schema() -> Result<(), QueryError> {
        let archive = archive(&[json!({"a": 1}), json!({"b": 1})]);
        let matcher = SchemaMatcher::new(archive.schema_tree(), archive.schema_map());
        let mut query = Query::empty();
        let id = query.add_filter(Filter::not_exists(ColumnDescriptor::key("a")), false);
        query.set_root(id);
        let split = matcher.split(query)?;
        assert_eq!(split.keys().copied().collect::<Vec<_>>(), vec![SchemaId(1)]);
        assert!(split[&SchemaId(1)].is_match_all());
        Ok(())
    }

    #[test]
    fn pure_wildcard_without_compatible_columns_folds() -> Result<(), QueryError> {
        let archive = archive(&[json!({"a": "text"})]);
        let matcher = SchemaMatcher::new(archive.schema_tree(), archive.schema_map());
        let mut query = Query::empty();
        let column = ColumnDescriptor::wildcard().with_matching_types(LiteralTypes::only(LiteralType::Integer));
        let id = query.add_filter(Filter::new(column, FilterOperation::Eq, Literal::int(3)), false);
        query.set_root(id);
        assert!(matcher.split(query)?.is_empty());
        Ok(())
    }

    #[test]
    fn range_index_namespace_is_rejected() {
        let archive = archive(&[json!({"a": 1})]);
        let matcher = SchemaMatcher::new(archive.schema_tree(), archive.schema_map());
        let err = matcher
            .split(filter("$file", FilterOperation::Eq, Literal::string("x"), false))
            .expect_err("unsupported");
        assert_eq!(err.code(), "UnsupportedNamespace");
    }
}
