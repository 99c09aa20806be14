#![forbid(unsafe_code)]

//! Per-schema record evaluation.
//!
//! A [`SchemaEvaluator`] owns the sub-query compiled for one schema table and
//! tests records one at a time. Connectives are walked with an explicit
//! frame stack that short-circuits `And` on the first false operand and `Or`
//! on the first true one. Leaves dispatch on the storage type their column
//! was bound to during schema splitting.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::archive::{ArchiveReader, NodeId, SchemaReader, Value};
use crate::query::ast::{ExprId, Filter, FilterOperation, NodeClass, Query};
use crate::query::column::{DescriptorToken, SubtreeType};
use crate::query::literal::{Literal, LiteralType};
use crate::query::value_match::{compare_float, compare_signed, ordering_satisfies, path_matches, ValuePredicate};
use crate::search::string_query::{DictionaryKind, StringQuery, StringQueryCache};

#[derive(Clone, Copy, Debug)]
struct Frame {
    id: ExprId,
    next: usize,
    /// Operand value that decides the connective: true for `Or`.
    short_circuit: bool,
    inverted: bool,
}

/// Dictionary queries precompiled for one filter literal.
#[derive(Clone, Debug, Default)]
struct CompiledStrings {
    clp: Option<Arc<StringQuery>>,
    var: Option<Arc<StringQuery>>,
}

/// Column of the current schema a pure wildcard fans out to.
#[derive(Clone, Copy, Debug)]
struct WildcardTarget {
    node: NodeId,
    literal_type: LiteralType,
}

#[derive(Clone, Debug, Default)]
struct CompiledFilter {
    strings: CompiledStrings,
    targets: Option<Vec<WildcardTarget>>,
}

/// Per-record state handed to the typed comparators.
struct RecordContext<'r, 'a> {
    reader: &'a dyn SchemaReader,
    array_cache: &'r mut FxHashMap<NodeId, Option<JsonValue>>,
    row: usize,
}

/// Evaluates one schema's sub-query against its records.
pub struct SchemaEvaluator<'a> {
    query: &'a Query,
    reader: &'a dyn SchemaReader,
    compiled: FxHashMap<ExprId, CompiledFilter>,
    array_cache: FxHashMap<NodeId, Option<JsonValue>>,
    stack: Vec<Frame>,
}

impl<'a> SchemaEvaluator<'a> {
    /// Prepares `query` for the table behind `reader`. String literals are
    /// compiled once through `strings`, which is shared across schemas of
    /// the same archive.
    pub fn new(
        query: &'a Query,
        reader: &'a dyn SchemaReader,
        archive: &dyn ArchiveReader,
        strings: &mut StringQueryCache,
    ) -> Self {
        let mut compiled = FxHashMap::default();
        for id in query.filter_ids() {
            let Some(filter) = query.filter(id) else {
                continue;
            };
            // Array content is matched per element, against every string type.
            let types = match filter.column.column_type() {
                Some(ty) if ty != LiteralType::Array => vec![ty],
                _ => filter.column.matching_types().iter().collect(),
            };
            let compiled_strings = compile_strings(filter, &types, archive, strings);
            let targets = filter
                .column
                .is_pure_wildcard()
                .then(|| wildcard_targets(filter, reader, archive));
            compiled.insert(
                id,
                CompiledFilter {
                    strings: compiled_strings,
                    targets,
                },
            );
        }
        SchemaEvaluator {
            query,
            reader,
            compiled,
            array_cache: FxHashMap::default(),
            stack: Vec::new(),
        }
    }

    /// True if the record at `row` satisfies the query.
    pub fn matches(&mut self, row: usize) -> bool {
        self.array_cache.clear();
        let query = self.query;
        let root = query.root();
        if !query.class(root).is_connective() {
            return self.evaluate_leaf(root, row) != query.is_inverted(root);
        }

        self.stack.clear();
        self.push_frame(root);
        let mut completed: Option<bool> = None;
        loop {
            let Some(top) = self.stack.len().checked_sub(1) else {
                return completed.unwrap_or(false);
            };
            let frame = self.stack[top];
            if let Some(value) = completed.take() {
                if value == frame.short_circuit {
                    self.stack.pop();
                    completed = Some(value != frame.inverted);
                    continue;
                }
            }
            match query.operands(frame.id).get(frame.next).copied() {
                None => {
                    self.stack.pop();
                    completed = Some(!frame.short_circuit != frame.inverted);
                }
                Some(child) => {
                    self.stack[top].next += 1;
                    if query.class(child).is_connective() {
                        self.push_frame(child);
                    } else {
                        completed = Some(self.evaluate_leaf(child, row) != query.is_inverted(child));
                    }
                }
            }
        }
    }

    fn push_frame(&mut self, id: ExprId) {
        let short_circuit = self.query.class(id) == NodeClass::Or;
        self.stack.push(Frame {
            id,
            next: 0,
            short_circuit,
            inverted: self.query.is_inverted(id),
        });
    }

    /// Value of a leaf before its own inversion is applied.
    fn evaluate_leaf(&mut self, id: ExprId, row: usize) -> bool {
        let query = self.query;
        let Some(filter) = query.filter(id) else {
            return false;
        };
        let compiled = self.compiled.get(&id);
        let mut ctx = RecordContext {
            reader: self.reader,
            array_cache: &mut self.array_cache,
            row,
        };
        let strings = compiled.map(|c| &c.strings);
        if let Some(targets) = compiled.and_then(|c| c.targets.as_deref()) {
            return evaluate_wildcard(&mut ctx, filter, strings, targets);
        }
        match (filter.column.column_id(), filter.column.column_type()) {
            (Some(node), Some(ty)) => {
                evaluate_column(&mut ctx, filter, strings, node, ty, filter.column.unresolved_tokens())
            }
            _ => false,
        }
    }
}

fn compile_strings(
    filter: &Filter,
    types: &[LiteralType],
    archive: &dyn ArchiveReader,
    cache: &mut StringQueryCache,
) -> CompiledStrings {
    let mut compiled = CompiledStrings::default();
    let Some(literal) = filter.literal() else {
        return compiled;
    };
    if types.contains(&LiteralType::ClpString) {
        if let Some(pattern) = literal.as_clp_string(filter.op) {
            compiled.clp = Some(cache.get_or_compile(DictionaryKind::Log, &pattern, archive.log_dictionary()));
        }
    }
    if types.contains(&LiteralType::VarString) {
        if let Some(pattern) = literal.as_var_string(filter.op) {
            compiled.var = Some(cache.get_or_compile(
                DictionaryKind::Variable,
                &pattern,
                archive.variable_dictionary(),
            ));
        }
    }
    compiled
}

/// Columns of the current schema a pure wildcard may read.
fn wildcard_targets(filter: &Filter, reader: &dyn SchemaReader, archive: &dyn ArchiveReader) -> Vec<WildcardTarget> {
    let tree = archive.schema_tree();
    let root = match filter.column.subtree() {
        SubtreeType::Object => tree.object_subtree(filter.column.namespace()),
        SubtreeType::Metadata => tree.metadata_subtree(),
    };
    let Some(root) = root else {
        return Vec::new();
    };
    let Some(schema) = archive.schema_map().get(&reader.schema_id()) else {
        return Vec::new();
    };
    schema
        .nodes()
        .iter()
        .filter(|node| tree.subtree_root(**node) == root)
        .filter_map(|node| {
            let literal_type = tree.node_type(*node)?.literal_type()?;
            filter.column.matches_type(literal_type).then_some(WildcardTarget {
                node: *node,
                literal_type,
            })
        })
        .collect()
}

/// Pure wildcards hold if any compatible column satisfies the filter.
/// `NOT EXISTS` holds if none exists.
fn evaluate_wildcard(
    ctx: &mut RecordContext<'_, '_>,
    filter: &Filter,
    strings: Option<&CompiledStrings>,
    targets: &[WildcardTarget],
) -> bool {
    const ANY_PATH: &[DescriptorToken] = &[DescriptorToken::Wildcard];
    if filter.op == FilterOperation::NotExists {
        let exists = Filter::exists(filter.column.clone());
        return !evaluate_wildcard(ctx, &exists, strings, targets);
    }
    targets.iter().any(|target| {
        let unresolved = if target.literal_type == LiteralType::Array {
            ANY_PATH
        } else {
            &[]
        };
        evaluate_column(ctx, filter, strings, target.node, target.literal_type, unresolved)
    })
}

fn evaluate_column(
    ctx: &mut RecordContext<'_, '_>,
    filter: &Filter,
    strings: Option<&CompiledStrings>,
    node: NodeId,
    ty: LiteralType,
    unresolved: &[DescriptorToken],
) -> bool {
    if ty == LiteralType::Array {
        return evaluate_array_filter(ctx, filter, strings, node, unresolved);
    }
    let Some(column) = ctx.reader.column(node) else {
        return filter.op == FilterOperation::NotExists;
    };
    match filter.op {
        FilterOperation::Exists => return true,
        FilterOperation::NotExists => return false,
        _ => {}
    }
    let Some(literal) = filter.literal() else {
        return false;
    };
    let value = column.extract_value(ctx.row);
    match ty {
        LiteralType::Integer => evaluate_int_filter(filter.op, value, literal),
        LiteralType::Float => evaluate_float_filter(filter.op, value, literal),
        LiteralType::Boolean => evaluate_bool_filter(filter.op, value, literal),
        LiteralType::Timestamp => evaluate_timestamp_filter(filter.op, value, literal),
        LiteralType::VarString => {
            let compiled = strings.and_then(|s| s.var.as_deref());
            evaluate_string_filter(filter.op, value, compiled, column.variable_id(ctx.row))
        }
        LiteralType::ClpString => {
            let compiled = strings.and_then(|s| s.clp.as_deref());
            evaluate_string_filter(filter.op, value, compiled, column.encoded_id(ctx.row))
        }
        LiteralType::Null => literal.as_null(filter.op) && filter.op == FilterOperation::Eq,
        LiteralType::Array => false,
    }
}

fn evaluate_int_filter(op: FilterOperation, value: Value<'_>, literal: &Literal) -> bool {
    match value {
        Value::Int(v) => compare_signed(op, v, literal),
        _ => false,
    }
}

fn evaluate_float_filter(op: FilterOperation, value: Value<'_>, literal: &Literal) -> bool {
    match value {
        Value::Float(v) => compare_float(op, v, literal),
        _ => false,
    }
}

fn evaluate_bool_filter(op: FilterOperation, value: Value<'_>, literal: &Literal) -> bool {
    match (value, literal.as_bool(op)) {
        (Value::Bool(v), Some(l)) => ordering_satisfies(op, v.cmp(&l)),
        _ => false,
    }
}

fn evaluate_timestamp_filter(op: FilterOperation, value: Value<'_>, literal: &Literal) -> bool {
    match (value, literal.as_timestamp(op)) {
        (Value::Timestamp(v), Some(l)) => ordering_satisfies(op, v.cmp(&l)),
        _ => false,
    }
}

fn string_outcome(op: FilterOperation, matched: bool) -> bool {
    match op {
        FilterOperation::Eq => matched,
        FilterOperation::Neq => !matched,
        _ => false,
    }
}

/// Dictionary-encoded values are a set lookup; anything else is matched
/// against the compiled pattern. No compiled query means the literal has no
/// view for this storage type.
fn evaluate_string_filter(op: FilterOperation, value: Value<'_>, compiled: Option<&StringQuery>, id: Option<u64>) -> bool {
    let Some(compiled) = compiled else {
        return false;
    };
    let matched = match (id, value) {
        (Some(id), _) => compiled.matches(id),
        (None, Value::String(text)) => compiled.pattern().is_match(text),
        _ => return false,
    };
    string_outcome(op, matched)
}

/// Searches the parsed array content along `unresolved`. The parsed value is
/// cached for the current record; malformed content never matches.
fn evaluate_array_filter(
    ctx: &mut RecordContext<'_, '_>,
    filter: &Filter,
    strings: Option<&CompiledStrings>,
    node: NodeId,
    unresolved: &[DescriptorToken],
) -> bool {
    let reader = ctx.reader;
    let row = ctx.row;
    let parsed = ctx.array_cache.entry(node).or_insert_with(|| {
        let Some(column) = reader.column(node) else {
            return None;
        };
        let Value::Array(raw) = column.extract_value(row) else {
            return None;
        };
        match serde_json::from_str::<JsonValue>(raw) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(node = node.0, row, error = %err, "search.evaluator.malformed_array");
                None
            }
        }
    });
    let Some(value) = parsed.as_ref() else {
        return false;
    };
    let negate = filter.op == FilterOperation::NotExists;
    let op = if negate { FilterOperation::Exists } else { filter.op };
    let predicate = ValuePredicate::with_patterns(
        op,
        filter.literal(),
        filter.column.matching_types(),
        strings.and_then(|s| s.clp.as_deref()).map(StringQuery::pattern),
        strings.and_then(|s| s.var.as_deref()).map(StringQuery::pattern),
    );
    path_matches(unresolved, value, &predicate) != negate
}
