#![forbid(unsafe_code)]

//! Type narrowing.
//!
//! Removes from every comparison filter the column types its literal cannot
//! be compared against. A filter left with no types can never match and
//! becomes `Empty` (keeping its inversion). When a string literal loses one
//! of the two string storage types under an effective `!=`, records holding
//! the dropped type would still satisfy the original filter, so the filter is
//! widened to `filter OR EXISTS(dropped type)`. Splits on one column within
//! a conjunction share a single `EXISTS` branch.

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::query::ast::{ExprId, Filter, FilterOperation, NodeClass, Query};
use crate::query::column::ColumnDescriptor;
use crate::query::literal::{Literal, LiteralType, LiteralTypes};
use crate::query::normalize::normalize;
use crate::query::propagate::constant_propagate;

/// Narrows every filter of `query`, then folds constants and renormalizes if
/// the tree was restructured.
pub fn narrow_types(mut query: Query) -> Query {
    let mut exists_cache = ExistsCache::default();
    for id in query.filter_ids() {
        narrow_filter(&mut query, id, &mut exists_cache);
    }
    let restructured = exists_cache.widen(&mut query);
    let query = constant_propagate(query);
    if restructured {
        normalize(query)
    } else {
        query
    }
}

/// Column types `literal` can be compared against under `op`, within `types`.
pub fn admissible_types(literal: &Literal, op: FilterOperation, types: LiteralTypes) -> LiteralTypes {
    types.iter().filter(|ty| literal.admits(*ty, op)).collect()
}

/// Filters of one conjunction that need the same `EXISTS` branch.
struct SplitGroup {
    scope: ExprId,
    column: ColumnDescriptor,
    filters: Vec<ExprId>,
}

/// One `EXISTS` filter per (conjunction, column, dropped type). Splits on
/// the same column inside one `And` share it: `(f1 OR e) AND (f2 OR e)`
/// is built as `(f1 AND f2) OR e`.
#[derive(Default)]
struct ExistsCache {
    index: FxHashMap<(ExprId, String, LiteralType), usize>,
    groups: Vec<SplitGroup>,
}

impl ExistsCache {
    fn record(&mut self, query: &Query, id: ExprId, column: &ColumnDescriptor, dropped: LiteralType) {
        let scope = match query.parent(id) {
            Some(parent) if query.class(parent) == NodeClass::And => parent,
            _ => id,
        };
        let key = (scope, column.path(), dropped);
        match self.index.get(&key) {
            Some(idx) => self.groups[*idx].filters.push(id),
            None => {
                self.index.insert(key, self.groups.len());
                self.groups.push(SplitGroup {
                    scope,
                    column: column.clone().with_matching_types(LiteralTypes::only(dropped)),
                    filters: vec![id],
                });
            }
        }
    }

    /// Inserts the recorded `EXISTS` branches. Returns true if any was added.
    fn widen(self, query: &mut Query) -> bool {
        let widened = !self.groups.is_empty();
        for group in self.groups {
            trace!(column = %group.column, filters = group.filters.len(), "query.narrow.widen");
            let exists = query.add_filter(Filter::exists(group.column), false);
            match group.filters.as_slice() {
                [single] => {
                    let parent = query.parent(*single);
                    let or = query.add_or(vec![*single, exists], false);
                    query.splice(parent, *single, or);
                }
                filters => {
                    let scope = group.scope;
                    let mut operands = Vec::with_capacity(query.operands(scope).len());
                    let mut placed = false;
                    let shared = query.add_and(filters.to_vec(), false);
                    let or = query.add_or(vec![shared, exists], false);
                    for op in query.operands(scope) {
                        if !filters.contains(op) {
                            operands.push(*op);
                        } else if !placed {
                            operands.push(or);
                            placed = true;
                        }
                    }
                    query.set_operands(scope, operands);
                }
            }
        }
        widened
    }
}

/// Restricts the filter's types. A string split under an effective `!=` is
/// recorded in `cache` for widening.
fn narrow_filter(query: &mut Query, id: ExprId, cache: &mut ExistsCache) {
    let inverted = query.is_inverted(id);
    let Some(filter) = query.filter(id) else {
        return;
    };
    if filter.op.is_existence() {
        return;
    }
    let Some(literal) = filter.literal() else {
        return;
    };
    if literal.as_any(filter.op) || literal.as_null(filter.op) {
        return;
    }

    let before = filter.column.matching_types();
    let after = admissible_types(literal, filter.op, before);
    if after == before {
        return;
    }
    trace!(column = %filter.column, from = %before, to = %after, "query.narrow.filter");

    if after.is_empty() {
        let empty = query.add_empty(inverted);
        query.replace(id, empty);
        return;
    }

    let dropped_string = string_split_dropped_type(literal, before, after);
    let effective_neq = filter.op.effective(inverted) == FilterOperation::Neq;
    let column = filter.column.clone();
    if let Some(filter) = query.filter_mut(id) {
        filter.column.set_matching_types(after);
    }
    if let Some(dropped) = dropped_string.filter(|_| effective_neq) {
        cache.record(query, id, &column, dropped);
    }
}

/// A string literal that keeps exactly one of the two string types it could
/// otherwise hold reports the one it lost.
fn string_split_dropped_type(literal: &Literal, before: LiteralTypes, after: LiteralTypes) -> Option<LiteralType> {
    if !matches!(literal, Literal::String(_)) {
        return None;
    }
    let kept = after.intersection(LiteralTypes::STRINGS);
    let dropped = before.intersection(LiteralTypes::STRINGS).difference(after);
    if kept.len() == 1 && dropped.len() == 1 {
        dropped.iter().next()
    } else {
        None
    }
}
