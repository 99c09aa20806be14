#![forbid(unsafe_code)]

//! Rewrites `*` and `null` comparisons into existence tests.
//!
//! * `col = *` becomes `col EXISTS`, `col != *` becomes `col NOT EXISTS`.
//! * `col = null` becomes `col<null> EXISTS OR col<other types> = null`.
//! * `col != null` becomes `col<non-null types> EXISTS`.
//! * Inverted existence filters swap to their complement.
//!
//! Inversion is folded into the chosen operator, so every filter this pass
//! emits is non-inverted.

use tracing::trace;

use crate::query::ast::{ExprId, Filter, FilterOperation, Query};
use crate::query::literal::{LiteralType, LiteralTypes};
use crate::query::narrow::admissible_types;
use crate::query::normalize::normalize;
use crate::query::propagate::constant_propagate;

/// Converts wildcard and null comparisons, then folds constants and
/// renormalizes if a filter turned into a disjunction.
pub fn convert_to_exists(mut query: Query) -> Query {
    let mut restructured = false;
    for id in query.filter_ids() {
        restructured |= convert_filter(&mut query, id);
    }
    if restructured {
        normalize(constant_propagate(query))
    } else {
        constant_propagate(query)
    }
}

fn convert_filter(query: &mut Query, id: ExprId) -> bool {
    let inverted = query.is_inverted(id);
    let Some(filter) = query.filter(id).cloned() else {
        return false;
    };
    let effective = filter.op.effective(inverted);

    if filter.op.is_existence() {
        if inverted {
            let swapped = Filter {
                op: effective,
                column: filter.column.clone(),
                operand: None,
            };
            let new = query.add_filter(swapped, false);
            query.replace(id, new);
        }
        return false;
    }
    if !filter.op.is_equality() {
        return false;
    }
    let Some(literal) = filter.literal() else {
        return false;
    };

    if literal.as_any(filter.op) {
        let op = if effective == FilterOperation::Eq {
            FilterOperation::Exists
        } else {
            FilterOperation::NotExists
        };
        let new = query.add_filter(
            Filter {
                op,
                column: filter.column.clone(),
                operand: None,
            },
            false,
        );
        trace!(column = %filter.column, op = op.name(), "query.exists.any");
        query.replace(id, new);
        return false;
    }

    if !literal.as_null(filter.op) {
        return false;
    }

    let types = filter.column.matching_types();
    let non_null = types.difference(LiteralTypes::only(LiteralType::Null));
    trace!(column = %filter.column, effective = effective.name(), "query.exists.null");
    if effective == FilterOperation::Neq {
        let new = if non_null.is_empty() {
            query.add_empty(false)
        } else {
            let column = filter.column.clone().with_matching_types(non_null);
            query.add_filter(Filter::exists(column), false)
        };
        query.replace(id, new);
        return false;
    }

    let mut branches: Vec<ExprId> = Vec::with_capacity(2);
    if types.contains(LiteralType::Null) {
        let column = filter
            .column
            .clone()
            .with_matching_types(LiteralTypes::only(LiteralType::Null));
        branches.push(query.add_filter(Filter::exists(column), false));
    }
    let comparable = admissible_types(literal, FilterOperation::Eq, non_null);
    if !comparable.is_empty() {
        let column = filter.column.clone().with_matching_types(comparable);
        let compare = Filter {
            op: FilterOperation::Eq,
            column,
            operand: filter.operand.clone(),
        };
        branches.push(query.add_filter(compare, false));
    }

    match branches.len() {
        0 => {
            let empty = query.add_empty(false);
            query.replace(id, empty);
            false
        }
        1 => {
            query.replace(id, branches[0]);
            false
        }
        _ => {
            let or = query.add_or(branches, false);
            query.replace(id, or);
            true
        }
    }
}
