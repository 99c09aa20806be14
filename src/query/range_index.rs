#![forbid(unsafe_code)]

//! Range-index pruning.
//!
//! Filters in the `$` namespace test metadata attached to record ranges, not
//! record fields. Each one is replaced by the set of record ranges whose
//! metadata satisfies it, expressed as bounds on the per-record log event
//! index: `OR(AND(@log_event_idx >= start, @log_event_idx < end), ...)`. A
//! filter no range satisfies becomes `Empty`.

use tracing::debug;

use crate::archive::memory::log_event_idx_column;
use crate::archive::RangeIndexEntry;
use crate::query::ast::{ExprId, Filter, FilterOperation, Query};
use crate::query::column::Namespace;
use crate::query::literal::Literal;
use crate::query::normalize::normalize;
use crate::query::propagate::constant_propagate;
use crate::query::value_match::{path_matches, ValuePredicate};

/// Rewrites every range-index filter of `query` against `entries`.
pub fn prune_range_index(mut query: Query, entries: &[RangeIndexEntry], case_sensitive: bool) -> Query {
    let mut rewritten = false;
    for id in query.filter_ids() {
        rewritten |= rewrite_filter(&mut query, id, entries, case_sensitive);
    }
    let query = constant_propagate(query);
    if rewritten {
        normalize(query)
    } else {
        query
    }
}

fn rewrite_filter(query: &mut Query, id: ExprId, entries: &[RangeIndexEntry], case_sensitive: bool) -> bool {
    let Some(filter) = query.filter(id) else {
        return false;
    };
    if filter.column.namespace() != Namespace::RangeIndex {
        return false;
    }
    let ranges = matching_ranges(filter, entries, case_sensitive);
    debug!(filter = %filter, ranges = ranges.len(), "query.range_index.rewrite");
    let inverted = query.is_inverted(id);

    if ranges.is_empty() {
        let empty = query.add_empty(inverted);
        query.replace(id, empty);
        return false;
    }
    let spans: Vec<ExprId> = ranges
        .iter()
        .map(|(start, end)| {
            let lower = query.add_filter(
                Filter::new(log_event_idx_column(), FilterOperation::Gte, row_literal(*start)),
                false,
            );
            let upper = query.add_filter(
                Filter::new(log_event_idx_column(), FilterOperation::Lt, row_literal(*end)),
                false,
            );
            query.add_and(vec![lower, upper], false)
        })
        .collect();
    let replacement = query.add_or(spans, inverted);
    query.replace(id, replacement);
    true
}

fn row_literal(row: u64) -> Literal {
    Literal::int(i64::try_from(row).unwrap_or(i64::MAX))
}

/// Merged `[start, end)` spans of the entries satisfying `filter`.
fn matching_ranges(filter: &Filter, entries: &[RangeIndexEntry], case_sensitive: bool) -> Vec<(u64, u64)> {
    let negate = filter.op == FilterOperation::NotExists;
    let op = if negate { FilterOperation::Exists } else { filter.op };
    let predicate = ValuePredicate::new(op, filter.literal(), filter.column.matching_types(), case_sensitive);
    let fields_value = |entry: &RangeIndexEntry| serde_json::Value::Object(entry.fields.clone());

    let mut spans: Vec<(u64, u64)> = entries
        .iter()
        .filter(|entry| path_matches(filter.column.tokens(), &fields_value(entry), &predicate) != negate)
        .map(|entry| (entry.start_row, entry.end_row))
        .collect();
    spans.sort_unstable();

    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}
