#![forbid(unsafe_code)]

//! Timestamp-range pruning oracle.
//!
//! Decides filters on the archive's authoritative timestamp column as false
//! when the archive's observed range cannot satisfy them. It never decides a
//! filter as true: a range that overlaps says nothing about each record.

use tracing::trace;

use crate::archive::{NodeType, SchemaTree, TimestampDictionary, TimestampEntry, TimestampRange};
use crate::query::ast::{Filter, FilterOperation};
use crate::query::literal::{LiteralType, LiteralTypes};
use crate::query::propagate::{FilterOracle, Truth};

/// Oracle over an archive's timestamp dictionary.
pub struct TimestampIndexOracle<'a> {
    entry: Option<&'a TimestampEntry>,
    tree: &'a SchemaTree,
}

impl<'a> TimestampIndexOracle<'a> {
    /// Oracle over the authoritative entry of `dictionary`.
    pub fn new(dictionary: &'a TimestampDictionary, tree: &'a SchemaTree) -> Self {
        TimestampIndexOracle {
            entry: dictionary.authoritative(),
            tree,
        }
    }

    /// True if every column the filter could bind to at the timestamp path
    /// contributed to the recorded range, and no array along the path could
    /// hide further values.
    fn covers(&self, entry: &TimestampEntry, filter: &Filter) -> bool {
        let column = &filter.column;
        if column.namespace() != entry.namespace || !column.matches_any(LiteralTypes::EPOCH) {
            return false;
        }
        let Some(keys) = column.exact_keys() else {
            return false;
        };
        if keys.len() != entry.keys.len() || keys.iter().zip(&entry.keys).any(|(a, b)| *a != b.as_str()) {
            return false;
        }
        let Some(root) = self.tree.object_subtree(entry.namespace) else {
            return false;
        };
        if column.matches_type(LiteralType::Array) {
            let array_on_path = (1..keys.len()).any(|depth| {
                self.tree
                    .resolve_exact(root, &keys[..depth])
                    .into_iter()
                    .any(|node| self.tree.node_type(node) == Some(NodeType::UnstructuredArray))
            });
            if array_on_path {
                return false;
            }
        }
        self.tree
            .resolve_exact(root, &keys)
            .into_iter()
            .filter(|node| {
                self.tree
                    .node_type(*node)
                    .and_then(|ty| ty.literal_type())
                    .is_some_and(|ty| column.matches_type(ty))
            })
            .all(|node| entry.columns.contains(&node))
    }
}

impl FilterOracle for TimestampIndexOracle<'_> {
    fn evaluate(&mut self, filter: &Filter) -> Truth {
        let Some(entry) = self.entry else {
            return Truth::Unknown;
        };
        if filter.op.is_existence() || !self.covers(entry, filter) {
            return Truth::Unknown;
        }
        let Some(literal) = filter.literal() else {
            return Truth::Unknown;
        };
        let impossible = match entry.range {
            TimestampRange::Integer { min, max } => literal
                .as_int(filter.op)
                .map(|value| range_excludes(filter.op, value, min, max)),
            TimestampRange::Float { min, max } => literal
                .as_float(filter.op)
                .map(|value| range_excludes(filter.op, value, min, max)),
        };
        if impossible == Some(true) {
            trace!(filter = %filter, "query.timestamp_index.pruned");
            Truth::False
        } else {
            Truth::Unknown
        }
    }
}

/// True if no value in `[min, max]` satisfies `value op literal`.
fn range_excludes<T: PartialOrd>(op: FilterOperation, literal: T, min: T, max: T) -> bool {
    match op {
        FilterOperation::Eq => literal < min || literal > max,
        FilterOperation::Neq => min == max && literal == min,
        FilterOperation::Lt => min >= literal,
        FilterOperation::Lte => min > literal,
        FilterOperation::Gt => max <= literal,
        FilterOperation::Gte => max < literal,
        FilterOperation::Exists | FilterOperation::NotExists => false,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::query::column::{ColumnDescriptor, Namespace};
    use crate::query::literal::Literal;

    fn fixture() -> (SchemaTree, TimestampDictionary) {
        let mut tree = SchemaTree::new();
        let root = tree.ensure_object_subtree(Namespace::Default);
        let ts = tree.add_node(Some(root), "ts", NodeType::Integer);
        let mut dictionary = TimestampDictionary::new();
        dictionary.insert(
            TimestampEntry {
                namespace: Namespace::Default,
                keys: vec!["ts".to_owned()],
                range: TimestampRange::Integer { min: 1000, max: 2000 },
                columns: BTreeSet::from([ts]),
            },
            true,
        );
        (tree, dictionary)
    }

    fn ts_filter(op: FilterOperation, value: i64) -> Filter {
        let column = ColumnDescriptor::key("ts")
            .with_matching_types(LiteralTypes::EPOCH.union(LiteralTypes::only(LiteralType::Array)));
        Filter::new(column, op, Literal::int(value))
    }

    #[test]
    fn disjoint_ranges_are_false() {
        let (tree, dictionary) = fixture();
        let mut oracle = TimestampIndexOracle::new(&dictionary, &tree);
        assert_eq!(oracle.evaluate(&ts_filter(FilterOperation::Gt, 2000)), Truth::False);
        assert_eq!(oracle.evaluate(&ts_filter(FilterOperation::Lt, 1000)), Truth::False);
        assert_eq!(oracle.evaluate(&ts_filter(FilterOperation::Eq, 5)), Truth::False);
    }

    #[test]
    fn overlapping_ranges_stay_unknown() {
        let (tree, dictionary) = fixture();
        let mut oracle = TimestampIndexOracle::new(&dictionary, &tree);
        assert_eq!(oracle.evaluate(&ts_filter(FilterOperation::Gte, 2000)), Truth::Unknown);
        assert_eq!(oracle.evaluate(&ts_filter(FilterOperation::Lte, 1000)), Truth::Unknown);
        assert_eq!(oracle.evaluate(&ts_filter(FilterOperation::Neq, 1500)), Truth::Unknown);
    }

    #[test]
    fn other_columns_and_uncovered_types_are_not_decided() {
        let (mut tree, dictionary) = fixture();
        let mut oracle = TimestampIndexOracle::new(&dictionary, &tree);
        let other = Filter::new(
            ColumnDescriptor::key("other").with_matching_types(LiteralTypes::EPOCH),
            FilterOperation::Gt,
            Literal::int(5000),
        );
        assert_eq!(oracle.evaluate(&other), Truth::Unknown);

        let root = tree.object_subtree(Namespace::Default).expect("root");
        tree.add_node(Some(root), "ts", NodeType::VarString);
        let mut oracle = TimestampIndexOracle::new(&dictionary, &tree);
        let mixed = Filter::new(
            ColumnDescriptor::key("ts")
                .with_matching_types(LiteralTypes::EPOCH.union(LiteralTypes::only(LiteralType::VarString))),
            FilterOperation::Eq,
            Literal::int(5000),
        );
        assert_eq!(oracle.evaluate(&mixed), Truth::Unknown);
        let numeric_only = Filter::new(
            ColumnDescriptor::key("ts").with_matching_types(LiteralTypes::EPOCH),
            FilterOperation::Eq,
            Literal::int(5000),
        );
        assert_eq!(oracle.evaluate(&numeric_only), Truth::False);
    }
}
