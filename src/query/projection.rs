#![forbid(unsafe_code)]

//! Output projection: restricting each matched record to selected columns.

use rustc_hash::FxHashSet;
use serde_json::{Map, Value as JsonValue};

use crate::archive::{NodeId, NodeType, SchemaReader, SchemaTree};
use crate::query::column::{ColumnDescriptor, Namespace};
use crate::query::errors::QueryError;

/// Validated list of projected column paths.
#[derive(Clone, Debug, Default)]
pub struct Projection {
    columns: Vec<Vec<String>>,
}

impl Projection {
    /// Parses `paths`. Each must be a wildcard-free default-namespace path
    /// listed once.
    pub fn new<S: AsRef<str>>(paths: &[S]) -> Result<Self, QueryError> {
        let mut seen = FxHashSet::default();
        let mut columns = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let column = ColumnDescriptor::parse(path)?;
            if column.namespace() != Namespace::Default {
                return Err(QueryError::UnsupportedNamespace {
                    column: path.to_owned(),
                    namespace: column.namespace().name(),
                });
            }
            let Some(keys) = column.exact_keys() else {
                return Err(QueryError::InvalidProjection {
                    column: path.to_owned(),
                });
            };
            let keys: Vec<String> = keys.into_iter().map(str::to_owned).collect();
            if !seen.insert(keys.clone()) {
                return Err(QueryError::DuplicateProjection {
                    column: path.to_owned(),
                });
            }
            columns.push(keys);
        }
        Ok(Projection { columns })
    }

    /// No columns selected; records are emitted whole.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Number of projected columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Binds the projected paths to schema-tree nodes. A path naming an
    /// object selects every column below it.
    pub fn resolve(&self, tree: &SchemaTree) -> ResolvedProjection {
        let mut leaves = Vec::new();
        let Some(root) = tree.object_subtree(Namespace::Default) else {
            return ResolvedProjection { leaves };
        };
        for keys in &self.columns {
            let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            for node in tree.resolve_exact(root, &key_refs) {
                collect_leaves(tree, node, keys.clone(), &mut leaves);
            }
        }
        ResolvedProjection { leaves }
    }
}

fn collect_leaves(tree: &SchemaTree, node: NodeId, keys: Vec<String>, out: &mut Vec<ProjectedLeaf>) {
    match tree.node_type(node) {
        Some(NodeType::Object) => {
            for child in tree.children(node) {
                let mut child_keys = keys.clone();
                child_keys.push(child.name.clone());
                collect_leaves(tree, child.id, child_keys, out);
            }
        }
        Some(_) => out.push(ProjectedLeaf { keys, node }),
        None => {}
    }
}

#[derive(Clone, Debug)]
struct ProjectedLeaf {
    keys: Vec<String>,
    node: NodeId,
}

/// Projection bound to one archive's schema tree.
#[derive(Clone, Debug, Default)]
pub struct ResolvedProjection {
    leaves: Vec<ProjectedLeaf>,
}

impl ResolvedProjection {
    /// Builds the projected JSON object for `row`. Columns absent from the
    /// schema are left out.
    pub fn render(&self, reader: &dyn SchemaReader, row: usize) -> JsonValue {
        let mut out = Map::new();
        for leaf in &self.leaves {
            let Some(column) = reader.column(leaf.node) else {
                continue;
            };
            insert_path(&mut out, &leaf.keys, column.extract_value(row).to_json());
        }
        JsonValue::Object(out)
    }
}

fn insert_path(target: &mut Map<String, JsonValue>, keys: &[String], value: JsonValue) {
    let Some((last, parents)) = keys.split_last() else {
        return;
    };
    let mut current = target;
    for key in parents {
        let slot = current
            .entry(key.clone())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if !slot.is_object() {
            *slot = JsonValue::Object(Map::new());
        }
        let JsonValue::Object(next) = slot else {
            return;
        };
        current = next;
    }
    current.insert(last.clone(), value);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::archive::{ArchiveBuilder, ArchiveReader, SchemaId};
    use crate::error::Result;

    #[test]
    fn rejects_wildcards_duplicates_and_other_namespaces() {
        let err = Projection::new(&["a.*"]).expect_err("wildcard");
        assert_eq!(err.code(), "InvalidProjection");
        let err = Projection::new(&["a", "b", "a"]).expect_err("duplicate");
        assert!(matches!(err, QueryError::DuplicateProjection { .. }));
        let err = Projection::new(&["@a"]).expect_err("namespace");
        assert_eq!(err.code(), "UnsupportedNamespace");
    }

    #[test]
    fn renders_selected_columns_of_a_record() -> Result<()> {
        let mut builder = ArchiveBuilder::new("p");
        builder.add_record(&json!({"a": {"b": 1, "c": "x"}, "d": true, "e": [1]}))?;
        let archive = builder.finish();
        let projection = Projection::new(&["a", "e", "missing"])?.resolve(archive.schema_tree());
        let reader = archive.read_schema(SchemaId(0))?;
        assert_eq!(
            projection.render(reader.as_ref(), 0),
            json!({"a": {"b": 1, "c": "x"}, "e": [1]})
        );
        Ok(())
    }
}
