#![forbid(unsafe_code)]

//! Merged schema tree of an archive.
//!
//! Every distinct (parent, key, storage type) triple seen while ingesting
//! records gets one node. Object subtrees per namespace hang off unnamed
//! roots; a separate metadata subtree holds per-record bookkeeping columns.

use rustc_hash::FxHashMap;

use crate::archive::NodeId;
use crate::query::column::Namespace;
use crate::query::literal::LiteralType;

/// Storage type of a schema-tree node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeType {
    /// Signed integer column.
    Integer,
    /// Float column.
    Float,
    /// Log-dictionary string column.
    ClpString,
    /// Variable-dictionary string column.
    VarString,
    /// Boolean column.
    Boolean,
    /// Interior object node; holds no values itself.
    Object,
    /// Array column stored as raw JSON.
    UnstructuredArray,
    /// Column whose only value is null.
    NullValue,
    /// Millisecond timestamp column.
    Timestamp,
    /// Root of the metadata subtree.
    Metadata,
}

impl NodeType {
    /// Literal type a value stored in this node compares as; `None` for
    /// structural nodes.
    pub fn literal_type(self) -> Option<LiteralType> {
        match self {
            NodeType::Integer => Some(LiteralType::Integer),
            NodeType::Float => Some(LiteralType::Float),
            NodeType::ClpString => Some(LiteralType::ClpString),
            NodeType::VarString => Some(LiteralType::VarString),
            NodeType::Boolean => Some(LiteralType::Boolean),
            NodeType::UnstructuredArray => Some(LiteralType::Array),
            NodeType::NullValue => Some(LiteralType::Null),
            NodeType::Timestamp => Some(LiteralType::Timestamp),
            NodeType::Object | NodeType::Metadata => None,
        }
    }
}

/// One node of the schema tree.
#[derive(Clone, Debug)]
pub struct SchemaNode {
    /// Node identifier (index into the tree).
    pub id: NodeId,
    /// Parent node, `None` for subtree roots.
    pub parent: Option<NodeId>,
    /// Key under the parent; subtree roots use the namespace prefix.
    pub name: String,
    /// Storage type.
    pub node_type: NodeType,
    /// Child nodes in insertion order.
    pub children: Vec<NodeId>,
}

/// Tree of every column path an archive contains.
#[derive(Clone, Debug, Default)]
pub struct SchemaTree {
    nodes: Vec<SchemaNode>,
    lookup: FxHashMap<(Option<NodeId>, String, NodeType), NodeId>,
}

impl SchemaTree {
    /// Empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the node for (`parent`, `name`, `node_type`), creating it if
    /// needed.
    pub fn add_node(&mut self, parent: Option<NodeId>, name: &str, node_type: NodeType) -> NodeId {
        let key = (parent, name.to_owned(), node_type);
        if let Some(id) = self.lookup.get(&key) {
            return *id;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(SchemaNode {
            id,
            parent,
            name: name.to_owned(),
            node_type,
            children: Vec::new(),
        });
        if let Some(parent) = parent {
            self.nodes[parent.0 as usize].children.push(id);
        }
        self.lookup.insert(key, id);
        id
    }

    /// Node `id`, if it exists.
    pub fn node(&self, id: NodeId) -> Option<&SchemaNode> {
        self.nodes.get(id.0 as usize)
    }

    /// Every node, indexed by id.
    pub fn nodes(&self) -> &[SchemaNode] {
        &self.nodes
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the tree has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Type of node `id`.
    pub fn node_type(&self, id: NodeId) -> Option<NodeType> {
        self.node(id).map(|node| node.node_type)
    }

    /// Children of `id`.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &SchemaNode> + '_ {
        self.node(id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
            .iter()
            .filter_map(|child| self.node(*child))
    }

    /// Root of the object subtree for `namespace`.
    pub fn object_subtree(&self, namespace: Namespace) -> Option<NodeId> {
        self.lookup
            .get(&(None, namespace.prefix().to_owned(), NodeType::Object))
            .copied()
    }

    /// Root of the metadata subtree.
    pub fn metadata_subtree(&self) -> Option<NodeId> {
        self.lookup
            .get(&(None, String::new(), NodeType::Metadata))
            .copied()
    }

    /// Root of the object subtree for `namespace`, created on first use.
    pub fn ensure_object_subtree(&mut self, namespace: Namespace) -> NodeId {
        self.add_node(None, namespace.prefix(), NodeType::Object)
    }

    /// Root of the metadata subtree, created on first use.
    pub fn ensure_metadata_subtree(&mut self) -> NodeId {
        self.add_node(None, "", NodeType::Metadata)
    }

    /// Subtree root `id` hangs under.
    pub fn subtree_root(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self.node(current).and_then(|node| node.parent) {
            current = parent;
        }
        current
    }

    /// Keys from below the subtree root down to `id`.
    pub fn path(&self, id: NodeId) -> Vec<&str> {
        let mut keys = Vec::new();
        let mut current = self.node(id);
        while let Some(node) = current {
            if node.parent.is_none() {
                break;
            }
            keys.push(node.name.as_str());
            current = node.parent.and_then(|parent| self.node(parent));
        }
        keys.reverse();
        keys
    }

    /// Every node reached by following `keys` exactly from `root`. Several
    /// nodes may share a path when a key was seen with different types.
    pub fn resolve_exact(&self, root: NodeId, keys: &[&str]) -> Vec<NodeId> {
        let mut frontier = vec![root];
        for key in keys {
            frontier = frontier
                .iter()
                .flat_map(|id| self.children(*id))
                .filter(|child| child.name == *key)
                .map(|child| child.id)
                .collect();
            if frontier.is_empty() {
                break;
            }
        }
        frontier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodes_are_deduplicated_by_parent_name_and_type() {
        let mut tree = SchemaTree::new();
        let root = tree.ensure_object_subtree(Namespace::Default);
        let a_int = tree.add_node(Some(root), "a", NodeType::Integer);
        let again = tree.add_node(Some(root), "a", NodeType::Integer);
        let a_str = tree.add_node(Some(root), "a", NodeType::VarString);
        assert_eq!(a_int, again);
        assert_ne!(a_int, a_str);
        assert_eq!(tree.resolve_exact(root, &["a"]), vec![a_int, a_str]);
        assert_eq!(tree.object_subtree(Namespace::Default), Some(root));
        assert_eq!(tree.object_subtree(Namespace::Autogen), None);
    }

    #[test]
    fn paths_and_subtree_roots() {
        let mut tree = SchemaTree::new();
        let root = tree.ensure_object_subtree(Namespace::Default);
        let a = tree.add_node(Some(root), "a", NodeType::Object);
        let b = tree.add_node(Some(a), "b", NodeType::Float);
        assert_eq!(tree.path(b), vec!["a", "b"]);
        assert_eq!(tree.subtree_root(b), root);
        let meta = tree.ensure_metadata_subtree();
        assert_ne!(meta, root);
        assert_eq!(tree.metadata_subtree(), Some(meta));
    }
}
