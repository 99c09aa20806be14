//! Boolean expression tree over column filters.
//!
//! Expressions live in an arena owned by [`Query`] and refer to each other by
//! [`ExprId`]. Every node carries an inversion flag, so `NOT` never appears as
//! a node of its own. Rewriting passes mutate the arena in place and leave
//! detached nodes behind; [`Query::copy`] compacts the reachable tree into a
//! fresh arena.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::query::column::ColumnDescriptor;
use crate::query::literal::Literal;

/// Index of an expression inside a [`Query`] arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ExprId(u32);

impl ExprId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Comparison or existence test applied by a filter.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperation {
    /// Column is present.
    Exists,
    /// Column is absent.
    NotExists,
    /// Equal to the literal (wildcard patterns for strings).
    Eq,
    /// Not equal to the literal.
    Neq,
    /// Strictly less than the literal.
    Lt,
    /// Strictly greater than the literal.
    Gt,
    /// Less than or equal to the literal.
    Lte,
    /// Greater than or equal to the literal.
    Gte,
}

impl FilterOperation {
    /// `Eq` or `Neq`.
    pub fn is_equality(self) -> bool {
        matches!(self, FilterOperation::Eq | FilterOperation::Neq)
    }

    /// Any operator that compares against a literal.
    pub fn is_comparison(self) -> bool {
        !self.is_existence()
    }

    /// `Exists` or `NotExists`.
    pub fn is_existence(self) -> bool {
        matches!(self, FilterOperation::Exists | FilterOperation::NotExists)
    }

    /// Operator describing the filter once an enclosing inversion is pushed
    /// into it. Used to decide which rewrite applies to an inverted filter.
    pub fn effective(self, inverted: bool) -> Self {
        if !inverted {
            return self;
        }
        match self {
            FilterOperation::Exists => FilterOperation::NotExists,
            FilterOperation::NotExists => FilterOperation::Exists,
            FilterOperation::Eq => FilterOperation::Neq,
            FilterOperation::Neq => FilterOperation::Eq,
            FilterOperation::Lt => FilterOperation::Gte,
            FilterOperation::Gte => FilterOperation::Lt,
            FilterOperation::Gt => FilterOperation::Lte,
            FilterOperation::Lte => FilterOperation::Gt,
        }
    }

    /// Operator symbol used in rendered queries.
    pub fn symbol(self) -> &'static str {
        match self {
            FilterOperation::Exists => "EXISTS",
            FilterOperation::NotExists => "NOT EXISTS",
            FilterOperation::Eq => "=",
            FilterOperation::Neq => "!=",
            FilterOperation::Lt => "<",
            FilterOperation::Gt => ">",
            FilterOperation::Lte => "<=",
            FilterOperation::Gte => ">=",
        }
    }

    /// Snake-case name, matching the serialized form.
    pub fn name(self) -> &'static str {
        match self {
            FilterOperation::Exists => "exists",
            FilterOperation::NotExists => "not_exists",
            FilterOperation::Eq => "eq",
            FilterOperation::Neq => "neq",
            FilterOperation::Lt => "lt",
            FilterOperation::Gt => "gt",
            FilterOperation::Lte => "lte",
            FilterOperation::Gte => "gte",
        }
    }
}

/// Leaf predicate on one column.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    /// Operator applied to the column.
    pub op: FilterOperation,
    /// Column the filter reads.
    pub column: ColumnDescriptor,
    /// Literal operand; literals are shared between copies.
    pub operand: Option<Arc<Literal>>,
}

impl Filter {
    /// Comparison filter.
    pub fn new(column: ColumnDescriptor, op: FilterOperation, operand: Literal) -> Self {
        Filter {
            op,
            column,
            operand: Some(Arc::new(operand)),
        }
    }

    /// `column EXISTS`.
    pub fn exists(column: ColumnDescriptor) -> Self {
        Filter {
            op: FilterOperation::Exists,
            column,
            operand: None,
        }
    }

    /// `column NOT EXISTS`.
    pub fn not_exists(column: ColumnDescriptor) -> Self {
        Filter {
            op: FilterOperation::NotExists,
            column,
            operand: None,
        }
    }

    /// Literal operand, if any.
    pub fn literal(&self) -> Option<&Literal> {
        self.operand.as_deref()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.column, self.op.symbol())?;
        if let Some(literal) = self.literal() {
            write!(f, " {literal}")?;
        }
        Ok(())
    }
}

/// Expression payload.
#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    /// Conjunction; with no operands it is the constant true.
    And(Vec<ExprId>),
    /// Disjunction; with no operands it is the constant false.
    Or(Vec<ExprId>),
    /// Column predicate.
    Filter(Filter),
    /// Matches nothing unless inverted.
    Empty,
}

/// Coarse node classification, handy when the payload itself is not needed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeClass {
    /// [`ExprKind::And`].
    And,
    /// [`ExprKind::Or`].
    Or,
    /// [`ExprKind::Filter`].
    Filter,
    /// [`ExprKind::Empty`].
    Empty,
}

impl NodeClass {
    /// `And` or `Or`.
    pub fn is_connective(self) -> bool {
        matches!(self, NodeClass::And | NodeClass::Or)
    }
}

/// Arena entry.
#[derive(Clone, Debug)]
pub struct Node {
    kind: ExprKind,
    inverted: bool,
    parent: Option<ExprId>,
}

impl Node {
    /// Payload.
    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }

    /// Inversion flag.
    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    /// Enclosing expression, `None` for the root or detached nodes.
    pub fn parent(&self) -> Option<ExprId> {
        self.parent
    }
}

/// A boolean expression tree with a designated root.
#[derive(Clone, Debug)]
pub struct Query {
    nodes: Vec<Node>,
    root: ExprId,
}

impl Query {
    /// Query that matches nothing.
    pub fn empty() -> Self {
        Self::with_root(ExprKind::Empty)
    }

    /// Query that matches every record.
    pub fn match_all() -> Self {
        Self::with_root(ExprKind::And(Vec::new()))
    }

    /// Single-filter query.
    pub fn from_filter(filter: Filter) -> Self {
        Self::with_root(ExprKind::Filter(filter))
    }

    fn with_root(kind: ExprKind) -> Self {
        Query {
            nodes: vec![Node {
                kind,
                inverted: false,
                parent: None,
            }],
            root: ExprId(0),
        }
    }

    /// Root expression.
    pub fn root(&self) -> ExprId {
        self.root
    }

    /// Makes `id` the root and detaches it from any parent.
    pub fn set_root(&mut self, id: ExprId) {
        self.nodes[id.index()].parent = None;
        self.root = id;
    }

    /// Arena node `id`.
    pub fn node(&self, id: ExprId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Payload of `id`.
    pub fn kind(&self, id: ExprId) -> &ExprKind {
        &self.nodes[id.index()].kind
    }

    /// Payload kind of `id` without its contents.
    pub fn class(&self, id: ExprId) -> NodeClass {
        match self.kind(id) {
            ExprKind::And(_) => NodeClass::And,
            ExprKind::Or(_) => NodeClass::Or,
            ExprKind::Filter(_) => NodeClass::Filter,
            ExprKind::Empty => NodeClass::Empty,
        }
    }

    /// Inversion flag of `id`.
    pub fn is_inverted(&self, id: ExprId) -> bool {
        self.nodes[id.index()].inverted
    }

    /// Sets the inversion flag of `id`.
    pub fn set_inverted(&mut self, id: ExprId, inverted: bool) {
        self.nodes[id.index()].inverted = inverted;
    }

    /// Flips the inversion flag of `id`.
    pub fn invert(&mut self, id: ExprId) {
        let node = &mut self.nodes[id.index()];
        node.inverted = !node.inverted;
    }

    /// Enclosing connective; `None` for the root and detached nodes.
    pub fn parent(&self, id: ExprId) -> Option<ExprId> {
        self.nodes[id.index()].parent
    }

    /// Operands of a connective; empty for leaves.
    pub fn operands(&self, id: ExprId) -> &[ExprId] {
        match self.kind(id) {
            ExprKind::And(ops) | ExprKind::Or(ops) => ops,
            ExprKind::Filter(_) | ExprKind::Empty => &[],
        }
    }

    /// Filter payload of `id`, if it is a filter.
    pub fn filter(&self, id: ExprId) -> Option<&Filter> {
        match self.kind(id) {
            ExprKind::Filter(filter) => Some(filter),
            _ => None,
        }
    }

    /// Mutable filter payload of `id`.
    pub fn filter_mut(&mut self, id: ExprId) -> Option<&mut Filter> {
        match &mut self.nodes[id.index()].kind {
            ExprKind::Filter(filter) => Some(filter),
            _ => None,
        }
    }

    /// True when every operand of `id` is an expression. Leaves report false.
    pub fn has_only_expression_operands(&self, id: ExprId) -> bool {
        self.class(id).is_connective()
    }

    /// Appends a node; operands of a connective are re-parented to it.
    pub fn add(&mut self, kind: ExprKind, inverted: bool) -> ExprId {
        let id = ExprId(self.nodes.len() as u32);
        if let ExprKind::And(ops) | ExprKind::Or(ops) = &kind {
            for op in ops {
                self.nodes[op.index()].parent = Some(id);
            }
        }
        self.nodes.push(Node {
            kind,
            inverted,
            parent: None,
        });
        id
    }

    /// Appends an `And` over `operands`.
    pub fn add_and(&mut self, operands: Vec<ExprId>, inverted: bool) -> ExprId {
        self.add(ExprKind::And(operands), inverted)
    }

    /// Appends an `Or` over `operands`.
    pub fn add_or(&mut self, operands: Vec<ExprId>, inverted: bool) -> ExprId {
        self.add(ExprKind::Or(operands), inverted)
    }

    /// Appends a filter leaf.
    pub fn add_filter(&mut self, filter: Filter, inverted: bool) -> ExprId {
        self.add(ExprKind::Filter(filter), inverted)
    }

    /// Appends a constant false (true when `inverted`).
    pub fn add_empty(&mut self, inverted: bool) -> ExprId {
        self.add(ExprKind::Empty, inverted)
    }

    /// Replaces the payload of `id`, re-parenting new operands.
    pub fn set_kind(&mut self, id: ExprId, kind: ExprKind) {
        if let ExprKind::And(ops) | ExprKind::Or(ops) = &kind {
            for op in ops {
                self.nodes[op.index()].parent = Some(id);
            }
        }
        self.nodes[id.index()].kind = kind;
    }

    /// Replaces the operand list of connective `id`. No-op on leaves.
    pub fn set_operands(&mut self, id: ExprId, operands: Vec<ExprId>) {
        for op in &operands {
            self.nodes[op.index()].parent = Some(id);
        }
        match &mut self.nodes[id.index()].kind {
            ExprKind::And(ops) | ExprKind::Or(ops) => *ops = operands,
            ExprKind::Filter(_) | ExprKind::Empty => {}
        }
    }

    /// Appends `child` to connective `parent`.
    pub fn push_operand(&mut self, parent: ExprId, child: ExprId) {
        self.nodes[child.index()].parent = Some(parent);
        if let ExprKind::And(ops) | ExprKind::Or(ops) = &mut self.nodes[parent.index()].kind {
            ops.push(child);
        }
    }

    /// Puts `new` where `old` currently sits, either in its parent's operand
    /// list or as the root.
    pub fn replace(&mut self, old: ExprId, new: ExprId) {
        let parent = self.parent(old);
        self.splice(parent, old, new);
    }

    /// Like [`Query::replace`], with the parent captured before `old` was
    /// re-parented (for example when `old` is wrapped inside `new`).
    pub fn splice(&mut self, parent: Option<ExprId>, old: ExprId, new: ExprId) {
        match parent {
            None => {
                if self.root == old {
                    self.set_root(new);
                }
            }
            Some(parent) => {
                if let ExprKind::And(ops) | ExprKind::Or(ops) = &mut self.nodes[parent.index()].kind {
                    for slot in ops.iter_mut().filter(|slot| **slot == old) {
                        *slot = new;
                    }
                }
                self.nodes[new.index()].parent = Some(parent);
            }
        }
    }

    /// Deep-copies the subtree at `id` inside this arena.
    pub fn deep_copy(&mut self, id: ExprId) -> ExprId {
        let node = self.node(id).clone();
        let kind = match node.kind {
            ExprKind::And(ops) => ExprKind::And(ops.into_iter().map(|op| self.deep_copy(op)).collect()),
            ExprKind::Or(ops) => ExprKind::Or(ops.into_iter().map(|op| self.deep_copy(op)).collect()),
            other => other,
        };
        self.add(kind, node.inverted)
    }

    /// Deep-copies the subtree at `id` of `src` into this arena. Column
    /// descriptors are cloned, literals are shared.
    pub fn import(&mut self, src: &Query, id: ExprId) -> ExprId {
        let node = src.node(id);
        let kind = match &node.kind {
            ExprKind::And(ops) => ExprKind::And(ops.iter().map(|op| self.import(src, *op)).collect()),
            ExprKind::Or(ops) => ExprKind::Or(ops.iter().map(|op| self.import(src, *op)).collect()),
            ExprKind::Filter(filter) => ExprKind::Filter(filter.clone()),
            ExprKind::Empty => ExprKind::Empty,
        };
        self.add(kind, node.inverted)
    }

    /// Installs a deep copy of `id` at the end of `parent`'s operand list in
    /// `dst`.
    pub fn copy_append(&self, id: ExprId, dst: &mut Query, parent: ExprId) -> ExprId {
        let copied = dst.import(self, id);
        dst.push_operand(parent, copied);
        copied
    }

    /// Installs a deep copy of `id` over operand `position` of `parent` in
    /// `dst`. Out-of-range positions append.
    pub fn copy_replace(&self, id: ExprId, dst: &mut Query, parent: ExprId, position: usize) -> ExprId {
        let copied = dst.import(self, id);
        let previous = dst.operands(parent).get(position).copied();
        match previous {
            Some(previous) => dst.splice(Some(parent), previous, copied),
            None => dst.push_operand(parent, copied),
        }
        copied
    }

    /// Independent, compacted copy of the reachable tree.
    pub fn copy(&self) -> Query {
        self.copy_subtree(self.root)
    }

    /// Independent query rooted at a copy of `id`.
    pub fn copy_subtree(&self, id: ExprId) -> Query {
        let mut out = Query {
            nodes: Vec::with_capacity(self.nodes.len()),
            root: ExprId(0),
        };
        let root = out.import(self, id);
        out.set_root(root);
        out
    }

    /// Number of arena slots, reachable or not.
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    /// Reachable filter nodes in pre-order.
    pub fn filter_ids(&self) -> Vec<ExprId> {
        self.preorder()
            .into_iter()
            .filter(|id| self.class(*id) == NodeClass::Filter)
            .collect()
    }

    /// Reachable nodes in pre-order.
    pub fn preorder(&self) -> Vec<ExprId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.operands(id).iter().rev());
        }
        out
    }

    /// Root is a non-inverted `Empty`.
    pub fn is_empty(&self) -> bool {
        self.class(self.root) == NodeClass::Empty && !self.is_inverted(self.root)
    }

    /// Root is the constant true.
    pub fn is_match_all(&self) -> bool {
        let inverted = self.is_inverted(self.root);
        match self.kind(self.root) {
            ExprKind::And(ops) => ops.is_empty() && !inverted,
            ExprKind::Or(ops) => ops.is_empty() && inverted,
            ExprKind::Empty => inverted,
            ExprKind::Filter(_) => false,
        }
    }

    /// Structural equality of the reachable trees, ignoring arena layout.
    pub fn structurally_eq(&self, other: &Query) -> bool {
        self.subtree_eq(self.root, other, other.root)
    }

    fn subtree_eq(&self, id: ExprId, other: &Query, other_id: ExprId) -> bool {
        if self.is_inverted(id) != other.is_inverted(other_id) {
            return false;
        }
        match (self.kind(id), other.kind(other_id)) {
            (ExprKind::And(a), ExprKind::And(b)) | (ExprKind::Or(a), ExprKind::Or(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.subtree_eq(*x, other, *y))
            }
            (ExprKind::Filter(a), ExprKind::Filter(b)) => a == b,
            (ExprKind::Empty, ExprKind::Empty) => true,
            _ => false,
        }
    }

    fn fmt_node(&self, id: ExprId, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_inverted(id) {
            f.write_str("NOT ")?;
        }
        let (ops, joiner, constant) = match self.kind(id) {
            ExprKind::Filter(filter) => return write!(f, "{filter}"),
            ExprKind::Empty => return f.write_str("EMPTY"),
            ExprKind::And(ops) => (ops, " AND ", "TRUE"),
            ExprKind::Or(ops) => (ops, " OR ", "FALSE"),
        };
        if ops.is_empty() {
            return f.write_str(constant);
        }
        f.write_str("(")?;
        for (idx, op) in ops.iter().enumerate() {
            if idx > 0 {
                f.write_str(joiner)?;
            }
            self.fmt_node(*op, f)?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_node(self.root, f)
    }
}
