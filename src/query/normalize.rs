#![forbid(unsafe_code)]

//! Or-of-And normalization.
//!
//! Rewrites a query into a disjunction of conjunctions whose leaves are
//! filters or `Empty`: single-operand connectives collapse into their child,
//! inverted connectives are pushed down with De Morgan's laws, nested
//! connectives of the same kind are flattened, and an `And` over `Or`s is
//! distributed into an `Or` of `And`s. Filter inversion flags stay on the
//! filters. The output is compacted, and normalizing it again is a no-op.

use tracing::trace;

use crate::query::ast::{ExprId, ExprKind, NodeClass, Query};

/// Returns the Or-of-And normal form of `query`.
pub fn normalize(mut query: Query) -> Query {
    let root = query.root();
    let root = simplify(&mut query, root);
    query.set_root(root);
    let normalized = query.copy();
    trace!(query = %normalized, "query.normalize.done");
    normalized
}

fn simplify(query: &mut Query, id: ExprId) -> ExprId {
    let id = collapse_single_operand(query, id);
    let class = query.class(id);
    if !class.is_connective() {
        return id;
    }
    if query.is_inverted(id) {
        apply_de_morgan(query, id);
    }

    let operands = query.operands(id).to_vec();
    let simplified: Vec<ExprId> = operands.into_iter().map(|op| simplify(query, op)).collect();
    let flattened = flatten(query, id, simplified);
    if let [only] = flattened[..] {
        return only;
    }
    query.set_operands(id, flattened);

    if query.class(id) == NodeClass::And {
        distribute(query, id)
    } else {
        id
    }
}

fn collapse_single_operand(query: &mut Query, mut id: ExprId) -> ExprId {
    loop {
        let operands = query.operands(id);
        if operands.len() != 1 {
            return id;
        }
        let child = operands[0];
        if query.is_inverted(id) {
            query.invert(child);
        }
        id = child;
    }
}

fn apply_de_morgan(query: &mut Query, id: ExprId) {
    let operands = query.operands(id).to_vec();
    for op in &operands {
        query.invert(*op);
    }
    let kind = match query.class(id) {
        NodeClass::And => ExprKind::Or(operands),
        _ => ExprKind::And(operands),
    };
    query.set_kind(id, kind);
    query.set_inverted(id, false);
}

fn flatten(query: &Query, id: ExprId, operands: Vec<ExprId>) -> Vec<ExprId> {
    let class = query.class(id);
    let mut flattened = Vec::with_capacity(operands.len());
    for op in operands {
        if query.class(op) == class && !query.is_inverted(op) {
            flattened.extend_from_slice(query.operands(op));
        } else {
            flattened.push(op);
        }
    }
    flattened
}

/// Turns `And(x, Or(a, b), Or(c, d))` into
/// `Or(And(x, a, c), And(x, a, d), And(x, b, c), And(x, b, d))`, copying the
/// shared operands into each conjunction. The first disjunction varies
/// slowest.
fn distribute(query: &mut Query, id: ExprId) -> ExprId {
    let operands = query.operands(id).to_vec();
    let (disjunctions, others): (Vec<ExprId>, Vec<ExprId>) = operands
        .into_iter()
        .partition(|op| query.class(*op) == NodeClass::Or && !query.is_inverted(*op));
    if disjunctions.is_empty() {
        return id;
    }

    let choices: Vec<Vec<ExprId>> = disjunctions
        .iter()
        .map(|or| query.operands(*or).to_vec())
        .collect();
    if choices.iter().any(Vec::is_empty) {
        return query.add_empty(false);
    }

    let mut conjunctions = Vec::new();
    let mut cursor = vec![0usize; choices.len()];
    loop {
        let mut terms = Vec::with_capacity(others.len() + choices.len());
        for other in &others {
            terms.push(query.deep_copy(*other));
        }
        for (slot, options) in cursor.iter().zip(&choices) {
            let picked = query.deep_copy(options[*slot]);
            if query.class(picked) == NodeClass::And && !query.is_inverted(picked) {
                terms.extend_from_slice(&query.operands(picked).to_vec());
            } else {
                terms.push(picked);
            }
        }
        let conjunction = if terms.len() == 1 {
            terms[0]
        } else {
            query.add_and(terms, false)
        };
        conjunctions.push(conjunction);

        let mut position = cursor.len();
        loop {
            if position == 0 {
                return query.add_or(conjunctions, false);
            }
            position -= 1;
            cursor[position] += 1;
            if cursor[position] < choices[position].len() {
                break;
            }
            cursor[position] = 0;
        }
    }
}
