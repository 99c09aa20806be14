#![forbid(unsafe_code)]

//! Constant propagation with pluggable filter oracles.
//!
//! An oracle may decide a filter as definitely true or false; propagation
//! then removes decided operands, short-circuits connectives, and folds the
//! whole query to `Empty` or the constant true when the root is decided.
//! Oracles answer for the filter itself; the filter's inversion flag is
//! applied afterwards.

use tracing::trace;

use crate::query::ast::{ExprId, Filter, NodeClass, Query};

/// Three-valued result of evaluating an expression at compile time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Truth {
    /// Matches every record.
    True,
    /// Matches no record.
    False,
    /// Depends on the record.
    Unknown,
}

impl Truth {
    /// Lifts a boolean.
    pub fn from_bool(value: bool) -> Self {
        if value {
            Truth::True
        } else {
            Truth::False
        }
    }

    /// Negates decided values when `inverted` is set.
    pub fn invert_if(self, inverted: bool) -> Self {
        match (self, inverted) {
            (Truth::True, true) => Truth::False,
            (Truth::False, true) => Truth::True,
            (value, _) => value,
        }
    }
}

/// Decides individual filters during propagation.
pub trait FilterOracle {
    /// Returns the truth of `filter`, ignoring any inversion on its node.
    fn evaluate(&mut self, filter: &Filter) -> Truth;
}

/// Oracle that never decides anything; propagation then only folds the
/// structural constants (`Empty`, empty connectives).
#[derive(Debug, Default)]
pub struct NoOracle;

impl FilterOracle for NoOracle {
    fn evaluate(&mut self, _filter: &Filter) -> Truth {
        Truth::Unknown
    }
}

/// Folds constants using only the structure of the query.
pub fn constant_propagate(query: Query) -> Query {
    propagate(query, &mut NoOracle)
}

/// Folds constants, consulting `oracle` for every reachable filter.
pub fn propagate(mut query: Query, oracle: &mut dyn FilterOracle) -> Query {
    let root = query.root();
    match evaluate(&mut query, root, oracle) {
        Truth::True => {
            trace!("query.propagate.match_all");
            Query::match_all()
        }
        Truth::False => {
            trace!("query.propagate.empty");
            Query::empty()
        }
        Truth::Unknown => query.copy(),
    }
}

fn evaluate(query: &mut Query, id: ExprId, oracle: &mut dyn FilterOracle) -> Truth {
    let inverted = query.is_inverted(id);
    let truth = match query.class(id) {
        NodeClass::Empty => Truth::False,
        NodeClass::Filter => match query.filter(id) {
            Some(filter) => oracle.evaluate(filter),
            None => Truth::Unknown,
        },
        NodeClass::And => evaluate_connective(query, id, Truth::False, Truth::True, oracle),
        NodeClass::Or => evaluate_connective(query, id, Truth::True, Truth::False, oracle),
    };
    truth.invert_if(inverted)
}

/// `absorbing` decides the connective outright; `identity` operands are
/// dropped. A connective left without operands evaluates to `identity`.
fn evaluate_connective(
    query: &mut Query,
    id: ExprId,
    absorbing: Truth,
    identity: Truth,
    oracle: &mut dyn FilterOracle,
) -> Truth {
    let operands = query.operands(id).to_vec();
    let mut kept = Vec::with_capacity(operands.len());
    for op in operands {
        let truth = evaluate(query, op, oracle);
        if truth == absorbing {
            return absorbing;
        }
        if truth == Truth::Unknown {
            kept.push(op);
        }
    }
    let exhausted = kept.is_empty();
    query.set_operands(id, kept);
    if exhausted {
        identity
    } else {
        Truth::Unknown
    }
}
