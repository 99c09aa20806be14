use proptest::prelude::*;
use serde_json::{json, Value as JsonValue};
use sift::archive::ArchiveBuilder;
use sift::config::SearchConfig;
use sift::query::ast::{ExprId, ExprKind, Filter, FilterOperation, NodeClass, Query};
use sift::query::narrow::admissible_types;
use sift::query::normalize::normalize;
use sift::query::propagate::{propagate, FilterOracle, Truth};
use sift::query::value_match::ValuePredicate;
use sift::query::{ColumnDescriptor, Literal, LiteralTypes};
use sift::search::{search_archive, CollectingSink};

const LEAVES: usize = 4;

#[derive(Debug, Clone)]
enum Shape {
    Leaf(usize, bool),
    Empty(bool),
    And(Vec<Shape>, bool),
    Or(Vec<Shape>, bool),
}

fn arb_shape() -> impl Strategy<Value = Shape> {
    let leaf = prop_oneof![
        4 => (0..LEAVES, any::<bool>()).prop_map(|(idx, inverted)| Shape::Leaf(idx, inverted)),
        1 => any::<bool>().prop_map(Shape::Empty),
    ];
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            (prop::collection::vec(inner.clone(), 0..4), any::<bool>())
                .prop_map(|(ops, inverted)| Shape::And(ops, inverted)),
            (prop::collection::vec(inner, 0..4), any::<bool>())
                .prop_map(|(ops, inverted)| Shape::Or(ops, inverted)),
        ]
    })
}

fn leaf_filter(idx: usize) -> Filter {
    Filter::exists(ColumnDescriptor::key(format!("x{idx}")))
}

fn build(query: &mut Query, shape: &Shape) -> ExprId {
    match shape {
        Shape::Leaf(idx, inverted) => query.add_filter(leaf_filter(*idx), *inverted),
        Shape::Empty(inverted) => query.add_empty(*inverted),
        Shape::And(ops, inverted) => {
            let ids = ops.iter().map(|op| build(query, op)).collect();
            query.add_and(ids, *inverted)
        }
        Shape::Or(ops, inverted) => {
            let ids = ops.iter().map(|op| build(query, op)).collect();
            query.add_or(ids, *inverted)
        }
    }
}

fn to_query(shape: &Shape) -> Query {
    let mut query = Query::empty();
    let root = build(&mut query, shape);
    query.set_root(root);
    query
}

fn leaf_index(filter: &Filter) -> usize {
    filter
        .column
        .path()
        .trim_start_matches('x')
        .parse()
        .expect("leaf name")
}

fn eval(query: &Query, id: ExprId, assignment: &[bool]) -> bool {
    let value = match query.kind(id) {
        ExprKind::And(ops) => ops.iter().all(|op| eval(query, *op, assignment)),
        ExprKind::Or(ops) => ops.iter().any(|op| eval(query, *op, assignment)),
        ExprKind::Filter(filter) => assignment[leaf_index(filter)],
        ExprKind::Empty => false,
    };
    value != query.is_inverted(id)
}

fn eval_root(query: &Query, assignment: &[bool]) -> bool {
    eval(query, query.root(), assignment)
}

fn assignments() -> impl Iterator<Item = Vec<bool>> {
    (0..1u32 << LEAVES).map(|bits| (0..LEAVES).map(|idx| bits & (1 << idx) != 0).collect())
}

fn is_or_of_and(query: &Query) -> bool {
    query.preorder().into_iter().all(|id| {
        let class = query.class(id);
        if class.is_connective() && query.is_inverted(id) {
            return false;
        }
        query.operands(id).iter().all(|op| match class {
            NodeClass::And => !query.class(*op).is_connective(),
            NodeClass::Or => query.class(*op) != NodeClass::Or,
            _ => true,
        })
    })
}

/// Decides leaves from a fixed verdict table.
struct TableOracle(Vec<Truth>);

impl FilterOracle for TableOracle {
    fn evaluate(&mut self, filter: &Filter) -> Truth {
        self.0[leaf_index(filter)]
    }
}

fn arb_truth() -> impl Strategy<Value = Truth> {
    prop_oneof![Just(Truth::True), Just(Truth::False), Just(Truth::Unknown)]
}

/// Forces decided leaves to their verdicts.
fn consistent(assignment: &[bool], verdicts: &[Truth]) -> Vec<bool> {
    assignment
        .iter()
        .zip(verdicts)
        .map(|(value, verdict)| match verdict {
            Truth::True => true,
            Truth::False => false,
            Truth::Unknown => *value,
        })
        .collect()
}

fn wrap(shape: &Shape, constant: Query, and: bool) -> Query {
    let mut query = to_query(shape);
    let body = query.root();
    let constant = query.import(&constant, constant.root());
    let root = if and {
        query.add_and(vec![constant, body], false)
    } else {
        query.add_or(vec![constant, body], false)
    };
    query.set_root(root);
    query
}

proptest! {
    #[test]
    fn normalization_preserves_truth(shape in arb_shape()) {
        let query = to_query(&shape);
        let normalized = normalize(query.copy());
        for assignment in assignments() {
            prop_assert_eq!(eval_root(&query, &assignment), eval_root(&normalized, &assignment));
        }
    }

    #[test]
    fn normalization_is_idempotent_and_canonical(shape in arb_shape()) {
        let once = normalize(to_query(&shape));
        let twice = normalize(once.copy());
        prop_assert!(once.structurally_eq(&twice), "{} vs {}", once, twice);
        prop_assert!(is_or_of_and(&once), "not in Or-of-And form: {}", once);
    }

    #[test]
    fn propagation_agrees_with_the_oracle(
        shape in arb_shape(),
        verdicts in prop::collection::vec(arb_truth(), LEAVES),
    ) {
        let query = to_query(&shape);
        let folded = propagate(query.copy(), &mut TableOracle(verdicts.clone()));
        for assignment in assignments() {
            let forced = consistent(&assignment, &verdicts);
            prop_assert_eq!(eval_root(&query, &forced), eval_root(&folded, &forced));
        }
    }

    #[test]
    fn three_valued_identities(
        shape in arb_shape(),
        verdicts in prop::collection::vec(arb_truth(), LEAVES),
    ) {
        let plain = propagate(to_query(&shape), &mut TableOracle(verdicts.clone()));
        let with_true = propagate(wrap(&shape, Query::match_all(), true), &mut TableOracle(verdicts.clone()));
        let with_false = propagate(wrap(&shape, Query::empty(), false), &mut TableOracle(verdicts.clone()));
        for assignment in assignments() {
            let forced = consistent(&assignment, &verdicts);
            let expected = eval_root(&plain, &forced);
            prop_assert_eq!(eval_root(&with_true, &forced), expected);
            prop_assert_eq!(eval_root(&with_false, &forced), expected);
        }
        prop_assert_eq!(with_true.is_empty(), plain.is_empty());
        prop_assert_eq!(with_true.is_match_all(), plain.is_match_all());

        let absorbed = propagate(wrap(&shape, Query::empty(), true), &mut TableOracle(verdicts.clone()));
        prop_assert!(absorbed.is_empty());
        let saturated = propagate(wrap(&shape, Query::match_all(), false), &mut TableOracle(verdicts));
        prop_assert!(saturated.is_match_all());
    }

    #[test]
    fn copies_are_independent(shape in arb_shape()) {
        let original = to_query(&shape);
        let rendered = original.to_string();
        let mut copy = original.copy();
        prop_assert!(copy.structurally_eq(&original));

        let root = copy.root();
        copy.invert(root);
        let extra = copy.add_filter(leaf_filter(0), false);
        let wrapped = copy.add_and(vec![root, extra], false);
        copy.set_root(wrapped);
        prop_assert_eq!(original.to_string(), rendered);
        prop_assert!(!copy.structurally_eq(&original));
    }
}

fn arb_scalar() -> impl Strategy<Value = JsonValue> {
    prop_oneof![
        (-3i64..=3).prop_map(|v| json!(v)),
        prop::sample::select(vec![-1.5f64, 0.5, 2.0]).prop_map(|v| json!(v)),
        any::<bool>().prop_map(|v| json!(v)),
        prop::sample::select(vec!["ab", "cd", "a b", "2"]).prop_map(|v| json!(v)),
    ]
}

fn arb_literal() -> impl Strategy<Value = Literal> {
    prop_oneof![
        (-3i64..=3).prop_map(Literal::int),
        prop::sample::select(vec![0.5f64, 2.0]).prop_map(Literal::float),
        any::<bool>().prop_map(Literal::Boolean),
        prop::sample::select(vec!["ab", "a b", "c*"]).prop_map(Literal::string),
    ]
}

fn arb_comparison() -> impl Strategy<Value = FilterOperation> {
    prop::sample::select(vec![
        FilterOperation::Eq,
        FilterOperation::Lt,
        FilterOperation::Lte,
        FilterOperation::Gt,
        FilterOperation::Gte,
    ])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn narrowing_keeps_every_comparable_type(
        value in arb_scalar(),
        literal in arb_literal(),
        op in arb_comparison(),
    ) {
        let narrowed = admissible_types(&literal, op, LiteralTypes::ALL);
        prop_assert!(narrowed.is_subset(LiteralTypes::ALL));
        let wide = ValuePredicate::new(op, Some(&literal), LiteralTypes::ALL, true);
        let narrow = ValuePredicate::new(op, Some(&literal), narrowed, true);
        if wide.matches_scalar(&value) {
            prop_assert!(narrow.matches_scalar(&value));
        }
    }

    #[test]
    fn split_search_agrees_with_direct_evaluation(
        values in prop::collection::vec(prop::option::of(arb_scalar()), 1..12),
        literal in arb_literal(),
        op in arb_comparison(),
        inverted in any::<bool>(),
    ) {
        let mut builder = ArchiveBuilder::new("prop");
        for value in &values {
            let record = match value {
                Some(value) => json!({"v": value, "k": 0}),
                None => json!({"k": 0}),
            };
            builder.add_record(&record).expect("record");
        }
        let archive = builder.finish();

        let mut query = Query::empty();
        let filter = Filter::new(ColumnDescriptor::key("v"), op, literal.clone());
        let root = query.add_filter(filter, inverted);
        query.set_root(root);

        let mut sink = CollectingSink::new();
        search_archive(&archive, &query, &SearchConfig::default(), &mut sink).expect("search");
        let mut found = sink.indices();
        found.sort_unstable();

        let predicate = ValuePredicate::new(op, Some(&literal), LiteralTypes::ALL, true);
        let expected: Vec<u64> = values
            .iter()
            .enumerate()
            .filter(|(_, value)| value.as_ref().is_some_and(|v| predicate.matches_scalar(v)) != inverted)
            .map(|(idx, _)| idx as u64)
            .collect();
        prop_assert_eq!(found, expected, "query {}", query);
    }
}
