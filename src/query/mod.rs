#![forbid(unsafe_code)]

//! Query model and compilation.
//!
//! A query is built with [`QueryBuilder`] or parsed from a [`QuerySpec`],
//! then compiled by the [`Planner`] against one archive into a
//! [`CompiledSearch`]: one sub-query per schema table that may hold matches.

/// Expression arena, filters, and operators.
pub mod ast;

/// Fluent builder and JSON query AST.
pub mod builder;

/// Column descriptors and path tokenization.
pub mod column;

/// Structured query errors.
pub mod errors;

/// Rewriting `*` and `null` comparisons into existence tests.
pub mod exists;

/// Literals, literal types, and type sets.
pub mod literal;

/// Dropping column types a literal cannot compare against.
pub mod narrow;

/// Or-of-And normalization.
pub mod normalize;

/// Compilation pipeline.
pub mod planner;

/// Performance profiling for compilation and scanning.
///
/// Collects timing and count statistics to identify performance bottlenecks.
pub mod profile;

/// Output projection.
pub mod projection;

/// Three-valued constant propagation.
pub mod propagate;

/// Rewriting range-index filters into record bounds.
pub mod range_index;

/// Resolving descriptors and splitting queries per schema.
pub mod schema_match;

/// Pruning with the archive timestamp range.
pub mod timestamp_index;

/// Matching filters against raw JSON values.
pub mod value_match;

pub use ast::{ExprId, ExprKind, Filter, FilterOperation, Query};
pub use builder::{FilterSpec, QueryBuilder, QuerySpec};
pub use column::{ColumnDescriptor, DescriptorToken, Namespace, SubtreeType};
pub use errors::{QueryError, QueryErrorWithCode};
pub use literal::{Literal, LiteralType, LiteralTypes};

/// Compiled output with explain rendering.
pub use planner::{CompiledSearch, PlanExplain, Planner, PlannerConfig};
pub use projection::{Projection, ResolvedProjection};
