//! Compilation pipeline from a user query to per-schema sub-queries.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hasher;

use tracing::{debug, info};
use xxhash_rust::xxh64::Xxh64;

use crate::archive::{ArchiveReader, SchemaId};
use crate::query::{
    ast::Query,
    errors::QueryError,
    exists::convert_to_exists,
    narrow::narrow_types,
    normalize::normalize,
    profile::{profile_timer, record_profile_timer, QueryProfileKind},
    propagate::propagate,
    range_index::prune_range_index,
    schema_match::SchemaMatcher,
    timestamp_index::TimestampIndexOracle,
};

/// Planner inputs that influence pass selection.
#[derive(Clone, Copy, Debug)]
pub struct PlannerConfig {
    /// Whether string comparisons respect case.
    pub case_sensitive: bool,
    /// Whether to fold filters using the archive's timestamp range.
    pub timestamp_pruning: bool,
    /// Whether to rewrite range-index filters into record bounds.
    pub range_index_pruning: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            timestamp_pruning: true,
            range_index_pruning: true,
        }
    }
}

/// Output of compiling a query against one archive.
#[derive(Clone, Debug)]
pub struct CompiledSearch {
    archive_id: String,
    schemas: BTreeMap<SchemaId, Query>,
    fingerprint: u64,
}

impl CompiledSearch {
    /// Archive the search was compiled for.
    pub fn archive_id(&self) -> &str {
        &self.archive_id
    }

    /// Sub-query per schema that can still match.
    pub fn schemas(&self) -> &BTreeMap<SchemaId, Query> {
        &self.schemas
    }

    /// True when no record of the archive can match.
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Deterministic hash of the per-schema sub-queries.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Human-readable plan, one line per schema.
    pub fn explain(&self) -> PlanExplain<'_> {
        PlanExplain { search: self }
    }
}

/// Display adapter returned by [`CompiledSearch::explain`].
pub struct PlanExplain<'a> {
    search: &'a CompiledSearch,
}

impl fmt::Display for PlanExplain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let search = self.search;
        writeln!(
            f,
            "archive {} fingerprint {:016x}",
            search.archive_id, search.fingerprint
        )?;
        if search.schemas.is_empty() {
            return writeln!(f, "  no schema can match");
        }
        for (schema, query) in &search.schemas {
            writeln!(f, "  schema {}: {}", schema.0, query)?;
        }
        Ok(())
    }
}

/// Runs the compilation passes for one archive.
pub struct Planner<'a> {
    archive: &'a dyn ArchiveReader,
    config: PlannerConfig,
}

impl<'a> Planner<'a> {
    /// Planner for `archive`.
    pub fn new(archive: &'a dyn ArchiveReader, config: PlannerConfig) -> Self {
        Self { archive, config }
    }

    /// Compiles `query` into per-schema sub-queries.
    ///
    /// Passes run in order: normalization, type narrowing, existence
    /// conversion, range-index and timestamp-index pruning, schema
    /// splitting. A query that folds to `Empty` at any point compiles to a
    /// search with no schemas.
    pub fn compile(&self, query: &Query) -> Result<CompiledSearch, QueryError> {
        let archive_id = self.archive.archive_id();

        let start = profile_timer();
        let query = normalize(query.copy());
        record_profile_timer(QueryProfileKind::Normalize, start);
        debug!(archive = archive_id, query = %query, "query.planner.normalized");

        let start = profile_timer();
        let query = convert_to_exists(narrow_types(query));
        record_profile_timer(QueryProfileKind::Narrow, start);
        debug!(archive = archive_id, query = %query, "query.planner.narrowed");

        let start = profile_timer();
        let mut query = query;
        if self.config.range_index_pruning {
            query = prune_range_index(query, self.archive.range_index(), self.config.case_sensitive);
        }
        if self.config.timestamp_pruning && !query.is_empty() {
            let mut oracle = TimestampIndexOracle::new(
                self.archive.timestamp_dictionary(),
                self.archive.schema_tree(),
            );
            query = propagate(query, &mut oracle);
        }
        record_profile_timer(QueryProfileKind::Prune, start);
        debug!(archive = archive_id, query = %query, "query.planner.pruned");

        let schemas = if query.is_empty() {
            BTreeMap::new()
        } else {
            let start = profile_timer();
            let matcher = SchemaMatcher::new(self.archive.schema_tree(), self.archive.schema_map());
            let split = matcher.split(query)?;
            record_profile_timer(QueryProfileKind::SchemaMatch, start);
            split
        };

        let fingerprint = fingerprint(&schemas);
        info!(
            archive = archive_id,
            schemas = schemas.len(),
            fingerprint = format_args!("{fingerprint:016x}"),
            "query.planner.compiled"
        );
        Ok(CompiledSearch {
            archive_id: archive_id.to_owned(),
            schemas,
            fingerprint,
        })
    }
}

fn fingerprint(schemas: &BTreeMap<SchemaId, Query>) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.write_u64(schemas.len() as u64);
    for (schema, query) in schemas {
        hasher.write_u32(schema.0);
        hasher.write(query.to_string().as_bytes());
    }
    hasher.finish()
}
