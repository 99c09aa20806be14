#![forbid(unsafe_code)]

//! Searching one archive end to end.
//!
//! [`search_archive`] compiles a query against the archive's metadata, then
//! scans only the schema tables the compiled search kept, pushing every
//! matching record into an [`OutputSink`].

use serde::Serialize;
use tracing::{debug, info};

use crate::archive::{ArchiveReader, SchemaReader};
use crate::config::SearchConfig;
use crate::error::Result;
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::{CompiledSearch, Planner, Query, ResolvedProjection};

/// Per-schema record evaluation.
pub mod evaluator;
/// Result sinks.
pub mod output;
/// Wildcard matching and dictionary string queries.
pub mod string_query;

pub use evaluator::SchemaEvaluator;
pub use output::{CollectingSink, MatchedRecord, NdjsonSink, OutputFormat, OutputSink};
pub use string_query::StringQueryCache;

/// Counters for one archive scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    /// Schema tables that survived compilation and were scanned.
    pub schemas_scanned: usize,
    /// Records tested against a sub-query.
    pub records_scanned: u64,
    /// Records emitted to the sink.
    pub records_matched: u64,
    /// Whether the scan stopped at `max_results`.
    pub truncated: bool,
    /// Fingerprint of the compiled search.
    pub fingerprint: u64,
}

/// Compiles `query` for `archive` and streams matches into `sink`.
pub fn search_archive(
    archive: &dyn ArchiveReader,
    query: &Query,
    config: &SearchConfig,
    sink: &mut dyn OutputSink,
) -> Result<SearchStats> {
    let compiled = Planner::new(archive, config.planner_config()).compile(query)?;
    execute(archive, &compiled, config, sink)
}

/// Scans the schema tables of an already compiled search.
pub fn execute(
    archive: &dyn ArchiveReader,
    compiled: &CompiledSearch,
    config: &SearchConfig,
    sink: &mut dyn OutputSink,
) -> Result<SearchStats> {
    let projection = config.projection()?;
    let projection = (!projection.is_empty()).then(|| projection.resolve(archive.schema_tree()));
    let mut stats = SearchStats {
        fingerprint: compiled.fingerprint(),
        ..SearchStats::default()
    };
    if compiled.is_empty() {
        info!(archive = compiled.archive_id(), "search.archive.skipped");
        sink.flush()?;
        return Ok(stats);
    }

    let mut strings = StringQueryCache::new(!config.ignore_case);
    let mut scan = Scan {
        archive,
        config,
        projection: projection.as_ref(),
        sink,
        stats: &mut stats,
    };
    for (schema, sub_query) in compiled.schemas() {
        let reader = archive.read_schema(*schema)?;
        let start = profile_timer();
        let outcome = scan.schema(sub_query, reader.as_ref(), &mut strings);
        record_profile_timer(QueryProfileKind::Evaluate, start);
        if !outcome? {
            break;
        }
    }
    scan.sink.flush()?;

    info!(
        archive = compiled.archive_id(),
        schemas = stats.schemas_scanned,
        scanned = stats.records_scanned,
        matched = stats.records_matched,
        truncated = stats.truncated,
        "search.archive.done"
    );
    Ok(stats)
}

struct Scan<'a, 's> {
    archive: &'a dyn ArchiveReader,
    config: &'a SearchConfig,
    projection: Option<&'a ResolvedProjection>,
    sink: &'s mut dyn OutputSink,
    stats: &'s mut SearchStats,
}

impl Scan<'_, '_> {
    /// Scans one table. Returns false once the result cap is reached.
    fn schema(
        &mut self,
        query: &Query,
        reader: &dyn SchemaReader,
        strings: &mut StringQueryCache,
    ) -> Result<bool> {
        let mut evaluator = SchemaEvaluator::new(query, reader, self.archive, strings);
        self.stats.schemas_scanned += 1;
        let mut matched = 0u64;
        for row in 0..reader.num_records() {
            self.stats.records_scanned += 1;
            if !evaluator.matches(row) {
                continue;
            }
            if self
                .config
                .max_results
                .is_some_and(|limit| self.stats.records_matched >= limit as u64)
            {
                self.stats.truncated = true;
                return Ok(false);
            }
            let message = match self.projection {
                Some(projection) => projection.render(reader, row).to_string(),
                None => reader.message(row)?,
            };
            self.sink.emit(MatchedRecord {
                archive_id: self.archive.archive_id().to_owned(),
                log_event_index: reader.log_event_index(row),
                timestamp: reader.timestamp(row),
                message,
            })?;
            self.stats.records_matched += 1;
            matched += 1;
        }
        debug!(
            schema = reader.schema_id().0,
            records = reader.num_records(),
            matched,
            "search.schema.scan"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::archive::{ArchiveBuilder, InMemoryArchive};
    use crate::query::QueryBuilder;

    fn archive() -> Result<InMemoryArchive> {
        let mut builder = ArchiveBuilder::new("svc").with_timestamp_key("ts")?;
        builder.add_record(&json!({"ts": 10, "level": "info", "ctx": {"user": "ann", "id": 1}}))?;
        builder.add_record(&json!({"ts": 20, "level": "warn", "ctx": {"user": "bob", "id": 2}}))?;
        builder.add_record(&json!({"ts": 30, "level": "WARN"}))?;
        builder.add_record(&json!({"ts": 40, "level": "warn"}))?;
        Ok(builder.finish())
    }

    #[test]
    fn emits_matches_with_metadata() -> Result<()> {
        let archive = archive()?;
        let query = QueryBuilder::new().eq("level", "warn").build()?;
        let mut sink = CollectingSink::new();
        let stats = search_archive(&archive, &query, &SearchConfig::default(), &mut sink)?;
        let mut indices = sink.indices();
        indices.sort_unstable();
        assert_eq!(indices, vec![1, 3]);
        assert_eq!(stats.records_matched, 2);
        assert!(!stats.truncated);
        let second = sink
            .records()
            .iter()
            .find(|record| record.log_event_index == 1)
            .expect("record 1");
        assert_eq!(second.timestamp, Some(20));
        assert_eq!(second.archive_id, "svc");
        Ok(())
    }

    #[test]
    fn ignore_case_widens_string_matches() -> Result<()> {
        let archive = archive()?;
        let query = QueryBuilder::new().eq("level", "warn").build()?;
        let config = SearchConfig {
            ignore_case: true,
            ..SearchConfig::default()
        };
        let mut sink = CollectingSink::new();
        search_archive(&archive, &query, &config, &mut sink)?;
        let mut indices = sink.indices();
        indices.sort_unstable();
        assert_eq!(indices, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn stops_at_max_results() -> Result<()> {
        let archive = archive()?;
        let query = QueryBuilder::new().exists("level").build()?;
        let config = SearchConfig {
            max_results: Some(2),
            ..SearchConfig::default()
        };
        let mut sink = CollectingSink::new();
        let stats = search_archive(&archive, &query, &config, &mut sink)?;
        assert_eq!(sink.records().len(), 2);
        assert!(stats.truncated);
        Ok(())
    }

    #[test]
    fn projects_selected_columns() -> Result<()> {
        let archive = archive()?;
        let query = QueryBuilder::new().eq("ctx.user", "bob").build()?;
        let config = SearchConfig {
            projection: vec!["ctx.id".into(), "level".into()],
            ..SearchConfig::default()
        };
        let mut sink = CollectingSink::new();
        search_archive(&archive, &query, &config, &mut sink)?;
        let records = sink.into_records();
        assert_eq!(records.len(), 1);
        let message: serde_json::Value = serde_json::from_str(&records[0].message)?;
        assert_eq!(message, json!({"ctx": {"id": 2}, "level": "warn"}));
        Ok(())
    }

    #[test]
    fn pruned_archives_are_not_scanned() -> Result<()> {
        let archive = archive()?;
        let query = QueryBuilder::new().gt("ts", 1000).build()?;
        let mut sink = CollectingSink::new();
        let stats = search_archive(&archive, &query, &SearchConfig::default(), &mut sink)?;
        assert_eq!(stats.schemas_scanned, 0);
        assert_eq!(stats.records_scanned, 0);
        assert!(sink.records().is_empty());
        Ok(())
    }
}
