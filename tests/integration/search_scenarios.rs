use serde_json::{json, Map, Value as JsonValue};
use sift::archive::{ArchiveBuilder, InMemoryArchive};
use sift::config::SearchConfig;
use sift::query::{Planner, Query, QueryBuilder, QuerySpec};
use sift::search::{search_archive, CollectingSink, SearchStats};
use sift::Result;

fn archive(records: &[JsonValue]) -> Result<InMemoryArchive> {
    let mut builder = ArchiveBuilder::new("scenario");
    for record in records {
        builder.add_record(record)?;
    }
    Ok(builder.finish())
}

fn run(archive: &InMemoryArchive, query: &Query) -> Result<(Vec<u64>, SearchStats)> {
    let mut sink = CollectingSink::new();
    let stats = search_archive(archive, query, &SearchConfig::default(), &mut sink)?;
    let mut indices = sink.indices();
    indices.sort_unstable();
    Ok((indices, stats))
}

#[test]
fn key_value_matches_only_the_equal_record() -> Result<()> {
    let archive = archive(&[json!({"key": "value"}), json!({"key": "other"})])?;
    let (indices, _) = run(&archive, &QueryBuilder::new().eq("key", "value").build()?)?;
    assert_eq!(indices, vec![0]);
    Ok(())
}

#[test]
fn negated_filter_on_a_missing_column_matches_everything() -> Result<()> {
    let archive = archive(&[json!({"z": 1}), json!({"z": 2}), json!({"y": "q"})])?;
    let query = QueryBuilder::new().not(|b| b.eq("a", "b")).build()?;
    let (indices, _) = run(&archive, &query)?;
    assert_eq!(indices, vec![0, 1, 2]);
    Ok(())
}

#[test]
fn comparisons_reach_into_arrays() -> Result<()> {
    let archive = archive(&[
        json!({"arr": [{"b": 500}, {"b": 2000}]}),
        json!({"arr": [{"b": 1500}]}),
        json!({"arr": [{"b": 10}]}),
    ])?;
    let (indices, _) = run(&archive, &QueryBuilder::new().gt("arr.b", 1000).build()?)?;
    assert_eq!(indices, vec![0, 1]);
    Ok(())
}

#[test]
fn wildcard_paths_reach_into_arrays_like_explicit_ones() -> Result<()> {
    let archive = archive(&[json!({"b": [{"b": 5}]}), json!({"b": [{"b": 6}]})])?;
    let (explicit, _) = run(&archive, &QueryBuilder::new().eq("b.b", 5).build()?)?;
    let (wildcard, _) = run(&archive, &QueryBuilder::new().eq("*.b", 5).build()?)?;
    assert_eq!(explicit, vec![0]);
    assert_eq!(wildcard, explicit);
    Ok(())
}

#[test]
fn pure_wildcard_not_exists_over_array_only_schemas() -> Result<()> {
    let archive = archive(&[json!({"arr": [1]}), json!({"arr": []}), json!({"n": 1})])?;
    let (indices, _) = run(&archive, &QueryBuilder::new().not_exists("*").build()?)?;
    assert_eq!(indices, vec![1]);
    let (indices, _) = run(&archive, &QueryBuilder::new().exists("*").build()?)?;
    assert_eq!(indices, vec![0, 2]);
    Ok(())
}

fn two_file_archive() -> Result<InMemoryArchive> {
    let mut builder = ArchiveBuilder::new("files");
    for (name, levels) in [("a.log", ["info", "warn"]), ("b.log", ["warn", "error"])] {
        let mut fields = Map::new();
        fields.insert("filename".into(), json!(name));
        builder.begin_range(fields);
        for level in levels {
            builder.add_record(&json!({"level": level}))?;
        }
    }
    Ok(builder.finish())
}

#[test]
fn range_index_without_overlap_folds_before_scanning() -> Result<()> {
    let archive = two_file_archive()?;
    let query = QueryBuilder::new()
        .eq("$filename", "c.log")
        .eq("level", "warn")
        .build()?;
    let compiled = Planner::new(&archive, SearchConfig::default().planner_config()).compile(&query)?;
    assert!(compiled.is_empty());

    let (indices, stats) = run(&archive, &query)?;
    assert!(indices.is_empty());
    assert_eq!(stats.records_scanned, 0);
    assert_eq!(stats.schemas_scanned, 0);
    Ok(())
}

#[test]
fn range_index_restricts_to_the_matching_file() -> Result<()> {
    let archive = two_file_archive()?;
    let query = QueryBuilder::new()
        .eq("$filename", "b.log")
        .eq("level", "warn")
        .build()?;
    let (indices, _) = run(&archive, &query)?;
    assert_eq!(indices, vec![2]);
    Ok(())
}

#[test]
fn pure_wildcard_without_compatible_columns_folds_the_schema() -> Result<()> {
    let archive = archive(&[json!({"msg": "hi", "n": 1}), json!({"msg": "yo", "n": 2})])?;
    let query = QueryBuilder::new().eq("*", true).build()?;
    let compiled = Planner::new(&archive, SearchConfig::default().planner_config()).compile(&query)?;
    assert!(compiled.is_empty());

    let (indices, _) = run(&archive, &QueryBuilder::new().eq("*", 2).build()?)?;
    assert_eq!(indices, vec![1]);
    Ok(())
}

#[test]
fn json_queries_mix_connectives_and_types() -> Result<()> {
    let archive = archive(&[
        json!({"level": "error", "status": 503}),
        json!({"level": "error", "exception": "boom"}),
        json!({"level": "info", "status": 200}),
        json!({"level": "error", "status": 404}),
    ])?;
    let spec = QuerySpec::from_json(
        r#"{"and": [
            {"filter": {"column": "level", "op": "eq", "value": "error"}},
            {"or": [
                {"filter": {"column": "status", "op": "gt", "value": 499}},
                {"filter": {"column": "exception", "op": "exists"}}
            ]}
        ]}"#,
    )?;
    let (indices, _) = run(&archive, &spec.to_query()?)?;
    assert_eq!(indices, vec![0, 1]);
    Ok(())
}

#[test]
fn timestamp_bounds_prune_whole_archives() -> Result<()> {
    let mut builder = ArchiveBuilder::new("ts").with_timestamp_key("ts")?;
    builder.add_record(&json!({"ts": "2024-01-01T00:00:00Z", "msg": "start"}))?;
    builder.add_record(&json!({"ts": "2024-01-02T00:00:00Z", "msg": "stop"}))?;
    let archive = builder.finish();

    let later = QuerySpec::from_json(
        r#"{"filter": {"column": "ts", "op": "gt", "value": {"timestamp": "2025-01-01T00:00:00Z"}}}"#,
    )?;
    let (indices, stats) = run(&archive, &later.to_query()?)?;
    assert!(indices.is_empty());
    assert_eq!(stats.records_scanned, 0);

    let inside = QuerySpec::from_json(
        r#"{"filter": {"column": "ts", "op": "gte", "value": {"timestamp": "2024-01-01T12:00:00Z"}}}"#,
    )?;
    let (indices, _) = run(&archive, &inside.to_query()?)?;
    assert_eq!(indices, vec![1]);
    Ok(())
}
