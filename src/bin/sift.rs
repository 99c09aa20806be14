//! Command-line search over NDJSON log files.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Map, Value as JsonValue};
use sift::{
    archive::{ArchiveBuilder, InMemoryArchive},
    config::SearchConfig,
    query::{Planner, Query, QuerySpec},
    search::{search_archive, NdjsonSink, OutputFormat},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "sift",
    version,
    about = "Search NDJSON logs with schema-aware query compilation",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "SIFT_CONFIG",
        help = "Path to the search config file"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = FormatArg::Text,
        help = "Output format for results and plans"
    )]
    format: FormatArg,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every record matching the query.
    Search(SearchCmd),
    /// Print the per-schema plan compiled for the query.
    Explain(SearchCmd),
}

#[derive(Args, Debug)]
struct SearchCmd {
    #[arg(
        long = "input",
        required = true,
        num_args = 1..,
        help = "NDJSON files to search; each becomes one range-index entry"
    )]
    inputs: Vec<PathBuf>,

    #[arg(long, help = "JSON query, or @FILE to read it from a file")]
    query: String,

    #[arg(long, help = "Dotted path of the authoritative timestamp field")]
    timestamp_key: Option<String>,

    #[arg(long, default_value = "sift", help = "Archive identifier reported with results")]
    archive_id: String,

    #[arg(long, help = "Match strings case-insensitively")]
    ignore_case: bool,

    #[arg(long, help = "Stop after this many matches")]
    max_results: Option<usize>,

    #[arg(long = "project", help = "Emit only these columns (repeatable)")]
    projection: Vec<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Text => OutputFormat::Text,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sift=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut config = SearchConfig::load(cli.config)?;

    match cli.command {
        Command::Search(cmd) => {
            apply_overrides(&mut config, &cmd);
            let query = load_query(&cmd.query)?;
            let archive = build_archive(&cmd)?;
            let stdout = io::stdout();
            let mut sink = NdjsonSink::new(BufWriter::new(stdout.lock()), cli.format.into());
            let stats = search_archive(&archive, &query, &config, &mut sink)?;
            info!(
                matched = stats.records_matched,
                scanned = stats.records_scanned,
                truncated = stats.truncated,
                "cli.search.done"
            );
        }
        Command::Explain(cmd) => {
            apply_overrides(&mut config, &cmd);
            let query = load_query(&cmd.query)?;
            let archive = build_archive(&cmd)?;
            let compiled = Planner::new(&archive, config.planner_config()).compile(&query)?;
            match cli.format {
                FormatArg::Text => print!("{}", compiled.explain()),
                FormatArg::Json => {
                    let schemas: Map<String, JsonValue> = compiled
                        .schemas()
                        .iter()
                        .map(|(schema, query)| (schema.0.to_string(), json!(query.to_string())))
                        .collect();
                    let plan = json!({
                        "archive": compiled.archive_id(),
                        "fingerprint": format!("{:016x}", compiled.fingerprint()),
                        "schemas": schemas,
                    });
                    println!("{}", serde_json::to_string_pretty(&plan)?);
                }
            }
        }
    }

    Ok(())
}

fn apply_overrides(config: &mut SearchConfig, cmd: &SearchCmd) {
    if cmd.ignore_case {
        config.ignore_case = true;
    }
    if let Some(limit) = cmd.max_results {
        config.max_results = Some(limit);
    }
    if !cmd.projection.is_empty() {
        config.projection = cmd.projection.clone();
    }
}

fn load_query(arg: &str) -> Result<Query, Box<dyn Error>> {
    let text = match arg.strip_prefix('@') {
        Some(path) => fs::read_to_string(path)
            .map_err(|err| format!("failed to read query file {path}: {err}"))?,
        None => arg.to_owned(),
    };
    Ok(QuerySpec::from_json(&text)?.to_query()?)
}

fn build_archive(cmd: &SearchCmd) -> Result<InMemoryArchive, Box<dyn Error>> {
    let mut builder = ArchiveBuilder::new(cmd.archive_id.clone());
    if let Some(key) = cmd.timestamp_key.as_deref() {
        builder = builder.with_timestamp_key(key)?;
    }
    for input in &cmd.inputs {
        ingest_file(&mut builder, input)?;
    }
    Ok(builder.finish())
}

fn ingest_file(builder: &mut ArchiveBuilder, path: &Path) -> Result<(), Box<dyn Error>> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mut fields = Map::new();
    fields.insert("filename".into(), JsonValue::String(filename));
    builder.begin_range(fields);
    for (lineno, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        builder
            .add_json_line(line)
            .map_err(|err| format!("{}:{}: {err}", path.display(), lineno + 1))?;
    }
    Ok(())
}
