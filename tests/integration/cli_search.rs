#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    app: PathBuf,
    db: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let app = dir.path().join("app.log");
        fs::write(
            &app,
            "{\"level\":\"info\",\"ts\":1000}\n\n{\"level\":\"warn\",\"ts\":2000}\n",
        )
        .expect("write app.log");
        let db = dir.path().join("db.log");
        fs::write(&db, "{\"level\":\"warn\",\"query\":\"select 1\",\"ts\":3000}\n").expect("write db.log");
        Fixture { dir, app, db }
    }

    fn config(&self) -> PathBuf {
        self.dir.path().join("missing-config.toml")
    }
}

const WARN: &str = r#"{"filter":{"column":"level","op":"eq","value":"warn"}}"#;

#[test]
fn search_prints_matching_messages() {
    let fx = Fixture::new();
    let output = cargo_bin_cmd!("sift")
        .arg("--config")
        .arg(fx.config())
        .arg("search")
        .arg("--input")
        .arg(&fx.app)
        .arg(&fx.db)
        .args(["--query", WARN])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(output).expect("utf8");
    let mut lines: Vec<&str> = stdout.lines().collect();
    lines.sort_unstable();
    assert_eq!(
        lines,
        vec![
            "{\"level\":\"warn\",\"query\":\"select 1\",\"ts\":3000}",
            "{\"level\":\"warn\",\"ts\":2000}",
        ]
    );
}

#[test]
fn json_format_reports_record_metadata() {
    let fx = Fixture::new();
    let output = cargo_bin_cmd!("sift")
        .arg("--config")
        .arg(fx.config())
        .args(["--format", "json", "search", "--timestamp-key", "ts", "--input"])
        .arg(&fx.app)
        .arg(&fx.db)
        .args(["--query", r#"{"filter":{"column":"ts","op":"gte","value":3000}}"#])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let records: Vec<Value> = String::from_utf8(output)
        .expect("utf8")
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["log_event_index"], 2);
    assert_eq!(records[0]["timestamp"], 3000);
    assert_eq!(records[0]["archive_id"], "sift");
}

#[test]
fn filename_filters_and_projection() {
    let fx = Fixture::new();
    let query_file = fx.dir.path().join("query.json");
    fs::write(
        &query_file,
        r#"{"and":[
            {"filter":{"column":"$filename","op":"eq","value":"app.log"}},
            {"filter":{"column":"level","op":"eq","value":"warn"}}
        ]}"#,
    )
    .expect("write query");
    let output = cargo_bin_cmd!("sift")
        .arg("--config")
        .arg(fx.config())
        .args(["search", "--project", "level", "--input"])
        .arg(&fx.app)
        .arg(&fx.db)
        .arg("--query")
        .arg(format!("@{}", query_file.display()))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(String::from_utf8(output).expect("utf8"), "{\"level\":\"warn\"}\n");
}

#[test]
fn explain_prints_the_schema_plan() {
    let fx = Fixture::new();
    let output = cargo_bin_cmd!("sift")
        .arg("--config")
        .arg(fx.config())
        .args(["--format", "json", "explain", "--input"])
        .arg(&fx.app)
        .arg(&fx.db)
        .args(["--query", r#"{"filter":{"column":"query","op":"exists"}}"#])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let plan: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(plan["archive"], "sift");
    let schemas = plan["schemas"].as_object().expect("schemas");
    assert_eq!(schemas.len(), 1);
}

#[test]
fn config_file_supplies_defaults() {
    let fx = Fixture::new();
    let config = fx.dir.path().join("config.toml");
    fs::write(&config, "max_results = 1\nignore_case = true\n").expect("write config");
    let output = cargo_bin_cmd!("sift")
        .arg("--config")
        .arg(&config)
        .args(["search", "--input"])
        .arg(&fx.app)
        .args(["--query", r#"{"filter":{"column":"level","op":"eq","value":"WARN"}}"#])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(String::from_utf8(output).expect("utf8").lines().count(), 1);
}

#[test]
fn invalid_queries_fail_with_a_message() {
    let fx = Fixture::new();
    let output = cargo_bin_cmd!("sift")
        .arg("--config")
        .arg(fx.config())
        .args(["search", "--input"])
        .arg(&fx.app)
        .args(["--query", r#"{"and":[]}"#])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8");
    assert!(stderr.contains("error:"), "stderr: {stderr}");
}
