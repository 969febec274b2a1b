#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

const MODEL: &str = r#"{
    "classes": [
        {"name": "Folder", "attributes": ["name"]},
        {"name": "File", "attributes": ["name"]}
    ],
    "associations": [
        {"name": "Contains", "ends": [
            {"name": "parent", "class": "Folder", "aggregation": "composite"},
            {"name": "child", "class": "Folder"}]},
        {"name": "Contains", "ends": [
            {"name": "folder", "class": "Folder", "aggregation": "composite"},
            {"name": "file", "class": "File"}]}
    ],
    "objects": [
        {"id": "F1", "class": "Folder", "attributes": {"name": "root"}},
        {"id": "F2", "class": "Folder", "attributes": {"name": "mid"}},
        {"id": "F3", "class": "Folder", "attributes": {"name": "leaf"}},
        {"id": "f1.txt", "class": "File", "attributes": {"name": "f1.txt"}},
        {"id": "f2.txt", "class": "File", "attributes": {"name": "f2.txt"}},
        {"id": "f3.txt", "class": "File", "attributes": {"name": "f3.txt"}}
    ],
    "links": [
        {"association": "Contains", "ends": ["F1", "F2"]},
        {"association": "Contains", "ends": ["F2", "F3"]},
        {"association": "Contains", "ends": ["F1", "f1.txt"]},
        {"association": "Contains", "ends": ["F2", "f2.txt"]},
        {"association": "Contains", "ends": ["F3", "f3.txt"]}
    ]
}"#;

/// `select files from class Folder where name = ?start then recurse (...) then follow ... as files`
const QUERY: &str = r#"{
    "select_list": ["files"],
    "root": {"root": {
        "class_name": "Folder",
        "filters": [{"attribute": {"attribute": "name",
            "operand": {"values": [{"param": {"name": "start"}}]}}}],
        "then": {"branches": [{"recurse": {
            "path": {"branches": [{"follow": {
                "association_filters": {"association": "Contains", "forward": true}
            }}]},
            "then": {"branches": [{"follow": {
                "alias": "files",
                "association_filters": {
                    "association": "Contains", "forward": true, "destination_class": "File"
                },
                "filters": [{"attribute": {"attribute": "name",
                    "operand": {"subquery": "SELECT name FROM wanted"}, "negated": true}}]
            }}]}
        }}]}
    }}
}"#;

const PLAIN_QUERY: &str = r#"{
    "select_list": ["*"],
    "root": {"root": {
        "class_name": "File",
        "filters": [{"attribute": {"attribute": "name",
            "operand": {"set_param": {"name": "names"}}}}]
    }}
}"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("model.json"), MODEL).expect("model");
        fs::write(dir.path().join("query.json"), QUERY).expect("query");
        fs::write(dir.path().join("plain.json"), PLAIN_QUERY).expect("plain query");
        fs::write(dir.path().join("empty.toml"), "").expect("config");
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn sqlite(&self) -> PathBuf {
        let path = self.path("wanted.db");
        let conn = rusqlite::Connection::open(&path).expect("sqlite");
        conn.execute_batch(
            "CREATE TABLE wanted (name TEXT);
             INSERT INTO wanted VALUES ('f2.txt');",
        )
        .expect("seed sqlite");
        path
    }
}

fn stdout_lines(output: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(output)
        .lines()
        .map(str::to_string)
        .collect()
}

fn config_arg(path: &Path) -> [String; 2] {
    ["--config".to_string(), path.display().to_string()]
}

#[test]
fn explain_prints_plan_and_fingerprint() {
    let ws = Workspace::new();
    let output = cargo_bin_cmd!("lurql")
        .env_remove("RUST_LOG")
        .args(config_arg(&ws.path("empty.toml")))
        .arg("explain")
        .arg("--model")
        .arg(ws.path("model.json"))
        .arg("--query")
        .arg(ws.path("query.json"))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let lines = stdout_lines(&output);
    assert!(lines.iter().any(|l| l.ends_with("recursive => anon_2")), "{lines:?}");
    assert!(lines.iter().any(|l| l.starts_with("files_")), "{lines:?}");
    let fingerprint = lines.last().expect("fingerprint line");
    assert!(fingerprint.starts_with("fingerprint: "));
    assert_eq!(fingerprint.len(), "fingerprint: ".len() + 16);
}

#[test]
fn run_binds_params_and_sqlite() {
    let ws = Workspace::new();
    let db = ws.sqlite();
    let output = cargo_bin_cmd!("lurql")
        .env_remove("RUST_LOG")
        .args(config_arg(&ws.path("empty.toml")))
        .arg("run")
        .arg("--model")
        .arg(ws.path("model.json"))
        .arg("--query")
        .arg(ws.path("query.json"))
        .args(["--param", "start=root"])
        .arg("--sqlite")
        .arg(&db)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(stdout_lines(&output), ["f3.txt"]);
}

#[test]
fn run_emits_json_reports() {
    let ws = Workspace::new();
    let output = cargo_bin_cmd!("lurql")
        .env_remove("RUST_LOG")
        .args(config_arg(&ws.path("empty.toml")))
        .args(["--format", "json", "run"])
        .arg("--model")
        .arg(ws.path("model.json"))
        .arg("--query")
        .arg(ws.path("plain.json"))
        .args(["--param-set", "names=f3.txt,f1.txt"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["count"], 2);
    assert_eq!(json["objects"], serde_json::json!(["f1.txt", "f3.txt"]));
    assert!(json["fingerprint"].is_string());
}

#[test]
fn config_supplies_model_and_params() {
    let ws = Workspace::new();
    let config = ws.path("lurql.toml");
    fs::write(
        &config,
        format!(
            "[defaults]\nmodel = {:?}\nlog = \"error\"\n\n[params]\nnames = [\"f2.txt\"]\n",
            ws.path("model.json").display().to_string()
        ),
    )
    .expect("config");
    let output = cargo_bin_cmd!("lurql")
        .env_remove("RUST_LOG")
        .args(config_arg(&config))
        .arg("run")
        .arg("--query")
        .arg(ws.path("plain.json"))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(stdout_lines(&output), ["f2.txt"]);
}

#[test]
fn failures_exit_with_coded_errors() {
    let ws = Workspace::new();
    let output = cargo_bin_cmd!("lurql")
        .env_remove("RUST_LOG")
        .args(config_arg(&ws.path("empty.toml")))
        .arg("run")
        .arg("--model")
        .arg(ws.path("model.json"))
        .arg("--query")
        .arg(ws.path("query.json"))
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8_lossy(&output);
    assert!(stderr.contains("error: [UnboundParameter]"), "{stderr}");

    cargo_bin_cmd!("lurql")
        .env_remove("RUST_LOG")
        .args(config_arg(&ws.path("missing.toml")))
        .arg("explain")
        .arg("--query")
        .arg(ws.path("query.json"))
        .assert()
        .failure();
}
