//! Binary-level tests.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn querygate() -> Command {
    let mut cmd = Command::cargo_bin("querygate").unwrap_or_else(|_| unreachable!());
    cmd.env_remove("QUERYGATE_CATALOG")
        .env_remove("QUERYGATE_ENGINE_URL")
        .env_remove("QUERYGATE_ENABLED_TOOLS");
    cmd
}

#[test]
fn test_version() {
    querygate()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_tools_lists_builtin_catalog() {
    querygate()
        .arg("tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("list_schema"))
        .stdout(predicate::str::contains("7 tools"));
}

#[test]
fn test_tools_reads_catalog_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap_or_else(|_| unreachable!());
    let catalog = r#"{"tools": [
        {"name": "peers", "description": "Connected peers",
         "inputSchema": {"type": "object"},
         "command": {"type": "engine", "template": "get peers"}},
        {"name": "info", "description": "Server info",
         "inputSchema": {"type": "object"},
         "command": {"type": "internal", "method": "server_info"}}
    ]}"#;
    file.write_all(catalog.as_bytes())
        .unwrap_or_else(|_| unreachable!());

    querygate()
        .arg("--catalog")
        .arg(file.path())
        .args(["--format", "json", "tools"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"peers\""))
        .stdout(predicate::str::contains("\"info\""));
}

#[test]
fn test_bad_catalog_fails() {
    querygate()
        .args(["--catalog", "/nonexistent/tools.json", "tools"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("catalog"));
}

#[test]
fn test_probe_without_engine_fails() {
    querygate()
        .arg("probe")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unavailable"));
}
