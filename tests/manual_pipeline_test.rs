use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn manual_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("manual-retrieval");
    cmd.current_dir(home)
        .env("MANUAL_HOME", home.join("manual"))
        .env("MANUAL_CONFIG_PATH", home.join("missing.toml"))
        .env("MANUAL_LLM_PROVIDER", "local")
        .env("MANUAL_SELECTION_DELAY_MS", "0")
        .env("MANUAL_RETRY_DELAY_MS", "0")
        .env_remove("MANUAL_TREE_URL");
    cmd
}

fn write_chunks(home: &Path, name: &str, chunks: &[&str]) -> std::path::PathBuf {
    let dir = home.join("manual").join("chunks");
    fs::create_dir_all(&dir).expect("mkdir chunks");
    let path = dir.join(name);
    fs::write(&path, serde_json::to_string(chunks).expect("json")).expect("write chunks");
    path
}

#[test]
fn build_tree_then_retrieve_returns_a_leaf_document() {
    let tmp = tempdir().expect("tempdir");
    let chunks = write_chunks(
        tmp.path(),
        "hw1.json",
        &[
            "Q1: compute the mean of a list\nUse a loop.",
            "   ",
            "Q2: compute the median\nSort first.",
            "Q3: plot a histogram",
            "Q4: write a report",
        ],
    );

    manual_cmd(tmp.path())
        .args(["build-tree", "--chunks"])
        .arg(&chunks)
        .args(["--branch-factor", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("leaves=4"))
        .stdout(predicate::str::contains("depth=2"));

    let trees = tmp.path().join("manual").join("trees");
    assert!(trees.join("hw1.json").exists());
    let toc: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(trees.join("table_of_contents.json")).expect("read toc"),
    )
    .expect("toc json");
    assert!(toc.get("hw1.json").is_some());

    manual_cmd(tmp.path())
        .args(["retrieve", "--question", "how do I compute the mean?"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Retrieved assignment documents"))
        .stdout(predicate::str::contains("\"source_id\": \"hw1.json\""))
        .stdout(predicate::str::contains("Q1: compute the mean of a list"));

    let audit = fs::read_to_string(tmp.path().join("manual/logs/audit.log")).expect("audit");
    assert!(audit.contains("\"phase\":\"build-tree\""));
    assert!(audit.contains("\"phase\":\"retrieve\""));
}

#[test]
fn retrieve_without_toc_fails_with_issue() {
    let tmp = tempdir().expect("tempdir");
    manual_cmd(tmp.path())
        .args(["retrieve", "--question", "anything"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("llm_calls=0"))
        .stdout(predicate::str::contains("retrieval produced no result"));
}

#[test]
fn non_list_chunks_are_reported_not_crashed() {
    let tmp = tempdir().expect("tempdir");
    let dir = tmp.path().join("manual").join("chunks");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("bad.json"), r#"{"not": "a list"}"#).expect("write");

    manual_cmd(tmp.path())
        .args(["--json", "build-tree", "--chunks", "bad.json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"ok\": false"))
        .stdout(predicate::str::contains("JSON list of strings"));
}

#[test]
fn build_toc_on_empty_trees_dir_writes_empty_mapping() {
    let tmp = tempdir().expect("tempdir");
    manual_cmd(tmp.path())
        .arg("build-toc")
        .assert()
        .success()
        .stdout(predicate::str::contains("entries=0"));

    let raw = fs::read_to_string(tmp.path().join("manual/trees/table_of_contents.json"))
        .expect("read toc");
    assert_eq!(raw.trim(), "{}");
}

#[test]
fn dry_run_writes_nothing() {
    let tmp = tempdir().expect("tempdir");
    let chunks = write_chunks(tmp.path(), "lab2.json", &["only chunk"]);
    manual_cmd(tmp.path())
        .args(["build-tree", "--dry-run", "--chunks"])
        .arg(&chunks)
        .assert()
        .success()
        .stdout(predicate::str::contains("dry-run"));
    assert!(!tmp.path().join("manual/trees/lab2.json").exists());
}

#[test]
fn tree_name_with_path_separators_is_rejected() {
    let tmp = tempdir().expect("tempdir");
    let chunks = write_chunks(tmp.path(), "hw2.json", &["Q1: only question"]);
    manual_cmd(tmp.path())
        .args(["build-tree", "--name", "../escape.json", "--chunks"])
        .arg(&chunks)
        .assert()
        .failure()
        .stdout(predicate::str::contains("single plain path component"));
    assert!(!tmp.path().join("manual/escape.json").exists());
}
