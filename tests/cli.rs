//! End-to-end tests of the `sop-agent` binary with the offline hashing
//! embedder.

mod common;

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn sop_agent(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sop-agent"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run sop-agent")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn build_then_search_lookup_and_stats() {
    let tmp = TempDir::new().unwrap();
    let config = common::setup(tmp.path());

    let out = sop_agent(&config, &["build-index"]);
    assert!(out.status.success(), "build-index failed: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("documents: 1"), "{}", text);
    assert!(text.contains("Self-test (10 queries"), "{}", text);
    assert!(tmp.path().join("index/vectors.bin").is_file());
    assert!(tmp.path().join("index/chunks.json").is_file());
    assert!(tmp.path().join("index/index_info.json").is_file());

    let out = sop_agent(&config, &["search", "Do you accept walk-ins?", "--top-k", "1"]);
    assert!(out.status.success(), "search failed: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.starts_with("1. ["), "{}", text);
    assert!(!text.contains("2. ["), "{}", text);
    assert!(text.to_lowercase().contains("walk-in"), "{}", text);

    let out = sop_agent(&config, &["lookup", "late arrival"]);
    assert!(out.status.success(), "lookup failed: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.starts_with("Procedure for 'late arrival':"), "{}", text);
    assert!(text.contains("15 minutes"), "{}", text);

    let out = sop_agent(&config, &["stats"]);
    assert!(out.status.success(), "stats failed: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("SOP Index Stats"), "{}", text);
    assert!(text.contains("sop.txt"), "{}", text);
}

#[test]
fn explicit_docx_and_skipped_self_test() {
    let tmp = TempDir::new().unwrap();
    let config = common::setup(tmp.path());
    let docx = tmp.path().join("hours.docx");
    std::fs::write(
        &docx,
        common::docx_with_paragraphs(&[
            "Holiday hours: the clinic closes at 4 PM on public holidays.",
            "Walk-ins are accepted until closing.",
        ]),
    )
    .unwrap();

    let out = sop_agent(
        &config,
        &["build-index", "--doc", docx.to_str().unwrap(), "--skip-self-test"],
    );
    assert!(out.status.success(), "build-index failed: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("documents: 1"), "{}", text);
    assert!(!text.contains("Self-test"), "{}", text);

    let out = sop_agent(&config, &["search", "holiday hours", "--source", "hours.docx"]);
    assert!(out.status.success(), "search failed: {}", stderr(&out));
    assert!(stdout(&out).contains("Holiday hours"));
}

#[test]
fn search_without_index_fails_clearly() {
    let tmp = TempDir::new().unwrap();
    let config = common::setup(tmp.path());

    let out = sop_agent(&config, &["search", "walk-in"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("index not found"), "{}", stderr(&out));
}

#[test]
fn missing_config_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let out = sop_agent(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("Failed to read config file"));
}
