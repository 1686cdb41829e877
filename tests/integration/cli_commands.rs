#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

fn write_demo(dir: &Path, name: &str, extra: &[&str]) -> PathBuf {
    let path = dir.join(format!("{name}.img"));
    cargo_bin_cmd!("treecheck")
        .args(["demo", "--keys", "300", "--leaf-fill", "5", "--internal-fill", "4"])
        .args(extra)
        .arg(&path)
        .assert()
        .success();
    path
}

fn json_output(args: &[&str], image: &Path, code: i32) -> Value {
    let output = cargo_bin_cmd!("treecheck")
        .args(["--format", "json"])
        .args(args)
        .arg(image)
        .assert()
        .code(code)
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("json output")
}

#[test]
fn verify_succeeds_on_an_intact_image() {
    let dir = TempDir::new().expect("tempdir");
    let image = write_demo(dir.path(), "intact", &[]);
    let report = json_output(&["verify"], &image, 0);
    assert_eq!(report["success"], Value::Bool(true));
    assert_eq!(report["level"], "full");
    assert_eq!(report["counts"]["leaves"], 60);
    assert_eq!(report["findings"].as_array().map(Vec::len), Some(0));
}

#[test]
fn misordered_keys_fail_the_tree_check() {
    let dir = TempDir::new().expect("tempdir");
    let image = write_demo(dir.path(), "misordered", &["--corrupt", "misordered-keys"]);
    let report = json_output(&["check"], &image, 2);
    assert_eq!(report["success"], Value::Bool(false));
    assert_eq!(report["findings"][0]["kind"], "key_order");
    let message = report["findings"][0]["message"].as_str().expect("message");
    assert!(message.contains("non-unique/misordered key"));

    json_output(&["space"], &image, 0);
}

#[test]
fn unused_page_fails_only_the_space_check() {
    let dir = TempDir::new().expect("tempdir");
    let image = write_demo(dir.path(), "leaky", &["--corrupt", "unused-page"]);
    json_output(&["check"], &image, 0);
    let report = json_output(&["space"], &image, 2);
    assert_eq!(report["findings"][0]["kind"], "unused_pages");
    let message = report["findings"][0]["message"].as_str().expect("message");
    assert!(message.starts_with("There are 1 unused pages in the store"));
}

#[test]
fn broken_sibling_is_reported_in_text_output() {
    let dir = TempDir::new().expect("tempdir");
    let image = write_demo(dir.path(), "broken", &["--corrupt", "broken-sibling"]);
    let output = cargo_bin_cmd!("treecheck")
        .arg("verify")
        .arg(&image)
        .assert()
        .code(2)
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("success=false"));
    assert!(text.contains("[pointer_state]"));
    assert!(text.contains("state=BROKEN"));
}

#[test]
fn config_file_supplies_check_options() {
    let dir = TempDir::new().expect("tempdir");
    let image = write_demo(dir.path(), "config", &["--corrupt", "misordered-keys"]);
    let config = dir.path().join("treecheck.toml");
    fs::write(&config, "[check]\nmax_findings = 0\n").expect("write config");

    let output = cargo_bin_cmd!("treecheck")
        .args(["--format", "json", "--config"])
        .arg(&config)
        .arg("check")
        .arg(&image)
        .assert()
        .code(2)
        .get_output()
        .stdout
        .clone();
    let report: Value = serde_json::from_slice(&output).expect("json output");
    assert_eq!(report["findings"].as_array().map(Vec::len), Some(0));
    assert_eq!(report["counts"]["defects"], 1);

    // Flags win over the file.
    let report = json_output(
        &["--config", config.to_str().expect("utf8 path"), "--max-findings", "5", "check"],
        &image,
        2,
    );
    assert_eq!(report["findings"].as_array().map(Vec::len), Some(1));
}

#[test]
fn inverted_generation_flags_are_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let image = write_demo(dir.path(), "generations", &[]);
    json_output(&["--stable-generation", "1", "check"], &image, 0);
    cargo_bin_cmd!("treecheck")
        .args(["--stable-generation", "3", "--unstable-generation", "2", "check"])
        .arg(&image)
        .assert()
        .code(1);
}

#[test]
fn missing_image_is_an_error() {
    let dir = TempDir::new().expect("tempdir");
    cargo_bin_cmd!("treecheck")
        .arg("verify")
        .arg(dir.path().join("absent.img"))
        .assert()
        .code(1);
}
