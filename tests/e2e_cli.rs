//! CLI end-to-end tests
//!
//! Tests for the livepair command-line interface.

use assert_cmd::prelude::*;
use lp_media::fixtures::{self, FixtureOptions};
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the livepair binary
#[allow(deprecated)]
fn livepair_cmd() -> Command {
    let mut cmd = Command::cargo_bin("livepair").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

fn write_sources(dir: &Path) {
    fs::write(dir.join("photo.jpg"), fixtures::jpeg_bytes(32, 24)).unwrap();
    fixtures::write_movie(&dir.join("clip.mov"), &FixtureOptions::silent()).unwrap();
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = livepair_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_command() {
    let mut cmd = livepair_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("livepair "));
}

#[test]
fn test_cli_encode_help() {
    let mut cmd = livepair_cmd();
    cmd.args(["encode", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("paired key photo"));
}

#[test]
fn test_cli_encode_missing_input() {
    let dir = tempdir().unwrap();
    let mut cmd = livepair_cmd();
    cmd.args(["encode", "--photo", "missing.jpg", "--video", "missing.mov", "--output"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_cli_encode_then_decode() {
    let dir = tempdir().unwrap();
    write_sources(dir.path());
    let out = dir.path().join("out");

    let output = livepair_cmd()
        .current_dir(dir.path())
        .args([
            "encode",
            "--photo",
            "photo.jpg",
            "--video",
            "clip.mov",
            "--identifier",
            "abc123",
            "--json",
            "--output",
        ])
        .arg(&out)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["identifier"], "abc123");
    assert!(summary["audio"].is_null());
    assert!(out.join("abc123.jpeg").exists());
    assert!(out.join("abc123.mov").exists());

    let decoded = dir.path().join("decoded");
    livepair_cmd()
        .args(["decode", "--photo"])
        .arg(out.join("abc123.jpeg"))
        .arg("--video")
        .arg(out.join("abc123.mov"))
        .arg("--output")
        .arg(&decoded)
        .assert()
        .success()
        .stdout(predicate::str::contains("Identifier: abc123"));
    assert!(decoded.join("abc123.jpeg").exists());
    assert!(decoded.join("abc123.mov").exists());
}

#[test]
fn test_cli_decode_requires_a_source() {
    let mut cmd = livepair_cmd();
    cmd.arg("decode").assert().failure();
}

#[test]
fn test_cli_decode_untagged_photo_fails() {
    let dir = tempdir().unwrap();
    write_sources(dir.path());
    let mut cmd = livepair_cmd();
    cmd.args(["decode", "--photo"])
        .arg(dir.path().join("photo.jpg"))
        .arg("--video")
        .arg(dir.path().join("clip.mov"))
        .arg("--output")
        .arg(dir.path().join("decoded"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("no shared identifier"));
}

#[test]
fn test_cli_inspect_movie_json() {
    let dir = tempdir().unwrap();
    let movie = dir.path().join("tagged.mov");
    fixtures::write_movie(
        &movie,
        &FixtureOptions {
            content_identifier: Some("XYZ".into()),
            ..FixtureOptions::default()
        },
    )
    .unwrap();

    let output = livepair_cmd()
        .args(["inspect", "--json"])
        .arg(&movie)
        .output()
        .unwrap();
    assert!(output.status.success());
    let inspection: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(inspection["kind"], "movie");
    assert_eq!(inspection["identifier"], "XYZ");
    assert_eq!(inspection["tracks"].as_array().unwrap().len(), 2);
    assert_eq!(inspection["tracks"][0]["home_button"], "right");
}

#[test]
fn test_cli_inspect_photo() {
    let dir = tempdir().unwrap();
    let photo = dir.path().join("apple.jpeg");
    fs::write(&photo, fixtures::apple_jpeg_bytes(16, 16, "FROM-IPHONE")).unwrap();

    let mut cmd = livepair_cmd();
    cmd.arg("inspect")
        .arg(&photo)
        .assert()
        .success()
        .stdout(predicate::str::contains("Identifier: FROM-IPHONE"));
}

#[test]
fn test_cli_validate_config() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.json");
    fs::write(
        &config,
        r#"{"remux": {"video_codec": "hevc", "poll_interval_ms": 0}}"#,
    )
    .unwrap();

    let mut cmd = livepair_cmd();
    cmd.arg("validate")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("Video codec: hevc"))
        .stdout(predicate::str::contains("poll_interval_ms is 0"));
}

#[test]
fn test_cli_validate_invalid_config() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.json");
    fs::write(&config, "{ not json").unwrap();

    let mut cmd = livepair_cmd();
    cmd.arg("validate").arg(&config).assert().failure();
}
