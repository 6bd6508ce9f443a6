//! End-to-end CLI tests for the webdav binary.

// `Command::cargo_bin` is deprecated in assert_cmd >=2.0.17 in favor of
// `cargo::cargo_bin_cmd!` macro. Suppressed until migration to the new API.
#![allow(deprecated)]

mod support;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{body_bytes, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::socket_guard::{socket_skip_return, start_mock_server_or_skip};

/// Binary pointed at `server`, with no credentials leaking in from the environment.
fn webdav_for(server: &MockServer) -> Command {
    let uri = Url::parse(&server.uri()).unwrap();
    let mut cmd = Command::cargo_bin("webdav").unwrap();
    cmd.env_remove("WEBDAV_USERNAME")
        .env_remove("WEBDAV_PASSWORD")
        .env_remove("RUST_LOG")
        .args(["--scheme", "http", "--host", uri.host_str().unwrap()])
        .arg("--port")
        .arg(uri.port().unwrap().to_string());
    cmd
}

#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("webdav").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Talk to a WebDAV server"))
        .stdout(predicate::str::contains("mkcol"));
}

#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("webdav").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("webdav"));
}

#[test]
fn test_binary_missing_subcommand_fails() {
    let mut cmd = Command::cargo_bin("webdav").unwrap();
    cmd.args(["--host", "dav.example.com"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_binary_invalid_host_fails_before_any_request() {
    let mut cmd = Command::cargo_bin("webdav").unwrap();
    cmd.args(["--host", "bad host", "delete", "/x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid WebDAV host"));
}

#[tokio::test]
async fn test_binary_get_writes_output_file() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello, world!!!".to_vec()))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("test.txt");
    webdav_for(&mock_server)
        .args(["-q", "get", "/test", "-o"])
        .arg(&output)
        .assert()
        .success();
    assert_eq!(std::fs::read(&output).unwrap(), b"hello, world!!!");
}

#[tokio::test]
async fn test_binary_get_without_output_prints_body() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello, world!!!".to_vec()))
        .mount(&mock_server)
        .await;

    webdav_for(&mock_server)
        .args(["-q", "get", "/test"])
        .assert()
        .success()
        .stdout("hello, world!!!");
}

#[tokio::test]
async fn test_binary_put_uploads_file() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("PUT"))
        .and(path("/notes.txt"))
        .and(header("content-length", "17"))
        .and(body_bytes(b"remember the milk".to_vec()))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let local = temp_dir.path().join("notes.txt");
    std::fs::write(&local, b"remember the milk").unwrap();

    webdav_for(&mock_server)
        .args(["-q", "put"])
        .arg(&local)
        .arg("/notes.txt")
        .assert()
        .success();
}

#[tokio::test]
async fn test_binary_put_with_credentials_passes_basic_auth() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    // "alice:secret"
    Mock::given(method("PUT"))
        .and(path("/notes.txt"))
        .and(header("authorization", "Basic YWxpY2U6c2VjcmV0"))
        .respond_with(ResponseTemplate::new(201))
        .with_priority(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let local = temp_dir.path().join("notes.txt");
    std::fs::write(&local, b"remember the milk").unwrap();

    webdav_for(&mock_server)
        .args(["-q", "-u", "alice", "-p", "secret", "put"])
        .arg(&local)
        .arg("/notes.txt")
        .assert()
        .success();
}

#[tokio::test]
async fn test_binary_http_error_exits_non_zero() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;

    webdav_for(&mock_server)
        .args(["delete", "/protected"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("403"));
}

#[tokio::test]
async fn test_binary_demo_runs_full_sequence() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("PUT"))
        .and(path("/demo.txt"))
        .and(body_bytes(b"hello, world!!!".to_vec()))
        .respond_with(ResponseTemplate::new(201))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/demo.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello, world!!!".to_vec()))
        .mount(&mock_server)
        .await;
    Mock::given(method("MKCOL"))
        .and(path("/demo/"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&mock_server)
        .await;
    Mock::given(method("COPY"))
        .and(path("/demo.txt"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&mock_server)
        .await;
    Mock::given(method("MOVE"))
        .and(path("/demo.txt"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&mock_server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/demo/"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&mock_server)
        .await;

    webdav_for(&mock_server)
        .arg("demo")
        .assert()
        .success()
        .stderr(predicate::str::contains("Demo complete"));
}
