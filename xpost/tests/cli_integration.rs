//! CLI integration tests for xpost

use assert_cmd::Command;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CREDENTIAL_VARS: &[&str] = &[
    "BLUESKY_SERVICE",
    "BLUESKY_IDENTIFIER",
    "BLUESKY_PASSWORD",
    "TWITTER_API_KEY",
    "TWITTER_KEY_SECRET",
    "TWITTER_ACCESS_TOKEN",
    "TWITTER_ACCESS_TOKEN_SECRET",
    "CROSSPOST_CONFIG",
    "CROSSPOST_LOG_FORMAT",
];

/// Helper to escape path for TOML on Windows
fn escape_path_for_toml(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "\\\\")
}

struct TestEnv {
    temp_dir: TempDir,
    config_path: PathBuf,
    staging_dir: PathBuf,
}

impl TestEnv {
    /// Config with the given platform sections and a private staging area
    fn new(sections: &str) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let staging_dir = temp_dir.path().join("staging");
        let config_path = temp_dir.path().join("config.toml");

        let content = format!(
            "{}\n[uploads]\nstaging_dir = \"{}\"\n",
            sections,
            escape_path_for_toml(&staging_dir)
        );
        fs::write(&config_path, content).unwrap();

        Self {
            temp_dir,
            config_path,
            staging_dir,
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("xpost").unwrap();
        for var in CREDENTIAL_VARS {
            cmd.env_remove(var);
        }
        cmd.arg("--config").arg(&self.config_path);
        cmd
    }

    fn write_file(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    fn write_png(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        DynamicImage::ImageRgb8(RgbImage::from_pixel(24, 24, Rgb([10, 200, 90])))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
        path
    }

    fn staged_entries(&self) -> usize {
        fs::read_dir(&self.staging_dir).map(|d| d.count()).unwrap_or(0)
    }
}

const CONFIGURED: &str = r#"
[bluesky]
service = "http://127.0.0.1:9"
identifier = "alice.test"
password = "app-password"

[twitter]
consumer_key = "ck"
consumer_secret = "cs"
access_token = "at"
access_token_secret = "ats"
api_base = "http://127.0.0.1:9"
upload_base = "http://127.0.0.1:9"
"#;

fn json_stdout(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_help_flag_output() {
    let mut cmd = Command::cargo_bin("xpost").unwrap();

    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Publish one post to several social platforms"))
        .stdout(predicate::str::contains("--image"))
        .stdout(predicate::str::contains("--alt-texts"))
        .stdout(predicate::str::contains("--targets"))
        .stdout(predicate::str::contains("EXIT CODES"));
}

#[test]
fn test_init_config_prints_default_file() {
    let mut cmd = Command::cargo_bin("xpost").unwrap();

    cmd.arg("--init-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("[bluesky]"))
        .stdout(predicate::str::contains("[twitter]"))
        .stdout(predicate::str::contains("[defaults]"))
        .stdout(predicate::str::contains("timeout_secs = 60"));
}

#[test]
fn test_empty_text_is_invalid_input() {
    let env = TestEnv::new(CONFIGURED);

    let output = env
        .cmd()
        .args(["--format", "json", ""])
        .assert()
        .failure()
        .code(3)
        .get_output()
        .clone();

    assert_eq!(json_stdout(&output), json!({ "error": "Text content is required" }));
}

#[test]
fn test_no_text_and_empty_stdin_is_invalid_input() {
    let env = TestEnv::new(CONFIGURED);

    env.cmd()
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Text content is required"));
}

#[test]
fn test_empty_text_releases_staged_images() {
    let env = TestEnv::new(CONFIGURED);
    let image = env.write_png("photo.png");

    env.cmd()
        .arg("-i")
        .arg(&image)
        .arg("")
        .assert()
        .failure()
        .code(3);

    assert!(image.exists(), "caller's file must survive");
    assert_eq!(env.staged_entries(), 0);
}

#[test]
fn test_missing_credentials_lists_every_platform() {
    let env = TestEnv::new("[bluesky]\n[twitter]\n");

    let output = env
        .cmd()
        .args(["-f", "json", "hello"])
        .assert()
        .failure()
        .code(2)
        .get_output()
        .clone();

    let body = json_stdout(&output);
    assert_eq!(body["error"], "Target configuration error");
    assert_eq!(
        body["errors"],
        json!([
            "Bluesky credentials not configured",
            "Twitter credentials not configured"
        ])
    );
}

#[test]
fn test_env_credentials_fill_in_config() {
    let env = TestEnv::new("[twitter]\n");

    // Bluesky is configured from the environment, Twitter still lacks keys
    let output = env
        .cmd()
        .env("BLUESKY_IDENTIFIER", "alice.test")
        .env("BLUESKY_PASSWORD", "app-password")
        .args(["-f", "json", "hello"])
        .assert()
        .failure()
        .code(2)
        .get_output()
        .clone();

    assert_eq!(
        json_stdout(&output)["errors"],
        json!(["Twitter credentials not configured"])
    );
}

#[test]
fn test_unsupported_image_is_rejected() {
    let env = TestEnv::new(CONFIGURED);
    let pdf = env.write_file("doc.png", b"%PDF-1.7");

    env.cmd()
        .arg("--image")
        .arg(&pdf)
        .arg("hello")
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Unsupported file type"));

    assert_eq!(env.staged_entries(), 0);
}

#[test]
fn test_too_many_images_is_rejected() {
    let env = TestEnv::new(CONFIGURED);
    let mut cmd = env.cmd();
    for i in 0..5 {
        cmd.arg("-i").arg(env.write_png(&format!("{}.png", i)));
    }

    cmd.arg("hello")
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Too many images"));
}

#[test]
fn test_unknown_target_is_rejected() {
    let env = TestEnv::new(CONFIGURED);

    env.cmd()
        .args(["-t", "mastodon", "hello"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Unknown target(s): mastodon"));
}

#[test]
fn test_malformed_target_list_is_rejected() {
    let env = TestEnv::new(CONFIGURED);

    env.cmd()
        .args(["-t", "bluesky,not valid", "hello"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Invalid target name"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_posts_to_bluesky_and_cleans_up() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.server.createSession"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "did": "did:plc:alice",
            "handle": "alice.test",
            "accessJwt": "jwt"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.repo.uploadBlob"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "blob": { "$type": "blob", "ref": { "$link": "bafk" }, "mimeType": "image/png", "size": 10 }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.repo.createRecord"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uri": "at://did:plc:alice/app.bsky.feed.post/1",
            "cid": "bafy"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let env = TestEnv::new(&format!(
        "[bluesky]\nservice = \"{}\"\nidentifier = \"alice.test\"\npassword = \"pw\"\n",
        server.uri()
    ));
    let image = env.write_png("photo.png");

    let output = env
        .cmd()
        .args(["-t", "bluesky", "-f", "json", "--alt-texts", r#"["green square"]"#])
        .arg("-i")
        .arg(&image)
        .write_stdin("hello from stdin\n")
        .assert()
        .success()
        .code(0)
        .get_output()
        .clone();

    assert_eq!(
        json_stdout(&output),
        json!({
            "message": "Posts created",
            "responses": [{
                "platform": "bluesky",
                "success": true,
                "data": { "uri": "at://did:plc:alice/app.bsky.feed.post/1", "cid": "bafy" }
            }],
            "imageCount": 1
        })
    );

    let requests = server.received_requests().await.unwrap();
    let record = requests
        .iter()
        .find(|r| r.url.path() == "/xrpc/com.atproto.repo.createRecord")
        .unwrap();
    let body: Value = serde_json::from_slice(&record.body).unwrap();
    assert_eq!(body["record"]["text"], "hello from stdin");
    assert_eq!(body["record"]["embed"]["images"][0]["alt"], "green square");

    assert!(image.exists());
    assert_eq!(env.staged_entries(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_every_platform_failing_exits_with_one() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.server.createSession"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "did": "did:plc:alice",
            "accessJwt": "jwt"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.repo.createRecord"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let env = TestEnv::new(&format!(
        "[bluesky]\nservice = \"{}\"\nidentifier = \"alice.test\"\npassword = \"pw\"\n",
        server.uri()
    ));

    env.cmd()
        .args(["-t", "bluesky", "--progress", "hello"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("All posts failed"))
        .stderr(predicate::str::contains("bluesky: failed"))
        .stderr(predicate::str::contains("upstream down"));
}
