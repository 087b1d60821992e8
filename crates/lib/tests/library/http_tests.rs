//! HTTP surface: authentication, validation and acknowledgements.

use std::net::SocketAddr;
use std::time::Duration;

use mlabc_lib::server;
use reqwest::StatusCode;
use tokio::net::TcpListener;

use super::common::{PASSPHRASE, TestEnv, demo};

/// Serve `env` on an ephemeral port and return its base URL.
async fn spawn_server(env: &TestEnv) -> String {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr: SocketAddr = listener.local_addr().unwrap();
  let service = env.service.clone();
  tokio::spawn(async move {
    server::serve(listener, service, std::future::pending()).await.unwrap();
  });
  format!("http://{}", addr)
}

#[tokio::test]
async fn bad_passphrase_is_forbidden_before_any_work() {
  let env = TestEnv::new();
  let base = spawn_server(&env).await;
  let client = reqwest::Client::new();

  let response = client
    .post(format!("{}/createApp", base))
    .form(&[("passphrase", "guess"), ("app_uid", "com.acme.demo"), ("app_version", "1")])
    .send()
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::FORBIDDEN);
  assert!(!env.paths(&demo()).root().exists());
}

#[tokio::test]
async fn missing_parameter_is_bad_request() {
  let env = TestEnv::new();
  let base = spawn_server(&env).await;
  let client = reqwest::Client::new();

  let response = client
    .get(format!("{}/verifyApp", base))
    .query(&[("passphrase", PASSPHRASE), ("app_uid", "com.acme.demo"), ("app_version", "1")])
    .send()
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  let body: serde_json::Value = response.json().await.unwrap();
  assert!(body["error"].as_str().unwrap().contains("checksum"));
}

#[tokio::test]
async fn unsupported_platform_is_bad_request() {
  let env = TestEnv::new();
  let base = spawn_server(&env).await;
  let client = reqwest::Client::new();

  let response = client
    .post(format!("{}/compileApp", base))
    .form(&[
      ("passphrase", PASSPHRASE),
      ("app_uid", "com.acme.demo"),
      ("app_version", "1"),
      ("checksum", "abc"),
      ("platform", "windows"),
    ])
    .send()
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn compile_acknowledges_then_calls_back() {
  let env = TestEnv::new();
  let checksum = env.write_source(&demo(), "index.html", "<h1>demo</h1>");
  let base = spawn_server(&env).await;
  let client = reqwest::Client::new();

  let response = client
    .post(format!("{}/compileApp", base))
    .form(&[
      ("passphrase", PASSPHRASE),
      ("app_uid", "com.acme.demo"),
      ("app_version", "1"),
      ("checksum", checksum.as_str()),
      ("platform", "android"),
      ("app_name", "Demo"),
    ])
    .send()
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  assert!(response.json::<bool>().await.unwrap());

  let sent = env.notifier.wait_for(1, Duration::from_secs(10)).await;
  assert!(sent[0].1.result);

  let download = client
    .get(format!("{}/getApp", base))
    .query(&[
      ("passphrase", PASSPHRASE),
      ("app_uid", "com.acme.demo"),
      ("app_version", "1"),
      ("platform", "android"),
    ])
    .send()
    .await
    .unwrap();
  assert_eq!(download.status(), StatusCode::OK);
  assert_eq!(
    download.headers()["content-type"],
    "application/vnd.android.package-archive"
  );
  assert!(
    download.headers()["content-disposition"]
      .to_str()
      .unwrap()
      .contains("Demo-v1.apk")
  );
}

#[tokio::test]
async fn get_app_before_build_is_not_compiled() {
  let env = TestEnv::new();
  env.write_source(&demo(), "index.html", "<h1>demo</h1>");
  let base = spawn_server(&env).await;

  let response = reqwest::Client::new()
    .get(format!("{}/getApp", base))
    .query(&[
      ("passphrase", PASSPHRASE),
      ("app_uid", "com.acme.demo"),
      ("app_version", "1"),
      ("platform", "ios"),
    ])
    .send()
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::NOT_FOUND);
  let body: serde_json::Value = response.json().await.unwrap();
  assert_eq!(body["compiled"], false);
}

#[tokio::test]
async fn status_lists_apps() {
  let env = TestEnv::new();
  env.write_source(&demo(), "index.html", "<h1>demo</h1>");
  let base = spawn_server(&env).await;

  let response = reqwest::Client::new()
    .get(format!("{}/getAppStatus", base))
    .query(&[("passphrase", PASSPHRASE)])
    .send()
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  let body: serde_json::Value = response.json().await.unwrap();
  assert_eq!(body[0]["app_id"], "com.acme.demo");
  assert_eq!(body[0]["platforms"]["android"]["compiled"], false);
}
