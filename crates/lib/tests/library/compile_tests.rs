//! End-to-end compile scenarios through the service layer.

use std::fs;
use std::time::{Duration, SystemTime};

use filetime::{FileTime, set_file_mtime};
use mlabc_lib::notify::Operation;
use mlabc_lib::util::testutil::FakeToolchain;

use super::common::{TestEnv, demo};

#[tokio::test]
async fn first_compile_builds_and_calls_back() {
  let env = TestEnv::new();
  let checksum = env.write_source(&demo(), "index.html", "<h1>demo</h1>");

  env
    .service
    .compile_app(demo(), "android".into(), checksum.clone(), Some("Demo".into()));
  let sent = env.notifier.wait_for(1, Duration::from_secs(10)).await;

  assert_eq!(sent.len(), 1);
  let (operation, payload) = &sent[0];
  assert_eq!(*operation, Operation::CompileApp);
  assert!(payload.result);
  assert_eq!(payload.checksum.as_deref(), Some(checksum.as_str()));
  assert_eq!(payload.app_uid, "com.acme.demo");
  assert!(payload.executable_checksum.is_some());
  assert_eq!(env.toolchain.build_count(), 1);

  let manifest = env.service.orchestrator().store().load(&demo()).unwrap().unwrap();
  let record = manifest.platform("android").unwrap();
  assert!(record.compiled);
  assert!(record.compiled_at.is_some());
  assert_eq!(record.source_checksum.as_ref().unwrap().as_str(), checksum);
}

#[tokio::test]
async fn repeated_compile_reuses_record() {
  let env = TestEnv::new();
  let checksum = env.write_source(&demo(), "index.html", "<h1>demo</h1>");

  env
    .service
    .compile_app(demo(), "android".into(), checksum.clone(), None)
    .await
    .unwrap();
  let before = fs::read(env.paths(&demo()).manifest_path()).unwrap();

  env
    .service
    .compile_app(demo(), "android".into(), checksum.clone(), None)
    .await
    .unwrap();
  let after = fs::read(env.paths(&demo()).manifest_path()).unwrap();

  let sent = env.notifier.wait_for(2, Duration::from_secs(10)).await;
  assert!(sent[1].1.result);
  assert_eq!(sent[1].1.outcome.as_deref(), Some("already_built"));
  assert_eq!(env.toolchain.build_count(), 1);
  assert_eq!(before, after);
}

#[tokio::test]
async fn wrong_checksum_is_rejected_without_building() {
  let env = TestEnv::new();
  env.write_source(&demo(), "index.html", "<h1>demo</h1>");

  env
    .service
    .compile_app(demo(), "android".into(), "zzz999".into(), None)
    .await
    .unwrap();

  let sent = env.notifier.wait_for(1, Duration::from_secs(10)).await;
  assert!(!sent[0].1.result);
  assert_eq!(sent[0].1.checksum.as_deref(), Some("zzz999"));
  assert_eq!(env.toolchain.build_count(), 0);
  assert!(!env.paths(&demo()).manifest_path().exists());
}

#[tokio::test]
async fn concurrent_compiles_spawn_one_build() {
  let env = TestEnv::with(FakeToolchain::new().with_delay(Duration::from_millis(300)), |_| {});
  let checksum = env.write_source(&demo(), "index.html", "<h1>demo</h1>");

  let first = env
    .service
    .compile_app(demo(), "android".into(), checksum.clone(), None);
  let second = env
    .service
    .compile_app(demo(), "android".into(), checksum.clone(), None);
  first.await.unwrap();
  second.await.unwrap();

  let sent = env.notifier.wait_for(2, Duration::from_secs(10)).await;
  assert_eq!(sent.len(), 2);
  assert!(sent.iter().all(|(_, p)| p.result));
  let mut outcomes: Vec<_> = sent.iter().filter_map(|(_, p)| p.outcome.clone()).collect();
  outcomes.sort();
  assert_eq!(outcomes, vec!["already_built", "built"]);
  assert_eq!(env.toolchain.build_count(), 1);
  assert_eq!(env.toolchain.max_in_flight(), 1);
}

#[tokio::test]
async fn different_platforms_build_in_parallel() {
  let env = TestEnv::with(FakeToolchain::new().with_delay(Duration::from_millis(300)), |_| {});
  let checksum = env.write_source(&demo(), "index.html", "<h1>demo</h1>");

  let android = env
    .service
    .compile_app(demo(), "android".into(), checksum.clone(), None);
  let ios = env.service.compile_app(demo(), "ios".into(), checksum.clone(), None);
  android.await.unwrap();
  ios.await.unwrap();

  assert_eq!(env.toolchain.build_count(), 2);
  assert_eq!(env.toolchain.max_in_flight(), 2);

  let sent = env.notifier.wait_for(2, Duration::from_secs(10)).await;
  assert!(sent.iter().all(|(_, p)| p.result));
  let manifest = env.service.orchestrator().store().load(&demo()).unwrap().unwrap();
  assert!(manifest.is_built_from("android", &checksum));
  assert!(manifest.is_built_from("ios", &checksum));
}

#[tokio::test]
async fn waiting_past_budget_reports_unknown() {
  let env = TestEnv::with(FakeToolchain::new(), |config| {
    config.lock.max_wait_ms = 100;
  });
  let checksum = env.write_source(&demo(), "index.html", "<h1>demo</h1>");
  fs::write(env.paths(&demo()).lock_path("android"), b"{}").unwrap();

  env
    .service
    .compile_app(demo(), "android".into(), checksum, None)
    .await
    .unwrap();

  let sent = env.notifier.wait_for(1, Duration::from_secs(10)).await;
  assert!(!sent[0].1.result);
  assert_eq!(sent[0].1.outcome.as_deref(), Some("unknown"));
  assert_eq!(env.toolchain.build_count(), 0);
}

#[tokio::test]
async fn stale_lock_is_cleared_and_build_proceeds() {
  let env = TestEnv::with(FakeToolchain::new(), |config| {
    config.lock.stale_after_secs = 60;
  });
  let checksum = env.write_source(&demo(), "index.html", "<h1>demo</h1>");
  let lock_path = env.paths(&demo()).lock_path("android");
  fs::write(&lock_path, b"{}").unwrap();
  let an_hour_ago = SystemTime::now() - Duration::from_secs(3600);
  set_file_mtime(&lock_path, FileTime::from_system_time(an_hour_ago)).unwrap();

  env
    .service
    .compile_app(demo(), "android".into(), checksum, None)
    .await
    .unwrap();

  let sent = env.notifier.wait_for(1, Duration::from_secs(10)).await;
  assert!(sent[0].1.result);
  assert_eq!(env.toolchain.build_count(), 1);
  assert!(!lock_path.exists());
}

#[tokio::test]
async fn create_then_compile() {
  let env = TestEnv::new();

  env.service.create_app(demo(), Some("Demo".into())).await.unwrap();
  let sent = env.notifier.wait_for(1, Duration::from_secs(10)).await;
  assert_eq!(sent[0].0, Operation::CreateApp);
  let checksum = sent[0].1.checksum.clone().unwrap();

  env
    .service
    .compile_app(demo(), "android".into(), checksum, None)
    .await
    .unwrap();
  let sent = env.notifier.wait_for(2, Duration::from_secs(10)).await;
  assert!(sent[1].1.result);
  assert!(env.apps_path().join("com.acme.demo/1/compile.json").exists());
}
