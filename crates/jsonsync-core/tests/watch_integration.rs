//! End-to-end tests of the change watcher over the OS watch primitive.

use std::fs;
use std::time::Duration;

use jsonsync_core::{ResourceName, Subscription, SyncConfig, SyncCoordinator};
use serde_json::{json, Value};

/// Generous bound for the OS to report a change.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait before concluding no further message is coming.
const QUIET_PERIOD: Duration = Duration::from_millis(750);

struct TestContext {
    coordinator: SyncCoordinator,
    _dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = SyncCoordinator::open(SyncConfig::new(dir.path())).unwrap();
        Self {
            coordinator,
            _dir: dir,
        }
    }

    fn path(&self, file: &str) -> std::path::PathBuf {
        self.coordinator.store().root().join(file)
    }
}

async fn next_message(sub: &mut Subscription) -> Value {
    let message = tokio::time::timeout(DELIVERY_TIMEOUT, sub.recv())
        .await
        .expect("timed out waiting for broadcast")
        .expect("subscription closed");
    serde_json::from_str(&message).unwrap()
}

async fn assert_quiet(sub: &mut Subscription) {
    if let Ok(Some(message)) = tokio::time::timeout(QUIET_PERIOD, sub.recv()).await {
        panic!("unexpected broadcast: {message}");
    }
}

#[tokio::test]
async fn external_write_is_broadcast_once() {
    let ctx = TestContext::new();
    let task = ctx.coordinator.start().unwrap();
    let mut sub = ctx.coordinator.hub().register();

    fs::write(ctx.path("budget.json"), br#"{"total": 42}"#).unwrap();

    let message = next_message(&mut sub).await;
    assert_eq!(message["type"], "updated");
    assert_eq!(message["file"], "budget.json");
    assert_eq!(message["data"], json!({"total": 42}));
    assert_quiet(&mut sub).await;

    task.shutdown().await;
}

#[tokio::test]
async fn external_delete_is_broadcast_once() {
    let ctx = TestContext::new();
    let name = ResourceName::parse("gone").unwrap();
    ctx.coordinator.write(&name, json!([1, 2])).unwrap();

    let task = ctx.coordinator.start().unwrap();
    let mut sub = ctx.coordinator.hub().register();

    fs::remove_file(ctx.path("gone.json")).unwrap();

    let message = next_message(&mut sub).await;
    assert_eq!(message, json!({"type": "deleted", "file": "gone.json"}));
    assert_quiet(&mut sub).await;
    assert!(ctx.coordinator.dedup().get(&name).is_none());

    task.shutdown().await;
}

#[tokio::test]
async fn own_write_is_not_echoed() {
    let ctx = TestContext::new();
    let task = ctx.coordinator.start().unwrap();
    let mut sub = ctx.coordinator.hub().register();

    ctx.coordinator
        .write(&ResourceName::parse("echo").unwrap(), json!({"v": 1}))
        .unwrap();

    let message = next_message(&mut sub).await;
    assert_eq!(message["data"], json!({"v": 1}));
    assert_quiet(&mut sub).await;

    task.shutdown().await;
}

#[tokio::test]
async fn non_json_files_are_ignored() {
    let ctx = TestContext::new();
    let task = ctx.coordinator.start().unwrap();
    let mut sub = ctx.coordinator.hub().register();

    fs::write(ctx.path("notes.txt"), b"hello").unwrap();
    assert_quiet(&mut sub).await;

    task.shutdown().await;
}
