use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::{self, BoxFuture, FutureExt};
use serde_json::{json, Value};
use tailwatch::{
    spawn_all, Captures, Config, Cursor, DeliveryError, Error, Payload, Registration, Router,
    RouterArgs, RouterTable, Watch, WatchConfig,
};
use tempfile::tempdir;
use tokio::time;

#[derive(Default)]
struct Collect {
    hello: Mutex<usize>,
    sent: Mutex<Vec<(String, u64)>>,
}

impl Router for Collect {
    fn send_hello(&self) -> BoxFuture<'_, Result<(), DeliveryError>> {
        *self.hello.lock().unwrap() += 1;
        future::ready(Ok(())).boxed()
    }

    fn payload(&self, text: &str, cursor: &Cursor, _: &Captures, _: &RouterArgs) -> Payload {
        json!({ "text": text, "line": cursor.line() })
    }

    fn send(&self, payload: Payload) -> BoxFuture<'_, Result<(), DeliveryError>> {
        let text = payload["text"].as_str().unwrap_or_default().to_owned();
        let line = payload["line"].as_u64().unwrap_or_default();
        self.sent.lock().unwrap().push((text, line));
        future::ready(Ok(())).boxed()
    }
}

fn watch_config(dir: &Path) -> Value {
    json!({
        "dir": dir,
        "filename": r"\.log$",
        "text_pattern": r"^\[\d{4}-\d{2}-\d{2}\]",
        "triggers": [{ "pattern": "ERROR", "routers": [{ "name": "ops" }] }],
    })
}

fn append(path: &Path, data: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(data.as_bytes()).unwrap();
    file.sync_all().unwrap();
}

async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
    const TIMEOUT_5_SEC: Duration = Duration::from_millis(5000);

    time::timeout(TIMEOUT_5_SEC, async {
        while !check() {
            time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
}

async fn wait_tracked(registration: &Registration, count: usize) {
    const TIMEOUT_5_SEC: Duration = Duration::from_millis(5000);

    time::timeout(TIMEOUT_5_SEC, async {
        while registration.tracked().await != count {
            time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for tracked files");
}

#[tokio::test]
pub async fn test_tails_existing_and_created_files() {
    let logdir = tempdir().unwrap();
    let existing = logdir.path().join("app.log");
    append(&existing, "[2024-01-01] ERROR already there\n");

    let collect = Arc::new(Collect::default());
    let routers = RouterTable::new().with("ops", collect.clone());
    let config: WatchConfig = serde_json::from_value(watch_config(logdir.path())).unwrap();

    let watch = Watch::new(Registration::new(&config, &routers).unwrap()).unwrap();
    let registration = watch.registration().clone();
    let handle = tokio::spawn(watch.run());

    wait_tracked(&registration, 1).await;

    append(
        &existing,
        "[2024-01-02] ERROR disk full\n  at sector 7\n[2024-01-02] INFO fine\n",
    );
    wait_for("first message", || !collect.sent.lock().unwrap().is_empty()).await;
    assert_eq!(
        collect.sent.lock().unwrap()[0],
        ("[2024-01-02] ERROR disk full\n  at sector 7".to_string(), 2)
    );

    let created = logdir.path().join("new.log");
    append(&created, "");
    wait_tracked(&registration, 2).await;

    append(&created, "[2024-01-03] ERROR new file\n[2024-01-03] done\n");
    wait_for("second message", || collect.sent.lock().unwrap().len() == 2).await;
    assert_eq!(
        collect.sent.lock().unwrap()[1],
        ("[2024-01-03] ERROR new file".to_string(), 1)
    );

    std::fs::remove_file(&created).unwrap();
    wait_tracked(&registration, 1).await;

    handle.abort();
}

#[tokio::test]
pub async fn test_spawn_all_validates_before_hello() {
    let logdir = tempdir().unwrap();
    let collect = Arc::new(Collect::default());
    let routers = RouterTable::new().with("ops", collect.clone());

    let mut broken = watch_config(logdir.path());
    broken["triggers"][0]["routers"][0]["name"] = json!("pager");
    let config: Config = serde_json::from_value(json!({
        "watch": [watch_config(logdir.path()), broken],
    }))
    .unwrap();

    let err = spawn_all(&config, &routers).await.unwrap_err();
    assert!(matches!(err, Error::UnknownRouter { .. }));
    assert_eq!(*collect.hello.lock().unwrap(), 0);

    let config: Config = serde_json::from_value(json!({
        "watch": [watch_config(logdir.path())],
    }))
    .unwrap();
    let handles = spawn_all(&config, &routers).await.unwrap();
    assert_eq!(handles.len(), 1);
    assert_eq!(*collect.hello.lock().unwrap(), 1);

    for handle in handles {
        handle.abort();
    }
}
