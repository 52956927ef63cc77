//! End-to-end tests of the assembled bridge: startup, serving, recovery of
//! queued payloads, and ordered shutdown.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use chat_bridge::app::Bridge;
use chat_bridge::config::GlobalConfig;
use chat_bridge::driver::memory::MemoryConnector;
use chat_bridge::persistence::db;
use chat_bridge::persistence::overflow_repo::OverflowStore;
use chat_bridge::rpc::output::OutputChannel;

use super::test_helpers::{payload, test_network, wait_until};

/// Writer whose bytes the test can read back.
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn values(&self) -> Vec<Value> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .expect("utf-8 output")
            .lines()
            .map(|line| serde_json::from_str(line).expect("JSON line"))
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn config(dir: &std::path::Path, backend_url: Option<String>) -> GlobalConfig {
    let mut config = GlobalConfig {
        api_id: 12345,
        backend_url,
        data_dir: dir.to_path_buf(),
        ..GlobalConfig::default()
    };
    config.sync.retry_base_millis = 5;
    config.sync.overflow_poll_millis = 10;
    config
}

async fn start(config: &GlobalConfig, buffer: &SharedBuffer) -> Bridge {
    let output = Arc::new(OutputChannel::spawn(buffer.clone(), 1000).expect("output"));
    let pool = db::connect(&config.overflow_db_path()).await.expect("db");
    Bridge::start(
        config,
        Arc::new(MemoryConnector::new(test_network())),
        output,
        pool,
    )
    .await
    .expect("bridge starts")
}

#[tokio::test]
async fn serves_requests_then_shuts_down_when_input_ends() {
    let dir = tempfile::tempdir().expect("tempdir");
    let buffer = SharedBuffer::default();
    let bridge = start(&config(dir.path(), None), &buffer).await;
    assert!(!bridge.pipeline().is_enabled());

    let input = concat!(
        "{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":1}\n",
        "garbage\n",
        "{\"jsonrpc\":\"2.0\",\"method\":\"disconnect\",\"params\":{\"account_id\":\"a\"},\"id\":2}\n",
    );
    let summary = bridge
        .run(input.as_bytes(), CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(summary.accepted, 2);
    assert_eq!(summary.rejected, 1);
    let values = buffer.values();
    assert!(values.iter().any(|v| v["method"] == "notification"
        && v["params"]["type"] == "log"
        && v["params"]["message"] == "Bridge started (api_id 12345, sync disabled, 0 queued)"));
    assert!(values.iter().any(|v| v["id"] == 1 && v["result"] == json!({ "pong": true })));
    assert!(values.iter().any(|v| v["id"] == Value::Null && v["error"]["code"] == -32700));
    assert!(values.iter().any(|v| v["id"] == 2 && v["result"]["error"] == "Client not found"));
}

#[tokio::test]
async fn cancellation_stops_the_bridge() {
    let dir = tempfile::tempdir().expect("tempdir");
    let buffer = SharedBuffer::default();
    let bridge = start(&config(dir.path(), None), &buffer).await;
    let (_client, server) = tokio::io::duplex(1024);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(2), bridge.run(server, cancel))
        .await
        .expect("run returns")
        .expect("run");

    assert_eq!(summary.accepted, 0);
    assert_eq!(bridge.supervisor().session_count().await, 0);
}

#[tokio::test]
async fn payloads_left_from_previous_run_are_delivered_at_startup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    let app = Router::new().route(
        "/api/mutation",
        post(move |Json(_body): Json<Value>| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Json(json!({ "status": "success", "value": { "saved": true } }))
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("http://{}", listener.local_addr().expect("addr"));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let config = config(dir.path(), Some(url));

    // Previous run left two payloads behind.
    {
        let pool = db::connect(&config.overflow_db_path()).await.expect("db");
        let store = OverflowStore::new(Arc::new(pool));
        store.append(&payload(1)).await.expect("append");
        store.append(&payload(2)).await.expect("append");
        store.close().await;
    }

    let buffer = SharedBuffer::default();
    let bridge = start(&config, &buffer).await;
    assert!(bridge.pipeline().is_running());
    assert!(
        wait_until(Duration::from_secs(5), || async { received.load(Ordering::SeqCst) == 2 }).await,
        "backend received both payloads"
    );
    bridge
        .run(&b""[..], CancellationToken::new())
        .await
        .expect("run");

    let values = buffer.values();
    assert!(values.iter().any(|v| v["params"]["message"]
        == "Bridge started (api_id 12345, sync enabled, 2 queued)"));
    let saved = values
        .iter()
        .filter(|v| v["params"]["type"] == "sync" && v["params"]["saved"] == true)
        .count();
    assert_eq!(saved, 2);

    let pool = db::connect(&config.overflow_db_path()).await.expect("reopen");
    let store = OverflowStore::new(Arc::new(pool));
    assert_eq!(store.count().await.expect("count"), 0);
}

#[tokio::test]
async fn legacy_queue_files_are_imported_at_startup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let legacy = serde_json::to_string(&payload(9)).expect("encode");
    std::fs::write(dir.path().join("1700000000000-9.json"), legacy).expect("write legacy");

    let buffer = SharedBuffer::default();
    let bridge = start(&config(dir.path(), None), &buffer).await;
    bridge.shutdown().await;

    assert!(!dir.path().join("1700000000000-9.json").exists());
    let pool = db::connect(&config(dir.path(), None).overflow_db_path())
        .await
        .expect("reopen");
    let store = OverflowStore::new(Arc::new(pool));
    assert_eq!(store.count().await.expect("count"), 1, "kept for a future run with sync enabled");
}
