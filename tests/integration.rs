//! Integration Tests for the Gateway
//!
//! End-to-end scenarios against the on-disk namespace directory backend in a
//! temporary directory, plus an RPC round trip over a real TCP socket.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: write process → read process, RPC
//! - `shutdown_*` - Drain-then-finalize on shutdown

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use plfs_gateway::{
    FailureKind, Gateway, GatewayConfig, GatewayState, LifecycleError, LogDirBackend, Mode,
};

fn write_config() -> GatewayConfig {
    GatewayConfig::default()
}

fn read_config(conversion: bool) -> GatewayConfig {
    GatewayConfig {
        read_mode: true,
        conversion,
        ..Default::default()
    }
}

// =============================================================================
// Happy Path Tests
// =============================================================================

#[tokio::test]
async fn happy_write_process_then_read_process() {
    let dir = tempfile::tempdir().unwrap();

    // Write-mode "process"
    let writer = Gateway::start(&write_config(), Arc::new(LogDirBackend::new(dir.path())))
        .await
        .expect("Failed to start writer");
    assert_eq!(writer.state(), GatewayState::Running);
    assert_eq!(writer.mode(), Mode::WriteOnly);

    let service = writer.service();
    service.append("services", "user1", "login").await.unwrap();
    service.append("services", "user1", "logout").await.unwrap();

    let report = writer.flush_now().await;
    let stats = report.get("services", "user1").unwrap();
    assert_eq!((stats.flushed, stats.total), (2, 2));

    let shutdown = writer.shutdown().await;
    assert_eq!(shutdown.errors, 0);

    // Separate read-mode "process" over the same directory
    let reader = Gateway::start(&read_config(false), Arc::new(LogDirBackend::new(dir.path())))
        .await
        .expect("Failed to start reader");
    let value = reader.service().get("services", "user1").await.unwrap();
    assert!(value.contains("login"));
    assert!(value.contains("logout"));

    // Unknown key is empty, not an error
    assert_eq!(reader.service().get("services", "nobody").await.unwrap(), "");
    reader.shutdown().await;
}

#[tokio::test]
async fn happy_uncached_namespace_writes_through() {
    let dir = tempfile::tempdir().unwrap();
    let writer = Gateway::start(&write_config(), Arc::new(LogDirBackend::new(dir.path())))
        .await
        .unwrap();

    writer.service().append("audit", "evt1", "created").await.unwrap();
    assert_eq!(writer.cache().len(), 0);
    assert_eq!(writer.cache().pending_count(), 0);

    let records = std::fs::read_to_string(dir.path().join("audit").join("records.jsonl")).unwrap();
    assert!(records.contains("created"));
    writer.shutdown().await;
}

#[tokio::test]
async fn happy_conversion_recovers_crashed_writer() {
    let dir = tempfile::tempdir().unwrap();

    let writer = Gateway::start(&write_config(), Arc::new(LogDirBackend::new(dir.path())))
        .await
        .unwrap();
    writer.service().append("sessions", "s1", "open").await.unwrap();
    writer.flush_now().await;
    // Simulate a crash: no shutdown, directories stay unsealed
    drop(writer);

    let result = Gateway::start(&read_config(false), Arc::new(LogDirBackend::new(dir.path()))).await;
    assert!(matches!(result, Err(LifecycleError::Open { .. })));

    let reader = Gateway::start(&read_config(true), Arc::new(LogDirBackend::new(dir.path())))
        .await
        .expect("Conversion should make the directory readable");
    assert_eq!(reader.service().get("sessions", "s1").await.unwrap(), "open");
    reader.shutdown().await;
}

#[tokio::test]
async fn happy_mode_enforcement_both_ways() {
    let dir = tempfile::tempdir().unwrap();

    let writer = Gateway::start(&write_config(), Arc::new(LogDirBackend::new(dir.path())))
        .await
        .unwrap();
    let err = writer.service().get("services", "k").await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::WrongMode);
    writer.shutdown().await;

    let reader = Gateway::start(&read_config(false), Arc::new(LogDirBackend::new(dir.path())))
        .await
        .unwrap();
    let err = reader.service().append("services", "k", "v").await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::WrongMode);
    assert!(reader.cache().is_empty());
    reader.shutdown().await;
}

// =============================================================================
// Shutdown Tests
// =============================================================================

#[tokio::test]
async fn shutdown_persists_unflushed_appends() {
    let dir = tempfile::tempdir().unwrap();
    let config = GatewayConfig {
        // Far beyond the test: only the shutdown drain can flush
        flush_interval_ms: 3_600_000,
        ..Default::default()
    };

    let writer = Gateway::start(&config, Arc::new(LogDirBackend::new(dir.path())))
        .await
        .unwrap();
    for i in 0..10 {
        writer
            .service()
            .append("services", &format!("user{}", i), &format!("event{}", i))
            .await
            .unwrap();
    }
    assert_eq!(writer.cache().pending_count(), 10);

    let report = writer.shutdown().await;
    assert_eq!(report.final_flush.as_ref().unwrap().flushed(), 10);
    assert_eq!(report.unflushed, 0);

    let reader = Gateway::start(&read_config(false), Arc::new(LogDirBackend::new(dir.path())))
        .await
        .unwrap();
    for i in 0..10 {
        let value = reader.service().get("services", &format!("user{}", i)).await.unwrap();
        assert_eq!(value, format!("event{}", i));
    }
    reader.shutdown().await;
}

#[tokio::test]
async fn shutdown_after_background_flush_does_not_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    let config = GatewayConfig {
        flush_interval_ms: 20,
        ..Default::default()
    };

    let writer = Gateway::start(&config, Arc::new(LogDirBackend::new(dir.path())))
        .await
        .unwrap();
    writer.service().append("services", "user1", "login").await.unwrap();

    // Let the background task drain
    let mut waited = Duration::ZERO;
    while writer.cache().pending_count() > 0 && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    assert_eq!(writer.cache().pending_count(), 0);

    let report = writer.shutdown().await;
    assert!(report.final_flush.unwrap().is_empty());

    let reader = Gateway::start(&read_config(false), Arc::new(LogDirBackend::new(dir.path())))
        .await
        .unwrap();
    assert_eq!(reader.service().get("services", "user1").await.unwrap(), "login");
    reader.shutdown().await;
}

// =============================================================================
// RPC Tests
// =============================================================================

struct Client {
    lines: tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    write: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, write) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    async fn call(&mut self, request: Value) -> Value {
        self.send_raw(&request.to_string()).await
    }

    async fn send_raw(&mut self, line: &str) -> Value {
        self.write.write_all(format!("{}\n", line).as_bytes()).await.unwrap();
        let reply = self.lines.next_line().await.unwrap().expect("connection closed");
        serde_json::from_str(&reply).unwrap()
    }
}

#[tokio::test]
async fn happy_rpc_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let writer = Gateway::start(&write_config(), Arc::new(LogDirBackend::new(dir.path())))
        .await
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(plfs_gateway::rpc::serve(listener, writer.service(), shutdown_rx));

    let mut client = Client::connect(addr).await;

    let reply = client.call(json!({"id": "0", "method": "ping"})).await;
    assert_eq!(reply["result"], json!("pong"));

    let reply = client
        .call(json!({
            "id": "1",
            "method": "append",
            "params": {"namespace": "services", "key": "user1", "value": "login"}
        }))
        .await;
    assert_eq!(reply["id"], json!("1"));
    assert_eq!(reply["ok"], json!(true));
    assert_eq!(reply["result"]["new"], json!(true));

    let reply = client
        .call(json!({
            "id": "2",
            "method": "append_batch",
            "params": {
                "namespaces": ["services", "audit"],
                "keys": ["user1", "evt"],
                "values": ["logout", "x"]
            }
        }))
        .await;
    assert_eq!(reply["result"], json!({"applied": 2, "duplicates": 0}));

    let reply = client
        .call(json!({
            "id": "3",
            "method": "append_batch",
            "params": {"namespaces": ["services", "services", "services"], "keys": ["a", "b"], "values": ["1", "2", "3"]}
        }))
        .await;
    assert_eq!(reply["ok"], json!(false));
    assert_eq!(reply["error"]["code"], json!("BatchSizeMismatch"));

    let reply = client
        .call(json!({"id": "4", "method": "get", "params": {"namespace": "services", "key": "user1"}}))
        .await;
    assert_eq!(reply["error"]["code"], json!("WrongMode"));

    let reply = client
        .call(json!({"id": "5", "method": "append", "params": {"namespace": "nonexistent", "key": "k", "value": "v"}}))
        .await;
    assert_eq!(reply["error"]["code"], json!("UnknownNamespace"));

    // Garbage does not kill the connection
    let reply = client.send_raw("{{{").await;
    assert_eq!(reply["error"]["code"], json!("BadRequest"));
    let reply = client.call(json!({"id": "6", "method": "ping"})).await;
    assert_eq!(reply["ok"], json!(true));

    shutdown_tx.send(true).unwrap();
    server.await.unwrap().unwrap();

    let report = writer.shutdown().await;
    assert_eq!(report.final_flush.unwrap().get("services", "user1").unwrap().flushed, 2);

    let reader = Gateway::start(&read_config(false), Arc::new(LogDirBackend::new(dir.path())))
        .await
        .unwrap();
    let value = reader.service().get("services", "user1").await.unwrap();
    assert!(value.contains("login") && value.contains("logout"));
    reader.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn happy_concurrent_appends_all_visible() {
    let dir = tempfile::tempdir().unwrap();
    let writer = Gateway::start(&write_config(), Arc::new(LogDirBackend::new(dir.path())))
        .await
        .unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..64 {
        let service = writer.service();
        tasks.spawn(async move {
            service.append("services", "shared", &format!("[v{}]", i)).await.unwrap();
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    let joined = writer.cache().lookup("services", "shared").unwrap();
    for i in 0..64 {
        assert_eq!(joined.matches(&format!("[v{}]", i)).count(), 1);
    }

    let report = writer.shutdown().await;
    assert_eq!(report.final_flush.unwrap().flushed(), 64);
}

#[tokio::test]
async fn happy_oversized_line_rejected_and_connection_survives() {
    let writer = Gateway::start(&write_config(), Arc::new(plfs_gateway::MemoryBackend::new()))
        .await
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(plfs_gateway::rpc::serve(listener, writer.service(), shutdown_rx));

    let mut client = Client::connect(addr).await;
    let huge = "x".repeat(plfs_gateway::rpc::MAX_LINE_BYTES + 10);
    let reply = client.send_raw(&huge).await;
    assert_eq!(reply["ok"], json!(false));
    assert_eq!(reply["error"]["code"], json!("BadRequest"));

    let reply = client.call(json!({"id": "after", "method": "ping"})).await;
    assert_eq!(reply["id"], json!("after"));
    assert_eq!(reply["result"], json!("pong"));

    shutdown_tx.send(true).unwrap();
    server.await.unwrap().unwrap();
    writer.shutdown().await;
}

// =============================================================================
// Failure-path Shutdown Tests
// =============================================================================

#[tokio::test]
async fn shutdown_runs_when_signal_wait_fails_and_reseals_directories() {
    let dir = tempfile::tempdir().unwrap();

    // A clean first run leaves every directory sealed
    let first = Gateway::start(&write_config(), Arc::new(LogDirBackend::new(dir.path())))
        .await
        .unwrap();
    first.service().append("services", "user1", "login").await.unwrap();
    first.shutdown().await;

    // Second writer whose signal wait fails right away
    let second = Gateway::start(&write_config(), Arc::new(LogDirBackend::new(dir.path())))
        .await
        .unwrap();
    second.service().append("services", "user1", "logout").await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let signal = async { Err(std::io::Error::new(std::io::ErrorKind::Other, "signal unavailable")) };
    let (report, signal) = second.serve_until(listener, signal).await;
    assert!(signal.is_err());
    assert_eq!(report.unflushed, 0);
    assert_eq!(report.errors, 0);

    // No conversion needed
    let reader = Gateway::start(&read_config(false), Arc::new(LogDirBackend::new(dir.path())))
        .await
        .expect("Directories should be sealed again");
    let value = reader.service().get("services", "user1").await.unwrap();
    assert!(value.contains("login") && value.contains("logout"));
    reader.shutdown().await;
}

#[tokio::test]
async fn shutdown_refuses_late_appends_instead_of_losing_them() {
    let dir = tempfile::tempdir().unwrap();
    let writer = Gateway::start(&write_config(), Arc::new(LogDirBackend::new(dir.path())))
        .await
        .unwrap();
    let service = writer.service();
    writer.shutdown().await;

    let err = service.append("services", "late", "value").await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::ShuttingDown);
    assert_eq!(err.kind().code(), "ShuttingDown");
    assert_eq!(service.cache().pending_count(), 0);
}
