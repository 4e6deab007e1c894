//! Health & status API endpoints.
//!
//! - GET /health - simple health check
//! - GET /metrics - Prometheus metrics
//! - GET /status - uptime, cursor position, unlock queue counts

use eyre::Result;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use crate::db::BridgeStore;
use crate::metrics;
use crate::types::UnlockStatus;

/// Server start time for uptime calculation
static START_TIME: OnceLock<Instant> = OnceLock::new();

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    uptime_seconds: u64,
    chain: String,
    handled_height: Option<i64>,
    queues: QueueStatus,
}

#[derive(Serialize)]
struct QueueStatus {
    todo_unlocks: i64,
    pending_unlocks: i64,
    error_unlocks: i64,
}

/// Start the API server (combines metrics and status endpoints)
pub async fn start_api_server<S: BridgeStore>(
    addr: SocketAddr,
    store: Arc<S>,
    chain_tag: String,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server started");

    let _ = START_TIME.set(Instant::now());
    metrics::UP.set(1.0);

    loop {
        let (mut socket, _) = listener.accept().await?;
        let store = store.clone();
        let chain_tag = chain_tag.clone();

        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            if socket.readable().await.is_ok() {
                let _ = socket.try_read(&mut buf);
            }

            let request = String::from_utf8_lossy(&buf);

            if request.contains("GET /metrics") {
                let body = metrics::gather_metrics();
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            } else if request.contains("GET /health") {
                let response =
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nOK";
                let _ = socket.write_all(response.as_bytes()).await;
            } else if request.contains("GET /status") {
                let status = build_status_response(store.as_ref(), &chain_tag).await;
                let body = serde_json::to_string(&status).unwrap_or_else(|_| "{}".to_string());
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            } else {
                let response = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
    }
}

async fn build_status_response<S: BridgeStore>(store: &S, chain_tag: &str) -> StatusResponse {
    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);

    let handled_height = store
        .cursor(chain_tag)
        .await
        .ok()
        .flatten()
        .map(|c| c.height);

    let queues = QueueStatus {
        todo_unlocks: store.count_unlocks(UnlockStatus::Todo).await.unwrap_or(0),
        pending_unlocks: store
            .count_unlocks(UnlockStatus::Pending)
            .await
            .unwrap_or(0),
        error_unlocks: store.count_unlocks(UnlockStatus::Error).await.unwrap_or(0),
    };

    StatusResponse {
        status: "ok".to_string(),
        uptime_seconds: uptime,
        chain: chain_tag.to_string(),
        handled_height,
        queues,
    }
}
