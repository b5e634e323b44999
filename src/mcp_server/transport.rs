//! HTTP transport: `POST /mcp` and `GET /health`.
//!
//! The listener runs on its own thread with its own tokio runtime so the
//! owner thread (usually the process main thread) stays free to drain the
//! bridge queue. Each request body is dispatched on the runtime's blocking
//! pool because tool calls may wait on the owner thread.

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::oneshot;

use super::dispatcher::Dispatcher;
use super::errors::{RpcError, TransportError};
use super::types::{HttpReply, JsonRpcResponse};

pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
    host: String,
    port: u16,
    local_addr: Option<SocketAddr>,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
    /// Cleared by the server thread when it exits, for whatever reason.
    serving: Arc<AtomicBool>,
}

impl McpServer {
    /// A stopped server. Port 0 picks a free port on `start`.
    pub fn new(dispatcher: Arc<Dispatcher>, host: &str, port: u16) -> Self {
        Self {
            dispatcher,
            host: host.to_string(),
            port,
            local_addr: None,
            shutdown: None,
            join: None,
            serving: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The axum app, without a listener.
    pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
        Router::new()
            .route("/mcp", post(handle_mcp))
            .route("/health", get(handle_health))
            .with_state(dispatcher)
    }

    /// Bind and start serving. Bind failures are returned here, not logged
    /// from the server thread.
    pub fn start(&mut self) -> Result<SocketAddr, TransportError> {
        if self.is_running() {
            return Err(TransportError::AlreadyRunning { port: self.port() });
        }
        // Reap a server thread that exited on its own.
        self.stop();

        let addr = format!("{}:{}", self.host, self.port);
        let listener = StdTcpListener::bind(&addr).map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "failed to bind MCP transport");
            TransportError::BindFailed {
                addr: addr.clone(),
                reason: e.to_string(),
            }
        })?;
        let bind_err = |e: std::io::Error| TransportError::BindFailed {
            addr: addr.clone(),
            reason: e.to_string(),
        };
        listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("mcp-transport")
            .enable_all()
            .build()
            .map_err(|e| TransportError::RuntimeFailed {
                reason: e.to_string(),
            })?;

        let app = Self::router(Arc::clone(&self.dispatcher));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        let serving = Arc::clone(&self.serving);
        serving.store(true, Ordering::SeqCst);

        let join = thread::Builder::new()
            .name("mcp-server".into())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(l) => l,
                        Err(e) => {
                            let _ = ready_tx.send(Err(format!("failed to adopt listener: {e}")));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                        let _ = shutdown_rx.await;
                    });
                    if let Err(e) = server.await {
                        tracing::error!(error = %e, "MCP transport exited with error");
                    }
                });
                serving.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.serving.store(false, Ordering::SeqCst);
                TransportError::RuntimeFailed {
                    reason: e.to_string(),
                }
            })?;

        let startup = ready_rx
            .recv()
            .unwrap_or_else(|_| Err("server thread exited during startup".into()));
        if let Err(reason) = startup {
            tracing::error!(addr = %local_addr, reason = %reason, "MCP transport failed to start");
            if join.join().is_err() {
                tracing::warn!("MCP server thread panicked during startup");
            }
            self.serving.store(false, Ordering::SeqCst);
            return Err(TransportError::RuntimeFailed { reason });
        }

        self.local_addr = Some(local_addr);
        self.shutdown = Some(shutdown_tx);
        self.join = Some(join);
        tracing::info!(addr = %local_addr, "MCP transport listening");
        Ok(local_addr)
    }

    /// Trigger graceful shutdown and wait for the server thread.
    pub fn stop(&mut self) {
        let Some(shutdown) = self.shutdown.take() else {
            return;
        };
        let _ = shutdown.send(());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::warn!("MCP server thread panicked during shutdown");
            }
        }
        tracing::info!(port = self.port(), "MCP transport stopped");
        self.local_addr = None;
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_some() && self.serving.load(Ordering::SeqCst)
    }

    /// The bound port while running, the configured one otherwise.
    pub fn port(&self) -> u16 {
        self.local_addr.map_or(self.port, |a| a.port())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Drop for McpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_mcp(State(dispatcher): State<Arc<Dispatcher>>, body: Bytes) -> Response {
    let reply = tokio::task::spawn_blocking(move || dispatcher.handle_body(&body)).await;
    match reply {
        Ok(HttpReply::Accepted) => StatusCode::ACCEPTED.into_response(),
        Ok(HttpReply::Json(value)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            value.to_string(),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "dispatch task failed");
            let err = RpcError::Internal {
                reason: e.to_string(),
            };
            let body = JsonRpcResponse::failure(serde_json::Value::Null, &err).to_value();
            (StatusCode::OK, Json(body)).into_response()
        }
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// ─── Tests ──────────────────────────────────────────────────────────────────
