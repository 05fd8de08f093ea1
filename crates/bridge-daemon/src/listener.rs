//! Adapts an `axum` WebSocket to the `bridge_core` transport traits and
//! hands each accepted socket to [`bridge_core::accept`].

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bridge_core::{
    AuditSink, CoreError, Hub, InboundEvent, LifecycleReporter, RequestBroker, ServerRegistry,
    SessionConfig, TransportError, TransportMessage,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub registry: Arc<dyn ServerRegistry>,
    pub audit: Arc<dyn AuditSink>,
    pub session_config: SessionConfig,
    pub event_tx: mpsc::UnboundedSender<InboundEvent>,
    pub reporter: Arc<LifecycleReporter>,
    pub max_frame_bytes: usize,
}

impl AppState {
    pub fn broker(&self) -> RequestBroker {
        RequestBroker::new(self.hub.clone())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/servers", get(snapshot_handler))
        .route("/servers/{server_id}/execute", post(execute_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    op: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ExecuteResponse {
    Success { success: bool, data: serde_json::Value },
    Failure { success: bool, error: ExecuteError },
}

#[derive(Debug, Serialize)]
struct ExecuteError {
    code: String,
    message: String,
}

/// The operator-facing path through the Request Broker: resolve the
/// session, pre-flight the capability, await the correlated response.
async fn execute_handler(
    Path(server_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> impl IntoResponse {
    let outcome = state
        .broker()
        .execute(&server_id, &request.op, request.data, Duration::from_millis(request.timeout_ms))
        .await;

    match outcome {
        Ok(data) => (StatusCode::OK, Json(ExecuteResponse::Success { success: true, data })),
        Err(err) => (
            status_for(&err),
            Json(ExecuteResponse::Failure {
                success: false,
                error: ExecuteError {
                    code: err.code().to_string(),
                    message: err.to_string(),
                },
            }),
        ),
    }
}

fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::UnsupportedCapability => StatusCode::BAD_REQUEST,
        CoreError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        CoreError::ConnectionLost { .. } | CoreError::Superseded => StatusCode::BAD_GATEWAY,
        CoreError::RemoteError { .. } => StatusCode::BAD_GATEWAY,
        CoreError::MalformedFrame(_) | CoreError::AuthFailed | CoreError::AuthTimeout => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerSnapshot {
    server_id: String,
    state: String,
    connected_since_ms: u128,
    last_seen_at_ms: u128,
}

async fn snapshot_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshots: Vec<ServerSnapshot> = state
        .hub
        .snapshot()
        .into_iter()
        .map(|s| ServerSnapshot {
            server_id: s.server_id,
            state: format!("{:?}", s.state),
            connected_since_ms: epoch_millis(s.connected_since),
            last_seen_at_ms: epoch_millis(s.last_seen_at),
        })
        .collect();
    Json(snapshots)
}

fn epoch_millis(t: std::time::SystemTime) -> u128 {
    t.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let max_frame_bytes = state.max_frame_bytes;
    ws.max_frame_size(max_frame_bytes)
        .max_message_size(max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, remote_addr, state))
}

async fn handle_socket(socket: WebSocket, remote_addr: SocketAddr, state: AppState) {
    let (sink, stream) = socket.split();
    let reader = AxumReader(stream);
    let writer = AxumWriter(sink);

    let outcome = bridge_core::accept(
        reader,
        writer,
        remote_addr,
        state.registry.clone(),
        state.audit.clone(),
        state.hub.clone(),
        state.session_config.clone(),
        state.event_tx.clone(),
        Some(state.reporter.clone()),
    )
    .await;

    match outcome {
        Some(outcome) => {
            tracing::info!(
                server_id = outcome.server_id,
                reason = outcome.close_reason.as_str(),
                "connection closed"
            );
        }
        None => {
            tracing::debug!(%remote_addr, "connection closed before a session was established");
        }
    }
}

struct AxumReader(SplitStream<WebSocket>);

impl Stream for AxumReader {
    type Item = Result<TransportMessage, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            return match Pin::new(&mut self.0).poll_next(cx) {
                Poll::Ready(Some(Ok(Message::Text(text)))) => {
                    Poll::Ready(Some(Ok(TransportMessage::Text(text.to_string()))))
                }
                Poll::Ready(Some(Ok(Message::Close(_)))) => Poll::Ready(Some(Ok(TransportMessage::Close))),
                // Ping/pong are answered by axum itself; stray binary frames have
                // no meaning in U-WBP v2 and are dropped without closing the socket.
                Poll::Ready(Some(Ok(_))) => continue,
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(TransportError::Read(e.to_string())))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            };
        }
    }
}

struct AxumWriter(SplitSink<WebSocket, Message>);

impl Sink<TransportMessage> for AxumWriter {
    type Error = TransportError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.0)
            .poll_ready(cx)
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    fn start_send(mut self: Pin<&mut Self>, item: TransportMessage) -> Result<(), Self::Error> {
        let message = match item {
            TransportMessage::Text(text) => Message::Text(text.into()),
            TransportMessage::Close => Message::Close(None),
        };
        Pin::new(&mut self.0)
            .start_send(message)
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.0)
            .poll_flush(cx)
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.0)
            .poll_close(cx)
            .map_err(|e| TransportError::Write(e.to_string()))
    }
}
