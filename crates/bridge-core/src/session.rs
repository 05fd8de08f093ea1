//! One session per connected server: owns the pending-request table and
//! the outbound send queue, and runs the reader/writer/heartbeat loop.
//!
//! `Connecting`/`Authenticating` are not represented on this struct — a
//! `Session` is only constructed once a handshake has already succeeded
//! (see [`crate::connection::accept`]), so it starts life `Active`. The
//! Hub and Request Broker never observe a session in an earlier phase;
//! nothing in the testable properties requires they do.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use bridge_protocol::{Capability, CapabilitySet, Frame, RequestFrame, PROTOCOL_VERSION};
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use crate::error::{CloseReason, CoreError};
use crate::pending::PendingTable;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Active,
    Draining,
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub default_request_timeout: Duration,
    pub max_pending_per_session: usize,
    pub clock_tolerance: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            default_request_timeout: Duration::from_secs(30),
            max_pending_per_session: 1024,
            clock_tolerance: Duration::from_secs(30),
        }
    }
}

/// An inbound event frame, augmented the way the Event Dispatcher requires.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub server_id: String,
    pub op: String,
    pub data: Value,
    pub received_at: SystemTime,
}

struct StateRecord {
    state: SessionState,
    last_seen_at: SystemTime,
    connected_since: SystemTime,
    close_reason: Option<CloseReason>,
}

/// A connected, authenticated server. Cheap to clone via `Arc`; the Hub,
/// Request Broker and connection-runner all share the same instance.
pub struct Session {
    server_id: String,
    remote_addr: String,
    capabilities: CapabilitySet,
    protocol_version: String,
    config: SessionConfig,
    outbound_tx: mpsc::UnboundedSender<Frame>,
    pending: PendingTable,
    record: RwLock<StateRecord>,
    next_request_id: AtomicU64,
    shutdown: Notify,
}

impl Session {
    pub fn new(
        server_id: String,
        remote_addr: String,
        capabilities: CapabilitySet,
        protocol_version: String,
        config: SessionConfig,
        outbound_tx: mpsc::UnboundedSender<Frame>,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            server_id,
            remote_addr,
            capabilities,
            protocol_version,
            config,
            outbound_tx,
            pending: PendingTable::new(),
            record: RwLock::new(StateRecord {
                state: SessionState::Active,
                last_seen_at: now,
                connected_since: now,
                close_reason: None,
            }),
            next_request_id: AtomicU64::new(0),
            shutdown: Notify::new(),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub fn state(&self) -> SessionState {
        self.record.read().expect("session record poisoned").state
    }

    pub fn last_seen_at(&self) -> SystemTime {
        self.record.read().expect("session record poisoned").last_seen_at
    }

    pub fn connected_since(&self) -> SystemTime {
        self.record
            .read()
            .expect("session record poisoned")
            .connected_since
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.record.read().expect("session record poisoned").close_reason
    }

    fn touch(&self) {
        self.record.write().expect("session record poisoned").last_seen_at = SystemTime::now();
    }

    /// Enqueues `frame` for the writer. FIFO per session; fails only once
    /// the session has already closed.
    pub fn send(&self, frame: Frame) -> Result<(), CoreError> {
        self.outbound_tx
            .send(frame)
            .map_err(|_| CoreError::ConnectionLost {
                reason: "closed".to_string(),
            })
    }

    fn fresh_request_id(&self) -> String {
        format!("br-{}", self.next_request_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Sends a request and awaits its correlated response under `timeout`.
    ///
    /// If this future is dropped or aborted before it resolves — the
    /// caller lost a `tokio::select!` race, or aborted the `JoinHandle` it
    /// was spawned on — the waiter it installed is removed from the
    /// pending table by `PendingGuard`'s `Drop`, not left to linger until a
    /// late response (if one ever arrives) clears it.
    pub async fn request(
        &self,
        op: &str,
        data: Value,
        timeout: Duration,
    ) -> Result<Frame, CoreError> {
        if self.state() != SessionState::Active {
            return Err(CoreError::NotConnected);
        }
        if self.pending.len() >= self.config.max_pending_per_session {
            return Err(CoreError::ConnectionLost {
                reason: "pending_table_full".to_string(),
            });
        }

        let id = self.fresh_request_id();
        let rx = self.pending.install(id.clone());
        let mut guard = PendingGuard {
            pending: &self.pending,
            id: &id,
            disarmed: false,
        };
        let frame = Frame::Request(RequestFrame {
            id: id.clone(),
            op: op.to_string(),
            data,
            timestamp: now_ms(),
            version: PROTOCOL_VERSION.to_string(),
        });

        if self.send(frame).is_err() {
            guard.disarm();
            self.pending.cancel(&id);
            return Err(CoreError::ConnectionLost {
                reason: "closed".to_string(),
            });
        }

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_recv_dropped)) => Err(CoreError::ConnectionLost {
                reason: "closed".to_string(),
            }),
            Err(_elapsed) => {
                self.pending.fail(&id, CoreError::Timeout);
                Err(CoreError::Timeout)
            }
        };
        guard.disarm();
        outcome
    }

    /// Abandons an outstanding wait by id. In practice, dropping or
    /// aborting the `request`/`execute` future (see `PendingGuard`) is how
    /// cancellation actually happens, since the id it installed is never
    /// handed back to the caller; this remains for callers that do track
    /// an id through some other channel.
    pub fn cancel_request(&self, id: &str) {
        self.pending.cancel(id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Idempotent. Drains `pendingById`, cancels the heartbeat, and wakes
    /// the run loop so it tears down the socket.
    pub fn close(&self, reason: CloseReason) {
        {
            let mut record = self.record.write().expect("session record poisoned");
            if record.state == SessionState::Closed || record.state == SessionState::Draining {
                return;
            }
            record.state = SessionState::Draining;
            record.close_reason = Some(reason);
        }
        self.pending.fail_all(reason.into_core_error());
        self.shutdown.notify_waiters();
    }

    fn mark_closed(&self) {
        self.record.write().expect("session record poisoned").state = SessionState::Closed;
    }
}

/// Removes a pending-table waiter on drop unless [`disarm`](Self::disarm)
/// was called first. Covers the case `request`'s own timeout branch can't:
/// the *outer* future (the one `request` returns) getting dropped or
/// aborted while the table entry is still installed.
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    id: &'a str,
    disarmed: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.disarmed = true;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.disarmed {
            self.pending.cancel(self.id);
        }
    }
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Drives one session's reader, writer and heartbeat concurrently until it
/// closes, then returns the reason. `reader`/`writer` are the transport
/// halves; `event_tx` forwards decoded event frames to the dispatcher;
/// `outbound_rx` is the other end of the session's send queue.
pub async fn run_loop(
    session: std::sync::Arc<Session>,
    mut reader: impl crate::transport::IncomingTransport,
    mut writer: impl crate::transport::OutgoingTransport,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
    event_tx: mpsc::UnboundedSender<InboundEvent>,
    reporter: Option<std::sync::Arc<crate::reporter::LifecycleReporter>>,
) -> CloseReason {
    use crate::transport::TransportMessage;
    use futures_util::{SinkExt, StreamExt};

    let tolerance = session.config.heartbeat_interval * 2;
    let mut idle_deadline = Instant::now() + tolerance;
    let mut heartbeat_tick = tokio::time::interval(session.config.heartbeat_interval);
    heartbeat_tick.tick().await; // first tick fires immediately; consume it

    loop {
        tokio::select! {
            biased;

            _ = session.shutdown.notified() => {
                break;
            }

            _ = tokio::time::sleep_until(idle_deadline) => {
                tracing::warn!(server_id = %session.server_id, "heartbeat timeout, closing session");
                session.close(CloseReason::HeartbeatTimeout);
                break;
            }

            _ = heartbeat_tick.tick() => {
                if let Some(reporter) = &reporter {
                    reporter.refresh_last_seen(&session.server_id);
                }
                let ping = Frame::System(bridge_protocol::SystemFrame {
                    system_op: bridge_protocol::SystemOp::Ping,
                    id: None,
                    data: serde_json::json!({}),
                    timestamp: now_ms(),
                    version: PROTOCOL_VERSION.to_string(),
                });
                if writer.send(TransportMessage::Text(match bridge_protocol::encode(&ping) {
                    Ok(text) => text,
                    Err(_) => continue,
                })).await.is_err() {
                    session.close(CloseReason::WriteError);
                    break;
                }
            }

            outbound = outbound_rx.recv() => {
                let Some(frame) = outbound else {
                    // Sender side was dropped; nothing more will ever be enqueued.
                    session.close(CloseReason::WriteError);
                    break;
                };
                let encoded = match bridge_protocol::encode(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping frame that failed to encode");
                        continue;
                    }
                };
                if writer.send(TransportMessage::Text(encoded)).await.is_err() {
                    tracing::warn!(server_id = %session.server_id, "write failed, closing session");
                    session.close(CloseReason::WriteError);
                    break;
                }
            }

            incoming = reader.next() => {
                match incoming {
                    Some(Ok(TransportMessage::Text(text))) => {
                        idle_deadline = Instant::now() + tolerance;
                        session.touch();
                        handle_inbound(&session, &text, &event_tx, &mut writer).await;
                    }
                    Some(Ok(TransportMessage::Close)) | None => {
                        session.close(CloseReason::ReadError);
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(server_id = %session.server_id, error = %e, "read error, closing session");
                        session.close(CloseReason::ReadError);
                        break;
                    }
                }
            }
        }
    }

    session.mark_closed();
    session.close_reason().unwrap_or(CloseReason::ReadError)
}

async fn handle_inbound(
    session: &Session,
    text: &str,
    event_tx: &mpsc::UnboundedSender<InboundEvent>,
    writer: &mut impl crate::transport::OutgoingTransport,
) {
    use crate::transport::TransportMessage;
    use futures_util::SinkExt;

    let frame = match bridge_protocol::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(server_id = %session.server_id(), error = %e, "dropping malformed frame");
            return;
        }
    };

    bridge_protocol::warn_on_clock_skew(
        &frame,
        now_ms(),
        session.config.clock_tolerance.as_millis() as i64,
    );

    match frame {
        Frame::System(system) => match system.system_op {
            bridge_protocol::SystemOp::Pong => {}
            bridge_protocol::SystemOp::Ping => {
                let pong = Frame::System(bridge_protocol::SystemFrame {
                    system_op: bridge_protocol::SystemOp::Pong,
                    id: None,
                    data: serde_json::json!({}),
                    timestamp: now_ms(),
                    version: PROTOCOL_VERSION.to_string(),
                });
                if let Ok(text) = bridge_protocol::encode(&pong) {
                    let _ = writer.send(TransportMessage::Text(text)).await;
                }
            }
            bridge_protocol::SystemOp::Disconnect => {
                session.close(CloseReason::ReadError);
            }
            bridge_protocol::SystemOp::Handshake => {
                tracing::debug!(server_id = %session.server_id(), "ignoring re-handshake on an active session");
            }
        },
        Frame::Response(response) => {
            let id = response.id.clone();
            if !session.pending.resolve(&id, Frame::Response(response)) {
                tracing::debug!(server_id = %session.server_id(), id, "response with no matching waiter, dropped");
            }
        }
        Frame::Event(event) => {
            let _ = event_tx.send(InboundEvent {
                server_id: session.server_id().to_string(),
                op: event.op,
                data: event.data,
                received_at: SystemTime::now(),
            });
        }
        Frame::Request(request) => {
            tracing::debug!(server_id = %session.server_id(), op = %request.op, "rejecting server-initiated request");
            let rejection = Frame::Response(bridge_protocol::ResponseFrame {
                id: request.id,
                success: false,
                data: None,
                error: Some(bridge_protocol::ErrorPayload {
                    code: "unexpected_request".to_string(),
                    message: "the bridge does not accept server-initiated management requests"
                        .to_string(),
                }),
                timestamp: now_ms(),
                version: PROTOCOL_VERSION.to_string(),
            });
            if let Ok(text) = bridge_protocol::encode(&rejection) {
                let _ = writer.send(TransportMessage::Text(text)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::mock_pair;
    use bridge_protocol::Capability;
    use std::sync::Arc;

    fn test_config() -> SessionConfig {
        SessionConfig {
            handshake_timeout: Duration::from_millis(50),
            heartbeat_interval: Duration::from_millis(50),
            default_request_timeout: Duration::from_millis(200),
            max_pending_per_session: 16,
            clock_tolerance: Duration::from_secs(30),
        }
    }

    fn spawn_session() -> (
        Arc<Session>,
        crate::transport::testing::MockPeer,
        mpsc::UnboundedReceiver<InboundEvent>,
    ) {
        let (endpoint, peer) = mock_pair();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(
            "srv1".into(),
            "127.0.0.1:1234".into(),
            [Capability::CommandExecution].into_iter().collect(),
            "2.0".into(),
            test_config(),
            outbound_tx,
        ));
        let session_for_loop = session.clone();
        tokio::spawn(async move {
            run_loop(session_for_loop, endpoint.reader, endpoint.writer, outbound_rx, event_tx, None).await;
        });
        (session, peer, event_rx)
    }

    #[tokio::test]
    async fn happy_path_request_resolves_and_clears_pending() {
        let (session, mut peer, _events) = spawn_session();
        let session_clone = session.clone();
        let call = tokio::spawn(async move {
            session_clone
                .request("command.execute", serde_json::json!({"command":"list"}), Duration::from_secs(5))
                .await
        });

        let sent = peer.recv_text().await.expect("request frame sent");
        let Frame::Request(req) = bridge_protocol::decode(&sent).unwrap() else {
            panic!("expected request frame");
        };
        let response = Frame::Response(bridge_protocol::ResponseFrame {
            id: req.id,
            success: true,
            data: Some(serde_json::json!({"output": ["3 players"], "executionTime": 12})),
            error: None,
            timestamp: now_ms(),
            version: "2.0".into(),
        });
        peer.send_text(bridge_protocol::encode(&response).unwrap());

        let result = call.await.unwrap();
        assert!(matches!(result, Ok(Frame::Response(r)) if r.success));
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn remote_failure_is_not_translated_here_broker_does_that() {
        let (session, mut peer, _events) = spawn_session();
        let session_clone = session.clone();
        let call = tokio::spawn(async move {
            session_clone
                .request("command.execute", serde_json::json!({}), Duration::from_secs(5))
                .await
        });
        let sent = peer.recv_text().await.unwrap();
        let Frame::Request(req) = bridge_protocol::decode(&sent).unwrap() else {
            panic!()
        };
        let response = Frame::Response(bridge_protocol::ResponseFrame {
            id: req.id,
            success: false,
            data: None,
            error: Some(bridge_protocol::ErrorPayload {
                code: "command_blacklisted".into(),
                message: "stop is forbidden".into(),
            }),
            timestamp: now_ms(),
            version: "2.0".into(),
        });
        peer.send_text(bridge_protocol::encode(&response).unwrap());
        let result = call.await.unwrap().unwrap();
        let Frame::Response(r) = result else { panic!() };
        assert!(!r.success);
        assert_eq!(r.error.unwrap().code, "command_blacklisted");
    }

    #[tokio::test]
    async fn timeout_removes_waiter_and_drops_late_response() {
        let (session, mut peer, _events) = spawn_session();
        let session_clone = session.clone();
        let call = session_clone.request(
            "command.execute",
            serde_json::json!({}),
            Duration::from_millis(30),
        );
        let result = call.await;
        assert!(matches!(result, Err(CoreError::Timeout)));
        assert_eq!(session.pending_count(), 0);

        // A late response for an id that's no longer pending must not panic.
        let sent = peer.recv_text().await.unwrap();
        let Frame::Request(req) = bridge_protocol::decode(&sent).unwrap() else {
            panic!()
        };
        let late = Frame::Response(bridge_protocol::ResponseFrame {
            id: req.id,
            success: true,
            data: Some(serde_json::json!({})),
            error: None,
            timestamp: now_ms(),
            version: "2.0".into(),
        });
        peer.send_text(bridge_protocol::encode(&late).unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn close_fails_all_pending_with_connection_lost() {
        let (session, _peer, _events) = spawn_session();
        let session_clone = session.clone();
        let call = tokio::spawn(async move {
            session_clone
                .request("command.execute", serde_json::json!({}), Duration::from_secs(5))
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.close(CloseReason::Superseded);
        let result = call.await.unwrap();
        assert!(matches!(result, Err(CoreError::Superseded)));
    }

    #[tokio::test]
    async fn aborting_an_in_flight_request_removes_the_waiter() {
        let (session, mut peer, _events) = spawn_session();
        let session_clone = session.clone();
        let call = tokio::spawn(async move {
            session_clone
                .request("command.execute", serde_json::json!({}), Duration::from_secs(5))
                .await
        });

        // Let the request actually reach the pending table before abandoning it.
        let _sent = peer.recv_text().await.expect("request frame sent");
        assert_eq!(session.pending_count(), 1);

        call.abort();
        let _ = call.await;

        assert_eq!(
            session.pending_count(),
            0,
            "PendingGuard must clear the waiter when the request future is aborted"
        );
    }

    #[tokio::test]
    async fn inbound_event_is_forwarded_with_server_id() {
        let (session, mut peer, mut events) = spawn_session();
        let event = Frame::Event(bridge_protocol::EventFrame {
            op: "player.join".into(),
            data: serde_json::json!({"player": "steve"}),
            timestamp: now_ms(),
            version: "2.0".into(),
        });
        peer.send_text(bridge_protocol::encode(&event).unwrap());
        let received = events.recv().await.unwrap();
        assert_eq!(received.server_id, session.server_id());
        assert_eq!(received.op, "player.join");
        let _ = peer.recv_text(); // drain, avoid unused warning in some configs
    }
}
