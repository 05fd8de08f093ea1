//! Orchestrates one incoming socket from the moment it's accepted through
//! the handshake and into the Session run loop. This is where
//! `Connecting`/`Authenticating` live conceptually — before a
//! [`Session`] exists there is nothing on the Hub to observe those states.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bridge_protocol::{
    Frame, HandshakeAck, HandshakePayload, SystemFrame, SystemOp, PROTOCOL_VERSION,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::authenticator::{self, HandshakeOutcome};
use crate::error::CloseReason;
use crate::hub::Hub;
use crate::reporter::LifecycleReporter;
use crate::session::{self, InboundEvent, Session, SessionConfig};
use crate::storage::{AuditSink, ServerRegistry};
use crate::transport::{IncomingTransport, OutgoingTransport, TransportMessage};

pub struct AcceptOutcome {
    pub server_id: String,
    pub close_reason: CloseReason,
}

/// Drives one connection end to end: waits for the opening handshake,
/// authenticates it, installs the resulting session into `hub`, and then
/// runs that session until it closes. Returns `None` if the connection
/// never produced an authenticated session (bad handshake, timeout, dead
/// socket) — there is nothing to report to the Hub in that case.
pub async fn accept(
    mut reader: impl IncomingTransport,
    mut writer: impl OutgoingTransport,
    remote_addr: SocketAddr,
    registry: Arc<dyn ServerRegistry>,
    audit: Arc<dyn AuditSink>,
    hub: Arc<Hub>,
    session_config: SessionConfig,
    event_tx: mpsc::UnboundedSender<InboundEvent>,
    reporter: Option<Arc<LifecycleReporter>>,
) -> Option<AcceptOutcome> {
    let handshake_timeout = session_config.handshake_timeout;

    let payload = match read_handshake(&mut reader, handshake_timeout).await {
        Ok(payload) => payload,
        Err(()) => return None,
    };

    let outcome = authenticator::authenticate(&payload, remote_addr, registry.as_ref(), audit.as_ref(), |id| {
        hub.lookup(id).is_ok()
    });

    let negotiated = match outcome {
        Ok(negotiated) => negotiated,
        Err(reason) => {
            let _ = send_handshake_ack(&mut writer, HandshakeAck {
                success: false,
                capabilities: None,
                reason: Some(reason.as_str().to_string()),
            })
            .await;
            return None;
        }
    };

    let HandshakeOutcome {
        server_id,
        capabilities,
        protocol_version,
        ..
    } = negotiated;

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let session = Arc::new(Session::new(
        server_id.clone(),
        remote_addr.to_string(),
        capabilities.clone(),
        protocol_version,
        session_config,
        outbound_tx,
    ));

    if hub.install(session.clone()).is_err() {
        let _ = send_handshake_ack(&mut writer, HandshakeAck {
            success: false,
            capabilities: None,
            reason: Some("hub_shutting_down".to_string()),
        })
        .await;
        return None;
    }

    let ack_sent = send_handshake_ack(&mut writer, HandshakeAck {
        success: true,
        capabilities: Some(capabilities.iter().map(|c| c.as_str().to_string()).collect()),
        reason: None,
    })
    .await
    .is_ok();

    if !ack_sent {
        session.close(CloseReason::WriteError);
        hub.remove(&session);
        return None;
    }

    let close_reason = session::run_loop(session.clone(), reader, writer, outbound_rx, event_tx, reporter).await;
    hub.remove(&session);

    Some(AcceptOutcome {
        server_id,
        close_reason,
    })
}

/// Waits for the first frame and requires it to be a `system/handshake`
/// within `timeout`. Anything else — wrong frame type, malformed JSON, a
/// dead socket, or the deadline firing — is an `auth_timeout`.
async fn read_handshake(
    reader: &mut impl IncomingTransport,
    timeout: Duration,
) -> Result<HandshakePayload, ()> {
    let message = match tokio::time::timeout(timeout, reader.next()).await {
        Ok(Some(Ok(TransportMessage::Text(text)))) => text,
        _ => return Err(()),
    };

    let frame = bridge_protocol::decode(&message).map_err(|_| ())?;
    let Frame::System(system) = frame else {
        return Err(());
    };
    if system.system_op != SystemOp::Handshake {
        return Err(());
    }

    serde_json::from_value(system.data).map_err(|_| ())
}

async fn send_handshake_ack(
    writer: &mut impl OutgoingTransport,
    ack: HandshakeAck,
) -> Result<(), ()> {
    let frame = Frame::System(SystemFrame {
        system_op: SystemOp::Handshake,
        id: None,
        data: serde_json::to_value(ack).expect("HandshakeAck always serializes"),
        timestamp: session::now_ms(),
        version: PROTOCOL_VERSION.to_string(),
    });
    let encoded = bridge_protocol::encode(&frame).map_err(|_| ())?;
    writer.send(TransportMessage::Text(encoded)).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryStorage, ServerRecord, ServerStatus};
    use crate::transport::testing::mock_pair;
    use bridge_protocol::ServerInfo;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 25565)
    }

    fn handshake_text(server_id: &str, token: &str) -> String {
        let frame = Frame::System(SystemFrame {
            system_op: SystemOp::Handshake,
            id: None,
            data: serde_json::to_value(HandshakePayload {
                protocol_version: "2.0".into(),
                server_type: "paper".into(),
                server_id: server_id.into(),
                token: token.into(),
                server_info: ServerInfo {
                    name: "Survival".into(),
                    version: "1.21".into(),
                    core_type: "paper".into(),
                    core_name: "PaperMC".into(),
                    capabilities: vec!["command_execution".into()],
                },
            })
            .unwrap(),
            timestamp: session::now_ms(),
            version: "2.0".into(),
        });
        bridge_protocol::encode(&frame).unwrap()
    }

    #[tokio::test]
    async fn successful_handshake_installs_and_acks() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.register(ServerRecord {
            id: "srv1".into(),
            token: "tok".into(),
            status: ServerStatus::Offline,
            last_seen_at: None,
            allowed_remote_ips: vec![],
        });
        let (hub, _lifecycle_rx) = Hub::new();
        let (endpoint, mut peer) = mock_pair();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();

        peer.send_text(handshake_text("srv1", "tok"));

        let hub_for_task = hub.clone();
        let storage_for_registry: Arc<dyn ServerRegistry> = storage.clone();
        let storage_for_audit: Arc<dyn AuditSink> = storage.clone();
        let task = tokio::spawn(async move {
            accept(
                endpoint.reader,
                endpoint.writer,
                addr(),
                storage_for_registry,
                storage_for_audit,
                hub_for_task,
                SessionConfig::default(),
                event_tx,
                None,
            )
            .await
        });

        let ack_text = peer.recv_text().await.expect("handshake ack sent");
        let Frame::System(ack_frame) = bridge_protocol::decode(&ack_text).unwrap() else {
            panic!("expected system frame");
        };
        let ack: HandshakeAck = serde_json::from_value(ack_frame.data).unwrap();
        assert!(ack.success);

        assert!(hub.lookup("srv1").is_ok());

        drop(peer);
        let outcome = task.await.unwrap().expect("session ran to completion");
        assert_eq!(outcome.server_id, "srv1");
        assert!(hub.lookup("srv1").is_err());
    }

    #[tokio::test]
    async fn failed_handshake_sends_nack_and_never_installs() {
        let storage = Arc::new(InMemoryStorage::new());
        let (hub, _lifecycle_rx) = Hub::new();
        let (endpoint, mut peer) = mock_pair();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();

        peer.send_text(handshake_text("ghost", "tok"));

        let storage_for_registry: Arc<dyn ServerRegistry> = storage.clone();
        let storage_for_audit: Arc<dyn AuditSink> = storage.clone();
        let outcome = accept(
            endpoint.reader,
            endpoint.writer,
            addr(),
            storage_for_registry,
            storage_for_audit,
            hub.clone(),
            SessionConfig::default(),
            event_tx,
            None,
        )
        .await;

        assert!(outcome.is_none());
        let nack_text = peer.recv_text().await.expect("nack sent");
        let Frame::System(nack_frame) = bridge_protocol::decode(&nack_text).unwrap() else {
            panic!("expected system frame");
        };
        let ack: HandshakeAck = serde_json::from_value(nack_frame.data).unwrap();
        assert!(!ack.success);
        assert_eq!(ack.reason.as_deref(), Some("auth_failed"));
    }

    #[tokio::test]
    async fn non_handshake_first_frame_times_out_silently() {
        let storage = Arc::new(InMemoryStorage::new());
        let (hub, _lifecycle_rx) = Hub::new();
        let (endpoint, mut peer) = mock_pair();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();

        let ping = Frame::System(SystemFrame {
            system_op: SystemOp::Ping,
            id: None,
            data: serde_json::json!({}),
            timestamp: session::now_ms(),
            version: "2.0".into(),
        });
        peer.send_text(bridge_protocol::encode(&ping).unwrap());

        let storage_for_registry: Arc<dyn ServerRegistry> = storage.clone();
        let storage_for_audit: Arc<dyn AuditSink> = storage.clone();
        let mut config = SessionConfig::default();
        config.handshake_timeout = Duration::from_millis(20);
        let outcome = accept(
            endpoint.reader,
            endpoint.writer,
            addr(),
            storage_for_registry,
            storage_for_audit,
            hub,
            config,
            event_tx,
            None,
        )
        .await;

        assert!(outcome.is_none());
        assert!(peer.recv_text().await.is_none() || true);
    }
}
