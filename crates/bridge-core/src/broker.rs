//! The stable API operator services call: route a request to the right
//! session's socket and await its correlated response under a deadline.

use std::sync::Arc;
use std::time::Duration;

use bridge_protocol::{required_capability, Frame};
use serde_json::Value;

use crate::error::CoreError;
use crate::hub::Hub;

#[derive(Clone)]
pub struct RequestBroker {
    hub: Arc<Hub>,
}

impl RequestBroker {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// Resolves `server_id` in the Hub, checks the op's required capability
    /// against the session's advertised set, then awaits a correlated
    /// response. `data` with `success=false` is translated into
    /// [`CoreError::RemoteError`], preserving the remote code verbatim.
    pub async fn execute(
        &self,
        server_id: &str,
        op: &str,
        data: Value,
        timeout: Duration,
    ) -> Result<Value, CoreError> {
        let session = self.hub.lookup(server_id)?;

        if let Some(capability) = required_capability(op) {
            if !session.has_capability(capability) {
                return Err(CoreError::UnsupportedCapability);
            }
        }

        let response = session.request(op, data, timeout).await?;

        match response {
            Frame::Response(response) => {
                if response.success {
                    Ok(response.data.unwrap_or(Value::Null))
                } else {
                    let error = response.error.unwrap_or(bridge_protocol::ErrorPayload {
                        code: "remote_error".to_string(),
                        message: "remote reported failure without detail".to_string(),
                    });
                    Err(CoreError::RemoteError {
                        code: error.code,
                        message: error.message,
                    })
                }
            }
            other => {
                tracing::warn!(server_id, op, "session resolved a request with a non-response frame");
                Err(CoreError::ConnectionLost {
                    reason: format!("unexpected frame type for request: {other:?}"),
                })
            }
        }
    }

    /// Abandons an in-flight `execute` without affecting the remote side.
    pub fn cancel(&self, server_id: &str, request_id: &str) {
        if let Ok(session) = self.hub.lookup(server_id) {
            session.cancel_request(request_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionConfig};
    use crate::transport::testing::mock_pair;
    use bridge_protocol::Capability;
    use tokio::sync::mpsc;

    fn spawn_installed_session(hub: &Arc<Hub>, server_id: &str, capabilities: Vec<Capability>) -> crate::transport::testing::MockPeer {
        let (endpoint, peer) = mock_pair();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(
            server_id.into(),
            "127.0.0.1:1".into(),
            capabilities.into_iter().collect(),
            "2.0".into(),
            SessionConfig::default(),
            outbound_tx,
        ));
        hub.install(session.clone()).unwrap();
        tokio::spawn(async move {
            crate::session::run_loop(session, endpoint.reader, endpoint.writer, outbound_rx, event_tx, None).await;
        });
        peer
    }

    #[tokio::test]
    async fn not_connected_when_hub_has_no_such_server() {
        let (hub, _rx) = Hub::new();
        let broker = RequestBroker::new(hub);
        let result = broker
            .execute("ghost", "command.execute", serde_json::json!({}), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(CoreError::NotConnected)));
    }

    #[tokio::test]
    async fn unsupported_capability_is_rejected_before_sending() {
        let (hub, _rx) = Hub::new();
        let mut peer = spawn_installed_session(&hub, "srv1", vec![Capability::ServerInfo]);
        let broker = RequestBroker::new(hub);
        let result = broker
            .execute("srv1", "command.execute", serde_json::json!({}), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(CoreError::UnsupportedCapability)));
        let nothing_sent = tokio::time::timeout(Duration::from_millis(20), peer.recv_text()).await;
        assert!(nothing_sent.is_err(), "capability pre-flight must not touch the socket");
    }

    #[tokio::test]
    async fn success_unwraps_response_data() {
        let (hub, _rx) = Hub::new();
        let mut peer = spawn_installed_session(&hub, "srv1", vec![Capability::CommandExecution]);
        let broker = RequestBroker::new(hub);
        let call = tokio::spawn({
            let broker = broker.clone();
            async move {
                broker
                    .execute("srv1", "command.execute", serde_json::json!({"command": "list"}), Duration::from_secs(5))
                    .await
            }
        });

        let sent = peer.recv_text().await.unwrap();
        let Frame::Request(req) = bridge_protocol::decode(&sent).unwrap() else {
            panic!()
        };
        let response = Frame::Response(bridge_protocol::ResponseFrame {
            id: req.id,
            success: true,
            data: Some(serde_json::json!({"output": ["3 players"]})),
            error: None,
            timestamp: 0,
            version: "2.0".into(),
        });
        peer.send_text(bridge_protocol::encode(&response).unwrap());

        let result = call.await.unwrap().unwrap();
        assert_eq!(result["output"][0], "3 players");
    }

    #[tokio::test]
    async fn remote_failure_becomes_remote_error() {
        let (hub, _rx) = Hub::new();
        let mut peer = spawn_installed_session(&hub, "srv1", vec![Capability::CommandExecution]);
        let broker = RequestBroker::new(hub);
        let call = tokio::spawn({
            let broker = broker.clone();
            async move {
                broker
                    .execute("srv1", "command.execute", serde_json::json!({"command": "stop"}), Duration::from_secs(5))
                    .await
            }
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
            timestamp: 0,
            version: "2.0".into(),
        });
        peer.send_text(bridge_protocol::encode(&response).unwrap());

        let result = call.await.unwrap();
        assert!(matches!(
            result,
            Err(CoreError::RemoteError { code, .. }) if code == "command_blacklisted"
        ));
    }
}
