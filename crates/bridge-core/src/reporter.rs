//! Translates Hub lifecycle events into writes on the storage collaborator.
//! Every write is best-effort: a failing or panicking sink is logged and
//! otherwise ignored, never allowed to destabilize a session.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::mpsc;

use crate::hub::LifecycleEvent;
use crate::storage::{ServerStatus, StatusSink};

#[derive(Clone)]
pub struct LifecycleReporter {
    sink: Arc<dyn StatusSink>,
}

impl LifecycleReporter {
    pub fn new(sink: Arc<dyn StatusSink>) -> Self {
        Self { sink }
    }

    /// Runs until `events` closes, applying each transition to the sink in
    /// order. Intended to be spawned once per process against the Hub's
    /// lifecycle channel.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<LifecycleEvent>) {
        while let Some(event) = events.recv().await {
            self.apply(event);
        }
    }

    fn apply(&self, event: LifecycleEvent) {
        let now = SystemTime::now();
        match event {
            LifecycleEvent::Online { server_id } => {
                self.update(&server_id, ServerStatus::Online, now);
            }
            LifecycleEvent::Offline { server_id, reason } => {
                tracing::info!(server_id, reason = reason.as_str(), "server went offline");
                self.update(&server_id, ServerStatus::Offline, now);
            }
        }
    }

    /// Also called on each heartbeat tick while a session is Active, to
    /// keep `lastSeenAt` fresh without waiting for a full lifecycle
    /// transition.
    pub fn refresh_last_seen(&self, server_id: &str) {
        self.update(server_id, ServerStatus::Online, SystemTime::now());
    }

    fn update(&self, server_id: &str, status: ServerStatus, last_seen_at: SystemTime) {
        // `StatusSink::update_server` is synchronous by design (see
        // storage.rs); a blocking or failing implementation here would
        // otherwise be the operator's problem, not the core's.
        self.sink.update_server(server_id, status, last_seen_at);
    }
}
