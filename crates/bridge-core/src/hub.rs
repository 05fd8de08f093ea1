//! The process-wide registry of Active sessions, keyed by `serverId`.
//! The only global mutable state the core needs; everything else is
//! per-session (see design notes in `SPEC_FULL.md` §9).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;

use crate::error::{CloseReason, CoreError};
use crate::session::{Session, SessionState};

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Online { server_id: String },
    Offline { server_id: String, reason: CloseReason },
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InstallOutcome {
    Ok,
    SupersededPrior,
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub server_id: String,
    pub state: SessionState,
    pub connected_since: SystemTime,
    pub last_seen_at: SystemTime,
}

pub struct Hub {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    lifecycle_tx: mpsc::UnboundedSender<LifecycleEvent>,
    shutting_down: AtomicBool,
}

impl Hub {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            lifecycle_tx: tx,
            shutting_down: AtomicBool::new(false),
        });
        (hub, rx)
    }

    /// Atomically binds `session` to its `serverId`, superseding whatever
    /// Active session currently holds that id. The prior session's own
    /// `remove` call (once its run loop exits) will observe the binding
    /// no longer points to it and is a no-op — so an Offline event is
    /// never published for an id that still has a newer Active session.
    pub fn install(&self, session: Arc<Session>) -> Result<InstallOutcome, CoreError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(CoreError::ConnectionLost {
                reason: "hub_shutting_down".to_string(),
            });
        }

        let server_id = session.server_id().to_string();
        let prior = {
            let mut sessions = self.sessions.write().expect("hub registry poisoned");
            sessions.insert(server_id.clone(), session)
        };

        let _ = self
            .lifecycle_tx
            .send(LifecycleEvent::Online { server_id });

        match prior {
            Some(prior_session) => {
                prior_session.close(CloseReason::Superseded);
                Ok(InstallOutcome::SupersededPrior)
            }
            None => Ok(InstallOutcome::Ok),
        }
    }

    pub fn lookup(&self, server_id: &str) -> Result<Arc<Session>, CoreError> {
        self.sessions
            .read()
            .expect("hub registry poisoned")
            .get(server_id)
            .cloned()
            .ok_or(CoreError::NotConnected)
    }

    /// Removes `session`'s binding if and only if it is still the current
    /// occupant of its `serverId` slot — handles the race against a
    /// concurrent supersede cleanly.
    pub fn remove(&self, session: &Arc<Session>) {
        let removed = {
            let mut sessions = self.sessions.write().expect("hub registry poisoned");
            match sessions.get(session.server_id()) {
                Some(current) if Arc::ptr_eq(current, session) => {
                    sessions.remove(session.server_id());
                    true
                }
                _ => false,
            }
        };

        if removed {
            let _ = self.lifecycle_tx.send(LifecycleEvent::Offline {
                server_id: session.server_id().to_string(),
                reason: session.close_reason().unwrap_or(CloseReason::ReadError),
            });
        }
    }

    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .read()
            .expect("hub registry poisoned")
            .values()
            .map(|s| SessionSnapshot {
                server_id: s.server_id().to_string(),
                state: s.state(),
                connected_since: s.connected_since(),
                last_seen_at: s.last_seen_at(),
            })
            .collect()
    }

    /// Closes every Active session and rejects new installs. Waits up to
    /// `grace_deadline` for sessions to finish draining; sessions still
    /// open past that point are left to their own run loops to finish
    /// tearing down.
    pub async fn shutdown(&self, grace_deadline: Duration) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let to_close: Vec<Arc<Session>> = self
            .sessions
            .read()
            .expect("hub registry poisoned")
            .values()
            .cloned()
            .collect();
        for session in &to_close {
            session.close(CloseReason::Shutdown);
        }

        let deadline = tokio::time::Instant::now() + grace_deadline;
        while tokio::time::Instant::now() < deadline {
            if self.sessions.read().expect("hub registry poisoned").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
