//! Trait boundary to the collaborators the core consumes but does not own:
//! the server registry, the status sink, and the audit sink. The core only
//! ever reads a token and writes status/audit records through these
//! traits; persistence itself is someone else's problem.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::SystemTime;

/// A server's registered identity, as far as the core cares.
#[derive(Debug, Clone)]
pub struct ServerRecord {
    pub id: String,
    pub token: String,
    pub status: ServerStatus,
    pub last_seen_at: Option<SystemTime>,
    /// If non-empty, handshakes from addresses outside this list are
    /// rejected at step 4 of authentication.
    pub allowed_remote_ips: Vec<IpAddr>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ServerStatus {
    Online,
    Offline,
}

/// Read access to registered servers and their handshake tokens.
pub trait ServerRegistry: Send + Sync {
    fn get_server(&self, server_id: &str) -> Option<ServerRecord>;

    /// Constant-time verification of the handshake token against the
    /// server's stored verifier.
    fn verify_token(&self, server_id: &str, token: &str) -> bool {
        match self.get_server(server_id) {
            Some(record) => {
                use subtle::ConstantTimeEq;
                record.token.as_bytes().ct_eq(token.as_bytes()).into()
            }
            None => false,
        }
    }
}

/// Write access for lifecycle status updates.
pub trait StatusSink: Send + Sync {
    fn update_server(&self, server_id: &str, status: ServerStatus, last_seen_at: SystemTime);
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AuthOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct AuthAuditRecord {
    pub server_id: String,
    pub remote_addr: String,
    pub outcome: AuthOutcome,
    pub reason: Option<String>,
}

/// Write access for authentication audit records.
pub trait AuditSink: Send + Sync {
    fn log_auth(&self, record: AuthAuditRecord);
}

/// An in-process, non-persistent reference implementation of all three
/// storage traits, suitable for tests and for running the daemon without a
/// real datastore wired in. Not a production persistence substitute: a
/// process restart forgets every record.
#[derive(Default)]
pub struct InMemoryStorage {
    servers: Mutex<HashMap<String, ServerRecord>>,
    audit_log: Mutex<Vec<AuthAuditRecord>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, record: ServerRecord) {
        self.servers
            .lock()
            .expect("storage mutex poisoned")
            .insert(record.id.clone(), record);
    }

    pub fn audit_log(&self) -> Vec<AuthAuditRecord> {
        self.audit_log.lock().expect("storage mutex poisoned").clone()
    }
}

impl ServerRegistry for InMemoryStorage {
    fn get_server(&self, server_id: &str) -> Option<ServerRecord> {
        self.servers
            .lock()
            .expect("storage mutex poisoned")
            .get(server_id)
            .cloned()
    }
}

impl StatusSink for InMemoryStorage {
    fn update_server(&self, server_id: &str, status: ServerStatus, last_seen_at: SystemTime) {
        let mut servers = self.servers.lock().expect("storage mutex poisoned");
        if let Some(record) = servers.get_mut(server_id) {
            record.status = status;
            record.last_seen_at = Some(last_seen_at);
        } else {
            tracing::warn!(server_id, "status update for unknown server dropped");
        }
    }
}

impl AuditSink for InMemoryStorage {
    fn log_auth(&self, record: AuthAuditRecord) {
        self.audit_log
            .lock()
            .expect("storage mutex poisoned")
            .push(record);
    }
}
