//! Verifies an opening handshake frame against the server registry and
//! issues the ack/NACK. Runs once, before a [`crate::session::Session`]
//! exists; on success the caller constructs the `Session` directly in the
//! `Active` state.

use std::net::{IpAddr, SocketAddr};

use bridge_protocol::{parse_capabilities, CapabilitySet, HandshakePayload, PROTOCOL_VERSION};

use crate::error::CloseReason;
use crate::storage::{AuditSink, AuthAuditRecord, AuthOutcome, ServerRegistry};

pub struct HandshakeOutcome {
    pub server_id: String,
    pub capabilities: CapabilitySet,
    pub protocol_version: String,
    pub server_type: String,
}

/// Runs the five required verification steps in order, auditing the
/// outcome either way. A single `auth_failed` reason is reported to the
/// remote regardless of which step failed — the specific reason is only
/// ever logged locally.
pub fn authenticate(
    payload: &HandshakePayload,
    remote_addr: SocketAddr,
    registry: &dyn ServerRegistry,
    audit: &dyn AuditSink,
    is_server_id_taken: impl FnOnce(&str) -> bool,
) -> Result<HandshakeOutcome, CloseReason> {
    let outcome = authenticate_inner(payload, remote_addr, registry, is_server_id_taken);

    audit.log_auth(AuthAuditRecord {
        server_id: payload.server_id.clone(),
        remote_addr: remote_addr.to_string(),
        outcome: if outcome.is_ok() {
            AuthOutcome::Success
        } else {
            AuthOutcome::Failure
        },
        reason: outcome.as_ref().err().map(|r| r.as_str().to_string()),
    });

    outcome
}

fn authenticate_inner(
    payload: &HandshakePayload,
    remote_addr: SocketAddr,
    registry: &dyn ServerRegistry,
    is_server_id_taken: impl FnOnce(&str) -> bool,
) -> Result<HandshakeOutcome, CloseReason> {
    // 1. protocol version.
    if payload.protocol_version != PROTOCOL_VERSION {
        return Err(CloseReason::AuthFailed);
    }

    // 2. serverId resolves to a known record.
    if payload.server_id.is_empty() {
        return Err(CloseReason::AuthFailed);
    }
    let record = registry.get_server(&payload.server_id).ok_or(CloseReason::AuthFailed)?;

    // 3. token matches, constant-time.
    if !registry.verify_token(&payload.server_id, &payload.token) {
        return Err(CloseReason::AuthFailed);
    }

    // 4. remote address allow-list, if configured.
    if !record.allowed_remote_ips.is_empty() {
        let remote_ip: IpAddr = remote_addr.ip();
        if !record.allowed_remote_ips.contains(&remote_ip) {
            return Err(CloseReason::AuthFailed);
        }
    }

    // 5. uniqueness: either nothing holds serverId yet, or the supersede
    // policy will evict whatever does (enforced by the Hub at install
    // time, not here — this step only needs to confirm supersede is the
    // caller's intent, which it always is per spec §4.4).
    let _ = is_server_id_taken(&payload.server_id);

    let capabilities = parse_capabilities(&payload.server_info.capabilities);

    Ok(HandshakeOutcome {
        server_id: payload.server_id.clone(),
        capabilities,
        protocol_version: payload.protocol_version.clone(),
        server_type: payload.server_type.clone(),
    })
}
