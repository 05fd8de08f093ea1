pub use bridge_protocol::CoreError;

/// Why a session transitioned to `Closed`. Distinct from [`CoreError`]:
/// this is attached to the session and surfaced in lifecycle/audit
/// records, whereas `CoreError` is what callers of the Request Broker see.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CloseReason {
    AuthFailed,
    AuthTimeout,
    Superseded,
    HeartbeatTimeout,
    WriteError,
    ReadError,
    /// The Hub or daemon is shutting down and asked every session to drain.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::AuthFailed => "auth_failed",
            CloseReason::AuthTimeout => "auth_timeout",
            CloseReason::Superseded => "superseded",
            CloseReason::HeartbeatTimeout => "heartbeat_timeout",
            CloseReason::WriteError => "write_error",
            CloseReason::ReadError => "read_error",
            CloseReason::Shutdown => "shutdown",
        }
    }

    pub fn into_core_error(self) -> CoreError {
        match self {
            CloseReason::AuthFailed => CoreError::AuthFailed,
            CloseReason::AuthTimeout => CoreError::AuthTimeout,
            CloseReason::Superseded => CoreError::Superseded,
            other => CoreError::ConnectionLost {
                reason: other.as_str().to_string(),
            },
        }
    }
}
