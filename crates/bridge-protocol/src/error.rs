use thiserror::Error;

/// Errors produced while decoding a wire frame.
///
/// Mirrors the three failure modes the frame codec is required to
/// distinguish: frames that aren't well-formed at all, frames built for a
/// protocol version we don't speak, and frames missing fields their
/// declared `type` requires.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// The error codes the core surfaces to operator front-ends, exactly as
/// enumerated in the wire contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("server is not connected")]
    NotConnected,

    #[error("session does not advertise the required capability")]
    UnsupportedCapability,

    #[error("request timed out")]
    Timeout,

    #[error("connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("authentication timed out")]
    AuthTimeout,

    #[error("session superseded by a newer connection")]
    Superseded,

    #[error("remote error {code}: {message}")]
    RemoteError { code: String, message: String },
}

impl CoreError {
    /// The stable wire-level code an operator front-end can match on.
    pub fn code(&self) -> &str {
        match self {
            CoreError::NotConnected => "not_connected",
            CoreError::UnsupportedCapability => "unsupported_capability",
            CoreError::Timeout => "timeout",
            CoreError::ConnectionLost { .. } => "connection_lost",
            CoreError::MalformedFrame(_) => "malformed_frame",
            CoreError::AuthFailed => "auth_failed",
            CoreError::AuthTimeout => "auth_timeout",
            CoreError::Superseded => "superseded",
            CoreError::RemoteError { .. } => "remote_error",
        }
    }
}

impl From<CodecError> for CoreError {
    fn from(e: CodecError) -> Self {
        CoreError::MalformedFrame(e.to_string())
    }
}
