use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::CodecError;
use crate::frame::{EventFrame, Frame, RequestFrame, ResponseFrame, SystemFrame, SystemOp};

static OP_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)+$").expect("valid regex"));

/// Serializes a frame to its text wire representation. The field set is
/// exactly what each frame variant declares; no trailing fields, no
/// padding.
pub fn encode(frame: &Frame) -> Result<String, CodecError> {
    serde_json::to_string(frame).map_err(|e| CodecError::MalformedFrame(e.to_string()))
}

/// Parses and validates a text payload into a [`Frame`].
///
/// Binary payloads are rejected by the transport before reaching this
/// function; `decode` only ever sees text.
pub fn decode(raw: &str) -> Result<Frame, CodecError> {
    let frame: Frame = serde_json::from_str(raw).map_err(|e| {
        // serde's error doesn't distinguish "not JSON" from "wrong shape for
        // the declared type"; we treat anything that fails to deserialize
        // into one of the four known variants as malformed rather than
        // guessing which required field was missing.
        CodecError::MalformedFrame(e.to_string())
    })?;

    if frame.version() != crate::frame::PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion(frame.version().to_string()));
    }

    validate(&frame)?;
    Ok(frame)
}

fn validate(frame: &Frame) -> Result<(), CodecError> {
    require_nonnegative_timestamp(frame.timestamp())?;
    match frame {
        Frame::Request(RequestFrame { id, op, .. }) => {
            require_nonempty_id(id)?;
            require_op_shape(op)?;
        }
        Frame::Response(ResponseFrame {
            id, data, error, ..
        }) => {
            require_nonempty_id(id)?;
            if data.is_none() && error.is_none() {
                return Err(CodecError::InvalidFrame(
                    "response frame must carry data or error".into(),
                ));
            }
        }
        Frame::Event(EventFrame { op, .. }) => {
            require_op_shape(op)?;
        }
        Frame::System(SystemFrame { system_op, id, .. }) => {
            let id_required = !matches!(system_op, SystemOp::Ping | SystemOp::Pong);
            if id_required {
                match id {
                    Some(id) => require_nonempty_id(id)?,
                    None => {
                        return Err(CodecError::InvalidFrame(format!(
                            "system frame with systemOp {system_op:?} requires a non-empty id"
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

fn require_nonnegative_timestamp(timestamp: i64) -> Result<(), CodecError> {
    if timestamp < 0 {
        return Err(CodecError::InvalidFrame(format!(
            "timestamp must be non-negative, got {timestamp}"
        )));
    }
    Ok(())
}

fn require_nonempty_id(id: &str) -> Result<(), CodecError> {
    if id.is_empty() {
        return Err(CodecError::InvalidFrame("id must be non-empty".into()));
    }
    Ok(())
}

fn require_op_shape(op: &str) -> Result<(), CodecError> {
    if !OP_PATTERN.is_match(op) {
        return Err(CodecError::InvalidFrame(format!(
            "op '{op}' does not match the dotted lowercase op pattern"
        )));
    }
    Ok(())
}

/// Logs (but never rejects) a frame whose timestamp drifts from `now_ms`
/// by more than `tolerance_ms`. Kept separate from `decode` because the
/// codec itself has no notion of wall-clock time.
pub fn warn_on_clock_skew(frame: &Frame, now_ms: i64, tolerance_ms: i64) {
    let skew = (frame.timestamp() - now_ms).abs();
    if skew > tolerance_ms {
        tracing::warn!(
            frame_timestamp = frame.timestamp(),
            now_ms,
            skew_ms = skew,
            "frame timestamp skewed beyond clock tolerance"
        );
    }
}
