//! Wire-level types and codec for the Mochi bridge's U-WBP v2 protocol.
//!
//! This crate has no notion of sessions, connections, or time; it only
//! knows how to turn bytes into [`Frame`] values and back, and which
//! capability a given operation requires. Everything stateful lives in
//! `bridge-core`.

mod capability;
mod codec;
mod error;
mod frame;
mod ops;

pub use capability::{parse_capabilities, Capability, CapabilitySet};
pub use codec::{decode, encode, warn_on_clock_skew};
pub use error::{CodecError, CoreError};
pub use frame::{
    ErrorPayload, EventFrame, Frame, HandshakeAck, HandshakePayload, RequestFrame, ResponseFrame,
    ServerInfo, SystemFrame, SystemOp, PROTOCOL_VERSION,
};
pub use ops::{is_known_event, required_capability};
