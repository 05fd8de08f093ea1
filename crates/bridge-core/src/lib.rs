//! Session, hub, request broker and event dispatch for the Mochi bridge.
//!
//! This crate owns every piece of state that lives longer than a single
//! wire frame: the connected-server registry, the per-session pending
//! table, the event fan-out, and the handshake verification that gates
//! entry into all of it. `bridge-protocol` below it knows nothing of
//! sessions or time; `bridge-daemon` above it knows nothing of the state
//! machine, only how to accept sockets and wire this crate's pieces
//! together.

mod authenticator;
mod broker;
mod connection;
mod dispatcher;
mod error;
mod hub;
mod pending;
mod reporter;
mod session;
mod storage;
mod transport;

pub use authenticator::{authenticate, HandshakeOutcome};
pub use broker::RequestBroker;
pub use connection::{accept, AcceptOutcome};
pub use dispatcher::{DispatchedEvent, EventDispatcher, EventFilter, Subscriber, SubscriptionId};
pub use error::CloseReason;
pub use hub::{Hub, InstallOutcome, LifecycleEvent, SessionSnapshot};
pub use reporter::LifecycleReporter;
pub use session::{InboundEvent, Session, SessionConfig, SessionState};
pub use storage::{
    AuditSink, AuthAuditRecord, AuthOutcome, InMemoryStorage, ServerRecord, ServerRegistry,
    ServerStatus, StatusSink,
};
pub use transport::{IncomingTransport, OutgoingTransport, TransportError, TransportMessage};


pub use bridge_protocol::CoreError;
