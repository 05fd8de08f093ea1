//! The socket abstraction a [`crate::session::Session`] runs its reader and
//! writer loops over. Kept as a pair of blanket-implemented marker traits
//! over `futures_util::Stream`/`Sink` rather than a hand-rolled async trait,
//! so the same session code drives a live `axum` WebSocket in the daemon and
//! an in-memory duplex in tests without either side needing dynamic
//! dispatch.

use futures_util::{Sink, Stream};
use thiserror::Error;

/// A decoded unit of traffic at the transport boundary, one level below
/// U-WBP v2 frames. Binary payloads are rejected by the codec, not here;
/// the transport only distinguishes "text arrived" from "peer is gone".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    Text(String),
    Close,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport read error: {0}")]
    Read(String),
    #[error("transport write error: {0}")]
    Write(String),
}

pub trait IncomingTransport:
    Stream<Item = Result<TransportMessage, TransportError>> + Unpin + Send
{
}
impl<T> IncomingTransport for T where
    T: Stream<Item = Result<TransportMessage, TransportError>> + Unpin + Send
{
}

pub trait OutgoingTransport: Sink<TransportMessage, Error = TransportError> + Unpin + Send {}
impl<T> OutgoingTransport for T where T: Sink<TransportMessage, Error = TransportError> + Unpin + Send
{}

/// An in-memory duplex transport pair for tests. One end is driven by the
/// [`crate::session::Session`] under test; the other is held by the test
/// and used to simulate the remote connector.
#[cfg(test)]
pub mod testing {
    use super::{TransportError, TransportMessage};
    use futures_util::Sink;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::sync::mpsc;

    pub struct ChannelStream(mpsc::UnboundedReceiver<Result<TransportMessage, TransportError>>);

    impl futures_util::Stream for ChannelStream {
        type Item = Result<TransportMessage, TransportError>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.0.poll_recv(cx)
        }
    }

    pub struct ChannelSink(mpsc::UnboundedSender<Result<TransportMessage, TransportError>>);

    impl Sink<TransportMessage> for ChannelSink {
        type Error = TransportError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: TransportMessage) -> Result<(), Self::Error> {
            self.0
                .send(Ok(item))
                .map_err(|_| TransportError::Write("peer dropped".into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    /// One half of an in-memory duplex: what a [`crate::session::Session`]
    /// consumes.
    pub struct MockEndpoint {
        pub reader: ChannelStream,
        pub writer: ChannelSink,
    }

    /// The other half: what the test holds to play the role of the remote
    /// connector.
    pub struct MockPeer {
        pub sender: mpsc::UnboundedSender<Result<TransportMessage, TransportError>>,
        pub receiver: mpsc::UnboundedReceiver<Result<TransportMessage, TransportError>>,
    }

    impl MockPeer {
        pub fn send_text(&self, text: impl Into<String>) {
            let _ = self.sender.send(Ok(TransportMessage::Text(text.into())));
        }

        pub async fn recv_text(&mut self) -> Option<String> {
            match self.receiver.recv().await {
                Some(Ok(TransportMessage::Text(text))) => Some(text),
                _ => None,
            }
        }
    }

    /// Builds a connected pair: frames sent on the endpoint's writer arrive
    /// on the peer's receiver, and frames sent via the peer arrive on the
    /// endpoint's reader.
    pub fn mock_pair() -> (MockEndpoint, MockPeer) {
        let (to_peer_tx, to_peer_rx) = mpsc::unbounded_channel();
        let (to_endpoint_tx, to_endpoint_rx) = mpsc::unbounded_channel();
        let endpoint = MockEndpoint {
            reader: ChannelStream(to_endpoint_rx),
            writer: ChannelSink(to_peer_tx),
        };
        let peer = MockPeer {
            sender: to_endpoint_tx,
            receiver: to_peer_rx,
        };
        (endpoint, peer)
    }
}
