//! Seams to the overlay transport and the wire protocol.
//!
//! The supervisor and connector are written against these traits; the real
//! overlay dialer and protocol engine live in other crates, and the
//! scriptable doubles in [`crate::mocks`] back the tests here.

use crate::identity::PrivateKey;
use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from dialing and upgrading connections. All of them are retried
/// by the outbound connector; none reach the supervisor.
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("dial failed: {0}")]
    DialFailed(String),
    #[error("version negotiation failed: {0}")]
    NegotiationFailed(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
}

/// Errors from an established connection.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,
    #[error("connection handler interrupted unexpectedly")]
    UnexpectedInterrupt,
    #[error("channel open failed: {0}")]
    ChannelOpenFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// An authenticated protocol connection to a peer.
///
/// Handles are cheap to clone and all refer to the same underlying
/// connection; the transport is torn down when [`Connection::close`] is
/// called or the last handle drops. At most one [`Connection::process`]
/// loop may run per connection.
pub trait Connection: Clone + Send + Sync + 'static {
    /// Stable identity of the underlying connection, used to detect
    /// duplicate assignment of the same connection.
    fn id(&self) -> u64;

    /// Whether the peer initiated this connection.
    fn is_inbound(&self) -> bool;

    /// Bare onion hostname the remote side authenticated as.
    fn remote_hostname(&self) -> String;

    /// Whether the connection is authenticated under `scheme`.
    fn is_authenticated(&self, scheme: &str) -> bool;

    /// Runs the protocol loop until the connection dies or is interrupted.
    /// Returns `Ok(())` only after a graceful [`Connection::interrupt`].
    fn process(&self) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Opens the contact-request channel
    /// ([`crate::CHANNEL_CONTACT_REQUEST`]), delivering `nickname` and
    /// `message` to the peer. The receiver yields response tokens as the
    /// peer emits them ("Pending" followed by a final token).
    fn open_request_channel(
        &self,
        nickname: &str,
        message: &str,
    ) -> impl Future<Output = Result<mpsc::Receiver<String>, ConnectionError>> + Send;

    /// Delivers a chat message to the peer.
    fn send_message(&self, text: &str) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Gracefully breaks the running protocol loop, leaving the transport
    /// usable.
    fn interrupt(&self);

    /// Closes the transport. Safe to call repeatedly and in any state; a
    /// running protocol loop terminates with an error.
    fn close(&self);
}

/// Overlay dialer plus the wire protocol's outbound client operations.
pub trait Network: Clone + Send + Sync + 'static {
    /// An un-negotiated overlay stream. Dropping it closes it.
    type Stream: Send + 'static;
    type Connection: Connection;

    /// Dials `host_port` (e.g. `<host>.onion:9878`) through the overlay.
    fn dial(
        &self,
        host_port: &str,
    ) -> impl Future<Output = Result<Self::Stream, NetworkError>> + Send;

    /// Negotiates the wire protocol version as the outbound client.
    /// `hostname` is the bare onion hostname being connected to.
    fn negotiate_outbound(
        &self,
        stream: Self::Stream,
        hostname: &str,
    ) -> impl Future<Output = Result<Self::Connection, NetworkError>> + Send;

    /// Authenticates to the peer as a client with the local private key.
    /// Returns whether the peer already recognizes us as a contact.
    fn authenticate_as_client(
        &self,
        connection: &Self::Connection,
        key: &PrivateKey,
    ) -> impl Future<Output = Result<bool, NetworkError>> + Send;
}
