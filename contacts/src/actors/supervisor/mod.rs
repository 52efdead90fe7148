//! Connection supervisor.
//!
//! One supervisor task runs per contact. It races an outbound connector
//! against inbound connection offers, arbitrates which connection to keep
//! when both sides connect at once, and owns the lifetime of the protocol
//! loop that runs on the active connection.

use std::time::Duration;
use thiserror::Error;

mod actor;
pub(crate) use actor::Actor;

mod ingress;
pub(crate) use ingress::{mailbox, Inbox, Mailbox};

/// Capacity of the assignment and signal mailboxes.
pub(crate) const MAILBOX_SIZE: usize = 1;

/// An active connection older than this is replaced by any fresh one.
pub(crate) const REPLACE_AFTER: Duration = Duration::from_secs(30);

/// Why a connection offer was not adopted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum Rejection {
    #[error("duplicate assignment of the active connection")]
    Duplicate,
    #[error("connection is not authenticated")]
    NotAuthenticated,
    #[error("connection hostname {actual} does not match contact hostname {expected}")]
    HostnameMismatch { expected: String, actual: String },
    #[error("using existing connection")]
    ExistingPreferred,
}
