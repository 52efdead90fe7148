//! Outbound connector.
//!
//! Spawned by the supervisor whenever a contact is enabled and has no
//! active connection. Dials the peer through the overlay, negotiates and
//! authenticates, resolves the contact-request state, and hands the ready
//! connection back through the assignment mailbox. The connector never
//! gives up on its own; the supervisor aborts it when anything else
//! happens, and abort is the only way it exits without delivering.

use rand::Rng;
use std::time::Duration;

mod actor;
pub(crate) use actor::spawn;

mod request;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Jittered exponential backoff between connection attempts. Waiting is an
/// abort point, so cancellation is honored mid-backoff.
pub(crate) struct Backoff {
    delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            delay: INITIAL_BACKOFF,
        }
    }
}

impl Backoff {
    pub(crate) async fn wait(&mut self) {
        let jitter = rand::thread_rng().gen_range(Duration::ZERO..=self.delay / 2);
        tokio::time::sleep(self.delay + jitter).await;
        self.delay = (self.delay * 2).min(MAX_BACKOFF);
    }
}
